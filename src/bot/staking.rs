//! Sequential (martingale-style) stake sizing.
//!
//! The policy is stateless: the next stake is derived from the most recently
//! closed alert alone, so replaying the closed-alert history reproduces every
//! stake that was ever proposed.
//!
//!   no history, or last outcome WIN      → (base, 1)
//!   last non-win with sequence s < max   → (base · 2^s, s + 1)
//!   last non-win with sequence s >= max  → (base, 1)
//!
//! The exponent is the *previous* sequence, so sequence 1 always pays `base`.
use serde::Serialize;

use crate::ledger::{ClosedAlert, Outcome};

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct StakingPolicy {
    pub base_stake: f64,
    /// Longest loss-recovery run before the sequence resets.
    pub max_chase_level: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct StakePlan {
    pub stake: f64,
    pub sequence: u32,
}

impl StakingPolicy {
    pub fn new(base_stake: f64, max_chase_level: u32) -> Self {
        StakingPolicy {
            base_stake,
            max_chase_level,
        }
    }

    pub fn next(&self, last_closed: Option<&ClosedAlert>) -> StakePlan {
        let reset = StakePlan {
            stake: self.base_stake,
            sequence: 1,
        };
        let Some(last) = last_closed else {
            return reset;
        };
        if last.outcome == Outcome::Win {
            return reset;
        }

        let prev = last.alert.sequence;
        if prev >= self.max_chase_level {
            // Recovery ceiling reached
            return reset;
        }
        StakePlan {
            stake: self.base_stake * 2f64.powi(prev as i32),
            sequence: prev + 1,
        }
    }
}
