use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Kind of alert. Each variant carries its own resolution rules, see [`AlertType::rules`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AlertType {
    /// Correct-score call resolved at halftime.
    Regular,
    /// Correct-score call resolved only once the match is over.
    FullTime,
}

/// How an alert of a given type gets its outcome.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ResolutionRules {
    /// Resolved on the fast path when the feed reports the checkpoint phase.
    pub resolves_at_checkpoint: bool,
    /// Rule applied to an authoritative terminal snapshot; `None` means the
    /// type has no terminal rule and a stale sweep closes it as a loss.
    pub terminal_rule: Option<TerminalRule>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TerminalRule {
    /// Win iff the final score equals the trigger score.
    ExactScore,
}

const RESOLUTION_TABLE: &[(AlertType, ResolutionRules)] = &[
    (
        AlertType::Regular,
        ResolutionRules {
            resolves_at_checkpoint: true,
            terminal_rule: None,
        },
    ),
    (
        AlertType::FullTime,
        ResolutionRules {
            resolves_at_checkpoint: false,
            terminal_rule: Some(TerminalRule::ExactScore),
        },
    ),
];

impl AlertType {
    pub fn as_str(self) -> &'static str {
        match self {
            AlertType::Regular => "regular",
            AlertType::FullTime => "full_time",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value.trim().to_lowercase().replace('-', "_").as_str() {
            "regular" => Some(AlertType::Regular),
            "full_time" | "fulltime" | "ft" => Some(AlertType::FullTime),
            _ => None,
        }
    }

    pub fn rules(self) -> ResolutionRules {
        RESOLUTION_TABLE
            .iter()
            .find(|(t, _)| *t == self)
            .map(|(_, rules)| *rules)
            .unwrap_or(ResolutionRules {
                resolves_at_checkpoint: false,
                terminal_rule: None,
            })
    }
}

impl std::fmt::Display for AlertType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Recorded result of a closed alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Outcome {
    Win,
    Loss,
    /// Void: the match was cancelled, postponed or abandoned.
    Push,
    /// Terminal state could not be scored.
    Error,
}

impl Outcome {
    pub fn as_str(self) -> &'static str {
        match self {
            Outcome::Win => "win",
            Outcome::Loss => "loss",
            Outcome::Push => "push",
            Outcome::Error => "error",
        }
    }

    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "win" => Some(Outcome::Win),
            "loss" => Some(Outcome::Loss),
            "push" => Some(Outcome::Push),
            "error" => Some(Outcome::Error),
            _ => None,
        }
    }
}

impl std::fmt::Display for Outcome {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An alert awaiting its outcome. Keyed by entity id.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OpenAlert {
    pub entity_id: String,
    /// "Home vs Away"
    pub display_name: String,
    pub competition: String,
    /// Country or category the competition belongs to
    pub region: String,
    pub alert_type: AlertType,
    /// Score at the moment the alert was raised, "H-A"
    pub trigger_score: String,
    pub stake: f64,
    /// Position within the current loss-recovery run (>= 1)
    pub sequence: u32,
    pub placed_at: DateTime<Utc>,
}

impl OpenAlert {
    pub fn close(self, outcome: Outcome, resolved_at: DateTime<Utc>) -> ClosedAlert {
        ClosedAlert {
            id: None,
            alert: self,
            outcome,
            resolved_at,
        }
    }
}

/// An open alert plus its outcome. Append-only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ClosedAlert {
    pub id: Option<i64>,
    #[serde(flatten)]
    pub alert: OpenAlert,
    pub outcome: Outcome,
    pub resolved_at: DateTime<Utc>,
}

/// Per-entity tracking state, created on first sighting of a live entity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedEntityState {
    pub entity_id: String,
    /// The trigger window has been evaluated for this entity.
    pub alert_evaluated: bool,
    /// A lock-held notice was already logged during the current lock episode.
    pub lock_notice_logged: bool,
    pub recorded_score_at_alert: Option<String>,
}

impl TrackedEntityState {
    pub fn new(entity_id: &str) -> Self {
        TrackedEntityState {
            entity_id: entity_id.to_string(),
            alert_evaluated: false,
            lock_notice_logged: false,
            recorded_score_at_alert: None,
        }
    }
}

/// Result of an atomic create of an open alert.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CreateOutcome {
    Created,
    /// Another writer already holds the key (entity id or the global lock slot).
    Conflict,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Stats {
    pub open_alerts: i64,
    pub closed_alerts: i64,
    pub wins: i64,
    pub losses: i64,
    pub pushes: i64,
    pub errors: i64,
    pub total_staked: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_alert_type_rules() {
        let regular = AlertType::Regular.rules();
        assert!(regular.resolves_at_checkpoint);
        assert_eq!(regular.terminal_rule, None);

        let full_time = AlertType::FullTime.rules();
        assert!(!full_time.resolves_at_checkpoint);
        assert_eq!(full_time.terminal_rule, Some(TerminalRule::ExactScore));
    }

    #[test]
    fn test_alert_type_parse() {
        assert_eq!(AlertType::parse("regular"), Some(AlertType::Regular));
        assert_eq!(AlertType::parse("full-time"), Some(AlertType::FullTime));
        assert_eq!(AlertType::parse("Full_Time"), Some(AlertType::FullTime));
        assert_eq!(AlertType::parse("over"), None);
    }

    #[test]
    fn test_outcome_parse_is_case_sensitive() {
        assert_eq!(Outcome::parse("push"), Some(Outcome::Push));
        assert_eq!(Outcome::parse("WIN"), None);
    }

    #[test]
    fn test_close_keeps_alert_fields() {
        let placed_at = Utc::now();
        let alert = OpenAlert {
            entity_id: "42".into(),
            display_name: "Arsenal vs Chelsea".into(),
            competition: "Premier League".into(),
            region: "England".into(),
            alert_type: AlertType::Regular,
            trigger_score: "1-1".into(),
            stake: 20.0,
            sequence: 2,
            placed_at,
        };
        let closed = alert.clone().close(Outcome::Loss, placed_at);
        assert_eq!(closed.alert, alert);
        assert_eq!(closed.outcome, Outcome::Loss);
        assert_eq!(closed.id, None);
    }
}
