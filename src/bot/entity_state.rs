use std::collections::{BTreeSet, HashSet};

use crate::ledger::{OpenAlert, Outcome, TerminalRule};

/// Normalized match phase, derived from upstream free text.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    FirstPeriod,
    SecondPeriod,
    /// The resolution boundary (half-time).
    Checkpoint,
    Finished,
    Other,
}

/// Map a free-text status to a [`Phase`].
///
/// Checkpoint wins over everything else so "Halftime" never reads as a first
/// or second period. Unknown text (including "interrupted") maps to `Other`.
pub fn normalize_status(status: &str) -> Phase {
    let s = status.trim().to_uppercase();

    if s.contains("HALFTIME") || s.contains("HALF TIME") || s.contains("HALF-TIME") || s == "HT" {
        return Phase::Checkpoint;
    }
    if s.contains("1ST HALF") || s.contains("FIRST HALF") || s == "1H" {
        return Phase::FirstPeriod;
    }
    if s.contains("2ND HALF") || s.contains("SECOND HALF") || s == "2H" {
        return Phase::SecondPeriod;
    }
    const FINISHED: &[&str] = &[
        "FINISHED",
        "ENDED",
        "CANCELLED",
        "CANCELED",
        "POSTPONED",
        "ABANDONED",
        "AFTER EXTRA TIME",
        "AFTER PENALTIES",
    ];
    if FINISHED.iter().any(|f| s.contains(f)) || matches!(s.as_str(), "FT" | "AET" | "PEN" | "AP")
    {
        return Phase::Finished;
    }
    Phase::Other
}

/// Statuses under which a match did not produce a result.
pub fn is_void_status(status: &str) -> bool {
    let s = status.trim().to_uppercase();
    ["CANCELLED", "CANCELED", "POSTPONED", "ABANDONED"]
        .iter()
        .any(|v| s.contains(v))
}

/// Trigger window and qualifying score patterns.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerRules {
    pub window: BTreeSet<i32>,
    pub patterns: HashSet<String>,
}

impl TriggerRules {
    pub fn new(
        window: impl IntoIterator<Item = i32>,
        patterns: impl IntoIterator<Item = String>,
    ) -> Self {
        TriggerRules {
            window: window.into_iter().collect(),
            patterns: patterns.into_iter().collect(),
        }
    }

    pub fn in_window(&self, minute: Option<i32>) -> bool {
        minute.is_some_and(|m| self.window.contains(&m))
    }

    pub fn qualifies(&self, score: Option<&str>) -> bool {
        score.is_some_and(|s| self.patterns.contains(s))
    }
}

/// What the engine should do with one snapshot of a tracked entity.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    EvaluateWindow,
    AwaitCheckpoint,
    ResolveAtCheckpoint,
    /// Finished without an open alert: drop tracked state.
    Discard,
    Track,
}

/// Per-entity lifecycle, as seen from the tracked state plus the ledger.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntityLifecycle {
    Idle,
    Evaluated,
    AwaitingCheckpoint,
}

impl EntityLifecycle {
    pub fn of(alert_evaluated: bool, has_open: bool) -> Self {
        match (has_open, alert_evaluated) {
            (true, _) => EntityLifecycle::AwaitingCheckpoint,
            (false, true) => EntityLifecycle::Evaluated,
            (false, false) => EntityLifecycle::Idle,
        }
    }
}

impl std::fmt::Display for EntityLifecycle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            EntityLifecycle::Idle => "idle",
            EntityLifecycle::Evaluated => "evaluated",
            EntityLifecycle::AwaitingCheckpoint => "awaiting-checkpoint",
        };
        write!(f, "{}", s)
    }
}

/// Pure transition function. An open alert takes precedence over everything:
/// it is resolved at the checkpoint and otherwise left alone.
pub fn decide(
    phase: Phase,
    minute: Option<i32>,
    alert_evaluated: bool,
    has_open: bool,
    rules: &TriggerRules,
) -> Action {
    if has_open {
        return if phase == Phase::Checkpoint {
            Action::ResolveAtCheckpoint
        } else {
            Action::AwaitCheckpoint
        };
    }
    match phase {
        Phase::FirstPeriod if !alert_evaluated && rules.in_window(minute) => Action::EvaluateWindow,
        Phase::Finished => Action::Discard,
        _ => Action::Track,
    }
}

/// Outcome for an alert compared at the checkpoint.
pub fn checkpoint_outcome(alert: &OpenAlert, checkpoint_score: &str) -> Outcome {
    if alert.trigger_score == checkpoint_score {
        Outcome::Win
    } else {
        Outcome::Loss
    }
}

/// Outcome for a stale alert given the authoritative final state, or `None`
/// when the match is not terminal yet and the alert should stay open.
pub fn terminal_outcome(
    alert: &OpenAlert,
    status_text: &str,
    final_score: Option<&str>,
) -> Option<Outcome> {
    if normalize_status(status_text) != Phase::Finished {
        return None;
    }
    if is_void_status(status_text) {
        return Some(Outcome::Push);
    }
    let outcome = match alert.alert_type.rules().terminal_rule {
        // Missed its checkpoint: stale cleanup
        None => Outcome::Loss,
        Some(TerminalRule::ExactScore) => match final_score {
            None => Outcome::Error,
            Some(s) if s == alert.trigger_score => Outcome::Win,
            Some(_) => Outcome::Loss,
        },
    };
    Some(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::AlertType;
    use chrono::Utc;

    fn rules() -> TriggerRules {
        TriggerRules::new([36, 37], ["1-1", "2-0", "2-2"].map(String::from))
    }

    fn alert(alert_type: AlertType, trigger: &str) -> OpenAlert {
        OpenAlert {
            entity_id: "1".into(),
            display_name: "A vs B".into(),
            competition: "League".into(),
            region: "Region".into(),
            alert_type,
            trigger_score: trigger.into(),
            stake: 10.0,
            sequence: 1,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_normalize_status() {
        assert_eq!(normalize_status("1st half"), Phase::FirstPeriod);
        assert_eq!(normalize_status("Halftime"), Phase::Checkpoint);
        assert_eq!(normalize_status("HT"), Phase::Checkpoint);
        assert_eq!(normalize_status("2nd half"), Phase::SecondPeriod);
        assert_eq!(normalize_status("Ended"), Phase::Finished);
        assert_eq!(normalize_status("AET"), Phase::Finished);
        assert_eq!(normalize_status("Postponed"), Phase::Finished);
        assert_eq!(normalize_status("Interrupted"), Phase::Other);
        assert_eq!(normalize_status("Not started"), Phase::Other);
    }

    #[test]
    fn test_short_codes_are_exact() {
        // "HT" inside a longer word must not count as half-time
        assert_eq!(normalize_status("Shootout"), Phase::Other);
        assert_eq!(normalize_status("FTR"), Phase::Other);
    }

    #[test]
    fn test_decide_window() {
        let r = rules();
        assert_eq!(
            decide(Phase::FirstPeriod, Some(36), false, false, &r),
            Action::EvaluateWindow
        );
        assert_eq!(decide(Phase::FirstPeriod, Some(35), false, false, &r), Action::Track);
        assert_eq!(decide(Phase::FirstPeriod, Some(37), true, false, &r), Action::Track);
        assert_eq!(decide(Phase::FirstPeriod, None, false, false, &r), Action::Track);
        assert_eq!(decide(Phase::SecondPeriod, Some(36), false, false, &r), Action::Track);
    }

    #[test]
    fn test_decide_open_alert_precedence() {
        let r = rules();
        assert_eq!(
            decide(Phase::Checkpoint, None, true, true, &r),
            Action::ResolveAtCheckpoint
        );
        assert_eq!(
            decide(Phase::FirstPeriod, Some(36), false, true, &r),
            Action::AwaitCheckpoint
        );
        assert_eq!(decide(Phase::Finished, None, true, true, &r), Action::AwaitCheckpoint);
        assert_eq!(decide(Phase::Finished, None, true, false, &r), Action::Discard);
        assert_eq!(decide(Phase::Checkpoint, None, false, false, &r), Action::Track);
    }

    #[test]
    fn test_qualifies() {
        let r = rules();
        assert!(r.qualifies(Some("2-0")));
        assert!(!r.qualifies(Some("0-2")));
        assert!(!r.qualifies(None));
    }

    #[test]
    fn test_terminal_outcome_order() {
        let regular = alert(AlertType::Regular, "1-1");
        let full_time = alert(AlertType::FullTime, "1-1");

        assert_eq!(terminal_outcome(&regular, "Postponed", None), Some(Outcome::Push));
        assert_eq!(terminal_outcome(&regular, "Ended", Some("1-1")), Some(Outcome::Loss));
        assert_eq!(terminal_outcome(&full_time, "Ended", None), Some(Outcome::Error));
        assert_eq!(terminal_outcome(&full_time, "Ended", Some("1-1")), Some(Outcome::Win));
        assert_eq!(terminal_outcome(&full_time, "Ended", Some("2-1")), Some(Outcome::Loss));
        assert_eq!(terminal_outcome(&full_time, "2nd half", Some("1-1")), None);
    }

    #[test]
    fn test_checkpoint_outcome() {
        let a = alert(AlertType::Regular, "2-0");
        assert_eq!(checkpoint_outcome(&a, "2-0"), Outcome::Win);
        assert_eq!(checkpoint_outcome(&a, "2-1"), Outcome::Loss);
    }
}
