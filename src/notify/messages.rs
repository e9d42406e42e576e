use crate::ledger::{AlertType, ClosedAlert, OpenAlert, Outcome};

pub fn startup() -> String {
    "🚀 Halftime alert bot initialized. Monitoring live matches.".to_string()
}

pub fn alert_opened(alert: &OpenAlert, minute: i32) -> String {
    let target = match alert.alert_type {
        AlertType::Regular => "Half Time",
        AlertType::FullTime => "Full Time",
    };
    format!(
        "⏱️ **{}' - {}**\n\
         🌍 {} | 🏆 {}\n\
         🔢 Score: {}\n\
         💵 Stake: {:.2} (sequence {})\n\
         🎯 Correct Score Alert for {}",
        minute,
        alert.display_name,
        alert.region,
        alert.competition,
        alert.trigger_score,
        alert.stake,
        alert.sequence,
        target
    )
}

pub fn checkpoint_result(closed: &ClosedAlert, checkpoint_score: &str) -> String {
    let (icon, verdict) = verdict(closed.outcome);
    format!(
        "{} **HT Result: {}**\n\
         🌍 {} | 🏆 {}\n\
         🔢 HT Score: **{}**\n\
         🎯 Alert Score: **{}**\n\
         {}",
        icon,
        closed.alert.display_name,
        closed.alert.region,
        closed.alert.competition,
        checkpoint_score,
        closed.alert.trigger_score,
        verdict
    )
}

/// Message for an alert closed by the stale sweep.
pub fn reconciled(closed: &ClosedAlert, final_score: Option<&str>) -> String {
    let (icon, verdict) = verdict(closed.outcome);
    let cleanup = if closed.alert.alert_type.rules().terminal_rule.is_none() {
        "\n🧹 Checkpoint missed, closed by stale sweep"
    } else {
        ""
    };
    format!(
        "{} **FT Result: {}**\n\
         🌍 {} | 🏆 {}\n\
         🔢 Final Score: **{}**\n\
         🎯 Alert Score: **{}**\n\
         {}{}",
        icon,
        closed.alert.display_name,
        closed.alert.region,
        closed.alert.competition,
        final_score.unwrap_or("N/A"),
        closed.alert.trigger_score,
        verdict,
        cleanup
    )
}

fn verdict(outcome: Outcome) -> (&'static str, &'static str) {
    match outcome {
        Outcome::Win => ("✅", "🎉 Alert WON"),
        Outcome::Loss => ("❌", "🔁 Alert LOST"),
        Outcome::Push => ("➖", "↩️ Match void, alert PUSHED"),
        Outcome::Error => ("⚠️", "❓ Result could not be determined"),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    fn open(alert_type: AlertType) -> OpenAlert {
        OpenAlert {
            entity_id: "9".into(),
            display_name: "Arsenal vs Chelsea".into(),
            competition: "Premier League".into(),
            region: "England".into(),
            alert_type,
            trigger_score: "1-1".into(),
            stake: 40.0,
            sequence: 3,
            placed_at: Utc::now(),
        }
    }

    #[test]
    fn test_alert_opened_mentions_stake_and_sequence() {
        let msg = alert_opened(&open(AlertType::Regular), 36);
        assert!(msg.contains("36' - Arsenal vs Chelsea"));
        assert!(msg.contains("40.00 (sequence 3)"));
        assert!(msg.contains("Half Time"));
    }

    #[test]
    fn test_checkpoint_result_win() {
        let closed = open(AlertType::Regular).close(Outcome::Win, Utc::now());
        let msg = checkpoint_result(&closed, "1-1");
        assert!(msg.starts_with("✅"));
        assert!(msg.contains("WON"));
    }

    #[test]
    fn test_reconciled_flags_stale_cleanup() {
        let closed = open(AlertType::Regular).close(Outcome::Loss, Utc::now());
        assert!(reconciled(&closed, Some("2-1")).contains("stale sweep"));

        let closed = open(AlertType::FullTime).close(Outcome::Win, Utc::now());
        let msg = reconciled(&closed, Some("1-1"));
        assert!(!msg.contains("stale sweep"));
        assert!(msg.contains("Final Score: **1-1**"));
    }
}
