use std::time::Duration as StdDuration;

use anyhow::Context;
use chrono::TimeDelta;
use clap::{ArgAction, Parser};

use crate::bot::entity_state::TriggerRules;
use crate::bot::filter::{CompetitionFilter, DEFAULT_EXCLUDED_KEYWORDS};
use crate::bot::retry::RetryPolicy;
use crate::bot::{EngineSettings, ReconcilerSettings, StakingPolicy};
use crate::ledger::AlertType;

/// Upper bound for reconciliation intervals: one week.
const MAX_RECONCILIATION_SECS: i64 = 7 * 24 * 60 * 60;

/// Live-football halftime correct-score alert bot
#[derive(Parser, Debug, Clone)]
#[command(name = "ht-alert-bot", version, about)]
pub struct Config {
    /// SQLite database path
    #[arg(long, env = "DATABASE_PATH", default_value = "ht_alerts.db")]
    pub database_path: String,

    /// Stake for the first alert of a sequence
    #[arg(long, env = "BASE_STAKE", default_value = "10.0")]
    pub base_stake: f64,

    /// Consecutive non-winning alerts before the stake sequence resets
    #[arg(long, env = "MAX_CHASE_LEVEL", default_value = "4")]
    pub max_chase_level: u32,

    /// Elapsed minutes at which the first period is evaluated
    #[arg(
        long,
        env = "TRIGGER_MINUTES",
        value_delimiter = ',',
        default_value = "36,37"
    )]
    pub trigger_minutes: Vec<i32>,

    /// Scores ("H-A") that open an alert
    #[arg(
        long,
        env = "QUALIFYING_SCORES",
        value_delimiter = ',',
        default_value = "1-1,2-0,2-2"
    )]
    pub qualifying_scores: Vec<String>,

    /// Alert type for new alerts: regular (resolves at halftime) or full-time
    #[arg(long, env = "ALERT_TYPE", default_value = "regular", value_parser = parse_alert_type)]
    pub alert_type: AlertType,

    /// Allow at most one open alert system-wide
    #[arg(long, env = "SINGLE_ALERT_LOCK", default_value_t = true, action = ArgAction::Set)]
    pub single_alert_lock: bool,

    /// Minutes after which an open alert is swept by the reconciler
    #[arg(long, env = "STALE_WAIT_MINUTES", default_value = "180")]
    pub stale_wait_minutes: i64,

    /// Also sweep alerts whose type resolves at halftime (missed checkpoints)
    #[arg(long, env = "SWEEP_CHECKPOINT_MISSES", default_value_t = true, action = ArgAction::Set)]
    pub sweep_checkpoint_misses: bool,

    /// Minimum seconds between reconciliation sweeps that hit the scores API
    #[arg(long, env = "MIN_RECONCILIATION_INTERVAL_SECS", default_value = "900")]
    pub min_reconciliation_interval_secs: i64,

    /// Point-lookup attempts before the scores client is restarted
    #[arg(long, env = "MAX_FETCH_RETRIES", default_value = "3")]
    pub max_fetch_retries: u32,

    /// Backoff unit in seconds; attempt k waits unit * 2^k
    #[arg(long, env = "RETRY_BACKOFF_SECS", default_value = "1")]
    pub retry_backoff_secs: u64,

    /// Live scores polling interval in seconds
    #[arg(long, env = "POLL_INTERVAL_SECS", default_value = "60")]
    pub poll_interval_secs: u64,

    /// Scores API base URL
    #[arg(
        long,
        env = "SCORES_API_URL",
        default_value = "https://api.sofascore.com/api/v1"
    )]
    pub scores_api_url: String,

    /// Scores API request timeout in seconds
    #[arg(long, env = "SCORES_TIMEOUT_SECS", default_value = "15")]
    pub scores_timeout_secs: u64,

    /// Telegram bot token (messages are only logged when unset)
    #[arg(long, env = "TELEGRAM_TOKEN")]
    pub telegram_token: Option<String>,

    /// Telegram chat id
    #[arg(long, env = "TELEGRAM_CHAT_ID")]
    pub telegram_chat_id: Option<String>,

    /// Delivery attempts per notification
    #[arg(long, env = "NOTIFY_MAX_RETRIES", default_value = "3")]
    pub notify_max_retries: u32,

    /// Only alert on these competitions ("name" or "region/name"); empty allows all
    #[arg(long, env = "ALLOWED_COMPETITIONS", value_delimiter = ',')]
    pub allowed_competitions: Vec<String>,

    /// Never alert on these competitions ("name" or "region/name")
    #[arg(long, env = "EXCLUDED_COMPETITIONS", value_delimiter = ',')]
    pub excluded_competitions: Vec<String>,

    /// Substrings that disqualify a match (competition, region or team names)
    #[arg(
        long,
        env = "EXCLUDED_KEYWORDS",
        value_delimiter = ',',
        default_values_t = DEFAULT_EXCLUDED_KEYWORDS.iter().map(|k| k.to_string())
    )]
    pub excluded_keywords: Vec<String>,

    /// Status API listen address; disabled when unset
    #[arg(long, env = "DASHBOARD_ADDR")]
    pub dashboard_addr: Option<String>,
}

fn parse_alert_type(value: &str) -> Result<AlertType, String> {
    AlertType::parse(value).ok_or_else(|| format!("unknown alert type '{}'", value))
}

fn is_score_pattern(value: &str) -> bool {
    match value.split_once('-') {
        Some((h, a)) => h.parse::<u32>().is_ok() && a.parse::<u32>().is_ok(),
        None => false,
    }
}

impl Config {
    pub fn validate(&self) -> anyhow::Result<()> {
        if !self.base_stake.is_finite() || self.base_stake <= 0.0 {
            anyhow::bail!("base_stake must be positive");
        }
        if self.max_chase_level < 1 {
            anyhow::bail!("max_chase_level must be at least 1");
        }
        if self.trigger_minutes.is_empty() {
            anyhow::bail!("trigger_minutes must name at least one minute");
        }
        if self.qualifying_scores.is_empty() {
            anyhow::bail!("qualifying_scores must name at least one score");
        }
        if let Some(bad) = self.qualifying_scores.iter().find(|s| !is_score_pattern(s.trim())) {
            anyhow::bail!("qualifying score '{}' is not of the form H-A", bad);
        }
        if self.stale_wait_minutes < 0 || self.min_reconciliation_interval_secs < 0 {
            anyhow::bail!("reconciliation intervals must not be negative");
        }
        if self.stale_wait_minutes > MAX_RECONCILIATION_SECS / 60 {
            anyhow::bail!("stale_wait_minutes must be at most {}", MAX_RECONCILIATION_SECS / 60);
        }
        if self.min_reconciliation_interval_secs > MAX_RECONCILIATION_SECS {
            anyhow::bail!(
                "min_reconciliation_interval_secs must be at most {}",
                MAX_RECONCILIATION_SECS
            );
        }
        if self.max_fetch_retries < 1 {
            anyhow::bail!("max_fetch_retries must be at least 1");
        }
        if self.poll_interval_secs < 1 {
            anyhow::bail!("poll_interval_secs must be at least 1");
        }
        if self.telegram_token.is_some() != self.telegram_chat_id.is_some() {
            anyhow::bail!("TELEGRAM_TOKEN and TELEGRAM_CHAT_ID must be set together");
        }
        Ok(())
    }

    pub fn backoff_unit(&self) -> StdDuration {
        StdDuration::from_secs(self.retry_backoff_secs)
    }

    pub fn engine_settings(&self) -> anyhow::Result<EngineSettings> {
        let stale_wait = TimeDelta::try_minutes(self.stale_wait_minutes)
            .context("stale_wait_minutes out of range")?;
        let min_interval = TimeDelta::try_seconds(self.min_reconciliation_interval_secs)
            .context("min_reconciliation_interval_secs out of range")?;
        Ok(EngineSettings {
            staking: StakingPolicy::new(self.base_stake, self.max_chase_level),
            rules: TriggerRules::new(
                self.trigger_minutes.iter().copied(),
                self.qualifying_scores.iter().map(|s| s.trim().to_string()),
            ),
            filter: CompetitionFilter::new(
                &self.allowed_competitions,
                &self.excluded_competitions,
                &self.excluded_keywords,
            ),
            alert_type: self.alert_type,
            single_alert_lock: self.single_alert_lock,
            reconciler: ReconcilerSettings {
                stale_wait,
                min_interval,
                retry: RetryPolicy::new(self.max_fetch_retries, self.backoff_unit()),
                sweep_checkpoint_misses: self.sweep_checkpoint_misses,
            },
        })
    }
}
