use async_trait::async_trait;
use thiserror::Error;

/// One periodic observation of a live match.
///
/// Score and minute are optional: upstream feeds omit them before kick-off,
/// during breaks, or when the payload is partial.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Snapshot {
    pub entity_id: String,
    pub home_team: String,
    pub away_team: String,
    pub home_score: Option<i32>,
    pub away_score: Option<i32>,
    pub elapsed_minute: Option<i32>,
    pub competition: String,
    pub region: String,
    /// Free-text status as reported upstream ("1st half", "Halftime", "Ended", ...)
    pub status_text: String,
}

impl Snapshot {
    pub fn display_name(&self) -> String {
        format!("{} vs {}", self.home_team, self.away_team)
    }

    /// Score as "H-A", or `None` when either side is missing.
    pub fn score(&self) -> Option<String> {
        match (self.home_score, self.away_score) {
            (Some(h), Some(a)) => Some(format!("{}-{}", h, a)),
            _ => None,
        }
    }
}

#[derive(Debug, Error)]
pub enum SourceError {
    #[error("snapshot source is not initialized")]
    NotInitialized,
    #[error("request failed: {0}")]
    Http(#[from] reqwest::Error),
    #[error("upstream returned status {0}")]
    Status(reqwest::StatusCode),
    #[error("invalid endpoint url: {0}")]
    Url(#[from] url::ParseError),
    #[error("unexpected response shape: {0}")]
    Shape(String),
}

/// Upstream supplier of live-match snapshots.
#[async_trait]
pub trait SnapshotSource: Send + Sync {
    /// Human-readable name for logging.
    fn name(&self) -> &str;

    /// All currently live matches (the periodic feed).
    async fn list_live(&self) -> Result<Vec<Snapshot>, SourceError>;

    /// Authoritative point lookup of a single match. `Ok(None)` when upstream
    /// does not know the id.
    async fn get_by_id(&self, entity_id: &str) -> Result<Option<Snapshot>, SourceError>;

    /// Release client resources. Further calls fail until `reinitialize`.
    async fn close(&mut self);

    /// Build a fresh client session.
    async fn reinitialize(&mut self) -> Result<(), SourceError>;
}
