use async_trait::async_trait;
use chrono::Utc;
use reqwest::{Client, StatusCode};
use std::time::Duration;
use tracing::{debug, info};
use url::Url;

use super::provider::{Snapshot, SnapshotSource, SourceError};

/// Browser-like agent; the public API rejects obvious bot agents.
const USER_AGENT: &str =
    "Mozilla/5.0 (X11; Linux x86_64) AppleWebKit/537.36 (KHTML, like Gecko) Chrome/124.0 Safari/537.36";

/// Snapshot source backed by the SofaScore public REST API.
///
/// `close()` drops the HTTP client (and with it the pooled connections);
/// `reinitialize()` builds a new one. This is the recovery path the stale
/// reconciler takes when point lookups keep failing.
pub struct SofascoreSource {
    http: Option<Client>,
    base_url: Url,
    timeout: Duration,
}

impl SofascoreSource {
    pub fn new(base_url: &str, timeout: Duration) -> Result<Self, SourceError> {
        // Url::join drops the last path segment unless the base ends in '/'
        let mut base = base_url.trim_end_matches('/').to_string();
        base.push('/');
        Ok(SofascoreSource {
            http: Some(Self::build_client(timeout)?),
            base_url: Url::parse(&base)?,
            timeout,
        })
    }

    fn build_client(timeout: Duration) -> Result<Client, SourceError> {
        Ok(Client::builder()
            .timeout(timeout)
            .user_agent(USER_AGENT)
            .build()?)
    }

    fn client(&self) -> Result<&Client, SourceError> {
        self.http.as_ref().ok_or(SourceError::NotInitialized)
    }

    async fn get_json(&self, path: &str) -> Result<Option<serde_json::Value>, SourceError> {
        let url = self.base_url.join(path)?;
        debug!("GET {}", url);
        let resp = self.client()?.get(url).send().await?;
        if resp.status() == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        if !resp.status().is_success() {
            return Err(SourceError::Status(resp.status()));
        }
        Ok(Some(resp.json().await?))
    }
}

#[async_trait]
impl SnapshotSource for SofascoreSource {
    fn name(&self) -> &str {
        "SofaScore"
    }

    async fn list_live(&self) -> Result<Vec<Snapshot>, SourceError> {
        let raw = self
            .get_json("sport/football/events/live")
            .await?
            .ok_or_else(|| SourceError::Shape("live endpoint returned 404".into()))?;
        let snapshots = parse_live_response(&raw, Utc::now().timestamp())?;
        info!("Fetched {} live matches", snapshots.len());
        Ok(snapshots)
    }

    async fn get_by_id(&self, entity_id: &str) -> Result<Option<Snapshot>, SourceError> {
        let Some(raw) = self.get_json(&format!("event/{}", entity_id)).await? else {
            return Ok(None);
        };
        let event = raw
            .get("event")
            .ok_or_else(|| SourceError::Shape("missing `event` object".into()))?;
        Ok(parse_event(event, Utc::now().timestamp()))
    }

    async fn close(&mut self) {
        if self.http.take().is_some() {
            info!("SofaScore client closed");
        }
    }

    async fn reinitialize(&mut self) -> Result<(), SourceError> {
        self.http = Some(Self::build_client(self.timeout)?);
        info!("SofaScore client initialized");
        Ok(())
    }
}

fn parse_live_response(raw: &serde_json::Value, now_ts: i64) -> Result<Vec<Snapshot>, SourceError> {
    let events = raw["events"]
        .as_array()
        .ok_or_else(|| SourceError::Shape("missing `events` array".into()))?;

    let total = events.len();
    let snapshots: Vec<Snapshot> = events.iter().filter_map(|ev| parse_event(ev, now_ts)).collect();
    if snapshots.len() < total {
        debug!(
            "Dropped {} malformed live events",
            total - snapshots.len()
        );
    }
    Ok(snapshots)
}

/// Parse one event object. Returns `None` when identifying fields are missing.
fn parse_event(ev: &serde_json::Value, now_ts: i64) -> Option<Snapshot> {
    let entity_id = ev["id"]
        .as_i64()
        .map(|id| id.to_string())
        .or_else(|| ev["id"].as_str().map(str::to_string))?;
    let home_team = ev["homeTeam"]["name"].as_str()?.to_string();
    let away_team = ev["awayTeam"]["name"].as_str()?.to_string();

    let home_score = ev["homeScore"]["current"].as_i64().map(|v| v as i32);
    let away_score = ev["awayScore"]["current"].as_i64().map(|v| v as i32);

    let tournament = &ev["tournament"];
    let competition = tournament["name"].as_str().unwrap_or("N/A").to_string();
    let region = tournament["category"]["name"]
        .as_str()
        .unwrap_or("N/A")
        .to_string();

    let status_text = ev["status"]["description"].as_str().unwrap_or("").to_string();
    let elapsed_minute = elapsed_minute(&ev["time"], now_ts);

    Some(Snapshot {
        entity_id,
        home_team,
        away_team,
        home_score,
        away_score,
        elapsed_minute,
        competition,
        region,
        status_text,
    })
}

/// Match clock in whole minutes, 1-based like a broadcast clock.
///
/// `initial` is the clock offset of the current period in seconds
/// (0 for the first half, 2700 for the second).
fn elapsed_minute(time: &serde_json::Value, now_ts: i64) -> Option<i32> {
    let period_start = time["currentPeriodStartTimestamp"].as_i64()?;
    if now_ts < period_start {
        return None;
    }
    let initial = time["initial"].as_i64().unwrap_or(0);
    Some(((initial + now_ts - period_start) / 60 + 1) as i32)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn event_json(start_ts: i64) -> serde_json::Value {
        json!({
            "id": 11352381,
            "homeTeam": { "name": "Arsenal" },
            "awayTeam": { "name": "Chelsea" },
            "homeScore": { "current": 1 },
            "awayScore": { "current": 1 },
            "tournament": { "name": "Premier League", "id": 17, "category": { "name": "England" } },
            "status": { "code": 6, "description": "1st half", "type": "inprogress" },
            "time": { "currentPeriodStartTimestamp": start_ts, "initial": 0 }
        })
    }

    #[test]
    fn test_parse_event_fields() {
        let now = 1_700_000_000;
        let snap = parse_event(&event_json(now - 35 * 60 - 10), now).unwrap();
        assert_eq!(snap.entity_id, "11352381");
        assert_eq!(snap.home_team, "Arsenal");
        assert_eq!(snap.away_team, "Chelsea");
        assert_eq!(snap.score(), Some("1-1".to_string()));
        assert_eq!(snap.competition, "Premier League");
        assert_eq!(snap.region, "England");
        assert_eq!(snap.status_text, "1st half");
        assert_eq!(snap.elapsed_minute, Some(36));
    }

    #[test]
    fn test_parse_event_missing_team_is_dropped() {
        let mut ev = event_json(0);
        ev["awayTeam"] = json!({});
        assert!(parse_event(&ev, 0).is_none());
    }

    #[test]
    fn test_parse_event_optional_fields() {
        let ev = json!({
            "id": "77",
            "homeTeam": { "name": "A" },
            "awayTeam": { "name": "B" },
            "status": { "description": "Halftime" }
        });
        let snap = parse_event(&ev, 0).unwrap();
        assert_eq!(snap.entity_id, "77");
        assert_eq!(snap.score(), None);
        assert_eq!(snap.elapsed_minute, None);
        assert_eq!(snap.competition, "N/A");
    }

    #[test]
    fn test_second_half_minute_uses_period_offset() {
        let now = 1_700_000_000;
        let time = json!({ "currentPeriodStartTimestamp": now - 10 * 60, "initial": 2700 });
        assert_eq!(elapsed_minute(&time, now), Some(56));
    }

    #[test]
    fn test_parse_live_response_requires_events_array() {
        assert!(parse_live_response(&json!({}), 0).is_err());
        let raw = json!({ "events": [event_json(0), { "id": 5 }] });
        assert_eq!(parse_live_response(&raw, 60).unwrap().len(), 1);
    }

    #[test]
    fn test_base_url_join_keeps_api_prefix() {
        let source =
            SofascoreSource::new("https://api.sofascore.com/api/v1", Duration::from_secs(5)).unwrap();
        let url = source.base_url.join("event/42").unwrap();
        assert_eq!(url.as_str(), "https://api.sofascore.com/api/v1/event/42");
    }

    #[tokio::test]
    async fn test_closed_client_reports_not_initialized() {
        let mut source =
            SofascoreSource::new("https://api.sofascore.com/api/v1", Duration::from_secs(5)).unwrap();
        source.close().await;
        assert!(matches!(
            source.list_live().await,
            Err(SourceError::NotInitialized)
        ));
        source.reinitialize().await.unwrap();
        assert!(source.client().is_ok());
    }
}
