use axum::{
    extract::{Query, State},
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use serde::Deserialize;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

use crate::bot::StakingPolicy;
use crate::ledger::Ledger;

const DEFAULT_CLOSED_LIMIT: i64 = 50;
const MAX_CLOSED_LIMIT: i64 = 500;

#[derive(Clone)]
pub struct AppState {
    pub ledger: Arc<dyn Ledger>,
    pub staking: StakingPolicy,
}

#[derive(Debug, Deserialize)]
pub struct ClosedQuery {
    pub limit: Option<i64>,
}

/// Build the read-only status router.
pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/", get(index_handler))
        .route("/api/stats", get(stats_handler))
        .route("/api/open-alerts", get(open_alerts_handler))
        .route("/api/closed-alerts", get(closed_alerts_handler))
        .route("/api/next-stake", get(next_stake_handler))
        .layer(CorsLayer::permissive())
        .with_state(Arc::new(state))
}

fn internal(e: anyhow::Error) -> (StatusCode, String) {
    (StatusCode::INTERNAL_SERVER_ERROR, e.to_string())
}

fn closed_limit(requested: Option<i64>) -> i64 {
    requested
        .unwrap_or(DEFAULT_CLOSED_LIMIT)
        .clamp(1, MAX_CLOSED_LIMIT)
}

async fn index_handler() -> impl IntoResponse {
    Html(INDEX_HTML)
}

/// GET /api/stats
async fn stats_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.ledger.stats().map(Json).map_err(internal)
}

/// GET /api/open-alerts
async fn open_alerts_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state.ledger.list_open_alerts().map(Json).map_err(internal)
}

/// GET /api/closed-alerts?limit=50
async fn closed_alerts_handler(
    State(state): State<Arc<AppState>>,
    Query(query): Query<ClosedQuery>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    state
        .ledger
        .list_closed(closed_limit(query.limit))
        .map(Json)
        .map_err(internal)
}

/// GET /api/next-stake
///
/// What the next alert would be sized at, given the current history.
async fn next_stake_handler(
    State(state): State<Arc<AppState>>,
) -> Result<impl IntoResponse, (StatusCode, String)> {
    let last = state.ledger.last_closed().map_err(internal)?;
    Ok(Json(state.staking.next(last.as_ref())))
}

const INDEX_HTML: &str = r#"<!DOCTYPE html>
<html lang="en">
<head><meta charset="UTF-8"><title>HT Alert Bot</title></head>
<body>
<h1>HT Alert Bot</h1>
<ul>
  <li><a href="/api/stats">/api/stats</a></li>
  <li><a href="/api/open-alerts">/api/open-alerts</a></li>
  <li><a href="/api/closed-alerts">/api/closed-alerts</a></li>
  <li><a href="/api/next-stake">/api/next-stake</a></li>
</ul>
</body>
</html>"#;

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ledger::{AlertType, OpenAlert, Outcome, SqliteLedger};
    use chrono::Utc;

    fn state() -> Arc<AppState> {
        Arc::new(AppState {
            ledger: Arc::new(SqliteLedger::open_in_memory().unwrap()),
            staking: StakingPolicy::new(10.0, 4),
        })
    }

    #[test]
    fn test_closed_limit_clamped() {
        assert_eq!(closed_limit(None), 50);
        assert_eq!(closed_limit(Some(0)), 1);
        assert_eq!(closed_limit(Some(10_000)), 500);
    }

    #[tokio::test]
    async fn test_next_stake_follows_history() {
        let state = state();
        let alert = OpenAlert {
            entity_id: "E1".into(),
            display_name: "A vs B".into(),
            competition: "League".into(),
            region: "Region".into(),
            alert_type: AlertType::Regular,
            trigger_score: "1-1".into(),
            stake: 10.0,
            sequence: 1,
            placed_at: Utc::now(),
        };
        state.ledger.create_open_alert(&alert, true).unwrap();
        state
            .ledger
            .move_to_closed("E1", Outcome::Loss, Utc::now())
            .unwrap();

        let Ok(resp) = next_stake_handler(State(state)).await else {
            panic!("next-stake failed");
        };
        let response = resp.into_response();
        assert_eq!(response.status(), StatusCode::OK);

        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        let plan: serde_json::Value = serde_json::from_slice(&body).unwrap();
        assert_eq!(plan["stake"], 20.0);
        assert_eq!(plan["sequence"], 2);
    }

    #[tokio::test]
    async fn test_stats_ok_on_empty_ledger() {
        let response = stats_handler(State(state())).await.into_response();
        assert_eq!(response.status(), StatusCode::OK);
    }
}
