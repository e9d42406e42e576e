//! Durable store for tracked-entity state, open alerts, closed alerts and the
//! reconciliation rate gate.
//!
//! Every method is a single-record atomic operation. `move_to_closed` writes
//! the closed record and deletes the open one in one transaction, so the lock
//! is never released without the history row being committed.

use anyhow::Result;
use chrono::{DateTime, Utc};

pub mod models;
pub mod sqlite;

pub use models::*;
pub use sqlite::SqliteLedger;

/// Store contract used by the lifecycle engine and the reconciler.
pub trait Ledger: Send + Sync {
    // ── Open alerts ──────────────────────────────────────────────────────────

    fn get_open_alert(&self, entity_id: &str) -> Result<Option<OpenAlert>>;

    fn open_alert_exists(&self, entity_id: &str) -> Result<bool>;

    /// Bounded existence check: is any alert open anywhere?
    fn any_open_alert(&self) -> Result<bool>;

    /// Create-if-absent. With `exclusive` set the row also claims the global
    /// lock slot, so at most one exclusive alert can exist at a time.
    fn create_open_alert(&self, alert: &OpenAlert, exclusive: bool) -> Result<CreateOutcome>;

    fn list_open_alerts(&self) -> Result<Vec<OpenAlert>>;

    /// Open alerts placed strictly before `cutoff`.
    fn list_open_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<OpenAlert>>;

    /// Atomically move the open alert for `entity_id` to the closed set.
    /// Returns `None` when no alert is open for that entity.
    fn move_to_closed(
        &self,
        entity_id: &str,
        outcome: Outcome,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<ClosedAlert>>;

    // ── Closed alerts ────────────────────────────────────────────────────────

    fn last_closed(&self) -> Result<Option<ClosedAlert>>;

    fn list_closed(&self, limit: i64) -> Result<Vec<ClosedAlert>>;

    // ── Tracked entities ─────────────────────────────────────────────────────

    fn get_tracked(&self, entity_id: &str) -> Result<Option<TrackedEntityState>>;

    fn put_tracked(&self, state: &TrackedEntityState) -> Result<()>;

    fn delete_tracked(&self, entity_id: &str) -> Result<()>;

    fn list_tracked(&self) -> Result<Vec<TrackedEntityState>>;

    // ── Reconciliation gate ──────────────────────────────────────────────────

    fn last_api_call_at(&self) -> Result<Option<DateTime<Utc>>>;

    fn record_api_call(&self, at: DateTime<Utc>) -> Result<()>;

    // ── Misc ─────────────────────────────────────────────────────────────────

    fn stats(&self) -> Result<Stats>;

    /// Push any buffered writes to durable storage.
    fn flush(&self) -> Result<()>;
}
