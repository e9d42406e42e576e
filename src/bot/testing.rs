//! In-memory collaborators for engine and reconciler tests.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{bail, Result};
use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::ledger::{
    ClosedAlert, CreateOutcome, Ledger, OpenAlert, Outcome, SqliteLedger, Stats,
    TrackedEntityState,
};
use crate::live_scores::{Snapshot, SnapshotSource, SourceError};
use crate::notify::Notifier;

pub fn snap(id: &str, status: &str, minute: Option<i32>, score: Option<(i32, i32)>) -> Snapshot {
    Snapshot {
        entity_id: id.to_string(),
        home_team: format!("Home {}", id),
        away_team: format!("Away {}", id),
        home_score: score.map(|s| s.0),
        away_score: score.map(|s| s.1),
        elapsed_minute: minute,
        competition: "Premier League".into(),
        region: "England".into(),
        status_text: status.to_string(),
    }
}

#[derive(Default)]
pub struct FakeFeed {
    pub live: Vec<Snapshot>,
    pub list_fails: bool,
    pub lookups: HashMap<String, Snapshot>,
    /// Lookups fail until this many calls have been made (across all ids).
    pub failing_lookups: u32,
    pub lookup_calls: u32,
    pub close_calls: u32,
    pub reinit_calls: u32,
    pub closed: bool,
}

/// Scriptable source; the test keeps a clone of `feed` to steer it.
#[derive(Clone, Default)]
pub struct FakeSource {
    pub feed: Arc<Mutex<FakeFeed>>,
}

impl FakeSource {
    pub fn set_live(&self, live: Vec<Snapshot>) {
        self.feed.lock().unwrap().live = live;
    }

    pub fn set_lookup(&self, snapshot: Snapshot) {
        self.feed
            .lock()
            .unwrap()
            .lookups
            .insert(snapshot.entity_id.clone(), snapshot);
    }

    pub fn lookup_calls(&self) -> u32 {
        self.feed.lock().unwrap().lookup_calls
    }
}

#[async_trait]
impl SnapshotSource for FakeSource {
    fn name(&self) -> &str {
        "fake"
    }

    async fn list_live(&self) -> Result<Vec<Snapshot>, SourceError> {
        let feed = self.feed.lock().unwrap();
        if feed.closed {
            return Err(SourceError::NotInitialized);
        }
        if feed.list_fails {
            return Err(SourceError::Shape("feed down".into()));
        }
        Ok(feed.live.clone())
    }

    async fn get_by_id(&self, entity_id: &str) -> Result<Option<Snapshot>, SourceError> {
        let mut feed = self.feed.lock().unwrap();
        if feed.closed {
            return Err(SourceError::NotInitialized);
        }
        feed.lookup_calls += 1;
        if feed.lookup_calls <= feed.failing_lookups {
            return Err(SourceError::Shape("timeout".into()));
        }
        Ok(feed.lookups.get(entity_id).cloned())
    }

    async fn close(&mut self) {
        let mut feed = self.feed.lock().unwrap();
        feed.closed = true;
        feed.close_calls += 1;
    }

    async fn reinitialize(&mut self) -> Result<(), SourceError> {
        let mut feed = self.feed.lock().unwrap();
        feed.closed = false;
        feed.reinit_calls += 1;
        Ok(())
    }
}

#[derive(Clone)]
pub struct RecordingNotifier {
    pub sent: Arc<Mutex<Vec<String>>>,
    pub succeed: bool,
}

impl RecordingNotifier {
    pub fn new(succeed: bool) -> Self {
        RecordingNotifier {
            sent: Arc::new(Mutex::new(Vec::new())),
            succeed,
        }
    }

    pub fn messages(&self) -> Vec<String> {
        self.sent.lock().unwrap().clone()
    }
}

#[async_trait]
impl Notifier for RecordingNotifier {
    async fn send(&self, text: &str) -> bool {
        self.sent.lock().unwrap().push(text.to_string());
        self.succeed
    }

    fn name(&self) -> &str {
        "recording"
    }
}

/// Injected ledger failures.
#[derive(Debug, Clone, Copy, Default)]
pub struct Faults {
    /// Existence checks never see an open alert, so only the atomic
    /// create can refuse.
    pub blind: bool,
    pub fail_create: bool,
    pub fail_delete_tracked: bool,
}

/// In-memory SQLite ledger with injectable failures.
pub struct FaultyLedger {
    inner: SqliteLedger,
    faults: Faults,
}

impl FaultyLedger {
    pub fn new(faults: Faults) -> Self {
        FaultyLedger {
            inner: SqliteLedger::open_in_memory().unwrap(),
            faults,
        }
    }
}

impl Ledger for FaultyLedger {
    fn get_open_alert(&self, id: &str) -> Result<Option<OpenAlert>> {
        self.inner.get_open_alert(id)
    }
    fn open_alert_exists(&self, id: &str) -> Result<bool> {
        Ok(!self.faults.blind && self.inner.open_alert_exists(id)?)
    }
    fn any_open_alert(&self) -> Result<bool> {
        Ok(!self.faults.blind && self.inner.any_open_alert()?)
    }
    fn create_open_alert(&self, alert: &OpenAlert, exclusive: bool) -> Result<CreateOutcome> {
        if self.faults.fail_create {
            bail!("disk full");
        }
        self.inner.create_open_alert(alert, exclusive)
    }
    fn list_open_alerts(&self) -> Result<Vec<OpenAlert>> {
        self.inner.list_open_alerts()
    }
    fn list_open_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<OpenAlert>> {
        self.inner.list_open_older_than(cutoff)
    }
    fn move_to_closed(
        &self,
        id: &str,
        outcome: Outcome,
        at: DateTime<Utc>,
    ) -> Result<Option<ClosedAlert>> {
        self.inner.move_to_closed(id, outcome, at)
    }
    fn last_closed(&self) -> Result<Option<ClosedAlert>> {
        self.inner.last_closed()
    }
    fn list_closed(&self, limit: i64) -> Result<Vec<ClosedAlert>> {
        self.inner.list_closed(limit)
    }
    fn get_tracked(&self, id: &str) -> Result<Option<TrackedEntityState>> {
        self.inner.get_tracked(id)
    }
    fn put_tracked(&self, state: &TrackedEntityState) -> Result<()> {
        self.inner.put_tracked(state)
    }
    fn delete_tracked(&self, id: &str) -> Result<()> {
        if self.faults.fail_delete_tracked {
            bail!("database is locked");
        }
        self.inner.delete_tracked(id)
    }
    fn list_tracked(&self) -> Result<Vec<TrackedEntityState>> {
        self.inner.list_tracked()
    }
    fn last_api_call_at(&self) -> Result<Option<DateTime<Utc>>> {
        self.inner.last_api_call_at()
    }
    fn record_api_call(&self, at: DateTime<Utc>) -> Result<()> {
        self.inner.record_api_call(at)
    }
    fn stats(&self) -> Result<Stats> {
        self.inner.stats()
    }
    fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}
