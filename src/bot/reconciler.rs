use std::sync::Arc;

use anyhow::{anyhow, Result};
use chrono::{DateTime, Duration, Utc};
use tracing::{debug, error, info, warn};

use crate::ledger::{Ledger, OpenAlert};
use crate::live_scores::{Snapshot, SnapshotSource};
use crate::notify::{messages, Notifier};

use super::engine::clear_lock_notices;
use super::entity_state::terminal_outcome;
use super::retry::RetryPolicy;

#[derive(Debug, Clone)]
pub struct ReconcilerSettings {
    /// Age after which an open alert counts as stale.
    pub stale_wait: Duration,
    /// Minimum spacing between sweeps that hit the upstream source.
    pub min_interval: Duration,
    pub retry: RetryPolicy,
    /// Also sweep alert types that normally resolve at the checkpoint, so a
    /// missed checkpoint still releases the lock.
    pub sweep_checkpoint_misses: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SweepReport {
    pub stale: usize,
    pub gated: bool,
    pub fetched: usize,
    pub failed: usize,
    pub resolved: usize,
    pub still_open: usize,
}

/// Background sweep over open alerts that outlived the checkpoint fast path.
pub struct StaleAlertReconciler {
    ledger: Arc<dyn Ledger>,
    notifier: Arc<dyn Notifier>,
    settings: ReconcilerSettings,
}

impl StaleAlertReconciler {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        notifier: Arc<dyn Notifier>,
        settings: ReconcilerSettings,
    ) -> Self {
        StaleAlertReconciler {
            ledger,
            notifier,
            settings,
        }
    }

    fn eligible(&self, alert: &OpenAlert) -> bool {
        !alert.alert_type.rules().resolves_at_checkpoint || self.settings.sweep_checkpoint_misses
    }

    pub async fn sweep(
        &self,
        source: &mut dyn SnapshotSource,
        now: DateTime<Utc>,
    ) -> Result<SweepReport> {
        let mut report = SweepReport::default();

        let cutoff = now
            .checked_sub_signed(self.settings.stale_wait)
            .ok_or_else(|| anyhow!("stale wait {} is out of range", self.settings.stale_wait))?;
        let stale: Vec<OpenAlert> = self
            .ledger
            .list_open_older_than(cutoff)?
            .into_iter()
            .filter(|a| self.eligible(a))
            .collect();
        report.stale = stale.len();
        if stale.is_empty() {
            return Ok(report);
        }

        if let Some(last) = self.ledger.last_api_call_at()? {
            if now - last < self.settings.min_interval {
                debug!(
                    "Reconciliation gated: last upstream sweep at {}, {} stale alert(s) waiting",
                    last,
                    stale.len()
                );
                report.gated = true;
                return Ok(report);
            }
        }

        info!("Reconciling {} stale alert(s)", stale.len());
        for alert in &stale {
            let fetched = fetch_with_retry(source, &alert.entity_id, &self.settings.retry).await;
            let snapshot = match fetched {
                Ok(s) => s,
                Err(e) => {
                    warn!(
                        "Giving up on {} ({}) this sweep: {}",
                        alert.entity_id, alert.display_name, e
                    );
                    report.failed += 1;
                    continue;
                }
            };
            report.fetched += 1;

            match self.settle(alert, &snapshot, now).await {
                Ok(true) => report.resolved += 1,
                Ok(false) => report.still_open += 1,
                Err(e) => {
                    error!("Failed to settle stale alert {}: {}", alert.entity_id, e);
                    report.still_open += 1;
                }
            }
        }

        // A fully failed sweep leaves the gate open for the next cycle
        if report.fetched > 0 {
            self.ledger.record_api_call(now)?;
        }
        Ok(report)
    }

    /// Close `alert` from its authoritative snapshot. Returns `false` when the
    /// match is not terminal yet.
    async fn settle(
        &self,
        alert: &OpenAlert,
        snapshot: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<bool> {
        let final_score = snapshot.score();
        let Some(outcome) = terminal_outcome(alert, &snapshot.status_text, final_score.as_deref())
        else {
            debug!(
                "Stale alert {} still in play ({})",
                alert.entity_id, snapshot.status_text
            );
            return Ok(false);
        };

        let Some(closed) = self.ledger.move_to_closed(&alert.entity_id, outcome, now)? else {
            // Closed by someone else between listing and settling
            return Ok(false);
        };
        if let Err(e) = self.ledger.delete_tracked(&alert.entity_id) {
            warn!("Could not drop tracked state for {}: {}", alert.entity_id, e);
        }
        clear_lock_notices(self.ledger.as_ref());
        info!(
            "Stale alert {} ({}) closed as {} (final score {})",
            closed.alert.entity_id,
            closed.alert.display_name,
            closed.outcome,
            final_score.as_deref().unwrap_or("N/A")
        );

        let text = messages::reconciled(&closed, final_score.as_deref());
        if !self.notifier.send(&text).await {
            warn!("Result notification for {} not delivered", closed.alert.entity_id);
        }
        Ok(true)
    }
}

/// Point lookup with bounded retries. After the last failed attempt the
/// client is torn down, rebuilt, and asked once more.
///
/// A lookup that returns nothing, or a different entity, counts as a failed
/// attempt.
pub async fn fetch_with_retry(
    source: &mut dyn SnapshotSource,
    entity_id: &str,
    policy: &RetryPolicy,
) -> Result<Snapshot> {
    for attempt in 0..policy.max_attempts {
        match lookup(source, entity_id).await {
            Ok(s) => return Ok(s),
            Err(e) => warn!(
                "Lookup of {} failed (attempt {}/{}): {}",
                entity_id,
                attempt + 1,
                policy.max_attempts,
                e
            ),
        }
        if !policy.is_last(attempt) {
            tokio::time::sleep(policy.delay_for(attempt)).await;
        }
    }

    warn!(
        "Restarting {} client after {} failed lookups of {}",
        source.name(),
        policy.max_attempts,
        entity_id
    );
    source.close().await;
    source
        .reinitialize()
        .await
        .map_err(|e| anyhow!("client restart failed: {}", e))?;
    lookup(source, entity_id).await
}

async fn lookup(source: &dyn SnapshotSource, entity_id: &str) -> Result<Snapshot> {
    match source.get_by_id(entity_id).await? {
        Some(s) if s.entity_id == entity_id => Ok(s),
        Some(s) => Err(anyhow!("lookup returned entity {}", s.entity_id)),
        None => Err(anyhow!("entity not found upstream")),
    }
}
