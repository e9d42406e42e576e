use std::collections::HashSet;
use std::sync::Arc;

use anyhow::{bail, Result};
use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

use crate::ledger::{
    AlertType, ClosedAlert, CreateOutcome, Ledger, OpenAlert, TrackedEntityState,
};
use crate::live_scores::{Snapshot, SnapshotSource};
use crate::notify::{messages, Notifier};

use super::entity_state::{
    checkpoint_outcome, decide, normalize_status, Action, EntityLifecycle, TriggerRules,
};
use super::filter::CompetitionFilter;
use super::reconciler::{ReconcilerSettings, StaleAlertReconciler, SweepReport};
use super::staking::StakingPolicy;

#[derive(Debug, Clone)]
pub struct EngineSettings {
    pub staking: StakingPolicy,
    pub rules: TriggerRules,
    pub filter: CompetitionFilter,
    /// Type stamped on newly opened alerts.
    pub alert_type: AlertType,
    /// At most one open alert system-wide.
    pub single_alert_lock: bool,
    pub reconciler: ReconcilerSettings,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SuppressReason {
    Locked,
    AlreadyOpen,
    /// Lost the atomic create to a concurrent writer.
    Conflict,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OpenResult {
    Opened(OpenAlert),
    Suppressed(SuppressReason),
}

#[derive(Debug, Clone, PartialEq)]
pub enum ResolveResult {
    Resolved(ClosedAlert),
    NoOp,
}

/// Counters for one poll cycle.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct CycleReport {
    pub feed_ok: bool,
    pub live: usize,
    pub opened: usize,
    pub suppressed: usize,
    pub filtered: usize,
    /// Lock-held notices logged, one per entity per lock episode.
    pub lock_notices: usize,
    pub resolved: usize,
    pub discarded: usize,
    pub collected: usize,
    pub errors: usize,
    pub sweep: SweepReport,
}

/// Drives one poll cycle at a time: feed → per-entity transitions → sweep.
///
/// The engine is the only writer of tracked-entity state.
pub struct LifecycleEngine {
    ledger: Arc<dyn Ledger>,
    source: Box<dyn SnapshotSource>,
    notifier: Arc<dyn Notifier>,
    settings: EngineSettings,
    reconciler: StaleAlertReconciler,
}

impl LifecycleEngine {
    pub fn new(
        ledger: Arc<dyn Ledger>,
        source: Box<dyn SnapshotSource>,
        notifier: Arc<dyn Notifier>,
        settings: EngineSettings,
    ) -> Self {
        let reconciler = StaleAlertReconciler::new(
            ledger.clone(),
            notifier.clone(),
            settings.reconciler.clone(),
        );
        LifecycleEngine {
            ledger,
            source,
            notifier,
            settings,
            reconciler,
        }
    }

    pub async fn run_cycle(&mut self) -> CycleReport {
        self.run_cycle_at(Utc::now()).await
    }

    /// One full cycle. Errors are contained per entity and per phase so a
    /// single failure never aborts the cycle.
    pub async fn run_cycle_at(&mut self, now: DateTime<Utc>) -> CycleReport {
        let mut report = CycleReport::default();

        match self.source.list_live().await {
            Ok(snapshots) => {
                report.feed_ok = true;
                report.live = snapshots.len();
                for snap in &snapshots {
                    if let Err(e) = self.process_snapshot(snap, now, &mut report).await {
                        error!("Error processing {}: {}", snap.entity_id, e);
                        report.errors += 1;
                    }
                }
                let live_ids: HashSet<&str> =
                    snapshots.iter().map(|s| s.entity_id.as_str()).collect();
                match self.collect_garbage(&live_ids) {
                    Ok(n) => report.collected = n,
                    Err(e) => {
                        error!("Tracked-state cleanup failed: {}", e);
                        report.errors += 1;
                    }
                }
            }
            Err(e) => warn!("Live feed from {} unavailable: {}", self.source.name(), e),
        }

        match self.reconciler.sweep(self.source.as_mut(), now).await {
            Ok(sweep) => report.sweep = sweep,
            Err(e) => {
                error!("Stale alert sweep failed: {}", e);
                report.errors += 1;
            }
        }

        debug!("Cycle complete: {:?}", report);
        report
    }

    async fn process_snapshot(
        &mut self,
        snap: &Snapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let id = snap.entity_id.as_str();
        if let Some(rejection) = self.settings.filter.screen(snap) {
            // Excluded entities are never tracked unless an alert is already open on them
            if !self.ledger.open_alert_exists(id)? {
                debug!(
                    "Skipping {} ({} / {}): {:?}",
                    snap.display_name(),
                    snap.region,
                    snap.competition,
                    rejection
                );
                report.filtered += 1;
                return Ok(());
            }
        }

        let stored = self.ledger.get_tracked(id)?;
        let is_new = stored.is_none();
        let mut state = stored.unwrap_or_else(|| TrackedEntityState::new(id));
        let before = state.clone();

        let has_open = self.ledger.open_alert_exists(id)?;
        let phase = normalize_status(&snap.status_text);
        let action = decide(
            phase,
            snap.elapsed_minute,
            state.alert_evaluated,
            has_open,
            &self.settings.rules,
        );
        if is_new {
            debug!(
                "Tracking {} ({}) as {}",
                id,
                snap.display_name(),
                EntityLifecycle::of(state.alert_evaluated, has_open)
            );
        }

        match action {
            Action::EvaluateWindow => self.evaluate_window(&mut state, snap, now, report).await?,
            Action::ResolveAtCheckpoint => {
                let Some(score) = snap.score() else {
                    warn!("{} at checkpoint without a score, retrying next cycle", id);
                    return Ok(());
                };
                let result = self.resolve_at_checkpoint(id, &score, now).await?;
                if let ResolveResult::Resolved(_) = result {
                    report.resolved += 1;
                    if let Err(e) = self.ledger.delete_tracked(id) {
                        warn!("Could not drop tracked state for {}: {}", id, e);
                    }
                    return Ok(());
                }
            }
            Action::Discard => {
                if !is_new {
                    self.ledger.delete_tracked(id)?;
                }
                report.discarded += 1;
                return Ok(());
            }
            Action::AwaitCheckpoint | Action::Track => {}
        }

        if is_new || state != before {
            self.ledger.put_tracked(&state)?;
        }
        Ok(())
    }

    async fn evaluate_window(
        &mut self,
        state: &mut TrackedEntityState,
        snap: &Snapshot,
        now: DateTime<Utc>,
        report: &mut CycleReport,
    ) -> Result<()> {
        let score = snap.score();
        if !self.settings.rules.qualifies(score.as_deref()) {
            debug!(
                "{} at {:?}' with score {}: no alert",
                snap.display_name(),
                snap.elapsed_minute,
                score.as_deref().unwrap_or("N/A")
            );
            state.alert_evaluated = true;
            return Ok(());
        }

        let noticed_before = state.lock_notice_logged;
        match self.try_open_alert(state, snap, now).await? {
            OpenResult::Opened(_) => report.opened += 1,
            OpenResult::Suppressed(reason) => {
                report.suppressed += 1;
                // A conflict follows a free lock check, so it always starts a new episode
                let notice = match reason {
                    SuppressReason::Locked => !noticed_before,
                    SuppressReason::Conflict => true,
                    SuppressReason::AlreadyOpen => false,
                };
                if notice {
                    report.lock_notices += 1;
                }
            }
        }
        Ok(())
    }

    /// Attempt to open an alert for a qualifying snapshot.
    ///
    /// A lock-suppressed entity is left unevaluated so it can still open once
    /// the lock frees up inside its window. Nothing in `state` changes when a
    /// ledger write fails.
    pub async fn try_open_alert(
        &mut self,
        state: &mut TrackedEntityState,
        snap: &Snapshot,
        now: DateTime<Utc>,
    ) -> Result<OpenResult> {
        let id = snap.entity_id.as_str();
        let Some(score) = snap.score() else {
            bail!("cannot open an alert for {} without a score", id);
        };
        let exclusive = self.settings.single_alert_lock;

        if exclusive && self.ledger.any_open_alert()? {
            Self::note_lock_held(state, snap);
            return Ok(OpenResult::Suppressed(SuppressReason::Locked));
        }
        // Lock observed free: any later suppression is a new episode
        state.lock_notice_logged = false;
        if self.ledger.open_alert_exists(id)? {
            state.alert_evaluated = true;
            return Ok(OpenResult::Suppressed(SuppressReason::AlreadyOpen));
        }

        let plan = self
            .settings
            .staking
            .next(self.ledger.last_closed()?.as_ref());
        let alert = OpenAlert {
            entity_id: id.to_string(),
            display_name: snap.display_name(),
            competition: snap.competition.clone(),
            region: snap.region.clone(),
            alert_type: self.settings.alert_type,
            trigger_score: score.clone(),
            stake: plan.stake,
            sequence: plan.sequence,
            placed_at: now,
        };

        match self.ledger.create_open_alert(&alert, exclusive)? {
            CreateOutcome::Conflict => {
                Self::note_lock_held(state, snap);
                Ok(OpenResult::Suppressed(SuppressReason::Conflict))
            }
            CreateOutcome::Created => {
                state.alert_evaluated = true;
                state.lock_notice_logged = false;
                state.recorded_score_at_alert = Some(score);
                info!(
                    "🚨 Alert opened: {} @ {} (stake {:.2}, sequence {})",
                    alert.display_name, alert.trigger_score, alert.stake, alert.sequence
                );
                let minute = snap.elapsed_minute.unwrap_or_default();
                if !self.notifier.send(&messages::alert_opened(&alert, minute)).await {
                    warn!("Alert notification for {} not delivered", id);
                }
                Ok(OpenResult::Opened(alert))
            }
        }
    }

    fn note_lock_held(state: &mut TrackedEntityState, snap: &Snapshot) {
        if !state.lock_notice_logged {
            info!(
                "🔒 {} qualifies but an alert is already open, suppressed",
                snap.display_name()
            );
            state.lock_notice_logged = true;
        }
    }

    /// Checkpoint fast path. Idempotent: a second call for the same entity
    /// finds no open alert and is a no-op.
    pub async fn resolve_at_checkpoint(
        &mut self,
        entity_id: &str,
        checkpoint_score: &str,
        now: DateTime<Utc>,
    ) -> Result<ResolveResult> {
        let Some(alert) = self.ledger.get_open_alert(entity_id)? else {
            return Ok(ResolveResult::NoOp);
        };
        if !alert.alert_type.rules().resolves_at_checkpoint {
            return Ok(ResolveResult::NoOp);
        }

        let outcome = checkpoint_outcome(&alert, checkpoint_score);
        let Some(closed) = self.ledger.move_to_closed(entity_id, outcome, now)? else {
            return Ok(ResolveResult::NoOp);
        };
        clear_lock_notices(self.ledger.as_ref());
        info!(
            "Alert on {} resolved at checkpoint: {} ({} vs {})",
            closed.alert.display_name, closed.outcome, checkpoint_score, closed.alert.trigger_score
        );
        let text = messages::checkpoint_result(&closed, checkpoint_score);
        if !self.notifier.send(&text).await {
            warn!("Result notification for {} not delivered", entity_id);
        }
        Ok(ResolveResult::Resolved(closed))
    }

    /// Drop tracked state for entities that left the live feed and hold no
    /// open alert.
    fn collect_garbage(&self, live_ids: &HashSet<&str>) -> Result<usize> {
        let mut removed = 0;
        for tracked in self.ledger.list_tracked()? {
            if live_ids.contains(tracked.entity_id.as_str()) {
                continue;
            }
            if self.ledger.open_alert_exists(&tracked.entity_id)? {
                continue;
            }
            self.ledger.delete_tracked(&tracked.entity_id)?;
            removed += 1;
        }
        if removed > 0 {
            debug!("Dropped {} tracker(s) no longer live", removed);
        }
        Ok(removed)
    }

    /// Release the upstream client and flush the ledger.
    pub async fn shutdown(&mut self) -> Result<()> {
        self.source.close().await;
        self.ledger.flush()
    }
}

/// Reset `lock_notice_logged` on every tracked entity once an alert closes,
/// so entities still locked out log the next episode. Failures are logged only.
pub(super) fn clear_lock_notices(ledger: &dyn Ledger) {
    let tracked = match ledger.list_tracked() {
        Ok(tracked) => tracked,
        Err(e) => {
            warn!("Could not reset lock notices: {}", e);
            return;
        }
    };
    for mut state in tracked.into_iter().filter(|t| t.lock_notice_logged) {
        state.lock_notice_logged = false;
        if let Err(e) = ledger.put_tracked(&state) {
            warn!("Could not reset lock notice for {}: {}", state.entity_id, e);
        }
    }
}
