use anyhow::{anyhow, Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::types::{FromSql, FromSqlError, FromSqlResult, ToSql, ToSqlOutput, ValueRef};
use rusqlite::{params, Connection, OptionalExtension};
use std::sync::{Arc, Mutex, MutexGuard};

use super::models::*;
use super::Ledger;

/// SQLite-backed ledger (single connection behind a mutex).
#[derive(Clone)]
pub struct SqliteLedger {
    conn: Arc<Mutex<Connection>>,
}

impl SqliteLedger {
    /// Open (or create) the ledger database at the given path
    pub fn open(path: &str) -> Result<Self> {
        let conn = Connection::open(path)
            .with_context(|| format!("Failed to open ledger database at {}", path))?;
        conn.execute_batch("PRAGMA journal_mode=WAL;")?;
        Self::from_connection(conn)
    }

    /// Fresh ledger that lives only as long as the process.
    pub fn open_in_memory() -> Result<Self> {
        Self::from_connection(Connection::open_in_memory()?)
    }

    fn from_connection(conn: Connection) -> Result<Self> {
        let ledger = SqliteLedger {
            conn: Arc::new(Mutex::new(conn)),
        };
        ledger.run_migrations()?;
        Ok(ledger)
    }

    /// Run schema migrations (idempotent)
    fn run_migrations(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.execute_batch(SCHEMA_SQL)
            .context("Failed to apply ledger schema")?;
        Ok(())
    }

    fn conn(&self) -> Result<MutexGuard<'_, Connection>> {
        self.conn
            .lock()
            .map_err(|_| anyhow!("ledger connection mutex poisoned"))
    }
}

impl Ledger for SqliteLedger {
    // ── Open alerts ──────────────────────────────────────────────────────────

    fn get_open_alert(&self, entity_id: &str) -> Result<Option<OpenAlert>> {
        let conn = self.conn()?;
        let alert = conn
            .query_row(
                &format!("SELECT {OPEN_COLUMNS} FROM open_alerts WHERE entity_id = ?1"),
                params![entity_id],
                map_open_alert,
            )
            .optional()?;
        Ok(alert)
    }

    fn open_alert_exists(&self, entity_id: &str) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM open_alerts WHERE entity_id = ?1)",
            params![entity_id],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn any_open_alert(&self) -> Result<bool> {
        let conn = self.conn()?;
        let exists: bool = conn.query_row(
            "SELECT EXISTS(SELECT 1 FROM open_alerts LIMIT 1)",
            [],
            |r| r.get(0),
        )?;
        Ok(exists)
    }

    fn create_open_alert(&self, alert: &OpenAlert, exclusive: bool) -> Result<CreateOutcome> {
        let conn = self.conn()?;
        // NULL lock slots never collide, so non-exclusive rows are only keyed by entity.
        let lock_slot: Option<i64> = if exclusive { Some(GLOBAL_LOCK_SLOT) } else { None };
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO open_alerts (
                entity_id, display_name, competition, region, alert_type,
                trigger_score, stake, sequence, placed_at, lock_slot
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10)",
            params![
                alert.entity_id,
                alert.display_name,
                alert.competition,
                alert.region,
                alert.alert_type,
                alert.trigger_score,
                alert.stake,
                alert.sequence,
                alert.placed_at,
                lock_slot,
            ],
        )?;
        Ok(if inserted == 1 {
            CreateOutcome::Created
        } else {
            CreateOutcome::Conflict
        })
    }

    fn list_open_alerts(&self) -> Result<Vec<OpenAlert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {OPEN_COLUMNS} FROM open_alerts ORDER BY placed_at ASC"
        ))?;
        let alerts = stmt
            .query_map([], map_open_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(alerts)
    }

    fn list_open_older_than(&self, cutoff: DateTime<Utc>) -> Result<Vec<OpenAlert>> {
        // The open set is tiny; compare typed timestamps rather than their text form.
        Ok(self
            .list_open_alerts()?
            .into_iter()
            .filter(|a| a.placed_at < cutoff)
            .collect())
    }

    fn move_to_closed(
        &self,
        entity_id: &str,
        outcome: Outcome,
        resolved_at: DateTime<Utc>,
    ) -> Result<Option<ClosedAlert>> {
        let mut conn = self.conn()?;
        let tx = conn.transaction()?;

        let open = tx
            .query_row(
                &format!("SELECT {OPEN_COLUMNS} FROM open_alerts WHERE entity_id = ?1"),
                params![entity_id],
                map_open_alert,
            )
            .optional()?;
        let Some(open) = open else {
            return Ok(None);
        };

        tx.execute(
            "INSERT INTO closed_alerts (
                entity_id, display_name, competition, region, alert_type,
                trigger_score, stake, sequence, placed_at, outcome, resolved_at
             ) VALUES (?1,?2,?3,?4,?5,?6,?7,?8,?9,?10,?11)",
            params![
                open.entity_id,
                open.display_name,
                open.competition,
                open.region,
                open.alert_type,
                open.trigger_score,
                open.stake,
                open.sequence,
                open.placed_at,
                outcome,
                resolved_at,
            ],
        )?;
        let id = tx.last_insert_rowid();
        tx.execute(
            "DELETE FROM open_alerts WHERE entity_id = ?1",
            params![entity_id],
        )?;
        tx.commit().context("Failed to commit alert resolution")?;

        let mut closed = open.close(outcome, resolved_at);
        closed.id = Some(id);
        Ok(Some(closed))
    }

    // ── Closed alerts ────────────────────────────────────────────────────────

    fn last_closed(&self) -> Result<Option<ClosedAlert>> {
        let conn = self.conn()?;
        let closed = conn
            .query_row(
                &format!("SELECT {CLOSED_COLUMNS} FROM closed_alerts ORDER BY id DESC LIMIT 1"),
                [],
                map_closed_alert,
            )
            .optional()?;
        Ok(closed)
    }

    fn list_closed(&self, limit: i64) -> Result<Vec<ClosedAlert>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {CLOSED_COLUMNS} FROM closed_alerts ORDER BY id DESC LIMIT ?1"
        ))?;
        let rows = stmt
            .query_map(params![limit], map_closed_alert)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Tracked entities ─────────────────────────────────────────────────────

    fn get_tracked(&self, entity_id: &str) -> Result<Option<TrackedEntityState>> {
        let conn = self.conn()?;
        let state = conn
            .query_row(
                "SELECT entity_id, alert_evaluated, lock_notice_logged, recorded_score_at_alert
                 FROM tracked_entities WHERE entity_id = ?1",
                params![entity_id],
                map_tracked,
            )
            .optional()?;
        Ok(state)
    }

    fn put_tracked(&self, state: &TrackedEntityState) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO tracked_entities (
                entity_id, alert_evaluated, lock_notice_logged, recorded_score_at_alert, updated_at
             ) VALUES (?1,?2,?3,?4,?5)
             ON CONFLICT(entity_id) DO UPDATE SET
                alert_evaluated=excluded.alert_evaluated,
                lock_notice_logged=excluded.lock_notice_logged,
                recorded_score_at_alert=excluded.recorded_score_at_alert,
                updated_at=excluded.updated_at",
            params![
                state.entity_id,
                state.alert_evaluated,
                state.lock_notice_logged,
                state.recorded_score_at_alert,
                Utc::now(),
            ],
        )?;
        Ok(())
    }

    fn delete_tracked(&self, entity_id: &str) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "DELETE FROM tracked_entities WHERE entity_id = ?1",
            params![entity_id],
        )?;
        Ok(())
    }

    fn list_tracked(&self) -> Result<Vec<TrackedEntityState>> {
        let conn = self.conn()?;
        let mut stmt = conn.prepare(
            "SELECT entity_id, alert_evaluated, lock_notice_logged, recorded_score_at_alert
             FROM tracked_entities ORDER BY entity_id",
        )?;
        let rows = stmt
            .query_map([], map_tracked)?
            .collect::<rusqlite::Result<Vec<_>>>()?;
        Ok(rows)
    }

    // ── Reconciliation gate ──────────────────────────────────────────────────

    fn last_api_call_at(&self) -> Result<Option<DateTime<Utc>>> {
        let conn = self.conn()?;
        let at: Option<Option<DateTime<Utc>>> = conn
            .query_row(
                "SELECT last_api_call_at FROM reconciliation_gate WHERE id = 1",
                [],
                |r| r.get(0),
            )
            .optional()?;
        Ok(at.flatten())
    }

    fn record_api_call(&self, at: DateTime<Utc>) -> Result<()> {
        let conn = self.conn()?;
        conn.execute(
            "INSERT INTO reconciliation_gate (id, last_api_call_at) VALUES (1, ?1)
             ON CONFLICT(id) DO UPDATE SET last_api_call_at=excluded.last_api_call_at",
            params![at],
        )?;
        Ok(())
    }

    // ── Misc ─────────────────────────────────────────────────────────────────

    fn stats(&self) -> Result<Stats> {
        let conn = self.conn()?;
        let open_alerts: i64 =
            conn.query_row("SELECT COUNT(*) FROM open_alerts", [], |r| r.get(0))?;
        let closed_alerts: i64 =
            conn.query_row("SELECT COUNT(*) FROM closed_alerts", [], |r| r.get(0))?;
        let count_outcome = |outcome: Outcome| -> rusqlite::Result<i64> {
            conn.query_row(
                "SELECT COUNT(*) FROM closed_alerts WHERE outcome = ?1",
                params![outcome],
                |r| r.get(0),
            )
        };
        let wins = count_outcome(Outcome::Win)?;
        let losses = count_outcome(Outcome::Loss)?;
        let pushes = count_outcome(Outcome::Push)?;
        let errors = count_outcome(Outcome::Error)?;
        let total_staked: f64 = conn.query_row(
            "SELECT COALESCE((SELECT SUM(stake) FROM closed_alerts), 0)
                  + COALESCE((SELECT SUM(stake) FROM open_alerts), 0)",
            [],
            |r| r.get(0),
        )?;
        Ok(Stats {
            open_alerts,
            closed_alerts,
            wins,
            losses,
            pushes,
            errors,
            total_staked,
        })
    }

    fn flush(&self) -> Result<()> {
        let conn = self.conn()?;
        conn.query_row("PRAGMA wal_checkpoint(TRUNCATE)", [], |_| Ok(()))
            .context("WAL checkpoint failed")?;
        Ok(())
    }
}

// ── SQL helpers ────────────────────────────────────────────────────────────────

const GLOBAL_LOCK_SLOT: i64 = 1;

const OPEN_COLUMNS: &str = "entity_id, display_name, competition, region, alert_type,
    trigger_score, stake, sequence, placed_at";

const CLOSED_COLUMNS: &str = "id, entity_id, display_name, competition, region, alert_type,
    trigger_score, stake, sequence, placed_at, outcome, resolved_at";

fn map_open_alert(row: &rusqlite::Row) -> rusqlite::Result<OpenAlert> {
    Ok(OpenAlert {
        entity_id: row.get(0)?,
        display_name: row.get(1)?,
        competition: row.get(2)?,
        region: row.get(3)?,
        alert_type: row.get(4)?,
        trigger_score: row.get(5)?,
        stake: row.get(6)?,
        sequence: row.get(7)?,
        placed_at: row.get(8)?,
    })
}

fn map_closed_alert(row: &rusqlite::Row) -> rusqlite::Result<ClosedAlert> {
    Ok(ClosedAlert {
        id: row.get(0)?,
        alert: OpenAlert {
            entity_id: row.get(1)?,
            display_name: row.get(2)?,
            competition: row.get(3)?,
            region: row.get(4)?,
            alert_type: row.get(5)?,
            trigger_score: row.get(6)?,
            stake: row.get(7)?,
            sequence: row.get(8)?,
            placed_at: row.get(9)?,
        },
        outcome: row.get(10)?,
        resolved_at: row.get(11)?,
    })
}

fn map_tracked(row: &rusqlite::Row) -> rusqlite::Result<TrackedEntityState> {
    Ok(TrackedEntityState {
        entity_id: row.get(0)?,
        alert_evaluated: row.get(1)?,
        lock_notice_logged: row.get(2)?,
        recorded_score_at_alert: row.get(3)?,
    })
}

impl ToSql for AlertType {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for AlertType {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        AlertType::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown alert type: {s}").into()))
    }
}

impl ToSql for Outcome {
    fn to_sql(&self) -> rusqlite::Result<ToSqlOutput<'_>> {
        Ok(ToSqlOutput::from(self.as_str()))
    }
}

impl FromSql for Outcome {
    fn column_result(value: ValueRef<'_>) -> FromSqlResult<Self> {
        let s = value.as_str()?;
        Outcome::parse(s)
            .ok_or_else(|| FromSqlError::Other(format!("unknown outcome: {s}").into()))
    }
}

/// SQLite schema (idempotent CREATE IF NOT EXISTS)
pub const SCHEMA_SQL: &str = r#"
CREATE TABLE IF NOT EXISTS tracked_entities (
    entity_id               TEXT    PRIMARY KEY,
    alert_evaluated         INTEGER NOT NULL DEFAULT 0,
    lock_notice_logged      INTEGER NOT NULL DEFAULT 0,
    recorded_score_at_alert TEXT,
    updated_at              TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS open_alerts (
    entity_id     TEXT    PRIMARY KEY,
    display_name  TEXT    NOT NULL,
    competition   TEXT    NOT NULL,
    region        TEXT    NOT NULL,
    alert_type    TEXT    NOT NULL,
    trigger_score TEXT    NOT NULL,
    stake         REAL    NOT NULL,
    sequence      INTEGER NOT NULL CHECK (sequence >= 1),
    placed_at     TEXT    NOT NULL,
    lock_slot     INTEGER UNIQUE
);

CREATE TABLE IF NOT EXISTS closed_alerts (
    id            INTEGER PRIMARY KEY AUTOINCREMENT,
    entity_id     TEXT    NOT NULL,
    display_name  TEXT    NOT NULL,
    competition   TEXT    NOT NULL,
    region        TEXT    NOT NULL,
    alert_type    TEXT    NOT NULL,
    trigger_score TEXT    NOT NULL,
    stake         REAL    NOT NULL,
    sequence      INTEGER NOT NULL,
    placed_at     TEXT    NOT NULL,
    outcome       TEXT    NOT NULL,
    resolved_at   TEXT    NOT NULL
);

CREATE TABLE IF NOT EXISTS reconciliation_gate (
    id               INTEGER PRIMARY KEY CHECK (id = 1),
    last_api_call_at TEXT
);

CREATE INDEX IF NOT EXISTS idx_closed_alerts_entity ON closed_alerts(entity_id);
"#;
