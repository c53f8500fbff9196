//! `SQLite` implementations of the store traits against the PMS database.
//!
//! One [`SqlitePmsStore`] serves every trait; the connection sits behind a
//! mutex so batched correlation lookups can share it safely. Runtime
//! defaults are conservative: WAL journaling, a 5 s busy timeout, and
//! foreign keys on.
//!
//! Timestamps are stored as RFC 3339 UTC strings (`...Z`). Range predicates
//! and ordering go through `julianday()` so rows written by other PMS
//! components with fractional seconds compare temporally, not
//! lexicographically.
//!
//! Malformed audit rows degrade, never abort: a row whose payload cannot be
//! resolved is logged and skipped so one bad write cannot blind a whole
//! reconciliation pass.

use chrono::{DateTime, NaiveDate, SecondsFormat, Utc};
use rusqlite::{Connection, Row, params, params_from_iter};
use std::collections::HashSet;
use std::path::Path;
use std::str::FromStr;
use std::sync::Mutex;
use std::time::Duration;
use tracing::warn;

use super::{
    AuditLog, DetailRow, DownstreamQueue, LiveState, ReplayOutcome, ReplaySink, StoreError,
};
use crate::change::{ChangeAction, ChangeEvent, ChangePayload};
use crate::correlate::{DownstreamEvent, ServiceKind, SyncScope};
use crate::remediate::DateRange;
use crate::schema::EntityKind;

/// Busy timeout for PMS database connections.
pub const DEFAULT_BUSY_TIMEOUT: Duration = Duration::from_secs(5);

/// SQLite-backed PMS store implementing all read traits plus replay.
#[derive(Debug)]
pub struct SqlitePmsStore {
    conn: Mutex<Connection>,
}

impl SqlitePmsStore {
    /// Open the PMS database, apply runtime pragmas, and make sure the
    /// tables this subsystem reads exist.
    ///
    /// # Errors
    ///
    /// Returns an error if opening or configuring the database fails.
    pub fn open(path: &Path) -> Result<Self, StoreError> {
        let conn = Connection::open(path)?;
        Self::from_connection(conn)
    }

    /// Build a store from an existing connection (used with in-memory
    /// databases in tests).
    ///
    /// # Errors
    ///
    /// Returns an error if configuring the connection fails.
    pub fn from_connection(conn: Connection) -> Result<Self, StoreError> {
        configure_connection(&conn)?;
        ensure_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn lock(&self) -> Result<std::sync::MutexGuard<'_, Connection>, StoreError> {
        self.conn
            .lock()
            .map_err(|_| StoreError::Internal("pms connection mutex poisoned".to_string()))
    }
}

fn configure_connection(conn: &Connection) -> rusqlite::Result<()> {
    conn.pragma_update(None, "foreign_keys", "ON")?;
    conn.pragma_update(None, "synchronous", "NORMAL")?;
    let _journal_mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
    conn.busy_timeout(DEFAULT_BUSY_TIMEOUT)?;
    Ok(())
}

/// Create the tables this subsystem touches if they are absent. The real PMS
/// owns these schemas; this exists for fresh databases and tests.
fn ensure_schema(conn: &Connection) -> rusqlite::Result<()> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS audit_log (
            id          INTEGER PRIMARY KEY,
            entity      TEXT NOT NULL,
            record_id   INTEGER NOT NULL,
            action      TEXT NOT NULL,
            occurred_at TEXT NOT NULL,
            payload     TEXT NOT NULL
        );
        CREATE INDEX IF NOT EXISTS idx_audit_entity_time
            ON audit_log (entity, occurred_at);
        CREATE TABLE IF NOT EXISTS sync_jobs (
            id             INTEGER PRIMARY KEY,
            reservation_id INTEGER,
            hotel_id       INTEGER NOT NULL,
            created_at     TEXT NOT NULL,
            service        TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'pending',
            retries        INTEGER NOT NULL DEFAULT 0,
            last_error     TEXT,
            range_start    TEXT,
            range_end      TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_sync_jobs_hotel_time
            ON sync_jobs (hotel_id, created_at);
        CREATE TABLE IF NOT EXISTS reservation_details (
            id             INTEGER PRIMARY KEY,
            reservation_id INTEGER,
            hotel_id       INTEGER NOT NULL,
            room_id        INTEGER,
            date           TEXT NOT NULL,
            status         TEXT NOT NULL DEFAULT 'confirmed',
            guest_name     TEXT
        );
        CREATE INDEX IF NOT EXISTS idx_details_hotel_date
            ON reservation_details (hotel_id, date);",
    )
}

fn ts(value: DateTime<Utc>) -> String {
    value.to_rfc3339_opts(SecondsFormat::Secs, true)
}

fn parse_ts(raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|err| StoreError::Malformed(format!("bad timestamp '{raw}': {err}")))
}

fn parse_date(raw: &str) -> Result<NaiveDate, StoreError> {
    NaiveDate::parse_from_str(raw, "%Y-%m-%d")
        .map_err(|err| StoreError::Malformed(format!("bad date '{raw}': {err}")))
}

/// Map one audit row; `None` (with a warning) for rows that cannot be
/// resolved so a single bad write degrades, not aborts.
fn map_audit_row(row: &Row<'_>) -> rusqlite::Result<Option<ChangeEvent>> {
    let id: i64 = row.get(0)?;
    let entity: String = row.get(1)?;
    let record_id: i64 = row.get(2)?;
    let action: String = row.get(3)?;
    let occurred_at: String = row.get(4)?;
    let payload: String = row.get(5)?;

    let mapped = (|| -> Result<ChangeEvent, String> {
        let entity = EntityKind::from_str(&entity).map_err(|e| e.to_string())?;
        let action = ChangeAction::from_str(&action).map_err(|e| e.to_string())?;
        let occurred_at = parse_ts(&occurred_at).map_err(|e| e.to_string())?;
        let value: serde_json::Value =
            serde_json::from_str(&payload).map_err(|e| e.to_string())?;
        let payload = ChangePayload::deserialize_for(action, &value).map_err(|e| e.to_string())?;
        Ok(ChangeEvent {
            entity,
            record_id,
            action,
            occurred_at,
            payload,
        })
    })();

    match mapped {
        Ok(event) => Ok(Some(event)),
        Err(reason) => {
            warn!(audit_id = id, %reason, "skipping malformed audit row");
            Ok(None)
        }
    }
}

/// Raw sync-job row before timestamp/service resolution.
struct JobRow {
    id: i64,
    reservation_id: Option<i64>,
    hotel_id: i64,
    created_at: String,
    service: String,
    status: String,
    retries: u32,
    last_error: Option<String>,
}

fn map_job_row(row: &Row<'_>) -> rusqlite::Result<JobRow> {
    Ok(JobRow {
        id: row.get(0)?,
        reservation_id: row.get(1)?,
        hotel_id: row.get(2)?,
        created_at: row.get(3)?,
        service: row.get(4)?,
        status: row.get(5)?,
        retries: row.get(6)?,
        last_error: row.get(7)?,
    })
}

fn finish_job(raw: JobRow) -> Result<Option<DownstreamEvent>, StoreError> {
    let service = match ServiceKind::from_str(&raw.service) {
        Ok(s) => s,
        Err(err) => {
            warn!(job_id = raw.id, %err, "skipping sync job with unknown service");
            return Ok(None);
        }
    };
    Ok(Some(DownstreamEvent {
        id: raw.id,
        reservation_id: raw.reservation_id,
        hotel_id: raw.hotel_id,
        created_at: parse_ts(&raw.created_at)?,
        service,
        status: raw.status,
        retries: raw.retries,
        last_error: raw.last_error,
    }))
}

const JOB_COLUMNS: &str =
    "id, reservation_id, hotel_id, created_at, service, status, retries, last_error";

impl AuditLog for SqlitePmsStore {
    fn changes_in_range(
        &self,
        entity: EntityKind,
        range: (DateTime<Utc>, DateTime<Utc>),
        action: Option<ChangeAction>,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity, record_id, action, occurred_at, payload
             FROM audit_log
             WHERE entity = ?1
               AND julianday(occurred_at) >= julianday(?2)
               AND julianday(occurred_at) < julianday(?3)
               AND (?4 IS NULL OR action = ?4)
             ORDER BY julianday(occurred_at), id",
        )?;
        let rows = stmt.query_map(
            params![
                entity.table(),
                ts(range.0),
                ts(range.1),
                action.map(ChangeAction::as_str)
            ],
            map_audit_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(event) = row? {
                out.push(event);
            }
        }
        Ok(out)
    }

    fn changes_touching(
        &self,
        entity: EntityKind,
        hotel_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        // Scope membership lives inside the JSON snapshots (either side for
        // updates), so filtering happens after payload resolution.
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, entity, record_id, action, occurred_at, payload
             FROM audit_log
             WHERE entity = ?1
             ORDER BY occurred_at, id",
        )?;
        let rows = stmt.query_map(params![entity.table()], map_audit_row)?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(event) = row? {
                if event.touches(hotel_id, date) {
                    out.push(event);
                }
            }
        }
        Ok(out)
    }

    fn deleted_record_ids(
        &self,
        entity: EntityKind,
        ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql = format!(
            "SELECT DISTINCT record_id FROM audit_log
             WHERE action = 'DELETE' AND entity = '{}' AND record_id IN ({placeholders})",
            entity.table()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, i64>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }
}

impl DownstreamQueue for SqlitePmsStore {
    fn first_match(
        &self,
        scope: &SyncScope,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        service: ServiceKind,
    ) -> Result<Option<DownstreamEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs
             WHERE service = ?1
               AND julianday(created_at) > julianday(?2)
               AND julianday(created_at) < julianday(?3)
             ORDER BY julianday(created_at), id"
        ))?;
        let rows = stmt.query_map(
            params![service.as_str(), ts(after), ts(before)],
            map_job_row,
        )?;
        for row in rows {
            if let Some(job) = finish_job(row?)? {
                if scope.matches(&job) && job.created_at > after && job.created_at < before {
                    return Ok(Some(job));
                }
            }
        }
        Ok(None)
    }

    fn in_range(
        &self,
        hotel_id: i64,
        range: (DateTime<Utc>, DateTime<Utc>),
        service: Option<ServiceKind>,
    ) -> Result<Vec<DownstreamEvent>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(&format!(
            "SELECT {JOB_COLUMNS} FROM sync_jobs
             WHERE hotel_id = ?1
               AND julianday(created_at) >= julianday(?2)
               AND julianday(created_at) < julianday(?3)
               AND (?4 IS NULL OR service = ?4)
             ORDER BY julianday(created_at), id"
        ))?;
        let rows = stmt.query_map(
            params![hotel_id, ts(range.0), ts(range.1), service.map(ServiceKind::as_str)],
            map_job_row,
        )?;
        let mut out = Vec::new();
        for row in rows {
            if let Some(job) = finish_job(row?)? {
                out.push(job);
            }
        }
        Ok(out)
    }
}

impl LiveState for SqlitePmsStore {
    fn live_detail_ids(&self, hotel_id: i64, date: NaiveDate) -> Result<HashSet<i64>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id FROM reservation_details WHERE hotel_id = ?1 AND date = ?2",
        )?;
        let rows = stmt.query_map(params![hotel_id, date.to_string()], |row| {
            row.get::<_, i64>(0)
        })?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    fn present_among(&self, ids: &[i64]) -> Result<HashSet<i64>, StoreError> {
        if ids.is_empty() {
            return Ok(HashSet::new());
        }
        let conn = self.lock()?;
        let placeholders = vec!["?"; ids.len()].join(",");
        let sql =
            format!("SELECT id FROM reservation_details WHERE id IN ({placeholders})");
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt.query_map(params_from_iter(ids.iter()), |row| row.get::<_, i64>(0))?;
        let mut out = HashSet::new();
        for row in rows {
            out.insert(row?);
        }
        Ok(out)
    }

    fn snapshot(&self, hotel_id: i64, date: NaiveDate) -> Result<Vec<DetailRow>, StoreError> {
        let conn = self.lock()?;
        let mut stmt = conn.prepare(
            "SELECT id, reservation_id, room_id, date, status, guest_name
             FROM reservation_details
             WHERE hotel_id = ?1 AND date = ?2
             ORDER BY room_id, id",
        )?;
        let rows = stmt.query_map(params![hotel_id, date.to_string()], |row| {
            Ok((
                row.get::<_, i64>(0)?,
                row.get::<_, Option<i64>>(1)?,
                row.get::<_, Option<i64>>(2)?,
                row.get::<_, String>(3)?,
                row.get::<_, String>(4)?,
                row.get::<_, Option<String>>(5)?,
            ))
        })?;
        let mut out = Vec::new();
        for row in rows {
            let (record_id, reservation_id, room_id, date_raw, status, guest) = row?;
            out.push(DetailRow {
                record_id,
                reservation_id,
                room_id,
                date: parse_date(&date_raw)?,
                status,
                guest,
            });
        }
        Ok(out)
    }
}

impl ReplaySink for SqlitePmsStore {
    /// Replay enqueues a fresh hotel-wide availability job covering the
    /// range. When no live rows exist in the range there is nothing the
    /// downstream side could sync, so the call is a no-op.
    fn replay(&self, hotel_id: i64, range: DateRange) -> Result<ReplayOutcome, StoreError> {
        let conn = self.lock()?;
        let live: i64 = conn.query_row(
            "SELECT COUNT(*) FROM reservation_details
             WHERE hotel_id = ?1 AND date >= ?2 AND date <= ?3",
            params![hotel_id, range.start.to_string(), range.end.to_string()],
            |row| row.get(0),
        )?;
        if live == 0 {
            return Ok(ReplayOutcome::NoOp);
        }
        conn.execute(
            "INSERT INTO sync_jobs
                (reservation_id, hotel_id, created_at, service, status, range_start, range_end)
             VALUES (NULL, ?1, ?2, 'availability', 'pending', ?3, ?4)",
            params![
                hotel_id,
                ts(Utc::now()),
                range.start.to_string(),
                range.end.to_string()
            ],
        )?;
        Ok(ReplayOutcome::Synced)
    }
}
