//! Store seams between the reconciliation logic and the outside world.
//!
//! Every collaborator — the audit log, the downstream queue, the live
//! materialized table, the replay transport, the notification sink — is a
//! trait passed explicitly into the engine. There is no ambient store
//! selection: a call site always says which stores it reads.
//!
//! `sqlite` provides the production implementations against the PMS
//! database; `mem` provides in-memory fixtures for tests.

pub mod mem;
pub mod sqlite;

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::HashSet;
use std::fmt;

use crate::change::{ChangeAction, ChangeEvent};
use crate::correlate::{DownstreamEvent, ServiceKind, SyncScope};
use crate::remediate::DateRange;
use crate::schema::EntityKind;

/// Errors raised by store implementations.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Underlying SQLite failure.
    #[error("sqlite: {0}")]
    Sqlite(#[from] rusqlite::Error),

    /// A row that could not be mapped into its typed form.
    #[error("malformed row: {0}")]
    Malformed(String),

    /// Downstream replay transport failure.
    #[error("replay failed: {0}")]
    Replay(String),

    /// Anything else (worker panic, wiring bug).
    #[error("internal store error: {0}")]
    Internal(String),
}

/// Read access to the append-only change-audit log.
pub trait AuditLog: Send + Sync {
    /// All change events for `entity` with `occurred_at` inside `range`
    /// (half-open, start inclusive), optionally filtered by action,
    /// ordered by `occurred_at` ascending.
    fn changes_in_range(
        &self,
        entity: EntityKind,
        range: (DateTime<Utc>, DateTime<Utc>),
        action: Option<ChangeAction>,
    ) -> Result<Vec<ChangeEvent>, StoreError>;

    /// All change events for `entity` whose before or after snapshot touches
    /// the given hotel and stay date, regardless of when they occurred.
    fn changes_touching(
        &self,
        entity: EntityKind,
        hotel_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<ChangeEvent>, StoreError>;

    /// The subset of `ids` that have a `DELETE` event for `entity`.
    fn deleted_record_ids(
        &self,
        entity: EntityKind,
        ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError>;
}

/// Read access to the downstream synchronization queue.
pub trait DownstreamQueue: Send + Sync {
    /// The earliest job for `scope` and `service` created strictly inside
    /// `(after, before)`, by ascending `created_at`.
    fn first_match(
        &self,
        scope: &SyncScope,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        service: ServiceKind,
    ) -> Result<Option<DownstreamEvent>, StoreError>;

    /// All jobs for a hotel created inside `range`, optionally filtered by
    /// service, ordered by `created_at` ascending.
    fn in_range(
        &self,
        hotel_id: i64,
        range: (DateTime<Utc>, DateTime<Utc>),
        service: Option<ServiceKind>,
    ) -> Result<Vec<DownstreamEvent>, StoreError>;
}

/// One row of the live materialized detail table.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DetailRow {
    /// Primary key.
    pub record_id: i64,
    /// Owning reservation.
    pub reservation_id: Option<i64>,
    /// Room.
    pub room_id: Option<i64>,
    /// Stay date.
    pub date: NaiveDate,
    /// Current status string.
    pub status: String,
    /// Guest display name.
    pub guest: Option<String>,
}

/// Read access to the current materialized state, used for absence detection
/// and investigation snapshots only. Lifecycle truth comes from the log.
pub trait LiveState: Send + Sync {
    /// Record ids currently present for a hotel and date.
    fn live_detail_ids(&self, hotel_id: i64, date: NaiveDate) -> Result<HashSet<i64>, StoreError>;

    /// Which of `ids` are currently present, regardless of scope.
    fn present_among(&self, ids: &[i64]) -> Result<HashSet<i64>, StoreError>;

    /// Full rows for a hotel and date, ordered by room then record id.
    fn snapshot(&self, hotel_id: i64, date: NaiveDate) -> Result<Vec<DetailRow>, StoreError>;
}

/// What a replay call reported back.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayOutcome {
    /// Data was pushed downstream.
    Synced,
    /// Nothing needed syncing for the range.
    NoOp,
}

/// The downstream replay transport: one call per remediation group.
pub trait ReplaySink: Send + Sync {
    /// Replay the sync for every date of `range` at `hotel_id`.
    fn replay(&self, hotel_id: i64, range: DateRange) -> Result<ReplayOutcome, StoreError>;
}

/// Severity attached to a notification.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Severity {
    /// Routine pass summary.
    Info,
    /// Success rate below the alert threshold.
    Alert,
    /// Success rate below the critical threshold.
    Critical,
    /// The pass itself failed to execute.
    Error,
}

impl Severity {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Info => "INFO",
            Self::Alert => "ALERT",
            Self::Critical => "CRITICAL",
            Self::Error => "ERROR",
        }
    }
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A severity-tagged notification with structured metrics. This subsystem
/// decides when and what to send; delivery (mail, webhook, log) is the
/// sink's concern.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct Notification {
    /// How urgent the message is.
    pub severity: Severity,
    /// Human-readable summary.
    pub message: String,
    /// Structured pass metrics for machine consumers.
    pub metrics: serde_json::Value,
}

/// Delivery-agnostic notification sink.
pub trait Notifier: Send + Sync {
    /// Deliver one notification. Delivery failures are the sink's problem;
    /// the engine does not retry sends.
    fn send(&self, notification: &Notification);
}

/// Default sink: routes notifications to the tracing subscriber at a level
/// matching their severity.
#[derive(Debug, Clone, Copy, Default)]
pub struct LoggingNotifier;

impl Notifier for LoggingNotifier {
    fn send(&self, notification: &Notification) {
        let metrics = notification.metrics.to_string();
        match notification.severity {
            Severity::Info => {
                tracing::info!(metrics = %metrics, "{}", notification.message);
            }
            Severity::Alert => {
                tracing::warn!(metrics = %metrics, "{}", notification.message);
            }
            Severity::Critical | Severity::Error => {
                tracing::error!(
                    severity = %notification.severity,
                    metrics = %metrics,
                    "{}", notification.message
                );
            }
        }
    }
}
