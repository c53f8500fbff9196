//! In-memory store implementations and event builders.
//!
//! These back the test suite and double as reference implementations of the
//! store traits' contracts (ordering, window bounds, scope matching). They
//! are exported so integration tests and downstream consumers can wire an
//! engine without a database.

use chrono::{DateTime, NaiveDate, Utc};
use serde_json::Value;
use std::collections::HashSet;
use std::sync::Mutex;

use super::{
    AuditLog, DetailRow, DownstreamQueue, LiveState, Notification, Notifier, ReplayOutcome,
    ReplaySink, StoreError,
};
use crate::change::{ChangeAction, ChangeEvent, ChangePayload};
use crate::correlate::{DownstreamEvent, ServiceKind, SyncScope};
use crate::remediate::DateRange;
use crate::schema::EntityKind;

/// Build a detail-row change event from a JSON payload in the writer's
/// on-disk shape (flat map, or `{old, new}` for updates).
///
/// # Panics
///
/// Panics on a payload that does not match the action's shape; fixtures are
/// expected to be well-formed.
#[must_use]
pub fn event(
    record_id: i64,
    action: ChangeAction,
    occurred_at: DateTime<Utc>,
    payload: Value,
) -> ChangeEvent {
    let payload = ChangePayload::deserialize_for(action, &payload).expect("fixture payload");
    ChangeEvent {
        entity: EntityKind::ReservationDetail,
        record_id,
        action,
        occurred_at,
        payload,
    }
}

/// Build a parent-reservation change event.
///
/// # Panics
///
/// Panics on a payload that does not match the action's shape.
#[must_use]
pub fn parent_event(
    record_id: i64,
    action: ChangeAction,
    occurred_at: DateTime<Utc>,
    payload: Value,
) -> ChangeEvent {
    let payload = ChangePayload::deserialize_for(action, &payload).expect("fixture payload");
    ChangeEvent {
        entity: EntityKind::Reservation,
        record_id,
        action,
        occurred_at,
        payload,
    }
}

/// Build a downstream queue job fixture.
#[must_use]
pub fn sync_job(
    id: i64,
    reservation_id: Option<i64>,
    hotel_id: i64,
    created_at: DateTime<Utc>,
    service: ServiceKind,
) -> DownstreamEvent {
    DownstreamEvent {
        id,
        reservation_id,
        hotel_id,
        created_at,
        service,
        status: "sent".to_string(),
        retries: 0,
        last_error: None,
    }
}

// ---------------------------------------------------------------------------
// MemAuditLog
// ---------------------------------------------------------------------------

/// Audit log backed by a vector of events.
#[derive(Debug, Default, Clone)]
pub struct MemAuditLog {
    events: Vec<ChangeEvent>,
}

impl MemAuditLog {
    #[must_use]
    pub fn new(events: Vec<ChangeEvent>) -> Self {
        Self { events }
    }
}

impl AuditLog for MemAuditLog {
    fn changes_in_range(
        &self,
        entity: EntityKind,
        range: (DateTime<Utc>, DateTime<Utc>),
        action: Option<ChangeAction>,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let mut out: Vec<ChangeEvent> = self
            .events
            .iter()
            .filter(|e| e.entity == entity)
            .filter(|e| e.occurred_at >= range.0 && e.occurred_at < range.1)
            .filter(|e| action.is_none_or(|a| e.action == a))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.occurred_at, e.record_id));
        Ok(out)
    }

    fn changes_touching(
        &self,
        entity: EntityKind,
        hotel_id: i64,
        date: NaiveDate,
    ) -> Result<Vec<ChangeEvent>, StoreError> {
        let mut out: Vec<ChangeEvent> = self
            .events
            .iter()
            .filter(|e| e.entity == entity && e.touches(hotel_id, date))
            .cloned()
            .collect();
        out.sort_by_key(|e| (e.occurred_at, e.record_id));
        Ok(out)
    }

    fn deleted_record_ids(
        &self,
        entity: EntityKind,
        ids: &[i64],
    ) -> Result<HashSet<i64>, StoreError> {
        Ok(self
            .events
            .iter()
            .filter(|e| e.entity == entity && e.action == ChangeAction::Delete)
            .map(|e| e.record_id)
            .filter(|id| ids.contains(id))
            .collect())
    }
}

// ---------------------------------------------------------------------------
// MemQueue
// ---------------------------------------------------------------------------

/// Downstream queue backed by a vector of jobs.
#[derive(Debug, Default, Clone)]
pub struct MemQueue {
    jobs: Vec<DownstreamEvent>,
}

impl MemQueue {
    #[must_use]
    pub fn new(jobs: Vec<DownstreamEvent>) -> Self {
        Self { jobs }
    }
}

impl DownstreamQueue for MemQueue {
    fn first_match(
        &self,
        scope: &SyncScope,
        after: DateTime<Utc>,
        before: DateTime<Utc>,
        service: ServiceKind,
    ) -> Result<Option<DownstreamEvent>, StoreError> {
        let mut candidates: Vec<&DownstreamEvent> = self
            .jobs
            .iter()
            .filter(|j| j.service == service && scope.matches(j))
            .filter(|j| j.created_at > after && j.created_at < before)
            .collect();
        candidates.sort_by_key(|j| (j.created_at, j.id));
        Ok(candidates.first().map(|j| (*j).clone()))
    }

    fn in_range(
        &self,
        hotel_id: i64,
        range: (DateTime<Utc>, DateTime<Utc>),
        service: Option<ServiceKind>,
    ) -> Result<Vec<DownstreamEvent>, StoreError> {
        let mut out: Vec<DownstreamEvent> = self
            .jobs
            .iter()
            .filter(|j| j.hotel_id == hotel_id)
            .filter(|j| j.created_at >= range.0 && j.created_at < range.1)
            .filter(|j| service.is_none_or(|s| j.service == s))
            .cloned()
            .collect();
        out.sort_by_key(|j| (j.created_at, j.id));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// MemLiveState
// ---------------------------------------------------------------------------

/// Live table backed by a vector of rows. `hotel_id` is carried beside each
/// row since the production table scopes by hotel.
#[derive(Debug, Default, Clone)]
pub struct MemLiveState {
    rows: Vec<(i64, DetailRow)>,
}

impl MemLiveState {
    #[must_use]
    pub fn new(rows: Vec<(i64, DetailRow)>) -> Self {
        Self { rows }
    }
}

impl LiveState for MemLiveState {
    fn live_detail_ids(&self, hotel_id: i64, date: NaiveDate) -> Result<HashSet<i64>, StoreError> {
        Ok(self
            .rows
            .iter()
            .filter(|(h, row)| *h == hotel_id && row.date == date)
            .map(|(_, row)| row.record_id)
            .collect())
    }

    fn present_among(&self, ids: &[i64]) -> Result<HashSet<i64>, StoreError> {
        Ok(self
            .rows
            .iter()
            .map(|(_, row)| row.record_id)
            .filter(|id| ids.contains(id))
            .collect())
    }

    fn snapshot(&self, hotel_id: i64, date: NaiveDate) -> Result<Vec<DetailRow>, StoreError> {
        let mut out: Vec<DetailRow> = self
            .rows
            .iter()
            .filter(|(h, row)| *h == hotel_id && row.date == date)
            .map(|(_, row)| row.clone())
            .collect();
        out.sort_by_key(|r| (r.room_id, r.record_id));
        Ok(out)
    }
}

// ---------------------------------------------------------------------------
// RecordingSink / RecordingNotifier
// ---------------------------------------------------------------------------

/// Replay sink that records calls and can be told to fail or no-op per hotel.
#[derive(Debug, Default)]
pub struct RecordingSink {
    calls: Mutex<Vec<(i64, DateRange)>>,
    fail_hotels: HashSet<i64>,
    noop_hotels: HashSet<i64>,
}

impl RecordingSink {
    /// Make replays for `hotel_id` fail.
    #[must_use]
    pub fn failing_hotel(mut self, hotel_id: i64) -> Self {
        self.fail_hotels.insert(hotel_id);
        self
    }

    /// Make replays for `hotel_id` report nothing-to-sync.
    #[must_use]
    pub fn noop_hotel(mut self, hotel_id: i64) -> Self {
        self.noop_hotels.insert(hotel_id);
        self
    }

    /// The calls received so far, in order.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex was poisoned.
    #[must_use]
    pub fn calls(&self) -> Vec<(i64, DateRange)> {
        self.calls.lock().expect("sink mutex").clone()
    }
}

impl ReplaySink for RecordingSink {
    fn replay(&self, hotel_id: i64, range: DateRange) -> Result<ReplayOutcome, StoreError> {
        self.calls
            .lock()
            .map_err(|_| StoreError::Internal("sink mutex poisoned".to_string()))?
            .push((hotel_id, range));
        if self.fail_hotels.contains(&hotel_id) {
            return Err(StoreError::Replay(format!(
                "channel manager rejected replay for hotel {hotel_id}"
            )));
        }
        if self.noop_hotels.contains(&hotel_id) {
            return Ok(ReplayOutcome::NoOp);
        }
        Ok(ReplayOutcome::Synced)
    }
}

/// Notifier that records every notification.
#[derive(Debug, Default)]
pub struct RecordingNotifier {
    sent: Mutex<Vec<Notification>>,
}

impl RecordingNotifier {
    /// The notifications received so far.
    ///
    /// # Panics
    ///
    /// Panics if the internal mutex was poisoned.
    #[must_use]
    pub fn sent(&self) -> Vec<Notification> {
        self.sent.lock().expect("notifier mutex").clone()
    }
}

impl Notifier for RecordingNotifier {
    fn send(&self, notification: &Notification) {
        if let Ok(mut sent) = self.sent.lock() {
            sent.push(notification.clone());
        }
    }
}
