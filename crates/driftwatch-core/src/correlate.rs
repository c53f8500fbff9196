//! Correlation of significant events against the downstream sync queue.
//!
//! Each gap candidate is checked for a matching downstream record created
//! inside the window `(t, t + W)` — exclusive at both ends, so a record
//! stamped exactly `W` after the source event does *not* count. `W` is the
//! propagation SLA (default five minutes) and is configuration, not a
//! constant.
//!
//! Checks are independent read-only queries and run with bounded parallelism:
//! candidates are processed in fixed-size batches via scoped threads, never
//! as an unbounded fan-out against the shared store. A candidate with no
//! match yields an explicit unmatched [`GapRecord`]; absence of a gap is a
//! recorded determination, not a missing row.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use tracing::debug;

use crate::extract::SignificantEvent;
use crate::store::{DownstreamQueue, StoreError};

/// Downstream service categories in the sync queue.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ServiceKind {
    /// Availability / inventory pushes to the channel manager.
    Availability,
    /// Rate pushes.
    Rates,
    /// Restriction (min-stay, closed-to-arrival) pushes.
    Restrictions,
}

impl ServiceKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Availability => "availability",
            Self::Rates => "rates",
            Self::Restrictions => "restrictions",
        }
    }
}

impl fmt::Display for ServiceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Error returned when parsing an unknown service kind.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown service kind '{raw}': expected availability, rates, or restrictions")]
pub struct UnknownService {
    /// The unrecognised input string.
    pub raw: String,
}

impl FromStr for ServiceKind {
    type Err = UnknownService;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "availability" => Ok(Self::Availability),
            "rates" => Ok(Self::Rates),
            "restrictions" => Ok(Self::Restrictions),
            _ => Err(UnknownService { raw: s.to_string() }),
        }
    }
}

/// One record from the downstream synchronization queue. Read-only here
/// except that remediation may enqueue new ones.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct DownstreamEvent {
    /// Queue row id.
    pub id: i64,
    /// Reservation the job was raised for, when reservation-scoped.
    pub reservation_id: Option<i64>,
    /// Hotel (tenant) scope.
    pub hotel_id: i64,
    /// When the job was enqueued.
    pub created_at: DateTime<Utc>,
    /// Service category.
    pub service: ServiceKind,
    /// Queue status string (`pending`, `sent`, `failed`, ...).
    pub status: String,
    /// Delivery attempts so far.
    pub retries: u32,
    /// Last delivery error, if any.
    pub last_error: Option<String>,
}

/// Scope key used to match a source event to downstream jobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SyncScope {
    /// Hotel the event belongs to.
    pub hotel_id: Option<i64>,
    /// Owning reservation, when known.
    pub reservation_id: Option<i64>,
}

impl SyncScope {
    /// Build the scope key for a significant event.
    #[must_use]
    pub const fn of(event: &SignificantEvent) -> Self {
        Self {
            hotel_id: event.hotel_id,
            reservation_id: event.reservation_id,
        }
    }

    /// Whether a downstream job belongs to this scope.
    ///
    /// Hotel must agree when both sides carry one. A hotel-wide job (no
    /// reservation id) covers every reservation in the hotel.
    #[must_use]
    pub fn matches(&self, job: &DownstreamEvent) -> bool {
        if self.hotel_id.is_some_and(|h| h != job.hotel_id) {
            return false;
        }
        match (self.reservation_id, job.reservation_id) {
            (Some(want), Some(got)) => want == got,
            _ => true,
        }
    }
}

/// The correlation verdict for one gap candidate.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct GapRecord {
    /// The source event that was checked.
    pub event: SignificantEvent,
    /// The window length that was checked, in seconds.
    pub window_secs: i64,
    /// Whether a downstream record was found inside the window.
    pub matched: bool,
    /// Queue row id of the first (earliest) match.
    pub matched_by: Option<i64>,
}

/// Correlate every downstream-requiring event in `events` against the queue.
///
/// Candidates are processed in batches of `batch_size` scoped threads. The
/// first store error aborts the pass (the scheduler retries at the next
/// tick); partial verdicts are discarded rather than reported as half a run.
///
/// # Errors
///
/// Returns the first [`StoreError`] raised by a queue lookup.
pub fn correlate<Q>(
    queue: &Q,
    events: &[SignificantEvent],
    window: chrono::Duration,
    batch_size: usize,
) -> Result<Vec<GapRecord>, StoreError>
where
    Q: DownstreamQueue + ?Sized,
{
    let candidates: Vec<&SignificantEvent> = events
        .iter()
        .filter(|e| e.requires_downstream())
        .collect();

    let batch = batch_size.max(1);
    let mut records = Vec::with_capacity(candidates.len());

    for chunk in candidates.chunks(batch) {
        let verdicts = std::thread::scope(|scope| {
            let handles: Vec<_> = chunk
                .iter()
                .map(|event| scope.spawn(move || check_one(queue, event, window)))
                .collect();
            handles
                .into_iter()
                .map(|h| match h.join() {
                    Ok(verdict) => verdict,
                    Err(_) => Err(StoreError::Internal(
                        "correlation worker panicked".to_string(),
                    )),
                })
                .collect::<Vec<_>>()
        });
        for verdict in verdicts {
            records.push(verdict?);
        }
    }

    Ok(records)
}

fn check_one<Q>(
    queue: &Q,
    event: &SignificantEvent,
    window: chrono::Duration,
) -> Result<GapRecord, StoreError>
where
    Q: DownstreamQueue + ?Sized,
{
    let after = event.change.occurred_at;
    let before = after + window;
    let scope = SyncScope::of(event);

    let matched_by = queue
        .first_match(&scope, after, before, ServiceKind::Availability)?
        // The store may treat range bounds inclusively; re-check ours.
        .filter(|job| job.created_at > after && job.created_at < before)
        .map(|job| job.id);

    if matched_by.is_none() {
        debug!(
            record_id = event.change.record_id,
            kind = %event.kind,
            "no downstream record inside correlation window"
        );
    }

    Ok(GapRecord {
        event: event.clone(),
        window_secs: window.num_seconds(),
        matched: matched_by.is_some(),
        matched_by,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeAction;
    use crate::schema::SchemaRegistry;
    use crate::store::mem::{MemQueue, event, sync_job};
    use crate::extract::extract;
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    fn t0() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().expect("timestamp")
    }

    fn candidates(n: i64) -> Vec<SignificantEvent> {
        let registry = SchemaRegistry::pms().expect("registry");
        let events: Vec<_> = (1..=n)
            .map(|id| {
                event(
                    id,
                    ChangeAction::Insert,
                    t0(),
                    json!({"hotel_id": 25, "reservation_id": id, "date": "2026-01-10"}),
                )
            })
            .collect();
        extract(&events, &registry)
    }

    #[test]
    fn match_inside_window_is_not_a_gap() {
        let queue = MemQueue::new(vec![sync_job(
            101,
            Some(1),
            25,
            t0() + Duration::seconds(299),
            ServiceKind::Availability,
        )]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert_eq!(gaps.len(), 1);
        assert!(gaps[0].matched);
        assert_eq!(gaps[0].matched_by, Some(101));
    }

    #[test]
    fn match_at_exactly_window_end_is_a_gap() {
        let queue = MemQueue::new(vec![sync_job(
            101,
            Some(1),
            25,
            t0() + Duration::seconds(300),
            ServiceKind::Availability,
        )]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert!(!gaps[0].matched);
    }

    #[test]
    fn match_at_event_timestamp_is_a_gap() {
        // A job stamped at the same instant preceded the change; it cannot
        // have propagated it.
        let queue = MemQueue::new(vec![sync_job(101, Some(1), 25, t0(), ServiceKind::Availability)]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert!(!gaps[0].matched);
    }

    #[test]
    fn first_match_by_ascending_created_at_wins() {
        let queue = MemQueue::new(vec![
            sync_job(102, Some(1), 25, t0() + Duration::seconds(120), ServiceKind::Availability),
            sync_job(101, Some(1), 25, t0() + Duration::seconds(60), ServiceKind::Availability),
        ]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert_eq!(gaps[0].matched_by, Some(101));
    }

    #[test]
    fn wrong_service_or_hotel_does_not_match() {
        let queue = MemQueue::new(vec![
            sync_job(101, Some(1), 25, t0() + Duration::seconds(60), ServiceKind::Rates),
            sync_job(102, Some(1), 26, t0() + Duration::seconds(60), ServiceKind::Availability),
        ]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert!(!gaps[0].matched);
    }

    #[test]
    fn hotel_wide_job_covers_any_reservation() {
        let queue = MemQueue::new(vec![sync_job(
            101,
            None,
            25,
            t0() + Duration::seconds(60),
            ServiceKind::Availability,
        )]);
        let gaps = correlate(&queue, &candidates(1), Duration::seconds(300), 10).expect("ok");
        assert!(gaps[0].matched);
    }

    #[test]
    fn batches_cover_every_candidate() {
        // 23 candidates with batch size 10 → all verdicts present, in order.
        let queue = MemQueue::new(vec![]);
        let gaps = correlate(&queue, &candidates(23), Duration::seconds(300), 10).expect("ok");
        assert_eq!(gaps.len(), 23);
        assert!(gaps.iter().all(|g| !g.matched));
        let ids: Vec<i64> = gaps.iter().map(|g| g.event.change.record_id).collect();
        assert_eq!(ids, (1..=23).collect::<Vec<_>>());
    }
}
