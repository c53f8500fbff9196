//! Extraction of domain-significant events from the raw change log.
//!
//! Creations and hard deletions are unconditionally significant. Updates are
//! significant only when a monitored field actually changed: the stay date,
//! the owning reservation, or a transition into/out of a cancelled-equivalent
//! state. Every significant event carries a capacity delta — the net effect
//! on sellable room-nights — so downstream summaries can sum instead of
//! re-deriving.
//!
//! Malformed update payloads (no before-snapshot) are logged and skipped,
//! never fatal to the pass.

use chrono::NaiveDate;
use serde::Serialize;
use std::fmt;
use tracing::warn;

use crate::change::{
    ChangeAction, ChangeEvent, field_str, is_cancelled_state,
};
use crate::schema::SchemaRegistry;

/// Why an event was deemed significant.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SignificantKind {
    /// A detail row was created.
    Created,
    /// A detail row was hard-deleted.
    Deleted,
    /// The stay date moved.
    DateChanged,
    /// The row moved to a different reservation.
    Reassigned,
    /// Active → cancelled transition.
    Cancelled,
    /// Cancelled → active transition.
    Reinstated,
}

impl SignificantKind {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Created => "created",
            Self::Deleted => "deleted",
            Self::DateChanged => "date_changed",
            Self::Reassigned => "reassigned",
            Self::Cancelled => "cancelled",
            Self::Reinstated => "reinstated",
        }
    }
}

impl fmt::Display for SignificantKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A change event that passed the significance predicate, annotated with
/// correlation metadata.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SignificantEvent {
    /// The underlying audit event.
    pub change: ChangeEvent,
    /// What made it significant.
    pub kind: SignificantKind,
    /// Net effect on sellable capacity: -1 consumed, +1 released, 0 neutral.
    pub capacity_delta: i32,
    /// Guest name from the snapshot, when present.
    pub guest: Option<String>,
    /// Hotel (tenant) scope.
    pub hotel_id: Option<i64>,
    /// Room from the snapshot.
    pub room_id: Option<i64>,
    /// Owning reservation.
    pub reservation_id: Option<i64>,
    /// First stay date affected by this event.
    pub range_start: Option<NaiveDate>,
    /// Last stay date affected by this event.
    pub range_end: Option<NaiveDate>,
}

impl SignificantEvent {
    /// Whether this event must be matched by a downstream sync record.
    ///
    /// Only capacity-consuming creations and cancel-state flips trigger a
    /// downstream availability push in the source system; deletions and
    /// detail-field edits sync through the parent reservation instead.
    #[must_use]
    pub const fn requires_downstream(&self) -> bool {
        matches!(
            self.kind,
            SignificantKind::Created | SignificantKind::Cancelled | SignificantKind::Reinstated
        )
    }
}

/// Run the significance predicates over a batch of change events.
///
/// Output order follows input order; callers wanting chronology should sort
/// the input first.
#[must_use]
pub fn extract(events: &[ChangeEvent], registry: &SchemaRegistry) -> Vec<SignificantEvent> {
    events
        .iter()
        .filter_map(|e| classify(e, registry))
        .collect()
}

fn classify(event: &ChangeEvent, registry: &SchemaRegistry) -> Option<SignificantEvent> {
    let current = event.payload.current();
    let (kind, capacity_delta) = match event.action {
        ChangeAction::Insert => {
            let delta = if is_cancelled_state(current) { 0 } else { -1 };
            (SignificantKind::Created, delta)
        }
        ChangeAction::Delete => (SignificantKind::Deleted, 1),
        ChangeAction::Update => {
            let Some(before) = event.payload.previous() else {
                warn!(
                    record_id = event.record_id,
                    "update event missing before-snapshot; treating as non-significant"
                );
                return None;
            };
            let was_cancelled = is_cancelled_state(before);
            let now_cancelled = is_cancelled_state(current);
            if !was_cancelled && now_cancelled {
                (SignificantKind::Cancelled, 1)
            } else if was_cancelled && !now_cancelled {
                (SignificantKind::Reinstated, -1)
            } else if crate::change::field_date(before, "date") != event.stay_date() {
                (SignificantKind::DateChanged, 0)
            } else if crate::change::field_i64(before, "reservation_id")
                != crate::change::field_i64(current, "reservation_id")
            {
                (SignificantKind::Reassigned, 0)
            } else {
                return None;
            }
        }
    };

    let stay = event.stay_date();
    let (range_start, range_end) = if kind == SignificantKind::DateChanged {
        // A moved stay affects both the vacated and the newly occupied date.
        let old = event
            .payload
            .previous()
            .and_then(|f| crate::change::field_date(f, "date"));
        match (old, stay) {
            (Some(a), Some(b)) => (Some(a.min(b)), Some(a.max(b))),
            (a, b) => (a.or(b), a.or(b)),
        }
    } else {
        (stay, stay)
    };

    Some(SignificantEvent {
        kind,
        capacity_delta,
        guest: field_str(current, "guest_name").map(str::to_owned),
        hotel_id: event.hotel_id(),
        room_id: crate::change::field_i64(current, "room_id"),
        reservation_id: event.parent_id(registry),
        range_start,
        range_end,
        change: event.clone(),
    })
}
