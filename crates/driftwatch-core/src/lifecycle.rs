//! Lifecycle reconstruction from the audit log alone.
//!
//! Given every change event touching a scope, derive each record's final
//! status without consulting the live table for anything except membership.
//! The reconstruction is last-write-wins: within one record's event group the
//! minimum-timestamp event supplies creation facts (parent, room, date) and
//! the maximum-timestamp event supplies terminal facts (last action,
//! cancellation flag). Ties on the timestamp break on action rank then
//! audit-row order, so the output is deterministic for a fixed input.
//!
//! # Cascade deletions
//!
//! A child row deleted by `ON DELETE CASCADE` gets no audit row of its own;
//! the only trace is a `DELETE` event on its parent. Callers supply the set
//! of deleted parent ids and the reconstructor folds it in: a record whose
//! parent was deleted is `Deleted` regardless of its own last event.
//!
//! # Unexplained absences
//!
//! A record with no terminal delete (own or cascade) that is nevertheless
//! missing from the live table is *not* marked active. It is reported as an
//! [`Finding::UnexplainedAbsence`] — silently defaulting these to active was
//! the leading false-positive source in earlier tooling.

use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::collections::{BTreeMap, HashSet};

use crate::change::{ChangeAction, ChangeEvent, is_cancelled_state};
use crate::schema::SchemaRegistry;

/// A record's derived final status. Exactly one per record per run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FinalStatus {
    /// Still present and not cancelled.
    Active,
    /// Present but flagged cancelled.
    Cancelled,
    /// Hard-deleted, directly or by parent cascade.
    Deleted,
}

impl FinalStatus {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Cancelled => "cancelled",
            Self::Deleted => "deleted",
        }
    }
}

/// Derived lifecycle of one audited record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EntityLifecycle {
    /// The record's primary key.
    pub record_id: i64,
    /// Parent record id from the creation-time snapshot, if declared.
    pub parent_id: Option<i64>,
    /// Timestamp of the earliest event.
    pub first_seen: DateTime<Utc>,
    /// Timestamp of the latest event.
    pub last_seen: DateTime<Utc>,
    /// Action of the earliest event.
    pub first_action: ChangeAction,
    /// Action of the latest event.
    pub last_action: ChangeAction,
    /// Cancellation flag from the latest snapshot.
    pub cancelled_flag: bool,
    /// Whether the parent has its own `DELETE` event.
    pub parent_was_deleted: bool,
    /// The derived final status.
    pub final_status: FinalStatus,
    /// Room from the creation snapshot, for display.
    pub room_id: Option<i64>,
    /// Stay date from the creation snapshot.
    pub stay_date: Option<NaiveDate>,
}

/// A reconciliation discrepancy surfaced by reconstruction.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Finding {
    /// A record with no delete trail that is absent from the live table.
    UnexplainedAbsence {
        /// The affected record.
        record_id: i64,
        /// Its last observed action.
        last_action: ChangeAction,
        /// When it was last observed.
        last_seen: DateTime<Utc>,
    },
}

/// Output of one reconstruction run.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Default)]
pub struct LifecycleReport {
    /// One entry per record id, sorted by record id.
    pub entries: Vec<EntityLifecycle>,
    /// Discrepancies that need human attention.
    pub findings: Vec<Finding>,
}

impl LifecycleReport {
    /// Count entries with the given final status.
    #[must_use]
    pub fn count(&self, status: FinalStatus) -> usize {
        self.entries
            .iter()
            .filter(|e| e.final_status == status)
            .count()
    }

    /// Count cascade deletions (deleted via parent, no own delete event).
    #[must_use]
    pub fn cascade_deleted(&self) -> usize {
        self.entries
            .iter()
            .filter(|e| e.parent_was_deleted && e.last_action != ChangeAction::Delete)
            .count()
    }
}

/// Reconstruct lifecycles for a batch of child-entity events.
///
/// `deleted_parents` is the set of parent ids with their own `DELETE` audit
/// event; `live_ids` is the set of record ids currently present in the
/// materialized child table (used only for absence detection).
///
/// Pure function of its inputs: running it twice on the same slices yields
/// identical reports.
#[must_use]
pub fn reconstruct(
    events: &[ChangeEvent],
    registry: &SchemaRegistry,
    deleted_parents: &HashSet<i64>,
    live_ids: &HashSet<i64>,
) -> LifecycleReport {
    // BTreeMap keeps output ordered by record id.
    let mut groups: BTreeMap<i64, Vec<&ChangeEvent>> = BTreeMap::new();
    for event in events {
        groups.entry(event.record_id).or_default().push(event);
    }

    let mut entries = Vec::with_capacity(groups.len());
    let mut findings = Vec::new();

    for (record_id, mut group) in groups {
        group.sort_by_key(|e| (e.occurred_at, e.action.rank()));
        let first = group[0];
        let last = group[group.len() - 1];

        let parent_id = first.parent_id(registry).or_else(|| last.parent_id(registry));
        let parent_was_deleted = parent_id.is_some_and(|id| deleted_parents.contains(&id));
        let cancelled_flag = is_cancelled_state(last.payload.current());

        let final_status = if last.action == ChangeAction::Delete || parent_was_deleted {
            FinalStatus::Deleted
        } else if cancelled_flag {
            FinalStatus::Cancelled
        } else {
            FinalStatus::Active
        };

        // No delete trail, yet gone from the live table: report, don't guess.
        if final_status != FinalStatus::Deleted && !live_ids.contains(&record_id) {
            findings.push(Finding::UnexplainedAbsence {
                record_id,
                last_action: last.action,
                last_seen: last.occurred_at,
            });
        }

        entries.push(EntityLifecycle {
            record_id,
            parent_id,
            first_seen: first.occurred_at,
            last_seen: last.occurred_at,
            first_action: first.action,
            last_action: last.action,
            cancelled_flag,
            parent_was_deleted,
            final_status,
            room_id: crate::change::field_i64(first.payload.current(), "room_id"),
            stay_date: first.stay_date(),
        });
    }

    LifecycleReport { entries, findings }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::mem::event;
    use chrono::TimeZone;
    use serde_json::json;

    fn registry() -> SchemaRegistry {
        SchemaRegistry::pms().expect("valid registry")
    }

    fn at(h: u32, m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, h, m, 0).single().expect("timestamp")
    }

    #[test]
    fn last_delete_wins_over_earlier_cancellation() {
        let events = vec![
            event(1, ChangeAction::Insert, at(9, 0), json!({"reservation_id": 3, "hotel_id": 25})),
            event(
                1,
                ChangeAction::Update,
                at(10, 0),
                json!({"old": {"status": "confirmed"}, "new": {"status": "cancelled"}}),
            ),
            event(1, ChangeAction::Delete, at(11, 0), json!({"status": "cancelled"})),
        ];
        let report = reconstruct(&events, &registry(), &HashSet::new(), &HashSet::new());
        assert_eq!(report.entries.len(), 1);
        assert_eq!(report.entries[0].final_status, FinalStatus::Deleted);
        assert!(report.findings.is_empty());
    }

    #[test]
    fn parent_delete_cascades_even_after_child_update() {
        let events = vec![
            event(1, ChangeAction::Insert, at(9, 0), json!({"reservation_id": 3, "hotel_id": 25})),
            event(
                1,
                ChangeAction::Update,
                at(10, 0),
                json!({"old": {"reservation_id": 3}, "new": {"reservation_id": 3, "room_id": 5}}),
            ),
        ];
        let deleted_parents = HashSet::from([3]);
        let report = reconstruct(&events, &registry(), &deleted_parents, &HashSet::new());
        let entry = &report.entries[0];
        assert_eq!(entry.final_status, FinalStatus::Deleted);
        assert!(entry.parent_was_deleted);
        assert_eq!(entry.last_action, ChangeAction::Update);
        assert_eq!(report.cascade_deleted(), 1);
    }

    #[test]
    fn statuses_partition_all_records() {
        let live = HashSet::from([1, 2]);
        let events = vec![
            event(1, ChangeAction::Insert, at(9, 0), json!({"reservation_id": 3})),
            event(
                2,
                ChangeAction::Update,
                at(9, 30),
                json!({"old": {"status": "confirmed"}, "new": {"status": "cancelled"}}),
            ),
            event(3, ChangeAction::Delete, at(10, 0), json!({})),
        ];
        let report = reconstruct(&events, &registry(), &HashSet::new(), &live);
        let total = report.count(FinalStatus::Active)
            + report.count(FinalStatus::Cancelled)
            + report.count(FinalStatus::Deleted);
        assert_eq!(total, report.entries.len());
        assert_eq!(report.count(FinalStatus::Active), 1);
        assert_eq!(report.count(FinalStatus::Cancelled), 1);
        assert_eq!(report.count(FinalStatus::Deleted), 1);
    }

    #[test]
    fn missing_live_row_without_delete_is_a_finding() {
        let events = vec![event(
            9,
            ChangeAction::Insert,
            at(9, 0),
            json!({"reservation_id": 3, "hotel_id": 25}),
        )];
        let report = reconstruct(&events, &registry(), &HashSet::new(), &HashSet::new());
        assert_eq!(report.entries[0].final_status, FinalStatus::Active);
        assert_eq!(
            report.findings,
            vec![Finding::UnexplainedAbsence {
                record_id: 9,
                last_action: ChangeAction::Insert,
                last_seen: at(9, 0),
            }]
        );
    }

    #[test]
    fn reconstruction_is_pure() {
        let events = vec![
            event(1, ChangeAction::Insert, at(9, 0), json!({"reservation_id": 3})),
            event(2, ChangeAction::Delete, at(10, 0), json!({})),
            event(
                1,
                ChangeAction::Update,
                at(9, 30),
                json!({"old": {"room_id": 4}, "new": {"room_id": 5}}),
            ),
        ];
        let live = HashSet::from([1]);
        let a = reconstruct(&events, &registry(), &HashSet::new(), &live);
        let b = reconstruct(&events, &registry(), &HashSet::new(), &live);
        assert_eq!(a, b);
    }

    #[test]
    fn timestamp_tie_breaks_on_action_rank() {
        // Insert and Update at the same instant: the update is the last word.
        let events = vec![
            event(
                1,
                ChangeAction::Update,
                at(9, 0),
                json!({"old": {"status": "confirmed"}, "new": {"status": "cancelled"}}),
            ),
            event(1, ChangeAction::Insert, at(9, 0), json!({"status": "confirmed"})),
        ];
        let live = HashSet::from([1]);
        let report = reconstruct(&events, &registry(), &HashSet::new(), &live);
        assert_eq!(report.entries[0].first_action, ChangeAction::Insert);
        assert_eq!(report.entries[0].final_status, FinalStatus::Cancelled);
    }
}
