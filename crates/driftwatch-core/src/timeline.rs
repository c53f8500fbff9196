//! Merged investigation timeline over both event streams.
//!
//! Significant audit events and downstream sync jobs are merged into one
//! timeline, most recent first. Near-simultaneous mutations of one logical
//! reservation (N detail rows written in the same transaction) collapse into
//! one visual unit: adjacent entries group when they share timestamp, guest,
//! action, and stream kind, and the group's capacity delta is the sum of its
//! members'.

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::correlate::DownstreamEvent;
use crate::extract::SignificantEvent;

/// Which stream a timeline entry came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TimelineKind {
    /// From the change-audit log.
    AuditChange,
    /// From the downstream sync queue.
    DownstreamSync,
}

/// One ungrouped timeline line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineEntry {
    /// When it happened.
    pub occurred_at: DateTime<Utc>,
    /// Source stream.
    pub kind: TimelineKind,
    /// Short action label (`created`, `cancelled`, `availability`, ...).
    pub action: String,
    /// Guest identity, when resolvable.
    pub guest: Option<String>,
    /// Net capacity effect of this entry.
    pub capacity_delta: i32,
    /// Affected record or queue row id.
    pub record_id: i64,
}

/// A group of simultaneous same-identity entries.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct TimelineGroup {
    /// Shared timestamp.
    pub occurred_at: DateTime<Utc>,
    /// Shared source stream.
    pub kind: TimelineKind,
    /// Shared action label.
    pub action: String,
    /// Shared guest identity.
    pub guest: Option<String>,
    /// Sum of member deltas.
    pub capacity_delta: i32,
    /// The collapsed entries, in input order.
    pub entries: Vec<TimelineEntry>,
}

impl TimelineGroup {
    /// Number of collapsed entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Whether the group is empty (never true for merger output).
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Merge both streams into a grouped timeline, newest first.
#[must_use]
pub fn merge_timeline(
    significant: &[SignificantEvent],
    downstream: &[DownstreamEvent],
) -> Vec<TimelineGroup> {
    let mut entries: Vec<TimelineEntry> = Vec::with_capacity(significant.len() + downstream.len());

    for event in significant {
        entries.push(TimelineEntry {
            occurred_at: event.change.occurred_at,
            kind: TimelineKind::AuditChange,
            action: event.kind.as_str().to_string(),
            guest: event.guest.clone(),
            capacity_delta: event.capacity_delta,
            record_id: event.change.record_id,
        });
    }
    for job in downstream {
        entries.push(TimelineEntry {
            occurred_at: job.created_at,
            kind: TimelineKind::DownstreamSync,
            action: job.service.as_str().to_string(),
            guest: None,
            capacity_delta: 0,
            record_id: job.id,
        });
    }

    // Newest first; record id breaks exact ties deterministically.
    entries.sort_by(|a, b| {
        b.occurred_at
            .cmp(&a.occurred_at)
            .then_with(|| a.record_id.cmp(&b.record_id))
    });

    let mut groups: Vec<TimelineGroup> = Vec::new();
    for entry in entries {
        match groups.last_mut() {
            Some(group)
                if group.occurred_at == entry.occurred_at
                    && group.kind == entry.kind
                    && group.action == entry.action
                    && group.guest == entry.guest =>
            {
                group.capacity_delta += entry.capacity_delta;
                group.entries.push(entry);
            }
            _ => groups.push(TimelineGroup {
                occurred_at: entry.occurred_at,
                kind: entry.kind,
                action: entry.action.clone(),
                guest: entry.guest.clone(),
                capacity_delta: entry.capacity_delta,
                entries: vec![entry],
            }),
        }
    }

    groups
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeAction;
    use crate::correlate::ServiceKind;
    use crate::extract::extract;
    use crate::schema::SchemaRegistry;
    use crate::store::mem::{event, sync_job};
    use chrono::TimeZone;
    use serde_json::json;

    fn at(m: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 9, m, 0).single().expect("timestamp")
    }

    fn sig(events: Vec<crate::change::ChangeEvent>) -> Vec<SignificantEvent> {
        extract(&events, &SchemaRegistry::pms().expect("registry"))
    }

    #[test]
    fn newest_entries_come_first() {
        let significant = sig(vec![
            event(1, ChangeAction::Insert, at(0), json!({"hotel_id": 25})),
            event(2, ChangeAction::Insert, at(10), json!({"hotel_id": 25})),
        ]);
        let downstream = vec![sync_job(50, Some(1), 25, at(5), ServiceKind::Availability)];

        let timeline = merge_timeline(&significant, &downstream);
        assert_eq!(timeline.len(), 3);
        assert_eq!(timeline[0].occurred_at, at(10));
        assert_eq!(timeline[1].kind, TimelineKind::DownstreamSync);
        assert_eq!(timeline[2].occurred_at, at(0));
    }

    #[test]
    fn simultaneous_same_identity_entries_collapse() {
        // Three detail rows of one reservation written in one transaction.
        let significant = sig(vec![
            event(1, ChangeAction::Insert, at(0), json!({"hotel_id": 25, "guest_name": "B. Okafor"})),
            event(2, ChangeAction::Insert, at(0), json!({"hotel_id": 25, "guest_name": "B. Okafor"})),
            event(3, ChangeAction::Insert, at(0), json!({"hotel_id": 25, "guest_name": "B. Okafor"})),
        ]);
        let timeline = merge_timeline(&significant, &[]);
        assert_eq!(timeline.len(), 1);
        assert_eq!(timeline[0].len(), 3);
        assert_eq!(timeline[0].capacity_delta, -3);
    }

    #[test]
    fn different_guests_do_not_collapse() {
        let significant = sig(vec![
            event(1, ChangeAction::Insert, at(0), json!({"hotel_id": 25, "guest_name": "A"})),
            event(2, ChangeAction::Insert, at(0), json!({"hotel_id": 25, "guest_name": "B"})),
        ]);
        let timeline = merge_timeline(&significant, &[]);
        assert_eq!(timeline.len(), 2);
    }

    #[test]
    fn streams_do_not_collapse_into_each_other() {
        let significant = sig(vec![event(
            1,
            ChangeAction::Insert,
            at(0),
            json!({"hotel_id": 25}),
        )]);
        let downstream = vec![sync_job(50, Some(1), 25, at(0), ServiceKind::Availability)];
        let timeline = merge_timeline(&significant, &downstream);
        assert_eq!(timeline.len(), 2);
    }
}
