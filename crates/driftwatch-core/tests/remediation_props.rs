//! Property tests for the grouping and reconstruction algebra.

use chrono::{NaiveDate, TimeZone, Utc};
use proptest::prelude::*;
use serde_json::json;
use std::collections::HashSet;

use driftwatch_core::change::ChangeAction;
use driftwatch_core::correlate::GapRecord;
use driftwatch_core::extract::extract;
use driftwatch_core::lifecycle::{FinalStatus, reconstruct};
use driftwatch_core::remediate::group_gaps;
use driftwatch_core::schema::SchemaRegistry;
use driftwatch_core::store::mem::event;

fn registry() -> SchemaRegistry {
    SchemaRegistry::pms().expect("registry")
}

fn day(d: u32) -> NaiveDate {
    NaiveDate::from_ymd_opt(2026, 1, d).expect("date")
}

/// Build an unmatched gap record for a hotel and inclusive day range.
fn gap(hotel: i64, start: u32, end: u32) -> GapRecord {
    let t = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().expect("timestamp");
    let change = event(
        i64::from(start),
        ChangeAction::Insert,
        t,
        json!({"hotel_id": hotel, "date": "2026-01-10"}),
    );
    let mut sig = extract(&[change], &registry()).remove(0);
    sig.range_start = Some(day(start));
    sig.range_end = Some(day(end));
    GapRecord {
        event: sig,
        window_secs: 300,
        matched: false,
        matched_by: None,
    }
}

proptest! {
    /// Regrouping an already-merged set reproduces it exactly.
    #[test]
    fn grouping_is_idempotent(
        spans in prop::collection::vec((1..=3i64, 1u32..=25, 0u32..=4), 1..20)
    ) {
        let gaps: Vec<GapRecord> = spans
            .into_iter()
            .map(|(hotel, start, len)| gap(hotel, start, start + len))
            .collect();

        let first = group_gaps(&gaps);

        // Rebuild gap records from the merged groups and group again.
        let regrouped_input: Vec<GapRecord> = first
            .iter()
            .map(|g| {
                let mut one = gap(g.hotel_id, 1, 1);
                one.event.range_start = Some(g.range.start);
                one.event.range_end = Some(g.range.end);
                one
            })
            .collect();
        let second = group_gaps(&regrouped_input);

        let shape =
            |groups: &[driftwatch_core::RemediationGroup]| -> Vec<(i64, NaiveDate, NaiveDate)> {
                groups
                    .iter()
                    .map(|g| (g.hotel_id, g.range.start, g.range.end))
                    .collect()
            };
        prop_assert_eq!(shape(&first), shape(&second));
    }

    /// Within one hotel, merged ranges never overlap or touch.
    #[test]
    fn merged_ranges_are_disjoint(
        spans in prop::collection::vec((1u32..=25, 0u32..=4), 1..20)
    ) {
        let gaps: Vec<GapRecord> = spans
            .into_iter()
            .map(|(start, len)| gap(25, start, start + len))
            .collect();
        let groups = group_gaps(&gaps);

        for pair in groups.windows(2) {
            // Sorted by range start; a gap of at least one full day must
            // separate consecutive groups or they would have merged.
            prop_assert!(pair[0].range.end < pair[1].range.start);
            prop_assert!(!pair[0].range.joins(&pair[1].range));
        }

        // Every unmatched gap landed in exactly one group.
        let members: usize = groups.iter().map(|g| g.members.len()).sum();
        prop_assert_eq!(members, gaps.len());
    }

    /// Final statuses partition the record set exhaustively.
    #[test]
    fn statuses_partition_records(
        cases in prop::collection::vec((1..=8i64, 0u8..=2, any::<bool>()), 1..30)
    ) {
        let t0 = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().expect("timestamp");
        let mut events = Vec::new();
        let mut live = HashSet::new();

        for (i, (record_id, terminal, alive)) in cases.into_iter().enumerate() {
            let at = t0 + chrono::Duration::minutes(i64::try_from(i).expect("index"));
            events.push(event(
                record_id,
                ChangeAction::Insert,
                at,
                json!({"hotel_id": 25, "reservation_id": record_id}),
            ));
            match terminal {
                1 => events.push(event(
                    record_id,
                    ChangeAction::Update,
                    at + chrono::Duration::minutes(1),
                    json!({"old": {"status": "confirmed"}, "new": {"status": "cancelled"}}),
                )),
                2 => events.push(event(
                    record_id,
                    ChangeAction::Delete,
                    at + chrono::Duration::minutes(1),
                    json!({}),
                )),
                _ => {}
            }
            if alive {
                live.insert(record_id);
            }
        }

        let report = reconstruct(&events, &registry(), &HashSet::new(), &live);
        let total = report.count(FinalStatus::Active)
            + report.count(FinalStatus::Cancelled)
            + report.count(FinalStatus::Deleted);
        prop_assert_eq!(total, report.entries.len());

        // Purity: a second run over the same input is bit-identical.
        let again = reconstruct(&events, &registry(), &HashSet::new(), &live);
        prop_assert_eq!(report, again);
    }
}
