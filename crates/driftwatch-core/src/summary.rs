//! Aggregate counts, success rate, and risk classification for one scope.
//!
//! Lifecycle-derived counts are preferred over raw event tallies because the
//! reconstructor is cascade-aware: a child wiped by its parent's deletion
//! shows up there but produces no delete event of its own. The naive tally is
//! kept only as a fallback for callers that ran the extractor without the
//! reconstructor.

use serde::Serialize;
use std::fmt;

use crate::change::ChangeAction;
use crate::correlate::GapRecord;
use crate::extract::SignificantEvent;
use crate::lifecycle::{FinalStatus, LifecycleReport};

/// Overall scope risk.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum Risk {
    /// All candidates matched and the downstream stream is alive.
    Low,
    /// No downstream events observed in scope at all.
    Medium,
    /// At least one unmatched significant event.
    High,
}

impl Risk {
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Low => "LOW",
            Self::Medium => "MEDIUM",
            Self::High => "HIGH",
        }
    }
}

impl fmt::Display for Risk {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Aggregate summary for one investigated scope.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ScopeSummary {
    /// Records seen in scope.
    pub total_records: usize,
    /// Records ending active.
    pub total_active: usize,
    /// Records ending cancelled.
    pub total_cancelled: usize,
    /// Records ending deleted (direct or cascade).
    pub total_deleted: usize,
    /// Deleted via parent cascade only.
    pub cascade_deleted: usize,
    /// Creations among the significant events.
    pub inserts: usize,
    /// Updates among the significant events.
    pub updates: usize,
    /// Deletions among the significant events.
    pub deletes: usize,
    /// Unexplained-absence findings.
    pub unexplained_absences: usize,
    /// Net effect on sellable capacity for the scope.
    pub net_capacity_change: i64,
    /// Downstream events observed in scope.
    pub downstream_total: usize,
    /// Gap candidates checked.
    pub candidates: usize,
    /// Candidates with no downstream match.
    pub missing: usize,
    /// `(candidates - missing) / candidates * 100`; 100 when no candidates.
    pub success_rate: f64,
    /// Overall risk classification.
    pub risk: Risk,
}

/// Percentage of candidates that matched. Empty input is a healthy 100%.
#[must_use]
pub fn success_rate(candidates: usize, missing: usize) -> f64 {
    if candidates == 0 {
        return 100.0;
    }
    #[allow(clippy::cast_precision_loss)]
    let rate = (candidates - missing) as f64 / candidates as f64 * 100.0;
    rate
}

/// Build the scope summary.
///
/// `lifecycle` should come from the reconstructor whenever available; pass
/// `None` to fall back to event tallies (less accurate: cascade deletions
/// are invisible there).
#[must_use]
pub fn build_summary(
    lifecycle: Option<&LifecycleReport>,
    significant: &[SignificantEvent],
    gaps: &[GapRecord],
    downstream_total: usize,
) -> ScopeSummary {
    let inserts = significant
        .iter()
        .filter(|e| e.change.action == ChangeAction::Insert)
        .count();
    let updates = significant
        .iter()
        .filter(|e| e.change.action == ChangeAction::Update)
        .count();
    let deletes = significant
        .iter()
        .filter(|e| e.change.action == ChangeAction::Delete)
        .count();

    let (total_records, total_active, total_cancelled, total_deleted, cascade, absences) =
        lifecycle.map_or_else(
            || {
                // Naive fallback: tally from event actions only.
                let deleted = deletes;
                let active = inserts.saturating_sub(deleted);
                (inserts, active, 0, deleted, 0, 0)
            },
            |report| {
                (
                    report.entries.len(),
                    report.count(FinalStatus::Active),
                    report.count(FinalStatus::Cancelled),
                    report.count(FinalStatus::Deleted),
                    report.cascade_deleted(),
                    report.findings.len(),
                )
            },
        );

    let candidates = gaps.len();
    let missing = gaps.iter().filter(|g| !g.matched).count();
    let rate = success_rate(candidates, missing);

    let risk = if missing > 0 {
        Risk::High
    } else if downstream_total == 0 {
        Risk::Medium
    } else {
        Risk::Low
    };

    #[allow(clippy::cast_possible_wrap)]
    let net_capacity_change = -(total_active as i64);

    ScopeSummary {
        total_records,
        total_active,
        total_cancelled,
        total_deleted,
        cascade_deleted: cascade,
        inserts,
        updates,
        deletes,
        unexplained_absences: absences,
        net_capacity_change,
        downstream_total,
        candidates,
        missing,
        success_rate: rate,
        risk,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeAction;
    use crate::extract::extract;
    use crate::lifecycle::reconstruct;
    use crate::schema::SchemaRegistry;
    use crate::store::mem::event;
    use chrono::{TimeZone, Utc};
    use serde_json::json;
    use std::collections::HashSet;

    fn t0() -> chrono::DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().expect("timestamp")
    }

    fn gap(matched: bool) -> GapRecord {
        let registry = SchemaRegistry::pms().expect("registry");
        let change = event(1, ChangeAction::Insert, t0(), json!({"hotel_id": 25}));
        GapRecord {
            event: extract(&[change], &registry).remove(0),
            window_secs: 300,
            matched,
            matched_by: matched.then_some(1),
        }
    }

    #[test]
    fn one_gap_in_ten_is_ninety_percent() {
        let gaps: Vec<GapRecord> = (0..10).map(|i| gap(i != 0)).collect();
        let summary = build_summary(None, &[], &gaps, 9);
        assert_eq!(summary.candidates, 10);
        assert_eq!(summary.missing, 1);
        assert!((summary.success_rate - 90.0).abs() < f64::EPSILON);
        assert_eq!(summary.risk, Risk::High);
    }

    #[test]
    fn empty_scope_is_perfectly_healthy_but_medium_without_downstream() {
        let summary = build_summary(None, &[], &[], 0);
        assert!((summary.success_rate - 100.0).abs() < f64::EPSILON);
        assert_eq!(summary.risk, Risk::Medium);
    }

    #[test]
    fn all_matched_with_downstream_traffic_is_low_risk() {
        let gaps = vec![gap(true), gap(true)];
        let summary = build_summary(None, &[], &gaps, 2);
        assert_eq!(summary.risk, Risk::Low);
    }

    #[test]
    fn lifecycle_counts_preferred_over_tallies() {
        let registry = SchemaRegistry::pms().expect("registry");
        let events = vec![
            event(1, ChangeAction::Insert, t0(), json!({"reservation_id": 3, "hotel_id": 25})),
            event(2, ChangeAction::Insert, t0(), json!({"reservation_id": 4, "hotel_id": 25})),
        ];
        // Reservation 3 was deleted: record 1 is a cascade deletion the raw
        // tally would call active.
        let deleted_parents = HashSet::from([3]);
        let live = HashSet::from([2]);
        let lifecycle = reconstruct(&events, &registry, &deleted_parents, &live);
        let significant = extract(&events, &registry);

        let summary = build_summary(Some(&lifecycle), &significant, &[], 1);
        assert_eq!(summary.total_records, 2);
        assert_eq!(summary.total_active, 1);
        assert_eq!(summary.total_deleted, 1);
        assert_eq!(summary.cascade_deleted, 1);
        assert_eq!(summary.net_capacity_change, -1);

        let naive = build_summary(None, &significant, &[], 1);
        assert_eq!(naive.total_active, 2);
        assert_eq!(naive.cascade_deleted, 0);
    }

    #[test]
    fn partition_holds_in_lifecycle_mode() {
        let registry = SchemaRegistry::pms().expect("registry");
        let events = vec![
            event(1, ChangeAction::Insert, t0(), json!({"hotel_id": 25})),
            event(
                2,
                ChangeAction::Update,
                t0(),
                json!({"old": {"status": "confirmed"}, "new": {"status": "cancelled"}}),
            ),
            event(3, ChangeAction::Delete, t0(), json!({})),
        ];
        let live = HashSet::from([1, 2]);
        let lifecycle = reconstruct(&events, &registry, &HashSet::new(), &live);
        let summary = build_summary(Some(&lifecycle), &[], &[], 0);
        assert_eq!(
            summary.total_active + summary.total_cancelled + summary.total_deleted,
            summary.total_records
        );
    }
}
