//! Gap remediation: grouping overlapping repair ranges and replaying them.
//!
//! Unmatched gaps for one hotel are sorted by range start and merged while
//! their date ranges overlap or touch (adjacent calendar days count as
//! touching), producing the minimal set of disjoint repair ranges. One replay
//! call then covers every member gap of a group, so no date is pushed twice.
//!
//! Merging is idempotent: regrouping an already-merged set reproduces it.
//!
//! Replay calls run strictly sequentially with a fixed inter-call delay.
//! One failed group never aborts the rest; failures are collected per group.

use chrono::NaiveDate;
use serde::Serialize;
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;
use tracing::{info, warn};

use crate::correlate::GapRecord;
use crate::store::{ReplayOutcome, ReplaySink};

/// An inclusive calendar-date range.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub struct DateRange {
    /// First date, inclusive.
    pub start: NaiveDate,
    /// Last date, inclusive.
    pub end: NaiveDate,
}

impl DateRange {
    /// Build a range, swapping the bounds if given backwards.
    #[must_use]
    pub fn new(a: NaiveDate, b: NaiveDate) -> Self {
        Self {
            start: a.min(b),
            end: a.max(b),
        }
    }

    /// A single-day range.
    #[must_use]
    pub const fn day(date: NaiveDate) -> Self {
        Self {
            start: date,
            end: date,
        }
    }

    /// Whether `other` overlaps or touches this range. Adjacent days touch:
    /// `[10..12]` and `[13..15]` merge into one replay call.
    #[must_use]
    pub fn joins(&self, other: &Self) -> bool {
        other.start <= self.end.succ_opt().unwrap_or(self.end)
            && self.start <= other.end.succ_opt().unwrap_or(other.end)
    }

    /// The union of two joining ranges.
    #[must_use]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            start: self.start.min(other.start),
            end: self.end.max(other.end),
        }
    }
}

impl fmt::Display for DateRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}..{}", self.start, self.end)
    }
}

/// A minimal non-duplicated repair request for one hotel.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RemediationGroup {
    /// The hotel whose sync is replayed.
    pub hotel_id: i64,
    /// The merged date range one replay call covers.
    pub range: DateRange,
    /// The gaps this group repairs.
    pub members: Vec<GapRecord>,
}

/// Group unmatched gaps into disjoint per-hotel repair ranges.
///
/// Gaps without a hotel id or date range cannot be replayed and are dropped
/// with a warning. Output is ordered by hotel id then range start; within a
/// hotel no two ranges overlap or touch.
#[must_use]
pub fn group_gaps(gaps: &[GapRecord]) -> Vec<RemediationGroup> {
    let mut by_hotel: BTreeMap<i64, Vec<(DateRange, &GapRecord)>> = BTreeMap::new();

    for gap in gaps.iter().filter(|g| !g.matched) {
        let scope = (
            gap.event.hotel_id,
            gap.event.range_start,
            gap.event.range_end,
        );
        let (Some(hotel_id), Some(start), Some(end)) = scope else {
            warn!(
                record_id = gap.event.change.record_id,
                "gap lacks hotel or date scope; cannot schedule remediation"
            );
            continue;
        };
        by_hotel
            .entry(hotel_id)
            .or_default()
            .push((DateRange::new(start, end), gap));
    }

    let mut groups = Vec::new();
    for (hotel_id, mut ranged) in by_hotel {
        ranged.sort_by_key(|(range, _)| *range);

        let mut open: Option<RemediationGroup> = None;
        for (range, gap) in ranged {
            match open.as_mut() {
                Some(group) if group.range.joins(&range) => {
                    group.range = group.range.merge(&range);
                    group.members.push(gap.clone());
                }
                _ => {
                    if let Some(done) = open.take() {
                        groups.push(done);
                    }
                    open = Some(RemediationGroup {
                        hotel_id,
                        range,
                        members: vec![gap.clone()],
                    });
                }
            }
        }
        if let Some(done) = open {
            groups.push(done);
        }
    }

    groups
}

/// How one group's replay went.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ReplayStatus {
    /// The call succeeded and pushed data.
    Repaired,
    /// The call succeeded but nothing needed syncing.
    Skipped,
    /// The call failed; not retried automatically.
    Failed,
}

/// Per-group replay result.
#[derive(Debug, Clone, Serialize)]
pub struct GroupOutcome {
    /// The group that was replayed.
    pub group: RemediationGroup,
    /// The verdict.
    pub status: ReplayStatus,
    /// Transport error for failed groups.
    pub error: Option<String>,
}

/// Aggregate result of a remediation run.
#[derive(Debug, Clone, Default, Serialize)]
pub struct ReplayReport {
    /// One outcome per group, in replay order.
    pub outcomes: Vec<GroupOutcome>,
}

impl ReplayReport {
    /// Count outcomes with the given status.
    #[must_use]
    pub fn count(&self, status: ReplayStatus) -> usize {
        self.outcomes.iter().filter(|o| o.status == status).count()
    }
}

/// Replay every group sequentially, pausing `delay` between calls.
///
/// Ordering matters for duplicate-avoidance downstream, so calls are never
/// concurrent. Failures are recorded per group and the run continues.
pub fn replay_groups<S>(sink: &S, groups: Vec<RemediationGroup>, delay: Duration) -> ReplayReport
where
    S: ReplaySink + ?Sized,
{
    let mut outcomes = Vec::with_capacity(groups.len());

    for (i, group) in groups.into_iter().enumerate() {
        if i > 0 && !delay.is_zero() {
            std::thread::sleep(delay);
        }

        let (status, error) = match sink.replay(group.hotel_id, group.range) {
            Ok(ReplayOutcome::Synced) => {
                info!(
                    hotel_id = group.hotel_id,
                    range = %group.range,
                    gaps = group.members.len(),
                    "replayed downstream sync"
                );
                (ReplayStatus::Repaired, None)
            }
            Ok(ReplayOutcome::NoOp) => (ReplayStatus::Skipped, None),
            Err(err) => {
                warn!(
                    hotel_id = group.hotel_id,
                    range = %group.range,
                    error = %err,
                    "replay call failed; continuing with remaining groups"
                );
                (ReplayStatus::Failed, Some(err.to_string()))
            }
        };

        outcomes.push(GroupOutcome {
            group,
            status,
            error,
        });
    }

    ReplayReport { outcomes }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeAction;
    use crate::extract::extract;
    use crate::schema::SchemaRegistry;
    use crate::store::mem::{RecordingSink, event};
    use chrono::{TimeZone, Utc};
    use serde_json::json;

    fn d(day: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2026, 1, day).expect("date")
    }

    fn gap(hotel: i64, start: u32, end: u32) -> GapRecord {
        let registry = SchemaRegistry::pms().expect("registry");
        let t = Utc.with_ymd_and_hms(2026, 1, 10, 9, 0, 0).single().expect("timestamp");
        let change = event(
            i64::from(start),
            ChangeAction::Insert,
            t,
            json!({"hotel_id": hotel, "date": format!("2026-01-{start:02}")}),
        );
        let mut sig = extract(&[change], &registry).remove(0);
        sig.range_start = Some(d(start));
        sig.range_end = Some(d(end));
        GapRecord {
            event: sig,
            window_secs: 300,
            matched: false,
            matched_by: None,
        }
    }

    #[test]
    fn overlapping_ranges_merge_for_one_hotel() {
        let groups = group_gaps(&[gap(25, 10, 12), gap(25, 11, 15)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].hotel_id, 25);
        assert_eq!(groups[0].range, DateRange::new(d(10), d(15)));
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn touching_ranges_merge() {
        let groups = group_gaps(&[gap(25, 10, 12), gap(25, 12, 14), gap(25, 15, 16)]);
        // 10..12 and 12..14 share a date; 15..16 is adjacent to 14 and joins too.
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].range, DateRange::new(d(10), d(16)));
    }

    #[test]
    fn same_day_gaps_collapse_to_a_single_day_group() {
        let groups = group_gaps(&[gap(25, 10, 10), gap(25, 10, 10)]);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].range, DateRange::day(d(10)));
        assert_eq!(groups[0].members.len(), 2);
    }

    #[test]
    fn disjoint_ranges_stay_apart() {
        let groups = group_gaps(&[gap(25, 10, 11), gap(25, 20, 21)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].range, DateRange::new(d(10), d(11)));
        assert_eq!(groups[1].range, DateRange::new(d(20), d(21)));
    }

    #[test]
    fn hotels_never_share_groups() {
        let groups = group_gaps(&[gap(25, 10, 12), gap(26, 11, 13)]);
        assert_eq!(groups.len(), 2);
        assert_eq!(groups[0].hotel_id, 25);
        assert_eq!(groups[1].hotel_id, 26);
    }

    #[test]
    fn matched_gaps_are_not_remediated() {
        let mut g = gap(25, 10, 12);
        g.matched = true;
        assert!(group_gaps(&[g]).is_empty());
    }

    #[test]
    fn replay_outcomes_map_to_statuses() {
        let sink = RecordingSink::default()
            .failing_hotel(26)
            .noop_hotel(27);
        let groups = group_gaps(&[gap(25, 10, 11), gap(26, 10, 11), gap(27, 10, 11)]);
        let report = replay_groups(&sink, groups, Duration::ZERO);

        assert_eq!(report.count(ReplayStatus::Repaired), 1);
        assert_eq!(report.count(ReplayStatus::Failed), 1);
        assert_eq!(report.count(ReplayStatus::Skipped), 1);
        // One failure did not stop the others.
        assert_eq!(sink.calls().len(), 3);
        assert!(report.outcomes[1].error.is_some());
    }

    #[test]
    fn one_call_per_merged_group() {
        let sink = RecordingSink::default();
        let groups = group_gaps(&[gap(25, 10, 12), gap(25, 11, 15)]);
        replay_groups(&sink, groups, Duration::ZERO);
        let calls = sink.calls();
        assert_eq!(calls.len(), 1);
        assert_eq!(calls[0], (25, DateRange::new(d(10), d(15))));
    }
}
