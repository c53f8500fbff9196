//! The reconciliation engine: the two operations collaborators call.
//!
//! [`Engine::investigate`] answers "what happened to this hotel-date" with a
//! state snapshot, merged timeline, reconstructed lifecycles, and a summary.
//! [`Engine::run_check`] is one reconciliation pass over a trailing window:
//! extract, correlate, classify, and optionally remediate.
//!
//! Stores are explicit constructor parameters. Nothing here reaches for
//! ambient state, and everything derived is discarded when the call returns.

use anyhow::{Context, Result};
use chrono::{DateTime, NaiveDate, Utc};
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, info, instrument};

use crate::config::Config;
use crate::correlate::{GapRecord, correlate};
use crate::extract::extract;
use crate::lifecycle::{Finding, LifecycleReport, reconstruct};
use crate::remediate::{ReplayReport, group_gaps, replay_groups};
use crate::schema::{EntityKind, SchemaRegistry};
use crate::store::{AuditLog, DetailRow, DownstreamQueue, LiveState, ReplaySink};
use crate::summary::{ScopeSummary, build_summary, success_rate};
use crate::timeline::{TimelineGroup, merge_timeline};

/// Everything `investigate` returns for one hotel-date.
#[derive(Debug, Clone, Serialize)]
pub struct Investigation {
    /// The hotel investigated.
    pub hotel_id: i64,
    /// The stay date investigated.
    pub date: NaiveDate,
    /// Current materialized rows for the scope.
    pub snapshot: Vec<DetailRow>,
    /// Merged two-stream timeline, newest first.
    pub timeline: Vec<TimelineGroup>,
    /// Reconstructed lifecycles and findings.
    pub lifecycle: LifecycleReport,
    /// Aggregate counts and risk.
    pub summary: ScopeSummary,
}

/// Result of one reconciliation pass.
#[derive(Debug, Clone, Serialize)]
pub struct CheckResult {
    /// Window start (inclusive).
    pub window_start: DateTime<Utc>,
    /// Window end (exclusive).
    pub window_end: DateTime<Utc>,
    /// Gap candidates checked.
    pub candidates: usize,
    /// Candidates with no downstream match.
    pub missing: usize,
    /// Matched percentage; 100 when nothing needed checking.
    pub success_rate: f64,
    /// The unmatched gaps.
    pub gaps: Vec<GapRecord>,
    /// Replay outcomes when remediation ran.
    pub remediation: Option<ReplayReport>,
    /// One-line human summary; every pass produces one.
    pub message: String,
}

/// The reconciliation engine. Cheap to clone; stores are shared.
#[derive(Clone)]
pub struct Engine {
    audit: Arc<dyn AuditLog>,
    queue: Arc<dyn DownstreamQueue>,
    live: Arc<dyn LiveState>,
    replay: Arc<dyn ReplaySink>,
    registry: SchemaRegistry,
    config: Config,
}

impl Engine {
    /// Wire an engine from its collaborators. The config and registry are
    /// validated before this point (`Config::validate`, `SchemaRegistry::new`).
    #[must_use]
    pub fn new(
        audit: Arc<dyn AuditLog>,
        queue: Arc<dyn DownstreamQueue>,
        live: Arc<dyn LiveState>,
        replay: Arc<dyn ReplaySink>,
        registry: SchemaRegistry,
        config: Config,
    ) -> Self {
        Self {
            audit,
            queue,
            live,
            replay,
            registry,
            config,
        }
    }

    /// The engine's configuration.
    #[must_use]
    pub const fn config(&self) -> &Config {
        &self.config
    }

    /// Full investigation of one hotel-date: snapshot, timeline, lifecycle,
    /// summary.
    #[instrument(skip(self))]
    pub fn investigate(&self, hotel_id: i64, date: NaiveDate) -> Result<Investigation> {
        let changes = self
            .audit
            .changes_touching(EntityKind::ReservationDetail, hotel_id, date)
            .context("query audit log for scope")?;
        debug!(count = changes.len(), "fetched scope change events");

        let parent_ids: Vec<i64> = {
            let mut ids: Vec<i64> = changes
                .iter()
                .filter_map(|e| e.parent_id(&self.registry))
                .collect();
            ids.sort_unstable();
            ids.dedup();
            ids
        };
        let deleted_parents = self
            .audit
            .deleted_record_ids(EntityKind::Reservation, &parent_ids)
            .context("check parent deletions")?;

        let live_ids = self
            .live
            .live_detail_ids(hotel_id, date)
            .context("read live detail ids")?;

        let mut lifecycle = reconstruct(&changes, &self.registry, &deleted_parents, &live_ids);

        // The reconstructor only sees the scoped live set, so a record whose
        // date moved to another day looks absent there. Absence is only
        // unexplained when the row is gone from the live table entirely.
        if !lifecycle.findings.is_empty() {
            let absent_ids: Vec<i64> = lifecycle
                .findings
                .iter()
                .map(|finding| {
                    let Finding::UnexplainedAbsence { record_id, .. } = finding;
                    *record_id
                })
                .collect();
            let present = self
                .live
                .present_among(&absent_ids)
                .context("verify absent records against live table")?;
            lifecycle.findings.retain(|finding| {
                let Finding::UnexplainedAbsence { record_id, .. } = finding;
                !present.contains(record_id)
            });
        }

        let significant = extract(&changes, &self.registry);

        let gaps = correlate(
            self.queue.as_ref(),
            &significant,
            self.config.match_window(),
            self.config.batch_size,
        )
        .context("correlate against downstream queue")?;

        // Downstream context for the timeline: everything from first change
        // to last change plus the correlation window.
        let downstream = match (
            changes.iter().map(|e| e.occurred_at).min(),
            changes.iter().map(|e| e.occurred_at).max(),
        ) {
            (Some(first), Some(last)) => self
                .queue
                .in_range(hotel_id, (first, last + self.config.match_window()), None)
                .context("query downstream events for scope")?,
            _ => Vec::new(),
        };

        let timeline = merge_timeline(&significant, &downstream);
        let summary = build_summary(Some(&lifecycle), &significant, &gaps, downstream.len());
        let snapshot = self
            .live
            .snapshot(hotel_id, date)
            .context("read live snapshot")?;

        Ok(Investigation {
            hotel_id,
            date,
            snapshot,
            timeline,
            lifecycle,
            summary,
        })
    }

    /// One reconciliation pass over the trailing window ending now.
    pub fn run_check(&self, window: chrono::Duration, auto_remediate: bool) -> Result<CheckResult> {
        self.run_check_at(Utc::now(), window, auto_remediate)
    }

    /// One reconciliation pass over `(now - window, now)`. Split out so the
    /// pass is a pure function of its clock for tests and replays.
    #[instrument(skip(self, now))]
    pub fn run_check_at(
        &self,
        now: DateTime<Utc>,
        window: chrono::Duration,
        auto_remediate: bool,
    ) -> Result<CheckResult> {
        let window_start = now - window;
        let changes = self
            .audit
            .changes_in_range(EntityKind::ReservationDetail, (window_start, now), None)
            .context("query audit log for window")?;

        let significant = extract(&changes, &self.registry);

        // Correlation judges each event at its own timestamp; lifecycle
        // reconstruction is investigation territory, not needed here.
        let verdicts = correlate(
            self.queue.as_ref(),
            &significant,
            self.config.match_window(),
            self.config.batch_size,
        )
        .context("correlate against downstream queue")?;

        let candidates = verdicts.len();
        let gaps: Vec<GapRecord> = verdicts.into_iter().filter(|g| !g.matched).collect();
        let missing = gaps.len();
        let rate = success_rate(candidates, missing);

        let remediation = if auto_remediate && missing > 0 {
            let groups = group_gaps(&gaps);
            info!(groups = groups.len(), "replaying downstream sync for gap groups");
            Some(replay_groups(
                self.replay.as_ref(),
                groups,
                self.config.replay_delay(),
            ))
        } else {
            None
        };

        let message = format!(
            "checked {candidates} sync candidate(s) in window {}..{}: {missing} missing \
             ({rate:.1}% matched){}",
            window_start.format("%Y-%m-%d %H:%M"),
            now.format("%Y-%m-%d %H:%M"),
            remediation.as_ref().map_or_else(String::new, |r| format!(
                "; remediation: {} repaired, {} skipped, {} failed",
                r.count(crate::remediate::ReplayStatus::Repaired),
                r.count(crate::remediate::ReplayStatus::Skipped),
                r.count(crate::remediate::ReplayStatus::Failed),
            )),
        );
        info!("{message}");

        Ok(CheckResult {
            window_start,
            window_end: now,
            candidates,
            missing,
            success_rate: rate,
            gaps,
            remediation,
            message,
        })
    }
}
