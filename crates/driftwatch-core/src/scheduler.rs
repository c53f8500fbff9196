//! Rolling reconciliation scheduler.
//!
//! One long-lived thread runs a pass every `check_interval` over a trailing
//! `monitoring_window`. Because the window exceeds the interval, consecutive
//! passes overlap; an event near a window boundary is checked in at least
//! two passes, which tolerates transient downstream propagation delay.
//!
//! State machine per pass: `Idle -> Running -> (Idle | Failed)`. A failed
//! pass reports an ERROR notification and does not block the next tick.
//! Shutdown is cooperative and checked only between passes; a pass already
//! running completes before the thread exits.

use anyhow::Context;
use chrono::Duration as ChronoDuration;
use serde_json::json;
use std::sync::{Arc, Mutex, mpsc};
use std::thread::JoinHandle;
use tracing::{error, info, warn};

use crate::engine::{CheckResult, Engine};
use crate::store::{Notification, Notifier, Severity};

/// Scheduler execution state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SchedulerState {
    /// Waiting for the next tick.
    Idle,
    /// A pass is executing.
    Running,
    /// The most recent pass failed to execute.
    Failed,
}

/// Shared view of the scheduler's progress. `last_result` is overwritten,
/// never appended, each pass.
#[derive(Debug, Default)]
pub struct SchedulerStatus {
    state: Mutex<StatusInner>,
}

#[derive(Debug)]
struct StatusInner {
    state: SchedulerState,
    last_result: Option<CheckResult>,
    passes_run: u64,
}

impl Default for StatusInner {
    fn default() -> Self {
        Self {
            state: SchedulerState::Idle,
            last_result: None,
            passes_run: 0,
        }
    }
}

impl SchedulerStatus {
    /// Current execution state.
    pub fn state(&self) -> SchedulerState {
        self.state.lock().map_or(SchedulerState::Failed, |s| s.state)
    }

    /// Result of the most recent completed pass, if any.
    pub fn last_result(&self) -> Option<CheckResult> {
        self.state
            .lock()
            .ok()
            .and_then(|s| s.last_result.clone())
    }

    /// Number of passes attempted so far.
    pub fn passes_run(&self) -> u64 {
        self.state.lock().map_or(0, |s| s.passes_run)
    }

    fn begin_pass(&self) {
        if let Ok(mut inner) = self.state.lock() {
            inner.state = SchedulerState::Running;
            inner.passes_run += 1;
        }
    }

    fn finish_pass(&self, result: Option<CheckResult>) {
        if let Ok(mut inner) = self.state.lock() {
            inner.state = if result.is_some() {
                SchedulerState::Idle
            } else {
                SchedulerState::Failed
            };
            if result.is_some() {
                inner.last_result = result;
            }
        }
    }
}

/// Handle to a running scheduler thread.
pub struct SchedulerHandle {
    shutdown: mpsc::Sender<()>,
    thread: JoinHandle<()>,
    status: Arc<SchedulerStatus>,
}

impl SchedulerHandle {
    /// The shared status view.
    #[must_use]
    pub fn status(&self) -> Arc<SchedulerStatus> {
        Arc::clone(&self.status)
    }

    /// Request shutdown and wait for the thread. An in-flight pass runs to
    /// completion; no new pass starts after this call.
    pub fn shutdown(self) {
        // A dropped receiver also signals shutdown, so the send result is
        // irrelevant.
        let _ = self.shutdown.send(());
        if self.thread.join().is_err() {
            error!("scheduler thread panicked during shutdown");
        }
    }
}

/// Spawn the scheduler loop. The first pass runs immediately; subsequent
/// passes follow at the configured interval.
///
/// # Errors
///
/// Returns an error if the OS refuses to spawn the thread.
pub fn spawn(engine: Engine, notifier: Arc<dyn Notifier>) -> anyhow::Result<SchedulerHandle> {
    let (shutdown_tx, shutdown_rx) = mpsc::channel::<()>();
    let status = Arc::new(SchedulerStatus::default());
    let thread_status = Arc::clone(&status);

    let thread = std::thread::Builder::new()
        .name("driftwatch-scheduler".to_string())
        .spawn(move || {
            let interval = engine.config().check_interval();
            info!(
                interval_mins = engine.config().check_interval_mins,
                window_mins = engine.config().monitoring_window_mins,
                "reconciliation scheduler started"
            );

            loop {
                run_pass(&engine, notifier.as_ref(), &thread_status);

                match shutdown_rx.recv_timeout(interval) {
                    Err(mpsc::RecvTimeoutError::Timeout) => {}
                    Ok(()) | Err(mpsc::RecvTimeoutError::Disconnected) => {
                        info!("reconciliation scheduler stopping");
                        break;
                    }
                }
            }
        })
        .context("spawn scheduler thread")?;

    Ok(SchedulerHandle {
        shutdown: shutdown_tx,
        thread,
        status,
    })
}

/// Execute one pass and route its outcome to the notifier.
pub fn run_pass(engine: &Engine, notifier: &dyn Notifier, status: &SchedulerStatus) {
    status.begin_pass();

    let window = ChronoDuration::seconds(
        i64::try_from(engine.config().monitoring_window().as_secs()).unwrap_or(i64::MAX),
    );
    let auto_remediate = engine.config().auto_remediate;

    match engine.run_check(window, auto_remediate) {
        Ok(result) => {
            let severity = classify(engine, &result);
            notifier.send(&Notification {
                severity,
                message: result.message.clone(),
                metrics: json!({
                    "candidates": result.candidates,
                    "missing": result.missing,
                    "success_rate": result.success_rate,
                    "window_start": result.window_start,
                    "window_end": result.window_end,
                }),
            });
            status.finish_pass(Some(result));
        }
        Err(err) => {
            // Execution failure, not a detected gap: distinct severity, and
            // the next tick proceeds regardless.
            warn!(error = %err, "reconciliation pass failed");
            notifier.send(&Notification {
                severity: Severity::Error,
                message: format!("reconciliation pass failed: {err:#}"),
                metrics: json!({}),
            });
            status.finish_pass(None);
        }
    }
}

fn classify(engine: &Engine, result: &CheckResult) -> Severity {
    let config = engine.config();
    if result.success_rate < config.critical_threshold {
        Severity::Critical
    } else if result.success_rate < config.alert_threshold {
        Severity::Alert
    } else {
        Severity::Info
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::change::ChangeAction;
    use crate::config::Config;
    use crate::schema::SchemaRegistry;
    use crate::correlate::ServiceKind;
    use crate::store::mem::{
        MemAuditLog, MemLiveState, MemQueue, RecordingNotifier, RecordingSink, event, sync_job,
    };
    use chrono::{Duration, Utc};
    use serde_json::json;
    use std::sync::Arc;

    fn engine_with(events: Vec<crate::change::ChangeEvent>, jobs: Vec<crate::correlate::DownstreamEvent>) -> Engine {
        Engine::new(
            Arc::new(MemAuditLog::new(events)),
            Arc::new(MemQueue::new(jobs)),
            Arc::new(MemLiveState::default()),
            Arc::new(RecordingSink::default()),
            SchemaRegistry::pms().expect("registry"),
            Config::default(),
        )
    }

    #[test]
    fn healthy_pass_notifies_info_and_records_result() {
        let engine = engine_with(vec![], vec![]);
        let notifier = RecordingNotifier::default();
        let status = SchedulerStatus::default();

        run_pass(&engine, &notifier, &status);

        assert_eq!(status.state(), SchedulerState::Idle);
        assert_eq!(status.passes_run(), 1);
        let sent = notifier.sent();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].severity, Severity::Info);
        let result = status.last_result().expect("pass result");
        assert_eq!(result.candidates, 0);
    }

    #[test]
    fn gap_below_critical_threshold_notifies_critical() {
        // One candidate, zero matches: 0% success rate.
        let recent = Utc::now() - Duration::minutes(10);
        let engine = engine_with(
            vec![event(1, ChangeAction::Insert, recent, json!({"hotel_id": 25, "date": "2026-01-10"}))],
            vec![],
        );
        let notifier = RecordingNotifier::default();
        let status = SchedulerStatus::default();

        run_pass(&engine, &notifier, &status);

        let sent = notifier.sent();
        assert_eq!(sent[0].severity, Severity::Critical);
        let result = status.last_result().expect("pass result");
        assert_eq!(result.missing, 1);
    }

    #[test]
    fn rate_between_thresholds_notifies_alert() {
        // Nine of ten candidates matched: 90% sits between the default
        // critical (80) and alert (95) thresholds.
        let recent = Utc::now() - Duration::minutes(10);
        let mut events = Vec::new();
        let mut jobs = Vec::new();
        for i in 1..=10_i64 {
            events.push(event(
                i,
                ChangeAction::Insert,
                recent,
                json!({"hotel_id": 25, "reservation_id": i, "date": "2026-01-10"}),
            ));
            if i < 10 {
                jobs.push(sync_job(
                    i,
                    Some(i),
                    25,
                    recent + Duration::seconds(60),
                    ServiceKind::Availability,
                ));
            }
        }
        let engine = engine_with(events, jobs);
        let notifier = RecordingNotifier::default();
        let status = SchedulerStatus::default();

        run_pass(&engine, &notifier, &status);

        let sent = notifier.sent();
        assert_eq!(sent[0].severity, Severity::Alert);
        let result = status.last_result().expect("pass result");
        assert_eq!(result.candidates, 10);
        assert_eq!(result.missing, 1);
    }

    #[test]
    fn last_result_is_overwritten_not_appended() {
        let engine = engine_with(vec![], vec![]);
        let notifier = RecordingNotifier::default();
        let status = SchedulerStatus::default();

        run_pass(&engine, &notifier, &status);
        run_pass(&engine, &notifier, &status);

        assert_eq!(status.passes_run(), 2);
        // Still exactly one result held.
        assert!(status.last_result().is_some());
    }

    #[test]
    fn scheduler_thread_shuts_down_at_pass_boundary() {
        let engine = engine_with(vec![], vec![]);
        let notifier: Arc<dyn Notifier> = Arc::new(RecordingNotifier::default());
        let handle = spawn(engine, notifier).expect("spawn scheduler");
        let status = handle.status();

        // The immediate first pass completes quickly on empty stores.
        let deadline = std::time::Instant::now() + std::time::Duration::from_secs(5);
        while status.passes_run() == 0 && std::time::Instant::now() < deadline {
            std::thread::sleep(std::time::Duration::from_millis(10));
        }
        assert!(status.passes_run() >= 1);

        handle.shutdown();
        assert_eq!(status.state(), SchedulerState::Idle);
    }
}
