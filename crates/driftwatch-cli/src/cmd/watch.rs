//! `dw watch` — run the rolling reconciliation scheduler in the foreground.
//!
//! Passes run immediately and then on the configured cadence; notifications
//! go to the log. The process stops when stdin closes or a line is entered.

use crate::output::OutputMode;
use clap::Args;
use driftwatch_core::Engine;
use driftwatch_core::scheduler;
use driftwatch_core::store::LoggingNotifier;
use std::io::BufRead;
use std::sync::Arc;
use tracing::info;

#[derive(Args, Debug)]
pub struct WatchArgs {}

/// Execute `dw watch`.
///
/// # Errors
///
/// Returns an error if reading stdin fails. Pass failures are reported by
/// the scheduler itself and do not stop the loop.
pub fn run_watch(_args: &WatchArgs, engine: &Engine, _output: OutputMode) -> anyhow::Result<()> {
    let interval = engine.config().check_interval();
    info!(
        interval_secs = interval.as_secs(),
        "starting scheduler; press Enter to stop"
    );

    let handle = scheduler::spawn(engine.clone(), Arc::new(LoggingNotifier::default()))?;

    // Block until the operator ends the session.
    let mut line = String::new();
    let stdin = std::io::stdin();
    stdin.lock().read_line(&mut line)?;

    let status = handle.status();
    info!(passes = status.passes_run(), "stopping scheduler");
    handle.shutdown();
    Ok(())
}
