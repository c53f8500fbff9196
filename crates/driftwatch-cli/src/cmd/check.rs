//! `dw check` — one reconciliation pass over a recent window.
//!
//! Extracts significant changes from the audit log, correlates each against
//! the downstream sync queue, and reports the gaps. With `--remediate`, the
//! unmatched gaps are grouped per hotel and replayed.

use crate::output::{OutputMode, kv, render, section};
use anyhow::Context;
use clap::Args;
use driftwatch_core::remediate::ReplayStatus;
use driftwatch_core::{CheckResult, Engine};
use std::io::Write;

#[derive(Args, Debug)]
pub struct CheckArgs {
    /// Look-back window in minutes. Defaults to the configured
    /// monitoring window.
    #[arg(long)]
    pub window_minutes: Option<i64>,

    /// Group and replay the detected gaps after reporting them.
    #[arg(long)]
    pub remediate: bool,
}

fn write_human(result: &CheckResult, w: &mut dyn Write) -> std::io::Result<()> {
    section(w, "Reconciliation pass")?;
    kv(
        w,
        "window",
        format!("{} .. {}", result.window_start, result.window_end),
    )?;
    kv(w, "candidates", result.candidates.to_string())?;
    kv(w, "missing", result.missing.to_string())?;
    kv(w, "success rate", format!("{:.1}%", result.success_rate))?;

    if !result.gaps.is_empty() {
        writeln!(w)?;
        section(w, "Gaps")?;
        for gap in &result.gaps {
            let hotel = gap
                .event
                .hotel_id
                .map_or_else(|| "-".to_string(), |h| h.to_string());
            writeln!(
                w,
                "  record {} ({} at {}, hotel {hotel}): no downstream job \
                 within {}s",
                gap.event.change.record_id,
                gap.event.kind,
                gap.event.change.occurred_at.format("%Y-%m-%d %H:%M:%S"),
                gap.window_secs,
            )?;
        }
    }

    if let Some(report) = &result.remediation {
        writeln!(w)?;
        section(w, "Remediation")?;
        kv(w, "repaired", report.count(ReplayStatus::Repaired).to_string())?;
        kv(w, "skipped", report.count(ReplayStatus::Skipped).to_string())?;
        kv(w, "failed", report.count(ReplayStatus::Failed).to_string())?;
        for outcome in &report.outcomes {
            if let Some(error) = &outcome.error {
                writeln!(
                    w,
                    "  hotel {} {}..{}: {error}",
                    outcome.group.hotel_id, outcome.group.range.start, outcome.group.range.end,
                )?;
            }
        }
    }

    writeln!(w)?;
    writeln!(w, "{}", result.message)?;
    Ok(())
}

/// Execute `dw check [--window-minutes N] [--remediate]`.
///
/// # Errors
///
/// Returns an error if the pass itself fails; detected gaps are a normal
/// result, not an error.
pub fn run_check(args: &CheckArgs, engine: &Engine, output: OutputMode) -> anyhow::Result<()> {
    let window = match args.window_minutes {
        Some(mins) => chrono::Duration::minutes(mins),
        None => chrono::Duration::from_std(engine.config().monitoring_window())
            .context("monitoring window out of range")?,
    };
    let result = engine.run_check(window, args.remediate)?;
    render(output, &result, |r, w| write_human(r, w))
}
