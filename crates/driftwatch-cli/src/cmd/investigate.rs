//! `dw investigate` — full drill-down for one hotel-date scope.
//!
//! Renders the live snapshot, the merged audit/downstream timeline, the
//! reconstructed lifecycles, and the aggregate summary with its risk band.

use crate::output::{OutputMode, kv, render, section};
use chrono::NaiveDate;
use clap::Args;
use driftwatch_core::lifecycle::Finding;
use driftwatch_core::timeline::TimelineKind;
use driftwatch_core::{Engine, Investigation};
use std::io::Write;

#[derive(Args, Debug)]
pub struct InvestigateArgs {
    /// Hotel to investigate.
    #[arg(long)]
    pub hotel: i64,

    /// Stay date to investigate (YYYY-MM-DD).
    #[arg(long)]
    pub date: NaiveDate,
}

fn write_human(inv: &Investigation, w: &mut dyn Write) -> std::io::Result<()> {
    section(w, &format!("Scope: hotel {} on {}", inv.hotel_id, inv.date))?;
    kv(w, "live rows", inv.snapshot.len().to_string())?;
    kv(w, "records seen", inv.summary.total_records.to_string())?;
    kv(w, "active", inv.summary.total_active.to_string())?;
    kv(w, "cancelled", inv.summary.total_cancelled.to_string())?;
    kv(
        w,
        "deleted",
        format!(
            "{} ({} via cascade)",
            inv.summary.total_deleted, inv.summary.cascade_deleted
        ),
    )?;
    kv(
        w,
        "net capacity change",
        inv.summary.net_capacity_change.to_string(),
    )?;
    kv(
        w,
        "downstream sync",
        format!(
            "{}/{} matched ({:.1}%)",
            inv.summary.candidates - inv.summary.missing,
            inv.summary.candidates,
            inv.summary.success_rate
        ),
    )?;
    kv(w, "risk", inv.summary.risk.to_string())?;

    if !inv.lifecycle.findings.is_empty() {
        writeln!(w)?;
        section(w, "Findings")?;
        for finding in &inv.lifecycle.findings {
            let Finding::UnexplainedAbsence {
                record_id,
                last_action,
                last_seen,
            } = finding;
            writeln!(
                w,
                "  record {record_id}: absent from live state without a delete \
                 (last {last_action} at {last_seen})"
            )?;
        }
    }

    writeln!(w)?;
    section(w, "Timeline (newest first)")?;
    for group in &inv.timeline {
        let source = match group.kind {
            TimelineKind::AuditChange => "audit",
            TimelineKind::DownstreamSync => "sync",
        };
        let guest = group.guest.as_deref().unwrap_or("-");
        let count = if group.len() > 1 {
            format!(" x{}", group.len())
        } else {
            String::new()
        };
        writeln!(
            w,
            "  {}  [{source}] {}{count}  guest={guest}  capacity {:+}",
            group.occurred_at.format("%Y-%m-%d %H:%M:%S"),
            group.action,
            group.capacity_delta,
        )?;
    }

    Ok(())
}

/// Execute `dw investigate --hotel H --date D`.
///
/// # Errors
///
/// Returns an error if any store read fails or rendering fails.
pub fn run_investigate(
    args: &InvestigateArgs,
    engine: &Engine,
    output: OutputMode,
) -> anyhow::Result<()> {
    let investigation = engine.investigate(args.hotel, args.date)?;
    render(output, &investigation, |inv, w| write_human(inv, w))
}
