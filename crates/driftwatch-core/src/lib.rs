//! driftwatch-core: audit-log reconciliation and downstream-sync gap
//! detection.
//!
//! The pipeline: change events come out of the append-only audit log
//! ([`change`]), pass the significance predicates ([`extract`]), are
//! correlated against the downstream sync queue ([`correlate`]), and feed the
//! merged timeline ([`timeline`]) and cascade-aware summary ([`summary`]).
//! [`lifecycle`] reconstructs per-record final states from the log alone.
//! [`engine`] exposes the two operations collaborators call; [`scheduler`]
//! runs them on a rolling overlapping window; [`remediate`] repairs detected
//! gaps with grouped replay calls.
//!
//! # Conventions
//!
//! - **Errors**: typed `thiserror` enums at the leaves, `anyhow::Result`
//!   with context in orchestration code.
//! - **Logging**: `tracing` macros (`info!`, `warn!`, `error!`, `debug!`).

pub mod change;
pub mod config;
pub mod correlate;
pub mod engine;
pub mod extract;
pub mod lifecycle;
pub mod remediate;
pub mod scheduler;
pub mod schema;
pub mod store;
pub mod summary;
pub mod timeline;

pub use change::{ChangeAction, ChangeEvent, ChangePayload};
pub use config::Config;
pub use correlate::{DownstreamEvent, GapRecord, ServiceKind};
pub use engine::{CheckResult, Engine, Investigation};
pub use extract::{SignificantEvent, SignificantKind};
pub use lifecycle::{EntityLifecycle, FinalStatus, Finding, LifecycleReport};
pub use remediate::{DateRange, RemediationGroup, ReplayReport, ReplayStatus};
pub use schema::{EntityKind, SchemaRegistry};
pub use summary::{Risk, ScopeSummary};
