#![forbid(unsafe_code)]

mod cmd;
mod output;

use anyhow::Context;
use clap::{Parser, Subcommand};
use driftwatch_core::store::sqlite::SqlitePmsStore;
use driftwatch_core::store::{AuditLog, DownstreamQueue, LiveState, ReplaySink};
use driftwatch_core::{Config, Engine, SchemaRegistry};
use output::{CliError, OutputMode, render_error};
use std::env;
use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, prelude::*};

#[derive(Parser, Debug)]
#[command(
    author,
    version,
    about = "driftwatch: audit-log reconciliation and downstream-sync gap detection",
    long_about = None
)]
struct Cli {
    /// Enable verbose logging.
    #[arg(short, long)]
    verbose: bool,

    /// Emit JSON output instead of human-readable text.
    #[arg(long, global = true)]
    json: bool,

    /// Path to the PMS SQLite database.
    #[arg(long, global = true, default_value = "pms.db")]
    db: PathBuf,

    /// Path to a TOML config file. Defaults apply when omitted.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

impl Cli {
    /// Derive the output mode from flags.
    fn output_mode(&self) -> OutputMode {
        if self.json {
            OutputMode::Json
        } else {
            OutputMode::Human
        }
    }
}

#[derive(Subcommand, Debug)]
enum Commands {
    #[command(
        about = "Drill into one hotel-date scope",
        long_about = "Reconstruct lifecycles, merge the audit and sync timelines, and \
                      summarize risk for one hotel and stay date.",
        after_help = "EXAMPLES:\n    # Investigate a scope\n    dw investigate --hotel 25 --date 2026-01-10\n\n    # Emit machine-readable output\n    dw investigate --hotel 25 --date 2026-01-10 --json"
    )]
    Investigate(cmd::investigate::InvestigateArgs),

    #[command(
        about = "Run one reconciliation pass",
        long_about = "Check recent audit changes for missing downstream sync jobs, \
                      optionally replaying the gaps.",
        after_help = "EXAMPLES:\n    # One pass over the configured window\n    dw check\n\n    # Explicit window with remediation\n    dw check --window-minutes 120 --remediate\n\n    # Emit machine-readable output\n    dw check --json"
    )]
    Check(cmd::check::CheckArgs),

    #[command(
        about = "Run the rolling scheduler in the foreground",
        long_about = "Run reconciliation passes on the configured cadence until stopped.",
        after_help = "EXAMPLES:\n    # Watch with defaults\n    dw watch\n\n    # Verbose pass-by-pass logging\n    DW_LOG=driftwatch=debug dw watch"
    )]
    Watch(cmd::watch::WatchArgs),
}

fn init_tracing() {
    let filter = EnvFilter::try_from_env("DW_LOG").unwrap_or_else(|_| {
        EnvFilter::new(if env::var("DEBUG").is_ok() {
            "driftwatch=debug,info"
        } else {
            "driftwatch=info,warn"
        })
    });

    let format = env::var("DW_LOG_FORMAT").unwrap_or_else(|_| "compact".to_string());

    let registry = tracing_subscriber::registry().with(filter);

    match format.as_str() {
        "json" => {
            registry.with(fmt::layer().json().with_ansi(false)).init();
        }
        _ => {
            registry.with(fmt::layer().compact().with_writer(std::io::stderr)).init();
        }
    }
}

/// Wire the engine over the SQLite store named by `--db`.
fn build_engine(cli: &Cli) -> anyhow::Result<Engine> {
    let config = match &cli.config {
        Some(path) => Config::load(path)?,
        None => Config::default(),
    };
    let registry = SchemaRegistry::pms().context("built-in schema registry")?;

    let store = Arc::new(
        SqlitePmsStore::open(&cli.db)
            .with_context(|| format!("open database {}", cli.db.display()))?,
    );

    Ok(Engine::new(
        Arc::clone(&store) as Arc<dyn AuditLog>,
        Arc::clone(&store) as Arc<dyn DownstreamQueue>,
        Arc::clone(&store) as Arc<dyn LiveState>,
        store as Arc<dyn ReplaySink>,
        registry,
        config,
    ))
}

/// Render a failure in the requested format and flag the exit code. JSON
/// consumers get a structured `{"error": ...}` object on stderr.
fn fail(output: OutputMode, error: &CliError) -> ExitCode {
    if render_error(output, error).is_err() {
        eprintln!("error: {}", error.message);
    }
    ExitCode::FAILURE
}

fn main() -> ExitCode {
    init_tracing();

    let cli = Cli::parse();
    if cli.verbose {
        info!("Verbose mode enabled");
    }

    let output = cli.output_mode();
    let engine = match build_engine(&cli) {
        Ok(engine) => engine,
        Err(err) => {
            return fail(
                output,
                &CliError::with_suggestion(
                    format!("{err:#}"),
                    "check the --db and --config paths",
                ),
            );
        }
    };

    let result = match &cli.command {
        Commands::Investigate(args) => cmd::investigate::run_investigate(args, &engine, output),
        Commands::Check(args) => cmd::check::run_check(args, &engine, output),
        Commands::Watch(args) => cmd::watch::run_watch(args, &engine, output),
    };

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(err) => fail(output, &CliError::new(format!("{err:#}"))),
    }
}
