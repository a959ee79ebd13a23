//! Run command
//!
//! Usage: zretain run [--pool <NAME>] [--dry-run] [--workers <N>] [--json]

use super::{load, CommandResult, Drivers, GlobalArgs, RunStatus};
use clap::Args;
use std::fmt::Write as _;
use tracing::warn;
use zretain_core::report::{DatasetOutcome, RunReport};
use zretain_core::CancellationFlag;
use zretain_engine::{Collaborators, Orchestrator, RunOptions, SystemClock};
use zretain_store::RunLock;

#[derive(Debug, Args)]
pub struct RunArgs {
    /// Pool to operate on (optional when only one is configured)
    #[arg(long)]
    pub pool: Option<String>,

    /// Report what would happen without changing anything
    #[arg(long)]
    pub dry_run: bool,

    /// Override the configured worker count
    #[arg(long)]
    pub workers: Option<usize>,

    /// Print the run report as JSON
    #[arg(long)]
    pub json: bool,
}

/// Execute run command
pub fn execute(global: &GlobalArgs, args: RunArgs) -> CommandResult {
    let (pool, mut settings) = load(&global.config, args.pool.as_deref())?;
    if let Some(workers) = args.workers {
        if workers == 0 {
            return Err("--workers must be at least 1".into());
        }
        settings.workers = workers;
    }

    let _lock = RunLock::acquire(&settings.lock_path)?;

    let cancel = CancellationFlag::new();
    let handler_flag = cancel.clone();
    ctrlc::set_handler(move || {
        warn!("Interrupt received, finishing in-flight transfers");
        handler_flag.cancel();
    })?;

    let drivers = Drivers::new(global, &pool, &settings);
    let clock = SystemClock;
    let orchestrator = Orchestrator::setup(
        pool,
        settings,
        Collaborators {
            storage: &drivers.storage,
            transport: drivers
                .transport
                .as_ref()
                .map(|t| t as &dyn zretain_core::ReplicationTransport),
            virtualization: &drivers.virtualization,
            clock: &clock,
        },
        cancel,
    )?;

    let outcome = orchestrator.run(RunOptions {
        dry_run: args.dry_run,
    });
    if let Err(e) = orchestrator.close() {
        warn!(error = %e, "Failed to close hypervisor connection");
    }

    let report = match outcome {
        Ok(report) => report,
        Err(aborted) => {
            // What already happened is printed before failing
            print_report(&aborted.report, args.json)?;
            return Err(aborted.error.into());
        }
    };
    print_report(&report, args.json)?;

    Ok(if report.is_clean() {
        RunStatus::Clean
    } else {
        RunStatus::Degraded
    })
}

fn print_report(report: &RunReport, json: bool) -> Result<(), Box<dyn std::error::Error>> {
    if json {
        println!("{}", report.to_json()?);
    } else {
        print!("{}", render_summary(report));
    }
    Ok(())
}

fn outcome_label(outcome: DatasetOutcome) -> &'static str {
    match outcome {
        DatasetOutcome::Succeeded => "ok",
        DatasetOutcome::Partial => "partial",
        DatasetOutcome::Failed => "FAILED",
    }
}

/// Human-readable report
pub fn render_summary(report: &RunReport) -> String {
    let mut out = String::new();
    let mode = if report.dry_run { " (dry run)" } else { "" };
    let _ = writeln!(out, "Run {} on pool {}{}", report.run_id, report.pool, mode);

    for ds in &report.datasets {
        let created = ds
            .created
            .map(|n| n.to_string())
            .unwrap_or_else(|| "-".to_string());
        let _ = writeln!(
            out,
            "  {:<8} {}  created {}  sent {}  destroyed {}  skipped {}",
            outcome_label(ds.outcome),
            ds.dataset,
            created,
            ds.sent.len(),
            ds.destroyed.len(),
            ds.skipped.len()
        );
        if !ds.remote_destroyed.is_empty() {
            let _ = writeln!(out, "           remote destroyed {}", ds.remote_destroyed.len());
        }
        for skipped in &ds.skipped {
            let _ = writeln!(
                out,
                "           kept {}@{} ({})",
                ds.dataset,
                skipped.snapshot,
                skipped.reason.as_str()
            );
        }
        for err in &ds.errors {
            let _ = writeln!(out, "           error [{:?}] {}: {}", err.stage, err.code, err.message);
        }
    }

    let t = report.totals();
    let _ = writeln!(
        out,
        "Totals: {} created, {} sent, {} destroyed, {} skipped, {} ok / {} partial / {} failed",
        t.created, t.sent, t.destroyed, t.skipped, t.succeeded, t.partial, t.failed
    );
    out
}
