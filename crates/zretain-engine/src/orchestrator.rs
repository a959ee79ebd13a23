//! Run orchestration
//!
//! The orchestrator owns one validated pool configuration and the
//! collaborators for a run. Setup validates everything that can be checked
//! before a mutation (replication wiring, VM domains); `run` then drives
//! every dataset pipeline on a bounded worker pool and aggregates the
//! report.

#![allow(clippy::result_large_err)]

use crate::clock::Clock;
use crate::pipeline::{self, DatasetRun, DecisionFilter, PipelineContext};
use crate::session::DomainSession;
use chrono::Utc;
use rayon::prelude::*;
use std::time::Instant;
use tracing::{error, info, info_span};
use zretain_core::driver::{
    ReplicationTransport, StorageDriver, VirtualizationConnector, VirtualizationQuery,
};
use zretain_core::errors::{ExError, ExErrorKind, Result, ZrError};
use zretain_core::gate::filter_safe_to_destroy;
use zretain_core::model::{PoolConfig, Settings};
use zretain_core::report::RunReport;
use zretain_core::CancellationFlag;
use zretain_core_types::RunId;

/// External systems a run talks to
#[derive(Clone, Copy)]
pub struct Collaborators<'a> {
    pub storage: &'a dyn StorageDriver,
    /// Required when the pool configures replication
    pub transport: Option<&'a dyn ReplicationTransport>,
    pub virtualization: &'a dyn VirtualizationConnector,
    pub clock: &'a dyn Clock,
}

/// A run stopped by a safety violation
///
/// The report still lists everything created, sent and destroyed before
/// the violation, across every dataset.
#[derive(Debug, thiserror::Error)]
#[error("{error}")]
pub struct RunAborted {
    pub error: ExError,
    pub report: Box<RunReport>,
}

impl From<RunAborted> for ExError {
    fn from(aborted: RunAborted) -> Self {
        aborted.error
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub struct RunOptions {
    /// Plan only: no snapshot, marker, send or destroy is issued
    pub dry_run: bool,
}

pub struct Orchestrator<'a> {
    pool: PoolConfig,
    settings: Settings,
    storage: &'a dyn StorageDriver,
    transport: Option<&'a dyn ReplicationTransport>,
    clock: &'a dyn Clock,
    cancel: CancellationFlag,
    session: Option<DomainSession>,
    filter: DecisionFilter,
}

/// Reject VM datasets whose domain the hypervisor does not know
///
/// # Errors
///
/// `UnknownDomain` for the first unmatched dataset.
pub fn validate_domains(pool: &PoolConfig, known: &[String]) -> Result<()> {
    for spec in pool.vm_datasets() {
        if let Some(domain) = spec.domain() {
            if !known.iter().any(|k| k == domain) {
                return Err(ZrError::UnknownDomain {
                    dataset: spec.path.clone(),
                    domain: domain.to_string(),
                }
                .into());
            }
        }
    }
    Ok(())
}

impl<'a> Orchestrator<'a> {
    /// Validate the run and open the hypervisor session
    ///
    /// Nothing is mutated here; any error leaves every dataset untouched.
    ///
    /// # Errors
    ///
    /// - `InvalidConfig` when replication is configured but no transport
    ///   was supplied
    /// - connection failures from the virtualization connector
    /// - `UnknownDomain` for a VM dataset bound to a missing domain
    pub fn setup(
        pool: PoolConfig,
        settings: Settings,
        collaborators: Collaborators<'a>,
        cancel: CancellationFlag,
    ) -> Result<Self> {
        let start = Instant::now();
        zretain_core::log_op_start!("orchestrator_setup", pool = pool.name.as_str());

        let result = Self::validate(&pool, &collaborators);
        let session = match result {
            Ok(session) => session,
            Err(err) => {
                zretain_core::log_op_error!(
                    "orchestrator_setup",
                    err.clone(),
                    duration_ms = start.elapsed().as_millis() as u64,
                    pool = pool.name.as_str()
                );
                return Err(err);
            }
        };

        zretain_core::log_op_end!(
            "orchestrator_setup",
            duration_ms = start.elapsed().as_millis() as u64,
            pool = pool.name.as_str(),
            datasets = pool.datasets.len() as u64
        );
        Ok(Self {
            pool,
            settings,
            storage: collaborators.storage,
            transport: collaborators.transport,
            clock: collaborators.clock,
            cancel,
            session,
            filter: filter_safe_to_destroy,
        })
    }

    fn validate(pool: &PoolConfig, collaborators: &Collaborators<'a>) -> Result<Option<DomainSession>> {
        if pool.replication.is_some() && collaborators.transport.is_none() {
            return Err(ExError::new(ExErrorKind::InvalidConfig)
                .with_op("orchestrator_setup")
                .with_message(format!(
                    "pool '{}' configures replication but no transport is available",
                    pool.name
                )));
        }

        if !pool.has_vm_datasets() {
            return Ok(None);
        }

        // Closed by drop if validation fails below
        let session = DomainSession::open(collaborators.virtualization)?;
        let known = match session.query() {
            Some(query) => query.list_all_domains()?,
            None => Vec::new(),
        };
        validate_domains(pool, &known)?;
        Ok(Some(session))
    }

    pub fn pool(&self) -> &PoolConfig {
        &self.pool
    }

    pub fn cancellation(&self) -> &CancellationFlag {
        &self.cancel
    }

    /// Run one cycle over every dataset of the pool
    ///
    /// Dataset-scoped failures are collected into the report. A safety
    /// violation in any dataset raises the cancellation flag, so the other
    /// workers stop issuing sends and destroys, and is returned as the
    /// run's error together with the full report.
    ///
    /// # Errors
    ///
    /// `SafetyViolation` from any dataset, or `Internal` when the worker
    /// pool cannot be built (with an empty report).
    pub fn run(&self, options: RunOptions) -> std::result::Result<RunReport, RunAborted> {
        let run_id = RunId::new();
        let started_at = Utc::now();
        let start = Instant::now();
        let span = info_span!(
            "run",
            run_id = %run_id,
            pool = self.pool.name.as_str(),
            dry_run = options.dry_run
        );
        let _entered = span.enter();
        zretain_core::log_op_start!("run", pool = self.pool.name.as_str());

        let mut report = RunReport {
            run_id,
            pool: self.pool.name.clone(),
            dry_run: options.dry_run,
            started_at,
            finished_at: started_at,
            datasets: Vec::new(),
        };

        let workers = self.settings.workers.max(1);
        let threads = match rayon::ThreadPoolBuilder::new()
            .num_threads(workers)
            .thread_name(|i| format!("zretain-worker-{}", i))
            .build()
        {
            Ok(threads) => threads,
            Err(e) => {
                let err = ExError::new(ExErrorKind::Internal)
                    .with_op("build_worker_pool")
                    .with_message(e.to_string());
                return Err(self.abort(err, report, start));
            }
        };

        let ctx = PipelineContext {
            pool: &self.pool,
            filter: self.filter,
            storage: self.storage,
            transport: self.transport,
            domains: self.domains(),
            clock: self.clock,
            cancel: &self.cancel,
        };
        let cancel = &self.cancel;

        let runs: Vec<DatasetRun> = threads.install(|| {
            ctx.pool
                .datasets
                .par_iter()
                .map(|spec| {
                    let _worker = span.enter();
                    let run = if options.dry_run {
                        DatasetRun::planned(pipeline::plan(&ctx, spec))
                    } else {
                        pipeline::execute(&ctx, spec)
                    };
                    if let Some(err) = &run.violation {
                        error!(dataset = spec.path.as_str(), error = %err, "Safety violation, cancelling run");
                        cancel.cancel();
                    }
                    run
                })
                .collect()
        });

        let mut violation: Option<ExError> = None;
        for run in runs {
            report.datasets.push(run.report);
            if violation.is_none() {
                violation = run.violation;
            }
        }
        report.finished_at = Utc::now();

        if let Some(err) = violation {
            return Err(self.abort(err, report, start));
        }

        let totals = report.totals();
        info!(
            created = totals.created,
            sent = totals.sent,
            destroyed = totals.destroyed,
            skipped = totals.skipped,
            failed = totals.failed,
            "Run complete"
        );
        zretain_core::log_op_end!(
            "run",
            duration_ms = start.elapsed().as_millis() as u64,
            pool = self.pool.name.as_str(),
            errors = totals.errors as u64
        );
        Ok(report)
    }

    /// Replace the candidate filter used ahead of the safe-destroy gate
    #[cfg(test)]
    fn with_decision_filter(mut self, filter: DecisionFilter) -> Self {
        self.filter = filter;
        self
    }

    fn abort(&self, err: ExError, mut report: RunReport, start: Instant) -> RunAborted {
        let err = err.with_run_id(report.run_id.clone());
        report.finished_at = Utc::now();
        zretain_core::log_op_error!(
            "run",
            err.clone(),
            duration_ms = start.elapsed().as_millis() as u64,
            pool = self.pool.name.as_str(),
            datasets = report.datasets.len() as u64
        );
        RunAborted {
            error: err,
            report: Box::new(report),
        }
    }

    fn domains(&self) -> Option<&dyn VirtualizationQuery> {
        self.session.as_ref().and_then(|s| s.query())
    }

    /// Close the hypervisor session
    ///
    /// Dropping the orchestrator also closes it; this surfaces the error.
    ///
    /// # Errors
    ///
    /// Propagates the session's close failure.
    pub fn close(mut self) -> Result<()> {
        match self.session.take() {
            Some(session) => session.close(),
            None => Ok(()),
        }
    }
}
