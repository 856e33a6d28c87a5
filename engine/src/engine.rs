//! Batch orchestration.
//!
//! A `BackupEngine` owns the shared collaborators (job registry, progress
//! tracker, transfer logger, encryption gate) and the current `RunScope`.
//! Each batch gets a fresh scope; its jobs run one after another or all at
//! once, and every job reports exactly one outcome.

use crate::config::EngineConfig;
use crate::encryption::EncryptionGate;
use crate::error::EngineError;
use crate::job::{self, JobContext, JobOutcome};
use crate::model::{names_match, ExecutionStrategy, ProgressState, ProgressStatus};
use crate::progress::ProgressTracker;
use crate::registry::{JobRegistry, JsonJobRegistry};
use crate::scope::RunScope;
use crate::transfer_log::TransferLogger;
use parking_lot::Mutex;
use std::fmt;
use std::sync::Arc;
use std::thread;
use uuid::Uuid;

/// Outcome of one requested job name.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobReport {
    /// The name as requested
    pub job_name: String,
    pub outcome: JobOutcome,
}

impl fmt::Display for JobReport {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.job_name, self.outcome)
    }
}

/// All outcomes of one batch.
///
/// Sequential batches list reports in request order; parallel batches in
/// completion order.
#[derive(Debug, Clone)]
pub struct BatchReport {
    pub scope_id: Uuid,
    pub reports: Vec<JobReport>,
}

impl BatchReport {
    /// One human-readable line per requested job.
    pub fn messages(&self) -> Vec<String> {
        self.reports.iter().map(ToString::to_string).collect()
    }

    pub fn has_failures(&self) -> bool {
        self.reports.iter().any(|r| r.outcome.is_failure())
    }

    /// Report for `job_name` (case-insensitive).
    pub fn get(&self, job_name: &str) -> Option<&JobReport> {
        self.reports
            .iter()
            .find(|r| names_match(&r.job_name, job_name))
    }
}

/// The backup execution engine.
pub struct BackupEngine {
    registry: Arc<dyn JobRegistry>,
    tracker: Arc<ProgressTracker>,
    logger: Arc<TransferLogger>,
    gate: Arc<EncryptionGate>,
    scope: Mutex<RunScope>,
}

impl fmt::Debug for BackupEngine {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("BackupEngine")
            .field("tracker", &self.tracker)
            .field("logger", &self.logger)
            .field("gate", &self.gate)
            .field("scope", &self.scope.lock().id())
            .finish_non_exhaustive()
    }
}

impl BackupEngine {
    pub fn new(
        registry: impl JobRegistry + 'static,
        tracker: ProgressTracker,
        logger: TransferLogger,
        gate: EncryptionGate,
    ) -> Self {
        BackupEngine {
            registry: Arc::new(registry),
            tracker: Arc::new(tracker),
            logger: Arc::new(logger),
            gate: Arc::new(gate),
            scope: Mutex::new(RunScope::new()),
        }
    }

    /// Wire an engine from configuration: JSON job file, state file, log
    /// directory and encryption settings.
    pub fn from_config(config: &EngineConfig) -> Result<Self, EngineError> {
        let gate = EncryptionGate::new(config.encryption.to_config()?);
        Ok(Self::new(
            JsonJobRegistry::new(config.jobs_file()),
            ProgressTracker::new(config.state_file()),
            TransferLogger::new(config.log_dir(), config.log_format),
            gate,
        ))
    }

    pub fn registry(&self) -> &dyn JobRegistry {
        self.registry.as_ref()
    }

    pub fn tracker(&self) -> Arc<ProgressTracker> {
        self.tracker.clone()
    }

    pub fn logger(&self) -> Arc<TransferLogger> {
        self.logger.clone()
    }

    pub fn gate(&self) -> Arc<EncryptionGate> {
        self.gate.clone()
    }

    /// Current progress of one job.
    pub fn progress(&self, job_name: &str) -> Option<ProgressState> {
        self.tracker.get(job_name)
    }

    /// Install a fresh scope, replacing the previous one, and return a
    /// handle to it.
    pub fn new_scope(&self) -> RunScope {
        let scope = RunScope::new();
        *self.scope.lock() = scope.clone();
        scope
    }

    /// Handle to the scope of the current (or last) batch.
    pub fn current_scope(&self) -> RunScope {
        self.scope.lock().clone()
    }

    pub fn pause(&self) {
        self.scope.lock().pause();
    }

    pub fn resume(&self) {
        self.scope.lock().resume();
    }

    pub fn cancel(&self) {
        self.scope.lock().cancel();
    }

    pub fn is_paused(&self) -> bool {
        self.scope.lock().is_paused()
    }

    /// Run `names` under a fresh scope.
    pub fn execute_batch<I, S>(&self, names: I, strategy: ExecutionStrategy) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let scope = self.new_scope();
        self.run_in_scope(&scope, names, strategy)
    }

    /// Run `names` under a caller-prepared scope.
    pub fn run_in_scope<I, S>(
        &self,
        scope: &RunScope,
        names: I,
        strategy: ExecutionStrategy,
    ) -> BatchReport
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let names: Vec<String> = names.into_iter().map(Into::into).collect();
        let span = tracing::info_span!("batch", scope = %scope.id(), ?strategy);
        let _enter = span.enter();
        tracing::info!(jobs = names.len(), "batch started");

        let reports = match strategy {
            ExecutionStrategy::Sequential => names
                .iter()
                .map(|name| self.run_named(scope, name))
                .collect(),
            ExecutionStrategy::Parallel => self.run_parallel(scope, &names, &span),
        };

        tracing::info!("batch finished");
        BatchReport {
            scope_id: scope.id(),
            reports,
        }
    }

    fn run_parallel(&self, scope: &RunScope, names: &[String], span: &tracing::Span) -> Vec<JobReport> {
        let (tx, rx) = crossbeam_channel::unbounded();
        thread::scope(|s| {
            for name in names {
                let tx = tx.clone();
                let span = span.clone();
                s.spawn(move || {
                    let _enter = span.enter();
                    // The receiver outlives every sender
                    let _ = tx.send(self.run_named(scope, name));
                });
            }
        });
        drop(tx);
        rx.iter().collect()
    }

    /// Resolve one name and run it, never failing the batch.
    fn run_named(&self, scope: &RunScope, name: &str) -> JobReport {
        let outcome = match self.registry.get_job(name) {
            Ok(Some(job)) => {
                let span = tracing::info_span!("job", job = %job.name);
                let _enter = span.enter();
                if scope.is_cancelled() {
                    tracing::info!("job skipped, batch cancelled");
                    self.tracker.finish(&job.name, ProgressStatus::Cancelled);
                    JobOutcome::Cancelled { copied: 0 }
                } else {
                    let ctx = JobContext {
                        scope,
                        tracker: &self.tracker,
                        logger: &self.logger,
                        gate: &self.gate,
                    };
                    job::run_job(&job, &ctx)
                }
            }
            Ok(None) => {
                tracing::warn!(job = name, "{}", EngineError::JobNotFound { name: name.to_string() });
                JobOutcome::NotFound
            }
            Err(e) => {
                tracing::error!(job = name, error = %e, "job registry unavailable");
                JobOutcome::Failed(e.to_string())
            }
        };
        JobReport {
            job_name: name.to_string(),
            outcome,
        }
    }
}
