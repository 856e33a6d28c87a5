//! Per-job execution.
//!
//! This module provides the lifecycle of one job inside a batch:
//! - Planning: validating the source, choosing full, differential or
//!   degraded-full, and pre-scanning the eligible files
//! - Running: the directory walk that copies, encrypts and logs each file
//!   while honoring the batch's pause and cancel signals
//!
//! Individual file errors are recorded but do NOT stop the job. Only a
//! failure that makes further progress impossible (unreadable source root,
//! output folder that cannot be created) aborts it.

use crate::encryption::{EncryptionGate, EncryptionOutcome};
use crate::error::EngineError;
use crate::fs_ops::{self, ScanSummary};
use crate::model::{BackupMode, Job, ProgressStatus, TransferRecord};
use crate::progress::ProgressTracker;
use crate::scope::{Checkpoint, RunScope};
use crate::transfer_log::TransferLogger;
use chrono::Local;
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Instant;

/// Shared collaborators a job runs against.
#[derive(Debug, Clone, Copy)]
pub struct JobContext<'a> {
    pub scope: &'a RunScope,
    pub tracker: &'a ProgressTracker,
    pub logger: &'a TransferLogger,
    pub gate: &'a EncryptionGate,
}

/// How a run compares the source against earlier output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RunKind {
    /// Every file is copied
    Full,
    /// Only files new or newer than the baseline folder are copied
    Differential { baseline: PathBuf },
    /// Differential job without a baseline; every file is copied
    DegradedFull,
}

impl RunKind {
    pub fn baseline(&self) -> Option<&Path> {
        match self {
            RunKind::Differential { baseline } => Some(baseline),
            RunKind::Full | RunKind::DegradedFull => None,
        }
    }
}

/// Result of planning a job, before any byte moves.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct JobPlan {
    pub kind: RunKind,
    pub summary: ScanSummary,
}

/// Terminal result of one requested job.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum JobOutcome {
    Completed {
        kind: RunKind,
        copied: u64,
        failed: u64,
    },
    NoChanges,
    NotFound,
    Cancelled {
        copied: u64,
    },
    /// Aborted by a fatal error
    Failed(String),
}

impl JobOutcome {
    /// True if the job did not run, aborted, or lost at least one file.
    pub fn is_failure(&self) -> bool {
        match self {
            JobOutcome::Completed { failed, .. } => *failed > 0,
            JobOutcome::NotFound | JobOutcome::Failed(_) => true,
            JobOutcome::NoChanges | JobOutcome::Cancelled { .. } => false,
        }
    }
}

fn plural(n: u64) -> &'static str {
    if n == 1 {
        ""
    } else {
        "s"
    }
}

impl fmt::Display for JobOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            JobOutcome::Completed {
                kind,
                copied,
                failed,
            } => {
                match kind {
                    RunKind::Full => write!(f, "Full backup completed")?,
                    RunKind::Differential { baseline } => write!(
                        f,
                        "Differential backup completed against {}",
                        baseline
                            .file_name()
                            .map(|n| n.to_string_lossy())
                            .unwrap_or_else(|| baseline.to_string_lossy())
                    )?,
                    RunKind::DegradedFull => {
                        write!(f, "No baseline found, full backup completed instead")?
                    }
                }
                write!(f, ": {} file{} copied", copied, plural(*copied))?;
                if *failed > 0 {
                    write!(f, ", {} failed", failed)?;
                }
                Ok(())
            }
            JobOutcome::NoChanges => write!(f, "No changes to back up"),
            JobOutcome::NotFound => write!(f, "Backup job not found"),
            JobOutcome::Cancelled { copied } => {
                write!(f, "Backup cancelled after {} file{}", copied, plural(*copied))
            }
            JobOutcome::Failed(message) => write!(f, "Backup failed: {}", message),
        }
    }
}

/// Check that the job's source is a readable directory.
fn validate_source(source: &Path) -> Result<(), EngineError> {
    match fs::metadata(source) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::SourceNotFound {
            path: source.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Err(EngineError::SourceNotFound {
            path: source.to_path_buf(),
        }),
        Err(e) if e.kind() == io::ErrorKind::PermissionDenied => {
            Err(EngineError::SourceAccessDenied {
                path: source.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::ReadError {
            path: source.to_path_buf(),
            source: e,
        }),
    }
}

/// Plan a job: resolve its run kind and pre-scan the eligible files.
///
/// # Errors
/// Returns an error if the source is missing, is not a directory, or its
/// root cannot be listed.
pub fn plan_job(job: &Job) -> Result<JobPlan, EngineError> {
    validate_source(&job.source)?;

    let kind = match job.mode {
        BackupMode::Full => RunKind::Full,
        BackupMode::Differential => match fs_ops::find_baseline(&job.target, &job.name) {
            Some(baseline) => RunKind::Differential { baseline },
            None => RunKind::DegradedFull,
        },
    };
    let summary = fs_ops::scan_tree(&job.source, kind.baseline())?;
    Ok(JobPlan { kind, summary })
}

/// Run one job to a terminal state.
///
/// Never returns an error: fatal failures are stored in the job's progress
/// state and reported as [`JobOutcome::Failed`].
pub fn run_job(job: &Job, ctx: &JobContext<'_>) -> JobOutcome {
    ctx.tracker.initialize(&job.name);
    match execute(job, ctx) {
        Ok(outcome) => {
            tracing::info!(outcome = %outcome, "job finished");
            outcome
        }
        Err(e) => {
            tracing::error!(error = %e, "job aborted");
            ctx.tracker.record_failure(&job.name, &e.to_string());
            JobOutcome::Failed(e.to_string())
        }
    }
}

fn execute(job: &Job, ctx: &JobContext<'_>) -> Result<JobOutcome, EngineError> {
    let plan = plan_job(job)?;
    tracing::info!(
        kind = ?plan.kind,
        files = plan.summary.files,
        bytes = plan.summary.bytes,
        "job planned"
    );
    ctx.tracker
        .prepare(&job.name, plan.summary.files, plan.summary.bytes);

    if plan.summary.files == 0 {
        ctx.tracker.finish(&job.name, ProgressStatus::NoChanges);
        return Ok(JobOutcome::NoChanges);
    }

    let mut walk = CopyWalk {
        job,
        ctx,
        copied: 0,
        failed: 0,
    };
    let end = walk.run(plan.kind.baseline())?;
    let copied = walk.copied;
    let failed = walk.failed;

    match end {
        WalkEnd::Finished => {
            ctx.tracker.finish(&job.name, ProgressStatus::Completed);
            Ok(JobOutcome::Completed {
                kind: plan.kind,
                copied,
                failed,
            })
        }
        WalkEnd::Cancelled => {
            ctx.tracker.finish(&job.name, ProgressStatus::Cancelled);
            Ok(JobOutcome::Cancelled { copied })
        }
    }
}

enum WalkEnd {
    Finished,
    Cancelled,
}

/// A directory waiting to be visited, with its mirror paths.
struct PendingDir {
    source: PathBuf,
    dest: PathBuf,
    baseline: Option<PathBuf>,
}

struct CopyWalk<'a> {
    job: &'a Job,
    ctx: &'a JobContext<'a>,
    copied: u64,
    failed: u64,
}

impl CopyWalk<'_> {
    /// Honor the batch signals, publishing `Paused`/`Resuming` around a wait.
    fn checkpoint(&self) -> Checkpoint {
        let name = &self.job.name;
        let result = self.ctx.scope.checkpoint(|| {
            tracing::info!("job paused");
            self.ctx.tracker.set_status(name, ProgressStatus::Paused);
        });
        if result == Checkpoint::Resumed {
            tracing::info!("job resumed");
            self.ctx.tracker.set_status(name, ProgressStatus::Resuming);
        }
        result
    }

    /// Depth-first walk: files of a directory first, then its
    /// subdirectories in listing order.
    fn run(&mut self, baseline: Option<&Path>) -> Result<WalkEnd, EngineError> {
        // Nothing is written while held or after a cancel that beat the walk.
        if self.checkpoint() == Checkpoint::Cancelled {
            return Ok(WalkEnd::Cancelled);
        }
        let output = fs_ops::unique_output_dir(&self.job.target, &self.job.name, Local::now());
        fs_ops::ensure_dir(&output)?;
        tracing::debug!(output = %output.display(), "output folder created");

        let mut pending = vec![PendingDir {
            source: self.job.source.clone(),
            dest: output,
            baseline: baseline.map(Path::to_path_buf),
        }];
        let mut is_root = true;

        while let Some(dir) = pending.pop() {
            if !is_root && self.checkpoint() == Checkpoint::Cancelled {
                return Ok(WalkEnd::Cancelled);
            }
            let listing = match fs_ops::list_dir(&dir.source) {
                Ok(listing) => listing,
                Err(e) if is_root => return Err(e),
                Err(e) => {
                    tracing::warn!(error = %e, "skipping unreadable directory");
                    self.ctx
                        .tracker
                        .record_error(&self.job.name, &dir.source, &dir.dest);
                    continue;
                }
            };
            is_root = false;

            for file in &listing.files {
                if self.checkpoint() == Checkpoint::Cancelled {
                    return Ok(WalkEnd::Cancelled);
                }
                let Some(name) = file.file_name() else {
                    continue;
                };
                if let Some(base) = &dir.baseline {
                    if !fs_ops::is_changed(file, &base.join(name)) {
                        continue;
                    }
                }
                self.copy_file(file, &dir.dest.join(name));
            }

            // Reversed so the first listed subdirectory is visited first
            for sub in listing.subdirs.into_iter().rev() {
                let Some(name) = sub.file_name().map(|n| n.to_os_string()) else {
                    continue;
                };
                pending.push(PendingDir {
                    dest: dir.dest.join(&name),
                    baseline: dir.baseline.as_ref().map(|b| b.join(&name)),
                    source: sub,
                });
            }
        }
        Ok(WalkEnd::Finished)
    }

    fn copy_file(&mut self, source: &Path, target: &Path) {
        let job_name = self.job.name.as_str();
        self.ctx.tracker.begin_file(job_name, source, target);

        let started = Instant::now();
        let record = match fs_ops::copy_file_atomic(source, target) {
            Ok(bytes) => {
                let transfer_ms = started.elapsed().as_secs_f64() * 1000.0;
                let encryption = self.ctx.gate.transform(target);
                tracing::debug!(
                    source = %source.display(),
                    bytes,
                    transfer_ms,
                    encryption_ms = encryption.as_millis(),
                    "file copied"
                );
                self.ctx.tracker.record_copied(job_name, bytes);
                // The copy stays in place, unencrypted, and counts as failed only
                if encryption == EncryptionOutcome::Failed {
                    self.ctx.tracker.record_error(job_name, source, target);
                    self.failed += 1;
                } else {
                    self.copied += 1;
                }
                TransferRecord::new(
                    job_name,
                    source,
                    target,
                    bytes,
                    transfer_ms,
                    encryption.as_millis(),
                )
            }
            Err(e) => {
                tracing::warn!(source = %source.display(), error = %e, "file copy failed");
                self.ctx.tracker.record_error(job_name, source, target);
                self.failed += 1;
                let size = fs::metadata(source).map(|m| m.len()).unwrap_or(0);
                TransferRecord::new(job_name, source, target, size, -1.0, 0.0)
            }
        };
        if let Err(e) = self.ctx.logger.append(&record) {
            tracing::warn!(error = %e, "failed to append transfer record");
        }
    }
}
