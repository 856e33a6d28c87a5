//! # BackUP Engine - Backup Execution Library
//!
//! A headless backup engine in Rust. Designed as the foundation for
//! multiple front ends (CLI, GUI, automation).
//!
//! ## Overview
//!
//! The engine runs named backup jobs from a source directory into
//! timestamped output folders below a target directory. It features:
//! - Full and differential modes (differential compares against the oldest
//!   earlier output of the same job)
//! - Batches run sequentially or in parallel under one shared pause/cancel
//!   scope
//! - Crash-survivable progress state, polled by front ends
//! - A durable per-day transfer log (JSON or XML)
//! - Selective per-extension encryption of copied files
//!
//! ## Basic Usage
//!
//! ```no_run
//! use backup_engine::{
//!     BackupEngine, BackupMode, EncryptionGate, ExecutionStrategy, InMemoryRegistry, Job,
//!     LogFormat, ProgressTracker, TransferLogger,
//! };
//!
//! let registry = InMemoryRegistry::new(vec![Job::new(
//!     "Docs",
//!     "/home/me/docs",
//!     "/mnt/backup",
//!     BackupMode::Differential,
//! )]);
//! let engine = BackupEngine::new(
//!     registry,
//!     ProgressTracker::new("/var/lib/backup/state.json"),
//!     TransferLogger::new("/var/lib/backup/logs", LogFormat::Json),
//!     EncryptionGate::default(),
//! );
//!
//! let report = engine.execute_batch(["Docs"], ExecutionStrategy::Sequential);
//! for line in report.messages() {
//!     println!("{}", line);
//! }
//! ```
//!
//! ## Modules
//!
//! - **model**: Core data structures (Job, ProgressState, TransferRecord, enums)
//! - **error**: Error types and handling
//! - **config**: JSON engine configuration
//! - **registry**: Read-only job lookup
//! - **fs_ops**: Low-level filesystem operations
//! - **suspend**: Shared pause gate
//! - **scope**: Per-batch pause/cancel scope
//! - **encryption**: Per-extension encryption of copied files
//! - **progress**: Persistent progress tracking
//! - **transfer_log**: Day-partitioned transfer log
//! - **job**: Per-job planning and copy walk
//! - **engine**: Batch orchestration

pub mod model;
pub mod error;
pub mod config;
pub mod registry;
pub mod fs_ops;
pub mod suspend;
pub mod scope;
pub mod encryption;
pub mod progress;
pub mod transfer_log;
pub mod job;
pub mod engine;

// Re-export main types and functions
pub use model::{
    name_key, names_match, BackupMode, EncryptionStatus, ExecutionStrategy, Job, LogFormat, ProgressState,
    ProgressStatus, TransferRecord, TransferStatus,
};
pub use error::EngineError;
pub use config::{EncryptionSettings, EngineConfig};
pub use registry::{InMemoryRegistry, JobRegistry, JsonJobRegistry};
pub use suspend::SuspendController;
pub use scope::{CancelToken, Checkpoint, RunScope};
pub use encryption::{ByteTransform, EncryptionConfig, EncryptionGate, EncryptionOutcome, XorCipher};
pub use progress::ProgressTracker;
pub use transfer_log::TransferLogger;
pub use job::{plan_job, run_job, JobContext, JobOutcome, JobPlan, RunKind};
pub use engine::{BackupEngine, BatchReport, JobReport};
