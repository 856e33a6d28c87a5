//! Core data model for backup jobs.
//!
//! This module defines the main data structures the engine works with:
//! - Job: a named backup definition (source, target, mode)
//! - ProgressState: the live, persisted snapshot of one job's run
//! - TransferRecord: one logged file-copy attempt
//! - BackupMode, ProgressStatus, LogFormat, ExecutionStrategy: enums
//!   controlling behavior

use chrono::{DateTime, Local};
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::path::{Path, PathBuf};

/// Case-folded form of a job name, used for every name comparison.
pub fn name_key(name: &str) -> String {
    name.to_lowercase()
}

/// True if two job names refer to the same job.
pub fn names_match(a: &str, b: &str) -> bool {
    name_key(a) == name_key(b)
}

/// A named backup job.
///
/// Jobs are owned by a registry; the engine only reads them by name.
/// Name comparisons are case-insensitive everywhere.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Job {
    /// Unique (case-insensitive) job name
    #[serde(alias = "backupName")]
    pub name: String,

    /// Directory whose contents are backed up
    pub source: PathBuf,

    /// Directory that receives one timestamped output folder per run
    pub target: PathBuf,

    /// Full or differential
    #[serde(alias = "type")]
    pub mode: BackupMode,
}

impl Job {
    pub fn new(
        name: impl Into<String>,
        source: impl Into<PathBuf>,
        target: impl Into<PathBuf>,
        mode: BackupMode,
    ) -> Self {
        Job {
            name: name.into(),
            source: source.into(),
            target: target.into(),
            mode,
        }
    }

    /// True if `name` refers to this job (case-insensitive).
    pub fn is_named(&self, name: &str) -> bool {
        names_match(&self.name, name)
    }
}

/// The backup mode of a job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase", try_from = "ModeRepr")]
pub enum BackupMode {
    /// Copy every file of the source tree
    Full,
    /// Copy only files that are new or newer than the baseline output
    Differential,
}

impl fmt::Display for BackupMode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupMode::Full => write!(f, "Full"),
            BackupMode::Differential => write!(f, "Differential"),
        }
    }
}

/// Accepted on-disk spellings of a mode: the legacy numeric codes
/// (1 = full, 2 = differential) or the variant name.
#[derive(Deserialize)]
#[serde(untagged)]
enum ModeRepr {
    Code(u8),
    Name(String),
}

impl TryFrom<ModeRepr> for BackupMode {
    type Error = String;

    fn try_from(repr: ModeRepr) -> Result<Self, Self::Error> {
        match repr {
            ModeRepr::Code(1) => Ok(BackupMode::Full),
            ModeRepr::Code(2) => Ok(BackupMode::Differential),
            ModeRepr::Code(other) => Err(format!("unknown backup mode code {}", other)),
            ModeRepr::Name(name) => match name.to_lowercase().as_str() {
                "full" => Ok(BackupMode::Full),
                "differential" | "diff" => Ok(BackupMode::Differential),
                _ => Err(format!("unknown backup mode '{}'", name)),
            },
        }
    }
}

/// Status of a job's run as seen by progress consumers.
///
/// `Paused`, `Resuming` and `Error` are events that fall back to
/// `InProgress`; `Completed`, `NoChanges` and `Cancelled` end a run. `Error`
/// is also left in place when a job aborts on a fatal error.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ProgressStatus {
    Initializing,
    Preparing,
    InProgress,
    Paused,
    Resuming,
    Completed,
    NoChanges,
    Error,
    Cancelled,
}

impl ProgressStatus {
    /// Returns true if a run that reached this state has ended.
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            ProgressStatus::Completed | ProgressStatus::NoChanges | ProgressStatus::Cancelled
        )
    }
}

impl fmt::Display for ProgressStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Persisted snapshot of one job's progress.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressState {
    pub job_name: String,
    pub status: ProgressStatus,
    /// Time of the last update
    pub timestamp: DateTime<Local>,
    pub total_files: u64,
    pub total_bytes: u64,
    pub files_copied: u64,
    pub bytes_copied: u64,
    /// Always `total_files - files_copied`
    pub remaining_files: u64,
    /// Always `total_bytes - bytes_copied`
    pub remaining_bytes: u64,
    pub current_source: Option<PathBuf>,
    pub current_target: Option<PathBuf>,
    /// Message of the last fatal error, if the run aborted
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub last_error: Option<String>,
}

impl ProgressState {
    /// A fresh `Initializing` snapshot with zeroed counters.
    pub fn new(job_name: impl Into<String>) -> Self {
        ProgressState {
            job_name: job_name.into(),
            status: ProgressStatus::Initializing,
            timestamp: Local::now(),
            total_files: 0,
            total_bytes: 0,
            files_copied: 0,
            bytes_copied: 0,
            remaining_files: 0,
            remaining_bytes: 0,
            current_source: None,
            current_target: None,
            last_error: None,
        }
    }

    /// Recompute the derived fields after a mutation.
    pub(crate) fn touch(&mut self) {
        self.timestamp = Local::now();
        self.remaining_files = self.total_files.saturating_sub(self.files_copied);
        self.remaining_bytes = self.total_bytes.saturating_sub(self.bytes_copied);
    }
}

/// Outcome label of a transfer, derived from its duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransferStatus {
    Success,
    Failed,
}

impl TransferStatus {
    pub fn from_duration(transfer_time_ms: f64) -> Self {
        if transfer_time_ms >= 0.0 {
            TransferStatus::Success
        } else {
            TransferStatus::Failed
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            TransferStatus::Success => "SUCCESS",
            TransferStatus::Failed => "FAILED",
        }
    }
}

/// Encryption label of a transfer, derived from its encryption duration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EncryptionStatus {
    Encrypted,
    NotEncrypted,
    EncryptionFailed,
}

impl EncryptionStatus {
    pub fn from_duration(encryption_time_ms: f64) -> Self {
        if encryption_time_ms > 0.0 {
            EncryptionStatus::Encrypted
        } else if encryption_time_ms < 0.0 {
            EncryptionStatus::EncryptionFailed
        } else {
            EncryptionStatus::NotEncrypted
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EncryptionStatus::Encrypted => "ENCRYPTED",
            EncryptionStatus::NotEncrypted => "NOT_ENCRYPTED",
            EncryptionStatus::EncryptionFailed => "ENCRYPTION_FAILED",
        }
    }
}

// Labels are plain strings on disk so JSON and XML render them identically.
macro_rules! string_label {
    ($ty:ty, [$($variant:expr),+]) => {
        impl Serialize for $ty {
            fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
                serializer.serialize_str(self.as_str())
            }
        }

        impl<'de> Deserialize<'de> for $ty {
            fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
                let raw = String::deserialize(deserializer)?;
                [$($variant),+]
                    .into_iter()
                    .find(|v| v.as_str() == raw)
                    .ok_or_else(|| serde::de::Error::custom(format!("unknown label '{}'", raw)))
            }
        }
    };
}

string_label!(TransferStatus, [TransferStatus::Success, TransferStatus::Failed]);
string_label!(
    EncryptionStatus,
    [
        EncryptionStatus::Encrypted,
        EncryptionStatus::NotEncrypted,
        EncryptionStatus::EncryptionFailed
    ]
);

/// One logged file-copy attempt. Immutable once written.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferRecord {
    pub timestamp: DateTime<Local>,
    pub job_name: String,
    pub source_path: PathBuf,
    pub target_path: PathBuf,
    pub file_size: u64,
    /// Copy duration; negative means the copy failed
    pub transfer_time_ms: f64,
    pub status: TransferStatus,
    /// 0 = not applicable, positive = encrypted, negative = encryption failed
    pub encryption_time_ms: f64,
    pub encryption_status: EncryptionStatus,
}

impl TransferRecord {
    /// Build a record stamped now, deriving both status labels.
    pub fn new(
        job_name: &str,
        source_path: &Path,
        target_path: &Path,
        file_size: u64,
        transfer_time_ms: f64,
        encryption_time_ms: f64,
    ) -> Self {
        TransferRecord {
            timestamp: Local::now(),
            job_name: job_name.to_string(),
            source_path: source_path.to_path_buf(),
            target_path: target_path.to_path_buf(),
            file_size,
            transfer_time_ms,
            status: TransferStatus::from_duration(transfer_time_ms),
            encryption_time_ms,
            encryption_status: EncryptionStatus::from_duration(encryption_time_ms),
        }
    }

    pub fn succeeded(&self) -> bool {
        self.status == TransferStatus::Success
    }
}

/// Serialization format of the transfer log.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    #[default]
    Json,
    Xml,
}

impl LogFormat {
    /// File extension of a day file in this format.
    pub fn extension(&self) -> &'static str {
        match self {
            LogFormat::Json => "json",
            LogFormat::Xml => "xml",
        }
    }
}

impl fmt::Display for LogFormat {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.extension())
    }
}

/// How the jobs of a batch are scheduled.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ExecutionStrategy {
    /// One job after another, in request order
    #[default]
    Sequential,
    /// One thread per job, all at once
    Parallel,
}
