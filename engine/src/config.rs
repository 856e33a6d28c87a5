//! Engine configuration.
//!
//! Configuration lives in a JSON file with camelCase keys. Every field has a
//! default, so a partial (or missing) file is valid.

use crate::encryption::EncryptionConfig;
use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{ExecutionStrategy, LogFormat};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Encryption section of the configuration file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EncryptionSettings {
    #[serde(default = "default_key")]
    pub key: String,
    /// Extensions to encrypt, e.g. `[".txt", ".docx"]`
    #[serde(default)]
    pub extensions: Vec<String>,
}

fn default_key() -> String {
    "123".to_string()
}

impl Default for EncryptionSettings {
    fn default() -> Self {
        Self {
            key: default_key(),
            extensions: Vec::new(),
        }
    }
}

impl EncryptionSettings {
    pub fn to_config(&self) -> Result<EncryptionConfig, EngineError> {
        EncryptionConfig::new(self.key.clone(), &self.extensions)
    }
}

/// Top-level engine configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EngineConfig {
    /// Root for the default locations below
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,
    #[serde(default)]
    pub jobs_file: Option<PathBuf>,
    #[serde(default)]
    pub state_file: Option<PathBuf>,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
    #[serde(default)]
    pub log_format: LogFormat,
    #[serde(default)]
    pub encryption: EncryptionSettings,
    #[serde(default)]
    pub strategy: ExecutionStrategy,
    /// Diagnostic level: "error", "warn", "info", "debug", "trace"
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            jobs_file: None,
            state_file: None,
            log_dir: None,
            log_format: LogFormat::default(),
            encryption: EncryptionSettings::default(),
            strategy: ExecutionStrategy::default(),
            log_level: default_log_level(),
        }
    }
}

impl EngineConfig {
    /// Defaults rooted at `data_dir`.
    pub fn with_data_dir(data_dir: impl Into<PathBuf>) -> Self {
        Self {
            data_dir: data_dir.into(),
            ..Self::default()
        }
    }

    /// Load from `path`; a missing file yields the defaults.
    pub fn load(path: &Path) -> Result<Self, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Self::default()),
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        serde_json::from_str(&content).map_err(|e| EngineError::InvalidConfig {
            reason: format!("{}: {}", path.display(), e),
        })
    }

    pub fn save(&self, path: &Path) -> Result<(), EngineError> {
        let json =
            serde_json::to_string_pretty(self).map_err(|e| EngineError::serialization(path, e))?;
        fs_ops::write_atomic(path, json.as_bytes(), None)
    }

    pub fn jobs_file(&self) -> PathBuf {
        self.jobs_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("jobs.json"))
    }

    pub fn state_file(&self) -> PathBuf {
        self.state_file
            .clone()
            .unwrap_or_else(|| self.data_dir.join("state.json"))
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir
            .clone()
            .unwrap_or_else(|| self.data_dir.join("logs"))
    }
}

/// Per-platform configuration directory joined with `backup-engine`.
pub fn default_data_dir() -> PathBuf {
    dirs::config_dir()
        .map(|p| p.join("backup-engine"))
        .unwrap_or_else(|| PathBuf::from(".backup-engine"))
}
