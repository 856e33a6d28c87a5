//! Selective per-file encryption applied after a copy.
//!
//! The `EncryptionGate` holds the process-wide key and extension set and is
//! shared (behind an `Arc`) by every job. Configuration reads and writes are
//! mutually exclusive; transforms of different files run in parallel, while
//! two transforms of the same path are serialized.

use crate::error::EngineError;
use crate::fs_ops;
use filetime::FileTime;
use parking_lot::{Condvar, Mutex, RwLock};
use std::collections::{BTreeSet, HashSet};
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant};

/// A reversible byte transform. Applying it twice with the same key must
/// yield the original bytes.
pub trait ByteTransform: Send + Sync {
    fn apply(&self, data: &mut [u8], key: &[u8]);
}

/// XOR with the key repeated over the data.
#[derive(Debug, Clone, Copy, Default)]
pub struct XorCipher;

impl ByteTransform for XorCipher {
    fn apply(&self, data: &mut [u8], key: &[u8]) {
        if key.is_empty() {
            return;
        }
        for (byte, k) in data.iter_mut().zip(key.iter().cycle()) {
            *byte ^= k;
        }
    }
}

/// Key and the extensions it applies to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EncryptionConfig {
    key: String,
    extensions: BTreeSet<String>,
}

impl EncryptionConfig {
    pub fn new<I, S>(key: impl Into<String>, extensions: I) -> Result<Self, EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let key = key.into();
        if key.trim().is_empty() {
            return Err(EngineError::InvalidConfig {
                reason: "encryption key must not be empty".to_string(),
            });
        }
        let extensions = extensions
            .into_iter()
            .map(|ext| normalize_extension(ext.as_ref()))
            .filter(|ext| ext.len() > 1)
            .collect();
        Ok(EncryptionConfig { key, extensions })
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn extensions(&self) -> &BTreeSet<String> {
        &self.extensions
    }

    /// True if `path`'s extension is in the configured set.
    pub fn matches(&self, path: &Path) -> bool {
        path.extension()
            .map(|ext| self.extensions.contains(&normalize_extension(&ext.to_string_lossy())))
            .unwrap_or(false)
    }
}

impl Default for EncryptionConfig {
    fn default() -> Self {
        EncryptionConfig {
            key: "123".to_string(),
            extensions: BTreeSet::new(),
        }
    }
}

/// `".TXT"`, `"txt"` and `" .txt "` all become `".txt"`.
fn normalize_extension(ext: &str) -> String {
    let ext = ext.trim().trim_start_matches('.').to_lowercase();
    format!(".{}", ext)
}

/// Result of passing one file through the gate.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum EncryptionOutcome {
    /// Extension not configured; file untouched
    NotApplicable,
    /// File transformed in place
    Encrypted(Duration),
    /// Transform attempted and failed; file left as it was
    Failed,
}

impl EncryptionOutcome {
    /// Numeric form used in transfer records: 0, elapsed milliseconds
    /// (always > 0), or -1.
    pub fn as_millis(&self) -> f64 {
        match self {
            EncryptionOutcome::NotApplicable => 0.0,
            EncryptionOutcome::Encrypted(elapsed) => (elapsed.as_secs_f64() * 1000.0).max(0.001),
            EncryptionOutcome::Failed => -1.0,
        }
    }
}

/// Shared, configurable encryption step.
pub struct EncryptionGate {
    config: RwLock<EncryptionConfig>,
    cipher: Box<dyn ByteTransform>,
    in_flight: Mutex<HashSet<PathBuf>>,
    path_released: Condvar,
}

impl fmt::Debug for EncryptionGate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("EncryptionGate")
            .field("extensions", self.config.read().extensions())
            .finish_non_exhaustive()
    }
}

impl Default for EncryptionGate {
    fn default() -> Self {
        Self::new(EncryptionConfig::default())
    }
}

/// Removes a path from the in-flight set when dropped.
struct PathLease<'a> {
    gate: &'a EncryptionGate,
    path: PathBuf,
}

impl Drop for PathLease<'_> {
    fn drop(&mut self) {
        self.gate.in_flight.lock().remove(&self.path);
        self.gate.path_released.notify_all();
    }
}

impl EncryptionGate {
    pub fn new(config: EncryptionConfig) -> Self {
        Self::with_cipher(config, XorCipher)
    }

    pub fn with_cipher(config: EncryptionConfig, cipher: impl ByteTransform + 'static) -> Self {
        EncryptionGate {
            config: RwLock::new(config),
            cipher: Box::new(cipher),
            in_flight: Mutex::new(HashSet::new()),
            path_released: Condvar::new(),
        }
    }

    /// Atomically replace key and extension set.
    pub fn configure<I, S>(&self, key: impl Into<String>, extensions: I) -> Result<(), EngineError>
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let config = EncryptionConfig::new(key, extensions)?;
        tracing::info!(extensions = ?config.extensions(), "encryption reconfigured");
        *self.config.write() = config;
        Ok(())
    }

    pub fn config(&self) -> EncryptionConfig {
        self.config.read().clone()
    }

    /// Transform `path` in place if its extension is configured.
    ///
    /// The file's modification time is kept, so the encrypted copy still
    /// compares as "not newer" than an unchanged source.
    pub fn transform(&self, path: &Path) -> EncryptionOutcome {
        let key = {
            let config = self.config.read();
            if !config.matches(path) {
                return EncryptionOutcome::NotApplicable;
            }
            config.key().as_bytes().to_vec()
        };

        let _lease = self.lease(path);
        let started = Instant::now();
        match self.rewrite(path, &key) {
            Ok(()) => EncryptionOutcome::Encrypted(started.elapsed()),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "encryption failed");
                EncryptionOutcome::Failed
            }
        }
    }

    fn lease(&self, path: &Path) -> PathLease<'_> {
        let mut in_flight = self.in_flight.lock();
        while in_flight.contains(path) {
            self.path_released.wait(&mut in_flight);
        }
        in_flight.insert(path.to_path_buf());
        PathLease {
            gate: self,
            path: path.to_path_buf(),
        }
    }

    fn rewrite(&self, path: &Path, key: &[u8]) -> Result<(), EngineError> {
        let metadata = fs::metadata(path).map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        let mut data = fs::read(path).map_err(|e| EngineError::ReadError {
            path: path.to_path_buf(),
            source: e,
        })?;
        self.cipher.apply(&mut data, key);
        let mtime = FileTime::from_last_modification_time(&metadata);
        fs_ops::write_atomic(path, &data, Some(mtime))
    }
}
