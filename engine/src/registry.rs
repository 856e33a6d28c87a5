//! Read-only access to job definitions.
//!
//! The engine never creates or edits jobs; it only resolves them by name
//! through a `JobRegistry`.

use crate::error::EngineError;
use crate::model::Job;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

/// Source of job definitions. Lookups are case-insensitive.
pub trait JobRegistry: Send + Sync {
    /// All jobs, in registry order.
    fn list_jobs(&self) -> Result<Vec<Job>, EngineError>;

    /// The job called `name`, if any.
    fn get_job(&self, name: &str) -> Result<Option<Job>, EngineError> {
        Ok(self.list_jobs()?.into_iter().find(|job| job.is_named(name)))
    }
}

/// Fixed set of jobs held in memory.
#[derive(Debug, Clone, Default)]
pub struct InMemoryRegistry {
    jobs: Vec<Job>,
}

impl InMemoryRegistry {
    pub fn new(jobs: Vec<Job>) -> Self {
        InMemoryRegistry { jobs }
    }
}

impl JobRegistry for InMemoryRegistry {
    fn list_jobs(&self) -> Result<Vec<Job>, EngineError> {
        Ok(self.jobs.clone())
    }

    fn get_job(&self, name: &str) -> Result<Option<Job>, EngineError> {
        Ok(self.jobs.iter().find(|job| job.is_named(name)).cloned())
    }
}

/// Jobs stored as a JSON array in a file.
///
/// The file is read on every call, so edits made by the program that owns
/// it are picked up by the next batch.
#[derive(Debug, Clone)]
pub struct JsonJobRegistry {
    path: PathBuf,
}

impl JsonJobRegistry {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        JsonJobRegistry { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl JobRegistry for JsonJobRegistry {
    fn list_jobs(&self) -> Result<Vec<Job>, EngineError> {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: self.path.clone(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(Vec::new());
        }
        serde_json::from_str(&content).map_err(|e| EngineError::serialization(&self.path, e))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::BackupMode;

    #[test]
    fn test_in_memory_lookup_ignores_case() {
        let registry = InMemoryRegistry::new(vec![Job::new("Docs", "/s", "/t", BackupMode::Full)]);
        assert!(registry.get_job("DOCS").unwrap().is_some());
        assert!(registry.get_job("Photos").unwrap().is_none());
    }

    #[test]
    fn test_lookup_folds_non_ascii_names() {
        let registry = InMemoryRegistry::new(vec![Job::new("Été", "/s", "/t", BackupMode::Full)]);
        let job = registry.get_job("ÉTÉ").unwrap().expect("job found");
        assert_eq!(job.name, "Été");
    }

    #[test]
    fn test_json_registry_reads_legacy_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("jobs.json");
        fs::write(
            &path,
            r#"[
                {"backupName": "Docs", "source": "/home/me/docs", "target": "/mnt/backup", "type": 1},
                {"name": "Photos", "source": "/home/me/pics", "target": "/mnt/backup", "mode": "differential"}
            ]"#,
        )
        .unwrap();

        let registry = JsonJobRegistry::new(&path);
        let jobs = registry.list_jobs().expect("list");
        assert_eq!(jobs.len(), 2);
        let photos = registry.get_job("photos").unwrap().expect("photos missing");
        assert_eq!(photos.mode, BackupMode::Differential);
    }

    #[test]
    fn test_json_registry_missing_file_is_empty() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let registry = JsonJobRegistry::new(temp_dir.path().join("jobs.json"));
        assert!(registry.list_jobs().unwrap().is_empty());
    }

    #[test]
    fn test_json_registry_rejects_malformed_file() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("jobs.json");
        fs::write(&path, "[{\"name\": 1}]").unwrap();
        let registry = JsonJobRegistry::new(&path);
        assert!(matches!(registry.list_jobs(), Err(EngineError::Serialization { .. })));
    }
}
