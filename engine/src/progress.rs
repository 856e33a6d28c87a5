//! Persistent progress tracking.
//!
//! The `ProgressTracker` keeps one `ProgressState` per job (keyed
//! case-insensitively by job name) and rewrites the whole map to a single
//! JSON state file after every mutation. Consumers (CLI, GUI, monitoring)
//! poll it, either in-process through [`ProgressTracker::get`] or from
//! another process through [`ProgressTracker::read_store`].

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{name_key, ProgressState, ProgressStatus};
use parking_lot::Mutex;
use std::collections::BTreeMap;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

type StateMap = BTreeMap<String, ProgressState>;

fn key(job_name: &str) -> String {
    name_key(job_name)
}

/// Shared, file-backed progress store.
#[derive(Debug)]
pub struct ProgressTracker {
    path: PathBuf,
    states: Mutex<StateMap>,
}

impl ProgressTracker {
    /// Open the tracker, loading any snapshot left by a previous process.
    ///
    /// An unreadable or corrupt state file is logged and replaced on the next
    /// write.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let states = match Self::read_store(&path) {
            Ok(states) => states
                .into_values()
                .map(|state| (key(&state.job_name), state))
                .collect(),
            Err(e) => {
                tracing::warn!(error = %e, "ignoring unreadable progress state");
                StateMap::new()
            }
        };
        ProgressTracker {
            path,
            states: Mutex::new(states),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Read a state file without opening a tracker.
    ///
    /// A missing file is an empty store.
    pub fn read_store(path: &Path) -> Result<BTreeMap<String, ProgressState>, EngineError> {
        let content = match fs::read_to_string(path) {
            Ok(content) => content,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(BTreeMap::new()),
            Err(e) => {
                return Err(EngineError::ReadError {
                    path: path.to_path_buf(),
                    source: e,
                })
            }
        };
        if content.trim().is_empty() {
            return Ok(BTreeMap::new());
        }
        serde_json::from_str(&content).map_err(|e| EngineError::serialization(path, e))
    }

    /// Apply `mutate` to the job's state under the lock, persist, and return
    /// the new snapshot. A missing entry is created first.
    fn update(&self, job_name: &str, mutate: impl FnOnce(&mut ProgressState)) -> ProgressState {
        let mut states = self.states.lock();
        let state = states
            .entry(key(job_name))
            .or_insert_with(|| ProgressState::new(job_name));
        mutate(state);
        state.touch();
        let snapshot = state.clone();
        self.persist(&states);
        snapshot
    }

    fn persist(&self, states: &StateMap) {
        // On disk the map is keyed by the job's display name.
        let by_name: BTreeMap<&str, &ProgressState> = states
            .values()
            .map(|state| (state.job_name.as_str(), state))
            .collect();
        let result = serde_json::to_string_pretty(&by_name)
            .map_err(|e| EngineError::serialization(&self.path, e))
            .and_then(|json| fs_ops::write_atomic(&self.path, json.as_bytes(), None));
        if let Err(e) = result {
            tracing::warn!(error = %e, "failed to persist progress state");
        }
    }

    /// Start a new run: reset the job's entry to `Initializing`.
    pub fn initialize(&self, job_name: &str) -> ProgressState {
        self.update(job_name, |state| *state = ProgressState::new(job_name))
    }

    /// Publish the pre-scan totals with status `Preparing`.
    pub fn prepare(&self, job_name: &str, total_files: u64, total_bytes: u64) -> ProgressState {
        self.update(job_name, |state| {
            state.status = ProgressStatus::Preparing;
            state.total_files = total_files;
            state.total_bytes = total_bytes;
            state.files_copied = 0;
            state.bytes_copied = 0;
        })
    }

    pub fn set_status(&self, job_name: &str, status: ProgressStatus) -> ProgressState {
        self.update(job_name, |state| state.status = status)
    }

    /// Mark the file about to be copied.
    pub fn begin_file(&self, job_name: &str, source: &Path, target: &Path) -> ProgressState {
        self.update(job_name, |state| {
            state.status = ProgressStatus::InProgress;
            state.current_source = Some(source.to_path_buf());
            state.current_target = Some(target.to_path_buf());
        })
    }

    /// Count one successfully copied file.
    pub fn record_copied(&self, job_name: &str, bytes: u64) -> ProgressState {
        self.update(job_name, |state| {
            state.status = ProgressStatus::InProgress;
            state.files_copied += 1;
            state.bytes_copied += bytes;
        })
    }

    /// Record a per-file (or per-directory) failure.
    pub fn record_error(&self, job_name: &str, source: &Path, target: &Path) -> ProgressState {
        self.update(job_name, |state| {
            state.status = ProgressStatus::Error;
            state.current_source = Some(source.to_path_buf());
            state.current_target = Some(target.to_path_buf());
        })
    }

    /// Record the fatal error that ended a run.
    pub fn record_failure(&self, job_name: &str, message: &str) -> ProgressState {
        self.update(job_name, |state| {
            state.status = ProgressStatus::Error;
            state.last_error = Some(message.to_string());
        })
    }

    /// Close a run with a terminal status, clearing the current file.
    pub fn finish(&self, job_name: &str, status: ProgressStatus) -> ProgressState {
        self.update(job_name, |state| {
            state.status = status;
            state.current_source = None;
            state.current_target = None;
        })
    }

    /// Current snapshot of one job.
    pub fn get(&self, job_name: &str) -> Option<ProgressState> {
        self.states.lock().get(&key(job_name)).cloned()
    }

    /// Current snapshots of every tracked job, ordered by name.
    pub fn snapshot_all(&self) -> Vec<ProgressState> {
        self.states.lock().values().cloned().collect()
    }

    /// Remove a job's entry. Returns whether one existed.
    pub fn clear(&self, job_name: &str) -> bool {
        let mut states = self.states.lock();
        let removed = states.remove(&key(job_name)).is_some();
        if removed {
            self.persist(&states);
        }
        removed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_lifecycle_keeps_remaining_consistent() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let tracker = ProgressTracker::new(temp_dir.path().join("state.json"));

        let state = tracker.initialize("Docs");
        assert_eq!(state.status, ProgressStatus::Initializing);

        tracker.prepare("Docs", 3, 500);
        tracker.begin_file("Docs", Path::new("/s/a"), Path::new("/t/a"));
        let state = tracker.record_copied("Docs", 200);
        assert_eq!(state.files_copied, 1);
        assert_eq!(state.remaining_files, 2);
        assert_eq!(state.remaining_bytes, 300);

        let state = tracker.finish("Docs", ProgressStatus::Completed);
        assert_eq!(state.status, ProgressStatus::Completed);
        assert!(state.current_source.is_none());
    }

    #[test]
    fn test_lookup_is_case_insensitive() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let tracker = ProgressTracker::new(temp_dir.path().join("state.json"));
        tracker.initialize("Docs");
        tracker.prepare("DOCS", 1, 10);

        assert_eq!(tracker.snapshot_all().len(), 1);
        let state = tracker.get("docs").expect("state missing");
        assert_eq!(state.job_name, "Docs");
        assert_eq!(state.total_files, 1);
    }

    #[test]
    fn test_state_survives_reopen() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("nested").join("state.json");
        {
            let tracker = ProgressTracker::new(&path);
            tracker.initialize("Docs");
            tracker.prepare("Docs", 2, 20);
            tracker.record_copied("Docs", 10);
        }

        let on_disk = ProgressTracker::read_store(&path).expect("read store");
        assert_eq!(on_disk["Docs"].files_copied, 1);

        let reopened = ProgressTracker::new(&path);
        let state = reopened.get("docs").expect("state missing after reopen");
        assert_eq!(state.bytes_copied, 10);
        assert_eq!(state.remaining_bytes, 10);
    }

    #[test]
    fn test_clear_removes_entry() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("state.json");
        let tracker = ProgressTracker::new(&path);
        tracker.initialize("Docs");
        tracker.initialize("Photos");

        assert!(tracker.clear("docs"));
        assert!(!tracker.clear("docs"));
        assert!(tracker.get("Docs").is_none());
        assert_eq!(ProgressTracker::read_store(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_corrupt_state_file_starts_fresh() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("state.json");
        fs::write(&path, "{ not json").unwrap();

        let tracker = ProgressTracker::new(&path);
        assert!(tracker.snapshot_all().is_empty());
        tracker.initialize("Docs");
        assert_eq!(ProgressTracker::read_store(&path).unwrap().len(), 1);
    }

    #[test]
    fn test_concurrent_updates_are_not_lost() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let tracker = Arc::new(ProgressTracker::new(temp_dir.path().join("state.json")));
        tracker.initialize("Docs");
        tracker.prepare("Docs", 40, 40);

        let handles: Vec<_> = (0..4)
            .map(|_| {
                let tracker = tracker.clone();
                thread::spawn(move || {
                    for _ in 0..10 {
                        tracker.record_copied("Docs", 1);
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("updater panicked");
        }

        let state = tracker.get("Docs").unwrap();
        assert_eq!(state.files_copied, 40);
        assert_eq!(state.remaining_files, 0);
        let on_disk = ProgressTracker::read_store(tracker.path()).unwrap();
        assert_eq!(on_disk["Docs"].bytes_copied, 40);
    }
}
