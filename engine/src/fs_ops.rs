//! Filesystem operations module.
//!
//! This module provides low-level operations for:
//! - Listing a directory (files first, then subdirectories)
//! - Pre-scanning a tree for eligible files (full or differential)
//! - Copying and rewriting files atomically with mtime preservation
//! - Locating the baseline output folder of a differential job

use chrono::{DateTime, Local, NaiveDateTime};
use filetime::FileTime;
use std::fs;
use std::io::{self, Write};
use std::path::{Path, PathBuf};
use std::time::SystemTime;
use uuid::Uuid;
use crate::error::EngineError;
use crate::model::name_key;

/// Immediate children of one directory, in directory-listing order.
#[derive(Debug, Default)]
pub struct DirListing {
    pub files: Vec<PathBuf>,
    pub subdirs: Vec<PathBuf>,
}

/// Number and total size of the files a run will copy.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ScanSummary {
    pub files: u64,
    pub bytes: u64,
}

/// List the immediate files and subdirectories of `dir`.
///
/// Symlinks are followed when classifying entries; entries whose metadata
/// cannot be read are skipped.
pub fn list_dir(dir: &Path) -> Result<DirListing, EngineError> {
    let entries = fs::read_dir(dir).map_err(|e| EngineError::EnumerationFailed {
        path: dir.to_path_buf(),
        source: e,
    })?;

    let mut listing = DirListing::default();
    for entry in entries {
        let entry = entry.map_err(|e| EngineError::EnumerationFailed {
            path: dir.to_path_buf(),
            source: e,
        })?;
        let path = entry.path();
        match fs::metadata(&path) {
            Ok(metadata) if metadata.is_dir() => listing.subdirs.push(path),
            Ok(_) => listing.files.push(path),
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "skipping unreadable entry");
            }
        }
    }
    Ok(listing)
}

fn modified(path: &Path) -> Option<SystemTime> {
    fs::metadata(path).and_then(|m| m.modified()).ok()
}

/// Differential policy: a file is changed if its baseline copy is missing or
/// strictly older than the source.
pub fn is_changed(source_file: &Path, baseline_file: &Path) -> bool {
    match (modified(source_file), modified(baseline_file)) {
        (_, None) => true,
        (Some(src), Some(base)) => src > base,
        // Unreadable source mtime: let the copy attempt surface the error
        (None, Some(_)) => true,
    }
}

/// Count the files a run would copy below `root`.
///
/// With a baseline, only changed files are counted; the baseline path of a
/// subdirectory mirrors its source-relative path. Subdirectories that cannot
/// be listed are skipped; the copy walk reports them.
pub fn scan_tree(root: &Path, baseline: Option<&Path>) -> Result<ScanSummary, EngineError> {
    let mut summary = ScanSummary::default();
    let mut pending: Vec<(PathBuf, Option<PathBuf>)> =
        vec![(root.to_path_buf(), baseline.map(Path::to_path_buf))];
    let mut is_root = true;

    while let Some((dir, base)) = pending.pop() {
        let listing = match list_dir(&dir) {
            Ok(listing) => listing,
            Err(e) if is_root => return Err(e),
            Err(e) => {
                tracing::warn!(error = %e, "pre-scan skipped a directory");
                continue;
            }
        };
        is_root = false;

        for file in &listing.files {
            let eligible = match (&base, file.file_name()) {
                (Some(base), Some(name)) => is_changed(file, &base.join(name)),
                _ => true,
            };
            if eligible {
                summary.files += 1;
                summary.bytes += fs::metadata(file).map(|m| m.len()).unwrap_or(0);
            }
        }
        for sub in listing.subdirs.into_iter().rev() {
            let sub_base = match (&base, sub.file_name()) {
                (Some(base), Some(name)) => Some(base.join(name)),
                _ => None,
            };
            pending.push((sub, sub_base));
        }
    }
    Ok(summary)
}

fn temp_sibling(path: &Path) -> PathBuf {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    path.with_file_name(format!(".{}.{}.partial", name, Uuid::new_v4().simple()))
}

/// Move a fully written temp file over `dst`, removing it on failure.
fn commit_temp(temp: &Path, dst: &Path) -> Result<(), EngineError> {
    fs::rename(temp, dst).map_err(|e| {
        let _ = fs::remove_file(temp);
        EngineError::WriteError {
            path: dst.to_path_buf(),
            source: e,
        }
    })
}

fn copy_into(src_file: &mut fs::File, src: &Path, temp: &Path, dst: &Path) -> Result<u64, EngineError> {
    let mut temp_file = fs::File::create(temp).map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;
    let bytes = io::copy(src_file, &mut temp_file).map_err(|e| {
        if e.kind() == io::ErrorKind::PermissionDenied {
            EngineError::WriteError {
                path: dst.to_path_buf(),
                source: e,
            }
        } else {
            EngineError::ReadError {
                path: src.to_path_buf(),
                source: e,
            }
        }
    })?;
    temp_file.sync_all().map_err(|e| EngineError::WriteError {
        path: dst.to_path_buf(),
        source: e,
    })?;
    Ok(bytes)
}

/// Copy a file from source to destination with metadata preservation.
///
/// The bytes are written to a hidden temp file next to `dst` and renamed into
/// place, so `dst` never exposes a partial copy. The source is opened
/// read-only and may be read concurrently by others.
///
/// # Returns
/// Number of bytes copied
pub fn copy_file_atomic(src: &Path, dst: &Path) -> Result<u64, EngineError> {
    ensure_parent_dir_exists(dst)?;

    let mut src_file = fs::File::open(src).map_err(|e| EngineError::ReadError {
        path: src.to_path_buf(),
        source: e,
    })?;
    let src_mtime = src_file
        .metadata()
        .and_then(|m| m.modified())
        .map_err(|e| EngineError::ReadError {
            path: src.to_path_buf(),
            source: e,
        })?;

    let temp = temp_sibling(dst);
    let copied = copy_into(&mut src_file, src, &temp, dst);

    let bytes = match copied {
        Ok(bytes) => bytes,
        Err(e) => {
            let _ = fs::remove_file(&temp);
            return Err(e);
        }
    };

    if let Err(e) = filetime::set_file_mtime(&temp, FileTime::from_system_time(src_mtime)) {
        tracing::debug!(path = %dst.display(), error = %e, "could not preserve mtime");
    }
    commit_temp(&temp, dst)?;
    Ok(bytes)
}

/// Replace the contents of `path` atomically.
///
/// When `mtime` is given it is applied to the new file before it becomes
/// visible.
pub fn write_atomic(path: &Path, contents: &[u8], mtime: Option<FileTime>) -> Result<(), EngineError> {
    ensure_parent_dir_exists(path)?;
    let temp = temp_sibling(path);
    let written = fs::File::create(&temp)
        .and_then(|mut file| {
            file.write_all(contents)?;
            file.sync_all()
        })
        .map_err(|e| EngineError::WriteError {
            path: path.to_path_buf(),
            source: e,
        });
    if let Err(e) = written {
        let _ = fs::remove_file(&temp);
        return Err(e);
    }
    if let Some(mtime) = mtime {
        let _ = filetime::set_file_mtime(&temp, mtime);
    }
    commit_temp(&temp, path)
}

/// Ensure the parent directory of a path exists, creating it if necessary.
pub fn ensure_parent_dir_exists(path: &Path) -> Result<(), EngineError> {
    match path.parent() {
        // Skip if parent is empty path (relative root)
        Some(parent) if !parent.as_os_str().is_empty() => ensure_dir(parent),
        _ => Ok(()),
    }
}

/// Ensure `dir` exists as a directory, creating it recursively.
pub fn ensure_dir(dir: &Path) -> Result<(), EngineError> {
    match fs::metadata(dir) {
        Ok(metadata) if metadata.is_dir() => Ok(()),
        Ok(_) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: io::Error::new(
                io::ErrorKind::InvalidInput,
                "Path exists but is not a directory",
            ),
        }),
        Err(e) if e.kind() == io::ErrorKind::NotFound => {
            fs::create_dir_all(dir).map_err(|e| EngineError::DirectoryCreationFailed {
                path: dir.to_path_buf(),
                source: e,
            })
        }
        Err(e) => Err(EngineError::DirectoryCreationFailed {
            path: dir.to_path_buf(),
            source: e,
        }),
    }
}

/// Timestamp suffix of an output folder name.
const FOLDER_STAMP: &str = "%d-%m-%Y_%H-%M-%S-%3f";

/// Prefix shared by every output folder of a job.
fn output_prefix(job_name: &str) -> String {
    format!("{}_", name_key(job_name))
}

/// Name of the output folder for a run of `job_name` started at `at`.
pub fn output_folder_name(job_name: &str, at: DateTime<Local>) -> String {
    format!("{}_{}", job_name, at.format(FOLDER_STAMP))
}

/// Pick a not-yet-existing output folder below `target`.
pub fn unique_output_dir(target: &Path, job_name: &str, at: DateTime<Local>) -> PathBuf {
    let base = output_folder_name(job_name, at);
    let mut candidate = target.join(&base);
    let mut n = 2;
    while candidate.exists() {
        candidate = target.join(format!("{}-{}", base, n));
        n += 1;
    }
    candidate
}

/// True if `stamp` is an output folder timestamp, with or without the
/// `-N` collision suffix of `unique_output_dir`.
fn is_folder_stamp(stamp: &str) -> bool {
    if NaiveDateTime::parse_from_str(stamp, FOLDER_STAMP).is_ok() {
        return true;
    }
    match stamp.rsplit_once('-') {
        Some((head, n)) if n.parse::<u32>().is_ok() => {
            NaiveDateTime::parse_from_str(head, FOLDER_STAMP).is_ok()
        }
        _ => false,
    }
}

/// Locate the baseline of a differential job: the *oldest* folder in
/// `target` whose name is `<job_name>_<timestamp>` (case-insensitive).
/// Folders of another job sharing the prefix (`Docs_Archive_...` for
/// `Docs`) are skipped because their remainder is not a timestamp.
///
/// Age is the folder's creation time, or its modification time where the
/// platform has no creation time; ties are broken by name.
pub fn find_baseline(target: &Path, job_name: &str) -> Option<PathBuf> {
    let prefix = output_prefix(job_name);
    let entries = fs::read_dir(target).ok()?;

    entries
        .filter_map(Result::ok)
        .filter(|entry| {
            let name = name_key(&entry.file_name().to_string_lossy());
            name.strip_prefix(&prefix).is_some_and(is_folder_stamp)
        })
        .filter_map(|entry| {
            let metadata = entry.metadata().ok()?;
            if !metadata.is_dir() {
                return None;
            }
            let age = metadata.created().or_else(|_| metadata.modified()).ok()?;
            Some((age, entry.path()))
        })
        .min()
        .map(|(_, path)| path)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    fn write(path: &Path, contents: &[u8]) {
        fs::create_dir_all(path.parent().expect("no parent")).expect("Failed to create parent");
        fs::write(path, contents).expect("Failed to write file");
    }

    fn set_mtime(path: &Path, secs: i64) {
        filetime::set_file_mtime(path, FileTime::from_unix_time(secs, 0)).expect("Failed to set mtime");
    }

    #[test]
    fn test_list_dir_separates_files_and_subdirs() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        write(&temp_dir.path().join("a.txt"), b"a");
        write(&temp_dir.path().join("b.txt"), b"b");
        write(&temp_dir.path().join("sub").join("c.txt"), b"c");

        let listing = list_dir(temp_dir.path()).expect("Failed to list");
        assert_eq!(listing.files.len(), 2);
        assert_eq!(listing.subdirs.len(), 1);
        assert!(listing.subdirs[0].ends_with("sub"));
    }

    #[test]
    fn test_list_nonexistent_dir_fails() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = list_dir(&temp_dir.path().join("nonexistent"));
        assert!(matches!(result, Err(EngineError::EnumerationFailed { .. })));
    }

    #[test]
    fn test_scan_tree_counts_nested_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        write(&src.join("file1.txt"), b"test data 1");
        write(&src.join("nested").join("deeper").join("file2.txt"), b"test data 2");

        let summary = scan_tree(&src, None).expect("Failed to scan");
        assert_eq!(summary, ScanSummary { files: 2, bytes: 22 });
    }

    #[test]
    fn test_scan_tree_with_baseline_counts_only_changed() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src");
        let base = temp_dir.path().join("base");

        write(&src.join("same.txt"), b"same");
        write(&base.join("same.txt"), b"same");
        set_mtime(&src.join("same.txt"), 1_000);
        set_mtime(&base.join("same.txt"), 1_000);

        write(&src.join("sub").join("newer.txt"), b"newer!");
        write(&base.join("sub").join("newer.txt"), b"old");
        set_mtime(&src.join("sub").join("newer.txt"), 2_000);
        set_mtime(&base.join("sub").join("newer.txt"), 1_000);

        write(&src.join("sub").join("added.txt"), b"added");

        let summary = scan_tree(&src, Some(&base)).expect("Failed to scan");
        assert_eq!(summary, ScanSummary { files: 2, bytes: 11 });
    }

    #[test]
    fn test_is_changed_requires_strictly_newer() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src = temp_dir.path().join("src.txt");
        let base = temp_dir.path().join("base.txt");
        write(&src, b"x");
        write(&base, b"x");

        set_mtime(&src, 5_000);
        set_mtime(&base, 5_000);
        assert!(!is_changed(&src, &base));

        set_mtime(&base, 6_000);
        assert!(!is_changed(&src, &base));

        set_mtime(&src, 7_000);
        assert!(is_changed(&src, &base));

        assert!(is_changed(&src, &temp_dir.path().join("missing.txt")));
    }

    #[test]
    fn test_copy_file_atomic_preserves_content_and_mtime() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let src_file = temp_dir.path().join("source.txt");
        let dst_file = temp_dir.path().join("out").join("nested").join("dest.txt");
        write(&src_file, b"test content");
        set_mtime(&src_file, 1_234_567);

        let bytes = copy_file_atomic(&src_file, &dst_file).expect("Failed to copy");
        assert_eq!(bytes, 12);
        assert_eq!(fs::read(&dst_file).expect("Failed to read dest"), b"test content");

        let mtime = FileTime::from_last_modification_time(&fs::metadata(&dst_file).unwrap());
        assert_eq!(mtime.unix_seconds(), 1_234_567);

        // No temp files left behind
        let leftovers: Vec<_> = fs::read_dir(dst_file.parent().unwrap())
            .unwrap()
            .filter_map(Result::ok)
            .filter(|e| e.file_name().to_string_lossy().ends_with(".partial"))
            .collect();
        assert!(leftovers.is_empty());
    }

    #[test]
    fn test_copy_missing_source_is_read_error() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let result = copy_file_atomic(
            &temp_dir.path().join("missing.txt"),
            &temp_dir.path().join("dst.txt"),
        );
        assert!(matches!(result, Err(EngineError::ReadError { .. })));
        assert!(!temp_dir.path().join("dst.txt").exists());
    }

    #[test]
    fn test_write_atomic_replaces_contents() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("state.json");
        write_atomic(&path, b"first", None).expect("first write");
        write_atomic(&path, b"second", Some(FileTime::from_unix_time(42, 0))).expect("second write");
        assert_eq!(fs::read(&path).unwrap(), b"second");
        let mtime = FileTime::from_last_modification_time(&fs::metadata(&path).unwrap());
        assert_eq!(mtime.unix_seconds(), 42);
    }

    #[test]
    fn test_ensure_parent_dir_exists() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let path = temp_dir.path().join("subdir").join("file.txt");

        ensure_parent_dir_exists(&path).expect("Failed to create parent");
        assert!(path.parent().unwrap().exists());
    }

    #[test]
    fn test_unique_output_dir_avoids_collisions() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let at = Local::now();
        let first = unique_output_dir(temp_dir.path(), "Docs", at);
        fs::create_dir(&first).unwrap();
        let second = unique_output_dir(temp_dir.path(), "Docs", at);
        assert_ne!(first, second);
        assert!(second
            .file_name()
            .unwrap()
            .to_string_lossy()
            .starts_with("Docs_"));
    }

    #[test]
    fn test_find_baseline_picks_oldest_prefix_match() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path();

        let oldest = target.join("Docs_01-01-2024_10-00-00-000");
        fs::create_dir(&oldest).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let newer = target.join("Docs_02-01-2024_10-00-00-000");
        fs::create_dir(&newer).unwrap();
        fs::create_dir(target.join("Photos_01-01-2024_09-00-00-000")).unwrap();
        write(&target.join("Docs_stray.txt"), b"not a folder");

        assert_eq!(find_baseline(target, "docs"), Some(oldest));
        assert_eq!(find_baseline(target, "DOCS"), find_baseline(target, "Docs"));
        assert_eq!(find_baseline(target, "Music"), None);
        assert_eq!(find_baseline(&target.join("missing"), "Docs"), None);
    }

    #[test]
    fn test_find_baseline_skips_other_jobs_sharing_prefix() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let target = temp_dir.path();

        let archive = target.join("Docs_Archive_01-01-2024_10-00-00-000");
        fs::create_dir(&archive).unwrap();
        std::thread::sleep(Duration::from_millis(20));
        let own = target.join("Docs_02-01-2024_10-00-00-000-2");
        fs::create_dir(&own).unwrap();

        assert_eq!(find_baseline(target, "Docs"), Some(own));
        assert_eq!(find_baseline(target, "Docs_Archive"), Some(archive));
    }
}
