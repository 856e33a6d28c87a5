//! Durable, day-partitioned log of file transfers.
//!
//! Every attempted copy appends one `TransferRecord` to the file of the
//! record's local calendar day (`YYYY-MM-DD.json` or `YYYY-MM-DD.xml`). A day
//! file is rewritten wholesale on each append: read everything, add the
//! record, write back. Appends from concurrent jobs are serialized by a
//! single lock around that cycle. A day file that no longer decodes is
//! renamed aside and a fresh one started.

use crate::error::EngineError;
use crate::fs_ops;
use crate::model::{LogFormat, TransferRecord};
use chrono::NaiveDate;
use parking_lot::{Mutex, RwLock};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};

const XML_DECLARATION: &str = "<?xml version=\"1.0\" encoding=\"utf-8\"?>\n";

/// XML document shape of a day file.
#[derive(Debug, Default, Serialize, Deserialize)]
#[serde(rename = "LogEntries")]
struct LogEntries {
    #[serde(rename = "LogEntry", default)]
    entries: Vec<TransferRecord>,
}

/// Append-only transfer log rooted at a directory.
#[derive(Debug)]
pub struct TransferLogger {
    dir: PathBuf,
    format: RwLock<LogFormat>,
    append_lock: Mutex<()>,
}

impl TransferLogger {
    pub fn new(dir: impl Into<PathBuf>, format: LogFormat) -> Self {
        TransferLogger {
            dir: dir.into(),
            format: RwLock::new(format),
            append_lock: Mutex::new(()),
        }
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn format(&self) -> LogFormat {
        *self.format.read()
    }

    /// Switch the format used for subsequent appends.
    pub fn set_format(&self, format: LogFormat) {
        let _guard = self.append_lock.lock();
        *self.format.write() = format;
    }

    /// Path of the day file for `date` in the current format.
    pub fn day_file(&self, date: NaiveDate) -> PathBuf {
        self.day_file_in(date, self.format())
    }

    fn day_file_in(&self, date: NaiveDate, format: LogFormat) -> PathBuf {
        self.dir
            .join(format!("{}.{}", date.format("%Y-%m-%d"), format.extension()))
    }

    /// Append one record to its day file.
    pub fn append(&self, record: &TransferRecord) -> Result<(), EngineError> {
        let _guard = self.append_lock.lock();
        let format = self.format();
        let path = self.day_file_in(record.timestamp.date_naive(), format);

        let mut records = match read_records(&path, format) {
            Ok(records) => records,
            Err(EngineError::Serialization { message, .. }) => {
                let moved = set_aside(&path)?;
                tracing::warn!(
                    path = %path.display(),
                    moved_to = %moved.display(),
                    error = %message,
                    "Unreadable transfer log day file set aside"
                );
                Vec::new()
            }
            Err(e) => return Err(e),
        };
        records.push(record.clone());
        let encoded = encode(&path, format, records)?;
        fs_ops::write_atomic(&path, encoded.as_bytes(), None)
    }

    /// All records logged on `date` in the current format.
    pub fn read_day(&self, date: NaiveDate) -> Result<Vec<TransferRecord>, EngineError> {
        let _guard = self.append_lock.lock();
        let format = self.format();
        read_records(&self.day_file_in(date, format), format)
    }
}

/// Rename an undecodable day file to `<day file>.corrupt-<uuid>`.
fn set_aside(path: &Path) -> Result<PathBuf, EngineError> {
    let mut name = path.as_os_str().to_owned();
    name.push(format!(".corrupt-{}", uuid::Uuid::new_v4()));
    let target = PathBuf::from(name);
    fs::rename(path, &target).map_err(|e| EngineError::WriteError {
        path: target.clone(),
        source: e,
    })?;
    Ok(target)
}

fn read_records(path: &Path, format: LogFormat) -> Result<Vec<TransferRecord>, EngineError> {
    let content = match fs::read_to_string(path) {
        Ok(content) => content,
        Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
        Err(e) => {
            return Err(EngineError::ReadError {
                path: path.to_path_buf(),
                source: e,
            })
        }
    };
    if content.trim().is_empty() {
        return Ok(Vec::new());
    }
    match format {
        LogFormat::Json => {
            serde_json::from_str(&content).map_err(|e| EngineError::serialization(path, e))
        }
        LogFormat::Xml => quick_xml::de::from_str::<LogEntries>(&content)
            .map(|doc| doc.entries)
            .map_err(|e| EngineError::serialization(path, e)),
    }
}

fn encode(path: &Path, format: LogFormat, entries: Vec<TransferRecord>) -> Result<String, EngineError> {
    match format {
        LogFormat::Json => {
            serde_json::to_string_pretty(&entries).map_err(|e| EngineError::serialization(path, e))
        }
        LogFormat::Xml => {
            let mut out = String::from(XML_DECLARATION);
            let mut serializer = quick_xml::se::Serializer::new(&mut out);
            serializer.indent(' ', 2);
            LogEntries { entries }
                .serialize(serializer)
                .map_err(|e| EngineError::serialization(path, e))?;
            out.push('\n');
            Ok(out)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{EncryptionStatus, TransferStatus};
    use chrono::Local;
    use std::sync::Arc;
    use std::thread;

    fn record(job: &str, file: &str, transfer_ms: f64, encryption_ms: f64) -> TransferRecord {
        TransferRecord::new(
            job,
            &PathBuf::from("/src").join(file),
            &PathBuf::from("/dst").join(file),
            42,
            transfer_ms,
            encryption_ms,
        )
    }

    #[test]
    fn test_json_append_keeps_order() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let logger = TransferLogger::new(temp_dir.path(), LogFormat::Json);

        logger.append(&record("Docs", "a.txt", 1.0, 0.0)).expect("append a");
        logger.append(&record("Docs", "b.txt", -1.0, 0.0)).expect("append b");

        let today = Local::now().date_naive();
        let path = logger.day_file(today);
        assert!(path.to_string_lossy().ends_with(".json"));

        let records = logger.read_day(today).expect("read");
        assert_eq!(records.len(), 2);
        assert!(records[0].source_path.ends_with("a.txt"));
        assert_eq!(records[1].status, TransferStatus::Failed);

        // The day file is a plain JSON array
        let raw: serde_json::Value =
            serde_json::from_str(&fs::read_to_string(path).unwrap()).unwrap();
        assert_eq!(raw.as_array().map(Vec::len), Some(2));
    }

    #[test]
    fn test_xml_format_round_trips_labels() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let logger = TransferLogger::new(temp_dir.path(), LogFormat::Xml);

        logger.append(&record("Docs", "a.txt", 3.5, 1.25)).expect("append a");
        logger.append(&record("Docs", "b.png", 2.0, -1.0)).expect("append b");

        let today = Local::now().date_naive();
        let content = fs::read_to_string(logger.day_file(today)).expect("read xml");
        assert!(content.starts_with("<?xml"));
        assert!(content.contains("<LogEntries>"));
        assert!(content.contains("ENCRYPTION_FAILED"));

        let records = logger.read_day(today).expect("parse xml");
        assert_eq!(records.len(), 2);
        assert_eq!(records[0].encryption_status, EncryptionStatus::Encrypted);
        assert_eq!(records[0].file_size, 42);
        assert_eq!(records[1].encryption_status, EncryptionStatus::EncryptionFailed);
    }

    #[test]
    fn test_switching_format_uses_separate_day_files() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let logger = TransferLogger::new(temp_dir.path(), LogFormat::Json);
        logger.append(&record("Docs", "a.txt", 1.0, 0.0)).expect("json append");

        logger.set_format(LogFormat::Xml);
        logger.append(&record("Docs", "b.txt", 1.0, 0.0)).expect("xml append");

        let today = Local::now().date_naive();
        assert_eq!(logger.read_day(today).unwrap().len(), 1);
        assert!(temp_dir
            .path()
            .join(format!("{}.json", today.format("%Y-%m-%d")))
            .exists());
    }

    #[test]
    fn test_concurrent_appends_lose_nothing() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let logger = Arc::new(TransferLogger::new(temp_dir.path(), LogFormat::Json));

        let handles: Vec<_> = (0..4)
            .map(|worker| {
                let logger = logger.clone();
                thread::spawn(move || {
                    for i in 0..10 {
                        let name = format!("w{}-{}.txt", worker, i);
                        logger.append(&record("Docs", &name, 1.0, 0.0)).expect("append");
                    }
                })
            })
            .collect();
        for handle in handles {
            handle.join().expect("appender panicked");
        }

        let records = logger.read_day(Local::now().date_naive()).expect("read");
        assert_eq!(records.len(), 40);
    }

    #[test]
    fn test_corrupt_day_file_is_set_aside() {
        let temp_dir = tempfile::tempdir().expect("Failed to create temp dir");
        let logger = TransferLogger::new(temp_dir.path(), LogFormat::Json);
        let today = Local::now().date_naive();
        fs::write(logger.day_file(today), "[{\"truncated").unwrap();

        assert!(matches!(
            logger.read_day(today),
            Err(EngineError::Serialization { .. })
        ));

        for i in 0..5 {
            let name = format!("f{}.txt", i);
            logger.append(&record("Docs", &name, 1.0, 0.0)).expect("append");
        }

        let records = logger.read_day(today).expect("fresh day file");
        assert_eq!(records.len(), 5);

        let moved: Vec<_> = fs::read_dir(temp_dir.path())
            .unwrap()
            .filter_map(|e| e.ok())
            .filter(|e| e.file_name().to_string_lossy().contains(".corrupt-"))
            .collect();
        assert_eq!(moved.len(), 1);
        assert_eq!(
            fs::read_to_string(moved[0].path()).unwrap(),
            "[{\"truncated"
        );
    }
}
