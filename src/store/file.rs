//! JSON document backend
//!
//! The whole history lives in one file, loaded at open and rewritten on every
//! change through a temporary file that is synced and renamed over the
//! original.

use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use super::{sort_newest_first, AlertStore, HistoryFilter, RetentionPolicy, StoreError};
use crate::alerts::AlertRecord;

const FORMAT_VERSION: u32 = 1;

#[derive(Debug, Serialize, Deserialize)]
struct Document {
    version: u32,
    records: Vec<AlertRecord>,
}

#[derive(Debug, Serialize)]
struct DocumentRef<'a> {
    version: u32,
    records: &'a [AlertRecord],
}

pub struct FileAlertStore {
    path: PathBuf,
    /// Records in insertion order
    records: Mutex<Vec<AlertRecord>>,
}

impl FileAlertStore {
    /// Open or create the history file at `path`
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref().to_path_buf();

        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let records = match fs::read(&path) {
            Ok(bytes) if bytes.iter().all(u8::is_ascii_whitespace) => Vec::new(),
            Ok(bytes) => {
                let document: Document = serde_json::from_slice(&bytes).map_err(|e| {
                    StoreError::Corrupted(format!("{}: {}", path.display(), e))
                })?;
                if document.version != FORMAT_VERSION {
                    return Err(StoreError::UnsupportedVersion(document.version));
                }
                document.records
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(StoreError::io(&path, e)),
        };

        tracing::debug!(
            path = %path.display(),
            records = records.len(),
            "Loaded alert history"
        );

        Ok(Self {
            path,
            records: Mutex::new(records),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self
            .path
            .file_name()
            .map(|n| n.to_os_string())
            .unwrap_or_else(|| "alerts.json".into());
        name.push(".tmp");
        self.path.with_file_name(name)
    }

    /// Atomically replace the file with `records`
    fn write(&self, records: &[AlertRecord]) -> Result<(), StoreError> {
        let json = serde_json::to_vec_pretty(&DocumentRef {
            version: FORMAT_VERSION,
            records,
        })?;

        let tmp = self.tmp_path();
        let result = File::create(&tmp)
            .and_then(|mut file| {
                file.write_all(&json)?;
                file.sync_all()
            })
            .and_then(|_| fs::rename(&tmp, &self.path));

        if let Err(e) = result {
            let _ = fs::remove_file(&tmp);
            return Err(StoreError::io(&self.path, e));
        }
        Ok(())
    }
}

impl AlertStore for FileAlertStore {
    fn save(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let mut records = self.records.lock();
        records.push(record.clone());

        if let Err(e) = self.write(&records) {
            // Memory mirrors the file
            records.pop();
            return Err(e);
        }
        Ok(())
    }

    fn list(&self, filter: &HistoryFilter) -> Result<Vec<AlertRecord>, StoreError> {
        let records = self.records.lock();

        // Reverse insertion order first so ties keep the later write in front
        let mut matched: Vec<AlertRecord> = records
            .iter()
            .rev()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect();
        drop(records);

        sort_newest_first(&mut matched);
        if let Some(limit) = filter.limit {
            matched.truncate(limit);
        }
        Ok(matched)
    }

    fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let mut records = self.records.lock();
        let before = records.len();
        let cutoff = policy.cutoff(now);

        let mut kept: Vec<AlertRecord> = records
            .iter()
            .rev()
            .filter(|r| r.recorded_at >= cutoff)
            .cloned()
            .collect();
        sort_newest_first(&mut kept);
        kept.truncate(policy.max_count);
        kept.reverse();

        let removed = before - kept.len();
        if removed == 0 {
            return Ok(0);
        }

        self.write(&kept)?;
        *records = kept;
        Ok(removed)
    }

    fn flush(&self) -> Result<(), StoreError> {
        // Every write is already synced; this only guarantees the file exists
        let records = self.records.lock();
        if self.path.exists() {
            return Ok(());
        }
        self.write(&records)
    }

    fn backend(&self) -> &'static str {
        "file"
    }
}
