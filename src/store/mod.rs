//! Alert history persistence
//!
//! Every fire and resolve event is appended as an [`AlertRecord`]. Two
//! backends are available: a single JSON document on disk and a SQLite
//! database. Both are synchronous; async callers go through
//! `spawn_blocking`.

pub mod file;
pub mod queue;
pub mod sqlite;

pub use file::FileAlertStore;
pub use queue::PersistQueue;
pub use sqlite::SqliteAlertStore;

use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;

use chrono::{DateTime, Utc};

use crate::alerts::{AlertRecord, AlertStatus};
use crate::config::{PruningConfig, StorageConfig, StorageKind};
use crate::monitors::MonitorKind;

/// Storage backend for alert history
pub trait AlertStore: Send + Sync {
    /// Append one record
    fn save(&self, record: &AlertRecord) -> Result<(), StoreError>;

    /// Records matching `filter`, most recent first
    fn list(&self, filter: &HistoryFilter) -> Result<Vec<AlertRecord>, StoreError>;

    /// Apply a retention policy, returning the number of records removed
    fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError>;

    /// Make sure everything written so far is durable
    fn flush(&self) -> Result<(), StoreError>;

    fn backend(&self) -> &'static str;
}

/// History query
#[derive(Debug, Clone, Default, PartialEq)]
pub struct HistoryFilter {
    pub status: Option<AlertStatus>,
    pub monitor: Option<MonitorKind>,
    pub since: Option<DateTime<Utc>>,
    pub until: Option<DateTime<Utc>>,
    pub limit: Option<usize>,
}

impl HistoryFilter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn with_status(mut self, status: AlertStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_monitor(mut self, kind: MonitorKind) -> Self {
        self.monitor = Some(kind);
        self
    }

    pub fn since(mut self, since: DateTime<Utc>) -> Self {
        self.since = Some(since);
        self
    }

    pub fn until(mut self, until: DateTime<Utc>) -> Self {
        self.until = Some(until);
        self
    }

    pub fn limit(mut self, limit: usize) -> Self {
        self.limit = Some(limit);
        self
    }

    /// Whether a record passes every set criterion (limit excluded)
    pub fn matches(&self, record: &AlertRecord) -> bool {
        self.status.map_or(true, |s| record.status == s)
            && self.monitor.map_or(true, |k| record.monitor_kind == k)
            && self.since.map_or(true, |t| record.recorded_at >= t)
            && self.until.map_or(true, |t| record.recorded_at <= t)
    }
}

/// `now` minus `hours`, or `None` when `hours` is not positive or the
/// result falls outside the representable range
pub fn hours_ago(now: DateTime<Utc>, hours: i64) -> Option<DateTime<Utc>> {
    if hours <= 0 {
        return None;
    }
    chrono::Duration::try_hours(hours).and_then(|d| now.checked_sub_signed(d))
}

/// How much history to keep
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct RetentionPolicy {
    /// Records older than this are removed first
    pub max_age: chrono::Duration,
    /// Then only this many of the most recent records are kept
    pub max_count: usize,
}

impl RetentionPolicy {
    pub fn cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now.checked_sub_signed(self.max_age)
            .unwrap_or(DateTime::<Utc>::MIN_UTC)
    }
}

impl From<&PruningConfig> for RetentionPolicy {
    fn from(config: &PruningConfig) -> Self {
        Self {
            max_age: chrono::Duration::days(i64::from(config.max_age_days)),
            max_count: config.max_alerts,
        }
    }
}

#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    #[error("IO error on {}: {source}", .path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("SQLite error: {0}")]
    Sqlite(#[from] rusqlite::Error),

    #[error("Corrupted store: {0}")]
    Corrupted(String),

    #[error("Unsupported history format version {0}")]
    UnsupportedVersion(u32),

    #[error("Store worker failed: {0}")]
    Worker(String),
}

impl StoreError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        StoreError::Io {
            path: path.into(),
            source,
        }
    }
}

/// Open the backend selected in configuration
pub fn open_store(config: &StorageConfig) -> Result<Arc<dyn AlertStore>, StoreError> {
    let store: Arc<dyn AlertStore> = match config.kind {
        StorageKind::File => Arc::new(FileAlertStore::open(&config.path)?),
        StorageKind::Sqlite => Arc::new(SqliteAlertStore::open(&config.path)?),
    };

    tracing::info!(
        backend = store.backend(),
        path = %config.path.display(),
        "Alert store opened"
    );
    Ok(store)
}

/// Alerts whose most recent record is a fire, i.e. still ACTIVE.
///
/// `records` must be ordered most recent first, as returned by
/// [`AlertStore::list`].
pub fn latest_active(records: &[AlertRecord]) -> Vec<AlertRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|r| seen.insert(r.key()))
        .filter(|r| r.status == AlertStatus::Active)
        .cloned()
        .collect()
}

/// Newest-first ordering shared by the backends
pub(crate) fn sort_newest_first(records: &mut [AlertRecord]) {
    records.sort_by(|a, b| b.recorded_at.cmp(&a.recorded_at));
}

#[cfg(test)]
pub(crate) mod testing {
    use chrono::TimeZone;

    use super::*;
    use crate::alerts::{AlertSource, ResolveReason};

    pub fn at(secs: i64) -> DateTime<Utc> {
        Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap()
    }

    pub fn record(kind: MonitorKind, status: AlertStatus, recorded_at: DateTime<Utc>) -> AlertRecord {
        AlertRecord {
            record_id: uuid::Uuid::new_v4().to_string(),
            alert_id: uuid::Uuid::new_v4().to_string(),
            hostname: "test-host".to_string(),
            monitor_kind: kind,
            sub_target: None,
            source: AlertSource::Threshold,
            status,
            first_breach_at: recorded_at,
            triggered_at: Some(recorded_at),
            resolved_at: (status == AlertStatus::Resolved).then_some(recorded_at),
            consecutive_breaches: 3,
            last_value: 91.5,
            threshold: 80.0,
            recorded_at,
            resolution: (status == AlertStatus::Resolved).then_some(ResolveReason::Recovered),
        }
    }

    /// Exercise a backend through the trait
    pub fn check_round_trip(store: &dyn AlertStore) {
        let fired = record(MonitorKind::Cpu, AlertStatus::Active, at(0));
        let mut disk = record(MonitorKind::Disk, AlertStatus::Active, at(60));
        disk.sub_target = Some("/data".to_string());
        let mut resolved = fired.clone();
        resolved.record_id = uuid::Uuid::new_v4().to_string();
        resolved.status = AlertStatus::Resolved;
        resolved.resolved_at = Some(at(120));
        resolved.recorded_at = at(120);
        resolved.resolution = Some(ResolveReason::TimedOut);

        store.save(&fired).unwrap();
        store.save(&disk).unwrap();
        store.save(&resolved).unwrap();

        let all = store.list(&HistoryFilter::all()).unwrap();
        assert_eq!(all, vec![resolved.clone(), disk.clone(), fired.clone()]);

        let cpu = store
            .list(&HistoryFilter::all().with_monitor(MonitorKind::Cpu))
            .unwrap();
        assert_eq!(cpu.len(), 2);

        let active = store
            .list(&HistoryFilter::all().with_status(AlertStatus::Active))
            .unwrap();
        assert_eq!(active, vec![disk.clone(), fired.clone()]);

        let window = store
            .list(&HistoryFilter::all().since(at(30)).until(at(90)))
            .unwrap();
        assert_eq!(window, vec![disk.clone()]);

        let limited = store.list(&HistoryFilter::all().limit(1)).unwrap();
        assert_eq!(limited, vec![resolved]);

        assert_eq!(latest_active(&all), vec![disk]);
    }

    /// 1500 records inside the age window, capped to 1000
    pub fn check_prune_cap(store: &dyn AlertStore) {
        for i in 0..1500 {
            store
                .save(&record(MonitorKind::Memory, AlertStatus::Active, at(i)))
                .unwrap();
        }

        let policy = RetentionPolicy {
            max_age: chrono::Duration::days(30),
            max_count: 1000,
        };
        let removed = store.prune(&policy, at(1500)).unwrap();
        assert_eq!(removed, 500);

        let remaining = store.list(&HistoryFilter::all()).unwrap();
        assert_eq!(remaining.len(), 1000);
        assert_eq!(remaining[0].recorded_at, at(1499));
        assert_eq!(remaining[999].recorded_at, at(500));
    }

    /// Old records and an over-cap remainder in one pass, nothing counted twice
    pub fn check_prune_age_then_cap(store: &dyn AlertStore) {
        let now = at(40 * 86_400);
        let recent = now - chrono::Duration::days(1);
        for i in 0..300 {
            store
                .save(&record(MonitorKind::Disk, AlertStatus::Resolved, at(i)))
                .unwrap();
        }
        for i in 0..1200 {
            store
                .save(&record(MonitorKind::Cpu, AlertStatus::Active, recent + chrono::Duration::seconds(i)))
                .unwrap();
        }

        let policy = RetentionPolicy {
            max_age: chrono::Duration::days(30),
            max_count: 1000,
        };
        assert_eq!(store.prune(&policy, now).unwrap(), 500);

        let remaining = store.list(&HistoryFilter::all()).unwrap();
        assert_eq!(remaining.len(), 1000);
        assert!(remaining.iter().all(|r| r.monitor_kind == MonitorKind::Cpu));
        assert_eq!(remaining[0].recorded_at, recent + chrono::Duration::seconds(1199));
        assert_eq!(remaining[999].recorded_at, recent + chrono::Duration::seconds(200));
        assert_eq!(store.prune(&policy, now).unwrap(), 0);
    }

    pub fn check_prune_age(store: &dyn AlertStore) {
        let now = at(40 * 86_400);
        store
            .save(&record(MonitorKind::Cpu, AlertStatus::Active, at(0)))
            .unwrap();
        store
            .save(&record(MonitorKind::Cpu, AlertStatus::Resolved, now - chrono::Duration::days(1)))
            .unwrap();

        let policy = RetentionPolicy {
            max_age: chrono::Duration::days(30),
            max_count: 1000,
        };
        assert_eq!(store.prune(&policy, now).unwrap(), 1);
        assert_eq!(store.list(&HistoryFilter::all()).unwrap().len(), 1);
        assert_eq!(store.prune(&policy, now).unwrap(), 0);
    }
}
