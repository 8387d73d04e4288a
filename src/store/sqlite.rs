//! SQLite backend

use std::path::Path;

use chrono::{DateTime, SecondsFormat, Utc};
use parking_lot::Mutex;
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, OptionalExtension};

use super::{AlertStore, HistoryFilter, RetentionPolicy, StoreError};
use crate::alerts::AlertRecord;

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS alert_records (
    record_id            TEXT PRIMARY KEY,
    alert_id             TEXT NOT NULL,
    hostname             TEXT NOT NULL,
    monitor_kind         TEXT NOT NULL,
    sub_target           TEXT,
    source               TEXT NOT NULL,
    status               TEXT NOT NULL,
    first_breach_at      TEXT NOT NULL,
    triggered_at         TEXT,
    resolved_at          TEXT,
    consecutive_breaches INTEGER NOT NULL,
    last_value           REAL NOT NULL,
    threshold            REAL NOT NULL,
    recorded_at          TEXT NOT NULL,
    resolution           TEXT
);
CREATE INDEX IF NOT EXISTS idx_alert_records_recorded_at ON alert_records(recorded_at);
CREATE INDEX IF NOT EXISTS idx_alert_records_monitor_kind ON alert_records(monitor_kind);
";

const COLUMNS: &str = "record_id, alert_id, hostname, monitor_kind, sub_target, source, status, \
    first_breach_at, triggered_at, resolved_at, consecutive_breaches, last_value, threshold, \
    recorded_at, resolution";

/// Fixed-width RFC 3339 so text order equals time order
fn ts(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Nanos, true)
}

fn parse_ts(column: &str, raw: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(raw)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| StoreError::Corrupted(format!("{} `{}`: {}", column, raw, e)))
}

fn parse_field<T: std::str::FromStr<Err = String>>(column: &str, raw: &str) -> Result<T, StoreError> {
    raw.parse()
        .map_err(|e| StoreError::Corrupted(format!("{}: {}", column, e)))
}

/// Row as stored, before validation
struct Row {
    record_id: String,
    alert_id: String,
    hostname: String,
    monitor_kind: String,
    sub_target: Option<String>,
    source: String,
    status: String,
    first_breach_at: String,
    triggered_at: Option<String>,
    resolved_at: Option<String>,
    consecutive_breaches: i64,
    last_value: f64,
    threshold: f64,
    recorded_at: String,
    resolution: Option<String>,
}

impl Row {
    fn read(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            record_id: row.get(0)?,
            alert_id: row.get(1)?,
            hostname: row.get(2)?,
            monitor_kind: row.get(3)?,
            sub_target: row.get(4)?,
            source: row.get(5)?,
            status: row.get(6)?,
            first_breach_at: row.get(7)?,
            triggered_at: row.get(8)?,
            resolved_at: row.get(9)?,
            consecutive_breaches: row.get(10)?,
            last_value: row.get(11)?,
            threshold: row.get(12)?,
            recorded_at: row.get(13)?,
            resolution: row.get(14)?,
        })
    }

    fn into_record(self) -> Result<AlertRecord, StoreError> {
        Ok(AlertRecord {
            record_id: self.record_id,
            alert_id: self.alert_id,
            hostname: self.hostname,
            monitor_kind: parse_field("monitor_kind", &self.monitor_kind)?,
            sub_target: self.sub_target,
            source: parse_field("source", &self.source)?,
            status: parse_field("status", &self.status)?,
            first_breach_at: parse_ts("first_breach_at", &self.first_breach_at)?,
            triggered_at: self
                .triggered_at
                .as_deref()
                .map(|t| parse_ts("triggered_at", t))
                .transpose()?,
            resolved_at: self
                .resolved_at
                .as_deref()
                .map(|t| parse_ts("resolved_at", t))
                .transpose()?,
            consecutive_breaches: u32::try_from(self.consecutive_breaches).map_err(|_| {
                StoreError::Corrupted(format!(
                    "consecutive_breaches out of range: {}",
                    self.consecutive_breaches
                ))
            })?,
            last_value: self.last_value,
            threshold: self.threshold,
            recorded_at: parse_ts("recorded_at", &self.recorded_at)?,
            resolution: self
                .resolution
                .as_deref()
                .map(|r| parse_field("resolution", r))
                .transpose()?,
        })
    }
}

pub struct SqliteAlertStore {
    conn: Mutex<Connection>,
}

impl SqliteAlertStore {
    pub fn open(path: impl AsRef<Path>) -> Result<Self, StoreError> {
        let path = path.as_ref();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| StoreError::io(parent, e))?;
        }

        let conn = Connection::open(path)?;
        // journal_mode returns the resulting mode as a row
        let mode: String = conn.query_row("PRAGMA journal_mode = WAL", [], |row| row.get(0))?;
        // FULL syncs the WAL on every commit, so a saved record survives power loss
        conn.execute_batch("PRAGMA synchronous = FULL; PRAGMA busy_timeout = 5000;")?;
        tracing::debug!(path = %path.display(), journal_mode = %mode, "Opened SQLite alert store");

        Self::init(conn)
    }

    pub fn open_in_memory() -> Result<Self, StoreError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, StoreError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    pub fn count(&self) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let n: i64 = conn.query_row("SELECT COUNT(*) FROM alert_records", [], |row| row.get(0))?;
        Ok(n as usize)
    }
}

impl AlertStore for SqliteAlertStore {
    fn save(&self, record: &AlertRecord) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        tx.execute(
            &format!(
                "INSERT INTO alert_records ({}) \
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11, ?12, ?13, ?14, ?15)",
                COLUMNS
            ),
            params![
                record.record_id,
                record.alert_id,
                record.hostname,
                record.monitor_kind.as_str(),
                record.sub_target,
                record.source.as_str(),
                record.status.as_str(),
                ts(record.first_breach_at),
                record.triggered_at.map(ts),
                record.resolved_at.map(ts),
                i64::from(record.consecutive_breaches),
                record.last_value,
                record.threshold,
                ts(record.recorded_at),
                record.resolution.map(|r| r.as_str()),
            ],
        )?;

        tx.commit()?;
        Ok(())
    }

    fn list(&self, filter: &HistoryFilter) -> Result<Vec<AlertRecord>, StoreError> {
        let mut clauses = Vec::new();
        let mut values = Vec::new();

        if let Some(status) = filter.status {
            clauses.push("status = ?");
            values.push(Value::Text(status.as_str().to_string()));
        }
        if let Some(kind) = filter.monitor {
            clauses.push("monitor_kind = ?");
            values.push(Value::Text(kind.as_str().to_string()));
        }
        if let Some(since) = filter.since {
            clauses.push("recorded_at >= ?");
            values.push(Value::Text(ts(since)));
        }
        if let Some(until) = filter.until {
            clauses.push("recorded_at <= ?");
            values.push(Value::Text(ts(until)));
        }

        let mut sql = format!("SELECT {} FROM alert_records", COLUMNS);
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY recorded_at DESC, rowid DESC");
        if let Some(limit) = filter.limit {
            sql.push_str(" LIMIT ?");
            values.push(Value::Integer(i64::try_from(limit).unwrap_or(i64::MAX)));
        }

        let conn = self.conn.lock();
        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(values.iter()), Row::read)?
            .collect::<Result<Vec<_>, _>>()?;
        drop(stmt);
        drop(conn);

        rows.into_iter().map(Row::into_record).collect()
    }

    fn prune(&self, policy: &RetentionPolicy, now: DateTime<Utc>) -> Result<usize, StoreError> {
        let conn = self.conn.lock();
        let tx = conn.unchecked_transaction()?;

        let expired = tx.execute(
            "DELETE FROM alert_records WHERE recorded_at < ?1",
            params![ts(policy.cutoff(now))],
        )?;

        // Oldest record still inside the cap, if the cap is exceeded
        let boundary: Option<i64> = tx
            .query_row(
                "SELECT rowid FROM alert_records ORDER BY recorded_at DESC, rowid DESC LIMIT 1 OFFSET ?1",
                params![i64::try_from(policy.max_count).unwrap_or(i64::MAX)],
                |row| row.get(0),
            )
            .optional()?;

        let capped = match boundary {
            Some(_) => tx.execute(
                "DELETE FROM alert_records WHERE rowid NOT IN \
                 (SELECT rowid FROM alert_records ORDER BY recorded_at DESC, rowid DESC LIMIT ?1)",
                params![i64::try_from(policy.max_count).unwrap_or(i64::MAX)],
            )?,
            None => 0,
        };

        tx.commit()?;
        Ok(expired + capped)
    }

    fn flush(&self) -> Result<(), StoreError> {
        let conn = self.conn.lock();
        conn.execute_batch("PRAGMA wal_checkpoint(TRUNCATE);")?;
        Ok(())
    }

    fn backend(&self) -> &'static str {
        "sqlite"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::alerts::AlertStatus;
    use crate::monitors::MonitorKind;
    use crate::store::testing::*;

    #[test]
    fn test_round_trip() {
        let store = SqliteAlertStore::open_in_memory().unwrap();
        check_round_trip(&store);
    }

    #[test]
    fn test_prune_caps_history() {
        let store = SqliteAlertStore::open_in_memory().unwrap();
        check_prune_cap(&store);
        assert_eq!(store.count().unwrap(), 1000);
    }

    #[test]
    fn test_prune_by_age() {
        let store = SqliteAlertStore::open_in_memory().unwrap();
        check_prune_age(&store);
    }

    #[test]
    fn test_prune_age_then_cap() {
        let store = SqliteAlertStore::open_in_memory().unwrap();
        check_prune_age_then_cap(&store);
        assert_eq!(store.count().unwrap(), 1000);
    }

    #[test]
    fn test_on_disk_commits_are_fully_synced() {
        let dir = tempfile::tempdir().unwrap();
        let store = SqliteAlertStore::open(dir.path().join("alerts.db")).unwrap();
        let level: i64 = store
            .conn
            .lock()
            .query_row("PRAGMA synchronous", [], |row| row.get(0))
            .unwrap();
        // 2 = FULL
        assert_eq!(level, 2);
    }

    #[test]
    fn test_reopen_on_disk() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("history/alerts.db");
        let mut saved = record(MonitorKind::Disk, AlertStatus::Active, at(10));
        saved.sub_target = Some("/var".to_string());
        saved.last_value = 93.25;

        {
            let store = SqliteAlertStore::open(&path).unwrap();
            store.save(&saved).unwrap();
            store.flush().unwrap();
        }

        let store = SqliteAlertStore::open(&path).unwrap();
        assert_eq!(store.list(&HistoryFilter::all()).unwrap(), vec![saved]);
    }

    #[test]
    fn test_duplicate_record_rejected() {
        let store = SqliteAlertStore::open_in_memory().unwrap();
        let r = record(MonitorKind::Cpu, AlertStatus::Active, at(0));
        store.save(&r).unwrap();
        assert!(matches!(store.save(&r), Err(StoreError::Sqlite(_))));
        assert_eq!(store.count().unwrap(), 1);
    }

    #[test]
    fn test_timestamps_sort_as_text() {
        let early = at(0) + chrono::Duration::milliseconds(5);
        let late = at(0) + chrono::Duration::milliseconds(500);
        assert!(ts(early) < ts(late));
        assert_eq!(ts(early).len(), ts(late).len());
    }
}
