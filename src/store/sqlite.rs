//! History log persistence using SQLite.
//!
//! One row per log entry; the snapshot is stored as JSON. `timestamp` carries
//! a UNIQUE constraint so the store enforces the log's natural key.

use super::{EntryId, LogStore, StoreError, TimestampPredicate};
use crate::history::LogEntry;
use rusqlite::{params, Connection, ErrorCode};
use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

/// SQLite-backed [`LogStore`].
///
/// # Schema
/// ```sql
/// CREATE TABLE history_entries (
///     id           INTEGER PRIMARY KEY AUTOINCREMENT,
///     timestamp    INTEGER NOT NULL UNIQUE,  -- epoch millis
///     snapshot     TEXT NOT NULL,            -- JSON object bed -> status
///     display_time TEXT NOT NULL
/// );
/// ```
pub struct SqliteLogStore {
    conn: Mutex<Connection>,
}

impl SqliteLogStore {
    /// Opens (or creates) the database and ensures the table exists.
    /// `":memory:"` gives a private in-memory database.
    pub fn open<P: AsRef<Path>>(db_path: P) -> Result<Self, StoreError> {
        let conn = Connection::open(db_path)?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS history_entries (
                id           INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp    INTEGER NOT NULL UNIQUE,
                snapshot     TEXT NOT NULL,
                display_time TEXT NOT NULL
            );",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn conn(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl LogStore for SqliteLogStore {
    fn append(&self, entry: &LogEntry) -> Result<EntryId, StoreError> {
        let snapshot = serde_json::to_string(&entry.snapshot).map_err(|e| StoreError::Corrupt {
            timestamp: entry.timestamp,
            reason: e.to_string(),
        })?;

        let mut conn = self.conn();
        let tx = conn.transaction()?;

        let latest: Option<i64> =
            tx.query_row("SELECT MAX(timestamp) FROM history_entries", [], |row| row.get(0))?;
        if let Some(latest) = latest {
            if entry.timestamp < latest {
                return Err(StoreError::OutOfOrderTimestamp {
                    timestamp: entry.timestamp,
                    latest,
                });
            }
        }

        let inserted = tx.execute(
            "INSERT INTO history_entries (timestamp, snapshot, display_time) VALUES (?1, ?2, ?3)",
            params![entry.timestamp, snapshot, entry.display_time],
        );
        match inserted {
            Ok(_) => {}
            Err(rusqlite::Error::SqliteFailure(e, _)) if e.code == ErrorCode::ConstraintViolation => {
                return Err(StoreError::DuplicateTimestamp(entry.timestamp));
            }
            Err(e) => return Err(e.into()),
        }

        let id = tx.last_insert_rowid();
        tx.commit()?;
        Ok(EntryId(id))
    }

    fn query_all_ordered_by_timestamp(&self) -> Result<Vec<LogEntry>, StoreError> {
        let conn = self.conn();
        let mut stmt = conn.prepare(
            "SELECT timestamp, snapshot, display_time FROM history_entries ORDER BY timestamp ASC",
        )?;
        let rows = stmt.query_map([], |row| {
            let timestamp: i64 = row.get(0)?;
            let snapshot: String = row.get(1)?;
            let display_time: String = row.get(2)?;
            Ok((timestamp, snapshot, display_time))
        })?;

        let mut entries = Vec::new();
        for row in rows {
            let (timestamp, snapshot, display_time) = row?;
            let snapshot = serde_json::from_str(&snapshot).map_err(|e| StoreError::Corrupt {
                timestamp,
                reason: e.to_string(),
            })?;
            entries.push(LogEntry {
                timestamp,
                snapshot,
                display_time,
            });
        }
        Ok(entries)
    }

    fn delete_where(&self, predicate: TimestampPredicate) -> Result<usize, StoreError> {
        let (sql, ts) = match predicate {
            TimestampPredicate::Before(ts) => ("DELETE FROM history_entries WHERE timestamp < ?1", ts),
            TimestampPredicate::AtOrBefore(ts) => {
                ("DELETE FROM history_entries WHERE timestamp <= ?1", ts)
            }
            TimestampPredicate::After(ts) => ("DELETE FROM history_entries WHERE timestamp > ?1", ts),
            TimestampPredicate::AtOrAfter(ts) => {
                ("DELETE FROM history_entries WHERE timestamp >= ?1", ts)
            }
        };
        let removed = self.conn().execute(sql, params![ts])?;
        Ok(removed)
    }
}
