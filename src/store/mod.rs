// Durable backing for the history log

mod sqlite;

pub use sqlite::SqliteLogStore;

use crate::history::LogEntry;
use thiserror::Error;

/// Row identifier assigned by the store
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct EntryId(pub i64);

/// Which entries a delete applies to, by timestamp
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum TimestampPredicate {
    Before(i64),
    AtOrBefore(i64),
    After(i64),
    AtOrAfter(i64),
}

/// Errors surfaced by a [`LogStore`]
#[derive(Debug, Error)]
pub enum StoreError {
    #[error("an entry already exists at timestamp {0}")]
    DuplicateTimestamp(i64),
    #[error("timestamp {timestamp} is older than the latest stored entry ({latest})")]
    OutOfOrderTimestamp { timestamp: i64, latest: i64 },
    #[error("corrupt history row at timestamp {timestamp}: {reason}")]
    Corrupt { timestamp: i64, reason: String },
    #[error("sqlite error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("store unavailable: {0}")]
    Unavailable(String),
}

/// Append/query/delete interface over durable storage.
///
/// Implementations are blocking; callers on the async side run them on the
/// blocking pool.
pub trait LogStore: Send + Sync {
    /// Persist one entry. The timestamp must be unique and not older than any
    /// stored entry.
    fn append(&self, entry: &LogEntry) -> Result<EntryId, StoreError>;

    /// Every stored entry, ascending by timestamp.
    fn query_all_ordered_by_timestamp(&self) -> Result<Vec<LogEntry>, StoreError>;

    /// Delete matching entries. Returns the number of rows removed.
    fn delete_where(&self, predicate: TimestampPredicate) -> Result<usize, StoreError>;
}
