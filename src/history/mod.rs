// History log: ordered board snapshots with retention

mod clock;
mod entry;
mod log;
mod retention;

pub use clock::{Clock, ManualClock, SystemClock};
pub use entry::{DisplayFormat, LogEntry};
pub use log::HistoryLog;
pub use retention::RetentionPolicy;

use thiserror::Error;


/// History log contract violations
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum HistoryError {
    #[error("timestamp {timestamp} is older than the latest entry ({latest})")]
    OutOfOrderTimestamp { timestamp: i64, latest: i64 },
    #[error("an entry already exists at timestamp {0}")]
    DuplicateTimestamp(i64),
    #[error("no entry at timestamp {0}")]
    NotFound(i64),
}
