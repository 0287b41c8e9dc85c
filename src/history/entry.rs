use crate::board::Snapshot;
use chrono::format::{Item, StrftimeItems};
use chrono::{DateTime, FixedOffset};
use serde::{Deserialize, Serialize};

/// Immutable history record: the board as it became current at `timestamp`.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct LogEntry {
    /// Unix epoch milliseconds, unique within the log
    pub timestamp: i64,

    /// Full copy of the board at that instant
    pub snapshot: Snapshot,

    /// `timestamp` rendered in the board's display timezone
    pub display_time: String,
}

impl LogEntry {
    pub fn new(timestamp: i64, snapshot: Snapshot, format: &DisplayFormat) -> Self {
        Self {
            timestamp,
            snapshot,
            display_time: format.render(timestamp),
        }
    }
}

/// Renders epoch millis in a fixed UTC offset and strftime pattern.
#[derive(Clone, Debug)]
pub struct DisplayFormat {
    offset: FixedOffset,
    pattern: String,
}

impl DisplayFormat {
    /// Returns `None` if the offset is out of range or the pattern has
    /// unknown specifiers.
    pub fn new(utc_offset_minutes: i32, pattern: &str) -> Option<Self> {
        let offset = FixedOffset::east_opt(utc_offset_minutes.checked_mul(60)?)?;
        if StrftimeItems::new(pattern).any(|item| matches!(item, Item::Error)) {
            return None;
        }
        Some(Self {
            offset,
            pattern: pattern.to_string(),
        })
    }

    pub fn render(&self, timestamp_millis: i64) -> String {
        match DateTime::from_timestamp_millis(timestamp_millis) {
            Some(utc) => utc
                .with_timezone(&self.offset)
                .format(&self.pattern)
                .to_string(),
            None => timestamp_millis.to_string(),
        }
    }
}

impl Default for DisplayFormat {
    /// UTC+8, `2026/03/01 14:05:09`
    fn default() -> Self {
        Self {
            offset: FixedOffset::east_opt(8 * 3600).expect("UTC+8 is in range"),
            pattern: "%Y/%m/%d %H:%M:%S".to_string(),
        }
    }
}
