use super::{Clock, DisplayFormat, HistoryError, LogEntry, RetentionPolicy};
use crate::board::Snapshot;
use std::collections::VecDeque;
use std::sync::Arc;
use tracing::debug;

/// Append-only, timestamp-ordered sequence of board snapshots.
///
/// Entries are only ever added at the tail and removed by retention (oldest
/// first), undo (newest) or revert (everything after a target). Timestamps
/// are strictly increasing, which makes them the lookup key for revert.
pub struct HistoryLog {
    entries: VecDeque<LogEntry>,
    retention: RetentionPolicy,
    format: DisplayFormat,
    clock: Arc<dyn Clock>,
}

impl HistoryLog {
    pub fn new(retention: RetentionPolicy, format: DisplayFormat, clock: Arc<dyn Clock>) -> Self {
        Self {
            entries: VecDeque::new(),
            retention,
            format,
            clock,
        }
    }

    /// Rebuild a log from previously persisted entries.
    ///
    /// Entries must already be in strictly ascending timestamp order.
    /// Retention is not applied here; call [`HistoryLog::enforce_retention`].
    pub fn from_entries(
        entries: Vec<LogEntry>,
        retention: RetentionPolicy,
        format: DisplayFormat,
        clock: Arc<dyn Clock>,
    ) -> Result<Self, HistoryError> {
        let mut log = Self::new(retention, format, clock);
        for entry in entries {
            log.push(entry)?;
        }
        Ok(log)
    }

    pub fn clock(&self) -> &Arc<dyn Clock> {
        &self.clock
    }

    pub fn format(&self) -> &DisplayFormat {
        &self.format
    }

    pub fn retention(&self) -> RetentionPolicy {
        self.retention
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn latest(&self) -> Option<&LogEntry> {
        self.entries.back()
    }

    pub fn latest_timestamp(&self) -> Option<i64> {
        self.entries.back().map(|e| e.timestamp)
    }

    /// Validate and build the entry that `append_entry` would add, without
    /// touching the log. `timestamp` defaults to the clock's now.
    pub fn next_entry(
        &self,
        snapshot: Snapshot,
        timestamp: Option<i64>,
    ) -> Result<LogEntry, HistoryError> {
        let timestamp = timestamp.unwrap_or_else(|| self.clock.now_millis());
        self.check_order(timestamp)?;
        Ok(LogEntry::new(timestamp, snapshot, &self.format))
    }

    /// Add a prepared entry at the tail. No retention is applied.
    pub fn push(&mut self, entry: LogEntry) -> Result<(), HistoryError> {
        self.check_order(entry.timestamp)?;
        self.entries.push_back(entry);
        Ok(())
    }

    /// Append a snapshot and apply the retention policy.
    pub fn append_entry(
        &mut self,
        snapshot: Snapshot,
        timestamp: Option<i64>,
    ) -> Result<LogEntry, HistoryError> {
        let entry = self.next_entry(snapshot, timestamp)?;
        self.push(entry.clone())?;
        self.enforce_retention(self.clock.now_millis());
        Ok(entry)
    }

    /// Remove entries older than the age window. Returns what was removed,
    /// oldest first.
    pub fn prune_expired(&mut self, now: i64) -> Vec<LogEntry> {
        let mut removed = Vec::new();
        if let Some(cutoff) = self.retention.cutoff(now) {
            while self.entries.front().is_some_and(|e| e.timestamp < cutoff) {
                removed.extend(self.entries.pop_front());
            }
        }
        removed
    }

    /// Apply both retention bounds. Returns removed entries, oldest first.
    pub fn enforce_retention(&mut self, now: i64) -> Vec<LogEntry> {
        let mut removed = self.prune_expired(now);

        if let Some(max) = self.retention.max_entries {
            while self.entries.len() > max {
                removed.extend(self.entries.pop_front());
            }
        }

        if !removed.is_empty() {
            debug!(
                removed = removed.len(),
                remaining = self.entries.len(),
                "Pruned history entries"
            );
        }

        removed
    }

    /// Copy of every entry in ascending timestamp order.
    pub fn query_all(&self) -> Vec<LogEntry> {
        self.entries.iter().cloned().collect()
    }

    /// Exact-match lookup. Returns the entry's index and the entry.
    pub fn find_by_timestamp(&self, timestamp: i64) -> Result<(usize, &LogEntry), HistoryError> {
        let index = self
            .entries
            .binary_search_by_key(&timestamp, |e| e.timestamp)
            .map_err(|_| HistoryError::NotFound(timestamp))?;
        Ok((index, &self.entries[index]))
    }

    /// Remove the newest entry.
    pub fn pop_newest(&mut self) -> Option<LogEntry> {
        self.entries.pop_back()
    }

    /// Remove every entry after `index`. Returns what was removed, oldest first.
    pub fn truncate_after(&mut self, index: usize) -> Vec<LogEntry> {
        if index + 1 >= self.entries.len() {
            return Vec::new();
        }
        self.entries.drain(index + 1..).collect()
    }

    fn check_order(&self, timestamp: i64) -> Result<(), HistoryError> {
        match self.latest_timestamp() {
            Some(latest) if timestamp == latest => Err(HistoryError::DuplicateTimestamp(timestamp)),
            Some(latest) if timestamp < latest => {
                Err(HistoryError::OutOfOrderTimestamp { timestamp, latest })
            }
            _ => Ok(()),
        }
    }
}
