//! Undo and point-in-time revert.
//!
//! Both are destructive: the history log is the undo stack, so discarded
//! entries are gone for good and there is no redo.

use super::{Applied, BoardEngine, EngineError};
use crate::store::TimestampPredicate;
use tracing::{debug, info};

impl BoardEngine {
    /// Entries undo must leave in place
    pub fn undo_floor(&self) -> usize {
        if self.preserve_initial_entry {
            1
        } else {
            0
        }
    }

    /// Remove the newest entry. A no-op at the floor.
    pub(super) async fn undo(&mut self) -> Result<Applied, EngineError> {
        if self.history.len() <= self.undo_floor() {
            debug!(
                entries = self.history.len(),
                floor = self.undo_floor(),
                "Undo at floor, nothing to remove"
            );
            return Ok(self.unchanged());
        }

        let Some(newest) = self.history.latest_timestamp() else {
            return Ok(self.unchanged());
        };

        self.with_store(move |store| store.delete_where(TimestampPredicate::AtOrAfter(newest)))
            .await?;
        self.history.pop_newest();
        let pruned = self.retain().await;

        info!(
            removed = newest,
            pruned,
            current = ?self.history.latest_timestamp(),
            "Undid newest entry"
        );

        Ok(self.publish())
    }

    /// Make the entry at exactly `timestamp` current again by discarding
    /// everything after it. No nearest match: an unknown timestamp is
    /// `NotFound` and nothing changes.
    pub(super) async fn revert_to(&mut self, timestamp: i64) -> Result<Applied, EngineError> {
        let (index, _) = self.history.find_by_timestamp(timestamp)?;

        if index + 1 == self.history.len() {
            debug!(timestamp, "Revert target is already current");
            return Ok(self.unchanged());
        }

        self.with_store(move |store| store.delete_where(TimestampPredicate::After(timestamp)))
            .await?;
        let discarded = self.history.truncate_after(index);
        let pruned = self.retain().await;

        info!(
            timestamp,
            discarded = discarded.len(),
            pruned,
            "Reverted board to earlier entry"
        );

        Ok(self.publish())
    }
}
