use crate::board::Snapshot;
use crate::sync::BoardView;
use serde::Deserialize;
use std::sync::Arc;

/// A request against the board, applied in arrival order.
#[derive(Clone, Debug, PartialEq)]
pub enum Command {
    /// New board state (full or delta, per [`MergeStrategy`])
    Update(Snapshot),
    /// Discard the newest history entry
    Undo,
    /// Discard every entry newer than `timestamp`
    RevertTo { timestamp: i64 },
}

impl Command {
    pub fn name(&self) -> &'static str {
        match self {
            Command::Update(_) => "update",
            Command::Undo => "undo",
            Command::RevertTo { .. } => "revert",
        }
    }
}

/// How an update payload combines with the current board
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStrategy {
    /// Payload is a delta laid over the current board
    #[default]
    Overlay,
    /// Payload is the new board verbatim
    Replace,
}

impl MergeStrategy {
    pub fn merge(self, current: &Snapshot, incoming: Snapshot) -> Snapshot {
        match self {
            MergeStrategy::Overlay => current.overlay(&incoming),
            MergeStrategy::Replace => incoming,
        }
    }
}

/// Result of a successfully handled command
#[derive(Clone, Debug)]
pub enum Applied {
    /// The log changed; the new view has been broadcast
    Changed(Arc<BoardView>),
    /// Nothing to do (undo at the floor, revert to the newest entry). Carries
    /// the board as it stood when the command was applied.
    Unchanged(Arc<BoardView>),
}

impl Applied {
    pub fn is_changed(&self) -> bool {
        matches!(self, Applied::Changed(_))
    }

    pub fn view(&self) -> &Arc<BoardView> {
        match self {
            Applied::Changed(view) | Applied::Unchanged(view) => view,
        }
    }
}
