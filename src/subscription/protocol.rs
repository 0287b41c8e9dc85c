use crate::board::{BedId, BedStatus, Snapshot};
use crate::engine::{Command, EngineError};
use crate::history::LogEntry;
use crate::sync::BoardView;
use serde::{Deserialize, Serialize};

/// Client → Server message types
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ClientMessage {
    /// Set one or more beds at once
    Update { beds: Snapshot },
    /// Set a single bed
    ChangeStatus { bed_id: BedId, new_status: BedStatus },
    Undo,
    Revert { timestamp: i64 },
}

impl From<ClientMessage> for Command {
    fn from(msg: ClientMessage) -> Self {
        match msg {
            ClientMessage::Update { beds } => Command::Update(beds),
            ClientMessage::ChangeStatus { bed_id, new_status } => {
                Command::Update([(bed_id, new_status)].into_iter().collect())
            }
            ClientMessage::Undo => Command::Undo,
            ClientMessage::Revert { timestamp } => Command::RevertTo { timestamp },
        }
    }
}

/// Server → Client: full board after a change (also sent on connect)
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct BoardUpdateMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub current_state: Snapshot,
    pub history: Vec<LogEntry>,
    pub display_time: String,
    pub produced_at: i64,
}

impl From<&BoardView> for BoardUpdateMessage {
    fn from(view: &BoardView) -> Self {
        Self {
            msg_type: "board_update".to_string(),
            current_state: view.current_state.clone(),
            history: view.history.clone(),
            display_time: view.display_time.clone(),
            produced_at: view.produced_at,
        }
    }
}

/// Server → Client: Error message
#[derive(Debug, Clone, Serialize)]
pub struct ErrorMessage {
    #[serde(rename = "type")]
    pub msg_type: String,
    pub code: String,
    pub error: String,
}

impl ErrorMessage {
    pub fn new(code: &str, error: String) -> Self {
        Self {
            msg_type: "error".to_string(),
            code: code.to_string(),
            error,
        }
    }

    /// Message that could not be parsed
    pub fn invalid_message(error: String) -> Self {
        Self::new("invalid_message", error)
    }
}

impl From<&EngineError> for ErrorMessage {
    fn from(e: &EngineError) -> Self {
        Self::new(e.code(), e.to_string())
    }
}
