use crate::board::BoardError;
use crate::history::HistoryError;
use crate::store::StoreError;
use thiserror::Error;

/// Why a command was rejected. The log is unchanged and nothing was
/// broadcast whenever one of these is returned.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum EngineError {
    #[error(transparent)]
    History(#[from] HistoryError),
    #[error(transparent)]
    Board(#[from] BoardError),
    #[error("persistence unavailable: {0}")]
    PersistenceUnavailable(String),
    #[error("board engine is not running")]
    EngineStopped,
}

impl EngineError {
    /// Stable machine-readable code for clients
    pub fn code(&self) -> &'static str {
        match self {
            EngineError::History(HistoryError::OutOfOrderTimestamp { .. }) => "out_of_order_timestamp",
            EngineError::History(HistoryError::DuplicateTimestamp(_)) => "duplicate_timestamp",
            EngineError::History(HistoryError::NotFound(_)) => "not_found",
            EngineError::Board(BoardError::EmptyUpdate) => "empty_update",
            EngineError::Board(BoardError::UnknownBed(_)) => "unknown_bed",
            EngineError::Board(BoardError::UnknownStatus { .. }) => "unknown_status",
            EngineError::PersistenceUnavailable(_) => "persistence_unavailable",
            EngineError::EngineStopped => "engine_stopped",
        }
    }
}

impl From<StoreError> for EngineError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::DuplicateTimestamp(ts) => HistoryError::DuplicateTimestamp(ts).into(),
            StoreError::OutOfOrderTimestamp { timestamp, latest } => {
                HistoryError::OutOfOrderTimestamp { timestamp, latest }.into()
            }
            other => EngineError::PersistenceUnavailable(other.to_string()),
        }
    }
}
