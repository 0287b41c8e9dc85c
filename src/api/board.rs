use crate::board::Snapshot;
use crate::engine::{Command, EngineError, EngineHandle};
use crate::history::HistoryError;
use crate::sync::{BoardView, Broadcaster};
use axum::{
    body::Bytes,
    extract::State,
    http::StatusCode,
    response::{IntoResponse, Json, Response},
    routing::{get, post},
    Router,
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared state for the board HTTP API
#[derive(Clone)]
pub struct BoardAppState {
    pub engine: EngineHandle,
    pub broadcaster: Arc<Broadcaster>,
}

/// Update request: beds to change
#[derive(Deserialize)]
struct UpdateRequest {
    beds: Snapshot,
}

/// Revert request: exact timestamp of the entry to make current
#[derive(Deserialize)]
struct RevertRequest {
    timestamp: i64,
}

/// Outcome of a command
#[derive(Serialize)]
struct CommandResponse {
    changed: bool,
    board: BoardView,
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct StatusResponse {
    observers: usize,
    entries: usize,
    latest_timestamp: Option<i64>,
    produced_at: i64,
}

/// Error response
#[derive(Serialize)]
struct ErrorResponse {
    error: String,
    code: String,
}

/// Create router with board endpoints
pub fn create_board_router(state: BoardAppState) -> Router {
    Router::new()
        .route("/api/board", get(get_board))
        .route("/api/board/update", post(update_board))
        .route("/api/board/undo", post(undo_board))
        .route("/api/board/revert", post(revert_board))
        .route("/api/status", get(get_status))
        .with_state(Arc::new(state))
}

/// GET /api/board - Current state, history and display time
async fn get_board(State(state): State<Arc<BoardAppState>>) -> Json<BoardView> {
    Json(state.broadcaster.latest().as_ref().clone())
}

/// POST /api/board/update - Apply a bed change
async fn update_board(
    State(state): State<Arc<BoardAppState>>,
    body: Bytes,
) -> Result<Json<CommandResponse>, AppError> {
    let request: UpdateRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError("invalid_request", e.to_string()))?;

    submit(&state, Command::Update(request.beds)).await
}

/// POST /api/board/undo - Remove the newest entry
async fn undo_board(
    State(state): State<Arc<BoardAppState>>,
) -> Result<Json<CommandResponse>, AppError> {
    submit(&state, Command::Undo).await
}

/// POST /api/board/revert - Discard every entry after `timestamp`
async fn revert_board(
    State(state): State<Arc<BoardAppState>>,
    body: Bytes,
) -> Result<Json<CommandResponse>, AppError> {
    let request: RevertRequest = serde_json::from_slice(&body)
        .map_err(|e| AppError::ValidationError("invalid_request", e.to_string()))?;

    submit(
        &state,
        Command::RevertTo {
            timestamp: request.timestamp,
        },
    )
    .await
}

/// GET /api/status - Observer and log counters
async fn get_status(State(state): State<Arc<BoardAppState>>) -> Json<StatusResponse> {
    let latest = state.broadcaster.latest();
    Json(StatusResponse {
        observers: state.broadcaster.observer_count(),
        entries: latest.history.len(),
        latest_timestamp: latest.history.last().map(|e| e.timestamp),
        produced_at: latest.produced_at,
    })
}

async fn submit(
    state: &BoardAppState,
    command: Command,
) -> Result<Json<CommandResponse>, AppError> {
    let name = command.name();
    let applied = state.engine.submit(command).await?;

    let changed = applied.is_changed();
    let board = applied.view().as_ref().clone();

    info!(command = name, changed, "Board command handled over HTTP");

    Ok(Json(CommandResponse { changed, board }))
}

/// API errors
enum AppError {
    ValidationError(&'static str, String),
    NotFound(&'static str, String),
    Conflict(&'static str, String),
    Unavailable(&'static str, String),
}

impl From<EngineError> for AppError {
    fn from(e: EngineError) -> Self {
        let code = e.code();
        let message = e.to_string();
        match e {
            EngineError::History(HistoryError::NotFound(_)) => AppError::NotFound(code, message),
            EngineError::History(_) => AppError::Conflict(code, message),
            EngineError::Board(_) => AppError::ValidationError(code, message),
            EngineError::PersistenceUnavailable(_) | EngineError::EngineStopped => {
                error!(code, error = %message, "Board command failed");
                AppError::Unavailable(code, message)
            }
        }
    }
}

impl IntoResponse for AppError {
    fn into_response(self) -> Response {
        let (status, code, error_message) = match self {
            AppError::ValidationError(code, msg) => (StatusCode::BAD_REQUEST, code, msg),
            AppError::NotFound(code, msg) => (StatusCode::NOT_FOUND, code, msg),
            AppError::Conflict(code, msg) => (StatusCode::CONFLICT, code, msg),
            AppError::Unavailable(code, msg) => (StatusCode::SERVICE_UNAVAILABLE, code, msg),
        };
        let body = Json(ErrorResponse {
            error: error_message,
            code: code.to_string(),
        });
        (status, body).into_response()
    }
}
