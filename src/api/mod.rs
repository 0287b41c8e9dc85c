// HTTP and WebSocket APIs

pub mod board;
pub mod websocket;

pub use board::{create_board_router, BoardAppState};
pub use websocket::{create_ws_router, ws_handler, WsAppState};

use crate::engine::EngineHandle;
use crate::sync::Broadcaster;
use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;

/// Every route the server exposes, sharing one engine and broadcaster
pub fn create_app(engine: EngineHandle, broadcaster: Arc<Broadcaster>) -> Router {
    let ws_state = Arc::new(WsAppState {
        engine: engine.clone(),
        broadcaster: Arc::clone(&broadcaster),
    });
    let board_state = BoardAppState {
        engine,
        broadcaster,
    };

    Router::new()
        .merge(create_board_router(board_state))
        .merge(create_ws_router(ws_state))
        .layer(CorsLayer::permissive())
}
