use crate::engine::EngineHandle;
use crate::subscription::ConnectionManager;
use crate::sync::Broadcaster;
use axum::{
    extract::{
        ws::{WebSocket, WebSocketUpgrade},
        State,
    },
    response::Response,
    routing::get,
    Router,
};
use std::sync::Arc;
use tracing::info;

/// Shared application state for WebSocket handler
#[derive(Clone)]
pub struct WsAppState {
    pub engine: EngineHandle,
    pub broadcaster: Arc<Broadcaster>,
}

/// GET /api/ws - WebSocket upgrade handler
pub async fn ws_handler(ws: WebSocketUpgrade, State(state): State<Arc<WsAppState>>) -> Response {
    info!("WebSocket upgrade request received");
    ws.on_upgrade(|socket| handle_socket(socket, state))
}

/// Create WebSocket router
pub fn create_ws_router(state: Arc<WsAppState>) -> Router {
    Router::new()
        .route("/api/ws", get(ws_handler))
        .with_state(state)
}

/// Register the observer and run its session until the socket closes
async fn handle_socket(socket: WebSocket, state: Arc<WsAppState>) {
    let session = state.broadcaster.join();

    let manager = ConnectionManager::new(state.engine.clone(), Arc::clone(&state.broadcaster));
    manager.handle(socket, session).await;
}
