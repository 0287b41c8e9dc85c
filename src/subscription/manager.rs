use crate::engine::{Command, EngineHandle};
use crate::subscription::protocol::{BoardUpdateMessage, ClientMessage, ErrorMessage};
use crate::sync::{BoardView, Broadcaster, ObserverSession};
use axum::extract::ws::{Message, WebSocket};
use serde::Serialize;
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};

/// Manages a single WebSocket observer: pushes every board change to the
/// client and forwards its commands to the engine.
pub struct ConnectionManager {
    engine: EngineHandle,
    broadcaster: Arc<Broadcaster>,
}

impl ConnectionManager {
    pub fn new(engine: EngineHandle, broadcaster: Arc<Broadcaster>) -> Self {
        Self {
            engine,
            broadcaster,
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(self, mut socket: WebSocket, mut session: ObserverSession) {
        let observer_id = session.id;
        info!(observer_id = %observer_id, "WebSocket connection established");

        if let Err(e) = send_view(&mut socket, &session.initial).await {
            error!(observer_id = %observer_id, error = %e, "Failed to send initial board");
            return;
        }

        loop {
            tokio::select! {
                Some(msg) = socket.recv() => {
                    match msg {
                        Ok(Message::Text(text)) => {
                            if let Err(e) = self.handle_client_message(&mut socket, &text).await {
                                error!(observer_id = %observer_id, error = %e, "Error handling client message");
                                break;
                            }
                        }
                        Ok(Message::Close(_)) => {
                            info!(observer_id = %observer_id, "WebSocket client disconnected");
                            break;
                        }
                        Ok(Message::Ping(data)) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Ok(_) => {
                            // Ignore binary, pong messages
                        }
                        Err(e) => {
                            warn!(observer_id = %observer_id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                result = session.rx.recv() => {
                    match result {
                        Ok(view) => {
                            if let Err(e) = send_view(&mut socket, &view).await {
                                error!(observer_id = %observer_id, error = %e, "Failed to send board update");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Lagged(skipped)) => {
                            // Every view is complete, so the latest one replaces
                            // whatever was skipped.
                            warn!(observer_id = %observer_id, skipped, "Observer lagged, resyncing from latest board");
                            if let Err(e) = send_view(&mut socket, &self.broadcaster.latest()).await {
                                error!(observer_id = %observer_id, error = %e, "Failed to resync observer");
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => {
                            error!("Board broadcast channel closed");
                            break;
                        }
                    }
                }

                else => {
                    break;
                }
            }
        }

        info!(observer_id = %observer_id, "WebSocket connection closed");
    }

    /// Parse a client command and submit it. Rejections are reported back to
    /// this client only; the resulting board arrives through the broadcast.
    async fn handle_client_message(&self, socket: &mut WebSocket, text: &str) -> anyhow::Result<()> {
        let msg: ClientMessage = match serde_json::from_str(text) {
            Ok(msg) => msg,
            Err(e) => {
                debug!(error = %e, "Unparseable client message");
                return send_json(socket, &ErrorMessage::invalid_message(e.to_string())).await;
            }
        };

        let command = Command::from(msg);
        let name = command.name();

        match self.engine.submit(command).await {
            Ok(applied) => {
                debug!(command = name, changed = applied.is_changed(), "Client command applied");
                Ok(())
            }
            Err(e) => {
                info!(command = name, code = e.code(), "Client command rejected");
                send_json(socket, &ErrorMessage::from(&e)).await
            }
        }
    }
}

async fn send_view(socket: &mut WebSocket, view: &BoardView) -> anyhow::Result<()> {
    send_json(socket, &BoardUpdateMessage::from(view)).await
}

async fn send_json<T: Serialize>(socket: &mut WebSocket, msg: &T) -> anyhow::Result<()> {
    let json = serde_json::to_string(msg)?;
    socket.send(Message::Text(json)).await?;
    Ok(())
}
