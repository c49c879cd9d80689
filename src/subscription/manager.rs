use crate::relay::RelayEngine;
use crate::subscription::protocol::RelayMessage;
use crate::subscription::registry::ConnectionHandle;
use axum::extract::ws::{Message, WebSocket};
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, error, info, warn};

/// Manages a single client WebSocket connection.
///
/// Inbound frames are handed to the engine strictly in arrival order; frames
/// queued for this connection (replies, replays, broadcasts) are drained into
/// the socket from the same loop.
pub struct ConnectionManager {
    engine: Arc<RelayEngine>,
    connection: ConnectionHandle,
    outbound_rx: mpsc::UnboundedReceiver<RelayMessage>,
}

impl ConnectionManager {
    pub fn new(engine: Arc<RelayEngine>) -> Self {
        let (connection, outbound_rx) = ConnectionHandle::new();
        Self {
            engine,
            connection,
            outbound_rx,
        }
    }

    /// Handle WebSocket connection lifecycle
    pub async fn handle(mut self, mut socket: WebSocket) {
        let connection_id = self.connection.id;
        info!(connection = %connection_id, "Nostr connection open");

        loop {
            tokio::select! {
                // Handle incoming client frames
                msg = socket.recv() => {
                    match msg {
                        Some(Ok(Message::Text(text))) => {
                            self.handle_client_message(&text);
                        }
                        Some(Ok(Message::Close(_))) | None => {
                            debug!(connection = %connection_id, "Client disconnected");
                            break;
                        }
                        Some(Ok(Message::Ping(data))) => {
                            if let Err(e) = socket.send(Message::Pong(data)).await {
                                error!(error = %e, "Failed to send pong");
                                break;
                            }
                        }
                        Some(Ok(_)) => {
                            // Ignore binary, pong messages
                        }
                        Some(Err(e)) => {
                            warn!(connection = %connection_id, error = %e, "WebSocket error");
                            break;
                        }
                    }
                }

                // Drain frames queued for this connection
                Some(outbound) = self.outbound_rx.recv() => {
                    if let Err(e) = send_frame(&mut socket, &outbound).await {
                        warn!(connection = %connection_id, error = %e, "Failed to send frame");
                        break;
                    }
                }
            }
        }

        let removed = self.engine.connection_closed(connection_id);
        info!(
            connection = %connection_id,
            subscriptions = removed,
            "Nostr connection closed"
        );
    }

    /// Decode and dispatch one client frame.
    ///
    /// Failures stay at this boundary: malformed frames are logged and the
    /// connection keeps serving.
    fn handle_client_message(&self, text: &str) {
        if let Err(e) = self.engine.handle_message(&self.connection, text) {
            debug!(
                connection = %self.connection.id,
                error = %e,
                "Ignoring client frame"
            );
        }
    }
}

async fn send_frame(socket: &mut WebSocket, msg: &RelayMessage) -> anyhow::Result<()> {
    socket.send(Message::Text(msg.to_json())).await?;
    Ok(())
}
