// =============================================================================
// WebSocket Handler — push-based Event Bus forwarding
// =============================================================================
//
// Clients connect to `/api/v1/ws?token=<token>` and receive every event the
// Event Bus (C10) broadcasts — status, progress, trade, position-update, and
// log — serialized as JSON, one frame per event, as they happen. There is no
// polling loop here: a lagged subscriber on the broadcast channel (spec
// §4.10 "lossy") just misses the events it fell behind on and keeps going
// from the next one.
// =============================================================================

use std::sync::Arc;

use axum::{
    extract::{
        ws::{Message, WebSocket},
        Query, State, WebSocketUpgrade,
    },
    response::IntoResponse,
};
use futures_util::{SinkExt, StreamExt};
use serde::Deserialize;
use tokio::sync::broadcast;
use tracing::{debug, info, warn};

use crate::api::auth::validate_token;
use crate::control_surface::ControlSurface;
use crate::events::Event;

#[derive(Deserialize)]
pub struct WsQuery {
    token: Option<String>,
}

/// Axum handler for the WebSocket upgrade request. Validates the token from
/// the `?token=` query parameter before upgrading.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    State(control): State<Arc<ControlSurface>>,
    Query(query): Query<WsQuery>,
) -> impl IntoResponse {
    let token = query.token.unwrap_or_default();
    if !validate_token(&token) {
        warn!("WebSocket connection rejected: invalid token");
        return (axum::http::StatusCode::FORBIDDEN, "Invalid or missing token").into_response();
    }

    info!("WebSocket connection accepted — upgrading");
    ws.on_upgrade(move |socket| handle_ws_connection(socket, control))
        .into_response()
}

async fn handle_ws_connection(socket: WebSocket, control: Arc<ControlSurface>) {
    let (mut sender, mut receiver) = socket.split();
    let mut events = control.events().subscribe();

    if let Ok(status) = control.get_status().await {
        let _ = send_json(&mut sender, &serde_json::json!({ "kind": "snapshot", "status": status })).await;
    }

    loop {
        tokio::select! {
            event = events.recv() => {
                match event {
                    Ok(event) => {
                        if send_event(&mut sender, &event).await.is_err() {
                            break;
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        debug!(skipped, "WebSocket subscriber lagged, dropped events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
            msg = receiver.next() => {
                match msg {
                    Some(Ok(Message::Ping(data))) => {
                        if sender.send(Message::Pong(data)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => {
                        info!("WebSocket connection closed");
                        break;
                    }
                    Some(Err(e)) => {
                        warn!(error = %e, "WebSocket receive error — disconnecting");
                        break;
                    }
                    _ => {}
                }
            }
        }
    }
}

async fn send_event(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    event: &Event,
) -> Result<(), axum::Error> {
    send_json(sender, event).await
}

async fn send_json(
    sender: &mut (impl SinkExt<Message, Error = axum::Error> + Unpin),
    value: &impl serde::Serialize,
) -> Result<(), axum::Error> {
    match serde_json::to_string(value) {
        Ok(json) => sender.send(Message::Text(json)).await,
        Err(e) => {
            warn!(error = %e, "failed to serialize WebSocket event");
            Ok(())
        }
    }
}
