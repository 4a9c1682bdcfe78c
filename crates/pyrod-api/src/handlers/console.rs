//! WebSocket room subscriptions
//!
//! `GET /api/servers/{id}/ws` upgrades into a live subscription to the
//! instance's event room. Outbound frames are the bus events serialized as
//! JSON; the only inbound message is `send-command`, which is routed to the
//! command injector and answered with a `command-output` event on the same
//! socket (and an error surfaced the same way when the server is down).

use crate::context::AppContext;
use axum::extract::ws::{Message, WebSocket, WebSocketUpgrade};
use axum::extract::{Path, State};
use axum::response::IntoResponse;
use futures_util::{SinkExt, StreamExt};
use pyrod_agent::events::{CommandStatus, Event};
use serde::Deserialize;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;

#[derive(Debug, Deserialize)]
struct Inbound {
    event: String,
    #[serde(default)]
    data: InboundData,
}

#[derive(Debug, Default, Deserialize)]
struct InboundData {
    #[serde(default)]
    command: String,
}

pub async fn subscribe(
    ws: WebSocketUpgrade,
    State(ctx): State<Arc<AppContext>>,
    Path(id): Path<String>,
) -> impl IntoResponse {
    ws.on_upgrade(move |socket| handle_socket(socket, ctx, id))
}

async fn handle_socket(socket: WebSocket, ctx: Arc<AppContext>, id: String) {
    tracing::debug!(server = %id, "websocket subscriber joined");

    let mut room = ctx.bus.subscribe(&id).await;
    let (mut sink, mut stream) = socket.split();

    loop {
        tokio::select! {
            event = room.recv() => {
                match event {
                    Ok(event) => {
                        let Ok(json) = serde_json::to_string(&event) else { continue };
                        if sink.send(Message::Text(json.into())).await.is_err() {
                            break;
                        }
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        tracing::debug!(server = %id, skipped = skipped, "slow websocket subscriber");
                    }
                    Err(RecvError::Closed) => break,
                }
            }
            incoming = stream.next() => {
                match incoming {
                    Some(Ok(Message::Text(text))) => {
                        handle_inbound(&ctx, &id, &text, &mut sink).await;
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    Some(Ok(_)) => {}
                    Some(Err(e)) => {
                        tracing::debug!(server = %id, error = %e, "websocket receive error");
                        break;
                    }
                }
            }
        }
    }

    tracing::debug!(server = %id, "websocket subscriber left");
}

async fn handle_inbound(
    ctx: &Arc<AppContext>,
    id: &str,
    text: &str,
    sink: &mut (impl SinkExt<Message> + Unpin),
) {
    let inbound: Inbound = match serde_json::from_str(text) {
        Ok(msg) => msg,
        Err(e) => {
            tracing::debug!(server = %id, error = %e, "ignoring malformed websocket message");
            return;
        }
    };

    if inbound.event != "send-command" {
        tracing::debug!(server = %id, event = %inbound.event, "ignoring unknown websocket event");
        return;
    }

    let command = inbound.data.command;
    let result = ctx.console.send(id, &command).await;

    let reply = match result {
        Ok(()) => Event::CommandOutput {
            command,
            output: String::new(),
            status: CommandStatus::Success,
        },
        Err(e) => Event::CommandOutput {
            command,
            output: e.to_string(),
            status: CommandStatus::Error,
        },
    };

    if let Ok(json) = serde_json::to_string(&reply) {
        let _ = sink.send(Message::Text(json.into())).await;
    }
}
