//! The `/events` WebSocket endpoint: the Event Bus's one real
//! subscriber. Every published [`crate::events::Event`] is forwarded
//! verbatim as a `{"topic": ..., "payload": ...}` text frame; the only
//! inbound message the operator UI sends back is `frontend:forwardRequest`,
//! the operator's decision for a captured request, which is decoded and
//! handed to the [`crate::broker::ApprovalBroker`].

use std::collections::HashMap;

use futures::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::net::TcpStream;
use tokio_tungstenite::tungstenite::Message;

use crate::admin_api::state::AppState;
use crate::store::models::Decision;

#[derive(Serialize)]
struct OutgoingEvent<'a> {
    topic: &'a str,
    payload: &'a serde_json::Value,
}

/// Mirrors the wire shape of `Decision`, but carries `body` as base64 the
/// way every other JSON surface in this API does (raw bytes don't survive
/// JSON).
#[derive(Deserialize)]
struct IncomingDecision {
    topic: String,
    #[serde(default)]
    request_id: String,
    #[serde(default)]
    approved: bool,
    #[serde(default)]
    method: String,
    #[serde(default)]
    protocol_version: String,
    #[serde(default)]
    url: String,
    #[serde(default)]
    headers: HashMap<String, String>,
    #[serde(default)]
    body: String,
}

pub async fn handle(stream: TcpStream, state: AppState) -> Result<(), String> {
    let ws_stream = tokio_tungstenite::accept_async(stream)
        .await
        .map_err(|e| format!("websocket handshake failed: {e}"))?;
    let (mut sender, mut receiver) = ws_stream.split();

    let mut bus_rx = state.bus.subscribe();
    let forward = async move {
        loop {
            match bus_rx.recv().await {
                Ok(event) => {
                    let frame = OutgoingEvent { topic: &event.topic, payload: &event.payload };
                    let text = serde_json::to_string(&frame).unwrap_or_else(|_| "{}".to_string());
                    if sender.send(Message::Text(text.into())).await.is_err() {
                        break;
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => continue,
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    let inbound = async move {
        while let Some(msg) = receiver.next().await {
            let msg = match msg {
                Ok(m) => m,
                Err(_) => break,
            };
            match msg {
                Message::Text(text) => handle_inbound(&state, &text),
                Message::Close(_) => break,
                _ => {}
            }
        }
    };

    tokio::select! {
        _ = forward => {}
        _ = inbound => {}
    }
    Ok(())
}

fn handle_inbound(state: &AppState, text: &str) {
    let Ok(msg) = serde_json::from_str::<IncomingDecision>(text) else {
        tracing::debug!("ignoring malformed admin websocket frame");
        return;
    };
    if msg.topic != "frontend:forwardRequest" {
        return;
    }
    let body = base64::Engine::decode(&base64::engine::general_purpose::STANDARD, &msg.body).unwrap_or_default();
    let decision = Decision {
        request_id: msg.request_id,
        approved: msg.approved,
        headers: msg.headers,
        body,
        method: msg.method,
        protocol_version: msg.protocol_version,
        url: msg.url,
    };
    state.broker.decide(decision);
}
