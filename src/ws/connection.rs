//! WebSocket connection state machine.
//!
//! Handles the read/write loop for a single WebSocket connection,
//! dispatching incoming commands and forwarding filtered events.

use std::sync::Arc;

use axum::extract::ws::{Message, WebSocket};
use futures_util::{SinkExt, StreamExt};
use tokio::sync::broadcast;

use super::messages::{WsCommand, WsMessage, WsMessageType};
use super::subscription::SubscriptionManager;
use crate::domain::{AoiId, MonitoringEvent};
use crate::service::MonitoringOrchestrator;

/// Runs the read/write loop for a single WebSocket connection.
///
/// - Reads commands from the client and dispatches them.
/// - Forwards matching events from the [`broadcast::Receiver`] to the client.
pub async fn run_connection(
    socket: WebSocket,
    mut event_rx: broadcast::Receiver<MonitoringEvent>,
    orchestrator: Arc<MonitoringOrchestrator>,
) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let mut subs = SubscriptionManager::new();

    loop {
        tokio::select! {
            msg = ws_rx.next() => {
                match msg {
                    Some(Ok(Message::Text(text))) => {
                        let reply = handle_text_message(&text, &mut subs, &orchestrator).await;
                        let json = serde_json::to_string(&reply).unwrap_or_default();
                        if ws_tx.send(Message::text(json)).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(Message::Close(_))) | None => break,
                    _ => {}
                }
            }
            event = event_rx.recv() => {
                match event {
                    Ok(event) => {
                        if subs.matches(&event) {
                            let msg = WsMessage::new(
                                uuid::Uuid::new_v4().to_string(),
                                WsMessageType::Event,
                                serde_json::to_value(&event).unwrap_or_default(),
                            );
                            let json = serde_json::to_string(&msg).unwrap_or_default();
                            if ws_tx.send(Message::text(json)).await.is_err() {
                                break;
                            }
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!(lagged = n, "ws client lagged behind event bus");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        }
    }

    tracing::debug!("ws connection closed");
}

/// Handles a text message from the client and builds the reply.
async fn handle_text_message(
    text: &str,
    subs: &mut SubscriptionManager,
    orchestrator: &MonitoringOrchestrator,
) -> WsMessage {
    let Ok(msg) = serde_json::from_str::<WsMessage>(text) else {
        return WsMessage::error(String::new(), 400, "malformed JSON");
    };
    let Ok(command) = serde_json::from_value::<WsCommand>(msg.payload) else {
        return WsMessage::error(msg.id, 404, "unknown command");
    };

    match command {
        WsCommand::Subscribe { aoi_ids } => {
            let (ids, wildcard) = parse_aoi_ids(&aoi_ids);
            subs.subscribe(&ids, wildcard);
            WsMessage::new(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "subscribed": ids,
                    "count": subs.count(),
                    "wildcard": subs.is_subscribed_all(),
                }),
            )
        }
        WsCommand::Unsubscribe { aoi_ids } => {
            let (ids, _) = parse_aoi_ids(&aoi_ids);
            subs.unsubscribe(&ids);
            WsMessage::new(
                msg.id,
                WsMessageType::Response,
                serde_json::json!({
                    "unsubscribed": ids,
                    "remaining_count": subs.count(),
                }),
            )
        }
        WsCommand::GetStatus => match orchestrator.status().await {
            Ok(status) => WsMessage::new(
                msg.id,
                WsMessageType::Response,
                serde_json::to_value(status).unwrap_or_default(),
            ),
            Err(e) => WsMessage::error(msg.id, 500, &e.to_string()),
        },
    }
}

/// Splits raw ids into parsed AOI ids and the wildcard flag. Unparseable
/// entries are ignored.
fn parse_aoi_ids(values: &[serde_json::Value]) -> (Vec<AoiId>, bool) {
    let mut ids = Vec::new();
    let mut wildcard = false;
    for value in values {
        match value {
            serde_json::Value::String(s) if s == "*" => wildcard = true,
            serde_json::Value::String(s) => {
                if let Ok(id) = s.parse::<AoiId>() {
                    ids.push(id);
                }
            }
            serde_json::Value::Number(n) => {
                if let Some(raw) = n.as_i64() {
                    ids.push(AoiId::new(raw));
                }
            }
            _ => {}
        }
    }
    (ids, wildcard)
}
