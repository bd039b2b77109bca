//! JSON-over-WebSocket front-end.
//!
//! One session per connection, identified by a server-generated id. Clients
//! send JSON commands tagged by a `command` field and may attach a `req_id`
//! that the server echoes in the matching response. Subscriptions deliver
//! `message_batch_notification` pushes: a catch-up replay from the requested
//! start offset followed by live messages, each offset at most once and in
//! order per topic.

use std::collections::HashMap;
use std::sync::Arc;

use axum::extract::ws::{Message as WsFrame, WebSocket, WebSocketUpgrade};
use axum::extract::State;
use axum::response::Response;
use axum::routing::get;
use axum::Router;
use futures_util::{SinkExt, StreamExt};
use serde::{Deserialize, Serialize};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::constants::DEFAULT_CONSUME_MAX;
use crate::error::Result;
use crate::message::{validate_topic_name, Message, MessageBatch};
use crate::subscription::SubscriptionManager;

/// Shared state for WebSocket sessions.
#[derive(Clone)]
pub struct WsState {
    pub broker: Arc<Broker>,
    pub subscriptions: Arc<SubscriptionManager>,
}

/// Build the WebSocket router; the endpoint is `GET /ws`.
pub fn router(state: WsState) -> Router {
    Router::new().route("/ws", get(upgrade)).with_state(state)
}

/// Serve the WebSocket endpoint until the shutdown signal fires.
pub async fn serve(
    addr: &str,
    state: WsState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "WebSocket API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

async fn upgrade(State(state): State<WsState>, ws: WebSocketUpgrade) -> Response {
    ws.on_upgrade(move |socket| handle_session(socket, state))
}

#[derive(Debug, Deserialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum ClientCommand {
    ProduceRequest {
        req_id: Option<u64>,
        topic: String,
        message_payload: String,
    },
    SubscribeTopicRequest {
        req_id: Option<u64>,
        topic: String,
        #[serde(default)]
        start_offset: u64,
    },
    UnsubscribeTopicRequest {
        req_id: Option<u64>,
        topic: String,
    },
    CreateTopicRequest {
        req_id: Option<u64>,
        topic: String,
    },
    ListTopicsRequest {
        req_id: Option<u64>,
    },
    GetNextOffsetRequest {
        req_id: Option<u64>,
        topic: String,
    },
}

#[derive(Debug, Serialize)]
#[serde(tag = "command", rename_all = "snake_case")]
enum ServerMessage {
    ProduceResponse {
        req_id: Option<u64>,
        topic: String,
        offset: u64,
        success: bool,
        error_message: Option<String>,
    },
    SubscribeTopicResponse {
        req_id: Option<u64>,
        topic: String,
        success: bool,
        error_message: Option<String>,
    },
    UnsubscribeTopicResponse {
        req_id: Option<u64>,
        topic: String,
        success: bool,
        error_message: Option<String>,
    },
    CreateTopicResponse {
        req_id: Option<u64>,
        topic: String,
        success: bool,
        error_message: Option<String>,
    },
    ListTopicsResponse {
        req_id: Option<u64>,
        topics: Vec<String>,
        success: bool,
        error_message: Option<String>,
    },
    GetNextOffsetResponse {
        req_id: Option<u64>,
        topic: String,
        next_offset: u64,
        success: bool,
        error_message: Option<String>,
    },
    MessageBatchNotification {
        topic: String,
        messages: Vec<Message>,
    },
    ErrorResponse {
        req_id: Option<u64>,
        error_message: String,
    },
}

/// Per-session state: the delivery queue plus the per-topic high-water mark
/// used to drop live pushes already covered by catch-up.
struct Session {
    id: String,
    live_tx: mpsc::UnboundedSender<MessageBatch>,
    high_water: HashMap<String, u64>,
}

async fn handle_session(socket: WebSocket, state: WsState) {
    let (mut ws_tx, mut ws_rx) = socket.split();
    let (live_tx, mut live_rx) = mpsc::unbounded_channel();
    let mut session = Session {
        id: Uuid::new_v4().to_string(),
        live_tx,
        high_water: HashMap::new(),
    };
    info!(session_id = %session.id, "WebSocket session started");

    loop {
        tokio::select! {
            incoming = ws_rx.next() => {
                match incoming {
                    Some(Ok(WsFrame::Text(text))) => {
                        let replies = process_command(&state, &mut session, &text).await;
                        if send_all(&mut ws_tx, replies).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsFrame::Binary(_))) => {
                        let reply = ServerMessage::ErrorResponse {
                            req_id: None,
                            error_message: "binary messages not supported; send JSON text"
                                .to_string(),
                        };
                        let _ = send_all(&mut ws_tx, vec![reply]).await;
                        break;
                    }
                    Some(Ok(WsFrame::Close(_))) | None => break,
                    Some(Ok(_)) => continue,
                    Some(Err(e)) => {
                        debug!(session_id = %session.id, error = %e, "WebSocket read error");
                        break;
                    }
                }
            }
            batch = live_rx.recv() => {
                let Some(batch) = batch else { break };
                let Some(notification) = session.filter_live_batch(batch) else {
                    continue;
                };
                if send_all(&mut ws_tx, vec![notification]).await.is_err() {
                    break;
                }
            }
        }
    }

    state.subscriptions.unsubscribe_all(&session.id);
    info!(session_id = %session.id, "WebSocket session closed");
}

impl Session {
    /// Drop live messages already delivered by catch-up and advance the
    /// high-water mark past what will now be sent.
    fn filter_live_batch(&mut self, batch: MessageBatch) -> Option<ServerMessage> {
        let high_water = self.high_water.entry(batch.topic.clone()).or_insert(0);
        let messages: Vec<Message> = batch
            .messages
            .into_iter()
            .filter(|m| m.offset >= *high_water)
            .collect();
        let last = messages.last()?;
        *high_water = last.offset + 1;
        Some(ServerMessage::MessageBatchNotification {
            topic: batch.topic,
            messages,
        })
    }
}

async fn send_all(
    ws_tx: &mut (impl SinkExt<WsFrame> + Unpin),
    replies: Vec<ServerMessage>,
) -> std::result::Result<(), ()> {
    for reply in replies {
        let Ok(text) = serde_json::to_string(&reply) else {
            continue;
        };
        if ws_tx.send(WsFrame::Text(text)).await.is_err() {
            return Err(());
        }
    }
    Ok(())
}

/// Execute one client command, returning the replies to send in order.
async fn process_command(
    state: &WsState,
    session: &mut Session,
    text: &str,
) -> Vec<ServerMessage> {
    let command: ClientCommand = match serde_json::from_str(text) {
        Ok(command) => command,
        Err(e) => {
            // Best effort at echoing the req_id of the malformed message.
            let req_id = serde_json::from_str::<serde_json::Value>(text)
                .ok()
                .and_then(|v| v.get("req_id").and_then(serde_json::Value::as_u64));
            return vec![ServerMessage::ErrorResponse {
                req_id,
                error_message: format!("invalid command: {e}"),
            }];
        }
    };

    match command {
        ClientCommand::ProduceRequest {
            req_id,
            topic,
            message_payload,
        } => {
            let result = state
                .broker
                .produce(&topic, bytes::Bytes::from(message_payload))
                .await;
            vec![match result {
                Ok(offset) => ServerMessage::ProduceResponse {
                    req_id,
                    topic,
                    offset,
                    success: true,
                    error_message: None,
                },
                Err(e) => ServerMessage::ProduceResponse {
                    req_id,
                    topic,
                    offset: 0,
                    success: false,
                    error_message: Some(e.to_string()),
                },
            }]
        }
        ClientCommand::SubscribeTopicRequest {
            req_id,
            topic,
            start_offset,
        } => subscribe(state, session, req_id, topic, start_offset).await,
        ClientCommand::UnsubscribeTopicRequest { req_id, topic } => {
            let removed = state.subscriptions.unsubscribe(&topic, &session.id);
            session.high_water.remove(&topic);
            vec![ServerMessage::UnsubscribeTopicResponse {
                req_id,
                topic,
                success: removed,
                error_message: (!removed).then(|| "not subscribed".to_string()),
            }]
        }
        ClientCommand::CreateTopicRequest { req_id, topic } => {
            let result = state.broker.create_topic(&topic).await;
            vec![match result {
                Ok(_) => ServerMessage::CreateTopicResponse {
                    req_id,
                    topic,
                    success: true,
                    error_message: None,
                },
                Err(e) => ServerMessage::CreateTopicResponse {
                    req_id,
                    topic,
                    success: false,
                    error_message: Some(e.to_string()),
                },
            }]
        }
        ClientCommand::ListTopicsRequest { req_id } => {
            vec![ServerMessage::ListTopicsResponse {
                req_id,
                topics: state.broker.list_topics().await,
                success: true,
                error_message: None,
            }]
        }
        ClientCommand::GetNextOffsetRequest { req_id, topic } => {
            let next_offset = state.broker.next_offset(&topic).await;
            vec![ServerMessage::GetNextOffsetResponse {
                req_id,
                topic,
                next_offset,
                success: true,
                error_message: None,
            }]
        }
    }
}

/// Register the subscription, then replay history from `start_offset` as
/// notification batches. Live messages buffered meanwhile are deduplicated by
/// the session's high-water mark.
async fn subscribe(
    state: &WsState,
    session: &mut Session,
    req_id: Option<u64>,
    topic: String,
    start_offset: u64,
) -> Vec<ServerMessage> {
    if let Err(e) = validate_topic_name(&topic) {
        return vec![ServerMessage::SubscribeTopicResponse {
            req_id,
            topic,
            success: false,
            error_message: Some(e.to_string()),
        }];
    }

    state
        .subscriptions
        .subscribe(&topic, &session.id, start_offset, session.live_tx.clone());
    session.high_water.insert(topic.clone(), start_offset);

    let mut replies = vec![ServerMessage::SubscribeTopicResponse {
        req_id,
        topic: topic.clone(),
        success: true,
        error_message: None,
    }];

    let mut next_wanted = start_offset;
    loop {
        match state
            .broker
            .consume(&topic, next_wanted, DEFAULT_CONSUME_MAX)
            .await
        {
            Ok(batch) if batch.is_empty() => break,
            Ok(batch) => {
                next_wanted = batch.last().map(|m| m.offset + 1).unwrap_or(next_wanted);
                replies.push(ServerMessage::MessageBatchNotification {
                    topic: topic.clone(),
                    messages: batch,
                });
            }
            Err(e) => {
                warn!(topic, error = %e, "catch-up read failed; continuing with live only");
                break;
            }
        }
    }
    session.high_water.insert(topic, next_wanted);

    replies
}
