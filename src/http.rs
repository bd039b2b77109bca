//! JSON REST front-end with a server-sent-events live tail.
//!
//! Routes:
//! - `POST /topics/{topic}/produce` — body `{"payload": "..."}`, answers
//!   `201 {"topic": ..., "offset": ...}`
//! - `GET /topics/{topic}/consume?offset=&max_messages=` — answers a JSON
//!   array of messages; unknown topics yield an empty array
//! - `POST /topics/{topic}` — create; answers
//!   `201 {"topic": ..., "status": "created_or_exists"}`
//! - `GET /topics` — JSON array of topic names
//! - `GET /topics/{topic}/stream?offset=` — `text/event-stream` of messages,
//!   catch-up from the requested offset (or `Last-Event-ID` + 1) followed by
//!   live pushes from the subscription manager

use std::convert::Infallible;
use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Path, Query, State};
use axum::http::{HeaderMap, StatusCode as HttpStatus};
use axum::response::sse::{Event, KeepAlive, Sse};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use futures_util::Stream;
use serde::Deserialize;
use serde_json::json;
use tokio::sync::{broadcast, mpsc};
use tokio_stream::wrappers::UnboundedReceiverStream;
use tokio_stream::StreamExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::broker::Broker;
use crate::constants::{CONSUME_MAX_CAP, DEFAULT_CONSUME_MAX, MAX_PAYLOAD};
use crate::error::{Error, Result};
use crate::message::{validate_topic_name, Message};
use crate::subscription::SubscriptionManager;

/// Shared state for the HTTP handlers.
#[derive(Clone)]
pub struct HttpState {
    pub broker: Arc<Broker>,
    pub subscriptions: Arc<SubscriptionManager>,
}

/// Build the REST router.
pub fn router(state: HttpState) -> Router {
    Router::new()
        .route("/topics", get(list_topics))
        .route("/topics/:topic", post(create_topic))
        .route("/topics/:topic/produce", post(produce))
        .route("/topics/:topic/consume", get(consume))
        .route("/topics/:topic/stream", get(stream_topic))
        .layer(DefaultBodyLimit::max(MAX_PAYLOAD + 4096))
        .with_state(state)
}

/// Serve the REST API until the shutdown signal fires.
pub async fn serve(
    addr: &str,
    state: HttpState,
    mut shutdown: broadcast::Receiver<()>,
) -> Result<()> {
    let listener = tokio::net::TcpListener::bind(addr).await?;
    info!(addr = %addr, "HTTP API listening");
    axum::serve(listener, router(state))
        .with_graceful_shutdown(async move {
            let _ = shutdown.recv().await;
        })
        .await?;
    Ok(())
}

/// Crate error with its HTTP representation.
struct ApiError(Error);

impl From<Error> for ApiError {
    fn from(e: Error) -> Self {
        ApiError(e)
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            Error::InvalidArgument(_) | Error::Protocol(_) => HttpStatus::BAD_REQUEST,
            Error::TopicNotFound(_) => HttpStatus::NOT_FOUND,
            Error::PayloadTooLarge { .. } => HttpStatus::PAYLOAD_TOO_LARGE,
            Error::Io(_) | Error::Corruption(_) | Error::Internal(_) => {
                HttpStatus::INTERNAL_SERVER_ERROR
            }
        };
        (status, Json(json!({ "error": self.0.to_string() }))).into_response()
    }
}

#[derive(Debug, Deserialize)]
struct ProduceBody {
    payload: String,
}

async fn produce(
    State(state): State<HttpState>,
    Path(topic): Path<String>,
    Json(body): Json<ProduceBody>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    let offset = state
        .broker
        .produce(&topic, bytes::Bytes::from(body.payload))
        .await?;
    Ok((
        HttpStatus::CREATED,
        Json(json!({ "topic": topic, "offset": offset })),
    ))
}

#[derive(Debug, Deserialize)]
struct ConsumeQuery {
    offset: Option<u64>,
    max_messages: Option<u32>,
}

async fn consume(
    State(state): State<HttpState>,
    Path(topic): Path<String>,
    Query(query): Query<ConsumeQuery>,
) -> std::result::Result<Json<Vec<Message>>, ApiError> {
    let start_offset = query.offset.unwrap_or(0);
    let max_messages = query
        .max_messages
        .unwrap_or(DEFAULT_CONSUME_MAX)
        .min(CONSUME_MAX_CAP);
    let messages = state.broker.consume(&topic, start_offset, max_messages).await?;
    Ok(Json(messages))
}

async fn create_topic(
    State(state): State<HttpState>,
    Path(topic): Path<String>,
) -> std::result::Result<impl IntoResponse, ApiError> {
    state.broker.create_topic(&topic).await?;
    Ok((
        HttpStatus::CREATED,
        Json(json!({ "topic": topic, "status": "created_or_exists" })),
    ))
}

async fn list_topics(State(state): State<HttpState>) -> Json<Vec<String>> {
    Json(state.broker.list_topics().await)
}

#[derive(Debug, Deserialize)]
struct StreamQuery {
    offset: Option<u64>,
}

async fn stream_topic(
    State(state): State<HttpState>,
    Path(topic): Path<String>,
    Query(query): Query<StreamQuery>,
    headers: HeaderMap,
) -> std::result::Result<Sse<impl Stream<Item = std::result::Result<Event, Infallible>>>, ApiError>
{
    validate_topic_name(&topic)?;

    // Explicit offset wins; otherwise resume one past the Last-Event-ID the
    // client saw before reconnecting.
    let start_offset = query.offset.or_else(|| last_event_id(&headers)).unwrap_or(0);

    let subscriber_id = format!("sse-{}", Uuid::new_v4());
    debug!(topic, subscriber_id, start_offset, "SSE stream opened");

    let (live_tx, live_rx) = mpsc::unbounded_channel();
    let (out_tx, out_rx) = mpsc::unbounded_channel::<Message>();
    state
        .subscriptions
        .subscribe(&topic, &subscriber_id, start_offset, live_tx);

    tokio::spawn(pump_subscription(
        state.broker.clone(),
        state.subscriptions.clone(),
        topic,
        subscriber_id,
        start_offset,
        live_rx,
        out_tx,
    ));

    let stream = UnboundedReceiverStream::new(out_rx).map(|message| {
        let data = serde_json::to_string(&message).unwrap_or_default();
        Ok(Event::default()
            .id(message.offset.to_string())
            .event("message")
            .data(data))
    });
    Ok(Sse::new(stream).keep_alive(KeepAlive::default()))
}

fn last_event_id(headers: &HeaderMap) -> Option<u64> {
    headers
        .get("last-event-id")
        .and_then(|v| v.to_str().ok())
        .and_then(|v| v.parse::<u64>().ok())
        .map(|id| id + 1)
}

/// Feed one subscriber: replay history from `start_offset`, then forward live
/// pushes, dropping anything already replayed. Unsubscribes on the way out.
async fn pump_subscription(
    broker: Arc<Broker>,
    subscriptions: Arc<SubscriptionManager>,
    topic: String,
    subscriber_id: String,
    start_offset: u64,
    mut live_rx: mpsc::UnboundedReceiver<crate::message::MessageBatch>,
    out_tx: mpsc::UnboundedSender<Message>,
) {
    let mut next_wanted = start_offset;

    'catch_up: loop {
        match broker.consume(&topic, next_wanted, DEFAULT_CONSUME_MAX).await {
            Ok(batch) if batch.is_empty() => break 'catch_up,
            Ok(batch) => {
                for message in batch {
                    next_wanted = message.offset + 1;
                    if out_tx.send(message).is_err() {
                        subscriptions.unsubscribe_all(&subscriber_id);
                        return;
                    }
                }
            }
            Err(e) => {
                warn!(topic, error = %e, "catch-up read failed; continuing with live only");
                break 'catch_up;
            }
        }
    }

    loop {
        tokio::select! {
            batch = live_rx.recv() => {
                let Some(batch) = batch else { break };
                for message in batch.messages {
                    if message.offset < next_wanted {
                        continue;
                    }
                    next_wanted = message.offset + 1;
                    if out_tx.send(message).is_err() {
                        break;
                    }
                }
                if out_tx.is_closed() {
                    break;
                }
            }
            _ = out_tx.closed() => break,
        }
    }

    debug!(topic, subscriber_id, "SSE stream closed");
    subscriptions.unsubscribe_all(&subscriber_id);
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_last_event_id_resumes_one_past() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", "41".parse().unwrap());
        assert_eq!(last_event_id(&headers), Some(42));
    }

    #[test]
    fn test_last_event_id_ignores_garbage() {
        let mut headers = HeaderMap::new();
        headers.insert("last-event-id", "not-a-number".parse().unwrap());
        assert_eq!(last_event_id(&headers), None);
        assert_eq!(last_event_id(&HeaderMap::new()), None);
    }

    #[test]
    fn test_api_error_status_mapping() {
        let cases = [
            (
                Error::InvalidArgument("x".into()),
                HttpStatus::BAD_REQUEST,
            ),
            (Error::TopicNotFound("t".into()), HttpStatus::NOT_FOUND),
            (
                Error::PayloadTooLarge { got: 1, max: 0 },
                HttpStatus::PAYLOAD_TOO_LARGE,
            ),
            (
                Error::Internal("boom".into()),
                HttpStatus::INTERNAL_SERVER_ERROR,
            ),
        ];
        for (error, expected) in cases {
            let response = ApiError(error).into_response();
            assert_eq!(response.status(), expected);
        }
    }
}
