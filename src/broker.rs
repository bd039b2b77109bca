//! The broker façade: validation, produce/consume orchestration, and
//! listener notification.

use std::path::PathBuf;
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tracing::debug;

use crate::constants::MAX_PAYLOAD;
use crate::error::{Error, Result};
use crate::message::{validate_topic_name, Message};
use crate::storage::TopicRegistry;

/// Receives every successfully appended message.
///
/// Implementations must only enqueue work: the broker invokes this while the
/// producing topic's guard is held so that notification order matches offset
/// order, and anything slow here would stall producers on that topic.
///
/// Listeners are registered as `Arc<dyn NewMessageListener>`; the broker does
/// not own their lifecycle beyond holding the reference.
pub trait NewMessageListener: Send + Sync {
    fn on_new_message(&self, message: &Message);
}

/// The broker: a topic registry plus the listeners notified on each append.
///
/// All methods are `&self` and safe to call from any number of tasks; the
/// per-topic serialization lives inside [`Topic`](crate::storage::Topic).
pub struct Broker {
    registry: TopicRegistry,
    listeners: Mutex<Vec<Arc<dyn NewMessageListener>>>,
}

impl Broker {
    /// Open a broker rooted at `base_dir`, loading all existing topics.
    pub async fn open(base_dir: impl Into<PathBuf>) -> Result<Self> {
        Ok(Self {
            registry: TopicRegistry::open(base_dir).await?,
            listeners: Mutex::new(Vec::new()),
        })
    }

    /// Register a listener for new-message notifications.
    pub fn add_listener(&self, listener: Arc<dyn NewMessageListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.push(listener);
    }

    /// Deregister a previously added listener (by identity).
    pub fn remove_listener(&self, listener: &Arc<dyn NewMessageListener>) {
        let mut listeners = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
        listeners.retain(|l| !Arc::ptr_eq(l, listener));
    }

    /// Append `payload` to `topic`, creating the topic on demand, and notify
    /// listeners. Returns the assigned offset.
    pub async fn produce(&self, topic: &str, payload: Bytes) -> Result<u64> {
        validate_topic_name(topic)?;
        if payload.is_empty() {
            return Err(Error::InvalidArgument("payload is empty".to_string()));
        }
        if payload.len() > MAX_PAYLOAD {
            return Err(Error::PayloadTooLarge {
                got: payload.len(),
                max: MAX_PAYLOAD,
            });
        }

        let handle = self.registry.get_or_create(topic).await?;
        let notify_payload = payload.clone();
        let offset = handle
            .append_with(payload, |offset| {
                let message = Message::new(offset, topic, notify_payload);
                self.notify_new_message(&message);
            })
            .await?;

        debug!(topic, offset, "produced message");
        Ok(offset)
    }

    /// Read up to `max_messages` messages from `topic` starting at
    /// `start_offset`. An unknown topic yields an empty result, not an error.
    pub async fn consume(
        &self,
        topic: &str,
        start_offset: u64,
        max_messages: u32,
    ) -> Result<Vec<Message>> {
        validate_topic_name(topic)?;
        match self.registry.get(topic).await {
            Some(handle) => handle.read_range(start_offset, max_messages).await,
            None => Ok(Vec::new()),
        }
    }

    /// The offset the next message produced to `topic` would receive; `0` for
    /// unknown topics.
    pub async fn next_offset(&self, topic: &str) -> u64 {
        match self.registry.get(topic).await {
            Some(handle) => handle.next_offset().await,
            None => 0,
        }
    }

    /// Explicitly create a topic; `true` on success, including when the topic
    /// already exists.
    pub async fn create_topic(&self, topic: &str) -> Result<bool> {
        validate_topic_name(topic)?;
        self.registry.create(topic).await
    }

    /// Snapshot of all topic names.
    pub async fn list_topics(&self) -> Vec<String> {
        self.registry.list().await
    }

    /// Flush all topics to durable storage; used at shutdown.
    pub async fn flush(&self) -> Result<()> {
        self.registry.flush_all().await
    }

    fn notify_new_message(&self, message: &Message) {
        let listeners: Vec<Arc<dyn NewMessageListener>> = {
            let guard = self.listeners.lock().unwrap_or_else(|e| e.into_inner());
            guard.clone()
        };
        for listener in listeners {
            listener.on_new_message(message);
        }
    }
}

impl std::fmt::Debug for Broker {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Broker")
            .field("registry", &self.registry)
            .finish_non_exhaustive()
    }
}
