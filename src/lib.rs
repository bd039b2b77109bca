//! # Gazette
//! A persistent, topic-partitioned append-only log with live push
//! subscriptions; a small message broker in pure Rust.
//!
//! Producers append opaque byte payloads to named topics and receive a
//! monotonically increasing 64-bit offset. Consumers read ranges of messages
//! starting at any offset. Subscribers receive newly produced messages pushed
//! to them in real time. Every topic is backed by an on-disk log plus an
//! offset index and survives process restarts, including unclean ones.
//!
//! # Goals
//! - Durable per-topic storage with crash recovery that reconciles the data
//!   log, the offset index, and the topic metadata
//! - Producer-to-subscriber ordering: pushes are enqueued in offset order
//! - Leverage best in class libraries such as [Tokio](https://tokio.rs/),
//!   [Nom](https://docs.rs/nom/latest/nom/) and [Axum](https://docs.rs/axum)
//!
//! ## Getting started
//! Open a [`Broker`](broker::Broker) rooted at a data directory and produce
//! into it; topics are created on demand:
//!
//! ```rust,no_run
//! use gazette::prelude::*;
//! use bytes::Bytes;
//!
//! #[tokio::main]
//! async fn main() -> Result<()> {
//!     let broker = Broker::open("./gazette-data").await?;
//!     let offset = broker.produce("orders", Bytes::from("hello")).await?;
//!     let messages = broker.consume("orders", offset, 10).await?;
//!     assert_eq!(messages[0].payload, Bytes::from("hello"));
//!     Ok(())
//! }
//! ```
//!
//! ### Serving the broker
//! Three front-ends expose the same core: a length-prefixed binary TCP
//! protocol ([`server::BrokerServer`] with [`client::BrokerClient`]), a JSON
//! REST API with a server-sent-events live tail ([`http`]), and a
//! JSON-over-WebSocket interface ([`ws`]). Push transports register with the
//! [`SubscriptionManager`](subscription::SubscriptionManager), which fans
//! each append out to per-subscriber delivery queues without ever blocking
//! the producer.

#![forbid(unsafe_code)]

pub mod broker;
pub mod client;
pub mod config;
pub mod constants;
pub mod encode;
pub mod error;
pub mod http;
pub mod message;
pub mod parser;
pub mod server;
pub mod storage;
pub mod subscription;
pub mod telemetry;
pub mod ws;

pub mod prelude {
    //! Main exports for embedding or serving a broker.
    pub use crate::broker::{Broker, NewMessageListener};
    pub use crate::client::BrokerClient;
    pub use crate::config::ServerConfig;
    pub use crate::error::{Error, Result, StatusCode};
    pub use crate::message::{Message, MessageBatch};
    pub use crate::subscription::SubscriptionManager;

    pub use bytes;
}
