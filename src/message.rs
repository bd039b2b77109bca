//! The message type shared by the storage engine, the broker, and the
//! front-ends.

use bytes::Bytes;
use serde::ser::SerializeStruct;
use serde::{Serialize, Serializer};

use crate::constants::MAX_TOPIC_NAME_LEN;
use crate::error::{Error, Result};

/// One message in a topic.
///
/// Offsets are zero-based and strictly increasing within a topic; they are
/// assigned at append time and never reused. The payload is opaque to the
/// broker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Message {
    pub offset: u64,
    pub topic: String,
    pub payload: Bytes,
}

impl Message {
    pub fn new(offset: u64, topic: impl Into<String>, payload: Bytes) -> Self {
        Self {
            offset,
            topic: topic.into(),
            payload,
        }
    }
}

// The JSON front-ends (REST, SSE, WebSocket) represent payloads as text.
// Non-UTF-8 bytes are replaced; binary-safe transport is the TCP protocol.
impl Serialize for Message {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut s = serializer.serialize_struct("Message", 3)?;
        s.serialize_field("offset", &self.offset)?;
        s.serialize_field("topic", &self.topic)?;
        s.serialize_field("payload", &String::from_utf8_lossy(&self.payload))?;
        s.end()
    }
}

/// A batch of messages delivered to one subscriber for one topic.
#[derive(Debug, Clone)]
pub struct MessageBatch {
    pub topic: String,
    pub messages: Vec<Message>,
}

/// Validate a topic name.
///
/// Topic names become directory names under the broker's base directory, so
/// they must be non-empty, at most [`MAX_TOPIC_NAME_LEN`] bytes, and must not
/// contain path separators or NUL, nor be `.` or `..`.
pub fn validate_topic_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::InvalidArgument("topic name is empty".to_string()));
    }
    if name.len() > MAX_TOPIC_NAME_LEN {
        return Err(Error::InvalidArgument(format!(
            "topic name exceeds {} bytes",
            MAX_TOPIC_NAME_LEN
        )));
    }
    if name == "." || name == ".." {
        return Err(Error::InvalidArgument(format!(
            "topic name {:?} is reserved",
            name
        )));
    }
    if name.contains(['/', '\\', '\0']) {
        return Err(Error::InvalidArgument(format!(
            "topic name {:?} contains a path separator or NUL",
            name
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_new() {
        let msg = Message::new(7, "orders", Bytes::from("payload"));
        assert_eq!(msg.offset, 7);
        assert_eq!(msg.topic, "orders");
        assert_eq!(msg.payload, Bytes::from("payload"));
    }

    #[test]
    fn test_message_serializes_payload_as_text() {
        let msg = Message::new(3, "orders", Bytes::from("A"));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["offset"], 3);
        assert_eq!(json["topic"], "orders");
        assert_eq!(json["payload"], "A");
    }

    #[test]
    fn test_message_serializes_non_utf8_lossily() {
        let msg = Message::new(0, "t", Bytes::from(vec![0xff, 0xfe]));
        let json = serde_json::to_value(&msg).unwrap();
        assert_eq!(json["payload"], "\u{fffd}\u{fffd}");
    }

    #[test]
    fn test_valid_topic_names() {
        for name in ["orders", "orders-v2", "a", "metrics.cpu", "x_y"] {
            assert!(validate_topic_name(name).is_ok(), "{name} should be valid");
        }
    }

    #[test]
    fn test_invalid_topic_names() {
        for name in ["", ".", "..", "a/b", "a\\b", "nul\0byte"] {
            assert!(
                matches!(validate_topic_name(name), Err(Error::InvalidArgument(_))),
                "{name:?} should be rejected"
            );
        }
    }

    #[test]
    fn test_overlong_topic_name() {
        let name = "t".repeat(MAX_TOPIC_NAME_LEN + 1);
        assert!(matches!(
            validate_topic_name(&name),
            Err(Error::InvalidArgument(_))
        ));
    }
}
