//! Binary protocol request frames.
//!
//! Every frame starts with a one-byte command followed by a big-endian `u32`
//! payload length. Request payloads use short strings (`u16` length) for
//! topic names and long byte strings (`u32` length) for message payloads.

use bytes::Bytes;
use nom::number::complete::{be_u32, be_u64};
use num_derive::FromPrimitive;
use num_traits::FromPrimitive as _;

use crate::error::{Error, Result};
use crate::parser::{bytes_to_string, parse_complete, parse_long_bytes, parse_short_string};

/// Command byte identifying each frame type, requests and responses alike.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive)]
pub enum CommandKind {
    ProduceRequest = 0x01,
    ConsumeRequest = 0x02,
    NextOffsetRequest = 0x03,
    CreateTopicRequest = 0x04,
    ListTopicsRequest = 0x05,

    ProduceResponse = 0x81,
    ConsumeResponse = 0x82,
    NextOffsetResponse = 0x83,
    CreateTopicResponse = 0x84,
    ListTopicsResponse = 0x85,

    ErrorResponse = 0xFF,
}

impl CommandKind {
    pub fn from_wire(byte: u8) -> Option<Self> {
        Self::from_u8(byte)
    }

    /// The response kind paired with a request kind; identity for responses.
    pub fn response_kind(self) -> CommandKind {
        match self {
            CommandKind::ProduceRequest => CommandKind::ProduceResponse,
            CommandKind::ConsumeRequest => CommandKind::ConsumeResponse,
            CommandKind::NextOffsetRequest => CommandKind::NextOffsetResponse,
            CommandKind::CreateTopicRequest => CommandKind::CreateTopicResponse,
            CommandKind::ListTopicsRequest => CommandKind::ListTopicsResponse,
            other => other,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceRequestData {
    pub topic: String,
    pub payload: Bytes,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeRequestData {
    pub topic: String,
    pub start_offset: u64,
    pub max_messages: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TopicRequestData {
    pub topic: String,
}

/// A parsed request frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Request {
    Produce(ProduceRequestData),
    Consume(ConsumeRequestData),
    NextOffset(TopicRequestData),
    CreateTopic(TopicRequestData),
    ListTopics,
}

impl Request {
    /// Parse a request payload for the given command byte.
    pub fn parse(command: u8, payload: Bytes) -> Result<Request> {
        let kind = CommandKind::from_wire(command)
            .ok_or_else(|| Error::Protocol(format!("unknown command byte 0x{command:02x}")))?;

        match kind {
            CommandKind::ProduceRequest => {
                let (topic, body) = parse_complete(payload, "ProduceRequest", |input| {
                    let (input, topic) = parse_short_string(input)?;
                    let (input, body) = parse_long_bytes(input)?;
                    Ok((input, (topic, body)))
                })?;
                Ok(Request::Produce(ProduceRequestData {
                    topic: bytes_to_string(&topic)?,
                    payload: body,
                }))
            }
            CommandKind::ConsumeRequest => {
                let (topic, start_offset, max_messages) =
                    parse_complete(payload, "ConsumeRequest", |input| {
                        let (input, topic) = parse_short_string(input)?;
                        let (input, start_offset) = be_u64(input)?;
                        let (input, max_messages) = be_u32(input)?;
                        Ok((input, (topic, start_offset, max_messages)))
                    })?;
                Ok(Request::Consume(ConsumeRequestData {
                    topic: bytes_to_string(&topic)?,
                    start_offset,
                    max_messages,
                }))
            }
            CommandKind::NextOffsetRequest => {
                let topic = parse_complete(payload, "NextOffsetRequest", parse_short_string)?;
                Ok(Request::NextOffset(TopicRequestData {
                    topic: bytes_to_string(&topic)?,
                }))
            }
            CommandKind::CreateTopicRequest => {
                let topic = parse_complete(payload, "CreateTopicRequest", parse_short_string)?;
                Ok(Request::CreateTopic(TopicRequestData {
                    topic: bytes_to_string(&topic)?,
                }))
            }
            CommandKind::ListTopicsRequest => {
                if !payload.is_empty() {
                    return Err(Error::Protocol(
                        "ListTopicsRequest: did not consume entire payload".to_string(),
                    ));
                }
                Ok(Request::ListTopics)
            }
            other => Err(Error::Protocol(format!(
                "command {other:?} is not a request"
            ))),
        }
    }

    /// The request's command kind.
    pub fn kind(&self) -> CommandKind {
        match self {
            Request::Produce(_) => CommandKind::ProduceRequest,
            Request::Consume(_) => CommandKind::ConsumeRequest,
            Request::NextOffset(_) => CommandKind::NextOffsetRequest,
            Request::CreateTopic(_) => CommandKind::CreateTopicRequest,
            Request::ListTopics => CommandKind::ListTopicsRequest,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::encode::{encode_long_bytes, encode_short_string};

    #[test]
    fn test_parse_produce_request() {
        let mut payload = Vec::new();
        encode_short_string(&mut payload, "orders").unwrap();
        encode_long_bytes(&mut payload, b"hello").unwrap();

        let request = Request::parse(0x01, Bytes::from(payload)).unwrap();
        assert_eq!(
            request,
            Request::Produce(ProduceRequestData {
                topic: "orders".to_string(),
                payload: Bytes::from("hello"),
            })
        );
    }

    #[test]
    fn test_parse_consume_request() {
        let mut payload = Vec::new();
        encode_short_string(&mut payload, "orders").unwrap();
        payload.extend_from_slice(&42u64.to_be_bytes());
        payload.extend_from_slice(&100u32.to_be_bytes());

        let request = Request::parse(0x02, Bytes::from(payload)).unwrap();
        assert_eq!(
            request,
            Request::Consume(ConsumeRequestData {
                topic: "orders".to_string(),
                start_offset: 42,
                max_messages: 100,
            })
        );
    }

    #[test]
    fn test_parse_topic_only_requests() {
        let mut payload = Vec::new();
        encode_short_string(&mut payload, "orders").unwrap();

        let next = Request::parse(0x03, Bytes::from(payload.clone())).unwrap();
        assert!(matches!(next, Request::NextOffset(ref d) if d.topic == "orders"));

        let create = Request::parse(0x04, Bytes::from(payload)).unwrap();
        assert!(matches!(create, Request::CreateTopic(ref d) if d.topic == "orders"));
    }

    #[test]
    fn test_parse_list_topics_request() {
        assert_eq!(
            Request::parse(0x05, Bytes::new()).unwrap(),
            Request::ListTopics
        );
        assert!(Request::parse(0x05, Bytes::from_static(b"x")).is_err());
    }

    #[test]
    fn test_unknown_command_byte() {
        assert!(matches!(
            Request::parse(0x42, Bytes::new()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_response_byte_is_not_a_request() {
        assert!(matches!(
            Request::parse(0x81, Bytes::new()),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_trailing_bytes_rejected() {
        let mut payload = Vec::new();
        encode_short_string(&mut payload, "orders").unwrap();
        encode_long_bytes(&mut payload, b"hello").unwrap();
        payload.push(0xAA);
        assert!(matches!(
            Request::parse(0x01, Bytes::from(payload)),
            Err(Error::Protocol(_))
        ));
    }

    #[test]
    fn test_response_kind_pairing() {
        assert_eq!(
            CommandKind::ProduceRequest.response_kind(),
            CommandKind::ProduceResponse
        );
        assert_eq!(
            CommandKind::ListTopicsRequest.response_kind(),
            CommandKind::ListTopicsResponse
        );
        assert_eq!(
            CommandKind::ErrorResponse.response_kind(),
            CommandKind::ErrorResponse
        );
    }
}
