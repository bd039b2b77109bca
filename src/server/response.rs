//! Binary protocol response frames.
//!
//! A response frame is `[u8 command][u8 status][u32 payload_len][payload]`,
//! integers big-endian. Success responses use the command byte paired with
//! the request; failures use `ErrorResponse` with a non-success status and a
//! long-string message payload.

use bytes::{BufMut, Bytes, BytesMut};
use nom::multi::length_count;
use nom::number::complete::{be_u32, be_u64};
use num_traits::FromPrimitive as _;

use crate::encode::{encode_as_array, encode_long_bytes, encode_short_string, ToByte};
use crate::error::{Error, Result, StatusCode};
use crate::message::Message;
use crate::parser::{bytes_to_string, parse_complete, parse_long_bytes, parse_short_string};
use crate::server::request::CommandKind;

/// Size of the response frame header on the wire.
pub const RESPONSE_HEADER_SIZE: usize = 6;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProduceResponseData {
    pub offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConsumeResponseData {
    /// Messages for the requested topic; the topic itself is context the
    /// client already has and is not repeated per message on the wire.
    pub messages: Vec<Message>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NextOffsetResponseData {
    pub next_offset: u64,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListTopicsResponseData {
    pub topics: Vec<String>,
}

/// Empty payload acknowledging a topic creation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CreateTopicAck;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ErrorResponseData {
    pub message: String,
}

impl ToByte for CreateTopicAck {
    fn encode<T: BufMut>(&self, _buffer: &mut T) -> Result<()> {
        Ok(())
    }
}

impl ToByte for ProduceResponseData {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.offset.encode(buffer)
    }
}

impl ToByte for ConsumeResponseData {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        encode_as_array(buffer, &self.messages, |buffer, message| {
            message.offset.encode(buffer)?;
            encode_long_bytes(buffer, &message.payload)
        })
    }
}

impl ToByte for NextOffsetResponseData {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        self.next_offset.encode(buffer)
    }
}

impl ToByte for ListTopicsResponseData {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        encode_as_array(buffer, &self.topics, |buffer, topic| {
            encode_short_string(buffer, topic)
        })
    }
}

impl ToByte for ErrorResponseData {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        encode_long_bytes(buffer, self.message.as_bytes())
    }
}

/// Encode a complete response frame: header plus payload.
pub fn encode_frame<R: ToByte>(
    kind: CommandKind,
    status: StatusCode,
    payload: &R,
) -> Result<Vec<u8>> {
    let mut body = BytesMut::new();
    payload.encode(&mut body)?;

    let mut frame = Vec::with_capacity(RESPONSE_HEADER_SIZE + body.len());
    frame.put_u8(kind as u8);
    frame.put_u8(status as u8);
    frame.put_u32(body.len() as u32);
    frame.extend_from_slice(&body);
    Ok(frame)
}

/// Encode an error response frame for `error`, echoing nothing of the failed
/// request beyond its implied command pairing.
pub fn encode_error_frame(error: &Error) -> Result<Vec<u8>> {
    encode_frame(
        CommandKind::ErrorResponse,
        error.status_code(),
        &ErrorResponseData {
            message: error.to_string(),
        },
    )
}

/// A decoded response header.
#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct ResponseHeader {
    pub kind: CommandKind,
    pub status: StatusCode,
    pub payload_len: u32,
}

impl ResponseHeader {
    /// Decode the six header bytes.
    pub fn parse(raw: &[u8; RESPONSE_HEADER_SIZE]) -> Result<Self> {
        let kind = CommandKind::from_wire(raw[0])
            .ok_or_else(|| Error::Protocol(format!("unknown response command 0x{:02x}", raw[0])))?;
        let status = StatusCode::from_u8(raw[1])
            .ok_or_else(|| Error::Protocol(format!("unknown status code 0x{:02x}", raw[1])))?;
        let payload_len = u32::from_be_bytes([raw[2], raw[3], raw[4], raw[5]]);
        Ok(Self {
            kind,
            status,
            payload_len,
        })
    }
}

impl ProduceResponseData {
    pub fn parse(payload: Bytes) -> Result<Self> {
        let offset = parse_complete(payload, "ProduceResponse", be_u64)?;
        Ok(Self { offset })
    }
}

impl ConsumeResponseData {
    /// Parse a consume response; `topic` is the request context the messages
    /// are re-attached to.
    pub fn parse(payload: Bytes, topic: &str) -> Result<Self> {
        let raw = parse_complete(payload, "ConsumeResponse", |input| {
            length_count(be_u32, |input| {
                let (input, offset) = be_u64(input)?;
                let (input, body) = parse_long_bytes(input)?;
                Ok((input, (offset, body)))
            })(input)
        })?;
        Ok(Self {
            messages: raw
                .into_iter()
                .map(|(offset, body)| Message::new(offset, topic, body))
                .collect(),
        })
    }
}

impl NextOffsetResponseData {
    pub fn parse(payload: Bytes) -> Result<Self> {
        let next_offset = parse_complete(payload, "NextOffsetResponse", be_u64)?;
        Ok(Self { next_offset })
    }
}

impl ListTopicsResponseData {
    pub fn parse(payload: Bytes) -> Result<Self> {
        let raw = parse_complete(payload, "ListTopicsResponse", |input| {
            length_count(be_u32, parse_short_string)(input)
        })?;
        let topics = raw
            .iter()
            .map(bytes_to_string)
            .collect::<Result<Vec<String>>>()?;
        Ok(Self { topics })
    }
}

impl ErrorResponseData {
    pub fn parse(payload: Bytes) -> Result<Self> {
        let message = parse_complete(payload, "ErrorResponse", parse_long_bytes)?;
        Ok(Self {
            message: bytes_to_string(&message)?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn split_frame(frame: Vec<u8>) -> (ResponseHeader, Bytes) {
        let header: [u8; RESPONSE_HEADER_SIZE] = frame[..RESPONSE_HEADER_SIZE].try_into().unwrap();
        let header = ResponseHeader::parse(&header).unwrap();
        let payload = Bytes::from(frame[RESPONSE_HEADER_SIZE..].to_vec());
        assert_eq!(header.payload_len as usize, payload.len());
        (header, payload)
    }

    #[test]
    fn test_produce_response_round_trip() {
        let frame = encode_frame(
            CommandKind::ProduceResponse,
            StatusCode::Success,
            &ProduceResponseData { offset: 42 },
        )
        .unwrap();
        let (header, payload) = split_frame(frame);
        assert_eq!(header.kind, CommandKind::ProduceResponse);
        assert_eq!(header.status, StatusCode::Success);
        assert_eq!(ProduceResponseData::parse(payload).unwrap().offset, 42);
    }

    #[test]
    fn test_consume_response_round_trip() {
        let response = ConsumeResponseData {
            messages: vec![
                Message::new(5, "orders", Bytes::from("a")),
                Message::new(6, "orders", Bytes::from("bb")),
            ],
        };
        let frame =
            encode_frame(CommandKind::ConsumeResponse, StatusCode::Success, &response).unwrap();
        let (_, payload) = split_frame(frame);

        let parsed = ConsumeResponseData::parse(payload, "orders").unwrap();
        assert_eq!(parsed, response);
    }

    #[test]
    fn test_consume_response_empty() {
        let response = ConsumeResponseData { messages: vec![] };
        let frame =
            encode_frame(CommandKind::ConsumeResponse, StatusCode::Success, &response).unwrap();
        let (header, payload) = split_frame(frame);
        assert_eq!(header.payload_len, 4);
        assert!(ConsumeResponseData::parse(payload, "orders")
            .unwrap()
            .messages
            .is_empty());
    }

    #[test]
    fn test_list_topics_round_trip() {
        let response = ListTopicsResponseData {
            topics: vec!["invoices".to_string(), "orders".to_string()],
        };
        let frame =
            encode_frame(CommandKind::ListTopicsResponse, StatusCode::Success, &response).unwrap();
        let (_, payload) = split_frame(frame);
        assert_eq!(ListTopicsResponseData::parse(payload).unwrap(), response);
    }

    #[test]
    fn test_error_frame_carries_status_and_message() {
        let frame = encode_error_frame(&Error::TopicNotFound("orders".to_string())).unwrap();
        let (header, payload) = split_frame(frame);
        assert_eq!(header.kind, CommandKind::ErrorResponse);
        assert_eq!(header.status, StatusCode::TopicNotFound);
        let parsed = ErrorResponseData::parse(payload).unwrap();
        assert!(parsed.message.contains("orders"));
    }

    #[test]
    fn test_header_rejects_unknown_bytes() {
        assert!(ResponseHeader::parse(&[0x42, 0, 0, 0, 0, 0]).is_err());
        assert!(ResponseHeader::parse(&[0x81, 0x99, 0, 0, 0, 0]).is_err());
    }
}
