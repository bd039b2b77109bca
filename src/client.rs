//! Async client for the binary broker protocol.
//!
//! One [`BrokerClient`] wraps one TCP connection and issues requests
//! sequentially; responses are matched by arrival order, which the protocol
//! guarantees per connection.

use bytes::{BufMut, Bytes};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpStream, ToSocketAddrs};

use crate::encode::{encode_long_bytes, encode_short_string};
use crate::error::{Error, Result, StatusCode};
use crate::message::Message;
use crate::server::request::CommandKind;
use crate::server::response::{
    ConsumeResponseData, ErrorResponseData, ListTopicsResponseData, NextOffsetResponseData,
    ProduceResponseData, ResponseHeader, RESPONSE_HEADER_SIZE,
};

/// A connection to a gazette broker speaking the binary protocol.
pub struct BrokerClient {
    stream: TcpStream,
}

impl BrokerClient {
    /// Connect to a broker server.
    pub async fn connect(addr: impl ToSocketAddrs) -> Result<Self> {
        let stream = TcpStream::connect(addr).await?;
        Ok(Self { stream })
    }

    /// Produce `payload` to `topic`; returns the assigned offset.
    pub async fn produce(&mut self, topic: &str, payload: impl Into<Bytes>) -> Result<u64> {
        let mut body = Vec::new();
        encode_short_string(&mut body, topic)?;
        encode_long_bytes(&mut body, &payload.into())?;

        let payload = self
            .request(CommandKind::ProduceRequest, &body, CommandKind::ProduceResponse)
            .await?;
        Ok(ProduceResponseData::parse(payload)?.offset)
    }

    /// Read up to `max_messages` messages of `topic` starting at
    /// `start_offset`.
    pub async fn consume(
        &mut self,
        topic: &str,
        start_offset: u64,
        max_messages: u32,
    ) -> Result<Vec<Message>> {
        let mut body = Vec::new();
        encode_short_string(&mut body, topic)?;
        body.put_u64(start_offset);
        body.put_u32(max_messages);

        let payload = self
            .request(CommandKind::ConsumeRequest, &body, CommandKind::ConsumeResponse)
            .await?;
        Ok(ConsumeResponseData::parse(payload, topic)?.messages)
    }

    /// The offset the next message produced to `topic` would receive.
    pub async fn next_offset(&mut self, topic: &str) -> Result<u64> {
        let mut body = Vec::new();
        encode_short_string(&mut body, topic)?;

        let payload = self
            .request(
                CommandKind::NextOffsetRequest,
                &body,
                CommandKind::NextOffsetResponse,
            )
            .await?;
        Ok(NextOffsetResponseData::parse(payload)?.next_offset)
    }

    /// Create `topic` if it does not exist.
    pub async fn create_topic(&mut self, topic: &str) -> Result<bool> {
        let mut body = Vec::new();
        encode_short_string(&mut body, topic)?;

        self.request(
            CommandKind::CreateTopicRequest,
            &body,
            CommandKind::CreateTopicResponse,
        )
        .await?;
        Ok(true)
    }

    /// All topic names known to the broker.
    pub async fn list_topics(&mut self) -> Result<Vec<String>> {
        let payload = self
            .request(
                CommandKind::ListTopicsRequest,
                &[],
                CommandKind::ListTopicsResponse,
            )
            .await?;
        Ok(ListTopicsResponseData::parse(payload)?.topics)
    }

    /// Send one request frame and read back one response frame, mapping
    /// error responses to crate errors.
    async fn request(
        &mut self,
        command: CommandKind,
        body: &[u8],
        expected: CommandKind,
    ) -> Result<Bytes> {
        let mut frame = Vec::with_capacity(5 + body.len());
        frame.put_u8(command as u8);
        frame.put_u32(body.len() as u32);
        frame.extend_from_slice(body);
        self.stream.write_all(&frame).await?;
        self.stream.flush().await?;

        let mut raw_header = [0u8; RESPONSE_HEADER_SIZE];
        self.stream.read_exact(&mut raw_header).await?;
        let header = ResponseHeader::parse(&raw_header)?;

        let mut payload = vec![0u8; header.payload_len as usize];
        self.stream.read_exact(&mut payload).await?;
        let payload = Bytes::from(payload);

        if header.kind == CommandKind::ErrorResponse || header.status != StatusCode::Success {
            let message = ErrorResponseData::parse(payload)
                .map(|e| e.message)
                .unwrap_or_else(|_| "unreadable error response".to_string());
            return Err(header.status.into_error(message));
        }
        if header.kind != expected {
            return Err(Error::Protocol(format!(
                "expected {expected:?}, server answered {:?}",
                header.kind
            )));
        }
        Ok(payload)
    }
}

impl std::fmt::Debug for BrokerClient {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("BrokerClient").finish_non_exhaustive()
    }
}
