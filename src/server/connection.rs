//! Client connection handling for the binary protocol server.

use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::time::timeout;

use crate::broker::Broker;
use crate::constants::{
    DEFAULT_REQUEST_HANDLER_TIMEOUT_SECS, DEFAULT_REQUEST_READ_TIMEOUT_SECS, MAX_FRAME_SIZE,
};
use crate::error::{Error, Result, StatusCode};
use crate::server::request::Request;
use crate::server::response::{
    encode_error_frame, encode_frame, ConsumeResponseData, ListTopicsResponseData,
    NextOffsetResponseData, ProduceResponseData,
};

/// Size of the request frame header: command byte plus payload length.
const REQUEST_HEADER_SIZE: usize = 5;

/// A raw request frame read off the socket.
struct RequestFrame {
    command: u8,
    payload: Bytes,
}

/// One client connection to the broker server.
pub struct ClientConnection {
    stream: TcpStream,
    addr: SocketAddr,
}

impl ClientConnection {
    pub fn new(stream: TcpStream, addr: SocketAddr) -> Self {
        Self { stream, addr }
    }

    /// Handle requests from this connection until the client disconnects or
    /// an unrecoverable error occurs.
    pub async fn handle_requests(&mut self, broker: Arc<Broker>) -> Result<()> {
        let read_timeout = Duration::from_secs(DEFAULT_REQUEST_READ_TIMEOUT_SECS);
        let handler_timeout = Duration::from_secs(DEFAULT_REQUEST_HANDLER_TIMEOUT_SECS);

        loop {
            // Bound frame reads so a stalled client cannot hold the task.
            let frame = match timeout(read_timeout, self.read_request()).await {
                Ok(Ok(Some(frame))) => frame,
                Ok(Ok(None)) => {
                    tracing::debug!(client = %self.addr, "client disconnected");
                    return Ok(());
                }
                Ok(Err(e)) => {
                    tracing::error!(client = %self.addr, error = ?e, "error reading request");
                    return Err(e);
                }
                Err(_) => {
                    tracing::warn!(
                        client = %self.addr,
                        timeout_secs = DEFAULT_REQUEST_READ_TIMEOUT_SECS,
                        "request read timeout; closing connection"
                    );
                    return Err(Error::Protocol("request read timeout".to_string()));
                }
            };

            let response = match timeout(handler_timeout, dispatch(&broker, frame)).await {
                Ok(response) => response?,
                Err(_) => {
                    tracing::error!(
                        client = %self.addr,
                        timeout_secs = DEFAULT_REQUEST_HANDLER_TIMEOUT_SECS,
                        "request handler timeout; closing connection"
                    );
                    return Err(Error::Internal("request handler timeout".to_string()));
                }
            };

            self.stream.write_all(&response).await?;
            self.stream.flush().await?;
        }
    }

    /// Read one request frame; `None` on a clean disconnect between frames.
    async fn read_request(&mut self) -> Result<Option<RequestFrame>> {
        let mut header = [0u8; REQUEST_HEADER_SIZE];
        match self.stream.read_exact(&mut header).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => return Ok(None),
            Err(e) => return Err(e.into()),
        }

        let command = header[0];
        let payload_len =
            u32::from_be_bytes([header[1], header[2], header[3], header[4]]) as usize;
        if payload_len > MAX_FRAME_SIZE {
            return Err(Error::Protocol(format!(
                "frame payload of {payload_len} bytes exceeds maximum of {MAX_FRAME_SIZE}"
            )));
        }

        let mut payload = vec![0u8; payload_len];
        match self.stream.read_exact(&mut payload).await {
            Ok(_) => {}
            Err(e) if e.kind() == io::ErrorKind::UnexpectedEof => {
                return Err(Error::Protocol(
                    "connection closed mid-frame".to_string(),
                ));
            }
            Err(e) => return Err(e.into()),
        }

        Ok(Some(RequestFrame {
            command,
            payload: Bytes::from(payload),
        }))
    }
}

/// Parse and execute one request, encoding the response frame.
///
/// Broker-level failures become `ErrorResponse` frames rather than closing
/// the connection; only I/O failures on the socket itself propagate.
async fn dispatch(broker: &Arc<Broker>, frame: RequestFrame) -> Result<Vec<u8>> {
    let request = match Request::parse(frame.command, frame.payload) {
        Ok(request) => request,
        Err(e) => {
            tracing::debug!(error = ?e, command = frame.command, "rejecting malformed request");
            return encode_error_frame(&e);
        }
    };

    let kind = request.kind().response_kind();
    let result = match request {
        Request::Produce(data) => broker
            .produce(&data.topic, data.payload)
            .await
            .and_then(|offset| {
                encode_frame(kind, StatusCode::Success, &ProduceResponseData { offset })
            }),
        Request::Consume(data) => broker
            .consume(&data.topic, data.start_offset, data.max_messages)
            .await
            .and_then(|messages| {
                encode_frame(kind, StatusCode::Success, &ConsumeResponseData { messages })
            }),
        Request::NextOffset(data) => {
            let next_offset = broker.next_offset(&data.topic).await;
            encode_frame(
                kind,
                StatusCode::Success,
                &NextOffsetResponseData { next_offset },
            )
        }
        Request::CreateTopic(data) => broker.create_topic(&data.topic).await.and_then(|_| {
            encode_frame(kind, StatusCode::Success, &crate::server::response::CreateTopicAck)
        }),
        Request::ListTopics => {
            let topics = broker.list_topics().await;
            encode_frame(kind, StatusCode::Success, &ListTopicsResponseData { topics })
        }
    };

    match result {
        Ok(frame) => Ok(frame),
        Err(e) => {
            tracing::debug!(error = ?e, "request failed");
            encode_error_frame(&e)
        }
    }
}
