//! Crate and protocol level errors.
//!
//! The crate surfaces a single [`Error`] enum covering the storage engine,
//! the broker façade, and the wire front-ends. The binary protocol maps each
//! error onto a one-byte [`StatusCode`] carried in every response header.

use std::{io, result};

use num_derive::FromPrimitive;
use thiserror::Error as ThisError;

pub type Result<T> = result::Result<T, Error>;

/// Errors surfaced by the broker core and its front-ends.
#[derive(Clone, Debug, ThisError)]
pub enum Error {
    /// A request argument failed validation (empty topic, empty payload,
    /// malformed topic name).
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    /// The topic does not exist and the operation does not create topics.
    #[error("topic not found: {0}")]
    TopicNotFound(String),

    /// An error in file or network I/O.
    #[error("I/O error: {0:?}")]
    Io(io::ErrorKind),

    /// Persisted data could not be read back consistently.
    #[error("corruption: {0}")]
    Corruption(String),

    /// A wire frame or payload could not be parsed.
    #[error("protocol error: {0}")]
    Protocol(String),

    /// The payload exceeds [`MAX_PAYLOAD`](crate::constants::MAX_PAYLOAD).
    #[error("payload of {got} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { got: usize, max: usize },

    /// An unexpected server-side failure.
    #[error("internal error: {0}")]
    Internal(String),
}

impl PartialEq for Error {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Error::InvalidArgument(a), Error::InvalidArgument(b)) => a == b,
            (Error::TopicNotFound(a), Error::TopicNotFound(b)) => a == b,
            (Error::Io(a), Error::Io(b)) => a == b,
            (Error::Corruption(a), Error::Corruption(b)) => a == b,
            (Error::Protocol(a), Error::Protocol(b)) => a == b,
            (
                Error::PayloadTooLarge { got: a, max: am },
                Error::PayloadTooLarge { got: b, max: bm },
            ) => a == b && am == bm,
            (Error::Internal(a), Error::Internal(b)) => a == b,
            _ => false,
        }
    }
}

impl Eq for Error {}

impl From<io::Error> for Error {
    fn from(e: io::Error) -> Self {
        Error::Io(e.kind())
    }
}

impl Error {
    /// The wire status code carried in binary protocol error responses.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Error::InvalidArgument(_) => StatusCode::InvalidRequest,
            Error::TopicNotFound(_) => StatusCode::TopicNotFound,
            Error::Io(_) => StatusCode::ProduceFailed,
            Error::Corruption(_) => StatusCode::InternalServer,
            Error::Protocol(_) => StatusCode::Serialization,
            Error::PayloadTooLarge { .. } => StatusCode::PayloadTooLarge,
            Error::Internal(_) => StatusCode::InternalServer,
        }
    }
}

/// One-byte status carried in every binary protocol response header.
///
/// `Success` accompanies normal responses; every other value accompanies an
/// `ErrorResponse` frame whose payload is a human-readable message.
#[derive(Debug, Copy, Clone, PartialEq, Eq, FromPrimitive, Default)]
pub enum StatusCode {
    #[default]
    Success = 0x00,
    /// The requested topic does not exist on this broker.
    TopicNotFound = 0x01,
    /// The requested offset is outside the range maintained for the topic.
    InvalidOffset = 0x02,
    /// A request or response payload could not be formed or parsed.
    Serialization = 0x03,
    /// The append was rejected or failed before an offset was assigned.
    ProduceFailed = 0x04,
    /// An unexpected server error.
    InternalServer = 0x05,
    /// The request failed argument validation.
    InvalidRequest = 0x06,
    /// The payload exceeds the broker's maximum accepted size.
    PayloadTooLarge = 0x07,
    /// The command byte is not part of the protocol.
    UnknownCommand = 0x08,
}

impl StatusCode {
    /// Reconstruct the crate error a peer reported over the wire.
    pub fn into_error(self, message: String) -> Error {
        match self {
            StatusCode::Success => Error::Internal(message),
            StatusCode::TopicNotFound => Error::TopicNotFound(message),
            StatusCode::InvalidOffset | StatusCode::InvalidRequest => {
                Error::InvalidArgument(message)
            }
            StatusCode::Serialization | StatusCode::UnknownCommand => Error::Protocol(message),
            StatusCode::ProduceFailed => Error::Io(io::ErrorKind::Other),
            StatusCode::InternalServer => Error::Internal(message),
            StatusCode::PayloadTooLarge => Error::PayloadTooLarge {
                got: 0,
                max: crate::constants::MAX_PAYLOAD,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use num_traits::FromPrimitive;

    #[test]
    fn test_error_io_error() {
        let err = Error::Io(io::ErrorKind::ConnectionRefused);
        assert_eq!(err, Error::Io(io::ErrorKind::ConnectionRefused));
    }

    #[test]
    fn test_error_display() {
        let err = Error::TopicNotFound("orders".to_string());
        let display = format!("{}", err);
        assert!(display.contains("topic not found"));
        assert!(display.contains("orders"));
    }

    #[test]
    fn test_error_is_std_error() {
        let err: Box<dyn std::error::Error> =
            Box::new(Error::InvalidArgument("empty topic".to_string()));
        assert!(err.to_string().contains("invalid argument"));
    }

    #[test]
    fn test_payload_too_large_display() {
        let err = Error::PayloadTooLarge {
            got: 128,
            max: 64,
        };
        let display = format!("{}", err);
        assert!(display.contains("128"));
        assert!(display.contains("64"));
    }

    #[test]
    fn test_status_code_from_primitive() {
        assert_eq!(StatusCode::from_u8(0x00), Some(StatusCode::Success));
        assert_eq!(StatusCode::from_u8(0x01), Some(StatusCode::TopicNotFound));
        assert_eq!(StatusCode::from_u8(0x07), Some(StatusCode::PayloadTooLarge));
        assert_eq!(StatusCode::from_u8(0x08), Some(StatusCode::UnknownCommand));
    }

    #[test]
    fn test_status_code_unknown_value() {
        assert_eq!(StatusCode::from_u8(0x09), None);
        assert_eq!(StatusCode::from_u8(0xFF), None);
    }

    #[test]
    fn test_error_to_status_code() {
        assert_eq!(
            Error::TopicNotFound("t".into()).status_code(),
            StatusCode::TopicNotFound
        );
        assert_eq!(
            Error::InvalidArgument("x".into()).status_code(),
            StatusCode::InvalidRequest
        );
        assert_eq!(
            Error::PayloadTooLarge { got: 1, max: 0 }.status_code(),
            StatusCode::PayloadTooLarge
        );
        assert_eq!(
            Error::Protocol("bad frame".into()).status_code(),
            StatusCode::Serialization
        );
    }

    #[test]
    fn test_status_code_round_trips_topic_not_found() {
        let err = StatusCode::TopicNotFound.into_error("orders".to_string());
        assert_eq!(err, Error::TopicNotFound("orders".to_string()));
    }

    #[test]
    fn test_error_clone() {
        let err = Error::Corruption("truncated record".to_string());
        assert_eq!(err, err.clone());
    }
}
