//! Deserialize data from the binary wire protocol.
//!
//! Counterpart of [`encode`](crate::encode): big-endian integers, short
//! strings (`u16` length prefix) for topic names, long byte strings (`u32`
//! length prefix) for payloads. Declared lengths are validated against
//! [`MAX_PAYLOAD`](crate::constants::MAX_PAYLOAD) before any allocation.

use bytes::Bytes;
use nom::{
    IResult,
    bytes::complete::take,
    number::complete::{be_u16, be_u32},
};
use nombytes::NomBytes;

use crate::constants::MAX_PAYLOAD;
use crate::error::{Error, Result};

/// Convert bytes to a validated UTF-8 string.
pub fn bytes_to_string(bytes: &Bytes) -> Result<String> {
    std::str::from_utf8(bytes)
        .map(|s| s.to_string())
        .map_err(|_| Error::Protocol("string field is not valid UTF-8".to_string()))
}

/// Parse a short string: `u16` length prefix followed by the bytes.
pub fn parse_short_string(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u16(s)?;
    let (s, string) = take(length)(s)?;
    Ok((s, string.into_bytes()))
}

/// Parse a long byte string: `u32` length prefix followed by the bytes.
///
/// Fails with `TooLarge` if the declared length exceeds the payload bound,
/// so a malformed frame cannot trigger an oversized allocation.
pub fn parse_long_bytes(s: NomBytes) -> IResult<NomBytes, Bytes> {
    let (s, length) = be_u32(s)?;
    if length as usize > MAX_PAYLOAD {
        return Err(nom::Err::Failure(nom::error::Error::new(
            s,
            nom::error::ErrorKind::TooLarge,
        )));
    }
    let (s, bytes) = take(length)(s)?;
    Ok((s, bytes.into_bytes()))
}

/// Run a frame-payload parser to completion.
///
/// The binary protocol requires every request and response payload to be
/// consumed exactly; trailing bytes mean the peer and we disagree about the
/// frame layout.
pub fn parse_complete<O>(
    payload: Bytes,
    what: &str,
    parser: impl FnOnce(NomBytes) -> IResult<NomBytes, O>,
) -> Result<O> {
    let input = NomBytes::new(payload);
    match parser(input) {
        Ok((rest, value)) => {
            let rest = rest.into_bytes();
            if rest.is_empty() {
                Ok(value)
            } else {
                Err(Error::Protocol(format!(
                    "{what}: did not consume entire payload ({} bytes left)",
                    rest.len()
                )))
            }
        }
        Err(_) => Err(Error::Protocol(format!("{what}: malformed payload"))),
    }
}
