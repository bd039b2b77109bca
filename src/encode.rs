//! Serialize data into the binary wire protocol.
//!
//! All integers on the wire are network (big-endian) byte order. Two string
//! framings exist: "short strings" carry a `u16` length prefix and are used
//! for topic names; "long byte strings" carry a `u32` length prefix and are
//! used for message payloads and error messages.

use bytes::BufMut;

use crate::error::Result;

pub trait ToByte {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()>;
}

impl<'a, T: ToByte + 'a + ?Sized> ToByte for &'a T {
    fn encode<W: BufMut>(&self, buffer: &mut W) -> Result<()> {
        (*self).encode(buffer)
    }
}

impl ToByte for u8 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u8(*self);
        Ok(())
    }
}

impl ToByte for u16 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u16(*self);
        Ok(())
    }
}

impl ToByte for u32 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u32(*self);
        Ok(())
    }
}

impl ToByte for u64 {
    fn encode<T: BufMut>(&self, buffer: &mut T) -> Result<()> {
        buffer.put_u64(*self);
        Ok(())
    }
}

/// Encode a short string: `u16` length prefix followed by the bytes.
pub fn encode_short_string<T: BufMut>(buffer: &mut T, s: &str) -> Result<()> {
    debug_assert!(s.len() <= u16::MAX as usize);
    buffer.put_u16(s.len() as u16);
    buffer.put(s.as_bytes());
    Ok(())
}

/// Encode a long byte string: `u32` length prefix followed by the bytes.
pub fn encode_long_bytes<T: BufMut>(buffer: &mut T, bytes: &[u8]) -> Result<()> {
    buffer.put_u32(bytes.len() as u32);
    buffer.put(bytes);
    Ok(())
}

/// Renders the length of `xs` to `buffer` as the start of a protocol array
/// and then for each element invokes `f`, assuming that function renders the
/// element to the buffer.
pub fn encode_as_array<T, F, W>(buffer: &mut W, xs: &[T], mut f: F) -> Result<()>
where
    F: FnMut(&mut W, &T) -> Result<()>,
    W: BufMut,
{
    buffer.put_u32(xs.len() as u32);
    for x in xs {
        f(buffer, x)?;
    }
    Ok(())
}
