//! Wire-level grammar shared by every Kafka request and response.
//!
//! Integers are big-endian. Strings are an `i16` length followed by UTF-8
//! bytes, `-1` meaning null. Arrays are an `i32` count followed by the
//! elements. Embedded messages (record batches) are written as an `i32`
//! byte length followed by the opaque blob.

pub mod record_batch;

use bytes::{Buf, BufMut, Bytes, BytesMut};
use log::trace;

use crate::error::{Error, Result};

pub use record_batch::RecordBatch;

/// Largest frame we accept from a broker.
pub const MAX_FRAME_SIZE: i32 = 100 * 1024 * 1024;

pub trait Encodable {
    fn encode(&self, buf: &mut BytesMut) -> Result<()>;
}

pub trait Decodable: Sized {
    fn decode(buf: &mut Bytes) -> Result<Self>;
}

#[inline]
fn ensure(buf: &Bytes, n: usize) -> Result<()> {
    if buf.remaining() < n {
        return Err(Error::UnexpectedEof);
    }
    Ok(())
}

pub fn read_i8(buf: &mut Bytes) -> Result<i8> {
    ensure(buf, 1)?;
    Ok(buf.get_i8())
}

pub fn read_i16(buf: &mut Bytes) -> Result<i16> {
    ensure(buf, 2)?;
    Ok(buf.get_i16())
}

pub fn read_i32(buf: &mut Bytes) -> Result<i32> {
    ensure(buf, 4)?;
    Ok(buf.get_i32())
}

pub fn read_i64(buf: &mut Bytes) -> Result<i64> {
    ensure(buf, 8)?;
    Ok(buf.get_i64())
}

pub fn read_nullable_string(buf: &mut Bytes) -> Result<Option<String>> {
    let len = read_i16(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len)?;
    let raw = buf.split_to(len);
    String::from_utf8(raw.to_vec())
        .map(Some)
        .map_err(|e| Error::Protocol(format!("Invalid UTF-8 in string: {}", e)))
}

pub fn read_string(buf: &mut Bytes) -> Result<String> {
    read_nullable_string(buf)?
        .ok_or_else(|| Error::Protocol("Unexpected null string".to_string()))
}

pub fn read_nullable_bytes(buf: &mut Bytes) -> Result<Option<Bytes>> {
    let len = read_i32(buf)?;
    if len < 0 {
        return Ok(None);
    }
    let len = len as usize;
    ensure(buf, len)?;
    Ok(Some(buf.split_to(len)))
}

/// Reads an array; a null array (`-1`) decodes as empty.
pub fn read_array<T: Decodable>(buf: &mut Bytes) -> Result<Vec<T>> {
    read_array_with(buf, T::decode)
}

/// Like [`read_array`], for elements whose layout depends on the version.
pub fn read_array_with<T, F>(buf: &mut Bytes, mut decode: F) -> Result<Vec<T>>
where
    F: FnMut(&mut Bytes) -> Result<T>,
{
    let count = read_i32(buf)?;
    if count < 0 {
        return Ok(Vec::new());
    }
    // Never trust the count for the allocation size
    let mut items = Vec::with_capacity((count as usize).min(buf.remaining()));
    for _ in 0..count {
        items.push(decode(buf)?);
    }
    Ok(items)
}

pub fn write_nullable_string(buf: &mut BytesMut, value: Option<&str>) -> Result<()> {
    match value {
        None => buf.put_i16(-1),
        Some(s) => {
            let len = i16::try_from(s.len())
                .map_err(|_| Error::Encode(format!("String too long: {} bytes", s.len())))?;
            buf.put_i16(len);
            buf.put_slice(s.as_bytes());
        }
    }
    Ok(())
}

pub fn write_string(buf: &mut BytesMut, value: &str) -> Result<()> {
    write_nullable_string(buf, Some(value))
}

pub fn write_array<'a, T, I>(buf: &mut BytesMut, items: I) -> Result<()>
where
    T: Encodable + 'a,
    I: IntoIterator<Item = &'a T>,
    I::IntoIter: ExactSizeIterator,
{
    let items = items.into_iter();
    let count = i32::try_from(items.len())
        .map_err(|_| Error::Encode(format!("Array too long: {} elements", items.len())))?;
    buf.put_i32(count);
    for item in items {
        item.encode(buf)?;
    }
    Ok(())
}

/// Writes `message` as a length-prefixed opaque blob.
pub fn write_message<T: Encodable>(buf: &mut BytesMut, message: &T) -> Result<()> {
    let mut body = BytesMut::new();
    message.encode(&mut body)?;
    let len = i32::try_from(body.len())
        .map_err(|_| Error::Encode(format!("Message too large: {} bytes", body.len())))?;
    buf.put_i32(len);
    buf.put_slice(&body);
    Ok(())
}

/// Request header v1, used by every non-flexible request version.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestHeader {
    pub api_key: i16,
    pub api_version: i16,
    pub correlation_id: i32,
    pub client_id: Option<String>,
}

impl Encodable for RequestHeader {
    fn encode(&self, buf: &mut BytesMut) -> Result<()> {
        buf.put_i16(self.api_key);
        buf.put_i16(self.api_version);
        buf.put_i32(self.correlation_id);
        write_nullable_string(buf, self.client_id.as_deref())
    }
}

impl Decodable for RequestHeader {
    fn decode(buf: &mut Bytes) -> Result<Self> {
        Ok(RequestHeader {
            api_key: read_i16(buf)?,
            api_version: read_i16(buf)?,
            correlation_id: read_i32(buf)?,
            client_id: read_nullable_string(buf)?,
        })
    }
}

/// Builds a complete size-prefixed request frame.
pub fn encode_request_frame<T: Encodable>(header: &RequestHeader, body: &T) -> Result<BytesMut> {
    let mut buf = BytesMut::with_capacity(256);
    // Reserve the size field and patch it once the frame is complete
    buf.put_i32(0);
    header.encode(&mut buf)?;
    body.encode(&mut buf)?;

    let size = i32::try_from(buf.len() - 4)
        .map_err(|_| Error::Encode(format!("Request too large: {} bytes", buf.len())))?;
    buf[..4].copy_from_slice(&size.to_be_bytes());

    trace!(
        "Encoded request frame: api_key={}, version={}, correlation_id={}, size={}",
        header.api_key, header.api_version, header.correlation_id, size
    );
    Ok(buf)
}

/// Splits a response frame (size prefix already stripped) into its
/// correlation id and body.
pub fn split_response_frame(mut frame: Bytes) -> Result<(i32, Bytes)> {
    let correlation_id = read_i32(&mut frame)?;
    Ok((correlation_id, frame))
}
