//! Wire format encoding and decoding.
//!
//! Implements the length-prefixed JSON frame:
//! ```text
//! ┌──────────┬──────────────────────────────┬──────────────────────┐
//! │ Length   │ Body                         │ Payload (optional)   │
//! │ 2 bytes  │ UTF-8 JSON, `message_id`     │ `content_size` bytes │
//! │ uint16 BE│ first                        │ sync-response only   │
//! └──────────┴──────────────────────────────┴──────────────────────┘
//! ```
//!
//! The payload is only present on a sync-response whose `message` field is
//! 1, and is not counted in the length header.

use bytes::{BufMut, Bytes, BytesMut};
use serde_json::Value;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::frame::MESSAGE_ID_FIELD;
use super::{Frame, MessageType};
use crate::error::{Error, Result};

/// Length header size in bytes.
pub const LENGTH_HEADER_SIZE: usize = 2;

/// Largest body the length header can describe.
pub const MAX_BODY_SIZE: usize = u16::MAX as usize;

/// Default bound on a sync-response payload read from the peer.
pub const DEFAULT_MAX_PAYLOAD_SIZE: usize = 64 * 1024 * 1024;

/// Sync-response `message` value announcing a trailing payload.
pub const SYNC_FOUND: i64 = 1;

/// Sync-response `message` value for an unknown content id.
pub const SYNC_NOT_FOUND: i64 = 0;

/// Encode the length header for a body of `len` bytes.
///
/// # Example
///
/// ```
/// use clipwire::protocol::encode_length_header;
///
/// assert_eq!(encode_length_header(0x0102).unwrap(), [0x01, 0x02]);
/// assert!(encode_length_header(70_000).is_err());
/// ```
pub fn encode_length_header(len: usize) -> Result<[u8; LENGTH_HEADER_SIZE]> {
    let len = u16::try_from(len).map_err(|_| Error::FrameTooLarge {
        size: len,
        max: MAX_BODY_SIZE,
    })?;
    Ok(len.to_be_bytes())
}

/// Decode the length header.
#[inline]
pub fn decode_length_header(buf: [u8; LENGTH_HEADER_SIZE]) -> usize {
    u16::from_be_bytes(buf) as usize
}

/// Serialize a frame body to compact JSON, checking the size limit.
pub fn encode_body(frame: &Frame) -> Result<Bytes> {
    let body = serde_json::to_vec(&frame.to_body())?;
    if body.len() > MAX_BODY_SIZE {
        return Err(Error::FrameTooLarge {
            size: body.len(),
            max: MAX_BODY_SIZE,
        });
    }
    Ok(Bytes::from(body))
}

/// Encode the header and body, leaving any payload to the caller.
///
/// Used by the writer for scatter/gather writes.
pub fn encode_parts(frame: &Frame) -> Result<([u8; LENGTH_HEADER_SIZE], Bytes)> {
    let body = encode_body(frame)?;
    let header = encode_length_header(body.len())?;
    Ok((header, body))
}

/// Encode a complete frame, trailing payload included, into one buffer.
pub fn encode_frame(frame: &Frame) -> Result<Bytes> {
    let (header, body) = encode_parts(frame)?;
    let payload = frame.payload();

    let mut buf = BytesMut::with_capacity(LENGTH_HEADER_SIZE + body.len() + payload.len());
    buf.put_slice(&header);
    buf.put_slice(&body);
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Parse a body into a frame (without its trailing payload).
pub fn decode_body(body: &[u8]) -> Result<Frame> {
    let mut fields = match serde_json::from_slice::<Value>(body)? {
        Value::Object(fields) => fields,
        other => {
            return Err(Error::Protocol(format!(
                "frame body is not a JSON object: {}",
                other
            )))
        }
    };

    let id = fields
        .remove(MESSAGE_ID_FIELD)
        .and_then(|v| v.as_i64())
        .ok_or(Error::MissingField("message_id"))?;
    let message_type = MessageType::try_from(id)?;

    Ok(Frame {
        message_type,
        fields,
        payload: None,
    })
}

/// Number of raw bytes that follow this frame's body on the stream.
///
/// Errors here mean the stream can no longer be trusted, so they surface as
/// I/O errors rather than protocol errors.
pub fn trailing_payload_len(frame: &Frame) -> Result<usize> {
    if frame.message_type != MessageType::SyncResponse {
        return Ok(0);
    }
    let found = frame.get("message").and_then(Value::as_i64) == Some(SYNC_FOUND);
    if !found {
        return Ok(0);
    }

    frame
        .get("content_size")
        .and_then(Value::as_u64)
        .and_then(|size| u32::try_from(size).ok())
        .map(|size| size as usize)
        .ok_or_else(|| {
            Error::Io(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                "sync-response announces a payload without a valid content_size",
            ))
        })
}

/// Read one frame, and its trailing payload if any.
///
/// A clean end of stream before the length header is reported as
/// [`Error::ConnectionClosed`]. Payloads are bounded by
/// [`DEFAULT_MAX_PAYLOAD_SIZE`].
pub async fn read_frame<R>(reader: &mut R) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    read_frame_limited(reader, DEFAULT_MAX_PAYLOAD_SIZE).await
}

/// Like [`read_frame`], refusing payloads above `max_payload` bytes with
/// [`Error::PayloadTooLarge`] before allocating for them.
pub async fn read_frame_limited<R>(reader: &mut R, max_payload: usize) -> Result<Frame>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; LENGTH_HEADER_SIZE];
    match reader.read_exact(&mut header).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => {
            return Err(Error::ConnectionClosed)
        }
        Err(e) => return Err(e.into()),
    }

    let len = decode_length_header(header);
    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;

    let mut frame = decode_body(&body)?;

    let trailing = trailing_payload_len(&frame)?;
    if trailing > max_payload {
        return Err(Error::PayloadTooLarge {
            size: trailing,
            max: max_payload,
        });
    }
    if trailing > 0 {
        let mut payload = vec![0u8; trailing];
        reader.read_exact(&mut payload).await?;
        frame.payload = Some(Bytes::from(payload));
    } else if frame.message_type == MessageType::SyncResponse
        && frame.get("message").and_then(Value::as_i64) == Some(SYNC_FOUND)
    {
        frame.payload = Some(Bytes::new());
    }

    Ok(frame)
}

/// Write one frame, and its trailing payload if any, then flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let (header, body) = encode_parts(frame)?;
    writer.write_all(&header).await?;
    writer.write_all(&body).await?;
    if let Some(payload) = &frame.payload {
        writer.write_all(payload).await?;
    }
    writer.flush().await?;
    Ok(())
}
