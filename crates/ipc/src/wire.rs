// SPDX-License-Identifier: MIT

//! Wire framing for the daemon's Unix-socket protocol: a 4-byte
//! big-endian length prefix followed by a JSON payload. One frame per
//! `Request` or `Response`.

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::{Request, Response};

/// Frames larger than this are rejected rather than silently truncated
/// by the `u32` length prefix.
const MAX_FRAME_LEN: usize = 64 * 1024 * 1024;

#[derive(Debug, thiserror::Error)]
pub enum ProtocolError {
    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),
    #[error("frame length prefix says {expected} bytes, buffer has {actual}")]
    LengthMismatch { expected: usize, actual: usize },
    #[error("buffer too short to contain a length prefix")]
    Truncated,
}

/// Encodes `value` as a length-prefixed JSON frame, in memory. Used for
/// round-trip tests and anywhere a frame is assembled before being
/// written out as a single write.
pub fn encode<T: Serialize>(value: &T) -> Result<Vec<u8>, ProtocolError> {
    let payload = serde_json::to_vec(value)?;
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(payload.len()));
    }
    let len = u32::try_from(payload.len()).map_err(|_| ProtocolError::FrameTooLarge(payload.len()))?;
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&len.to_be_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decodes a single length-prefixed JSON frame from `bytes`. `bytes`
/// must contain exactly one frame, no trailing data.
pub fn decode<T: DeserializeOwned>(bytes: &[u8]) -> Result<T, ProtocolError> {
    if bytes.len() < 4 {
        return Err(ProtocolError::Truncated);
    }
    let len = u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as usize;
    let payload = &bytes[4..];
    if payload.len() != len {
        return Err(ProtocolError::LengthMismatch { expected: len, actual: payload.len() });
    }
    Ok(serde_json::from_slice(payload)?)
}

/// Reads one length-prefixed JSON frame off an async stream.
pub async fn read_message<R: AsyncRead + Unpin, T: DeserializeOwned>(reader: &mut R) -> Result<T, ProtocolError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf).await?;
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge(len));
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(serde_json::from_slice(&payload)?)
}

/// Writes `value` as one length-prefixed JSON frame to an async stream.
pub async fn write_message<W: AsyncWrite + Unpin, T: Serialize>(writer: &mut W, value: &T) -> Result<(), ProtocolError> {
    let frame = encode(value)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

pub async fn read_request<R: AsyncRead + Unpin>(reader: &mut R) -> Result<Request, ProtocolError> {
    read_message(reader).await
}

pub async fn write_response<W: AsyncWrite + Unpin>(writer: &mut W, response: &Response) -> Result<(), ProtocolError> {
    write_message(writer, response).await
}
