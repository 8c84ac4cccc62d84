//! Length-prefixed frame codec.
//!
//! Each frame is a 4-byte little-endian payload length followed by a
//! bincode-encoded message. The length is checked against the caller's limit
//! before any payload buffer is allocated.

use std::io;

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::FrameError;

/// Default upper bound on a single frame (100 MiB), large enough for scans.
pub const DEFAULT_MAX_MESSAGE_SIZE: usize = 100 * 1024 * 1024;

const LEN_PREFIX: usize = 4;

/// Encode a message to bytes with its length prefix.
pub fn encode_frame<T: Serialize>(msg: &T, limit: usize) -> Result<Vec<u8>, FrameError> {
    let payload = bincode::serialize(msg).map_err(FrameError::Encode)?;
    if payload.len() > limit || payload.len() > u32::MAX as usize {
        return Err(FrameError::TooLarge {
            size: payload.len(),
            limit,
        });
    }
    let mut buf = Vec::with_capacity(LEN_PREFIX + payload.len());
    buf.extend_from_slice(&(payload.len() as u32).to_le_bytes());
    buf.extend_from_slice(&payload);
    Ok(buf)
}

/// Decode a message payload (the bytes after the length prefix).
pub fn decode_frame<T: DeserializeOwned>(data: &[u8]) -> Result<T, FrameError> {
    bincode::deserialize(data).map_err(FrameError::Decode)
}

/// Read one frame.
///
/// Returns `Ok(None)` when the peer closed the stream cleanly on a frame
/// boundary. A stream that ends mid-frame is an `UnexpectedEof` error.
pub async fn read_frame<R, T>(reader: &mut R, limit: usize) -> Result<Option<T>, FrameError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut len_buf = [0u8; LEN_PREFIX];
    let mut filled = 0;
    while filled < LEN_PREFIX {
        let n = reader.read(&mut len_buf[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(io::Error::from(io::ErrorKind::UnexpectedEof).into());
        }
        filled += n;
    }

    let size = u32::from_le_bytes(len_buf) as usize;
    if size > limit {
        return Err(FrameError::TooLarge { size, limit });
    }

    let mut payload = vec![0u8; size];
    reader.read_exact(&mut payload).await?;
    decode_frame(&payload).map(Some)
}

/// Write one frame and flush it.
pub async fn write_frame<W, T>(writer: &mut W, msg: &T, limit: usize) -> Result<(), FrameError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let encoded = encode_frame(msg, limit)?;
    writer.write_all(&encoded).await?;
    writer.flush().await?;
    Ok(())
}
