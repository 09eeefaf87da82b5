//! Length-prefixed message framing (C1).
//!
//! Every message on the wire is a 4-byte big-endian length followed by
//! exactly that many bytes of payload. This module knows nothing about the
//! meaning of a payload; it only guarantees that `read_frame` returns whole
//! messages and that `write_frame` rejects anything too large to send.

use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::constants::MAX_MESSAGE_LENGTH;

#[derive(Debug, Error)]
pub enum FramingError {
    #[error("message of {0} bytes exceeds the {1} byte limit")]
    TooLarge(usize, usize),
    #[error("connection closed")]
    Closed,
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),
}

pub type Result<T> = std::result::Result<T, FramingError>;

/// Write `payload` as one length-prefixed frame.
pub async fn write_frame<W: AsyncWrite + Unpin>(stream: &mut W, payload: &[u8]) -> Result<()> {
    if payload.len() > MAX_MESSAGE_LENGTH {
        return Err(FramingError::TooLarge(payload.len(), MAX_MESSAGE_LENGTH));
    }
    let len = payload.len() as u32;
    stream.write_all(&len.to_be_bytes()).await?;
    stream.write_all(payload).await?;
    stream.flush().await?;
    Ok(())
}

/// Read one length-prefixed frame, returning its payload.
///
/// Returns `FramingError::Closed` if the peer closed the connection before
/// any bytes of a new frame arrived. A length prefix that exceeds
/// `MAX_MESSAGE_LENGTH` is a protocol violation, not an I/O error — the
/// caller is expected to close the connection in response.
pub async fn read_frame<R: AsyncRead + Unpin>(stream: &mut R) -> Result<Vec<u8>> {
    let mut len_buf = [0u8; 4];
    match stream.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(e) if e.kind() == std::io::ErrorKind::UnexpectedEof => return Err(FramingError::Closed),
        Err(e) => return Err(e.into()),
    }
    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LENGTH {
        return Err(FramingError::TooLarge(len, MAX_MESSAGE_LENGTH));
    }
    let mut payload = vec![0u8; len];
    stream.read_exact(&mut payload).await?;
    Ok(payload)
}
