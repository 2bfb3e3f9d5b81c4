//! Stream framing for socket transports.
//!
//! The wire codec in `gridbus-types` defines the multipart frame layout;
//! this module adds the outer message boundary a byte stream needs: each
//! message is a u32 big-endian length followed by that many bytes of
//! encoded frames. The length is checked before any allocation so a
//! misbehaving peer cannot request an arbitrarily large buffer.

use gridbus_types::wire::{decode_frames, encode_frames};
use gridbus_types::WireError;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum encoded size of one message on the stream.
pub const MAX_MESSAGE_LEN: usize = 2 * 1024 * 1024;

/// Errors produced while reading or writing stream messages.
#[derive(Debug, thiserror::Error)]
pub enum CodecError {
    /// The underlying stream failed.
    #[error("transport i/o error: {0}")]
    Io(#[from] std::io::Error),
    /// The peer announced a message larger than [`MAX_MESSAGE_LEN`].
    #[error("message of {len} bytes exceeds {MAX_MESSAGE_LEN}")]
    Oversize { len: usize },
    /// The message body was not a valid frame sequence.
    #[error(transparent)]
    Wire(#[from] WireError),
}

/// Read one complete message from the stream.
///
/// Returns `Ok(None)` on a clean end-of-stream at a message boundary; EOF
/// in the middle of a message is an error.
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Vec<Vec<u8>>>, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    match reader.read_exact(&mut len_buf).await {
        Ok(_) => {}
        Err(err) if err.kind() == std::io::ErrorKind::UnexpectedEof => return Ok(None),
        Err(err) => return Err(err.into()),
    }

    let len = u32::from_be_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_LEN {
        return Err(CodecError::Oversize { len });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await?;
    Ok(Some(decode_frames(&body)?))
}

/// Write one complete message to the stream and flush it.
pub async fn write_message<W>(writer: &mut W, frames: &[Vec<u8>]) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let body = encode_frames(frames);
    if body.len() > MAX_MESSAGE_LEN {
        return Err(CodecError::Oversize { len: body.len() });
    }
    writer.write_all(&(body.len() as u32).to_be_bytes()).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}
