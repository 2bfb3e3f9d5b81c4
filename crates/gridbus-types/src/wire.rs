//! Transport-agnostic wire codec.
//!
//! A message on the wire is an ordered sequence of frames:
//!
//! ```text
//!   [SENDER, RECIPIENT, PROTO, USER, MSG_ID, SUBSYSTEM, ARG...]
//! ```
//!
//! Each frame is a u32 big-endian length prefix followed by that many bytes.
//! `PROTO` must be the literal signature `GBP1`; receivers check it before
//! interpreting anything else. `RECIPIENT` may be empty (addressed to the
//! router). Zero or more `ARG` frames follow `SUBSYSTEM` and are opaque.
//!
//! Every limit here is enforced at decode so a misbehaving peer cannot make
//! the router allocate unbounded memory from a header.

use crate::envelope::Envelope;
use crate::identity::Identity;

/// Protocol signature frame, third on the wire.
pub const PROTO_SIGNATURE: &[u8] = b"GBP1";

/// Maximum frames per message, header frames included.
pub const MAX_FRAMES: usize = 64;

/// Maximum byte length of any single frame.
pub const MAX_FRAME_LEN: usize = 1024 * 1024;

/// Header frames preceding the argument frames.
const HEADER_FRAMES: usize = 6;

/// Errors produced while encoding or decoding wire messages.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum WireError {
    /// Message ended before all header frames arrived.
    #[error("message has {got} frames, expected at least {HEADER_FRAMES}")]
    TooFewFrames { got: usize },
    /// Message exceeded [`MAX_FRAMES`].
    #[error("message has more than {MAX_FRAMES} frames")]
    TooManyFrames,
    /// A frame exceeded [`MAX_FRAME_LEN`].
    #[error("frame of {len} bytes exceeds {MAX_FRAME_LEN}")]
    FrameTooLarge { len: usize },
    /// Byte buffer ended mid-frame.
    #[error("truncated message: frame length prefix exceeds remaining bytes")]
    Truncated,
    /// The protocol signature frame was wrong.
    #[error("bad protocol signature")]
    BadProtocol,
    /// A header frame that must be UTF-8 was not.
    #[error("header frame {frame} is not valid UTF-8")]
    InvalidUtf8 { frame: &'static str },
    /// Sender or recipient token failed identity validation.
    #[error("invalid identity token in {frame} frame")]
    InvalidIdentity { frame: &'static str },
    /// Subsystem tag outside the closed set.
    #[error("unknown subsystem tag {0:?}")]
    UnknownSubsystem(String),
}

/// Encode a frame list into a contiguous byte buffer.
#[must_use]
pub fn encode_frames(frames: &[Vec<u8>]) -> Vec<u8> {
    let total: usize = frames.iter().map(|f| 4 + f.len()).sum();
    let mut buf = Vec::with_capacity(total);
    for frame in frames {
        buf.extend_from_slice(&(frame.len() as u32).to_be_bytes());
        buf.extend_from_slice(frame);
    }
    buf
}

/// Decode a contiguous byte buffer into a frame list, enforcing limits.
pub fn decode_frames(mut buf: &[u8]) -> Result<Vec<Vec<u8>>, WireError> {
    let mut frames = Vec::new();
    while !buf.is_empty() {
        if frames.len() >= MAX_FRAMES {
            return Err(WireError::TooManyFrames);
        }
        if buf.len() < 4 {
            return Err(WireError::Truncated);
        }
        let len = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) as usize;
        if len > MAX_FRAME_LEN {
            return Err(WireError::FrameTooLarge { len });
        }
        if buf.len() < 4 + len {
            return Err(WireError::Truncated);
        }
        frames.push(buf[4..4 + len].to_vec());
        buf = &buf[4 + len..];
    }
    Ok(frames)
}

fn header_str(frame: &[u8], name: &'static str) -> Result<String, WireError> {
    String::from_utf8(frame.to_vec()).map_err(|_| WireError::InvalidUtf8 { frame: name })
}

/// Split an envelope into its wire frame sequence.
#[must_use]
pub fn envelope_to_frames(env: &Envelope) -> Vec<Vec<u8>> {
    let mut frames = Vec::with_capacity(HEADER_FRAMES + env.args.len());
    frames.push(env.sender.as_str().as_bytes().to_vec());
    frames.push(
        env.recipient
            .as_ref()
            .map(|r| r.as_str().as_bytes().to_vec())
            .unwrap_or_default(),
    );
    frames.push(PROTO_SIGNATURE.to_vec());
    frames.push(env.user.as_bytes().to_vec());
    frames.push(env.id.as_bytes().to_vec());
    frames.push(env.subsystem.as_str().as_bytes().to_vec());
    frames.extend(env.args.iter().cloned());
    frames
}

/// Assemble an envelope from its wire frame sequence.
///
/// Validation order: frame count, protocol signature, then the individual
/// header fields. Payload frames are taken as-is.
pub fn envelope_from_frames(frames: Vec<Vec<u8>>) -> Result<Envelope, WireError> {
    if frames.len() < HEADER_FRAMES {
        return Err(WireError::TooFewFrames { got: frames.len() });
    }
    if frames.len() > MAX_FRAMES {
        return Err(WireError::TooManyFrames);
    }
    if frames[2] != PROTO_SIGNATURE {
        return Err(WireError::BadProtocol);
    }

    let sender = header_str(&frames[0], "sender")?;
    let sender =
        Identity::new(sender).map_err(|_| WireError::InvalidIdentity { frame: "sender" })?;

    let recipient_raw = header_str(&frames[1], "recipient")?;
    let recipient = if recipient_raw.is_empty() {
        None
    } else {
        Some(
            Identity::new(recipient_raw)
                .map_err(|_| WireError::InvalidIdentity { frame: "recipient" })?,
        )
    };

    let user = header_str(&frames[3], "user")?;
    let id = header_str(&frames[4], "id")?;
    let subsystem = header_str(&frames[5], "subsystem")?
        .parse()
        .map_err(|e: crate::envelope::UnknownSubsystem| WireError::UnknownSubsystem(e.0))?;

    let args = frames.into_iter().skip(HEADER_FRAMES).collect();

    Ok(Envelope {
        sender,
        recipient,
        user,
        id,
        subsystem,
        args,
    })
}

/// Encode an envelope straight to bytes.
#[must_use]
pub fn encode_envelope(env: &Envelope) -> Vec<u8> {
    encode_frames(&envelope_to_frames(env))
}

/// Decode an envelope straight from bytes.
pub fn decode_envelope(buf: &[u8]) -> Result<Envelope, WireError> {
    envelope_from_frames(decode_frames(buf)?)
}
