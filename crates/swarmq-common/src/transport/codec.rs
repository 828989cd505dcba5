//! Wire codec for multi-frame messages.
//!
//! Wire format: `[u32 frame count]` followed by `[u32 length][bytes]` per
//! frame, all big-endian. Limits below bound what a misbehaving peer can
//! make us allocate.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SwarmqError};
use crate::message::Message;

/// Routing envelopes are a handful of frames; anything past this is a
/// corrupt stream, not a legitimate message.
pub const MAX_FRAMES: u32 = 64;

/// Maximum size of a single frame (16 MiB).
pub const MAX_FRAME_LEN: u32 = 16 * 1024 * 1024;

// Limits are checked in usize so lengths past u32::MAX cannot wrap back
// into range before the cast.
fn frame_count_ok(count: usize) -> bool {
    count >= 1 && count <= MAX_FRAMES as usize
}

fn frame_len_ok(len: usize) -> bool {
    len <= MAX_FRAME_LEN as usize
}

pub async fn write_message<W>(writer: &mut W, message: &Message) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if !frame_count_ok(message.len()) {
        return Err(SwarmqError::Malformed(format!(
            "refusing to send message with {} frames",
            message.len()
        )));
    }

    writer.write_u32(message.len() as u32).await?;
    for frame in message.frames() {
        if !frame_len_ok(frame.len()) {
            return Err(SwarmqError::Malformed(format!(
                "refusing to send {} byte frame",
                frame.len()
            )));
        }
        writer.write_u32(frame.len() as u32).await?;
        writer.write_all(frame).await?;
    }
    writer.flush().await?;
    Ok(())
}

pub async fn read_message<R>(reader: &mut R) -> Result<Message>
where
    R: AsyncRead + Unpin,
{
    let count = reader.read_u32().await?;
    if count == 0 || count > MAX_FRAMES {
        return Err(SwarmqError::Malformed(format!(
            "frame count {count} out of range"
        )));
    }

    let mut frames = Vec::with_capacity(count as usize);
    for _ in 0..count {
        let len = reader.read_u32().await?;
        if len > MAX_FRAME_LEN {
            return Err(SwarmqError::Malformed(format!(
                "frame length {len} exceeds limit"
            )));
        }
        let mut frame = vec![0u8; len as usize];
        reader.read_exact(&mut frame).await?;
        frames.push(frame);
    }
    Ok(Message::from_frames(frames))
}
