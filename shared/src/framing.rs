//! Length-prefixed framing over async byte streams.
//!
//! A frame is a 4-byte big-endian payload length followed by exactly that
//! many bytes of a bincode-encoded [`Packet`]. Oversized declared lengths are
//! rejected before any payload allocation happens.

use crate::error::ProtocolError;
use crate::protocol::Packet;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Maximum payload length accepted from a peer (8 KiB).
pub const MAX_FRAME_LEN: usize = 8 * 1024;

/// Reads one raw frame payload.
///
/// Returns `Io(UnexpectedEof)` if the stream closes before or during a frame.
pub async fn read_frame_bytes<R>(reader: &mut R) -> Result<Vec<u8>, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; 4];
    reader.read_exact(&mut header).await?;
    let len = u32::from_be_bytes(header) as usize;
    if len > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len,
            max: MAX_FRAME_LEN,
        });
    }
    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await?;
    Ok(payload)
}

/// Reads and decodes one packet.
pub async fn read_frame<R>(reader: &mut R) -> Result<Packet, ProtocolError>
where
    R: AsyncRead + Unpin,
{
    let payload = read_frame_bytes(reader).await?;
    Packet::decode(&payload)
}

/// Writes one raw frame payload.
pub async fn write_frame_bytes<W>(writer: &mut W, payload: &[u8]) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    if payload.len() > MAX_FRAME_LEN {
        return Err(ProtocolError::FrameTooLarge {
            len: payload.len(),
            max: MAX_FRAME_LEN,
        });
    }
    let header = (payload.len() as u32).to_be_bytes();
    writer.write_all(&header).await?;
    writer.write_all(payload).await?;
    writer.flush().await?;
    Ok(())
}

/// Encodes and writes one packet.
pub async fn write_frame<W>(writer: &mut W, packet: &Packet) -> Result<(), ProtocolError>
where
    W: AsyncWrite + Unpin,
{
    let payload = packet.encode()?;
    write_frame_bytes(writer, &payload).await
}
