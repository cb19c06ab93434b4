//! Message framing over async byte streams.
//!
//! A reader pulls exactly one header, validates it, then pulls exactly the
//! body the header announces. Nothing is read past a frame boundary, so a
//! stream can be handed between readers between frames.

use bytes::BytesMut;
use simnet_core::SessionError;
use simnet_proto::{Frame, FrameHeader, Message};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Read one message.
///
/// Returns `Ok(None)` if the stream ended cleanly at a frame boundary.
///
/// # Errors
///
/// - `SessionError::Protocol` for a malformed header or body
/// - `SessionError::Transport` for I/O failures, including EOF mid-frame
pub async fn read_message<R>(reader: &mut R) -> Result<Option<Message>, SessionError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; FrameHeader::SIZE];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SessionError::Transport(format!(
                "stream ended inside frame header ({filled} of {} bytes)",
                FrameHeader::SIZE
            )));
        }
        filled += n;
    }

    let payload_size = FrameHeader::from_bytes(&header)?.payload_size() as usize;

    let mut buf = BytesMut::with_capacity(FrameHeader::SIZE + payload_size);
    buf.extend_from_slice(&header);
    buf.resize(FrameHeader::SIZE + payload_size, 0);
    reader.read_exact(&mut buf[FrameHeader::SIZE..]).await?;

    let frame = Frame::decode(&buf)?;
    Ok(Some(Message::from_frame(&frame)?))
}

/// Write one message and flush.
///
/// # Errors
///
/// - `SessionError::Protocol` if the message cannot be encoded
/// - `SessionError::Transport` for I/O failures
pub async fn write_message<W>(writer: &mut W, message: Message) -> Result<(), SessionError>
where
    W: AsyncWrite + Unpin,
{
    let frame = message.into_frame()?;
    let mut buf = BytesMut::with_capacity(frame.encoded_len());
    frame.encode(&mut buf)?;

    writer.write_all(&buf).await?;
    writer.flush().await?;
    Ok(())
}
