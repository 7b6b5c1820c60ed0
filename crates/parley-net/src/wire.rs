//! Framed reads and writes over any async byte stream.
//!
//! A frame is the 5-byte header followed by exactly `length` payload
//! bytes.  The reader checks the length against its limit before the body
//! buffer is allocated, so an oversize header costs nothing but the
//! header read itself.

use parley_protocol::{DecodeError, FrameError, HEADER_SIZE, Message, decode_header};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

#[derive(Debug, thiserror::Error)]
pub enum WireError {
    /// The peer closed the connection at a frame boundary or mid-frame.
    #[error("connection closed by peer")]
    ConnectionClosed,
    #[error("I/O: {0}")]
    Io(#[from] std::io::Error),
    #[error("framing: {0}")]
    Frame(#[from] FrameError),
    #[error("decode: {0}")]
    Decode(#[from] DecodeError),
}

/// Read one complete message, enforcing `max_payload`.
///
/// The payload buffer is freshly allocated per frame: the decoded message
/// never aliases storage that a later read could overwrite.
pub async fn read_message<R>(reader: &mut R, max_payload: usize) -> Result<Message, WireError>
where
    R: AsyncRead + Unpin,
{
    let mut header = [0u8; HEADER_SIZE];
    reader.read_exact(&mut header).await.map_err(map_eof)?;
    let (kind, len) = decode_header(&header)?;

    let len = len as usize;
    if len > max_payload {
        return Err(FrameError::PayloadTooLarge {
            len,
            max: max_payload,
        }
        .into());
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload).await.map_err(map_eof)?;
    Ok(Message::decode(kind, &payload)?)
}

/// Write one complete message as a single buffer.
pub async fn write_message<W>(writer: &mut W, msg: &Message) -> std::io::Result<()>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&msg.encode()).await?;
    writer.flush().await
}

fn map_eof(e: std::io::Error) -> WireError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        WireError::ConnectionClosed
    } else {
        WireError::Io(e)
    }
}
