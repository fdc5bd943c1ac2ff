//! Length-prefixed CBOR framing.
//!
//! Each frame is a 4-byte big-endian length followed by that many bytes of
//! CBOR. End of stream is only clean when it falls exactly between frames.

use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use crate::error::{Result, SyncError};
use crate::messages::Frame;

/// Encode a frame to its CBOR body (without the length prefix).
pub fn encode(frame: &Frame) -> Result<Vec<u8>> {
    let mut buf = Vec::new();
    ciborium::into_writer(frame, &mut buf).map_err(|e| SyncError::Codec(e.to_string()))?;
    Ok(buf)
}

/// Decode a CBOR body.
pub fn decode(body: &[u8]) -> Result<Frame> {
    ciborium::from_reader(body).map_err(|e| SyncError::Codec(e.to_string()))
}

/// Write one frame and flush.
pub async fn write_frame<W>(writer: &mut W, frame: &Frame, max_frame_size: usize) -> Result<()>
where
    W: AsyncWrite + Unpin + ?Sized,
{
    let body = encode(frame)?;
    if body.len() > max_frame_size {
        return Err(SyncError::FrameTooLarge {
            size: body.len(),
            max: max_frame_size,
        });
    }

    let len = u32::try_from(body.len()).map_err(|_| SyncError::FrameTooLarge {
        size: body.len(),
        max: u32::MAX as usize,
    })?;

    writer.write_u32(len).await?;
    writer.write_all(&body).await?;
    writer.flush().await?;
    Ok(())
}

/// Read one frame. Returns `None` on a clean end of stream.
pub async fn read_frame<R>(reader: &mut R, max_frame_size: usize) -> Result<Option<Frame>>
where
    R: AsyncRead + Unpin + ?Sized,
{
    let mut header = [0u8; 4];
    let mut filled = 0;
    while filled < header.len() {
        let n = reader.read(&mut header[filled..]).await?;
        if n == 0 {
            if filled == 0 {
                return Ok(None);
            }
            return Err(SyncError::Connection(
                "stream ended inside a frame header".to_string(),
            ));
        }
        filled += n;
    }

    let len = u32::from_be_bytes(header) as usize;
    if len > max_frame_size {
        return Err(SyncError::FrameTooLarge {
            size: len,
            max: max_frame_size,
        });
    }

    let mut body = vec![0u8; len];
    reader.read_exact(&mut body).await.map_err(|e| {
        if e.kind() == std::io::ErrorKind::UnexpectedEof {
            SyncError::Connection("stream ended inside a frame body".to_string())
        } else {
            SyncError::Io(e)
        }
    })?;

    decode(&body).map(Some)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::messages::{Direction, Message};
    use graft_core::NodeRef;

    const MAX: usize = 1024 * 1024;

    #[tokio::test]
    async fn test_frames_in_order_then_clean_eof() {
        let (mut a, mut b) = tokio::io::duplex(4096);

        write_frame(&mut a, &Frame::request(Message::Begin), MAX).await.unwrap();
        write_frame(
            &mut a,
            &Frame::request(Message::NodeData(NodeRef::new("n1", "Page"))),
            MAX,
        )
        .await
        .unwrap();
        drop(a);

        let first = read_frame(&mut b, MAX).await.unwrap().unwrap();
        assert!(matches!(first.message, Message::Begin));

        let second = read_frame(&mut b, MAX).await.unwrap().unwrap();
        assert_eq!(second.direction, Direction::Request);
        assert!(matches!(second.message, Message::NodeData(ref n) if n.id.as_str() == "n1"));

        assert!(read_frame(&mut b, MAX).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(10_000).await.unwrap();

        let err = read_frame(&mut b, 1000).await.unwrap_err();
        assert!(matches!(err, SyncError::FrameTooLarge { size: 10_000, max: 1000 }));
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_truncated_frame_is_fatal() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_all(&[0, 0]).await.unwrap();
        drop(a);

        let err = read_frame(&mut b, MAX).await.unwrap_err();
        assert!(err.is_fatal());
    }

    #[tokio::test]
    async fn test_garbage_body_is_codec_error() {
        let (mut a, mut b) = tokio::io::duplex(64);
        a.write_u32(3).await.unwrap();
        a.write_all(&[0xff, 0xff, 0xff]).await.unwrap();

        let err = read_frame(&mut b, MAX).await.unwrap_err();
        assert!(matches!(err, SyncError::Codec(_)));
    }
}
