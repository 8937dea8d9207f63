//! Length-prefixed stream framing.
//!
//! Each message travels as a `u32` big-endian length followed by that many
//! bytes of encoded message.

use super::header::HEADER_SIZE;
use crate::error::{ProtocolError, TransportError};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Prefixes an encoded message with its length, producing one contiguous
/// buffer ready for a single write.
pub fn frame(encoded: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + encoded.len());
    buf.extend_from_slice(&(encoded.len() as u32).to_be_bytes());
    buf.extend_from_slice(encoded);
    buf
}

/// Reads the next frame body.
///
/// Returns `Ok(None)` on a clean EOF between frames. A length prefix larger
/// than `max_frame_size` or smaller than a header is a protocol error.
pub async fn read_frame<R>(
    reader: &mut R,
    max_frame_size: usize,
) -> Result<Option<Vec<u8>>, TransportError>
where
    R: AsyncRead + Unpin,
{
    let mut len_buf = [0u8; 4];
    if reader.read(&mut len_buf[..1]).await? == 0 {
        return Ok(None);
    }
    reader.read_exact(&mut len_buf[1..]).await?;

    let size = u32::from_be_bytes(len_buf) as usize;
    if size > max_frame_size {
        return Err(ProtocolError::FrameTooLarge {
            size,
            max: max_frame_size,
        }
        .into());
    }
    if size < HEADER_SIZE {
        return Err(ProtocolError::FrameTooSmall { size }.into());
    }

    let mut body = vec![0u8; size];
    reader.read_exact(&mut body).await?;
    Ok(Some(body))
}

/// Writes one frame and flushes. Used by clients and tests; sessions queue
/// pre-framed buffers instead.
pub async fn write_frame<W>(writer: &mut W, encoded: &[u8]) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
{
    writer.write_all(&frame(encoded)).await?;
    writer.flush().await?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{Message, MessageType};
    use serde_json::json;

    #[tokio::test]
    async fn test_frames_over_a_stream() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        let first = Message::new(MessageType::CHAT_MESSAGE, 1, 0, json!({"text": "hello"}));
        let second = Message::new(MessageType::TEAM_INFO, 2, 0, json!(null));

        write_frame(&mut client, &first.encode().unwrap()).await.unwrap();
        write_frame(&mut client, &second.encode().unwrap()).await.unwrap();
        drop(client);

        let a = read_frame(&mut server, 1024).await.unwrap().unwrap();
        let b = read_frame(&mut server, 1024).await.unwrap().unwrap();
        assert_eq!(Message::decode(&a).unwrap(), first);
        assert_eq!(Message::decode(&b).unwrap(), second);
        assert!(read_frame(&mut server, 1024).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_oversized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&4096u32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::FrameTooLarge { size: 4096, max: 1024 })
        ));
    }

    #[tokio::test]
    async fn test_undersized_frame_is_rejected() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&8u32.to_be_bytes()).await.unwrap();

        let err = read_frame(&mut server, 1024).await.unwrap_err();
        assert!(matches!(
            err,
            TransportError::Protocol(ProtocolError::FrameTooSmall { size: 8 })
        ));
    }

    #[tokio::test]
    async fn test_eof_inside_frame_is_an_error() {
        let (mut client, mut server) = tokio::io::duplex(1024);
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0u8; 10]).await.unwrap();
        drop(client);

        assert!(matches!(
            read_frame(&mut server, 1024).await,
            Err(TransportError::Io(_))
        ));
    }
}
