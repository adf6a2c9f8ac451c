use super::Envelope;
use thiserror::Error;
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

/// Upper bound on a single frame. Anything larger is treated as a protocol
/// violation rather than an allocation request.
pub const MAX_FRAME_LEN: usize = 16 * 1024 * 1024;

/// Codec failures. A decode failure means the stream is no longer at a frame
/// boundary; the caller must close the connection without reading further.
#[derive(Error, Debug)]
pub enum CodecError {
    #[error("failed to encode envelope: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("failed to decode envelope: {0}")]
    Decode(#[from] bincode::error::DecodeError),

    #[error("frame of {0} bytes exceeds the {MAX_FRAME_LEN} byte limit")]
    FrameTooLarge(usize),

    #[error("frame carries {0} trailing bytes past the envelope")]
    TrailingBytes(usize),

    #[error("stream error: {0}")]
    Io(#[from] std::io::Error),
}

/// Write exactly one envelope to the sink: a 4-byte big-endian length prefix
/// followed by the bincode encoding of the envelope.
pub async fn write_envelope<W>(sink: &mut W, envelope: &Envelope) -> Result<(), CodecError>
where
    W: AsyncWrite + Unpin,
{
    let frame = bincode::encode_to_vec(envelope, bincode::config::standard())?;
    if frame.len() > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(frame.len()));
    }

    sink.write_all(&(frame.len() as u32).to_be_bytes()).await?;
    sink.write_all(&frame).await?;
    sink.flush().await?;
    Ok(())
}

/// Read exactly one envelope from the source, leaving the stream positioned
/// at the next frame boundary.
pub async fn read_envelope<R>(source: &mut R) -> Result<Envelope, CodecError>
where
    R: AsyncRead + Unpin,
{
    let mut len_bytes = [0u8; 4];
    source.read_exact(&mut len_bytes).await?;
    let len = u32::from_be_bytes(len_bytes) as usize;
    if len > MAX_FRAME_LEN {
        return Err(CodecError::FrameTooLarge(len));
    }

    let mut frame = vec![0u8; len];
    source.read_exact(&mut frame).await?;

    let (envelope, consumed) = bincode::decode_from_slice(&frame, bincode::config::standard())?;
    if consumed != frame.len() {
        return Err(CodecError::TrailingBytes(frame.len() - consumed));
    }
    Ok(envelope)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::MessageType;

    #[tokio::test]
    async fn test_envelope_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        let envelope = Envelope::new(MessageType::GetFile, "abc123.txt");
        write_envelope(&mut client, &envelope).await.unwrap();

        let decoded = read_envelope(&mut server).await.unwrap();
        assert_eq!(decoded, envelope);
    }

    #[tokio::test]
    async fn test_consecutive_frames_keep_their_boundaries() {
        let (mut client, mut server) = tokio::io::duplex(4096);

        let first = Envelope::new(MessageType::StoreFile, "{\"filename\":\"a\"}");
        let second = Envelope::new(MessageType::FileAnnouncement, "{\"filename\":\"b\"}");
        write_envelope(&mut client, &first).await.unwrap();
        write_envelope(&mut client, &second).await.unwrap();

        assert_eq!(read_envelope(&mut server).await.unwrap(), first);
        assert_eq!(read_envelope(&mut server).await.unwrap(), second);
    }

    #[tokio::test]
    async fn test_truncated_frame_fails() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        // Announce a 100-byte frame but deliver only 3 bytes before closing.
        client.write_all(&100u32.to_be_bytes()).await.unwrap();
        client.write_all(&[1, 2, 3]).await.unwrap();
        drop(client);

        let result = read_envelope(&mut server).await;
        assert!(matches!(result, Err(CodecError::Io(_))));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_before_allocation() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let forged = (MAX_FRAME_LEN as u32 + 1).to_be_bytes();
        client.write_all(&forged).await.unwrap();

        let result = read_envelope(&mut server).await;
        assert!(matches!(result, Err(CodecError::FrameTooLarge(_))));
    }

    #[tokio::test]
    async fn test_garbage_frame_fails_to_decode() {
        let (mut client, mut server) = tokio::io::duplex(1024);

        client.write_all(&4u32.to_be_bytes()).await.unwrap();
        client.write_all(&[0xff, 0xff, 0xff, 0xff]).await.unwrap();

        let result = read_envelope(&mut server).await;
        assert!(matches!(result, Err(CodecError::Decode(_))));
    }

    #[tokio::test]
    async fn test_empty_data_round_trip() {
        let (mut client, mut server) = tokio::io::duplex(256);

        let envelope = Envelope::new(MessageType::HasFileResponse, "");
        write_envelope(&mut client, &envelope).await.unwrap();
        assert_eq!(read_envelope(&mut server).await.unwrap(), envelope);
    }
}
