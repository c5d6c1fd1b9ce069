//! Length-prefixed framing for the game stream.
//!
//! One message per frame:
//!
//! ```text
//! +-------------------+--------------------+
//! | length (4 bytes)  |   payload          |
//! | u32 little-endian |   (length bytes)   |
//! +-------------------+--------------------+
//! ```
//!
//! The length does **not** include the 4 prefix bytes. A zero-length frame is
//! legal on the wire and decodes to an empty payload, which the codec then
//! rejects as [`MessageError::EmptyPayload`](crate::MessageError).

use tokio::io::{AsyncReadExt, AsyncWriteExt};

/// Default upper bound on a single frame payload (1 MiB).
pub const DEFAULT_MAX_PAYLOAD: u32 = 1_048_576;

/// Configuration for the framing layer.
#[derive(Debug, Clone, Copy)]
pub struct FrameConfig {
    /// Maximum allowed payload size in bytes.
    pub max_payload_size: u32,
}

impl Default for FrameConfig {
    fn default() -> Self {
        Self {
            max_payload_size: DEFAULT_MAX_PAYLOAD,
        }
    }
}

impl FrameConfig {
    /// Framing with the given payload limit.
    pub fn with_max_payload(max_payload_size: u32) -> Self {
        Self { max_payload_size }
    }

    fn check(&self, size: u32) -> Result<(), FrameError> {
        if size > self.max_payload_size {
            return Err(FrameError::PayloadTooLarge {
                size,
                max: self.max_payload_size,
            });
        }
        Ok(())
    }
}

/// Errors that can occur during framing operations.
#[derive(Debug, thiserror::Error)]
pub enum FrameError {
    /// The payload size exceeds the configured maximum.
    #[error("payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// The actual payload size.
        size: u32,
        /// The configured maximum.
        max: u32,
    },

    /// The peer closed the stream, cleanly or mid-frame.
    #[error("connection closed")]
    ConnectionClosed,

    /// An I/O error occurred.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

fn eof_as_closed(e: std::io::Error) -> FrameError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        FrameError::ConnectionClosed
    } else {
        FrameError::Io(e)
    }
}

/// Read a single length-prefixed frame from the stream.
///
/// Waits until the full frame is available. A peer that closes before or in
/// the middle of a frame yields [`FrameError::ConnectionClosed`].
pub async fn read_frame<R: AsyncReadExt + Unpin>(
    reader: &mut R,
    config: &FrameConfig,
) -> Result<Vec<u8>, FrameError> {
    let payload_len = reader.read_u32_le().await.map_err(eof_as_closed)?;
    config.check(payload_len)?;

    let mut payload = vec![0u8; payload_len as usize];
    if payload_len > 0 {
        reader
            .read_exact(&mut payload)
            .await
            .map_err(eof_as_closed)?;
    }

    Ok(payload)
}

/// Write a single length-prefixed frame and flush it.
///
/// Prefix and payload go out in one buffer so a frame is never split across
/// two writes from this side.
pub async fn write_frame<W: AsyncWriteExt + Unpin>(
    writer: &mut W,
    payload: &[u8],
    config: &FrameConfig,
) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge {
        size: u32::MAX,
        max: config.max_payload_size,
    })?;
    config.check(len)?;

    let mut frame = Vec::with_capacity(4 + payload.len());
    frame.extend_from_slice(&len.to_le_bytes());
    frame.extend_from_slice(payload);
    writer.write_all(&frame).await?;
    writer.flush().await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::duplex;

    #[tokio::test]
    async fn test_frames_arrive_in_order_and_unmerged() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        for msg in [&b"first"[..], b"second", b"third"] {
            write_frame(&mut client, msg, &config).await.unwrap();
        }

        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"first");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"second");
        assert_eq!(read_frame(&mut server, &config).await.unwrap(), b"third");
    }

    #[tokio::test]
    async fn test_partial_read_resumes_correctly() {
        let (mut client, mut server) = duplex(8);
        let config = FrameConfig::default();
        let payload = b"this message is larger than the pipe buffer";

        let write_task = tokio::spawn(async move {
            write_frame(&mut client, payload, &FrameConfig::default())
                .await
                .unwrap();
        });

        let received = read_frame(&mut server, &config).await.unwrap();
        write_task.await.unwrap();
        assert_eq!(received, payload);
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_read() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::with_max_payload(16);

        client.write_all(&1024u32.to_le_bytes()).await.unwrap();
        client.flush().await.unwrap();

        let result = read_frame(&mut server, &config).await;
        assert!(matches!(
            result,
            Err(FrameError::PayloadTooLarge { size: 1024, max: 16 })
        ));
    }

    #[tokio::test]
    async fn test_oversized_frame_rejected_on_write() {
        let (mut client, _server) = duplex(8192);
        let config = FrameConfig::with_max_payload(16);

        let result = write_frame(&mut client, &[0u8; 64], &config).await;
        assert!(matches!(result, Err(FrameError::PayloadTooLarge { .. })));
    }

    #[tokio::test]
    async fn test_zero_length_frame() {
        let (mut client, mut server) = duplex(8192);
        let config = FrameConfig::default();

        write_frame(&mut client, &[], &config).await.unwrap();
        assert!(read_frame(&mut server, &config).await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_close_before_frame() {
        let (client, mut server) = duplex(8192);
        drop(client);

        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_close_mid_frame() {
        let (mut client, mut server) = duplex(8192);
        client.write_all(&10u32.to_le_bytes()).await.unwrap();
        client.write_all(b"abc").await.unwrap();
        drop(client);

        let result = read_frame(&mut server, &FrameConfig::default()).await;
        assert!(matches!(result, Err(FrameError::ConnectionClosed)));
    }

    #[tokio::test]
    async fn test_length_prefix_is_little_endian() {
        let (mut client, mut server) = duplex(8192);
        write_frame(&mut client, b"hello", &FrameConfig::default())
            .await
            .unwrap();

        let mut raw = [0u8; 9];
        server.read_exact(&mut raw).await.unwrap();
        assert_eq!(&raw[..4], &[5, 0, 0, 0]);
        assert_eq!(&raw[4..], b"hello");
    }
}
