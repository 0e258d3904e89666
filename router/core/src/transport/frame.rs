//! Frame Codec
//!
//! Wire format for router requests and responses: length-prefixed JSON with a
//! CRC32 checksum.
//!
//! # Frame Format
//!
//! ```text
//! +----------------+----------------+------------------------------------------+
//! | Length (4)     | Checksum (4)   | JSON Payload (variable)                  |
//! | big-endian u32 | CRC32, BE u32  | ClientMessage or ServerMessage           |
//! +----------------+----------------+------------------------------------------+
//! ```
//!
//! Length covers the payload only. The length field is validated against
//! [`MAX_FRAME_SIZE`] before any payload is buffered.

use serde::{de::DeserializeOwned, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWrite, AsyncWriteExt};

use super::TransportError;

/// Maximum payload size (10 MiB)
pub const MAX_FRAME_SIZE: usize = 10 * 1024 * 1024;

/// Length + checksum
const HEADER_SIZE: usize = 8;

/// Initial decoder buffer size
const MIN_BUFFER_CAPACITY: usize = 4096;

#[inline]
fn checksum(payload: &[u8]) -> u32 {
    crc32fast::hash(payload)
}

fn read_u32(bytes: &[u8]) -> u32 {
    u32::from_be_bytes([bytes[0], bytes[1], bytes[2], bytes[3]])
}

/// Encode a message into one frame
///
/// # Errors
///
/// Returns [`TransportError::Serialization`] if the message cannot be
/// serialized and [`TransportError::FrameTooLarge`] if the payload exceeds
/// [`MAX_FRAME_SIZE`].
pub fn encode<T: Serialize>(msg: &T) -> Result<Vec<u8>, TransportError> {
    let json = serde_json::to_vec(msg)?;

    if json.len() > MAX_FRAME_SIZE {
        return Err(TransportError::FrameTooLarge {
            size: json.len(),
            max: MAX_FRAME_SIZE,
        });
    }

    let mut frame = Vec::with_capacity(HEADER_SIZE + json.len());
    frame.extend_from_slice(&(json.len() as u32).to_be_bytes());
    frame.extend_from_slice(&checksum(&json).to_be_bytes());
    frame.extend_from_slice(&json);
    Ok(frame)
}

/// Incremental decoder: buffers bytes, yields whole messages
#[derive(Debug)]
pub struct FrameDecoder {
    buffer: Vec<u8>,
    read_pos: usize,
}

impl Default for FrameDecoder {
    fn default() -> Self {
        Self::new()
    }
}

impl FrameDecoder {
    /// Empty decoder
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffer: Vec::with_capacity(MIN_BUFFER_CAPACITY),
            read_pos: 0,
        }
    }

    /// Append received bytes
    pub fn push(&mut self, data: &[u8]) {
        if self.read_pos > MIN_BUFFER_CAPACITY && self.read_pos > self.buffer.len() / 2 {
            self.buffer.drain(..self.read_pos);
            self.read_pos = 0;
        }
        self.buffer.extend_from_slice(data);
    }

    /// Bytes buffered but not yet decoded
    #[must_use]
    pub fn available(&self) -> usize {
        self.buffer.len() - self.read_pos
    }

    /// Decode the next complete frame, `Ok(None)` if more bytes are needed
    ///
    /// # Errors
    ///
    /// Fails on an oversized length field, a checksum mismatch or a payload
    /// that does not deserialize as `T`. A frame that failed its checksum or
    /// deserialization is consumed, so the stream stays aligned.
    pub fn decode<T: DeserializeOwned>(&mut self) -> Result<Option<T>, TransportError> {
        let available = self.available();
        if available < HEADER_SIZE {
            return Ok(None);
        }

        let header = &self.buffer[self.read_pos..self.read_pos + HEADER_SIZE];
        let len = read_u32(&header[..4]) as usize;
        let expected = read_u32(&header[4..]);

        if len > MAX_FRAME_SIZE {
            return Err(TransportError::FrameTooLarge {
                size: len,
                max: MAX_FRAME_SIZE,
            });
        }
        if available < HEADER_SIZE + len {
            return Ok(None);
        }

        let start = self.read_pos + HEADER_SIZE;
        let end = start + len;
        self.read_pos = end;

        let payload = &self.buffer[start..end];
        let actual = checksum(payload);
        if actual != expected {
            return Err(TransportError::ChecksumMismatch { expected, actual });
        }

        Ok(Some(serde_json::from_slice(payload)?))
    }

    /// Drop all buffered bytes
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.read_pos = 0;
    }
}

/// Write one message as a frame
pub async fn write_frame<W, T>(writer: &mut W, msg: &T) -> Result<(), TransportError>
where
    W: AsyncWrite + Unpin,
    T: Serialize,
{
    let frame = encode(msg)?;
    writer.write_all(&frame).await?;
    writer.flush().await?;
    Ok(())
}

/// Read until one message is decoded
///
/// Returns `Ok(None)` on a clean EOF between frames.
///
/// # Errors
///
/// Returns [`TransportError::ConnectionClosed`] if the peer closes mid-frame,
/// or any decode error.
pub async fn read_frame<R, T>(
    reader: &mut R,
    decoder: &mut FrameDecoder,
) -> Result<Option<T>, TransportError>
where
    R: AsyncRead + Unpin,
    T: DeserializeOwned,
{
    let mut buf = [0u8; 4096];
    loop {
        if let Some(msg) = decoder.decode()? {
            return Ok(Some(msg));
        }

        let n = reader.read(&mut buf).await?;
        if n == 0 {
            return if decoder.available() == 0 {
                Ok(None)
            } else {
                Err(TransportError::ConnectionClosed)
            };
        }
        decoder.push(&buf[..n]);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
    struct Sample {
        worker: String,
        rating: u8,
    }

    fn sample(worker: &str) -> Sample {
        Sample {
            worker: worker.to_string(),
            rating: 4,
        }
    }

    #[test]
    fn test_header_layout() {
        let frame = encode(&sample("worker-a")).unwrap();
        let len = read_u32(&frame[..4]) as usize;
        assert_eq!(len, frame.len() - HEADER_SIZE);
        assert_eq!(read_u32(&frame[4..8]), crc32fast::hash(&frame[HEADER_SIZE..]));
    }

    #[test]
    fn test_decode_in_pieces() {
        let frame = encode(&sample("worker-a")).unwrap();
        let mut decoder = FrameDecoder::new();

        decoder.push(&frame[..3]);
        assert!(decoder.decode::<Sample>().unwrap().is_none());
        decoder.push(&frame[3..frame.len() - 1]);
        assert!(decoder.decode::<Sample>().unwrap().is_none());
        decoder.push(&frame[frame.len() - 1..]);
        assert_eq!(decoder.decode::<Sample>().unwrap(), Some(sample("worker-a")));
        assert_eq!(decoder.available(), 0);
    }

    #[test]
    fn test_back_to_back_frames() {
        let mut bytes = encode(&sample("a")).unwrap();
        bytes.extend(encode(&sample("b")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&bytes);
        assert_eq!(decoder.decode::<Sample>().unwrap().unwrap().worker, "a");
        assert_eq!(decoder.decode::<Sample>().unwrap().unwrap().worker, "b");
        assert!(decoder.decode::<Sample>().unwrap().is_none());
    }

    #[test]
    fn test_oversized_length_rejected() {
        let mut decoder = FrameDecoder::new();
        decoder.push(&((MAX_FRAME_SIZE + 1) as u32).to_be_bytes());
        decoder.push(&[0u8; 4]);
        assert!(matches!(
            decoder.decode::<Sample>(),
            Err(TransportError::FrameTooLarge { .. })
        ));
    }

    #[test]
    fn test_oversized_message_not_encoded() {
        let big = Sample {
            worker: "x".repeat(MAX_FRAME_SIZE),
            rating: 1,
        };
        assert!(matches!(encode(&big), Err(TransportError::FrameTooLarge { .. })));
    }

    #[test]
    fn test_corruption_detected_and_skipped() {
        let mut corrupt = encode(&sample("a")).unwrap();
        let last = corrupt.len() - 2;
        corrupt[last] ^= 0x20;
        corrupt.extend(encode(&sample("b")).unwrap());

        let mut decoder = FrameDecoder::new();
        decoder.push(&corrupt);
        assert!(matches!(
            decoder.decode::<Sample>(),
            Err(TransportError::ChecksumMismatch { .. })
        ));
        // Next frame is still readable
        assert_eq!(decoder.decode::<Sample>().unwrap().unwrap().worker, "b");
    }

    #[test]
    fn test_bad_json_is_serialization_error() {
        let payload = b"{\"worker\":";
        let mut decoder = FrameDecoder::new();
        decoder.push(&(payload.len() as u32).to_be_bytes());
        decoder.push(&crc32fast::hash(payload).to_be_bytes());
        decoder.push(payload);
        assert!(matches!(
            decoder.decode::<Sample>(),
            Err(TransportError::Serialization(_))
        ));
    }

    #[tokio::test]
    async fn test_stream_helpers() {
        let (mut client, mut server) = tokio::io::duplex(64);

        let writer = tokio::spawn(async move {
            write_frame(&mut client, &sample("streamed")).await.unwrap();
            write_frame(&mut client, &sample("second")).await.unwrap();
        });

        let mut decoder = FrameDecoder::new();
        let first: Sample = read_frame(&mut server, &mut decoder).await.unwrap().unwrap();
        let second: Sample = read_frame(&mut server, &mut decoder).await.unwrap().unwrap();
        assert_eq!(first.worker, "streamed");
        assert_eq!(second.worker, "second");

        writer.await.unwrap();
        let eof: Option<Sample> = read_frame(&mut server, &mut decoder).await.unwrap();
        assert!(eof.is_none());
    }

    #[tokio::test]
    async fn test_truncated_stream() {
        let frame = encode(&sample("cut")).unwrap();
        let mut reader: &[u8] = &frame[..frame.len() - 3];
        let mut decoder = FrameDecoder::new();
        let result: Result<Option<Sample>, _> = read_frame(&mut reader, &mut decoder).await;
        assert!(matches!(result, Err(TransportError::ConnectionClosed)));
    }
}
