//! Frame buffer for accumulating partial reads.
//!
//! Byte-stream transports (TCP, pipes) prefix every frame with a 24-bit
//! big-endian length. The buffer uses `bytes::BytesMut` and a state machine:
//! - `WaitingForLength`: Need at least 3 bytes
//! - `WaitingForFrame`: Length parsed, need N more frame bytes
//!
//! Complete frames are returned as frozen `Bytes`, ready for
//! [`Frame::decode`](super::Frame::decode).
//!
//! # Example
//!
//! ```
//! use rsocket_wire::protocol::{encode_length_prefixed, Frame, FrameBuffer};
//!
//! let mut buffer = FrameBuffer::new();
//! let wire = encode_length_prefixed(&Frame::cancel(1)).unwrap();
//!
//! let frames = buffer.push(&wire).unwrap();
//! assert_eq!(Frame::decode(frames[0].clone()).unwrap(), Frame::cancel(1));
//! ```

use bytes::{Bytes, BytesMut};

use super::wire_format::{read_u24, HEADER_SIZE, MAX_U24, U24_SIZE};
use crate::error::{RSocketError, Result};

/// Default read capacity.
const DEFAULT_CAPACITY: usize = 64 * 1024;

#[derive(Debug, Clone, Copy)]
enum State {
    /// Waiting for a complete 3-byte length prefix.
    WaitingForLength,
    /// Length parsed, waiting for frame bytes.
    WaitingForFrame { remaining: usize },
}

/// Buffer for accumulating incoming bytes and extracting complete frames.
pub struct FrameBuffer {
    /// Accumulated bytes from transport reads.
    buffer: BytesMut,
    /// Current parsing state.
    state: State,
    /// Maximum allowed frame length (excluding the prefix).
    max_frame_length: usize,
}

impl FrameBuffer {
    /// Create a new frame buffer with default settings.
    ///
    /// Default capacity: 64KB, max frame length: 16 MiB - 1.
    pub fn new() -> Self {
        Self::with_max_frame_length(MAX_U24)
    }

    /// Create a new frame buffer with a custom maximum frame length.
    ///
    /// Values above 16 MiB - 1 are clamped since the prefix cannot express
    /// them.
    pub fn with_max_frame_length(max_frame_length: usize) -> Self {
        Self {
            buffer: BytesMut::with_capacity(DEFAULT_CAPACITY),
            state: State::WaitingForLength,
            max_frame_length: max_frame_length.min(MAX_U24),
        }
    }

    /// Push data into the buffer and extract all complete frames.
    ///
    /// Partial data is buffered internally for the next push.
    ///
    /// # Errors
    ///
    /// Returns `MalformedFrame` if a declared length is shorter than a frame
    /// header, or `PayloadTooLarge` if it exceeds `max_frame_length`.
    pub fn push(&mut self, data: &[u8]) -> Result<Vec<Bytes>> {
        self.buffer.extend_from_slice(data);

        let mut frames = Vec::new();
        while let Some(frame) = self.try_extract_one()? {
            frames.push(frame);
        }
        Ok(frames)
    }

    fn try_extract_one(&mut self) -> Result<Option<Bytes>> {
        match self.state {
            State::WaitingForLength => {
                let length = match read_u24(&self.buffer) {
                    Some(length) => length,
                    None => return Ok(None),
                };

                if length < HEADER_SIZE {
                    return Err(RSocketError::MalformedFrame(format!(
                        "frame length {} is shorter than the {}-byte header",
                        length, HEADER_SIZE
                    )));
                }
                if length > self.max_frame_length {
                    return Err(RSocketError::PayloadTooLarge {
                        size: length,
                        max: self.max_frame_length,
                    });
                }

                let _ = self.buffer.split_to(U24_SIZE);
                self.state = State::WaitingForFrame { remaining: length };
                self.try_extract_one()
            }

            State::WaitingForFrame { remaining } => {
                if self.buffer.len() < remaining {
                    return Ok(None);
                }

                let frame = self.buffer.split_to(remaining).freeze();
                self.state = State::WaitingForLength;
                Ok(Some(frame))
            }
        }
    }

    /// Get the number of buffered bytes.
    pub fn len(&self) -> usize {
        self.buffer.len()
    }

    /// Check if the buffer is empty.
    pub fn is_empty(&self) -> bool {
        self.buffer.is_empty()
    }

    /// Clear the buffer and reset state.
    pub fn clear(&mut self) {
        self.buffer.clear();
        self.state = State::WaitingForLength;
    }

    #[cfg(test)]
    fn state_name(&self) -> &'static str {
        match self.state {
            State::WaitingForLength => "WaitingForLength",
            State::WaitingForFrame { .. } => "WaitingForFrame",
        }
    }
}

impl Default for FrameBuffer {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_length_prefixed, Frame, Payload};

    fn wire(frame: &Frame) -> Vec<u8> {
        encode_length_prefixed(frame).unwrap().to_vec()
    }

    #[test]
    fn test_single_complete_frame() {
        let mut buffer = FrameBuffer::new();
        let frame = Frame::next(1, Payload::from_data("hello"), false);

        let frames = buffer.push(&wire(&frame)).unwrap();

        assert_eq!(frames.len(), 1);
        assert_eq!(Frame::decode(frames[0].clone()).unwrap(), frame);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_multiple_frames_in_one_push() {
        let mut buffer = FrameBuffer::new();
        let mut combined = Vec::new();
        for id in [1, 3, 5] {
            combined.extend(wire(&Frame::request_n(id, 8)));
        }

        let frames = buffer.push(&combined).unwrap();

        assert_eq!(frames.len(), 3);
        let ids: Vec<u32> = frames
            .into_iter()
            .map(|f| Frame::decode(f).unwrap().stream_id())
            .collect();
        assert_eq!(ids, vec![1, 3, 5]);
    }

    #[test]
    fn test_fragmented_length() {
        let mut buffer = FrameBuffer::new();
        let bytes = wire(&Frame::cancel(9));

        assert!(buffer.push(&bytes[..2]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForLength");

        let frames = buffer.push(&bytes[2..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_fragmented_frame() {
        let mut buffer = FrameBuffer::new();
        let bytes = wire(&Frame::next(
            1,
            Payload::from_data("this is a longer payload split across reads"),
            true,
        ));

        assert!(buffer.push(&bytes[..U24_SIZE + 4]).unwrap().is_empty());
        assert_eq!(buffer.state_name(), "WaitingForFrame");

        let frames = buffer.push(&bytes[U24_SIZE + 4..]).unwrap();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].len(), bytes.len() - U24_SIZE);
    }

    #[test]
    fn test_length_shorter_than_header() {
        let mut buffer = FrameBuffer::new();
        let err = buffer.push(&[0, 0, 5, 0, 0, 0, 0, 0]).unwrap_err();
        assert!(matches!(err, RSocketError::MalformedFrame(_)));
    }

    #[test]
    fn test_max_frame_length() {
        let mut buffer = FrameBuffer::with_max_frame_length(100);
        let err = buffer.push(&[0, 0x10, 0]).unwrap_err();
        assert!(matches!(
            err,
            RSocketError::PayloadTooLarge {
                size: 4096,
                max: 100
            }
        ));
    }

    #[test]
    fn test_mixed_complete_and_partial() {
        let mut buffer = FrameBuffer::new();
        let first = wire(&Frame::request_n(1, 1));
        let second = wire(&Frame::request_n(3, 1));

        let mut data = first.clone();
        data.extend_from_slice(&second[..5]);

        assert_eq!(buffer.push(&data).unwrap().len(), 1);
        assert_eq!(buffer.state_name(), "WaitingForFrame");
        assert_eq!(buffer.push(&second[5..]).unwrap().len(), 1);
    }

    #[test]
    fn test_byte_at_a_time() {
        let mut buffer = FrameBuffer::new();
        let bytes = wire(&Frame::next(1, Payload::from_data("hi"), false));

        let mut all = Vec::new();
        for byte in &bytes {
            all.extend(buffer.push(&[*byte]).unwrap());
        }
        assert_eq!(all.len(), 1);
    }

    #[test]
    fn test_clear_resets_state() {
        let mut buffer = FrameBuffer::new();
        let bytes = wire(&Frame::cancel(1));
        buffer.push(&bytes[..4]).unwrap();
        assert_eq!(buffer.state_name(), "WaitingForFrame");

        buffer.clear();
        assert_eq!(buffer.state_name(), "WaitingForLength");
        assert!(buffer.is_empty());
    }
}
