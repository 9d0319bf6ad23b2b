//! Protocol module - wire format, frames, and transport framing.
//!
//! This module implements the binary frame codec:
//! - 6-byte header encoding/decoding and flag constants
//! - `Frame` enum with one variant per frame type
//! - `Payload`, the application-visible data/metadata pair
//! - Frame buffer for 24-bit length-prefixed byte streams

mod frame;
mod frame_buffer;
mod payload;
mod wire_format;

pub(crate) use frame::check_request_n;
pub use frame::{encode_length_prefixed, Frame, MAX_RESUME_TOKEN_LENGTH, MAX_SETUP_MIME_LENGTH};
pub use frame_buffer::FrameBuffer;
pub use payload::Payload;
pub use wire_format::{
    decode_header, encode_header, flags, put_u24, read_u24, ErrorCode, FrameType, Header,
    CONNECTION_STREAM_ID, HEADER_SIZE, MAJOR_VERSION, MAX_REQUEST_N, MAX_STREAM_ID, MAX_U24,
    MINOR_VERSION, U24_SIZE,
};
