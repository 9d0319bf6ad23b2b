//! Wire format encoding and decoding.
//!
//! Implements the 6-byte frame header:
//! ```text
//! ┌─┬──────────────────────────────┬────────────┬────────────────────┐
//! │R│ Stream ID                    │ Frame Type │ Flags              │
//! │1│ 31 bits                      │ 6 bits     │ 10 bits            │
//! └─┴──────────────────────────────┴────────────┴────────────────────┘
//! ```
//!
//! All multi-byte integers are Big Endian. Lengths embedded in frame bodies
//! (metadata length, transport frame length) are 24-bit unsigned integers.

use std::fmt;

use bytes::{BufMut, BytesMut};

use crate::error::{RSocketError, Result};

/// Header size in bytes (fixed, exactly 6).
pub const HEADER_SIZE: usize = 6;

/// Size of a 24-bit length field.
pub const U24_SIZE: usize = 3;

/// Largest value a 24-bit length field can carry (16 MiB - 1).
pub const MAX_U24: usize = 0x00FF_FFFF;

/// Largest valid stream ID (31 bits).
pub const MAX_STREAM_ID: u32 = 0x7FFF_FFFF;

/// Largest requestN value. Also means "unbounded".
pub const MAX_REQUEST_N: u32 = 0x7FFF_FFFF;

/// Stream ID reserved for connection-level frames.
pub const CONNECTION_STREAM_ID: u32 = 0;

/// Protocol major version sent in SETUP.
pub const MAJOR_VERSION: u16 = 1;

/// Protocol minor version sent in SETUP.
pub const MINOR_VERSION: u16 = 0;

const STREAM_ID_MASK: u32 = 0x7FFF_FFFF;
const FRAME_TYPE_SHIFT: u16 = 10;

/// Flag constants for the protocol.
///
/// Several bits are reused with a frame-specific meaning; the aliases make
/// call sites read correctly.
pub mod flags {
    /// Frame may be ignored if not understood.
    pub const IGNORE: u16 = 0x200;
    /// Metadata present.
    pub const METADATA: u16 = 0x100;
    /// More fragments follow.
    pub const FOLLOWS: u16 = 0x080;
    /// SETUP: client requests resume capability.
    pub const RESUME_ENABLE: u16 = 0x080;
    /// KEEPALIVE: peer must respond.
    pub const RESPOND: u16 = 0x080;
    /// Stream completion.
    pub const COMPLETE: u16 = 0x040;
    /// SETUP: client honours LEASE.
    pub const LEASE: u16 = 0x040;
    /// Payload carries a next value.
    pub const NEXT: u16 = 0x020;

    /// All 10 flag bits.
    pub const MASK: u16 = 0x3FF;

    /// Check if a specific flag is set.
    #[inline]
    pub fn has_flag(flags: u16, flag: u16) -> bool {
        flags & flag != 0
    }
}

/// Frame types defined by the protocol.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    Setup = 0x01,
    Lease = 0x02,
    Keepalive = 0x03,
    RequestResponse = 0x04,
    RequestFnf = 0x05,
    RequestStream = 0x06,
    RequestChannel = 0x07,
    RequestN = 0x08,
    Cancel = 0x09,
    Payload = 0x0A,
    Error = 0x0B,
    MetadataPush = 0x0C,
    Resume = 0x0D,
    ResumeOk = 0x0E,
    Ext = 0x3F,
}

impl FrameType {
    /// Map a raw 6-bit value to a known frame type.
    pub fn from_u8(value: u8) -> Option<Self> {
        Some(match value {
            0x01 => FrameType::Setup,
            0x02 => FrameType::Lease,
            0x03 => FrameType::Keepalive,
            0x04 => FrameType::RequestResponse,
            0x05 => FrameType::RequestFnf,
            0x06 => FrameType::RequestStream,
            0x07 => FrameType::RequestChannel,
            0x08 => FrameType::RequestN,
            0x09 => FrameType::Cancel,
            0x0A => FrameType::Payload,
            0x0B => FrameType::Error,
            0x0C => FrameType::MetadataPush,
            0x0D => FrameType::Resume,
            0x0E => FrameType::ResumeOk,
            0x3F => FrameType::Ext,
            _ => return None,
        })
    }

    /// Raw 6-bit value.
    #[inline]
    pub fn as_u8(self) -> u8 {
        self as u8
    }

    /// Whether this frame opens a new interaction.
    #[inline]
    pub fn is_request(self) -> bool {
        matches!(
            self,
            FrameType::RequestResponse
                | FrameType::RequestFnf
                | FrameType::RequestStream
                | FrameType::RequestChannel
        )
    }

    /// Whether the body starts with an initial requestN field.
    #[inline]
    pub fn has_initial_request_n(self) -> bool {
        matches!(self, FrameType::RequestStream | FrameType::RequestChannel)
    }

    /// Whether a payload of this type may be split across fragments.
    #[inline]
    pub fn is_fragmentable(self) -> bool {
        self.is_request() || matches!(self, FrameType::Payload | FrameType::Ext)
    }

    /// Whether a COMPLETE flag is meaningful on this type.
    #[inline]
    pub fn can_complete(self) -> bool {
        matches!(self, FrameType::Payload | FrameType::RequestChannel)
    }

    /// Whether frames of this type always travel on stream 0.
    #[inline]
    pub fn is_connection_level(self) -> bool {
        matches!(
            self,
            FrameType::Setup
                | FrameType::Lease
                | FrameType::Keepalive
                | FrameType::MetadataPush
                | FrameType::Resume
                | FrameType::ResumeOk
        )
    }
}

impl fmt::Display for FrameType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            FrameType::Setup => "SETUP",
            FrameType::Lease => "LEASE",
            FrameType::Keepalive => "KEEPALIVE",
            FrameType::RequestResponse => "REQUEST_RESPONSE",
            FrameType::RequestFnf => "REQUEST_FNF",
            FrameType::RequestStream => "REQUEST_STREAM",
            FrameType::RequestChannel => "REQUEST_CHANNEL",
            FrameType::RequestN => "REQUEST_N",
            FrameType::Cancel => "CANCEL",
            FrameType::Payload => "PAYLOAD",
            FrameType::Error => "ERROR",
            FrameType::MetadataPush => "METADATA_PUSH",
            FrameType::Resume => "RESUME",
            FrameType::ResumeOk => "RESUME_OK",
            FrameType::Ext => "EXT",
        };
        f.write_str(name)
    }
}

/// Error code carried by an ERROR frame.
///
/// Kept as an open newtype so application-defined codes survive a round trip.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ErrorCode(pub u32);

impl ErrorCode {
    pub const RESERVED: ErrorCode = ErrorCode(0x0000_0000);
    pub const INVALID_SETUP: ErrorCode = ErrorCode(0x0000_0001);
    pub const UNSUPPORTED_SETUP: ErrorCode = ErrorCode(0x0000_0002);
    pub const REJECTED_SETUP: ErrorCode = ErrorCode(0x0000_0003);
    pub const REJECTED_RESUME: ErrorCode = ErrorCode(0x0000_0004);
    pub const CONNECTION_ERROR: ErrorCode = ErrorCode(0x0000_0101);
    pub const CONNECTION_CLOSE: ErrorCode = ErrorCode(0x0000_0102);
    pub const APPLICATION_ERROR: ErrorCode = ErrorCode(0x0000_0201);
    pub const REJECTED: ErrorCode = ErrorCode(0x0000_0202);
    pub const CANCELED: ErrorCode = ErrorCode(0x0000_0203);
    pub const INVALID: ErrorCode = ErrorCode(0x0000_0204);

    /// Codes that may only appear on stream 0.
    pub fn is_connection_error(self) -> bool {
        matches!(self.0, 0x0001..=0x0004 | 0x0101 | 0x0102)
    }

    /// Protocol name of the code, if it is one of the defined codes.
    pub fn name(self) -> Option<&'static str> {
        Some(match self {
            ErrorCode::RESERVED => "RESERVED",
            ErrorCode::INVALID_SETUP => "INVALID_SETUP",
            ErrorCode::UNSUPPORTED_SETUP => "UNSUPPORTED_SETUP",
            ErrorCode::REJECTED_SETUP => "REJECTED_SETUP",
            ErrorCode::REJECTED_RESUME => "REJECTED_RESUME",
            ErrorCode::CONNECTION_ERROR => "CONNECTION_ERROR",
            ErrorCode::CONNECTION_CLOSE => "CONNECTION_CLOSE",
            ErrorCode::APPLICATION_ERROR => "APPLICATION_ERROR",
            ErrorCode::REJECTED => "REJECTED",
            ErrorCode::CANCELED => "CANCELED",
            ErrorCode::INVALID => "INVALID",
            _ => return None,
        })
    }
}

impl fmt::Display for ErrorCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.name() {
            Some(name) => write!(f, "{} (0x{:x})", name, self.0),
            None => write!(f, "0x{:x}", self.0),
        }
    }
}

impl From<u32> for ErrorCode {
    fn from(code: u32) -> Self {
        ErrorCode(code)
    }
}

/// Decoded frame header.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Header {
    /// Stream identifier (31 bits, 0 = connection).
    pub stream_id: u32,
    /// Raw 6-bit frame type.
    pub frame_type: u8,
    /// 10-bit flag field (see `flags` module).
    pub flags: u16,
}

impl Header {
    /// Create a new header.
    pub fn new(stream_id: u32, frame_type: FrameType, flags: u16) -> Self {
        Self {
            stream_id,
            frame_type: frame_type.as_u8(),
            flags,
        }
    }

    /// Encode header to bytes (Big Endian).
    ///
    /// # Example
    ///
    /// ```
    /// use rsocket_wire::protocol::{flags, FrameType, Header};
    ///
    /// let header = Header::new(1, FrameType::Payload, flags::NEXT);
    /// assert_eq!(header.encode(), [0, 0, 0, 1, 0x28, 0x20]);
    /// ```
    pub fn encode(&self) -> [u8; HEADER_SIZE] {
        let mut buf = [0u8; HEADER_SIZE];
        self.encode_into(&mut buf);
        buf
    }

    /// Encode header into an existing buffer.
    ///
    /// # Panics
    ///
    /// Panics if buffer is smaller than `HEADER_SIZE` (6 bytes).
    pub fn encode_into(&self, buf: &mut [u8]) {
        debug_assert!(buf.len() >= HEADER_SIZE);
        buf[0..4].copy_from_slice(&(self.stream_id & STREAM_ID_MASK).to_be_bytes());
        let type_and_flags =
            (u16::from(self.frame_type) << FRAME_TYPE_SHIFT) | (self.flags & flags::MASK);
        buf[4..6].copy_from_slice(&type_and_flags.to_be_bytes());
    }

    /// Append the encoded header to a growable buffer.
    pub fn put(&self, buf: &mut BytesMut) {
        buf.put_slice(&self.encode());
    }

    /// Decode header from bytes (Big Endian).
    ///
    /// The reserved stream-ID bit is masked off. Returns `None` if the
    /// buffer is too short.
    pub fn decode(buf: &[u8]) -> Option<Self> {
        if buf.len() < HEADER_SIZE {
            return None;
        }
        let stream_id = u32::from_be_bytes([buf[0], buf[1], buf[2], buf[3]]) & STREAM_ID_MASK;
        let type_and_flags = u16::from_be_bytes([buf[4], buf[5]]);
        Some(Self {
            stream_id,
            frame_type: (type_and_flags >> FRAME_TYPE_SHIFT) as u8,
            flags: type_and_flags & flags::MASK,
        })
    }

    /// Validate the header for protocol compliance.
    ///
    /// Checks:
    /// - Stream ID fits in 31 bits
    /// - Flags fit in 10 bits
    /// - Connection-level frame types travel on stream 0
    pub fn validate(&self) -> Result<()> {
        if self.stream_id > MAX_STREAM_ID {
            return Err(RSocketError::LengthOverflow {
                what: "stream id",
                len: self.stream_id as usize,
                max: MAX_STREAM_ID as usize,
            });
        }

        if self.flags & !flags::MASK != 0 {
            return Err(RSocketError::MalformedFrame(format!(
                "flags 0x{:x} exceed 10 bits",
                self.flags
            )));
        }

        if let Some(kind) = self.kind() {
            if kind.is_connection_level() && self.stream_id != CONNECTION_STREAM_ID {
                return Err(RSocketError::MalformedFrame(format!(
                    "{} must use stream 0, got {}",
                    kind, self.stream_id
                )));
            }
            if kind.is_request() && self.stream_id == CONNECTION_STREAM_ID {
                return Err(RSocketError::MalformedFrame(format!(
                    "{} must not use stream 0",
                    kind
                )));
            }
        }

        Ok(())
    }

    /// Resolve the raw type to a known frame type.
    #[inline]
    pub fn kind(&self) -> Option<FrameType> {
        FrameType::from_u8(self.frame_type)
    }

    /// Check if metadata is present.
    #[inline]
    pub fn has_metadata(&self) -> bool {
        flags::has_flag(self.flags, flags::METADATA)
    }

    /// Check if more fragments follow.
    #[inline]
    pub fn follows(&self) -> bool {
        flags::has_flag(self.flags, flags::FOLLOWS)
    }

    /// Check if this frame completes its stream.
    #[inline]
    pub fn is_complete(&self) -> bool {
        flags::has_flag(self.flags, flags::COMPLETE)
    }

    /// Check if this frame carries a next value.
    #[inline]
    pub fn is_next(&self) -> bool {
        flags::has_flag(self.flags, flags::NEXT)
    }

    /// Check if the frame may be ignored when not understood.
    #[inline]
    pub fn can_ignore(&self) -> bool {
        flags::has_flag(self.flags, flags::IGNORE)
    }
}

/// Append a 24-bit big-endian integer.
///
/// # Errors
///
/// Returns `LengthOverflow` if `value` exceeds 16 MiB - 1.
pub fn put_u24(buf: &mut BytesMut, value: usize, what: &'static str) -> Result<()> {
    if value > MAX_U24 {
        return Err(RSocketError::LengthOverflow {
            what,
            len: value,
            max: MAX_U24,
        });
    }
    buf.put_uint(value as u64, U24_SIZE);
    Ok(())
}

/// Read a 24-bit big-endian integer from the first three bytes.
///
/// Returns `None` if fewer than three bytes are available.
#[inline]
pub fn read_u24(buf: &[u8]) -> Option<usize> {
    if buf.len() < U24_SIZE {
        return None;
    }
    Some((usize::from(buf[0]) << 16) | (usize::from(buf[1]) << 8) | usize::from(buf[2]))
}

/// Encode a header to bytes (standalone function).
#[inline]
pub fn encode_header(header: &Header) -> [u8; HEADER_SIZE] {
    header.encode()
}

/// Decode a header from bytes (standalone function).
#[inline]
pub fn decode_header(buf: &[u8]) -> Option<Header> {
    Header::decode(buf)
}
