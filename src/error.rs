//! Error types for rsocket-wire.

use thiserror::Error;

use crate::protocol::ErrorCode;

/// Main error type for all rsocket-wire operations.
#[derive(Debug, Error)]
pub enum RSocketError {
    /// I/O error on the underlying transport.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// MsgPack serialization error.
    #[error("MsgPack encode error: {0}")]
    MsgPackEncode(#[from] rmp_serde::encode::Error),

    /// MsgPack deserialization error.
    #[error("MsgPack decode error: {0}")]
    MsgPackDecode(#[from] rmp_serde::decode::Error),

    /// Frame header or body inconsistent with its declared lengths.
    #[error("Malformed frame: {0}")]
    MalformedFrame(String),

    /// Frame type not known to this implementation.
    #[error("Unknown frame type 0x{frame_type:02x} (ignorable: {ignorable})")]
    UnknownFrameType {
        /// Raw 6-bit frame type.
        frame_type: u8,
        /// Whether the IGNORE flag was set on the frame.
        ignorable: bool,
    },

    /// Mime type rejected while building metadata.
    #[error("Invalid mime type: {0}")]
    InvalidMimeType(String),

    /// Composite or auth/routing metadata could not be decoded.
    #[error("Malformed metadata: {0}")]
    MalformedMetadata(String),

    /// A value does not fit the wire field reserved for it.
    #[error("{what} length {len} exceeds maximum {max}")]
    LengthOverflow {
        /// Field being encoded.
        what: &'static str,
        /// Actual length.
        len: usize,
        /// Largest length the field can carry.
        max: usize,
    },

    /// Fragment received out of sequence for the given stream.
    #[error("Unexpected fragment on stream {0}")]
    UnexpectedFragment(u32),

    /// Frame received for a stream ID that is not live.
    #[error("Unknown stream {0}")]
    UnknownStream(u32),

    /// No more stream IDs of the local parity are available.
    #[error("Stream IDs exhausted")]
    StreamIdExhausted,

    /// Fragment size too small to make progress.
    #[error("Fragment size {0} is too small")]
    FragmentSizeTooSmall(usize),

    /// Reassembled payload exceeded the configured limit.
    #[error("Payload size {size} exceeds maximum {max}")]
    PayloadTooLarge {
        /// Size the payload would have reached.
        size: usize,
        /// Configured limit.
        max: usize,
    },

    /// Operation or frame not legal in the stream's current state.
    #[error("Invalid state on stream {stream_id}: {reason}")]
    InvalidStreamState {
        /// Stream the violation occurred on.
        stream_id: u32,
        /// What was attempted.
        reason: String,
    },

    /// Stream terminated by an ERROR frame.
    #[error("Stream error {code}: {message}")]
    Stream {
        /// Error code carried by the frame.
        code: ErrorCode,
        /// Error message carried by the frame.
        message: String,
    },

    /// Connection terminated by a connection-level ERROR.
    #[error("Connection error {code}: {message}")]
    Connection {
        /// Error code carried by the frame.
        code: ErrorCode,
        /// Error message carried by the frame.
        message: String,
    },

    /// Connection closed unexpectedly.
    #[error("Connection closed")]
    ConnectionClosed,

    /// Backpressure timeout - write buffer full.
    #[error("Backpressure timeout")]
    BackpressureTimeout,
}

impl RSocketError {
    /// Whether this error terminates the whole connection.
    pub fn is_connection_fatal(&self) -> bool {
        matches!(
            self,
            RSocketError::MalformedFrame(_)
                | RSocketError::UnknownFrameType {
                    ignorable: false,
                    ..
                }
                | RSocketError::UnexpectedFragment(_)
                | RSocketError::UnknownStream(_)
                | RSocketError::PayloadTooLarge { .. }
                | RSocketError::Connection { .. }
                | RSocketError::ConnectionClosed
                | RSocketError::Io(_)
        )
    }

    /// Error code to put on the wire when this error is reported to the peer.
    pub fn wire_code(&self) -> ErrorCode {
        match self {
            RSocketError::Stream { code, .. } | RSocketError::Connection { code, .. } => *code,
            RSocketError::ConnectionClosed => ErrorCode::CONNECTION_CLOSE,
            e if e.is_connection_fatal() => ErrorCode::CONNECTION_ERROR,
            RSocketError::InvalidStreamState { .. } => ErrorCode::INVALID,
            _ => ErrorCode::APPLICATION_ERROR,
        }
    }
}

/// Result type alias using RSocketError.
pub type Result<T> = std::result::Result<T, RSocketError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_fatal_classification() {
        assert!(RSocketError::MalformedFrame("short".into()).is_connection_fatal());
        assert!(RSocketError::UnknownStream(3).is_connection_fatal());
        assert!(!RSocketError::UnknownFrameType {
            frame_type: 0x30,
            ignorable: true
        }
        .is_connection_fatal());
        assert!(!RSocketError::InvalidMimeType("".into()).is_connection_fatal());
        assert!(!RSocketError::MalformedMetadata("x".into()).is_connection_fatal());
    }

    #[test]
    fn test_wire_code() {
        assert_eq!(
            RSocketError::UnexpectedFragment(1).wire_code(),
            ErrorCode::CONNECTION_ERROR
        );
        let stream = RSocketError::Stream {
            code: ErrorCode::REJECTED,
            message: "no".into(),
        };
        assert_eq!(stream.wire_code(), ErrorCode::REJECTED);
        assert_eq!(
            RSocketError::InvalidMimeType("x".into()).wire_code(),
            ErrorCode::APPLICATION_ERROR
        );
    }

    #[test]
    fn test_display() {
        let err = RSocketError::LengthOverflow {
            what: "metadata",
            len: 20_000_000,
            max: 16_777_215,
        };
        assert_eq!(
            err.to_string(),
            "metadata length 20000000 exceeds maximum 16777215"
        );
    }
}
