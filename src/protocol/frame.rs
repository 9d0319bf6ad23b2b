//! Frame enum with per-type bodies.
//!
//! Every frame is a 6-byte [`Header`] followed by a body whose layout is
//! selected by the frame type. Decoding operates on exactly one
//! length-delimited frame and slices the input `Bytes` for metadata and
//! data, so no payload bytes are copied.
//!
//! Flags stored in a variant exclude the bits that are derived from its
//! fields: METADATA (from `metadata.is_some()`) and, on SETUP,
//! RESUME_ENABLE (from `resume_token.is_some()`). [`Frame::flags`] returns
//! the full wire value.
//!
//! # Example
//!
//! ```
//! use rsocket_wire::protocol::{Frame, Payload};
//! use bytes::Bytes;
//!
//! let frame = Frame::request_response(1, Payload::from_data("ping"));
//! let bytes = frame.encode();
//! let decoded = Frame::decode(bytes).unwrap();
//! assert_eq!(decoded, frame);
//! ```

use bytes::{Buf, BufMut, Bytes, BytesMut};

use super::payload::Payload;
use super::wire_format::{
    flags, put_u24, read_u24, ErrorCode, FrameType, Header, CONNECTION_STREAM_ID, HEADER_SIZE,
    MAJOR_VERSION, MAX_REQUEST_N, MAX_U24, MINOR_VERSION, U24_SIZE,
};
use crate::error::{RSocketError, Result};

/// Largest length of a mime type string in SETUP.
pub const MAX_SETUP_MIME_LENGTH: usize = u8::MAX as usize;

/// Largest resume token length.
pub const MAX_RESUME_TOKEN_LENGTH: usize = u16::MAX as usize;

/// A decoded protocol frame.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Frame {
    Setup {
        flags: u16,
        major_version: u16,
        minor_version: u16,
        keepalive_interval: u32,
        max_lifetime: u32,
        resume_token: Option<Bytes>,
        metadata_mime_type: String,
        data_mime_type: String,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    Lease {
        flags: u16,
        ttl: u32,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    Keepalive {
        flags: u16,
        last_received_position: u64,
        data: Bytes,
    },
    RequestResponse {
        stream_id: u32,
        flags: u16,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestFnf {
        stream_id: u32,
        flags: u16,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestStream {
        stream_id: u32,
        flags: u16,
        initial_request_n: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestChannel {
        stream_id: u32,
        flags: u16,
        initial_request_n: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    RequestN {
        stream_id: u32,
        flags: u16,
        request_n: u32,
    },
    Cancel {
        stream_id: u32,
        flags: u16,
    },
    Payload {
        stream_id: u32,
        flags: u16,
        metadata: Option<Bytes>,
        data: Bytes,
    },
    Error {
        stream_id: u32,
        flags: u16,
        code: ErrorCode,
        message: String,
    },
    MetadataPush {
        flags: u16,
        metadata: Bytes,
    },
    Resume {
        flags: u16,
        major_version: u16,
        minor_version: u16,
        resume_token: Bytes,
        last_received_server_position: u64,
        first_available_client_position: u64,
    },
    ResumeOk {
        flags: u16,
        last_received_client_position: u64,
    },
    Ext {
        stream_id: u32,
        flags: u16,
        extended_type: u32,
        metadata: Option<Bytes>,
        data: Bytes,
    },
}

impl Frame {
    // ---- constructors -------------------------------------------------

    /// REQUEST_RESPONSE frame.
    pub fn request_response(stream_id: u32, payload: Payload) -> Self {
        let (data, metadata) = payload.into_parts();
        Frame::RequestResponse {
            stream_id,
            flags: 0,
            metadata,
            data,
        }
    }

    /// REQUEST_FNF frame.
    pub fn request_fnf(stream_id: u32, payload: Payload) -> Self {
        let (data, metadata) = payload.into_parts();
        Frame::RequestFnf {
            stream_id,
            flags: 0,
            metadata,
            data,
        }
    }

    /// REQUEST_STREAM frame.
    pub fn request_stream(stream_id: u32, initial_request_n: u32, payload: Payload) -> Self {
        let (data, metadata) = payload.into_parts();
        Frame::RequestStream {
            stream_id,
            flags: 0,
            initial_request_n,
            metadata,
            data,
        }
    }

    /// REQUEST_CHANNEL frame, optionally completing the requester side.
    pub fn request_channel(
        stream_id: u32,
        initial_request_n: u32,
        payload: Payload,
        complete: bool,
    ) -> Self {
        let (data, metadata) = payload.into_parts();
        Frame::RequestChannel {
            stream_id,
            flags: if complete { flags::COMPLETE } else { 0 },
            initial_request_n,
            metadata,
            data,
        }
    }

    /// PAYLOAD frame carrying a value, optionally completing the stream.
    pub fn next(stream_id: u32, payload: Payload, complete: bool) -> Self {
        let (data, metadata) = payload.into_parts();
        let mut frame_flags = flags::NEXT;
        if complete {
            frame_flags |= flags::COMPLETE;
        }
        Frame::Payload {
            stream_id,
            flags: frame_flags,
            metadata,
            data,
        }
    }

    /// PAYLOAD frame with COMPLETE and no value.
    pub fn complete(stream_id: u32) -> Self {
        Frame::Payload {
            stream_id,
            flags: flags::COMPLETE,
            metadata: None,
            data: Bytes::new(),
        }
    }

    /// REQUEST_N frame.
    pub fn request_n(stream_id: u32, request_n: u32) -> Self {
        Frame::RequestN {
            stream_id,
            flags: 0,
            request_n,
        }
    }

    /// CANCEL frame.
    pub fn cancel(stream_id: u32) -> Self {
        Frame::Cancel {
            stream_id,
            flags: 0,
        }
    }

    /// ERROR frame. Use stream 0 for connection errors.
    pub fn error(stream_id: u32, code: ErrorCode, message: impl Into<String>) -> Self {
        Frame::Error {
            stream_id,
            flags: 0,
            code,
            message: message.into(),
        }
    }

    /// KEEPALIVE frame.
    pub fn keepalive(respond: bool, last_received_position: u64, data: Bytes) -> Self {
        Frame::Keepalive {
            flags: if respond { flags::RESPOND } else { 0 },
            last_received_position,
            data,
        }
    }

    /// METADATA_PUSH frame.
    pub fn metadata_push(metadata: Bytes) -> Self {
        Frame::MetadataPush { flags: 0, metadata }
    }

    /// LEASE frame.
    pub fn lease(ttl: u32, number_of_requests: u32, metadata: Option<Bytes>) -> Self {
        Frame::Lease {
            flags: 0,
            ttl,
            number_of_requests,
            metadata,
        }
    }

    /// SETUP frame for protocol version 1.0 without resume or lease.
    pub fn setup(
        keepalive_interval: u32,
        max_lifetime: u32,
        metadata_mime_type: impl Into<String>,
        data_mime_type: impl Into<String>,
        payload: Payload,
    ) -> Self {
        let (data, metadata) = payload.into_parts();
        Frame::Setup {
            flags: 0,
            major_version: MAJOR_VERSION,
            minor_version: MINOR_VERSION,
            keepalive_interval,
            max_lifetime,
            resume_token: None,
            metadata_mime_type: metadata_mime_type.into(),
            data_mime_type: data_mime_type.into(),
            metadata,
            data,
        }
    }

    // ---- accessors ----------------------------------------------------

    /// Frame type of this variant.
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::Setup { .. } => FrameType::Setup,
            Frame::Lease { .. } => FrameType::Lease,
            Frame::Keepalive { .. } => FrameType::Keepalive,
            Frame::RequestResponse { .. } => FrameType::RequestResponse,
            Frame::RequestFnf { .. } => FrameType::RequestFnf,
            Frame::RequestStream { .. } => FrameType::RequestStream,
            Frame::RequestChannel { .. } => FrameType::RequestChannel,
            Frame::RequestN { .. } => FrameType::RequestN,
            Frame::Cancel { .. } => FrameType::Cancel,
            Frame::Payload { .. } => FrameType::Payload,
            Frame::Error { .. } => FrameType::Error,
            Frame::MetadataPush { .. } => FrameType::MetadataPush,
            Frame::Resume { .. } => FrameType::Resume,
            Frame::ResumeOk { .. } => FrameType::ResumeOk,
            Frame::Ext { .. } => FrameType::Ext,
        }
    }

    /// Stream ID (0 for connection-level frames).
    pub fn stream_id(&self) -> u32 {
        match self {
            Frame::RequestResponse { stream_id, .. }
            | Frame::RequestFnf { stream_id, .. }
            | Frame::RequestStream { stream_id, .. }
            | Frame::RequestChannel { stream_id, .. }
            | Frame::RequestN { stream_id, .. }
            | Frame::Cancel { stream_id, .. }
            | Frame::Payload { stream_id, .. }
            | Frame::Error { stream_id, .. }
            | Frame::Ext { stream_id, .. } => *stream_id,
            _ => CONNECTION_STREAM_ID,
        }
    }

    fn stored_flags(&self) -> u16 {
        match self {
            Frame::Setup { flags, .. }
            | Frame::Lease { flags, .. }
            | Frame::Keepalive { flags, .. }
            | Frame::RequestResponse { flags, .. }
            | Frame::RequestFnf { flags, .. }
            | Frame::RequestStream { flags, .. }
            | Frame::RequestChannel { flags, .. }
            | Frame::RequestN { flags, .. }
            | Frame::Cancel { flags, .. }
            | Frame::Payload { flags, .. }
            | Frame::Error { flags, .. }
            | Frame::MetadataPush { flags, .. }
            | Frame::Resume { flags, .. }
            | Frame::ResumeOk { flags, .. }
            | Frame::Ext { flags, .. } => *flags,
        }
    }

    /// Full 10-bit flag value as written on the wire.
    pub fn flags(&self) -> u16 {
        let mut value = self.stored_flags() & !flags::METADATA;
        let metadata_present = match self {
            Frame::MetadataPush { .. } => true,
            _ => self.metadata().is_some(),
        };
        if metadata_present {
            value |= flags::METADATA;
        }
        if let Frame::Setup { resume_token, .. } = self {
            value &= !flags::RESUME_ENABLE;
            if resume_token.is_some() {
                value |= flags::RESUME_ENABLE;
            }
        }
        value & flags::MASK
    }

    /// Header for this frame.
    pub fn header(&self) -> Header {
        Header::new(self.stream_id(), self.frame_type(), self.flags())
    }

    /// Metadata carried by the frame, if any.
    pub fn metadata(&self) -> Option<&Bytes> {
        match self {
            Frame::Setup { metadata, .. }
            | Frame::Lease { metadata, .. }
            | Frame::RequestResponse { metadata, .. }
            | Frame::RequestFnf { metadata, .. }
            | Frame::RequestStream { metadata, .. }
            | Frame::RequestChannel { metadata, .. }
            | Frame::Payload { metadata, .. }
            | Frame::Ext { metadata, .. } => metadata.as_ref(),
            Frame::MetadataPush { metadata, .. } => Some(metadata),
            _ => None,
        }
    }

    /// Data carried by the frame, if the type has a data section.
    pub fn data(&self) -> Option<&Bytes> {
        match self {
            Frame::Setup { data, .. }
            | Frame::Keepalive { data, .. }
            | Frame::RequestResponse { data, .. }
            | Frame::RequestFnf { data, .. }
            | Frame::RequestStream { data, .. }
            | Frame::RequestChannel { data, .. }
            | Frame::Payload { data, .. }
            | Frame::Ext { data, .. } => Some(data),
            _ => None,
        }
    }

    /// Initial requestN (REQUEST_STREAM / REQUEST_CHANNEL) or requestN
    /// (REQUEST_N).
    pub fn request_n_value(&self) -> Option<u32> {
        match self {
            Frame::RequestStream {
                initial_request_n, ..
            }
            | Frame::RequestChannel {
                initial_request_n, ..
            } => Some(*initial_request_n),
            Frame::RequestN { request_n, .. } => Some(*request_n),
            _ => None,
        }
    }

    /// Check if more fragments follow.
    #[inline]
    pub fn follows(&self) -> bool {
        flags::has_flag(self.flags(), flags::FOLLOWS)
    }

    /// Check if this frame completes its direction of the stream.
    #[inline]
    pub fn is_complete(&self) -> bool {
        self.frame_type().can_complete() && flags::has_flag(self.flags(), flags::COMPLETE)
    }

    /// Check if this PAYLOAD frame carries a value.
    #[inline]
    pub fn is_next(&self) -> bool {
        flags::has_flag(self.flags(), flags::NEXT)
    }

    /// Copy data and metadata out into a [`Payload`] (cheap clones).
    pub fn payload(&self) -> Option<Payload> {
        let data = self.data()?.clone();
        Some(Payload {
            data,
            metadata: self.metadata().cloned(),
        })
    }

    /// Consume the frame and return its payload, if the type carries one.
    pub fn into_payload(self) -> Option<Payload> {
        match self {
            Frame::Setup { metadata, data, .. }
            | Frame::RequestResponse { metadata, data, .. }
            | Frame::RequestFnf { metadata, data, .. }
            | Frame::RequestStream { metadata, data, .. }
            | Frame::RequestChannel { metadata, data, .. }
            | Frame::Payload { metadata, data, .. }
            | Frame::Ext { metadata, data, .. } => Some(Payload { data, metadata }),
            Frame::Keepalive { data, .. } => Some(Payload::from_data(data)),
            _ => None,
        }
    }

    /// Replace the stored flags, metadata and data of a payload-carrying
    /// frame, keeping its type-specific fields. Other frames are returned
    /// unchanged.
    pub(crate) fn with_payload_parts(
        mut self,
        new_flags: u16,
        new_metadata: Option<Bytes>,
        new_data: Bytes,
    ) -> Frame {
        match &mut self {
            Frame::RequestResponse {
                flags,
                metadata,
                data,
                ..
            }
            | Frame::RequestFnf {
                flags,
                metadata,
                data,
                ..
            }
            | Frame::RequestStream {
                flags,
                metadata,
                data,
                ..
            }
            | Frame::RequestChannel {
                flags,
                metadata,
                data,
                ..
            }
            | Frame::Payload {
                flags,
                metadata,
                data,
                ..
            }
            | Frame::Ext {
                flags,
                metadata,
                data,
                ..
            } => {
                *flags = new_flags & !flags::METADATA;
                *metadata = new_metadata;
                *data = new_data;
            }
            _ => {}
        }
        self
    }

    // ---- validation ---------------------------------------------------

    /// Check that every field fits its wire representation.
    ///
    /// Frames that pass validation always encode without truncation.
    pub fn validate(&self) -> Result<()> {
        self.header().validate()?;

        match self {
            Frame::Setup {
                resume_token,
                metadata_mime_type,
                data_mime_type,
                metadata,
                ..
            } => {
                if let Some(token) = resume_token {
                    check_len("resume token", token.len(), MAX_RESUME_TOKEN_LENGTH)?;
                }
                check_setup_mime(metadata_mime_type)?;
                check_setup_mime(data_mime_type)?;
                check_prefixed_metadata(metadata.as_ref())?;
            }
            Frame::RequestResponse { metadata, .. }
            | Frame::RequestFnf { metadata, .. }
            | Frame::Payload { metadata, .. }
            | Frame::Ext { metadata, .. } => check_prefixed_metadata(metadata.as_ref())?,
            Frame::RequestStream {
                initial_request_n,
                metadata,
                ..
            }
            | Frame::RequestChannel {
                initial_request_n,
                metadata,
                ..
            } => {
                check_request_n(*initial_request_n)?;
                check_prefixed_metadata(metadata.as_ref())?;
            }
            Frame::RequestN { request_n, .. } => check_request_n(*request_n)?,
            Frame::Resume { resume_token, .. } => {
                check_len("resume token", resume_token.len(), MAX_RESUME_TOKEN_LENGTH)?
            }
            _ => {}
        }

        Ok(())
    }

    // ---- encoding -----------------------------------------------------

    /// Encoded size in bytes, header included.
    pub fn encoded_len(&self) -> usize {
        let prefixed = |metadata: &Option<Bytes>| metadata.as_ref().map_or(0, |m| U24_SIZE + m.len());
        let body = match self {
            Frame::Setup {
                resume_token,
                metadata_mime_type,
                data_mime_type,
                metadata,
                data,
                ..
            } => {
                12 + resume_token.as_ref().map_or(0, |t| 2 + t.len())
                    + 1
                    + metadata_mime_type.len()
                    + 1
                    + data_mime_type.len()
                    + prefixed(metadata)
                    + data.len()
            }
            Frame::Lease { metadata, .. } => 8 + metadata.as_ref().map_or(0, Bytes::len),
            Frame::Keepalive { data, .. } => 8 + data.len(),
            Frame::RequestResponse { metadata, data, .. }
            | Frame::RequestFnf { metadata, data, .. }
            | Frame::Payload { metadata, data, .. } => prefixed(metadata) + data.len(),
            Frame::RequestStream { metadata, data, .. }
            | Frame::RequestChannel { metadata, data, .. } => 4 + prefixed(metadata) + data.len(),
            Frame::RequestN { .. } => 4,
            Frame::Cancel { .. } => 0,
            Frame::Error { message, .. } => 4 + message.len(),
            Frame::MetadataPush { metadata, .. } => metadata.len(),
            Frame::Resume { resume_token, .. } => 6 + resume_token.len() + 16,
            Frame::ResumeOk { .. } => 8,
            Frame::Ext { metadata, data, .. } => 4 + prefixed(metadata) + data.len(),
        };
        HEADER_SIZE + body
    }

    /// Encode the frame into a new buffer.
    pub fn encode(&self) -> Bytes {
        let mut buf = BytesMut::with_capacity(self.encoded_len());
        self.encode_into(&mut buf);
        buf.freeze()
    }

    /// Validate, then encode.
    pub fn try_encode(&self) -> Result<Bytes> {
        self.validate()?;
        Ok(self.encode())
    }

    /// Append the encoded frame to `buf`.
    ///
    /// Lengths that exceed their field are masked; call [`Frame::validate`]
    /// first for frames built from untrusted input.
    pub fn encode_into(&self, buf: &mut BytesMut) {
        buf.reserve(self.encoded_len());
        self.header().put(buf);

        match self {
            Frame::Setup {
                major_version,
                minor_version,
                keepalive_interval,
                max_lifetime,
                resume_token,
                metadata_mime_type,
                data_mime_type,
                metadata,
                data,
                ..
            } => {
                buf.put_u16(*major_version);
                buf.put_u16(*minor_version);
                buf.put_u32(*keepalive_interval);
                buf.put_u32(*max_lifetime);
                if let Some(token) = resume_token {
                    buf.put_u16(token.len() as u16);
                    buf.put_slice(token);
                }
                put_setup_mime(buf, metadata_mime_type);
                put_setup_mime(buf, data_mime_type);
                put_prefixed_metadata(buf, metadata.as_ref());
                buf.put_slice(data);
            }
            Frame::Lease {
                ttl,
                number_of_requests,
                metadata,
                ..
            } => {
                buf.put_u32(*ttl);
                buf.put_u32(*number_of_requests);
                if let Some(metadata) = metadata {
                    buf.put_slice(metadata);
                }
            }
            Frame::Keepalive {
                last_received_position,
                data,
                ..
            } => {
                buf.put_u64(*last_received_position);
                buf.put_slice(data);
            }
            Frame::RequestResponse { metadata, data, .. }
            | Frame::RequestFnf { metadata, data, .. }
            | Frame::Payload { metadata, data, .. } => {
                put_prefixed_metadata(buf, metadata.as_ref());
                buf.put_slice(data);
            }
            Frame::RequestStream {
                initial_request_n,
                metadata,
                data,
                ..
            }
            | Frame::RequestChannel {
                initial_request_n,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*initial_request_n & MAX_REQUEST_N);
                put_prefixed_metadata(buf, metadata.as_ref());
                buf.put_slice(data);
            }
            Frame::RequestN { request_n, .. } => buf.put_u32(*request_n & MAX_REQUEST_N),
            Frame::Cancel { .. } => {}
            Frame::Error { code, message, .. } => {
                buf.put_u32(code.0);
                buf.put_slice(message.as_bytes());
            }
            Frame::MetadataPush { metadata, .. } => buf.put_slice(metadata),
            Frame::Resume {
                major_version,
                minor_version,
                resume_token,
                last_received_server_position,
                first_available_client_position,
                ..
            } => {
                buf.put_u16(*major_version);
                buf.put_u16(*minor_version);
                buf.put_u16(resume_token.len() as u16);
                buf.put_slice(resume_token);
                buf.put_u64(*last_received_server_position);
                buf.put_u64(*first_available_client_position);
            }
            Frame::ResumeOk {
                last_received_client_position,
                ..
            } => buf.put_u64(*last_received_client_position),
            Frame::Ext {
                extended_type,
                metadata,
                data,
                ..
            } => {
                buf.put_u32(*extended_type);
                put_prefixed_metadata(buf, metadata.as_ref());
                buf.put_slice(data);
            }
        }
    }

    // ---- decoding -----------------------------------------------------

    /// Decode exactly one frame.
    ///
    /// # Errors
    ///
    /// - `MalformedFrame` if the buffer is shorter than the header or the
    ///   type's fixed body, or a declared length overruns the buffer
    /// - `UnknownFrameType` if the type is not defined by the protocol
    pub fn decode(buf: Bytes) -> Result<Frame> {
        let header = Header::decode(&buf).ok_or_else(|| {
            RSocketError::MalformedFrame(format!(
                "frame of {} bytes is shorter than the {}-byte header",
                buf.len(),
                HEADER_SIZE
            ))
        })?;
        let kind = header.kind().ok_or(RSocketError::UnknownFrameType {
            frame_type: header.frame_type,
            ignorable: header.can_ignore(),
        })?;
        header.validate()?;

        let stream_id = header.stream_id;
        let has_metadata = header.has_metadata();
        let frame_flags = header.flags & !flags::METADATA;
        let mut body = BodyReader::new(buf.slice(HEADER_SIZE..), kind);

        let frame = match kind {
            FrameType::Setup => {
                let major_version = body.u16("major version")?;
                let minor_version = body.u16("minor version")?;
                let keepalive_interval = body.u32("keepalive interval")?;
                let max_lifetime = body.u32("max lifetime")?;
                let resume_token = if flags::has_flag(frame_flags, flags::RESUME_ENABLE) {
                    let len = body.u16("resume token length")? as usize;
                    Some(body.take(len, "resume token")?)
                } else {
                    None
                };
                let metadata_mime_type = body.mime("metadata mime type")?;
                let data_mime_type = body.mime("data mime type")?;
                let metadata = body.prefixed_metadata(has_metadata)?;
                Frame::Setup {
                    flags: frame_flags & !flags::RESUME_ENABLE,
                    major_version,
                    minor_version,
                    keepalive_interval,
                    max_lifetime,
                    resume_token,
                    metadata_mime_type,
                    data_mime_type,
                    metadata,
                    data: body.rest(),
                }
            }
            FrameType::Lease => {
                let ttl = body.u32("ttl")?;
                let number_of_requests = body.u32("number of requests")?;
                let rest = body.rest();
                Frame::Lease {
                    flags: frame_flags,
                    ttl,
                    number_of_requests,
                    metadata: has_metadata.then_some(rest),
                }
            }
            FrameType::Keepalive => Frame::Keepalive {
                flags: frame_flags,
                last_received_position: body.u64("last received position")?,
                data: body.rest(),
            },
            FrameType::RequestResponse => Frame::RequestResponse {
                stream_id,
                flags: frame_flags,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
            FrameType::RequestFnf => Frame::RequestFnf {
                stream_id,
                flags: frame_flags,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
            FrameType::RequestStream => Frame::RequestStream {
                stream_id,
                flags: frame_flags,
                initial_request_n: body.u32("initial request n")? & MAX_REQUEST_N,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
            FrameType::RequestChannel => Frame::RequestChannel {
                stream_id,
                flags: frame_flags,
                initial_request_n: body.u32("initial request n")? & MAX_REQUEST_N,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
            FrameType::RequestN => Frame::RequestN {
                stream_id,
                flags: frame_flags,
                request_n: body.u32("request n")? & MAX_REQUEST_N,
            },
            FrameType::Cancel => Frame::Cancel {
                stream_id,
                flags: frame_flags,
            },
            FrameType::Payload => Frame::Payload {
                stream_id,
                flags: frame_flags,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
            FrameType::Error => {
                let code = ErrorCode(body.u32("error code")?);
                let message = String::from_utf8_lossy(&body.rest()).into_owned();
                Frame::Error {
                    stream_id,
                    flags: frame_flags,
                    code,
                    message,
                }
            }
            FrameType::MetadataPush => Frame::MetadataPush {
                flags: frame_flags,
                metadata: body.rest(),
            },
            FrameType::Resume => {
                let major_version = body.u16("major version")?;
                let minor_version = body.u16("minor version")?;
                let len = body.u16("resume token length")? as usize;
                let resume_token = body.take(len, "resume token")?;
                Frame::Resume {
                    flags: frame_flags,
                    major_version,
                    minor_version,
                    resume_token,
                    last_received_server_position: body.u64("last received server position")?,
                    first_available_client_position: body
                        .u64("first available client position")?,
                }
            }
            FrameType::ResumeOk => Frame::ResumeOk {
                flags: frame_flags,
                last_received_client_position: body.u64("last received client position")?,
            },
            FrameType::Ext => Frame::Ext {
                stream_id,
                flags: frame_flags,
                extended_type: body.u32("extended type")?,
                metadata: body.prefixed_metadata(has_metadata)?,
                data: body.rest(),
            },
        };

        Ok(frame)
    }
}

/// Cursor over a frame body that reports truncation as `MalformedFrame`.
struct BodyReader {
    buf: Bytes,
    kind: FrameType,
}

impl BodyReader {
    fn new(buf: Bytes, kind: FrameType) -> Self {
        Self { buf, kind }
    }

    fn need(&self, len: usize, field: &str) -> Result<()> {
        if self.buf.remaining() < len {
            return Err(RSocketError::MalformedFrame(format!(
                "{} body truncated reading {}: need {} bytes, have {}",
                self.kind,
                field,
                len,
                self.buf.remaining()
            )));
        }
        Ok(())
    }

    fn u16(&mut self, field: &str) -> Result<u16> {
        self.need(2, field)?;
        Ok(self.buf.get_u16())
    }

    fn u32(&mut self, field: &str) -> Result<u32> {
        self.need(4, field)?;
        Ok(self.buf.get_u32())
    }

    fn u64(&mut self, field: &str) -> Result<u64> {
        self.need(8, field)?;
        Ok(self.buf.get_u64())
    }

    fn take(&mut self, len: usize, field: &str) -> Result<Bytes> {
        self.need(len, field)?;
        Ok(self.buf.split_to(len))
    }

    fn mime(&mut self, field: &str) -> Result<String> {
        self.need(1, field)?;
        let len = self.buf.get_u8() as usize;
        let raw = self.take(len, field)?;
        if !raw.is_ascii() {
            return Err(RSocketError::MalformedFrame(format!(
                "{} is not ASCII",
                field
            )));
        }
        // ASCII is valid UTF-8
        Ok(String::from_utf8_lossy(&raw).into_owned())
    }

    fn prefixed_metadata(&mut self, present: bool) -> Result<Option<Bytes>> {
        if !present {
            return Ok(None);
        }
        let len = read_u24(&self.buf).ok_or_else(|| {
            RSocketError::MalformedFrame(format!(
                "{} body truncated reading metadata length",
                self.kind
            ))
        })?;
        self.buf.advance(U24_SIZE);
        self.take(len, "metadata").map(Some)
    }

    fn rest(&mut self) -> Bytes {
        std::mem::take(&mut self.buf)
    }
}

fn put_prefixed_metadata(buf: &mut BytesMut, metadata: Option<&Bytes>) {
    if let Some(metadata) = metadata {
        buf.put_uint((metadata.len() & MAX_U24) as u64, U24_SIZE);
        buf.put_slice(metadata);
    }
}

fn put_setup_mime(buf: &mut BytesMut, mime: &str) {
    buf.put_u8(mime.len() as u8);
    buf.put_slice(mime.as_bytes());
}

fn check_len(what: &'static str, len: usize, max: usize) -> Result<()> {
    if len > max {
        return Err(RSocketError::LengthOverflow { what, len, max });
    }
    Ok(())
}

fn check_prefixed_metadata(metadata: Option<&Bytes>) -> Result<()> {
    match metadata {
        Some(m) => check_len("metadata", m.len(), MAX_U24),
        None => Ok(()),
    }
}

pub(crate) fn check_request_n(n: u32) -> Result<()> {
    if n == 0 || n > MAX_REQUEST_N {
        return Err(RSocketError::MalformedFrame(format!(
            "request n {} outside 1..={}",
            n, MAX_REQUEST_N
        )));
    }
    Ok(())
}

fn check_setup_mime(mime: &str) -> Result<()> {
    check_len("setup mime type", mime.len(), MAX_SETUP_MIME_LENGTH)?;
    if !mime.is_ascii() {
        return Err(RSocketError::InvalidMimeType(mime.to_string()));
    }
    Ok(())
}

/// Build the length-prefixed form of an encoded frame for byte-stream
/// transports.
///
/// # Example
///
/// ```
/// use rsocket_wire::protocol::{encode_length_prefixed, Frame};
///
/// let bytes = encode_length_prefixed(&Frame::cancel(1)).unwrap();
/// assert_eq!(&bytes[..3], &[0, 0, 6]);
/// ```
pub fn encode_length_prefixed(frame: &Frame) -> Result<Bytes> {
    let len = frame.encoded_len();
    let mut buf = BytesMut::with_capacity(U24_SIZE + len);
    put_u24(&mut buf, len, "frame")?;
    frame.encode_into(&mut buf);
    Ok(buf.freeze())
}
