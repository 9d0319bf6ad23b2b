//! Well-known mime types and their one-byte identifiers.
//!
//! A well-known type is written as `0x80 | id` instead of its full string.
//! Identifiers 0x00-0x7F that are not listed here are reserved; decoders
//! surface them without failing.

use std::fmt;
use std::str::FromStr;

use crate::error::RSocketError;

/// Largest identifier a well-known mime type can have (7 bits).
pub const MAX_WELL_KNOWN_ID: u8 = 0x7F;

macro_rules! well_known_mime_types {
    ($( $variant:ident = $id:literal => $mime:literal, )*) => {
        /// Mime types with a compressed one-byte representation.
        #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
        #[repr(u8)]
        pub enum WellKnownMimeType {
            $( $variant = $id, )*
        }

        impl WellKnownMimeType {
            /// Every registered type, in identifier order.
            pub const ALL: &'static [WellKnownMimeType] = &[
                $( WellKnownMimeType::$variant, )*
            ];

            /// Look up a type by its 7-bit identifier.
            pub fn from_identifier(id: u8) -> Option<Self> {
                match id {
                    $( $id => Some(WellKnownMimeType::$variant), )*
                    _ => None,
                }
            }

            /// Look up a type by its mime string.
            pub fn from_mime(mime: &str) -> Option<Self> {
                match mime {
                    $( $mime => Some(WellKnownMimeType::$variant), )*
                    _ => None,
                }
            }

            /// Mime type string.
            pub fn as_str(self) -> &'static str {
                match self {
                    $( WellKnownMimeType::$variant => $mime, )*
                }
            }
        }
    };
}

well_known_mime_types! {
    ApplicationAvro = 0x00 => "application/avro",
    ApplicationCbor = 0x01 => "application/cbor",
    ApplicationGraphql = 0x02 => "application/graphql",
    ApplicationGzip = 0x03 => "application/gzip",
    ApplicationJavascript = 0x04 => "application/javascript",
    ApplicationJson = 0x05 => "application/json",
    ApplicationOctetStream = 0x06 => "application/octet-stream",
    ApplicationPdf = 0x07 => "application/pdf",
    ApplicationThrift = 0x08 => "application/vnd.apache.thrift.binary",
    ApplicationProtobuf = 0x09 => "application/vnd.google.protobuf",
    ApplicationXml = 0x0A => "application/xml",
    ApplicationZip = 0x0B => "application/zip",
    AudioAac = 0x0C => "audio/aac",
    AudioMp3 = 0x0D => "audio/mp3",
    AudioMp4 = 0x0E => "audio/mp4",
    AudioMpeg3 = 0x0F => "audio/mpeg3",
    AudioMpeg = 0x10 => "audio/mpeg",
    AudioOgg = 0x11 => "audio/ogg",
    AudioOpus = 0x12 => "audio/opus",
    AudioVorbis = 0x13 => "audio/vorbis",
    ImageBmp = 0x14 => "image/bmp",
    ImageGif = 0x15 => "image/gif",
    ImageHeicSequence = 0x16 => "image/heic-sequence",
    ImageHeic = 0x17 => "image/heic",
    ImageHeifSequence = 0x18 => "image/heif-sequence",
    ImageHeif = 0x19 => "image/heif",
    ImageJpeg = 0x1A => "image/jpeg",
    ImagePng = 0x1B => "image/png",
    ImageTiff = 0x1C => "image/tiff",
    MultipartMixed = 0x1D => "multipart/mixed",
    TextCss = 0x1E => "text/css",
    TextCsv = 0x1F => "text/csv",
    TextHtml = 0x20 => "text/html",
    TextPlain = 0x21 => "text/plain",
    TextXml = 0x22 => "text/xml",
    VideoH264 = 0x23 => "video/H264",
    VideoH265 = 0x24 => "video/H265",
    VideoVp8 = 0x25 => "video/VP8",
    ApplicationHessian = 0x26 => "application/x-hessian",
    ApplicationJavaObject = 0x27 => "application/x-java-object",
    ApplicationCloudeventsJson = 0x28 => "application/cloudevents+json",
    ApplicationCapnp = 0x29 => "application/x-capnp",
    ApplicationFlatbuffers = 0x2A => "application/x-flatbuffers",
    MessageRSocketMimeType = 0x7A => "message/x.rsocket.mime-type.v0",
    MessageRSocketAcceptMimeTypes = 0x7B => "message/x.rsocket.accept-mime-types.v0",
    MessageRSocketAuthentication = 0x7C => "message/x.rsocket.authentication.v0",
    MessageRSocketTracingZipkin = 0x7D => "message/x.rsocket.tracing-zipkin.v0",
    MessageRSocketRouting = 0x7E => "message/x.rsocket.routing.v0",
    MessageRSocketCompositeMetadata = 0x7F => "message/x.rsocket.composite-metadata.v0",
}

impl WellKnownMimeType {
    /// 7-bit identifier.
    #[inline]
    pub fn identifier(self) -> u8 {
        self as u8
    }
}

impl fmt::Display for WellKnownMimeType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for WellKnownMimeType {
    type Err = RSocketError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        WellKnownMimeType::from_mime(s)
            .ok_or_else(|| RSocketError::InvalidMimeType(format!("{} is not well-known", s)))
    }
}
