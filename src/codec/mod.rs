//! Codec module - typed encoding of payload data.
//!
//! Payloads are opaque bytes to the protocol; their interpretation is fixed
//! per connection by the SETUP data mime type. This module maps the mime
//! types it understands onto serde codecs:
//!
//! - [`JsonCodec`] - `application/json` via `serde_json`
//! - [`MsgPackCodec`] - `application/x-msgpack` via `rmp-serde`
//!
//! Anything else (including `application/octet-stream`) is handled as raw
//! bytes through [`Payload`] directly.
//!
//! # Example
//!
//! ```
//! use rsocket_wire::codec::DataCodec;
//! use rsocket_wire::protocol::Payload;
//!
//! let codec = DataCodec::from_mime_type("application/json").unwrap();
//! let payload = codec.encode_payload(&vec![1, 2, 3]).unwrap();
//! assert_eq!(payload.data().as_ref(), b"[1,2,3]");
//!
//! let decoded: Vec<u32> = codec.decode_payload(&payload).unwrap();
//! assert_eq!(decoded, vec![1, 2, 3]);
//! ```

mod json;
mod msgpack;

pub use json::JsonCodec;
pub use msgpack::MsgPackCodec;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;

use crate::error::Result;
use crate::metadata::WellKnownMimeType;
use crate::protocol::Payload;

/// MessagePack has no well-known identifier; this is the conventional name.
pub const MSGPACK_MIME_TYPE: &str = "application/x-msgpack";

/// Serde codec selected by a data mime type.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataCodec {
    Json,
    MsgPack,
}

impl DataCodec {
    /// Codec for a mime type, if one is supported.
    pub fn from_mime_type(mime_type: &str) -> Option<Self> {
        let essence = mime_type.split(';').next().unwrap_or_default().trim();
        if essence.eq_ignore_ascii_case(WellKnownMimeType::ApplicationJson.as_str()) {
            Some(DataCodec::Json)
        } else if essence.eq_ignore_ascii_case(MSGPACK_MIME_TYPE)
            || essence.eq_ignore_ascii_case("application/msgpack")
        {
            Some(DataCodec::MsgPack)
        } else {
            None
        }
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            DataCodec::Json => WellKnownMimeType::ApplicationJson.as_str(),
            DataCodec::MsgPack => MSGPACK_MIME_TYPE,
        }
    }

    pub fn encode<T: Serialize>(self, value: &T) -> Result<Bytes> {
        match self {
            DataCodec::Json => JsonCodec::encode(value).map(Bytes::from),
            DataCodec::MsgPack => MsgPackCodec::encode(value).map(Bytes::from),
        }
    }

    pub fn decode<T: DeserializeOwned>(self, bytes: &[u8]) -> Result<T> {
        match self {
            DataCodec::Json => JsonCodec::decode(bytes),
            DataCodec::MsgPack => MsgPackCodec::decode(bytes),
        }
    }

    /// Encode `value` as the data of a payload without metadata.
    pub fn encode_payload<T: Serialize>(self, value: &T) -> Result<Payload> {
        Ok(Payload::from_data(self.encode(value)?))
    }

    /// Decode the data of a payload; metadata is ignored.
    pub fn decode_payload<T: DeserializeOwned>(self, payload: &Payload) -> Result<T> {
        self.decode(payload.data())
    }
}
