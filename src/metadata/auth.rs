//! Authentication metadata (`message/x.rsocket.authentication.v0`).
//!
//! ```text
//! well-known:  1│auth id (7 bits) │ payload
//! custom:      0│len - 1 (7 bits) │ auth type (ASCII) │ payload
//! simple:      payload = username length (uint16) │ username │ password
//! bearer:      payload = token
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::composite::explicit_mime_header;
use crate::error::{RSocketError, Result};

const WELL_KNOWN_MASK: u8 = 0x80;
const LENGTH_MASK: u8 = 0x7F;

/// Longest username the simple scheme can carry.
pub const MAX_USERNAME_LENGTH: usize = u16::MAX as usize;

/// Registered authentication schemes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum WellKnownAuthType {
    Simple = 0x00,
    Bearer = 0x01,
}

impl WellKnownAuthType {
    /// Look up a scheme by its 7-bit identifier.
    pub fn from_identifier(id: u8) -> Option<Self> {
        match id {
            0x00 => Some(WellKnownAuthType::Simple),
            0x01 => Some(WellKnownAuthType::Bearer),
            _ => None,
        }
    }

    /// Scheme name.
    pub fn as_str(self) -> &'static str {
        match self {
            WellKnownAuthType::Simple => "simple",
            WellKnownAuthType::Bearer => "bearer",
        }
    }

    #[inline]
    pub fn identifier(self) -> u8 {
        self as u8
    }
}

/// Authentication scheme of a decoded entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum AuthType {
    WellKnown(WellKnownAuthType),
    /// Well-known encoding with an unregistered id.
    Reserved(u8),
    Custom(String),
}

/// Decoded authentication metadata.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct AuthMetadata {
    pub auth_type: AuthType,
    pub payload: Bytes,
}

/// Encode `simple` credentials.
pub fn encode_simple_auth_metadata(username: &str, password: &str) -> Result<Bytes> {
    if username.len() > MAX_USERNAME_LENGTH {
        return Err(RSocketError::LengthOverflow {
            what: "username",
            len: username.len(),
            max: MAX_USERNAME_LENGTH,
        });
    }
    let mut buf = BytesMut::with_capacity(3 + username.len() + password.len());
    buf.put_u8(WELL_KNOWN_MASK | WellKnownAuthType::Simple.identifier());
    buf.put_u16(username.len() as u16);
    buf.put_slice(username.as_bytes());
    buf.put_slice(password.as_bytes());
    Ok(buf.freeze())
}

/// Encode a `bearer` token.
pub fn encode_bearer_auth_metadata(token: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(1 + token.len());
    buf.put_u8(WELL_KNOWN_MASK | WellKnownAuthType::Bearer.identifier());
    buf.put_slice(token);
    buf.freeze()
}

/// Encode a custom scheme.
///
/// The scheme name follows the same rules as an explicit mime type
/// (1-128 ASCII bytes).
pub fn encode_custom_auth_metadata(auth_type: &str, payload: &[u8]) -> Result<Bytes> {
    let header = explicit_mime_header(auth_type)?;
    let mut buf = BytesMut::with_capacity(1 + auth_type.len() + payload.len());
    buf.put_u8(header);
    buf.put_slice(auth_type.as_bytes());
    buf.put_slice(payload);
    Ok(buf.freeze())
}

/// Decode authentication metadata.
pub fn decode_auth_metadata(metadata: &Bytes) -> Result<AuthMetadata> {
    let header = *metadata.first().ok_or_else(|| {
        RSocketError::MalformedMetadata("authentication metadata is empty".to_string())
    })?;

    if header & WELL_KNOWN_MASK != 0 {
        let id = header & LENGTH_MASK;
        let auth_type = match WellKnownAuthType::from_identifier(id) {
            Some(known) => AuthType::WellKnown(known),
            None => AuthType::Reserved(id),
        };
        return Ok(AuthMetadata {
            auth_type,
            payload: metadata.slice(1..),
        });
    }

    let len = usize::from(header & LENGTH_MASK) + 1;
    if metadata.len() < 1 + len {
        return Err(RSocketError::MalformedMetadata(
            "authentication type length exceeds metadata".to_string(),
        ));
    }
    let raw = &metadata[1..1 + len];
    if !raw.is_ascii() {
        return Err(RSocketError::MalformedMetadata(
            "authentication type is not ASCII".to_string(),
        ));
    }
    Ok(AuthMetadata {
        auth_type: AuthType::Custom(String::from_utf8_lossy(raw).into_owned()),
        payload: metadata.slice(1 + len..),
    })
}

/// Split a `simple` payload into username and password.
pub fn decode_simple_auth_payload(payload: &Bytes) -> Result<(Bytes, Bytes)> {
    if payload.len() < 2 {
        return Err(RSocketError::MalformedMetadata(
            "simple auth payload is missing the username length".to_string(),
        ));
    }
    let len = usize::from(u16::from_be_bytes([payload[0], payload[1]]));
    if payload.len() < 2 + len {
        return Err(RSocketError::MalformedMetadata(
            "simple auth username length exceeds payload".to_string(),
        ));
    }
    Ok((payload.slice(2..2 + len), payload.slice(2 + len..)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_simple_auth() {
        let encoded = encode_simple_auth_metadata("user", "pass").unwrap();
        assert_eq!(&encoded[..3], &[0x80, 0x00, 0x04]);

        let decoded = decode_auth_metadata(&encoded).unwrap();
        assert_eq!(
            decoded.auth_type,
            AuthType::WellKnown(WellKnownAuthType::Simple)
        );
        let (user, pass) = decode_simple_auth_payload(&decoded.payload).unwrap();
        assert_eq!(&user[..], b"user");
        assert_eq!(&pass[..], b"pass");
    }

    #[test]
    fn test_bearer_auth() {
        let encoded = encode_bearer_auth_metadata(b"8a7d50f7");
        assert_eq!(encoded[0], 0x81);
        let decoded = decode_auth_metadata(&encoded).unwrap();
        assert_eq!(
            decoded.auth_type,
            AuthType::WellKnown(WellKnownAuthType::Bearer)
        );
        assert_eq!(&decoded.payload[..], b"8a7d50f7");
    }

    #[test]
    fn test_custom_auth() {
        let encoded = encode_custom_auth_metadata("hmac", b"sig").unwrap();
        assert_eq!(encoded[0], 3);
        let decoded = decode_auth_metadata(&encoded).unwrap();
        assert_eq!(decoded.auth_type, AuthType::Custom("hmac".to_string()));
        assert_eq!(&decoded.payload[..], b"sig");

        assert!(encode_custom_auth_metadata("", b"").is_err());
    }

    #[test]
    fn test_reserved_auth_id() {
        let decoded = decode_auth_metadata(&Bytes::from_static(&[0x85, 1, 2])).unwrap();
        assert_eq!(decoded.auth_type, AuthType::Reserved(5));
    }

    #[test]
    fn test_malformed_auth() {
        assert!(decode_auth_metadata(&Bytes::new()).is_err());
        assert!(decode_auth_metadata(&Bytes::from_static(&[0x09, b'a'])).is_err());
        assert!(decode_simple_auth_payload(&Bytes::from_static(&[0, 9, b'a'])).is_err());
    }
}
