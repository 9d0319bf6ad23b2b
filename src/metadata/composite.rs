//! Composite metadata codec.
//!
//! A composite metadata buffer is a sequence of self-describing entries:
//! ```text
//! ┌────────────────────┬─────────────────────┬────────────────┬─────────┐
//! │ 1│ well-known id   │                     │ content length │ content │
//! │ 0│ mime length - 1 │ mime (ASCII, 1-128) │ uint24 BE      │         │
//! └────────────────────┴─────────────────────┴────────────────┴─────────┘
//! ```
//!
//! Decoding is lazy: [`CompositeMetadata::iter`] reads one entry per call.
//! Entries cannot be resynchronized after a structural error, so the
//! iterator yields that error once and then stops. A well-known identifier
//! missing from the registry is not an error and comes back as
//! [`Entry::Reserved`].
//!
//! # Example
//!
//! ```
//! use bytes::BytesMut;
//! use rsocket_wire::metadata::{encode_and_add_custom_metadata, CompositeMetadata};
//!
//! let mut composite = BytesMut::new();
//! encode_and_add_custom_metadata(&mut composite, "custom", b"1234").unwrap();
//!
//! let metadata = CompositeMetadata::new(composite.freeze());
//! let entry = metadata.iter().next().unwrap().unwrap();
//! assert_eq!(entry.mime_type(), Some("custom"));
//! assert_eq!(&entry.content()[..], b"1234");
//! ```

use bytes::{BufMut, Bytes, BytesMut};

use super::mime::{WellKnownMimeType, MAX_WELL_KNOWN_ID};
use crate::error::{RSocketError, Result};
use crate::protocol::{put_u24, read_u24, MAX_U24, U24_SIZE};

/// High bit of the entry header: set for well-known ids.
const WELL_KNOWN_MASK: u8 = 0x80;

/// Low 7 bits of the entry header: id, or explicit mime length - 1.
const LENGTH_MASK: u8 = 0x7F;

/// Longest explicit mime type string.
pub const MAX_MIME_LENGTH: usize = 128;

/// Identifies the mime type of a composite metadata entry.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum MimeKey {
    /// Compressed 7-bit identifier.
    WellKnown(u8),
    /// Explicit ASCII mime string.
    Explicit(String),
}

impl MimeKey {
    /// Resolved mime string, if known.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            MimeKey::WellKnown(id) => WellKnownMimeType::from_identifier(*id).map(|m| m.as_str()),
            MimeKey::Explicit(mime) => Some(mime),
        }
    }
}

impl From<WellKnownMimeType> for MimeKey {
    fn from(mime: WellKnownMimeType) -> Self {
        MimeKey::WellKnown(mime.identifier())
    }
}

impl From<u8> for MimeKey {
    fn from(id: u8) -> Self {
        MimeKey::WellKnown(id)
    }
}

impl From<&str> for MimeKey {
    fn from(mime: &str) -> Self {
        MimeKey::Explicit(mime.to_string())
    }
}

impl From<String> for MimeKey {
    fn from(mime: String) -> Self {
        MimeKey::Explicit(mime)
    }
}

/// Validate an explicit mime type and return its encoded header byte.
pub(crate) fn explicit_mime_header(mime: &str) -> Result<u8> {
    if !mime.is_ascii() {
        return Err(RSocketError::InvalidMimeType(
            "custom mime type must be US_ASCII characters only".to_string(),
        ));
    }
    if mime.is_empty() || mime.len() > MAX_MIME_LENGTH {
        return Err(RSocketError::InvalidMimeType(format!(
            "custom mime type length {} must be within 1-{}",
            mime.len(),
            MAX_MIME_LENGTH
        )));
    }
    Ok((mime.len() - 1) as u8)
}

/// Append one entry to `buf`.
///
/// # Errors
///
/// - `InvalidMimeType` if an explicit mime is empty, longer than 128 bytes
///   or not ASCII, or a well-known id exceeds 127
/// - `LengthOverflow` if the content is 16 MiB or longer
pub fn encode_entry_into(buf: &mut BytesMut, key: &MimeKey, content: &[u8]) -> Result<()> {
    if content.len() > MAX_U24 {
        return Err(RSocketError::LengthOverflow {
            what: "metadata entry",
            len: content.len(),
            max: MAX_U24,
        });
    }
    match key {
        MimeKey::WellKnown(id) => {
            if *id > MAX_WELL_KNOWN_ID {
                return Err(RSocketError::InvalidMimeType(format!(
                    "well-known mime id {} does not fit in 7 bits",
                    id
                )));
            }
            buf.reserve(1 + U24_SIZE + content.len());
            buf.put_u8(WELL_KNOWN_MASK | id);
        }
        MimeKey::Explicit(mime) => {
            let header = explicit_mime_header(mime)?;
            buf.reserve(1 + mime.len() + U24_SIZE + content.len());
            buf.put_u8(header);
            buf.put_slice(mime.as_bytes());
        }
    }
    put_u24(buf, content.len(), "metadata entry")?;
    buf.put_slice(content);
    Ok(())
}

/// Encode a single entry.
pub fn encode_entry(key: &MimeKey, content: &[u8]) -> Result<Bytes> {
    let mut buf = BytesMut::new();
    encode_entry_into(&mut buf, key, content)?;
    Ok(buf.freeze())
}

/// Append an entry with an explicit mime type to an existing composite.
///
/// `composite` is left unchanged on error.
pub fn encode_and_add_custom_metadata(
    composite: &mut BytesMut,
    custom_mime_type: &str,
    content: &[u8],
) -> Result<()> {
    explicit_mime_header(custom_mime_type)?;
    encode_entry_into(
        composite,
        &MimeKey::Explicit(custom_mime_type.to_string()),
        content,
    )
}

/// Append an entry with a well-known mime type to an existing composite.
pub fn encode_and_add_well_known_metadata(
    composite: &mut BytesMut,
    mime: impl Into<MimeKey>,
    content: &[u8],
) -> Result<()> {
    let key = mime.into();
    if let MimeKey::Explicit(ref mime) = key {
        return Err(RSocketError::InvalidMimeType(format!(
            "{} is not a well-known mime type",
            mime
        )));
    }
    encode_entry_into(composite, &key, content)
}

/// Encode a whole sequence of entries.
///
/// # Example
///
/// ```
/// use rsocket_wire::metadata::{encode_composite_metadata, MimeKey, WellKnownMimeType};
///
/// let bytes = encode_composite_metadata([
///     (MimeKey::from(WellKnownMimeType::MessageRSocketRouting), &b"\x04echo"[..]),
///     (MimeKey::from("text/x-trace"), &b"abc"[..]),
/// ])
/// .unwrap();
/// assert_eq!(bytes[0], 0xFE);
/// ```
pub fn encode_composite_metadata<I, C>(entries: I) -> Result<Bytes>
where
    I: IntoIterator<Item = (MimeKey, C)>,
    C: AsRef<[u8]>,
{
    let mut buf = BytesMut::new();
    for (key, content) in entries {
        encode_entry_into(&mut buf, &key, content.as_ref())?;
    }
    Ok(buf.freeze())
}

/// One decoded composite metadata entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Entry {
    /// Registered well-known mime type.
    WellKnown {
        mime: WellKnownMimeType,
        content: Bytes,
    },
    /// Well-known encoding with an identifier missing from the registry.
    Reserved { id: u8, content: Bytes },
    /// Explicit mime string.
    Explicit { mime: String, content: Bytes },
}

impl Entry {
    /// Undecoded entry content.
    pub fn content(&self) -> &Bytes {
        match self {
            Entry::WellKnown { content, .. }
            | Entry::Reserved { content, .. }
            | Entry::Explicit { content, .. } => content,
        }
    }

    /// Mime type of the entry, or `None` for reserved identifiers.
    pub fn mime_type(&self) -> Option<&str> {
        match self {
            Entry::WellKnown { mime, .. } => Some(mime.as_str()),
            Entry::Reserved { .. } => None,
            Entry::Explicit { mime, .. } => Some(mime),
        }
    }

    /// The key this entry was encoded with.
    pub fn key(&self) -> MimeKey {
        match self {
            Entry::WellKnown { mime, .. } => MimeKey::from(*mime),
            Entry::Reserved { id, .. } => MimeKey::WellKnown(*id),
            Entry::Explicit { mime, .. } => MimeKey::Explicit(mime.clone()),
        }
    }

    /// Consume the entry and return its content.
    pub fn into_content(self) -> Bytes {
        match self {
            Entry::WellKnown { content, .. }
            | Entry::Reserved { content, .. }
            | Entry::Explicit { content, .. } => content,
        }
    }
}

/// A composite metadata buffer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompositeMetadata {
    buffer: Bytes,
}

impl CompositeMetadata {
    /// Wrap an encoded composite buffer.
    pub fn new(buffer: Bytes) -> Self {
        Self { buffer }
    }

    /// Lazily decode the entries.
    pub fn iter(&self) -> CompositeMetadataIter {
        decode_composite_metadata(self.buffer.clone())
    }

    /// First entry with the given well-known type.
    ///
    /// Stops at the first structural error.
    pub fn find(&self, mime: WellKnownMimeType) -> Option<Bytes> {
        self.iter()
            .map_while(|entry| entry.ok())
            .find(|entry| matches!(entry, Entry::WellKnown { mime: m, .. } if *m == mime))
            .map(Entry::into_content)
    }

    /// Underlying buffer.
    pub fn as_bytes(&self) -> &Bytes {
        &self.buffer
    }
}

impl IntoIterator for &CompositeMetadata {
    type Item = Result<Entry>;
    type IntoIter = CompositeMetadataIter;

    fn into_iter(self) -> Self::IntoIter {
        self.iter()
    }
}

/// Decode a composite buffer into a lazy, non-restartable entry sequence.
pub fn decode_composite_metadata(buffer: Bytes) -> CompositeMetadataIter {
    CompositeMetadataIter {
        buffer,
        failed: false,
    }
}

/// Iterator over composite metadata entries.
///
/// Content slices share the original buffer.
#[derive(Debug)]
pub struct CompositeMetadataIter {
    buffer: Bytes,
    failed: bool,
}

impl CompositeMetadataIter {
    fn decode_one(&mut self) -> Result<Entry> {
        let buf = self.buffer.clone();
        let header = buf[0];
        let mut offset = 1;

        let key = if header & WELL_KNOWN_MASK != 0 {
            MimeKey::WellKnown(header & LENGTH_MASK)
        } else {
            let mime_len = usize::from(header & LENGTH_MASK) + 1;
            if buf.len() < offset + mime_len {
                return Err(RSocketError::MalformedMetadata(
                    "inappropriately formed mime length".to_string(),
                ));
            }
            let raw = &buf[offset..offset + mime_len];
            if !raw.is_ascii() {
                return Err(RSocketError::MalformedMetadata(
                    "explicit mime type is not ASCII".to_string(),
                ));
            }
            offset += mime_len;
            MimeKey::Explicit(String::from_utf8_lossy(raw).into_owned())
        };

        let content_len = read_u24(&buf[offset..]).ok_or_else(|| {
            RSocketError::MalformedMetadata("metadata length is absent or malformed".to_string())
        })?;
        offset += U24_SIZE;

        if buf.len() < offset + content_len {
            return Err(RSocketError::MalformedMetadata(
                "inappropriately formed metadata length or malformed content".to_string(),
            ));
        }
        let content = buf.slice(offset..offset + content_len);
        self.buffer = buf.slice(offset + content_len..);

        Ok(match key {
            MimeKey::WellKnown(id) => match WellKnownMimeType::from_identifier(id) {
                Some(mime) => Entry::WellKnown { mime, content },
                None => Entry::Reserved { id, content },
            },
            MimeKey::Explicit(mime) => Entry::Explicit { mime, content },
        })
    }
}

impl Iterator for CompositeMetadataIter {
    type Item = Result<Entry>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.failed || self.buffer.is_empty() {
            return None;
        }
        let result = self.decode_one();
        if result.is_err() {
            self.failed = true;
            self.buffer = Bytes::new();
        }
        Some(result)
    }
}

impl std::iter::FusedIterator for CompositeMetadataIter {}
