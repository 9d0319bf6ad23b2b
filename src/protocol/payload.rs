//! Application-visible payload: data plus optional metadata.
//!
//! Data is "the rest of the frame" on the wire, so absent data and empty
//! data are indistinguishable and both are an empty `Bytes`. Metadata keeps
//! the absent / empty-but-present distinction because the METADATA flag
//! carries it.

use bytes::Bytes;

/// A unit of application data exchanged on a stream.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Payload {
    /// Data bytes (possibly empty).
    pub data: Bytes,
    /// Metadata bytes, if the METADATA flag is set.
    pub metadata: Option<Bytes>,
}

impl Payload {
    /// Create a payload from data and optional metadata.
    pub fn new(data: impl Into<Bytes>, metadata: Option<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata,
        }
    }

    /// Create a data-only payload.
    pub fn from_data(data: impl Into<Bytes>) -> Self {
        Self {
            data: data.into(),
            metadata: None,
        }
    }

    /// Create a metadata-only payload.
    pub fn from_metadata(metadata: impl Into<Bytes>) -> Self {
        Self {
            data: Bytes::new(),
            metadata: Some(metadata.into()),
        }
    }

    /// Attach metadata, replacing any existing metadata.
    pub fn with_metadata(mut self, metadata: impl Into<Bytes>) -> Self {
        self.metadata = Some(metadata.into());
        self
    }

    /// Get a reference to the data bytes.
    #[inline]
    pub fn data(&self) -> &Bytes {
        &self.data
    }

    /// Get a reference to the metadata bytes, if present.
    #[inline]
    pub fn metadata(&self) -> Option<&Bytes> {
        self.metadata.as_ref()
    }

    /// Check if metadata is present (possibly empty).
    #[inline]
    pub fn has_metadata(&self) -> bool {
        self.metadata.is_some()
    }

    /// Combined length of data and metadata.
    #[inline]
    pub fn len(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, Bytes::len)
    }

    /// True when there is no data and no metadata at all.
    #[inline]
    pub fn is_empty(&self) -> bool {
        self.data.is_empty() && self.metadata.is_none()
    }

    /// Split into data and metadata.
    pub fn into_parts(self) -> (Bytes, Option<Bytes>) {
        (self.data, self.metadata)
    }
}

impl From<Bytes> for Payload {
    fn from(data: Bytes) -> Self {
        Payload::from_data(data)
    }
}

impl From<&'static str> for Payload {
    fn from(data: &'static str) -> Self {
        Payload::from_data(Bytes::from_static(data.as_bytes()))
    }
}

impl From<Vec<u8>> for Payload {
    fn from(data: Vec<u8>) -> Self {
        Payload::from_data(data)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_constructors() {
        let p = Payload::from_data("hello");
        assert_eq!(p.data(), &Bytes::from_static(b"hello"));
        assert!(!p.has_metadata());

        let p = Payload::from_metadata("md");
        assert!(p.data().is_empty());
        assert_eq!(p.metadata().unwrap(), &Bytes::from_static(b"md"));
    }

    #[test]
    fn test_empty_metadata_is_not_absent() {
        let p = Payload::from_data("x").with_metadata(Bytes::new());
        assert!(p.has_metadata());
        assert!(!p.is_empty());
        assert!(Payload::default().is_empty());
    }

    #[test]
    fn test_len_counts_both_parts() {
        let p = Payload::new(Bytes::from_static(b"abc"), Some(Bytes::from_static(b"de")));
        assert_eq!(p.len(), 5);
        let (data, metadata) = p.into_parts();
        assert_eq!(&data[..], b"abc");
        assert_eq!(&metadata.unwrap()[..], b"de");
    }
}
