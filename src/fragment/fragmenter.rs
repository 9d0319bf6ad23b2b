//! Splitting a payload into a chain of frames that each fit a size limit.
//!
//! The first frame keeps the requested type (and its requestN). Every
//! following frame is a PAYLOAD. All frames except the last carry FOLLOWS.
//! Metadata is emitted before any data, and every frame that carries a
//! metadata slice pays 3 bytes for its length prefix.
//!
//! The size limit counts frame body bytes after the header. A REQUEST_STREAM
//! or REQUEST_CHANNEL head frame additionally reserves 3 bytes of the limit
//! for its requestN field.

use bytes::Bytes;

use crate::error::{RSocketError, Result};
use crate::protocol::{flags, Frame, FrameType, Payload};

/// Bytes of the limit the head frame of a stream or channel request
/// reserves for its requestN.
pub const REQUEST_N_FRAGMENT_OVERHEAD: usize = 3;

/// Length prefix paid by every frame that carries metadata.
pub const METADATA_LENGTH_OVERHEAD: usize = 3;

/// Smallest usable fragment size. Anything smaller cannot make progress
/// through metadata.
pub const MIN_FRAGMENT_SIZE: usize = METADATA_LENGTH_OVERHEAD + 1;

fn reserves_request_n(frame_type: FrameType) -> bool {
    matches!(
        frame_type,
        FrameType::RequestStream | FrameType::RequestChannel
    )
}

/// Check whether `payload` would exceed `max_frame_size` as a single frame
/// of `frame_type`. A limit of 0 disables fragmentation.
pub fn is_fragmentable(payload: &Payload, max_frame_size: usize, frame_type: FrameType) -> bool {
    if max_frame_size == 0 {
        return false;
    }
    let mut size = payload.data.len();
    if let Some(metadata) = &payload.metadata {
        size += metadata.len() + METADATA_LENGTH_OVERHEAD;
    }
    if reserves_request_n(frame_type) {
        size += REQUEST_N_FRAGMENT_OVERHEAD;
    }
    size > max_frame_size
}

/// Fragment a payload into frames of `frame_type`.
///
/// Accepts REQUEST_RESPONSE, REQUEST_FNF, REQUEST_STREAM, REQUEST_CHANNEL
/// and PAYLOAD. Stream and channel requests are sent with an initial
/// requestN of 0; use [`fragment_with_request_n`] to set one.
pub fn fragment(
    stream_id: u32,
    payload: Payload,
    max_frame_size: usize,
    frame_type: FrameType,
    complete_on_last: bool,
) -> Result<Fragmenter> {
    fragment_with_request_n(
        stream_id,
        payload,
        max_frame_size,
        frame_type,
        0,
        complete_on_last,
    )
}

/// Fragment a payload, setting the requestN of a stream or channel head
/// frame.
///
/// # Example
///
/// ```
/// use rsocket_wire::fragment::fragment_with_request_n;
/// use rsocket_wire::protocol::{FrameType, Payload};
///
/// let payload = Payload::from_data("hello worldhello world");
/// let frames: Vec<_> =
///     fragment_with_request_n(1, payload, 11, FrameType::RequestStream, 1, false)
///         .unwrap()
///         .collect();
/// assert_eq!(frames.len(), 3);
/// assert_eq!(frames[0].request_n_value(), Some(1));
/// ```
pub fn fragment_with_request_n(
    stream_id: u32,
    payload: Payload,
    max_frame_size: usize,
    frame_type: FrameType,
    request_n: u32,
    complete_on_last: bool,
) -> Result<Fragmenter> {
    if !matches!(
        frame_type,
        FrameType::RequestResponse
            | FrameType::RequestFnf
            | FrameType::RequestStream
            | FrameType::RequestChannel
            | FrameType::Payload
    ) {
        return Err(RSocketError::MalformedFrame(format!(
            "{} frames cannot be fragmented",
            frame_type
        )));
    }
    if max_frame_size != 0 && max_frame_size < MIN_FRAGMENT_SIZE {
        return Err(RSocketError::FragmentSizeTooSmall(max_frame_size));
    }

    Ok(Fragmenter::start(
        stream_id,
        payload,
        max_frame_size,
        frame_type,
        request_n,
        complete_on_last,
    ))
}

/// Lazy iterator over the frames of a fragmented payload.
///
/// Always yields at least one frame. Metadata and data are zero-copy slices
/// of the original payload.
#[derive(Debug)]
pub struct Fragmenter {
    stream_id: u32,
    frame_type: FrameType,
    request_n: u32,
    complete_on_last: bool,
    max_frame_size: usize,
    metadata: Option<Bytes>,
    metadata_pos: usize,
    metadata_flushed: bool,
    data: Bytes,
    data_pos: usize,
    first: bool,
    done: bool,
}

impl Fragmenter {
    fn start(
        stream_id: u32,
        payload: Payload,
        max_frame_size: usize,
        frame_type: FrameType,
        request_n: u32,
        complete_on_last: bool,
    ) -> Self {
        let (data, metadata) = payload.into_parts();
        Self {
            stream_id,
            frame_type,
            request_n,
            complete_on_last,
            max_frame_size,
            metadata,
            metadata_pos: 0,
            metadata_flushed: false,
            data,
            data_pos: 0,
            first: true,
            done: false,
        }
    }

    /// Fragment a value into PAYLOAD frames. A nonzero limit below
    /// [`MIN_FRAGMENT_SIZE`] is raised to it, so this cannot fail.
    pub fn payload(
        stream_id: u32,
        payload: Payload,
        max_frame_size: usize,
        complete_on_last: bool,
    ) -> Self {
        let max_frame_size = match max_frame_size {
            0 => 0,
            n => n.max(MIN_FRAGMENT_SIZE),
        };
        Self::start(
            stream_id,
            payload,
            max_frame_size,
            FrameType::Payload,
            0,
            complete_on_last,
        )
    }

    /// Type of the head frame.
    pub fn frame_type(&self) -> FrameType {
        self.frame_type
    }

    fn metadata_done(&self) -> bool {
        match &self.metadata {
            None => true,
            Some(metadata) => self.metadata_flushed && self.metadata_pos >= metadata.len(),
        }
    }

    fn take_metadata(&mut self, budget: &mut usize) -> Option<Bytes> {
        let metadata = self.metadata.as_ref()?;
        if self.metadata_flushed && self.metadata_pos >= metadata.len() {
            return None;
        }
        let take = if self.max_frame_size == 0 {
            metadata.len() - self.metadata_pos
        } else {
            *budget = budget.saturating_sub(METADATA_LENGTH_OVERHEAD);
            (*budget).min(metadata.len() - self.metadata_pos)
        };
        let slice = metadata.slice(self.metadata_pos..self.metadata_pos + take);
        self.metadata_pos += take;
        self.metadata_flushed = true;
        *budget -= take.min(*budget);
        Some(slice)
    }

    fn take_data(&mut self, budget: usize) -> Bytes {
        let remaining = self.data.len() - self.data_pos;
        let take = if self.max_frame_size == 0 {
            remaining
        } else {
            budget.min(remaining)
        };
        let slice = self.data.slice(self.data_pos..self.data_pos + take);
        self.data_pos += take;
        slice
    }

    fn build(
        &self,
        frame_type: FrameType,
        frame_flags: u16,
        metadata: Option<Bytes>,
        data: Bytes,
    ) -> Frame {
        let stream_id = self.stream_id;
        let flags = frame_flags;
        match frame_type {
            FrameType::RequestResponse => Frame::RequestResponse {
                stream_id,
                flags,
                metadata,
                data,
            },
            FrameType::RequestFnf => Frame::RequestFnf {
                stream_id,
                flags,
                metadata,
                data,
            },
            FrameType::RequestStream => Frame::RequestStream {
                stream_id,
                flags,
                initial_request_n: self.request_n,
                metadata,
                data,
            },
            FrameType::RequestChannel => Frame::RequestChannel {
                stream_id,
                flags,
                initial_request_n: self.request_n,
                metadata,
                data,
            },
            _ => Frame::Payload {
                stream_id,
                flags,
                metadata,
                data,
            },
        }
    }
}

impl Iterator for Fragmenter {
    type Item = Frame;

    fn next(&mut self) -> Option<Frame> {
        if self.done {
            return None;
        }

        let frame_type = if self.first {
            self.frame_type
        } else {
            FrameType::Payload
        };

        let mut budget = self.max_frame_size;
        if self.first && reserves_request_n(self.frame_type) {
            budget = budget.saturating_sub(REQUEST_N_FRAGMENT_OVERHEAD);
        }

        let metadata = self.take_metadata(&mut budget);
        let data = if budget > 0 || self.max_frame_size == 0 {
            self.take_data(budget)
        } else {
            Bytes::new()
        };

        let last = self.metadata_done() && self.data_pos >= self.data.len();

        let mut frame_flags = 0;
        if frame_type == FrameType::Payload {
            frame_flags |= flags::NEXT;
        }
        if !last {
            frame_flags |= flags::FOLLOWS;
        } else if self.complete_on_last && frame_type.can_complete() {
            frame_flags |= flags::COMPLETE;
        }

        self.first = false;
        self.done = last;
        Some(self.build(frame_type, frame_flags, metadata, data))
    }
}

impl std::iter::FusedIterator for Fragmenter {}

#[cfg(test)]
mod tests {
    use super::*;

    const HELLO: &str = "hello worldhello world";

    fn collect(
        payload: Payload,
        frame_type: FrameType,
        request_n: u32,
        complete: bool,
    ) -> Vec<Frame> {
        fragment_with_request_n(1, payload, 11, frame_type, request_n, complete)
            .unwrap()
            .collect()
    }

    fn md(frame: &Frame) -> Option<&[u8]> {
        frame.metadata().map(|m| &m[..])
    }

    fn data(frame: &Frame) -> &[u8] {
        &frame.data().unwrap()[..]
    }

    #[test]
    fn test_is_fragmentable() {
        let payload = Payload::from_data("hello world").with_metadata("hello world");
        assert!(!is_fragmentable(&payload, 0, FrameType::RequestResponse));
        assert!(!is_fragmentable(
            &Payload::default(),
            1000,
            FrameType::RequestFnf
        ));
        assert!(is_fragmentable(&payload, 10, FrameType::RequestChannel));
        assert!(!is_fragmentable(&payload, 28, FrameType::RequestChannel));
        assert!(is_fragmentable(&payload, 27, FrameType::RequestChannel));
    }

    #[test]
    fn test_request_response_data_only() {
        let frames = collect(Payload::from_data(HELLO), FrameType::RequestResponse, 0, false);
        assert_eq!(frames.len(), 2);

        assert_eq!(frames[0].frame_type(), FrameType::RequestResponse);
        assert_eq!(frames[0].flags(), flags::FOLLOWS);
        assert_eq!(data(&frames[0]), b"hello world");

        assert_eq!(frames[1].frame_type(), FrameType::Payload);
        assert_eq!(frames[1].flags(), flags::NEXT);
        assert_eq!(data(&frames[1]), b"hello world");
    }

    #[test]
    fn test_payload_data_only() {
        let frames = collect(Payload::from_data(HELLO), FrameType::Payload, 0, false);
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::NEXT);
        assert_eq!(frames[1].flags(), flags::NEXT);

        let frames = collect(Payload::from_data(HELLO), FrameType::Payload, 0, true);
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::NEXT);
        assert_eq!(frames[1].flags(), flags::NEXT | flags::COMPLETE);
        assert!(frames[1].is_complete());
    }

    #[test]
    fn test_payload_fragmenter_raises_tiny_limit() {
        let fragments = Fragmenter::payload(3, Payload::from_data("abcdefgh"), 1, true);
        assert_eq!(fragments.frame_type(), FrameType::Payload);
        let frames: Vec<Frame> = fragments.collect();
        assert_eq!(frames.len(), 2);
        assert_eq!(data(&frames[0]), b"abcd");
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::NEXT);
        assert_eq!(data(&frames[1]), b"efgh");
        assert!(frames[1].is_complete());

        let whole: Vec<Frame> =
            Fragmenter::payload(3, Payload::from_data("abcdefgh"), 0, false).collect();
        assert_eq!(whole.len(), 1);
        assert_eq!(whole[0].stream_id(), 3);
    }

    #[test]
    fn test_payload_metadata_only() {
        let frames = collect(
            Payload::new(Bytes::new(), Some(Bytes::from_static(HELLO.as_bytes()))),
            FrameType::Payload,
            0,
            true,
        );
        assert_eq!(frames.len(), 3);

        assert_eq!(md(&frames[0]), Some(&b"hello wo"[..]));
        assert_eq!(
            frames[0].flags(),
            flags::FOLLOWS | flags::NEXT | flags::METADATA
        );
        assert_eq!(md(&frames[1]), Some(&b"rldhello"[..]));
        assert_eq!(
            frames[1].flags(),
            flags::FOLLOWS | flags::NEXT | flags::METADATA
        );
        assert_eq!(md(&frames[2]), Some(&b" world"[..]));
        assert_eq!(
            frames[2].flags(),
            flags::NEXT | flags::COMPLETE | flags::METADATA
        );
        assert!(frames.iter().all(|f| data(f).is_empty()));
    }

    #[test]
    fn test_payload_metadata_uneven_tail() {
        let frames = collect(
            Payload::new(Bytes::new(), Some(Bytes::from("hello worldhello world12"))),
            FrameType::Payload,
            0,
            true,
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(md(&frames[2]), Some(&b" world12"[..]));
    }

    #[test]
    fn test_request_response_metadata_and_data() {
        let frames = collect(
            Payload::from_data(HELLO).with_metadata("world hello"),
            FrameType::RequestResponse,
            0,
            false,
        );
        assert_eq!(frames.len(), 4);

        assert_eq!(frames[0].frame_type(), FrameType::RequestResponse);
        assert_eq!(md(&frames[0]), Some(&b"world he"[..]));
        assert!(data(&frames[0]).is_empty());
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::METADATA);

        assert_eq!(md(&frames[1]), Some(&b"llo"[..]));
        assert_eq!(data(&frames[1]), b"hello");
        assert_eq!(
            frames[1].flags(),
            flags::NEXT | flags::FOLLOWS | flags::METADATA
        );

        assert_eq!(md(&frames[2]), None);
        assert_eq!(data(&frames[2]), b" worldhello");
        assert_eq!(frames[2].flags(), flags::NEXT | flags::FOLLOWS);

        assert_eq!(md(&frames[3]), None);
        assert_eq!(data(&frames[3]), b" world");
        assert_eq!(frames[3].flags(), flags::NEXT);
    }

    #[test]
    fn test_request_response_empty_metadata() {
        let frames = collect(
            Payload::new(Bytes::from(HELLO), Some(Bytes::new())),
            FrameType::RequestResponse,
            0,
            false,
        );
        assert_eq!(frames.len(), 3);

        assert_eq!(md(&frames[0]), Some(&b""[..]));
        assert_eq!(data(&frames[0]), b"hello wo");
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::METADATA);

        assert_eq!(md(&frames[1]), None);
        assert_eq!(data(&frames[1]), b"rld hello w");
        assert_eq!(md(&frames[2]), None);
        assert_eq!(data(&frames[2]), b"orld");
        assert_eq!(frames[2].flags(), flags::NEXT);
    }

    #[test]
    fn test_request_stream_metadata_and_data() {
        let frames = collect(
            Payload::from_data(HELLO).with_metadata("world hello"),
            FrameType::RequestStream,
            1,
            false,
        );
        assert_eq!(frames.len(), 4);

        assert_eq!(frames[0].frame_type(), FrameType::RequestStream);
        assert_eq!(frames[0].request_n_value(), Some(1));
        assert_eq!(md(&frames[0]), Some(&b"world"[..]));
        assert!(data(&frames[0]).is_empty());
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::METADATA);

        assert_eq!(frames[1].frame_type(), FrameType::Payload);
        assert_eq!(md(&frames[1]), Some(&b" hello"[..]));
        assert_eq!(data(&frames[1]), b"he");

        assert_eq!(md(&frames[2]), None);
        assert_eq!(data(&frames[2]), b"llo worldhe");

        assert_eq!(data(&frames[3]), b"llo world");
        assert_eq!(frames[3].flags(), flags::NEXT);
    }

    #[test]
    fn test_request_stream_empty_metadata() {
        let frames = collect(
            Payload::new(Bytes::from(HELLO), Some(Bytes::new())),
            FrameType::RequestStream,
            1,
            false,
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(md(&frames[0]), Some(&b""[..]));
        assert_eq!(data(&frames[0]), b"hello");
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::METADATA);
        assert_eq!(data(&frames[1]), b" worldhello");
        assert_eq!(data(&frames[2]), b" world");
    }

    #[test]
    fn test_request_channel_complete_on_last() {
        let frames = collect(
            Payload::new(Bytes::from(HELLO), Some(Bytes::new())),
            FrameType::RequestChannel,
            1,
            true,
        );
        assert_eq!(frames.len(), 3);
        assert_eq!(frames[0].frame_type(), FrameType::RequestChannel);
        assert_eq!(data(&frames[0]), b"hello");
        assert_eq!(data(&frames[2]), b" world");
        assert_eq!(frames[2].flags(), flags::NEXT | flags::COMPLETE);
    }

    #[test]
    fn test_request_channel_metadata_only() {
        let frames = collect(
            Payload::new(Bytes::new(), Some(Bytes::from(HELLO))),
            FrameType::RequestChannel,
            1,
            true,
        );
        assert_eq!(frames.len(), 4);

        assert_eq!(md(&frames[0]), Some(&b"hello"[..]));
        assert_eq!(frames[0].flags(), flags::FOLLOWS | flags::METADATA);
        assert_eq!(md(&frames[1]), Some(&b" worldhe"[..]));
        assert_eq!(
            frames[1].flags(),
            flags::NEXT | flags::FOLLOWS | flags::METADATA
        );
        assert_eq!(md(&frames[2]), Some(&b"llo worl"[..]));
        assert_eq!(md(&frames[3]), Some(&b"d"[..]));
        assert_eq!(
            frames[3].flags(),
            flags::NEXT | flags::COMPLETE | flags::METADATA
        );
    }

    #[test]
    fn test_single_frame_when_it_fits() {
        let frames: Vec<_> = fragment(
            3,
            Payload::from_data("data").with_metadata("meta"),
            1024,
            FrameType::RequestChannel,
            true,
        )
        .unwrap()
        .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].frame_type(), FrameType::RequestChannel);
        assert_eq!(frames[0].flags(), flags::COMPLETE | flags::METADATA);
        assert!(!frames[0].follows());
    }

    #[test]
    fn test_unlimited_and_empty() {
        let frames: Vec<_> = fragment(
            1,
            Payload::from_data(vec![7u8; 100_000]),
            0,
            FrameType::RequestFnf,
            false,
        )
        .unwrap()
        .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(data(&frames[0]).len(), 100_000);

        let frames: Vec<_> = fragment(1, Payload::default(), 16, FrameType::Payload, true)
            .unwrap()
            .collect();
        assert_eq!(frames.len(), 1);
        assert_eq!(frames[0].flags(), flags::NEXT | flags::COMPLETE);
    }

    #[test]
    fn test_rejected_arguments() {
        assert!(matches!(
            fragment(1, Payload::from_data("x"), 3, FrameType::Payload, false),
            Err(RSocketError::FragmentSizeTooSmall(3))
        ));
        assert!(fragment(1, Payload::from_data("x"), 64, FrameType::Keepalive, false).is_err());
    }

    #[test]
    fn test_frames_respect_limit() {
        let payload = Payload::from_data(vec![1u8; 300]).with_metadata(vec![2u8; 200]);
        for frame in fragment_with_request_n(9, payload, 17, FrameType::RequestStream, 5, false)
            .unwrap()
        {
            let mut size = data(&frame).len();
            if let Some(m) = frame.metadata() {
                size += m.len() + METADATA_LENGTH_OVERHEAD;
            }
            if frame.frame_type() == FrameType::RequestStream {
                size += REQUEST_N_FRAGMENT_OVERHEAD;
            }
            assert!(size <= 17, "fragment of {} bytes", size);
        }
    }
}
