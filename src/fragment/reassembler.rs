//! Per-stream reassembly of FOLLOWS chains.

use std::collections::HashMap;

use bytes::{Bytes, BytesMut};
use tracing::trace;

use crate::error::{RSocketError, Result};
use crate::protocol::{flags, Frame, FrameType};

/// Default cap on the size of a reassembled payload (16 MiB).
pub const DEFAULT_MAX_REASSEMBLY_SIZE: usize = 16 * 1024 * 1024;

/// A chain that has started but not terminated yet.
#[derive(Debug)]
struct Partial {
    /// First fragment with its payload taken out.
    head: Frame,
    metadata: Option<BytesMut>,
    data: BytesMut,
}

impl Partial {
    fn size(&self) -> usize {
        self.data.len() + self.metadata.as_ref().map_or(0, |m| m.len())
    }

    fn append(&mut self, frame: &Frame) {
        if let Some(metadata) = frame.metadata() {
            self.metadata
                .get_or_insert_with(BytesMut::new)
                .extend_from_slice(metadata);
        }
        if let Some(data) = frame.data() {
            self.data.extend_from_slice(data);
        }
    }
}

/// Collects fragments per stream and yields whole frames.
///
/// Frames without a payload section (REQUEST_N, CANCEL, ERROR and all
/// connection-level frames) pass through untouched, so callers can push
/// every stream frame through here.
#[derive(Debug)]
pub struct Reassembler {
    partials: HashMap<u32, Partial>,
    max_size: usize,
}

impl Default for Reassembler {
    fn default() -> Self {
        Self::new()
    }
}

impl Reassembler {
    /// Reassembler with [`DEFAULT_MAX_REASSEMBLY_SIZE`].
    pub fn new() -> Self {
        Self::with_max_size(DEFAULT_MAX_REASSEMBLY_SIZE)
    }

    /// Reassembler refusing payloads larger than `max_size` bytes
    /// (metadata plus data).
    pub fn with_max_size(max_size: usize) -> Self {
        Self {
            partials: HashMap::new(),
            max_size,
        }
    }

    /// Feed one frame.
    ///
    /// Returns `Ok(Some(frame))` when a whole frame is available (either a
    /// frame that was never fragmented or the end of a chain) and `Ok(None)`
    /// while a chain is still open.
    pub fn push(&mut self, frame: Frame) -> Result<Option<Frame>> {
        let frame_type = frame.frame_type();
        if !frame_type.is_fragmentable() {
            return Ok(Some(frame));
        }
        let stream_id = frame.stream_id();

        let Some(partial) = self.partials.get_mut(&stream_id) else {
            if !frame.follows() {
                return Ok(Some(frame));
            }
            trace!(stream_id, %frame_type, "fragment chain started");
            let head_flags = frame.flags();
            let partial = Partial {
                metadata: frame.metadata().map(|m| BytesMut::from(&m[..])),
                data: frame
                    .data()
                    .map(|d| BytesMut::from(&d[..]))
                    .unwrap_or_default(),
                head: frame.with_payload_parts(head_flags, None, Bytes::new()),
            };
            self.check_size(partial.size())?;
            self.partials.insert(stream_id, partial);
            return Ok(None);
        };

        if frame_type != FrameType::Payload {
            self.partials.remove(&stream_id);
            return Err(RSocketError::UnexpectedFragment(stream_id));
        }

        partial.append(&frame);
        let size = partial.size();
        if size > self.max_size {
            self.partials.remove(&stream_id);
            return Err(RSocketError::PayloadTooLarge {
                size,
                max: self.max_size,
            });
        }
        if frame.follows() {
            return Ok(None);
        }

        let Some(partial) = self.partials.remove(&stream_id) else {
            return Ok(None);
        };
        trace!(stream_id, size, "fragment chain reassembled");
        Ok(Some(finish(partial, frame.flags())))
    }

    fn check_size(&self, size: usize) -> Result<()> {
        if size > self.max_size {
            return Err(RSocketError::PayloadTooLarge {
                size,
                max: self.max_size,
            });
        }
        Ok(())
    }

    /// Drop any partial chain of a stream (after CANCEL or ERROR).
    pub fn release(&mut self, stream_id: u32) -> bool {
        self.partials.remove(&stream_id).is_some()
    }

    /// Check whether a chain is open on a stream.
    pub fn is_reassembling(&self, stream_id: u32) -> bool {
        self.partials.contains_key(&stream_id)
    }

    /// Number of open chains.
    pub fn len(&self) -> usize {
        self.partials.len()
    }

    pub fn is_empty(&self) -> bool {
        self.partials.is_empty()
    }

    /// Drop every open chain.
    pub fn clear(&mut self) {
        self.partials.clear();
    }
}

fn finish(partial: Partial, last_flags: u16) -> Frame {
    let head_flags = partial.head.flags();
    let mut frame_flags = head_flags & !(flags::FOLLOWS | flags::COMPLETE);
    if partial.head.frame_type().can_complete() && last_flags & flags::COMPLETE != 0 {
        frame_flags |= flags::COMPLETE;
    }
    partial.head.with_payload_parts(
        frame_flags,
        partial.metadata.map(BytesMut::freeze),
        partial.data.freeze(),
    )
}
