//! Outbound side: stream ID allocation and the ordered frame queue.

use std::collections::VecDeque;

use crate::error::{RSocketError, Result};
use crate::fragment::Fragmenter;
use crate::protocol::{Frame, FrameType, MAX_STREAM_ID};

/// Which end of the connection this is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    /// Sends SETUP; allocates odd stream IDs.
    Client,
    /// Receives SETUP; allocates even stream IDs.
    Server,
}

impl Side {
    /// First stream ID this side allocates.
    pub fn first_stream_id(self) -> u32 {
        match self {
            Side::Client => 1,
            Side::Server => 2,
        }
    }

    /// Whether `stream_id` has this side's parity.
    pub fn owns(self, stream_id: u32) -> bool {
        stream_id != 0 && stream_id % 2 == self.first_stream_id() % 2
    }

    pub fn peer(self) -> Side {
        match self {
            Side::Client => Side::Server,
            Side::Server => Side::Client,
        }
    }
}

/// Monotonic stream ID allocator of one side.
///
/// IDs advance by 2 from the side's first ID and are never handed out
/// twice. Allocation fails once the 31-bit range is used up.
#[derive(Debug)]
pub struct StreamIdAllocator {
    next: u64,
}

impl StreamIdAllocator {
    pub fn new(side: Side) -> Self {
        Self {
            next: u64::from(side.first_stream_id()),
        }
    }

    /// Allocate the next ID, skipping any for which `in_use` returns true.
    pub fn next_id(&mut self, in_use: impl Fn(u32) -> bool) -> Result<u32> {
        loop {
            if self.next > u64::from(MAX_STREAM_ID) {
                return Err(RSocketError::StreamIdExhausted);
            }
            let id = self.next as u32;
            self.next += 2;
            if !in_use(id) {
                return Ok(id);
            }
        }
    }

    /// ID the next allocation would try, if any remain.
    pub fn peek(&self) -> Option<u32> {
        u32::try_from(self.next)
            .ok()
            .filter(|id| *id <= MAX_STREAM_ID)
    }
}

#[derive(Debug)]
enum Pending {
    Frame(Frame),
    Fragments(Fragmenter),
}

#[derive(Debug)]
struct QueueEntry {
    stream_id: u32,
    pending: Pending,
}

/// FIFO of frames waiting for the transport.
///
/// A fragmented payload stays at its queue position until its last
/// fragment has been pulled, so frames queued later for the same stream
/// never overtake it.
#[derive(Debug, Default)]
pub struct OutboundQueue {
    entries: VecDeque<QueueEntry>,
}

impl OutboundQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Queue a single frame.
    pub fn push_frame(&mut self, frame: Frame) {
        self.entries.push_back(QueueEntry {
            stream_id: frame.stream_id(),
            pending: Pending::Frame(frame),
        });
    }

    /// Queue a fragment sequence; fragments are produced lazily on pop.
    pub fn push_fragments(&mut self, stream_id: u32, fragments: Fragmenter) {
        self.entries.push_back(QueueEntry {
            stream_id,
            pending: Pending::Fragments(fragments),
        });
    }

    /// Take the next frame to write.
    pub fn pop(&mut self) -> Option<Frame> {
        loop {
            let entry = self.entries.front_mut()?;
            match &mut entry.pending {
                Pending::Frame(_) => {
                    let entry = self.entries.pop_front()?;
                    if let Pending::Frame(frame) = entry.pending {
                        return Some(frame);
                    }
                }
                Pending::Fragments(fragments) => {
                    let next = fragments.next();
                    if next.as_ref().map_or(true, |f| !f.follows()) {
                        self.entries.pop_front();
                    }
                    if next.is_some() {
                        return next;
                    }
                }
            }
        }
    }

    /// Drop everything still queued for a stream. Returns how many queue
    /// entries were removed.
    pub fn discard_stream(&mut self, stream_id: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| entry.stream_id != stream_id);
        before - self.entries.len()
    }

    /// Drop the PAYLOAD frames still queued for a stream, keeping its
    /// request and credit frames. Returns how many queue entries were
    /// removed.
    pub fn discard_values(&mut self, stream_id: u32) -> usize {
        let before = self.entries.len();
        self.entries.retain(|entry| {
            let frame_type = match &entry.pending {
                Pending::Frame(frame) => frame.frame_type(),
                Pending::Fragments(fragments) => fragments.frame_type(),
            };
            entry.stream_id != stream_id || frame_type != FrameType::Payload
        });
        before - self.entries.len()
    }

    /// Whether anything is queued for a stream.
    pub fn has_stream(&self, stream_id: u32) -> bool {
        self.entries.iter().any(|entry| entry.stream_id == stream_id)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn clear(&mut self) {
        self.entries.clear();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fragment::{fragment, Fragmenter};
    use crate::protocol::Payload;

    #[test]
    fn test_allocator_parity() {
        let mut client = StreamIdAllocator::new(Side::Client);
        assert_eq!(client.next_id(|_| false).unwrap(), 1);
        assert_eq!(client.next_id(|_| false).unwrap(), 3);

        let mut server = StreamIdAllocator::new(Side::Server);
        assert_eq!(server.next_id(|_| false).unwrap(), 2);
        assert_eq!(server.next_id(|id| id == 4).unwrap(), 6);
    }

    #[test]
    fn test_allocator_exhaustion() {
        let mut allocator = StreamIdAllocator {
            next: u64::from(MAX_STREAM_ID),
        };
        assert_eq!(allocator.next_id(|_| false).unwrap(), MAX_STREAM_ID);
        assert!(allocator.peek().is_none());
        assert!(matches!(
            allocator.next_id(|_| false),
            Err(RSocketError::StreamIdExhausted)
        ));
    }

    #[test]
    fn test_side_owns() {
        assert!(Side::Client.owns(1));
        assert!(!Side::Client.owns(2));
        assert!(Side::Server.owns(2));
        assert!(!Side::Server.owns(0));
        assert_eq!(Side::Client.peer(), Side::Server);
    }

    #[test]
    fn test_queue_keeps_fragment_order() {
        let mut queue = OutboundQueue::new();
        let fragments = fragment(
            1,
            Payload::from_data("hello worldhello world"),
            11,
            FrameType::RequestResponse,
            false,
        )
        .unwrap();
        queue.push_fragments(1, fragments);
        queue.push_frame(Frame::cancel(1));
        queue.push_frame(Frame::request_n(3, 1));

        let types: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|f| (f.stream_id(), f.frame_type()))
            .collect();
        assert_eq!(
            types,
            vec![
                (1, FrameType::RequestResponse),
                (1, FrameType::Payload),
                (1, FrameType::Cancel),
                (3, FrameType::RequestN),
            ]
        );
        assert!(queue.is_empty());
    }

    #[test]
    fn test_discard_stream() {
        let mut queue = OutboundQueue::new();
        queue.push_frame(Frame::request_n(1, 1));
        queue.push_frame(Frame::request_n(3, 1));
        queue.push_frame(Frame::request_n(1, 2));
        assert_eq!(queue.discard_stream(1), 2);
        assert!(!queue.has_stream(1));
        assert_eq!(queue.pop().map(|f| f.stream_id()), Some(3));
    }

    #[test]
    fn test_discard_values_keeps_credit_frames() {
        let mut queue = OutboundQueue::new();
        queue.push_frame(Frame::request_n(1, 4));
        queue.push_fragments(1, Fragmenter::payload(1, Payload::from_data("v"), 0, false));
        queue.push_frame(Frame::complete(1));
        queue.push_frame(Frame::complete(3));
        assert_eq!(queue.discard_values(1), 2);

        let left: Vec<_> = std::iter::from_fn(|| queue.pop())
            .map(|f| (f.stream_id(), f.frame_type()))
            .collect();
        assert_eq!(
            left,
            vec![(1, FrameType::RequestN), (3, FrameType::Payload)]
        );
    }
}
