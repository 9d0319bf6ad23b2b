//! Connection module - the sans-IO protocol engine of one connection.
//!
//! [`Connection`] owns stream ID allocation, the routing table of live
//! streams, reassembly state and the outbound frame queue. It performs no
//! I/O: feed it length-delimited frames with [`Connection::receive`], pull
//! encoded frames with [`Connection::poll_transmit`] and application
//! events with [`Connection::poll_event`].
//!
//! ```
//! use rsocket_wire::connection::{Connection, ConnectionConfig, Event, SetupConfig};
//! use rsocket_wire::protocol::Payload;
//!
//! let mut client = Connection::new(ConnectionConfig::client());
//! let mut server = Connection::new(ConnectionConfig::server());
//!
//! client.connect(SetupConfig::default()).unwrap();
//! let id = client.request_response(Payload::from_data("ping")).unwrap();
//! while let Some(bytes) = client.poll_transmit() {
//!     server.receive(bytes).unwrap();
//! }
//!
//! assert!(matches!(server.poll_event(), Some(Event::Setup { .. })));
//! assert!(matches!(server.poll_event(), Some(Event::Request { stream_id, .. }) if stream_id == id));
//! ```

mod demultiplexer;
mod multiplexer;

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, error, trace};

use crate::error::{RSocketError, Result};
use crate::fragment::{
    fragment_with_request_n, Fragmenter, Reassembler, DEFAULT_MAX_REASSEMBLY_SIZE,
    MIN_FRAGMENT_SIZE,
};
use crate::metadata::WellKnownMimeType;
use crate::protocol::{
    check_request_n, ErrorCode, Frame, Payload, CONNECTION_STREAM_ID, HEADER_SIZE, MAX_STREAM_ID,
    MAX_U24, U24_SIZE,
};
use crate::stream::{InteractionKind, Outbound, Role, StreamMachine, StreamState};

pub use multiplexer::{OutboundQueue, Side, StreamIdAllocator};

use demultiplexer::RecentlyClosed;

/// Default number of locally terminated stream IDs remembered so that
/// frames still in flight for them are dropped instead of failing the
/// connection.
pub const DEFAULT_RECENTLY_CLOSED_CAPACITY: usize = 256;

/// Default keepalive interval announced in SETUP.
pub const DEFAULT_KEEPALIVE_INTERVAL: Duration = Duration::from_secs(20);

/// Default max lifetime announced in SETUP.
pub const DEFAULT_MAX_LIFETIME: Duration = Duration::from_secs(90);

/// Largest fragment size that still fits a 24-bit frame length.
const MAX_FRAGMENT_SIZE: usize = MAX_U24 - HEADER_SIZE - 2 * U24_SIZE;

/// Configuration for a [`Connection`].
#[derive(Debug, Clone)]
pub struct ConnectionConfig {
    /// Which end of the connection this is.
    pub side: Side,
    /// Fragment payloads whose frames would exceed this many body bytes.
    /// 0 disables fragmentation.
    pub max_frame_size: usize,
    /// Largest payload accepted through reassembly.
    pub max_reassembly_size: usize,
    /// Locally terminated stream IDs remembered for dropping late frames.
    pub recently_closed_capacity: usize,
}

impl Default for ConnectionConfig {
    fn default() -> Self {
        Self {
            side: Side::Client,
            max_frame_size: 0,
            max_reassembly_size: DEFAULT_MAX_REASSEMBLY_SIZE,
            recently_closed_capacity: DEFAULT_RECENTLY_CLOSED_CAPACITY,
        }
    }
}

impl ConnectionConfig {
    pub fn client() -> Self {
        Self::default()
    }

    pub fn server() -> Self {
        Self {
            side: Side::Server,
            ..Self::default()
        }
    }

    /// Set the fragmentation threshold.
    pub fn with_max_frame_size(mut self, max_frame_size: usize) -> Self {
        self.max_frame_size = max_frame_size;
        self
    }
}

/// Parameters of the SETUP frame a client sends.
#[derive(Debug, Clone)]
pub struct SetupConfig {
    pub keepalive_interval: Duration,
    pub max_lifetime: Duration,
    pub metadata_mime_type: String,
    pub data_mime_type: String,
    /// Optional setup payload.
    pub payload: Payload,
}

impl Default for SetupConfig {
    fn default() -> Self {
        Self {
            keepalive_interval: DEFAULT_KEEPALIVE_INTERVAL,
            max_lifetime: DEFAULT_MAX_LIFETIME,
            metadata_mime_type: WellKnownMimeType::ApplicationOctetStream.as_str().to_string(),
            data_mime_type: WellKnownMimeType::ApplicationOctetStream.as_str().to_string(),
            payload: Payload::default(),
        }
    }
}

fn duration_millis(duration: Duration) -> u32 {
    u32::try_from(duration.as_millis())
        .unwrap_or(MAX_STREAM_ID)
        .clamp(1, MAX_STREAM_ID)
}

impl SetupConfig {
    /// Build the SETUP frame.
    pub fn to_frame(&self) -> Frame {
        Frame::setup(
            duration_millis(self.keepalive_interval),
            duration_millis(self.max_lifetime),
            self.metadata_mime_type.clone(),
            self.data_mime_type.clone(),
            self.payload.clone(),
        )
    }
}

/// Lifecycle of the connection.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectionState {
    /// SETUP not yet sent (client) or received (server).
    AwaitingSetup,
    Open,
    Closed,
}

/// Something the application must act upon.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Event {
    /// The peer's SETUP was accepted.
    Setup {
        keepalive_interval: Duration,
        max_lifetime: Duration,
        metadata_mime_type: String,
        data_mime_type: String,
        payload: Payload,
    },
    /// The peer opened a stream this side responds to.
    Request {
        stream_id: u32,
        kind: InteractionKind,
        initial_request_n: u32,
        payload: Payload,
        /// REQUEST_CHANNEL sent with COMPLETE.
        complete: bool,
    },
    Next {
        stream_id: u32,
        payload: Payload,
        complete: bool,
    },
    Complete {
        stream_id: u32,
    },
    /// The peer granted more credit.
    RequestN {
        stream_id: u32,
        n: u32,
    },
    /// The peer cancelled a stream this side responds to.
    Cancelled {
        stream_id: u32,
    },
    /// The peer terminated a stream with ERROR, or this side rejected a
    /// frame that was illegal for the stream.
    StreamError {
        stream_id: u32,
        code: ErrorCode,
        message: String,
    },
    MetadataPush {
        metadata: Bytes,
    },
    Lease {
        ttl: Duration,
        number_of_requests: u32,
        metadata: Option<Bytes>,
    },
    /// The connection is closed; every live stream has been terminated.
    Closed {
        code: ErrorCode,
        message: String,
    },
}

#[derive(Debug)]
struct StreamEntry {
    machine: StreamMachine,
    /// At least one frame of this stream has been handed to the transport.
    wire_started: bool,
    /// COMPLETE flag of the REQUEST_CHANNEL this side sent.
    request_complete: bool,
}

/// Protocol state of one connection.
#[derive(Debug)]
pub struct Connection {
    config: ConnectionConfig,
    state: ConnectionState,
    allocator: StreamIdAllocator,
    streams: HashMap<u32, StreamEntry>,
    reassembler: Reassembler,
    outbound: OutboundQueue,
    events: VecDeque<Event>,
    recently_closed: RecentlyClosed,
    last_peer_stream_id: u32,
}

impl Connection {
    /// Create a connection. Clients must call [`connect`](Self::connect)
    /// before opening streams; servers wait for the peer's SETUP.
    pub fn new(mut config: ConnectionConfig) -> Self {
        if config.max_frame_size != 0 {
            config.max_frame_size = config
                .max_frame_size
                .clamp(MIN_FRAGMENT_SIZE, MAX_FRAGMENT_SIZE);
        }
        Self {
            allocator: StreamIdAllocator::new(config.side),
            reassembler: Reassembler::with_max_size(config.max_reassembly_size),
            recently_closed: RecentlyClosed::new(config.recently_closed_capacity),
            state: ConnectionState::AwaitingSetup,
            streams: HashMap::new(),
            outbound: OutboundQueue::new(),
            events: VecDeque::new(),
            last_peer_stream_id: 0,
            config,
        }
    }

    #[inline]
    pub fn side(&self) -> Side {
        self.config.side
    }

    #[inline]
    pub fn state(&self) -> ConnectionState {
        self.state
    }

    #[inline]
    pub fn is_closed(&self) -> bool {
        self.state == ConnectionState::Closed
    }

    pub fn config(&self) -> &ConnectionConfig {
        &self.config
    }

    /// State of a live stream.
    pub fn stream_state(&self, stream_id: u32) -> Option<StreamState> {
        self.streams.get(&stream_id).map(|e| e.machine.state())
    }

    /// Number of live streams.
    pub fn live_streams(&self) -> usize {
        self.streams.len()
    }

    /// Whether frames are waiting in the outbound queue.
    pub fn has_pending_transmit(&self) -> bool {
        !self.outbound.is_empty()
    }

    /// Send SETUP (client only).
    pub fn connect(&mut self, setup: SetupConfig) -> Result<()> {
        if self.config.side != Side::Client || self.state != ConnectionState::AwaitingSetup {
            return Err(RSocketError::InvalidStreamState {
                stream_id: CONNECTION_STREAM_ID,
                reason: "SETUP can only be sent once, by the client".to_string(),
            });
        }
        let frame = setup.to_frame();
        frame.validate()?;
        self.outbound.push_frame(frame);
        self.state = ConnectionState::Open;
        debug!("SETUP queued");
        Ok(())
    }

    fn ensure_open(&self) -> Result<()> {
        match self.state {
            ConnectionState::Open => Ok(()),
            ConnectionState::Closed => Err(RSocketError::ConnectionClosed),
            ConnectionState::AwaitingSetup => Err(RSocketError::InvalidStreamState {
                stream_id: CONNECTION_STREAM_ID,
                reason: "connection is not set up".to_string(),
            }),
        }
    }

    fn check_payload(&self, payload: &Payload) -> Result<()> {
        if let Some(metadata) = &payload.metadata {
            if metadata.len() > MAX_U24 {
                return Err(RSocketError::LengthOverflow {
                    what: "metadata",
                    len: metadata.len(),
                    max: MAX_U24,
                });
            }
        }
        if self.config.max_frame_size == 0 {
            // request type fields plus metadata length
            let size = HEADER_SIZE + 4 + U24_SIZE + payload.len();
            if size > MAX_U24 {
                return Err(RSocketError::PayloadTooLarge {
                    size,
                    max: MAX_U24,
                });
            }
        }
        Ok(())
    }

    // ---- requester API ------------------------------------------------

    fn open_stream(
        &mut self,
        kind: InteractionKind,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
    ) -> Result<u32> {
        self.ensure_open()?;
        self.check_payload(&payload)?;
        if matches!(
            kind,
            InteractionKind::RequestStream | InteractionKind::RequestChannel
        ) {
            check_request_n(initial_request_n)?;
        }
        let streams = &self.streams;
        let stream_id = self.allocator.next_id(|id| streams.contains_key(&id))?;
        let fragments = fragment_with_request_n(
            stream_id,
            payload,
            self.config.max_frame_size,
            kind.frame_type(),
            initial_request_n,
            complete,
        )?;
        self.outbound.push_fragments(stream_id, fragments);
        self.streams.insert(
            stream_id,
            StreamEntry {
                machine: StreamMachine::requester(stream_id, kind, initial_request_n),
                wire_started: false,
                request_complete: complete,
            },
        );
        debug!(stream_id, %kind, "stream opened");
        Ok(stream_id)
    }

    /// Send REQUEST_FNF. The stream is done once the request is written.
    pub fn request_fnf(&mut self, payload: Payload) -> Result<u32> {
        self.open_stream(InteractionKind::FireAndForget, payload, 0, false)
    }

    /// Send REQUEST_RESPONSE.
    pub fn request_response(&mut self, payload: Payload) -> Result<u32> {
        self.open_stream(InteractionKind::RequestResponse, payload, 0, false)
    }

    /// Send REQUEST_STREAM granting `initial_request_n` values.
    pub fn request_stream(&mut self, payload: Payload, initial_request_n: u32) -> Result<u32> {
        self.open_stream(
            InteractionKind::RequestStream,
            payload,
            initial_request_n,
            false,
        )
    }

    /// Send REQUEST_CHANNEL. `complete` closes this side immediately.
    pub fn request_channel(
        &mut self,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
    ) -> Result<u32> {
        self.open_stream(
            InteractionKind::RequestChannel,
            payload,
            initial_request_n,
            complete,
        )
    }

    /// Send METADATA_PUSH.
    pub fn metadata_push(&mut self, metadata: Bytes) -> Result<()> {
        self.ensure_open()?;
        let frame = Frame::metadata_push(metadata);
        frame.validate()?;
        self.outbound.push_frame(frame);
        Ok(())
    }

    /// Send a KEEPALIVE asking the peer to respond.
    pub fn keepalive(&mut self, data: Bytes) -> Result<()> {
        self.ensure_open()?;
        self.outbound.push_frame(Frame::keepalive(true, 0, data));
        Ok(())
    }

    // ---- per-stream API -----------------------------------------------

    fn entry_mut(&mut self, stream_id: u32) -> Result<&mut StreamEntry> {
        self.streams
            .get_mut(&stream_id)
            .ok_or_else(|| RSocketError::InvalidStreamState {
                stream_id,
                reason: "stream is not live".to_string(),
            })
    }

    /// Send a value on a stream. It is written once the peer has credit.
    pub fn send_next(&mut self, stream_id: u32, payload: Payload, complete: bool) -> Result<()> {
        self.ensure_open()?;
        self.check_payload(&payload)?;
        self.entry_mut(stream_id)?
            .machine
            .queue_next(payload, complete)?;
        self.flush_stream(stream_id);
        Ok(())
    }

    /// Complete this side of a stream.
    pub fn send_complete(&mut self, stream_id: u32) -> Result<()> {
        self.ensure_open()?;
        self.entry_mut(stream_id)?.machine.queue_complete()?;
        self.flush_stream(stream_id);
        Ok(())
    }

    /// Terminate a stream with ERROR.
    pub fn send_error(
        &mut self,
        stream_id: u32,
        code: ErrorCode,
        message: impl Into<String>,
    ) -> Result<()> {
        self.ensure_open()?;
        let entry = self.entry_mut(stream_id)?;
        entry.machine.send_error()?;
        let wire_started = entry.wire_started || entry.machine.role() == Role::Responder;
        self.outbound.discard_stream(stream_id);
        self.reassembler.release(stream_id);
        if wire_started {
            self.outbound.push_frame(Frame::error(stream_id, code, message));
        }
        self.remove_stream(stream_id, true);
        Ok(())
    }

    /// Send CANCEL. A requester cancels the whole stream. A channel
    /// responder cancels only the requester's direction and may keep
    /// sending until it completes.
    pub fn send_cancel(&mut self, stream_id: u32) -> Result<()> {
        self.ensure_open()?;
        let entry = self.entry_mut(stream_id)?;
        entry.machine.send_cancel()?;
        let requester = entry.machine.role() == Role::Requester;
        let wire_started = entry.wire_started || !requester;
        let terminal = entry.machine.is_terminal();
        let dropped = if requester {
            self.outbound.discard_stream(stream_id)
        } else {
            0
        };
        self.reassembler.release(stream_id);
        if wire_started {
            self.outbound.push_frame(Frame::cancel(stream_id));
        }
        debug!(stream_id, dropped, terminal, "stream cancelled");
        if terminal {
            self.remove_stream(stream_id, true);
        }
        Ok(())
    }

    /// Grant the peer `n` more values.
    pub fn send_request_n(&mut self, stream_id: u32, n: u32) -> Result<()> {
        self.ensure_open()?;
        self.entry_mut(stream_id)?.machine.send_request_n(n)?;
        self.outbound.push_frame(Frame::request_n(stream_id, n));
        Ok(())
    }

    /// Close the connection with CONNECTION_CLOSE.
    pub fn close(&mut self, message: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let message = message.into();
        if self.state == ConnectionState::Open {
            self.outbound.push_frame(Frame::error(
                CONNECTION_STREAM_ID,
                ErrorCode::CONNECTION_CLOSE,
                message.clone(),
            ));
        }
        self.shutdown(ErrorCode::CONNECTION_CLOSE, message);
    }

    /// Close with a connection ERROR of `code`, dropping everything still
    /// queued.
    pub fn abort(&mut self, code: ErrorCode, message: impl Into<String>) {
        if self.is_closed() {
            return;
        }
        let message = message.into();
        self.outbound.clear();
        if self.state == ConnectionState::Open {
            self.outbound
                .push_frame(Frame::error(CONNECTION_STREAM_ID, code, message.clone()));
        }
        self.shutdown(code, message);
    }

    /// The transport is gone. Closes without queueing anything.
    pub fn transport_closed(&mut self) {
        if self.is_closed() {
            return;
        }
        self.outbound.clear();
        self.shutdown(ErrorCode::CONNECTION_CLOSE, "transport closed".to_string());
    }

    // ---- output -------------------------------------------------------

    /// Next encoded frame for the transport, without length prefix.
    pub fn poll_transmit(&mut self) -> Option<Bytes> {
        let frame = self.outbound.pop()?;
        let stream_id = frame.stream_id();
        if let Some(entry) = self.streams.get_mut(&stream_id) {
            entry.wire_started = true;
            if entry.machine.state() == StreamState::Requested && !frame.follows() {
                entry.machine.activate(entry.request_complete);
                self.flush_stream(stream_id);
            }
        }
        trace!(
            stream_id,
            frame_type = %frame.frame_type(),
            flags = frame.flags(),
            "frame out"
        );
        Some(frame.encode())
    }

    /// Next application event.
    pub fn poll_event(&mut self) -> Option<Event> {
        self.events.pop_front()
    }

    /// Move every value the peer has credit for into the outbound queue.
    fn flush_stream(&mut self, stream_id: u32) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        while let Some(outbound) = entry.machine.pop_ready() {
            match outbound {
                Outbound::Next { payload, complete } => {
                    let fragments = Fragmenter::payload(
                        stream_id,
                        payload,
                        self.config.max_frame_size,
                        complete,
                    );
                    self.outbound.push_fragments(stream_id, fragments);
                }
                Outbound::Complete => self.outbound.push_frame(Frame::complete(stream_id)),
            }
        }
        if entry.machine.is_terminal() {
            self.remove_stream(stream_id, true);
        }
    }

    /// Drop a terminal stream from the routing table. Streams this side
    /// terminated are remembered so late peer frames are dropped.
    fn remove_stream(&mut self, stream_id: u32, local: bool) {
        if let Some(entry) = self.streams.remove(&stream_id) {
            debug!(
                stream_id,
                state = ?entry.machine.state(),
                local,
                "stream closed"
            );
            if local {
                self.recently_closed.insert(stream_id);
            }
        }
    }

    /// Terminate every stream and mark the connection closed.
    fn shutdown(&mut self, code: ErrorCode, message: String) {
        self.state = ConnectionState::Closed;
        self.streams.clear();
        self.reassembler.clear();
        debug!(%code, message = %message, "connection closed");
        self.events.push_back(Event::Closed { code, message });
    }

    /// Report a connection-fatal error to the peer and close.
    fn fail(&mut self, err: RSocketError) -> RSocketError {
        error!(error = %err, "connection error");
        let code = err.wire_code();
        let message = match &err {
            RSocketError::Connection { message, .. } => message.clone(),
            other => other.to_string(),
        };
        self.outbound.clear();
        self.outbound
            .push_frame(Frame::error(CONNECTION_STREAM_ID, code, message.clone()));
        self.shutdown(code, message);
        err
    }
}
