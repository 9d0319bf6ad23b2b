//! Inbound side: routing decoded frames to connection handling or to the
//! stream that owns them.

use std::collections::{HashSet, VecDeque};
use std::time::Duration;

use bytes::Bytes;
use tracing::{debug, trace, warn};

use super::{Connection, ConnectionState, Event, Side, StreamEntry};
use crate::error::{RSocketError, Result};
use crate::protocol::{check_request_n, flags, ErrorCode, Frame, Payload, MAJOR_VERSION};
use crate::stream::{Inbound, InteractionKind, Role, StreamMachine};

/// Bounded FIFO set of stream IDs this side terminated.
#[derive(Debug)]
pub(crate) struct RecentlyClosed {
    order: VecDeque<u32>,
    ids: HashSet<u32>,
    capacity: usize,
}

impl RecentlyClosed {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            order: VecDeque::with_capacity(capacity),
            ids: HashSet::with_capacity(capacity),
            capacity,
        }
    }

    pub(crate) fn insert(&mut self, stream_id: u32) {
        if self.capacity == 0 || !self.ids.insert(stream_id) {
            return;
        }
        self.order.push_back(stream_id);
        if self.order.len() > self.capacity {
            if let Some(oldest) = self.order.pop_front() {
                self.ids.remove(&oldest);
            }
        }
    }

    pub(crate) fn contains(&self, stream_id: u32) -> bool {
        self.ids.contains(&stream_id)
    }
}

impl Connection {
    /// Feed one length-delimited frame from the transport.
    ///
    /// Connection-fatal problems (malformed frames, protocol violations)
    /// queue a connection ERROR, close the connection and are returned.
    /// Stream-level violations are answered with a stream ERROR and
    /// reported as [`Event::StreamError`].
    pub fn receive(&mut self, bytes: Bytes) -> Result<()> {
        if self.is_closed() {
            trace!("frame after close dropped");
            return Ok(());
        }
        let frame = match Frame::decode(bytes) {
            Ok(frame) => frame,
            Err(RSocketError::UnknownFrameType {
                frame_type,
                ignorable: true,
            }) => {
                warn!(frame_type, "ignoring unknown frame type");
                return Ok(());
            }
            Err(err) => return Err(self.fail(err)),
        };
        self.handle_frame(frame)
    }

    /// Feed one decoded frame.
    pub fn handle_frame(&mut self, frame: Frame) -> Result<()> {
        if self.is_closed() {
            return Ok(());
        }
        if let Err(err) = frame.header().validate() {
            return Err(self.fail(err));
        }
        trace!(
            stream_id = frame.stream_id(),
            frame_type = %frame.frame_type(),
            flags = frame.flags(),
            "frame in"
        );

        let result = if self.state == ConnectionState::AwaitingSetup {
            self.on_awaiting_setup(frame)
        } else if frame.stream_id() == 0 {
            self.on_connection_frame(frame)
        } else {
            self.on_stream_frame(frame)
        };
        result.map_err(|err| self.fail(err))
    }

    fn on_awaiting_setup(&mut self, frame: Frame) -> Result<()> {
        match (self.config.side, frame) {
            (Side::Server, setup @ Frame::Setup { .. }) => self.on_setup(setup),
            (_, Frame::Error {
                stream_id: 0,
                code,
                message,
                ..
            }) => {
                self.shutdown(code, message);
                Ok(())
            }
            (Side::Server, _) => Err(RSocketError::Connection {
                code: ErrorCode::INVALID_SETUP,
                message: "first frame must be SETUP".to_string(),
            }),
            (Side::Client, other) => Err(RSocketError::Connection {
                code: ErrorCode::CONNECTION_ERROR,
                message: format!("{} received before SETUP was sent", other.frame_type()),
            }),
        }
    }

    fn on_setup(&mut self, frame: Frame) -> Result<()> {
        let Frame::Setup {
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
        } = frame
        else {
            return Ok(());
        };

        if major_version != MAJOR_VERSION {
            return Err(RSocketError::Connection {
                code: ErrorCode::UNSUPPORTED_SETUP,
                message: format!("unsupported version {}.{}", major_version, minor_version),
            });
        }
        if resume_token.is_some() {
            return Err(RSocketError::Connection {
                code: ErrorCode::UNSUPPORTED_SETUP,
                message: "resumption is not supported".to_string(),
            });
        }
        if keepalive_interval == 0 || max_lifetime == 0 {
            return Err(RSocketError::Connection {
                code: ErrorCode::INVALID_SETUP,
                message: "keepalive interval and max lifetime must be positive".to_string(),
            });
        }

        self.state = ConnectionState::Open;
        debug!(
            keepalive_interval,
            max_lifetime,
            metadata_mime_type = %metadata_mime_type,
            data_mime_type = %data_mime_type,
            "SETUP accepted"
        );
        self.events.push_back(Event::Setup {
            keepalive_interval: Duration::from_millis(u64::from(keepalive_interval)),
            max_lifetime: Duration::from_millis(u64::from(max_lifetime)),
            metadata_mime_type,
            data_mime_type,
            payload: Payload { data, metadata },
        });
        Ok(())
    }

    fn on_connection_frame(&mut self, frame: Frame) -> Result<()> {
        match frame {
            Frame::Setup { .. } => Err(RSocketError::Connection {
                code: ErrorCode::INVALID_SETUP,
                message: "duplicate SETUP".to_string(),
            }),
            Frame::Keepalive {
                flags: keepalive_flags,
                data,
                ..
            } => {
                if keepalive_flags & flags::RESPOND != 0 {
                    self.outbound.push_frame(Frame::keepalive(false, 0, data));
                }
                Ok(())
            }
            Frame::Lease {
                ttl,
                number_of_requests,
                metadata,
                ..
            } => {
                self.events.push_back(Event::Lease {
                    ttl: Duration::from_millis(u64::from(ttl)),
                    number_of_requests,
                    metadata,
                });
                Ok(())
            }
            Frame::MetadataPush { metadata, .. } => {
                self.events.push_back(Event::MetadataPush { metadata });
                Ok(())
            }
            Frame::Error { code, message, .. } => {
                warn!(%code, message = %message, "connection error from peer");
                self.outbound.clear();
                self.shutdown(code, message);
                Ok(())
            }
            Frame::Resume { .. } | Frame::ResumeOk { .. } => Err(RSocketError::Connection {
                code: ErrorCode::REJECTED_RESUME,
                message: "resumption is not supported".to_string(),
            }),
            Frame::Ext {
                flags: ext_flags, ..
            } => self.on_extension(ext_flags),
            other => Err(RSocketError::MalformedFrame(format!(
                "{} is not valid on stream 0",
                other.frame_type()
            ))),
        }
    }

    fn on_extension(&mut self, ext_flags: u16) -> Result<()> {
        if ext_flags & flags::IGNORE != 0 {
            trace!("ignoring EXT frame");
            return Ok(());
        }
        Err(RSocketError::Connection {
            code: ErrorCode::CONNECTION_ERROR,
            message: "unsupported extension frame".to_string(),
        })
    }

    fn on_stream_frame(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        if let Frame::Ext {
            flags: ext_flags, ..
        } = frame
        {
            return self.on_extension(ext_flags);
        }

        let known =
            self.streams.contains_key(&stream_id) || self.reassembler.is_reassembling(stream_id);
        if !known {
            if self.recently_closed.contains(stream_id) {
                trace!(
                    stream_id,
                    frame_type = %frame.frame_type(),
                    "late frame for closed stream dropped"
                );
                return Ok(());
            }
            let opens = frame.frame_type().is_request()
                && self.config.side.peer().owns(stream_id)
                && stream_id > self.last_peer_stream_id;
            if !opens {
                return Err(RSocketError::UnknownStream(stream_id));
            }
            self.last_peer_stream_id = stream_id;
        }

        let machine = self.streams.get(&stream_id).map(|entry| &entry.machine);
        if matches!(frame, Frame::Payload { .. })
            && machine.map_or(false, |m| m.inbound_cancelled())
        {
            trace!(stream_id, "value after inbound cancel dropped");
            return Ok(());
        }
        let channel_requester = machine.map_or(false, |m| {
            m.kind() == InteractionKind::RequestChannel && m.role() == Role::Requester
        });
        match &frame {
            Frame::Cancel { .. } if channel_requester => {
                self.outbound.discard_values(stream_id);
            }
            Frame::Cancel { .. } | Frame::Error { .. } => {
                self.reassembler.release(stream_id);
                self.outbound.discard_stream(stream_id);
            }
            _ => {}
        }

        let Some(frame) = self.reassembler.push(frame)? else {
            return Ok(());
        };

        if !self.streams.contains_key(&stream_id) {
            return self.on_request(frame);
        }
        self.dispatch(stream_id, &frame);
        Ok(())
    }

    fn on_request(&mut self, frame: Frame) -> Result<()> {
        let stream_id = frame.stream_id();
        let Some(kind) = InteractionKind::from_frame_type(frame.frame_type()) else {
            // peer abandoned its own fragmented request
            trace!(
                stream_id,
                frame_type = %frame.frame_type(),
                "frame for unopened stream dropped"
            );
            return Ok(());
        };
        let initial_request_n = frame.request_n_value().unwrap_or(0);
        if let Some(n) = frame.request_n_value() {
            if let Err(err) = check_request_n(n) {
                warn!(stream_id, %kind, error = %err, "rejecting request");
                let message = err.to_string();
                self.outbound
                    .push_frame(Frame::error(stream_id, ErrorCode::INVALID, message));
                self.recently_closed.insert(stream_id);
                return Ok(());
            }
        }
        let complete = frame.is_complete();
        let payload = frame.into_payload().unwrap_or_default();

        let machine = StreamMachine::responder(stream_id, kind, initial_request_n, complete);
        debug!(stream_id, %kind, initial_request_n, "stream accepted");
        if !machine.is_terminal() {
            self.streams.insert(
                stream_id,
                StreamEntry {
                    machine,
                    wire_started: false,
                    request_complete: false,
                },
            );
        }
        self.events.push_back(Event::Request {
            stream_id,
            kind,
            initial_request_n,
            payload,
            complete,
        });
        Ok(())
    }

    fn dispatch(&mut self, stream_id: u32, frame: &Frame) {
        let Some(entry) = self.streams.get_mut(&stream_id) else {
            return;
        };
        match entry.machine.on_frame(frame) {
            Ok(inbound) => {
                let terminal = entry.machine.is_terminal();
                let event = match inbound {
                    Inbound::Next { payload, complete } => Event::Next {
                        stream_id,
                        payload,
                        complete,
                    },
                    Inbound::Complete => Event::Complete { stream_id },
                    Inbound::RequestN(n) => Event::RequestN { stream_id, n },
                    Inbound::Cancelled => Event::Cancelled { stream_id },
                    Inbound::Error { code, message } => Event::StreamError {
                        stream_id,
                        code,
                        message,
                    },
                };
                self.events.push_back(event);
                if terminal {
                    self.remove_stream(stream_id, false);
                } else {
                    self.flush_stream(stream_id);
                }
            }
            Err(err) => {
                warn!(stream_id, error = %err, "rejecting frame illegal for stream");
                let message = err.to_string();
                self.outbound.discard_stream(stream_id);
                self.reassembler.release(stream_id);
                self.outbound
                    .push_frame(Frame::error(stream_id, ErrorCode::INVALID, message.clone()));
                self.remove_stream(stream_id, true);
                self.events.push_back(Event::StreamError {
                    stream_id,
                    code: ErrorCode::INVALID,
                    message,
                });
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::connection::{ConnectionConfig, SetupConfig};
    use crate::protocol::{FrameType, Payload};
    use crate::stream::StreamState;

    fn pair() -> (Connection, Connection) {
        let mut client = Connection::new(ConnectionConfig::client());
        let mut server = Connection::new(ConnectionConfig::server());
        client.connect(SetupConfig::default()).unwrap();
        pump(&mut client, &mut server);
        assert!(matches!(server.poll_event(), Some(Event::Setup { .. })));
        (client, server)
    }

    fn pump(from: &mut Connection, to: &mut Connection) {
        while let Some(bytes) = from.poll_transmit() {
            to.receive(bytes).unwrap();
        }
    }

    fn sent(conn: &mut Connection) -> Vec<Frame> {
        std::iter::from_fn(|| conn.poll_transmit())
            .map(|b| Frame::decode(b).unwrap())
            .collect()
    }

    #[test]
    fn test_recently_closed_is_bounded() {
        let mut closed = RecentlyClosed::new(2);
        closed.insert(1);
        closed.insert(3);
        closed.insert(5);
        assert!(!closed.contains(1));
        assert!(closed.contains(3));
        assert!(closed.contains(5));

        let mut disabled = RecentlyClosed::new(0);
        disabled.insert(1);
        assert!(!disabled.contains(1));
    }

    #[test]
    fn test_server_requires_setup() {
        let mut server = Connection::new(ConnectionConfig::server());
        let frame = Frame::request_response(1, Payload::from_data("x")).encode();
        let err = server.receive(frame).unwrap_err();
        assert!(matches!(
            err,
            RSocketError::Connection {
                code: ErrorCode::INVALID_SETUP,
                ..
            }
        ));
        assert!(server.is_closed());
        let frames = sent(&mut server);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            Frame::Error {
                stream_id: 0,
                code: ErrorCode::INVALID_SETUP,
                ..
            }
        ));
    }

    #[test]
    fn test_unsupported_version() {
        let mut server = Connection::new(ConnectionConfig::server());
        let mut setup = SetupConfig::default().to_frame();
        if let Frame::Setup { major_version, .. } = &mut setup {
            *major_version = 2;
        }
        assert!(server.receive(setup.encode()).is_err());
    }

    #[test]
    fn test_request_response_round_trip() {
        let (mut client, mut server) = pair();
        let id = client.request_response(Payload::from_data("ping")).unwrap();
        pump(&mut client, &mut server);

        match server.poll_event() {
            Some(Event::Request {
                stream_id,
                kind: InteractionKind::RequestResponse,
                payload,
                ..
            }) => {
                assert_eq!(stream_id, id);
                assert_eq!(payload, Payload::from_data("ping"));
            }
            other => panic!("unexpected event {:?}", other),
        }

        server.send_next(id, Payload::from_data("pong"), true).unwrap();
        assert_eq!(server.live_streams(), 0);
        pump(&mut server, &mut client);

        assert_eq!(
            client.poll_event(),
            Some(Event::Next {
                stream_id: id,
                payload: Payload::from_data("pong"),
                complete: true,
            })
        );
        assert_eq!(client.live_streams(), 0);
    }

    #[test]
    fn test_stream_flow_control() {
        let (mut client, mut server) = pair();
        let id = client.request_stream(Payload::from_data("s"), 1).unwrap();
        pump(&mut client, &mut server);
        assert!(matches!(server.poll_event(), Some(Event::Request { .. })));

        for i in 0..3u8 {
            server.send_next(id, Payload::from_data(vec![i]), false).unwrap();
        }
        server.send_complete(id).unwrap();
        let first = sent(&mut server);
        assert_eq!(first.len(), 1);
        client.handle_frame(first[0].clone()).unwrap();

        client.send_request_n(id, 10).unwrap();
        pump(&mut client, &mut server);
        assert_eq!(
            server.poll_event(),
            Some(Event::RequestN {
                stream_id: id,
                n: 10
            })
        );
        pump(&mut server, &mut client);

        let mut values = Vec::new();
        while let Some(event) = client.poll_event() {
            match event {
                Event::Next {
                    payload, complete, ..
                } => values.push((payload.data[0], complete)),
                other => panic!("unexpected event {:?}", other),
            }
        }
        assert_eq!(values, vec![(0, false), (1, false), (2, true)]);
        assert_eq!(client.live_streams(), 0);
        assert_eq!(server.live_streams(), 0);
    }

    #[test]
    fn test_cancel_received_makes_stream_unknown() {
        let (mut client, mut server) = pair();
        let id = client.request_stream(Payload::from_data("s"), 4).unwrap();
        pump(&mut client, &mut server);
        server.poll_event();

        server.handle_frame(Frame::cancel(id)).unwrap();
        assert_eq!(server.poll_event(), Some(Event::Cancelled { stream_id: id }));
        assert_eq!(server.stream_state(id), None);

        let err = server.handle_frame(Frame::request_n(id, 1)).unwrap_err();
        assert!(matches!(err, RSocketError::UnknownStream(s) if s == id));
        assert!(server.is_closed());
    }

    #[test]
    fn test_late_frames_after_local_cancel_dropped() {
        let (mut client, mut server) = pair();
        let id = client.request_stream(Payload::from_data("s"), 4).unwrap();
        pump(&mut client, &mut server);
        server.poll_event();

        server.send_next(id, Payload::from_data("in flight"), false).unwrap();
        client.send_cancel(id).unwrap();
        pump(&mut server, &mut client);
        assert!(client.poll_event().is_none());
        assert!(!client.is_closed());
    }

    #[test]
    fn test_unknown_stream_is_fatal() {
        let (mut client, _server) = pair();
        let err = client
            .handle_frame(Frame::next(7, Payload::from_data("?"), false))
            .unwrap_err();
        assert!(matches!(err, RSocketError::UnknownStream(7)));
        let frames = sent(&mut client);
        assert!(matches!(
            frames.last(),
            Some(Frame::Error {
                stream_id: 0,
                code: ErrorCode::CONNECTION_ERROR,
                ..
            })
        ));
    }

    #[test]
    fn test_request_with_wrong_parity_is_fatal() {
        let (_client, mut server) = pair();
        let err = server
            .handle_frame(Frame::request_response(2, Payload::default()))
            .unwrap_err();
        assert!(matches!(err, RSocketError::UnknownStream(2)));
    }

    #[test]
    fn test_stream_violation_answers_with_error() {
        let (mut client, mut server) = pair();
        let id = client.request_response(Payload::from_data("x")).unwrap();
        pump(&mut client, &mut server);
        server.poll_event();

        server.handle_frame(Frame::request_n(id, 3)).unwrap();
        assert!(matches!(
            server.poll_event(),
            Some(Event::StreamError {
                code: ErrorCode::INVALID,
                ..
            })
        ));
        assert!(!server.is_closed());
        let frames = sent(&mut server);
        assert_eq!(frames[0].frame_type(), FrameType::Error);
        assert_eq!(frames[0].stream_id(), id);
    }

    #[test]
    fn test_request_without_credit_answered_with_error() {
        let (_client, mut server) = pair();
        server
            .handle_frame(Frame::request_stream(1, 0, Payload::from_data("s")))
            .unwrap();
        assert!(server.poll_event().is_none());
        assert_eq!(server.stream_state(1), None);
        assert!(!server.is_closed());

        let frames = sent(&mut server);
        assert_eq!(frames.len(), 1);
        assert!(matches!(
            &frames[0],
            Frame::Error {
                stream_id: 1,
                code: ErrorCode::INVALID,
                ..
            }
        ));

        // the requester's follow-up frames are dropped
        server.handle_frame(Frame::request_n(1, 5)).unwrap();
        assert!(!server.is_closed());
    }

    #[test]
    fn test_channel_responder_cancels_requester_direction() {
        let (mut client, mut server) = pair();
        let id = client
            .request_channel(Payload::from_data("q0"), 4, false)
            .unwrap();
        pump(&mut client, &mut server);
        assert!(matches!(server.poll_event(), Some(Event::Request { .. })));

        server.send_request_n(id, 2).unwrap();
        pump(&mut server, &mut client);
        assert_eq!(client.poll_event(), Some(Event::RequestN { stream_id: id, n: 2 }));

        client.send_next(id, Payload::from_data("q1"), false).unwrap();
        client.send_next(id, Payload::from_data("q2"), false).unwrap();
        let in_flight = client.poll_transmit().unwrap();

        server.send_cancel(id).unwrap();
        assert_eq!(server.stream_state(id), Some(StreamState::HalfClosedRemote));
        server.receive(in_flight).unwrap();
        assert!(server.poll_event().is_none());
        assert!(!server.is_closed());

        pump(&mut server, &mut client);
        assert_eq!(client.poll_event(), Some(Event::Cancelled { stream_id: id }));
        assert_eq!(client.stream_state(id), Some(StreamState::HalfClosedLocal));
        assert!(sent(&mut client).is_empty());
        assert!(client.send_next(id, Payload::from_data("q3"), false).is_err());

        server.send_next(id, Payload::from_data("r1"), true).unwrap();
        pump(&mut server, &mut client);
        assert_eq!(
            client.poll_event(),
            Some(Event::Next {
                stream_id: id,
                payload: Payload::from_data("r1"),
                complete: true,
            })
        );
        assert_eq!(client.live_streams(), 0);
        assert_eq!(server.live_streams(), 0);
    }

    #[test]
    fn test_connection_frame_on_stream_is_fatal() {
        let (mut client, _server) = pair();
        let keepalive = Bytes::from_static(&[0, 0, 0, 5, 0x0C, 0x80, 0, 0, 0, 0, 0, 0, 0, 0]);
        assert!(client.receive(keepalive).is_err());
        assert!(client.is_closed());
        let frames = sent(&mut client);
        assert!(matches!(
            frames.last(),
            Some(Frame::Error { stream_id: 0, .. })
        ));
    }

    #[test]
    fn test_fragmented_request_reassembled() {
        let mut client = Connection::new(ConnectionConfig::client().with_max_frame_size(16));
        let mut server = Connection::new(ConnectionConfig::server());
        client.connect(SetupConfig::default()).unwrap();
        pump(&mut client, &mut server);
        server.poll_event();

        let payload = Payload::from_data(vec![3u8; 100]).with_metadata(vec![4u8; 40]);
        let id = client.request_channel(payload.clone(), 8, true).unwrap();
        pump(&mut client, &mut server);

        assert_eq!(
            server.poll_event(),
            Some(Event::Request {
                stream_id: id,
                kind: InteractionKind::RequestChannel,
                initial_request_n: 8,
                payload,
                complete: true,
            })
        );
        assert_eq!(server.stream_state(id), Some(StreamState::HalfClosedRemote));
        assert_eq!(client.stream_state(id), Some(StreamState::HalfClosedLocal));
    }

    #[test]
    fn test_keepalive_respond() {
        let (mut client, mut server) = pair();
        client.keepalive(Bytes::from_static(b"ping")).unwrap();
        pump(&mut client, &mut server);
        let frames = sent(&mut server);
        assert_eq!(frames, vec![Frame::keepalive(false, 0, Bytes::from_static(b"ping"))]);
    }

    #[test]
    fn test_peer_connection_error_closes() {
        let (mut client, mut server) = pair();
        client.request_response(Payload::from_data("x")).unwrap();
        server.close("shutting down");
        pump(&mut server, &mut client);
        assert!(client.is_closed());
        assert_eq!(client.live_streams(), 0);
        assert_eq!(
            client.poll_event(),
            Some(Event::Closed {
                code: ErrorCode::CONNECTION_CLOSE,
                message: "shutting down".to_string()
            })
        );
    }

    #[test]
    fn test_ignorable_unknown_frame_type() {
        let (mut client, _server) = pair();
        // type 0x30 with IGNORE set
        let bytes = Bytes::from_static(&[0, 0, 0, 0, 0xC2, 0x00]);
        assert!(client.receive(bytes).is_ok());
        assert!(!client.is_closed());
    }
}
