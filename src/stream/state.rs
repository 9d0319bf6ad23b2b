//! Per-stream lifecycle and flow control.
//!
//! A [`StreamMachine`] tracks one interaction from one side's point of
//! view. Outbound values are queued with [`StreamMachine::queue_next`] and
//! released by [`StreamMachine::pop_ready`] only while the peer has granted
//! credit. Inbound frames go through [`StreamMachine::on_frame`], which
//! checks they are legal for the interaction and reports what the
//! application should see.

use std::collections::VecDeque;
use std::fmt;

use tracing::{debug, warn};

use super::credit::Credit;
use crate::error::{RSocketError, Result};
use crate::protocol::{ErrorCode, Frame, FrameType, Payload};

/// Interaction model of a stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InteractionKind {
    FireAndForget,
    RequestResponse,
    RequestStream,
    RequestChannel,
}

impl InteractionKind {
    /// Interaction started by a request frame type.
    pub fn from_frame_type(frame_type: FrameType) -> Option<Self> {
        match frame_type {
            FrameType::RequestFnf => Some(InteractionKind::FireAndForget),
            FrameType::RequestResponse => Some(InteractionKind::RequestResponse),
            FrameType::RequestStream => Some(InteractionKind::RequestStream),
            FrameType::RequestChannel => Some(InteractionKind::RequestChannel),
            _ => None,
        }
    }

    /// Request frame type that starts this interaction.
    pub fn frame_type(self) -> FrameType {
        match self {
            InteractionKind::FireAndForget => FrameType::RequestFnf,
            InteractionKind::RequestResponse => FrameType::RequestResponse,
            InteractionKind::RequestStream => FrameType::RequestStream,
            InteractionKind::RequestChannel => FrameType::RequestChannel,
        }
    }
}

impl fmt::Display for InteractionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InteractionKind::FireAndForget => "fire-and-forget",
            InteractionKind::RequestResponse => "request-response",
            InteractionKind::RequestStream => "request-stream",
            InteractionKind::RequestChannel => "request-channel",
        };
        f.write_str(name)
    }
}

/// Which side of the interaction this machine represents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Role {
    Requester,
    Responder,
}

/// Lifecycle state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum StreamState {
    /// Request queued, final fragment not yet sent.
    Requested,
    Active,
    /// Channel: this side has completed its direction.
    HalfClosedLocal,
    /// Channel: the peer has completed its direction.
    HalfClosedRemote,
    Completed,
    Errored,
    Cancelled,
}

impl StreamState {
    #[inline]
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            StreamState::Completed | StreamState::Errored | StreamState::Cancelled
        )
    }
}

/// Outbound signal released by [`StreamMachine::pop_ready`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Outbound {
    /// A value, optionally completing this side.
    Next { payload: Payload, complete: bool },
    /// COMPLETE without a value.
    Complete,
}

/// What an inbound frame means for the application.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inbound {
    Next { payload: Payload, complete: bool },
    Complete,
    /// Peer granted more credit.
    RequestN(u32),
    Cancelled,
    Error { code: ErrorCode, message: String },
}

/// State machine of one stream.
#[derive(Debug)]
pub struct StreamMachine {
    stream_id: u32,
    kind: InteractionKind,
    role: Role,
    state: StreamState,
    /// Credit granted by the peer for values this side sends.
    outbound_credit: Credit,
    /// Credit this side granted for values the peer sends.
    inbound_credit: Credit,
    queued: VecDeque<Payload>,
    complete_queued: bool,
    /// Channel responder: this side cancelled the peer's direction.
    inbound_cancelled: bool,
}

impl StreamMachine {
    /// Machine for a request this side is sending.
    ///
    /// Starts in [`StreamState::Requested`]; call [`activate`](Self::activate)
    /// once the final request fragment has been written.
    pub fn requester(stream_id: u32, kind: InteractionKind, initial_request_n: u32) -> Self {
        Self {
            stream_id,
            kind,
            role: Role::Requester,
            state: StreamState::Requested,
            outbound_credit: Credit::zero(),
            inbound_credit: Credit::new(initial_request_n),
            queued: VecDeque::new(),
            complete_queued: false,
            inbound_cancelled: false,
        }
    }

    /// Machine for a request received from the peer.
    ///
    /// `request_complete` is the COMPLETE flag of a REQUEST_CHANNEL.
    pub fn responder(
        stream_id: u32,
        kind: InteractionKind,
        initial_request_n: u32,
        request_complete: bool,
    ) -> Self {
        let state = match kind {
            InteractionKind::FireAndForget => StreamState::Completed,
            InteractionKind::RequestChannel if request_complete => StreamState::HalfClosedRemote,
            _ => StreamState::Active,
        };
        let outbound_credit = match kind {
            InteractionKind::RequestStream | InteractionKind::RequestChannel => {
                Credit::new(initial_request_n)
            }
            _ => Credit::zero(),
        };
        Self {
            stream_id,
            kind,
            role: Role::Responder,
            state,
            outbound_credit,
            inbound_credit: Credit::zero(),
            queued: VecDeque::new(),
            complete_queued: false,
            inbound_cancelled: false,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    #[inline]
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    #[inline]
    pub fn role(&self) -> Role {
        self.role
    }

    #[inline]
    pub fn state(&self) -> StreamState {
        self.state
    }

    #[inline]
    pub fn is_terminal(&self) -> bool {
        self.state.is_terminal()
    }

    pub fn outbound_credit(&self) -> Credit {
        self.outbound_credit
    }

    pub fn inbound_credit(&self) -> Credit {
        self.inbound_credit
    }

    /// Whether this side cancelled the peer's direction of a channel. Peer
    /// values still in flight are dropped rather than rejected.
    pub fn inbound_cancelled(&self) -> bool {
        self.inbound_cancelled
    }

    /// Values waiting for credit.
    pub fn queued_len(&self) -> usize {
        self.queued.len()
    }

    /// The request has been fully sent.
    ///
    /// `request_complete` is the COMPLETE flag the REQUEST_CHANNEL carried.
    pub fn activate(&mut self, request_complete: bool) {
        if self.state != StreamState::Requested {
            return;
        }
        self.state = match self.kind {
            InteractionKind::FireAndForget => StreamState::Completed,
            InteractionKind::RequestChannel if request_complete => StreamState::HalfClosedLocal,
            _ => StreamState::Active,
        };
        debug!(
            stream_id = self.stream_id,
            kind = %self.kind,
            state = ?self.state,
            "stream active"
        );
    }

    fn violation(&self, reason: impl Into<String>) -> RSocketError {
        RSocketError::InvalidStreamState {
            stream_id: self.stream_id,
            reason: reason.into(),
        }
    }

    fn local_open(&self) -> bool {
        match self.state {
            StreamState::Requested => {
                self.kind == InteractionKind::RequestChannel && self.role == Role::Requester
            }
            StreamState::Active | StreamState::HalfClosedRemote => true,
            _ => false,
        }
    }

    fn remote_open(&self) -> bool {
        matches!(
            self.state,
            StreamState::Requested | StreamState::Active | StreamState::HalfClosedLocal
        )
    }

    fn sends_values(&self) -> bool {
        match self.kind {
            InteractionKind::RequestChannel => true,
            InteractionKind::RequestResponse | InteractionKind::RequestStream => {
                self.role == Role::Responder
            }
            InteractionKind::FireAndForget => false,
        }
    }

    fn receives_values(&self) -> bool {
        match self.kind {
            InteractionKind::RequestChannel => true,
            InteractionKind::RequestResponse | InteractionKind::RequestStream => {
                self.role == Role::Requester
            }
            InteractionKind::FireAndForget => false,
        }
    }

    fn uses_credit(&self) -> bool {
        matches!(
            self.kind,
            InteractionKind::RequestStream | InteractionKind::RequestChannel
        )
    }

    // ---- outbound -----------------------------------------------------

    /// Queue a value for sending.
    pub fn queue_next(&mut self, payload: Payload, complete: bool) -> Result<()> {
        if !self.sends_values() {
            return Err(self.violation(format!(
                "{:?} of {} cannot send values",
                self.role, self.kind
            )));
        }
        if !self.local_open() || self.complete_queued {
            return Err(self.violation(format!("cannot send in state {:?}", self.state)));
        }
        if self.kind == InteractionKind::RequestResponse && !self.queued.is_empty() {
            return Err(self.violation("request-response has already been answered"));
        }
        self.queued.push_back(payload);
        self.complete_queued = complete || self.kind == InteractionKind::RequestResponse;
        Ok(())
    }

    /// Queue completion of this side.
    pub fn queue_complete(&mut self) -> Result<()> {
        if !self.sends_values() {
            return Err(self.violation(format!(
                "{:?} of {} cannot complete",
                self.role, self.kind
            )));
        }
        if !self.local_open() || self.complete_queued {
            return Err(self.violation(format!("cannot complete in state {:?}", self.state)));
        }
        self.complete_queued = true;
        Ok(())
    }

    /// Next outbound signal the peer has credit for.
    pub fn pop_ready(&mut self) -> Option<Outbound> {
        if self.state == StreamState::Requested || !self.local_open() {
            return None;
        }
        if !self.queued.is_empty() {
            if self.uses_credit() && !self.outbound_credit.try_consume() {
                return None;
            }
            let payload = self.queued.pop_front()?;
            let complete = self.complete_queued && self.queued.is_empty();
            if complete {
                self.close_local();
            }
            return Some(Outbound::Next { payload, complete });
        }
        if self.complete_queued {
            self.close_local();
            return Some(Outbound::Complete);
        }
        None
    }

    fn close_local(&mut self) {
        self.complete_queued = false;
        self.state = match (self.kind, self.state) {
            (InteractionKind::RequestChannel, StreamState::Active) => StreamState::HalfClosedLocal,
            _ => StreamState::Completed,
        };
        debug!(stream_id = self.stream_id, state = ?self.state, "local side completed");
    }

    /// This side is sending ERROR.
    pub fn send_error(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(self.violation("stream already terminated"));
        }
        if self.role == Role::Requester && self.kind != InteractionKind::RequestChannel {
            return Err(self.violation("only a responder or channel can send ERROR"));
        }
        self.terminate(StreamState::Errored);
        Ok(())
    }

    /// This side is sending CANCEL.
    ///
    /// A requester cancels the whole interaction. A channel responder only
    /// cancels the requester's direction; its own keeps going until it
    /// completes.
    pub fn send_cancel(&mut self) -> Result<()> {
        if self.is_terminal() {
            return Err(self.violation("stream already terminated"));
        }
        match (self.role, self.kind) {
            (Role::Requester, _) => self.terminate(StreamState::Cancelled),
            (Role::Responder, InteractionKind::RequestChannel) => {
                if !self.remote_open() {
                    return Err(self.violation(format!("cannot cancel in state {:?}", self.state)));
                }
                self.inbound_cancelled = true;
                if self.state == StreamState::HalfClosedLocal {
                    self.terminate(StreamState::Cancelled);
                } else {
                    self.state = StreamState::HalfClosedRemote;
                    debug!(stream_id = self.stream_id, "inbound side cancelled");
                }
            }
            (Role::Responder, _) => {
                return Err(self.violation(format!("responder of {} cannot cancel", self.kind)));
            }
        }
        Ok(())
    }

    /// This side is granting `n` more credit to the peer.
    pub fn send_request_n(&mut self, n: u32) -> Result<()> {
        if n == 0 {
            return Err(self.violation("REQUEST_N must be positive"));
        }
        if !self.uses_credit() || !self.receives_values() {
            return Err(self.violation(format!(
                "{:?} of {} does not grant credit",
                self.role, self.kind
            )));
        }
        if !self.remote_open() {
            return Err(self.violation(format!("cannot request in state {:?}", self.state)));
        }
        self.inbound_credit.add(n);
        Ok(())
    }

    /// Channel requester: the responder cancelled this side's direction.
    /// Values and a COMPLETE still waiting are dropped.
    fn stop_local(&mut self) {
        match self.state {
            StreamState::HalfClosedLocal => {}
            StreamState::HalfClosedRemote => self.terminate(StreamState::Cancelled),
            _ => {
                self.queued.clear();
                self.complete_queued = false;
                self.state = StreamState::HalfClosedLocal;
                debug!(stream_id = self.stream_id, "outbound side cancelled by peer");
            }
        }
    }

    fn terminate(&mut self, state: StreamState) {
        self.state = state;
        self.queued.clear();
        self.complete_queued = false;
        debug!(stream_id = self.stream_id, state = ?state, "stream terminated");
    }

    // ---- inbound ------------------------------------------------------

    /// Apply a (reassembled) frame received from the peer.
    pub fn on_frame(&mut self, frame: &Frame) -> Result<Inbound> {
        if self.is_terminal() {
            return Err(self.violation("frame for a terminated stream"));
        }
        match frame {
            Frame::Payload { .. } => self.on_payload(frame),
            Frame::RequestN { request_n, .. } => {
                if !self.uses_credit() || !self.sends_values() {
                    return Err(self.violation(format!("REQUEST_N on {}", self.kind)));
                }
                if *request_n == 0 {
                    return Err(self.violation("REQUEST_N must be positive"));
                }
                self.outbound_credit.add(*request_n);
                Ok(Inbound::RequestN(*request_n))
            }
            Frame::Cancel { .. } => match (self.role, self.kind) {
                (Role::Responder, _) => {
                    self.terminate(StreamState::Cancelled);
                    Ok(Inbound::Cancelled)
                }
                (Role::Requester, InteractionKind::RequestChannel) => {
                    self.stop_local();
                    Ok(Inbound::Cancelled)
                }
                (Role::Requester, _) => Err(self.violation("CANCEL received by the requester")),
            },
            Frame::Error { code, message, .. } => {
                self.terminate(StreamState::Errored);
                Ok(Inbound::Error {
                    code: *code,
                    message: message.clone(),
                })
            }
            other => Err(self.violation(format!("unexpected {} frame", other.frame_type()))),
        }
    }

    fn on_payload(&mut self, frame: &Frame) -> Result<Inbound> {
        if !self.receives_values() {
            return Err(self.violation(format!(
                "{:?} of {} does not receive PAYLOAD",
                self.role, self.kind
            )));
        }
        if !self.remote_open() {
            return Err(self.violation(format!("PAYLOAD in state {:?}", self.state)));
        }

        let complete = frame.is_complete();
        let next = frame.is_next();
        if !next && !complete {
            return Err(self.violation("PAYLOAD without NEXT or COMPLETE"));
        }

        if next && self.uses_credit() && !self.inbound_credit.try_consume() {
            warn!(
                stream_id = self.stream_id,
                "peer sent a value beyond granted credit"
            );
        }

        if complete || self.kind == InteractionKind::RequestResponse {
            self.close_remote();
        }

        if next {
            let payload = frame.payload().unwrap_or_default();
            Ok(Inbound::Next { payload, complete })
        } else {
            Ok(Inbound::Complete)
        }
    }

    fn close_remote(&mut self) {
        self.state = match (self.kind, self.state) {
            (InteractionKind::RequestChannel, StreamState::Active | StreamState::Requested) => {
                StreamState::HalfClosedRemote
            }
            _ => StreamState::Completed,
        };
        if self.state == StreamState::Completed {
            self.queued.clear();
        }
        debug!(stream_id = self.stream_id, state = ?self.state, "remote side completed");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bytes::Bytes;

    fn next(payload: &'static str, complete: bool) -> Frame {
        Frame::next(1, Payload::from_data(payload), complete)
    }

    #[test]
    fn test_fire_and_forget_is_terminal() {
        let mut requester = StreamMachine::requester(1, InteractionKind::FireAndForget, 0);
        assert_eq!(requester.state(), StreamState::Requested);
        requester.activate(false);
        assert!(requester.is_terminal());

        let responder = StreamMachine::responder(2, InteractionKind::FireAndForget, 0, false);
        assert!(responder.is_terminal());
    }

    #[test]
    fn test_request_response_requester() {
        let mut machine = StreamMachine::requester(1, InteractionKind::RequestResponse, 0);
        machine.activate(false);
        assert_eq!(machine.state(), StreamState::Active);

        let inbound = machine.on_frame(&next("pong", false)).unwrap();
        assert_eq!(
            inbound,
            Inbound::Next {
                payload: Payload::from_data("pong"),
                complete: false
            }
        );
        assert_eq!(machine.state(), StreamState::Completed);
        assert!(machine.on_frame(&next("again", false)).is_err());
    }

    #[test]
    fn test_request_response_responder() {
        let mut machine = StreamMachine::responder(1, InteractionKind::RequestResponse, 0, false);
        machine.queue_next(Payload::from_data("pong"), false).unwrap();
        assert!(machine.queue_next(Payload::from_data("x"), false).is_err());

        assert_eq!(
            machine.pop_ready(),
            Some(Outbound::Next {
                payload: Payload::from_data("pong"),
                complete: true
            })
        );
        assert!(machine.is_terminal());
        assert_eq!(machine.pop_ready(), None);
    }

    #[test]
    fn test_stream_responder_waits_for_credit() {
        let mut machine = StreamMachine::responder(2, InteractionKind::RequestStream, 1, false);
        for i in 0..3u8 {
            machine.queue_next(Payload::from_data(vec![i]), false).unwrap();
        }
        machine.queue_complete().unwrap();

        assert!(matches!(machine.pop_ready(), Some(Outbound::Next { complete: false, .. })));
        assert_eq!(machine.pop_ready(), None);
        assert_eq!(machine.queued_len(), 2);

        let inbound = machine.on_frame(&Frame::request_n(2, 5)).unwrap();
        assert_eq!(inbound, Inbound::RequestN(5));
        assert!(matches!(machine.pop_ready(), Some(Outbound::Next { complete: false, .. })));
        assert!(matches!(machine.pop_ready(), Some(Outbound::Next { complete: true, .. })));
        assert!(machine.is_terminal());
        assert_eq!(machine.outbound_credit().available(), 3);
    }

    #[test]
    fn test_complete_without_value() {
        let mut machine = StreamMachine::responder(2, InteractionKind::RequestStream, 0, false);
        machine.queue_complete().unwrap();
        assert_eq!(machine.pop_ready(), Some(Outbound::Complete));
        assert_eq!(machine.state(), StreamState::Completed);
    }

    #[test]
    fn test_stream_requester_credit_overrun_is_delivered() {
        let mut machine = StreamMachine::requester(1, InteractionKind::RequestStream, 1);
        machine.activate(false);
        assert!(machine.on_frame(&next("a", false)).is_ok());
        // beyond credit: logged, still delivered
        assert!(matches!(
            machine.on_frame(&next("b", false)).unwrap(),
            Inbound::Next { .. }
        ));
        machine.send_request_n(4).unwrap();
        assert_eq!(machine.inbound_credit().available(), 4);

        assert_eq!(
            machine.on_frame(&Frame::complete(1)).unwrap(),
            Inbound::Complete
        );
        assert_eq!(machine.state(), StreamState::Completed);
    }

    #[test]
    fn test_channel_half_close() {
        let mut requester = StreamMachine::requester(1, InteractionKind::RequestChannel, 8);
        requester.activate(false);
        assert_eq!(requester.state(), StreamState::Active);

        requester.on_frame(&next("r1", true)).unwrap();
        assert_eq!(requester.state(), StreamState::HalfClosedRemote);

        requester.queue_complete().unwrap();
        assert_eq!(requester.pop_ready(), Some(Outbound::Complete));
        assert_eq!(requester.state(), StreamState::Completed);
    }

    #[test]
    fn test_channel_requester_needs_responder_credit() {
        let mut requester = StreamMachine::requester(1, InteractionKind::RequestChannel, 8);
        requester.queue_next(Payload::from_data("q2"), false).unwrap();
        assert_eq!(requester.pop_ready(), None);
        requester.activate(false);
        assert_eq!(requester.pop_ready(), None);

        requester.on_frame(&Frame::request_n(1, 1)).unwrap();
        assert!(requester.pop_ready().is_some());
    }

    #[test]
    fn test_channel_request_with_complete() {
        let responder = StreamMachine::responder(1, InteractionKind::RequestChannel, 2, true);
        assert_eq!(responder.state(), StreamState::HalfClosedRemote);

        let mut requester = StreamMachine::requester(1, InteractionKind::RequestChannel, 2);
        requester.activate(true);
        assert_eq!(requester.state(), StreamState::HalfClosedLocal);
        assert!(requester.queue_next(Payload::default(), false).is_err());
    }

    #[test]
    fn test_cancel_and_error() {
        let mut responder = StreamMachine::responder(2, InteractionKind::RequestStream, 5, false);
        responder.queue_next(Payload::from_data("x"), false).unwrap();
        assert_eq!(
            responder.on_frame(&Frame::cancel(2)).unwrap(),
            Inbound::Cancelled
        );
        assert_eq!(responder.state(), StreamState::Cancelled);
        assert_eq!(responder.queued_len(), 0);
        assert!(responder.on_frame(&Frame::request_n(2, 1)).is_err());

        let mut requester = StreamMachine::requester(1, InteractionKind::RequestStream, 5);
        requester.activate(false);
        let inbound = requester
            .on_frame(&Frame::error(1, ErrorCode::APPLICATION_ERROR, "boom"))
            .unwrap();
        assert_eq!(
            inbound,
            Inbound::Error {
                code: ErrorCode::APPLICATION_ERROR,
                message: "boom".to_string()
            }
        );
        assert_eq!(requester.state(), StreamState::Errored);
    }

    #[test]
    fn test_channel_responder_cancels_inbound() {
        let mut responder = StreamMachine::responder(1, InteractionKind::RequestChannel, 2, false);
        responder.send_cancel().unwrap();
        assert_eq!(responder.state(), StreamState::HalfClosedRemote);
        assert!(responder.inbound_cancelled());
        assert!(responder.send_cancel().is_err());
        assert!(responder.send_request_n(1).is_err());

        // its own direction still runs
        responder.queue_next(Payload::from_data("r1"), true).unwrap();
        assert!(matches!(responder.pop_ready(), Some(Outbound::Next { complete: true, .. })));
        assert_eq!(responder.state(), StreamState::Completed);

        let mut done = StreamMachine::responder(1, InteractionKind::RequestChannel, 2, false);
        done.queue_complete().unwrap();
        assert_eq!(done.pop_ready(), Some(Outbound::Complete));
        assert_eq!(done.state(), StreamState::HalfClosedLocal);
        done.send_cancel().unwrap();
        assert_eq!(done.state(), StreamState::Cancelled);
    }

    #[test]
    fn test_channel_requester_receives_cancel() {
        let mut requester = StreamMachine::requester(1, InteractionKind::RequestChannel, 4);
        requester.activate(false);
        requester.queue_next(Payload::from_data("q1"), false).unwrap();
        requester.queue_complete().unwrap();

        assert_eq!(
            requester.on_frame(&Frame::cancel(1)).unwrap(),
            Inbound::Cancelled
        );
        assert_eq!(requester.state(), StreamState::HalfClosedLocal);
        assert_eq!(requester.queued_len(), 0);
        assert_eq!(requester.pop_ready(), None);
        assert!(requester.queue_next(Payload::from_data("q2"), false).is_err());

        // the responder's direction is still open
        assert!(matches!(
            requester.on_frame(&next("r1", true)).unwrap(),
            Inbound::Next { complete: true, .. }
        ));
        assert_eq!(requester.state(), StreamState::Completed);

        let mut half = StreamMachine::requester(1, InteractionKind::RequestChannel, 4);
        half.activate(false);
        half.on_frame(&Frame::complete(1)).unwrap();
        assert_eq!(half.state(), StreamState::HalfClosedRemote);
        half.on_frame(&Frame::cancel(1)).unwrap();
        assert_eq!(half.state(), StreamState::Cancelled);
    }

    #[test]
    fn test_role_violations() {
        let mut requester = StreamMachine::requester(1, InteractionKind::RequestStream, 5);
        requester.activate(false);
        assert!(requester.queue_next(Payload::default(), false).is_err());
        assert!(requester.on_frame(&Frame::cancel(1)).is_err());
        assert!(requester.send_error().is_err());
        assert!(requester
            .on_frame(&Frame::request_response(1, Payload::from_data(Bytes::new())))
            .is_err());

        let mut responder = StreamMachine::responder(2, InteractionKind::RequestResponse, 0, false);
        assert!(responder.send_request_n(1).is_err());
        assert!(responder.send_cancel().is_err());
        assert!(responder.on_frame(&next("x", false)).is_err());
    }
}
