//! The connection task.
//!
//! One task owns the [`Connection`] and serialises everything that touches
//! it: frames from the reader task, commands from the [`RSocket`] handle,
//! stream senders and handlers, and keepalive ticks. After each input it
//! routes the resulting events and flushes encoded frames to the writer.
//!
//! [`RSocket`]: super::RSocket

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::{mpsc, oneshot, watch, Semaphore};
use tokio::task::JoinHandle;
use tokio::time::{Instant, Interval, MissedTickBehavior};
use tracing::{debug, error, trace, warn};

use crate::codec::DataCodec;
use crate::connection::{Connection, Event};
use crate::error::{RSocketError, Result};
use crate::handler::{Handler, InboundRequest, PayloadStream, RequestContext, StreamSender};
use crate::protocol::{ErrorCode, FrameBuffer, Payload};
use crate::stream::InteractionKind;
use crate::writer::{OutboundFrame, WriterHandle};

/// Transport read buffer size.
const READ_BUFFER_SIZE: usize = 64 * 1024;

/// Decoded transport frames waiting for the connection task.
pub(crate) const FRAME_CHANNEL_CAPACITY: usize = 256;

pub(crate) type CommandSender = mpsc::UnboundedSender<Command>;
pub(crate) type Reply<T> = oneshot::Sender<Result<T>>;

/// Operation on a live stream.
#[derive(Debug)]
pub(crate) enum StreamOp {
    Next { payload: Payload, complete: bool },
    Complete,
    Error { code: ErrorCode, message: String },
    Cancel,
    RequestN(u32),
}

/// Where the values of a requested stream go.
#[derive(Debug)]
pub(crate) enum Sink {
    /// Request-response: the single answer, `None` for an empty completion.
    Response(Reply<Option<Payload>>),
    /// Request-stream and the inbound half of a channel.
    Values(mpsc::UnboundedSender<Result<Payload>>),
}

#[derive(Debug)]
pub(crate) enum Command {
    Request {
        kind: InteractionKind,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
        sink: Option<Sink>,
        reply: Reply<u32>,
    },
    Stream {
        stream_id: u32,
        op: StreamOp,
        reply: Option<Reply<()>>,
    },
    MetadataPush {
        metadata: Bytes,
        reply: Reply<()>,
    },
    Close {
        message: String,
    },
}

/// A stream the peer opened and a handler is serving.
struct ResponderSlot {
    /// Dropping or setting this tells the handler the stream is gone.
    cancel: watch::Sender<bool>,
    /// Further channel values from the requester.
    inbound: Option<mpsc::UnboundedSender<Result<Payload>>>,
}

#[derive(Debug, Clone, Copy)]
pub(crate) struct Keepalive {
    pub interval: Duration,
    pub max_lifetime: Duration,
    /// Whether this side sends KEEPALIVE (the client does).
    pub send: bool,
}

pub(crate) struct Driver {
    connection: Connection,
    writer: WriterHandle,
    commands: CommandSender,
    handler: Option<Arc<dyn Handler>>,
    semaphore: Arc<Semaphore>,
    codec: Option<DataCodec>,
    keepalive: Option<Keepalive>,
    last_received: Instant,
    sinks: HashMap<u32, Sink>,
    responders: HashMap<u32, ResponderSlot>,
    closed: watch::Sender<bool>,
}

impl Driver {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        connection: Connection,
        writer: WriterHandle,
        commands: CommandSender,
        handler: Option<Arc<dyn Handler>>,
        max_concurrent_handlers: usize,
        codec: Option<DataCodec>,
        keepalive: Option<Keepalive>,
        closed: watch::Sender<bool>,
    ) -> Self {
        Self {
            connection,
            writer,
            commands,
            handler,
            semaphore: Arc::new(Semaphore::new(max_concurrent_handlers)),
            codec,
            keepalive,
            last_received: Instant::now(),
            sinks: HashMap::new(),
            responders: HashMap::new(),
            closed,
        }
    }

    /// Run until the connection closes.
    pub(crate) async fn run(
        mut self,
        mut frames: mpsc::Receiver<Result<Bytes>>,
        mut commands: mpsc::UnboundedReceiver<Command>,
        reader: JoinHandle<()>,
    ) -> Result<()> {
        let mut ticker = self.keepalive.map(|ka| keepalive_ticker(ka.interval));

        let result = loop {
            tokio::select! {
                incoming = frames.recv() => self.on_transport(incoming),
                Some(command) = commands.recv() => self.on_command(command),
                _ = next_tick(&mut ticker) => self.on_keepalive_tick(),
            }

            self.route_events();
            if ticker.is_none() {
                ticker = self.keepalive.map(|ka| keepalive_ticker(ka.interval));
            }

            if let Err(err) = self.flush().await {
                error!(error = %err, "write failed");
                self.connection.transport_closed();
                self.route_events();
                break Err(err);
            }
            if self.connection.is_closed() {
                break Ok(());
            }
        };

        reader.abort();
        let _ = self.closed.send(true);
        debug!("connection task finished");
        result
    }

    fn on_transport(&mut self, incoming: Option<Result<Bytes>>) {
        match incoming {
            Some(Ok(bytes)) => {
                self.last_received = Instant::now();
                if let Err(err) = self.connection.receive(bytes) {
                    debug!(error = %err, "connection failed on inbound frame");
                }
            }
            Some(Err(RSocketError::Io(err))) => {
                error!(error = %err, "transport read failed");
                self.connection.transport_closed();
            }
            Some(Err(err)) => {
                error!(error = %err, "undecodable transport data");
                self.connection
                    .abort(ErrorCode::CONNECTION_ERROR, err.to_string());
            }
            None => {
                debug!("transport closed by peer");
                self.connection.transport_closed();
            }
        }
    }

    fn on_keepalive_tick(&mut self) {
        let Some(keepalive) = self.keepalive else {
            return;
        };
        if self.last_received.elapsed() > keepalive.max_lifetime {
            warn!(
                max_lifetime_ms = keepalive.max_lifetime.as_millis() as u64,
                "no frame received within max lifetime"
            );
            self.connection.abort(
                ErrorCode::CONNECTION_ERROR,
                "no frame received within max lifetime",
            );
            return;
        }
        if keepalive.send {
            if let Err(err) = self.connection.keepalive(Bytes::new()) {
                trace!(error = %err, "keepalive not sent");
            }
        }
    }

    fn on_command(&mut self, command: Command) {
        match command {
            Command::Request {
                kind,
                payload,
                initial_request_n,
                complete,
                sink,
                reply,
            } => {
                let opened = match kind {
                    InteractionKind::FireAndForget => self.connection.request_fnf(payload),
                    InteractionKind::RequestResponse => self.connection.request_response(payload),
                    InteractionKind::RequestStream => {
                        self.connection.request_stream(payload, initial_request_n)
                    }
                    InteractionKind::RequestChannel => {
                        self.connection
                            .request_channel(payload, initial_request_n, complete)
                    }
                };
                if let (Ok(stream_id), Some(sink)) = (&opened, sink) {
                    self.sinks.insert(*stream_id, sink);
                }
                let _ = reply.send(opened);
            }
            Command::Stream {
                stream_id,
                op,
                reply,
            } => {
                let result = self.on_stream_op(stream_id, op);
                match reply {
                    Some(reply) => {
                        let _ = reply.send(result);
                    }
                    None => {
                        if let Err(err) = result {
                            trace!(stream_id, error = %err, "stream operation dropped");
                        }
                    }
                }
            }
            Command::MetadataPush { metadata, reply } => {
                let _ = reply.send(self.connection.metadata_push(metadata));
            }
            Command::Close { message } => {
                debug!(message = %message, "closing connection");
                self.connection.close(message);
            }
        }
    }

    fn on_stream_op(&mut self, stream_id: u32, op: StreamOp) -> Result<()> {
        let terminates = matches!(op, StreamOp::Error { .. } | StreamOp::Cancel);
        let result = match op {
            StreamOp::Next { payload, complete } => {
                self.connection.send_next(stream_id, payload, complete)
            }
            StreamOp::Complete => self.connection.send_complete(stream_id),
            StreamOp::Error { code, message } => {
                self.connection.send_error(stream_id, code, message)
            }
            StreamOp::Cancel => self.connection.send_cancel(stream_id),
            StreamOp::RequestN(n) => self.connection.send_request_n(stream_id, n),
        };
        if terminates && result.is_ok() {
            self.sinks.remove(&stream_id);
            if let Some(slot) = self.responders.get_mut(&stream_id) {
                slot.inbound = None;
            }
        }
        self.prune_responder(stream_id);
        result
    }

    /// Forget a responder stream the connection no longer tracks.
    fn prune_responder(&mut self, stream_id: u32) {
        if self.connection.stream_state(stream_id).is_none() {
            self.responders.remove(&stream_id);
        }
    }

    fn route_events(&mut self) {
        while let Some(event) = self.connection.poll_event() {
            match event {
                Event::Setup {
                    keepalive_interval,
                    max_lifetime,
                    data_mime_type,
                    metadata_mime_type,
                    ..
                } => {
                    debug!(
                        data_mime_type = %data_mime_type,
                        metadata_mime_type = %metadata_mime_type,
                        "peer setup accepted"
                    );
                    self.codec = DataCodec::from_mime_type(&data_mime_type);
                    self.keepalive = Some(Keepalive {
                        interval: keepalive_interval,
                        max_lifetime,
                        send: false,
                    });
                }
                Event::Request {
                    stream_id,
                    kind,
                    initial_request_n,
                    payload,
                    complete,
                } => self.dispatch_request(stream_id, kind, initial_request_n, payload, complete),
                Event::Next {
                    stream_id,
                    payload,
                    complete,
                } => self.on_next(stream_id, payload, complete),
                Event::Complete { stream_id } => self.on_complete(stream_id),
                Event::RequestN { stream_id, n } => {
                    trace!(stream_id, n, "peer granted credit");
                }
                Event::Cancelled { stream_id } => {
                    debug!(stream_id, "peer cancelled");
                    if let Some(slot) = self.responders.remove(&stream_id) {
                        let _ = slot.cancel.send(true);
                    }
                }
                Event::StreamError {
                    stream_id,
                    code,
                    message,
                } => self.on_stream_error(stream_id, code, message),
                Event::MetadataPush { metadata } => match &self.handler {
                    Some(handler) => handler.metadata_push(metadata),
                    None => trace!("metadata push ignored"),
                },
                Event::Lease {
                    ttl,
                    number_of_requests,
                    ..
                } => {
                    debug!(ttl_ms = ttl.as_millis() as u64, number_of_requests, "lease received");
                }
                Event::Closed { code, message } => self.on_closed(code, message),
            }
            self.prune_closed_responders();
        }
    }

    fn prune_closed_responders(&mut self) {
        let connection = &self.connection;
        self.responders
            .retain(|stream_id, _| connection.stream_state(*stream_id).is_some());
    }

    fn dispatch_request(
        &mut self,
        stream_id: u32,
        kind: InteractionKind,
        initial_request_n: u32,
        payload: Payload,
        complete: bool,
    ) {
        let answers = kind != InteractionKind::FireAndForget;

        let Some(handler) = self.handler.clone() else {
            warn!(stream_id, %kind, "request rejected: no handler");
            if answers {
                let _ = self
                    .connection
                    .send_error(stream_id, ErrorCode::REJECTED, "no handler");
            }
            return;
        };

        let permit = match self.semaphore.clone().try_acquire_owned() {
            Ok(p) => p,
            Err(_) => {
                warn!(stream_id, %kind, "handler capacity reached, rejecting request");
                if answers {
                    let _ = self.connection.send_error(
                        stream_id,
                        ErrorCode::REJECTED,
                        "handler capacity reached",
                    );
                }
                return;
            }
        };

        let (cancel, cancelled) = watch::channel(false);
        let sender = StreamSender::new(stream_id, self.commands.clone());

        let mut inbound_tx = None;
        let inbound = if kind == InteractionKind::RequestChannel && !complete {
            let (tx, rx) = mpsc::unbounded_channel();
            inbound_tx = Some(tx);
            Some(PayloadStream::new(rx, sender.clone(), false))
        } else {
            None
        };

        // A fire-and-forget stream is already over; its handler keeps the
        // signal alive itself so the context does not read as cancelled.
        let held_cancel = if answers {
            self.responders.insert(
                stream_id,
                ResponderSlot {
                    cancel,
                    inbound: inbound_tx,
                },
            );
            None
        } else {
            Some(cancel)
        };

        let ctx = RequestContext::new(sender, kind, self.codec, cancelled);
        let request = InboundRequest {
            stream_id,
            kind,
            initial_request_n,
            payload,
            inbound,
        };
        let commands = self.commands.clone();

        trace!(stream_id, %kind, "dispatching request");
        tokio::spawn(async move {
            // Permit is held until this task completes
            let _permit = permit;
            let _held_cancel = held_cancel;

            if let Err(err) = handler.call(request, ctx).await {
                error!(stream_id, %kind, error = %err, "handler failed");
                if answers {
                    let (code, message) = match err {
                        RSocketError::Stream { code, message } => (code, message),
                        other => (ErrorCode::APPLICATION_ERROR, other.to_string()),
                    };
                    let _ = commands.send(Command::Stream {
                        stream_id,
                        op: StreamOp::Error { code, message },
                        reply: None,
                    });
                }
            }
        });
    }

    fn on_next(&mut self, stream_id: u32, payload: Payload, complete: bool) {
        match self.sinks.remove(&stream_id) {
            Some(Sink::Response(reply)) => {
                let _ = reply.send(Ok(Some(payload)));
            }
            Some(Sink::Values(values)) => {
                let delivered = values.send(Ok(payload)).is_ok();
                if !complete && delivered {
                    self.sinks.insert(stream_id, Sink::Values(values));
                }
            }
            None => {
                if let Some(slot) = self.responders.get_mut(&stream_id) {
                    if let Some(inbound) = &slot.inbound {
                        let _ = inbound.send(Ok(payload));
                    }
                    if complete {
                        slot.inbound = None;
                    }
                } else {
                    trace!(stream_id, "value without consumer dropped");
                }
            }
        }
    }

    fn on_complete(&mut self, stream_id: u32) {
        match self.sinks.remove(&stream_id) {
            Some(Sink::Response(reply)) => {
                let _ = reply.send(Ok(None));
            }
            Some(Sink::Values(_)) => {}
            None => {
                if let Some(slot) = self.responders.get_mut(&stream_id) {
                    slot.inbound = None;
                }
            }
        }
    }

    fn on_stream_error(&mut self, stream_id: u32, code: ErrorCode, message: String) {
        debug!(stream_id, %code, message = %message, "stream error");
        let err = RSocketError::Stream { code, message };
        match self.sinks.remove(&stream_id) {
            Some(Sink::Response(reply)) => {
                let _ = reply.send(Err(err));
            }
            Some(Sink::Values(values)) => {
                let _ = values.send(Err(err));
            }
            None => {
                if let Some(slot) = self.responders.remove(&stream_id) {
                    if let Some(inbound) = slot.inbound {
                        let _ = inbound.send(Err(err));
                    }
                    let _ = slot.cancel.send(true);
                }
            }
        }
    }

    fn on_closed(&mut self, code: ErrorCode, message: String) {
        debug!(%code, message = %message, streams = self.sinks.len() + self.responders.len(), "terminating streams");
        let error = || {
            if code == ErrorCode::CONNECTION_CLOSE {
                RSocketError::ConnectionClosed
            } else {
                RSocketError::Connection {
                    code,
                    message: message.clone(),
                }
            }
        };
        for (_, sink) in self.sinks.drain() {
            match sink {
                Sink::Response(reply) => {
                    let _ = reply.send(Err(error()));
                }
                Sink::Values(values) => {
                    let _ = values.send(Err(error()));
                }
            }
        }
        for (_, slot) in self.responders.drain() {
            if let Some(inbound) = slot.inbound {
                let _ = inbound.send(Err(error()));
            }
            let _ = slot.cancel.send(true);
        }
    }

    /// Hand every queued frame to the writer.
    async fn flush(&mut self) -> Result<()> {
        while let Some(frame) = self.connection.poll_transmit() {
            self.writer.send(OutboundFrame::new(frame)?).await?;
        }
        Ok(())
    }
}

fn keepalive_ticker(period: Duration) -> Interval {
    let period = period.max(Duration::from_millis(1));
    let mut ticker = tokio::time::interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    ticker
}

async fn next_tick(ticker: &mut Option<Interval>) {
    match ticker {
        Some(ticker) => {
            ticker.tick().await;
        }
        None => std::future::pending().await,
    }
}

/// Read the transport, split it into frames and pass them on.
pub(crate) async fn read_loop<R>(
    mut reader: R,
    frames: mpsc::Sender<Result<Bytes>>,
    max_frame_length: usize,
) where
    R: AsyncRead + Unpin,
{
    let mut frame_buffer = FrameBuffer::with_max_frame_length(max_frame_length);
    let mut buf = vec![0u8; READ_BUFFER_SIZE];

    loop {
        let n = match reader.read(&mut buf).await {
            Ok(0) => return,
            Ok(n) => n,
            Err(e) => {
                let _ = frames.send(Err(RSocketError::Io(e))).await;
                return;
            }
        };

        match frame_buffer.push(&buf[..n]) {
            Ok(batch) => {
                for frame in batch {
                    if frames.send(Ok(frame)).await.is_err() {
                        return;
                    }
                }
            }
            Err(err) => {
                let _ = frames.send(Err(err)).await;
                return;
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{encode_length_prefixed, Frame, MAX_U24};
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_read_loop_splits_frames() {
        let (mut client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        let reader = tokio::spawn(read_loop(server, tx, MAX_U24));

        let mut wire = encode_length_prefixed(&Frame::cancel(1)).unwrap().to_vec();
        wire.extend_from_slice(&encode_length_prefixed(&Frame::request_n(3, 2)).unwrap());
        client.write_all(&wire).await.unwrap();
        drop(client);

        let first = rx.recv().await.unwrap().unwrap();
        assert_eq!(Frame::decode(first).unwrap(), Frame::cancel(1));
        let second = rx.recv().await.unwrap().unwrap();
        assert_eq!(Frame::decode(second).unwrap(), Frame::request_n(3, 2));
        assert!(rx.recv().await.is_none());
        reader.await.unwrap();
    }

    #[tokio::test]
    async fn test_read_loop_reports_oversized_frame() {
        let (mut client, server) = tokio::io::duplex(64);
        let (tx, mut rx) = mpsc::channel(8);
        tokio::spawn(read_loop(server, tx, 16));

        client.write_all(&[0x00, 0x01, 0x00]).await.unwrap();

        assert!(matches!(rx.recv().await, Some(Err(_))));
    }

    #[tokio::test(start_paused = true)]
    async fn test_keepalive_ticker_starts_after_period() {
        let mut ticker = Some(keepalive_ticker(Duration::from_secs(5)));
        let start = Instant::now();
        next_tick(&mut ticker).await;
        assert!(start.elapsed() >= Duration::from_secs(5));
    }
}
