//! Async driver: builder and requester handle.
//!
//! The [`RSocketBuilder`] provides a fluent API for configuring the
//! connection and the responder [`Handler`]. Connecting spawns three tasks
//! on the current tokio runtime:
//! 1. a reader task splitting the transport into frames
//! 2. the connection task owning the protocol state
//! 3. a writer task batching length-prefixed frames onto the transport
//!
//! The returned [`RSocket`] is the requester side.
//!
//! # Example
//!
//! ```no_run
//! use rsocket_wire::protocol::Payload;
//! use rsocket_wire::RSocket;
//!
//! # async fn run() -> rsocket_wire::error::Result<()> {
//! let transport = tokio::net::TcpStream::connect("127.0.0.1:7878").await?;
//! let rsocket = RSocket::client().connect(transport)?;
//!
//! let answer = rsocket.request_response(Payload::from_data("ping")).await?;
//! println!("{:?}", answer);
//!
//! let mut stream = rsocket
//!     .request_stream(Payload::from_data("ticks"), 16)
//!     .await?;
//! while let Some(tick) = stream.next().await {
//!     println!("{:?}", tick?);
//! }
//! rsocket.close("done");
//! # Ok(())
//! # }
//! ```

mod driver;

pub(crate) use driver::{Command, CommandSender, StreamOp};

use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::io::{AsyncRead, AsyncWrite};
use tokio::sync::{mpsc, oneshot, watch};

use crate::codec::DataCodec;
use crate::connection::{Connection, ConnectionConfig, SetupConfig, Side};
use crate::error::{RSocketError, Result};
use crate::handler::{Handler, PayloadStream, StreamSender};
use crate::protocol::{Payload, MAX_U24};
use crate::stream::InteractionKind;
use crate::writer::{spawn_writer_task, WriterConfig};

use driver::{read_loop, Driver, Keepalive, Sink, FRAME_CHANNEL_CAPACITY};

/// Default maximum concurrent handlers.
pub const DEFAULT_MAX_CONCURRENT_HANDLERS: usize = 256;

/// Builder for one side of a connection.
pub struct RSocketBuilder {
    connection: ConnectionConfig,
    setup: SetupConfig,
    writer_config: WriterConfig,
    handler: Option<Arc<dyn Handler>>,
    max_concurrent_handlers: usize,
}

impl RSocketBuilder {
    fn new(connection: ConnectionConfig) -> Self {
        Self {
            connection,
            setup: SetupConfig::default(),
            writer_config: WriterConfig::default(),
            handler: None,
            max_concurrent_handlers: DEFAULT_MAX_CONCURRENT_HANDLERS,
        }
    }

    /// Answer requests the peer opens. Without a handler they are
    /// rejected.
    pub fn handler(mut self, handler: impl Handler) -> Self {
        self.handler = Some(Arc::new(handler));
        self
    }

    /// Set the maximum number of concurrent handlers.
    ///
    /// Requests beyond the limit are rejected with REJECTED.
    /// Default: 256
    pub fn max_concurrent_handlers(mut self, limit: usize) -> Self {
        self.max_concurrent_handlers = limit;
        self
    }

    /// Replace the whole SETUP configuration (client only).
    pub fn setup(mut self, setup: SetupConfig) -> Self {
        self.setup = setup;
        self
    }

    /// Keepalive interval and max lifetime announced in SETUP.
    pub fn keepalive(mut self, interval: Duration, max_lifetime: Duration) -> Self {
        self.setup.keepalive_interval = interval;
        self.setup.max_lifetime = max_lifetime;
        self
    }

    pub fn data_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.setup.data_mime_type = mime_type.into();
        self
    }

    pub fn metadata_mime_type(mut self, mime_type: impl Into<String>) -> Self {
        self.setup.metadata_mime_type = mime_type.into();
        self
    }

    pub fn setup_payload(mut self, payload: Payload) -> Self {
        self.setup.payload = payload;
        self
    }

    /// Fragment payloads above this size. 0 disables fragmentation.
    pub fn max_frame_size(mut self, size: usize) -> Self {
        self.connection.max_frame_size = size;
        self
    }

    /// Largest payload accepted through reassembly.
    pub fn max_reassembly_size(mut self, size: usize) -> Self {
        self.connection.max_reassembly_size = size;
        self
    }

    /// Set the maximum pending frames for backpressure.
    ///
    /// Default: 1024
    pub fn max_pending_frames(mut self, limit: usize) -> Self {
        self.writer_config.max_pending_frames = limit;
        self
    }

    /// Set the writer channel capacity.
    ///
    /// Default: 1024
    pub fn channel_capacity(mut self, capacity: usize) -> Self {
        self.writer_config.channel_capacity = capacity;
        self
    }

    /// Set the backpressure timeout.
    ///
    /// Default: 5 seconds
    pub fn backpressure_timeout(mut self, timeout: Duration) -> Self {
        self.writer_config.backpressure_timeout = timeout;
        self
    }

    /// Start over a bidirectional transport.
    ///
    /// Must be called within a tokio runtime.
    pub fn connect<T>(self, transport: T) -> Result<RSocket>
    where
        T: AsyncRead + AsyncWrite + Send + 'static,
    {
        let (reader, writer) = tokio::io::split(transport);
        self.connect_split(reader, writer)
    }

    /// Start over separate read and write halves.
    pub fn connect_split<R, W>(self, reader: R, writer: W) -> Result<RSocket>
    where
        R: AsyncRead + Unpin + Send + 'static,
        W: AsyncWrite + Unpin + Send + 'static,
    {
        let mut connection = Connection::new(self.connection);
        let (codec, keepalive) = match connection.side() {
            Side::Client => {
                connection.connect(self.setup.clone())?;
                (
                    DataCodec::from_mime_type(&self.setup.data_mime_type),
                    Some(Keepalive {
                        interval: self.setup.keepalive_interval,
                        max_lifetime: self.setup.max_lifetime,
                        send: true,
                    }),
                )
            }
            // learned from the peer's SETUP
            Side::Server => (None, None),
        };

        let (writer, writer_task) = spawn_writer_task(writer, self.writer_config);
        let (frames_tx, frames_rx) = mpsc::channel(FRAME_CHANNEL_CAPACITY);
        let reader_task = tokio::spawn(read_loop(reader, frames_tx, MAX_U24));
        let (commands_tx, commands_rx) = mpsc::unbounded_channel();
        let (closed_tx, closed_rx) = watch::channel(false);

        let driver = Driver::new(
            connection,
            writer,
            commands_tx.clone(),
            self.handler,
            self.max_concurrent_handlers,
            codec,
            keepalive,
            closed_tx,
        );
        tokio::spawn(async move {
            let result = driver.run(frames_rx, commands_rx, reader_task).await;
            if let Err(e) = &result {
                tracing::error!("Connection task error: {}", e);
            }
            // Writer drains what the driver queued before it exits
            match writer_task.await {
                Ok(Err(e)) => tracing::debug!("Writer task error: {}", e),
                Err(e) => tracing::debug!("Writer task panicked: {}", e),
                Ok(Ok(())) => {}
            }
            result
        });

        Ok(RSocket {
            shared: Arc::new(Shared {
                commands: commands_tx,
            }),
            codec,
            closed: closed_rx,
        })
    }
}

/// Closes the connection once the last handle is dropped.
struct Shared {
    commands: CommandSender,
}

impl Drop for Shared {
    fn drop(&mut self) {
        let _ = self.commands.send(Command::Close {
            message: "requester dropped".to_string(),
        });
    }
}

/// Requester handle of a running connection. Cheap to clone.
///
/// The connection closes when [`close`](Self::close) is called, the peer
/// closes it, or the last handle is dropped.
#[derive(Clone)]
pub struct RSocket {
    shared: Arc<Shared>,
    /// Client: from its own SETUP. Server: not known up front.
    codec: Option<DataCodec>,
    closed: watch::Receiver<bool>,
}

impl RSocket {
    /// Builder for the client side: sends SETUP, allocates odd stream IDs.
    pub fn client() -> RSocketBuilder {
        RSocketBuilder::new(ConnectionConfig::client())
    }

    /// Builder for the server side: expects SETUP, allocates even IDs.
    pub fn server() -> RSocketBuilder {
        RSocketBuilder::new(ConnectionConfig::server())
    }

    /// Send REQUEST_FNF. Resolves once the request is queued.
    pub async fn fire_and_forget(&self, payload: Payload) -> Result<()> {
        self.open(InteractionKind::FireAndForget, payload, 0, false, None)
            .await
            .map(|_| ())
    }

    /// Send REQUEST_RESPONSE and wait for the answer. `None` means the
    /// responder completed without a value.
    ///
    /// Dropping the returned future before it resolves cancels the request.
    pub async fn request_response(&self, payload: Payload) -> Result<Option<Payload>> {
        let (tx, rx) = oneshot::channel();
        let stream_id = self
            .open(
                InteractionKind::RequestResponse,
                payload,
                0,
                false,
                Some(Sink::Response(tx)),
            )
            .await?;

        let mut guard = CancelOnDrop {
            sender: StreamSender::new(stream_id, self.shared.commands.clone()),
            armed: true,
        };
        let answer = rx.await.map_err(|_| RSocketError::ConnectionClosed);
        guard.armed = false;
        answer?
    }

    /// Send REQUEST_STREAM granting `initial_request_n` values.
    pub async fn request_stream(
        &self,
        payload: Payload,
        initial_request_n: u32,
    ) -> Result<PayloadStream> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream_id = self
            .open(
                InteractionKind::RequestStream,
                payload,
                initial_request_n,
                false,
                Some(Sink::Values(tx)),
            )
            .await?;
        let sender = StreamSender::new(stream_id, self.shared.commands.clone());
        Ok(PayloadStream::new(rx, sender, true))
    }

    /// Send REQUEST_CHANNEL. The sender carries further values to the
    /// responder; `complete` closes that side with the request itself.
    pub async fn request_channel(
        &self,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
    ) -> Result<(StreamSender, PayloadStream)> {
        let (tx, rx) = mpsc::unbounded_channel();
        let stream_id = self
            .open(
                InteractionKind::RequestChannel,
                payload,
                initial_request_n,
                complete,
                Some(Sink::Values(tx)),
            )
            .await?;
        let sender = StreamSender::new(stream_id, self.shared.commands.clone());
        Ok((sender.clone(), PayloadStream::new(rx, sender, true)))
    }

    /// Request-response with values encoded by the connection codec.
    pub async fn request_response_value<Req, Resp>(&self, request: &Req) -> Result<Option<Resp>>
    where
        Req: Serialize,
        Resp: DeserializeOwned,
    {
        let codec = self.codec.ok_or_else(|| {
            RSocketError::InvalidMimeType("no codec for the connection's data mime type".into())
        })?;
        let answer = self.request_response(codec.encode_payload(request)?).await?;
        answer.map(|payload| codec.decode_payload(&payload)).transpose()
    }

    /// Send METADATA_PUSH.
    pub async fn metadata_push(&self, metadata: Bytes) -> Result<()> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::MetadataPush { metadata, reply })?;
        outcome.await.map_err(|_| RSocketError::ConnectionClosed)?
    }

    /// Close the connection with CONNECTION_CLOSE.
    pub fn close(&self, message: impl Into<String>) {
        let _ = self.send(Command::Close {
            message: message.into(),
        });
    }

    pub fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    /// Wait until the connection is closed.
    pub async fn closed(&self) {
        let mut closed = self.closed.clone();
        let _ = closed.wait_for(|c| *c).await;
    }

    /// Codec of the data mime type this side announced, if any.
    pub fn codec(&self) -> Option<DataCodec> {
        self.codec
    }

    async fn open(
        &self,
        kind: InteractionKind,
        payload: Payload,
        initial_request_n: u32,
        complete: bool,
        sink: Option<Sink>,
    ) -> Result<u32> {
        let (reply, outcome) = oneshot::channel();
        self.send(Command::Request {
            kind,
            payload,
            initial_request_n,
            complete,
            sink,
            reply,
        })?;
        outcome.await.map_err(|_| RSocketError::ConnectionClosed)?
    }

    fn send(&self, command: Command) -> Result<()> {
        self.shared
            .commands
            .send(command)
            .map_err(|_| RSocketError::ConnectionClosed)
    }
}

impl std::fmt::Debug for RSocket {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RSocket")
            .field("codec", &self.codec)
            .field("closed", &self.is_closed())
            .finish()
    }
}

struct CancelOnDrop {
    sender: StreamSender,
    armed: bool,
}

impl Drop for CancelOnDrop {
    fn drop(&mut self) {
        if self.armed {
            self.sender.cancel_detached();
        }
    }
}
