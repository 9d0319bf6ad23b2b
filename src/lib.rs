//! # rsocket-wire
//!
//! Wire engine for the RSocket protocol: the binary frame codec, composite
//! metadata, fragmentation and reassembly, stream multiplexing and the
//! per-stream state machine.
//!
//! ## Architecture
//!
//! - **Codec layer** ([`protocol`], [`metadata`]): frames and metadata
//!   entries to and from bytes
//! - **Protocol core** ([`fragment`], [`stream`], [`connection`]): a
//!   sans-IO [`Connection`] fed with frames and polled for frames and
//!   events
//! - **Async driver** ([`RSocket`], [`handler`], [`writer`]): tokio tasks
//!   around the core for any `AsyncRead + AsyncWrite` transport
//!
//! ## Example
//!
//! ```no_run
//! use rsocket_wire::handler::{InboundRequest, RequestContext};
//! use rsocket_wire::protocol::Payload;
//! use rsocket_wire::RSocket;
//!
//! # async fn run() -> rsocket_wire::error::Result<()> {
//! let (client_io, server_io) = tokio::io::duplex(64 * 1024);
//!
//! let _server = RSocket::server()
//!     .handler(|request: InboundRequest, ctx: RequestContext| async move {
//!         ctx.respond(request.payload).await
//!     })
//!     .connect(server_io)?;
//! let client = RSocket::client().connect(client_io)?;
//!
//! let echo = client.request_response(Payload::from_data("hello")).await?;
//! assert_eq!(echo.unwrap().data().as_ref(), b"hello");
//! # Ok(())
//! # }
//! ```

pub mod codec;
pub mod connection;
pub mod error;
pub mod fragment;
pub mod handler;
pub mod metadata;
pub mod protocol;
pub mod stream;
pub mod writer;

mod backpressure;
mod rsocket;

pub use connection::{Connection, ConnectionConfig, Event, SetupConfig};
pub use error::RSocketError;
pub use handler::{Handler, InboundRequest, PayloadStream, RequestContext};
pub use protocol::{Frame, Payload};
pub use rsocket::{RSocket, RSocketBuilder, DEFAULT_MAX_CONCURRENT_HANDLERS};
