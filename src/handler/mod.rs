//! Handler module - the responder side of the async API.
//!
//! Provides:
//! - [`Handler`] - answers requests the peer opens; any
//!   `Fn(InboundRequest, RequestContext) -> impl Future` is a handler
//! - [`TypedHandler`] - decodes the request data with the connection's
//!   data codec before calling a closure
//! - [`RequestContext`] - sends values, completion or an error back and
//!   observes cancellation
//! - [`PayloadStream`] - values arriving on a stream
//!
//! # Example
//!
//! ```no_run
//! use rsocket_wire::handler::{InboundRequest, RequestContext};
//! use rsocket_wire::stream::InteractionKind;
//! use rsocket_wire::RSocket;
//!
//! # async fn run(transport: tokio::net::TcpStream) -> rsocket_wire::error::Result<()> {
//! let rsocket = RSocket::server()
//!     .handler(|request: InboundRequest, ctx: RequestContext| async move {
//!         match request.kind {
//!             InteractionKind::RequestResponse => ctx.respond(request.payload).await,
//!             InteractionKind::RequestStream => {
//!                 for _ in 0..3 {
//!                     ctx.next(request.payload.clone()).await?;
//!                 }
//!                 ctx.complete().await
//!             }
//!             _ => Ok(()),
//!         }
//!     })
//!     .connect(transport)?;
//! rsocket.closed().await;
//! # Ok(())
//! # }
//! ```

mod context;
mod stream;

pub use context::{RequestContext, StreamSender};
pub use stream::PayloadStream;

use std::future::Future;
use std::marker::PhantomData;
use std::pin::Pin;

use bytes::Bytes;
use serde::de::DeserializeOwned;

use crate::error::Result;
use crate::protocol::Payload;
use crate::stream::InteractionKind;

/// Result type for handler functions.
pub type HandlerResult = Result<()>;

/// Boxed future for handler results.
pub type BoxFuture<'a, T> = Pin<Box<dyn Future<Output = T> + Send + 'a>>;

/// A request the peer opened.
#[derive(Debug)]
pub struct InboundRequest {
    pub stream_id: u32,
    pub kind: InteractionKind,
    /// Values the requester is ready to receive (stream and channel).
    pub initial_request_n: u32,
    /// The (reassembled) request payload.
    pub payload: Payload,
    /// Further values of a channel, unless the requester completed its side
    /// with the request.
    pub inbound: Option<PayloadStream>,
}

/// Answers requests the peer opens.
///
/// Returning `Err` terminates the stream with an ERROR frame: the code of
/// an [`RSocketError::Stream`](crate::error::RSocketError::Stream) error,
/// APPLICATION_ERROR otherwise. Returning `Ok` does not complete the
/// stream; handlers finish it through the context.
pub trait Handler: Send + Sync + 'static {
    fn call(&self, request: InboundRequest, ctx: RequestContext) -> BoxFuture<'static, HandlerResult>;

    /// METADATA_PUSH from the peer. Ignored by default.
    fn metadata_push(&self, _metadata: Bytes) {}
}

impl<F, Fut> Handler for F
where
    F: Fn(InboundRequest, RequestContext) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: InboundRequest, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        Box::pin((self)(request, ctx))
    }
}

/// Wrapper that decodes the request data before calling the handler.
///
/// Decoding uses the codec of the SETUP data mime type; a request that
/// fails to decode is answered with ERROR. Channel values after the
/// request payload are not delivered.
pub struct TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    handler: F,
    _phantom: PhantomData<fn(T) -> Fut>,
}

impl<F, T, Fut> TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    pub fn new(handler: F) -> Self {
        Self {
            handler,
            _phantom: PhantomData,
        }
    }
}

impl<F, T, Fut> Handler for TypedHandler<F, T, Fut>
where
    F: Fn(T, RequestContext) -> Fut + Send + Sync + 'static,
    T: DeserializeOwned + Send + 'static,
    Fut: Future<Output = HandlerResult> + Send + 'static,
{
    fn call(&self, request: InboundRequest, ctx: RequestContext) -> BoxFuture<'static, HandlerResult> {
        let parsed: T = match ctx.decode(&request.payload) {
            Ok(v) => v,
            Err(e) => return Box::pin(async move { Err(e) }),
        };

        Box::pin((self.handler)(parsed, ctx))
    }
}
