//! Request context for handlers.
//!
//! [`StreamSender`] is the sending half of one stream: values, completion,
//! ERROR and REQUEST_N are handed to the connection task, which applies
//! flow control and writes them. [`RequestContext`] wraps it for the
//! responder side together with cancellation and the connection's data
//! codec.
//!
//! # Example
//!
//! ```ignore
//! async fn ticker(request: InboundRequest, ctx: RequestContext) -> Result<()> {
//!     let mut seq = 0u64;
//!     while !ctx.is_cancelled() && seq < 10 {
//!         ctx.next_value(&seq).await?;
//!         seq += 1;
//!     }
//!     ctx.complete().await
//! }
//! ```

use serde::de::DeserializeOwned;
use serde::Serialize;
use tokio::sync::{oneshot, watch};

use crate::codec::DataCodec;
use crate::error::{RSocketError, Result};
use crate::protocol::{ErrorCode, Payload};
use crate::rsocket::{Command, CommandSender, StreamOp};
use crate::stream::InteractionKind;

/// Sending half of a stream.
///
/// Cheap to clone. Every operation resolves once the connection task has
/// accepted it; values are written when the peer has credit for them.
#[derive(Debug, Clone)]
pub struct StreamSender {
    stream_id: u32,
    /// `None` for detached senders (testing mode).
    commands: Option<CommandSender>,
}

impl StreamSender {
    pub(crate) fn new(stream_id: u32, commands: CommandSender) -> Self {
        Self {
            stream_id,
            commands: Some(commands),
        }
    }

    /// A sender not attached to any connection; every operation succeeds
    /// without effect.
    pub fn detached(stream_id: u32) -> Self {
        Self {
            stream_id,
            commands: None,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.stream_id
    }

    /// Send a value.
    pub async fn next(&self, payload: Payload) -> Result<()> {
        self.send(StreamOp::Next {
            payload,
            complete: false,
        })
        .await
    }

    /// Send a value that also completes this side.
    pub async fn respond(&self, payload: Payload) -> Result<()> {
        self.send(StreamOp::Next {
            payload,
            complete: true,
        })
        .await
    }

    /// Complete this side without a value.
    pub async fn complete(&self) -> Result<()> {
        self.send(StreamOp::Complete).await
    }

    /// Terminate the stream with APPLICATION_ERROR.
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.error_with_code(ErrorCode::APPLICATION_ERROR, message)
            .await
    }

    /// Terminate the stream with ERROR of the given code.
    pub async fn error_with_code(&self, code: ErrorCode, message: impl Into<String>) -> Result<()> {
        self.send(StreamOp::Error {
            code,
            message: message.into(),
        })
        .await
    }

    /// Grant the peer `n` more values.
    pub async fn request_n(&self, n: u32) -> Result<()> {
        self.send(StreamOp::RequestN(n)).await
    }

    /// Cancel the stream. A channel responder only stops the requester's
    /// values; any other responder cannot cancel.
    pub async fn cancel(&self) -> Result<()> {
        self.send(StreamOp::Cancel).await
    }

    /// Queue a CANCEL without waiting for the outcome.
    pub(crate) fn cancel_detached(&self) {
        if let Some(commands) = &self.commands {
            let _ = commands.send(Command::Stream {
                stream_id: self.stream_id,
                op: StreamOp::Cancel,
                reply: None,
            });
        }
    }

    async fn send(&self, op: StreamOp) -> Result<()> {
        let Some(commands) = &self.commands else {
            return Ok(());
        };

        let (reply, outcome) = oneshot::channel();
        commands
            .send(Command::Stream {
                stream_id: self.stream_id,
                op,
                reply: Some(reply),
            })
            .map_err(|_| RSocketError::ConnectionClosed)?;
        outcome.await.map_err(|_| RSocketError::ConnectionClosed)?
    }
}

/// Context passed to request handlers.
///
/// `Clone`, so it can be moved into tasks the handler spawns.
#[derive(Debug, Clone)]
pub struct RequestContext {
    sender: StreamSender,
    kind: InteractionKind,
    codec: Option<DataCodec>,
    cancelled: watch::Receiver<bool>,
}

impl RequestContext {
    pub(crate) fn new(
        sender: StreamSender,
        kind: InteractionKind,
        codec: Option<DataCodec>,
        cancelled: watch::Receiver<bool>,
    ) -> Self {
        Self {
            sender,
            kind,
            codec,
            cancelled,
        }
    }

    /// A context without a connection (testing mode). Sending succeeds
    /// without effect; send `true` on the returned channel to cancel.
    pub fn detached(
        stream_id: u32,
        kind: InteractionKind,
        codec: Option<DataCodec>,
    ) -> (Self, watch::Sender<bool>) {
        let (cancel, cancelled) = watch::channel(false);
        (
            Self::new(StreamSender::detached(stream_id), kind, codec, cancelled),
            cancel,
        )
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.sender.stream_id()
    }

    #[inline]
    pub fn kind(&self) -> InteractionKind {
        self.kind
    }

    /// Codec of the SETUP data mime type, if it has one.
    #[inline]
    pub fn codec(&self) -> Option<DataCodec> {
        self.codec
    }

    /// The sending half, e.g. to hand to another task.
    pub fn sender(&self) -> &StreamSender {
        &self.sender
    }

    /// Send a value (stream and channel).
    pub async fn next(&self, payload: Payload) -> Result<()> {
        self.sender.next(payload).await
    }

    /// Send the response, or the last value of a stream or channel.
    pub async fn respond(&self, payload: Payload) -> Result<()> {
        self.sender.respond(payload).await
    }

    pub async fn complete(&self) -> Result<()> {
        self.sender.complete().await
    }

    /// Terminate the stream with APPLICATION_ERROR.
    pub async fn error(&self, message: impl Into<String>) -> Result<()> {
        self.sender.error(message).await
    }

    pub async fn error_with_code(&self, code: ErrorCode, message: impl Into<String>) -> Result<()> {
        self.sender.error_with_code(code, message).await
    }

    /// Grant the requester credit for `n` more channel values.
    pub async fn request_n(&self, n: u32) -> Result<()> {
        self.sender.request_n(n).await
    }

    /// Encode `value` with the connection codec and send it.
    pub async fn next_value<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = self.require_codec()?.encode_payload(value)?;
        self.next(payload).await
    }

    /// Encode `value` with the connection codec and send it as the response.
    pub async fn respond_value<T: Serialize>(&self, value: &T) -> Result<()> {
        let payload = self.require_codec()?.encode_payload(value)?;
        self.respond(payload).await
    }

    /// Decode payload data with the connection codec.
    pub fn decode<T: DeserializeOwned>(&self, payload: &Payload) -> Result<T> {
        self.require_codec()?.decode_payload(payload)
    }

    /// Whether the stream is no longer live: the requester cancelled, the
    /// stream terminated, or the connection closed.
    pub fn is_cancelled(&self) -> bool {
        *self.cancelled.borrow() || self.cancelled.has_changed().is_err()
    }

    /// Resolves once [`is_cancelled`](Self::is_cancelled) turns true.
    pub async fn cancelled(&self) {
        let mut cancelled = self.cancelled.clone();
        // An error means the connection task dropped the stream.
        let _ = cancelled.wait_for(|c| *c).await;
    }

    fn require_codec(&self) -> Result<DataCodec> {
        self.codec.ok_or_else(|| {
            RSocketError::InvalidMimeType(
                "no codec for the connection's data mime type".to_string(),
            )
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;
    use tokio::sync::mpsc;

    #[tokio::test]
    async fn test_detached_sends_succeed() {
        let (ctx, _cancel) = RequestContext::detached(2, InteractionKind::RequestStream, None);

        assert_eq!(ctx.stream_id(), 2);
        assert_eq!(ctx.kind(), InteractionKind::RequestStream);
        assert!(ctx.next(Payload::from_data("a")).await.is_ok());
        assert!(ctx.complete().await.is_ok());
        assert!(ctx.error("boom").await.is_ok());
        assert!(!ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_value_helpers_need_codec() {
        let (ctx, _cancel) = RequestContext::detached(2, InteractionKind::RequestResponse, None);
        assert!(matches!(
            ctx.respond_value(&1u8).await,
            Err(RSocketError::InvalidMimeType(_))
        ));

        let (ctx, _cancel) = RequestContext::detached(
            2,
            InteractionKind::RequestResponse,
            Some(DataCodec::MsgPack),
        );
        assert!(ctx.respond_value(&1u8).await.is_ok());
        let payload = DataCodec::MsgPack.encode_payload(&"hi").unwrap();
        assert_eq!(ctx.decode::<String>(&payload).unwrap(), "hi");
    }

    #[tokio::test]
    async fn test_cancellation_observed() {
        let (ctx, cancel) = RequestContext::detached(2, InteractionKind::RequestStream, None);
        let waiter = ctx.clone();
        let task = tokio::spawn(async move { waiter.cancelled().await });

        cancel.send(true).unwrap();
        tokio::time::timeout(Duration::from_secs(1), task)
            .await
            .unwrap()
            .unwrap();
        assert!(ctx.is_cancelled());
    }

    #[tokio::test]
    async fn test_dropped_signal_counts_as_cancelled() {
        let (ctx, cancel) = RequestContext::detached(2, InteractionKind::RequestStream, None);
        drop(cancel);
        assert!(ctx.is_cancelled());
        ctx.cancelled().await;
    }

    #[tokio::test]
    async fn test_sender_forwards_commands() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let sender = StreamSender::new(5, tx);

        let send = tokio::spawn({
            let sender = sender.clone();
            async move { sender.request_n(3).await }
        });

        match rx.recv().await {
            Some(Command::Stream {
                stream_id: 5,
                op: StreamOp::RequestN(3),
                reply: Some(reply),
            }) => reply.send(Ok(())).unwrap(),
            other => panic!("unexpected command {:?}", other),
        }
        send.await.unwrap().unwrap();

        drop(rx);
        assert!(matches!(
            sender.complete().await,
            Err(RSocketError::ConnectionClosed)
        ));
    }
}
