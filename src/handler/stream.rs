//! Values arriving on a stream.

use tokio::sync::mpsc;

use crate::error::Result;
use crate::protocol::Payload;

use super::StreamSender;

/// Receiving half of a stream.
///
/// Yields each NEXT payload in order, then `None` once the peer completes.
/// An ERROR from the peer, or the connection closing, is yielded as a
/// final `Err`. Values only arrive while the peer has credit: the initial
/// requestN plus whatever [`request`](Self::request) grants later.
///
/// Dropping a requester's stream before it has ended cancels it.
#[derive(Debug)]
pub struct PayloadStream {
    values: mpsc::UnboundedReceiver<Result<Payload>>,
    sender: StreamSender,
    cancel_on_drop: bool,
    done: bool,
}

impl PayloadStream {
    pub(crate) fn new(
        values: mpsc::UnboundedReceiver<Result<Payload>>,
        sender: StreamSender,
        cancel_on_drop: bool,
    ) -> Self {
        Self {
            values,
            sender,
            cancel_on_drop,
            done: false,
        }
    }

    #[inline]
    pub fn stream_id(&self) -> u32 {
        self.sender.stream_id()
    }

    /// Whether the stream has ended.
    #[inline]
    pub fn is_done(&self) -> bool {
        self.done
    }

    /// Next value, or `None` after completion.
    pub async fn next(&mut self) -> Option<Result<Payload>> {
        if self.done {
            return None;
        }
        match self.values.recv().await {
            Some(Ok(payload)) => Some(Ok(payload)),
            Some(Err(err)) => {
                self.done = true;
                Some(Err(err))
            }
            None => {
                self.done = true;
                None
            }
        }
    }

    /// Grant the peer `n` more values.
    pub async fn request(&self, n: u32) -> Result<()> {
        self.sender.request_n(n).await
    }

    /// Cancel the stream. On a channel responder this stops the
    /// requester's values and leaves the response side open.
    pub async fn cancel(mut self) -> Result<()> {
        self.done = true;
        self.sender.cancel().await
    }

    /// Drain the stream into a vector, stopping at the first error.
    pub async fn collect(mut self) -> Result<Vec<Payload>> {
        let mut values = Vec::new();
        while let Some(value) = self.next().await {
            values.push(value?);
        }
        Ok(values)
    }
}

impl Drop for PayloadStream {
    fn drop(&mut self) {
        if self.cancel_on_drop && !self.done {
            self.sender.cancel_detached();
        }
    }
}
