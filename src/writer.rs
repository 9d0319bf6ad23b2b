//! Dedicated writer task for byte-stream transports.
//!
//! The connection driver hands encoded frames to a writer task over an mpsc
//! channel. The task prefixes each frame with its 24-bit length and
//! batches whatever is ready into a single vectored write.
//!
//! ```text
//! Driver ─► WriterHandle ─► mpsc ─► Writer Task ─► [len|frame][len|frame]... ─► Transport
//! ```

use std::io::IoSlice;
use std::time::Duration;

use bytes::Bytes;
use tokio::io::{AsyncWrite, AsyncWriteExt};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::trace;

use crate::backpressure::BackpressureController;
use crate::error::{RSocketError, Result};
use crate::protocol::{Frame, MAX_U24, U24_SIZE};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING_FRAMES: usize = 1024;

/// Default channel capacity.
pub const DEFAULT_CHANNEL_CAPACITY: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_BACKPRESSURE_TIMEOUT: Duration = Duration::from_secs(5);

/// Maximum frames to batch in a single write operation.
const MAX_BATCH_SIZE: usize = 64;

/// An encoded frame ready for a length-prefixed transport.
#[derive(Debug, Clone)]
pub struct OutboundFrame {
    /// 24-bit big-endian frame length.
    pub prefix: [u8; U24_SIZE],
    /// Encoded frame, header included.
    pub frame: Bytes,
}

impl OutboundFrame {
    /// Wrap encoded frame bytes.
    pub fn new(frame: Bytes) -> Result<Self> {
        let len = frame.len();
        if len > MAX_U24 {
            return Err(RSocketError::LengthOverflow {
                what: "frame",
                len,
                max: MAX_U24,
            });
        }
        Ok(Self {
            prefix: [(len >> 16) as u8, (len >> 8) as u8, len as u8],
            frame,
        })
    }

    /// Encode a frame.
    pub fn encode(frame: &Frame) -> Result<Self> {
        Self::new(frame.try_encode()?)
    }

    /// Bytes this frame occupies on the wire.
    #[inline]
    pub fn size(&self) -> usize {
        U24_SIZE + self.frame.len()
    }
}

/// Configuration for the writer task.
#[derive(Debug, Clone)]
pub struct WriterConfig {
    /// Maximum pending frames before backpressure kicks in.
    pub max_pending_frames: usize,
    /// Channel capacity for frame queue.
    pub channel_capacity: usize,
    /// Timeout when waiting for backpressure to clear.
    pub backpressure_timeout: Duration,
}

impl Default for WriterConfig {
    fn default() -> Self {
        Self {
            max_pending_frames: DEFAULT_MAX_PENDING_FRAMES,
            channel_capacity: DEFAULT_CHANNEL_CAPACITY,
            backpressure_timeout: DEFAULT_BACKPRESSURE_TIMEOUT,
        }
    }
}

/// Handle for sending frames to the writer task. Cheap to clone.
#[derive(Debug, Clone)]
pub struct WriterHandle {
    tx: mpsc::Sender<OutboundFrame>,
    backpressure: BackpressureController,
}

impl WriterHandle {
    /// Send a frame, waiting while backpressure is active.
    pub async fn send(&self, frame: OutboundFrame) -> Result<()> {
        self.backpressure.reserve().await?;
        self.tx.send(frame).await.map_err(|_| {
            self.backpressure.release();
            RSocketError::ConnectionClosed
        })
    }

    /// Send a frame without waiting.
    ///
    /// Fails with `BackpressureTimeout` immediately when at capacity.
    pub fn try_send(&self, frame: OutboundFrame) -> Result<()> {
        self.backpressure.try_reserve()?;
        self.tx.try_send(frame).map_err(|e| {
            self.backpressure.release();
            match e {
                mpsc::error::TrySendError::Full(_) => RSocketError::BackpressureTimeout,
                mpsc::error::TrySendError::Closed(_) => RSocketError::ConnectionClosed,
            }
        })
    }

    #[inline]
    pub fn is_backpressure_active(&self) -> bool {
        self.backpressure.is_active()
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.backpressure.pending_count()
    }

    /// Pending frames at which sends start waiting.
    #[inline]
    pub fn max_pending(&self) -> usize {
        self.backpressure.max_pending()
    }

    /// Whether the writer task has stopped.
    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Spawn the writer task and return a handle for sending frames.
///
/// The task ends cleanly once every handle is dropped, and with an error
/// when the transport fails.
pub fn spawn_writer_task<W>(
    writer: W,
    config: WriterConfig,
) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    let (tx, rx) = mpsc::channel(config.channel_capacity.max(1));
    let backpressure =
        BackpressureController::with_timeout(config.max_pending_frames, config.backpressure_timeout);

    let handle = WriterHandle {
        tx,
        backpressure: backpressure.clone(),
    };
    let task = tokio::spawn(writer_loop(rx, writer, backpressure));

    (handle, task)
}

/// Spawn the writer task with default configuration.
pub fn spawn_writer_task_default<W>(writer: W) -> (WriterHandle, JoinHandle<Result<()>>)
where
    W: AsyncWrite + Unpin + Send + 'static,
{
    spawn_writer_task(writer, WriterConfig::default())
}

async fn writer_loop<W>(
    mut rx: mpsc::Receiver<OutboundFrame>,
    mut writer: W,
    backpressure: BackpressureController,
) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    let mut batch = Vec::with_capacity(MAX_BATCH_SIZE);
    loop {
        let Some(first) = rx.recv().await else {
            writer.shutdown().await.ok();
            return Ok(());
        };

        batch.clear();
        batch.push(first);
        while batch.len() < MAX_BATCH_SIZE {
            match rx.try_recv() {
                Ok(frame) => batch.push(frame),
                Err(_) => break,
            }
        }

        let batch_size = batch.len();
        write_batch(&mut writer, &batch).await?;
        backpressure.release_many(batch_size);
        trace!(frames = batch_size, "batch written");
    }
}

/// Write a batch with as few vectored writes as the transport allows.
async fn write_batch<W>(writer: &mut W, batch: &[OutboundFrame]) -> Result<()>
where
    W: AsyncWrite + Unpin,
{
    if batch.is_empty() {
        return Ok(());
    }

    let total_size: usize = batch.iter().map(OutboundFrame::size).sum();
    let mut total_written = 0;

    while total_written < total_size {
        let slices = build_remaining_slices(batch, total_written);
        let written = writer.write_vectored(&slices).await?;
        if written == 0 {
            return Err(RSocketError::Io(std::io::Error::new(
                std::io::ErrorKind::WriteZero,
                "write_vectored returned 0",
            )));
        }
        total_written += written;
    }

    writer.flush().await?;
    Ok(())
}

/// IoSlices covering everything after the first `skip_bytes` of the batch.
fn build_remaining_slices(batch: &[OutboundFrame], skip_bytes: usize) -> Vec<IoSlice<'_>> {
    let mut slices = Vec::with_capacity(batch.len() * 2);
    let mut offset = 0;

    for frame in batch {
        for part in [&frame.prefix[..], &frame.frame[..]] {
            let end = offset + part.len();
            if skip_bytes < end && !part.is_empty() {
                slices.push(IoSlice::new(&part[skip_bytes.saturating_sub(offset)..]));
            }
            offset = end;
        }
    }

    slices
}
