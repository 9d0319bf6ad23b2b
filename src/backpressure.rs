//! Backpressure for the outbound write path.
//!
//! The [`BackpressureController`] counts frames handed to the writer task
//! but not yet written. Producers reserve a slot before queueing a frame;
//! the writer releases slots once a batch reaches the transport. When the
//! limit is reached, [`reserve`](BackpressureController::reserve) waits up
//! to the configured timeout and then fails with
//! [`RSocketError::BackpressureTimeout`].

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::error::{RSocketError, Result};

/// Default maximum pending frames before backpressure kicks in.
pub const DEFAULT_MAX_PENDING: usize = 1024;

/// Default backpressure timeout.
pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(5);

/// Interval between backpressure checks.
const CHECK_INTERVAL: Duration = Duration::from_micros(100);

/// Lock-free pending frame counter shared by producers and the writer task.
#[derive(Debug, Clone)]
pub struct BackpressureController {
    pending: Arc<AtomicUsize>,
    max_pending: usize,
    timeout: Duration,
}

impl BackpressureController {
    pub fn new(max_pending: usize) -> Self {
        Self::with_timeout(max_pending, DEFAULT_TIMEOUT)
    }

    pub fn with_timeout(max_pending: usize, timeout: Duration) -> Self {
        Self {
            pending: Arc::new(AtomicUsize::new(0)),
            max_pending: max_pending.max(1),
            timeout,
        }
    }

    #[inline]
    pub fn is_active(&self) -> bool {
        self.pending.load(Ordering::Acquire) >= self.max_pending
    }

    #[inline]
    pub fn pending_count(&self) -> usize {
        self.pending.load(Ordering::Acquire)
    }

    #[inline]
    pub fn max_pending(&self) -> usize {
        self.max_pending
    }

    /// Reserve a slot without waiting.
    pub fn try_reserve(&self) -> Result<()> {
        self.pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                (current < self.max_pending).then_some(current + 1)
            })
            .map(|_| ())
            .map_err(|_| RSocketError::BackpressureTimeout)
    }

    /// Reserve a slot, waiting up to the timeout for one to free up.
    pub async fn reserve(&self) -> Result<()> {
        if self.try_reserve().is_ok() {
            return Ok(());
        }

        let start = Instant::now();
        loop {
            tokio::time::sleep(CHECK_INTERVAL).await;
            if self.try_reserve().is_ok() {
                return Ok(());
            }
            if start.elapsed() > self.timeout {
                return Err(RSocketError::BackpressureTimeout);
            }
        }
    }

    #[inline]
    pub fn release(&self) {
        self.release_many(1);
    }

    /// Release slots for a written batch.
    #[inline]
    pub fn release_many(&self, count: usize) {
        let _ = self
            .pending
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                Some(current.saturating_sub(count))
            });
    }
}

impl Default for BackpressureController {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_PENDING)
    }
}
