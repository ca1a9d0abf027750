//! Tracking of in-flight listen/transmit operations.
//!
//! Workers call [`ActiveOperations::begin`] when they start a bounded wait and
//! hold the returned guard until the wait ends. The count only goes down when
//! a guard is dropped, so it can never go negative. Shutdown code and tests
//! use [`ActiveOperations::wait_drained`] to know when everything has settled.

use std::sync::Arc;
use tokio::sync::watch;

/// Shared counter of in-flight operations.
#[derive(Debug, Clone)]
pub struct ActiveOperations {
    count: Arc<watch::Sender<usize>>,
}

impl ActiveOperations {
    pub fn new() -> Self {
        let (tx, _rx) = watch::channel(0);
        Self {
            count: Arc::new(tx),
        }
    }

    /// Mark the start of an operation. The operation ends when the guard drops.
    pub fn begin(&self) -> ActivityGuard {
        self.count.send_modify(|n| *n += 1);
        ActivityGuard {
            count: Arc::clone(&self.count),
        }
    }

    /// Number of operations currently in flight
    pub fn current(&self) -> usize {
        *self.count.borrow()
    }

    /// Observe the counter; every change is published.
    pub fn subscribe(&self) -> watch::Receiver<usize> {
        self.count.subscribe()
    }

    /// Resolve once no operations are in flight.
    pub async fn wait_drained(&self) {
        let mut rx = self.count.subscribe();
        // The sender lives in `self`, so the channel cannot close here.
        let _ = rx.wait_for(|n| *n == 0).await;
    }
}

impl Default for ActiveOperations {
    fn default() -> Self {
        Self::new()
    }
}

/// Decrements the counter on drop.
#[derive(Debug)]
#[must_use = "the operation ends as soon as the guard is dropped"]
pub struct ActivityGuard {
    count: Arc<watch::Sender<usize>>,
}

impl Drop for ActivityGuard {
    fn drop(&mut self) {
        self.count.send_modify(|n| *n -= 1);
    }
}
