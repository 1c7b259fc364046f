use std::time::Duration;

use tokio::sync::watch;

#[derive(Debug, thiserror::Error, PartialEq, Eq)]
pub enum BarrierError {
    #[error("barrier already released; extra signal ignored")]
    AlreadyReleased,
}

/// Countdown latch sized to a batch.
///
/// Each finished unit calls [`signal`](Self::signal) once; waiters are
/// released when the count reaches zero. The count never goes below zero.
#[derive(Debug)]
pub struct CompletionBarrier {
    remaining: watch::Sender<usize>,
    total: usize,
}

impl CompletionBarrier {
    pub fn new(total: usize) -> Self {
        let (remaining, _) = watch::channel(total);
        Self { remaining, total }
    }

    pub fn total(&self) -> usize {
        self.total
    }

    pub fn remaining(&self) -> usize {
        *self.remaining.borrow()
    }

    pub fn is_released(&self) -> bool {
        self.remaining() == 0
    }

    /// Count one unit as finished. Returns the count still outstanding.
    pub fn signal(&self) -> Result<usize, BarrierError> {
        let mut result = Err(BarrierError::AlreadyReleased);
        self.remaining.send_if_modified(|remaining| {
            if *remaining == 0 {
                return false;
            }
            *remaining -= 1;
            result = Ok(*remaining);
            true
        });
        result
    }

    /// Wait until every unit has signaled.
    pub async fn wait(&self) {
        let mut rx = self.remaining.subscribe();
        // The sender lives in `self`, so the channel cannot close while we wait.
        let _ = rx.wait_for(|remaining| *remaining == 0).await;
    }

    /// Wait with an upper bound. Returns `true` if the barrier released in time.
    pub async fn wait_timeout(&self, limit: Duration) -> bool {
        tokio::time::timeout(limit, self.wait()).await.is_ok()
    }
}
