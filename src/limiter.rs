//! Bounded-concurrency tokens shared by mesh lifecycles.

use std::sync::Arc;

use thiserror::Error;
use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// Raised when a token is requested from a closed limiter.
#[derive(Clone, Copy, Debug, Error, Eq, PartialEq)]
#[error("concurrency limiter closed")]
pub struct LimiterClosed;

/// Counting limiter handing out at most `capacity` tokens at a time.
///
/// Cloning shares the same pool of tokens.
#[derive(Clone, Debug)]
pub struct ConcurrencyLimiter {
    semaphore: Arc<Semaphore>,
    capacity: usize,
}

impl ConcurrencyLimiter {
    /// Creates a limiter with `capacity` tokens. A capacity of zero is
    /// raised to one so acquisition can always make progress.
    #[must_use]
    pub fn new(capacity: usize) -> Self {
        let slots = capacity.max(1);
        Self {
            semaphore: Arc::new(Semaphore::new(slots)),
            capacity: slots,
        }
    }

    /// Total number of tokens.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.capacity
    }

    /// Tokens not currently held.
    #[must_use]
    pub fn available(&self) -> usize {
        self.semaphore.available_permits()
    }

    /// Waits for a free token.
    ///
    /// # Errors
    ///
    /// Returns [`LimiterClosed`] once [`ConcurrencyLimiter::close`] was
    /// called.
    pub async fn acquire(&self) -> Result<ConcurrencyToken, LimiterClosed> {
        let permit = Arc::clone(&self.semaphore)
            .acquire_owned()
            .await
            .map_err(|_| LimiterClosed)?;
        Ok(ConcurrencyToken { _permit: permit })
    }

    /// Closes the limiter; pending and future acquisitions fail.
    pub fn close(&self) {
        self.semaphore.close();
    }
}

/// One slot of a [`ConcurrencyLimiter`], released on drop.
#[derive(Debug)]
pub struct ConcurrencyToken {
    _permit: OwnedSemaphorePermit,
}
