//! Cooperative cancellation for sequence runs

use std::sync::Arc;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

#[derive(Debug, Default)]
struct Inner {
    cancelled: Mutex<bool>,
    wake: Condvar,
}

/// Cancel signal shared between a running sequence and its controller
///
/// Cloning yields another handle to the same signal. Once cancelled a token
/// stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancelToken {
    inner: Arc<Inner>,
}

impl CancelToken {
    /// Create a token that is not cancelled
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation and wake any waiter
    pub fn cancel(&self) {
        let mut cancelled = self.inner.cancelled.lock();
        *cancelled = true;
        self.inner.wake.notify_all();
    }

    /// Whether cancellation was requested
    pub fn is_cancelled(&self) -> bool {
        *self.inner.cancelled.lock()
    }

    /// Sleep for `timeout` unless cancelled first
    ///
    /// Returns `true` if the token was (or became) cancelled. A timeout too
    /// large to represent as a deadline waits for cancellation alone.
    pub fn wait(&self, timeout: Duration) -> bool {
        let deadline = Instant::now().checked_add(timeout);
        let mut cancelled = self.inner.cancelled.lock();
        while !*cancelled {
            match deadline {
                Some(deadline) => {
                    if self.inner.wake.wait_until(&mut cancelled, deadline).timed_out() {
                        break;
                    }
                }
                None => self.inner.wake.wait(&mut cancelled),
            }
        }
        *cancelled
    }
}
