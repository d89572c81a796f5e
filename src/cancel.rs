//! Blocking counterpart of an async cancellation token, for the synchronous
//! download poll loop that runs without a tokio runtime.

use std::sync::{Arc, Condvar, Mutex};
use std::time::{Duration, Instant};

/// Shared flag that interrupts blocking waits such as the download poll loop.
///
/// Clones observe the same state. Once cancelled a token stays cancelled.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    inner: Arc<(Mutex<bool>, Condvar)>,
}

impl CancellationToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        let (flag, signal) = &*self.inner;
        if let Ok(mut guard) = flag.lock() {
            *guard = true;
        }
        signal.notify_all();
    }

    pub fn is_cancelled(&self) -> bool {
        let (flag, _) = &*self.inner;
        flag.lock().map(|guard| *guard).unwrap_or(true)
    }

    /// Sleep for `duration` or until cancelled. Returns `true` when the
    /// token was cancelled before the full duration elapsed.
    pub fn sleep(&self, duration: Duration) -> bool {
        let (flag, signal) = &*self.inner;
        let deadline = Instant::now() + duration;
        let Ok(mut guard) = flag.lock() else {
            return true;
        };
        while !*guard {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            match signal.wait_timeout(guard, deadline - now) {
                Ok((next, _)) => guard = next,
                Err(_) => return true,
            }
        }
        true
    }
}
