use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread;
use std::time::Duration;

/// Polling period of every loop that has to notice a cancellation.
pub const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub fn lock_then_release<T: ?Sized>(mutex: &Mutex<T>) -> MutexGuard<T> {
    match mutex.lock() {
        Ok(guard) => guard,
        // guarded values are replaced whole, so a panicking holder cannot leave them half-written
        Err(poisoned) => poisoned.into_inner(),
    }
}

/// A cancellation flag shared by every loop a node runs.
#[derive(Debug, Clone, Default)]
pub struct CancellationToken {
    cancelled: Arc<AtomicBool>,
}

impl CancellationToken {
    pub fn new() -> Self {
        CancellationToken::default()
    }

    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::SeqCst);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::SeqCst)
    }

    /// Sleeps for `duration` in short steps, returning `false` as soon as the token is cancelled.
    pub fn sleep(&self, duration: Duration) -> bool {
        let mut remaining = duration;
        while remaining > Duration::from_millis(0) {
            if self.is_cancelled() {
                return false;
            }
            let step = remaining.min(POLL_INTERVAL);
            thread::sleep(step);
            remaining -= step;
        }
        !self.is_cancelled()
    }
}
