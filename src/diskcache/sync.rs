//! Countdown latch for upload batches.

use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};

use tokio::sync::Notify;

/// Tracks `count` outstanding uploads; waiters resume once every one has
/// signalled. A single failed signal marks the whole batch failed.
pub struct SynchronizationTask {
    remaining: AtomicUsize,
    failed: AtomicBool,
    notify: Notify,
}

impl SynchronizationTask {
    pub fn new(count: usize) -> Self {
        Self {
            remaining: AtomicUsize::new(count),
            failed: AtomicBool::new(false),
            notify: Notify::new(),
        }
    }

    /// Reports one upload finished. The last signal wakes all waiters.
    pub fn signal(&self, success: bool) {
        if !success {
            self.failed.store(true, Ordering::SeqCst);
        }
        if self.remaining.fetch_sub(1, Ordering::SeqCst) == 1 {
            self.notify.notify_waiters();
        }
    }

    pub async fn wait(&self) {
        loop {
            let notified = self.notify.notified();
            if self.remaining.load(Ordering::SeqCst) == 0 {
                return;
            }
            notified.await;
        }
    }

    pub fn succeeded(&self) -> bool {
        !self.failed.load(Ordering::SeqCst)
    }
}
