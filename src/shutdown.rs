//! Process-wide stop signal for the board and its bridges.
//!
//! `main` owns the [`ShutdownCoordinator`]; every long-running loop gets a
//! [`ShutdownHandle`] and selects on [`ShutdownHandle::wait`].

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

pub struct ShutdownCoordinator {
    stopping: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownCoordinator {
    pub fn new() -> Self {
        Self {
            stopping: Arc::new(AtomicBool::new(false)),
            notify: Arc::new(Notify::new()),
        }
    }

    /// Starts the stop. Later calls are no-ops.
    pub fn signal(&self) {
        if trip(&self.stopping, &self.notify) {
            tracing::info!("shutting down");
        }
    }

    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    pub fn handle(&self) -> ShutdownHandle {
        ShutdownHandle {
            stopping: Arc::clone(&self.stopping),
            notify: Arc::clone(&self.notify),
        }
    }
}

impl Default for ShutdownCoordinator {
    fn default() -> Self {
        Self::new()
    }
}

/// Cloneable view of the stop signal.
#[derive(Clone)]
pub struct ShutdownHandle {
    stopping: Arc<AtomicBool>,
    notify: Arc<Notify>,
}

impl ShutdownHandle {
    pub fn is_shutting_down(&self) -> bool {
        self.stopping.load(Ordering::SeqCst)
    }

    /// Stops everything holding a handle.
    pub fn signal(&self) {
        trip(&self.stopping, &self.notify);
    }

    /// Resolves once a stop has been signalled. Cancel safe.
    pub async fn wait(&self) {
        // Register before reading the flag so a signal() in between is not lost.
        let notified = self.notify.notified();
        tokio::pin!(notified);
        notified.as_mut().enable();
        if self.is_shutting_down() {
            return;
        }
        notified.await;
    }
}

/// Sets the flag and wakes waiters. True for the call that flipped it.
fn trip(flag: &AtomicBool, notify: &Notify) -> bool {
    let first = !flag.swap(true, Ordering::SeqCst);
    if first {
        notify.notify_waiters();
    }
    first
}
