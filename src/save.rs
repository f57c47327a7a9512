//! Debounced background persistence.
//!
//! The first dirty mark after an idle period schedules one save cycle on the
//! attached tokio runtime.  The cycle sleeps for the configured delay, then
//! writes every dirty terrain and flushes queued deletions on the blocking
//! pool.  Marks arriving while a cycle is pending or running are folded into
//! it, or into a follow-up cycle scheduled when it finishes.

use crate::index::IndexShared;
use log::{error, warn};
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;

pub(crate) struct SaveScheduler {
    delay: Duration,
    handle: Mutex<Option<Handle>>,
    running: AtomicBool,
}

impl SaveScheduler {
    pub(crate) fn new(delay: Duration) -> Self {
        Self {
            delay,
            handle: Mutex::new(None),
            running: AtomicBool::new(false),
        }
    }

    pub(crate) fn attach(&self, handle: Handle) {
        *self.handle.lock() = Some(handle);
    }

    /// Stop scheduling new cycles.  A cycle already in flight completes.
    pub(crate) fn detach(&self) {
        self.handle.lock().take();
    }

    pub(crate) fn request(&self, index: &Arc<IndexShared>) {
        let Some(handle) = self.handle.lock().clone() else {
            return;
        };
        if self.running.swap(true, Ordering::AcqRel) {
            return;
        }

        let index = Arc::downgrade(index);
        let delay = self.delay;
        handle.spawn(async move {
            tokio::time::sleep(delay).await;

            let Some(shared) = index.upgrade() else {
                return;
            };
            let cycle = Arc::clone(&shared);
            match tokio::task::spawn_blocking(move || cycle.flush()).await {
                Ok(report) if report.failed > 0 => {
                    warn!("Save cycle left {} terrains unsaved", report.failed);
                }
                Ok(_) => {}
                Err(e) => error!("Save cycle aborted: {}", e),
            }

            shared.saver.running.store(false, Ordering::Release);
            if shared.has_pending() {
                shared.request_save();
            }
        });
    }
}
