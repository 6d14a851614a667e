//! Single-slot, latest-wins delivery from a capture callback to one consumer task.
//!
//! The producer side never waits for the consumer: a sample that has not been
//! taken yet is replaced by the next one. The lock guarding the slot is only
//! held for a swap, so a capture callback never stalls on it.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use tokio::sync::Notify;

use crate::sample::Sample;

struct Shared<T> {
    slot: Mutex<Option<T>>,
    notify: Notify,
    closed: AtomicBool,
    replaced: AtomicU64,
}

/// Producer half. Owned by exactly one capture adapter.
pub struct SampleSender<T = Sample> {
    shared: Arc<Shared<T>>,
}

/// Consumer half. Owned by exactly one consumer task.
pub struct SampleReceiver<T = Sample> {
    shared: Arc<Shared<T>>,
}

/// Create a single-slot channel.
pub fn sample_channel<T>() -> (SampleSender<T>, SampleReceiver<T>) {
    let shared = Arc::new(Shared {
        slot: Mutex::new(None),
        notify: Notify::new(),
        closed: AtomicBool::new(false),
        replaced: AtomicU64::new(0),
    });

    (
        SampleSender {
            shared: Arc::clone(&shared),
        },
        SampleReceiver { shared },
    )
}

impl<T> SampleSender<T> {
    /// Hand a value to the consumer. Never blocks and never fails.
    ///
    /// Returns true if an undelivered value was replaced.
    pub fn send(&self, value: T) -> bool {
        let previous = self.shared.slot.lock().replace(value);
        self.shared.notify.notify_one();

        if previous.is_some() {
            self.shared.replaced.fetch_add(1, Ordering::Relaxed);
            true
        } else {
            false
        }
    }

    /// Number of values replaced before the consumer took them.
    pub fn replaced(&self) -> u64 {
        self.shared.replaced.load(Ordering::Relaxed)
    }
}

impl<T> Drop for SampleSender<T> {
    fn drop(&mut self) {
        self.shared.closed.store(true, Ordering::Release);
        self.shared.notify.notify_one();
    }
}

impl<T> SampleReceiver<T> {
    /// Wait for the next value.
    ///
    /// Returns `None` once the sender is gone and nothing is pending.
    /// Cancel-safe: dropping the future never loses a value.
    pub async fn receive(&mut self) -> Option<T> {
        loop {
            if let Some(value) = self.shared.slot.lock().take() {
                return Some(value);
            }

            if self.shared.closed.load(Ordering::Acquire) {
                return self.shared.slot.lock().take();
            }

            self.shared.notify.notified().await;
        }
    }

    /// Take the pending value without waiting.
    #[cfg(test)]
    pub(crate) fn try_receive(&mut self) -> Option<T> {
        self.shared.slot.lock().take()
    }
}
