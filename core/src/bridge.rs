//! Single-slot wake-up signal
//!
//! `EventBridge` is a binary semaphore: any number of [`EventBridge::post`]
//! calls before the next [`EventBridge::wait`] collapse into one pending
//! wake. Posting never blocks and is safe from any execution context,
//! including interrupt handlers.

use embassy_sync::blocking_mutex::raw::CriticalSectionRawMutex;
use embassy_sync::signal::Signal;

pub struct EventBridge {
    signal: Signal<CriticalSectionRawMutex, ()>,
}

impl EventBridge {
    pub const fn new() -> Self {
        Self {
            signal: Signal::new(),
        }
    }

    /// Mark the bridge signaled. Idempotent.
    pub fn post(&self) {
        self.signal.signal(());
    }

    /// Wait until signaled, then clear the signal.
    pub async fn wait(&self) {
        self.signal.wait().await
    }

    /// Consume a pending wake without waiting.
    pub fn try_take(&self) -> bool {
        self.signal.try_take().is_some()
    }

    pub fn is_pending(&self) -> bool {
        self.signal.signaled()
    }

    /// Drop a pending wake, if any.
    pub fn reset(&self) {
        self.signal.reset();
    }
}

impl Default for EventBridge {
    fn default() -> Self {
        Self::new()
    }
}
