use std::num::NonZeroU32;
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;

/// The per-connection serial counter.
///
/// Monotonically increasing, starting at 1, wrapping past `u32::MAX` back
/// to 1 and never handing out 0. Reset on every reconnect.
#[derive(Clone)]
pub(crate) struct SerialCounter {
    inner: Arc<AtomicU32>,
}

impl SerialCounter {
    pub(crate) fn new() -> Self {
        Self {
            inner: Arc::new(AtomicU32::new(1)),
        }
    }

    /// Allocate the next serial.
    pub(crate) fn next(&self) -> NonZeroU32 {
        loop {
            let serial = self.inner.fetch_add(1, Ordering::Relaxed);

            // Skip the zero produced when the counter wraps.
            if let Some(serial) = NonZeroU32::new(serial) {
                return serial;
            }
        }
    }

    /// Reset the counter for a fresh session.
    pub(crate) fn reset(&self) {
        self.inner.store(1, Ordering::Relaxed);
    }
}
