use std::sync::{Mutex, PoisonError};
use tokio::time::Instant;

/// Deadline is the next wake time a timer handle hands to its task. The task takes it, so an
/// empty slot after waking means nobody pushed the deadline out in the meantime.
#[derive(Default)]
pub(super) struct Deadline {
    next: Mutex<Option<Instant>>,
}

impl Deadline {
    pub(super) fn set(&self, wake_time: Instant) {
        self.next
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .replace(wake_time);
    }

    pub(super) fn take(&self) -> Option<Instant> {
        self.next.lock().unwrap_or_else(PoisonError::into_inner).take()
    }
}
