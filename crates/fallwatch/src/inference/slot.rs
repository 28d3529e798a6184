//! Single-flight guard for the inference process.

use std::sync::Arc;

use tokio::sync::{OwnedSemaphorePermit, Semaphore};

/// One-permit semaphore. Holding the permit means an analysis is in flight.
#[derive(Debug, Clone)]
pub struct InferenceSlot {
    semaphore: Arc<Semaphore>,
}

/// Proof of holding the slot. Dropping it frees the slot.
#[derive(Debug)]
pub struct SlotPermit {
    _permit: OwnedSemaphorePermit,
}

impl InferenceSlot {
    pub fn new() -> Self {
        Self {
            semaphore: Arc::new(Semaphore::new(1)),
        }
    }

    /// Takes the slot without waiting. Returns `None` while it is held.
    pub fn try_acquire(&self) -> Option<SlotPermit> {
        Arc::clone(&self.semaphore)
            .try_acquire_owned()
            .ok()
            .map(|permit| SlotPermit { _permit: permit })
    }

    /// Returns true while an analysis holds the slot.
    pub fn is_busy(&self) -> bool {
        self.semaphore.available_permits() == 0
    }
}

impl Default for InferenceSlot {
    fn default() -> Self {
        Self::new()
    }
}
