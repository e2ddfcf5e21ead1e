//! Single-slot, overwrite-on-full hand-off cell.
//!
//! Producers never wait: a `put` replaces whatever unconsumed value is in the
//! slot. Consumers never wait either: `try_take` empties the slot or reports
//! that nothing is there. The lock covers only the swap itself.

use std::sync::{Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
pub struct LatestSlot<T> {
    slot: Mutex<Option<T>>,
}

impl<T> LatestSlot<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
        }
    }

    /// Store `item`, dropping any unconsumed predecessor.
    ///
    /// Returns `true` when an older item was overwritten.
    pub fn put(&self, item: T) -> bool {
        let previous = self.lock().replace(item);
        // Drop the stale value outside the critical section.
        previous.is_some()
    }

    /// Take the current item, leaving the slot empty.
    pub fn try_take(&self) -> Option<T> {
        self.lock().take()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().is_none()
    }

    fn lock(&self) -> MutexGuard<'_, Option<T>> {
        self.slot.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl<T: Clone> LatestSlot<T> {
    /// Clone the current item without consuming it.
    pub fn peek(&self) -> Option<T> {
        self.lock().clone()
    }
}

impl<T> Default for LatestSlot<T> {
    fn default() -> Self {
        Self::new()
    }
}
