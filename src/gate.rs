//! Blocking hand-off between the async pipeline and the CLI thread.

use std::sync::{Condvar, Mutex};

/// A one-shot latch carrying a value, reusable after every `wait`.
///
/// The sink calls [`Gate::release`] from a runtime worker when the run ends;
/// the CLI thread parks in [`Gate::wait`] until then and takes the value,
/// which closes the gate again.
#[derive(Debug, Default)]
pub struct Gate<T> {
    slot: Mutex<Option<T>>,
    opened: Condvar,
}

impl<T> Gate<T> {
    pub fn new() -> Self {
        Self {
            slot: Mutex::new(None),
            opened: Condvar::new(),
        }
    }

    /// Open the gate with `value`. Returns `false` if it was already open.
    pub fn release(&self, value: T) -> bool {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        if slot.is_some() {
            return false;
        }
        *slot = Some(value);
        self.opened.notify_all();
        true
    }

    /// Block until the gate opens, then take its value and close it.
    pub fn wait(&self) -> T {
        let mut slot = self.slot.lock().unwrap_or_else(|e| e.into_inner());
        loop {
            if let Some(value) = slot.take() {
                return value;
            }
            slot = self.opened.wait(slot).unwrap_or_else(|e| e.into_inner());
        }
    }

    pub fn is_open(&self) -> bool {
        self.slot
            .lock()
            .map(|slot| slot.is_some())
            .unwrap_or(false)
    }
}
