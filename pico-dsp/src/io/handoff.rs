//! Single-slot mailbox from interrupt context to the foreground.
//!
//! The producer posts a value only when the slot is empty; the consumer
//! takes it and empties the slot. Uses only atomic loads and stores.

use core::cell::UnsafeCell;
use core::mem::MaybeUninit;
use core::sync::atomic::{AtomicBool, Ordering};

pub struct Handoff<T: Copy> {
    value: UnsafeCell<MaybeUninit<T>>,
    full: AtomicBool,
}

// SAFETY: the `full` flag hands the slot back and forth. The producer only
// writes while it is clear, the consumer only reads while it is set.
unsafe impl<T: Copy + Send> Sync for Handoff<T> {}

impl<T: Copy> Handoff<T> {
    pub const fn new() -> Self {
        Handoff {
            value: UnsafeCell::new(MaybeUninit::uninit()),
            full: AtomicBool::new(false),
        }
    }

    /// Producer: store `value` unless the previous one is still unread.
    pub fn post(&self, value: T) -> bool {
        if self.full.load(Ordering::Acquire) {
            return false;
        }
        // SAFETY: slot is empty, so the consumer is not reading it.
        unsafe { (*self.value.get()).write(value) };
        self.full.store(true, Ordering::Release);
        true
    }

    /// Consumer: take the pending value, if any.
    pub fn take(&self) -> Option<T> {
        if !self.full.load(Ordering::Acquire) {
            return None;
        }
        // SAFETY: slot is full, so it was initialized and the producer
        // will not touch it until `full` is cleared.
        let value = unsafe { (*self.value.get()).assume_init_read() };
        self.full.store(false, Ordering::Release);
        Some(value)
    }

    pub fn is_pending(&self) -> bool {
        self.full.load(Ordering::Acquire)
    }
}

impl<T: Copy> Default for Handoff<T> {
    fn default() -> Self {
        Self::new()
    }
}
