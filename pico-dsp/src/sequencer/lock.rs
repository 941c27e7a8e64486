//! Cross-core exclusive lock for the sequencer table.
//!
//! The lock records which core holds it, so a core that tries to take it
//! twice is reported as a deadlock instead of spinning forever.

#[cfg(target_has_atomic = "8")]
use core::sync::atomic::{AtomicU8, Ordering};

use super::CoreId;
use crate::error::PipelineError;

/// A lock shared between cores that knows its current owner.
pub trait CoreLock {
    /// Try once to take the lock for `core`.
    ///
    /// On contention returns the current owner, or `None` if the owner is
    /// not (yet) known.
    fn try_lock(&self, core: CoreId) -> Result<(), Option<CoreId>>;

    /// Release the lock. Only called by the holder.
    fn unlock(&self);
}

/// Releases the lock on drop.
pub struct CoreMutexGuard<'a, L: CoreLock> {
    lock: &'a L,
}

impl<L: CoreLock> Drop for CoreMutexGuard<'_, L> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}

/// Spin until `core` holds `lock`.
///
/// Fails with [`PipelineError::Deadlock`] if `core` already holds it.
pub fn acquire<L: CoreLock>(lock: &L, core: CoreId) -> Result<CoreMutexGuard<'_, L>, PipelineError> {
    loop {
        match lock.try_lock(core) {
            Ok(()) => return Ok(CoreMutexGuard { lock }),
            Err(Some(owner)) if owner == core => {
                log::error!("sequencer lock re-entered by core {}", core.0);
                return Err(PipelineError::Deadlock { core });
            }
            Err(_) => core::hint::spin_loop(),
        }
    }
}

/// Owner byte value meaning "unlocked".
#[cfg(target_has_atomic = "8")]
const FREE: u8 = u8::MAX;

/// Compare-and-swap lock for targets with byte CAS.
///
/// The RP2040 cores have no CAS; the firmware uses an SIO hardware
/// spinlock instead.
#[cfg(target_has_atomic = "8")]
pub struct AtomicCoreLock {
    owner: AtomicU8,
}

#[cfg(target_has_atomic = "8")]
impl AtomicCoreLock {
    pub const fn new() -> Self {
        AtomicCoreLock {
            owner: AtomicU8::new(FREE),
        }
    }
}

#[cfg(target_has_atomic = "8")]
impl Default for AtomicCoreLock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(target_has_atomic = "8")]
impl CoreLock for AtomicCoreLock {
    fn try_lock(&self, core: CoreId) -> Result<(), Option<CoreId>> {
        match self
            .owner
            .compare_exchange(FREE, core.0, Ordering::Acquire, Ordering::Relaxed)
        {
            Ok(_) => Ok(()),
            Err(FREE) => Err(None),
            Err(owner) => Err(Some(CoreId(owner))),
        }
    }

    fn unlock(&self) {
        self.owner.store(FREE, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn guard_releases_on_drop() {
        let lock = AtomicCoreLock::new();
        {
            let _guard = acquire(&lock, CoreId(0)).unwrap();
            assert_eq!(lock.try_lock(CoreId(1)), Err(Some(CoreId(0))));
        }
        assert_eq!(lock.try_lock(CoreId(1)), Ok(()));
        lock.unlock();
    }

    #[test]
    fn reentry_is_a_deadlock() {
        let lock = AtomicCoreLock::new();
        let _guard = acquire(&lock, CoreId(1)).unwrap();
        assert_eq!(
            acquire(&lock, CoreId(1)).err(),
            Some(PipelineError::Deadlock { core: CoreId(1) })
        );
    }

    #[test]
    fn other_core_waits_for_release() {
        use core::sync::atomic::{AtomicBool, Ordering};

        let lock = AtomicCoreLock::new();
        let released = AtomicBool::new(false);
        let guard = acquire(&lock, CoreId(0)).unwrap();

        std::thread::scope(|s| {
            s.spawn(|| {
                let _guard = acquire(&lock, CoreId(1)).unwrap();
                assert!(released.load(Ordering::Acquire));
            });
            std::thread::sleep(std::time::Duration::from_millis(20));
            released.store(true, Ordering::Release);
            drop(guard);
        });
    }
}
