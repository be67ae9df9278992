//! Synchronization primitives
//!
//! - `DeviceAccessLock`: test-and-set spinlock without guarded data, with
//!   both scoped and explicit lock/unlock. The explicit form backs
//!   `lock_device_access`/`unlock_device_access`, which hosts call from
//!   paths where a guard cannot be carried across.
//!
//! Subsystem state itself lives in a `spin::Mutex`.

use core::sync::atomic::{AtomicBool, Ordering};

/// A basic test-and-set lock serialising property injection passes.
pub struct DeviceAccessLock {
    locked: AtomicBool,
}

pub struct DeviceAccessGuard<'a> {
    lock: &'a DeviceAccessLock,
}

impl DeviceAccessLock {
    pub const fn new() -> Self {
        Self {
            locked: AtomicBool::new(false),
        }
    }

    /// Acquires the lock, spinning until available.
    #[inline]
    pub fn lock(&self) {
        while self
            .locked
            .compare_exchange_weak(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_err()
        {
            while self.locked.load(Ordering::Relaxed) {
                core::hint::spin_loop();
            }
        }
    }

    /// Tries to acquire the lock without spinning.
    #[inline]
    pub fn try_lock(&self) -> bool {
        self.locked
            .compare_exchange(false, true, Ordering::Acquire, Ordering::Relaxed)
            .is_ok()
    }

    /// Releases the lock. Must pair with a previous `lock`/`try_lock`.
    #[inline]
    pub fn unlock(&self) {
        self.locked.store(false, Ordering::Release);
    }

    /// Acquires the lock for the lifetime of the returned guard.
    #[inline]
    pub fn guard(&self) -> DeviceAccessGuard<'_> {
        self.lock();
        DeviceAccessGuard { lock: self }
    }

    #[inline]
    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::Relaxed)
    }
}

impl Default for DeviceAccessLock {
    fn default() -> Self {
        Self::new()
    }
}

impl<'a> Drop for DeviceAccessGuard<'a> {
    fn drop(&mut self) {
        self.lock.unlock();
    }
}
