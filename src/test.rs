use crate::relax::Relax;
use crate::rwlock::RwLock;
use crate::ticket::TicketLock;

/// A common interface over the exclusive side of this crate's raw locks, so
/// that the test suites and Loom models can run against every one of them.
pub trait RawLock: Send + Sync + 'static {
    /// Creates a new unlocked instance.
    fn new() -> Self;

    /// Acquires the lock exclusively.
    fn lock(&self);

    /// Attempts to acquire the lock exclusively without spinning.
    fn try_lock(&self) -> bool;

    /// Releases an exclusive lock.
    ///
    /// # Safety
    ///
    /// Caller must hold the lock.
    unsafe fn unlock(&self);

    /// Returns `true` if the lock is currently held.
    #[cfg_attr(all(loom, test), allow(dead_code))]
    fn is_locked(&self) -> bool;

    /// Returns a snapshot of the lock word.
    #[cfg_attr(all(loom, test), allow(dead_code))]
    fn state(&self) -> u32;
}

impl<R: Relax + Send + Sync + 'static> RawLock for TicketLock<R> {
    fn new() -> Self {
        Self::new()
    }

    fn lock(&self) {
        self.lock();
    }

    fn try_lock(&self) -> bool {
        self.try_lock()
    }

    unsafe fn unlock(&self) {
        self.unlock();
    }

    fn is_locked(&self) -> bool {
        self.is_locked()
    }

    fn state(&self) -> u32 {
        let (owner, next) = self.tickets();
        (u32::from(next) << 16) | u32::from(owner)
    }
}

impl<R: Relax + Send + Sync + 'static> RawLock for RwLock<R> {
    fn new() -> Self {
        Self::new()
    }

    fn lock(&self) {
        self.write_lock();
    }

    fn try_lock(&self) -> bool {
        self.write_try_lock()
    }

    unsafe fn unlock(&self) {
        self.write_unlock();
    }

    fn is_locked(&self) -> bool {
        self.is_locked()
    }

    fn state(&self) -> u32 {
        (u32::from(self.is_write_locked()) << 31) | self.readers()
    }
}

/// An arbitrary unsigned integer type.
pub type Int = u32;

#[cfg(all(not(loom), test))]
pub mod tests {
    use core::cell::UnsafeCell;
    use std::sync::mpsc::channel;
    use std::sync::Arc;
    use std::thread;

    use super::{Int, RawLock};

    /// A shared integer only accessed while `lock` is held.
    pub struct Guarded<L> {
        lock: L,
        data: UnsafeCell<Int>,
    }

    // SAFETY: `data` is only accessed with `lock` held exclusively.
    unsafe impl<L: RawLock> Sync for Guarded<L> {}

    impl<L: RawLock> Guarded<L> {
        pub fn new() -> Self {
            Self { lock: L::new(), data: UnsafeCell::new(0) }
        }

        /// Increments the shared integer non-atomically under the lock.
        pub fn inc(&self) {
            self.lock.lock();
            // SAFETY: The lock is held.
            unsafe { *self.data.get() += 1 };
            unsafe { self.lock.unlock() };
        }

        /// Increments the shared integer if the lock is free.
        pub fn try_inc(&self) {
            if self.lock.try_lock() {
                // SAFETY: The lock is held.
                unsafe { *self.data.get() += 1 };
                unsafe { self.lock.unlock() };
            }
        }

        /// Reads the shared integer under the lock.
        pub fn get(&self) -> Int {
            self.lock.lock();
            // SAFETY: The lock is held.
            let value = unsafe { *self.data.get() };
            unsafe { self.lock.unlock() };
            value
        }
    }

    const ITERS: Int = 1000;
    const THREADS: Int = 4;
    const EXPECTED_VALUE: Int = ITERS * THREADS;

    fn lots_and_lots<L: RawLock>(f: fn(&Guarded<L>)) -> Int {
        let shared = Arc::new(Guarded::<L>::new());
        let (tx, rx) = channel();
        for _ in 0..THREADS {
            let c_shared = Arc::clone(&shared);
            let c_tx = tx.clone();
            thread::spawn(move || {
                for _ in 0..ITERS {
                    f(&c_shared);
                }
                c_tx.send(()).unwrap();
            });
        }
        drop(tx);
        for _ in 0..THREADS {
            rx.recv().unwrap();
        }
        assert!(!shared.lock.is_locked());
        shared.get()
    }

    pub fn lots_and_lots_lock<L: RawLock>() {
        let value = lots_and_lots::<L>(Guarded::inc);
        assert_eq!(value, EXPECTED_VALUE);
    }

    pub fn lots_and_lots_try_lock<L: RawLock>() {
        let value = lots_and_lots::<L>(Guarded::try_inc);
        assert!((1..=EXPECTED_VALUE).contains(&value));
    }

    pub fn lots_and_lots_mixed_lock<L: RawLock>() {
        fn mixed<L: RawLock>(shared: &Guarded<L>) {
            shared.inc();
            shared.try_inc();
        }
        let value = lots_and_lots::<L>(mixed::<L>);
        assert!((EXPECTED_VALUE..=EXPECTED_VALUE * 2).contains(&value));
    }

    pub fn smoke<L: RawLock>() {
        let lock = L::new();
        lock.lock();
        assert!(lock.is_locked());
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        lock.lock();
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
    }

    pub fn test_try_lock_idempotent<L: RawLock>() {
        let lock = L::new();
        assert!(lock.try_lock());
        let held = lock.state();
        for _ in 0..8 {
            assert!(!lock.try_lock());
            assert_eq!(lock.state(), held);
        }
        unsafe { lock.unlock() };
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        unsafe { lock.unlock() };
    }
}
