//! Reader-writer spinlock.
//!
//! The whole lock state fits in one word: the high bit marks an exclusive
//! writer, the remaining bits count the readers. Readers are admitted whenever
//! no writer holds the lock, even if a writer is spinning for it, so a steady
//! flow of readers can starve writers. Callers are expected to keep read-side
//! critical sections short.

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::AtomicU32;
use crate::relax::Relax;

/// Set while a writer holds the lock; the reader count is then zero.
const WRITER: u32 = 1 << 31;

/// Mask of the reader count.
const READERS: u32 = WRITER - 1;

/// A reader-writer spinlock packed in a single 32-bit word.
///
/// Either one writer or up to `2^31 - 1` readers hold the lock at any time,
/// never both. Writers and readers busy-wait on the shared word between
/// attempts, parking through the relax strategy `R`.
///
/// This is a raw lock: it protects no data by itself. Enable the `lock_api`
/// feature for a data-carrying reader-writer lock built on top of it.
///
/// # Examples
///
/// ```
/// use osqlock::spins::RwLock;
///
/// let lock = RwLock::new();
/// lock.read_lock();
/// lock.read_lock();
/// assert_eq!(lock.readers(), 2);
/// assert!(!lock.write_try_lock());
/// // SAFETY: Both read locks were acquired right above.
/// unsafe {
///     lock.read_unlock();
///     lock.read_unlock();
/// }
/// assert!(lock.write_try_lock());
/// // SAFETY: The write lock was acquired right above.
/// unsafe { lock.write_unlock() };
/// ```
pub struct RwLock<R> {
    word: AtomicU32,
    marker: PhantomData<R>,
}

impl<R> RwLock<R> {
    /// Creates a new reader-writer lock in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use osqlock::spins::RwLock;
    ///
    /// static LOCK: RwLock = RwLock::new();
    /// let lock = RwLock::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new() -> Self {
        Self { word: AtomicU32::new(0), marker: PhantomData }
    }

    /// Creates a new unlocked reader-writer lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub(crate) fn new() -> Self {
        Self { word: AtomicU32::new(0), marker: PhantomData }
    }

    /// Returns `true` if the lock is held by a writer or by any reader.
    ///
    /// This method does not provide any synchronization guarantees, so its only
    /// useful as a heuristic, and so must be considered not up to date.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.word.load(Relaxed) != 0
    }

    /// Returns `true` if the lock is held by a writer.
    #[inline]
    pub fn is_write_locked(&self) -> bool {
        self.word.load(Relaxed) & WRITER != 0
    }

    /// Returns the number of readers currently holding the lock.
    #[inline]
    pub fn readers(&self) -> u32 {
        self.word.load(Relaxed) & READERS
    }

    /// Returns a snapshot of the whole lock word.
    #[cfg(all(not(loom), test))]
    pub(crate) fn word(&self) -> u32 {
        self.word.load(Relaxed)
    }
}

impl<R: Relax> RwLock<R> {
    /// Acquires the lock exclusively, spinning until no reader nor writer
    /// holds it.
    pub fn write_lock(&self) {
        while !self.write_try_lock_weak() {
            let mut relax = R::new();
            while self.is_locked() {
                relax.relax();
            }
        }
    }

    /// Attempts to acquire the lock exclusively without spinning.
    pub fn write_try_lock(&self) -> bool {
        self.word.compare_exchange(0, WRITER, Acquire, Relaxed).is_ok()
    }

    /// Releases an exclusive lock.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock exclusively, acquired by [`write_lock`] or
    /// a successful [`write_try_lock`] on this same instance.
    ///
    /// [`write_lock`]: RwLock::write_lock
    /// [`write_try_lock`]: RwLock::write_try_lock
    pub unsafe fn write_unlock(&self) {
        self.word.store(0, Release);
        R::signal();
    }

    /// Atomically turns an exclusive lock into a shared lock held by the
    /// caller, admitting other readers without letting writers in.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock exclusively. On return it holds a shared
    /// lock, to be released with [`read_unlock`].
    ///
    /// [`read_unlock`]: RwLock::read_unlock
    pub unsafe fn downgrade(&self) {
        // Readers never touch the word while the writer bit is set.
        self.word.store(1, Release);
        R::signal();
    }

    /// Acquires a shared lock, spinning while a writer holds the lock.
    ///
    /// A pending writer does not hold readers back.
    pub fn read_lock(&self) {
        let mut relax = R::new();
        let mut word = self.word.load(Relaxed);
        loop {
            if word & WRITER != 0 {
                relax.relax();
                word = self.word.load(Relaxed);
                continue;
            }
            debug_assert!(word < READERS, "reader count overflow");
            match self.word.compare_exchange_weak(word, word + 1, Acquire, Relaxed) {
                Ok(_) => return,
                Err(actual) => word = actual,
            }
        }
    }

    /// Attempts to acquire a shared lock without waiting for a writer.
    ///
    /// Fails as soon as a writer is observed. A compare-and-swap lost against
    /// another reader is retried, since the lock is still available to readers.
    pub fn read_try_lock(&self) -> bool {
        let mut word = self.word.load(Relaxed);
        while word & WRITER == 0 {
            debug_assert!(word < READERS, "reader count overflow");
            match self.word.compare_exchange_weak(word, word + 1, Acquire, Relaxed) {
                Ok(_) => return true,
                Err(actual) => word = actual,
            }
        }
        false
    }

    /// Releases a shared lock.
    ///
    /// The last reader out signals waiters, since a writer may be spinning
    /// for the lock to drain.
    ///
    /// # Safety
    ///
    /// The caller must hold a shared lock, acquired by [`read_lock`], a
    /// successful [`read_try_lock`] or a [`downgrade`] on this same instance.
    ///
    /// [`read_lock`]: RwLock::read_lock
    /// [`read_try_lock`]: RwLock::read_try_lock
    /// [`downgrade`]: RwLock::downgrade
    pub unsafe fn read_unlock(&self) {
        let prev = self.word.fetch_sub(1, Release);
        debug_assert!(prev & READERS != 0, "read_unlock without readers");
        if prev == 1 {
            R::signal();
        }
    }

    /// Tries to acquire the exclusive lock with a weak exchange.
    fn write_try_lock_weak(&self) -> bool {
        self.word.compare_exchange_weak(0, WRITER, Acquire, Relaxed).is_ok()
    }
}

#[cfg(not(all(loom, test)))]
impl<R> Default for RwLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for RwLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let word = self.word.load(Relaxed);
        let mut d = f.debug_struct("RwLock");
        d.field("writer", &(word & WRITER != 0));
        d.field("readers", &(word & READERS));
        d.finish()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawRwLock for RwLock<R> {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn lock_shared(&self) {
        self.read_lock();
    }

    #[inline]
    fn try_lock_shared(&self) -> bool {
        self.read_try_lock()
    }

    #[inline]
    unsafe fn unlock_shared(&self) {
        // SAFETY: Caller guarantees that a shared lock is held.
        unsafe { self.read_unlock() }
    }

    #[inline]
    fn lock_exclusive(&self) {
        self.write_lock();
    }

    #[inline]
    fn try_lock_exclusive(&self) -> bool {
        self.write_try_lock()
    }

    #[inline]
    unsafe fn unlock_exclusive(&self) {
        // SAFETY: Caller guarantees that the exclusive lock is held.
        unsafe { self.write_unlock() }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Self::is_locked(self)
    }

    #[inline]
    fn is_locked_exclusive(&self) -> bool {
        self.is_write_locked()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawRwLockDowngrade for RwLock<R> {
    #[inline]
    unsafe fn downgrade(&self) {
        // SAFETY: Caller guarantees that the exclusive lock is held.
        unsafe { Self::downgrade(self) }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::{Arc, Barrier};
    use std::thread;

    use super::{READERS, WRITER};
    use crate::test::tests;
    use crate::yields::RwLock;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<RwLock>();
    }

    #[test]
    fn lots_and_lots_try_lock() {
        tests::lots_and_lots_try_lock::<RwLock>();
    }

    #[test]
    fn lots_and_lots_mixed_lock() {
        tests::lots_and_lots_mixed_lock::<RwLock>();
    }

    #[test]
    fn smoke() {
        tests::smoke::<RwLock>();
    }

    #[test]
    fn test_try_lock_idempotent() {
        tests::test_try_lock_idempotent::<RwLock>();
    }

    #[test]
    fn write_round_trip_restores_word() {
        let lock = RwLock::new();
        lock.write_lock();
        assert_eq!(lock.word(), WRITER);
        unsafe { lock.write_unlock() };
        assert_eq!(lock.word(), 0);
    }

    #[test]
    fn read_try_lock_fails_under_writer() {
        let lock = RwLock::new();
        lock.write_lock();
        for _ in 0..4 {
            assert!(!lock.read_try_lock());
            assert_eq!(lock.word(), WRITER);
        }
        unsafe { lock.write_unlock() };
        assert!(lock.read_try_lock());
        assert_eq!(lock.word(), 1);
        unsafe { lock.read_unlock() };
    }

    #[test]
    fn write_try_lock_fails_under_reader() {
        let lock = RwLock::new();
        lock.read_lock();
        assert!(!lock.write_try_lock());
        assert_eq!(lock.word(), 1);
        unsafe { lock.read_unlock() };
        assert_eq!(lock.word(), 0);
    }

    #[test]
    fn three_readers_share_the_lock() {
        const READS: usize = 3;
        let lock = Arc::new(RwLock::new());
        let peak = Arc::new(AtomicU32::new(0));
        let barrier = Arc::new(Barrier::new(READS));
        let handles = (0..READS)
            .map(|_| (Arc::clone(&lock), Arc::clone(&peak), Arc::clone(&barrier)))
            .map(|(lock, peak, barrier)| {
                thread::spawn(move || {
                    lock.read_lock();
                    peak.fetch_max(lock.readers(), Ordering::Relaxed);
                    // Every reader is inside before anyone leaves.
                    barrier.wait();
                    assert!(!lock.is_write_locked());
                    unsafe { lock.read_unlock() };
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.word(), 0);
        let peak = peak.load(Ordering::Relaxed);
        assert!((1..=READS as u32).contains(&peak));
    }

    #[test]
    fn writer_waits_for_readers_to_drain() {
        let lock = Arc::new(RwLock::new());
        let acquired = Arc::new(AtomicBool::new(false));
        lock.read_lock();
        let writer = {
            let (lock, acquired) = (Arc::clone(&lock), Arc::clone(&acquired));
            thread::spawn(move || {
                lock.write_lock();
                acquired.store(true, Ordering::Release);
                unsafe { lock.write_unlock() };
            })
        };
        // Readers keep getting in while the writer spins.
        for _ in 0..100 {
            assert!(lock.read_try_lock());
            unsafe { lock.read_unlock() };
            assert!(!acquired.load(Ordering::Acquire));
        }
        unsafe { lock.read_unlock() };
        writer.join().unwrap();
        assert!(acquired.load(Ordering::Acquire));
        assert_eq!(lock.word(), 0);
    }

    #[test]
    fn writer_and_readers_never_overlap() {
        const THREADS: usize = 4;
        const ITERS: usize = 500;
        let lock = Arc::new(RwLock::new());
        let handles = (0..THREADS)
            .map(|_| Arc::clone(&lock))
            .enumerate()
            .map(|(t, lock)| {
                thread::spawn(move || {
                    for i in 0..ITERS {
                        if (t + i) % 3 == 0 {
                            lock.write_lock();
                            assert_eq!(lock.word(), WRITER);
                            unsafe { lock.write_unlock() };
                        } else {
                            lock.read_lock();
                            let word = lock.word();
                            assert_eq!(word & WRITER, 0);
                            assert!(word & READERS >= 1);
                            unsafe { lock.read_unlock() };
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert_eq!(lock.word(), 0);
    }

    #[test]
    fn downgrade_admits_readers_only() {
        let lock = RwLock::new();
        lock.write_lock();
        unsafe { lock.downgrade() };
        assert_eq!(lock.readers(), 1);
        assert!(lock.read_try_lock());
        assert!(!lock.write_try_lock());
        unsafe {
            lock.read_unlock();
            lock.read_unlock();
        }
        assert_eq!(lock.word(), 0);
    }

    #[test]
    fn debug_shows_state() {
        let lock = RwLock::new();
        lock.read_lock();
        assert_eq!(format!("{lock:?}"), "RwLock { writer: false, readers: 1 }");
        unsafe { lock.read_unlock() };
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::yields::RwLock;

    #[test]
    fn lock_join() {
        models::lock_join::<RwLock>();
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join::<RwLock>();
    }

    #[test]
    fn readers_writer_join() {
        models::readers_writer_join();
    }
}
