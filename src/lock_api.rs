//! Data-carrying locks compatible with [lock_api].
//!
//! [`TicketLock`] implements [`RawMutex`] and [`RawMutexFair`], and [`RwLock`]
//! implements [`RawRwLock`] and [`RawRwLockDowngrade`]. This module exports
//! [`lock_api::Mutex`] and [`lock_api::RwLock`] aliases over them, together with
//! their guards, for each relax strategy.
//!
//! [lock_api]: https://crates.io/crates/lock_api
//! [`TicketLock`]: crate::ticket::TicketLock
//! [`RwLock`]: crate::rwlock::RwLock
//! [`lock_api::Mutex`]: https://docs.rs/lock_api/latest/lock_api/struct.Mutex.html
//! [`lock_api::RwLock`]: https://docs.rs/lock_api/latest/lock_api/struct.RwLock.html
//! [`RawMutex`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutex.html
//! [`RawMutexFair`]: https://docs.rs/lock_api/latest/lock_api/trait.RawMutexFair.html
//! [`RawRwLock`]: https://docs.rs/lock_api/latest/lock_api/trait.RawRwLock.html
//! [`RawRwLockDowngrade`]: https://docs.rs/lock_api/latest/lock_api/trait.RawRwLockDowngrade.html

use crate::rwlock;
use crate::ticket;

/// A FIFO mutex protecting a `T`, built on a [`TicketLock`].
///
/// [`TicketLock`]: crate::ticket::TicketLock
pub type Mutex<T, R> = lock_api::Mutex<ticket::TicketLock<R>, T>;

/// A guard that provides mutable data access to a [`Mutex`].
pub type MutexGuard<'a, T, R> = lock_api::MutexGuard<'a, ticket::TicketLock<R>, T>;

/// A reader-writer lock protecting a `T`, built on a raw [`RwLock`].
///
/// [`RwLock`]: crate::rwlock::RwLock
pub type RwLock<T, R> = lock_api::RwLock<rwlock::RwLock<R>, T>;

/// A guard that provides shared data access to a [`RwLock`].
pub type RwLockReadGuard<'a, T, R> = lock_api::RwLockReadGuard<'a, rwlock::RwLock<R>, T>;

/// A guard that provides mutable data access to a [`RwLock`].
pub type RwLockWriteGuard<'a, T, R> = lock_api::RwLockWriteGuard<'a, rwlock::RwLock<R>, T>;

/// Locks that signal the processor that they are running a busy-wait
/// spin-loop during contention.
pub mod spins {
    use crate::relax::Spin;

    /// A [`Mutex`] that implements the [`Spin`] relax strategy.
    ///
    /// # Example
    ///
    /// ```
    /// use osqlock::lock_api::spins::Mutex;
    ///
    /// let mutex = Mutex::new(0);
    /// *mutex.lock() += 1;
    /// assert_eq!(*mutex.lock(), 1);
    /// ```
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Spin>;

    /// A [`MutexGuard`] that implements the [`Spin`] relax strategy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Spin>;

    /// A [`RwLock`] that implements the [`Spin`] relax strategy.
    ///
    /// # Example
    ///
    /// ```
    /// use osqlock::lock_api::spins::RwLock;
    ///
    /// let lock = RwLock::new(5);
    /// {
    ///     let (r1, r2) = (lock.read(), lock.read());
    ///     assert_eq!(*r1 + *r2, 10);
    /// }
    /// *lock.write() += 1;
    /// assert_eq!(*lock.read(), 6);
    /// ```
    /// [`RwLock`]: super::RwLock
    pub type RwLock<T> = super::RwLock<T, Spin>;

    /// A [`RwLockReadGuard`] that implements the [`Spin`] relax strategy.
    ///
    /// [`RwLockReadGuard`]: super::RwLockReadGuard
    pub type RwLockReadGuard<'a, T> = super::RwLockReadGuard<'a, T, Spin>;

    /// A [`RwLockWriteGuard`] that implements the [`Spin`] relax strategy.
    ///
    /// [`RwLockWriteGuard`]: super::RwLockWriteGuard
    pub type RwLockWriteGuard<'a, T> = super::RwLockWriteGuard<'a, T, Spin>;
}

/// Locks that yield the current time slice to the OS scheduler during
/// contention.
#[cfg(any(feature = "yield", test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use crate::relax::Yield;

    /// A [`Mutex`] that implements the [`Yield`] relax strategy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Yield>;

    /// A [`MutexGuard`] that implements the [`Yield`] relax strategy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Yield>;

    /// A [`RwLock`] that implements the [`Yield`] relax strategy.
    ///
    /// [`RwLock`]: super::RwLock
    pub type RwLock<T> = super::RwLock<T, Yield>;

    /// A [`RwLockReadGuard`] that implements the [`Yield`] relax strategy.
    ///
    /// [`RwLockReadGuard`]: super::RwLockReadGuard
    pub type RwLockReadGuard<'a, T> = super::RwLockReadGuard<'a, T, Yield>;

    /// A [`RwLockWriteGuard`] that implements the [`Yield`] relax strategy.
    ///
    /// [`RwLockWriteGuard`]: super::RwLockWriteGuard
    pub type RwLockWriteGuard<'a, T> = super::RwLockWriteGuard<'a, T, Yield>;
}

/// Locks that park the processor until an event is signaled during
/// contention.
pub mod wfe {
    use crate::relax::Wfe;

    /// A [`Mutex`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`Mutex`]: super::Mutex
    pub type Mutex<T> = super::Mutex<T, Wfe>;

    /// A [`MutexGuard`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`MutexGuard`]: super::MutexGuard
    pub type MutexGuard<'a, T> = super::MutexGuard<'a, T, Wfe>;

    /// A [`RwLock`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`RwLock`]: super::RwLock
    pub type RwLock<T> = super::RwLock<T, Wfe>;

    /// A [`RwLockReadGuard`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`RwLockReadGuard`]: super::RwLockReadGuard
    pub type RwLockReadGuard<'a, T> = super::RwLockReadGuard<'a, T, Wfe>;

    /// A [`RwLockWriteGuard`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`RwLockWriteGuard`]: super::RwLockWriteGuard
    pub type RwLockWriteGuard<'a, T> = super::RwLockWriteGuard<'a, T, Wfe>;
}

#[cfg(test)]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::yields::{Mutex, RwLock};

    #[test]
    fn mutex_lots_and_lots() {
        const ITERS: u32 = 1000;
        const THREADS: u32 = 4;
        let mutex = Arc::new(Mutex::new(0));
        let handles = (0..THREADS)
            .map(|_| Arc::clone(&mutex))
            .map(|mutex| {
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        *mutex.lock() += 1;
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!mutex.is_locked());
        assert_eq!(*mutex.lock(), ITERS * THREADS);
    }

    #[test]
    fn mutex_fair_unlock() {
        let mutex = Mutex::new(1);
        let guard = mutex.lock();
        lock_api::MutexGuard::unlock_fair(guard);
        assert!(mutex.try_lock().is_some());
    }

    #[test]
    fn rwlock_downgrade_keeps_readers_in() {
        let lock = RwLock::new(1);
        let mut write = lock.write();
        *write = 2;
        let read = lock_api::RwLockWriteGuard::downgrade(write);
        assert_eq!(*read, 2);
        assert!(lock.try_read().is_some());
        assert!(lock.try_write().is_none());
        drop(read);
        assert!(lock.try_write().is_some());
    }

    #[test]
    fn rwlock_exclusive_reports_locked() {
        let lock = RwLock::new(());
        let write = lock.write();
        assert!(lock.is_locked());
        assert!(lock.is_locked_exclusive());
        drop(write);
        let read = lock.read();
        assert!(lock.is_locked());
        assert!(!lock.is_locked_exclusive());
        drop(read);
        assert!(!lock.is_locked());
    }
}
