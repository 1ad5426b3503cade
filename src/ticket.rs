//! Fair ticket spinlock.
//!
//! A [`TicketLock`] hands out tickets from a fetch-and-add counter and serves
//! them in increasing order, so the lock is granted strictly in the order in
//! which contenders arrived. All contenders poll the same word, which makes it
//! a good fit for short critical sections on a small number of processors.
//! See [`OptimisticSpinQueue`] for a queue where each waiter spins on a
//! private flag instead.
//!
//! [`OptimisticSpinQueue`]: crate::osq::OptimisticSpinQueue

use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{Acquire, Relaxed, Release};

use crate::cfg::atomic::{fence, AtomicU32};
use crate::relax::Relax;

/// Bit offset of the `next` half inside the lock word.
const TICKET_SHIFT: u32 = 16;

/// The amount added to the lock word to take a ticket.
const TICKET_INC: u32 = 1 << TICKET_SHIFT;

/// Mask of the `owner` half inside the lock word.
const OWNER_MASK: u32 = TICKET_INC - 1;

/// Extracts the ticket currently being served.
#[inline(always)]
const fn owner(word: u32) -> u16 {
    (word & OWNER_MASK) as u16
}

/// Extracts the next ticket to be handed out.
#[inline(always)]
const fn next(word: u32) -> u16 {
    (word >> TICKET_SHIFT) as u16
}

/// Serves the next ticket without carrying into the `next` half.
#[inline(always)]
const fn bump_owner(word: u32) -> u32 {
    (word & !OWNER_MASK) | owner(word).wrapping_add(1) as u32
}

/// A FIFO spinlock built from a pair of 16-bit ticket counters packed in a
/// single word.
///
/// The low half holds `owner`, the ticket being served, and the high half holds
/// `next`, the ticket the next contender will draw. The lock is free iff both
/// halves are equal and `next - owner` (wrapping) is the number of contexts
/// holding or waiting for the lock, which may not exceed `u16::MAX`.
///
/// This is a raw lock: it protects no data by itself. Enable the `lock_api`
/// feature for a data-carrying mutex built on top of it.
///
/// # Examples
///
/// ```
/// use osqlock::spins::TicketLock;
///
/// let lock = TicketLock::new();
/// lock.lock();
/// assert!(lock.is_locked());
/// assert!(!lock.try_lock());
/// // SAFETY: The lock was acquired right above.
/// unsafe { lock.unlock() };
/// assert!(!lock.is_locked());
/// ```
pub struct TicketLock<R> {
    word: AtomicU32,
    marker: PhantomData<R>,
}

impl<R> TicketLock<R> {
    /// Creates a new ticket lock in an unlocked state ready for use.
    ///
    /// # Examples
    ///
    /// ```
    /// use osqlock::spins::TicketLock;
    ///
    /// static LOCK: TicketLock = TicketLock::new();
    /// let lock = TicketLock::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new() -> Self {
        Self { word: AtomicU32::new(0), marker: PhantomData }
    }

    /// Creates a new unlocked ticket lock with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub(crate) fn new() -> Self {
        Self { word: AtomicU32::new(0), marker: PhantomData }
    }

    /// Returns `true` if the lock is currently held.
    ///
    /// This method does not provide any synchronization guarantees, so its only
    /// useful as a heuristic, and so must be considered not up to date.
    #[inline]
    pub fn is_locked(&self) -> bool {
        let word = self.word.load(Relaxed);
        owner(word) != next(word)
    }

    /// Returns `true` if the lock is held and at least one other context is
    /// waiting for it.
    ///
    /// As with [`is_locked`], the answer may be stale by the time it returns.
    ///
    /// [`is_locked`]: TicketLock::is_locked
    #[inline]
    pub fn is_contended(&self) -> bool {
        let word = self.word.load(Relaxed);
        next(word).wrapping_sub(owner(word)) > 1
    }

    /// Returns a snapshot of the `(owner, next)` counters.
    pub(crate) fn tickets(&self) -> (u16, u16) {
        let word = self.word.load(Relaxed);
        (owner(word), next(word))
    }

    /// Returns a snapshot of the whole lock word.
    #[cfg(all(not(loom), test))]
    pub(crate) fn word(&self) -> u32 {
        self.word.load(Relaxed)
    }
}

impl<R: Relax> TicketLock<R> {
    /// Acquires the lock, spinning until the ticket drawn by this call is
    /// served.
    ///
    /// Callers are served in the order their tickets were drawn.
    pub fn lock(&self) {
        let prev = self.word.fetch_add(TICKET_INC, Relaxed);
        let ticket = next(prev);
        let mut served = owner(prev);
        let mut relax = R::new();
        while served != ticket {
            relax.relax();
            served = owner(self.word.load(Relaxed));
        }
        fence(Acquire);
    }

    /// Attempts to acquire the lock without spinning.
    ///
    /// Succeeds only if the lock is observed free and the ticket can be drawn
    /// by a single compare-and-swap. On failure the lock word is left untouched.
    pub fn try_lock(&self) -> bool {
        let word = self.word.load(Relaxed);
        if owner(word) != next(word) {
            return false;
        }
        let new = word.wrapping_add(TICKET_INC);
        self.word.compare_exchange(word, new, Acquire, Relaxed).is_ok()
    }

    /// Releases the lock, serving the next ticket in line.
    ///
    /// # Safety
    ///
    /// The caller must hold the lock, acquired by [`lock`] or a successful
    /// [`try_lock`] on this same instance, and must not release it twice.
    ///
    /// [`lock`]: TicketLock::lock
    /// [`try_lock`]: TicketLock::try_lock
    pub unsafe fn unlock(&self) {
        // Contenders may bump `next` concurrently, so only the owner half is
        // rewritten.
        let mut word = self.word.load(Relaxed);
        while let Err(actual) =
            self.word.compare_exchange_weak(word, bump_owner(word), Release, Relaxed)
        {
            word = actual;
        }
        R::signal();
    }
}

#[cfg(not(all(loom, test)))]
impl<R> Default for TicketLock<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for TicketLock<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let (owner, next) = self.tickets();
        f.debug_struct("TicketLock").field("owner", &owner).field("next", &next).finish()
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawMutex for TicketLock<R> {
    type GuardMarker = lock_api::GuardSend;

    #[allow(clippy::declare_interior_mutable_const)]
    const INIT: Self = Self::new();

    #[inline]
    fn lock(&self) {
        Self::lock(self);
    }

    #[inline]
    fn try_lock(&self) -> bool {
        Self::try_lock(self)
    }

    #[inline]
    unsafe fn unlock(&self) {
        // SAFETY: Caller guarantees that the lock is held.
        unsafe { Self::unlock(self) }
    }

    #[inline]
    fn is_locked(&self) -> bool {
        Self::is_locked(self)
    }
}

#[cfg(all(feature = "lock_api", not(loom)))]
unsafe impl<R: Relax> lock_api::RawMutexFair for TicketLock<R> {
    #[inline]
    unsafe fn unlock_fair(&self) {
        // Tickets are already served in arrival order.
        unsafe { Self::unlock(self) }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use std::sync::Arc;
    use std::thread;

    use super::{bump_owner, next, owner, TICKET_INC};
    use crate::test::tests;
    use crate::yields::TicketLock;

    #[test]
    fn lots_and_lots_lock() {
        tests::lots_and_lots_lock::<TicketLock>();
    }

    #[test]
    fn lots_and_lots_try_lock() {
        tests::lots_and_lots_try_lock::<TicketLock>();
    }

    #[test]
    fn lots_and_lots_mixed_lock() {
        tests::lots_and_lots_mixed_lock::<TicketLock>();
    }

    #[test]
    fn smoke() {
        tests::smoke::<TicketLock>();
    }

    #[test]
    fn test_try_lock_idempotent() {
        tests::test_try_lock_idempotent::<TicketLock>();
    }

    #[test]
    fn lock_unlock_serves_one_ticket() {
        let lock = TicketLock::new();
        lock.lock();
        assert_eq!(lock.tickets(), (0, 1));
        unsafe { lock.unlock() };
        assert_eq!(lock.tickets(), (1, 1));
        assert!(!lock.is_locked());
    }

    #[test]
    fn try_lock_race_has_one_winner() {
        let lock = Arc::new(TicketLock::new());
        let handles = (0..2)
            .map(|_| Arc::clone(&lock))
            .map(|lock| thread::spawn(move || lock.try_lock()))
            .collect::<Vec<_>>();
        let wins = handles.into_iter().map(|h| h.join().unwrap()).filter(|won| *won).count();
        // The winner never releases, so the loser cannot have succeeded later.
        assert_eq!(wins, 1);
        assert!(lock.is_locked());
        assert_eq!(lock.tickets(), (0, 1));
    }

    #[test]
    fn contended_reports_waiters() {
        let lock = Arc::new(TicketLock::new());
        lock.lock();
        assert!(!lock.is_contended());
        let waiter = {
            let lock = Arc::clone(&lock);
            thread::spawn(move || {
                lock.lock();
                unsafe { lock.unlock() };
            })
        };
        while !lock.is_contended() {
            thread::yield_now();
        }
        unsafe { lock.unlock() };
        waiter.join().unwrap();
        assert_eq!(lock.tickets(), (2, 2));
    }

    #[test]
    fn tickets_are_served_in_arrival_order() {
        use std::sync::Mutex;

        const WAITERS: u16 = 4;
        let lock = Arc::new(TicketLock::new());
        let order = Arc::new(Mutex::new(Vec::new()));
        lock.lock();
        let mut handles = Vec::new();
        for id in 1..=WAITERS {
            let (waiter, served) = (Arc::clone(&lock), Arc::clone(&order));
            handles.push(thread::spawn(move || {
                waiter.lock();
                served.lock().unwrap().push(id);
                unsafe { waiter.unlock() };
            }));
            // Wait for this waiter to draw its ticket before starting the next.
            while lock.tickets().1 != id + 1 {
                thread::yield_now();
            }
        }
        unsafe { lock.unlock() };
        for handle in handles {
            handle.join().unwrap();
        }
        let order = order.lock().unwrap();
        assert_eq!(*order, (1..=WAITERS).collect::<Vec<_>>());
    }

    #[test]
    fn owner_wraps_without_carry() {
        let word = (7 << 16) | u16::MAX as u32;
        let bumped = bump_owner(word);
        assert_eq!(owner(bumped), 0);
        assert_eq!(next(bumped), 7);
    }

    #[test]
    fn unlock_at_owner_wrap_keeps_next() {
        let lock = TicketLock::new();
        // Ticket `u16::MAX` is served and ticket 0 is waiting.
        lock.word.store((1 << 16) | u16::MAX as u32, core::sync::atomic::Ordering::Relaxed);
        assert!(lock.is_contended());
        unsafe { lock.unlock() };
        assert_eq!(lock.tickets(), (0, 1));
        assert!(lock.is_locked());
        assert!(!lock.is_contended());
        unsafe { lock.unlock() };
        assert_eq!(lock.tickets(), (1, 1));
        assert!(!lock.is_locked());
    }

    #[test]
    fn next_wraps_out_of_word() {
        let lock = TicketLock::new();
        lock.word.store(u32::MAX, core::sync::atomic::Ordering::Relaxed);
        assert!(!lock.is_locked());
        assert!(lock.try_lock());
        assert_eq!(lock.word(), u32::MAX.wrapping_add(TICKET_INC));
        assert!(lock.is_locked());
        unsafe { lock.unlock() };
        assert_eq!(lock.tickets(), (0, 0));
        assert!(!lock.is_locked());
    }

    #[test]
    fn debug_shows_counters() {
        let lock = TicketLock::new();
        lock.lock();
        assert_eq!(format!("{lock:?}"), "TicketLock { owner: 0, next: 1 }");
        unsafe { lock.unlock() };
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;
    use crate::yields::TicketLock;

    #[test]
    fn lock_join() {
        models::lock_join::<TicketLock>();
    }

    #[test]
    fn try_lock_join() {
        models::try_lock_join::<TicketLock>();
    }

    #[test]
    fn mixed_lock_join() {
        models::mixed_lock_join::<TicketLock>();
    }
}
