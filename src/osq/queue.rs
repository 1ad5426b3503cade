use core::fmt;
use core::marker::PhantomData;
use core::sync::atomic::Ordering::{AcqRel, Acquire, Relaxed, Release};

use super::node::{raw, CpuId, OsqNodes, EMPTY};
use super::Resched;
use crate::cfg::atomic::{fence, AtomicU32};
use crate::cfg::trace;
use crate::relax::Relax;

/// An MCS-style queue granting the "optimistic spinning" turn of a sleeping
/// lock to one execution context at a time.
///
/// Contexts [`join`] the queue in arrival order and each spins on the
/// `locked` flag of its own node until its predecessor [`leave`]s and passes
/// the baton. A spinner that observes a reschedule condition backs out of the
/// queue instead, unlinking itself without leaving any stale link behind, and
/// [`join`] returns `false` so the caller can fall back to blocking.
///
/// The queue itself is a single tail word holding the [`CpuId`] of the last
/// queued context, or zero when empty. Nodes live in an [`OsqNodes`] table
/// that every operation borrows.
///
/// # Examples
///
/// ```
/// use osqlock::osq::{Never, OsqNodes};
/// use osqlock::spins::OptimisticSpinQueue;
///
/// static NODES: OsqNodes<2> = OsqNodes::new();
///
/// let queue = OptimisticSpinQueue::new();
/// let cpu = NODES.cpu(0).unwrap();
///
/// // The first context to join an empty queue never spins.
/// assert!(queue.join(&NODES, cpu, Never));
/// assert!(queue.is_locked());
/// queue.leave(&NODES, cpu);
/// assert!(!queue.is_locked());
/// ```
///
/// [`join`]: OptimisticSpinQueue::join
/// [`leave`]: OptimisticSpinQueue::leave
pub struct OptimisticSpinQueue<R> {
    tail: AtomicU32,
    marker: PhantomData<R>,
}

impl<R> OptimisticSpinQueue<R> {
    /// Creates a new, empty queue.
    ///
    /// # Examples
    ///
    /// ```
    /// use osqlock::spins::OptimisticSpinQueue;
    ///
    /// static QUEUE: OptimisticSpinQueue = OptimisticSpinQueue::new();
    /// let queue = OptimisticSpinQueue::new();
    /// ```
    #[cfg(not(all(loom, test)))]
    #[inline]
    pub const fn new() -> Self {
        Self { tail: AtomicU32::new(EMPTY), marker: PhantomData }
    }

    /// Creates a new, empty queue with Loom primitives (non-const).
    #[cfg(all(loom, test))]
    pub(crate) fn new() -> Self {
        Self { tail: AtomicU32::new(EMPTY), marker: PhantomData }
    }

    /// Returns `true` if some context holds or waits for the spinning turn.
    ///
    /// This method does not provide any synchronization guarantees, so its only
    /// useful as a heuristic, and so must be considered not up to date.
    #[inline]
    pub fn is_locked(&self) -> bool {
        self.tail.load(Relaxed) != EMPTY
    }

    /// Returns the context currently at the tail of the queue.
    pub(crate) fn tail(&self) -> Option<CpuId> {
        CpuId::from_raw(self.tail.load(Relaxed))
    }
}

impl<R: Relax> OptimisticSpinQueue<R> {
    /// Queues the context `cpu` and spins until it owns the spinning turn.
    ///
    /// Returns `true` once the turn is owned; the caller must then call
    /// [`leave`] exactly once. Joining an empty queue succeeds at once.
    ///
    /// While waiting, `resched` is polled with the context queued right
    /// ahead. As soon as it returns `true`, the context unqueues itself and
    /// this returns `false`, unless the baton arrived while unqueueing, in
    /// which case the turn is owned after all and this returns `true`.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` was issued by a table larger than `nodes`.
    pub fn join<const N: usize, S: Resched>(
        &self,
        nodes: &OsqNodes<N>,
        cpu: CpuId,
        mut resched: S,
    ) -> bool {
        let node = nodes.node(cpu);
        node.prepare(cpu);

        let curr = cpu.into_raw();
        let Some(mut prev) = CpuId::from_raw(self.tail.swap(curr, AcqRel)) else {
            return true;
        };
        node.prev.store(prev.into_raw(), Relaxed);
        // Publishes `node.prev` along with the link.
        let link = nodes.node(prev).next.swap(curr, Release);
        debug_assert_eq!(link, EMPTY, "predecessor already has a successor");
        R::signal();

        let mut relax = R::new();
        while !node.locked.load(Relaxed) {
            // An unqueueing predecessor may have relinked us further up.
            prev = CpuId::from_raw(node.prev.load(Relaxed)).unwrap_or(prev);
            if resched.need_resched(prev) {
                return self.unqueue(nodes, cpu, prev);
            }
            relax.relax();
        }
        fence(Acquire);
        true
    }

    /// Gives up the spinning turn owned by `cpu`, passing it to the next
    /// queued context if there is one.
    ///
    /// # Panics
    ///
    /// Panics if `cpu` was issued by a table larger than `nodes`.
    ///
    /// Calling this without owning the turn, as returned by a successful
    /// [`join`], corrupts the queue.
    ///
    /// [`join`]: OptimisticSpinQueue::join
    pub fn leave<const N: usize>(&self, nodes: &OsqNodes<N>, cpu: CpuId) {
        let curr = cpu.into_raw();
        // Fast path: nobody queued behind us.
        if self.tail.compare_exchange(curr, EMPTY, Release, Relaxed).is_ok() {
            return;
        }

        let node = nodes.node(cpu);
        // Claiming the successor with a swap keeps it from unlinking itself
        // behind our back.
        let linked = match node.next.load(Relaxed) {
            EMPTY => None,
            _ => CpuId::from_raw(node.next.swap(EMPTY, AcqRel)),
        };
        if let Some(next) = linked.or_else(|| self.wait_next(nodes, cpu, None)) {
            nodes.node(next).locked.store(true, Release);
            R::signal();
        }
    }

    /// Attempts to own the spinning turn, returning a guard that leaves the
    /// queue when dropped.
    ///
    /// Returns `None` if [`join`] gave up.
    ///
    /// # Examples
    ///
    /// ```
    /// use osqlock::osq::{Never, OsqNodes};
    /// use osqlock::spins::OptimisticSpinQueue;
    ///
    /// let nodes = OsqNodes::<1>::new();
    /// let queue = OptimisticSpinQueue::new();
    /// let cpu = nodes.cpu(0).unwrap();
    ///
    /// let guard = queue.join_guard(&nodes, cpu, Never);
    /// assert!(guard.is_some());
    /// drop(guard);
    /// assert!(!queue.is_locked());
    /// ```
    ///
    /// [`join`]: OptimisticSpinQueue::join
    pub fn join_guard<'a, const N: usize, S: Resched>(
        &'a self,
        nodes: &'a OsqNodes<N>,
        cpu: CpuId,
        resched: S,
    ) -> Option<OsqGuard<'a, R, N>> {
        self.join(nodes, cpu, resched).then(|| OsqGuard { queue: self, nodes, cpu })
    }

    /// Backs `cpu` out of the queue after its spin was abandoned.
    ///
    /// Returns `true` only if the baton was handed over while backing out.
    #[cold]
    fn unqueue<const N: usize>(&self, nodes: &OsqNodes<N>, cpu: CpuId, mut prev: CpuId) -> bool {
        trace!("osq: cpu {} unqueueing from behind cpu {}", cpu, prev);
        let node = nodes.node(cpu);
        let curr = cpu.into_raw();
        let mut relax = R::new();

        // Unlink from the predecessor, so it can no longer pass us the baton.
        loop {
            let pred = &nodes.node(prev).next;
            if pred.load(Relaxed) == curr
                && pred.compare_exchange(curr, EMPTY, AcqRel, Relaxed).is_ok()
            {
                break;
            }
            // The baton was passed before we could unlink.
            if node.locked.load(Acquire) {
                trace!("osq: cpu {} got the turn while unqueueing", cpu);
                return true;
            }
            relax.relax();
            // The predecessor may be unqueueing as well and relink us.
            prev = CpuId::from_raw(node.prev.load(Acquire)).unwrap_or(prev);
        }

        // Nobody can reach us through `prev` any longer. Either we are the tail
        // and hand it back to `prev`, or a successor exists and takes our place.
        let Some(next) = self.wait_next(nodes, cpu, Some(prev)) else {
            trace!("osq: cpu {} unqueued as tail", cpu);
            return false;
        };
        nodes.node(next).prev.store(prev.into_raw(), Release);
        let link = nodes.node(prev).next.swap(next.into_raw(), Release);
        debug_assert_eq!(link, EMPTY, "predecessor relinked while unqueueing");
        R::signal();
        trace!("osq: cpu {} unqueued, cpu {} now behind cpu {}", cpu, next, prev);
        false
    }

    /// Finds the successor of `cpu`, or hands the tail over to `prev` if `cpu`
    /// is the tail.
    ///
    /// Returns the successor, after clearing the link to it, or `None` if the
    /// tail was moved back to `prev`, which may be empty.
    fn wait_next<const N: usize>(
        &self,
        nodes: &OsqNodes<N>,
        cpu: CpuId,
        prev: Option<CpuId>,
    ) -> Option<CpuId> {
        let node = nodes.node(cpu);
        let curr = cpu.into_raw();
        let old = raw(prev);
        let mut relax = R::new();
        loop {
            // Emptying the tail may end an owner's turn, so this releases.
            if self.tail.load(Relaxed) == curr
                && self.tail.compare_exchange(curr, old, AcqRel, Relaxed).is_ok()
            {
                R::signal();
                return None;
            }
            // A successor swapped the tail but may not have linked in yet.
            if node.next.load(Relaxed) != EMPTY {
                if let Some(next) = CpuId::from_raw(node.next.swap(EMPTY, AcqRel)) {
                    return Some(next);
                }
            }
            relax.relax();
        }
    }
}

#[cfg(not(all(loom, test)))]
impl<R> Default for OptimisticSpinQueue<R> {
    fn default() -> Self {
        Self::new()
    }
}

impl<R> fmt::Debug for OptimisticSpinQueue<R> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OptimisticSpinQueue").field("tail", &self.tail()).finish()
    }
}

/// An RAII implementation of an owned spinning turn. When this structure is
/// dropped (falls out of scope), the turn is passed on.
///
/// This structure is returned by [`join_guard`] on [`OptimisticSpinQueue`].
///
/// [`join_guard`]: OptimisticSpinQueue::join_guard
#[must_use = "if unused the spinning turn will immediately be given up"]
pub struct OsqGuard<'a, R: Relax, const N: usize> {
    queue: &'a OptimisticSpinQueue<R>,
    nodes: &'a OsqNodes<N>,
    cpu: CpuId,
}

impl<R: Relax, const N: usize> OsqGuard<'_, R, N> {
    /// Returns the context owning the turn.
    pub fn cpu(&self) -> CpuId {
        self.cpu
    }
}

impl<R: Relax, const N: usize> Drop for OsqGuard<'_, R, N> {
    fn drop(&mut self) {
        self.queue.leave(self.nodes, self.cpu);
    }
}

impl<R: Relax, const N: usize> fmt::Debug for OsqGuard<'_, R, N> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OsqGuard").field("cpu", &self.cpu).finish()
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use core::cell::UnsafeCell;
    use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
    use std::sync::Arc;
    use std::thread;

    use super::super::node::EMPTY;
    use super::super::{CpuId, Never, OsqNodes};
    use crate::yields::OptimisticSpinQueue;

    const CPUS: usize = 4;

    type Nodes = OsqNodes<CPUS>;

    struct Shared {
        queue: OptimisticSpinQueue,
        nodes: Nodes,
        data: UnsafeCell<u32>,
    }

    // SAFETY: `data` is only accessed by the context owning the turn.
    unsafe impl Sync for Shared {}

    impl Shared {
        fn new() -> Arc<Self> {
            let (queue, nodes) = (OptimisticSpinQueue::new(), Nodes::new());
            Arc::new(Self { queue, nodes, data: UnsafeCell::new(0) })
        }

        fn cpu(&self, index: usize) -> CpuId {
            self.nodes.cpu(index).unwrap()
        }

        fn next_of(&self, cpu: CpuId) -> Option<CpuId> {
            CpuId::from_raw(self.nodes.node(cpu).next.load(Ordering::Relaxed))
        }

        fn prev_of(&self, cpu: CpuId) -> Option<CpuId> {
            CpuId::from_raw(self.nodes.node(cpu).prev.load(Ordering::Relaxed))
        }

        /// Spins until `cpu` is the queue's tail and linked behind `prev`.
        fn wait_queued(&self, cpu: CpuId, prev: CpuId) {
            while self.queue.tail() != Some(cpu) || self.next_of(prev) != Some(cpu) {
                thread::yield_now();
            }
        }

        /// Walks the queue from its tail through `prev` links, for `len` nodes.
        fn walk(&self, len: usize) -> Vec<CpuId> {
            let mut walk = Vec::new();
            let mut cursor = self.queue.tail();
            while let Some(cpu) = cursor {
                walk.push(cpu);
                if walk.len() == len {
                    break;
                }
                cursor = self.prev_of(cpu);
            }
            walk
        }
    }

    /// Joins on another thread, aborting once `abort` is raised.
    fn spawn_join(
        shared: &Arc<Shared>,
        cpu: CpuId,
        abort: &Arc<AtomicBool>,
    ) -> thread::JoinHandle<bool> {
        let (shared, abort) = (Arc::clone(shared), Arc::clone(abort));
        thread::spawn(move || {
            shared.queue.join(&shared.nodes, cpu, |_: CpuId| abort.load(Ordering::Relaxed))
        })
    }

    #[test]
    fn join_empty_queue_wins_at_once() {
        let shared = Shared::new();
        let a = shared.cpu(0);
        let mut polls = 0;
        assert!(shared.queue.join(&shared.nodes, a, |_: CpuId| {
            polls += 1;
            true
        }));
        assert_eq!(polls, 0);
        assert_eq!(shared.queue.tail(), Some(a));
        shared.queue.leave(&shared.nodes, a);
        assert_eq!(shared.queue.tail.load(Ordering::Relaxed), EMPTY);
    }

    #[test]
    fn leave_passes_baton_to_successor() {
        let shared = Shared::new();
        let (a, b) = (shared.cpu(0), shared.cpu(1));
        let abort = Arc::new(AtomicBool::new(false));
        assert!(shared.queue.join(&shared.nodes, a, Never));

        let waiter = spawn_join(&shared, b, &abort);
        shared.wait_queued(b, a);
        assert!(!shared.nodes.node(b).locked.load(Ordering::Relaxed));

        shared.queue.leave(&shared.nodes, a);
        assert!(waiter.join().unwrap());
        assert!(shared.nodes.node(b).locked.load(Ordering::Relaxed));
        assert_eq!(shared.queue.tail(), Some(b));

        shared.queue.leave(&shared.nodes, b);
        assert!(!shared.queue.is_locked());
    }

    #[test]
    fn cancelled_tail_hands_tail_back() {
        let shared = Shared::new();
        let (a, b) = (shared.cpu(0), shared.cpu(1));
        let abort = Arc::new(AtomicBool::new(false));
        assert!(shared.queue.join(&shared.nodes, a, Never));

        let waiter = spawn_join(&shared, b, &abort);
        shared.wait_queued(b, a);
        abort.store(true, Ordering::Relaxed);
        assert!(!waiter.join().unwrap());

        // No stale reference to the cancelled context is left behind.
        assert_eq!(shared.queue.tail(), Some(a));
        assert_eq!(shared.next_of(a), None);

        shared.queue.leave(&shared.nodes, a);
        assert_eq!(shared.queue.tail.load(Ordering::Relaxed), EMPTY);
    }

    #[test]
    fn cancelled_middle_is_spliced_out() {
        let shared = Shared::new();
        let (a, b, c) = (shared.cpu(0), shared.cpu(1), shared.cpu(2));
        let abort_b = Arc::new(AtomicBool::new(false));
        let abort_c = Arc::new(AtomicBool::new(false));
        assert!(shared.queue.join(&shared.nodes, a, Never));

        let waiter_b = spawn_join(&shared, b, &abort_b);
        shared.wait_queued(b, a);
        let waiter_c = spawn_join(&shared, c, &abort_c);
        shared.wait_queued(c, b);
        assert_eq!(shared.walk(3), [c, b, a]);

        abort_b.store(true, Ordering::Relaxed);
        assert!(!waiter_b.join().unwrap());
        assert_eq!(shared.next_of(a), Some(c));
        assert_eq!(shared.prev_of(c), Some(a));
        assert_eq!(shared.walk(2), [c, a]);

        shared.queue.leave(&shared.nodes, a);
        assert!(waiter_c.join().unwrap());
        assert_eq!(shared.queue.tail(), Some(c));
        shared.queue.leave(&shared.nodes, c);
        assert!(!shared.queue.is_locked());
    }

    #[test]
    fn cancelled_head_waiter_relinks_to_owner() {
        let shared = Shared::new();
        let cpus = [shared.cpu(0), shared.cpu(1), shared.cpu(2), shared.cpu(3)];
        let aborts = [(); CPUS].map(|_| Arc::new(AtomicBool::new(false)));
        assert!(shared.queue.join(&shared.nodes, cpus[0], Never));

        let mut waiters = Vec::new();
        for i in 1..CPUS {
            waiters.push(spawn_join(&shared, cpus[i], &aborts[i]));
            shared.wait_queued(cpus[i], cpus[i - 1]);
        }
        // Cancel the two waiters right behind the owner, one after the other.
        for i in 1..3 {
            aborts[i].store(true, Ordering::Relaxed);
        }
        let mut waiters = waiters.into_iter();
        assert!(!waiters.next().unwrap().join().unwrap());
        assert!(!waiters.next().unwrap().join().unwrap());
        assert_eq!(shared.walk(2), [cpus[3], cpus[0]]);

        shared.queue.leave(&shared.nodes, cpus[0]);
        assert!(waiters.next().unwrap().join().unwrap());
        shared.queue.leave(&shared.nodes, cpus[3]);
        assert!(!shared.queue.is_locked());
    }

    #[test]
    fn owner_hands_off_past_cancelled_tail() {
        const ROUNDS: u32 = 200;
        for _ in 0..ROUNDS {
            let shared = Shared::new();
            let (a, b, c) = (shared.cpu(0), shared.cpu(1), shared.cpu(2));
            assert!(shared.queue.join(&shared.nodes, a, Never));

            let cancelling = {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    let won = shared.queue.join(&shared.nodes, b, |_: CpuId| true);
                    if won {
                        // SAFETY: This context owns the turn.
                        unsafe { *shared.data.get() += 1 };
                        shared.queue.leave(&shared.nodes, b);
                    }
                    won
                })
            };
            let late = {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    assert!(shared.queue.join(&shared.nodes, c, Never));
                    // SAFETY: This context owns the turn.
                    unsafe { *shared.data.get() += 1 };
                    shared.queue.leave(&shared.nodes, c);
                })
            };

            // SAFETY: This context owns the turn.
            unsafe { *shared.data.get() += 1 };
            shared.queue.leave(&shared.nodes, a);
            let won = cancelling.join().unwrap();
            late.join().unwrap();

            assert_eq!(shared.queue.tail.load(Ordering::Relaxed), EMPTY);
            assert_eq!(unsafe { *shared.data.get() }, 2 + u32::from(won));
        }
    }

    #[test]
    fn guard_leaves_on_drop() {
        let shared = Shared::new();
        let a = shared.cpu(0);
        {
            let guard = shared.queue.join_guard(&shared.nodes, a, Never).unwrap();
            assert_eq!(guard.cpu(), a);
            assert!(shared.queue.is_locked());
        }
        assert!(!shared.queue.is_locked());
    }

    #[test]
    fn lots_and_lots_join() {
        const ITERS: u32 = 1000;
        let shared = Shared::new();
        let handles = (0..CPUS)
            .map(|index| (Arc::clone(&shared), shared.cpu(index)))
            .map(|(shared, cpu)| {
                thread::spawn(move || {
                    for _ in 0..ITERS {
                        assert!(shared.queue.join(&shared.nodes, cpu, Never));
                        // SAFETY: This context owns the turn.
                        unsafe { *shared.data.get() += 1 };
                        shared.queue.leave(&shared.nodes, cpu);
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        assert!(!shared.queue.is_locked());
        assert_eq!(unsafe { *shared.data.get() }, ITERS * CPUS as u32);
    }

    #[test]
    fn lots_and_lots_join_with_cancellation() {
        const ITERS: u32 = 1000;
        let shared = Shared::new();
        let wins = Arc::new(AtomicU32::new(0));
        let handles = (0..CPUS)
            .map(|index| (Arc::clone(&shared), Arc::clone(&wins), shared.cpu(index)))
            .map(|(shared, wins, cpu)| {
                thread::spawn(move || {
                    let mut polls = 0_u32;
                    for _ in 0..ITERS {
                        let resched = |_: CpuId| {
                            polls = polls.wrapping_add(1);
                            polls % 7 == 0
                        };
                        if shared.queue.join(&shared.nodes, cpu, resched) {
                            // SAFETY: This context owns the turn.
                            unsafe { *shared.data.get() += 1 };
                            wins.fetch_add(1, Ordering::Relaxed);
                            shared.queue.leave(&shared.nodes, cpu);
                        }
                    }
                })
            })
            .collect::<Vec<_>>();
        for handle in handles {
            handle.join().unwrap();
        }
        // Quiescent: every cancellation unlinked itself and every owner left.
        assert_eq!(shared.queue.tail.load(Ordering::Relaxed), EMPTY);
        let wins = wins.load(Ordering::Relaxed);
        assert!(wins >= 1);
        assert_eq!(unsafe { *shared.data.get() }, wins);
    }

    #[test]
    fn debug_shows_tail() {
        let shared = Shared::new();
        let a = shared.cpu(2);
        assert!(shared.queue.join(&shared.nodes, a, Never));
        assert_eq!(format!("{:?}", shared.queue), "OptimisticSpinQueue { tail: Some(CpuId(2)) }");
        shared.queue.leave(&shared.nodes, a);
        assert_eq!(format!("{:?}", shared.queue), "OptimisticSpinQueue { tail: None }");
    }
}

#[cfg(all(loom, test))]
mod test {
    use crate::loom::models;

    #[test]
    fn join_leave_join() {
        models::osq_join_leave();
    }

    #[test]
    fn unqueue_races_leave() {
        models::osq_unqueue_races_leave();
    }

    #[test]
    fn cancelled_tail_races_late_join() {
        models::osq_cancelled_tail_races_late_join();
    }
}
