pub mod models {
    use core::array;

    use loom::cell::UnsafeCell;
    use loom::sync::Arc;
    use loom::{model, thread};

    use crate::osq::{CpuId, Never, OsqNodes};
    use crate::test::{Int, RawLock};
    use crate::yields::{OptimisticSpinQueue, RwLock};

    /// A shared integer that Loom checks for unsynchronized accesses.
    struct Guarded<L> {
        lock: L,
        data: UnsafeCell<Int>,
    }

    // SAFETY: `data` is only accessed with `lock` held.
    unsafe impl<L: Sync> Sync for Guarded<L> {}

    impl<L: RawLock> Guarded<L> {
        fn new() -> Self {
            Self { lock: L::new(), data: UnsafeCell::new(0) }
        }

        fn inc(&self) {
            self.lock.lock();
            // SAFETY: The lock is held.
            self.data.with_mut(|data| unsafe { *data += 1 });
            unsafe { self.lock.unlock() };
        }

        fn try_inc(&self) {
            if self.lock.try_lock() {
                // SAFETY: The lock is held.
                self.data.with_mut(|data| unsafe { *data += 1 });
                unsafe { self.lock.unlock() };
            }
        }

        fn get(&self) -> Int {
            self.lock.lock();
            // SAFETY: The lock is held.
            let value = self.data.with(|data| unsafe { *data });
            unsafe { self.lock.unlock() };
            value
        }
    }

    // TODO: Three or more threads make unbounded models run for too long. It
    // would be nice to model a queue holding an owner plus two cancelling
    // waiters, so that an unqueue racing an unqueue is covered as well.
    const LOCKS: usize = 2;
    const TRY_LOCKS: usize = 3;

    /// Execution contexts of the queue models.
    const CPUS: usize = 3;

    /// Preemption bound of the three-thread queue models.
    const PREEMPTIONS: usize = 3;

    fn run<L, const RUNS: usize>(f: fn(&Guarded<L>)) -> Int
    where
        L: RawLock,
    {
        let shared = Arc::new(Guarded::<L>::new());
        let handles: [_; RUNS] = array::from_fn(|_| {
            let shared = Arc::clone(&shared);
            thread::spawn(move || f(&shared))
        });
        for handle in handles {
            handle.join().unwrap();
        }
        shared.get()
    }

    /// Evaluates that concurrent `lock` calls serialize all mutations against
    /// the shared data.
    pub fn lock_join<L: RawLock>() {
        model(|| {
            let value = run::<L, LOCKS>(Guarded::inc);
            assert_eq!(value as usize, LOCKS);
        });
    }

    /// Evaluates that concurrent `try_lock` calls serialize all mutations
    /// against the shared data.
    pub fn try_lock_join<L: RawLock>() {
        model(|| {
            let value = run::<L, TRY_LOCKS>(Guarded::try_inc);
            assert!((1..=TRY_LOCKS).contains(&(value as usize)));
        });
    }

    /// Evaluates that concurrent `lock` and `try_lock` calls serialize all
    /// mutations against the shared data.
    pub fn mixed_lock_join<L: RawLock>() {
        fn mixed<L: RawLock>(shared: &Guarded<L>) {
            shared.inc();
            shared.try_inc();
        }
        model(|| {
            let value = run::<L, LOCKS>(mixed::<L>);
            assert!((LOCKS..=LOCKS * 2).contains(&(value as usize)));
        });
    }

    /// Evaluates that a writer never overlaps with a reader: the reader sees
    /// the data either before or after the write, never torn.
    pub fn readers_writer_join() {
        model(|| {
            let shared = Arc::new(Guarded::<RwLock>::new());
            let reader = {
                let shared = Arc::clone(&shared);
                thread::spawn(move || {
                    shared.lock.read_lock();
                    let value = shared.data.with(|data| unsafe { *data });
                    assert!(!shared.lock.is_write_locked());
                    unsafe { shared.lock.read_unlock() };
                    value
                })
            };
            shared.inc();
            let seen = reader.join().unwrap();
            assert!(seen <= 1);
            assert_eq!(shared.get(), 1);
        });
    }

    /// A queue, its node table and a shared integer only accessed by the
    /// context owning the spinning turn.
    struct Osq {
        queue: OptimisticSpinQueue,
        nodes: OsqNodes<CPUS>,
        data: UnsafeCell<Int>,
    }

    // SAFETY: `data` is only accessed by the owner of the spinning turn.
    unsafe impl Sync for Osq {}

    impl Osq {
        fn new() -> Arc<Self> {
            let (queue, nodes) = (OptimisticSpinQueue::new(), OsqNodes::new());
            Arc::new(Self { queue, nodes, data: UnsafeCell::new(0) })
        }

        fn cpu(&self, index: usize) -> CpuId {
            self.nodes.cpu(index).unwrap()
        }

        fn inc(&self) {
            self.data.with_mut(|data| unsafe { *data += 1 });
        }
    }

    /// Evaluates that the spinning turn is passed between two contexts with
    /// no data race, and that the queue is empty afterwards.
    pub fn osq_join_leave() {
        model(|| {
            let osq = Osq::new();
            let handles: [_; LOCKS] = array::from_fn(|index| {
                let osq = Arc::clone(&osq);
                thread::spawn(move || {
                    let cpu = osq.cpu(index);
                    assert!(osq.queue.join(&osq.nodes, cpu, Never));
                    osq.inc();
                    osq.queue.leave(&osq.nodes, cpu);
                })
            });
            for handle in handles {
                handle.join().unwrap();
            }
            assert!(!osq.queue.is_locked());
            assert_eq!(osq.data.with(|data| unsafe { *data }), LOCKS as Int);
        });
    }

    /// Evaluates that a waiter giving up races safely with its predecessor
    /// passing the baton: it either owns the turn or is fully unlinked, and the
    /// queue is empty once both are done.
    pub fn osq_unqueue_races_leave() {
        model(|| {
            let osq = Osq::new();
            let owner = osq.cpu(0);
            assert!(osq.queue.join(&osq.nodes, owner, Never));

            let waiter = {
                let osq = Arc::clone(&osq);
                thread::spawn(move || {
                    let cpu = osq.cpu(1);
                    let mut polled = false;
                    // Give up on the second poll.
                    let resched = |_: CpuId| core::mem::replace(&mut polled, true);
                    let won = osq.queue.join(&osq.nodes, cpu, resched);
                    if won {
                        osq.inc();
                        osq.queue.leave(&osq.nodes, cpu);
                    }
                    won
                })
            };

            osq.inc();
            osq.queue.leave(&osq.nodes, owner);
            let won = waiter.join().unwrap();

            assert!(!osq.queue.is_locked());
            let expected = if won { 2 } else { 1 };
            assert_eq!(osq.data.with(|data| unsafe { *data }), expected);
        });
    }

    /// Evaluates that an owner whose cancelled tail handed the queue back to
    /// it passes its turn to a late joiner with no data race, whether the late
    /// joiner queued behind the owner or behind the cancelling waiter.
    pub fn osq_cancelled_tail_races_late_join() {
        let mut builder = loom::model::Builder::new();
        builder.preemption_bound = Some(PREEMPTIONS);
        builder.check(|| {
            let osq = Osq::new();
            let owner = osq.cpu(0);
            assert!(osq.queue.join(&osq.nodes, owner, Never));

            let cancelling = {
                let osq = Arc::clone(&osq);
                thread::spawn(move || {
                    let cpu = osq.cpu(1);
                    let won = osq.queue.join(&osq.nodes, cpu, |_: CpuId| true);
                    if won {
                        osq.inc();
                        osq.queue.leave(&osq.nodes, cpu);
                    }
                    won
                })
            };
            let late = {
                let osq = Arc::clone(&osq);
                thread::spawn(move || {
                    let cpu = osq.cpu(2);
                    assert!(osq.queue.join(&osq.nodes, cpu, Never));
                    osq.inc();
                    osq.queue.leave(&osq.nodes, cpu);
                })
            };

            osq.inc();
            osq.queue.leave(&osq.nodes, owner);
            let won = cancelling.join().unwrap();
            late.join().unwrap();

            assert!(!osq.queue.is_locked());
            let expected = if won { 3 } else { 2 };
            assert_eq!(osq.data.with(|data| unsafe { *data }), expected);
        });
    }
}
