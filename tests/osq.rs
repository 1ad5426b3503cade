use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use std::thread;

use osqlock::osq::{CpuId, Never, OsqNodes};
use osqlock::spins::OptimisticSpinQueue;

/// Spins until `cpu` is the tail of `queue`.
fn wait_tail(queue: &OptimisticSpinQueue, cpu: CpuId) {
    let queued = format!("OptimisticSpinQueue {{ tail: Some({cpu:?}) }}");
    while format!("{queue:?}") != queued {
        thread::yield_now();
    }
}

#[test]
fn first_joiner_never_polls() {
    let nodes = OsqNodes::<1>::new();
    let cpu = nodes.cpu(0).unwrap();
    let queue = OptimisticSpinQueue::new();
    let polls = AtomicUsize::new(0);
    let resched = |_: CpuId| {
        polls.fetch_add(1, Ordering::Relaxed);
        true
    };
    assert!(queue.join(&nodes, cpu, resched));
    assert_eq!(polls.load(Ordering::Relaxed), 0);
    queue.leave(&nodes, cpu);
    assert!(!queue.is_locked());
}

#[test]
fn baton_reaches_waiter() {
    let queue = Arc::new(OptimisticSpinQueue::new());
    let nodes = Arc::new(OsqNodes::<2>::new());
    let (a, b) = (nodes.cpu(0).unwrap(), nodes.cpu(1).unwrap());
    assert!(queue.join(&nodes, a, Never));

    let waiter = {
        let (queue, nodes) = (queue.clone(), nodes.clone());
        thread::spawn(move || {
            let won = queue.join(&nodes, b, Never);
            queue.leave(&nodes, b);
            won
        })
    };
    // The waiter is queued behind `a`, so leaving passes it the baton.
    wait_tail(&queue, b);
    queue.leave(&nodes, a);
    assert!(waiter.join().unwrap());
    assert!(!queue.is_locked());
}

#[test]
fn cancelled_waiter_leaves_no_trace() {
    let queue = Arc::new(OptimisticSpinQueue::new());
    let nodes = Arc::new(OsqNodes::<2>::new());
    let (a, b) = (nodes.cpu(0).unwrap(), nodes.cpu(1).unwrap());
    assert!(queue.join(&nodes, a, Never));

    let abort = Arc::new(AtomicBool::new(false));
    let waiter = {
        let (queue, nodes, abort) = (queue.clone(), nodes.clone(), abort.clone());
        thread::spawn(move || queue.join(&nodes, b, |_: CpuId| abort.load(Ordering::Relaxed)))
    };
    wait_tail(&queue, b);
    abort.store(true, Ordering::Relaxed);
    assert!(!waiter.join().unwrap());
    assert_eq!(format!("{queue:?}"), format!("OptimisticSpinQueue {{ tail: Some({a:?}) }}"));

    queue.leave(&nodes, a);
    assert!(!queue.is_locked());
}

#[test]
fn guards_serialize_every_context() {
    const CPUS: usize = 4;
    const ITERS: usize = 200;

    static NODES: OsqNodes<CPUS> = OsqNodes::new();

    fn cpu(index: usize) -> CpuId {
        NODES.cpu(index).unwrap()
    }

    let queue = Arc::new(OptimisticSpinQueue::new());
    let inside = Arc::new(AtomicUsize::new(0));
    let handles = (0..CPUS)
        .map(|index| (queue.clone(), inside.clone(), cpu(index)))
        .map(|(queue, inside, cpu)| {
            thread::spawn(move || {
                for _ in 0..ITERS {
                    let guard = queue.join_guard(&NODES, cpu, Never).unwrap();
                    assert_eq!(inside.fetch_add(1, Ordering::Relaxed), 0);
                    assert_eq!(guard.cpu(), cpu);
                    inside.fetch_sub(1, Ordering::Relaxed);
                }
            })
        })
        .collect::<Vec<_>>();
    for handle in handles {
        handle.join().unwrap();
    }
    assert!(!queue.is_locked());
}
