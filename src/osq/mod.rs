//! Optimistic spin queue.
//!
//! A sleeping lock (mutex, reader-writer semaphore) that finds its owner
//! running on another processor usually does better spinning for a while than
//! going to sleep right away. If every such spinner polled the lock word, a
//! contended lock would drown in cache-line traffic. The [`OptimisticSpinQueue`]
//! orders those spinners instead: only the context at the head of the queue
//! spins on the sleeping lock itself, everybody else spins on a flag of its
//! own node, waiting for the baton.
//!
//! Unlike a plain MCS lock, a queued context may give up waiting at any time,
//! typically because its scheduler wants the processor back or because the
//! context it spins behind has been preempted. The [`Resched`] argument of
//! [`join`] decides when; the queue then unlinks the context safely even while
//! its predecessor is passing it the baton.
//!
//! Queue nodes are never allocated on the spinning path. The host creates one
//! [`OsqNodes`] table for all of its execution contexts at start-up and passes
//! it, along with the caller's [`CpuId`], to every operation.
//!
//! # Examples
//!
//! ```
//! use std::sync::Arc;
//! use std::thread;
//!
//! use osqlock::osq::{CpuId, OsqNodes};
//! use osqlock::spins::OptimisticSpinQueue;
//!
//! static NODES: OsqNodes<4> = OsqNodes::new();
//!
//! let queue = Arc::new(OptimisticSpinQueue::new());
//! let handles = NODES
//!     .cpus()
//!     .map(|cpu| {
//!         let queue = Arc::clone(&queue);
//!         thread::spawn(move || {
//!             // Never give up: this is a plain FIFO spinlock.
//!             if queue.join(&NODES, cpu, |_: CpuId| false) {
//!                 queue.leave(&NODES, cpu);
//!             }
//!         })
//!     })
//!     .collect::<Vec<_>>();
//! for handle in handles {
//!     handle.join().unwrap();
//! }
//! assert!(!queue.is_locked());
//! ```
//!
//! [`join`]: OptimisticSpinQueue::join

mod node;
pub use node::{CpuId, OsqNodes};

mod queue;
pub use queue::{OptimisticSpinQueue, OsqGuard};

/// The condition under which a queued context abandons its wait.
///
/// Polled once per spin of [`OptimisticSpinQueue::join`] with the context
/// currently queued right ahead of the spinner, so an implementation may check
/// both whether the local scheduler needs the processor and whether that
/// predecessor is itself preempted (and therefore in no position to pass the
/// baton soon).
///
/// Implemented for every `FnMut(CpuId) -> bool` closure.
pub trait Resched {
    /// Returns `true` if the spinner must give up its place in the queue.
    fn need_resched(&mut self, prev: CpuId) -> bool;
}

impl<F: FnMut(CpuId) -> bool> Resched for F {
    #[inline]
    fn need_resched(&mut self, prev: CpuId) -> bool {
        self(prev)
    }
}

/// A [`Resched`] condition that never fires: the spinner waits until it
/// owns the turn.
#[derive(Clone, Copy, Debug, Default)]
pub struct Never;

impl Resched for Never {
    #[inline(always)]
    fn need_resched(&mut self, _: CpuId) -> bool {
        false
    }
}
