//! The lowest-level mutual exclusion primitives of a multiprocessor kernel:
//! a fair ticket spinlock, a reader-writer spinlock and an MCS-style
//! optimistic spin queue with cancellable waiting.
//!
//! - [`TicketLock`] serves contenders strictly in arrival order. A waiter has
//!   exactly as many turns ahead of it as contexts that arrived before it.
//! - [`RwLock`] admits any number of readers or one writer. It favours
//!   readers: a continuous flow of readers can starve writers.
//! - [`OptimisticSpinQueue`] queues the contexts that spin on behalf of a
//!   higher-level sleeping lock, each on a flag of its own, and lets any of
//!   them back out when it should rather sleep. See the [`osq`] module.
//!
//! Every lock state fits in one 32-bit atomic word and no operation allocates.
//! This crate is `no_std` by default.
//!
//! ## Waiting and signaling
//!
//! All waits are busy-waits. What a waiter does between two polls is decided
//! by a relax strategy, a type implementing [`Relax`], which also decides how
//! a releaser wakes parked waiters. [`Wfe`] parks `aarch64` processors with
//! `wfe` and wakes them with `sev`. See the [`relax`] module for the others.
//! The [`spins`], [`loops`], [`wfe`] and [`yields`] modules provide aliases of
//! every primitive bound to one strategy.
//!
//! ## Contracts
//!
//! Locks are released through `unsafe` functions: releasing a lock not held by
//! the caller, or releasing it twice, is not detected and breaks mutual
//! exclusion. Callers unwilling to wait use the `try` variants, which never
//! spin on contention. Only the optimistic spin queue supports abandoning a
//! wait.
//!
//! ## Features
//!
//! - `yield`: enables the [`Yield`] and `YieldBackoff` strategies, which give
//!   the time slice back to the OS scheduler. Requires `std`.
//! - `lock_api`: implements the [lock_api] raw traits for [`TicketLock`] and
//!   [`RwLock`], and exports data-carrying aliases in the `lock_api` module.
//! - `log`: emits `trace` records through the [log] facade when a queued
//!   context abandons the optimistic spin queue.
//!
//! [`TicketLock`]: ticket::TicketLock
//! [`RwLock`]: rwlock::RwLock
//! [`OptimisticSpinQueue`]: osq::OptimisticSpinQueue
//! [`Relax`]: relax::Relax
//! [`Wfe`]: relax::Wfe
//! [`Yield`]: relax::Yield
//! [lock_api]: https://docs.rs/lock_api/latest/lock_api
//! [log]: https://docs.rs/log/latest/log

#![cfg_attr(all(not(feature = "yield"), not(test)), no_std)]
#![cfg_attr(docsrs, feature(doc_cfg))]
#![warn(missing_docs)]

pub mod osq;
pub mod relax;
pub mod rwlock;
pub mod ticket;

#[cfg(all(feature = "lock_api", not(loom)))]
#[cfg_attr(docsrs, doc(cfg(feature = "lock_api")))]
pub mod lock_api;

pub(crate) mod cfg;

#[cfg(test)]
pub(crate) mod test;

#[cfg(all(loom, test))]
pub(crate) mod loom;

/// Primitives that signal the processor that they are running a busy-wait
/// spin-loop during contention.
pub mod spins {
    use crate::relax::Spin;

    /// A [`TicketLock`] that implements the [`Spin`] relax strategy.
    ///
    /// [`TicketLock`]: crate::ticket::TicketLock
    pub type TicketLock = crate::ticket::TicketLock<Spin>;

    /// A [`RwLock`] that implements the [`Spin`] relax strategy.
    ///
    /// [`RwLock`]: crate::rwlock::RwLock
    pub type RwLock = crate::rwlock::RwLock<Spin>;

    /// An [`OptimisticSpinQueue`] that implements the [`Spin`] relax strategy.
    ///
    /// [`OptimisticSpinQueue`]: crate::osq::OptimisticSpinQueue
    pub type OptimisticSpinQueue = crate::osq::OptimisticSpinQueue<Spin>;

    /// Primitives that perform exponential backoff while signaling the
    /// processor that they are running a busy-wait spin-loop.
    pub mod backoff {
        use crate::relax::SpinBackoff;

        /// A [`TicketLock`] that implements the [`SpinBackoff`] relax strategy.
        ///
        /// [`TicketLock`]: crate::ticket::TicketLock
        pub type TicketLock = crate::ticket::TicketLock<SpinBackoff>;

        /// A [`RwLock`] that implements the [`SpinBackoff`] relax strategy.
        ///
        /// [`RwLock`]: crate::rwlock::RwLock
        pub type RwLock = crate::rwlock::RwLock<SpinBackoff>;
    }
}

/// Primitives that yield the current time slice to the OS scheduler during
/// contention.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub mod yields {
    use crate::relax::Yield;

    /// A [`TicketLock`] that implements the [`Yield`] relax strategy.
    ///
    /// [`TicketLock`]: crate::ticket::TicketLock
    pub type TicketLock = crate::ticket::TicketLock<Yield>;

    /// A [`RwLock`] that implements the [`Yield`] relax strategy.
    ///
    /// [`RwLock`]: crate::rwlock::RwLock
    pub type RwLock = crate::rwlock::RwLock<Yield>;

    /// An [`OptimisticSpinQueue`] that implements the [`Yield`] relax strategy.
    ///
    /// [`OptimisticSpinQueue`]: crate::osq::OptimisticSpinQueue
    pub type OptimisticSpinQueue = crate::osq::OptimisticSpinQueue<Yield>;

    /// Primitives that back off while spinning up to a threshold, then yield
    /// back to the OS scheduler.
    #[cfg(feature = "yield")]
    pub mod backoff {
        use crate::relax::YieldBackoff;

        /// A [`TicketLock`] that implements the [`YieldBackoff`] relax strategy.
        ///
        /// [`TicketLock`]: crate::ticket::TicketLock
        pub type TicketLock = crate::ticket::TicketLock<YieldBackoff>;

        /// A [`RwLock`] that implements the [`YieldBackoff`] relax strategy.
        ///
        /// [`RwLock`]: crate::rwlock::RwLock
        pub type RwLock = crate::rwlock::RwLock<YieldBackoff>;
    }
}

/// Primitives that rapidly spin without telling the CPU to do any power down
/// during contention.
pub mod loops {
    use crate::relax::Loop;

    /// A [`TicketLock`] that implements the [`Loop`] relax strategy.
    ///
    /// [`TicketLock`]: crate::ticket::TicketLock
    pub type TicketLock = crate::ticket::TicketLock<Loop>;

    /// A [`RwLock`] that implements the [`Loop`] relax strategy.
    ///
    /// [`RwLock`]: crate::rwlock::RwLock
    pub type RwLock = crate::rwlock::RwLock<Loop>;

    /// An [`OptimisticSpinQueue`] that implements the [`Loop`] relax strategy.
    ///
    /// [`OptimisticSpinQueue`]: crate::osq::OptimisticSpinQueue
    pub type OptimisticSpinQueue = crate::osq::OptimisticSpinQueue<Loop>;
}

/// Primitives that park the processor until an event is signaled during
/// contention, and signal an event on release.
pub mod wfe {
    use crate::relax::Wfe;

    /// A [`TicketLock`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`TicketLock`]: crate::ticket::TicketLock
    pub type TicketLock = crate::ticket::TicketLock<Wfe>;

    /// A [`RwLock`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`RwLock`]: crate::rwlock::RwLock
    pub type RwLock = crate::rwlock::RwLock<Wfe>;

    /// An [`OptimisticSpinQueue`] that implements the [`Wfe`] relax strategy.
    ///
    /// [`OptimisticSpinQueue`]: crate::osq::OptimisticSpinQueue
    pub type OptimisticSpinQueue = crate::osq::OptimisticSpinQueue<Wfe>;
}
