// The spin, yield and loop strategies follow relax.rs from spin-rs:
// https://github.com/mvdnes/spin-rs/blob/5860ee114094cf200b97348ff332155fbd7159b4/src/relax.rs
//
// Copyright (c) 2014 Mathijs van de Nes
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

//! Strategies that determine how a waiter behaves between two polls of a
//! lock word, and how a releaser notifies those waiters.
//!
//! Every primitive in this crate busy-waits. A [`Relax`] implementation is the
//! "wait for event" half of the platform pair: it runs once per failed poll.
//! [`Relax::signal`] is the "signal event" half: every release operation calls
//! it right after publishing the releasing store. Waiters always re-poll after
//! relaxing, so a lost or spurious signal costs latency, never correctness.

use crate::cfg::hint;

/// A trait implemented by spinning relax strategies.
pub trait Relax {
    /// Initialize the state for the relaxing operation, if any.
    fn new() -> Self;

    /// Perform the relaxing operation during a period of contention.
    fn relax(&mut self);

    /// Wake any context parked by [`relax`] so that it re-polls.
    ///
    /// Called by releasers after their releasing store. The default does
    /// nothing, which is correct for every strategy that never parks.
    ///
    /// [`relax`]: Relax::relax
    #[inline(always)]
    fn signal() {}
}

/// A strategy that rapidly spins while informing the CPU that it should power
/// down non-essential components via [`core::hint::spin_loop`].
///
/// Spinning cannot be told apart from useful work by most schedulers, so a
/// spinning waiter that preempted the lock holder will burn its whole time
/// slice. Prefer [`Yield`] in hosted environments with oversubscribed cores.
pub struct Spin;

impl Relax for Spin {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        hint::spin_loop();
    }
}

/// A strategy that yields the current time slice to the scheduler in favour of
/// other threads or processes.
#[cfg(any(feature = "yield", loom, test))]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub struct Yield;

#[cfg(any(feature = "yield", test))]
impl Relax for Yield {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    /// Under Loom this is Loom's own `yield_now`, which tells the model that
    /// another thread must run for the current one to make progress.
    #[inline]
    fn relax(&mut self) {
        crate::cfg::thread::yield_now();
    }
}

/// A strategy that rapidly spins, without telling the CPU to do any powering down.
///
/// Exists for targets that miscompile or do not support the spin hint
/// intrinsic. Use [`Spin`] otherwise.
pub struct Loop;

impl Relax for Loop {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {}
}

/// A strategy that parks the processor in a low-power state until an event is
/// signaled.
///
/// On `aarch64` waiters execute `wfe` and releasers execute `dsb ishst; sev`,
/// so all parked processors wake and re-poll once the lock word has changed.
/// The event register is sticky: a `sev` that lands between a poll and the
/// following `wfe` makes that `wfe` return at once, so no wake-up is lost.
///
/// On every other architecture this behaves like [`Spin`] and signaling does
/// nothing.
pub struct Wfe;

impl Relax for Wfe {
    #[inline(always)]
    fn new() -> Self {
        Self
    }

    #[inline(always)]
    fn relax(&mut self) {
        #[cfg(all(target_arch = "aarch64", not(all(loom, test))))]
        // SAFETY: `wfe` is a hint that only suspends execution until the next
        // event or interrupt; it touches neither memory nor flags.
        unsafe {
            core::arch::asm!("wfe", options(nostack, preserves_flags));
        }

        #[cfg(not(all(target_arch = "aarch64", not(all(loom, test)))))]
        hint::spin_loop();
    }

    #[inline(always)]
    fn signal() {
        // The barrier orders the releasing store before the event so that a
        // woken waiter observes it on its next poll.
        #[cfg(all(target_arch = "aarch64", not(all(loom, test))))]
        // SAFETY: `dsb` and `sev` have no operands and no side effects beyond
        // ordering stores and setting the global event register.
        unsafe {
            core::arch::asm!("dsb ishst", "sev", options(nostack, preserves_flags));
        }
    }
}

// Exponential backoff is based on the crossbeam-utils implementation:
// https://github.com/crossbeam-rs/crossbeam/blob/371de8c2d304db07662450995848f3dc9598ac99/crossbeam-utils/src/backoff.rs
//
// Copyright (c) 2019 The Crossbeam Project Developers
//
// Licensed under the Apache License, Version 2.0 <LICENSE-APACHE or
// http://www.apache.org/licenses/LICENSE-2.0> or the MIT license
// <LICENSE-MIT or http://opensource.org/licenses/MIT>, at your
// option. This file may not be copied, modified, or distributed
// except according to those terms.

/// A strategy that, as [`Spin`], runs a busy-wait spin-loop, doubling the
/// number of spin hints per poll up to a fixed bound.
///
/// Backing off keeps waiters from hammering the cache line of a contended
/// lock word. Queue-based primitives (the optimistic spin queue) spin on a
/// private flag and gain little from it.
pub struct SpinBackoff {
    step: Step,
}

impl SpinBackoff {
    const SPIN_LIMIT: u32 = 6;
}

impl Relax for SpinBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        self.step.spin_to(Self::SPIN_LIMIT);
        self.step.step_to(Self::SPIN_LIMIT);
    }
}

/// A strategy that backs off like [`SpinBackoff`] for a few rounds, then
/// yields back to the OS scheduler on every further poll.
#[cfg(feature = "yield")]
#[cfg_attr(docsrs, doc(cfg(feature = "yield")))]
pub struct YieldBackoff {
    step: Step,
}

#[cfg(feature = "yield")]
impl YieldBackoff {
    const SPIN_LIMIT: u32 = SpinBackoff::SPIN_LIMIT;
    const YIELD_LIMIT: u32 = 10;
}

#[cfg(feature = "yield")]
impl Relax for YieldBackoff {
    #[inline(always)]
    fn new() -> Self {
        Self { step: Step(0) }
    }

    #[inline(always)]
    fn relax(&mut self) {
        if self.step.0 <= Self::SPIN_LIMIT {
            self.step.spin_to(Self::SPIN_LIMIT);
        } else {
            crate::cfg::thread::yield_now();
        }
        self.step.step_to(Self::YIELD_LIMIT);
    }
}

/// Keeps count of the number of steps taken.
struct Step(u32);

impl Step {
    /// Bounded backoff spinning.
    fn spin_to(&self, max: u32) {
        for _ in 0..1 << self.0.min(max) {
            hint::spin_loop();
        }
    }

    /// Bounded step increment.
    fn step_to(&mut self, end: u32) {
        if self.0 <= end {
            self.0 += 1;
        }
    }
}

#[cfg(all(not(loom), test))]
mod test {
    use super::{Loop, Relax, Spin, SpinBackoff, Wfe, Yield};

    fn relax_n<R: Relax>(n: usize) {
        let mut relax = R::new();
        for _ in 0..n {
            relax.relax();
        }
        R::signal();
    }

    #[test]
    fn every_strategy_returns_from_relax() {
        relax_n::<Spin>(16);
        relax_n::<Loop>(16);
        relax_n::<Yield>(16);
        relax_n::<SpinBackoff>(16);
    }

    #[test]
    fn wfe_returns_after_own_signal() {
        // The event register is set by `sev`, so the following `wfe` must
        // fall through even with no other processor involved.
        let mut relax = Wfe::new();
        for _ in 0..4 {
            Wfe::signal();
            relax.relax();
        }
    }

    #[test]
    fn backoff_step_saturates() {
        let mut relax = SpinBackoff::new();
        for _ in 0..64 {
            relax.relax();
        }
        assert_eq!(relax.step.0, SpinBackoff::SPIN_LIMIT + 1);
    }
}
