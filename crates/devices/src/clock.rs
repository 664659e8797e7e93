//! Virtual time sources for device models.
//!
//! Devices take a [`Clock`] handle at construction and read monotonic guest
//! time from it on every access. A production host maps this onto its own
//! time base; unit tests drive a [`ManualClock`] deterministically.

use std::cell::Cell;
use std::rc::Rc;

pub trait Clock {
    /// Current monotonic virtual time, in nanoseconds.
    fn now_ns(&self) -> u64;
}

/// Manually advanced [`Clock`] for tests and host-driven setups.
///
/// Clones share the same underlying instant, so a host can keep one handle
/// and hand clones to any number of devices.
#[derive(Clone, Debug, Default)]
pub struct ManualClock {
    now_ns: Rc<Cell<u64>>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Advances the clock by `ns` nanoseconds.
    ///
    /// # Panics
    ///
    /// Panics if advancing would overflow `u64`. (`u64` nanoseconds is ~584
    /// years.)
    pub fn advance_ns(&self, ns: u64) {
        self.now_ns.set(
            self.now_ns
                .get()
                .checked_add(ns)
                .expect("virtual clock overflowed u64::MAX"),
        );
    }

    /// Moves the clock to an absolute instant. Must not move time backwards
    /// past a deadline a device has already observed.
    pub fn set_ns(&self, now_ns: u64) {
        self.now_ns.set(now_ns);
    }
}

impl Clock for ManualClock {
    fn now_ns(&self) -> u64 {
        self.now_ns.get()
    }
}
