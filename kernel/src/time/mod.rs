//! Millisecond time keeping for driver deadlines.
//!
//! Every bounded wait in the storage and network code is expressed as a
//! `Deadline` against a `Clock`. The kernel supplies a tick-driven clock;
//! tests supply one that advances on demand.

pub mod system;

/// A monotonic millisecond counter
pub trait Clock: Send + Sync {
    /// Milliseconds since an arbitrary, fixed epoch (usually boot)
    fn now_ms(&self) -> u64;

    /// Give up the CPU until something may have changed. The kernel halts
    /// until the next interrupt; the default simply hints a spin loop.
    fn wait_for_interrupt(&self) {
        core::hint::spin_loop();
    }
}

/// A point in time after which a wait should give up
#[derive(Copy, Clone, Debug, Eq, PartialEq, Ord, PartialOrd)]
pub struct Deadline(u64);

impl Deadline {
    pub fn after(clock: &dyn Clock, duration_ms: u64) -> Self {
        Self(clock.now_ms().saturating_add(duration_ms))
    }

    pub fn at(ms: u64) -> Self {
        Self(ms)
    }

    pub fn as_ms(&self) -> u64 {
        self.0
    }

    pub fn has_passed(&self, clock: &dyn Clock) -> bool {
        clock.now_ms() >= self.0
    }

    pub fn remaining(&self, clock: &dyn Clock) -> u64 {
        self.0.saturating_sub(clock.now_ms())
    }
}
