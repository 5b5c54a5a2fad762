//! Utilities for managing system time

use core::sync::atomic::{AtomicU32, Ordering};

use super::Clock;

// The system timer ticks at ~100Hz
pub const HUNDRED_NS_PER_TICK: u64 = 100002;
pub const MS_PER_TICK: u32 = (HUNDRED_NS_PER_TICK / 10000) as u32;

/// Stores the number of clock ticks since the kernel began execution. This is
/// used for relative time offsets within various kernel internals.
static SYSTEM_TICKS: AtomicU32 = AtomicU32::new(0);

/// Called from the PIT interrupt handler
pub fn tick() {
    SYSTEM_TICKS.fetch_add(1, Ordering::SeqCst);
}

pub fn get_system_ticks() -> u32 {
    SYSTEM_TICKS.load(Ordering::SeqCst)
}

/// Clock backed by the PIT tick counter
#[derive(Copy, Clone, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now_ms(&self) -> u64 {
        get_system_ticks() as u64 * MS_PER_TICK as u64
    }

    fn wait_for_interrupt(&self) {
        #[cfg(target_arch = "x86")]
        unsafe {
            core::arch::asm!("sti", "hlt", options(nomem, nostack));
        }
        #[cfg(not(target_arch = "x86"))]
        core::hint::spin_loop();
    }
}
