//! # Tick Source
//!
//! The accounting core's only time base: a free-running `u64` counter that
//! increases monotonically and wraps on overflow.
//!
//! Timestamps from a tick source must never be ordered with `<` or `>`.
//! The only legal operation between two of them is [`elapsed`], a modular
//! subtraction that stays correct across a wrap as long as the real
//! interval fits in 64 bits.

use core::cell::Cell;

use critical_section::Mutex;

/// A monotonic, wrapping tick counter.
///
/// Implementations must be O(1), side-effect free and callable from
/// interrupt context (the switch hook reads it inside PendSV).
pub trait TickSource {
    /// Current counter value.
    fn now(&self) -> u64;
}

/// Ticks elapsed from `since` to `now`, modulo 2^64.
#[inline]
pub const fn elapsed(since: u64, now: u64) -> u64 {
    now.wrapping_sub(since)
}

/// Convert a tick count to microseconds for a counter running at `clock_hz`.
///
/// Returns 0 for a zero clock rate and saturates at `u64::MAX`.
pub const fn ticks_to_us(ticks: u64, clock_hz: u32) -> u64 {
    if clock_hz == 0 {
        return 0;
    }
    let us = (ticks as u128 * 1_000_000) / clock_hz as u128;
    if us > u64::MAX as u128 {
        u64::MAX
    } else {
        us as u64
    }
}

// ---------------------------------------------------------------------------
// Manual tick source
// ---------------------------------------------------------------------------

/// A tick source driven by hand.
///
/// Used by host tests and simulations to replay exact switch timelines.
/// The counter sits behind a critical-section mutex so a `static` instance
/// can be handed to the kernel and advanced while the scheduler reads it.
pub struct ManualTicks {
    now: Mutex<Cell<u64>>,
}

impl ManualTicks {
    /// Create a counter reading `start`.
    pub const fn new(start: u64) -> Self {
        Self { now: Mutex::new(Cell::new(start)) }
    }

    /// Jump to an absolute counter value.
    pub fn set(&self, ticks: u64) {
        critical_section::with(|cs| self.now.borrow(cs).set(ticks));
    }

    /// Advance by `ticks`, wrapping at 2^64 like the hardware counter.
    pub fn advance(&self, ticks: u64) {
        critical_section::with(|cs| {
            let now = self.now.borrow(cs);
            now.set(now.get().wrapping_add(ticks));
        });
    }
}

impl core::fmt::Debug for ManualTicks {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.debug_struct("ManualTicks").field("now", &self.now()).finish()
    }
}

impl Default for ManualTicks {
    fn default() -> Self {
        Self::new(0)
    }
}

impl TickSource for ManualTicks {
    fn now(&self) -> u64 {
        critical_section::with(|cs| self.now.borrow(cs).get())
    }
}
