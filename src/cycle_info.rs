//! # Per-Task Accounting Record
//!
//! Every TCB owns one [`AccountingRecord`]. The record is only written by
//! the switch hook (when its task is switched in or out) and by the reset
//! in `start_cycle_counter`, which runs as the owning task.
//!
//! ```text
//!            switched in                     switched out
//!   ─────────────┬───────────────────────────────┬──────────►  ticks
//!          last_timestamp = now₀           used_recent = now₁ - now₀
//!          active_count += 1               used_total += now₁ - counted_from
//!          start = now₀ (first time only)
//! ```
//!
//! `counted_from` equals `last_timestamp` unless the task reset its total
//! partway through the slice; then only the part after the reset counts.

use crate::tick;

/// Public view of a task's execution-time accounting.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct TaskCycleInfo {
    /// Tick value at the task's first scheduling. `0` means "not yet
    /// scheduled"; written once per task lifetime.
    pub start: u64,

    /// Ticks consumed by completed slices since the last reset.
    pub used_total: u64,

    /// Ticks consumed by the most recently completed slice.
    pub used_recent: u64,

    /// Number of times the task has been switched in. Wraps.
    pub active_count: u32,
}

impl TaskCycleInfo {
    pub const fn new() -> Self {
        Self {
            start: 0,
            used_total: 0,
            used_recent: 0,
            active_count: 0,
        }
    }
}

/// Bookkeeping embedded in each task control block.
///
/// Only the switch hook and the current task's reset write to a record;
/// outside the crate it is read-only:
///
/// ```compile_fail
/// let mut record = slicemeter::cycle_info::AccountingRecord::new();
/// record.reset_total(0);
/// ```
#[derive(Debug, Clone, Copy, Default)]
pub struct AccountingRecord {
    /// Tick value when this task last became the running task.
    last_timestamp: u64,
    /// Start of the part of the current slice that `used_total` will absorb.
    counted_from: u64,
    info: TaskCycleInfo,
}

impl AccountingRecord {
    /// A record for a task that has never run.
    pub const fn new() -> Self {
        Self {
            last_timestamp: 0,
            counted_from: 0,
            info: TaskCycleInfo::new(),
        }
    }

    /// Read-only view of the public counters.
    #[inline]
    pub fn info(&self) -> &TaskCycleInfo {
        &self.info
    }

    /// Close the slice that started at `last_timestamp`.
    #[inline]
    pub(crate) fn switched_out(&mut self, now: u64) {
        self.info.used_recent = tick::elapsed(self.last_timestamp, now);
        self.info.used_total = self
            .info
            .used_total
            .wrapping_add(tick::elapsed(self.counted_from, now));
    }

    /// Open a new slice at `now`.
    #[inline]
    pub(crate) fn switched_in(&mut self, now: u64) {
        if self.info.start == 0 {
            self.info.start = now;
        }
        self.last_timestamp = now;
        self.counted_from = now;
        self.info.active_count = self.info.active_count.wrapping_add(1);
    }

    /// Zero `used_total` at `now`, from inside the task's own slice.
    ///
    /// `used_recent`, `start`, `active_count` and the slice start are
    /// left untouched.
    #[inline]
    pub(crate) fn reset_total(&mut self, now: u64) {
        self.info.used_total = 0;
        self.counted_from = now;
    }

    /// `used_total` plus the part of the running slice counted so far.
    ///
    /// Only meaningful for the running task; `now` must not precede the
    /// slice start.
    #[inline]
    pub fn used_total_at(&self, now: u64) -> u64 {
        self.info
            .used_total
            .wrapping_add(tick::elapsed(self.counted_from, now))
    }
}

#[cfg(test)]
impl AccountingRecord {
    /// Build a record mid-slice with an arbitrary slice start, for
    /// wraparound tests.
    pub(crate) fn with_last_timestamp(last_timestamp: u64) -> Self {
        Self {
            last_timestamp,
            counted_from: last_timestamp,
            info: TaskCycleInfo::new(),
        }
    }
}
