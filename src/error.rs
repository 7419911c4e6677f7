//! Kernel error types
//!
//! The accounting core itself never fails; it reports "no current task"
//! (or a call made mid-switch) as `None` or `0`. These errors cover the
//! kernel's setup paths only.

use core::fmt;

/// Result type for kernel operations
pub type Result<T> = core::result::Result<T, KernelError>;

/// Kernel-level errors
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelError {
    /// All `MAX_TASKS` TCB slots are allocated
    TaskTableFull,
    /// All `MAX_SWITCH_OBSERVERS` slots are taken
    ObserverTableFull,
    /// The scheduler was started with no task to run
    NoTasks,
    /// The scheduler is mid-switch (called from a switch observer)
    SchedulerBusy,
}

impl fmt::Display for KernelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KernelError::TaskTableFull => write!(f, "task table full"),
            KernelError::ObserverTableFull => write!(f, "switch observer table full"),
            KernelError::NoTasks => write!(f, "no tasks created"),
            KernelError::SchedulerBusy => write!(f, "scheduler busy"),
        }
    }
}
