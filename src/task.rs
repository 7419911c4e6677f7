//! # Task Control Block
//!
//! Defines the task model for SliceMeter. Each TCB carries its scheduling
//! state, its inline stack and its execution-time accounting record. The
//! record is a plain field: the accounting core never reinterprets stack
//! memory and needs no allocation of its own.

use crate::config::{DEFAULT_TIME_SLICE, STACK_SIZE};
use crate::cycle_info::{AccountingRecord, TaskCycleInfo};

// ---------------------------------------------------------------------------
// Task state machine
// ---------------------------------------------------------------------------

/// Execution state of a task in the scheduler's state machine.
///
/// ```text
///   ┌──────────┐     schedule()      ┌─────────┐
///   │  Ready   │ ──────────────────► │ Running │
///   └──────────┘                     └─────────┘
///        ▲                                │
///        │      time slice / yield        │
///        └────────────────────────────────┘
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TaskState {
    /// Task is ready to run and waiting in the run queue.
    Ready,
    /// Task is currently executing on the CPU.
    Running,
    /// Slot is not schedulable (free, or parked by the kernel).
    Suspended,
}

// ---------------------------------------------------------------------------
// Task configuration (immutable after creation)
// ---------------------------------------------------------------------------

/// Static configuration for a task, set at creation time.
#[derive(Debug, Clone, Copy)]
pub struct TaskConfig {
    /// Priority (higher = more important). Tasks of equal priority
    /// share the CPU round-robin.
    pub priority: u8,

    /// Time slice in scheduler ticks. If 0, uses `DEFAULT_TIME_SLICE`.
    pub time_slice: u32,
}

impl TaskConfig {
    /// Returns the effective time slice, falling back to the system default.
    #[inline]
    pub const fn effective_time_slice(&self) -> u32 {
        if self.time_slice > 0 {
            self.time_slice
        } else {
            DEFAULT_TIME_SLICE
        }
    }
}

/// Per-task stack memory, aligned to 8 bytes as required by ARM AAPCS.
#[repr(C, align(8))]
pub struct TaskStack(pub [u8; STACK_SIZE]);

// ---------------------------------------------------------------------------
// Task Control Block
// ---------------------------------------------------------------------------

/// Task Control Block (TCB).
///
/// TCBs live in a fixed array inside the scheduler, so `stack_pointer`
/// stays valid for as long as the scheduler does.
pub struct TaskControlBlock {
    /// Unique task identifier (index in the scheduler's task array).
    pub id: usize,

    /// Current execution state.
    pub state: TaskState,

    /// Static configuration.
    pub config: TaskConfig,

    /// Saved stack pointer (PSP). Updated on context switch.
    /// Points into `self.stack`.
    pub stack_pointer: *mut u32,

    pub stack: TaskStack,

    /// Remaining scheduler ticks in the current time slice.
    pub ticks_remaining: u32,

    /// Execution-time accounting, maintained by the switch hook.
    pub(crate) cycle: AccountingRecord,

    /// Whether this task is allocated (true) or a free slot (false).
    pub active: bool,
}

// Safety: TaskControlBlock contains a raw pointer (stack_pointer) but
// it always points into the task's own stack array. We only access TCBs
// within critical sections.
unsafe impl Send for TaskControlBlock {}
unsafe impl Sync for TaskControlBlock {}

impl TaskControlBlock {
    /// An unallocated slot. Used to initialize the static array.
    pub const EMPTY: Self = Self::empty();

    /// Create an empty (unallocated) TCB.
    pub const fn empty() -> Self {
        Self {
            id: 0,
            state: TaskState::Suspended,
            config: TaskConfig {
                priority: 0,
                time_slice: 0,
            },
            stack_pointer: core::ptr::null_mut(),
            stack: TaskStack([0u8; STACK_SIZE]),
            ticks_remaining: 0,
            cycle: AccountingRecord::new(),
            active: false,
        }
    }

    /// Initialize a TCB for a new task.
    ///
    /// Starts a new task lifetime: the accounting record is cleared, so
    /// `cycle_info().start` reads 0 until the first switch into the task.
    /// The stack must be separately initialized by the scheduler.
    pub fn init(&mut self, id: usize, config: TaskConfig) {
        self.id = id;
        self.state = TaskState::Ready;
        self.config = config;
        self.ticks_remaining = config.effective_time_slice();
        self.cycle = AccountingRecord::new();
        self.active = true;
    }

    /// Check if this task is runnable (Ready and active).
    #[inline]
    pub fn is_runnable(&self) -> bool {
        self.active && self.state == TaskState::Ready
    }

    /// Public accounting counters for this task.
    #[inline]
    pub fn cycle_info(&self) -> &TaskCycleInfo {
        self.cycle.info()
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tcb_initialization() {
        let mut tcb = TaskControlBlock::empty();
        assert!(!tcb.active);
        assert_eq!(tcb.state, TaskState::Suspended);

        tcb.init(0, TaskConfig { priority: 5, time_slice: 15 });

        assert!(tcb.active);
        assert!(tcb.is_runnable());
        assert_eq!(tcb.config.priority, 5);
        assert_eq!(tcb.ticks_remaining, 15);
        assert_eq!(tcb.cycle_info().start, 0);
    }

    #[test]
    fn test_reinit_clears_accounting() {
        let mut tcb = TaskControlBlock::empty();
        tcb.init(1, TaskConfig { priority: 1, time_slice: 0 });
        tcb.cycle.switched_in(10);
        tcb.cycle.switched_out(30);
        assert_eq!(tcb.cycle_info().used_total, 20);

        tcb.init(1, TaskConfig { priority: 1, time_slice: 0 });
        assert_eq!(*tcb.cycle_info(), TaskCycleInfo::default());
    }

    #[test]
    fn test_effective_time_slice_default() {
        let config = TaskConfig { priority: 1, time_slice: 0 };
        assert_eq!(config.effective_time_slice(), DEFAULT_TIME_SLICE);
    }

    #[test]
    fn test_stack_alignment() {
        assert_eq!(core::mem::align_of::<TaskStack>(), 8);
    }
}
