//! # SliceMeter Configuration
//!
//! Compile-time constants governing the kernel and the accounting core.
//! All limits are fixed at compile time — no dynamic allocation.

/// Maximum number of tasks the system can manage simultaneously.
/// This bounds the static TCB array. Each task consumes `STACK_SIZE`
/// bytes of RAM plus its accounting record.
pub const MAX_TASKS: usize = 8;

/// Maximum number of switch observers the scheduler will notify.
/// Slot 0 is taken by the cycle accounting hook during `kernel::init()`;
/// the remaining slots are free for tracers.
pub const MAX_SWITCH_OBSERVERS: usize = 4;

/// SysTick interrupt frequency in Hz. Determines the scheduler's
/// time-slice granularity, not the accounting resolution (the tick
/// source counts core clock cycles).
pub const TICK_HZ: u32 = 1000;

/// Default time slice in scheduler ticks.
pub const DEFAULT_TIME_SLICE: u32 = 10;

/// Per-task stack size in bytes. Must be large enough for the
/// deepest call chain plus the hardware exception frame (32 bytes)
/// and the software-saved context (32 bytes for R4–R11).
pub const STACK_SIZE: usize = 1024;

/// System clock frequency in Hz (default for STM32F4 at 16 MHz HSI).
/// Also the rate of the accounting tick source on Cortex-M4.
pub const SYSTEM_CLOCK_HZ: u32 = 16_000_000;
