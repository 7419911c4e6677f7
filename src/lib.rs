//! # SliceMeter
//!
//! Per-task execution-time accounting for a preemptive RTOS on ARM
//! Cortex-M4 microcontrollers.
//!
//! ## Overview
//!
//! SliceMeter hooks the scheduler's context switch. Every time the running
//! task changes, the outgoing task is charged the ticks it consumed since
//! it was switched in, and the incoming task gets a fresh baseline. Tasks
//! can then measure their **own** execution time, with preemption by other
//! tasks excluded automatically:
//!
//! ```ignore
//! kernel::start_task_cycle_counter();
//! filter.process(&mut samples);
//! let cycles = kernel::stop_task_cycle_counter();
//! ```
//!
//! ## Architecture
//!
//! ```text
//! ┌────────────────────────────────────────────────────────┐
//! │                    Application Tasks                   │
//! ├────────────────────────────────────────────────────────┤
//! │                 Kernel API (kernel.rs)                 │
//! │  init() · create_task() · start() · yield_task()       │
//! │  task_cycle_info() · start/stop_task_cycle_counter()   │
//! ├──────────────┬────────────────────┬────────────────────┤
//! │  Scheduler   │  Cycle Accounting  │  Sync Primitives   │
//! │  scheduler.rs│  accounting.rs     │  sync.rs           │
//! │  ─ tick()    │  ─ on_context_     │  ─ critical_section│
//! │  ─ schedule()│      switch()      │                    │
//! │  ─ observers │  ─ start / stop    │                    │
//! ├──────────────┴────────────────────┴────────────────────┤
//! │   Task Model (task.rs) · Accounting Record (cycle_info)│
//! ├────────────────────────────────────────────────────────┤
//! │   Tick Source (tick.rs) · Arch Port (arch/cortex_m4.rs)│
//! │   PendSV · SysTick · SysTickClock · Stack Init         │
//! └────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Memory Model
//!
//! - **No heap**: All state is statically allocated
//! - **Fixed-size TCB array**: `[TaskControlBlock; MAX_TASKS]`, each TCB
//!   owning its stack and its accounting record
//! - **Critical sections**: `critical-section` crate; the single-core
//!   Cortex-M implementation on target, `std` in host tests
//!
//! ## Features
//!
//! - `defmt`: route the `log_*!` macros to `defmt` and derive
//!   `defmt::Format` on public types
//! - `firmware`: build the demo binary (bare-metal targets only)

#![cfg_attr(not(test), no_std)]

pub mod logging;

pub mod accounting;
pub mod arch;
pub mod config;
pub mod cycle_info;
pub mod error;
pub mod kernel;
pub mod scheduler;
pub mod sync;
pub mod task;
pub mod tick;

pub use cycle_info::TaskCycleInfo;
pub use error::{KernelError, Result};
