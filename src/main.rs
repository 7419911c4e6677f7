//! # SliceMeter Example Firmware
//!
//! Demonstrates per-task cycle accounting with 3 tasks competing for the CPU:
//!
//! | Task | Priority | Behavior |
//! |------|----------|----------|
//! | `measured_task` | 2 | Times a fixed workload with start/stop |
//! | `background_task` | 2 | Busy-loops, preempting `measured_task` on slice expiry |
//! | `monitor_task` | 2 | Logs every task's accounting counters |
//!
//! `measured_task` and `background_task` share the CPU round-robin, so the
//! measured workload is preempted several times. The reported cycle count
//! still stays close to the unpreempted cost: only the task's own slices
//! are accumulated.
//!
//! Build with `--features firmware` for `thumbv7em-none-eabihf`.

#![no_std]
#![no_main]

use cortex_m_rt::entry;
use defmt_rtt as _;
use panic_halt as _;

use slicemeter::arch::cortex_m4;
use slicemeter::config::{MAX_TASKS, SYSTEM_CLOCK_HZ};
use slicemeter::kernel;
use slicemeter::task::TaskConfig;
use slicemeter::tick;

// ---------------------------------------------------------------------------
// Task entry points
// ---------------------------------------------------------------------------

/// Runs a fixed workload inside a measurement window and reports the
/// task's own cycles for it.
extern "C" fn measured_task() -> ! {
    loop {
        kernel::start_task_cycle_counter();

        let mut acc: u32 = 0;
        for i in 0..200_000u32 {
            acc = acc.wrapping_mul(31).wrapping_add(i);
        }
        core::hint::black_box(acc);

        let cycles = kernel::stop_task_cycle_counter();
        defmt::info!(
            "workload: {} cycles ({} us of own time)",
            cycles,
            tick::ticks_to_us(cycles as u64, SYSTEM_CLOCK_HZ)
        );

        kernel::yield_task();
    }
}

/// Never yields; only loses the CPU when its time slice expires.
extern "C" fn background_task() -> ! {
    let mut counter: u32 = 0;
    loop {
        counter = counter.wrapping_add(1);
        core::hint::black_box(counter);
    }
}

/// Periodically dumps every task's accounting counters.
extern "C" fn monitor_task() -> ! {
    loop {
        for id in 0..MAX_TASKS {
            if let Some(info) = kernel::task_cycle_info_of(id) {
                defmt::info!("task {}: {}", id, info);
            }
        }
        kernel::yield_task();
    }
}

// ---------------------------------------------------------------------------
// Main entry point
// ---------------------------------------------------------------------------

/// Firmware entry point. Initializes the kernel, creates tasks, and
/// starts the scheduler. Does not return.
#[entry]
fn main() -> ! {
    let cp = cortex_m::Peripherals::take().expect("core peripherals taken once");

    kernel::init(&cortex_m4::CLOCK).expect("observer table has room for accounting");

    let config = TaskConfig { priority: 2, time_slice: 5 };
    kernel::create_task(measured_task, config).expect("Failed to create measured_task");
    kernel::create_task(background_task, config).expect("Failed to create background_task");
    kernel::create_task(monitor_task, TaskConfig { priority: 2, time_slice: 0 })
        .expect("Failed to create monitor_task");

    // Start the scheduler — does not return
    kernel::start(cp)
}
