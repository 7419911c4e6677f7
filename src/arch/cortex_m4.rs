//! # Cortex-M4 Port Layer
//!
//! Hardware-specific code for the ARM Cortex-M4 (Thumb-2) processor:
//! SysTick configuration, the PendSV context switch, first-task launch
//! and the SysTick-based tick source used for cycle accounting.
//!
//! ## Context Switch Mechanism
//!
//! The Cortex-M4 uses a split-stack model:
//! - **MSP** (Main Stack Pointer): Used by the kernel and interrupt handlers
//! - **PSP** (Process Stack Pointer): Used by tasks in Thread mode
//!
//! On exception entry, the hardware automatically stacks R0–R3, R12, LR, PC,
//! and xPSR onto the process stack. The PendSV handler manually saves and
//! restores R4–R11, which completes the full context save/restore. The
//! switch observers (cycle accounting first) run inside `do_context_switch`.
//!
//! ## Interrupt Priorities
//!
//! - SysTick: Priority 0xFF (lowest)
//! - PendSV: Priority 0xFF (lowest) — runs only when no other ISR is active
//!
//! With equal priorities SysTick never preempts PendSV, so the tick source
//! must account for a pending, not-yet-handled SysTick wrap itself.

use core::arch::{asm, naked_asm};
use core::cell::Cell;

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{SCB, SYST};
use critical_section::Mutex;

use crate::config::{SYSTEM_CLOCK_HZ, TICK_HZ};
use crate::kernel;
use crate::tick::TickSource;

// ---------------------------------------------------------------------------
// SysTick configuration
// ---------------------------------------------------------------------------

/// Configure the SysTick timer for the scheduler tick.
///
/// Sets up SysTick to fire at `TICK_HZ` from the processor clock. The
/// same down-counter provides sub-tick resolution to [`SysTickClock`].
pub fn configure_systick(syst: &mut SYST) {
    let reload = SYSTEM_CLOCK_HZ / TICK_HZ - 1;
    syst.set_reload(reload);
    syst.clear_current();
    syst.set_clock_source(SystClkSource::Core);
    syst.enable_counter();
    syst.enable_interrupt();
}

// ---------------------------------------------------------------------------
// Tick source
// ---------------------------------------------------------------------------

/// Core-clock cycles accounted for by completed SysTick periods.
static PERIOD_BASE: Mutex<Cell<u64>> = Mutex::new(Cell::new(0));

/// 64-bit cycle counter built from SysTick.
///
/// `now()` = cycles of all completed SysTick periods + cycles elapsed in
/// the current one. Resolution is one core clock cycle; the counter wraps
/// after 2^64 cycles.
pub struct SysTickClock;

/// The tick source handed to `kernel::init()` on Cortex-M4.
pub static CLOCK: SysTickClock = SysTickClock;

impl SysTickClock {
    /// Fold one completed SysTick period into the base.
    fn on_wrap(&self) {
        critical_section::with(|cs| {
            let base = PERIOD_BASE.borrow(cs);
            base.set(base.get().wrapping_add(u64::from(SYST::get_reload()) + 1));
        });
    }
}

impl TickSource for SysTickClock {
    fn now(&self) -> u64 {
        critical_section::with(|cs| {
            let mut base = PERIOD_BASE.borrow(cs).get();
            let reload = u64::from(SYST::get_reload());
            let mut current = u64::from(SYST::get_current());

            // Counter wrapped but SysTick has not run yet: count the period
            // here and re-read, since `current` may predate the wrap.
            if SCB::is_pendst_pending() {
                base = base.wrapping_add(reload + 1);
                current = u64::from(SYST::get_current());
            }

            base.wrapping_add(reload - current)
        })
    }
}

// ---------------------------------------------------------------------------
// PendSV trigger
// ---------------------------------------------------------------------------

/// Trigger a PendSV exception to perform a context switch.
#[inline]
pub fn trigger_pendsv() {
    SCB::set_pendsv();
}

// ---------------------------------------------------------------------------
// Interrupt priority configuration
// ---------------------------------------------------------------------------

/// Set PendSV and SysTick to the lowest interrupt priority.
///
/// Context switches then never preempt application-level ISRs.
pub fn set_interrupt_priorities(scb: &mut SCB) {
    // Safety: called with interrupts disabled, before any task runs, so no
    // priority-based critical section can be broken.
    unsafe {
        scb.set_priority(SystemHandler::PendSV, 0xFF);
        scb.set_priority(SystemHandler::SysTick, 0xFF);
    }
}

// ---------------------------------------------------------------------------
// First task launch
// ---------------------------------------------------------------------------

/// Start the first task by switching to PSP and branching to Thread mode.
///
/// Called once from `kernel::start()`; never returns. Re-enables
/// interrupts as it jumps into the task.
///
/// # Safety
/// Must only be called once, with a stack pointer prepared by
/// `Scheduler::create_task`.
pub unsafe fn start_first_task(psp: *const u32) -> ! {
    asm!(
        // Set PSP to the task's stack pointer (skip SW-saved R4-R11)
        "adds r0, #32",
        "msr psp, r0",

        // Switch to PSP for Thread mode (CONTROL.SPSEL = 1)
        "movs r0, #2",
        "msr control, r0",
        "isb",

        // Pop the hardware frame manually; this is not a real exception return
        "pop {{r0-r3, r12}}",
        "pop {{r4}}",          // LR (task_exit, discarded)
        "pop {{r5}}",          // PC (task entry point)
        "pop {{r6}}",          // xPSR (discarded)

        "cpsie i",
        "bx r5",

        in("r0") psp,
        options(noreturn)
    );
}

// ---------------------------------------------------------------------------
// PendSV handler (context switch)
// ---------------------------------------------------------------------------

/// PendSV exception handler — performs the actual context switch.
///
/// ## Sequence
/// 1. Save R4–R11 onto the current task's stack (PSP)
/// 2. Store the updated PSP into the current task's TCB
/// 3. Select the next task; switch observers run here
/// 4. Load the next task's PSP from its TCB
/// 5. Restore R4–R11 from the new task's stack
/// 6. Return from exception (hardware restores R0–R3, R12, LR, PC, xPSR)
///
/// # Safety
/// Naked function called directly by the NVIC. It must follow the exact
/// Cortex-M4 exception entry/exit convention.
#[unsafe(no_mangle)]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mrs r0, psp",
        "stmdb r0!, {{r4-r11}}",
        "bl {save_context}",

        "bl {do_schedule}",

        "ldmia r0!, {{r4-r11}}",
        "msr psp, r0",

        // Return to Thread mode on PSP (EXC_RETURN = 0xFFFFFFFD)
        "ldr r0, =0xFFFFFFFD",
        "bx r0",

        save_context = sym save_current_context,
        do_schedule = sym do_context_switch,
    );
}

/// Save the current task's stack pointer. Called from PendSV.
extern "C" fn save_current_context(psp: *mut u32) {
    kernel::save_context(psp);
}

/// Perform the scheduling decision and return the new task's PSP.
/// Called from PendSV.
extern "C" fn do_context_switch() -> *mut u32 {
    kernel::switch_context()
}

// ---------------------------------------------------------------------------
// SysTick handler
// ---------------------------------------------------------------------------

/// SysTick exception handler — scheduler tick and tick-source wrap.
#[unsafe(no_mangle)]
pub extern "C" fn SysTick() {
    CLOCK.on_wrap();

    if kernel::tick() {
        trigger_pendsv();
    }
}
