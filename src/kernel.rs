//! # Kernel
//!
//! Top-level kernel initialization and public API for SliceMeter.
//!
//! The kernel owns the global scheduler, installs the cycle accounting
//! hook and exposes the task-level measurement API. All public functions
//! run inside a critical section.
//!
//! ## Startup Sequence
//!
//! ```text
//! reset_handler (cortex-m-rt)
//!   └─► main()
//!         ├─► kernel::init(clock)   ← Install tick source + accounting hook
//!         ├─► kernel::create_task() ← Register tasks (×N)
//!         └─► kernel::start()       ← Launch scheduler (no return)
//!               ├─► Configure SysTick (scheduler tick + tick source)
//!               ├─► Set interrupt priorities
//!               └─► First switch, then arch::start_first_task()
//! ```

use core::cell::{Cell, RefCell};

use crate::accounting;
use crate::cycle_info::TaskCycleInfo;
use crate::error::{KernelError, Result};
use crate::scheduler::{Scheduler, SwitchObserver};
use crate::sync::{self, Mutex};
use crate::task::TaskConfig;
use crate::tick::{ManualTicks, TickSource};
use crate::{log_debug, log_info, log_warn};

// ---------------------------------------------------------------------------
// Global scheduler instance
// ---------------------------------------------------------------------------

/// Global scheduler instance, shared between task code and the
/// SysTick/PendSV handlers.
static SCHEDULER: Mutex<RefCell<Scheduler>> = Mutex::new(RefCell::new(Scheduler::new()));

/// Tick source installed by `init()`, `None` until then.
static CLOCK: Mutex<Cell<Option<&'static (dyn TickSource + Sync)>>> = Mutex::new(Cell::new(None));

/// Reads 0 forever; stands in for the tick source before `init()`.
static STOPPED_CLOCK: ManualTicks = ManualTicks::new(0);

fn clock(cs: sync::CriticalSection<'_>) -> &'static (dyn TickSource + Sync) {
    CLOCK.borrow(cs).get().unwrap_or(&STOPPED_CLOCK)
}

/// Run `f` on the scheduler, or return `None` while it is already borrowed.
///
/// The scheduler stays mutably borrowed while switch observers run, so a
/// kernel call made from an observer lands here instead of panicking.
fn with_scheduler<R>(cs: sync::CriticalSection<'_>, f: impl FnOnce(&Scheduler) -> R) -> Option<R> {
    SCHEDULER.borrow(cs).try_borrow().ok().map(|sched| f(&sched))
}

fn with_scheduler_mut<R>(
    cs: sync::CriticalSection<'_>,
    f: impl FnOnce(&mut Scheduler) -> R,
) -> Option<R> {
    SCHEDULER.borrow(cs).try_borrow_mut().ok().map(|mut sched| f(&mut sched))
}

// ---------------------------------------------------------------------------
// Kernel API
// ---------------------------------------------------------------------------

/// Initialize the kernel with the tick source used for accounting.
///
/// Registers [`accounting::on_context_switch`] as the first switch
/// observer. Must be called before any other kernel function; calling it
/// again is a no-op.
pub fn init(tick_source: &'static (dyn TickSource + Sync)) -> Result<()> {
    sync::critical_section(|cs| {
        let installed = CLOCK.borrow(cs);
        if installed.get().is_some() {
            return Ok(());
        }
        let slot = with_scheduler_mut(cs, |sched| {
            sched.register_switch_observer(accounting::on_context_switch)
        })
        .ok_or(KernelError::SchedulerBusy)??;
        installed.set(Some(tick_source));
        log_info!("cycle accounting installed at observer slot {}", slot);
        Ok(())
    })
}

/// Attach an extra switch observer (e.g. a tracer).
///
/// Observers registered here run after the cycle accounting hook. They
/// should read task state through the [`SwitchEvent`] they are handed:
/// while they run, kernel queries answer `None`/0 and kernel mutations
/// fail with [`KernelError::SchedulerBusy`] or do nothing.
///
/// [`SwitchEvent`]: crate::scheduler::SwitchEvent
pub fn register_switch_observer(observer: SwitchObserver) -> Result<usize> {
    sync::critical_section(|cs| {
        let result = with_scheduler_mut(cs, |sched| sched.register_switch_observer(observer))
            .unwrap_or(Err(KernelError::SchedulerBusy));
        match result {
            Ok(slot) => log_debug!("switch observer registered at slot {}", slot),
            Err(e) => log_warn!("switch observer rejected: {}", e),
        }
        result
    })
}

/// Create a new task and register it with the scheduler.
///
/// # Parameters
/// - `entry`: Task entry function. Must be `extern "C" fn() -> !` (never returns).
/// - `config`: Static task configuration (priority, time slice).
///
/// # Returns
/// - `Ok(task_id)`: The task's index in the scheduler array.
/// - `Err(KernelError::TaskTableFull)`: `MAX_TASKS` reached.
pub fn create_task(entry: extern "C" fn() -> !, config: TaskConfig) -> Result<usize> {
    sync::critical_section(|cs| {
        let result = with_scheduler_mut(cs, |sched| sched.create_task(entry, config))
            .unwrap_or(Err(KernelError::SchedulerBusy));
        match result {
            Ok(id) => log_debug!("task {} created, priority {}", id, config.priority),
            Err(e) => log_warn!("task creation failed: {}", e),
        }
        result
    })
}

/// Voluntarily yield the CPU from the current task.
pub fn yield_task() {
    sync::critical_section(|cs| {
        with_scheduler_mut(cs, Scheduler::yield_current);
    });
    crate::arch::request_context_switch();
}

/// Advance the scheduler by one tick.
///
/// Returns whether a context switch should be requested.
pub fn tick() -> bool {
    sync::critical_section(|cs| {
        with_scheduler_mut(cs, |sched| {
            sched.tick();
            sched.needs_reschedule
        })
        .unwrap_or(false)
    })
}

/// Run the scheduling decision now, switching tasks if needed.
///
/// This is what PendSV does on target; on the host it drives simulated
/// timelines.
pub fn schedule() -> Option<usize> {
    sync::critical_section(|cs| with_scheduler_mut(cs, |sched| sched.schedule(clock(cs))).flatten())
}

/// Index of the running task, `None` before the first switch.
pub fn current_task() -> Option<usize> {
    sync::critical_section(|cs| with_scheduler(cs, Scheduler::current_task).flatten())
}

// ---------------------------------------------------------------------------
// Cycle accounting API
// ---------------------------------------------------------------------------

/// Snapshot of the current task's accounting counters.
///
/// `None` if no task has been scheduled yet, or when called from inside a
/// switch observer.
pub fn task_cycle_info() -> Option<TaskCycleInfo> {
    sync::critical_section(|cs| {
        with_scheduler(cs, |sched| accounting::current_task_cycle_info(sched).copied()).flatten()
    })
}

/// Snapshot of any task's accounting counters, for diagnostics.
pub fn task_cycle_info_of(task_id: usize) -> Option<TaskCycleInfo> {
    sync::critical_section(|cs| {
        with_scheduler(cs, |sched| sched.cycle_info_of(task_id).copied()).flatten()
    })
}

/// Start measuring the current task's own execution time.
///
/// Zeroes the running total; no-op outside task context.
pub fn start_task_cycle_counter() {
    sync::critical_section(|cs| {
        with_scheduler_mut(cs, |sched| accounting::start_cycle_counter(sched, clock(cs)));
    });
}

/// Ticks the current task has run since `start_task_cycle_counter()`.
///
/// Preemption by other tasks is excluded. Saturates at `i32::MAX`;
/// returns 0 outside task context.
pub fn stop_task_cycle_counter() -> i32 {
    sync::critical_section(|cs| {
        with_scheduler(cs, |sched| accounting::stop_cycle_counter(sched, clock(cs))).unwrap_or(0)
    })
}

// ---------------------------------------------------------------------------
// Context switch glue (called from the arch port)
// ---------------------------------------------------------------------------

/// Store the outgoing task's saved stack pointer.
pub(crate) fn save_context(psp: *mut u32) {
    sync::critical_section(|cs| {
        if let Some(tcb) = SCHEDULER.borrow_ref_mut(cs).current_tcb_mut() {
            tcb.stack_pointer = psp;
        }
    });
}

/// Switch tasks and return the incoming task's saved stack pointer.
///
/// Null only if no task exists, which `start()` rules out.
pub(crate) fn switch_context() -> *mut u32 {
    sync::critical_section(|cs| {
        let mut sched = SCHEDULER.borrow_ref_mut(cs);
        match sched.schedule(clock(cs)) {
            Some(next) => sched.tasks[next].stack_pointer,
            None => core::ptr::null_mut(),
        }
    })
}

/// Start the scheduler. **Does not return.**
///
/// Configures the SysTick timer, sets interrupt priorities, performs the
/// first switch (which gives the first task its accounting baseline) and
/// launches that task.
///
/// If no tasks were created, logs [`KernelError::NoTasks`] and idles.
///
/// [`KernelError::NoTasks`]: crate::error::KernelError::NoTasks
#[cfg(all(target_arch = "arm", target_os = "none"))]
pub fn start(mut core_peripherals: cortex_m::Peripherals) -> ! {
    use crate::arch::cortex_m4;
    use crate::log_error;

    // Keep SysTick and PendSV out until the first task owns the CPU
    cortex_m::interrupt::disable();

    cortex_m4::configure_systick(&mut core_peripherals.SYST);
    cortex_m4::set_interrupt_priorities(&mut core_peripherals.SCB);

    let first_sp = sync::critical_section(|cs| {
        let mut sched = SCHEDULER.borrow_ref_mut(cs);
        let first = sched.schedule(clock(cs))?;
        Some(sched.tasks[first].stack_pointer as *const u32)
    });

    match first_sp {
        // Safety: the stack pointer was prepared by `create_task`
        Some(sp) => unsafe { cortex_m4::start_first_task(sp) },
        None => {
            log_error!("cannot start scheduler: {}", KernelError::NoTasks);
            loop {
                crate::arch::idle();
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Unit tests (host-only)
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use super::*;
    use crate::scheduler::SwitchEvent;
    use core::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn dummy_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    static TEST_CLOCK: ManualTicks = ManualTicks::new(500);

    static TRACER_CALLS: AtomicUsize = AtomicUsize::new(0);
    static NON_NEUTRAL_ANSWERS: AtomicUsize = AtomicUsize::new(0);

    /// Calls back into the kernel mid-switch; every answer must be neutral.
    fn reentrant_tracer(_event: &mut SwitchEvent<'_>) {
        TRACER_CALLS.fetch_add(1, Ordering::SeqCst);
        let neutral = task_cycle_info().is_none()
            && task_cycle_info_of(0).is_none()
            && current_task().is_none()
            && stop_task_cycle_counter() == 0
            && !tick()
            && schedule().is_none()
            && create_task(dummy_task, TaskConfig { priority: 1, time_slice: 0 })
                == Err(KernelError::SchedulerBusy);
        start_task_cycle_counter();
        yield_task();
        if !neutral {
            NON_NEUTRAL_ANSWERS.fetch_add(1, Ordering::SeqCst);
        }
    }

    // One test owns the global scheduler so parallel tests cannot interleave.
    #[test]
    fn test_kernel_lifecycle() {
        let clock = &TEST_CLOCK;

        // Before init and scheduling: neutral answers, no faults
        assert_eq!(task_cycle_info(), None);
        assert_eq!(current_task(), None);
        start_task_cycle_counter();
        assert_eq!(stop_task_cycle_counter(), 0);

        init(&TEST_CLOCK).unwrap();
        init(&TEST_CLOCK).unwrap();
        assert_eq!(
            sync::critical_section(|cs| SCHEDULER.borrow_ref(cs).observer_count()),
            1
        );
        assert_eq!(register_switch_observer(reentrant_tracer), Ok(1));

        let config = TaskConfig { priority: 1, time_slice: 2 };
        let a = create_task(dummy_task, config).unwrap();
        let b = create_task(dummy_task, config).unwrap();
        assert_eq!(task_cycle_info_of(a), Some(TaskCycleInfo::default()));

        assert_eq!(schedule(), Some(a));
        let info = task_cycle_info().unwrap();
        assert_eq!(info.start, 500);
        assert_eq!(info.active_count, 1);

        // a measures a window that spans a preemption by b
        start_task_cycle_counter();
        clock.advance(30);
        assert!(!tick());
        assert!(tick());
        assert_eq!(schedule(), Some(b));

        clock.advance(1_000);
        yield_task();
        assert_eq!(schedule(), Some(a));

        clock.advance(12);
        assert_eq!(stop_task_cycle_counter(), 42);
        assert_eq!(task_cycle_info_of(b).unwrap().used_total, 1_000);

        // The tracer saw all three switches and only neutral answers
        assert_eq!(TRACER_CALLS.load(Ordering::SeqCst), 3);
        assert_eq!(NON_NEUTRAL_ANSWERS.load(Ordering::SeqCst), 0);
        assert_eq!(current_task(), Some(a));
    }
}
