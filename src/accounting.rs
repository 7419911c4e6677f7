//! # Cycle Accounting
//!
//! Per-task execution-time accounting driven by context switches.
//!
//! [`on_context_switch`] is registered as the scheduler's first switch
//! observer. On each switch it closes the outgoing task's slice and opens
//! the incoming task's, using one reading of the tick source. Because
//! only a task's own slices are ever added to its `used_total`, time spent
//! preempted by other tasks is excluded automatically:
//!
//! ```ignore
//! kernel::start_task_cycle_counter();
//! do_work();
//! let self_ticks = kernel::stop_task_cycle_counter();
//! ```
//!
//! ## Timing
//!
//! The hook is O(1): two record updates and one tick read, no loops, no
//! allocation and no logging.

use crate::cycle_info::TaskCycleInfo;
use crate::scheduler::{Scheduler, SwitchEvent};
use crate::tick::TickSource;

// ---------------------------------------------------------------------------
// Switch hook
// ---------------------------------------------------------------------------

/// Switch observer that maintains every task's [`AccountingRecord`].
///
/// Expects `event.outgoing` to be the task that was current before the
/// switch. A switch from a task to itself changes nothing.
///
/// [`AccountingRecord`]: crate::cycle_info::AccountingRecord
pub fn on_context_switch(event: &mut SwitchEvent<'_>) {
    if event.outgoing == Some(event.incoming) {
        return;
    }
    debug_assert!(event.incoming < event.tasks.len(), "incoming task out of range");

    let now = event.clock.now();

    if let Some(outgoing) = event.outgoing.and_then(|id| event.tasks.get_mut(id)) {
        outgoing.cycle.switched_out(now);
    }

    if let Some(incoming) = event.tasks.get_mut(event.incoming) {
        incoming.cycle.switched_in(now);
    }
}

// ---------------------------------------------------------------------------
// Query / reset API
// ---------------------------------------------------------------------------

/// Accounting counters of the current task, `None` before the first switch.
pub fn current_task_cycle_info(sched: &Scheduler) -> Option<&TaskCycleInfo> {
    sched.current_tcb().map(|tcb| tcb.cycle_info())
}

/// Open a measurement window: zero the current task's `used_total`.
///
/// Time the task already spent in its running slice is not counted.
/// No-op when there is no current task.
pub fn start_cycle_counter(sched: &mut Scheduler, clock: &dyn TickSource) {
    if let Some(tcb) = sched.current_tcb_mut() {
        tcb.cycle.reset_total(clock.now());
    }
}

/// Close a measurement window: the current task's own run time since
/// `start_cycle_counter`, including its running slice.
///
/// Saturates at `i32::MAX`; read `TaskCycleInfo::used_total` for the
/// 64-bit total of completed slices. Returns 0 when there is no current
/// task.
pub fn stop_cycle_counter(sched: &Scheduler, clock: &dyn TickSource) -> i32 {
    sched
        .current_tcb()
        .map_or(0, |tcb| saturate_i32(tcb.cycle.used_total_at(clock.now())))
}

#[inline]
fn saturate_i32(ticks: u64) -> i32 {
    i32::try_from(ticks).unwrap_or(i32::MAX)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::TaskConfig;
    use crate::tick::ManualTicks;

    extern "C" fn dummy_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn two_tasks() -> Scheduler {
        let mut sched = Scheduler::new();
        let config = TaskConfig { priority: 1, time_slice: 0 };
        sched.create_task(dummy_task, config).unwrap();
        sched.create_task(dummy_task, config).unwrap();
        sched.register_switch_observer(on_context_switch).unwrap();
        sched
    }

    fn fire(sched: &mut Scheduler, outgoing: Option<usize>, incoming: usize, clock: &ManualTicks) {
        let count = sched.task_count;
        let mut event = SwitchEvent {
            tasks: &mut sched.tasks[..count],
            outgoing,
            incoming,
            clock,
        };
        on_context_switch(&mut event);
    }

    #[test]
    fn test_first_switch_has_no_outgoing() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(1_000);

        fire(&mut sched, None, 0, &clock);

        let info = sched.tasks[0].cycle_info();
        assert_eq!(info.start, 1_000);
        assert_eq!(info.active_count, 1);
        assert_eq!(info.used_total, 0);
        assert_eq!(*sched.tasks[1].cycle_info(), TaskCycleInfo::default());
    }

    #[test]
    fn test_noop_switch_changes_nothing() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(10);
        fire(&mut sched, None, 0, &clock);
        let before = *sched.tasks[0].cycle_info();

        clock.advance(50);
        fire(&mut sched, Some(0), 0, &clock);

        assert_eq!(*sched.tasks[0].cycle_info(), before);
    }

    #[test]
    fn test_outgoing_slice_is_charged() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(10);
        fire(&mut sched, None, 0, &clock);

        clock.advance(25);
        fire(&mut sched, Some(0), 1, &clock);

        let a = sched.tasks[0].cycle_info();
        assert_eq!(a.used_recent, 25);
        assert_eq!(a.used_total, 25);

        let b = sched.tasks[1].cycle_info();
        assert_eq!(b.start, 35);
        assert_eq!(b.active_count, 1);
    }

    #[test]
    fn test_slice_across_tick_wrap() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(u64::MAX - 9);
        fire(&mut sched, None, 0, &clock);

        clock.advance(20);
        assert_eq!(clock.now(), 10);
        fire(&mut sched, Some(0), 1, &clock);

        assert_eq!(sched.tasks[0].cycle_info().used_recent, 20);
    }

    #[test]
    fn test_queries_without_current_task() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(99);
        assert!(current_task_cycle_info(&sched).is_none());
        start_cycle_counter(&mut sched, &clock);
        assert_eq!(stop_cycle_counter(&sched, &clock), 0);
    }

    #[test]
    fn test_start_then_stop_is_zero() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(1);
        sched.schedule(&clock);
        clock.advance(7);
        sched.yield_current();
        sched.schedule(&clock);
        clock.advance(3);
        sched.yield_current();
        sched.schedule(&clock);

        assert_eq!(sched.current_task(), Some(0));
        assert_eq!(current_task_cycle_info(&sched).unwrap().used_total, 7);

        start_cycle_counter(&mut sched, &clock);
        assert_eq!(stop_cycle_counter(&sched, &clock), 0);
        assert_eq!(current_task_cycle_info(&sched).unwrap().used_total, 0);
    }

    #[test]
    fn test_uninterrupted_window() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(1);
        sched.schedule(&clock);
        clock.advance(5);

        start_cycle_counter(&mut sched, &clock);
        clock.advance(120);
        assert_eq!(stop_cycle_counter(&sched, &clock), 120);
    }

    #[test]
    fn test_window_excludes_preemption() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(1);
        sched.schedule(&clock);

        start_cycle_counter(&mut sched, &clock);
        clock.advance(40);
        sched.yield_current();
        sched.schedule(&clock);

        // Task 1 runs for a while
        clock.advance(300);
        sched.yield_current();
        sched.schedule(&clock);
        assert_eq!(sched.current_task(), Some(0));

        clock.advance(2);
        assert_eq!(stop_cycle_counter(&sched, &clock), 42);
    }

    #[test]
    fn test_stop_counter_saturates() {
        let mut sched = two_tasks();
        let clock = ManualTicks::new(1);
        sched.schedule(&clock);
        clock.advance(u64::from(u32::MAX) + 5);
        sched.yield_current();
        sched.schedule(&clock);
        sched.yield_current();
        sched.schedule(&clock);

        assert_eq!(sched.current_task(), Some(0));
        assert_eq!(stop_cycle_counter(&sched, &clock), i32::MAX);
        assert_eq!(
            current_task_cycle_info(&sched).unwrap().used_total,
            u64::from(u32::MAX) + 5
        );
    }

    #[test]
    fn test_saturate_i32() {
        assert_eq!(saturate_i32(0), 0);
        assert_eq!(saturate_i32(i32::MAX as u64), i32::MAX);
        assert_eq!(saturate_i32(i32::MAX as u64 + 1), i32::MAX);
    }
}
