//! # Scheduler
//!
//! A preemptive, priority-based scheduler with round-robin time slicing
//! among tasks of equal priority.
//!
//! ## Scheduling Algorithm
//!
//! At each SysTick interrupt:
//! 1. **Decrement time slice** of the running task; if expired, mark it Ready
//! 2. **Request reschedule** so PendSV runs `schedule()`
//!
//! In `schedule()`:
//! 1. **Select next task**: highest-priority candidate, ties broken in
//!    round-robin order after the current task
//! 2. **Notify switch observers** while the old task is still current
//! 3. **Commit** the new current task
//!
//! ## Switch Observers
//!
//! Anything that needs to see context switches (the cycle accounting hook,
//! a tracer) registers a [`SwitchObserver`]. Observers run in registration
//! order, once per real switch, inside the same critical section as the
//! switch itself.

use crate::config::{MAX_SWITCH_OBSERVERS, MAX_TASKS, STACK_SIZE};
use crate::cycle_info::TaskCycleInfo;
use crate::error::{KernelError, Result};
use crate::task::{TaskConfig, TaskControlBlock, TaskState};
use crate::tick::TickSource;

// ---------------------------------------------------------------------------
// Switch notification
// ---------------------------------------------------------------------------

/// A context switch in progress, as seen by observers.
pub struct SwitchEvent<'a> {
    /// Allocated task slots (`tasks[id]` is task `id`).
    pub tasks: &'a mut [TaskControlBlock],
    /// Task that is current before the switch, `None` on the first switch.
    pub outgoing: Option<usize>,
    /// Task about to become current.
    pub incoming: usize,
    /// Time base for the switch.
    pub clock: &'a dyn TickSource,
}

/// Callback run on every context switch.
///
/// Must not block, allocate or loop over unbounded data: it runs in PendSV
/// with interrupts masked. Read task state through the event; the kernel
/// API only gives neutral answers while a switch is in progress.
pub type SwitchObserver = fn(&mut SwitchEvent<'_>);

// ---------------------------------------------------------------------------
// Scheduler struct
// ---------------------------------------------------------------------------

/// The central scheduler state. Holds all task control blocks, the switch
/// observer list and scheduling state. The kernel keeps one instance
/// behind a critical-section mutex.
pub struct Scheduler {
    /// Fixed-size array of TCBs.
    pub tasks: [TaskControlBlock; MAX_TASKS],

    /// Index of the currently running task, `None` before the first switch.
    current_task: Option<usize>,

    /// Number of allocated tasks.
    pub task_count: usize,

    observers: [Option<SwitchObserver>; MAX_SWITCH_OBSERVERS],
    observer_count: usize,

    /// Scheduler tick counter (SysTick interrupts, not accounting ticks).
    pub tick_count: u64,

    /// Flag set by `tick()` when a reschedule is needed.
    pub needs_reschedule: bool,
}

impl Scheduler {
    /// Create an empty scheduler: no tasks, no observers, no current task.
    pub const fn new() -> Self {
        Self {
            tasks: [TaskControlBlock::EMPTY; MAX_TASKS],
            current_task: None,
            task_count: 0,
            observers: [None; MAX_SWITCH_OBSERVERS],
            observer_count: 0,
            tick_count: 0,
            needs_reschedule: false,
        }
    }

    /// Register a new task with the scheduler.
    ///
    /// # Returns
    /// - `Ok(task_id)` — the index of the newly created task
    /// - `Err(KernelError::TaskTableFull)` — if the task array is full
    pub fn create_task(&mut self, entry: extern "C" fn() -> !, config: TaskConfig) -> Result<usize> {
        if self.task_count >= MAX_TASKS {
            return Err(KernelError::TaskTableFull);
        }

        let id = self.task_count;
        self.tasks[id].init(id, config);

        // Initialize the stack frame for context switching
        init_task_stack(&mut self.tasks[id], entry);

        self.task_count += 1;
        Ok(id)
    }

    /// Append an observer to the switch notification list.
    ///
    /// Returns the observer's slot; lower slots run first.
    pub fn register_switch_observer(&mut self, observer: SwitchObserver) -> Result<usize> {
        if self.observer_count >= MAX_SWITCH_OBSERVERS {
            return Err(KernelError::ObserverTableFull);
        }
        let slot = self.observer_count;
        self.observers[slot] = Some(observer);
        self.observer_count += 1;
        Ok(slot)
    }

    /// Number of registered switch observers.
    pub fn observer_count(&self) -> usize {
        self.observer_count
    }

    /// Called from the SysTick handler every tick.
    ///
    /// Decrements the running task's time slice and sets
    /// `needs_reschedule` once it expires.
    pub fn tick(&mut self) {
        self.tick_count = self.tick_count.wrapping_add(1);

        let Some(current) = self.current_task else {
            return;
        };
        let tcb = &mut self.tasks[current];
        if !tcb.active || tcb.state != TaskState::Running {
            return;
        }

        tcb.ticks_remaining = tcb.ticks_remaining.saturating_sub(1);
        if tcb.ticks_remaining == 0 {
            tcb.state = TaskState::Ready;
            tcb.ticks_remaining = tcb.config.effective_time_slice();
            self.needs_reschedule = true;
        }
    }

    /// Pick the task that should run next without changing any state.
    ///
    /// A Running current task keeps the CPU against equal-priority peers;
    /// a current task that yielded or exhausted its slice goes to the back
    /// of its priority level. Returns `None` if no task exists.
    pub fn pick_next(&self) -> Option<usize> {
        if self.task_count == 0 {
            return None;
        }

        let mut best: Option<(usize, u8)> = match self.current_task {
            Some(cur) if self.tasks[cur].active && self.tasks[cur].state == TaskState::Running => {
                Some((cur, self.tasks[cur].config.priority))
            }
            _ => None,
        };

        // Scan in round-robin order, starting just after the current task
        let start = self.current_task.map_or(0, |cur| cur + 1);
        for offset in 0..self.task_count {
            let i = (start + offset) % self.task_count;
            if !self.tasks[i].is_runnable() {
                continue;
            }
            let priority = self.tasks[i].config.priority;
            if best.map_or(true, |(_, p)| priority > p) {
                best = Some((i, priority));
            }
        }

        // Nothing runnable: stay where we are
        best.map(|(i, _)| i).or(self.current_task).or(Some(0))
    }

    /// Select the next task and switch to it.
    ///
    /// Called from PendSV and once by `kernel::start()`. Switch observers
    /// are notified only when the current task actually changes.
    ///
    /// # Returns
    /// Index of the task that is current afterwards, `None` if there are
    /// no tasks.
    pub fn schedule(&mut self, clock: &dyn TickSource) -> Option<usize> {
        self.needs_reschedule = false;
        let next = self.pick_next()?;
        self.switch_to(next, clock);
        Some(next)
    }

    /// Make `next` the current task, notifying observers first.
    pub fn switch_to(&mut self, next: usize, clock: &dyn TickSource) {
        debug_assert!(next < self.task_count, "switch to unallocated task {}", next);
        let prev = self.current_task;

        if prev != Some(next) {
            let mut event = SwitchEvent {
                tasks: &mut self.tasks[..self.task_count],
                outgoing: prev,
                incoming: next,
                clock,
            };
            for observer in self.observers.iter().flatten() {
                observer(&mut event);
            }

            if let Some(prev) = prev {
                if self.tasks[prev].state == TaskState::Running {
                    self.tasks[prev].state = TaskState::Ready;
                }
            }
        }

        self.tasks[next].state = TaskState::Running;
        self.current_task = Some(next);
    }

    /// Record a voluntary yield from the current task.
    ///
    /// Marks the current task as Ready, refills its time slice and
    /// requests a reschedule.
    pub fn yield_current(&mut self) {
        if let Some(tcb) = self.current_tcb_mut() {
            if tcb.active {
                tcb.state = TaskState::Ready;
                tcb.ticks_remaining = tcb.config.effective_time_slice();
                self.needs_reschedule = true;
            }
        }
    }

    /// Index of the currently running task.
    #[inline]
    pub fn current_task(&self) -> Option<usize> {
        self.current_task
    }

    /// Get a reference to the current task's TCB.
    pub fn current_tcb(&self) -> Option<&TaskControlBlock> {
        self.current_task.map(|i| &self.tasks[i])
    }

    /// Get a mutable reference to the current task's TCB.
    pub fn current_tcb_mut(&mut self) -> Option<&mut TaskControlBlock> {
        match self.current_task {
            Some(i) => Some(&mut self.tasks[i]),
            None => None,
        }
    }

    /// Accounting counters of any allocated task, for diagnostics.
    pub fn cycle_info_of(&self, task_id: usize) -> Option<&TaskCycleInfo> {
        if task_id >= self.task_count {
            return None;
        }
        Some(self.tasks[task_id].cycle_info())
    }
}

impl Default for Scheduler {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Stack initialization helper
// ---------------------------------------------------------------------------

/// Initialize a task's stack frame for first-time context switch.
///
/// The Cortex-M4 hardware automatically pushes an exception frame on
/// interrupt entry. We pre-populate this frame on the task's stack so
/// that the first PendSV "return" starts executing the task function.
///
/// ## Stack Layout (top = high address, growing down)
///
/// ```text
/// [Hardware stacked frame]   <- initial PSP points here
///   xPSR  (Thumb bit set)
///   PC    (task entry point)
///   LR    (task_exit)
///   R12, R3, R2, R1, R0  (0)
/// [Software saved context]
///   R11 .. R4  (0)           <- stack_pointer after init
/// ```
fn init_task_stack(tcb: &mut TaskControlBlock, entry: extern "C" fn() -> !) {
    let stack_top = tcb.stack.0.as_mut_ptr() as usize + STACK_SIZE;
    // Align to 8 bytes (AAPCS requirement)
    let aligned_top = stack_top & !0x07;

    // We need space for 16 registers (8 HW + 8 SW)
    let frame_ptr = (aligned_top - 16 * 4) as *mut u32;

    // Safety: the frame lies entirely inside `tcb.stack`, which is 8-byte
    // aligned and much larger than 64 bytes.
    unsafe {
        // Software-saved registers (R4–R11) and R0–R3, R12 start zeroed
        for i in 0..13 {
            *frame_ptr.add(i) = 0;
        }
        *frame_ptr.add(13) = task_exit as usize as u32; // LR
        *frame_ptr.add(14) = entry as usize as u32; // PC
        *frame_ptr.add(15) = 0x0100_0000; // xPSR — Thumb bit set
    }

    tcb.stack_pointer = frame_ptr;
}

/// Fallback for tasks that return (they shouldn't — entry is `fn() -> !`).
extern "C" fn task_exit() -> ! {
    loop {
        crate::arch::idle();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tick::ManualTicks;
    use core::sync::atomic::{AtomicUsize, Ordering};

    extern "C" fn dummy_task() -> ! {
        loop {
            core::hint::spin_loop();
        }
    }

    fn config_with(priority: u8) -> TaskConfig {
        TaskConfig { priority, time_slice: 2 }
    }

    #[test]
    fn test_create_task_fills_table() {
        let mut sched = Scheduler::new();
        for i in 0..MAX_TASKS {
            assert_eq!(sched.create_task(dummy_task, config_with(1)), Ok(i));
        }
        assert_eq!(
            sched.create_task(dummy_task, config_with(1)),
            Err(KernelError::TaskTableFull)
        );
    }

    #[test]
    fn test_stack_frame_points_at_entry() {
        let mut sched = Scheduler::new();
        let id = sched.create_task(dummy_task, config_with(1)).unwrap();
        let sp = sched.tasks[id].stack_pointer;
        assert!(!sp.is_null());
        unsafe {
            assert_eq!(*sp.add(14), dummy_task as usize as u32);
            assert_eq!(*sp.add(15), 0x0100_0000);
        }
    }

    #[test]
    fn test_highest_priority_wins() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        sched.create_task(dummy_task, config_with(1)).unwrap();
        let high = sched.create_task(dummy_task, config_with(5)).unwrap();
        sched.create_task(dummy_task, config_with(3)).unwrap();

        assert_eq!(sched.schedule(&clock), Some(high));
        assert_eq!(sched.tasks[high].state, TaskState::Running);
    }

    #[test]
    fn test_round_robin_on_slice_expiry() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        let a = sched.create_task(dummy_task, config_with(2)).unwrap();
        let b = sched.create_task(dummy_task, config_with(2)).unwrap();

        assert_eq!(sched.schedule(&clock), Some(a));

        sched.tick();
        assert!(!sched.needs_reschedule);
        sched.tick();
        assert!(sched.needs_reschedule);

        assert_eq!(sched.schedule(&clock), Some(b));
        assert_eq!(sched.tasks[a].state, TaskState::Ready);
    }

    #[test]
    fn test_running_task_keeps_cpu_against_peers() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        let a = sched.create_task(dummy_task, config_with(2)).unwrap();
        sched.create_task(dummy_task, config_with(2)).unwrap();

        sched.schedule(&clock);
        assert_eq!(sched.pick_next(), Some(a));
    }

    #[test]
    fn test_yield_passes_to_peer_and_back() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        let a = sched.create_task(dummy_task, config_with(2)).unwrap();
        let b = sched.create_task(dummy_task, config_with(2)).unwrap();

        sched.schedule(&clock);
        sched.yield_current();
        assert!(sched.needs_reschedule);
        assert_eq!(sched.schedule(&clock), Some(b));
        sched.yield_current();
        assert_eq!(sched.schedule(&clock), Some(a));
    }

    #[test]
    fn test_schedule_without_tasks() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        assert_eq!(sched.schedule(&clock), None);
        assert_eq!(sched.current_task(), None);
        assert!(sched.current_tcb().is_none());
    }

    static ORDER_LOG: AtomicUsize = AtomicUsize::new(0);

    fn first_observer(_event: &mut SwitchEvent<'_>) {
        // Shift in digit 1
        let v = ORDER_LOG.load(Ordering::SeqCst);
        ORDER_LOG.store(v * 10 + 1, Ordering::SeqCst);
    }

    fn second_observer(_event: &mut SwitchEvent<'_>) {
        let v = ORDER_LOG.load(Ordering::SeqCst);
        ORDER_LOG.store(v * 10 + 2, Ordering::SeqCst);
    }

    #[test]
    fn test_observers_run_in_registration_order() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        sched.create_task(dummy_task, config_with(1)).unwrap();
        assert_eq!(sched.register_switch_observer(first_observer), Ok(0));
        assert_eq!(sched.register_switch_observer(second_observer), Ok(1));

        sched.schedule(&clock);
        assert_eq!(ORDER_LOG.load(Ordering::SeqCst), 12);
    }

    static SWITCHES_SEEN: AtomicUsize = AtomicUsize::new(0);
    static LAST_OUTGOING: AtomicUsize = AtomicUsize::new(usize::MAX);

    fn counting_observer(event: &mut SwitchEvent<'_>) {
        SWITCHES_SEEN.fetch_add(1, Ordering::SeqCst);
        LAST_OUTGOING.store(event.outgoing.unwrap_or(usize::MAX), Ordering::SeqCst);
    }

    #[test]
    fn test_observer_sees_only_real_switches() {
        let mut sched = Scheduler::new();
        let clock = ManualTicks::new(1);
        let a = sched.create_task(dummy_task, config_with(1)).unwrap();
        let b = sched.create_task(dummy_task, config_with(1)).unwrap();
        sched.register_switch_observer(counting_observer).unwrap();

        sched.switch_to(a, &clock);
        assert_eq!(SWITCHES_SEEN.load(Ordering::SeqCst), 1);
        assert_eq!(LAST_OUTGOING.load(Ordering::SeqCst), usize::MAX);

        // Re-selecting the running task is not a switch
        sched.switch_to(a, &clock);
        assert_eq!(SWITCHES_SEEN.load(Ordering::SeqCst), 1);

        sched.switch_to(b, &clock);
        assert_eq!(SWITCHES_SEEN.load(Ordering::SeqCst), 2);
        assert_eq!(LAST_OUTGOING.load(Ordering::SeqCst), a);
    }

    fn noop_observer(_event: &mut SwitchEvent<'_>) {}

    #[test]
    fn test_observer_table_full() {
        let mut sched = Scheduler::new();
        for _ in 0..MAX_SWITCH_OBSERVERS {
            sched.register_switch_observer(noop_observer).unwrap();
        }
        assert_eq!(
            sched.register_switch_observer(noop_observer),
            Err(KernelError::ObserverTableFull)
        );
        assert_eq!(sched.observer_count(), MAX_SWITCH_OBSERVERS);
    }

    #[test]
    fn test_cycle_info_of_bounds() {
        let mut sched = Scheduler::new();
        assert!(sched.cycle_info_of(0).is_none());
        sched.create_task(dummy_task, config_with(1)).unwrap();
        assert_eq!(sched.cycle_info_of(0), Some(&TaskCycleInfo::default()));
        assert!(sched.cycle_info_of(1).is_none());
    }
}
