//! # Synchronization Primitives
//!
//! Interrupt-safe critical sections. All shared scheduler state is
//! accessed inside one to prevent races between task code and the
//! SysTick/PendSV handlers.
//!
//! On Cortex-M the implementation comes from `cortex-m`'s
//! `critical-section-single-core` feature (interrupts disabled on entry,
//! restored on exit); host tests use `critical-section`'s `std` impl.

pub use critical_section::{CriticalSection, Mutex};

/// Execute a closure within a critical section.
///
/// # Usage
/// ```ignore
/// sync::critical_section(|cs| {
///     let sched = SCHEDULER.borrow_ref_mut(cs);
/// });
/// ```
///
/// Keep critical sections as short as possible to minimize interrupt latency.
#[inline]
pub fn critical_section<F, R>(f: F) -> R
where
    F: FnOnce(CriticalSection<'_>) -> R,
{
    critical_section::with(f)
}
