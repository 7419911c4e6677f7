//! # Architecture Abstraction Layer
//!
//! Hardware boundary for the kernel. The Cortex-M4 port is compiled only
//! for bare-metal ARM targets; host builds (tests, simulation) get inert
//! fallbacks so the scheduler and accounting core run unchanged.

#[cfg(all(target_arch = "arm", target_os = "none"))]
pub mod cortex_m4;

/// Wait for the next interrupt (or spin on the host).
#[inline]
pub fn idle() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m::asm::wfi();

    #[cfg(not(all(target_arch = "arm", target_os = "none")))]
    core::hint::spin_loop();
}

/// Ask for a deferred context switch.
///
/// Pends PendSV on Cortex-M4. On the host the caller drives
/// `kernel::schedule()` itself, so this does nothing.
#[inline]
pub fn request_context_switch() {
    #[cfg(all(target_arch = "arm", target_os = "none"))]
    cortex_m4::trigger_pendsv();
}
