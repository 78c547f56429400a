//! Port layer
//!
//! Everything the kernel needs from the hardware: the three exception
//! handlers, the base-priority mask, the pending-switch request and the
//! service-call entry points.
//!
//! On non-ARM targets a stub stands in so the kernel logic can run under
//! host tests. The stub models BASEPRI, PRIMASK and the pending-switch
//! request in plain statics; service-call wrappers are no-ops because there
//! is no exception machinery — tests drive the dispatcher directly.

#[cfg(target_arch = "arm")]
pub(crate) mod cortex_m;

#[cfg(target_arch = "arm")]
pub(crate) use cortex_m::*;

#[cfg(not(target_arch = "arm"))]
pub(crate) mod stub {
    use core::sync::atomic::{AtomicBool, AtomicU8, Ordering};

    use crate::prio::IsrPriority;
    use crate::sync::condvar::ConditionVariable;
    use crate::sync::mutex::PriorityMutex;
    use crate::task::Tcb;

    static BASEPRI: AtomicU8 = AtomicU8::new(0);
    static PRIMASK: AtomicBool = AtomicBool::new(false);
    static PENDSV: AtomicBool = AtomicBool::new(false);

    pub(crate) fn set_basepri(priority: IsrPriority) -> IsrPriority {
        IsrPriority::new(BASEPRI.swap(priority.value(), Ordering::SeqCst))
    }

    pub(crate) fn basepri() -> IsrPriority {
        IsrPriority::new(BASEPRI.load(Ordering::SeqCst))
    }

    pub(crate) fn primask_active() -> bool {
        PRIMASK.load(Ordering::SeqCst)
    }

    pub(crate) fn disable_interrupts() {
        PRIMASK.store(true, Ordering::SeqCst);
    }

    pub(crate) fn enable_interrupts() {
        PRIMASK.store(false, Ordering::SeqCst);
    }

    pub(crate) fn ipsr() -> u32 {
        0
    }

    pub(crate) fn current_priority() -> Option<IsrPriority> {
        None
    }

    pub(crate) fn trigger_pendsv() {
        PENDSV.store(true, Ordering::SeqCst);
    }

    pub(crate) fn clear_pendsv() {
        PENDSV.store(false, Ordering::SeqCst);
    }

    #[cfg(test)]
    pub(crate) fn pendsv_requested() -> bool {
        PENDSV.load(Ordering::SeqCst)
    }

    pub(crate) fn install_kernel_priorities() {}

    pub(crate) fn systick_enable(_reload: u32) {}

    pub(crate) fn switch_to_process_stack() {}

    pub(crate) fn cpu_supported() -> bool {
        true
    }

    pub(crate) fn idle_wait() {}

    pub(crate) fn svc_terminate(_task: *mut Tcb) {}

    pub(crate) fn svc_sleep(_millis: i32) {}

    pub(crate) fn svc_yield() {}

    pub(crate) fn svc_wait(
        _condition: *const ConditionVariable,
        _timeout_millis: i32,
        _mutex: *const PriorityMutex,
    ) -> u32 {
        0
    }

    #[cfg(test)]
    pub(crate) fn reset() {
        BASEPRI.store(0, Ordering::SeqCst);
        PRIMASK.store(false, Ordering::SeqCst);
        PENDSV.store(false, Ordering::SeqCst);
    }
}

#[cfg(not(target_arch = "arm"))]
pub(crate) use stub::*;
