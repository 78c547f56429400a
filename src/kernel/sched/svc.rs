//! Service-call dispatcher
//!
//! Every task-side suspension point is funneled through a supervisor call
//! so it executes at kernel atomicity. The opcode sits in the `svc`
//! instruction immediate; arguments travel in `r0..r2` of the stacked
//! frame, and results come back through the saved `r0` slot on resume.

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use crate::hooks;
use crate::sync::condvar::ConditionVariable;
use crate::sync::mutex::PriorityMutex;
use crate::task::frame::ExceptionFrame;
use crate::task::Tcb;
use crate::time::Duration;

use super::{do_switch, in_critical, IN_CRITICAL, SCHED};

/// Service-call opcodes. The numeric values are a binary contract with the
/// `svc` trampolines in the port.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub(crate) enum SvcOp {
    Terminate = 0,
    Sleep = 1,
    Yield = 2,
    Wait = 3,
}

impl SvcOp {
    fn from_raw(value: u8) -> Option<SvcOp> {
        match value {
            0 => Some(SvcOp::Terminate),
            1 => Some(SvcOp::Sleep),
            2 => Some(SvcOp::Yield),
            3 => Some(SvcOp::Wait),
            _ => None,
        }
    }
}

/// Entry point from the service-call exception handler.
///
/// # Safety
/// `frame` must point to the exception frame stacked for this service
/// call; the handler runs at the kernel priority.
pub(crate) unsafe fn dispatch(frame: *mut ExceptionFrame, number: u8, is_thread: bool) {
    hooks::enter_service_call();

    let frame = unsafe { &mut *frame };
    let switched = match SvcOp::from_raw(number) {
        Some(SvcOp::Terminate) => match NonNull::new(frame.r0 as *mut Tcb) {
            Some(task) => terminate(task),
            None => {
                debug_assert!(false, "terminate with null task");
                false
            }
        },
        Some(SvcOp::Sleep) => {
            debug_assert!(is_thread);
            sleep_current(Duration::from_millis(frame.r0 as i32))
        }
        Some(SvcOp::Yield) => {
            debug_assert!(is_thread);
            yield_current()
        }
        Some(SvcOp::Wait) => {
            debug_assert!(is_thread);
            let timeout = frame.r1 as i32;
            match NonNull::new(frame.r0 as *mut ConditionVariable) {
                Some(condition) => wait_current(
                    condition,
                    (timeout >= 0).then(|| Duration::from_millis(timeout)),
                    NonNull::new(frame.r2 as *mut PriorityMutex),
                ),
                None => {
                    debug_assert!(false, "wait with null condition variable");
                    false
                }
            }
        }
        None => {
            debug_assert!(false, "unknown service call");
            false
        }
    };

    hooks::exit_service_call(switched);
}

/// Terminates `task` whatever its state, removing it from every queue.
/// The atomic exchange on `active` makes a second termination a no-op.
pub(crate) fn terminate(task: NonNull<Tcb>) -> bool {
    let state = unsafe { SCHED.get_unchecked() };
    let tcb = unsafe { &mut *task.as_ptr() };

    if !tcb.active.swap(false, Ordering::AcqRel) {
        return false;
    }

    let in_ready_queue = tcb.waiting_on.is_none()
        && tcb.wait_until.is_none()
        && state.current != Some(task)
        && state.next != Some(task);

    state.all_tasks.erase(task);

    if tcb.wait_until.take().is_some() {
        state.timeouts.erase(task);
    }

    if let Some(condition) = tcb.waiting_on.take() {
        unsafe { condition.as_ref() }.remove_waiting(task);
    }

    let mut switched = false;
    if state.current == Some(task) {
        debug_assert!(!in_critical(), "terminating the critical section holder");
        state.previous = None;
        state.current = None;
        switched = do_switch();
    } else if state.next == Some(task) {
        state.next = None;
        switched = do_switch();
    } else if in_ready_queue {
        state.ready.erase(task);
    }

    hooks::task_terminated(tcb);
    switched
}

/// Puts the current task on the timeout queue and switches away.
pub(crate) fn sleep_current(delta: Duration) -> bool {
    debug_assert!(!in_critical(), "sleeping inside a critical section");
    let state = unsafe { SCHED.get_unchecked() };

    // One extra tick: the request lands somewhere inside the running tick,
    // so the deadline must clear the next tick edge for "at least delta"
    // to hold.
    let delta = delta + Duration::from_millis(1);
    debug_assert!(!delta.is_negative());

    let Some(task) = state.current.take() else {
        debug_assert!(false, "sleep with no current task");
        return false;
    };

    let tcb = unsafe { &mut *task.as_ptr() };
    tcb.wait_until = Some(state.ticks + delta);
    state.timeouts.insert_ordered(Tcb::wakes_before, task);
    hooks::task_sleep(tcb);

    do_switch()
}

/// Re-runs the switch decision; rotates equal-priority tasks.
pub(crate) fn yield_current() -> bool {
    debug_assert!(!in_critical(), "yielding inside a critical section");
    do_switch()
}

/// Parks the current task on `condition`'s waiting list, optionally with a
/// deadline, optionally releasing `mutex` atomically with the suspension.
pub(crate) fn wait_current(
    condition: NonNull<ConditionVariable>,
    timeout: Option<Duration>,
    mutex: Option<NonNull<PriorityMutex>>,
) -> bool {
    let state = unsafe { SCHED.get_unchecked() };

    let Some(task) = state.current.take() else {
        debug_assert!(false, "wait with no current task");
        return false;
    };
    let tcb = unsafe { &mut *task.as_ptr() };

    if let Some(timeout) = timeout {
        debug_assert!(!timeout.is_negative());
        tcb.wait_until = Some(state.ticks + timeout);
        state.timeouts.insert_ordered(Tcb::wakes_before, task);
    }

    if let Some(mutex) = mutex {
        // The caller holds the mutex, hence the critical section. Park the
        // mutex on the task; the pending-switch handler re-acquires it
        // before the task resumes user code.
        debug_assert!(in_critical(), "wait with a mutex outside its lock");
        tcb.pending_mutex = Some(mutex);
        unsafe { mutex.as_ref() }.release_for_wait();
        IN_CRITICAL.store(false, Ordering::Release);
        hooks::mutex_stored(tcb);
    }

    unsafe { condition.as_ref() }.add_waiting(task);
    tcb.waiting_on = Some(condition);
    hooks::task_wait(tcb);

    do_switch()
}
