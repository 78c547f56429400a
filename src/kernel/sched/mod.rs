//! Scheduler core
//!
//! Process-wide scheduler state and the switching policy. The kernel keeps
//! three task queues (ready, timeouts, all-tasks registry) plus three task
//! slots: `current` (owns the CPU), `next` (chosen, switch pending) and
//! `previous` (last dispatched; its stack pointer gets saved by the next
//! pending-switch exception).
//!
//! All state here is mutated at kernel atomicity only: either from the
//! kernel exception handlers, which run at the kernel priority by
//! construction, or under a [`KernelGuard`]. The one exception is
//! `Tcb::active`, which is atomic.

pub(crate) mod svc;

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::config::{CFG_CORE_CLOCK_HZ, CFG_TICK_RATE_HZ};
use crate::critical::{CriticalSection, KernelGuard};
use crate::cs_cell::KernelCell;
use crate::hooks;
use crate::list::{RegistryLink, RunLink, TaskList, TimerLink};
use crate::port;
use crate::prio::{IsrPriority, Priority, SYSTICK_PRIORITY};
use crate::sync::condvar::ConditionVariable;
use crate::task::frame::StackItem;
use crate::task::{IdleTask, IdleTcb, Tcb};
use crate::time::{Duration, Instant, WaitStatus};

/// Set once by [`start`], never cleared.
static STARTED: AtomicBool = AtomicBool::new(false);

/// Whether the (single) critical section is held.
static IN_CRITICAL: AtomicBool = AtomicBool::new(false);

pub(crate) struct SchedState {
    /// The kernel clock; advances only in the tick handler.
    ticks: Instant,
    all_tasks: TaskList<RegistryLink>,
    timeouts: TaskList<TimerLink>,
    ready: TaskList<RunLink>,
    idling: bool,
    /// A switch was requested while the critical section was held.
    may_need_switch: bool,
    idle: Option<NonNull<IdleTcb>>,
    previous: Option<NonNull<Tcb>>,
    current: Option<NonNull<Tcb>>,
    next: Option<NonNull<Tcb>>,
}

impl SchedState {
    const fn new() -> Self {
        SchedState {
            ticks: Instant::STARTUP,
            all_tasks: TaskList::new(),
            timeouts: TaskList::new(),
            ready: TaskList::new(),
            idling: false,
            may_need_switch: false,
            idle: None,
            previous: None,
            current: None,
            next: None,
        }
    }
}

static SCHED: KernelCell<SchedState> = KernelCell::new(SchedState::new());

#[inline]
pub(crate) fn is_started() -> bool {
    STARTED.load(Ordering::Acquire)
}

#[inline]
pub(crate) fn in_critical() -> bool {
    IN_CRITICAL.load(Ordering::Acquire)
}

/// Raw kernel clock read for diagnostics (no priority check).
#[allow(dead_code)]
pub(crate) fn clock_millis() -> i64 {
    unsafe { SCHED.get_unchecked() }.ticks.as_millis()
}

// ============ Public surface ============

/// Starts the scheduler and never returns in normal operation.
///
/// Configures the three kernel exceptions (the vector table must route
/// `SVCall`, `PendSV` and `SysTick` to this crate's handlers, which
/// linking with `cortex-m-rt` does by symbol name), enables the 1 ms tick,
/// moves thread mode to the process stack and dispatches the most
/// important ready task, or idles on `idle`.
///
/// Returns `false` if the scheduler was already started.
pub fn start<const STACK_WORDS: usize>(idle: &'static mut IdleTask<STACK_WORDS>) -> bool {
    if STARTED.swap(true, Ordering::AcqRel) {
        return false;
    }
    debug_assert!(port::cpu_supported());

    let idle_tcb = idle.seed();

    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    state.idle = Some(idle_tcb);

    port::install_kernel_priorities();
    port::systick_enable(CFG_CORE_CLOCK_HZ / CFG_TICK_RATE_HZ);
    hooks::starting();

    port::switch_to_process_stack();
    do_switch();
    drop(guard);

    // On hardware the pending switch fires the moment the guard drops and
    // execution continues inside the first task; this point is reached on
    // the host build only.
    true
}

/// The current kernel time.
///
/// Callers must not outrank the tick handler, or the 64 bit read may tear
/// against a concurrent tick.
pub fn now() -> Instant {
    debug_assert!(is_started());
    debug_assert!(
        port::current_priority().unwrap_or(IsrPriority::LOWEST).masked()
            >= SYSTICK_PRIORITY.masked()
    );
    unsafe { SCHED.get_unchecked() }.ticks
}

/// Visits every task currently known to the scheduler.
pub fn all_tasks(mut visit: impl FnMut(&Tcb)) {
    debug_assert!(is_started());
    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    state.all_tasks.for_each(|task| visit(unsafe { task.as_ref() }));
}

/// Enters the critical section: task switching is deferred until the
/// returned handle drops. Interrupts are unaffected.
///
/// If the section is already held the returned handle is inert and the
/// section ends when the first (the only valid) handle drops.
pub fn critical_section() -> CriticalSection {
    if IN_CRITICAL.swap(true, Ordering::AcqRel) {
        CriticalSection::new(false)
    } else {
        hooks::enter_critical_section();
        CriticalSection::new(true)
    }
}

/// Lets the scheduler re-decide who runs; with equal priorities this
/// rotates to the peer that ran least recently.
pub fn yield_now() {
    debug_assert!(!crate::critical::is_isr_context());
    debug_assert!(!in_critical());
    port::svc_yield();
}

// ============ Switching policy ============

/// The central switch decision. Caller must hold kernel atomicity.
///
/// Re-queues `next` and `current`, then takes the head of the ready queue
/// as the new `next` and requests the pending-switch exception — unless
/// the head turns out to be the task that was already running, in which
/// case it is restored as `current` and no switch happens. Inside a
/// critical section the decision is deferred to the section's end.
///
/// Returns whether a switch was requested.
pub(crate) fn do_switch() -> bool {
    debug_assert!(is_started());
    let state = unsafe { SCHED.get_unchecked() };
    debug_assert!(state.current.is_some() || !in_critical());

    if in_critical() {
        state.may_need_switch = true;
        return false;
    }

    if let Some(next) = state.next.take() {
        debug_assert!(state.current != Some(next));
        state.ready.insert_ordered(Tcb::runs_before, next);
    }

    let running = state.current.take();
    if let Some(current) = running {
        state.ready.insert_ordered(Tcb::runs_before, current);
    }

    match state.ready.pop_front() {
        None => {
            port::trigger_pendsv();
            true
        }
        Some(head) if Some(head) == running => {
            state.current = Some(head);
            false
        }
        Some(head) => {
            state.next = Some(head);
            port::trigger_pendsv();
            true
        }
    }
}

/// Releases `task` from `condition`'s waiting list into the ready queue
/// with a no-timeout result, cancelling any timeout entry.
pub(crate) fn wake_up(task: NonNull<Tcb>, condition: &ConditionVariable) {
    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    let tcb = unsafe { &mut *task.as_ptr() };
    debug_assert!(tcb.waiting_on == Some(NonNull::from(condition)));

    condition.remove_waiting(task);
    tcb.waiting_on = None;
    unsafe { tcb.set_return_value(WaitStatus::Notified as u32) };

    if tcb.wait_until.take().is_some() {
        state.timeouts.erase(task);
    }

    state.ready.insert_ordered(Tcb::runs_before, task);
    hooks::task_ready(tcb);
    do_switch();
    drop(guard);
}

/// Applies a new priority, re-sorting whichever queue holds the task and
/// re-running the switch decision when the change could matter.
pub(crate) fn update_priority(task: NonNull<Tcb>, new_priority: Priority) {
    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    let tcb = unsafe { &mut *task.as_ptr() };

    tcb.priority = new_priority;
    if tcb.is_started() {
        if state.current == Some(task) || state.next == Some(task) {
            do_switch();
        } else if let Some(condition) = tcb.waiting_on {
            let condition = unsafe { condition.as_ref() };
            condition.remove_waiting(task);
            condition.add_waiting(task);
        } else if tcb.wait_until.is_none() {
            state.ready.erase(task);
            state.ready.insert_ordered(Tcb::runs_before, task);
            if state.ready.front() == Some(task) {
                do_switch();
            }
        }
    }

    hooks::task_priority_changed(tcb);
    drop(guard);
}

/// Registers a freshly started task and lets it compete for the CPU.
pub(crate) fn add_task(task: NonNull<Tcb>) {
    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    hooks::task_added(unsafe { task.as_ref() });
    state.all_tasks.push_front(task);
    state.ready.insert_ordered(Tcb::runs_before, task);
    if is_started() {
        state.may_need_switch = false;
        do_switch();
    }
    drop(guard);
}

/// Ends the critical section; runs a switch that was deferred while the
/// section was held.
pub(crate) fn critical_section_end() {
    debug_assert!(in_critical());
    IN_CRITICAL.store(false, Ordering::Release);
    hooks::exit_critical_section();

    let guard = KernelGuard::acquire();
    let state = SCHED.get(&guard);
    if state.may_need_switch {
        state.may_need_switch = false;
        // a deferred switch is only ever released from task level
        debug_assert!(guard.previous().value() == 0);
        do_switch();
    }
    drop(guard);
}

// ============ Tick handler ============

/// Advances the kernel clock one tick and promotes every task whose
/// deadline has passed; timed-out waiters leave their condition variable
/// with a timeout result. Runs at the kernel priority.
pub(crate) fn tick_handler() {
    hooks::enter_systick();
    let state = unsafe { SCHED.get_unchecked() };
    state.ticks += Duration::from_millis(1);
    let now = state.ticks;

    let mut woke_any = false;
    while let Some(front) = state.timeouts.front() {
        let tcb = unsafe { &mut *front.as_ptr() };
        match tcb.wait_until {
            Some(deadline) if deadline <= now => {}
            _ => break,
        }

        state.timeouts.pop_front();
        tcb.wait_until = None;

        if let Some(condition) = tcb.waiting_on.take() {
            unsafe { condition.as_ref() }.remove_waiting(front);
            unsafe { tcb.set_return_value(WaitStatus::TimedOut as u32) };
        }

        state.ready.insert_ordered(Tcb::runs_before, front);
        hooks::task_ready(tcb);
        woke_any = true;
    }

    let switched = if woke_any { do_switch() } else { false };
    hooks::exit_systick(switched);
}

// ============ Pending-switch callback ============

/// Decides idle versus next task on the pending-switch exception.
///
/// `psp` is the outgoing stack pointer after the context save; it belongs
/// to whoever ran last (`previous`, or the idle context). The low half of
/// the result is the stack pointer to resume, the high half the BASEPRI
/// value the trampoline applies on exception exit, so a re-acquired mutex
/// ceiling lands atomically with the restore.
pub(crate) fn context_switch(psp: *mut StackItem) -> u64 {
    hooks::enter_pendsv();
    port::clear_pendsv();
    let state = unsafe { SCHED.get_unchecked() };

    if let Some(previous) = state.previous {
        unsafe { (*previous.as_ptr()).stack_pointer = psp };
        hooks::task_stopped(unsafe { previous.as_ref() });
    }
    if state.idling {
        if let Some(idle) = state.idle {
            unsafe { (*idle.as_ptr()).stack_pointer = psp };
        }
    }

    match state.next.take() {
        None => {
            state.idling = true;
            state.previous = None;
            hooks::enter_idle();
            match state.idle {
                Some(idle) => unsafe { (*idle.as_ptr()).stack_pointer as u64 },
                None => {
                    debug_assert!(false, "no idle task installed");
                    0
                }
            }
        }
        Some(next) => {
            state.idling = false;
            state.previous = Some(next);
            state.current = Some(next);

            let tcb = unsafe { &mut *next.as_ptr() };
            tcb.last_started = state.ticks;
            let mut result = tcb.stack_pointer as usize as u64;

            if let Some(mutex) = tcb.pending_mutex.take() {
                let mask = unsafe { mutex.as_ref() }.re_lock_from_pend_sv(CriticalSection::new(true));
                IN_CRITICAL.store(true, Ordering::Release);
                result |= (mask as u64) << 32;
                hooks::mutex_restored(tcb);
            }

            debug_assert!(tcb.is_started());
            hooks::task_started(tcb);
            result
        }
    }
}

// ============ Test support ============

#[cfg(test)]
pub(crate) mod testing {
    use super::*;
    use std::sync::{Mutex, MutexGuard};

    static LOCK: Mutex<()> = Mutex::new(());

    /// Serializes stateful kernel tests and resets every global between
    /// them.
    pub(crate) struct KernelFixture {
        _guard: MutexGuard<'static, ()>,
    }

    pub(crate) fn fixture() -> KernelFixture {
        let guard = LOCK.lock().unwrap_or_else(|poisoned| poisoned.into_inner());
        unsafe { *SCHED.get_unchecked() = SchedState::new() };
        STARTED.store(false, Ordering::Release);
        IN_CRITICAL.store(false, Ordering::Release);
        port::reset();
        KernelFixture { _guard: guard }
    }

    /// Runs the pending-switch callback the way the exception would:
    /// passes the outgoing context's stack pointer in and applies the
    /// returned BASEPRI value.
    pub(crate) fn simulate_pendsv() {
        let state = unsafe { SCHED.get_unchecked() };
        let psp = if state.idling {
            state.idle.map_or(core::ptr::null_mut(), |idle| unsafe {
                (*idle.as_ptr()).stack_pointer
            })
        } else {
            state
                .previous
                .map_or(core::ptr::null_mut(), |previous| unsafe {
                    (*previous.as_ptr()).stack_pointer
                })
        };
        let result = context_switch(psp);
        port::set_basepri(IsrPriority::new((result >> 32) as u8));
    }

    pub(crate) fn current() -> Option<NonNull<Tcb>> {
        unsafe { SCHED.get_unchecked() }.current
    }

    pub(crate) fn next() -> Option<NonNull<Tcb>> {
        unsafe { SCHED.get_unchecked() }.next
    }

    pub(crate) fn is_idling() -> bool {
        unsafe { SCHED.get_unchecked() }.idling
    }

    pub(crate) fn current_name() -> Option<&'static str> {
        current().and_then(|task| unsafe { task.as_ref() }.name())
    }

    pub(crate) fn ready_len() -> u32 {
        unsafe { SCHED.get_unchecked() }.ready.len()
    }

    pub(crate) fn timeouts_len() -> u32 {
        unsafe { SCHED.get_unchecked() }.timeouts.len()
    }

    /// The saved `r0` slot of a suspended task, i.e. what the task will
    /// observe as its service-call return value.
    pub(crate) fn saved_return_value(task: NonNull<Tcb>) -> u32 {
        let tcb = unsafe { task.as_ref() };
        unsafe { (*crate::task::frame::saved_frame(tcb.stack_pointer)).r0 }
    }
}

#[cfg(test)]
mod tests {
    use super::svc;
    use super::testing::*;
    use super::*;
    use std::boxed::Box;
    use std::vec::Vec;

    fn leak_task() -> &'static mut crate::task::Task<64> {
        Box::leak(Box::new(crate::task::Task::new()))
    }

    fn leak_idle() -> &'static mut IdleTask<64> {
        Box::leak(Box::new(IdleTask::new()))
    }

    fn boot() {
        assert!(start(leak_idle()));
        simulate_pendsv();
    }

    fn ticks(count: u32) {
        for _ in 0..count {
            tick_handler();
        }
    }

    /// Runs tick_handler `count` times, simulating the dispatch after any
    /// tick that requested a switch.
    fn ticks_with_dispatch(count: u32) {
        for _ in 0..count {
            tick_handler();
            if port::pendsv_requested() {
                simulate_pendsv();
            }
        }
    }

    #[test]
    fn start_twice_returns_true_then_false() {
        let _fixture = fixture();
        assert!(start(leak_idle()));
        assert!(!start(leak_idle()));
    }

    #[test]
    fn task_start_twice_returns_true_then_false() {
        let _fixture = fixture();
        let task = leak_task();
        let again: *mut crate::task::Task<64> = &raw mut *task;
        assert!(task.start(Priority::NORMAL, "once", || {}));
        assert!(!unsafe { &mut *again }.start(Priority::NORMAL, "twice", || {}));
    }

    #[test]
    fn idles_without_ready_tasks() {
        let _fixture = fixture();
        boot();
        assert!(is_idling());
        assert!(current().is_none());
    }

    #[test]
    fn highest_priority_task_runs_first() {
        let _fixture = fixture();
        leak_task().start(Priority::new(20), "low", || {});
        leak_task().start(Priority::new(10), "high", || {});
        boot();
        assert_eq!(current_name(), Some("high"));
        assert_eq!(ready_len(), 1);
    }

    #[test]
    fn sleep_hands_cpu_to_lower_priority_until_deadline() {
        let _fixture = fixture();
        leak_task().start(Priority::new(0), "hi", || {});
        leak_task().start(Priority::new(255), "lo", || {});
        boot();
        assert_eq!(current_name(), Some("hi"));

        // hi sleeps 10 ms at now = 0
        assert!(svc::sleep_current(Duration::from_millis(10)));
        simulate_pendsv();
        assert_eq!(current_name(), Some("lo"));
        assert_eq!(timeouts_len(), 1);

        // the +1 rounding holds it until the tick after the deadline
        ticks_with_dispatch(10);
        assert_eq!(current_name(), Some("lo"));
        ticks_with_dispatch(1);
        assert_eq!(current_name(), Some("hi"));

        // hi terminates; lo resumes
        let hi = current().unwrap();
        svc::terminate(hi);
        simulate_pendsv();
        assert_eq!(current_name(), Some("lo"));
        assert!(!unsafe { hi.as_ref() }.is_started());
    }

    #[test]
    fn equal_priorities_rotate_round_robin() {
        let _fixture = fixture();
        leak_task().start(Priority::NORMAL, "t1", || {});
        leak_task().start(Priority::NORMAL, "t2", || {});
        leak_task().start(Priority::NORMAL, "t3", || {});
        boot();

        let mut order = Vec::new();
        order.push(current_name().unwrap());
        for _ in 0..8 {
            if svc::yield_current() {
                simulate_pendsv();
            }
            order.push(current_name().unwrap());
        }
        assert_eq!(
            order,
            ["t1", "t2", "t3", "t1", "t2", "t3", "t1", "t2", "t3"]
        );
    }

    #[test]
    fn yield_without_peers_keeps_running() {
        let _fixture = fixture();
        leak_task().start(Priority::NORMAL, "solo", || {});
        boot();
        let before = current();
        assert!(!svc::yield_current());
        assert_eq!(current(), before);
    }

    #[test]
    fn wait_times_out_on_the_deadline_tick() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::NORMAL, "waiter", || {});
        boot();
        let waiter = current().unwrap();

        assert!(svc::wait_current(
            NonNull::from(&CV),
            Some(Duration::from_millis(100)),
            None
        ));
        simulate_pendsv();
        assert!(is_idling());

        ticks(99);
        assert_eq!(timeouts_len(), 1, "still parked at now = 99");

        ticks(1);
        assert_eq!(timeouts_len(), 0);
        assert_eq!(now().as_millis(), 100);
        assert_eq!(saved_return_value(waiter), WaitStatus::TimedOut as u32);
        let tcb = unsafe { waiter.as_ref() };
        assert!(tcb.wait_until.is_none());
        assert!(tcb.waiting_on.is_none());

        simulate_pendsv();
        assert_eq!(current(), Some(waiter));
    }

    #[test]
    fn notify_cancels_timeout_entry() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::NORMAL, "waiter", || {});
        leak_task().start(Priority::LOWEST, "pump", || {});
        boot();
        let waiter = current().unwrap();

        svc::wait_current(NonNull::from(&CV), Some(Duration::from_millis(100)), None);
        simulate_pendsv();
        assert_eq!(current_name(), Some("pump"));

        // notified from the pump task's context at now = 40
        ticks(40);
        CV.notify_one();
        simulate_pendsv();

        assert_eq!(current(), Some(waiter));
        assert_eq!(now().as_millis(), 40);
        assert_eq!(saved_return_value(waiter), WaitStatus::Notified as u32);
        assert_eq!(timeouts_len(), 0, "timeout entry gone after notify");
        assert!(unsafe { waiter.as_ref() }.wait_until.is_none());

        // the vacated deadline never fires
        ticks(100);
        assert_eq!(current(), Some(waiter));
    }

    #[test]
    fn wait_without_notifier_blocks_indefinitely() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::NORMAL, "waiter", || {});
        boot();
        let waiter = current().unwrap();

        svc::wait_current(NonNull::from(&CV), None, None);
        simulate_pendsv();
        assert!(is_idling());

        ticks(1000);
        assert!(is_idling());
        assert_eq!(unsafe { waiter.as_ref() }.waiting_on, Some(NonNull::from(&CV)));
    }

    #[test]
    fn notify_all_wakes_in_priority_order() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::new(30), "low", || {});
        leak_task().start(Priority::new(10), "high", || {});
        leak_task().start(Priority::new(20), "mid", || {});
        leak_task().start(Priority::LOWEST, "pump", || {});
        boot();

        // park all three, highest first dispatch order; pump keeps running
        for _ in 0..3 {
            svc::wait_current(NonNull::from(&CV), None, None);
            simulate_pendsv();
        }
        assert_eq!(current_name(), Some("pump"));

        CV.notify_all();
        // all three waiters (plus the displaced pump) are queued before any
        // of them runs
        assert_eq!(ready_len() + u32::from(next().is_some()), 4);
        simulate_pendsv();
        assert_eq!(current_name(), Some("high"));
        let front = unsafe { SCHED.get_unchecked() }.ready.front().unwrap();
        assert_eq!(unsafe { front.as_ref() }.name(), Some("mid"));
    }

    #[test]
    fn critical_section_defers_preemption() {
        let _fixture = fixture();
        leak_task().start(Priority::new(200), "base", || {});
        boot();
        assert_eq!(current_name(), Some("base"));

        let section = critical_section();
        assert!(section.is_valid());

        // a higher-priority task becomes ready mid-section
        leak_task().start(Priority::new(1), "urgent", || {});
        assert_eq!(current_name(), Some("base"), "switch deferred");
        assert!(next().is_none());

        drop(section);
        assert!(next().is_some());
        simulate_pendsv();
        assert_eq!(current_name(), Some("urgent"));
    }

    #[test]
    #[cfg(debug_assertions)]
    #[should_panic(expected = "sleeping inside a critical section")]
    fn sleep_inside_critical_section_asserts() {
        let _fixture = fixture();
        leak_task().start(Priority::NORMAL, "t", || {});
        boot();
        let _section = critical_section();
        svc::sleep_current(Duration::from_millis(5));
    }

    #[test]
    fn nested_critical_section_handles_are_inert() {
        let _fixture = fixture();
        leak_task().start(Priority::NORMAL, "base", || {});
        boot();

        let outer = critical_section();
        let inner = critical_section();
        assert!(outer.is_valid());
        assert!(!inner.is_valid());

        drop(inner);
        assert!(in_critical(), "inner handle does not end the section");
        drop(outer);
        assert!(!in_critical());
    }

    #[test]
    fn wait_releases_mutex_and_relocks_on_resume() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        static MUTEX: crate::sync::mutex::PriorityMutex =
            crate::sync::mutex::PriorityMutex::with_ceiling(crate::prio::KERNEL_PRIORITY);

        leak_task().start(Priority::new(10), "a", || {});
        leak_task().start(Priority::new(20), "b", || {});
        boot();
        assert_eq!(current_name(), Some("a"));
        let a = current().unwrap();

        MUTEX.lock();
        assert!(in_critical());
        assert_eq!(port::basepri().value(), crate::prio::KERNEL_PRIORITY.masked());

        svc::wait_current(
            NonNull::from(&CV),
            Some(Duration::from_millis(50)),
            Some(NonNull::from(&MUTEX)),
        );
        // released atomically with the suspension: mask dropped, critical
        // section gone, mutex parked on the task
        assert!(!in_critical());
        assert_eq!(port::basepri().value(), 0);
        assert_eq!(unsafe { a.as_ref() }.pending_mutex, Some(NonNull::from(&MUTEX)));
        simulate_pendsv();
        assert_eq!(current_name(), Some("b"));

        // b takes and releases the mutex while a waits
        MUTEX.lock();
        assert!(in_critical());
        MUTEX.unlock();
        assert!(!in_critical());

        CV.notify_one();
        simulate_pendsv();

        // a resumed holding the mutex again: ceiling re-applied by the
        // dispatch, critical section re-taken
        assert_eq!(current(), Some(a));
        assert!(in_critical());
        assert_eq!(port::basepri().value(), crate::prio::KERNEL_PRIORITY.masked());
        assert!(unsafe { a.as_ref() }.pending_mutex.is_none());
        assert_eq!(saved_return_value(a), WaitStatus::Notified as u32);
        assert_eq!(timeouts_len(), 0);

        MUTEX.unlock();
        assert!(!in_critical());
        assert_eq!(port::basepri().value(), 0);
    }

    #[test]
    fn terminate_twice_is_a_no_op() {
        let _fixture = fixture();
        leak_task().start(Priority::NORMAL, "t", || {});
        leak_task().start(Priority::LOWEST, "other", || {});
        boot();
        let t = current().unwrap();

        assert!(svc::terminate(t));
        simulate_pendsv();
        assert!(!unsafe { t.as_ref() }.is_started());
        assert_eq!(current_name(), Some("other"));

        // second attempt finds the task inactive and does nothing
        assert!(!svc::terminate(t));
        assert_eq!(current_name(), Some("other"));
    }

    #[test]
    fn terminate_removes_ready_task_from_queues() {
        let _fixture = fixture();
        leak_task().start(Priority::new(10), "runner", || {});
        leak_task().start(Priority::new(20), "victim", || {});
        boot();
        assert_eq!(current_name(), Some("runner"));
        assert_eq!(ready_len(), 1);

        let victim = unsafe { SCHED.get_unchecked() }.ready.front().unwrap();
        svc::terminate(victim);
        assert_eq!(ready_len(), 0);

        let mut seen = 0;
        all_tasks(|_| seen += 1);
        assert_eq!(seen, 1);
    }

    #[test]
    fn terminate_waiting_task_clears_wait_state() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::new(10), "waiter", || {});
        leak_task().start(Priority::new(20), "other", || {});
        boot();
        let waiter = current().unwrap();

        svc::wait_current(NonNull::from(&CV), Some(Duration::from_millis(100)), None);
        simulate_pendsv();
        assert_eq!(current_name(), Some("other"));

        svc::terminate(waiter);
        assert_eq!(timeouts_len(), 0);
        let tcb = unsafe { waiter.as_ref() };
        assert!(tcb.waiting_on.is_none());
        assert!(tcb.wait_until.is_none());

        // a later notify finds nobody
        CV.notify_one();
        assert_eq!(current_name(), Some("other"));
    }

    #[test]
    fn priority_update_reorders_ready_queue_and_preempts() {
        let _fixture = fixture();
        leak_task().start(Priority::new(10), "running", || {});
        let boosted = leak_task();
        let boosted_tcb = NonNull::from(boosted.tcb());
        boosted.start(Priority::new(200), "boosted", || {});
        boot();
        assert_eq!(current_name(), Some("running"));

        update_priority(boosted_tcb, Priority::new(1));
        simulate_pendsv();
        assert_eq!(current_name(), Some("boosted"));
    }

    #[test]
    fn tick_advances_the_clock() {
        let _fixture = fixture();
        boot();
        assert_eq!(now().as_millis(), 0);
        ticks(5);
        assert_eq!(now().as_millis(), 5);
    }

    #[test]
    fn timeouts_fire_in_deadline_order() {
        let _fixture = fixture();
        static CV: ConditionVariable = ConditionVariable::new();
        leak_task().start(Priority::new(1), "slow", || {});
        leak_task().start(Priority::new(2), "fast", || {});
        boot();

        // "slow" waits 30 ms, "fast" 10 ms
        svc::wait_current(NonNull::from(&CV), Some(Duration::from_millis(30)), None);
        simulate_pendsv();
        svc::wait_current(NonNull::from(&CV), Some(Duration::from_millis(10)), None);
        simulate_pendsv();
        assert!(is_idling());

        ticks_with_dispatch(10);
        assert_eq!(current_name(), Some("fast"));
        ticks_with_dispatch(20);
        // "slow" outranks "fast" once its deadline fires
        assert_eq!(current_name(), Some("slow"));
    }
}
