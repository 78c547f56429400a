//! Condition variable
//!
//! A priority-ordered blocking queue with timed waits. Waiting is reserved
//! for tasks; notifying is open to tasks and to ISRs at or below the
//! priority of the internal mutex, which serializes concurrent notifiers.
//!
//! There are no spurious wake-ups: every wake is the result of a matching
//! notify or an elapsed timeout, so callers do not need a predicate loop.

use core::cell::UnsafeCell;
use core::ptr::NonNull;

use crate::critical::is_isr_context;
use crate::list::{RunLink, TaskList};
use crate::port;
use crate::prio::{IsrPriority, KERNEL_PRIORITY};
use crate::sched;
use crate::sync::mutex::PriorityMutex;
use crate::task::Tcb;
use crate::time::{Duration, Instant, WaitStatus};

/// A condition variable.
pub struct ConditionVariable {
    /// Serializes notifiers against each other (and against ISR callers up
    /// to its ceiling).
    mutex: PriorityMutex,
    waiting: UnsafeCell<TaskList<RunLink>>,
}

// SAFETY: the waiting list is only touched under the internal mutex or at
// kernel atomicity inside the wait/wake paths.
unsafe impl Send for ConditionVariable {}
unsafe impl Sync for ConditionVariable {}

impl ConditionVariable {
    /// Creates a condition variable whose notifiers are tasks only.
    pub const fn new() -> Self {
        Self::with_priority(None)
    }

    /// Creates a condition variable whose `notify` calls are additionally
    /// serialized against ISRs up to `priority`. Required when an ISR is
    /// among the notifiers.
    pub const fn with_priority(priority: Option<IsrPriority>) -> Self {
        ConditionVariable {
            mutex: PriorityMutex::new(priority),
            waiting: UnsafeCell::new(TaskList::new()),
        }
    }

    #[allow(clippy::mut_from_ref)]
    fn waiting(&self) -> &mut TaskList<RunLink> {
        unsafe { &mut *self.waiting.get() }
    }

    /// The caller must not outrank the internal mutex, and the mutex must
    /// not outrank the kernel, or notify loses its atomicity.
    fn check_notify_context(&self) {
        debug_assert!(
            self.mutex.priority().unwrap_or(KERNEL_PRIORITY).masked()
                >= port::current_priority().unwrap_or(KERNEL_PRIORITY).masked()
        );
        debug_assert!(
            self.mutex.priority().unwrap_or(KERNEL_PRIORITY).masked() >= KERNEL_PRIORITY.masked()
        );
    }

    fn check_wait_context(&self) {
        debug_assert!(!is_isr_context(), "wait from an ISR");
        debug_assert!(
            self.mutex.priority().unwrap_or(KERNEL_PRIORITY).masked() >= KERNEL_PRIORITY.masked()
        );
    }

    /// Wakes the most important waiting task, if any.
    pub fn notify_one(&self) {
        self.check_notify_context();
        self.mutex.lock();
        crate::hooks::cv_notify_one();
        if let Some(front) = self.waiting().front() {
            sched::wake_up(front, self);
        }
        self.mutex.unlock();
    }

    /// Wakes every waiting task, in priority order. All of them reach the
    /// ready queue before any of them runs.
    pub fn notify_all(&self) {
        self.check_notify_context();
        self.mutex.lock();
        crate::hooks::cv_notify_all();
        while let Some(front) = self.waiting().front() {
            sched::wake_up(front, self);
        }
        self.mutex.unlock();
    }

    /// Blocks the calling task until notified.
    pub fn wait(&self) {
        self.check_wait_context();
        port::svc_wait(self, -1, core::ptr::null());
    }

    /// Blocks the calling task until notified, releasing `mutex`
    /// atomically with the suspension and re-acquiring it before the task
    /// resumes user code. `mutex` must be locked by the caller.
    pub fn wait_with(&self, mutex: &PriorityMutex) {
        self.check_wait_context();
        port::svc_wait(self, -1, mutex);
    }

    /// Blocks the calling task until notified or until `timeout` elapses.
    pub fn wait_for(&self, timeout: Duration) -> WaitStatus {
        self.check_wait_context();
        debug_assert!(!timeout.is_negative());
        WaitStatus::from_raw(port::svc_wait(self, timeout.as_millis(), core::ptr::null()))
    }

    /// [`wait_for`](Self::wait_for) with the atomic mutex hand-off of
    /// [`wait_with`](Self::wait_with).
    pub fn wait_for_with(&self, mutex: &PriorityMutex, timeout: Duration) -> WaitStatus {
        self.check_wait_context();
        debug_assert!(!timeout.is_negative());
        WaitStatus::from_raw(port::svc_wait(self, timeout.as_millis(), mutex))
    }

    /// Blocks the calling task until notified or until `deadline`. A
    /// deadline that has already passed returns
    /// [`WaitStatus::TimedOut`] immediately, without suspending.
    pub fn wait_until(&self, deadline: Instant) -> WaitStatus {
        let remaining = deadline - sched::now();
        if remaining <= Duration::ZERO {
            return WaitStatus::TimedOut;
        }
        self.wait_for(remaining)
    }

    /// [`wait_until`](Self::wait_until) with the atomic mutex hand-off.
    /// On an already-elapsed deadline the mutex stays held, matching the
    /// post-state of any other timed-out wait.
    pub fn wait_until_with(&self, mutex: &PriorityMutex, deadline: Instant) -> WaitStatus {
        let remaining = deadline - sched::now();
        if remaining <= Duration::ZERO {
            return WaitStatus::TimedOut;
        }
        self.wait_for_with(mutex, remaining)
    }

    /// Queues `task`, keeping the list ordered most-important-first.
    /// Caller must hold kernel atomicity.
    pub(crate) fn add_waiting(&self, task: NonNull<Tcb>) {
        self.waiting().insert_ordered(Tcb::runs_before, task);
    }

    /// Unlinks `task`. Caller must hold kernel atomicity.
    pub(crate) fn remove_waiting(&self, task: NonNull<Tcb>) {
        self.waiting().erase(task);
    }
}

impl Default for ConditionVariable {
    fn default() -> Self {
        Self::new()
    }
}
