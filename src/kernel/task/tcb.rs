//! Task control block
//!
//! The TCB carries everything the scheduler needs to manage one task:
//! stack bookkeeping, priority, wait state and the embedded queue links.
//! Exactly one of the task's logical states holds at any instant, encoded
//! by field presence:
//!
//! - `waiting_on` set: the task is in that condition variable's waiting
//!   list (plus the timeout queue when `wait_until` is also set);
//! - only `wait_until` set: the task is sleeping in the timeout queue;
//! - neither, and `active`: the task is in the ready queue, or is the
//!   current or next-to-run task;
//! - not `active`: the task is terminated (or never started).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use crate::callback::Callback;
use crate::list::{LinkTag, Links, RegistryLink, RunLink, TimerLink};
use crate::prio::Priority;
use crate::sync::condvar::ConditionVariable;
use crate::sync::mutex::PriorityMutex;
use crate::task::frame::{self, StackItem};
use crate::time::Instant;

/// Control block of one task. Owned by the application, usually embedded
/// in a [`Task`](crate::task::Task); the scheduler only holds non-owning
/// references through the embedded links.
pub struct Tcb {
    // ============ Stack ============
    pub(crate) stack_base: *mut StackItem,
    pub(crate) stack_size: usize,
    /// Top of the saved context; updated on every preemption.
    pub(crate) stack_pointer: *mut StackItem,

    // ============ Scheduling ============
    pub(crate) priority: Priority,
    pub(crate) active: AtomicBool,
    /// When the task was last dispatched; FIFO tiebreaker between equal
    /// priorities.
    pub(crate) last_started: Instant,

    // ============ Wait state ============
    pub(crate) wait_until: Option<Instant>,
    pub(crate) waiting_on: Option<NonNull<ConditionVariable>>,
    /// Mutex to re-acquire on the next dispatch, parked here while a wait
    /// atomically released it.
    pub(crate) pending_mutex: Option<NonNull<PriorityMutex>>,

    // ============ Identity ============
    pub(crate) name: Option<&'static str>,
    pub(crate) entry: Callback,

    // ============ Queue links ============
    pub(crate) run: Links,
    pub(crate) timer: Links,
    pub(crate) registry: Links,
}

impl Tcb {
    /// Creates an unstarted TCB. The stack range is wired in by
    /// [`Task::start`](crate::task::Task::start).
    pub const fn new() -> Self {
        Tcb {
            stack_base: core::ptr::null_mut(),
            stack_size: 0,
            stack_pointer: core::ptr::null_mut(),

            priority: Priority::LOWEST,
            active: AtomicBool::new(false),
            last_started: Instant::STARTUP,

            wait_until: None,
            waiting_on: None,
            pending_mutex: None,

            name: None,
            entry: Callback::empty(),

            run: Links::new(),
            timer: Links::new(),
            registry: Links::new(),
        }
    }

    /// Whether the task has been started and not yet terminated.
    #[inline]
    pub fn is_started(&self) -> bool {
        self.active.load(Ordering::Relaxed)
    }

    /// Current scheduling priority.
    #[inline]
    pub fn priority(&self) -> Priority {
        self.priority
    }

    /// Diagnostic name, if one was given at start.
    #[inline]
    pub fn name(&self) -> Option<&'static str> {
        self.name
    }

    /// Ready-queue order: higher priority first, then least recently
    /// dispatched first. The strict comparison keeps insertion stable, so
    /// equal-priority tasks cycle round-robin.
    pub(crate) fn runs_before(left: &Tcb, right: &Tcb) -> bool {
        if left.priority != right.priority {
            return left.priority < right.priority;
        }
        left.last_started < right.last_started
    }

    /// Timeout-queue order: soonest deadline first. Both tasks must carry
    /// a deadline.
    pub(crate) fn wakes_before(left: &Tcb, right: &Tcb) -> bool {
        debug_assert!(left.wait_until.is_some() && right.wait_until.is_some());
        left.wait_until < right.wait_until
    }

    /// Writes `value` into the saved `r0` slot of this task's stacked
    /// frame, so the task observes it as the return value of the service
    /// call it suspended in.
    ///
    /// # Safety
    /// The task must be suspended with a valid saved context.
    pub(crate) unsafe fn set_return_value(&mut self, value: u32) {
        unsafe { (*frame::saved_frame(self.stack_pointer)).r0 = value };
    }
}

impl Default for Tcb {
    fn default() -> Self {
        Self::new()
    }
}

// SAFETY: the scheduler only mutates a TCB with the kernel mask engaged;
// `active` is the one field touched concurrently and is atomic.
unsafe impl Send for Tcb {}
unsafe impl Sync for Tcb {}

impl LinkTag for RunLink {
    unsafe fn links_of(tcb: NonNull<Tcb>) -> *mut Links {
        unsafe { &raw mut (*tcb.as_ptr()).run }
    }
}

impl LinkTag for TimerLink {
    unsafe fn links_of(tcb: NonNull<Tcb>) -> *mut Links {
        unsafe { &raw mut (*tcb.as_ptr()).timer }
    }
}

impl LinkTag for RegistryLink {
    unsafe fn links_of(tcb: NonNull<Tcb>) -> *mut Links {
        unsafe { &raw mut (*tcb.as_ptr()).registry }
    }
}
