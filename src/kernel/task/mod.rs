//! Tasks
//!
//! A [`Task`] owns its control block and an embedded stack array. The
//! application keeps tasks in statics; the scheduler never owns them.
//!
//! ```ignore
//! static mut WORKER: Task<256> = Task::new();
//!
//! // in main, before or after the scheduler starts:
//! unsafe { WORKER.start(Priority::NORMAL, "worker", || loop { /* … */ }) };
//! ```

pub(crate) mod frame;
mod tcb;

pub use frame::StackItem;
pub use tcb::Tcb;

use core::ptr::NonNull;
use core::sync::atomic::Ordering;

use crate::callback::Callback;
use crate::port;
use crate::prio::Priority;
use crate::sched;

use frame::MIN_STACK_WORDS;

/// A task with a dedicated stack of `STACK_WORDS` words.
pub struct Task<const STACK_WORDS: usize> {
    tcb: Tcb,
    stack: [StackItem; STACK_WORDS],
}

impl<const STACK_WORDS: usize> Task<STACK_WORDS> {
    /// Creates an unstarted task.
    pub const fn new() -> Self {
        const {
            assert!(STACK_WORDS >= MIN_STACK_WORDS, "stack too small");
        }
        Task {
            tcb: Tcb::new(),
            stack: [0; STACK_WORDS],
        }
    }

    /// Starts the task: seeds its stack and hands it to the scheduler,
    /// ready to run `entry` on first dispatch.
    ///
    /// Returns `false` if the task was already started; the arguments are
    /// then ignored.
    pub fn start<F>(&'static mut self, priority: Priority, name: &'static str, entry: F) -> bool
    where
        F: FnOnce() + Send + 'static,
    {
        if self.tcb.active.swap(true, Ordering::AcqRel) {
            return false;
        }

        self.tcb.priority = priority;
        self.tcb.name = Some(name);
        self.tcb.entry = Callback::new(entry);
        self.tcb.stack_base = self.stack.as_mut_ptr();
        self.tcb.stack_size = STACK_WORDS;

        let tcb_ptr = &raw mut self.tcb;
        // SAFETY: the stack is owned by this task and not in use yet.
        self.tcb.stack_pointer = unsafe {
            frame::seed_stack(
                self.stack.as_mut_ptr(),
                STACK_WORDS,
                task_starter as usize as u32,
                tcb_ptr as u32,
                task_exit as usize as u32,
            )
        };

        sched::add_task(unsafe { NonNull::new_unchecked(tcb_ptr) });
        true
    }

    /// Terminates the task whatever its state.
    ///
    /// Returns `false` if the task was not started. Safe to race with the
    /// task exiting on its own; the second termination is a no-op.
    pub fn stop(&'static mut self) -> bool {
        if !self.tcb.is_started() {
            return false;
        }
        port::svc_terminate(&raw mut self.tcb);
        true
    }

    /// Changes the task's priority, re-sorting whichever queue it sits in
    /// and preempting if the change makes it the most important ready
    /// task.
    pub fn set_priority(&'static mut self, priority: Priority) {
        if priority == self.tcb.priority {
            return;
        }
        sched::update_priority(unsafe { NonNull::new_unchecked(&raw mut self.tcb) }, priority);
    }

    /// Current priority.
    pub fn priority(&self) -> Priority {
        self.tcb.priority()
    }

    /// Diagnostic name given at start.
    pub fn name(&self) -> Option<&'static str> {
        self.tcb.name()
    }

    /// Whether the task is started and not yet terminated.
    pub fn is_started(&self) -> bool {
        self.tcb.is_started()
    }

    /// The underlying control block.
    pub fn tcb(&self) -> &Tcb {
        &self.tcb
    }
}

/// First code a fresh task executes: run the entry closure, then terminate.
extern "C" fn task_starter(tcb: *mut Tcb) {
    unsafe { (*tcb).entry.invoke() };
    port::svc_terminate(tcb);
    // not reached: the service call switches away for good
    loop {
        port::idle_wait();
    }
}

/// Landing pad for a return out of the seeded frame. Never reached in
/// normal operation because `task_starter` terminates the task.
extern "C" fn task_exit() {
    loop {
        port::idle_wait();
    }
}

/// Control block of the idle context. Unlike a [`Tcb`] it has no priority,
/// no wait state and no queue links: it runs exactly when nothing else
/// can.
pub struct IdleTcb {
    pub(crate) stack_pointer: *mut StackItem,
}

// SAFETY: only the scheduler touches the idle TCB, from kernel context.
unsafe impl Send for IdleTcb {}
unsafe impl Sync for IdleTcb {}

/// The idle task: what the CPU does when no task is ready.
pub struct IdleTask<const STACK_WORDS: usize = 64> {
    tcb: IdleTcb,
    stack: [StackItem; STACK_WORDS],
    entry: fn(),
}

impl<const STACK_WORDS: usize> IdleTask<STACK_WORDS> {
    /// Creates an idle task that sleeps the CPU in a wait-for-interrupt
    /// loop.
    pub const fn new() -> Self {
        Self::with_entry(default_idle)
    }

    /// Creates an idle task running a custom body. `entry` must never
    /// return and must not call any blocking kernel API.
    pub const fn with_entry(entry: fn()) -> Self {
        const {
            assert!(STACK_WORDS >= MIN_STACK_WORDS, "idle stack too small");
        }
        IdleTask {
            tcb: IdleTcb { stack_pointer: core::ptr::null_mut() },
            stack: [0; STACK_WORDS],
            entry,
        }
    }

    /// Seeds the idle stack. Called once by the scheduler at start.
    pub(crate) fn seed(&mut self) -> NonNull<IdleTcb> {
        // SAFETY: the idle stack is owned here and idle has not run yet.
        self.tcb.stack_pointer = unsafe {
            frame::seed_stack(
                self.stack.as_mut_ptr(),
                STACK_WORDS,
                self.entry as usize as u32,
                0,
                task_exit as usize as u32,
            )
        };
        unsafe { NonNull::new_unchecked(&raw mut self.tcb) }
    }
}

impl<const STACK_WORDS: usize> Default for IdleTask<STACK_WORDS> {
    fn default() -> Self {
        Self::new()
    }
}

fn default_idle() {
    loop {
        port::idle_wait();
    }
}
