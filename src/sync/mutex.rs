//! Priority mutex
//!
//! Mutual exclusion that covers tasks and, optionally, interrupt service
//! routines up to a configured priority ceiling:
//!
//! - no ceiling: a task-only lock, implemented as the critical section;
//! - ceiling `0`: a full lock, disabling all interrupts (PRIMASK);
//! - ceiling `P`: the critical section plus BASEPRI raised to `P`, so ISRs
//!   at or below `P` are excluded too (they may themselves take the lock,
//!   provided their own priority does not exceed `P`).
//!
//! Locks are not counted: calls to [`lock`](PriorityMutex::lock) and
//! [`unlock`](PriorityMutex::unlock) must match. Lock and unlock cannot
//! fail and never block: exclusion comes from masking, not from waiting.

use core::cell::UnsafeCell;

use crate::critical::{is_isr_context, CriticalSection};
use crate::hooks;
use crate::port;
use crate::prio::IsrPriority;
use crate::sched;

struct MutexState {
    locked: bool,
    /// BASEPRI value to restore on unlock.
    previous_mask: IsrPriority,
    section: CriticalSection,
}

/// A mutual-exclusion lock over tasks and ISRs up to a priority ceiling.
pub struct PriorityMutex {
    priority: Option<IsrPriority>,
    state: UnsafeCell<MutexState>,
}

// SAFETY: the fields behind the cell are only touched while the exclusion
// the mutex itself establishes (critical section and/or mask) is in force,
// or from the kernel's own handlers during the wait hand-off.
unsafe impl Send for PriorityMutex {}
unsafe impl Sync for PriorityMutex {}

impl PriorityMutex {
    /// Creates a mutex locking ISRs up to `priority`, or tasks only when
    /// `None`. A ceiling of raw value `0` disables interrupts globally
    /// while locked.
    pub const fn new(priority: Option<IsrPriority>) -> Self {
        PriorityMutex {
            priority,
            state: UnsafeCell::new(MutexState {
                locked: false,
                previous_mask: IsrPriority::new(0),
                section: CriticalSection::inactive(),
            }),
        }
    }

    /// A task-only mutex (plain critical section).
    pub const fn task_only() -> Self {
        Self::new(None)
    }

    /// A mutex with an ISR priority ceiling.
    pub const fn with_ceiling(priority: IsrPriority) -> Self {
        Self::new(Some(priority))
    }

    /// The ISR ceiling, or `None` for a task-only mutex.
    pub const fn priority(&self) -> Option<IsrPriority> {
        self.priority
    }

    #[allow(clippy::mut_from_ref)]
    fn state(&self) -> &mut MutexState {
        unsafe { &mut *self.state.get() }
    }

    /// Takes the lock.
    pub fn lock(&self) {
        let state = self.state();
        match self.priority {
            None => {
                debug_assert!(!is_isr_context(), "task-only mutex locked from an ISR");
                state.section = sched::critical_section();
            }
            Some(priority) if priority.value() == 0 => {
                debug_assert!(!port::primask_active());
                hooks::enter_full_lock();
                port::disable_interrupts();
            }
            Some(priority) => {
                if is_isr_context() {
                    // an ISR above the ceiling cannot participate in the
                    // exclusion this mutex provides
                    debug_assert!(
                        port::current_priority()
                            .map_or(false, |current| current.masked() >= priority.masked())
                    );
                } else {
                    state.section = sched::critical_section();
                }
                hooks::enter_priority_lock(priority);
                state.previous_mask = port::set_basepri(IsrPriority::new(priority.masked()));
                // locking may only tighten the mask: taking a looser lock
                // inside a tighter one would unmask ISRs the outer lock is
                // supposed to exclude
                debug_assert!(
                    state.previous_mask.value() == 0
                        || priority.masked() <= state.previous_mask.masked()
                );
            }
        }
        state.locked = true;
    }

    /// Releases the lock. A second unlock without an intervening lock is a
    /// no-op.
    pub fn unlock(&self) {
        let state = self.state();
        if !state.locked {
            return;
        }
        state.locked = false;

        match self.priority {
            None => {
                debug_assert!(!is_isr_context());
                state.section = CriticalSection::inactive();
            }
            Some(priority) if priority.value() == 0 => {
                debug_assert!(port::primask_active());
                port::enable_interrupts();
                hooks::exit_full_lock();
            }
            Some(priority) => {
                let _was = port::set_basepri(state.previous_mask);
                debug_assert!(_was.masked() == priority.masked());
                hooks::exit_priority_lock();
                state.section = CriticalSection::inactive();
            }
        }
    }

    /// Drops the mask and invalidates the held critical-section handle
    /// without releasing the section itself.
    ///
    /// Called from the `Wait` service call: the section logically stays in
    /// force and travels with the waiting task, to be re-established by
    /// [`re_lock_from_pend_sv`](Self::re_lock_from_pend_sv) on resume.
    pub(crate) fn release_for_wait(&self) {
        let state = self.state();
        debug_assert!(state.locked);

        match self.priority {
            None => {}
            Some(priority) if priority.value() == 0 => {
                debug_assert!(port::primask_active());
                port::enable_interrupts();
            }
            Some(priority) => {
                let _was = port::set_basepri(state.previous_mask);
                debug_assert!(_was.masked() == priority.masked());
            }
        }

        state.section.disable();
    }

    /// Re-establishes the lock for a task resuming from a wait: adopts the
    /// critical-section handle the scheduler hands over and records that
    /// the mask below the lock is clear (the task resumes from the
    /// pending-switch exception).
    ///
    /// Returns the BASEPRI value the trampoline must apply with the
    /// context restore.
    pub(crate) fn re_lock_from_pend_sv(&self, section: CriticalSection) -> u8 {
        let state = self.state();
        state.section = section;
        if let Some(priority) = self.priority {
            // a full lock cannot be carried across a wait: the service
            // call could not have been taken with PRIMASK set
            debug_assert!(priority.value() != 0);
            state.previous_mask = IsrPriority::new(0);
        }
        state.locked = true;
        self.priority.map_or(0, |priority| priority.masked())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::prio::KERNEL_PRIORITY;
    use crate::sched::testing::fixture;

    #[test]
    fn task_only_mutex_is_a_critical_section() {
        let _fixture = fixture();
        let mutex = PriorityMutex::task_only();
        assert!(mutex.priority().is_none());

        mutex.lock();
        assert!(crate::sched::in_critical());
        assert_eq!(port::basepri().value(), 0, "no mask for a task-only lock");
        mutex.unlock();
        assert!(!crate::sched::in_critical());
    }

    #[test]
    fn ceiling_mutex_raises_and_restores_the_mask() {
        let _fixture = fixture();
        let mutex = PriorityMutex::with_ceiling(IsrPriority::new(0x80));

        mutex.lock();
        assert_eq!(port::basepri().value(), 0x80);
        assert!(crate::sched::in_critical());
        mutex.unlock();
        assert_eq!(port::basepri().value(), 0);
        assert!(!crate::sched::in_critical());
    }

    #[test]
    fn nested_ceilings_only_raise() {
        let _fixture = fixture();
        let outer = PriorityMutex::with_ceiling(IsrPriority::new(0x80));
        let inner = PriorityMutex::with_ceiling(KERNEL_PRIORITY);

        outer.lock();
        assert_eq!(port::basepri().value(), 0x80);
        inner.lock();
        // kernel ceiling (0x40) outranks 0x80: the mask tightened
        assert_eq!(port::basepri().value(), KERNEL_PRIORITY.masked());
        inner.unlock();
        assert_eq!(port::basepri().value(), 0x80);
        outer.unlock();
        assert_eq!(port::basepri().value(), 0);
    }

    #[test]
    fn full_lock_disables_interrupts() {
        let _fixture = fixture();
        let mutex = PriorityMutex::with_ceiling(IsrPriority::new(0));

        mutex.lock();
        assert!(port::primask_active());
        mutex.unlock();
        assert!(!port::primask_active());
    }

    #[test]
    fn unlock_without_lock_is_a_no_op() {
        let _fixture = fixture();
        let mutex = PriorityMutex::with_ceiling(IsrPriority::new(0x80));
        mutex.unlock();
        assert_eq!(port::basepri().value(), 0);

        mutex.lock();
        mutex.unlock();
        mutex.unlock();
        assert_eq!(port::basepri().value(), 0);
    }
}
