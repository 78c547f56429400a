//! Critical sections and kernel masking
//!
//! Two unrelated locks live here:
//!
//! - [`CriticalSection`] defers *task switching* while held. Interrupts
//!   keep running; for ISR exclusion use a
//!   [`PriorityMutex`](crate::sync::mutex::PriorityMutex).
//! - [`KernelGuard`] raises BASEPRI to the kernel priority, making the
//!   holder atomic with respect to every kernel-aware interrupt. All
//!   scheduler state is mutated under it (or from handlers that run at
//!   that level anyway).

use crate::port;
use crate::prio::{IsrPriority, KERNEL_PRIORITY};
use crate::sched;

/// A handle on the (single, process-wide) critical section.
///
/// Obtained from [`critical_section`](crate::sched::critical_section).
/// Movable, not copyable. Only the first handle taken is valid; handles
/// returned while the section is already held are inert. Dropping the
/// valid handle ends the section and performs any switch that was deferred
/// while it was held.
pub struct CriticalSection {
    valid: bool,
}

impl CriticalSection {
    /// Creates an inert handle.
    pub const fn inactive() -> Self {
        CriticalSection { valid: false }
    }

    pub(crate) const fn new(valid: bool) -> Self {
        CriticalSection { valid }
    }

    /// Whether this handle actually holds the section.
    pub fn is_valid(&self) -> bool {
        self.valid
    }

    /// Strips the handle of its validity without ending the section.
    /// Used when the section logically transfers to another owner.
    pub(crate) fn disable(&mut self) {
        debug_assert!(self.valid);
        self.valid = false;
    }
}

impl Default for CriticalSection {
    fn default() -> Self {
        Self::inactive()
    }
}

impl Drop for CriticalSection {
    fn drop(&mut self) {
        if self.valid {
            self.valid = false;
            sched::critical_section_end();
        }
    }
}

/// RAII kernel mask: raises BASEPRI to the service-call priority on
/// acquisition and restores the previous value on drop.
pub(crate) struct KernelGuard {
    previous: IsrPriority,
}

impl KernelGuard {
    #[inline]
    pub(crate) fn acquire() -> Self {
        KernelGuard {
            previous: port::set_basepri(IsrPriority::new(KERNEL_PRIORITY.masked())),
        }
    }

    /// The mask value that was in force before this guard.
    #[inline]
    pub(crate) fn previous(&self) -> IsrPriority {
        self.previous
    }
}

impl Drop for KernelGuard {
    #[inline]
    fn drop(&mut self) {
        port::set_basepri(self.previous);
    }
}

/// Whether the caller is executing in an interrupt handler.
#[inline]
pub fn is_isr_context() -> bool {
    port::ipsr() != 0
}
