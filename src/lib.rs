//! Kairos — a preemptive real-time kernel for single-core ARM Cortex-M
//! (M3/M4/M7)
//!
//! The kernel provides:
//! - fixed-priority preemptive multitasking with a priority-ordered ready
//!   queue and round-robin rotation among equal priorities
//! - blocking synchronization: priority mutexes, condition variables with
//!   timed waits, and an atomic mutex release across a wait
//! - priority-based interrupt masking so ISRs at or below the kernel
//!   priority can safely notify and lock
//!
//! Tasks live in application-owned statics; the kernel allocates nothing.
//! Suspension points (`sleep_for`, `yield_now`, the `wait` family) are
//! supervisor calls, so they execute atomically with respect to every
//! kernel-aware interrupt. Context switches happen in a dedicated
//! lowest-priority exception.

#![no_std]
#![deny(unsafe_op_in_unsafe_fn)]

#[cfg(test)]
extern crate std;

// ============ Critical Section ============

#[cfg(target_arch = "arm")]
mod cs_impl {
    use cortex_m::interrupt;
    use cortex_m::register::primask;
    use critical_section::{set_impl, Impl, RawRestoreState};

    struct SingleCoreCriticalSection;
    set_impl!(SingleCoreCriticalSection);

    unsafe impl Impl for SingleCoreCriticalSection {
        unsafe fn acquire() -> RawRestoreState {
            let was_active = primask::read().is_active();
            interrupt::disable();
            was_active
        }

        unsafe fn release(was_active: RawRestoreState) {
            if was_active {
                unsafe { interrupt::enable() }
            }
        }
    }
}

// ============ Modules ============

pub mod log;
mod hooks;
mod lang_items;
mod port;

pub mod kernel;
pub mod sync;

// ============ Re-exports ============

pub use kernel::callback;
pub use kernel::callback::Callback;
pub use kernel::config;
pub use kernel::critical;
pub use kernel::critical::{is_isr_context, CriticalSection};
pub use kernel::prio;
pub use kernel::prio::{IsrPriority, Priority};
pub use kernel::sched;
pub use kernel::sched::{all_tasks, critical_section, now, start, yield_now};
pub use kernel::task;
pub use kernel::task::{IdleTask, StackItem, Task, Tcb};
pub use kernel::time;
pub use kernel::time::{sleep_for, sleep_until, Duration, Instant, WaitStatus};

pub(crate) use kernel::cs_cell;
pub(crate) use kernel::list;

pub use config::Mutex;
pub use sync::{ConditionVariable, PriorityMutex};

#[cfg(all(feature = "pac", target_arch = "arm"))]
pub use stm32_metapac as pac;
