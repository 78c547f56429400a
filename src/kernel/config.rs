//! Compile-time configuration for the kernel
//!
//! These constants control clocking, interrupt priority layout and
//! resource sizing. Override by editing this file (the kernel has no
//! runtime configuration).

/// Core clock frequency in Hz, used to derive the SysTick reload value.
///
/// Must be a multiple of [`CFG_TICK_RATE_HZ`] so the tick period is exact.
pub const CFG_CORE_CLOCK_HZ: u32 = 16_000_000;

/// System tick rate in Hz. The kernel time unit is one tick (1 ms).
pub const CFG_TICK_RATE_HZ: u32 = 1000;

/// Number of interrupt priority bits implemented by the NVIC.
pub const CFG_PRIORITY_BITS: u32 = 4;

/// Number of preemption (group priority) bits the kernel configures.
pub const CFG_PREEMPTION_BITS: u32 = 2;

/// Preemption level the kernel exceptions (service call, tick) run at.
///
/// One preemption level is left above the kernel for interrupt service
/// routines that cannot tolerate kernel latency. Those routines must not
/// touch any kernel primitive.
pub const CFG_KERNEL_PREEMPTION: u8 = 1;

/// Storage for an inlined task entry closure, in pointer-sized words.
pub const CFG_CALLBACK_WORDS: usize = 8;

/// Debug-build fill pattern for fresh task stacks.
pub const CFG_STACK_CANARY: u32 = 0xDEAD_BEEF;

const _: () = assert!(CFG_CORE_CLOCK_HZ % CFG_TICK_RATE_HZ == 0);
const _: () = assert!(CFG_PRIORITY_BITS <= 8);
const _: () = assert!(CFG_PREEMPTION_BITS <= CFG_PRIORITY_BITS);
const _: () = assert!((CFG_KERNEL_PREEMPTION as u32) < (1 << CFG_PREEMPTION_BITS));

/// The mutex implementation used by the kernel and its condition variables.
pub type Mutex = crate::sync::mutex::PriorityMutex;
