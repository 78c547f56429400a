//! Cortex-M port
//!
//! The architecture-specific floor of the kernel: the three exception
//! handlers (service call, pending switch, system tick), the priority
//! registers, and the trampolines that shuttle register state between the
//! CPU and the scheduler.

#![allow(non_snake_case)]

use core::arch::{asm, naked_asm};

use cortex_m::peripheral::scb::SystemHandler;
use cortex_m::peripheral::syst::SystClkSource;
use cortex_m::peripheral::{NVIC, SCB};

use crate::config::CFG_PREEMPTION_BITS;
use crate::prio::{IsrPriority, KERNEL_PRIORITY, PENDSV_PRIORITY, SYSTICK_PRIORITY};
use crate::sched;
use crate::sync::condvar::ConditionVariable;
use crate::sync::mutex::PriorityMutex;
use crate::task::frame::{ExceptionFrame, CONTROL_PSP};
use crate::task::{StackItem, Tcb};

// ============ Priority mask and context registers ============

/// Writes BASEPRI, returning the previous value.
pub(crate) fn set_basepri(priority: IsrPriority) -> IsrPriority {
    let previous: u32;
    unsafe {
        asm!(
            "mrs {prev}, BASEPRI",
            "msr BASEPRI, {new}",
            "isb",
            prev = out(reg) previous,
            new = in(reg) priority.value() as u32,
            options(nomem, nostack, preserves_flags)
        );
    }
    IsrPriority::new(previous as u8)
}

/// Current BASEPRI value.
pub(crate) fn basepri() -> IsrPriority {
    let value: u32;
    unsafe {
        asm!("mrs {}, BASEPRI", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    IsrPriority::new(value as u8)
}

/// Whether PRIMASK is set (all configurable interrupts disabled).
pub(crate) fn primask_active() -> bool {
    cortex_m::register::primask::read().is_active()
}

/// Sets PRIMASK, disabling every configurable interrupt.
pub(crate) fn disable_interrupts() {
    cortex_m::interrupt::disable();
}

/// Clears PRIMASK.
pub(crate) fn enable_interrupts() {
    // SAFETY: only the full-lock mutex pairs this with disable_interrupts.
    unsafe { cortex_m::interrupt::enable() };
}

/// The active exception number, zero in thread mode.
pub(crate) fn ipsr() -> u32 {
    let value: u32;
    unsafe {
        asm!("mrs {}, IPSR", out(reg) value, options(nomem, nostack, preserves_flags));
    }
    value & 0x1FF
}

/// Priority of the currently executing exception, `None` in thread mode.
pub(crate) fn current_priority() -> Option<IsrPriority> {
    match ipsr() {
        0 => None,
        // reset, NMI and HardFault have fixed priorities above anything
        // configurable
        1..=3 => Some(IsrPriority::new(0)),
        n @ 4..=15 => {
            let value = unsafe { (*SCB::PTR).shpr[(n - 4) as usize].read() };
            Some(IsrPriority::new(value))
        }
        n => {
            let value = unsafe { (*NVIC::PTR).ipr[(n - 16) as usize].read() };
            Some(IsrPriority::new(value))
        }
    }
}

// ============ Kernel boot ============

/// Configures priority grouping and the three kernel exception priorities.
pub(crate) fn install_kernel_priorities() {
    // binary point: preemption bits occupy the top of the priority byte
    const PRIGROUP: u32 = 7 - CFG_PREEMPTION_BITS;

    unsafe {
        let aircr = (*SCB::PTR).aircr.read();
        (*SCB::PTR)
            .aircr
            .write((aircr & !0xFFFF_0700) | (0x05FA << 16) | (PRIGROUP << 8));

        let mut peripherals = cortex_m::Peripherals::steal();
        let scb = &mut peripherals.SCB;
        scb.set_priority(SystemHandler::SVCall, KERNEL_PRIORITY.masked());
        scb.set_priority(SystemHandler::SysTick, SYSTICK_PRIORITY.masked());
        scb.set_priority(SystemHandler::PendSV, PENDSV_PRIORITY.masked());
    }
}

/// Starts the periodic tick with the given reload value.
pub(crate) fn systick_enable(reload: u32) {
    let mut peripherals = unsafe { cortex_m::Peripherals::steal() };
    peripherals.SYST.set_reload(reload - 1);
    peripherals.SYST.clear_current();
    peripherals.SYST.set_clock_source(SystClkSource::Core);
    peripherals.SYST.enable_interrupt();
    peripherals.SYST.enable_counter();
}

/// Moves thread mode onto the process stack and resets MSP to its boot
/// value for exception use.
pub(crate) fn switch_to_process_stack() {
    unsafe {
        let msp: u32;
        asm!("mrs {}, MSP", out(reg) msp, options(nomem, nostack, preserves_flags));
        asm!("msr PSP, {}", in(reg) msp, options(nomem, nostack, preserves_flags));
        asm!("msr CONTROL, {}", "isb", in(reg) CONTROL_PSP, options(nomem, nostack));

        let vtor = (*SCB::PTR).vtor.read();
        let reset_msp = core::ptr::read_volatile(vtor as *const u32);
        asm!("msr MSP, {}", in(reg) reset_msp, options(nomem, nostack, preserves_flags));
    }
}

/// Whether this CPU is one of the supported cores (M3, M4, M7).
pub(crate) fn cpu_supported() -> bool {
    let cpuid = unsafe { (*SCB::PTR).cpuid.read() };
    matches!((cpuid >> 4) & 0xFFF, 0xC23 | 0xC24 | 0xC27)
}

/// What the CPU does when nothing is runnable. A plain NOP in debug builds
/// so the debugger keeps its connection.
pub(crate) fn idle_wait() {
    if cfg!(debug_assertions) {
        cortex_m::asm::nop();
    } else {
        cortex_m::asm::wfi();
    }
}

// ============ Pending-switch request ============

pub(crate) fn trigger_pendsv() {
    SCB::set_pendsv();
}

pub(crate) fn clear_pendsv() {
    SCB::clear_pendsv();
}

// ============ Service-call invocation ============

use crate::sched::svc::SvcOp;

pub(crate) fn svc_terminate(task: *mut Tcb) {
    unsafe {
        asm!(
            "svc #{op}",
            op = const SvcOp::Terminate as u32,
            in("r0") task,
            lateout("r0") _,
        );
    }
}

pub(crate) fn svc_sleep(millis: i32) {
    unsafe {
        asm!(
            "svc #{op}",
            op = const SvcOp::Sleep as u32,
            in("r0") millis,
            lateout("r0") _,
        );
    }
}

pub(crate) fn svc_yield() {
    unsafe {
        asm!("svc #{op}", op = const SvcOp::Yield as u32);
    }
}

pub(crate) fn svc_wait(
    condition: *const ConditionVariable,
    timeout_millis: i32,
    mutex: *const PriorityMutex,
) -> u32 {
    let result: u32;
    unsafe {
        asm!(
            "svc #{op}",
            op = const SvcOp::Wait as u32,
            inlateout("r0") condition as u32 => result,
            in("r1") timeout_millis,
            in("r2") mutex,
        );
    }
    result
}

// ============ Exception handlers ============

const KERNEL_MASK: u32 = KERNEL_PRIORITY.masked() as u32;

#[no_mangle]
extern "C" fn SysTick() {
    sched::tick_handler();
}

extern "C" fn svc_entry(frame: *mut ExceptionFrame, number: u32, is_thread: u32) {
    // SAFETY: called from the SVC handler with the stacked frame.
    unsafe { sched::svc::dispatch(frame, number as u8, is_thread != 0) };
}

extern "C" fn pendsv_switch(psp: *mut StackItem) -> u64 {
    sched::context_switch(psp)
}

/// Service-call handler: locates the stacked frame, extracts the opcode
/// from the `svc` instruction immediate and whether the caller was in
/// thread mode, then dispatches.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn SVCall() {
    naked_asm!(
        "tst lr, #4",
        "ite eq",
        "mrseq r0, msp",
        "mrsne r0, psp",
        "tst lr, #8",
        "ite eq",
        "moveq r2, #0",
        "movne r2, #1",
        "ldr r1, [r0, #24]",
        "ldrb r1, [r1, #-2]",
        "push {{lr}}",
        "bl {dispatch}",
        "dsb",
        "isb",
        "pop {{lr}}",
        "bx lr",
        dispatch = sym svc_entry,
    );
}

/// Pending-switch handler.
///
/// Masks the kernel, stacks the outgoing software context (plus the FP bank
/// when EXC_RETURN says one is live), asks the scheduler for the next stack
/// pointer, then unstacks the incoming context. The scheduler's 64-bit
/// result carries the stack pointer in the low half and the BASEPRI value
/// to apply on exit in the high half, so a re-acquired mutex mask lands
/// atomically with the restore.
#[no_mangle]
#[unsafe(naked)]
pub unsafe extern "C" fn PendSV() {
    naked_asm!(
        "mov r1, #{mask}",
        "msr BASEPRI, r1",
        "isb",
        "mrs r0, psp",
        "tst lr, #16",
        "it eq",
        "vstmdbeq r0!, {{s16-s31}}",
        "mov r2, lr",
        "mrs r3, control",
        "stmdb r0!, {{r2-r11}}",
        "bl {switch}",
        "ldmia r0!, {{r2-r11}}",
        "mov lr, r2",
        "msr control, r3",
        "isb",
        "tst lr, #16",
        "it eq",
        "vldmiaeq r0!, {{s16-s31}}",
        "msr psp, r0",
        "msr BASEPRI, r1",
        "isb",
        "bx lr",
        mask = const KERNEL_MASK,
        switch = sym pendsv_switch,
    );
}
