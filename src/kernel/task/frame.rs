//! Saved register layouts and stack seeding
//!
//! The context switch stores registers on the process stack in two parts:
//! the [`ExceptionFrame`] the Cortex-M pushes on exception entry, and the
//! [`SavedContext`] the pending-switch handler pushes below it. When the
//! task was using the FPU, sixteen single-precision registers sit between
//! the two (EXC_RETURN bit 4 clear).
//!
//! The layouts are plain memory writes, shared by the Cortex-M port and
//! the host test build.

use crate::config::CFG_STACK_CANARY;

/// The type of one stack slot.
pub type StackItem = u32;

/// Registers the hardware stacks on exception entry, low address first.
#[repr(C)]
pub(crate) struct ExceptionFrame {
    pub r0: u32,
    pub r1: u32,
    pub r2: u32,
    pub r3: u32,
    pub r12: u32,
    pub lr: u32,
    pub pc: u32,
    pub psr: u32,
}

/// Registers the pending-switch handler stacks below the hardware frame.
#[repr(C)]
pub(crate) struct SavedContext {
    pub exc_return: u32,
    pub control: u32,
    pub r4: u32,
    pub r5: u32,
    pub r6: u32,
    pub r7: u32,
    pub r8: u32,
    pub r9: u32,
    pub r10: u32,
    pub r11: u32,
}

pub(crate) const FRAME_WORDS: usize = core::mem::size_of::<ExceptionFrame>() / 4;
pub(crate) const CONTEXT_WORDS: usize = core::mem::size_of::<SavedContext>() / 4;
/// S16..S31, present when the frame carries a floating point context.
pub(crate) const FP_CONTEXT_WORDS: usize = 16;

/// Minimum stack size: room for two frames and two contexts.
pub(crate) const MIN_STACK_WORDS: usize = 2 * (FRAME_WORDS + CONTEXT_WORDS);

/// EXC_RETURN for thread mode on the process stack, no FP context.
pub(crate) const EXC_RETURN_THREAD_PSP: u32 = 0xFFFF_FFFD;
/// EXC_RETURN bit that is clear when a floating point context was stacked.
pub(crate) const EXC_RETURN_STD_FRAME: u32 = 1 << 4;
/// CONTROL with SPSEL set: thread mode runs on the process stack.
pub(crate) const CONTROL_PSP: u32 = 0b10;
/// xPSR with only the Thumb bit, the reset state for a fresh task.
pub(crate) const PSR_THUMB: u32 = 1 << 24;

/// Seeds a fresh stack with an initial context so the first dispatch of the
/// task "returns" into `pc`.
///
/// The topmost word is zeroed to stop stack unwinding; in debug builds the
/// rest is filled with a canary pattern. Returns the initial saved stack
/// pointer.
///
/// # Safety
/// `base` must point to `size` writable stack items, with
/// `size >= FRAME_WORDS + CONTEXT_WORDS + 1`, and nothing may be using the
/// stack.
pub(crate) unsafe fn seed_stack(
    base: *mut StackItem,
    size: usize,
    pc: u32,
    r0: u32,
    exit_lr: u32,
) -> *mut StackItem {
    unsafe {
        if cfg!(debug_assertions) {
            for i in 0..size {
                base.add(i).write(CFG_STACK_CANARY);
            }
        }

        // Guard word: a zero return address ends any backtrace here.
        let top = base.add(size - 1);
        top.write(0);

        let frame = top.sub(FRAME_WORDS) as *mut ExceptionFrame;
        frame.write(ExceptionFrame {
            r0,
            r1: 0,
            r2: 0,
            r3: 0,
            r12: 0,
            lr: exit_lr | 1,
            pc: pc | 1,
            psr: PSR_THUMB,
        });

        let context = (frame as *mut StackItem).sub(CONTEXT_WORDS) as *mut SavedContext;
        context.write(SavedContext {
            exc_return: EXC_RETURN_THREAD_PSP,
            control: CONTROL_PSP,
            r4: 0,
            r5: 0,
            r6: 0,
            r7: 0,
            r8: 0,
            r9: 0,
            r10: 0,
            r11: 0,
        });

        context as *mut StackItem
    }
}

/// Locates the hardware frame above the saved context at `sp`, skipping the
/// floating point bank when EXC_RETURN says one was stacked.
///
/// # Safety
/// `sp` must be a stack pointer previously produced by [`seed_stack`] or by
/// the pending-switch handler.
pub(crate) unsafe fn saved_frame(sp: *mut StackItem) -> *mut ExceptionFrame {
    unsafe {
        let context = sp as *const SavedContext;
        let skip = if (*context).exc_return & EXC_RETURN_STD_FRAME == 0 {
            CONTEXT_WORDS + FP_CONTEXT_WORDS
        } else {
            CONTEXT_WORDS
        };
        sp.add(skip) as *mut ExceptionFrame
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn layout_word_counts() {
        assert_eq!(FRAME_WORDS, 8);
        assert_eq!(CONTEXT_WORDS, 10);
        assert_eq!(MIN_STACK_WORDS, 36);
    }

    #[test]
    fn seeded_stack_shape() {
        let mut stack = [0u32; 64];
        let base = stack.as_mut_ptr();
        let sp = unsafe { seed_stack(base, 64, 0x0800_1234, 0xAABB_CCDD, 0x0800_4321) };

        // context + frame + guard below the top
        let expected = unsafe { base.add(64 - 1 - FRAME_WORDS - CONTEXT_WORDS) };
        assert_eq!(sp as usize, expected as usize);
        assert_eq!(stack[63], 0, "guard word");

        let frame = unsafe { &*saved_frame(sp) };
        assert_eq!(frame.r0, 0xAABB_CCDD);
        assert_eq!(frame.pc, 0x0800_1234 | 1, "thumb bit forced");
        assert_eq!(frame.lr, 0x0800_4321);
        assert_eq!(frame.psr, PSR_THUMB);

        let context = unsafe { &*(sp as *const SavedContext) };
        assert_eq!(context.exc_return, EXC_RETURN_THREAD_PSP);
        assert_eq!(context.control, CONTROL_PSP);
    }

    #[test]
    #[cfg(debug_assertions)]
    fn debug_fill_covers_free_space() {
        let mut stack = [0u32; 48];
        unsafe { seed_stack(stack.as_mut_ptr(), 48, 0, 0, 0) };
        assert_eq!(stack[0], CFG_STACK_CANARY);
        assert_eq!(stack[48 - 2 - FRAME_WORDS - CONTEXT_WORDS], CFG_STACK_CANARY);
    }
}
