//! Inline closure storage
//!
//! A [`Callback`] owns a closure in a fixed-size inline buffer with a
//! type-erased invoker, so task entry points can capture state without any
//! heap. The buffer size is checked against the closure at compile time.

use core::mem::{align_of, size_of, MaybeUninit};

use crate::config::CFG_CALLBACK_WORDS;

/// An owned, inline-stored `FnOnce()` closure.
///
/// Invoking consumes the closure; a callback that is dropped while still
/// armed leaks its captures (no destructor runs), which is acceptable for
/// the task entry use case where the captures are `'static`.
pub struct Callback {
    storage: [MaybeUninit<usize>; CFG_CALLBACK_WORDS],
    invoke: Option<unsafe fn(*mut ())>,
}

impl Callback {
    /// Creates an empty callback that does nothing when invoked.
    pub const fn empty() -> Self {
        Callback {
            storage: [MaybeUninit::uninit(); CFG_CALLBACK_WORDS],
            invoke: None,
        }
    }

    /// Creates a callback from a closure, moving the captures into the
    /// inline buffer.
    pub fn new<F>(function: F) -> Self
    where
        F: FnOnce() + Send + 'static,
    {
        const {
            assert!(
                size_of::<F>() <= CFG_CALLBACK_WORDS * size_of::<usize>(),
                "closure captures exceed the inline callback storage"
            );
            assert!(
                align_of::<F>() <= align_of::<usize>(),
                "closure alignment exceeds word alignment"
            );
        }

        let mut callback = Callback::empty();
        // SAFETY: the const asserts above guarantee fit and alignment.
        unsafe { (callback.storage.as_mut_ptr() as *mut F).write(function) };
        callback.invoke = Some(invoke_erased::<F>);
        callback
    }

    /// Whether a closure is stored and not yet invoked.
    pub fn is_armed(&self) -> bool {
        self.invoke.is_some()
    }

    /// Runs and consumes the stored closure, if any.
    pub(crate) fn invoke(&mut self) {
        if let Some(invoke) = self.invoke.take() {
            // SAFETY: `invoke` was set together with a live `F` in `storage`
            // and is cleared above, so the closure is read out exactly once.
            unsafe { invoke(self.storage.as_mut_ptr() as *mut ()) };
        }
    }
}

unsafe fn invoke_erased<F: FnOnce()>(storage: *mut ()) {
    // SAFETY: caller passes the storage a live `F` was written to.
    (unsafe { (storage as *mut F).read() })()
}

// SAFETY: `new` requires `F: Send`, so the captures may move to the task.
unsafe impl Send for Callback {}

#[cfg(test)]
mod tests {
    use super::*;
    use core::sync::atomic::{AtomicU32, Ordering};

    #[test]
    fn empty_callback_is_inert() {
        let mut cb = Callback::empty();
        assert!(!cb.is_armed());
        cb.invoke();
        cb.invoke();
    }

    #[test]
    fn invokes_exactly_once() {
        static COUNTER: AtomicU32 = AtomicU32::new(0);

        let mut cb = Callback::new(|| {
            COUNTER.fetch_add(1, Ordering::Relaxed);
        });
        assert!(cb.is_armed());

        cb.invoke();
        assert_eq!(COUNTER.load(Ordering::Relaxed), 1);
        assert!(!cb.is_armed());

        cb.invoke();
        assert_eq!(COUNTER.load(Ordering::Relaxed), 1);
    }

    #[test]
    fn captures_move_into_storage() {
        static SUM: AtomicU32 = AtomicU32::new(0);

        let values = [1u32, 2, 3, 4];
        let mut cb = Callback::new(move || {
            SUM.store(values.iter().sum(), Ordering::Relaxed);
        });
        cb.invoke();
        assert_eq!(SUM.load(Ordering::Relaxed), 10);
    }

    #[test]
    fn full_width_capture_fits() {
        static OUT: AtomicU32 = AtomicU32::new(0);

        let words = [7usize; CFG_CALLBACK_WORDS];
        let mut cb = Callback::new(move || {
            OUT.store(words[CFG_CALLBACK_WORDS - 1] as u32, Ordering::Relaxed);
        });
        cb.invoke();
        assert_eq!(OUT.load(Ordering::Relaxed), 7);
    }
}
