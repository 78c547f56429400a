//! Host-run tests over the public API
//!
//! Scheduler behavior is covered by the in-crate scenario tests; these
//! exercise the public surface: time arithmetic, priority encodings, the
//! inline callback container and the configuration invariants.

#[cfg(test)]
mod time_tests {
    use kairos::{Duration, Instant, WaitStatus};

    #[test]
    fn durations_are_signed_milliseconds() {
        assert_eq!(Duration::from_secs(2).as_millis(), 2000);
        assert_eq!(Duration::from_millis(-5).as_millis(), -5);
        assert!(Duration::from_millis(-5).is_negative());
        assert_eq!(
            Duration::from_millis(30) + Duration::from_millis(12),
            Duration::from_millis(42)
        );
    }

    #[test]
    fn instants_are_absolute() {
        let deadline = Instant::STARTUP + Duration::from_millis(100);
        assert_eq!(deadline.as_millis(), 100);
        assert_eq!(deadline - Instant::STARTUP, Duration::from_millis(100));
        assert!(Instant::STARTUP < deadline);
    }

    #[test]
    fn wait_status_is_two_valued() {
        assert_eq!(WaitStatus::Notified as u32, 0);
        assert_eq!(WaitStatus::TimedOut as u32, 1);
        assert_ne!(WaitStatus::Notified, WaitStatus::TimedOut);
    }
}

#[cfg(test)]
mod priority_tests {
    use kairos::{IsrPriority, Priority};

    #[test]
    fn lower_value_is_more_important() {
        assert!(Priority::HIGHEST < Priority::LOWEST);
        assert!(Priority::new(10) < Priority::new(20));
    }

    #[test]
    fn named_levels_are_ordered() {
        let mut levels = [
            Priority::LOW,
            Priority::HIGHEST,
            Priority::NORMAL,
            Priority::LOWEST,
            Priority::HIGH,
        ];
        levels.sort();
        assert_eq!(
            levels,
            [
                Priority::HIGHEST,
                Priority::HIGH,
                Priority::NORMAL,
                Priority::LOW,
                Priority::LOWEST,
            ]
        );
    }

    #[test]
    fn isr_priority_packs_into_the_top_bits() {
        let p = IsrPriority::from_preempt_sub(1, 0);
        assert_eq!(p.preempt(), 1);
        assert_eq!(p.masked() & 0x0F, 0, "only implemented bits survive");
        assert!(IsrPriority::new(0).masked() < IsrPriority::LOWEST.masked());
    }
}

#[cfg(test)]
mod callback_tests {
    use core::sync::atomic::{AtomicI32, Ordering};
    use kairos::Callback;

    #[test]
    fn callback_runs_captured_closure() {
        static RESULT: AtomicI32 = AtomicI32::new(0);

        let offset = 40;
        let mut callback = Callback::new(move || {
            RESULT.store(offset + 2, Ordering::Relaxed);
        });
        assert!(callback.is_armed());
        // a Callback in a Task runs on first dispatch; invoking is
        // crate-internal, so armed-ness is all that is observable here
        let _ = &mut callback;
    }

    #[test]
    fn empty_callback_is_unarmed() {
        assert!(!Callback::empty().is_armed());
    }
}

#[cfg(test)]
mod config_tests {
    use kairos::config::*;

    #[test]
    fn tick_divides_core_clock() {
        assert_eq!(CFG_CORE_CLOCK_HZ % CFG_TICK_RATE_HZ, 0);
        assert_eq!(CFG_TICK_RATE_HZ, 1000, "kernel time unit is 1 ms");
    }

    #[test]
    fn priority_layout_is_consistent() {
        assert!(CFG_PRIORITY_BITS <= 8);
        assert!(CFG_PREEMPTION_BITS <= CFG_PRIORITY_BITS);
        assert!((CFG_KERNEL_PREEMPTION as u32) < (1 << CFG_PREEMPTION_BITS));
    }
}

#[cfg(test)]
mod task_tests {
    use kairos::{Priority, Task, Tcb};

    #[test]
    fn fresh_task_is_not_started() {
        let task: Task<64> = Task::new();
        assert!(!task.is_started());
        assert!(task.name().is_none());
        assert_eq!(task.priority(), Priority::LOWEST);
    }

    #[test]
    fn fresh_tcb_defaults() {
        let tcb = Tcb::new();
        assert!(!tcb.is_started());
        assert_eq!(tcb.priority(), Priority::LOWEST);
    }
}
