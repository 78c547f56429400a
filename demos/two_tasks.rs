//! Two tasks at different priorities
//!
//! The low task counts in a busy loop; the high one sleeps 100 ms at a
//! time and preempts it on every wakeup to report the count.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use kairos::pac as _;
use kairos::{sleep_for, Duration, IdleTask, Priority, Task};

static COUNTER: AtomicU32 = AtomicU32::new(0);

static mut HIGH: Task<256> = Task::new();
static mut LOW: Task<256> = Task::new();
static mut IDLE: IdleTask = IdleTask::new();

#[entry]
fn main() -> ! {
    info!("two-tasks demo");

    unsafe {
        HIGH.start(Priority::HIGH, "high", || loop {
            sleep_for(Duration::from_millis(100));
            info!("low counted to {=u32}", COUNTER.load(Ordering::Relaxed));
        });
        LOW.start(Priority::LOW, "low", || loop {
            COUNTER.fetch_add(1, Ordering::Relaxed);
        });

        kairos::start(&mut IDLE);
    }

    loop {
        cortex_m::asm::wfi();
    }
}
