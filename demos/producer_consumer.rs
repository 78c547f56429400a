//! Producer/consumer over a condition variable
//!
//! The producer deposits an item five times a second; the consumer holds
//! the mutex, waits on the condition variable (which releases the mutex
//! atomically) and drains whatever is there when notified.

#![no_std]
#![no_main]
#![allow(static_mut_refs)]

use core::sync::atomic::{AtomicU32, Ordering};

use cortex_m_rt::entry;
use defmt::info;
use kairos::pac as _;
use kairos::{sleep_for, ConditionVariable, Duration, IdleTask, Priority, PriorityMutex, Task};

static DEPTH: AtomicU32 = AtomicU32::new(0);
static NOT_EMPTY: ConditionVariable = ConditionVariable::new();
static LOCK: PriorityMutex = PriorityMutex::task_only();

static mut PRODUCER: Task<256> = Task::new();
static mut CONSUMER: Task<256> = Task::new();
static mut IDLE: IdleTask = IdleTask::new();

#[entry]
fn main() -> ! {
    info!("producer-consumer demo");

    unsafe {
        PRODUCER.start(Priority::NORMAL, "producer", || loop {
            DEPTH.fetch_add(1, Ordering::Relaxed);
            NOT_EMPTY.notify_one();
            sleep_for(Duration::from_millis(200));
        });

        CONSUMER.start(Priority::HIGH, "consumer", || loop {
            LOCK.lock();
            while DEPTH.load(Ordering::Relaxed) == 0 {
                NOT_EMPTY.wait_with(&LOCK);
            }
            let taken = DEPTH.swap(0, Ordering::Relaxed);
            LOCK.unlock();
            info!("consumed {=u32} item(s)", taken);
        });

        kairos::start(&mut IDLE);
    }

    loop {
        cortex_m::asm::wfi();
    }
}
