//! Synchronization primitives

pub mod condvar;
pub mod mutex;

pub use condvar::ConditionVariable;
pub use mutex::PriorityMutex;
