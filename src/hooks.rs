//! Observation hooks
//!
//! One inline function per kernel event, empty apart from a trace line.
//! The hooks cost nothing when tracing is off and give one central place
//! to attach instrumentation without touching kernel code.

use crate::prio::IsrPriority;
use crate::task::Tcb;

#[inline(always)]
#[allow(dead_code)]
fn name_of(task: &Tcb) -> &'static str {
    task.name().unwrap_or("?")
}

#[inline(always)]
pub(crate) fn starting() {
    crate::info!("scheduler starting");
}

#[inline(always)]
pub(crate) fn enter_systick() {}

#[inline(always)]
pub(crate) fn exit_systick(switched: bool) {
    let _ = switched;
}

#[inline(always)]
pub(crate) fn enter_service_call() {}

#[inline(always)]
pub(crate) fn exit_service_call(switched: bool) {
    let _ = switched;
}

#[inline(always)]
pub(crate) fn enter_pendsv() {}

#[inline(always)]
pub(crate) fn enter_idle() {
    crate::trace!("idle");
}

#[inline(always)]
pub(crate) fn task_added(task: &Tcb) {
    crate::debug!("task added: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_started(task: &Tcb) {
    crate::trace!("dispatch: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_stopped(task: &Tcb) {
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_terminated(task: &Tcb) {
    crate::debug!("task terminated: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_sleep(task: &Tcb) {
    crate::trace!("sleep: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_wait(task: &Tcb) {
    crate::trace!("wait: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_ready(task: &Tcb) {
    crate::trace!("ready: {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn task_priority_changed(task: &Tcb) {
    crate::debug!(
        "priority of {=str} now {=u8}",
        name_of(task),
        task.priority().value()
    );
    let _ = task;
}

#[inline(always)]
pub(crate) fn enter_critical_section() {}

#[inline(always)]
pub(crate) fn exit_critical_section() {}

#[inline(always)]
pub(crate) fn mutex_stored(task: &Tcb) {
    crate::trace!("mutex parked for {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn mutex_restored(task: &Tcb) {
    crate::trace!("mutex restored for {=str}", name_of(task));
    let _ = task;
}

#[inline(always)]
pub(crate) fn enter_full_lock() {}

#[inline(always)]
pub(crate) fn exit_full_lock() {}

#[inline(always)]
pub(crate) fn enter_priority_lock(priority: IsrPriority) {
    let _ = priority;
}

#[inline(always)]
pub(crate) fn exit_priority_lock() {}

#[inline(always)]
pub(crate) fn cv_notify_one() {}

#[inline(always)]
pub(crate) fn cv_notify_all() {}
