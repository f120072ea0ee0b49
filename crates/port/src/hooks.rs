//! Process-wide kernel hooks.
//!
//! There is exactly one slot per hook. Registering a hook replaces whatever
//! was registered before; nothing is ever unregistered or torn down, so the
//! hooks live for the rest of the process. A program that needs several
//! consumers registers one function that calls them in turn.

use core::cell::Cell;

use critical_section::Mutex;

use crate::types::ThreadId;

static IDLE_HOOK: Mutex<Cell<Option<fn()>>> = Mutex::new(Cell::new(None));
static TERMINATE_HOOK: Mutex<Cell<Option<fn(ThreadId)>>> = Mutex::new(Cell::new(None));

/// Installs the function the kernel calls from its idle loop.
pub fn set_idle_hook(hook: fn()) {
    critical_section::with(|cs| IDLE_HOOK.borrow(cs).set(Some(hook)));
}

/// Installs the function the kernel calls when a unit is terminated or
/// exits.
pub fn set_terminate_hook(hook: fn(ThreadId)) {
    critical_section::with(|cs| TERMINATE_HOOK.borrow(cs).set(Some(hook)));
}

/// Runs the idle hook, if any. Called by kernel ports.
pub fn run_idle() {
    // The hook runs outside the critical section.
    if let Some(hook) = critical_section::with(|cs| IDLE_HOOK.borrow(cs).get()) {
        hook();
    }
}

/// Runs the terminate hook for `id`, if any. Called by kernel ports.
pub fn run_terminate(id: ThreadId) {
    if let Some(hook) = critical_section::with(|cs| TERMINATE_HOOK.borrow(cs).get()) {
        hook(id);
    }
}
