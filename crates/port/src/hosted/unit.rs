//! Kernel units of the hosted kernel and the per-OS-thread bookkeeping.

use std::cell::{Cell, RefCell};
use std::ptr::NonNull;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::{Duration, Instant};

use parking_lot::{Condvar, Mutex};

use crate::control::{ControlBlock, StackRegion, StackUsage};
use crate::types::{KernelState, Priority, ThreadId};

/// Unwind payload used to stop a terminated unit at its next kernel call.
pub(crate) struct Terminated;

struct ControlBlockRef(NonNull<ControlBlock>);

// SAFETY: the control block only holds atomics and the owner keeps it alive
// until the unit has been reclaimed.
unsafe impl Send for ControlBlockRef {}
unsafe impl Sync for ControlBlockRef {}

pub(crate) struct Unit {
    pub(crate) id: ThreadId,
    pub(crate) name: Option<&'static str>,
    /// True for OS threads that were not created by the kernel.
    pub(crate) adopted: bool,
    priority: AtomicU8,
    state: AtomicU8,
    control_block: Option<ControlBlockRef>,
    stack: Option<(StackRegion, usize)>,
    pub(crate) flags: Mutex<u32>,
    pub(crate) flags_changed: Condvar,
    terminated: AtomicBool,
    hook_ran: AtomicBool,
    exited: Mutex<bool>,
    exit_signal: Condvar,
    pub(crate) handle: Mutex<Option<JoinHandle<()>>>,
}

impl Unit {
    pub(crate) fn created(
        id: ThreadId,
        name: Option<&'static str>,
        priority: Priority,
        control_block: NonNull<ControlBlock>,
        stack: StackRegion,
        frame: usize,
    ) -> Self {
        Self {
            adopted: false,
            control_block: Some(ControlBlockRef(control_block)),
            stack: Some((stack, frame)),
            ..Self::adopted(id, name, priority)
        }
    }

    pub(crate) fn adopted(id: ThreadId, name: Option<&'static str>, priority: Priority) -> Self {
        Self {
            id,
            name,
            adopted: true,
            priority: AtomicU8::new(priority.raw()),
            state: AtomicU8::new(KernelState::Running.to_raw()),
            control_block: None,
            stack: None,
            flags: Mutex::new(0),
            flags_changed: Condvar::new(),
            terminated: AtomicBool::new(false),
            hook_ran: AtomicBool::new(false),
            exited: Mutex::new(false),
            exit_signal: Condvar::new(),
            handle: Mutex::new(None),
        }
    }

    fn control_block(&self) -> Option<&ControlBlock> {
        // SAFETY: valid until `release_control_block`, which only runs after
        // the unit was removed from the kernel tables.
        self.control_block.as_ref().map(|cb| unsafe { cb.0.as_ref() })
    }

    /// Publishes a new scheduler state. A terminated unit stays terminated.
    pub(crate) fn publish(&self, state: KernelState) {
        if self.is_terminated() && state != KernelState::Terminated {
            return;
        }
        self.state.store(state.to_raw(), Ordering::Release);
        if let Some(cb) = self.control_block() {
            cb.set_state(state);
        }
    }

    pub(crate) fn state(&self) -> KernelState {
        match self.control_block() {
            Some(cb) => cb.state(),
            None => KernelState::from_raw(self.state.load(Ordering::Acquire)),
        }
    }

    pub(crate) fn release_control_block(&self) {
        if let Some(cb) = self.control_block() {
            cb.release();
        }
    }

    pub(crate) fn priority(&self) -> Priority {
        Priority::from_raw(self.priority.load(Ordering::Acquire)).unwrap_or_default()
    }

    pub(crate) fn set_priority(&self, priority: Priority) {
        self.priority.store(priority.raw(), Ordering::Release);
    }

    pub(crate) fn stack_usage(&self) -> Option<StackUsage> {
        self.stack.map(|(region, frame)| StackUsage {
            size: region.len(),
            current_free: region.len() - frame,
            // SAFETY: the owner keeps the region alive until reclaim.
            min_free: unsafe { region.watermark_free() },
        })
    }

    /// Marks the unit terminated. Returns false if it already was.
    pub(crate) fn mark_terminated(&self) -> bool {
        if self.terminated.swap(true, Ordering::AcqRel) {
            return false;
        }
        self.publish(KernelState::Terminated);
        // Wake a victim parked on its own flags so it reaches a checkpoint.
        self.flags_changed.notify_all();
        true
    }

    pub(crate) fn is_terminated(&self) -> bool {
        self.terminated.load(Ordering::Acquire)
    }

    /// Returns true exactly once, for whoever reports the unit's end to the
    /// terminate hook.
    pub(crate) fn claim_terminate_hook(&self) -> bool {
        !self.hook_ran.swap(true, Ordering::AcqRel)
    }

    pub(crate) fn mark_exited(&self) {
        let mut exited = self.exited.lock();
        *exited = true;
        self.exit_signal.notify_all();
    }

    pub(crate) fn has_exited(&self) -> bool {
        *self.exited.lock()
    }

    /// Waits up to `slice` for the unit to exit.
    pub(crate) fn wait_exit(&self, slice: Duration) -> bool {
        let mut exited = self.exited.lock();
        if !*exited {
            self.exit_signal.wait_for(&mut exited, slice);
        }
        *exited
    }

    /// Unwinds the calling unit if it has been terminated.
    pub(crate) fn checkpoint(&self) {
        if self.is_terminated() && !self.adopted {
            std::panic::resume_unwind(Box::new(Terminated));
        }
    }
}

/// Deadline tracking for blocking calls that wake up periodically.
pub(crate) struct Deadline(Option<Instant>);

impl Deadline {
    pub(crate) fn after(timeout: Option<Duration>) -> Self {
        Self(timeout.map(|t| Instant::now() + t))
    }

    /// Time to sleep before the next check, or `None` once expired.
    pub(crate) fn next_slice(&self, poll: Duration) -> Option<Duration> {
        match self.0 {
            None => Some(poll),
            Some(at) => {
                let now = Instant::now();
                (now < at).then(|| (at - now).min(poll))
            }
        }
    }
}

struct Current {
    kernel: usize,
    unit: Arc<Unit>,
    /// Runs when the binding is replaced or the OS thread exits.
    on_unbind: Option<Box<dyn FnOnce()>>,
}

impl Drop for Current {
    fn drop(&mut self) {
        if let Some(on_unbind) = self.on_unbind.take() {
            on_unbind();
        }
    }
}

thread_local! {
    static CURRENT: RefCell<Option<Current>> = const { RefCell::new(None) };
    static IN_ISR: Cell<bool> = const { Cell::new(false) };
}

/// The unit bound to this OS thread for the kernel identified by `kernel`.
pub(crate) fn current(kernel: usize) -> Option<Arc<Unit>> {
    CURRENT.with(|cur| {
        cur.borrow()
            .as_ref()
            .filter(|c| c.kernel == kernel)
            .map(|c| Arc::clone(&c.unit))
    })
}

pub(crate) fn bind_current(kernel: usize, unit: Arc<Unit>) {
    set_current(Current {
        kernel,
        unit,
        on_unbind: None,
    });
}

/// Binds an adopted OS thread; `on_unbind` runs once the thread exits or is
/// bound elsewhere.
pub(crate) fn bind_adopted(kernel: usize, unit: Arc<Unit>, on_unbind: impl FnOnce() + 'static) {
    set_current(Current {
        kernel,
        unit,
        on_unbind: Some(Box::new(on_unbind)),
    });
}

fn set_current(current: Current) {
    let previous = CURRENT.with(|cur| cur.borrow_mut().replace(current));
    drop(previous);
}

pub(crate) fn unbind_current() {
    let previous = CURRENT.with(|cur| cur.borrow_mut().take());
    drop(previous);
}

pub(crate) fn in_isr() -> bool {
    IN_ISR.with(Cell::get)
}

/// Restores the interrupt flag when dropped, also during unwinding.
pub(crate) struct IsrScope {
    previous: bool,
}

impl IsrScope {
    pub(crate) fn enter() -> Self {
        Self {
            previous: IN_ISR.with(|flag| flag.replace(true)),
        }
    }
}

impl Drop for IsrScope {
    fn drop(&mut self) {
        IN_ISR.with(|flag| flag.set(self.previous));
    }
}
