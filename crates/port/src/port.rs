//! The kernel primitive interface and its process-wide registration.

use spin::Once;

use crate::control::{EntryArg, StackUsage, ThreadAttr, ThreadEntry};
use crate::error::{KernelError, KernelResult};
use crate::types::{FlagsOptions, KernelState, MutexId, Priority, SemaphoreId, ThreadId, Timeout};

/// Primitive operations a preemptive kernel offers to the thread layer.
///
/// Implementations decide scheduling, context switching and priority
/// inheritance. Operations documented as "current unit" act on the caller.
/// Unless stated otherwise an operation is not callable from interrupt
/// context and reports [`KernelError::Isr`] there.
pub trait KernelPort: Sync {
    /// Creates a unit that runs `entry(arg)` and becomes ready immediately.
    ///
    /// # Safety
    ///
    /// The stack region and control block referenced by `attr` must stay
    /// valid and unmoved until [`thread_join`](Self::thread_join) returned
    /// for the new unit.
    unsafe fn thread_new(
        &self,
        entry: ThreadEntry,
        arg: EntryArg,
        attr: &ThreadAttr,
    ) -> KernelResult<ThreadId>;

    /// Stops a unit before its entry function returns.
    fn thread_terminate(&self, id: ThreadId) -> KernelResult<()>;

    /// Blocks until the unit has fully exited, then reclaims it and releases
    /// its control block. Succeeds once per unit.
    fn thread_join(&self, id: ThreadId) -> KernelResult<()>;

    /// Scheduler state; `Inactive` for unknown ids. Callable from interrupt
    /// context.
    fn thread_state(&self, id: ThreadId) -> KernelState;

    fn thread_priority(&self, id: ThreadId) -> KernelResult<Priority>;

    fn set_thread_priority(&self, id: ThreadId, priority: Priority) -> KernelResult<()>;

    /// Stack accounting, `None` for unknown ids or units without a stack
    /// region.
    fn thread_stack(&self, id: ThreadId) -> Option<StackUsage>;

    /// The unit executing the caller.
    fn current_thread(&self) -> Option<ThreadId>;

    /// Passes control to the next ready unit of the same priority.
    fn thread_yield(&self) -> KernelResult<()>;

    /// Suspends the current unit for `ms` milliseconds.
    fn delay(&self, ms: u32) -> KernelResult<()>;

    /// Sets thread flags of `id` and returns the flags after setting.
    /// Callable from interrupt context.
    fn flags_set(&self, id: ThreadId, flags: u32) -> KernelResult<u32>;

    /// Clears thread flags of the current unit, returning them as they were
    /// before clearing.
    fn flags_clear(&self, flags: u32) -> KernelResult<u32>;

    /// Waits until the current unit's flags satisfy `flags` under `options`.
    ///
    /// Returns the flags as they were before matched bits were cleared.
    /// A poll (`Timeout::NO_WAIT`) without a match fails with
    /// [`KernelError::Resource`]; an expired wait with [`KernelError::Timeout`].
    fn flags_wait(&self, flags: u32, options: FlagsOptions, timeout: Timeout) -> KernelResult<u32>;

    /// Whether the caller runs in interrupt context.
    fn in_isr(&self) -> bool;

    fn semaphore_new(&self, initial: u32, max: u32) -> KernelResult<SemaphoreId>;

    fn semaphore_acquire(&self, id: SemaphoreId, timeout: Timeout) -> KernelResult<()>;

    /// Adds a token; fails with [`KernelError::Resource`] at the maximum.
    /// Callable from interrupt context.
    fn semaphore_release(&self, id: SemaphoreId) -> KernelResult<()>;

    fn semaphore_count(&self, id: SemaphoreId) -> u32;

    fn semaphore_delete(&self, id: SemaphoreId) -> KernelResult<()>;

    fn mutex_new(&self) -> KernelResult<MutexId>;

    fn mutex_acquire(&self, id: MutexId, timeout: Timeout) -> KernelResult<()>;

    /// Releases a mutex held by the current unit.
    fn mutex_release(&self, id: MutexId) -> KernelResult<()>;

    fn mutex_owner(&self, id: MutexId) -> Option<ThreadId>;

    fn mutex_delete(&self, id: MutexId) -> KernelResult<()>;
}

static PORT: Once<&'static dyn KernelPort> = Once::new();

/// Installs the kernel used by this process.
///
/// Installing the same port again is accepted; a different port is rejected
/// with [`KernelError::Error`] because live handles belong to the first one.
pub fn install(port: &'static dyn KernelPort) -> KernelResult<()> {
    let installed = *PORT.call_once(|| port);
    let same = core::ptr::eq(
        installed as *const dyn KernelPort as *const (),
        port as *const dyn KernelPort as *const (),
    );
    if same {
        Ok(())
    } else {
        log::error!("a different kernel port is already installed");
        Err(KernelError::Error)
    }
}

/// The installed kernel.
pub fn get() -> KernelResult<&'static dyn KernelPort> {
    PORT.get().copied().ok_or(KernelError::Error)
}

/// Returns true once a kernel has been installed.
pub fn is_installed() -> bool {
    PORT.is_completed()
}
