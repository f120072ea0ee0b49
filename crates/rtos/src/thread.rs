//! Thread lifecycle, signaling and join.
//!
//! A [`Thread`] is constructed without any kernel resources. [`Thread::start`]
//! obtains a stack, creates the kernel unit and hands it the bound [`Task`].
//! From then on other threads may signal, inspect, terminate or join it.
//!
//! # Join protocol
//!
//! Per-thread bookkeeping (whether the unit was reclaimed, the owned stack)
//! is guarded by a kernel mutex; the `finished` flag is only written while it
//! is held. Completion is announced on a binary semaphore:
//!
//! 1. The entry trampoline runs the task, marks the thread finished under the
//!    lock, unlocks and then releases the semaphore. The release also happens
//!    when the task unwinds.
//! 2. A joiner locks and checks `finished`. If set it reclaims right away;
//!    otherwise it unlocks, waits on the semaphore, then locks again and
//!    reclaims. It never waits on the semaphore with the lock held.
//! 3. Reclaiming joins the kernel unit (so it has fully exited) and then drops
//!    the owned stack. Both steps happen at most once, whoever gets there
//!    first, because their flags are checked and cleared under the lock.
//!
//! After waking, a joiner releases the semaphore again so other joiners
//! blocked on the same thread wake up too.

use alloc::boxed::Box;
use core::fmt;
use core::ptr::NonNull;
use core::sync::atomic::{AtomicBool, Ordering};

use rtos_port::{
    hooks, ControlBlock, EntryArg, FlagsOptions, KernelError, KernelPort, KernelState, Priority,
    StackUsage, ThreadAttr, ThreadId, Timeout, WaitReason, FLAGS_ANY,
};

use crate::config::ThreadConfig;
use crate::error::{ThreadError, ThreadResult};
use crate::primitives::{Mutex, Semaphore};
use crate::stack::{self, OwnedStack};
use crate::task::Task;

/// Lifecycle state of a thread as seen by its owner.
///
/// The `Waiting*` states are sub-states of running, reported for
/// diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ThreadState {
    /// Not started; no kernel unit exists.
    Inactive,
    /// Ready to run, waiting for the processor.
    Ready,
    /// Currently executing.
    Running,
    /// Sleeping in [`Thread::wait`].
    WaitingDelay,
    /// Blocked joining another thread.
    WaitingJoin,
    /// Blocked in [`Thread::signal_wait`].
    WaitingThreadFlag,
    /// Blocked on an event flag group.
    WaitingEventFlag,
    /// Blocked acquiring a mutex.
    WaitingMutex,
    /// Blocked acquiring a semaphore.
    WaitingSemaphore,
    /// Blocked on a memory pool allocation.
    WaitingMemoryPool,
    /// Blocked receiving from a message queue.
    WaitingMessageGet,
    /// Blocked sending to a full message queue.
    WaitingMessagePut,
    /// The task returned or was terminated.
    Deleted,
}

impl From<KernelState> for ThreadState {
    fn from(state: KernelState) -> Self {
        match state {
            KernelState::Ready => Self::Ready,
            KernelState::Running => Self::Running,
            KernelState::Blocked(reason) => match reason {
                WaitReason::Delay => Self::WaitingDelay,
                WaitReason::Join => Self::WaitingJoin,
                WaitReason::ThreadFlags => Self::WaitingThreadFlag,
                WaitReason::EventFlags => Self::WaitingEventFlag,
                WaitReason::Mutex => Self::WaitingMutex,
                WaitReason::Semaphore => Self::WaitingSemaphore,
                WaitReason::MemoryPool => Self::WaitingMemoryPool,
                WaitReason::MessageGet => Self::WaitingMessageGet,
                WaitReason::MessagePut => Self::WaitingMessagePut,
            },
            KernelState::Inactive | KernelState::Terminated => Self::Deleted,
        }
    }
}

/// Outcome of [`Thread::signal_wait`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SignalEvent {
    /// The wait was satisfied; the thread's flags before the matched bits
    /// were cleared.
    Signaled(u32),
    /// A zero-timeout poll found no matching flags.
    Empty,
}

struct Bookkeeping {
    reaped: bool,
    stack: Option<OwnedStack>,
}

/// State shared between the owner and the running unit. Boxed so the
/// control block keeps its address for the unit's lifetime.
struct Inner {
    port: &'static dyn KernelPort,
    lock: Mutex<Bookkeeping>,
    join_sem: Semaphore,
    /// Only written with `lock` held.
    finished: AtomicBool,
    control_block: ControlBlock,
    task: spin::Mutex<Option<Task>>,
}

impl Inner {
    /// Joins the kernel unit and frees the owned stack, each at most once.
    fn reap_locked(&self, book: &mut Bookkeeping, tid: ThreadId) -> ThreadResult<()> {
        if !book.reaped {
            self.port.thread_join(tid)?;
            book.reaped = true;
            log::trace!("reclaimed {tid:?}");
        }
        drop(book.stack.take());
        Ok(())
    }

    fn announce_finished(&self) {
        // Already at its single token when someone else announced first.
        let _ = self.join_sem.release();
    }
}

/// Releases the join semaphore when the entry trampoline ends, also when the
/// task unwinds.
struct Completion<'a>(&'a Inner);

impl Drop for Completion<'_> {
    fn drop(&mut self) {
        self.0.announce_finished();
    }
}

fn trampoline(arg: EntryArg) {
    // SAFETY: `arg` is the boxed `Inner` of the thread that created this
    // unit. It is only freed after the unit has been joined.
    let inner = unsafe { &*arg.as_ptr().cast::<Inner>() };
    let _completion = Completion(inner);

    let task = inner.task.lock().take();
    if let Some(task) = task {
        task.run();
    }

    match inner.lock.lock() {
        Ok(_book) => inner.finished.store(true, Ordering::Release),
        Err(err) => log::error!("could not record thread completion: {err}"),
    }
}

/// A kernel thread owned by this handle.
///
/// The handle is neither `Clone` nor `Copy`: the kernel unit's lifetime is
/// bound to it. Dropping a running thread terminates it and waits until the
/// unit has exited. With a kernel that stops units cooperatively this blocks
/// for as long as the task does not call into the kernel.
///
/// # Example
///
/// ```ignore
/// let mut worker = Thread::new(ThreadConfig::builder().name("worker").build());
/// worker.start(Task::from_closure(|| log::info!("hello")))?;
/// worker.join()?;
/// ```
pub struct Thread {
    config: ThreadConfig,
    tid: Option<ThreadId>,
    inner: Option<Box<Inner>>,
}

impl Thread {
    /// Creates a thread that does not run yet. No kernel resources are
    /// allocated until [`start`](Self::start).
    pub fn new(config: ThreadConfig) -> Self {
        Self {
            config,
            tid: None,
            inner: None,
        }
    }

    /// Constructs and starts a thread in one step.
    pub fn spawn(config: ThreadConfig, task: Task) -> ThreadResult<Self> {
        let mut thread = Self::new(config);
        thread.start(task)?;
        Ok(thread)
    }

    /// Starts running `task` on a new kernel unit.
    ///
    /// Fails with [`ThreadError::AlreadyStarted`] on a second call, leaving
    /// the running unit untouched. Any other failure leaves the thread
    /// unstarted with all memory it obtained released.
    pub fn start(&mut self, task: Task) -> ThreadResult<()> {
        if self.inner.is_some() {
            log::warn!("{:?} started twice", self.tid);
            return Err(ThreadError::AlreadyStarted);
        }
        let port = rtos_port::get()?;

        let (region, owned) = match self.config.stack_mem.as_deref_mut() {
            Some(buf) => (stack::align_buffer(buf)?, None),
            None => {
                let owned = OwnedStack::allocate(self.config.allocator, self.config.stack_size)?;
                (owned.region(), Some(owned))
            }
        };

        let inner = Box::new(Inner {
            port,
            lock: Mutex::new(Bookkeeping {
                reaped: false,
                stack: owned,
            })?,
            join_sem: Semaphore::binary()?,
            finished: AtomicBool::new(false),
            control_block: ControlBlock::new(),
            task: spin::Mutex::new(Some(task)),
        });

        // SAFETY: nothing runs on the region yet.
        unsafe { region.fill_watermark() };
        let attr = ThreadAttr {
            name: self.config.name,
            priority: self.config.priority,
            stack: region,
            control_block: NonNull::from(&inner.control_block),
        };
        let arg = EntryArg::new(NonNull::from(&*inner).cast());

        // SAFETY: the region and control block live in memory this handle
        // keeps until `thread_join` for the unit has returned (see `Drop`).
        let created = unsafe { port.thread_new(trampoline, arg, &attr) };
        let tid = created.map_err(|err| {
            log::error!("kernel refused to create {:?}: {err}", self.config.name);
            match err {
                KernelError::Parameter => ThreadError::InvalidParameter,
                KernelError::Isr => ThreadError::InvalidState,
                other => ThreadError::KernelRejected(other),
            }
        })?;

        log::debug!(
            "started {tid:?} {:?} at {:?} with {} byte stack",
            self.config.name,
            self.config.priority,
            region.len()
        );
        self.tid = Some(tid);
        self.inner = Some(inner);
        Ok(())
    }

    fn started(&self) -> ThreadResult<(&Inner, ThreadId)> {
        match (self.inner.as_deref(), self.tid) {
            (Some(inner), Some(tid)) => Ok((inner, tid)),
            _ => Err(ThreadError::InvalidState),
        }
    }

    /// Waits until the task has returned or the thread was terminated, then
    /// releases the thread's stack.
    ///
    /// Fails with [`ThreadError::InvalidState`] if the thread was never
    /// started, when called from interrupt context, or from the thread
    /// itself.
    pub fn join(&self) -> ThreadResult<()> {
        let (inner, tid) = self.started()?;
        if inner.port.in_isr() || inner.port.current_thread() == Some(tid) {
            return Err(ThreadError::InvalidState);
        }

        {
            let mut book = inner.lock.lock()?;
            if inner.finished.load(Ordering::Acquire) {
                return inner.reap_locked(&mut book, tid);
            }
        }

        inner.join_sem.acquire(Timeout::Forever)?;

        let result = {
            let mut book = inner.lock.lock()?;
            inner.finished.store(true, Ordering::Release);
            inner.reap_locked(&mut book, tid)
        };
        inner.announce_finished();
        result
    }

    /// Stops the thread before its task returns.
    ///
    /// The victim gets no notification. Locks it holds are not released by
    /// this call, so do not terminate a thread holding a lock the program
    /// still needs.
    pub fn terminate(&self) -> ThreadResult<()> {
        let (inner, tid) = self.started()?;
        if inner.port.current_thread() == Some(tid) {
            return Err(ThreadError::InvalidState);
        }

        let book = inner.lock.lock()?;
        if inner.finished.load(Ordering::Acquire) {
            return Err(ThreadError::InvalidState);
        }
        let result = inner.port.thread_terminate(tid);
        inner.finished.store(true, Ordering::Release);
        drop(book);
        inner.announce_finished();

        match result {
            Ok(()) => {
                log::debug!("terminated {tid:?}");
                Ok(())
            }
            Err(err) => {
                // The unit exited on its own in the meantime.
                log::debug!("terminate {tid:?}: {err}");
                Err(ThreadError::InvalidState)
            }
        }
    }

    /// Changes the scheduling priority of a started thread.
    pub fn set_priority(&self, priority: Priority) -> ThreadResult<()> {
        let (inner, tid) = self.running()?;
        Ok(inner.port.set_thread_priority(tid, priority)?)
    }

    /// Current scheduling priority of a started thread.
    pub fn get_priority(&self) -> ThreadResult<Priority> {
        let (inner, tid) = self.running()?;
        Ok(inner.port.thread_priority(tid)?)
    }

    fn running(&self) -> ThreadResult<(&Inner, ThreadId)> {
        let (inner, tid) = self.started()?;
        if inner.finished.load(Ordering::Acquire) {
            return Err(ThreadError::InvalidState);
        }
        Ok((inner, tid))
    }

    /// Sets thread flags of this thread and returns its flags afterwards.
    /// Callable from interrupt context.
    pub fn signal_set(&self, flags: u32) -> ThreadResult<u32> {
        let (inner, tid) = self.running()?;
        Ok(inner.port.flags_set(tid, flags)?)
    }

    /// Lifecycle state; [`ThreadState::Inactive`] before start.
    pub fn get_state(&self) -> ThreadState {
        match self.started() {
            Err(_) => ThreadState::Inactive,
            Ok((inner, _)) if inner.finished.load(Ordering::Acquire) => ThreadState::Deleted,
            Ok((inner, _)) => inner.control_block.state().into(),
        }
    }

    fn stack_usage(&self) -> StackUsage {
        self.started()
            .ok()
            .and_then(|(inner, tid)| inner.port.thread_stack(tid))
            .unwrap_or_default()
    }

    /// Total stack size in bytes; zero while no kernel unit exists.
    pub fn stack_size(&self) -> usize {
        self.stack_usage().size
    }

    /// Stack space currently free.
    pub fn free_stack(&self) -> usize {
        self.stack_usage().current_free
    }

    /// Stack space currently in use.
    pub fn used_stack(&self) -> usize {
        self.stack_usage().used()
    }

    /// Most stack space ever used.
    pub fn max_stack(&self) -> usize {
        self.stack_usage().max_used()
    }

    /// Name given at construction.
    pub fn get_name(&self) -> Option<&'static str> {
        self.config.name
    }

    /// Kernel id of the unit, once started.
    pub fn id(&self) -> Option<ThreadId> {
        self.tid
    }

    /// Clears thread flags of the calling thread, returning them as they
    /// were before.
    pub fn signal_clr(flags: u32) -> ThreadResult<u32> {
        let port = thread_context()?;
        Ok(port.flags_clear(flags)?)
    }

    /// Waits for thread flags of the calling thread.
    ///
    /// With `flags == 0` any single flag satisfies the wait; otherwise all
    /// bits of `flags` must be set. Matched flags are cleared. A zero timeout
    /// polls and yields [`SignalEvent::Empty`] when nothing matches; an
    /// expired wait fails with [`ThreadError::Timeout`].
    pub fn signal_wait(flags: u32, timeout: Timeout) -> ThreadResult<SignalEvent> {
        let port = thread_context()?;
        let (mask, options) = if flags == 0 {
            (FLAGS_ANY, FlagsOptions::ANY)
        } else {
            (flags, FlagsOptions::ALL)
        };
        match port.flags_wait(mask, options, timeout) {
            Ok(value) => Ok(SignalEvent::Signaled(value)),
            Err(KernelError::Resource) if timeout.is_no_wait() => Ok(SignalEvent::Empty),
            Err(err) => Err(err.into()),
        }
    }

    /// Suspends the calling thread for `millis` milliseconds.
    pub fn wait(millis: u32) -> ThreadResult<()> {
        let port = thread_context()?;
        Ok(port.delay(millis)?)
    }

    /// Passes control to the next ready thread of the same priority.
    pub fn yield_now() -> ThreadResult<()> {
        let port = thread_context()?;
        Ok(port.thread_yield()?)
    }

    /// Id of the calling thread.
    pub fn gettid() -> Option<ThreadId> {
        rtos_port::get().ok()?.current_thread()
    }

    /// Registers the function the kernel's idle loop calls.
    ///
    /// There is a single process-wide slot: the last registration wins and
    /// nothing unregisters it.
    pub fn attach_idle_hook(hook: fn()) {
        hooks::set_idle_hook(hook);
    }

    /// Registers the function called when a thread is terminated or exits.
    ///
    /// Same single-slot semantics as [`attach_idle_hook`](Self::attach_idle_hook).
    pub fn attach_terminate_hook(hook: fn(ThreadId)) {
        hooks::set_terminate_hook(hook);
    }
}

fn thread_context() -> ThreadResult<&'static dyn KernelPort> {
    let port = rtos_port::get()?;
    if port.in_isr() {
        return Err(ThreadError::InvalidState);
    }
    Ok(port)
}

impl Drop for Thread {
    fn drop(&mut self) {
        let (Some(inner), Some(tid)) = (self.inner.take(), self.tid) else {
            return;
        };

        let reaped = match inner.lock.lock() {
            Ok(mut book) => {
                if !inner.finished.load(Ordering::Acquire) {
                    if let Err(err) = inner.port.thread_terminate(tid) {
                        log::debug!("terminate {tid:?} on drop: {err}");
                    }
                    inner.finished.store(true, Ordering::Release);
                }
                inner.reap_locked(&mut book, tid)
            }
            Err(err) => Err(err),
        };

        if let Err(err) = reaped {
            // The unit may still be using the stack and control block.
            log::error!("could not reclaim {tid:?} on drop ({err}); leaking its memory");
            let _ = Box::leak(inner);
        }
    }
}

impl fmt::Debug for Thread {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Thread")
            .field("id", &self.tid)
            .field("name", &self.config.name)
            .field("priority", &self.config.priority)
            .field("state", &self.get_state())
            .finish()
    }
}
