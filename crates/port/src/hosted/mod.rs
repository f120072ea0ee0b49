//! Hosted reference kernel.
//!
//! [`HostedKernel`] implements [`KernelPort`] on top of OS threads so the
//! thread layer can run and be tested on a development machine. It keeps the
//! observable contract of an embedded kernel where it can:
//!
//! - every unit gets an id, a control block binding and a stack region with
//!   an initial frame written at its top
//! - thread flags, semaphores and mutexes block with timeouts
//! - mutexes still held by a unit are released when it exits
//!
//! Termination is cooperative. A terminated unit is stopped the next time it
//! calls into the kernel (flag wait, delay, yield, semaphore or mutex
//! acquire). A loop that never calls the kernel cannot be stopped.
//!
//! OS threads that call into the kernel without having been created by it
//! are adopted as units with [`Priority::Normal`] and no stack. An adopted
//! unit is forgotten when its OS thread exits.

mod objects;
mod unit;

use alloc::collections::BTreeMap;
use core::num::NonZeroU32;
use std::panic::{self, AssertUnwindSafe};
use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;

use crate::control::{EntryArg, StackUsage, ThreadAttr, ThreadEntry, MIN_STACK_SIZE, STACK_ALIGN};
use crate::error::{KernelError, KernelResult};
use crate::hooks;
use crate::port::{self, KernelPort};
use crate::types::{
    FlagsOptions, KernelState, MutexId, Priority, SemaphoreId, ThreadId, Timeout, WaitReason,
    FLAGS_RESERVED,
};

use objects::{MutexObj, SemaphoreObj};
use unit::{Deadline, IsrScope, Terminated, Unit};

/// Configuration for the hosted kernel.
#[derive(Debug, Clone)]
pub struct HostedConfig {
    /// Maximum number of live kernel-created units.
    pub max_threads: usize,
    /// How often blocked units wake up to notice termination.
    pub poll_interval: Duration,
    /// Bytes reserved at the top of each stack for the initial context frame.
    pub initial_frame: usize,
}

impl Default for HostedConfig {
    fn default() -> Self {
        Self {
            max_threads: 64,
            poll_interval: Duration::from_millis(5),
            initial_frame: 64,
        }
    }
}

impl HostedConfig {
    pub fn builder() -> HostedConfigBuilder {
        HostedConfigBuilder::default()
    }
}

/// Builder for [`HostedConfig`].
#[derive(Debug, Clone, Default)]
pub struct HostedConfigBuilder {
    config: HostedConfig,
}

impl HostedConfigBuilder {
    pub fn max_threads(mut self, max: usize) -> Self {
        self.config.max_threads = max;
        self
    }

    pub fn poll_interval(mut self, interval: Duration) -> Self {
        self.config.poll_interval = interval;
        self
    }

    /// Sets the initial frame size, rounded up to whole words.
    pub fn initial_frame(mut self, bytes: usize) -> Self {
        self.config.initial_frame = bytes.next_multiple_of(4);
        self
    }

    pub fn build(self) -> HostedConfig {
        self.config
    }
}

struct Shared {
    config: HostedConfig,
    units: Mutex<BTreeMap<ThreadId, Arc<Unit>>>,
    semaphores: Mutex<BTreeMap<SemaphoreId, Arc<SemaphoreObj>>>,
    mutexes: Mutex<BTreeMap<MutexId, Arc<MutexObj>>>,
    next_id: AtomicU32,
}

impl Shared {
    fn key(self: &Arc<Self>) -> usize {
        Arc::as_ptr(self) as usize
    }

    fn allocate_id(&self) -> KernelResult<NonZeroU32> {
        NonZeroU32::new(self.next_id.fetch_add(1, Ordering::Relaxed)).ok_or(KernelError::NoMemory)
    }

    fn unit(&self, id: ThreadId) -> KernelResult<Arc<Unit>> {
        self.units.lock().get(&id).cloned().ok_or(KernelError::Parameter)
    }

    fn semaphore(&self, id: SemaphoreId) -> KernelResult<Arc<SemaphoreObj>> {
        self.semaphores.lock().get(&id).cloned().ok_or(KernelError::Parameter)
    }

    fn mutex(&self, id: MutexId) -> KernelResult<Arc<MutexObj>> {
        self.mutexes.lock().get(&id).cloned().ok_or(KernelError::Parameter)
    }

    fn release_mutexes_of(&self, id: ThreadId) {
        for (mutex_id, mutex) in self.mutexes.lock().iter() {
            if mutex.release_if_owned_by(id) {
                log::warn!("released {mutex_id:?} still held by exiting {id:?}");
            }
        }
    }

    /// Final bookkeeping of a unit whose entry function has returned or
    /// unwound.
    fn finish(&self, unit: &Unit) {
        self.release_mutexes_of(unit.id);
        unit.publish(KernelState::Terminated);
        if unit.claim_terminate_hook() {
            hooks::run_terminate(unit.id);
        }
        unit.mark_exited();
    }
}

/// Kernel port backed by OS threads.
pub struct HostedKernel {
    shared: Arc<Shared>,
}

static GLOBAL: spin::Once<HostedKernel> = spin::Once::new();

/// Creates the process-wide hosted kernel with the default configuration and
/// installs it as the kernel port.
pub fn init() -> KernelResult<&'static HostedKernel> {
    init_with(HostedConfig::default())
}

/// Like [`init`], with `config` used if this call creates the kernel.
pub fn init_with(config: HostedConfig) -> KernelResult<&'static HostedKernel> {
    let kernel = GLOBAL.call_once(|| HostedKernel::new(config));
    port::install(kernel)?;
    Ok(kernel)
}

impl HostedKernel {
    pub fn new(config: HostedConfig) -> Self {
        log::debug!(
            "hosted kernel: max_threads={}, poll={:?}",
            config.max_threads,
            config.poll_interval
        );
        Self {
            shared: Arc::new(Shared {
                config,
                units: Mutex::new(BTreeMap::new()),
                semaphores: Mutex::new(BTreeMap::new()),
                mutexes: Mutex::new(BTreeMap::new()),
                next_id: AtomicU32::new(1),
            }),
        }
    }

    pub fn config(&self) -> &HostedConfig {
        &self.shared.config
    }

    /// Runs `f` as if it executed in an interrupt handler.
    pub fn run_in_isr<R>(&self, f: impl FnOnce() -> R) -> R {
        let _scope = IsrScope::enter();
        f()
    }

    /// One pass of the idle loop: runs the registered idle hook.
    pub fn idle(&self) {
        hooks::run_idle();
    }

    /// Number of live kernel-created units.
    pub fn thread_count(&self) -> usize {
        self.shared.units.lock().values().filter(|u| !u.adopted).count()
    }

    fn current_unit(&self) -> KernelResult<Arc<Unit>> {
        let key = self.shared.key();
        if let Some(unit) = unit::current(key) {
            return Ok(unit);
        }
        let id = ThreadId::from_raw(self.shared.allocate_id()?);
        let unit = Arc::new(Unit::adopted(id, None, Priority::Normal));
        self.shared.units.lock().insert(id, Arc::clone(&unit));
        let shared = Arc::downgrade(&self.shared);
        unit::bind_adopted(key, Arc::clone(&unit), move || {
            if let Some(shared) = shared.upgrade() {
                shared.release_mutexes_of(id);
                shared.units.lock().remove(&id);
            }
        });
        log::trace!("adopted OS thread {:?} as {id:?}", std::thread::current().name());
        Ok(unit)
    }

    fn poll(&self) -> Duration {
        self.shared.config.poll_interval
    }

    fn ensure_thread_context(&self) -> KernelResult<()> {
        if unit::in_isr() {
            Err(KernelError::Isr)
        } else {
            Ok(())
        }
    }
}

fn run_unit(shared: Arc<Shared>, unit: Arc<Unit>, entry: ThreadEntry, arg: EntryArg) {
    unit::bind_current(shared.key(), Arc::clone(&unit));
    unit.publish(KernelState::Running);

    match panic::catch_unwind(AssertUnwindSafe(|| entry(arg))) {
        Ok(()) => log::trace!("{:?} returned", unit.id),
        Err(payload) if payload.is::<Terminated>() => log::debug!("{:?} stopped after terminate", unit.id),
        Err(_) => log::error!("{:?} ({:?}) panicked", unit.id, unit.name),
    }

    shared.finish(&unit);
    unit::unbind_current();
}

impl KernelPort for HostedKernel {
    unsafe fn thread_new(
        &self,
        entry: ThreadEntry,
        arg: EntryArg,
        attr: &ThreadAttr,
    ) -> KernelResult<ThreadId> {
        self.ensure_thread_context()?;
        let stack = attr.stack;
        if stack.len() < MIN_STACK_SIZE || stack.as_ptr() as usize % STACK_ALIGN != 0 {
            return Err(KernelError::Parameter);
        }
        let control_block = attr.control_block.as_ref();
        if !control_block.is_released() {
            return Err(KernelError::Parameter);
        }

        let unit = {
            let mut units = self.shared.units.lock();
            if units.values().filter(|u| !u.adopted).count() >= self.shared.config.max_threads {
                return Err(KernelError::Resource);
            }
            let id = ThreadId::from_raw(self.shared.allocate_id()?);

            let frame = self.shared.config.initial_frame.min(stack.len());
            stack.as_ptr().add(stack.len() - frame).write_bytes(0, frame);
            control_block.bind(id);

            let unit = Arc::new(Unit::created(
                id,
                attr.name,
                attr.priority,
                attr.control_block,
                stack,
                frame,
            ));
            units.insert(id, Arc::clone(&unit));
            unit
        };

        let id = unit.id;
        let shared = Arc::clone(&self.shared);
        let worker = Arc::clone(&unit);
        let spawned = std::thread::Builder::new()
            .name(attr.name.unwrap_or("rtos-unit").into())
            .spawn(move || run_unit(shared, worker, entry, arg));

        match spawned {
            Ok(handle) => {
                *unit.handle.lock() = Some(handle);
                log::debug!("created {id:?} {:?} at {:?}", attr.name, attr.priority);
                Ok(id)
            }
            Err(err) => {
                log::error!("failed to spawn OS thread for {id:?}: {err}");
                self.shared.units.lock().remove(&id);
                control_block.release();
                Err(KernelError::NoMemory)
            }
        }
    }

    fn thread_terminate(&self, id: ThreadId) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let unit = self.shared.unit(id)?;
        if unit.has_exited() || !unit.mark_terminated() {
            return Err(KernelError::Resource);
        }
        log::debug!("terminated {id:?}");
        if unit.claim_terminate_hook() {
            hooks::run_terminate(id);
        }
        if unit::current(self.shared.key()).is_some_and(|cur| cur.id == id) {
            unit.checkpoint();
        }
        Ok(())
    }

    fn thread_join(&self, id: ThreadId) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let target = self.shared.unit(id)?;
        if target.adopted {
            return Err(KernelError::Parameter);
        }
        let caller = self.current_unit()?;
        if caller.id == id {
            return Err(KernelError::Resource);
        }

        caller.publish(KernelState::Blocked(WaitReason::Join));
        while !target.wait_exit(self.poll()) {
            caller.checkpoint();
        }
        caller.publish(KernelState::Running);

        let handle = target.handle.lock().take();
        if let Some(handle) = handle {
            let _ = handle.join();
        }
        if self.shared.units.lock().remove(&id).is_none() {
            return Err(KernelError::Parameter);
        }
        target.release_control_block();
        log::trace!("reclaimed {id:?}");
        Ok(())
    }

    fn thread_state(&self, id: ThreadId) -> KernelState {
        self.shared
            .unit(id)
            .map(|unit| unit.state())
            .unwrap_or(KernelState::Inactive)
    }

    fn thread_priority(&self, id: ThreadId) -> KernelResult<Priority> {
        Ok(self.shared.unit(id)?.priority())
    }

    fn set_thread_priority(&self, id: ThreadId, priority: Priority) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let unit = self.shared.unit(id)?;
        if unit.is_terminated() {
            return Err(KernelError::Resource);
        }
        unit.set_priority(priority);
        Ok(())
    }

    fn thread_stack(&self, id: ThreadId) -> Option<StackUsage> {
        self.shared.unit(id).ok()?.stack_usage()
    }

    fn current_thread(&self) -> Option<ThreadId> {
        self.current_unit().ok().map(|unit| unit.id)
    }

    fn thread_yield(&self) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let unit = self.current_unit()?;
        unit.checkpoint();
        std::thread::yield_now();
        unit.checkpoint();
        Ok(())
    }

    fn delay(&self, ms: u32) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let unit = self.current_unit()?;
        let deadline = Deadline::after(Some(Duration::from_millis(u64::from(ms))));
        unit.publish(KernelState::Blocked(WaitReason::Delay));
        while let Some(slice) = deadline.next_slice(self.poll()) {
            unit.checkpoint();
            std::thread::sleep(slice);
        }
        unit.checkpoint();
        unit.publish(KernelState::Running);
        Ok(())
    }

    fn flags_set(&self, id: ThreadId, flags: u32) -> KernelResult<u32> {
        if flags & FLAGS_RESERVED != 0 {
            return Err(KernelError::Parameter);
        }
        let unit = self.shared.unit(id)?;
        let mut current = unit.flags.lock();
        *current |= flags;
        unit.flags_changed.notify_all();
        Ok(*current)
    }

    fn flags_clear(&self, flags: u32) -> KernelResult<u32> {
        self.ensure_thread_context()?;
        if flags & FLAGS_RESERVED != 0 {
            return Err(KernelError::Parameter);
        }
        let unit = self.current_unit()?;
        let mut current = unit.flags.lock();
        let before = *current;
        *current &= !flags;
        Ok(before)
    }

    fn flags_wait(&self, flags: u32, options: FlagsOptions, timeout: Timeout) -> KernelResult<u32> {
        self.ensure_thread_context()?;
        if flags == 0 || flags & FLAGS_RESERVED != 0 {
            return Err(KernelError::Parameter);
        }
        let unit = self.current_unit()?;
        let deadline = Deadline::after(timeout.as_duration());
        let mut current = unit.flags.lock();
        loop {
            if options.is_satisfied(*current, flags) {
                let before = *current;
                if !options.no_clear {
                    *current &= !flags;
                }
                unit.publish(KernelState::Running);
                return Ok(before);
            }
            if timeout.is_no_wait() {
                return Err(KernelError::Resource);
            }
            let Some(slice) = deadline.next_slice(self.poll()) else {
                unit.publish(KernelState::Running);
                return Err(KernelError::Timeout);
            };
            unit.publish(KernelState::Blocked(WaitReason::ThreadFlags));
            parking_lot::MutexGuard::unlocked(&mut current, || unit.checkpoint());
            unit.flags_changed.wait_for(&mut current, slice);
        }
    }

    fn in_isr(&self) -> bool {
        unit::in_isr()
    }

    fn semaphore_new(&self, initial: u32, max: u32) -> KernelResult<SemaphoreId> {
        if max == 0 || initial > max {
            return Err(KernelError::Parameter);
        }
        let id = SemaphoreId::from_raw(self.shared.allocate_id()?);
        self.shared
            .semaphores
            .lock()
            .insert(id, Arc::new(SemaphoreObj::new(initial, max)));
        Ok(id)
    }

    fn semaphore_acquire(&self, id: SemaphoreId, timeout: Timeout) -> KernelResult<()> {
        let semaphore = self.shared.semaphore(id)?;
        if unit::in_isr() {
            // Interrupt handlers may only poll.
            if !timeout.is_no_wait() {
                return Err(KernelError::Parameter);
            }
            return semaphore.acquire(None, timeout, self.poll());
        }
        let caller = self.current_unit()?;
        semaphore.acquire(Some(&caller), timeout, self.poll())
    }

    fn semaphore_release(&self, id: SemaphoreId) -> KernelResult<()> {
        self.shared.semaphore(id)?.release()
    }

    fn semaphore_count(&self, id: SemaphoreId) -> u32 {
        self.shared.semaphore(id).map(|s| s.count()).unwrap_or(0)
    }

    fn semaphore_delete(&self, id: SemaphoreId) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let semaphore = self
            .shared
            .semaphores
            .lock()
            .remove(&id)
            .ok_or(KernelError::Parameter)?;
        semaphore.delete();
        Ok(())
    }

    fn mutex_new(&self) -> KernelResult<MutexId> {
        self.ensure_thread_context()?;
        let id = MutexId::from_raw(self.shared.allocate_id()?);
        self.shared.mutexes.lock().insert(id, Arc::new(MutexObj::new()));
        Ok(id)
    }

    fn mutex_acquire(&self, id: MutexId, timeout: Timeout) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let mutex = self.shared.mutex(id)?;
        let caller = self.current_unit()?;
        mutex.acquire(&caller, timeout, self.poll())
    }

    fn mutex_release(&self, id: MutexId) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let mutex = self.shared.mutex(id)?;
        let caller = self.current_unit()?;
        mutex.release(caller.id)
    }

    fn mutex_owner(&self, id: MutexId) -> Option<ThreadId> {
        self.shared.mutex(id).ok()?.owner()
    }

    fn mutex_delete(&self, id: MutexId) -> KernelResult<()> {
        self.ensure_thread_context()?;
        let mutex = self
            .shared
            .mutexes
            .lock()
            .remove(&id)
            .ok_or(KernelError::Parameter)?;
        mutex.delete();
        Ok(())
    }
}
