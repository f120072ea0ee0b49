//! Semaphore and mutex objects of the hosted kernel.

use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::{Condvar, Mutex};

use crate::error::{KernelError, KernelResult};
use crate::types::{KernelState, ThreadId, Timeout, WaitReason};

use super::unit::{Deadline, Unit};

pub(crate) struct SemaphoreObj {
    count: Mutex<u32>,
    max: u32,
    available: Condvar,
    deleted: AtomicBool,
}

impl SemaphoreObj {
    pub(crate) fn new(initial: u32, max: u32) -> Self {
        Self {
            count: Mutex::new(initial),
            max,
            available: Condvar::new(),
            deleted: AtomicBool::new(false),
        }
    }

    /// Takes a token, blocking the calling unit (if any) up to `timeout`.
    pub(crate) fn acquire(
        &self,
        caller: Option<&Unit>,
        timeout: Timeout,
        poll: Duration,
    ) -> KernelResult<()> {
        let deadline = Deadline::after(timeout.as_duration());
        let mut count = self.count.lock();
        loop {
            if self.deleted.load(Ordering::Acquire) {
                return Err(KernelError::Resource);
            }
            if *count > 0 {
                *count -= 1;
                if let Some(unit) = caller {
                    unit.publish(KernelState::Running);
                }
                return Ok(());
            }
            if timeout.is_no_wait() {
                return Err(KernelError::Resource);
            }
            let Some(slice) = deadline.next_slice(poll) else {
                if let Some(unit) = caller {
                    unit.publish(KernelState::Running);
                }
                return Err(KernelError::Timeout);
            };
            if let Some(unit) = caller {
                unit.publish(KernelState::Blocked(WaitReason::Semaphore));
                parking_lot::MutexGuard::unlocked(&mut count, || unit.checkpoint());
            }
            self.available.wait_for(&mut count, slice);
        }
    }

    pub(crate) fn release(&self) -> KernelResult<()> {
        let mut count = self.count.lock();
        if *count >= self.max {
            return Err(KernelError::Resource);
        }
        *count += 1;
        self.available.notify_one();
        Ok(())
    }

    pub(crate) fn count(&self) -> u32 {
        *self.count.lock()
    }

    pub(crate) fn delete(&self) {
        self.deleted.store(true, Ordering::Release);
        let _count = self.count.lock();
        self.available.notify_all();
    }
}

pub(crate) struct MutexObj {
    owner: Mutex<Option<ThreadId>>,
    released: Condvar,
    deleted: AtomicBool,
}

impl MutexObj {
    pub(crate) fn new() -> Self {
        Self {
            owner: Mutex::new(None),
            released: Condvar::new(),
            deleted: AtomicBool::new(false),
        }
    }

    pub(crate) fn acquire(&self, caller: &Unit, timeout: Timeout, poll: Duration) -> KernelResult<()> {
        let deadline = Deadline::after(timeout.as_duration());
        let mut owner = self.owner.lock();
        loop {
            if self.deleted.load(Ordering::Acquire) {
                return Err(KernelError::Resource);
            }
            match *owner {
                None => {
                    *owner = Some(caller.id);
                    caller.publish(KernelState::Running);
                    return Ok(());
                }
                // Not recursive: relocking would deadlock the owner.
                Some(id) if id == caller.id => return Err(KernelError::Resource),
                Some(_) => {}
            }
            if timeout.is_no_wait() {
                return Err(KernelError::Resource);
            }
            let Some(slice) = deadline.next_slice(poll) else {
                caller.publish(KernelState::Running);
                return Err(KernelError::Timeout);
            };
            caller.publish(KernelState::Blocked(WaitReason::Mutex));
            parking_lot::MutexGuard::unlocked(&mut owner, || caller.checkpoint());
            self.released.wait_for(&mut owner, slice);
        }
    }

    pub(crate) fn release(&self, caller: ThreadId) -> KernelResult<()> {
        let mut owner = self.owner.lock();
        if *owner != Some(caller) {
            return Err(KernelError::Resource);
        }
        *owner = None;
        self.released.notify_one();
        Ok(())
    }

    /// Releases the mutex if `id` holds it. Returns true if it did.
    pub(crate) fn release_if_owned_by(&self, id: ThreadId) -> bool {
        let mut owner = self.owner.lock();
        if *owner == Some(id) {
            *owner = None;
            self.released.notify_one();
            true
        } else {
            false
        }
    }

    pub(crate) fn owner(&self) -> Option<ThreadId> {
        *self.owner.lock()
    }

    pub(crate) fn delete(&self) {
        self.deleted.store(true, Ordering::Release);
        let _owner = self.owner.lock();
        self.released.notify_all();
    }
}
