//! Semaphore and mutex wrappers over the kernel's primitives.
//!
//! Both own a kernel object for their whole lifetime and delete it on drop.
//! They are used by [`Thread`](crate::Thread) for its join protocol and are
//! available to applications as well.

use core::cell::UnsafeCell;
use core::fmt;
use core::marker::PhantomData;
use core::ops::{Deref, DerefMut};

use rtos_port::{KernelPort, MutexId, SemaphoreId, ThreadId, Timeout};

use crate::error::ThreadResult;

/// Counting semaphore.
///
/// # Example
///
/// ```ignore
/// let done = Semaphore::binary()?;
/// // Worker: done.release()?;
/// done.acquire(Timeout::Forever)?;
/// ```
pub struct Semaphore {
    port: &'static dyn KernelPort,
    id: SemaphoreId,
}

impl Semaphore {
    /// Creates a semaphore holding `initial` tokens, at most `max`.
    pub fn new(initial: u32, max: u32) -> ThreadResult<Self> {
        let port = rtos_port::get()?;
        let id = port.semaphore_new(initial, max)?;
        Ok(Self { port, id })
    }

    /// Creates an empty semaphore that holds at most one token.
    pub fn binary() -> ThreadResult<Self> {
        Self::new(0, 1)
    }

    /// Takes a token, waiting up to `timeout` for one to become available.
    pub fn acquire(&self, timeout: Timeout) -> ThreadResult<()> {
        Ok(self.port.semaphore_acquire(self.id, timeout)?)
    }

    /// Takes a token if one is available right now.
    pub fn try_acquire(&self) -> bool {
        self.port.semaphore_acquire(self.id, Timeout::NO_WAIT).is_ok()
    }

    /// Returns a token. Callable from interrupt context.
    pub fn release(&self) -> ThreadResult<()> {
        Ok(self.port.semaphore_release(self.id)?)
    }

    pub fn count(&self) -> u32 {
        self.port.semaphore_count(self.id)
    }
}

impl Drop for Semaphore {
    fn drop(&mut self) {
        if let Err(err) = self.port.semaphore_delete(self.id) {
            log::warn!("failed to delete {:?}: {err}", self.id);
        }
    }
}

impl fmt::Debug for Semaphore {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Semaphore")
            .field("id", &self.id)
            .field("count", &self.count())
            .finish()
    }
}

/// Mutual exclusion over a value of type `T`, backed by a kernel mutex.
///
/// The lock is not recursive: locking it again from the owning thread fails
/// instead of deadlocking.
pub struct Mutex<T> {
    port: &'static dyn KernelPort,
    id: MutexId,
    data: UnsafeCell<T>,
}

// SAFETY: access to `data` is serialized by the kernel mutex.
unsafe impl<T: Send> Send for Mutex<T> {}
unsafe impl<T: Send> Sync for Mutex<T> {}

impl<T> Mutex<T> {
    pub fn new(value: T) -> ThreadResult<Self> {
        let port = rtos_port::get()?;
        let id = port.mutex_new()?;
        Ok(Self {
            port,
            id,
            data: UnsafeCell::new(value),
        })
    }

    /// Acquires the mutex, waiting as long as it takes.
    pub fn lock(&self) -> ThreadResult<MutexGuard<'_, T>> {
        self.lock_timeout(Timeout::Forever)
    }

    /// Acquires the mutex, waiting up to `timeout`.
    pub fn lock_timeout(&self, timeout: Timeout) -> ThreadResult<MutexGuard<'_, T>> {
        self.port.mutex_acquire(self.id, timeout)?;
        Ok(MutexGuard {
            mutex: self,
            _not_send: PhantomData,
        })
    }

    /// The thread currently holding the mutex.
    pub fn owner(&self) -> Option<ThreadId> {
        self.port.mutex_owner(self.id)
    }

    pub fn get_mut(&mut self) -> &mut T {
        self.data.get_mut()
    }
}

impl<T> Drop for Mutex<T> {
    fn drop(&mut self) {
        if let Err(err) = self.port.mutex_delete(self.id) {
            log::warn!("failed to delete {:?}: {err}", self.id);
        }
    }
}

impl<T> fmt::Debug for Mutex<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Mutex")
            .field("id", &self.id)
            .field("owner", &self.owner())
            .finish()
    }
}

/// Access to the value of a locked [`Mutex`]; unlocks on drop.
///
/// Kernel mutexes are owned by a thread, so the guard cannot leave it.
pub struct MutexGuard<'a, T> {
    mutex: &'a Mutex<T>,
    _not_send: PhantomData<*const ()>,
}

impl<T> Deref for MutexGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        // SAFETY: the guard proves this thread owns the kernel mutex.
        unsafe { &*self.mutex.data.get() }
    }
}

impl<T> DerefMut for MutexGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        // SAFETY: as above, and the guard is borrowed mutably.
        unsafe { &mut *self.mutex.data.get() }
    }
}

impl<T> Drop for MutexGuard<'_, T> {
    fn drop(&mut self) {
        if let Err(err) = self.mutex.port.mutex_release(self.mutex.id) {
            log::error!("failed to release {:?}: {err}", self.mutex.id);
        }
    }
}
