//! Memory handed from a thread owner to the kernel.
//!
//! The owner of a thread supplies both the stack region and the control block
//! the kernel keeps its per-unit bookkeeping in. Both must stay at a fixed
//! address and remain valid until the unit has been reclaimed with
//! [`KernelPort::thread_join`](crate::KernelPort::thread_join).

use core::ptr::NonNull;
use core::sync::atomic::{AtomicU32, AtomicU8, Ordering};

use crate::types::{KernelState, Priority, ThreadId};

/// Word written over a fresh stack so maximum usage can be measured later.
pub const STACK_WATERMARK: u32 = 0xE25A_2EA5;

/// Required alignment of a stack region, in bytes.
pub const STACK_ALIGN: usize = 8;

/// Smallest stack region a unit can be created with, in bytes.
pub const MIN_STACK_SIZE: usize = 128;

/// Per-unit kernel bookkeeping stored in memory owned by the thread owner.
///
/// The kernel binds the block to a unit on creation, publishes the unit's
/// scheduler state in it, and clears it once the unit has been reclaimed.
#[repr(C, align(8))]
#[derive(Debug)]
pub struct ControlBlock {
    tag: AtomicU32,
    state: AtomicU8,
}

impl ControlBlock {
    pub const fn new() -> Self {
        Self {
            tag: AtomicU32::new(0),
            state: AtomicU8::new(0),
        }
    }

    /// Binds the block to a freshly created unit.
    pub fn bind(&self, id: ThreadId) {
        self.state.store(KernelState::Ready.to_raw(), Ordering::Release);
        self.tag.store(id.into_raw().get(), Ordering::Release);
    }

    /// The unit this block currently belongs to, if any.
    pub fn owner(&self) -> Option<ThreadId> {
        core::num::NonZeroU32::new(self.tag.load(Ordering::Acquire)).map(ThreadId::from_raw)
    }

    pub fn set_state(&self, state: KernelState) {
        self.state.store(state.to_raw(), Ordering::Release);
    }

    pub fn state(&self) -> KernelState {
        KernelState::from_raw(self.state.load(Ordering::Acquire))
    }

    /// Clears the block. After this the owner may free or reuse it.
    pub fn release(&self) {
        self.tag.store(0, Ordering::Release);
        self.state.store(KernelState::Inactive.to_raw(), Ordering::Release);
    }

    pub fn is_released(&self) -> bool {
        self.tag.load(Ordering::Acquire) == 0
    }
}

impl Default for ControlBlock {
    fn default() -> Self {
        Self::new()
    }
}

/// A stack memory region given to the kernel.
#[derive(Debug, Clone, Copy)]
pub struct StackRegion {
    ptr: NonNull<u8>,
    len: usize,
}

// SAFETY: a region is only a description of memory; whoever creates one
// guarantees exclusive use by the kernel unit it is handed to.
unsafe impl Send for StackRegion {}
unsafe impl Sync for StackRegion {}

impl StackRegion {
    /// # Safety
    ///
    /// `ptr` must be valid for reads and writes of `len` bytes, aligned to
    /// [`STACK_ALIGN`], and not used by anything else while the region is
    /// handed to a kernel unit.
    pub const unsafe fn new(ptr: NonNull<u8>, len: usize) -> Self {
        Self { ptr, len }
    }

    pub fn as_ptr(&self) -> *mut u8 {
        self.ptr.as_ptr()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Fills the region with [`STACK_WATERMARK`] words.
    ///
    /// # Safety
    ///
    /// No kernel unit may be running on the region.
    pub unsafe fn fill_watermark(&self) {
        let words = self.ptr.as_ptr().cast::<u32>();
        for i in 0..self.len / 4 {
            words.add(i).write_volatile(STACK_WATERMARK);
        }
    }

    /// Bytes at the bottom of the region that were never written since the
    /// last [`fill_watermark`](Self::fill_watermark).
    ///
    /// # Safety
    ///
    /// The region must still be valid memory.
    pub unsafe fn watermark_free(&self) -> usize {
        let words = self.ptr.as_ptr().cast::<u32>();
        let mut intact = 0;
        while intact < self.len / 4 && words.add(intact).read_volatile() == STACK_WATERMARK {
            intact += 1;
        }
        intact * 4
    }
}

/// Stack accounting of a live unit, in bytes.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct StackUsage {
    /// Total size of the stack region.
    pub size: usize,
    /// Space below the current stack pointer.
    pub current_free: usize,
    /// Space that has never been touched (high watermark).
    pub min_free: usize,
}

impl StackUsage {
    pub fn used(&self) -> usize {
        self.size.saturating_sub(self.current_free)
    }

    pub fn max_used(&self) -> usize {
        self.size.saturating_sub(self.min_free)
    }
}

/// Opaque argument forwarded to a unit's entry function.
#[derive(Debug, Clone, Copy)]
pub struct EntryArg(NonNull<()>);

// SAFETY: the argument is only dereferenced by the entry function, whose
// owner guarantees the pointee is shareable with the new unit.
unsafe impl Send for EntryArg {}

impl EntryArg {
    pub fn new(ptr: NonNull<()>) -> Self {
        Self(ptr)
    }

    pub fn as_ptr(self) -> *mut () {
        self.0.as_ptr()
    }
}

/// Entry point of a kernel unit. The unit exits when it returns.
pub type ThreadEntry = fn(EntryArg);

/// Creation attributes of a kernel unit.
#[derive(Debug)]
pub struct ThreadAttr {
    pub name: Option<&'static str>,
    pub priority: Priority,
    pub stack: StackRegion,
    pub control_block: NonNull<ControlBlock>,
}
