//! Stack memory for threads.
//!
//! A thread either runs on a buffer the caller hands over for the program's
//! lifetime or on memory it obtains from a [`StackAllocator`]. Allocated
//! stacks are owned by the thread and returned to their allocator exactly
//! once, after the kernel unit has been reclaimed.

use core::alloc::Layout;
use core::fmt;
use core::ptr::NonNull;

use rtos_port::control::{MIN_STACK_SIZE, STACK_ALIGN};
use rtos_port::StackRegion;

use crate::error::{ThreadError, ThreadResult};

/// Source of thread stack memory.
///
/// Implementations must return blocks aligned to [`STACK_ALIGN`].
pub trait StackAllocator: Sync {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>>;

    /// Returns a block to the allocator.
    ///
    /// # Safety
    ///
    /// `ptr` must come from [`allocate`](Self::allocate) on this allocator
    /// with the same `size`, and must not be used afterwards.
    unsafe fn release(&self, ptr: NonNull<u8>, size: usize);
}

/// Allocates stacks from the global heap.
#[derive(Debug, Clone, Copy, Default)]
pub struct HeapStackAllocator;

/// The allocator threads use unless configured otherwise.
pub static HEAP: HeapStackAllocator = HeapStackAllocator;

impl StackAllocator for HeapStackAllocator {
    fn allocate(&self, size: usize) -> Option<NonNull<u8>> {
        if size == 0 {
            return None;
        }
        let layout = Layout::from_size_align(size, STACK_ALIGN).ok()?;
        // SAFETY: the layout has a non-zero size.
        NonNull::new(unsafe { alloc::alloc::alloc(layout) })
    }

    unsafe fn release(&self, ptr: NonNull<u8>, size: usize) {
        if let Ok(layout) = Layout::from_size_align(size, STACK_ALIGN) {
            alloc::alloc::dealloc(ptr.as_ptr(), layout);
        }
    }
}

/// A stack block owned by a thread. Dropping it returns the block.
pub(crate) struct OwnedStack {
    ptr: NonNull<u8>,
    size: usize,
    allocator: &'static dyn StackAllocator,
}

// SAFETY: the block is exclusively owned; only the kernel unit running on it
// touches its contents.
unsafe impl Send for OwnedStack {}

impl OwnedStack {
    pub(crate) fn allocate(allocator: &'static dyn StackAllocator, size: usize) -> ThreadResult<Self> {
        let size = usable_size(size)?;
        let ptr = allocator.allocate(size).ok_or_else(|| {
            log::warn!("stack allocation of {size} bytes failed");
            ThreadError::OutOfMemory
        })?;
        if ptr.as_ptr() as usize % STACK_ALIGN != 0 {
            // SAFETY: just allocated with this size.
            unsafe { allocator.release(ptr, size) };
            log::error!("stack allocator returned a misaligned block");
            return Err(ThreadError::OutOfMemory);
        }
        Ok(Self {
            ptr,
            size,
            allocator,
        })
    }

    pub(crate) fn region(&self) -> StackRegion {
        // SAFETY: the block is valid, aligned and exclusively ours.
        unsafe { StackRegion::new(self.ptr, self.size) }
    }
}

impl Drop for OwnedStack {
    fn drop(&mut self) {
        log::trace!("releasing {} byte stack at {:p}", self.size, self.ptr);
        // SAFETY: allocated by `self.allocator` with `self.size`; dropped once.
        unsafe { self.allocator.release(self.ptr, self.size) };
    }
}

impl fmt::Debug for OwnedStack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("OwnedStack")
            .field("ptr", &self.ptr)
            .field("size", &self.size)
            .finish()
    }
}

/// Aligns a caller-supplied buffer for use as a stack.
///
/// The start is rounded up and the length rounded down to [`STACK_ALIGN`].
pub(crate) fn align_buffer(buf: &mut [u8]) -> ThreadResult<StackRegion> {
    let offset = buf.as_mut_ptr().align_offset(STACK_ALIGN);
    if offset > buf.len() {
        return Err(ThreadError::InvalidParameter);
    }
    let len = usable_size(buf.len() - offset)?;
    // SAFETY: `offset <= buf.len()`, so the pointer stays within the buffer.
    let ptr = unsafe { buf.as_mut_ptr().add(offset) };
    let ptr = NonNull::new(ptr).ok_or(ThreadError::InvalidParameter)?;
    // SAFETY: aligned, in bounds, and the buffer is `'static` and handed over
    // to the thread for good.
    Ok(unsafe { StackRegion::new(ptr, len) })
}

fn usable_size(size: usize) -> ThreadResult<usize> {
    let size = size & !(STACK_ALIGN - 1);
    if size < MIN_STACK_SIZE {
        log::warn!("stack of {size} bytes is below the {MIN_STACK_SIZE} byte minimum");
        return Err(ThreadError::InvalidParameter);
    }
    Ok(size)
}
