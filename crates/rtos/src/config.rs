//! Thread construction parameters.

use core::fmt;

use rtos_port::Priority;

use crate::stack::{StackAllocator, HEAP};

/// Stack size used when none is configured, in bytes.
pub const DEFAULT_STACK_SIZE: usize = 4096;

/// Everything a [`Thread`](crate::Thread) is constructed with.
///
/// # Example
///
/// ```ignore
/// let config = ThreadConfig::builder()
///     .priority(Priority::High)
///     .stack_size(2048)
///     .name("sensor")
///     .build();
/// let mut thread = Thread::new(config);
/// ```
pub struct ThreadConfig {
    pub priority: Priority,
    /// Size of the heap stack; ignored when `stack_mem` is set.
    pub stack_size: usize,
    /// Caller-supplied stack, handed over to the thread for good.
    pub stack_mem: Option<&'static mut [u8]>,
    /// Must outlive the thread, hence `'static`.
    pub name: Option<&'static str>,
    pub allocator: &'static dyn StackAllocator,
}

impl ThreadConfig {
    pub fn builder() -> ThreadConfigBuilder {
        ThreadConfigBuilder::default()
    }
}

impl Default for ThreadConfig {
    fn default() -> Self {
        Self {
            priority: Priority::Normal,
            stack_size: DEFAULT_STACK_SIZE,
            stack_mem: None,
            name: None,
            allocator: &HEAP,
        }
    }
}

impl fmt::Debug for ThreadConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ThreadConfig")
            .field("priority", &self.priority)
            .field("stack_size", &self.stack_size)
            .field("stack_mem", &self.stack_mem.as_ref().map(|buf| buf.len()))
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

/// Builder for [`ThreadConfig`].
#[derive(Debug, Default)]
pub struct ThreadConfigBuilder {
    config: ThreadConfig,
}

impl ThreadConfigBuilder {
    pub fn priority(mut self, priority: Priority) -> Self {
        self.config.priority = priority;
        self
    }

    pub fn stack_size(mut self, bytes: usize) -> Self {
        self.config.stack_size = bytes;
        self
    }

    /// Runs the thread on `mem` instead of allocating a stack.
    pub fn stack_mem(mut self, mem: &'static mut [u8]) -> Self {
        self.config.stack_mem = Some(mem);
        self
    }

    pub fn name(mut self, name: &'static str) -> Self {
        self.config.name = Some(name);
        self
    }

    pub fn allocator(mut self, allocator: &'static dyn StackAllocator) -> Self {
        self.config.allocator = allocator;
        self
    }

    pub fn build(self) -> ThreadConfig {
        self.config
    }
}
