//! Tokens and plain value types shared between the kernel and its callers.

use core::fmt;
use core::num::NonZeroU32;
use core::time::Duration;

macro_rules! opaque_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
        pub struct $name(NonZeroU32);

        impl $name {
            /// Wraps a raw kernel handle. Only kernel ports create these.
            pub const fn from_raw(raw: NonZeroU32) -> Self {
                Self(raw)
            }

            /// Raw handle value, meaningful to the issuing kernel only.
            pub const fn into_raw(self) -> NonZeroU32 {
                self.0
            }
        }

        impl fmt::Debug for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                write!(f, concat!(stringify!($name), "({:#x})"), self.0.get())
            }
        }
    };
}

opaque_id!(
    /// Identity of a kernel unit (a schedulable thread of execution).
    ThreadId
);
opaque_id!(
    /// Handle of a kernel counting semaphore.
    SemaphoreId
);
opaque_id!(
    /// Handle of a kernel mutex.
    MutexId
);

/// Thread priority.
///
/// Ordered so that `Priority::High > Priority::Normal`. The discriminants
/// match the CMSIS-RTOS2 priority levels.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
#[repr(u8)]
pub enum Priority {
    Idle = 1,
    Low = 8,
    BelowNormal = 16,
    #[default]
    Normal = 24,
    AboveNormal = 32,
    High = 40,
    Realtime = 48,
}

impl Priority {
    pub const fn raw(self) -> u8 {
        self as u8
    }

    /// Converts a raw kernel priority level back into a [`Priority`].
    pub const fn from_raw(raw: u8) -> Option<Self> {
        match raw {
            1 => Some(Self::Idle),
            8 => Some(Self::Low),
            16 => Some(Self::BelowNormal),
            24 => Some(Self::Normal),
            32 => Some(Self::AboveNormal),
            40 => Some(Self::High),
            48 => Some(Self::Realtime),
            _ => None,
        }
    }
}

/// Wait duration for blocking kernel calls.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum Timeout {
    /// Wait at most this many milliseconds. `Millis(0)` polls.
    Millis(u32),
    /// Wait until the condition is met.
    Forever,
}

impl Timeout {
    pub const NO_WAIT: Timeout = Timeout::Millis(0);

    pub const fn is_no_wait(self) -> bool {
        matches!(self, Timeout::Millis(0))
    }

    pub fn as_duration(self) -> Option<Duration> {
        match self {
            Timeout::Millis(ms) => Some(Duration::from_millis(u64::from(ms))),
            Timeout::Forever => None,
        }
    }
}

impl From<u32> for Timeout {
    /// `u32::MAX` is the conventional "wait forever" value.
    fn from(ms: u32) -> Self {
        if ms == u32::MAX {
            Timeout::Forever
        } else {
            Timeout::Millis(ms)
        }
    }
}

/// Thread flag bit that is never available to applications.
pub const FLAGS_RESERVED: u32 = 0x8000_0000;

/// Every usable thread flag; waiting on it with [`FlagsOptions::ANY`]
/// returns on the first flag set.
pub const FLAGS_ANY: u32 = !FLAGS_RESERVED;

/// How `flags_wait` matches the requested mask.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct FlagsOptions {
    /// Require every requested bit rather than any one of them.
    pub wait_all: bool,
    /// Leave matched bits set after returning.
    pub no_clear: bool,
}

impl FlagsOptions {
    pub const ANY: FlagsOptions = FlagsOptions {
        wait_all: false,
        no_clear: false,
    };
    pub const ALL: FlagsOptions = FlagsOptions {
        wait_all: true,
        no_clear: false,
    };

    pub const fn no_clear(mut self) -> Self {
        self.no_clear = true;
        self
    }

    /// Returns true when `current` satisfies a wait for `mask`.
    pub const fn is_satisfied(self, current: u32, mask: u32) -> bool {
        if self.wait_all {
            current & mask == mask
        } else {
            current & mask != 0
        }
    }
}

/// What a blocked unit is waiting for.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum WaitReason {
    Delay,
    Join,
    ThreadFlags,
    EventFlags,
    Mutex,
    Semaphore,
    MemoryPool,
    MessageGet,
    MessagePut,
}

/// Scheduler state of a kernel unit.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum KernelState {
    Inactive,
    Ready,
    Running,
    Blocked(WaitReason),
    Terminated,
}

const STATE_INACTIVE: u8 = 0x00;
const STATE_READY: u8 = 0x01;
const STATE_RUNNING: u8 = 0x02;
const STATE_BLOCKED: u8 = 0x03;
const STATE_TERMINATED: u8 = 0x04;

impl KernelState {
    /// Encodes the state as stored in a control block: the low nibble holds
    /// the base state, the high nibble the wait reason of a blocked unit.
    pub const fn to_raw(self) -> u8 {
        match self {
            KernelState::Inactive => STATE_INACTIVE,
            KernelState::Ready => STATE_READY,
            KernelState::Running => STATE_RUNNING,
            KernelState::Terminated => STATE_TERMINATED,
            KernelState::Blocked(reason) => {
                let code = match reason {
                    WaitReason::Delay => 1,
                    WaitReason::Join => 2,
                    WaitReason::ThreadFlags => 3,
                    WaitReason::EventFlags => 4,
                    WaitReason::Mutex => 5,
                    WaitReason::Semaphore => 6,
                    WaitReason::MemoryPool => 7,
                    WaitReason::MessageGet => 8,
                    WaitReason::MessagePut => 9,
                };
                STATE_BLOCKED | (code << 4)
            }
        }
    }

    /// Decodes a control block state byte. Unknown encodings read as
    /// `Inactive`.
    pub const fn from_raw(raw: u8) -> Self {
        match raw & 0x0F {
            STATE_READY => KernelState::Ready,
            STATE_RUNNING => KernelState::Running,
            STATE_TERMINATED => KernelState::Terminated,
            STATE_BLOCKED => {
                let reason = match raw >> 4 {
                    1 => WaitReason::Delay,
                    2 => WaitReason::Join,
                    3 => WaitReason::ThreadFlags,
                    4 => WaitReason::EventFlags,
                    5 => WaitReason::Mutex,
                    6 => WaitReason::Semaphore,
                    7 => WaitReason::MemoryPool,
                    8 => WaitReason::MessageGet,
                    9 => WaitReason::MessagePut,
                    _ => return KernelState::Inactive,
                };
                KernelState::Blocked(reason)
            }
            _ => KernelState::Inactive,
        }
    }
}
