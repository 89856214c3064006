//! # Thread Entity
//!
//! An execution context bound to a stack, owned by exactly one process.

use crate::context::Context;
use crate::process::ProcessId;
use crate::stack::Stack;

/// Unique thread identifier, monotonically increasing for the kernel's
/// lifetime. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ThreadId(pub u64);

/// Lifecycle state of a thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadState {
    /// Runnable; either the current thread or sitting in the ready
    /// queue.
    Running,

    /// Blocked until a specific thread terminates.
    WaitThread,

    /// Blocked until a specific process terminates.
    WaitProcess,

    /// Terminated; leaves the rotation and is reaped at the next
    /// scheduling point.
    Canceled,
}

/// What a blocked thread is waiting on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WaitTarget {
    Thread(ThreadId),
    Process(ProcessId),
}

/// Wait bookkeeping: the awaited identifier and the outcome slot the
/// notifier writes the exit/cancel code into.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WaitInfo {
    pub target: WaitTarget,
    pub outcome: i32,
}

/// A thread of execution.
pub struct Thread {
    pub(crate) id: ThreadId,
    pub(crate) state: ThreadState,

    /// Saved CPU state; valid only while this is not the currently
    /// running thread.
    pub(crate) context: Context,

    /// Exclusively owned stack region; freed when the thread is reaped.
    pub(crate) stack: Stack,

    /// Owning process (non-owning back-reference, resolved by lookup).
    pub(crate) process: ProcessId,

    /// Present from the moment the thread blocks; the outcome stays
    /// readable after release.
    pub(crate) wait: Option<WaitInfo>,
}

impl Thread {
    pub fn id(&self) -> ThreadId {
        self.id
    }

    pub fn state(&self) -> ThreadState {
        self.state
    }

    pub fn process(&self) -> ProcessId {
        self.process
    }

    pub fn context(&self) -> &Context {
        &self.context
    }

    pub fn stack(&self) -> &Stack {
        &self.stack
    }

    pub fn wait_info(&self) -> Option<WaitInfo> {
        self.wait
    }
}
