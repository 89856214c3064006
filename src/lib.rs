//! # Task Management Core
//!
//! Allocation and teardown of processes and threads, a timer-driven
//! round-robin scheduler, wait/notify join semantics, and an ELF-based
//! process-creation path.
//!
//! ## Architecture
//! - One [`Tasking`] instance owns the registries (thread list, process
//!   list, ready queue) and the currently-running slot. It is created
//!   once at boot and never torn down.
//! - Hardware is consumed through the narrow traits in [`platform`]:
//!   CPU primitives, an address-space mapper, a filesystem reader and an
//!   ELF parser. The core itself never touches a register or a page
//!   table directly, which keeps it testable off-target.
//! - Atomic sections (scoped interrupt suspension) are the sole
//!   synchronization primitive. There is a single CPU; the only thing to
//!   exclude is the timer interrupt.
//!
//! ## The switch point
//! The timer interrupt hands the preempted thread's saved [`Context`] to
//! [`Tasking::preempt`], which rotates the ready queue and returns the
//! context the interrupt-return path must restore. That call is the only
//! context-switch point in the system; no voluntary yield exists.

#![cfg_attr(not(test), no_std)]

extern crate alloc;

pub mod cell;
pub mod context;
pub mod exec;
pub mod platform;
pub mod process;
pub mod scheduler;
pub mod stack;
pub mod thread;

pub use cell::TaskingCell;
pub use context::{Context, ExecutionMode};
pub use exec::{PAGE_SIZE, USER_SPACE_BASE};
pub use process::{Process, ProcessId, ProcessState, TaskFlags, PROCESS_NAME_MAX};
pub use scheduler::{Tasking, TIMER_HZ, TIMER_IRQ_LINE};
pub use stack::{Stack, STACK_SIZE};
pub use thread::{Thread, ThreadId, ThreadState, WaitInfo, WaitTarget};

/// Failure modes of the task-management operations.
///
/// Everything here is recoverable and reported to the caller; the only
/// unrecoverable condition in the subsystem is the stack sanity check,
/// which goes through [`platform::Cpu::halt`] instead.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TaskingError {
    /// A thread lookup by identifier found nothing.
    ThreadNotFound,
    /// A process lookup by identifier found nothing.
    ProcessNotFound,
    /// The operation would cancel or exit the kernel process.
    KernelProcessProtected,
    /// The operation needs a running thread but none is installed yet.
    NoCurrentThread,
    /// Stack or page allocation failed.
    OutOfMemory,
    /// The exec target could not be opened.
    ExecFileNotFound,
    /// The exec target is not a valid executable image.
    InvalidImage,
}

impl core::fmt::Display for TaskingError {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            TaskingError::ThreadNotFound => write!(f, "no thread with that identifier"),
            TaskingError::ProcessNotFound => write!(f, "no process with that identifier"),
            TaskingError::KernelProcessProtected => {
                write!(f, "the kernel process cannot be canceled or exited")
            }
            TaskingError::NoCurrentThread => write!(f, "no thread is currently running"),
            TaskingError::OutOfMemory => write!(f, "out of memory"),
            TaskingError::ExecFileNotFound => write!(f, "executable file not found"),
            TaskingError::InvalidImage => write!(f, "not a valid executable image"),
        }
    }
}
