//! # Process Entity
//!
//! A named address space owning a collection of threads. A process is
//! destroyed when its last thread is; the kernel process and its
//! address space live for the kernel's lifetime.

use alloc::vec::Vec;

use crate::context::ExecutionMode;
use crate::platform::AddressSpace;
use crate::thread::ThreadId;

/// Unique process identifier, monotonically increasing for the kernel's
/// lifetime. Never reused.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct ProcessId(pub u64);

/// Lifecycle state of a process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Running,
    Canceled,
}

bitflags::bitflags! {
    /// Creation flags for threads and processes. A process's flags are
    /// inherited by every thread it spawns, merged with the caller's.
    pub struct TaskFlags: u32 {
        /// Run in user mode: a fresh address space for the process,
        /// ring-3 segment selectors for its threads.
        const USER = 0b0001;
    }
}

impl TaskFlags {
    /// The execution mode these flags select for context construction.
    pub fn mode(self) -> ExecutionMode {
        if self.contains(TaskFlags::USER) {
            ExecutionMode::User
        } else {
            ExecutionMode::Kernel
        }
    }
}

/// Maximum length of a process name; longer names are truncated.
pub const PROCESS_NAME_MAX: usize = 32;

pub(crate) type ProcessName = heapless::String<PROCESS_NAME_MAX>;

/// A process: an address space, a name and the threads it owns.
pub struct Process {
    pub(crate) id: ProcessId,
    pub(crate) name: ProcessName,
    pub(crate) flags: TaskFlags,
    pub(crate) state: ProcessState,

    /// Owned unless it is the singleton kernel space.
    pub(crate) space: AddressSpace,

    /// Member threads; when this empties the process is destroyed.
    pub(crate) threads: Vec<ThreadId>,
}

impl Process {
    pub(crate) fn new(id: ProcessId, name: &str, flags: TaskFlags, space: AddressSpace) -> Self {
        Process {
            id,
            name: truncate_name(name),
            flags,
            state: ProcessState::Running,
            space,
            threads: Vec::new(),
        }
    }

    pub fn id(&self) -> ProcessId {
        self.id
    }

    pub fn name(&self) -> &str {
        self.name.as_str()
    }

    pub fn flags(&self) -> TaskFlags {
        self.flags
    }

    pub fn state(&self) -> ProcessState {
        self.state
    }

    pub fn space(&self) -> AddressSpace {
        self.space
    }

    pub fn threads(&self) -> &[ThreadId] {
        &self.threads
    }
}

fn truncate_name(name: &str) -> ProcessName {
    let mut truncated = ProcessName::new();
    for c in name.chars() {
        if truncated.push(c).is_err() {
            break;
        }
    }
    truncated
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn short_names_kept_verbatim() {
        let process = Process::new(ProcessId(1), "init", TaskFlags::empty(), AddressSpace(1));
        assert_eq!(process.name(), "init");
    }

    #[test]
    fn long_names_truncated() {
        let long = "a".repeat(PROCESS_NAME_MAX + 10);
        let process = Process::new(ProcessId(2), &long, TaskFlags::empty(), AddressSpace(1));
        assert_eq!(process.name().len(), PROCESS_NAME_MAX);
    }

    #[test]
    fn flags_select_execution_mode() {
        use crate::context::ExecutionMode;
        assert_eq!(TaskFlags::empty().mode(), ExecutionMode::Kernel);
        assert_eq!(TaskFlags::USER.mode(), ExecutionMode::User);
    }
}
