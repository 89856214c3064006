//! # Shared Instance Cell
//!
//! The subsystem is a singleton for the kernel's lifetime. The cell
//! holds it behind one-time initialization so the timer-interrupt stub
//! and kernel subsystems reach the same instance:
//!
//! ```ignore
//! static TASKING: TaskingCell<BareMetal> = TaskingCell::new();
//!
//! // in the timer interrupt stub, interrupts already suspended:
//! let next = TASKING.with(|k| k.preempt(saved));
//! ```
//!
//! On the single CPU the lock is uncontended as long as non-interrupt
//! callers take it inside an interrupt-suspended region. Every mutating
//! operation (including the diagnostic dump) establishes one
//! internally; wrap read-only lookups in one yourself while the timer
//! is live.

use spin::{Mutex, Once};

use crate::platform::Platform;
use crate::scheduler::Tasking;

pub struct TaskingCell<P: Platform> {
    inner: Once<Mutex<Tasking<P>>>,
}

impl<P: Platform> TaskingCell<P> {
    pub const fn new() -> Self {
        TaskingCell { inner: Once::new() }
    }

    /// Install the instance. Later calls are ignored.
    pub fn init(&self, tasking: Tasking<P>) {
        self.inner.call_once(|| Mutex::new(tasking));
    }

    /// Run `f` against the instance; `None` before [`TaskingCell::init`].
    pub fn with<R>(&self, f: impl FnOnce(&mut Tasking<P>) -> R) -> Option<R> {
        self.inner.get().map(|mutex| {
            let mut tasking = mutex.lock();
            f(&mut tasking)
        })
    }
}

impl<P: Platform> Default for TaskingCell<P> {
    fn default() -> Self {
        TaskingCell::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::platform::mock::{MockCpu, MockElf, MockFs, MockMemory, MockPlatform};

    #[test]
    fn empty_cell_answers_none() {
        let cell: TaskingCell<MockPlatform> = TaskingCell::new();
        assert_eq!(cell.with(|k| k.ticks()), None);
    }

    #[test]
    fn initialized_cell_shares_one_instance() {
        let cell: TaskingCell<MockPlatform> = TaskingCell::new();
        cell.init(Tasking::new(
            MockCpu::new(),
            MockMemory::new(),
            MockFs::new(),
            MockElf::default(),
        ));

        cell.with(|k| k.setup(0x20_0000)).expect("cell")
            .expect("setup");
        let kt = cell.with(|k| k.kernel_thread()).flatten();
        assert!(kt.is_some());
        assert_eq!(cell.with(|k| k.thread_self()).flatten(), kt);
    }
}
