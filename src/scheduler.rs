//! # Registry and Scheduler
//!
//! The process-wide task state: the thread and process lists, the FIFO
//! ready queue, the currently-running slot, and every operation that
//! mutates them. All mutations happen inside an atomic section;
//! [`Tasking::preempt`] runs in interrupt context where interrupts are
//! already suspended.

use alloc::collections::VecDeque;
use alloc::vec::Vec;

use crate::context::Context;
use crate::platform::{AddressSpaces, Cpu, Platform};
use crate::process::{Process, ProcessId, ProcessState, TaskFlags};
use crate::stack::{Stack, STACK_SIZE};
use crate::thread::{Thread, ThreadId, ThreadState, WaitInfo, WaitTarget};
use crate::TaskingError;

/// Timer frequency driving preemption.
pub const TIMER_HZ: u32 = 100;

/// Interrupt line the scheduler is bound to.
pub const TIMER_IRQ_LINE: u8 = 0;

/// The task-management subsystem. One instance exists for the kernel's
/// lifetime; the platform's timer interrupt stub feeds it via
/// [`Tasking::preempt`].
pub struct Tasking<P: Platform> {
    pub(crate) cpu: P::Cpu,
    pub(crate) memory: P::Memory,
    pub(crate) fs: P::Fs,
    pub(crate) elf: P::Elf,

    pub(crate) threads: Vec<Thread>,
    pub(crate) processes: Vec<Process>,

    /// Runnable threads, excluding the current one. Strict FIFO.
    pub(crate) ready: VecDeque<ThreadId>,
    pub(crate) current: Option<ThreadId>,

    next_thread_id: u64,
    next_process_id: u64,
    ticks: u64,

    kernel_process: Option<ProcessId>,
    kernel_thread: Option<ThreadId>,
}

impl<P: Platform> Tasking<P> {
    pub fn new(cpu: P::Cpu, memory: P::Memory, fs: P::Fs, elf: P::Elf) -> Self {
        Tasking {
            cpu,
            memory,
            fs,
            elf,
            threads: Vec::new(),
            processes: Vec::new(),
            ready: VecDeque::new(),
            current: None,
            next_thread_id: 0,
            next_process_id: 0,
            ticks: 0,
            kernel_process: None,
            kernel_thread: None,
        }
    }

    /// Initialize the subsystem: create the kernel process and its
    /// initial thread, rebind that thread to the boot stack handed over
    /// by early startup code, program the timer and bind the scheduler
    /// to its interrupt line. Called exactly once at kernel start.
    pub fn setup(&mut self, boot_stack_bottom: u64) -> Result<(), TaskingError> {
        let kernel_process = self.process_create("kernel", TaskFlags::empty());
        self.kernel_process = Some(kernel_process);

        let kernel_thread = self.thread_create(kernel_process, 0, 0, TaskFlags::empty())?;
        self.kernel_thread = Some(kernel_thread);

        // The boot thread is already running on the boot stack; the
        // freshly allocated one is dropped in its favor.
        let boot_stack = Stack::adopt(boot_stack_bottom, STACK_SIZE);
        let boot_top = boot_stack.top();
        if let Some(thread) = self.thread_mut(kernel_thread) {
            thread.stack = boot_stack;
            thread.context.rsp = boot_top - 8;
        }

        self.cpu.timer_set_frequency(TIMER_HZ);
        self.cpu.install_interrupt_handler(TIMER_IRQ_LINE);
        log::info!("tasking up: timer at {}hz on line {}", TIMER_HZ, TIMER_IRQ_LINE);

        Ok(())
    }

    /// Run `f` with interrupt delivery suspended. The sole mutual
    /// exclusion primitive; its only job is to exclude the timer
    /// interrupt on the single CPU.
    pub(crate) fn atomic<R>(&mut self, f: impl FnOnce(&mut Self) -> R) -> R {
        let were_enabled = self.cpu.interrupts_enabled();
        self.cpu.disable_interrupts();

        let result = f(self);

        if were_enabled {
            self.cpu.enable_interrupts();
        }
        result
    }

    // --- Lookup ----------------------------------------------------------

    pub fn thread_get(&self, id: ThreadId) -> Option<&Thread> {
        self.threads.iter().find(|t| t.id == id)
    }

    pub fn process_get(&self, id: ProcessId) -> Option<&Process> {
        self.processes.iter().find(|p| p.id == id)
    }

    fn thread_mut(&mut self, id: ThreadId) -> Option<&mut Thread> {
        self.threads.iter_mut().find(|t| t.id == id)
    }

    fn process_mut(&mut self, id: ProcessId) -> Option<&mut Process> {
        self.processes.iter_mut().find(|p| p.id == id)
    }

    /// Identifier of the currently running thread; `None` before setup.
    pub fn thread_self(&self) -> Option<ThreadId> {
        self.current
    }

    /// Identifier of the currently running thread's process.
    pub fn process_self(&self) -> Option<ProcessId> {
        self.current
            .and_then(|id| self.thread_get(id))
            .map(|t| t.process)
    }

    pub fn kernel_process(&self) -> Option<ProcessId> {
        self.kernel_process
    }

    pub fn kernel_thread(&self) -> Option<ThreadId> {
        self.kernel_thread
    }

    /// Timer interrupts observed so far.
    pub fn ticks(&self) -> u64 {
        self.ticks
    }

    pub fn thread_count(&self) -> usize {
        self.threads.len()
    }

    pub fn process_count(&self) -> usize {
        self.processes.len()
    }

    // --- Creation --------------------------------------------------------

    fn alloc_thread(
        &mut self,
        process: ProcessId,
        entry: u64,
        arg: u64,
        flags: TaskFlags,
    ) -> Result<ThreadId, TaskingError> {
        let stack = Stack::allocate().ok_or(TaskingError::OutOfMemory)?;

        let id = ThreadId(self.next_thread_id);
        self.next_thread_id += 1;

        let context = Context::new(entry, arg, stack.top(), flags.mode());
        log::debug!(
            "thread {} allocated (stack={:#x}..{:#x}, rsp={:#x})",
            id.0,
            stack.bottom(),
            stack.top(),
            context.rsp
        );

        self.threads.push(Thread {
            id,
            state: ThreadState::Running,
            context,
            stack,
            process,
            wait: None,
        });
        Ok(id)
    }

    /// Create a thread in `process`, starting at `entry` with `arg` in
    /// the first argument register. The thread inherits the process's
    /// flags merged with `flags`. It is appended to the ready queue, or
    /// becomes the running thread immediately if nothing is running yet.
    pub fn thread_create(
        &mut self,
        process: ProcessId,
        entry: u64,
        arg: u64,
        flags: TaskFlags,
    ) -> Result<ThreadId, TaskingError> {
        self.atomic(|k| {
            let merged = match k.process_get(process) {
                Some(p) => p.flags | flags,
                None => return Err(TaskingError::ProcessNotFound),
            };

            let id = k.alloc_thread(process, entry, arg, merged)?;
            if let Some(p) = k.process_mut(process) {
                p.threads.push(id);
            }

            if k.current.is_some() {
                k.ready.push_back(id);
            } else {
                k.current = Some(id);
            }

            if let Some(p) = k.process_get(process) {
                log::info!(
                    "thread {} running in process '{}' ({})",
                    id.0,
                    p.name(),
                    process.0
                );
            }
            Ok(id)
        })
    }

    /// Create a process. `TaskFlags::USER` gives it a fresh address
    /// space; otherwise it shares the singleton kernel space.
    pub fn process_create(&mut self, name: &str, flags: TaskFlags) -> ProcessId {
        self.atomic(|k| {
            let id = ProcessId(k.next_process_id);
            k.next_process_id += 1;

            let space = if flags.contains(TaskFlags::USER) {
                k.memory.create()
            } else {
                k.memory.kernel_space()
            };

            let process = Process::new(id, name, flags, space);
            log::info!(
                "process '{}' ({}) allocated, space={:#x}",
                process.name(),
                id.0,
                space.0
            );
            k.processes.push(process);
            id
        })
    }

    // --- Wait / notify ---------------------------------------------------

    /// Block the current thread until `target` terminates. The outcome
    /// code lands in the caller's wait slot when notify releases it.
    pub fn thread_wait_thread(&mut self, target: ThreadId) -> Result<(), TaskingError> {
        self.atomic(|k| {
            if k.thread_get(target).is_none() {
                return Err(TaskingError::ThreadNotFound);
            }
            k.block_current(WaitTarget::Thread(target), ThreadState::WaitThread)
        })
    }

    /// Block the current thread until `target` terminates.
    pub fn thread_wait_process(&mut self, target: ProcessId) -> Result<(), TaskingError> {
        self.atomic(|k| {
            if k.process_get(target).is_none() {
                return Err(TaskingError::ProcessNotFound);
            }
            k.block_current(WaitTarget::Process(target), ThreadState::WaitProcess)
        })
    }

    fn block_current(&mut self, target: WaitTarget, state: ThreadState) -> Result<(), TaskingError> {
        let current = self.current.ok_or(TaskingError::NoCurrentThread)?;
        let thread = self.thread_mut(current).ok_or(TaskingError::ThreadNotFound)?;
        thread.wait = Some(WaitInfo { target, outcome: 0 });
        thread.state = state;
        Ok(())
    }

    /// Release every thread blocked on `target`, writing `outcome` into
    /// each one's wait slot. Broadcast: all matching waiters wake, and
    /// all see the same outcome.
    fn notify(&mut self, target: WaitTarget, outcome: i32) {
        let mut released: Vec<ThreadId> = Vec::new();

        for thread in self.threads.iter_mut() {
            let is_waiting = matches!(
                thread.state,
                ThreadState::WaitThread | ThreadState::WaitProcess
            );
            if !is_waiting {
                continue;
            }
            if let Some(wait) = thread.wait.as_mut() {
                if wait.target == target {
                    wait.outcome = outcome;
                    thread.state = ThreadState::Running;
                    released.push(thread.id);
                }
            }
        }

        for id in released {
            // The current thread is never queued; if it released itself
            // the next preempt re-enqueues it as a Running current.
            if Some(id) != self.current {
                self.ready.push_back(id);
            }
        }
    }

    // --- Termination -----------------------------------------------------

    /// Mark `target` canceled and release its waiters with outcome 0.
    /// The thread is never resumed; it is reaped at the next scheduling
    /// point. An error means the lookup failed.
    pub fn thread_cancel(&mut self, target: ThreadId) -> Result<(), TaskingError> {
        self.atomic(|k| {
            let thread = k.thread_mut(target).ok_or(TaskingError::ThreadNotFound)?;
            thread.state = ThreadState::Canceled;
            k.notify(WaitTarget::Thread(target), 0);
            log::info!("thread {} canceled", target.0);
            Ok(())
        })
    }

    /// Terminate the current thread, delivering `code` to its waiters.
    /// The caller is never scheduled again; it must not return to
    /// thread code after this.
    pub fn thread_exit(&mut self, code: i32) {
        self.atomic(|k| {
            let Some(current) = k.current else { return };
            if let Some(thread) = k.thread_mut(current) {
                thread.state = ThreadState::Canceled;
            }
            k.notify(WaitTarget::Thread(current), code);
            log::info!("thread {} exited with code {}", current.0, code);
        });
    }

    /// Mark `target` canceled and release its waiters with outcome -1.
    /// Refused for the kernel process.
    pub fn process_cancel(&mut self, target: ProcessId) -> Result<(), TaskingError> {
        self.atomic(|k| {
            if Some(target) == k.kernel_process {
                log::warn!("refusing to cancel the kernel process");
                return Err(TaskingError::KernelProcessProtected);
            }

            let process = k.process_mut(target).ok_or(TaskingError::ProcessNotFound)?;
            process.state = ProcessState::Canceled;
            k.notify(WaitTarget::Process(target), -1);
            log::info!("process {} canceled", target.0);
            Ok(())
        })
    }

    /// Terminate the current thread's process, delivering `code` to its
    /// waiters. The calling thread goes down with it and is never
    /// scheduled again. Refused when called from the kernel process.
    pub fn process_exit(&mut self, code: i32) -> Result<(), TaskingError> {
        self.atomic(|k| {
            let current = k.process_self().ok_or(TaskingError::NoCurrentThread)?;
            if Some(current) == k.kernel_process {
                log::warn!("kernel process tried to exit");
                return Err(TaskingError::KernelProcessProtected);
            }

            if let Some(process) = k.process_mut(current) {
                process.state = ProcessState::Canceled;
            }
            // Retiring the caller lets the reap path empty the member
            // list and take the process's address space with it.
            if let Some(thread) = k.current.and_then(|id| k.thread_mut(id)) {
                thread.state = ThreadState::Canceled;
            }
            k.notify(WaitTarget::Process(current), code);
            log::info!("process {} exited with code {}", current.0, code);
            Ok(())
        })
    }

    /// Unlink a terminated thread from its process and the registry and
    /// free its stack. A process whose member list empties is destroyed
    /// with it. Destruction here is silent: only cancel and exit notify
    /// waiters, so a process that dies by losing its last thread
    /// releases no process waiters.
    fn reap(&mut self, id: ThreadId) {
        let Some(index) = self.threads.iter().position(|t| t.id == id) else {
            return;
        };
        let thread = self.threads.remove(index);
        let process_id = thread.process;

        let mut destroy = false;
        if let Some(process) = self.process_mut(process_id) {
            process.threads.retain(|&t| t != id);
            destroy = process.threads.is_empty();
        }
        if destroy {
            self.destroy_process(process_id);
        }
        log::debug!("thread {} reaped", id.0);
    }

    /// Remove a process from the registry, releasing its address space
    /// unless it is the kernel space. Safe to call twice; the second
    /// call finds nothing.
    pub(crate) fn destroy_process(&mut self, id: ProcessId) {
        let Some(index) = self.processes.iter().position(|p| p.id == id) else {
            return;
        };
        let process = self.processes.remove(index);
        if process.space != self.memory.kernel_space() {
            self.memory.destroy(process.space);
        }
        log::info!("process '{}' ({}) destroyed", process.name(), id.0);
    }

    // --- Memory on behalf of a process -----------------------------------

    /// Map `pages` pages at `vaddr` into `process`'s address space.
    pub fn process_map(
        &mut self,
        process: ProcessId,
        vaddr: u64,
        pages: usize,
    ) -> Result<(), TaskingError> {
        self.atomic(|k| {
            let space = k
                .process_get(process)
                .ok_or(TaskingError::ProcessNotFound)?
                .space;
            k.memory
                .map(space, vaddr, pages, true)
                .map_err(|_| TaskingError::OutOfMemory)
        })
    }

    /// Unmap `pages` pages at `vaddr` from `process`'s address space.
    pub fn process_unmap(
        &mut self,
        process: ProcessId,
        vaddr: u64,
        pages: usize,
    ) -> Result<(), TaskingError> {
        self.atomic(|k| {
            let space = k
                .process_get(process)
                .ok_or(TaskingError::ProcessNotFound)?
                .space;
            k.memory.unmap(space, vaddr, pages);
            Ok(())
        })
    }

    // --- Scheduling ------------------------------------------------------

    /// The timer-interrupt entry point and the system's only
    /// context-switch point. Takes the preempted thread's saved context,
    /// rotates the ready queue, installs the successor's stack and
    /// address space, and returns the context the interrupt-return path
    /// must restore. Runs with interrupts already suspended.
    pub fn preempt(&mut self, saved: Context) -> Context {
        self.ticks += 1;

        let Some(current_id) = self.current else {
            // Nothing is scheduled yet; resume the interrupted code.
            return saved;
        };

        // Persist the interrupted context.
        let stored = self.thread_mut(current_id).map(|thread| {
            thread.context = saved;
            let stack = &thread.stack;
            (stack.contains(saved.rsp), stack.bottom(), stack.top(), thread.state)
        });
        let Some((rsp_in_bounds, stack_bottom, stack_top, state)) = stored else {
            log::error!("running thread {} missing from registry", current_id.0);
            self.cpu.halt();
        };

        // Stack overflow or context corruption is unrecoverable.
        if !rsp_in_bounds {
            log::error!(
                "thread {} failed stack sanity check (rsp={:#x}, stack={:#x}..{:#x})",
                current_id.0,
                saved.rsp,
                stack_bottom,
                stack_top
            );
            self.cpu.halt();
        }

        // Rotate: only a still-runnable thread re-enters the queue.
        // Blocked threads leave the rotation until notify reinstates
        // them; canceled threads are reaped here.
        match state {
            ThreadState::Running => self.ready.push_back(current_id),
            ThreadState::Canceled => self.reap(current_id),
            ThreadState::WaitThread | ThreadState::WaitProcess => {}
        }

        let next_id = loop {
            let Some(id) = self.ready.pop_front() else {
                break None;
            };
            match self.thread_get(id).map(Thread::state) {
                Some(ThreadState::Running) => break Some(id),
                Some(ThreadState::Canceled) => self.reap(id),
                // Blocked threads are never enqueued; stale entries for
                // threads reaped while queued are dropped.
                Some(_) | None => {}
            }
        };
        let Some(next_id) = next_id else {
            log::error!("no runnable thread left");
            self.cpu.halt();
        };

        // Install the successor: privileged-mode stack first, then its
        // process's address space, so the return from this handler runs
        // against the right mappings.
        let installed = self
            .thread_get(next_id)
            .map(|t| (t.stack.top(), t.process, t.context));
        let Some((stack_top, process_id, context)) = installed else {
            log::error!("selected thread {} missing from registry", next_id.0);
            self.cpu.halt();
        };
        let Some(space) = self.process_get(process_id).map(|p| p.space) else {
            log::error!("process {} of thread {} missing", process_id.0, next_id.0);
            self.cpu.halt();
        };

        self.cpu.set_kernel_stack(stack_top);
        self.memory.activate(space);
        self.current = Some(next_id);

        context
    }

    // --- Diagnostics -----------------------------------------------------

    /// Log the state of every thread in the registry. Walks both
    /// registries, so it takes an atomic section like any other access.
    pub fn dump_threads(&mut self) {
        self.atomic(|k| {
            log::info!("threads:");
            for thread in &k.threads {
                let owner = k
                    .process_get(thread.process)
                    .map(|p| p.name())
                    .unwrap_or("?");
                log::info!(
                    "  thread {} process '{}' ({}) state={:?} rsp={:#x} stack={:#x}..{:#x}",
                    thread.id.0,
                    owner,
                    thread.process.0,
                    thread.state,
                    thread.context.rsp,
                    thread.stack.bottom(),
                    thread.stack.top()
                );
            }
        });
    }
}
