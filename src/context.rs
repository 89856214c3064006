//! # Thread Context
//!
//! The saved register/flags snapshot representing a suspended thread.
//! It is a plain value: the scheduler stores one per thread, the
//! interrupt-return path restores one, and nothing else looks inside.

/// Privilege mode a thread executes in; selects the segment-selector
/// preset of its starting context.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExecutionMode {
    Kernel,
    User,
}

const KERNEL_CODE_SELECTOR: u64 = 0x08;
const KERNEL_DATA_SELECTOR: u64 = 0x10;
const USER_CODE_SELECTOR: u64 = 0x20 | 3;
const USER_DATA_SELECTOR: u64 = 0x18 | 3;

/// RFLAGS with the interrupt-enable bit (and the always-set reserved
/// bit) on, so a freshly resumed thread can be preempted.
const RFLAGS_INTERRUPTS_ENABLED: u64 = 0x202;

/// The complete saved CPU state of a thread.
///
/// Valid only while the thread is not the currently running one; the
/// running thread's live state exists in the registers themselves.
#[repr(C)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Context {
    pub r15: u64,
    pub r14: u64,
    pub r13: u64,
    pub r12: u64,
    pub rbp: u64,
    pub rbx: u64,
    pub r11: u64,
    pub r10: u64,
    pub r9: u64,
    pub r8: u64,
    pub rax: u64,
    pub rcx: u64,
    pub rdx: u64,
    pub rsi: u64,
    pub rdi: u64,
    pub rip: u64,
    pub cs: u64,
    pub rflags: u64,
    pub rsp: u64,
    pub ss: u64,
}

impl Context {
    /// Synthesize the starting state of a thread.
    ///
    /// Resuming this context begins executing `entry` with interrupts
    /// enabled, `arg` in the first argument register, and segment
    /// selectors chosen from the kernel or user preset.
    pub fn new(entry: u64, arg: u64, stack_top: u64, mode: ExecutionMode) -> Self {
        let (cs, ss) = match mode {
            ExecutionMode::Kernel => (KERNEL_CODE_SELECTOR, KERNEL_DATA_SELECTOR),
            ExecutionMode::User => (USER_CODE_SELECTOR, USER_DATA_SELECTOR),
        };

        Context {
            rdi: arg,
            rip: entry,
            cs,
            rflags: RFLAGS_INTERRUPTS_ENABLED,
            // Misaligned by 8, as if a call just pushed a return address.
            rsp: stack_top - 8,
            ss,
            ..Context::zeroed()
        }
    }

    pub const fn zeroed() -> Self {
        Context {
            r15: 0,
            r14: 0,
            r13: 0,
            r12: 0,
            rbp: 0,
            rbx: 0,
            r11: 0,
            r10: 0,
            r9: 0,
            r8: 0,
            rax: 0,
            rcx: 0,
            rdx: 0,
            rsi: 0,
            rdi: 0,
            rip: 0,
            cs: 0,
            rflags: 0,
            rsp: 0,
            ss: 0,
        }
    }
}
