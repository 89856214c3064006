//! # Platform Collaborators
//!
//! The task core drives hardware through these four narrow interfaces:
//! CPU primitives, the address-space mapper, the filesystem and the ELF
//! parser. An integrating kernel implements them against its real
//! GDT/IDT, page tables and disk driver; the tests implement them
//! against plain memory.

#[cfg(test)]
pub mod mock;

use alloc::vec::Vec;

/// Handle to a page-mapping structure governing a process's virtual
/// memory. The kernel's own address space is a distinguished singleton
/// shared by every non-user process and is never freed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AddressSpace(pub u64);

/// Handle to an open file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FileHandle(pub u64);

/// A loadable program-header segment of an executable image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ProgramSegment {
    /// Byte offset of the segment's payload within the image.
    pub offset: usize,
    /// Payload size within the image.
    pub filesz: usize,
    /// Destination virtual address.
    pub vaddr: u64,
    /// Size of the destination range; the tail past `filesz` is
    /// zero-filled.
    pub memsz: usize,
}

/// Mapping failure reported by [`AddressSpaces::map`].
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OutOfMemory;

/// Low-level CPU primitives.
pub trait Cpu {
    /// Whether interrupt delivery is currently enabled.
    fn interrupts_enabled(&self) -> bool;

    /// Suspend interrupt delivery (atomic-section begin).
    fn disable_interrupts(&mut self);

    /// Resume interrupt delivery (atomic-section end).
    fn enable_interrupts(&mut self);

    /// Route the given interrupt line to the scheduler entry point. The
    /// platform's stub for that line captures the interrupted context,
    /// passes it to [`crate::Tasking::preempt`] and restores whatever
    /// context comes back.
    fn install_interrupt_handler(&mut self, line: u8);

    /// Program the periodic interval timer.
    fn timer_set_frequency(&mut self, hz: u32);

    /// Set the stack the CPU switches to on the next transition into
    /// privileged mode.
    fn set_kernel_stack(&mut self, top: u64);

    /// Full stop. Never returns; used only for unrecoverable state.
    fn halt(&mut self) -> !;
}

/// Address-space allocation, activation and mapping.
pub trait AddressSpaces {
    /// Allocate a fresh user address space.
    fn create(&mut self) -> AddressSpace;

    /// The singleton kernel address space.
    fn kernel_space(&self) -> AddressSpace;

    /// Release a user address space. Must never be called with the
    /// kernel space.
    fn destroy(&mut self, space: AddressSpace);

    /// Make `space` the active mapping.
    fn activate(&mut self, space: AddressSpace);

    /// The currently active mapping.
    fn active(&self) -> AddressSpace;

    /// Map `pages` pages at `vaddr` in `space`.
    fn map(&mut self, space: AddressSpace, vaddr: u64, pages: usize, user: bool)
        -> Result<(), OutOfMemory>;

    /// Unmap `pages` pages at `vaddr` in `space`.
    fn unmap(&mut self, space: AddressSpace, vaddr: u64, pages: usize);

    /// Zero-fill a range of the *active* space.
    fn zero(&mut self, vaddr: u64, len: usize);

    /// Copy bytes into the *active* space.
    fn write(&mut self, vaddr: u64, bytes: &[u8]);
}

/// Synchronous file reading, just enough to load a program image.
pub trait FileSystem {
    /// Open `path` for reading; `None` when it does not exist.
    fn open(&mut self, path: &str) -> Option<FileHandle>;

    /// Read the entire contents into an owned buffer.
    fn read_all(&mut self, file: FileHandle) -> Vec<u8>;

    fn close(&mut self, file: FileHandle);
}

/// Executable-image parsing.
pub trait ElfParser {
    /// Whether `image` is a well-formed executable for this machine.
    fn validate(&self, image: &[u8]) -> bool;

    /// The entry virtual address. Meaningful only for a valid image.
    fn entry(&self, image: &[u8]) -> u64;

    /// The loadable segment at `index`, in index order; `None` past the
    /// last one.
    fn segment(&self, image: &[u8], index: usize) -> Option<ProgramSegment>;
}

/// The bundle of collaborator implementations an integrating kernel
/// supplies to [`crate::Tasking`].
pub trait Platform {
    type Cpu: Cpu;
    type Memory: AddressSpaces;
    type Fs: FileSystem;
    type Elf: ElfParser;
}
