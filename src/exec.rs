//! # Program Loader
//!
//! Turns an executable file into a running process: reads the image,
//! validates it, maps and copies each loadable segment into the new
//! process's address space, then starts a thread at the entry point.
//!
//! Copying into another process's range requires that range to be the
//! active mapping, so each segment copy swaps address spaces inside an
//! atomic section and restores the original before leaving it.

use crate::platform::{AddressSpaces, ElfParser, FileSystem, Platform, ProgramSegment};
use crate::process::{ProcessId, TaskFlags};
use crate::scheduler::Tasking;
use crate::TaskingError;

/// Granularity of segment mappings.
pub const PAGE_SIZE: usize = 4096;

/// Lowest virtual address a program segment may target. Anything below
/// is reserved and rejected.
pub const USER_SPACE_BASE: u64 = 0x10_0000;

fn page_count(len: usize) -> usize {
    (len + PAGE_SIZE - 1) / PAGE_SIZE
}

impl<P: Platform> Tasking<P> {
    /// Execute the file at `path` as a new process.
    ///
    /// The argument vector is accepted for interface parity but not yet
    /// delivered to the new program. Returns the new process identifier;
    /// the entry thread sits in the ready queue awaiting its first slot.
    pub fn process_exec(&mut self, path: &str, _args: &[&str]) -> Result<ProcessId, TaskingError> {
        let Some(file) = self.fs.open(path) else {
            log::warn!("exec: '{}' not found", path);
            return Err(TaskingError::ExecFileNotFound);
        };

        let process = self.process_create(path, TaskFlags::empty());
        let image = self.fs.read_all(file);
        self.fs.close(file);

        if !self.elf.validate(&image) {
            log::warn!("exec: '{}' is not a valid executable image", path);
            self.atomic(|k| k.destroy_process(process));
            return Err(TaskingError::InvalidImage);
        }

        let mut index = 0;
        while let Some(segment) = self.elf.segment(&image, index) {
            self.load_segment(process, &image, segment);
            index += 1;
        }

        let entry = self.elf.entry(&image);
        self.thread_create(process, entry, 0, TaskFlags::empty())?;

        log::info!("exec: '{}' running as process {}", path, process.0);
        Ok(process)
    }

    /// Map, zero-fill and copy one program segment. A segment targeting
    /// reserved low memory is skipped; its siblings still load.
    fn load_segment(&mut self, process: ProcessId, image: &[u8], segment: ProgramSegment) {
        if segment.vaddr < USER_SPACE_BASE {
            log::warn!(
                "exec: segment at {:#x} targets reserved memory, skipped",
                segment.vaddr
            );
            return;
        }

        let Some(space) = self.process_get(process).map(|p| p.space()) else {
            return;
        };

        self.atomic(|k| {
            let previous = k.memory.active();
            k.memory.activate(space);

            let pages = page_count(segment.memsz);
            match k.memory.map(space, segment.vaddr, pages, true) {
                Ok(()) => {
                    k.memory.zero(segment.vaddr, segment.memsz);
                    let end = usize::min(segment.offset + segment.filesz, image.len());
                    if segment.offset < end {
                        k.memory.write(segment.vaddr, &image[segment.offset..end]);
                    }
                }
                Err(_) => {
                    log::error!(
                        "exec: mapping {} pages at {:#x} failed",
                        pages,
                        segment.vaddr
                    );
                }
            }

            k.memory.activate(previous);
        });
    }
}
