//! In-memory collaborator implementations used by the tests.
//!
//! The address-space model is byte-accurate: `zero`/`write` land in the
//! *active* space, exactly the discipline the exec path must follow, so
//! a test can observe whether segment bytes ended up in the right space
//! at the right addresses.

use alloc::collections::BTreeMap;
use alloc::string::String;
use alloc::vec::Vec;

use super::{
    AddressSpace, AddressSpaces, Cpu, ElfParser, FileHandle, FileSystem, OutOfMemory, Platform,
    ProgramSegment,
};

/// Byte read from an address nothing ever wrote to.
pub const UNTOUCHED: u8 = 0xEE;

#[derive(Debug, Default)]
pub struct MockCpu {
    pub interrupts: bool,
    pub kernel_stack: u64,
    pub timer_hz: Option<u32>,
    pub handler_line: Option<u8>,
    /// Times interrupt delivery was suspended.
    pub disables: usize,
}

impl MockCpu {
    pub fn new() -> Self {
        MockCpu {
            interrupts: true,
            ..MockCpu::default()
        }
    }
}

impl Cpu for MockCpu {
    fn interrupts_enabled(&self) -> bool {
        self.interrupts
    }

    fn disable_interrupts(&mut self) {
        self.interrupts = false;
        self.disables += 1;
    }

    fn enable_interrupts(&mut self) {
        self.interrupts = true;
    }

    fn install_interrupt_handler(&mut self, line: u8) {
        self.handler_line = Some(line);
    }

    fn timer_set_frequency(&mut self, hz: u32) {
        self.timer_hz = Some(hz);
    }

    fn set_kernel_stack(&mut self, top: u64) {
        self.kernel_stack = top;
    }

    fn halt(&mut self) -> ! {
        panic!("cpu halted");
    }
}

#[derive(Debug, Default)]
struct SpaceMemory {
    /// (vaddr, pages) of every successful `map` call.
    mapped: Vec<(u64, usize)>,
    bytes: BTreeMap<u64, u8>,
}

const KERNEL_SPACE: AddressSpace = AddressSpace(1);

#[derive(Debug)]
pub struct MockMemory {
    spaces: BTreeMap<u64, SpaceMemory>,
    active: AddressSpace,
    next: u64,
    pub destroyed: Vec<AddressSpace>,
    pub fail_map: bool,
}

impl MockMemory {
    pub fn new() -> Self {
        let mut spaces = BTreeMap::new();
        spaces.insert(KERNEL_SPACE.0, SpaceMemory::default());
        MockMemory {
            spaces,
            active: KERNEL_SPACE,
            next: 2,
            destroyed: Vec::new(),
            fail_map: false,
        }
    }

    /// Bytes at `vaddr..vaddr + len` in `space`; [`UNTOUCHED`] where
    /// nothing was written.
    pub fn read(&self, space: AddressSpace, vaddr: u64, len: usize) -> Vec<u8> {
        let memory = self.spaces.get(&space.0);
        (0..len as u64)
            .map(|i| {
                memory
                    .and_then(|m| m.bytes.get(&(vaddr + i)).copied())
                    .unwrap_or(UNTOUCHED)
            })
            .collect()
    }

    /// Regions mapped into `space`, in call order.
    pub fn mappings(&self, space: AddressSpace) -> &[(u64, usize)] {
        self.spaces
            .get(&space.0)
            .map(|m| m.mapped.as_slice())
            .unwrap_or(&[])
    }
}

impl Default for MockMemory {
    fn default() -> Self {
        MockMemory::new()
    }
}

impl AddressSpaces for MockMemory {
    fn create(&mut self) -> AddressSpace {
        let space = AddressSpace(self.next);
        self.next += 1;
        self.spaces.insert(space.0, SpaceMemory::default());
        space
    }

    fn kernel_space(&self) -> AddressSpace {
        KERNEL_SPACE
    }

    fn destroy(&mut self, space: AddressSpace) {
        assert_ne!(space, KERNEL_SPACE, "kernel space must never be freed");
        self.spaces.remove(&space.0);
        self.destroyed.push(space);
    }

    fn activate(&mut self, space: AddressSpace) {
        self.active = space;
    }

    fn active(&self) -> AddressSpace {
        self.active
    }

    fn map(
        &mut self,
        space: AddressSpace,
        vaddr: u64,
        pages: usize,
        _user: bool,
    ) -> Result<(), OutOfMemory> {
        if self.fail_map {
            return Err(OutOfMemory);
        }
        self.spaces
            .get_mut(&space.0)
            .ok_or(OutOfMemory)?
            .mapped
            .push((vaddr, pages));
        Ok(())
    }

    fn unmap(&mut self, space: AddressSpace, vaddr: u64, pages: usize) {
        if let Some(memory) = self.spaces.get_mut(&space.0) {
            memory.mapped.retain(|&(addr, count)| (addr, count) != (vaddr, pages));
        }
    }

    fn zero(&mut self, vaddr: u64, len: usize) {
        if let Some(memory) = self.spaces.get_mut(&self.active.0) {
            for i in 0..len as u64 {
                memory.bytes.insert(vaddr + i, 0);
            }
        }
    }

    fn write(&mut self, vaddr: u64, bytes: &[u8]) {
        if let Some(memory) = self.spaces.get_mut(&self.active.0) {
            for (i, &b) in bytes.iter().enumerate() {
                memory.bytes.insert(vaddr + i as u64, b);
            }
        }
    }
}

#[derive(Debug, Default)]
pub struct MockFs {
    files: Vec<(String, Vec<u8>)>,
    pub closed: usize,
}

impl MockFs {
    pub fn new() -> Self {
        MockFs::default()
    }

    pub fn with_file(mut self, path: &str, contents: Vec<u8>) -> Self {
        self.files.push((String::from(path), contents));
        self
    }
}

impl FileSystem for MockFs {
    fn open(&mut self, path: &str) -> Option<FileHandle> {
        self.files
            .iter()
            .position(|(name, _)| name == path)
            .map(|index| FileHandle(index as u64))
    }

    fn read_all(&mut self, file: FileHandle) -> Vec<u8> {
        self.files[file.0 as usize].1.clone()
    }

    fn close(&mut self, _file: FileHandle) {
        self.closed += 1;
    }
}

/// Magic the mock parser accepts, same as the real format's.
pub const ELF_MAGIC: [u8; 4] = [0x7f, b'E', b'L', b'F'];

/// Parser double: validates the magic, serves a configured entry point
/// and segment table.
#[derive(Debug, Default)]
pub struct MockElf {
    pub entry: u64,
    pub segments: Vec<ProgramSegment>,
}

impl ElfParser for MockElf {
    fn validate(&self, image: &[u8]) -> bool {
        image.starts_with(&ELF_MAGIC)
    }

    fn entry(&self, _image: &[u8]) -> u64 {
        self.entry
    }

    fn segment(&self, _image: &[u8], index: usize) -> Option<ProgramSegment> {
        self.segments.get(index).copied()
    }
}

pub struct MockPlatform;

impl Platform for MockPlatform {
    type Cpu = MockCpu;
    type Memory = MockMemory;
    type Fs = MockFs;
    type Elf = MockElf;
}
