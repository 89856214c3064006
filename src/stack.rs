//! # Stack Regions
//!
//! Every thread exclusively owns one fixed-size stack. Regions are
//! allocated zeroed from the heap and freed exactly once, when the
//! owning thread is destroyed. The kernel's initial thread is special:
//! it adopts the boot stack handed over by early startup code, which is
//! never freed.

use alloc::alloc::{alloc_zeroed, dealloc, Layout};
use core::ptr::NonNull;

/// Size of every thread stack.
pub const STACK_SIZE: usize = 64 * 1024;

const STACK_ALIGN: usize = 16;

/// A thread's stack region. Grows downward from [`Stack::top`].
pub struct Stack {
    bottom: u64,
    size: usize,
    /// `Some` for heap-backed regions we must free, `None` for the
    /// adopted boot stack.
    owned: Option<NonNull<u8>>,
}

// The region is exclusively owned; the raw pointer is only an
// allocation handle.
unsafe impl Send for Stack {}

impl Stack {
    /// Allocate a zeroed [`STACK_SIZE`]-byte region.
    pub fn allocate() -> Option<Self> {
        let layout = Layout::from_size_align(STACK_SIZE, STACK_ALIGN).ok()?;
        let ptr = unsafe { alloc_zeroed(layout) };

        NonNull::new(ptr).map(|bottom| Stack {
            bottom: bottom.as_ptr() as u64,
            size: STACK_SIZE,
            owned: Some(bottom),
        })
    }

    /// Adopt an externally provided region (the boot stack). The region
    /// outlives the subsystem and is never freed here.
    pub fn adopt(bottom: u64, size: usize) -> Self {
        Stack {
            bottom,
            size,
            owned: None,
        }
    }

    /// Low address of the region.
    pub fn bottom(&self) -> u64 {
        self.bottom
    }

    /// High address of the region; the stack grows down from here.
    pub fn top(&self) -> u64 {
        self.bottom + self.size as u64
    }

    pub fn size(&self) -> usize {
        self.size
    }

    /// Whether `addr` lies within `[bottom, top)`.
    pub fn contains(&self, addr: u64) -> bool {
        addr >= self.bottom() && addr < self.top()
    }
}

impl Drop for Stack {
    fn drop(&mut self) {
        if let Some(ptr) = self.owned {
            let layout = Layout::from_size_align(self.size, STACK_ALIGN)
                .expect("stack layout was valid at allocation");
            unsafe {
                dealloc(ptr.as_ptr(), layout);
            }
        }
    }
}
