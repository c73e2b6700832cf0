// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::alloc::Layout;
use core::fmt::Formatter;

use crate::arch::x86_64::PAGE_SIZE;
use crate::{Arch, PhysicalAddress};

#[derive(Debug, Copy, Clone, PartialEq, Eq)]
pub struct AllocError;

impl core::fmt::Display for AllocError {
    fn fmt(&self, f: &mut Formatter<'_>) -> core::fmt::Result {
        f.write_str("physical memory allocation failed")
    }
}

impl core::error::Error for AllocError {}

/// The layout of a single page frame, used for both page tables and data pages.
pub const FRAME_LAYOUT: Layout = match Layout::from_size_align(PAGE_SIZE, PAGE_SIZE) {
    Ok(layout) => layout,
    Err(_) => panic!("page size must be a power of two"),
};

/// An implementation of `FrameAllocator` can allocate and deallocate physical memory blocks
/// described via [`Layout`].
///
/// # Safety
///
/// Memory blocks that are currently allocated by an allocator, must point to valid memory, and
/// retain their validity until either:
///
/// - the memory block is deallocated, or
/// - the allocator is dropped.
///
/// Copying, cloning, or moving the allocator must not invalidate memory blocks returned from it.
/// A copied or cloned allocator must behave like the original allocator.
pub unsafe trait FrameAllocator {
    /// Attempts to allocate a contiguous block of physical memory.
    ///
    /// On success, returns a [`PhysicalAddress`] meeting the size and alignment guarantees
    /// of `layout`. The contents of the block are unspecified.
    ///
    /// # Errors
    ///
    /// Returning `Err` indicates that either memory is exhausted or `layout` does not meet
    /// allocator's size or alignment constraints.
    fn allocate_contiguous(&self, layout: Layout) -> Result<PhysicalAddress, AllocError>;

    /// Behaves like [`allocate_contiguous`][Self::allocate_contiguous] but also fills the block
    /// with zeroes through the architecture's view of physical memory.
    ///
    /// # Errors
    ///
    /// Returning `Err` indicates that either memory is exhausted or `layout` does not meet
    /// allocator's size or alignment constraints.
    fn allocate_contiguous_zeroed<A: Arch>(
        &self,
        layout: Layout,
        arch: &A,
    ) -> Result<PhysicalAddress, AllocError> {
        let frame = self.allocate_contiguous(layout)?;
        let page = arch.phys_to_virt(frame);

        // Safety: the block was just allocated for `layout` and is accessible through `phys_to_virt`.
        unsafe {
            arch.write_bytes(page, 0, layout.size());
        }

        Ok(frame)
    }

    /// Deallocates the block of memory referenced by `block`.
    ///
    /// # Safety
    ///
    /// 1. `block` must denote a block of frames *currently allocated* via this allocator, and
    /// 2. `layout` must *fit* that block of frames.
    unsafe fn deallocate(&self, block: PhysicalAddress, layout: Layout);
}

// Safety: we just forward to the inner implementation
unsafe impl<F> FrameAllocator for &F
where
    F: FrameAllocator + ?Sized,
{
    fn allocate_contiguous(&self, layout: Layout) -> Result<PhysicalAddress, AllocError> {
        (**self).allocate_contiguous(layout)
    }

    unsafe fn deallocate(&self, block: PhysicalAddress, layout: Layout) {
        // Safety: ensured by caller
        unsafe { (**self).deallocate(block, layout) }
    }
}
