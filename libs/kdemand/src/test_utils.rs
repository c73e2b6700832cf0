// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! Hosted stand-ins for physical memory and the CPU.
//!
//! Physical addresses are plain heap addresses, so `phys_to_virt` is the identity.

use core::alloc::Layout;
use core::cell::RefCell;
use core::sync::atomic::{AtomicUsize, Ordering};
use std::collections::HashMap;

use parking_lot::Mutex;

use crate::frame_alloc::{AllocError, FRAME_LAYOUT, FrameAllocator};
use crate::{Arch, PhysicalAddress, VirtualAddress};

/// Byte pattern freshly allocated frames are filled with, so missing zeroing shows up in tests.
const POISON: u8 = 0xa5;

/// Frame allocator backed by the host heap that keeps a ledger of every frame it handed out.
///
/// Deallocating a frame that is not currently allocated, or with a different layout, panics.
pub struct TestFrameAllocator {
    frames: Mutex<HashMap<PhysicalAddress, Layout>>,
    limit: Option<usize>,
    allocations: AtomicUsize,
    deallocations: AtomicUsize,
}

impl TestFrameAllocator {
    pub fn new() -> Self {
        Self::new_inner(None)
    }

    /// Returns an allocator that fails once `limit` frames are live at the same time.
    pub fn with_limit(limit: usize) -> Self {
        Self::new_inner(Some(limit))
    }

    fn new_inner(limit: Option<usize>) -> Self {
        Self {
            frames: Mutex::new(HashMap::new()),
            limit,
            allocations: AtomicUsize::new(0),
            deallocations: AtomicUsize::new(0),
        }
    }

    /// The number of frames currently allocated.
    pub fn live_frames(&self) -> usize {
        self.frames.lock().len()
    }

    /// The number of successful allocations so far.
    pub fn allocations(&self) -> usize {
        self.allocations.load(Ordering::Relaxed)
    }

    pub fn deallocations(&self) -> usize {
        self.deallocations.load(Ordering::Relaxed)
    }
}

// Safety: frames come from the global allocator and stay valid until deallocated or dropped
unsafe impl FrameAllocator for TestFrameAllocator {
    fn allocate_contiguous(&self, layout: Layout) -> Result<PhysicalAddress, AllocError> {
        assert_ne!(layout.size(), 0);

        let mut frames = self.frames.lock();
        if self.limit.is_some_and(|limit| frames.len() >= limit) {
            return Err(AllocError);
        }

        // Safety: layout is non-zero sized
        let ptr = unsafe { std::alloc::alloc(layout) };
        if ptr.is_null() {
            return Err(AllocError);
        }
        // Safety: we just allocated `layout.size()` bytes at `ptr`
        unsafe { ptr.write_bytes(POISON, layout.size()) };

        let frame = PhysicalAddress::from_ptr(ptr.cast_const());
        frames.insert(frame, layout);
        self.allocations.fetch_add(1, Ordering::Relaxed);

        Ok(frame)
    }

    unsafe fn deallocate(&self, block: PhysicalAddress, layout: Layout) {
        let recorded = self
            .frames
            .lock()
            .remove(&block)
            .unwrap_or_else(|| panic!("{block} is not allocated (double free?)"));
        assert_eq!(recorded, layout, "{block} deallocated with the wrong layout");

        // Safety: the ledger proves `block` was allocated by us with `layout`
        unsafe { std::alloc::dealloc(block.as_mut_ptr(), layout) };
        self.deallocations.fetch_add(1, Ordering::Relaxed);
    }
}

impl Drop for TestFrameAllocator {
    fn drop(&mut self) {
        for (frame, layout) in self.frames.get_mut().drain() {
            // Safety: every frame in the ledger is still allocated
            unsafe { std::alloc::dealloc(frame.as_mut_ptr(), layout) };
        }
    }
}

/// A single page frame, used as the emulated CPU's root table.
#[repr(C, align(4096))]
struct PageFrame([u8; 4096]);

/// Emulated CPU with an identity mapped view of "physical" (heap) memory.
///
/// The root table is owned by the emulation and not tracked by any frame allocator, just as a
/// context's root table would be set up before on-demand paging starts.
pub struct EmulateArch {
    root: *mut PageFrame,
    fenced: RefCell<Vec<VirtualAddress>>,
}

impl EmulateArch {
    pub fn new() -> Self {
        const { assert!(size_of::<PageFrame>() == FRAME_LAYOUT.size()) };

        Self {
            root: Box::into_raw(Box::new(PageFrame([0; 4096]))),
            fenced: RefCell::new(Vec::new()),
        }
    }

    /// Every address passed to [`Arch::fence`] so far, in order.
    pub fn fenced(&self) -> Vec<VirtualAddress> {
        self.fenced.borrow().clone()
    }
}

impl Drop for EmulateArch {
    fn drop(&mut self) {
        // Safety: `root` came from `Box::into_raw` and is only freed here
        drop(unsafe { Box::from_raw(self.root) });
    }
}

impl Arch for EmulateArch {
    fn active_table(&self) -> PhysicalAddress {
        PhysicalAddress::from_ptr(self.root.cast_const())
    }

    fn fence(&self, address: VirtualAddress) {
        self.fenced.borrow_mut().push(address);
    }

    fn phys_to_virt(&self, address: PhysicalAddress) -> VirtualAddress {
        VirtualAddress::new(address.get())
    }

    fn virt_to_phys(&self, address: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(address.get())
    }
}
