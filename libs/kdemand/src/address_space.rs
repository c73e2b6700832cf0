// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::vec::Vec;

use crate::frame_alloc::FrameAllocator;
use crate::{
    Arch, Error, Listing, PageFaultFlags, PhysicalAddress, Region, RegionMap, Result,
    VirtualAddress, Walker,
};

/// The on-demand paged part of a process-like context.
///
/// Allocation only reserves virtual memory. Pages are backed when they are first touched, i.e. when
/// the fault entry path calls [`AddressSpace::handle_fault`], and are released again on
/// [`AddressSpace::free`].
///
/// Dropping an address space without calling [`AddressSpace::deinit`] leaks every table and page
/// it still owns.
pub struct AddressSpace<A, F> {
    arch: A,
    frame_alloc: F,
    root: PhysicalAddress,
    map: RegionMap,
}

impl<A: Arch, F: FrameAllocator> AddressSpace<A, F> {
    /// Creates an address space that manages [`RegionMap::DEFAULT_RANGE`] in the currently active
    /// translation hierarchy.
    ///
    /// # Safety
    ///
    /// The active root table must stay valid for the lifetime of the address space, nothing else
    /// may modify the part of the hierarchy covering the managed range, and all tables within it
    /// must have been allocated through `frame_alloc`.
    pub unsafe fn new(arch: A, frame_alloc: F) -> Self {
        let root = arch.active_table();

        // Safety: ensured by the caller
        unsafe { Self::with_root(arch, frame_alloc, root, RegionMap::new()) }
    }

    /// Creates an address space that manages the range of `map` in the hierarchy rooted at `root`.
    ///
    /// # Safety
    ///
    /// Same as [`AddressSpace::new`], for the root table at `root`.
    pub unsafe fn with_root(arch: A, frame_alloc: F, root: PhysicalAddress, map: RegionMap) -> Self {
        log::debug!("managing {:?} in hierarchy {root}", map.range());

        Self {
            arch,
            frame_alloc,
            root,
            map,
        }
    }

    pub fn arch(&self) -> &A {
        &self.arch
    }

    pub fn frame_allocator(&self) -> &F {
        &self.frame_alloc
    }

    /// Returns the physical address of the root table this address space operates on.
    pub fn root(&self) -> PhysicalAddress {
        self.root
    }

    pub fn region_map(&self) -> &RegionMap {
        &self.map
    }

    fn walker(&self) -> Walker<'_, A> {
        // Safety: the constructor made sure we own this part of the hierarchy
        unsafe { Walker::new(&self.arch, self.root) }
    }

    /// Reserves `num_pages` pages of virtual memory. No physical memory is committed.
    ///
    /// # Errors
    ///
    /// See [`RegionMap::allocate`].
    pub fn allocate(&mut self, num_pages: usize) -> Result<VirtualAddress> {
        self.map.allocate(num_pages)
    }

    /// Releases the region starting at `address` together with all pages and tables backing it.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFreeTarget`] if `address` does not name an allocated region, in
    /// which case nothing changes.
    pub fn free(&mut self, address: VirtualAddress) -> Result<()> {
        let range = self.map.free(address)?;

        self.walker().reclaim(range, &self.frame_alloc);

        Ok(())
    }

    /// Resolves a page fault at `address` by backing the page with memory.
    ///
    /// Repeated faults on an already backed page succeed without allocating.
    ///
    /// # Errors
    ///
    /// - [`Error::UnmappedFault`] if `address` is not inside an allocated region.
    /// - [`Error::AccessViolation`] if the fault was caused by a protection violation.
    /// - [`Error::OutOfPhysicalMemory`] if a table or the page could not be allocated.
    pub fn handle_fault(&mut self, address: VirtualAddress, flags: PageFaultFlags) -> Result<()> {
        if !self.map.is_mapped(address) {
            log::debug!("page fault at unmapped address {address} ({flags})");
            return Err(Error::UnmappedFault(address));
        }
        if flags.is_protection_violation() {
            log::debug!("access violation at {address} ({flags})");
            return Err(Error::AccessViolation(address));
        }

        let page = self.walker().populate(address, &self.frame_alloc)?;
        log::trace!("resolved page fault at {address} with {page}");

        Ok(())
    }

    /// Returns `true` if `address` is inside an allocated region.
    pub fn is_mapped(&self, address: VirtualAddress) -> bool {
        self.map.is_mapped(address)
    }

    /// Translates `address` into the physical address backing it, `None` if it was never touched
    /// or is not allocated at all.
    pub fn lookup(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        self.walker().translate(address)
    }

    /// Returns the listing of all regions and logs it.
    pub fn dump(&self) -> Listing<'_> {
        let listing = self.map.dump();
        log::info!("{listing}");
        listing
    }

    /// Frees every remaining region and hands back the architecture and frame allocator.
    pub fn deinit(mut self) -> (A, F) {
        let allocated: Vec<_> = self
            .map
            .regions()
            .filter(|region| region.is_allocated())
            .map(Region::start)
            .collect();

        for start in allocated {
            if let Err(err) = self.free(start) {
                log::warn!("failed to free {start} during teardown: {err}");
            }
        }

        debug_assert_eq!(self.map.allocated_bytes(), 0);

        let Self {
            arch, frame_alloc, ..
        } = self;

        (arch, frame_alloc)
    }
}
