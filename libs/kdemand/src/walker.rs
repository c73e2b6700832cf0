// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::Range;

use arrayvec::ArrayVec;

use crate::arch::x86_64::{LEVELS, PAGE_SIZE};
use crate::frame_alloc::{FRAME_LAYOUT, FrameAllocator};
use crate::table::Table;
use crate::{
    AddressRangeExt, Arch, PageTableEntry, PhysicalAddress, Result, TableIndices, VirtualAddress,
};

/// The chain of tables from the root down to the deepest table reachable for some address.
type Path = ArrayVec<Table, LEVELS>;

/// Operates on one translation hierarchy, identified by the physical address of its root table.
///
/// The walker creates intermediate tables and data pages on demand ([`Walker::populate`]) and
/// tears them down again ([`Walker::reclaim`]). Every non-root table it hands out is owned by
/// exactly one parent entry, and is returned to the frame allocator as soon as it holds no present
/// entries anymore. The root table is never freed.
pub struct Walker<'a, A> {
    arch: &'a A,
    root: Table,
}

impl<'a, A: Arch> Walker<'a, A> {
    /// Creates a walker for the hierarchy rooted at `root`.
    ///
    /// # Safety
    ///
    /// `root` must be the physical address of a valid root table whose tables were all allocated
    /// by the frame allocator later passed to this walker, and the caller must have exclusive
    /// access to the whole hierarchy for the lifetime of the walker.
    pub unsafe fn new(arch: &'a A, root: PhysicalAddress) -> Self {
        // Safety: ensured by the caller
        let root = unsafe { Table::from_raw_parts(root, 0, arch) };

        Self { arch, root }
    }

    /// Returns the physical address of the root table.
    pub fn root(&self) -> PhysicalAddress {
        self.root.address()
    }

    /// Makes sure the page containing `address` is backed by memory, creating every missing table
    /// along the way. Returns the physical address of the backing page.
    ///
    /// Levels that are already present are left untouched, so populating an address twice
    /// performs no allocations the second time. New tables and data pages are zeroed.
    ///
    /// # Errors
    ///
    /// Returns [`Error::OutOfPhysicalMemory`](crate::Error::OutOfPhysicalMemory) if a table or
    /// the data page could not be allocated. Tables created before the failure stay in place and
    /// are released by a later [`Walker::reclaim`] of the surrounding range.
    pub fn populate<F: FrameAllocator>(
        &mut self,
        address: VirtualAddress,
        frame_alloc: F,
    ) -> Result<PhysicalAddress> {
        let indices = TableIndices::of(address);
        let mut table = self.root;

        loop {
            let index = indices.get(table.depth());

            // Safety: table indices are always in-bounds
            let entry = unsafe { table.get(index, self.arch) };

            if table.is_leaf() {
                if let Some(page) = entry.page() {
                    return Ok(page);
                }

                let page = frame_alloc.allocate_contiguous_zeroed(FRAME_LAYOUT, self.arch)?;

                // Safety: table indices are always in-bounds
                unsafe { table.set(index, PageTableEntry::new_page(page), self.arch) };
                log::trace!("mapped {address} to page {page}");

                return Ok(page);
            }

            let next = match entry.next_table() {
                Some(next) => next,
                None => {
                    let next = frame_alloc.allocate_contiguous_zeroed(FRAME_LAYOUT, self.arch)?;

                    // Safety: table indices are always in-bounds
                    unsafe { table.set(index, PageTableEntry::new_table(next), self.arch) };
                    log::trace!(
                        "created depth {} table {next} for {address}",
                        table.depth() + 1
                    );

                    next
                }
            };

            // Safety: present entries of non-leaf tables always reference a table one level down
            table = unsafe { Table::from_raw_parts(next, table.depth() + 1, self.arch) };
        }
    }

    /// Unmaps every page in `range`, returning the backing pages to `frame_alloc`, and releases
    /// every table that became empty in the process.
    ///
    /// Absent tables are skipped over in a single step, so the cost is proportional to the number
    /// of tables present in the range, not its size.
    ///
    /// # Panics
    ///
    /// Panics if `range` is not page aligned.
    pub fn reclaim<F: FrameAllocator>(&mut self, range: Range<VirtualAddress>, frame_alloc: F) {
        assert!(
            range.start.is_aligned_to(PAGE_SIZE) && range.end.is_aligned_to(PAGE_SIZE),
            "reclaim: {range:?} is not page aligned"
        );

        let pages = range.len() / PAGE_SIZE;
        let mut remaining = pages;
        let mut indices = TableIndices::of(range.start);
        let mut open = Path::new();
        let mut stats = Stats::default();

        while remaining > 0 {
            let mut path = self.descend(&indices);

            let Some(&table) = path.last() else {
                unreachable!("a path always contains the root table");
            };
            let depth = table.depth();

            if table.is_leaf() {
                let address = range.start.add((pages - remaining) * PAGE_SIZE);
                debug_assert_eq!(TableIndices::of(address), indices);

                self.release_page(table, indices.get(depth), address, &frame_alloc, &mut stats);
            }

            // Either we looked at exactly one leaf slot, or the entry at `depth` is absent and
            // everything beneath it can be skipped.
            remaining = remaining.saturating_sub(indices.pages_remaining_under(depth));

            // Advance the counter to the next entry at `depth`, carrying into coarser levels.
            // Every carry moves past the end of a table, which is the moment to release it if
            // nothing in it is present anymore.
            indices.reset_below(depth);
            let mut carry_depth = depth;
            let still_open = loop {
                if !indices.step(carry_depth) {
                    break Some(carry_depth);
                }
                if carry_depth == 0 {
                    break None;
                }

                self.prune(
                    path[carry_depth - 1],
                    indices.get(carry_depth - 1),
                    path[carry_depth],
                    &frame_alloc,
                    &mut stats,
                );
                carry_depth -= 1;
            };

            let Some(still_open) = still_open else {
                log::trace!("reclaim walked past the end of the root table");
                open.clear();
                break;
            };

            path.truncate(still_open + 1);
            open = path;
        }

        // The tables we stopped in were never moved past. Release whatever is empty, bottom up.
        for depth in (1..open.len()).rev() {
            if !self.prune(
                open[depth - 1],
                indices.get(depth - 1),
                open[depth],
                &frame_alloc,
                &mut stats,
            ) {
                break;
            }
        }

        log::trace!(
            "reclaimed {range:?}: released {} pages and {} tables",
            stats.pages,
            stats.tables
        );
    }

    /// Translates `address` into the physical address backing it, if it is mapped.
    pub fn translate(&self, address: VirtualAddress) -> Option<PhysicalAddress> {
        let indices = TableIndices::of(address);
        let path = self.descend(&indices);

        let leaf = path.last().filter(|table| table.is_leaf())?;

        // Safety: table indices are always in-bounds
        let entry = unsafe { leaf.get(indices.get(leaf.depth()), self.arch) };

        Some(entry.page()?.add(address.get() & (PAGE_SIZE - 1)))
    }

    /// Follows `indices` from the root down as far as present entries allow.
    ///
    /// The last table in the returned path is either the leaf table, or a table whose entry for
    /// `indices` is absent.
    fn descend(&self, indices: &TableIndices) -> Path {
        let mut path = Path::new();
        let mut table = self.root;

        loop {
            path.push(table);

            if table.is_leaf() {
                return path;
            }

            // Safety: table indices are always in-bounds
            let entry = unsafe { table.get(indices.get(table.depth()), self.arch) };

            let Some(next) = entry.next_table() else {
                return path;
            };

            // Safety: present entries of non-leaf tables always reference a table one level down
            table = unsafe { Table::from_raw_parts(next, table.depth() + 1, self.arch) };
        }
    }

    fn release_page<F: FrameAllocator>(
        &self,
        mut leaf: Table,
        index: usize,
        address: VirtualAddress,
        frame_alloc: &F,
        stats: &mut Stats,
    ) {
        // Safety: table indices are always in-bounds
        let entry = unsafe { leaf.get(index, self.arch) };

        let Some(page) = entry.page() else {
            return;
        };

        // Safety: table indices are always in-bounds
        unsafe { leaf.set(index, PageTableEntry::VACANT, self.arch) };
        self.arch.fence(address);

        // Safety: data pages are always allocated through the frame allocator with `FRAME_LAYOUT`
        // and the entry we just cleared was the only reference to it.
        unsafe { frame_alloc.deallocate(page, FRAME_LAYOUT) };

        stats.pages += 1;
        log::trace!("unmapped {address}, released page {page}");
    }

    /// Releases `table` if none of its entries are present anymore, clearing the entry at `index`
    /// in `parent` that referenced it. Returns whether the table was released.
    fn prune<F: FrameAllocator>(
        &self,
        mut parent: Table,
        index: usize,
        table: Table,
        frame_alloc: &F,
        stats: &mut Stats,
    ) -> bool {
        debug_assert_eq!(parent.depth() + 1, table.depth());

        if !table.is_empty(self.arch) {
            return false;
        }

        // Safety: table indices are always in-bounds
        unsafe {
            debug_assert_eq!(parent.get(index, self.arch).next_table(), Some(table.address()));
            parent.set(index, PageTableEntry::VACANT, self.arch);
        }

        // Safety: tables are always allocated through the frame allocator with `FRAME_LAYOUT`
        // and the parent entry we just cleared was the only reference to it.
        unsafe { frame_alloc.deallocate(table.address(), FRAME_LAYOUT) };

        stats.tables += 1;
        log::trace!(
            "released empty depth {} table {}",
            table.depth(),
            table.address()
        );

        true
    }
}

#[derive(Default)]
struct Stats {
    pages: usize,
    tables: usize,
}
