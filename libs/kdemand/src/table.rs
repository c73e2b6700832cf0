// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::arch::x86_64::{ENTRIES_PER_TABLE, INDEX_BITS, LEVELS, index_shift};
use crate::{Arch, PageTableEntry, PhysicalAddress, VirtualAddress};

/// A page table. Essentially a fixed-sized list of [`PageTableEntry`]s.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct Table {
    base: PhysicalAddress,
    depth: usize,
}

impl Table {
    /// Constructs a `Table` from its raw components: the base address and its depth in the page table hierarchy.
    ///
    /// # Safety
    ///
    /// 1. The base address must indeed point to a page table.
    /// 2. The table must indeed be at the given depth in the hierarchy.
    /// 3. The caller must have exclusive access to the table memory for as long as the handle is used.
    pub(crate) unsafe fn from_raw_parts(base: PhysicalAddress, depth: usize, arch: &impl Arch) -> Self {
        debug_assert!(depth < LEVELS);
        debug_assert_eq!(arch.virt_to_phys(arch.phys_to_virt(base)), base);

        Self { base, depth }
    }

    /// Returns the depth of this table in the page table hierarchy.
    ///
    /// `0` represents the root page table.
    pub(crate) const fn depth(&self) -> usize {
        self.depth
    }

    /// Returns `true` if this table holds the leaf entries, i.e. the ones mapping data pages.
    pub(crate) const fn is_leaf(&self) -> bool {
        self.depth == LEVELS - 1
    }

    /// Returns the base address of this page table.
    pub(crate) const fn address(&self) -> PhysicalAddress {
        self.base
    }

    /// Returns `true` when _all_ page table entries in this table are _vacant_.
    pub(crate) fn is_empty(&self, arch: &impl Arch) -> bool {
        (0..ENTRIES_PER_TABLE).all(|index| {
            // Safety: `index` is always in-bounds
            let entry = unsafe { self.get(index, arch) };

            !entry.is_present()
        })
    }

    /// Returns the entry at the given `index` without moving it. This leaves the entry unchanged.
    ///
    /// # Safety
    ///
    /// The caller must ensure `index` is in-bounds (less than [`ENTRIES_PER_TABLE`]).
    pub(crate) unsafe fn get(&self, index: usize, arch: &impl Arch) -> PageTableEntry {
        debug_assert!(index < ENTRIES_PER_TABLE);

        let entry_phys = self.base.add(index * size_of::<PageTableEntry>());
        let entry_virt = arch.phys_to_virt(entry_phys);

        // Safety: The address is always well aligned by the way we calculate it above, `0` is a valid
        // pattern for `PageTableEntry` and the caller of `from_raw_parts` promised the memory is a table.
        unsafe { arch.read(entry_virt) }
    }

    /// Overrides the entry at the given `index` without reading or dropping the old value.
    ///
    /// # Safety
    ///
    /// The caller must ensure `index` is in-bounds (less than [`ENTRIES_PER_TABLE`]).
    pub(crate) unsafe fn set(&mut self, index: usize, entry: PageTableEntry, arch: &impl Arch) {
        debug_assert!(index < ENTRIES_PER_TABLE);

        let entry_phys = self.base.add(index * size_of::<PageTableEntry>());
        let entry_virt = arch.phys_to_virt(entry_phys);

        // Safety: see `get`, exclusive access was promised by the caller of `from_raw_parts`.
        unsafe { arch.write(entry_virt, entry) };
    }
}

/// The per-level table indices of a virtual address, root first.
///
/// Besides slicing an address, this doubles as a mixed-radix counter over the page-granular
/// positions of the translation hierarchy: every digit wraps at [`ENTRIES_PER_TABLE`] and carries
/// into the next-coarser one.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct TableIndices([usize; LEVELS]);

impl TableIndices {
    const MASK: usize = ENTRIES_PER_TABLE - 1;

    /// Slices `address` into its four table indices. The page offset is ignored.
    pub fn of(address: VirtualAddress) -> Self {
        let mut indices = [0; LEVELS];
        for (depth, index) in indices.iter_mut().enumerate() {
            *index = (address.get() >> index_shift(depth)) & Self::MASK;
        }
        Self(indices)
    }

    /// Returns the index into the table at `depth`.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is not a valid table depth.
    pub fn get(&self, depth: usize) -> usize {
        self.0[depth]
    }

    /// Returns the number of pages from the current position up to the end of the entry selected at
    /// `depth`, including the current page.
    ///
    /// When an entry at `depth` is absent, this is exactly the number of page slots that can be
    /// skipped without visiting them.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is not a valid table depth.
    pub fn pages_remaining_under(&self, depth: usize) -> usize {
        assert!(depth < LEVELS);

        let levels_below = LEVELS - 1 - depth;
        let offset = self.0[depth + 1..]
            .iter()
            .fold(0, |acc, index| (acc << INDEX_BITS) | index);

        (1 << (INDEX_BITS * levels_below)) - offset
    }

    /// Sets every index below `depth` to zero, so the position points at the first page covered by
    /// the current entry at `depth`.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is not a valid table depth.
    pub fn reset_below(&mut self, depth: usize) {
        self.0[depth + 1..].fill(0);
    }

    /// Advances the index at `depth` by one. Returns `true` if it wrapped around to zero, in which
    /// case the caller is responsible for carrying into `depth - 1`.
    ///
    /// # Panics
    ///
    /// Panics if `depth` is not a valid table depth.
    pub fn step(&mut self, depth: usize) -> bool {
        self.0[depth] = (self.0[depth] + 1) & Self::MASK;
        self.0[depth] == 0
    }
}

impl fmt::Debug for TableIndices {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_list().entries(self.0).finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::arch::x86_64::PAGE_SIZE;

    #[test]
    fn slicing() {
        let indices = TableIndices::of(VirtualAddress::new(0x0000_7fbf_dfef_f123));
        assert_eq!(indices, TableIndices([0xff, 0xff, 0xff, 0xff]));

        let address = (3 << 39) | (5 << 30) | (7 << 21) | (9 << 12) | 0x123;
        let indices = TableIndices::of(VirtualAddress::new(address));
        assert_eq!(indices.get(0), 3);
        assert_eq!(indices.get(1), 5);
        assert_eq!(indices.get(2), 7);
        assert_eq!(indices.get(3), 9);

        let start = TableIndices::of(VirtualAddress::new(0x1000_0000_0000));
        assert_eq!(format!("{start:?}"), "[32, 0, 0, 0]");
    }

    #[test]
    fn remaining_pages() {
        let indices = TableIndices::of(VirtualAddress::new(0x1000_0000_0000 + 3 * PAGE_SIZE));

        assert_eq!(indices.pages_remaining_under(3), 1);
        assert_eq!(indices.pages_remaining_under(2), 512 - 3);
        assert_eq!(indices.pages_remaining_under(1), 512 * 512 - 3);
        assert_eq!(indices.pages_remaining_under(0), 512 * 512 * 512 - 3);

        let aligned = TableIndices::of(VirtualAddress::new(0x1000_0020_0000));
        assert_eq!(aligned.pages_remaining_under(2), 512);
    }

    #[test]
    fn odometer_carries() {
        let mut indices = TableIndices([0, 0, 511, 511]);

        assert!(indices.step(3));
        assert!(indices.step(2));
        assert!(!indices.step(1));
        assert_eq!(indices, TableIndices([0, 1, 0, 0]));

        let mut indices = TableIndices([3, 7, 9, 11]);
        indices.reset_below(1);
        assert_eq!(indices, TableIndices([3, 7, 0, 0]));
    }

    proptest::proptest! {
        // Stepping the leaf digit with carries must visit exactly the same positions as slicing
        // consecutive page addresses.
        #[test]
        fn stepping_matches_address_slicing(page in 0usize..(1 << 36) - 2048, steps in 0usize..2048) {
            let start = VirtualAddress::new(page * PAGE_SIZE);
            let mut indices = TableIndices::of(start);

            for _ in 0..steps {
                let mut depth = LEVELS - 1;
                while indices.step(depth) && depth > 0 {
                    depth -= 1;
                }
            }

            proptest::prop_assert_eq!(indices, TableIndices::of(start.add(steps * PAGE_SIZE)));
        }

        // Skipping the remaining pages under an entry lands exactly on the next entry boundary.
        #[test]
        fn skip_lands_on_boundary(page in 0usize..(1 << 35), depth in 0usize..LEVELS) {
            let start = VirtualAddress::new(page * PAGE_SIZE);
            let skip = TableIndices::of(start).pages_remaining_under(depth);
            let next = start.add(skip * PAGE_SIZE);

            proptest::prop_assert!(next.is_aligned_to(1 << index_shift(depth)));
            proptest::prop_assert!(skip >= 1);
            proptest::prop_assert!(skip <= 1 << (INDEX_BITS * (LEVELS - 1 - depth)));
        }
    }
}
