// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use crate::PhysicalAddress;
use crate::arch::x86_64::PAGE_SHIFT;

mycelium_bitfield::bitfield! {
    /// A single slot of an x86-64 page table, at any level of the hierarchy.
    ///
    /// The all-zero pattern is the vacant entry.
    #[derive(PartialEq, Eq)]
    pub struct PageTableEntry<usize> {
        /// The entry references a next-level table or a data page.
        pub const PRESENT: bool;
        /// Writes are allowed through this entry.
        pub const WRITABLE: bool;
        /// User mode accesses are allowed through this entry.
        pub const USER: bool;
        pub const WRITE_THROUGH: bool;
        pub const CACHE_DISABLE: bool;
        /// Set by the CPU when the entry was used for a translation.
        pub const ACCESSED: bool;
        /// Set by the CPU when the page was written to. Leaf entries only.
        pub const DIRTY: bool;
        /// Maps a large page instead of referencing a table. Never set by this crate.
        pub const HUGE: bool;
        pub const GLOBAL: bool;
        /// Available for use by the kernel.
        const _AVAILABLE = 3;
        /// The physical frame number of the referenced table or page.
        const FRAME = 40;
        /// Available for use by the kernel.
        const _AVAILABLE_HIGH = 11;
        pub const NO_EXECUTE: bool;
    }
}

impl PageTableEntry {
    pub const VACANT: Self = Self::new();

    fn present_user_writable(address: PhysicalAddress) -> Self {
        debug_assert!(address.is_aligned_to(1 << PAGE_SHIFT));

        Self::new()
            .with(Self::PRESENT, true)
            .with(Self::WRITABLE, true)
            .with(Self::USER, true)
            .with(Self::FRAME, address.get() >> PAGE_SHIFT)
    }

    /// Returns a new entry referencing the next-level table at `address`.
    ///
    /// Access rights of intermediate entries are permissive, the effective rights are determined by
    /// the leaf entry.
    pub fn new_table(address: PhysicalAddress) -> Self {
        Self::present_user_writable(address)
    }

    /// Returns a new leaf entry mapping the data page at `address`.
    pub fn new_page(address: PhysicalAddress) -> Self {
        Self::present_user_writable(address)
    }

    pub fn is_present(self) -> bool {
        self.get(Self::PRESENT)
    }

    /// Returns the physical address stored in this entry, regardless of whether it is present.
    pub fn address(self) -> PhysicalAddress {
        PhysicalAddress::new(self.get(Self::FRAME) << PAGE_SHIFT)
    }

    /// Returns the next-level table this entry references, `None` when the entry is absent.
    pub fn next_table(self) -> Option<PhysicalAddress> {
        self.is_present().then(|| self.address())
    }

    /// Returns the data page this leaf entry maps, `None` when the entry is absent.
    pub fn page(self) -> Option<PhysicalAddress> {
        self.next_table()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn vacant() {
        let entry = PageTableEntry::VACANT;

        assert!(!entry.is_present());
        assert_eq!(entry.next_table(), None);
        assert_eq!(entry.page(), None);
        assert_eq!(entry, PageTableEntry::new());
    }

    #[test]
    fn table_entry() {
        let entry = PageTableEntry::new_table(PhysicalAddress::new(0x0012_3456_7000));

        assert!(entry.is_present());
        assert!(entry.get(PageTableEntry::WRITABLE));
        assert!(entry.get(PageTableEntry::USER));
        assert!(!entry.get(PageTableEntry::HUGE));
        assert!(!entry.get(PageTableEntry::NO_EXECUTE));
        assert_eq!(
            entry.next_table(),
            Some(PhysicalAddress::new(0x0012_3456_7000))
        );
    }

    #[test]
    fn hardware_bit_positions() {
        let entry = PageTableEntry::new_page(PhysicalAddress::new(0x5000));

        // present | writable | user, frame number 5 in bits 12..52
        assert_eq!(entry.0, 0x5007);

        let entry = entry
            .with(PageTableEntry::ACCESSED, true)
            .with(PageTableEntry::DIRTY, true)
            .with(PageTableEntry::NO_EXECUTE, true);
        assert_eq!(entry.0, 0x8000_0000_0000_5067);
    }

    #[test]
    fn accessors_take_entries_by_value() {
        let entries = [
            PageTableEntry::VACANT,
            PageTableEntry::new_page(PhysicalAddress::new(0x7000)),
        ];

        let pages: Vec<_> = entries.into_iter().map(PageTableEntry::page).collect();
        assert_eq!(pages, [None, Some(PhysicalAddress::new(0x7000))]);
        assert_eq!(
            entries.map(PageTableEntry::is_present),
            [false, true]
        );
    }

    #[test]
    fn cleared_entry_keeps_nothing_reachable() {
        let entry = PageTableEntry::new_page(PhysicalAddress::new(0xf000))
            .with(PageTableEntry::PRESENT, false);

        assert_eq!(entry.page(), None);
        assert_eq!(entry.address(), PhysicalAddress::new(0xf000));
    }
}
