// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

//! The x86-64 4-level paging layout.
//!
//! A virtual address is sliced into four 9-bit table indices followed by a 12-bit page offset:
//!
//! ```text
//!  47        39 38        30 29        21 20        12 11           0
//! +------------+------------+------------+------------+--------------+
//! |    root    |   upper    |   middle   |    leaf    |    offset    |
//! +------------+------------+------------+------------+--------------+
//! ```

use crate::VirtualAddress;
#[cfg(target_arch = "x86_64")]
use crate::{Arch, PhysicalAddress};

pub const PAGE_SHIFT: usize = 12;
pub const PAGE_SIZE: usize = 1 << PAGE_SHIFT;
pub const INDEX_BITS: usize = 9;
pub const ENTRIES_PER_TABLE: usize = 1 << INDEX_BITS;
pub const LEVELS: usize = 4;

/// The shift of the index field used by tables at `depth` (`0` being the root).
pub const fn index_shift(depth: usize) -> usize {
    debug_assert!(depth < LEVELS);
    PAGE_SHIFT + INDEX_BITS * (LEVELS - 1 - depth)
}

/// Returns the number of bytes of virtual memory a single entry of a table at `depth` covers.
pub const fn entry_span(depth: usize) -> usize {
    1 << index_shift(depth)
}

/// Bits 12..52 of `CR3` hold the physical base of the root table.
#[cfg(target_arch = "x86_64")]
const CR3_ADDRESS_MASK: usize = 0x000f_ffff_ffff_f000;

/// Bare-metal x86-64 with all of physical memory mapped at `physmap_base`.
pub struct X86_64 {
    physmap_base: VirtualAddress,
}

impl X86_64 {
    pub const fn new(physmap_base: VirtualAddress) -> Self {
        Self { physmap_base }
    }
}

#[cfg(target_arch = "x86_64")]
impl Arch for X86_64 {
    fn active_table(&self) -> PhysicalAddress {
        let cr3: usize;

        // Safety: reading CR3 has no side effects.
        unsafe {
            core::arch::asm!("mov {}, cr3", out(reg) cr3, options(nomem, nostack, preserves_flags));
        }

        PhysicalAddress::new(cr3 & CR3_ADDRESS_MASK)
    }

    fn fence(&self, address: VirtualAddress) {
        // Safety: invalidating a translation is always sound, at worst it costs a page walk.
        unsafe {
            core::arch::asm!("invlpg [{}]", in(reg) address.get(), options(nostack, preserves_flags));
        }
    }

    fn phys_to_virt(&self, address: PhysicalAddress) -> VirtualAddress {
        self.physmap_base.add(address.get())
    }

    fn virt_to_phys(&self, address: VirtualAddress) -> PhysicalAddress {
        PhysicalAddress::new(address.offset_from_unsigned(self.physmap_base))
    }
}
