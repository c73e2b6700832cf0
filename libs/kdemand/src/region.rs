// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;
use core::ops::Range;

use crate::arch::x86_64::PAGE_SIZE;
use crate::{AddressRangeExt, VirtualAddress};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RegionState {
    Free,
    Allocated,
}

/// One contiguous, page-aligned span of the managed virtual range.
#[derive(Clone, PartialEq, Eq)]
pub struct Region {
    pub(crate) start: VirtualAddress,
    pub(crate) size: usize,
    pub(crate) state: RegionState,
}

impl Region {
    pub(crate) fn new(start: VirtualAddress, size: usize, state: RegionState) -> Self {
        Self { start, size, state }
    }

    pub fn start(&self) -> VirtualAddress {
        self.start
    }

    /// The size of this region in bytes. Always a multiple of the page size.
    pub fn size(&self) -> usize {
        self.size
    }

    pub fn state(&self) -> RegionState {
        self.state
    }

    pub fn end(&self) -> VirtualAddress {
        self.start.add(self.size)
    }

    pub fn range(&self) -> Range<VirtualAddress> {
        Range::from_start_len(self.start, self.size)
    }

    pub fn pages(&self) -> usize {
        self.size / PAGE_SIZE
    }

    pub fn is_free(&self) -> bool {
        self.state == RegionState::Free
    }

    pub fn is_allocated(&self) -> bool {
        self.state == RegionState::Allocated
    }

    /// Returns `true` if `address` lies within `start..start + size`.
    pub fn contains(&self, address: VirtualAddress) -> bool {
        self.range().contains(&address)
    }

    /// # Panics
    ///
    /// Panics if the region is empty or not page aligned.
    pub(crate) fn assert_valid(&self, msg: &str) {
        assert!(self.size > 0, "{msg}region cannot be empty; region={self:?}");
        assert!(
            self.start.is_aligned_to(PAGE_SIZE),
            "{msg}region start must be page aligned; region={self:?}"
        );
        assert_eq!(
            self.size % PAGE_SIZE,
            0,
            "{msg}region size must be a multiple of the page size; region={self:?}"
        );
    }
}

impl fmt::Debug for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Region")
            .field("start", &self.start)
            .field("size", &format_args!("{:#x}", self.size))
            .field("state", &self.state)
            .finish()
    }
}

impl fmt::Display for Region {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = match self.state {
            RegionState::Free => "free",
            RegionState::Allocated => "allocated",
        };

        let pages = self.pages();
        let unit = if pages == 1 { "page" } else { "pages" };

        write!(f, "{}..{} {state:<9} ({pages} {unit})", self.start, self.end())
    }
}
