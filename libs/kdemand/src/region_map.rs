// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use alloc::collections::BTreeMap;
use core::fmt;
use core::ops::Range;

use crate::arch::x86_64::PAGE_SIZE;
use crate::error::{bail, ensure};
use crate::{Error, Region, RegionState, Result, VirtualAddress};

pub const REGION_START: VirtualAddress = VirtualAddress::new(0x1000_0000_0000);
pub const REGION_END: VirtualAddress = VirtualAddress::new(0x1000_4000_0000);

/// Bookkeeping for which parts of the managed virtual range are handed out.
///
/// The map always covers its whole range with contiguous, non-overlapping regions in
/// ascending address order, and no two neighbouring regions are ever both free.
pub struct RegionMap {
    /// Regions keyed by their start address.
    regions: BTreeMap<VirtualAddress, Region>,
    range: Range<VirtualAddress>,
}

impl Default for RegionMap {
    fn default() -> Self {
        Self::new()
    }
}

impl RegionMap {
    pub const DEFAULT_RANGE: Range<VirtualAddress> = REGION_START..REGION_END;

    /// Returns a map over [`Self::DEFAULT_RANGE`] consisting of a single free region.
    pub fn new() -> Self {
        Self::new_unchecked(Self::DEFAULT_RANGE)
    }

    /// Returns a map over `range` consisting of a single free region.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidRange`] if `range` is empty or either bound is not page aligned.
    pub fn with_range(range: Range<VirtualAddress>) -> Result<Self> {
        ensure!(
            range.start < range.end
                && range.start.is_aligned_to(PAGE_SIZE)
                && range.end.is_aligned_to(PAGE_SIZE),
            Error::InvalidRange,
            "cannot manage {range:?}"
        );

        Ok(Self::new_unchecked(range))
    }

    fn new_unchecked(range: Range<VirtualAddress>) -> Self {
        let whole = Region::new(
            range.start,
            range.end.offset_from_unsigned(range.start),
            RegionState::Free,
        );

        let mut regions = BTreeMap::new();
        regions.insert(whole.start, whole);

        Self { regions, range }
    }

    /// The range of virtual memory this map manages.
    pub fn range(&self) -> &Range<VirtualAddress> {
        &self.range
    }

    /// Reserves `num_pages` contiguous pages and returns the start of the reservation.
    ///
    /// The lowest free region that is large enough is split, nothing is backed by physical memory.
    ///
    /// # Errors
    ///
    /// Returns [`Error::ZeroSizedAllocation`] if `num_pages` is zero and [`Error::OutOfVirtualSpace`]
    /// if no free region can hold the request.
    pub fn allocate(&mut self, num_pages: usize) -> Result<VirtualAddress> {
        ensure!(num_pages > 0, Error::ZeroSizedAllocation);
        let size = num_pages
            .checked_mul(PAGE_SIZE)
            .ok_or(Error::OutOfVirtualSpace)?;

        let Some(region) = self
            .regions
            .values_mut()
            .find(|region| region.is_free() && region.size >= size)
        else {
            log::debug!("no free region can hold {num_pages} pages");
            return Err(Error::OutOfVirtualSpace);
        };

        let start = region.start;
        let remainder = region.size - size;

        region.size = size;
        region.state = RegionState::Allocated;

        if remainder > 0 {
            let tail = Region::new(start.add(size), remainder, RegionState::Free);
            log::debug!("split off {tail}");
            self.regions.insert(tail.start, tail);
        }

        log::debug!("allocated {num_pages} pages at {start}");

        if cfg!(debug_assertions) {
            self.assert_valid("[RegionMap::allocate] ");
        }

        Ok(start)
    }

    /// Returns `true` if `address` lies inside an allocated region.
    pub fn is_mapped(&self, address: VirtualAddress) -> bool {
        self.region_containing(address)
            .is_some_and(Region::is_allocated)
    }

    /// Returns the region (free or allocated) that contains `address`.
    pub fn region_containing(&self, address: VirtualAddress) -> Option<&Region> {
        let (_, region) = self.regions.range(..=address).next_back()?;

        region.contains(address).then_some(region)
    }

    /// Releases the allocated region starting at the page containing `address` and merges it with
    /// free neighbours.
    ///
    /// Returns the extent of the released region, so the caller can tear down its mappings.
    ///
    /// # Errors
    ///
    /// Returns [`Error::InvalidFreeTarget`] if `address` does not lie in the first page of an
    /// allocated region. The map is left unchanged in that case.
    pub fn free(&mut self, address: VirtualAddress) -> Result<Range<VirtualAddress>> {
        let start = address.align_down(PAGE_SIZE);

        let Some(region) = self
            .regions
            .get_mut(&start)
            .filter(|region| region.is_allocated())
        else {
            bail!(
                Error::InvalidFreeTarget(address),
                "{address} is not the start of an allocated region"
            );
        };

        region.state = RegionState::Free;
        let freed = region.range();
        log::debug!("freed {region}");

        self.coalesce(start);

        if cfg!(debug_assertions) {
            self.assert_valid("[RegionMap::free] ");
        }

        Ok(freed)
    }

    /// Merges the free region at `start` with its predecessor and successor, if they are free too.
    fn coalesce(&mut self, start: VirtualAddress) {
        let Some(mut merged) = self.regions.remove(&start) else {
            return;
        };
        debug_assert!(merged.is_free());

        let prev_start = self
            .regions
            .range(..start)
            .next_back()
            .filter(|(_, prev)| prev.is_free())
            .map(|(prev_start, _)| *prev_start);

        if let Some(prev) = prev_start.and_then(|prev_start| self.regions.remove(&prev_start)) {
            log::debug!("coalescing with preceding {prev}");
            merged.start = prev.start;
            merged.size += prev.size;
        }

        let next_start = merged.end();
        if self.regions.get(&next_start).is_some_and(Region::is_free)
            && let Some(next) = self.regions.remove(&next_start)
        {
            log::debug!("coalescing with following {next}");
            merged.size += next.size;
        }

        self.regions.insert(merged.start, merged);
    }

    /// Returns an iterator over all regions in ascending address order.
    pub fn regions(&self) -> impl DoubleEndedIterator<Item = &Region> + ExactSizeIterator {
        self.regions.values()
    }

    /// The number of bytes currently handed out.
    pub fn allocated_bytes(&self) -> usize {
        self.regions()
            .filter(|region| region.is_allocated())
            .map(Region::size)
            .sum()
    }

    /// Returns a read-only, ordered listing of all regions for diagnostics.
    pub fn dump(&self) -> Listing<'_> {
        Listing { map: self }
    }

    /// # Panics
    ///
    /// Panics if the regions do not exactly tile the managed range, or if two neighbouring regions
    /// are both free.
    pub fn assert_valid(&self, msg: &str) {
        let mut expected_start = self.range.start;
        let mut prev_free = false;

        for (key, region) in &self.regions {
            region.assert_valid(msg);

            assert_eq!(
                *key, region.start,
                "{msg}region is stored under the wrong key; region={region:?}"
            );
            assert_eq!(
                region.start, expected_start,
                "{msg}region must start where the previous one ended; region={region:?}"
            );
            assert!(
                !(prev_free && region.is_free()),
                "{msg}neighbouring regions cannot both be free; region={region:?}"
            );

            expected_start = region.end();
            prev_free = region.is_free();
        }

        assert_eq!(
            expected_start, self.range.end,
            "{msg}regions must cover the managed range exactly"
        );
    }
}

/// Diagnostic listing of a [`RegionMap`], one region per line.
pub struct Listing<'a> {
    map: &'a RegionMap,
}

impl Listing<'_> {
    pub fn regions(&self) -> impl DoubleEndedIterator<Item = &Region> + ExactSizeIterator {
        self.map.regions()
    }
}

impl fmt::Display for Listing<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let range = self.map.range();
        write!(
            f,
            "{}..{} ({:#x} bytes allocated)",
            range.start,
            range.end,
            self.map.allocated_bytes()
        )?;

        for region in self.map.regions() {
            write!(f, "\n  {region}")?;
        }

        Ok(())
    }
}
