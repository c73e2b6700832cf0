// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

#![cfg_attr(not(test), no_std)]

//! On-demand paging for a bounded window of virtual memory.
//!
//! The crate is split into two cooperating halves:
//!
//! - The [`RegionMap`] partitions the managed window into contiguous [`Region`]s that are either
//!   free or allocated. Allocation only touches this bookkeeping, no physical memory is committed.
//! - The [`Walker`] operates on the live 4-level translation hierarchy. It materializes missing
//!   tables and the backing page when an allocated address is first touched (page-fault driven),
//!   and it tears mappings down again on free, releasing every table that became empty.
//!
//! [`AddressSpace`] composes both halves into the object a process-like context owns.
//!
//! ## Collaborators
//!
//! Physical memory is obtained through a [`FrameAllocator`](frame_alloc::FrameAllocator), while
//! access to the active root table, translation cache invalidation and the physical-to-virtual
//! translation of table memory is provided by an [`Arch`] implementation.
//!
//! ## Concurrency
//!
//! Nothing in here synchronizes. All operations on one [`AddressSpace`] must be serialized by the
//! caller, [`trap::handle_page_fault`] shows how this looks when the space lives behind a
//! [`lock_api::Mutex`].

#[cfg(not(target_pointer_width = "64"))]
compile_error!("4-level paging requires a 64-bit target");

extern crate alloc;

mod address;
mod address_space;
pub mod arch;
mod entry;
mod error;
mod fault;
pub mod frame_alloc;
mod region;
mod region_map;
mod table;
#[cfg(test)]
mod test_utils;
pub mod trap;
mod walker;

pub use address::{AddressRangeExt, PhysicalAddress, VirtualAddress};
pub use address_space::AddressSpace;
pub use arch::Arch;
pub use arch::x86_64::{ENTRIES_PER_TABLE, LEVELS, PAGE_SIZE};
pub use entry::PageTableEntry;
pub use error::{Error, Result};
pub use fault::PageFaultFlags;
pub use region::{Region, RegionState};
pub use region_map::{Listing, REGION_END, REGION_START, RegionMap};
pub use table::TableIndices;
pub use walker::Walker;

pub const KIB: usize = 1024;
pub const MIB: usize = KIB * 1024;
pub const GIB: usize = MIB * 1024;
