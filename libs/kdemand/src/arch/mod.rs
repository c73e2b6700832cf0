// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

pub mod x86_64;

use core::ptr;

use crate::{PhysicalAddress, VirtualAddress};

/// Architecture-specific memory subsystem primitives.
pub trait Arch {
    /// Returns the physical address of the currently active root page table of the calling CPU.
    fn active_table(&self) -> PhysicalAddress;

    /// Evicts any cached translation for the page containing `address` from the calling CPU's
    /// translation caches.
    ///
    /// Must be called after a present mapping was modified or removed, otherwise the CPU is free
    /// to keep using the stale translation.
    fn fence(&self, address: VirtualAddress);

    /// Translates the physical address of page table memory into a virtual address that the
    /// calling CPU can dereference.
    fn phys_to_virt(&self, address: PhysicalAddress) -> VirtualAddress;

    /// The inverse of [`Self::phys_to_virt`].
    fn virt_to_phys(&self, address: VirtualAddress) -> PhysicalAddress;

    /// Reads the value from `address` without moving it. This leaves the memory in `address` unchanged.
    ///
    /// # Safety
    ///
    /// This method largely inherits the safety requirements of [`ptr::read`], namely
    /// behavior is undefined if any of the following conditions are violated:
    ///
    /// - `address` must be valid for reads.
    /// - `address` must be properly aligned.
    /// - `address` must point to a properly initialized value of type T.
    unsafe fn read<T>(&self, address: VirtualAddress) -> T {
        // Safety: ensured by the caller.
        unsafe { address.as_ptr().cast::<T>().read() }
    }

    /// Overwrites the memory location pointed to by `address` with the given value without reading
    /// or dropping the old value.
    ///
    /// # Safety
    ///
    /// This method largely inherits the safety requirements of [`ptr::write`], namely
    /// behavior is undefined if any of the following conditions are violated:
    ///
    /// - `address` must be valid for writes.
    /// - `address` must be properly aligned.
    unsafe fn write<T>(&self, address: VirtualAddress, value: T) {
        // Safety: ensured by the caller.
        unsafe { address.as_mut_ptr().cast::<T>().write(value) }
    }

    /// Sets `count` bytes of memory starting at `address` to `val`.
    ///
    /// # Safety
    ///
    /// This method largely inherits the safety requirements of [`ptr::write_bytes`], namely
    /// behavior is undefined if any of the following conditions are violated:
    ///
    /// - `address` must be valid for writes of `count` bytes.
    /// - `address` must be properly aligned.
    unsafe fn write_bytes(&self, address: VirtualAddress, value: u8, count: usize) {
        // Safety: ensured by the caller.
        unsafe { ptr::write_bytes(address.as_mut_ptr(), value, count) }
    }
}
