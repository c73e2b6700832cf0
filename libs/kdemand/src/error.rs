// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

use crate::VirtualAddress;
use crate::frame_alloc::AllocError;

pub type Result<T> = core::result::Result<T, Error>;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// No free region is large enough to satisfy an allocation.
    OutOfVirtualSpace,
    /// A page fault hit an address outside any allocated region.
    UnmappedFault(VirtualAddress),
    /// The frame allocator could not supply a page for a table or a data page.
    OutOfPhysicalMemory,
    /// The address is not the start of an allocated region.
    InvalidFreeTarget(VirtualAddress),
    /// A protection fault on an allocated, present page.
    AccessViolation(VirtualAddress),
    /// The managed range is empty or not page aligned.
    InvalidRange,
    /// An allocation of zero pages was requested.
    ZeroSizedAllocation,
}

impl From<AllocError> for Error {
    fn from(_: AllocError) -> Self {
        Self::OutOfPhysicalMemory
    }
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::OutOfVirtualSpace => f.write_str("out of virtual address space"),
            Error::UnmappedFault(address) => {
                write!(f, "page fault at unmapped address {address}")
            }
            Error::OutOfPhysicalMemory => f.write_str("out of physical memory"),
            Error::InvalidFreeTarget(address) => {
                write!(f, "{address} is not the start of an allocated region")
            }
            Error::AccessViolation(address) => write!(f, "access violation at {address}"),
            Error::InvalidRange => f.write_str("managed range must be non-empty and page aligned"),
            Error::ZeroSizedAllocation => f.write_str("cannot allocate zero pages"),
        }
    }
}

impl core::error::Error for Error {}

macro_rules! ensure {
    ($cond:expr, $error:expr, $($msg:tt)+) => {
        if !$cond {
            log::warn!($($msg)+);
            return Err($error);
        }
    };
    ($cond:expr, $error:expr) => {
        if !$cond {
            return Err($error);
        }
    };
}

macro_rules! bail {
    ($error:expr) => {
        return Err($error)
    };
    ($error:expr, $($msg:tt)+) => {{
        log::warn!($($msg)+);
        return Err($error);
    }};
}

pub(crate) use {bail, ensure};
