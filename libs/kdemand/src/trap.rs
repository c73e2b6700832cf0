// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::ops::ControlFlow;

use lock_api::{Mutex, RawMutex};

use crate::frame_alloc::FrameAllocator;
use crate::{AddressSpace, Arch, PageFaultFlags, VirtualAddress};

/// Entry point for the page fault trap.
///
/// Returns [`ControlFlow::Break`] if the fault was corrected and the faulting access can be
/// retried, [`ControlFlow::Continue`] if the next handler (usually the one killing the faulting
/// context) should take over.
pub fn handle_page_fault<R, A, F>(
    aspace: &Mutex<R, AddressSpace<A, F>>,
    address: VirtualAddress,
    error_code: u32,
) -> ControlFlow<()>
where
    R: RawMutex,
    A: Arch,
    F: FrameAllocator,
{
    let flags = PageFaultFlags::from_error_code(error_code);
    let mut aspace = aspace.lock();

    if let Err(err) = aspace.handle_fault(address, flags) {
        log::warn!("page fault handler couldn't correct fault {err}");
        ControlFlow::Continue(())
    } else {
        log::trace!("page fault handler successfully corrected fault");
        ControlFlow::Break(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{EmulateArch, TestFrameAllocator};

    #[test_log::test]
    fn corrected_and_rejected_faults() {
        let arch = EmulateArch::new();
        // Safety: the emulated root table is exclusively ours
        let aspace = unsafe { AddressSpace::new(arch, TestFrameAllocator::new()) };
        let aspace: Mutex<parking_lot::RawMutex, _> = Mutex::new(aspace);

        let start = aspace.lock().allocate(1).unwrap();

        assert_eq!(
            handle_page_fault(&aspace, start, 1),
            ControlFlow::Break(())
        );
        assert!(aspace.lock().lookup(start).is_some());

        // protection violation on a backed page
        assert_eq!(
            handle_page_fault(&aspace, start, 2),
            ControlFlow::Continue(())
        );
        // never allocated
        assert_eq!(
            handle_page_fault(&aspace, start.add(0x1000), 1),
            ControlFlow::Continue(())
        );

        let (_arch, frame_alloc) = aspace.into_inner().deinit();
        assert_eq!(frame_alloc.live_frames(), 0);
    }
}
