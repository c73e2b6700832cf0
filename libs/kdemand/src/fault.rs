// Copyright 2025. Jonas Kruckenberg
//
// Licensed under the Apache License, Version 2.0, <LICENSE-APACHE or
// http://apache.org/licenses/LICENSE-2.0> or the MIT license <LICENSE-MIT or
// http://opensource.org/licenses/MIT>, at your option. This file may not be
// copied, modified, or distributed except according to those terms.

use core::fmt;

bitflags::bitflags! {
    /// The cause of a page fault, as reported by the fault entry path.
    #[derive(Debug, Copy, Clone, Hash, PartialEq, Eq)]
    pub struct PageFaultFlags: u32 {
        /// The translation for the faulting address is not present.
        const NOT_PRESENT = 1 << 0;
        /// The translation exists but the access violated its permissions.
        const PROTECTION = 1 << 1;
    }
}

impl fmt::Display for PageFaultFlags {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        bitflags::parser::to_writer(self, f)
    }
}

impl PageFaultFlags {
    /// Decodes a raw error code, ignoring bits that carry no meaning here.
    pub const fn from_error_code(code: u32) -> Self {
        Self::from_bits_truncate(code)
    }

    pub fn is_protection_violation(self) -> bool {
        self.contains(PageFaultFlags::PROTECTION)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode() {
        assert_eq!(
            PageFaultFlags::from_error_code(1),
            PageFaultFlags::NOT_PRESENT
        );
        assert!(PageFaultFlags::from_error_code(2).is_protection_violation());
        assert!(!PageFaultFlags::from_error_code(0xf0 | 1).is_protection_violation());
        assert_eq!(PageFaultFlags::from_error_code(0xf0), PageFaultFlags::empty());
    }

    #[test]
    fn display() {
        let flags = PageFaultFlags::NOT_PRESENT | PageFaultFlags::PROTECTION;

        assert_eq!(flags.to_string(), "NOT_PRESENT | PROTECTION");
    }
}
