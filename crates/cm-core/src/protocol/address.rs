//! Device addressing.

use std::fmt;

use super::constants::{DEFAULT_CHIP_ADDRESS, MAX_CHIP_ADDRESS};

/// 4-bit device address. Several chips can share one bus; each answers only
/// to commands whose opcode high nibble matches its DCR chip-select field.
#[derive(Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChipAddress(u8);

impl ChipAddress {
    /// Returns `None` for addresses that do not fit the chip-select nibble.
    pub const fn new(addr: u8) -> Option<Self> {
        if addr > MAX_CHIP_ADDRESS {
            None
        } else {
            Some(Self(addr))
        }
    }

    pub const fn value(self) -> u8 {
        self.0
    }
}

impl Default for ChipAddress {
    fn default() -> Self {
        Self(DEFAULT_CHIP_ADDRESS)
    }
}

impl fmt::Debug for ChipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ChipAddress(0x{:X})", self.0)
    }
}

impl fmt::Display for ChipAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "0x{:X}", self.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_address_range() {
        assert!(ChipAddress::new(0x0F).is_some());
        assert!(ChipAddress::new(0x10).is_none());
        assert_eq!(ChipAddress::default().value(), 0x0B);
    }
}
