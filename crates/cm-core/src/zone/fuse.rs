//! One-way configuration fuses.

use std::fmt;

use crate::protocol::{CM_CMA, CM_FAB, CM_PER, FUSE_BIT_CMA, FUSE_BIT_FAB, FUSE_BIT_PER};

/// A fuse that can be burned exactly once.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fuse {
    /// Fabrication fuse; locks the fab area.
    Fab,
    /// Card manufacturer fuse; locks the manufacturer code.
    Cma,
    /// Personalization fuse; locks the configuration zone.
    Per,
}

impl Fuse {
    /// Burn order enforced by the chip.
    pub const ORDER: [Fuse; 3] = [Fuse::Fab, Fuse::Cma, Fuse::Per];

    /// P2 value of the burn command.
    pub const fn burn_code(self) -> u8 {
        match self {
            Fuse::Fab => CM_FAB,
            Fuse::Cma => CM_CMA,
            Fuse::Per => CM_PER,
        }
    }

    /// Bit in the fuse byte; cleared once burned.
    pub const fn mask(self) -> u8 {
        match self {
            Fuse::Fab => FUSE_BIT_FAB,
            Fuse::Cma => FUSE_BIT_CMA,
            Fuse::Per => FUSE_BIT_PER,
        }
    }

    /// Fuse that must already be burned before this one.
    pub fn prerequisite(self) -> Option<Fuse> {
        match self {
            Fuse::Fab => None,
            Fuse::Cma => Some(Fuse::Fab),
            Fuse::Per => Some(Fuse::Cma),
        }
    }

    pub fn from_burn_code(code: u8) -> Option<Fuse> {
        Self::ORDER.into_iter().find(|f| f.burn_code() == code)
    }
}

impl fmt::Display for Fuse {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Fuse::Fab => write!(f, "FAB"),
            Fuse::Cma => write!(f, "CMA"),
            Fuse::Per => write!(f, "PER"),
        }
    }
}

/// Fuse byte as read from the chip.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct FuseState(u8);

impl FuseState {
    /// Factory state: every fuse intact.
    pub const INTACT: FuseState = FuseState(FUSE_BIT_FAB | FUSE_BIT_CMA | FUSE_BIT_PER);

    pub fn from_byte(byte: u8) -> Self {
        Self(byte)
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_burned(self, fuse: Fuse) -> bool {
        self.0 & fuse.mask() == 0
    }

    /// State after burning `fuse`.
    pub fn burn(self, fuse: Fuse) -> Self {
        Self(self.0 & !fuse.mask())
    }
}

impl Default for FuseState {
    fn default() -> Self {
        Self::INTACT
    }
}

impl fmt::Debug for FuseState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let burned: Vec<String> = Fuse::ORDER
            .into_iter()
            .filter(|&fuse| self.is_burned(fuse))
            .map(|fuse| fuse.to_string())
            .collect();
        write!(f, "FuseState(0x{:02X} burned=[{}])", self.0, burned.join(","))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_burn_clears_bit() {
        let state = FuseState::INTACT;
        assert!(!state.is_burned(Fuse::Fab));

        let state = state.burn(Fuse::Fab);
        assert!(state.is_burned(Fuse::Fab));
        assert!(!state.is_burned(Fuse::Cma));
        assert_eq!(state.burn(Fuse::Fab), state);
    }

    #[test]
    fn test_burn_codes() {
        assert_eq!(Fuse::from_burn_code(0x06), Some(Fuse::Fab));
        assert_eq!(Fuse::from_burn_code(0x04), Some(Fuse::Cma));
        assert_eq!(Fuse::from_burn_code(0x00), Some(Fuse::Per));
        assert_eq!(Fuse::from_burn_code(0x02), None);
        assert_eq!(Fuse::Per.prerequisite(), Some(Fuse::Cma));
    }
}
