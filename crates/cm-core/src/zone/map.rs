//! Configuration zone memory map.
//!
//! Fixed, read-only description of every named region. Regions never
//! overlap; addresses outside all regions are reserved.

use std::fmt;

use super::fuse::Fuse;
use crate::protocol::*;

/// Named configuration zone region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegionKind {
    AnswerToReset,
    FabCode,
    MemoryTest,
    CardManufacturer,
    LotHistory,
    DeviceConfig,
    Identification,
    /// Access/password register pair of a user zone.
    ZoneRegisters(u8),
    IssuerCode,
    /// Attempts counter, cryptogram and session key of a key set.
    Cryptogram(u8),
    /// Secret seed of a key set.
    SecretSeed(u8),
    /// Attempts counter of one password of a set.
    PasswordCounter { set: u8, read: bool },
    /// Write or read password of a set.
    Password { set: u8, read: bool },
}

impl fmt::Display for RegionKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RegionKind::AnswerToReset => write!(f, "ATR"),
            RegionKind::FabCode => write!(f, "FAB"),
            RegionKind::MemoryTest => write!(f, "MTZ"),
            RegionKind::CardManufacturer => write!(f, "CMC"),
            RegionKind::LotHistory => write!(f, "LHC"),
            RegionKind::DeviceConfig => write!(f, "DCR"),
            RegionKind::Identification => write!(f, "IDN"),
            RegionKind::ZoneRegisters(n) => write!(f, "AR{n}/PR{n}"),
            RegionKind::IssuerCode => write!(f, "IC"),
            RegionKind::Cryptogram(n) => write!(f, "CI{n}"),
            RegionKind::SecretSeed(n) => write!(f, "G{n}"),
            RegionKind::PasswordCounter { set, read } => {
                write!(f, "PAC{set}{}", if *read { 'r' } else { 'w' })
            }
            RegionKind::Password { set, read } => {
                write!(f, "PW{set}{}", if *read { 'r' } else { 'w' })
            }
        }
    }
}

/// Who may read a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadRule {
    Free,
    SecureCode,
    Never,
}

/// Who may write a region.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteRule {
    Free,
    SecureCode,
    Never,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Region {
    pub kind: RegionKind,
    pub addr: u8,
    pub len: usize,
    pub read: ReadRule,
    pub write: WriteRule,
    /// Fuse that freezes the region once burned.
    pub lock: Option<Fuse>,
}

impl Region {
    const fn new(
        kind: RegionKind,
        addr: u8,
        len: usize,
        read: ReadRule,
        write: WriteRule,
        lock: Option<Fuse>,
    ) -> Self {
        Self {
            kind,
            addr,
            len,
            read,
            write,
            lock,
        }
    }

    /// First address past the region.
    pub fn end(&self) -> usize {
        self.addr as usize + self.len
    }

    pub fn contains(&self, addr: usize) -> bool {
        addr >= self.addr as usize && addr < self.end()
    }

    /// Whether `[addr, addr + len)` lies entirely inside the region.
    pub fn covers(&self, addr: usize, len: usize) -> bool {
        len > 0 && self.contains(addr) && addr + len <= self.end()
    }
}

/// Region table for a part with `user_zones` user zones.
#[derive(Debug, Clone)]
pub struct MemoryMap {
    regions: Vec<Region>,
}

impl MemoryMap {
    pub fn new(user_zones: u8) -> Self {
        use ReadRule as R;
        use WriteRule as W;

        let per = Some(Fuse::Per);
        let mut regions = vec![
            Region::new(RegionKind::AnswerToReset, ATR_ADDR, ATR_LEN, R::Free, W::Never, None),
            Region::new(RegionKind::FabCode, FAB_ADDR, FAB_LEN, R::Free, W::Never, None),
            Region::new(RegionKind::MemoryTest, MTZ_ADDR, MTZ_LEN, R::Free, W::Free, None),
            Region::new(
                RegionKind::CardManufacturer,
                CMC_ADDR,
                CMC_LEN,
                R::Free,
                W::SecureCode,
                Some(Fuse::Cma),
            ),
            Region::new(RegionKind::LotHistory, LHC_ADDR, LHC_LEN, R::Free, W::Never, None),
            Region::new(RegionKind::DeviceConfig, DCR_ADDR, 1, R::Free, W::SecureCode, per),
            Region::new(RegionKind::Identification, INN_ADDR, INN_LEN, R::Free, W::SecureCode, per),
        ];
        for zone in 0..user_zones {
            regions.push(Region::new(
                RegionKind::ZoneRegisters(zone),
                access_register_addr(zone),
                2,
                R::Free,
                W::SecureCode,
                per,
            ));
        }
        regions.push(Region::new(RegionKind::IssuerCode, IC_ADDR, IC_LEN, R::Free, W::SecureCode, per));
        for set in 0..KEY_SETS {
            regions.push(Region::new(
                RegionKind::Cryptogram(set),
                cryptogram_addr(set),
                CRYPTOGRAM_STRIDE,
                R::Free,
                W::SecureCode,
                per,
            ));
        }
        for set in 0..KEY_SETS {
            regions.push(Region::new(
                RegionKind::SecretSeed(set),
                CM_G + set * SEED_LEN as u8,
                SEED_LEN,
                R::Never,
                W::SecureCode,
                per,
            ));
        }
        // Attempts counters are free-read; passwords need the secure code.
        for set in 0..PASSWORD_SETS {
            for read in [false, true] {
                let pac = password_counter_addr(set, read);
                regions.push(Region::new(
                    RegionKind::PasswordCounter { set, read },
                    pac,
                    1,
                    R::Free,
                    W::SecureCode,
                    None,
                ));
                regions.push(Region::new(
                    RegionKind::Password { set, read },
                    pac + 1,
                    PASSWORD_LEN,
                    R::SecureCode,
                    W::SecureCode,
                    None,
                ));
            }
        }
        Self { regions }
    }

    pub fn regions(&self) -> &[Region] {
        &self.regions
    }

    /// Region containing `addr`, if any.
    pub fn region_at(&self, addr: usize) -> Option<&Region> {
        self.regions.iter().find(|r| r.contains(addr))
    }

    pub fn region(&self, kind: RegionKind) -> Option<&Region> {
        self.regions.iter().find(|r| r.kind == kind)
    }

    /// Region holding all of `[addr, addr + len)`; `None` if the range is
    /// empty, reserved, or spans two regions.
    pub fn locate(&self, addr: usize, len: usize) -> Option<&Region> {
        self.region_at(addr).filter(|r| r.covers(addr, len))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_regions_never_overlap() {
        let map = MemoryMap::new(4);
        let regions = map.regions();
        for (i, a) in regions.iter().enumerate() {
            for b in &regions[i + 1..] {
                assert!(
                    a.end() <= b.addr as usize || b.end() <= a.addr as usize,
                    "{} overlaps {}",
                    a.kind,
                    b.kind
                );
            }
        }
    }

    #[test]
    fn test_header_register_layout() {
        let map = MemoryMap::new(3);
        let zone2 = map.region(RegionKind::ZoneRegisters(2)).unwrap();
        assert_eq!(zone2.addr, PR2_ADDR - 1);
        assert_eq!(zone2.end(), PR2_ADDR as usize + 1);
        assert!(map.region(RegionKind::ZoneRegisters(3)).is_none());

        let dcr = map.region_at(DCR_ADDR as usize).unwrap();
        assert_eq!(dcr.kind, RegionKind::DeviceConfig);
    }

    #[test]
    fn test_reserved_regions_are_immutable() {
        let map = MemoryMap::new(4);
        for kind in [
            RegionKind::AnswerToReset,
            RegionKind::FabCode,
            RegionKind::LotHistory,
        ] {
            assert_eq!(map.region(kind).unwrap().write, WriteRule::Never);
        }
    }

    #[test]
    fn test_locate_rejects_spanning_ranges() {
        let map = MemoryMap::new(4);
        // Within the issuer code.
        assert_eq!(
            map.locate(IC_ADDR as usize + 4, 8).unwrap().kind,
            RegionKind::IssuerCode
        );
        // Fab code into memory test zone.
        assert!(map.locate(FAB_ADDR as usize + 1, 2).is_none());
        // Reserved gap after the register pairs.
        assert!(map.locate(0x30, 1).is_none());
        assert!(map.locate(ATR_ADDR as usize, 0).is_none());
    }

    #[test]
    fn test_password_counters_are_free_read() {
        let map = MemoryMap::new(4);
        let pac = map.locate(password_counter_addr(3, true) as usize, 1).unwrap();
        assert_eq!(pac.kind, RegionKind::PasswordCounter { set: 3, read: true });
        assert_eq!(pac.read, ReadRule::Free);
        assert_eq!(pac.write, WriteRule::SecureCode);

        let pw = map
            .locate(password_counter_addr(3, true) as usize + 1, PASSWORD_LEN)
            .unwrap();
        assert_eq!(pw.kind, RegionKind::Password { set: 3, read: true });
        assert_eq!(pw.read, ReadRule::SecureCode);

        // Counter and password together span two regions.
        assert!(map.locate(password_counter_addr(3, false) as usize, 4).is_none());
    }
}
