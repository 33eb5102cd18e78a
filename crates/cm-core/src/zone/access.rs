//! Zone access controller.
//!
//! Every request is validated here before a single byte reaches the
//! transport. Checks run in a fixed order: length ceiling, region bounds,
//! region writability, then the grant set.

use tracing::debug;

use super::fuse::FuseState;
use super::map::{MemoryMap, ReadRule, Region, WriteRule};
use super::registers::ZoneRegisters;
use crate::config::DeviceProfile;
use crate::protocol::CmError;
use crate::state::{Direction, Grants};

/// Memory addressed by a request.
#[derive(Debug, Clone, Copy)]
pub enum Target {
    /// Configuration zone; offsets are absolute addresses.
    Config,
    /// A user zone with its register pair; offsets are zone-relative.
    UserZone { zone: u8, registers: ZoneRegisters },
}

/// What the caller holds when asking for access.
#[derive(Debug, Clone, Copy, Default)]
pub struct AccessContext<'a> {
    pub grants: Option<&'a Grants>,
    /// Anti-tearing requested by the session or the call.
    pub anti_tearing: bool,
    /// Fuse byte, if known.
    pub fuses: Option<FuseState>,
}

/// How an accepted request must be carried out.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessPlan {
    pub anti_tearing: bool,
}

#[derive(Debug, Clone)]
pub struct ZoneAccessController {
    map: MemoryMap,
    user_zones: u8,
    zone_size: u16,
    max_write_len: usize,
    max_read_len: usize,
    anti_tearing_max: usize,
}

impl ZoneAccessController {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            map: MemoryMap::new(profile.user_zones),
            user_zones: profile.user_zones,
            zone_size: profile.zone_size,
            max_write_len: profile.max_write_len,
            max_read_len: profile.max_read_len,
            anti_tearing_max: profile.anti_tearing_max,
        }
    }

    pub fn map(&self) -> &MemoryMap {
        &self.map
    }

    /// Per-call length ceiling for `direction`.
    pub fn max_len(&self, direction: Direction, anti_tearing: bool) -> usize {
        match direction {
            Direction::Read => self.max_read_len,
            Direction::Write if anti_tearing => self.max_write_len.min(self.anti_tearing_max),
            Direction::Write => self.max_write_len,
        }
    }

    pub fn check_length(
        &self,
        len: usize,
        direction: Direction,
        anti_tearing: bool,
    ) -> Result<(), CmError> {
        if len > self.max_len(direction, anti_tearing) {
            return Err(match direction {
                Direction::Read => CmError::ReadTooLong,
                Direction::Write => CmError::WriteTooLong,
            });
        }
        if len == 0 {
            return Err(CmError::InvalidAddress);
        }
        Ok(())
    }

    pub fn check_zone_index(&self, zone: u8) -> Result<(), CmError> {
        if zone >= self.user_zones {
            return Err(CmError::InvalidUserZone);
        }
        Ok(())
    }

    /// Decide whether `len` bytes at `offset` of `target` may be accessed.
    pub fn check_access(
        &self,
        target: Target,
        offset: usize,
        len: usize,
        direction: Direction,
        ctx: &AccessContext<'_>,
    ) -> Result<AccessPlan, CmError> {
        let empty = Grants::default();
        let grants = ctx.grants.unwrap_or(&empty);
        let result = match target {
            Target::Config => self
                .check_config(offset, len, direction, ctx.anti_tearing, grants, ctx.fuses)
                .map(|_| AccessPlan {
                    anti_tearing: ctx.anti_tearing && direction == Direction::Write,
                }),
            Target::UserZone { zone, registers } => self.check_user(
                zone,
                &registers,
                offset,
                len,
                direction,
                ctx.anti_tearing,
                grants,
            ),
        };
        if let Err(e) = &result {
            debug!(?target, offset, len, ?direction, error = %e, "Access rejected");
        }
        result
    }

    fn check_config(
        &self,
        addr: usize,
        len: usize,
        direction: Direction,
        anti_tearing: bool,
        grants: &Grants,
        fuses: Option<FuseState>,
    ) -> Result<&Region, CmError> {
        self.check_length(len, direction, anti_tearing)?;
        let region = self.map.locate(addr, len).ok_or(CmError::InvalidAddress)?;

        match direction {
            Direction::Read => match region.read {
                ReadRule::Never => return Err(CmError::InvalidAddress),
                ReadRule::SecureCode if !grants.has_secure_code() => {
                    return Err(CmError::PasswordNotAccepted);
                }
                _ => {}
            },
            Direction::Write => {
                if region.write == WriteRule::Never {
                    return Err(CmError::InvalidAddress);
                }
                if let (Some(lock), Some(fuses)) = (region.lock, fuses)
                    && fuses.is_burned(lock)
                {
                    return Err(CmError::InvalidAddress);
                }
                if region.write == WriteRule::SecureCode && !grants.has_secure_code() {
                    return Err(CmError::PasswordNotAccepted);
                }
            }
        }
        Ok(region)
    }

    #[allow(clippy::too_many_arguments)]
    fn check_user(
        &self,
        zone: u8,
        registers: &ZoneRegisters,
        offset: usize,
        len: usize,
        direction: Direction,
        anti_tearing: bool,
        grants: &Grants,
    ) -> Result<AccessPlan, CmError> {
        self.check_zone_index(zone)?;
        let anti_tearing = direction == Direction::Write
            && (anti_tearing || registers.password.anti_tearing_mandated());
        self.check_length(len, direction, anti_tearing)?;
        if offset + len > self.zone_size as usize {
            return Err(CmError::InvalidAddress);
        }
        registers.check(grants, direction)?;
        Ok(AccessPlan { anti_tearing })
    }

    /// Split a 16-bit large-zone address into zone and in-zone offset.
    /// The range must stay within that one zone.
    pub fn locate_large(&self, addr: u16, len: usize) -> Result<(u8, u16), CmError> {
        let zone = addr / self.zone_size;
        let offset = addr % self.zone_size;
        if zone >= self.user_zones as u16 {
            return Err(CmError::InvalidUserZone);
        }
        if offset as usize + len > self.zone_size as usize {
            return Err(CmError::InvalidAddress);
        }
        Ok((zone as u8, offset))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::*;
    use crate::zone::Fuse;

    fn controller() -> ZoneAccessController {
        ZoneAccessController::new(&DeviceProfile::default())
    }

    fn open_zone(zone: u8) -> Target {
        Target::UserZone {
            zone,
            registers: ZoneRegisters::OPEN,
        }
    }

    #[test]
    fn test_spanning_two_regions_rejects() {
        let ctl = controller();
        let ctx = AccessContext::default();
        // Every range that crosses a region boundary fails with an address error.
        for region in ctl.map().regions() {
            let end = region.end();
            if end >= 0xF0 {
                continue;
            }
            let start = end - 1;
            assert_eq!(
                ctl.check_access(Target::Config, start, 2, Direction::Read, &ctx),
                Err(CmError::InvalidAddress),
                "range at 0x{start:02X} crosses {}",
                region.kind
            );
        }
    }

    #[test]
    fn test_config_reads_within_region() {
        let ctl = controller();
        let ctx = AccessContext::default();
        let plan = ctl
            .check_access(Target::Config, ATR_ADDR as usize, ATR_LEN, Direction::Read, &ctx)
            .unwrap();
        assert!(!plan.anti_tearing);
        assert!(
            ctl.check_access(Target::Config, IC_ADDR as usize + 15, 1, Direction::Read, &ctx)
                .is_ok()
        );
    }

    #[test]
    fn test_reserved_regions_reject_writes_regardless_of_grants() {
        let ctl = controller();
        let mut grants = Grants::default();
        grants.grant_password(SECURE_CODE_SET, Direction::Write);
        grants.grant_auth(0, true);
        let ctx = AccessContext {
            grants: Some(&grants),
            ..Default::default()
        };
        for addr in [ATR_ADDR, FAB_ADDR, LHC_ADDR] {
            assert_eq!(
                ctl.check_access(Target::Config, addr as usize, 1, Direction::Write, &ctx),
                Err(CmError::InvalidAddress)
            );
        }
    }

    #[test]
    fn test_config_write_needs_secure_code() {
        let ctl = controller();
        let ctx = AccessContext::default();
        assert_eq!(
            ctl.check_access(Target::Config, IC_ADDR as usize, 4, Direction::Write, &ctx),
            Err(CmError::PasswordNotAccepted)
        );
        // Memory test zone is free.
        assert!(
            ctl.check_access(Target::Config, MTZ_ADDR as usize, 2, Direction::Write, &ctx)
                .is_ok()
        );
    }

    #[test]
    fn test_secret_seeds_are_write_only() {
        let ctl = controller();
        let mut grants = Grants::default();
        grants.grant_password(SECURE_CODE_SET, Direction::Write);
        let ctx = AccessContext {
            grants: Some(&grants),
            ..Default::default()
        };
        assert_eq!(
            ctl.check_access(Target::Config, CM_G as usize, 8, Direction::Read, &ctx),
            Err(CmError::InvalidAddress)
        );
        assert!(
            ctl.check_access(Target::Config, CM_G as usize, 8, Direction::Write, &ctx)
                .is_ok()
        );
    }

    #[test]
    fn test_burned_fuse_locks_region() {
        let ctl = controller();
        let mut grants = Grants::default();
        grants.grant_password(SECURE_CODE_SET, Direction::Write);
        let fuses = FuseState::INTACT.burn(Fuse::Fab).burn(Fuse::Cma);
        let ctx = AccessContext {
            grants: Some(&grants),
            fuses: Some(fuses),
            ..Default::default()
        };
        assert_eq!(
            ctl.check_access(Target::Config, CMC_ADDR as usize, 4, Direction::Write, &ctx),
            Err(CmError::InvalidAddress)
        );
        assert!(
            ctl.check_access(Target::Config, IC_ADDR as usize, 4, Direction::Write, &ctx)
                .is_ok()
        );
    }

    #[test]
    fn test_length_ceilings() {
        let profile = DeviceProfile {
            max_write_len: 32,
            ..Default::default()
        };
        let ctl = ZoneAccessController::new(&profile);
        let ctx = AccessContext::default();
        assert_eq!(
            ctl.check_access(open_zone(0), 0, 40, Direction::Write, &ctx),
            Err(CmError::WriteTooLong)
        );
        assert_eq!(
            ctl.check_access(open_zone(0), 0, 40, Direction::Read, &ctx),
            Err(CmError::ReadTooLong)
        );
        assert_eq!(
            ctl.check_access(open_zone(0), 0, 0, Direction::Read, &ctx),
            Err(CmError::InvalidAddress)
        );
    }

    #[test]
    fn test_anti_tearing_ceiling() {
        let ctl = controller();
        let ctx = AccessContext {
            anti_tearing: true,
            ..Default::default()
        };
        assert_eq!(
            ctl.check_access(open_zone(1), 0, 9, Direction::Write, &ctx),
            Err(CmError::WriteTooLong)
        );
        let plan = ctl
            .check_access(open_zone(1), 0, 8, Direction::Write, &ctx)
            .unwrap();
        assert!(plan.anti_tearing);
        // Reads ignore anti-tearing.
        let plan = ctl
            .check_access(open_zone(1), 0, 16, Direction::Read, &ctx)
            .unwrap();
        assert!(!plan.anti_tearing);
    }

    #[test]
    fn test_mandated_anti_tearing() {
        let ctl = controller();
        let target = Target::UserZone {
            zone: 2,
            registers: ZoneRegisters::from_bytes(0xFF, 0xFF),
        };
        let ctx = AccessContext::default();
        let plan = ctl
            .check_access(target, 0, 4, Direction::Write, &ctx)
            .unwrap();
        assert!(plan.anti_tearing);
        assert_eq!(
            ctl.check_access(target, 0, 12, Direction::Write, &ctx),
            Err(CmError::WriteTooLong)
        );
    }

    #[test]
    fn test_user_zone_bounds() {
        let ctl = controller();
        let ctx = AccessContext::default();
        assert!(ctl.check_access(open_zone(3), 16, 16, Direction::Read, &ctx).is_ok());
        assert_eq!(
            ctl.check_access(open_zone(3), 17, 16, Direction::Read, &ctx),
            Err(CmError::InvalidAddress)
        );
        assert_eq!(
            ctl.check_access(open_zone(4), 0, 1, Direction::Read, &ctx),
            Err(CmError::InvalidUserZone)
        );
    }

    #[test]
    fn test_locate_large() {
        let ctl = controller();
        assert_eq!(ctl.locate_large(0, 8), Ok((0, 0)));
        assert_eq!(ctl.locate_large(0x25, 8), Ok((1, 5)));
        assert_eq!(ctl.locate_large(0x3C, 8), Err(CmError::InvalidAddress));
        assert_eq!(ctl.locate_large(0x80, 1), Err(CmError::InvalidUserZone));
    }
}
