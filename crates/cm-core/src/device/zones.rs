//! Configuration zone and user zone access.

use tracing::{debug, instrument};

use super::CryptoMemory;
use crate::auth::Cryptogram;
use crate::events::CmObserver;
use crate::protocol::*;
use crate::state::{CurrentZone, Direction};
use crate::transport::CardTransport;
use crate::zone::{AccessContext, AccessPlan, RegionKind, Target, ZoneRegisters};

impl<T: CardTransport, C: Cryptogram, O: CmObserver> CryptoMemory<T, C, O> {
    fn context(&self, anti_tearing: bool) -> AccessContext<'_> {
        AccessContext {
            grants: Some(self.session.grants()),
            anti_tearing,
            fuses: self.fuses,
        }
    }

    /// Read `len` bytes of the configuration zone at `addr`.
    #[instrument(skip(self))]
    pub fn read_config_zone(&mut self, chip_addr: u8, addr: u8, len: usize) -> Result<Vec<u8>, CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            self.access.check_access(
                Target::Config,
                addr as usize,
                len,
                Direction::Read,
                &self.context(false),
            )?;
            self.read(CommandFrame::read_config(chip, addr, len as u8))
        });
        self.finish("read_config_zone", before, result)
    }

    /// Write `data` to the configuration zone at `addr`.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write_config_zone(
        &mut self,
        chip_addr: u8,
        addr: u8,
        data: &[u8],
        anti_tearing: bool,
    ) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.do_write_config(chip_addr, addr, data, anti_tearing);
        self.finish("write_config_zone", before, result)
    }

    fn do_write_config(
        &mut self,
        chip_addr: u8,
        addr: u8,
        data: &[u8],
        anti_tearing: bool,
    ) -> Result<(), CmError> {
        let chip = self.ensure_selected(chip_addr)?;
        let plan = self.access.check_access(
            Target::Config,
            addr as usize,
            data.len(),
            Direction::Write,
            &self.context(anti_tearing),
        )?;
        self.write(
            CommandFrame::write_config(chip, addr, data.len() as u8),
            data,
            plan.anti_tearing,
        )?;

        // Keep the working zone's cached registers in step with the chip.
        let region = self.access.map().region_at(addr as usize).copied();
        if let Some(region) = region
            && let RegionKind::ZoneRegisters(zone) = region.kind
            && let Some(current) = self.session.zone()
            && current.zone == zone
        {
            let mut bytes = current.registers.to_bytes();
            let start = addr as usize - region.addr as usize;
            bytes[start..start + data.len()].copy_from_slice(data);
            let [ar, pr] = bytes;
            self.session
                .update_zone_registers(zone, ZoneRegisters::from_bytes(ar, pr));
            debug!(zone, ar, pr, "Zone registers updated");
        }
        Ok(())
    }

    /// Make `zone` the working zone for small-zone operations.
    #[instrument(skip(self))]
    pub fn set_user_zone(&mut self, chip_addr: u8, zone: u8, anti_tearing: bool) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self
            .ensure_selected(chip_addr)
            .and_then(|chip| self.select_zone(chip, zone, anti_tearing));
        self.finish("set_user_zone", before, result)
    }

    fn select_zone(&mut self, chip: ChipAddress, zone: u8, anti_tearing: bool) -> Result<(), CmError> {
        let current = self.load_zone(chip, zone)?;
        self.commit_zone(chip, current, anti_tearing)
    }

    /// Read a zone's register pair without touching the working zone.
    fn load_zone(&mut self, chip: ChipAddress, zone: u8) -> Result<CurrentZone, CmError> {
        self.access.check_zone_index(zone)?;
        let regs = self.read(CommandFrame::read_config(chip, access_register_addr(zone), 2))?;
        Ok(CurrentZone {
            zone,
            registers: ZoneRegisters::from_bytes(regs[0], regs[1]),
        })
    }

    fn commit_zone(&mut self, chip: ChipAddress, current: CurrentZone, anti_tearing: bool) -> Result<(), CmError> {
        self.command(&CommandFrame::set_user_zone(chip, current.zone))?;
        self.session.set_zone(current, anti_tearing);
        debug!(zone = current.zone, registers = ?current.registers, anti_tearing, "User zone set");
        Ok(())
    }

    /// Validate a request against the working zone.
    fn plan_zone_access(&self, offset: usize, len: usize, direction: Direction) -> Result<AccessPlan, CmError> {
        let anti_tearing = self.session.anti_tearing();
        self.access.check_length(len, direction, anti_tearing)?;
        let current = self.session.zone().ok_or(CmError::InvalidUserZone)?;
        self.access.check_access(
            Target::UserZone {
                zone: current.zone,
                registers: current.registers,
            },
            offset,
            len,
            direction,
            &self.context(anti_tearing),
        )
    }

    /// Read from the working zone at a one-byte offset.
    #[instrument(skip(self))]
    pub fn read_small_zone(&mut self, chip_addr: u8, offset: u8, len: usize) -> Result<Vec<u8>, CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            self.plan_zone_access(offset as usize, len, Direction::Read)?;
            self.read(CommandFrame::read_user_zone(chip, offset as u16, len as u8))
        });
        self.finish("read_small_zone", before, result)
    }

    /// Write to the working zone at a one-byte offset.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write_small_zone(&mut self, chip_addr: u8, offset: u8, data: &[u8]) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            let plan = self.plan_zone_access(offset as usize, data.len(), Direction::Write)?;
            self.write(
                CommandFrame::write_user_zone(chip, offset as u16, data.len() as u8),
                data,
                plan.anti_tearing,
            )
        });
        self.finish("write_small_zone", before, result)
    }

    /// Map a large-zone address to its zone and validate the request
    /// against that zone's registers. The working zone switches only once
    /// the request is accepted. Returns the in-zone offset and the plan.
    fn enter_large(
        &mut self,
        chip: ChipAddress,
        addr: u16,
        len: usize,
        direction: Direction,
    ) -> Result<(u16, AccessPlan), CmError> {
        let anti_tearing = self.session.anti_tearing();
        self.access.check_length(len, direction, anti_tearing)?;
        let (zone, offset) = self.access.locate_large(addr, len)?;
        let working = self.session.zone().filter(|z| z.zone == zone);
        let target = match working {
            Some(current) => current,
            None => {
                debug!(zone, "Large access lands in another zone");
                self.load_zone(chip, zone)?
            }
        };
        let plan = self.access.check_access(
            Target::UserZone {
                zone,
                registers: target.registers,
            },
            offset as usize,
            len,
            direction,
            &self.context(anti_tearing),
        )?;
        if working.is_none() {
            self.commit_zone(chip, target, anti_tearing)?;
        }
        Ok((offset, plan))
    }

    /// Read from user memory addressed as one linear space.
    #[instrument(skip(self))]
    pub fn read_large_zone(&mut self, chip_addr: u8, addr: u16, len: usize) -> Result<Vec<u8>, CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            let (offset, _) = self.enter_large(chip, addr, len, Direction::Read)?;
            self.read(CommandFrame::read_user_zone(chip, offset, len as u8))
        });
        self.finish("read_large_zone", before, result)
    }

    /// Write to user memory addressed as one linear space.
    #[instrument(skip(self, data), fields(len = data.len()))]
    pub fn write_large_zone(&mut self, chip_addr: u8, addr: u16, data: &[u8]) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            let (offset, plan) = self.enter_large(chip, addr, data.len(), Direction::Write)?;
            self.write(
                CommandFrame::write_user_zone(chip, offset, data.len() as u8),
                data,
                plan.anti_tearing,
            )
        });
        self.finish("write_large_zone", before, result)
    }

    /// Bitmap of guarded user zones the session may access in `direction`.
    /// Bit `n` stands for zone `n`; each zone's registers are read fresh.
    #[instrument(skip(self))]
    pub fn authorized_zones(&mut self, chip_addr: u8, direction: Direction) -> Result<u32, CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(chip_addr).and_then(|chip| {
            let zones = (0..self.profile.user_zones)
                .map(|zone| self.load_zone(chip, zone))
                .collect::<Result<Vec<_>, _>>()?;
            Ok(self.session.authorized_zones(
                zones.iter().map(|z| (z.zone, &z.registers)),
                direction,
            ))
        });
        self.finish("authorized_zones", before, result)
    }
}
