//! Checksum and fuse operations.

use tracing::{info, instrument, warn};

use super::CryptoMemory;
use crate::auth::Cryptogram;
use crate::events::{CmEvent, CmObserver};
use crate::protocol::*;
use crate::transport::CardTransport;
use crate::zone::{Fuse, FuseState};

impl<T: CardTransport, C: Cryptogram, O: CmObserver> CryptoMemory<T, C, O> {
    /// Send the host's data checksum.
    ///
    /// When authenticated, the chip drops authentication on a mismatch; the
    /// key set's attempts counter tells which happened.
    #[instrument(skip(self))]
    pub fn send_checksum(&mut self, addr: u8, checksum: [u8; CHECKSUM_LEN]) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(addr).and_then(|chip| {
            self.write(CommandFrame::send_checksum(chip), &checksum, false)?;
            let Some(grant) = self.session.grants().auth() else {
                return Ok(());
            };
            let aac = self.read(CommandFrame::read_config(
                chip,
                cryptogram_addr(grant.key_set),
                1,
            ))?;
            if aac.first() != Some(&COUNTER_CLEAR) {
                warn!(key_set = grant.key_set, "Checksum rejected");
                self.session.reset_to_selected();
                return Err(CmError::CryptogramNotAccepted);
            }
            Ok(())
        });
        self.finish("send_checksum", before, result)
    }

    /// Read the chip's running checksum.
    #[instrument(skip(self))]
    pub fn read_checksum(&mut self, addr: u8) -> Result<[u8; CHECKSUM_LEN], CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(addr).and_then(|chip| {
            let data = self.read(CommandFrame::read_checksum(chip))?;
            data.try_into().map_err(|_| CmError::ReadData)
        });
        self.finish("read_checksum", before, result)
    }

    fn fetch_fuses(&mut self, chip: ChipAddress) -> Result<FuseState, CmError> {
        let data = self.read(CommandFrame::read_fuse(chip))?;
        let fuses = FuseState::from_byte(data[0]);
        self.fuses = Some(fuses);
        Ok(fuses)
    }

    /// Read the fuse byte.
    #[instrument(skip(self))]
    pub fn read_fuse(&mut self, addr: u8) -> Result<FuseState, CmError> {
        let before = self.session.phase();
        let result = self
            .ensure_selected(addr)
            .and_then(|chip| self.fetch_fuses(chip));
        self.finish("read_fuse", before, result)
    }

    /// Permanently burn `fuse`. Requires the secure code; fuses burn in
    /// the order FAB, CMA, PER.
    #[instrument(skip(self))]
    pub fn burn_fuse(&mut self, addr: u8, fuse: Fuse) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.do_burn(addr, fuse);
        self.finish("burn_fuse", before, result)
    }

    fn do_burn(&mut self, addr: u8, fuse: Fuse) -> Result<(), CmError> {
        let chip = self.ensure_selected(addr)?;
        if !self.session.grants().has_secure_code() {
            return Err(CmError::PasswordNotAccepted);
        }
        let fuses = match self.fuses {
            Some(fuses) => fuses,
            None => self.fetch_fuses(chip)?,
        };
        if fuses.is_burned(fuse) {
            warn!(%fuse, "Fuse already burned");
            return Err(CmError::Failed);
        }
        if let Some(pre) = fuse.prerequisite()
            && !fuses.is_burned(pre)
        {
            warn!(%fuse, prerequisite = %pre, "Fuse burned out of order");
            return Err(CmError::Failed);
        }

        self.command(&CommandFrame::burn_fuse(chip, fuse.burn_code()))?;
        self.transport.wait_clock(self.profile.write_wait_clocks);
        if !self.fetch_fuses(chip)?.is_burned(fuse) {
            return Err(CmError::Failed);
        }
        info!(%fuse, "Fuse burned");
        self.emit(CmEvent::FuseBurned { fuse });
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::super::testing::*;
    use crate::protocol::*;
    use crate::transport::sim::{Fault, SIM_SECURE_CODE};
    use crate::zone::{Fuse, FuseState};

    const CHIP: u8 = DEFAULT_CHIP_ADDRESS;
    const SEED: [u8; SEED_LEN] = [0x0F; SEED_LEN];

    #[test]
    fn test_read_fuse() {
        let (mut dev, _sim) = selected();
        assert_eq!(dev.fuses(), Some(FuseState::INTACT));
        assert_eq!(dev.read_fuse(CHIP).unwrap(), FuseState::INTACT);
    }

    #[test]
    fn test_burn_requires_secure_code() {
        let (mut dev, sim) = selected();
        assert_eq!(
            dev.burn_fuse(CHIP, Fuse::Fab),
            Err(CmError::PasswordNotAccepted)
        );
        assert_eq!(sim.fuses(), FuseState::INTACT);
    }

    #[test]
    fn test_fuse_is_irreversible() {
        let (mut dev, sim) = selected();
        dev.verify_secure_code(CHIP, &SIM_SECURE_CODE).unwrap();
        dev.burn_fuse(CHIP, Fuse::Fab).unwrap();
        assert!(sim.fuses().is_burned(Fuse::Fab));

        sim.clear_log();
        assert_eq!(dev.burn_fuse(CHIP, Fuse::Fab), Err(CmError::Failed));
        assert_eq!(sim.bytes_transmitted(), 0);

        // Power cycling does not restore it.
        dev.power_off();
        dev.select_chip(CHIP).unwrap();
        assert!(dev.read_fuse(CHIP).unwrap().is_burned(Fuse::Fab));
    }

    #[test]
    fn test_fuse_order() {
        let (mut dev, sim) = selected();
        dev.verify_secure_code(CHIP, &SIM_SECURE_CODE).unwrap();
        assert_eq!(dev.burn_fuse(CHIP, Fuse::Per), Err(CmError::Failed));
        assert_eq!(sim.fuses(), FuseState::INTACT);

        for fuse in Fuse::ORDER {
            dev.burn_fuse(CHIP, fuse).unwrap();
        }
        assert_eq!(sim.fuses().value(), 0x00);

        // The configuration zone is frozen now.
        assert_eq!(
            dev.write_config_zone(CHIP, IC_ADDR, &[0; 2], false),
            Err(CmError::InvalidAddress)
        );
    }

    #[test]
    fn test_checksum_accepted() {
        let (mut dev, sim) = selected();
        sim.set_seed(0, SEED);
        dev.activate_security(CHIP, 0, &SEED, None, false).unwrap();
        dev.set_user_zone(CHIP, 0, false).unwrap();
        dev.write_small_zone(CHIP, 0, &[1, 2, 3, 4]).unwrap();

        let checksum = dev.read_checksum(CHIP).unwrap();
        dev.send_checksum(CHIP, checksum).unwrap();
        assert!(dev.session().grants().authenticated(0));
    }

    #[test]
    fn test_checksum_mismatch_drops_auth() {
        let (mut dev, sim) = selected();
        sim.set_seed(0, SEED);
        dev.activate_security(CHIP, 0, &SEED, None, false).unwrap();
        dev.set_user_zone(CHIP, 0, false).unwrap();
        dev.write_small_zone(CHIP, 0, &[1, 2, 3, 4]).unwrap();

        let checksum = dev.read_checksum(CHIP).unwrap();
        let wrong = [!checksum[0], checksum[1]];
        assert_eq!(
            dev.send_checksum(CHIP, wrong),
            Err(CmError::CryptogramNotAccepted)
        );
        assert!(dev.session().grants().is_empty());
        assert!(!sim.is_authenticated());
    }

    #[test]
    fn test_checksum_read_fault() {
        let (mut dev, sim) = selected();
        sim.inject(Fault::ReadData);
        assert_eq!(dev.read_checksum(CHIP), Err(CmError::ReadData));
    }
}
