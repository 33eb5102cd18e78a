//! Chip selection, mutual authentication and password verification.

use tracing::{debug, info, instrument, warn};

use super::CryptoMemory;
use crate::auth::Cryptogram;
use crate::events::{CmEvent, CmObserver};
use crate::protocol::*;
use crate::state::Direction;
use crate::transport::CardTransport;
use crate::zone::FuseState;

impl<T: CardTransport, C: Cryptogram, O: CmObserver> CryptoMemory<T, C, O> {
    /// Select the chip at `addr`, powering the card up if needed.
    ///
    /// Success starts a fresh session. On failure the current session is
    /// left untouched.
    #[instrument(skip(self))]
    pub fn select_chip(&mut self, addr: u8) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.do_select(addr);
        self.finish("select_chip", before, result)
    }

    fn do_select(&mut self, addr: u8) -> Result<(), CmError> {
        let chip = ChipAddress::new(addr).ok_or(CmError::UnknownDevice)?;
        if !self.transport.detect_card() {
            debug!("No card detected");
            return Err(CmError::UnknownDevice);
        }
        if !self.powered {
            self.transport.power_on();
            self.powered = true;
            self.session.deselect();
            self.fuses = None;
        }

        // A fuse read doubles as the presence check; only the addressed chip answers.
        let frame = CommandFrame::read_fuse(chip);
        let answer = self
            .transport
            .send_command(frame.as_bytes())
            .and_then(|_| self.transport.receive(frame.len() as usize));
        let fuse = match answer.ok().map(|raw| decode(raw, 1)) {
            Some(Ok(response)) => response.status().unwrap_or_default(),
            _ => {
                debug!("Fuse read not acknowledged");
                return Err(CmError::UnknownDevice);
            }
        };

        self.session.select(chip);
        self.fuses = Some(FuseState::from_byte(fuse));
        info!(chip = %chip, "Chip selected");
        self.emit(CmEvent::ChipSelected { chip });
        Ok(())
    }

    /// Power the card down. All chips drop their security state.
    #[instrument(skip(self))]
    pub fn power_off(&mut self) {
        let before = self.session.phase();
        self.transport.power_off();
        self.powered = false;
        self.fuses = None;
        self.session.deselect();
        self.emit(CmEvent::ChipDeselected);
        let _ = self.finish::<()>("power_off", before, Ok(()));
    }

    /// Mutually authenticate with `key_set`.
    ///
    /// `random` overrides the transport's random number; it must differ
    /// from the previous challenge. With `encrypt` a second exchange under
    /// the session key enables encrypted mode.
    #[instrument(skip(self, key, random))]
    pub fn activate_security(
        &mut self,
        addr: u8,
        key_set: u8,
        key: &[u8; SEED_LEN],
        random: Option<[u8; CHALLENGE_LEN]>,
        encrypt: bool,
    ) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.do_activate(addr, key_set, key, random, encrypt);
        self.finish("activate_security", before, result)
    }

    fn do_activate(
        &mut self,
        addr: u8,
        key_set: u8,
        key: &[u8; SEED_LEN],
        random: Option<[u8; CHALLENGE_LEN]>,
        encrypt: bool,
    ) -> Result<(), CmError> {
        let chip = self.ensure_selected(addr)?;
        if key_set >= KEY_SETS {
            return Err(CmError::InvalidAddress);
        }
        let random = random.unwrap_or_else(|| self.transport.random());
        if !self.session.record_challenge(&random) {
            warn!("Challenge repeats the previous one");
            return Err(CmError::Failed);
        }

        let result = self
            .authenticate(chip, key_set, key, &random, false)
            .and_then(|session_key| {
                if !encrypt {
                    return Ok(());
                }
                let random = self.transport.random();
                if !self.session.record_challenge(&random) {
                    return Err(CmError::Failed);
                }
                self.authenticate(chip, key_set, &session_key, &random, true)
                    .map(|_| ())
            });

        match result {
            Ok(()) => {
                self.session.grant_auth(key_set, encrypt);
                info!(key_set, encrypt, "Authenticated");
                Ok(())
            }
            Err(e) => {
                self.session.reset_to_selected();
                Err(e)
            }
        }
    }

    /// One verify-crypto exchange. Returns the session key for a following
    /// encryption exchange.
    fn authenticate(
        &mut self,
        chip: ChipAddress,
        key_set: u8,
        key: &[u8; CHALLENGE_LEN],
        random: &[u8; CHALLENGE_LEN],
        encrypt: bool,
    ) -> Result<[u8; CHALLENGE_LEN], CmError> {
        let block_frame = CommandFrame::read_config(chip, cryptogram_addr(key_set), CHALLENGE_LEN as u8);
        let block: [u8; CHALLENGE_LEN] = self
            .read(block_frame)?
            .try_into()
            .map_err(|_| CmError::ReadData)?;
        if block[0] == 0 {
            warn!(key_set, "Key set locked by its attempts counter");
            return Err(CmError::CryptogramNotAccepted);
        }

        let challenge = self.crypto.compute(key, &block, random)?;
        let mut payload = [0u8; 2 * CHALLENGE_LEN];
        payload[..CHALLENGE_LEN].copy_from_slice(random);
        payload[CHALLENGE_LEN..].copy_from_slice(&challenge.host_challenge);
        self.write(CommandFrame::verify_crypto(chip, key_set, encrypt), &payload, false)?;

        let readback = self.read(block_frame)?;
        if !challenge.accepts(&readback) {
            debug!(key_set, aac = readback[0], "Cryptogram rejected");
            return Err(CmError::CryptogramNotAccepted);
        }
        Ok(challenge.session_key)
    }

    /// Leave authenticated mode. Password grants go too.
    #[instrument(skip(self))]
    pub fn deactivate_security(&mut self, addr: u8) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(addr).and_then(|chip| {
            self.command_byte((chip.value() << 4) | OP_VERIFY_CRYPTO)?;
            self.transport.wait_clock(self.profile.write_wait_clocks);
            self.session.reset_to_selected();
            Ok(())
        });
        self.finish("deactivate_security", before, result)
    }

    /// Present a password for `set` in `direction`.
    #[instrument(skip(self, password))]
    pub fn verify_password(
        &mut self,
        addr: u8,
        password: &[u8; PASSWORD_LEN],
        set: u8,
        direction: Direction,
    ) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.do_verify_password(addr, password, set, direction);
        self.finish("verify_password", before, result)
    }

    fn do_verify_password(
        &mut self,
        addr: u8,
        password: &[u8; PASSWORD_LEN],
        set: u8,
        direction: Direction,
    ) -> Result<(), CmError> {
        let chip = self.ensure_selected(addr)?;
        if set >= PASSWORD_SETS {
            return Err(CmError::InvalidAddress);
        }
        let read = direction.is_read();
        self.write(CommandFrame::verify_password(chip, set, read), password, false)?;

        let counter = self.read(CommandFrame::read_config(
            chip,
            password_counter_addr(set, read),
            1,
        ))?;
        if counter.first() == Some(&COUNTER_CLEAR) {
            self.session.grant_password(set, direction);
            info!(set, ?direction, "Password accepted");
            Ok(())
        } else {
            self.session.reset_to_selected();
            Err(CmError::PasswordNotAccepted)
        }
    }

    /// Present the secure code (write password of set 7).
    pub fn verify_secure_code(&mut self, addr: u8, code: &[u8; PASSWORD_LEN]) -> Result<(), CmError> {
        self.verify_password(addr, code, SECURE_CODE_SET, Direction::Write)
    }

    /// Drop all password grants, keeping authentication.
    #[instrument(skip(self))]
    pub fn reset_password(&mut self, addr: u8) -> Result<(), CmError> {
        let before = self.session.phase();
        let result = self.ensure_selected(addr).and_then(|chip| {
            self.command_byte((chip.value() << 4) | OP_VERIFY_PASSWORD)?;
            self.session.clear_passwords();
            Ok(())
        });
        self.finish("reset_password", before, result)
    }
}
