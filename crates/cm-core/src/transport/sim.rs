//! Simulated CryptoMemory chip for testing.
//!
//! Models the configuration zone, user zones, fuses, attempts counters and
//! the verify-crypto exchange closely enough to exercise the whole protocol
//! core. Clones share one chip, so a test can keep a handle for inspection
//! and fault injection after moving the transport into the facade.

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use rand::Rng;

use super::traits::{CardTransport, TransportError};
use crate::auth::{Cryptogram, HmacCryptogram};
use crate::config::DeviceProfile;
use crate::protocol::*;
use crate::zone::{Fuse, FuseState, ZoneRegisters};

/// Factory answer to reset of an AT88SC0104C.
pub const SIM_ATR: [u8; ATR_LEN] = [0x3B, 0xB2, 0x11, 0x00, 0x10, 0x80, 0x00, 0x01];

/// Factory secure code (password set 7, write).
pub const SIM_SECURE_CODE: [u8; PASSWORD_LEN] = [0xDD, 0x42, 0x97];

/// One-shot fault to inject into the next matching transport call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Fault {
    /// Next command never gets the chip into command mode.
    CommandStart,
    /// Next command frame is not acknowledged.
    CommandSend,
    /// Next data phase is not acknowledged.
    WriteData,
    /// Next receive fails outright.
    ReadData,
    /// Next receive returns one byte less than asked.
    ShortRead,
    /// Next lone command byte is not acknowledged.
    CommandByte,
}

struct ChipModel {
    address: u8,
    start_tries: u8,
    card_present: bool,
    powered: bool,
    config: [u8; 256],
    user: Vec<u8>,
    zone_size: usize,
    user_zones: u8,
    fuses: FuseState,
    current_zone: Option<u8>,
    pending: Option<CommandFrame>,
    response: Vec<u8>,
    auth: Option<(u8, bool)>,
    checksum: u16,
    faults: Vec<Fault>,
    randoms: VecDeque<[u8; CHALLENGE_LEN]>,
    tx_log: Vec<Vec<u8>>,
    clocks: u64,
}

impl ChipModel {
    fn new(profile: &DeviceProfile) -> Self {
        let mut config = [0xFF; 256];
        config[ATR_ADDR as usize..][..ATR_LEN].copy_from_slice(&SIM_ATR);
        config[FAB_ADDR as usize..][..FAB_LEN].copy_from_slice(&[0x10, 0x10]);
        config[MTZ_ADDR as usize..][..MTZ_LEN].copy_from_slice(&[0x00, 0x00]);
        config[LHC_ADDR as usize..][..LHC_LEN].copy_from_slice(&[0x4C, 0x48, 0x43, 0, 0, 0, 0x01, 0x02]);
        for zone in 0..profile.user_zones {
            let [ar, pr] = ZoneRegisters::OPEN.to_bytes();
            config[access_register_addr(zone) as usize] = ar;
            config[access_register_addr(zone) as usize + 1] = pr;
        }
        for set in 0..KEY_SETS {
            let ci = cryptogram_addr(set) as usize;
            config[ci + 1..ci + CRYPTOGRAM_STRIDE].fill(0x00);
            let g = CM_G as usize + set as usize * SEED_LEN;
            config[g..g + SEED_LEN].fill(0x00);
        }
        let sc = password_counter_addr(SECURE_CODE_SET, false) as usize + 1;
        config[sc..sc + PASSWORD_LEN].copy_from_slice(&SIM_SECURE_CODE);

        Self {
            address: profile.chip_address,
            start_tries: profile.start_tries,
            card_present: true,
            powered: false,
            config,
            user: vec![0xFF; profile.user_zones as usize * profile.zone_size as usize],
            zone_size: profile.zone_size as usize,
            user_zones: profile.user_zones,
            fuses: FuseState::INTACT,
            current_zone: None,
            pending: None,
            response: Vec::new(),
            auth: None,
            checksum: 0,
            faults: Vec::new(),
            randoms: VecDeque::new(),
            tx_log: Vec::new(),
            clocks: 0,
        }
    }

    fn take_fault(&mut self, fault: Fault) -> bool {
        if let Some(pos) = self.faults.iter().position(|&f| f == fault) {
            self.faults.remove(pos);
            true
        } else {
            false
        }
    }

    fn reset_security(&mut self) {
        self.auth = None;
        self.current_zone = None;
        self.pending = None;
        self.response.clear();
    }

    fn accumulate(&mut self, data: &[u8]) {
        for &b in data {
            self.checksum = self.checksum.rotate_left(3).wrapping_add(b as u16);
        }
    }

    fn config_slice(&self, addr: usize, len: usize) -> Result<Vec<u8>, TransportError> {
        self.config
            .get(addr..addr + len)
            .map(<[u8]>::to_vec)
            .ok_or(TransportError::Nak)
    }

    fn zone_range(&self, addr: usize, len: usize) -> Result<std::ops::Range<usize>, TransportError> {
        let zone = self.current_zone.ok_or(TransportError::Nak)? as usize;
        if addr + len > self.zone_size {
            return Err(TransportError::Nak);
        }
        let start = zone * self.zone_size + addr;
        Ok(start..start + len)
    }

    fn command(&mut self, frame: CommandFrame) -> Result<(), TransportError> {
        let n = frame.len() as usize;
        self.pending = None;
        self.response.clear();
        match frame.opcode() {
            OP_READ_USER_ZONE => {
                let range = self.zone_range(frame.wide_addr() as usize, n)?;
                self.response = self.user[range].to_vec();
            }
            OP_READ_SYSTEM_ZONE => {
                self.response = match frame.p1() {
                    SYS_CONFIG => self.config_slice(frame.p2() as usize, n)?,
                    SYS_FUSE => vec![self.fuses.value()],
                    SYS_CHECKSUM => self.checksum.to_be_bytes().to_vec(),
                    _ => return Err(TransportError::Nak),
                };
            }
            OP_WRITE_SYSTEM_ZONE => match frame.p1() {
                SYS_FUSE => {
                    let fuse = Fuse::from_burn_code(frame.p2()).ok_or(TransportError::Nak)?;
                    if let Some(pre) = fuse.prerequisite()
                        && !self.fuses.is_burned(pre)
                    {
                        return Err(TransportError::Nak);
                    }
                    self.fuses = self.fuses.burn(fuse);
                }
                SYS_SET_USER_ZONE => {
                    if frame.p2() >= self.user_zones {
                        return Err(TransportError::Nak);
                    }
                    self.current_zone = Some(frame.p2());
                }
                SYS_CONFIG | SYS_CHECKSUM => self.pending = Some(frame),
                _ => return Err(TransportError::Nak),
            },
            OP_WRITE_USER_ZONE => {
                self.zone_range(frame.wide_addr() as usize, n)?;
                self.pending = Some(frame);
            }
            OP_VERIFY_CRYPTO | OP_VERIFY_PASSWORD => self.pending = Some(frame),
            _ => return Err(TransportError::Nak),
        }
        Ok(())
    }

    fn data(&mut self, data: &[u8]) -> Result<(), TransportError> {
        let frame = self.pending.take().ok_or(TransportError::Nak)?;
        if data.len() != frame.len() as usize {
            return Err(TransportError::Nak);
        }
        match (frame.opcode(), frame.p1()) {
            (OP_WRITE_USER_ZONE, _) => {
                let range = self.zone_range(frame.wide_addr() as usize, data.len())?;
                self.user[range].copy_from_slice(data);
                self.accumulate(data);
            }
            (OP_WRITE_SYSTEM_ZONE, SYS_CONFIG) => {
                let addr = frame.p2() as usize;
                self.config
                    .get_mut(addr..addr + data.len())
                    .ok_or(TransportError::Nak)?
                    .copy_from_slice(data);
                self.accumulate(data);
            }
            (OP_WRITE_SYSTEM_ZONE, SYS_CHECKSUM) => {
                if data != self.checksum.to_be_bytes().as_slice() {
                    if let Some((key_set, _)) = self.auth.take() {
                        let aac = cryptogram_addr(key_set) as usize;
                        self.config[aac] <<= 1;
                    }
                }
                self.checksum = 0;
            }
            (OP_VERIFY_CRYPTO, p1) => self.verify_crypto(p1 & 0x0F, p1 & CRYPTO_ENCRYPT_FLAG != 0, data),
            (OP_VERIFY_PASSWORD, p1) => {
                self.verify_password(p1 & 0x07, p1 & PASSWORD_READ_FLAG != 0, data)
            }
            _ => return Err(TransportError::Nak),
        }
        Ok(())
    }

    fn block(&self, addr: usize) -> [u8; CHALLENGE_LEN] {
        let mut out = [0u8; CHALLENGE_LEN];
        out.copy_from_slice(&self.config[addr..addr + CHALLENGE_LEN]);
        out
    }

    fn verify_crypto(&mut self, key_set: u8, encrypt: bool, data: &[u8]) {
        if key_set >= KEY_SETS {
            return;
        }
        let ci_addr = cryptogram_addr(key_set) as usize;
        let key_addr = if encrypt {
            ci_addr + CHALLENGE_LEN
        } else {
            CM_G as usize + key_set as usize * SEED_LEN
        };
        self.auth = None;
        if self.config[ci_addr] == 0 {
            return;
        }

        let key = self.block(key_addr);
        let ci = self.block(ci_addr);
        let mut random = [0u8; CHALLENGE_LEN];
        random.copy_from_slice(&data[..CHALLENGE_LEN]);

        match HmacCryptogram.compute(&key, &ci, &random) {
            Ok(expected) if expected.host_challenge[..] == data[CHALLENGE_LEN..] => {
                self.config[ci_addr..ci_addr + CHALLENGE_LEN].copy_from_slice(&expected.next_cryptogram);
                self.config[ci_addr + CHALLENGE_LEN..ci_addr + CRYPTOGRAM_STRIDE]
                    .copy_from_slice(&expected.session_key);
                self.auth = Some((key_set, encrypt));
                self.checksum = 0;
            }
            _ => self.config[ci_addr] <<= 1,
        }
    }

    fn verify_password(&mut self, set: u8, read: bool, data: &[u8]) {
        let pac = password_counter_addr(set, read) as usize;
        if self.config[pac] == 0 {
            return;
        }
        if self.config[pac + 1..pac + 1 + PASSWORD_LEN] == *data {
            self.config[pac] = COUNTER_CLEAR;
        } else {
            self.config[pac] <<= 1;
        }
    }
}

/// Simulated chip on a simulated card bus.
#[derive(Clone)]
pub struct SimulatedChip {
    model: Arc<Mutex<ChipModel>>,
}

impl SimulatedChip {
    pub fn new(profile: &DeviceProfile) -> Self {
        Self {
            model: Arc::new(Mutex::new(ChipModel::new(profile))),
        }
    }

    fn chip(&self) -> MutexGuard<'_, ChipModel> {
        self.model.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inject a one-shot fault.
    pub fn inject(&self, fault: Fault) {
        self.chip().faults.push(fault);
    }

    /// Queue a value for the next `random()` call.
    pub fn queue_random(&self, random: [u8; CHALLENGE_LEN]) {
        self.chip().randoms.push_back(random);
    }

    /// Simulate card removal.
    pub fn remove_card(&self) {
        self.chip().card_present = false;
    }

    /// Simulate card insertion.
    pub fn insert_card(&self) {
        self.chip().card_present = true;
    }

    /// Program a password directly, bypassing the protocol.
    pub fn set_password(&self, set: u8, read: bool, password: [u8; PASSWORD_LEN]) {
        let pac = password_counter_addr(set, read) as usize;
        self.chip().config[pac + 1..pac + 1 + PASSWORD_LEN].copy_from_slice(&password);
    }

    /// Program a secret seed directly.
    pub fn set_seed(&self, key_set: u8, seed: [u8; SEED_LEN]) {
        let g = CM_G as usize + key_set as usize * SEED_LEN;
        self.chip().config[g..g + SEED_LEN].copy_from_slice(&seed);
    }

    /// Program a zone's access/password registers directly.
    pub fn set_zone_registers(&self, zone: u8, registers: ZoneRegisters) {
        let ar = access_register_addr(zone) as usize;
        self.chip().config[ar..ar + 2].copy_from_slice(&registers.to_bytes());
    }

    /// Every frame and data phase sent to the chip.
    pub fn transmitted(&self) -> Vec<Vec<u8>> {
        self.chip().tx_log.clone()
    }

    /// Total bytes sent to the chip.
    pub fn bytes_transmitted(&self) -> usize {
        self.chip().tx_log.iter().map(Vec::len).sum()
    }

    pub fn clear_log(&self) {
        self.chip().tx_log.clear();
    }

    pub fn config(&self, addr: u8, len: usize) -> Vec<u8> {
        let addr = addr as usize;
        self.chip().config[addr..addr + len].to_vec()
    }

    pub fn user_zone(&self, zone: u8) -> Vec<u8> {
        let chip = self.chip();
        let start = zone as usize * chip.zone_size;
        chip.user[start..start + chip.zone_size].to_vec()
    }

    pub fn fuses(&self) -> FuseState {
        self.chip().fuses
    }

    pub fn current_zone(&self) -> Option<u8> {
        self.chip().current_zone
    }

    /// Whether the chip itself considers the host authenticated.
    pub fn is_authenticated(&self) -> bool {
        self.chip().auth.is_some()
    }

    pub fn is_powered(&self) -> bool {
        self.chip().powered
    }

    pub fn clocks(&self) -> u64 {
        self.chip().clocks
    }
}

impl Default for SimulatedChip {
    fn default() -> Self {
        Self::new(&DeviceProfile::default())
    }
}

impl CardTransport for SimulatedChip {
    fn detect_card(&self) -> bool {
        self.chip().card_present
    }

    fn power_on(&self) {
        let mut chip = self.chip();
        let present = chip.card_present;
        chip.powered = present;
        chip.reset_security();
    }

    fn power_off(&self) {
        let mut chip = self.chip();
        chip.powered = false;
        chip.reset_security();
    }

    fn send_command(&self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError> {
        let mut chip = self.chip();
        if !chip.card_present || !chip.powered {
            return Err(TransportError::NoCard);
        }
        if chip.take_fault(Fault::CommandStart) {
            return Err(TransportError::StartFailed {
                tries: chip.start_tries,
            });
        }
        let frame = CommandFrame::from_bytes(frame).ok_or(TransportError::Nak)?;
        if frame.chip() != chip.address {
            // Nobody on the bus answers this address.
            return Err(TransportError::StartFailed {
                tries: chip.start_tries,
            });
        }
        chip.tx_log.push(frame.as_bytes().to_vec());
        if chip.take_fault(Fault::CommandSend) {
            return Err(TransportError::Nak);
        }
        chip.command(frame)
    }

    fn receive(&self, len: usize) -> Result<Vec<u8>, TransportError> {
        let mut chip = self.chip();
        if chip.take_fault(Fault::ReadData) {
            chip.response.clear();
            return Err(TransportError::Nak);
        }
        let available = if chip.take_fault(Fault::ShortRead) {
            len.saturating_sub(1).min(chip.response.len())
        } else {
            len.min(chip.response.len())
        };
        let out: Vec<u8> = chip.response.drain(..available).collect();
        Ok(out)
    }

    fn send_data(&self, data: &[u8]) -> Result<(), TransportError> {
        let mut chip = self.chip();
        if !chip.powered {
            return Err(TransportError::NoCard);
        }
        chip.tx_log.push(data.to_vec());
        if chip.take_fault(Fault::WriteData) {
            chip.pending = None;
            return Err(TransportError::Nak);
        }
        chip.data(data)
    }

    fn random(&self) -> [u8; CHALLENGE_LEN] {
        let mut chip = self.chip();
        chip.randoms
            .pop_front()
            .unwrap_or_else(|| rand::thread_rng().r#gen())
    }

    fn wait_clock(&self, loops: u8) {
        self.chip().clocks += loops as u64;
    }

    fn send_command_byte(&self, byte: u8) -> Result<(), TransportError> {
        let mut chip = self.chip();
        if !chip.powered {
            return Err(TransportError::NoCard);
        }
        if byte >> 4 != chip.address {
            return Err(TransportError::StartFailed {
                tries: chip.start_tries,
            });
        }
        chip.tx_log.push(vec![byte]);
        if chip.take_fault(Fault::CommandByte) {
            return Err(TransportError::Nak);
        }
        if byte & 0x0F == OP_VERIFY_CRYPTO {
            chip.auth = None;
        }
        Ok(())
    }
}
