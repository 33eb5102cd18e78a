//! Command and response frames.
//!
//! Every command is a fixed 4-byte frame `{opcode, P1, P2, N}`, optionally
//! followed by N payload bytes sent in a separate data phase. Frames are built
//! per call and never persisted.

use std::fmt;

use byteorder::{BigEndian, ByteOrder};

use super::address::ChipAddress;
use super::constants::*;
use super::result::CmError;

/// A 4-byte CryptoMemory command.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct CommandFrame {
    bytes: [u8; FRAME_LEN],
}

impl CommandFrame {
    /// Build a frame from its raw fields. The chip address fills the high
    /// nibble of the opcode.
    pub fn encode(chip: ChipAddress, opcode: u8, p1: u8, p2: u8, n: u8) -> Self {
        Self {
            bytes: [(chip.value() << 4) | (opcode & 0x0F), p1, p2, n],
        }
    }

    /// Build a frame carrying a 16-bit address in P1/P2.
    pub fn encode_wide(chip: ChipAddress, opcode: u8, addr: u16, n: u8) -> Self {
        let mut buf = [0u8; 2];
        BigEndian::write_u16(&mut buf, addr);
        Self::encode(chip, opcode, buf[0], buf[1], n)
    }

    pub fn read_user_zone(chip: ChipAddress, addr: u16, n: u8) -> Self {
        Self::encode_wide(chip, OP_READ_USER_ZONE, addr, n)
    }

    pub fn write_user_zone(chip: ChipAddress, addr: u16, n: u8) -> Self {
        Self::encode_wide(chip, OP_WRITE_USER_ZONE, addr, n)
    }

    pub fn read_config(chip: ChipAddress, addr: u8, n: u8) -> Self {
        Self::encode(chip, OP_READ_SYSTEM_ZONE, SYS_CONFIG, addr, n)
    }

    pub fn write_config(chip: ChipAddress, addr: u8, n: u8) -> Self {
        Self::encode(chip, OP_WRITE_SYSTEM_ZONE, SYS_CONFIG, addr, n)
    }

    pub fn set_user_zone(chip: ChipAddress, zone: u8) -> Self {
        Self::encode(chip, OP_WRITE_SYSTEM_ZONE, SYS_SET_USER_ZONE, zone, 0)
    }

    pub fn read_fuse(chip: ChipAddress) -> Self {
        Self::encode(chip, OP_READ_SYSTEM_ZONE, SYS_FUSE, 0, 1)
    }

    pub fn burn_fuse(chip: ChipAddress, fuse_code: u8) -> Self {
        Self::encode(chip, OP_WRITE_SYSTEM_ZONE, SYS_FUSE, fuse_code, 0)
    }

    pub fn read_checksum(chip: ChipAddress) -> Self {
        Self::encode(chip, OP_READ_SYSTEM_ZONE, SYS_CHECKSUM, 0, CHECKSUM_LEN as u8)
    }

    pub fn send_checksum(chip: ChipAddress) -> Self {
        Self::encode(chip, OP_WRITE_SYSTEM_ZONE, SYS_CHECKSUM, 0, CHECKSUM_LEN as u8)
    }

    pub fn verify_crypto(chip: ChipAddress, key_set: u8, encrypt: bool) -> Self {
        let p1 = if encrypt {
            key_set | CRYPTO_ENCRYPT_FLAG
        } else {
            key_set
        };
        Self::encode(chip, OP_VERIFY_CRYPTO, p1, 0, (2 * CHALLENGE_LEN) as u8)
    }

    pub fn verify_password(chip: ChipAddress, set: u8, read: bool) -> Self {
        let p1 = if read { set | PASSWORD_READ_FLAG } else { set };
        Self::encode(chip, OP_VERIFY_PASSWORD, p1, 0, PASSWORD_LEN as u8)
    }

    /// Parse raw bytes received by a transport back into a frame.
    pub fn from_bytes(bytes: &[u8]) -> Option<Self> {
        let bytes: [u8; FRAME_LEN] = bytes.get(..FRAME_LEN)?.try_into().ok()?;
        Some(Self { bytes })
    }

    pub fn as_bytes(&self) -> &[u8; FRAME_LEN] {
        &self.bytes
    }

    /// Chip address carried in the opcode.
    pub fn chip(&self) -> u8 {
        self.bytes[0] >> 4
    }

    /// Opcode without the chip address.
    pub fn opcode(&self) -> u8 {
        self.bytes[0] & 0x0F
    }

    pub fn p1(&self) -> u8 {
        self.bytes[1]
    }

    pub fn p2(&self) -> u8 {
        self.bytes[2]
    }

    /// 16-bit address formed by P1/P2.
    pub fn wide_addr(&self) -> u16 {
        BigEndian::read_u16(&self.bytes[1..3])
    }

    /// Length field; bytes to follow or to be returned.
    pub fn len(&self) -> u8 {
        self.bytes[3]
    }

    pub fn is_empty(&self) -> bool {
        self.bytes[3] == 0
    }
}

impl fmt::Debug for CommandFrame {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "CommandFrame({:02X} {:02X} {:02X} {:02X})",
            self.bytes[0], self.bytes[1], self.bytes[2], self.bytes[3]
        )
    }
}

/// Data returned by the chip in answer to a read command.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Response {
    data: Vec<u8>,
}

impl Response {
    /// First byte of the response; attempts counters are read this way.
    pub fn status(&self) -> Option<u8> {
        self.data.first().copied()
    }

    pub fn data(&self) -> &[u8] {
        &self.data
    }

    pub fn into_data(self) -> Vec<u8> {
        self.data
    }
}

/// Validate a received buffer against the length the command asked for.
pub fn decode(mut raw: Vec<u8>, expected_len: usize) -> Result<Response, CmError> {
    if raw.len() < expected_len {
        return Err(CmError::ReadData);
    }
    raw.truncate(expected_len);
    Ok(Response { data: raw })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip() -> ChipAddress {
        ChipAddress::default()
    }

    #[test]
    fn test_opcode_carries_chip_address() {
        let frame = CommandFrame::read_config(chip(), DCR_ADDR, 1);
        assert_eq!(frame.as_bytes(), &[0xB6, 0x00, 0x18, 0x01]);
        assert_eq!(frame.chip(), DEFAULT_CHIP_ADDRESS);
        assert_eq!(frame.opcode(), OP_READ_SYSTEM_ZONE);

        let other = ChipAddress::new(0x01).unwrap();
        let frame = CommandFrame::set_user_zone(other, 2);
        assert_eq!(frame.as_bytes(), &[0x14, 0x03, 0x02, 0x00]);
    }

    #[test]
    fn test_wide_address_is_big_endian() {
        let frame = CommandFrame::write_user_zone(chip(), 0x0123, 8);
        assert_eq!(frame.as_bytes(), &[0xB0, 0x01, 0x23, 0x08]);
        assert_eq!(frame.wide_addr(), 0x0123);
    }

    #[test]
    fn test_security_frames() {
        assert_eq!(
            CommandFrame::verify_password(chip(), 7, false).as_bytes(),
            &[0xBA, 0x07, 0x00, 0x03]
        );
        assert_eq!(
            CommandFrame::verify_password(chip(), 2, true).as_bytes(),
            &[0xBA, 0x12, 0x00, 0x03]
        );
        assert_eq!(
            CommandFrame::verify_crypto(chip(), 1, true).as_bytes(),
            &[0xB8, 0x11, 0x00, 0x10]
        );
        assert_eq!(
            CommandFrame::burn_fuse(chip(), CM_CMA).as_bytes(),
            &[0xB4, 0x01, 0x04, 0x00]
        );
    }

    #[test]
    fn test_decode_short_read() {
        assert_eq!(decode(vec![1, 2], 3), Err(CmError::ReadData));

        let resp = decode(vec![0xFF, 1, 2, 3], 2).unwrap();
        assert_eq!(resp.data(), &[0xFF, 1]);
        assert_eq!(resp.status(), Some(0xFF));
    }

    #[test]
    fn test_from_bytes() {
        assert!(CommandFrame::from_bytes(&[0xB2, 0x00]).is_none());
        let frame = CommandFrame::from_bytes(&[0xB2, 0x00, 0x10, 0x04]).unwrap();
        assert_eq!(frame.opcode(), OP_READ_USER_ZONE);
        assert_eq!(frame.len(), 4);
    }
}
