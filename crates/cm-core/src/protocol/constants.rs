//! Protocol constants for the AT88SC CryptoMemory family.
//!
//! Register layout follows the AT88SC0104C configuration zone.

// ============================================================================
// Chip Addressing
// ============================================================================

/// Factory default device address (DCR chip-select nibble).
pub const DEFAULT_CHIP_ADDRESS: u8 = 0x0B;

/// Highest selectable device address.
pub const MAX_CHIP_ADDRESS: u8 = 0x0F;

// ============================================================================
// Command Opcodes (low nibble, high nibble is the chip address)
// ============================================================================

pub const OP_WRITE_USER_ZONE: u8 = 0x00;
pub const OP_READ_USER_ZONE: u8 = 0x02;
pub const OP_WRITE_SYSTEM_ZONE: u8 = 0x04;
pub const OP_READ_SYSTEM_ZONE: u8 = 0x06;
pub const OP_VERIFY_CRYPTO: u8 = 0x08;
pub const OP_VERIFY_PASSWORD: u8 = 0x0A;

/// Command frame length: opcode, P1, P2, N.
pub const FRAME_LEN: usize = 4;

// ============================================================================
// System Zone Selectors (P1 of read/write system zone)
// ============================================================================

pub const SYS_CONFIG: u8 = 0x00;
pub const SYS_FUSE: u8 = 0x01;
pub const SYS_CHECKSUM: u8 = 0x02;
pub const SYS_SET_USER_ZONE: u8 = 0x03;

// ============================================================================
// Configuration Zone Addresses
// ============================================================================

/// Answer to Reset, 8 bytes, never writable
pub const ATR_ADDR: u8 = 0x00;
pub const ATR_LEN: usize = 8;

/// Fab Code, 2 bytes, never writable
pub const FAB_ADDR: u8 = 0x08;
pub const FAB_LEN: usize = 2;

/// Memory Test Zone, 2 bytes, free access
pub const MTZ_ADDR: u8 = 0x0A;
pub const MTZ_LEN: usize = 2;

/// Card Manufacturer Code, 4 bytes
pub const CMC_ADDR: u8 = 0x0C;
pub const CMC_LEN: usize = 4;

/// Lot History Code, 8 bytes, never writable
pub const LHC_ADDR: u8 = 0x10;
pub const LHC_LEN: usize = 8;

/// Device Configuration Register
pub const DCR_ADDR: u8 = 0x18;
pub const DCR_SME: u8 = 0x80;
pub const DCR_UCR: u8 = 0x40;
pub const DCR_UAT: u8 = 0x20;
pub const DCR_ETA: u8 = 0x10;
pub const DCR_CS: u8 = 0x0F;

/// Identification Number, 7 bytes
pub const INN_ADDR: u8 = 0x19;
pub const INN_LEN: usize = 7;

/// Access Register for user zone 0; zone N pair lives at AR0 + 2N.
pub const AR0_ADDR: u8 = 0x20;
pub const PR0_ADDR: u8 = 0x21;
pub const AR1_ADDR: u8 = 0x22;
pub const PR1_ADDR: u8 = 0x23;
pub const AR2_ADDR: u8 = 0x24;
pub const PR2_ADDR: u8 = 0x25;

/// Issuer Code, 16 bytes
pub const IC_ADDR: u8 = 0x40;
pub const IC_LEN: usize = 16;

/// Cryptogram blocks: AAC, Ci (7 bytes), session key (8 bytes).
pub const CM_CI: u8 = 0x50;
pub const CM_SK: u8 = 0x58;
pub const CRYPTOGRAM_STRIDE: usize = 16;

/// Secret seeds, 8 bytes per key set, write-only.
pub const CM_G: u8 = 0x90;
pub const SEED_LEN: usize = 8;

/// Password sets: PAC write, write password, PAC read, read password.
pub const CM_PSW: u8 = 0xB0;
pub const PASSWORD_STRIDE: usize = 8;
pub const PASSWORD_LEN: usize = 3;

/// Key sets and password sets supported by the register map.
pub const KEY_SETS: u8 = 4;
pub const PASSWORD_SETS: u8 = 8;

/// Password set 7 (write) is the secure code.
pub const SECURE_CODE_SET: u8 = 7;

/// Attempts counter value meaning "last attempt succeeded".
pub const COUNTER_CLEAR: u8 = 0xFF;

/// Checksum length (system zone P1 = 2).
pub const CHECKSUM_LEN: usize = 2;

/// Size of a challenge or cryptogram block.
pub const CHALLENGE_LEN: usize = 8;

/// Verify-crypto P1 flag selecting the encryption (session key) exchange.
pub const CRYPTO_ENCRYPT_FLAG: u8 = 0x10;

/// Verify-password P1 flag selecting the read password.
pub const PASSWORD_READ_FLAG: u8 = 0x10;

// ============================================================================
// Fuses (P2 of burn fuse, bit in fuse byte)
// ============================================================================

pub const CM_FAB: u8 = 0x06;
pub const CM_CMA: u8 = 0x04;
pub const CM_PER: u8 = 0x00;

pub const FUSE_BIT_FAB: u8 = 0x01;
pub const FUSE_BIT_CMA: u8 = 0x02;
pub const FUSE_BIT_PER: u8 = 0x04;

// ============================================================================
// Access Register / Password Register bits
// ============================================================================

pub const AR_PM_MASK: u8 = 0xC0;
pub const AR_AM_MASK: u8 = 0x30;
/// Encryption required when this bit is clear.
pub const AR_ER: u8 = 0x08;
/// Modify forbidden when this bit is clear.
pub const AR_MDF: u8 = 0x02;

pub const PR_AK_MASK: u8 = 0xC0;
/// Anti-tearing mandated for writes when set.
pub const PR_ATM: u8 = 0x08;
pub const PR_PW_MASK: u8 = 0x07;

/// Anti-tearing buffers at most 8 bytes per write.
pub const ANTI_TEARING_MAX: usize = 8;

/// Calculate the address of a key set's cryptogram block.
#[inline]
pub const fn cryptogram_addr(key_set: u8) -> u8 {
    CM_CI + key_set * CRYPTOGRAM_STRIDE as u8
}

/// Calculate the address of a password attempts counter.
#[inline]
pub const fn password_counter_addr(set: u8, read: bool) -> u8 {
    CM_PSW + set * PASSWORD_STRIDE as u8 + if read { 4 } else { 0 }
}

/// Calculate the address of a zone's access register.
#[inline]
pub const fn access_register_addr(zone: u8) -> u8 {
    AR0_ADDR + zone * 2
}
