//! Card transport abstraction.
//!
//! Defines the `CardTransport` trait the protocol core talks through,
//! allowing different implementations (bit-banged GPIO, simulator, etc.).

use thiserror::Error;

use crate::protocol::{CHALLENGE_LEN, FRAME_LEN};

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("No card present")]
    NoCard,

    #[error("Chip did not enter command mode after {tries} tries")]
    StartFailed { tries: u8 },

    #[error("Chip did not acknowledge")]
    Nak,
}

/// Low-level capability set of a CryptoMemory link.
///
/// The core never assumes a physical binding. Any retry policy on command
/// start (the adapter's start-tries setting) lives behind this trait; the
/// core itself never retries.
pub trait CardTransport: Send + Sync {
    /// Check whether a card is inserted.
    fn detect_card(&self) -> bool;

    /// Apply power and clock the chip through its reset sequence.
    fn power_on(&self);

    /// Remove power; the chip drops all security state.
    fn power_off(&self);

    /// Send a 4-byte command frame.
    fn send_command(&self, frame: &[u8; FRAME_LEN]) -> Result<(), TransportError>;

    /// Receive exactly `len` bytes following a read command.
    fn receive(&self, len: usize) -> Result<Vec<u8>, TransportError>;

    /// Send the data phase of a write command.
    fn send_data(&self, data: &[u8]) -> Result<(), TransportError>;

    /// Produce a fresh random challenge.
    fn random(&self) -> [u8; CHALLENGE_LEN];

    /// Idle the clock for `loops` intervals.
    fn wait_clock(&self, loops: u8);

    /// Send a lone command byte (security reset, acknowledge polling).
    fn send_command_byte(&self, byte: u8) -> Result<(), TransportError>;
}
