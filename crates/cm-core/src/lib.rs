//! CM-Core: AT88SC CryptoMemory protocol core in Rust.
//!
//! This crate drives the CryptoMemory family of secure EEPROMs over any
//! card link: chip selection, mutual authentication, password
//! verification and zone-checked reads and writes.
//!
//! # Architecture
//!
//! The crate is organized into layers:
//!
//! - **Protocol**: Constants, command frames, result codes
//! - **Transport**: Card link abstraction (simulator included)
//! - **Auth**: Pluggable cryptogram computation
//! - **State**: Session phases and grants
//! - **Zone**: Memory map, access registers, fuses, access controller
//! - **Events**: Observer pattern for UI decoupling
//! - **Device**: The `CryptoMemory` facade
//!
//! # Example
//!
//! ```no_run
//! use cm_core::{CryptoMemory, DeviceProfile, Direction, HmacCryptogram, SimulatedChip};
//!
//! let profile = DeviceProfile::default();
//! let chip = profile.chip_address;
//! let mut dev = CryptoMemory::new(SimulatedChip::new(&profile), HmacCryptogram, profile)
//!     .expect("invalid profile");
//!
//! dev.select_chip(chip).expect("select failed");
//! dev.verify_password(chip, &[0xDD, 0x42, 0x97], 7, Direction::Write)
//!     .expect("secure code rejected");
//! let atr = dev.read_config_zone(chip, 0x00, 8).expect("read failed");
//! println!("ATR: {atr:02X?}");
//! ```

pub mod auth;
pub mod config;
pub mod device;
pub mod events;
pub mod protocol;
pub mod state;
pub mod transport;
pub mod zone;

// Re-exports for convenience
pub use auth::{Challenge, Cryptogram, HmacCryptogram};
pub use config::{ConfigError, DeviceProfile};
pub use device::CryptoMemory;
pub use events::{CmEvent, CmObserver, NullObserver, TracingObserver};
pub use protocol::{ChipAddress, CmError, ResultCode};
pub use state::{Direction, SessionPhase};
pub use transport::{CardTransport, SimulatedChip, TransportError};
pub use zone::{Fuse, FuseState};
