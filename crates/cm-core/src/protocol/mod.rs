//! Protocol module - CryptoMemory command set and result codes.

pub mod address;
pub mod constants;
pub mod frame;
pub mod result;

pub use address::ChipAddress;
pub use constants::*;
pub use frame::{CommandFrame, Response, decode};
pub use result::{CmError, Phase, ResultCode};
