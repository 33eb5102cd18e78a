//! Transport layer module.

pub mod sim;
pub mod traits;

pub use sim::{Fault, SimulatedChip};
pub use traits::{CardTransport, TransportError};
