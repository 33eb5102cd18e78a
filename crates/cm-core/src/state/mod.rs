//! Session state module.

pub mod machine;

pub use machine::{AuthGrant, CurrentZone, Direction, Grants, SessionPhase, SessionState};
