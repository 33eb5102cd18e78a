//! Zone module - memory map, registers, fuses and the access controller.

pub mod access;
pub mod fuse;
pub mod map;
pub mod registers;

pub use access::{AccessContext, AccessPlan, Target, ZoneAccessController};
pub use fuse::{Fuse, FuseState};
pub use map::{MemoryMap, ReadRule, Region, RegionKind, WriteRule};
pub use registers::{AccessRegister, Guard, PasswordRegister, ZoneRegisters};
