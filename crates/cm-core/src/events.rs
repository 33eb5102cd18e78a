//! Event system for UI decoupling.
//!
//! Lets a CLI or test harness follow what the device facade does without
//! coupling it to the protocol core.

use std::fmt;

use crate::protocol::{ChipAddress, ResultCode};
use crate::state::SessionPhase;
use crate::zone::Fuse;

/// Frame direction on the card bus.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FrameDirection {
    Tx, // Host -> Chip
    Rx, // Chip -> Host
}

impl fmt::Display for FrameDirection {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FrameDirection::Tx => write!(f, "TX"),
            FrameDirection::Rx => write!(f, "RX"),
        }
    }
}

/// Events emitted by the device facade.
#[derive(Debug, Clone)]
pub enum CmEvent {
    /// Chip answered at its address.
    ChipSelected { chip: ChipAddress },
    /// Card powered down, chip forgotten.
    ChipDeselected,
    /// Session phase changed.
    PhaseChanged { from: SessionPhase, to: SessionPhase },
    /// Bytes moved across the transport.
    Frame {
        direction: FrameDirection,
        kind: &'static str,
        length: usize,
    },
    /// A fuse was permanently burned.
    FuseBurned { fuse: Fuse },
    /// An operation ended with a failure code.
    Failed { operation: &'static str, code: ResultCode },
}

/// Observer trait for receiving facade events.
pub trait CmObserver: Send + Sync {
    /// Called when an event occurs.
    fn on_event(&self, event: &CmEvent);
}

/// No-op observer that discards all events.
pub struct NullObserver;

impl CmObserver for NullObserver {
    fn on_event(&self, _event: &CmEvent) {}
}

/// Observer that logs events using tracing.
pub struct TracingObserver;

impl CmObserver for TracingObserver {
    fn on_event(&self, event: &CmEvent) {
        match event {
            CmEvent::ChipSelected { chip } => {
                tracing::info!(chip = %chip, "Chip selected");
            }
            CmEvent::ChipDeselected => {
                tracing::info!("Chip deselected");
            }
            CmEvent::PhaseChanged { from, to } => {
                tracing::info!(from = %from, to = %to, "Phase changed");
            }
            CmEvent::Frame {
                direction,
                kind,
                length,
            } => {
                tracing::trace!(dir = %direction, kind = %kind, len = length, "Frame");
            }
            CmEvent::FuseBurned { fuse } => {
                tracing::warn!(fuse = %fuse, "Fuse burned");
            }
            CmEvent::Failed { operation, code } => {
                tracing::debug!(operation = %operation, code = %code, "Operation failed");
            }
        }
    }
}
