//! Device facade - one uniform entry point per chip.
//!
//! This module is split into submodules by functionality:
//! - `security`: chip selection, authentication and passwords
//! - `zones`: configuration and user zone access
//! - `system`: checksum and fuses
//!
//! Every operation reports its outcome as `Result<_, CmError>`; the byte
//! code is available through [`ResultCode`].

mod security;
mod system;
mod zones;

use std::sync::Arc;

use tracing::{debug, warn};

use crate::auth::Cryptogram;
use crate::config::{ConfigError, DeviceProfile};
use crate::events::{CmEvent, CmObserver, FrameDirection, TracingObserver};
use crate::protocol::{ChipAddress, CmError, CommandFrame, Phase, ResultCode, decode};
use crate::state::{SessionPhase, SessionState};
use crate::transport::{CardTransport, TransportError};
use crate::zone::{FuseState, ZoneAccessController};

/// CryptoMemory device facade.
///
/// Owns the transport and the session with the selected chip. Calls are
/// synchronous; wrap the facade in a `Mutex` to share it.
pub struct CryptoMemory<T: CardTransport, C: Cryptogram, O: CmObserver> {
    transport: T,
    crypto: C,
    observer: Arc<O>,
    profile: DeviceProfile,
    access: ZoneAccessController,
    session: SessionState,
    fuses: Option<FuseState>,
    powered: bool,
}

impl<T: CardTransport, C: Cryptogram> CryptoMemory<T, C, TracingObserver> {
    /// Create a facade with the default tracing observer.
    pub fn new(transport: T, crypto: C, profile: DeviceProfile) -> Result<Self, ConfigError> {
        Self::with_observer(transport, crypto, profile, Arc::new(TracingObserver))
    }
}

impl<T: CardTransport, C: Cryptogram, O: CmObserver> CryptoMemory<T, C, O> {
    /// Create a facade with a custom observer. Rejects a profile whose
    /// geometry or length ceilings do not fit the command frames.
    pub fn with_observer(
        transport: T,
        crypto: C,
        profile: DeviceProfile,
        observer: Arc<O>,
    ) -> Result<Self, ConfigError> {
        profile.validate()?;
        Ok(Self {
            transport,
            crypto,
            observer,
            access: ZoneAccessController::new(&profile),
            profile,
            session: SessionState::new(),
            fuses: None,
            powered: false,
        })
    }

    pub fn session(&self) -> &SessionState {
        &self.session
    }

    pub fn profile(&self) -> &DeviceProfile {
        &self.profile
    }

    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// Fuse byte read during selection or the last fuse operation.
    pub fn fuses(&self) -> Option<FuseState> {
        self.fuses
    }

    fn emit(&self, event: CmEvent) {
        self.observer.on_event(&event);
    }

    /// Report phase changes and failures of a finished operation.
    fn finish<R>(
        &self,
        operation: &'static str,
        before: SessionPhase,
        result: Result<R, CmError>,
    ) -> Result<R, CmError> {
        let after = self.session.phase();
        if after != before {
            self.emit(CmEvent::PhaseChanged {
                from: before,
                to: after,
            });
        }
        if let Err(e) = &result {
            self.emit(CmEvent::Failed {
                operation,
                code: ResultCode::from(*e),
            });
        }
        result
    }

    /// The selected chip, if it is the one addressed.
    fn ensure_selected(&self, addr: u8) -> Result<ChipAddress, CmError> {
        match self.session.chip() {
            Some(chip) if chip.value() == addr => Ok(chip),
            _ => Err(CmError::UnknownDevice),
        }
    }

    /// Any transport fault voids the security state of the chip.
    fn fault(&mut self, phase: Phase, err: &TransportError) -> CmError {
        warn!(?phase, error = %err, "Transport fault");
        self.session.reset_to_selected();
        CmError::from_transport(phase, err)
    }

    fn command(&mut self, frame: &CommandFrame) -> Result<(), CmError> {
        debug!(?frame, "TX command");
        if let Err(e) = self.transport.send_command(frame.as_bytes()) {
            return Err(self.fault(Phase::Command, &e));
        }
        self.emit(CmEvent::Frame {
            direction: FrameDirection::Tx,
            kind: "command",
            length: frame.as_bytes().len(),
        });
        Ok(())
    }

    fn command_byte(&mut self, byte: u8) -> Result<(), CmError> {
        debug!(byte = format!("{byte:02X}"), "TX command byte");
        if let Err(e) = self.transport.send_command_byte(byte) {
            return Err(self.fault(Phase::Command, &e));
        }
        self.emit(CmEvent::Frame {
            direction: FrameDirection::Tx,
            kind: "command byte",
            length: 1,
        });
        Ok(())
    }

    /// Send a read command and collect exactly the bytes it asks for.
    fn read(&mut self, frame: CommandFrame) -> Result<Vec<u8>, CmError> {
        self.command(&frame)?;
        let len = frame.len() as usize;
        let raw = match self.transport.receive(len) {
            Ok(raw) => raw,
            Err(e) => return Err(self.fault(Phase::ReadData, &e)),
        };
        let actual = raw.len();
        let response = match decode(raw, len) {
            Ok(r) => r,
            Err(e) => {
                warn!(expected = len, actual, "Short response");
                self.session.reset_to_selected();
                return Err(e);
            }
        };
        debug!(len, "RX data");
        self.emit(CmEvent::Frame {
            direction: FrameDirection::Rx,
            kind: "data",
            length: len,
        });
        Ok(response.into_data())
    }

    /// Send a write command with its data phase and let the EEPROM cycle
    /// complete. With anti-tearing the chip must acknowledge a commit poll.
    fn write(&mut self, frame: CommandFrame, data: &[u8], anti_tearing: bool) -> Result<(), CmError> {
        self.command(&frame)?;
        if let Err(e) = self.transport.send_data(data) {
            return Err(self.fault(Phase::WriteData, &e));
        }
        self.emit(CmEvent::Frame {
            direction: FrameDirection::Tx,
            kind: "data",
            length: data.len(),
        });
        self.transport.wait_clock(self.profile.write_wait_clocks);

        if anti_tearing {
            self.transport.wait_clock(self.profile.commit_wait_clocks);
            if let Err(e) = self.transport.send_command_byte(frame.as_bytes()[0]) {
                return Err(self.fault(Phase::WriteData, &e));
            }
            debug!("Anti-tearing commit acknowledged");
        }
        Ok(())
    }
}
