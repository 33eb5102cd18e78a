//! Result codes returned by every public operation.
//!
//! The device library reports exactly one byte-sized code per call. On the
//! Rust side operations return `Result<T, CmError>`; [`ResultCode`] recovers
//! the byte for callers that branch on it.

use std::fmt;

use thiserror::Error;

use crate::transport::TransportError;

pub const SUCCESS: u8 = 0x00;
pub const FAILED: u8 = 0x01;
pub const FAIL_CMDSTART: u8 = 0x02;
pub const FAIL_CMDSEND: u8 = 0x03;
pub const FAIL_WRDATA: u8 = 0x04;
pub const FAIL_RDDATA: u8 = 0x05;
pub const UNKNOWN_DEVICE: u8 = 0x06;
pub const PASSWORD_NOT_ACCEPTED: u8 = 0x07;
pub const CRYPTOGRAM_NOT_ACCEPTED: u8 = 0x08;
pub const INVALID_USER_ZONE: u8 = 0x09;
pub const INVALID_CRYPTO_ADDR: u8 = 0x0A;
pub const INVALID_NUM_BYTES_2WRITE: u8 = 0x0B;
pub const INVALID_NUM_BYTES_2READ: u8 = 0x0C;

/// Failure of a CryptoMemory operation. One variant per failure code.
#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
pub enum CmError {
    #[error("general failure")]
    Failed,

    #[error("chip failed to enter command mode")]
    CommandStart,

    #[error("failed to send command")]
    CommandSend,

    #[error("failed to write data")]
    WriteData,

    #[error("failed to read data")]
    ReadData,

    #[error("unknown device")]
    UnknownDevice,

    #[error("password not accepted")]
    PasswordNotAccepted,

    #[error("cryptogram not accepted")]
    CryptogramNotAccepted,

    #[error("invalid user zone")]
    InvalidUserZone,

    #[error("invalid address")]
    InvalidAddress,

    #[error("too many bytes to write")]
    WriteTooLong,

    #[error("too many bytes to read")]
    ReadTooLong,
}

impl CmError {
    /// Wire code of this failure.
    pub const fn code(self) -> u8 {
        match self {
            CmError::Failed => FAILED,
            CmError::CommandStart => FAIL_CMDSTART,
            CmError::CommandSend => FAIL_CMDSEND,
            CmError::WriteData => FAIL_WRDATA,
            CmError::ReadData => FAIL_RDDATA,
            CmError::UnknownDevice => UNKNOWN_DEVICE,
            CmError::PasswordNotAccepted => PASSWORD_NOT_ACCEPTED,
            CmError::CryptogramNotAccepted => CRYPTOGRAM_NOT_ACCEPTED,
            CmError::InvalidUserZone => INVALID_USER_ZONE,
            CmError::InvalidAddress => INVALID_CRYPTO_ADDR,
            CmError::WriteTooLong => INVALID_NUM_BYTES_2WRITE,
            CmError::ReadTooLong => INVALID_NUM_BYTES_2READ,
        }
    }
}

/// Exchange phase a transport error occurred in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Command,
    WriteData,
    ReadData,
}

impl CmError {
    /// Map a transport failure to the code for the phase it happened in.
    pub fn from_transport(phase: Phase, err: &TransportError) -> Self {
        match (phase, err) {
            (Phase::Command, TransportError::StartFailed { .. }) => CmError::CommandStart,
            (Phase::Command, _) => CmError::CommandSend,
            (Phase::WriteData, _) => CmError::WriteData,
            (Phase::ReadData, _) => CmError::ReadData,
        }
    }
}

/// Byte-sized result code, success included.
#[derive(Clone, Copy, PartialEq, Eq)]
pub struct ResultCode(u8);

impl ResultCode {
    pub const SUCCESS: ResultCode = ResultCode(SUCCESS);

    /// Collapse an operation result into its single code.
    pub fn from_result<T>(result: &Result<T, CmError>) -> Self {
        match result {
            Ok(_) => Self::SUCCESS,
            Err(e) => Self::from(*e),
        }
    }

    pub fn value(self) -> u8 {
        self.0
    }

    pub fn is_success(self) -> bool {
        self.0 == SUCCESS
    }

    /// Symbolic name as used in the device library documentation.
    pub fn name(self) -> &'static str {
        match self.0 {
            SUCCESS => "SUCCESS",
            FAILED => "FAILED",
            FAIL_CMDSTART => "FAIL_CMDSTART",
            FAIL_CMDSEND => "FAIL_CMDSEND",
            FAIL_WRDATA => "FAIL_WRDATA",
            FAIL_RDDATA => "FAIL_RDDATA",
            UNKNOWN_DEVICE => "UNKNOWN_DEVICE",
            PASSWORD_NOT_ACCEPTED => "PASSWORD_NOT_ACCEPTED",
            CRYPTOGRAM_NOT_ACCEPTED => "CRYPTOGRAM_NOT_ACCEPTED",
            INVALID_USER_ZONE => "INVALID_USER_ZONE",
            INVALID_CRYPTO_ADDR => "INVALID_CRYPTO_ADDR",
            INVALID_NUM_BYTES_2WRITE => "INVALID_NUM_BYTES_2WRITE",
            INVALID_NUM_BYTES_2READ => "INVALID_NUM_BYTES_2READ",
            _ => "UNDEFINED",
        }
    }
}

impl From<CmError> for ResultCode {
    fn from(err: CmError) -> Self {
        ResultCode(err.code())
    }
}

impl fmt::Debug for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "ResultCode(0x{:02X} {})", self.0, self.name())
    }
}

impl fmt::Display for ResultCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_codes_are_distinct() {
        let all = [
            CmError::Failed,
            CmError::CommandStart,
            CmError::CommandSend,
            CmError::WriteData,
            CmError::ReadData,
            CmError::UnknownDevice,
            CmError::PasswordNotAccepted,
            CmError::CryptogramNotAccepted,
            CmError::InvalidUserZone,
            CmError::InvalidAddress,
            CmError::WriteTooLong,
            CmError::ReadTooLong,
        ];
        let mut codes: Vec<u8> = all.iter().map(|e| e.code()).collect();
        codes.sort_unstable();
        codes.dedup();
        assert_eq!(codes.len(), all.len());
        assert!(!codes.contains(&SUCCESS));
    }

    #[test]
    fn test_from_result() {
        let ok: Result<(), CmError> = Ok(());
        assert!(ResultCode::from_result(&ok).is_success());

        let err: Result<(), CmError> = Err(CmError::WriteTooLong);
        let code = ResultCode::from_result(&err);
        assert_eq!(code.value(), 0x0B);
        assert_eq!(code.name(), "INVALID_NUM_BYTES_2WRITE");
    }

    #[test]
    fn test_transport_phase_mapping() {
        let start = TransportError::StartFailed { tries: 3 };
        let nak = TransportError::Nak;
        assert_eq!(
            CmError::from_transport(Phase::Command, &start),
            CmError::CommandStart
        );
        assert_eq!(
            CmError::from_transport(Phase::Command, &nak),
            CmError::CommandSend
        );
        assert_eq!(
            CmError::from_transport(Phase::WriteData, &nak),
            CmError::WriteData
        );
        assert_eq!(
            CmError::from_transport(Phase::ReadData, &nak),
            CmError::ReadData
        );
    }
}
