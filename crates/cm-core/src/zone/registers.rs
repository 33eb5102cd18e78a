//! Access and password registers of a user zone.

use crate::protocol::{
    AR_AM_MASK, AR_ER, AR_MDF, AR_PM_MASK, CmError, PR_AK_MASK, PR_ATM, PR_PW_MASK,
};
use crate::state::{Direction, Grants};

/// Which directions a security mode guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Guard {
    None,
    WriteOnly,
    ReadWrite,
}

impl Guard {
    fn from_bits(bits: u8) -> Self {
        match bits {
            0b11 => Guard::None,
            0b10 => Guard::WriteOnly,
            _ => Guard::ReadWrite,
        }
    }

    pub fn guards(self, direction: Direction) -> bool {
        match self {
            Guard::None => false,
            Guard::WriteOnly => direction == Direction::Write,
            Guard::ReadWrite => true,
        }
    }
}

/// Access register (AR): permission bits of a user zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AccessRegister(pub u8);

impl AccessRegister {
    pub fn password_mode(self) -> Guard {
        Guard::from_bits((self.0 & AR_PM_MASK) >> 6)
    }

    pub fn auth_mode(self) -> Guard {
        Guard::from_bits((self.0 & AR_AM_MASK) >> 4)
    }

    pub fn encryption_required(self) -> bool {
        self.0 & AR_ER == 0
    }

    pub fn modify_forbidden(self) -> bool {
        self.0 & AR_MDF == 0
    }
}

/// Password register (PR): credential selection of a user zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PasswordRegister(pub u8);

impl PasswordRegister {
    pub fn key_set(self) -> u8 {
        (self.0 & PR_AK_MASK) >> 6
    }

    pub fn password_set(self) -> u8 {
        self.0 & PR_PW_MASK
    }

    pub fn anti_tearing_mandated(self) -> bool {
        self.0 & PR_ATM != 0
    }
}

/// Register pair of one user zone.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZoneRegisters {
    pub access: AccessRegister,
    pub password: PasswordRegister,
}

impl ZoneRegisters {
    /// Unprogrammed registers: free access, no anti-tearing requirement.
    pub const OPEN: ZoneRegisters = ZoneRegisters {
        access: AccessRegister(0xFF),
        password: PasswordRegister(0xF7),
    };

    pub fn from_bytes(ar: u8, pr: u8) -> Self {
        Self {
            access: AccessRegister(ar),
            password: PasswordRegister(pr),
        }
    }

    pub fn to_bytes(self) -> [u8; 2] {
        [self.access.0, self.password.0]
    }

    /// Check the grant set against this zone's requirements for `direction`.
    pub fn check(&self, grants: &Grants, direction: Direction) -> Result<(), CmError> {
        if direction == Direction::Write && self.access.modify_forbidden() {
            return Err(CmError::InvalidAddress);
        }

        if self.access.password_mode().guards(direction) {
            let set = self.password.password_set();
            let ok = match direction {
                Direction::Read => grants.may_read(set),
                Direction::Write => grants.may_write(set),
            };
            if !ok {
                return Err(CmError::PasswordNotAccepted);
            }
        }

        let key_set = self.password.key_set();
        if self.access.auth_mode().guards(direction) && !grants.authenticated(key_set) {
            return Err(CmError::CryptogramNotAccepted);
        }
        if self.access.encryption_required() && !grants.encrypted(key_set) {
            return Err(CmError::CryptogramNotAccepted);
        }
        Ok(())
    }

    pub fn permits(&self, grants: &Grants, direction: Direction) -> bool {
        self.check(grants, direction).is_ok()
    }

    /// True when `direction` needs a password, authentication or encryption.
    pub fn guarded(&self, direction: Direction) -> bool {
        self.access.password_mode().guards(direction)
            || self.access.auth_mode().guards(direction)
            || self.access.encryption_required()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_zone() {
        let regs = ZoneRegisters::OPEN;
        let grants = Grants::default();
        assert!(regs.permits(&grants, Direction::Read));
        assert!(regs.permits(&grants, Direction::Write));
        assert!(!regs.password.anti_tearing_mandated());
    }

    #[test]
    fn test_guarded_directions() {
        assert!(!ZoneRegisters::OPEN.guarded(Direction::Read));
        assert!(!ZoneRegisters::OPEN.guarded(Direction::Write));
        let write_pw = ZoneRegisters::from_bytes(0xBF, 0x02);
        assert!(!write_pw.guarded(Direction::Read));
        assert!(write_pw.guarded(Direction::Write));
        let auth = ZoneRegisters::from_bytes(0xCF, 0x40);
        assert!(auth.guarded(Direction::Read));
        assert!(auth.guarded(Direction::Write));
    }

    #[test]
    fn test_write_password_zone() {
        // PM = 10 (write only), password set 5.
        let regs = ZoneRegisters::from_bytes(0xBF, 0x05);
        let mut grants = Grants::default();
        assert!(regs.permits(&grants, Direction::Read));
        assert_eq!(
            regs.check(&grants, Direction::Write),
            Err(CmError::PasswordNotAccepted)
        );

        grants.grant_password(5, Direction::Read);
        assert!(!regs.permits(&grants, Direction::Write));

        grants.grant_password(5, Direction::Write);
        assert!(regs.permits(&grants, Direction::Write));
    }

    #[test]
    fn test_read_password_zone() {
        // PM = 00, password set 1.
        let regs = ZoneRegisters::from_bytes(0x3F, 0x01);
        let mut grants = Grants::default();
        assert_eq!(
            regs.check(&grants, Direction::Read),
            Err(CmError::PasswordNotAccepted)
        );
        grants.grant_password(1, Direction::Read);
        assert!(regs.permits(&grants, Direction::Read));
        assert!(!regs.permits(&grants, Direction::Write));
    }

    #[test]
    fn test_authenticated_zone() {
        // AM = 00 (read and write), key set 2, no password.
        let regs = ZoneRegisters::from_bytes(0xCF, 0x80);
        let mut grants = Grants::default();
        assert_eq!(
            regs.check(&grants, Direction::Read),
            Err(CmError::CryptogramNotAccepted)
        );

        grants.grant_auth(1, false);
        assert!(!regs.permits(&grants, Direction::Read));

        grants.grant_auth(2, false);
        assert!(regs.permits(&grants, Direction::Read));
        assert!(regs.permits(&grants, Direction::Write));
    }

    #[test]
    fn test_encryption_required() {
        // ER clear, key set 0.
        let regs = ZoneRegisters::from_bytes(0xF7, 0x00);
        let mut grants = Grants::default();
        grants.grant_auth(0, false);
        assert_eq!(
            regs.check(&grants, Direction::Read),
            Err(CmError::CryptogramNotAccepted)
        );
        grants.grant_auth(0, true);
        assert!(regs.permits(&grants, Direction::Read));
    }

    #[test]
    fn test_modify_forbidden() {
        let regs = ZoneRegisters::from_bytes(0xFD, 0xF7);
        let grants = Grants::default();
        assert!(regs.permits(&grants, Direction::Read));
        assert_eq!(
            regs.check(&grants, Direction::Write),
            Err(CmError::InvalidAddress)
        );
    }

    #[test]
    fn test_anti_tearing_bit() {
        let regs = ZoneRegisters::from_bytes(0xFF, 0xFF);
        assert!(regs.password.anti_tearing_mandated());
        assert_eq!(regs.password.key_set(), 3);
        assert_eq!(regs.password.password_set(), 7);
    }
}
