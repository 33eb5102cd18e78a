//! Session state of one selected chip.

use std::fmt;

use crate::protocol::{CHALLENGE_LEN, ChipAddress, PASSWORD_SETS, SECURE_CODE_SET};
use crate::zone::ZoneRegisters;

/// Lifecycle phase of a session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SessionPhase {
    /// No chip selected.
    #[default]
    Unselected,
    /// Chip selected, no grants held.
    Selected,
    /// At least one password accepted.
    PasswordVerified,
    /// Mutual authentication succeeded.
    Authenticated,
}

impl fmt::Display for SessionPhase {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SessionPhase::Unselected => write!(f, "UNSELECTED"),
            SessionPhase::Selected => write!(f, "SELECTED"),
            SessionPhase::PasswordVerified => write!(f, "PASSWORD_VERIFIED"),
            SessionPhase::Authenticated => write!(f, "AUTHENTICATED"),
        }
    }
}

/// Password direction.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Read,
    Write,
}

impl Direction {
    pub fn is_read(self) -> bool {
        self == Direction::Read
    }
}

/// Result of a successful mutual authentication.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct AuthGrant {
    pub key_set: u8,
    pub encrypted: bool,
}

/// Privileges currently held on the chip.
///
/// Authentication and password paths are interchangeable grants: access
/// checks look at this set only, never at how a grant was obtained.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Grants {
    /// Bit `2 * set` for write, `2 * set + 1` for read.
    passwords: u16,
    auth: Option<AuthGrant>,
}

impl Grants {
    fn bit(set: u8, direction: Direction) -> u16 {
        1 << (set * 2 + u8::from(direction.is_read()))
    }

    pub fn grant_password(&mut self, set: u8, direction: Direction) {
        debug_assert!(set < PASSWORD_SETS);
        self.passwords |= Self::bit(set, direction);
    }

    /// Exact (set, direction) grant.
    pub fn has_password(&self, set: u8, direction: Direction) -> bool {
        set < PASSWORD_SETS && self.passwords & Self::bit(set, direction) != 0
    }

    /// Whether reading under password `set` is allowed. A write grant says
    /// nothing about reads.
    pub fn may_read(&self, set: u8) -> bool {
        self.has_password(set, Direction::Read)
    }

    pub fn may_write(&self, set: u8) -> bool {
        self.has_password(set, Direction::Write)
    }

    pub fn has_secure_code(&self) -> bool {
        self.has_password(SECURE_CODE_SET, Direction::Write)
    }

    pub fn any_password(&self) -> bool {
        self.passwords != 0
    }

    pub fn clear_passwords(&mut self) {
        self.passwords = 0;
    }

    pub fn grant_auth(&mut self, key_set: u8, encrypted: bool) {
        self.auth = Some(AuthGrant { key_set, encrypted });
    }

    pub fn auth(&self) -> Option<AuthGrant> {
        self.auth
    }

    pub fn authenticated(&self, key_set: u8) -> bool {
        self.auth.is_some_and(|a| a.key_set == key_set)
    }

    pub fn encrypted(&self, key_set: u8) -> bool {
        self.auth.is_some_and(|a| a.key_set == key_set && a.encrypted)
    }

    pub fn is_empty(&self) -> bool {
        self.passwords == 0 && self.auth.is_none()
    }
}

/// User zone currently addressed by small-zone operations.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CurrentZone {
    pub zone: u8,
    pub registers: ZoneRegisters,
}

/// Runtime state of the session with one chip.
#[derive(Debug, Default)]
pub struct SessionState {
    phase: SessionPhase,
    chip: Option<ChipAddress>,
    grants: Grants,
    zone: Option<CurrentZone>,
    anti_tearing: bool,
    last_challenge: Option<[u8; CHALLENGE_LEN]>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Transition to a new phase.
    fn goto_phase(&mut self, new_phase: SessionPhase) {
        if self.phase != new_phase {
            tracing::info!(from = %self.phase, to = %new_phase, "Session transition");
            self.phase = new_phase;
        }
    }

    fn refresh_phase(&mut self) {
        let phase = if self.chip.is_none() {
            SessionPhase::Unselected
        } else if self.grants.auth().is_some() {
            SessionPhase::Authenticated
        } else if self.grants.any_password() {
            SessionPhase::PasswordVerified
        } else {
            SessionPhase::Selected
        };
        self.goto_phase(phase);
    }

    /// Start a fresh session on `chip`, discarding everything prior.
    pub fn select(&mut self, chip: ChipAddress) {
        *self = Self {
            phase: self.phase,
            chip: Some(chip),
            ..Default::default()
        };
        self.refresh_phase();
    }

    /// Forget the chip entirely.
    pub fn deselect(&mut self) {
        *self = Self {
            phase: self.phase,
            ..Default::default()
        };
        self.refresh_phase();
    }

    /// Drop every grant and the working zone, keeping the chip selected.
    /// The last challenge survives so it can never be replayed.
    pub fn reset_to_selected(&mut self) {
        self.grants = Grants::default();
        self.zone = None;
        self.anti_tearing = false;
        self.refresh_phase();
    }

    pub fn grant_password(&mut self, set: u8, direction: Direction) {
        self.grants.grant_password(set, direction);
        self.refresh_phase();
    }

    pub fn clear_passwords(&mut self) {
        self.grants.clear_passwords();
        self.refresh_phase();
    }

    pub fn grant_auth(&mut self, key_set: u8, encrypted: bool) {
        self.grants.grant_auth(key_set, encrypted);
        self.refresh_phase();
    }

    /// Record a challenge about to be used. Returns false if it repeats the
    /// previous one.
    pub fn record_challenge(&mut self, random: &[u8; CHALLENGE_LEN]) -> bool {
        if self.last_challenge.as_ref() == Some(random) {
            return false;
        }
        self.last_challenge = Some(*random);
        true
    }

    pub fn set_zone(&mut self, zone: CurrentZone, anti_tearing: bool) {
        self.zone = Some(zone);
        self.anti_tearing = anti_tearing;
    }

    /// Replace cached registers of the working zone after a config write.
    pub fn update_zone_registers(&mut self, zone: u8, registers: ZoneRegisters) {
        if let Some(current) = self.zone.as_mut()
            && current.zone == zone
        {
            current.registers = registers;
        }
    }

    pub fn phase(&self) -> SessionPhase {
        self.phase
    }

    pub fn chip(&self) -> Option<ChipAddress> {
        self.chip
    }

    pub fn grants(&self) -> &Grants {
        &self.grants
    }

    pub fn zone(&self) -> Option<CurrentZone> {
        self.zone
    }

    pub fn anti_tearing(&self) -> bool {
        self.anti_tearing
    }

    /// Bitmap of guarded user zones whose requirements for `direction` the
    /// current grants meet. Open zones never count.
    pub fn authorized_zones<'a>(
        &self,
        registers: impl IntoIterator<Item = (u8, &'a ZoneRegisters)>,
        direction: Direction,
    ) -> u32 {
        registers
            .into_iter()
            .filter(|(_, r)| r.guarded(direction) && r.permits(&self.grants, direction))
            .fold(0, |acc, (zone, _)| acc | (1 << zone))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn chip() -> ChipAddress {
        ChipAddress::default()
    }

    #[test]
    fn test_select_clears_grants() {
        let mut s = SessionState::new();
        assert_eq!(s.phase(), SessionPhase::Unselected);

        s.select(chip());
        assert_eq!(s.phase(), SessionPhase::Selected);

        s.grant_password(2, Direction::Write);
        assert_eq!(s.phase(), SessionPhase::PasswordVerified);

        s.select(chip());
        assert!(s.grants().is_empty());
        assert_eq!(s.phase(), SessionPhase::Selected);
    }

    #[test]
    fn test_authorized_zones_follow_grants() {
        let regs = [
            ZoneRegisters::OPEN,
            ZoneRegisters::from_bytes(0xCF, 0x40),
            ZoneRegisters::from_bytes(0xBF, 0x02),
        ];
        let zones = || regs.iter().enumerate().map(|(z, r)| (z as u8, r));

        let mut s = SessionState::new();
        s.select(chip());
        assert_eq!(s.authorized_zones(zones(), Direction::Read), 0);

        s.grant_auth(1, false);
        s.grant_password(2, Direction::Write);
        assert_eq!(s.authorized_zones(zones(), Direction::Read), 0b010);
        assert_eq!(s.authorized_zones(zones(), Direction::Write), 0b110);

        s.reset_to_selected();
        assert_eq!(s.authorized_zones(zones(), Direction::Write), 0);
    }

    #[test]
    fn test_password_grants_are_per_direction() {
        let mut g = Grants::default();
        g.grant_password(3, Direction::Read);
        assert!(g.may_read(3));
        assert!(!g.may_write(3));
        assert!(!g.may_read(2));

        g.grant_password(4, Direction::Write);
        assert!(g.may_write(4));
        assert!(!g.may_read(4));
        assert!(!g.has_secure_code());

        g.grant_password(SECURE_CODE_SET, Direction::Write);
        assert!(g.has_secure_code());
    }

    #[test]
    fn test_auth_outranks_password_phase() {
        let mut s = SessionState::new();
        s.select(chip());
        s.grant_password(0, Direction::Write);
        s.grant_auth(1, true);
        assert_eq!(s.phase(), SessionPhase::Authenticated);
        assert!(s.grants().authenticated(1));
        assert!(s.grants().encrypted(1));
        assert!(!s.grants().authenticated(0));

        s.reset_to_selected();
        assert_eq!(s.phase(), SessionPhase::Selected);
        assert!(s.grants().is_empty());
    }

    #[test]
    fn test_challenge_cannot_repeat() {
        let mut s = SessionState::new();
        s.select(chip());
        assert!(s.record_challenge(&[1; 8]));
        assert!(!s.record_challenge(&[1; 8]));
        s.reset_to_selected();
        assert!(!s.record_challenge(&[1; 8]));
        assert!(s.record_challenge(&[2; 8]));
    }

    #[test]
    fn test_deselect() {
        let mut s = SessionState::new();
        s.select(chip());
        s.grant_auth(0, false);
        s.deselect();
        assert_eq!(s.phase(), SessionPhase::Unselected);
        assert!(s.chip().is_none());
        assert!(s.grants().is_empty());
    }
}
