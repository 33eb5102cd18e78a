//! Device profile: geometry and timing of one CryptoMemory part.

use std::path::Path;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::protocol::{
    AR0_ADDR, ANTI_TEARING_MAX, ChipAddress, DEFAULT_CHIP_ADDRESS, IC_ADDR,
};

#[derive(Error, Debug)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("Serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    #[error("Invalid profile: {0}")]
    Invalid(String),
}

/// Configuration for a CryptoMemory device.
///
/// Defaults describe the AT88SC0104C: four 32-byte user zones, 16-byte
/// write pages.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeviceProfile {
    /// Device address selected by default.
    pub chip_address: u8,
    /// Number of user zones.
    pub user_zones: u8,
    /// Size of each user zone in bytes.
    pub zone_size: u16,
    /// Largest payload a single write may carry.
    pub max_write_len: usize,
    /// Largest payload a single read may return.
    pub max_read_len: usize,
    /// Largest payload of an anti-tearing write.
    pub anti_tearing_max: usize,
    /// Clock intervals to idle after a write for the EEPROM cycle.
    pub write_wait_clocks: u8,
    /// Clock intervals to idle before an anti-tearing commit poll.
    pub commit_wait_clocks: u8,
    /// Command-start attempts made by the transport adapter.
    pub start_tries: u8,
}

impl Default for DeviceProfile {
    fn default() -> Self {
        Self {
            chip_address: DEFAULT_CHIP_ADDRESS,
            user_zones: 4,
            zone_size: 32,
            max_write_len: 16,
            max_read_len: 32,
            anti_tearing_max: ANTI_TEARING_MAX,
            write_wait_clocks: 5,
            commit_wait_clocks: 10,
            start_tries: 10,
        }
    }
}

impl DeviceProfile {
    /// Load a profile from a TOML file.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let content = std::fs::read_to_string(path)?;
        let profile: DeviceProfile = toml::from_str(&content)?;
        profile.validate()?;
        Ok(profile)
    }

    /// Save the profile to a TOML file.
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<(), ConfigError> {
        std::fs::write(path, self.to_toml()?)?;
        Ok(())
    }

    pub fn to_toml(&self) -> Result<String, ConfigError> {
        Ok(toml::to_string_pretty(self)?)
    }

    /// Default device address as a typed value.
    pub fn chip(&self) -> Result<ChipAddress, ConfigError> {
        ChipAddress::new(self.chip_address)
            .ok_or_else(|| ConfigError::Invalid(format!("chip address 0x{:X}", self.chip_address)))
    }

    /// Check that the profile fits the register map and frame format.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.chip()?;
        if self.user_zones == 0 {
            return Err(ConfigError::Invalid("at least one user zone".into()));
        }
        // Register pairs must stay below the issuer code.
        if AR0_ADDR as usize + 2 * self.user_zones as usize > IC_ADDR as usize {
            return Err(ConfigError::Invalid(format!(
                "{} user zones do not fit the register map",
                self.user_zones
            )));
        }
        if self.zone_size == 0
            || self.user_zones as usize * self.zone_size as usize > u16::MAX as usize + 1
        {
            return Err(ConfigError::Invalid(format!(
                "zone size {} out of range",
                self.zone_size
            )));
        }
        for (name, len) in [
            ("max_write_len", self.max_write_len),
            ("max_read_len", self.max_read_len),
            ("anti_tearing_max", self.anti_tearing_max),
        ] {
            if len == 0 || len > u8::MAX as usize {
                return Err(ConfigError::Invalid(format!("{name} = {len}")));
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_profile_is_valid() {
        let profile = DeviceProfile::default();
        profile.validate().unwrap();
        assert_eq!(profile.chip().unwrap().value(), 0x0B);
    }

    #[test]
    fn test_profile_toml_roundtrip() {
        let profile = DeviceProfile {
            max_write_len: 32,
            ..Default::default()
        };
        let text = profile.to_toml().unwrap();
        let parsed: DeviceProfile = toml::from_str(&text).unwrap();
        assert_eq!(parsed, profile);
    }

    #[test]
    fn test_partial_toml_uses_defaults() {
        let parsed: DeviceProfile = toml::from_str("user_zones = 2\n").unwrap();
        assert_eq!(parsed.user_zones, 2);
        assert_eq!(parsed.zone_size, 32);
    }

    #[test]
    fn test_rejects_bad_profiles() {
        let too_many = DeviceProfile {
            user_zones: 17,
            ..Default::default()
        };
        assert!(too_many.validate().is_err());

        let huge_write = DeviceProfile {
            max_write_len: 300,
            ..Default::default()
        };
        assert!(huge_write.validate().is_err());

        let bad_chip = DeviceProfile {
            chip_address: 0x10,
            ..Default::default()
        };
        assert!(bad_chip.validate().is_err());
    }
}
