//! Pluggable cryptogram computation for mutual authentication.
//!
//! The vendor's authentication algorithm is proprietary. The core treats it
//! as an opaque function: given the secret (seed or session key), the
//! cryptogram block read from the chip and the host random, produce the
//! challenge to send and the cryptogram the chip must hold afterwards.

use hmac::{Hmac, Mac};
use sha2::Sha256;

use crate::protocol::{CHALLENGE_LEN, CmError, COUNTER_CLEAR};

type HmacSha256 = Hmac<Sha256>;

/// Output of one cryptogram computation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Challenge {
    /// Challenge sent after the random in the verify-crypto data phase.
    pub host_challenge: [u8; CHALLENGE_LEN],
    /// Cryptogram block (attempts counter first) expected after success.
    pub next_cryptogram: [u8; CHALLENGE_LEN],
    /// Key for the encryption exchange that may follow.
    pub session_key: [u8; CHALLENGE_LEN],
}

impl Challenge {
    /// Check a cryptogram block read back from the chip against the one
    /// this computation predicts. The attempts counter must be clear.
    pub fn accepts(&self, readback: &[u8]) -> bool {
        readback.len() == CHALLENGE_LEN
            && readback[0] == COUNTER_CLEAR
            && readback[1..] == self.next_cryptogram[1..]
    }
}

/// Challenge/response scheme proving possession of a key.
pub trait Cryptogram: Send + Sync {
    fn compute(
        &self,
        key: &[u8; CHALLENGE_LEN],
        cryptogram: &[u8; CHALLENGE_LEN],
        random: &[u8; CHALLENGE_LEN],
    ) -> Result<Challenge, CmError>;
}

/// Keyed-hash stand-in used by the chip simulator and tests.
///
/// Not the vendor algorithm and not interoperable with real parts.
#[derive(Debug, Clone, Copy, Default)]
pub struct HmacCryptogram;

impl Cryptogram for HmacCryptogram {
    fn compute(
        &self,
        key: &[u8; CHALLENGE_LEN],
        cryptogram: &[u8; CHALLENGE_LEN],
        random: &[u8; CHALLENGE_LEN],
    ) -> Result<Challenge, CmError> {
        let mut mac = HmacSha256::new_from_slice(key).map_err(|_| CmError::Failed)?;
        // The attempts counter is not part of the cryptogram proper.
        mac.update(&cryptogram[1..]);
        mac.update(random);
        let digest = mac.finalize().into_bytes();

        let mut host_challenge = [0u8; CHALLENGE_LEN];
        let mut next_cryptogram = [0u8; CHALLENGE_LEN];
        let mut session_key = [0u8; CHALLENGE_LEN];
        host_challenge.copy_from_slice(&digest[0..8]);
        next_cryptogram.copy_from_slice(&digest[8..16]);
        session_key.copy_from_slice(&digest[16..24]);
        next_cryptogram[0] = COUNTER_CLEAR;

        Ok(Challenge {
            host_challenge,
            next_cryptogram,
            session_key,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_hmac_cryptogram_depends_on_random() {
        let key = [0x11; 8];
        let ci = [0xFF, 1, 2, 3, 4, 5, 6, 7];
        let a = HmacCryptogram.compute(&key, &ci, &[0; 8]).unwrap();
        let b = HmacCryptogram.compute(&key, &ci, &[1; 8]).unwrap();
        assert_ne!(a.host_challenge, b.host_challenge);
        assert_eq!(a, HmacCryptogram.compute(&key, &ci, &[0; 8]).unwrap());
    }

    #[test]
    fn test_counter_ignored_in_input() {
        let key = [0x22; 8];
        let fresh = [0xFF, 9, 9, 9, 9, 9, 9, 9];
        let tried = [0xFE, 9, 9, 9, 9, 9, 9, 9];
        let a = HmacCryptogram.compute(&key, &fresh, &[3; 8]).unwrap();
        let b = HmacCryptogram.compute(&key, &tried, &[3; 8]).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn test_accepts_requires_clear_counter() {
        let c = HmacCryptogram.compute(&[0; 8], &[0xFF; 8], &[5; 8]).unwrap();
        assert!(c.accepts(&c.next_cryptogram));

        let mut locked = c.next_cryptogram;
        locked[0] = 0xFE;
        assert!(!c.accepts(&locked));
        assert!(!c.accepts(&c.next_cryptogram[..4]));
    }
}
