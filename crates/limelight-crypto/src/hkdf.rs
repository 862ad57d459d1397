//! HKDF-SHA512 key schedule for a completed pin exchange.

use hkdf::Hkdf;
use limelight_core::error::CryptoError;
use sha2::Sha512;

/// Info label of the remote-input key.
pub const REMOTE_INPUT_KEY_INFO: &[u8] = b"Remote-Input-Key";
/// Info label of the confirmation key.
pub const CONFIRM_KEY_INFO: &[u8] = b"Pair-Confirm-Encryption-Key";

/// One extract step, any number of labelled expands.
pub struct KeySchedule {
    hk: Hkdf<Sha512>,
}

impl KeySchedule {
    pub fn new(ikm: &[u8], salt: &[u8]) -> Self {
        Self {
            hk: Hkdf::<Sha512>::new(Some(salt), ikm),
        }
    }

    /// Expand `N` bytes for `info`. Fails above 255 * 64 bytes.
    pub fn expand<const N: usize>(&self, info: &[u8]) -> Result<[u8; N], CryptoError> {
        let mut okm = [0u8; N];
        self.hk
            .expand(info, &mut okm)
            .map_err(|_| CryptoError::KeyDerivation(format!("cannot expand {} bytes", N)))?;
        Ok(okm)
    }
}

/// Remote-input key (16 bytes) and confirmation key (32 bytes).
///
/// `ikm` is client secret || host secret, `salt` is client nonce || server nonce.
pub fn derive_pairing_keys(ikm: &[u8], salt: &[u8]) -> Result<([u8; 16], [u8; 32]), CryptoError> {
    let schedule = KeySchedule::new(ikm, salt);
    Ok((
        schedule.expand(REMOTE_INPUT_KEY_INFO)?,
        schedule.expand(CONFIRM_KEY_INFO)?,
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn expand_is_deterministic_per_label() {
        let salt = hex::decode("000102030405060708090a0b0c").unwrap();
        let schedule = KeySchedule::new(&[0x0b; 22], &salt);
        let a: [u8; 42] = schedule.expand(b"info").unwrap();
        let b: [u8; 42] = schedule.expand(b"info").unwrap();
        assert_eq!(a, b);
        let other: [u8; 42] = schedule.expand(b"other").unwrap();
        assert_ne!(a, other);
    }

    #[test]
    fn shorter_output_is_prefix() {
        let schedule = KeySchedule::new(b"ikm", b"salt");
        let long: [u8; 32] = schedule.expand(b"info").unwrap();
        let short: [u8; 16] = schedule.expand(b"info").unwrap();
        assert_eq!(long[..16], short);
    }

    #[test]
    fn oversized_output_fails() {
        let schedule = KeySchedule::new(b"ikm", b"");
        assert!(schedule.expand::<{ 255 * 64 + 1 }>(b"").is_err());
    }

    #[test]
    fn pairing_keys_use_separate_labels() {
        let (key, confirm) = derive_pairing_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        assert_ne!(confirm[..16], key);
    }

    #[test]
    fn pairing_keys_depend_on_salt() {
        let (a, _) = derive_pairing_keys(&[1u8; 32], &[2u8; 32]).unwrap();
        let (b, _) = derive_pairing_keys(&[1u8; 32], &[3u8; 32]).unwrap();
        assert_ne!(a, b);
    }
}
