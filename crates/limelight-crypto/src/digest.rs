//! SHA-256 helpers: challenge hashes, PIN keys and host fingerprints.

use limelight_core::HostFingerprint;
use sha2::{Digest, Sha256};

/// SHA-256 over the concatenation of `parts`.
pub fn sha256(parts: &[&[u8]]) -> [u8; 32] {
    let mut hasher = Sha256::new();
    for part in parts {
        hasher.update(part);
    }
    hasher.finalize().into()
}

/// PIN key: first 16 bytes of SHA-256(salt || PIN).
pub fn pin_key(salt: &[u8; 16], pin: &str) -> [u8; 16] {
    let hash = sha256(&[salt, pin.as_bytes()]);
    let mut key = [0u8; 16];
    key.copy_from_slice(&hash[..16]);
    key
}

/// Fingerprint of an Ed25519 public key.
pub fn fingerprint(public_key: &[u8; 32]) -> HostFingerprint {
    HostFingerprint(sha256(&[public_key]))
}
