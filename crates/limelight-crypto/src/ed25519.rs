//! Ed25519 identities for signing pairing secrets.

use ed25519_dalek::{Signature, Signer, SigningKey, VerifyingKey};
use limelight_core::error::CryptoError;
use rand::rngs::OsRng;

/// Long-term identity key pair. The signing key zeroizes itself on drop.
#[derive(Clone)]
pub struct IdentityKeyPair {
    signing: SigningKey,
}

impl IdentityKeyPair {
    pub fn generate() -> Self {
        Self {
            signing: SigningKey::generate(&mut OsRng),
        }
    }

    /// Rebuild from a stored 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing: SigningKey::from_bytes(seed),
        }
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.signing.verifying_key().to_bytes()
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.signing.sign(message).to_bytes()
    }

    /// Seed bytes for persistence.
    pub fn seed(&self) -> [u8; 32] {
        self.signing.to_bytes()
    }
}

impl std::fmt::Debug for IdentityKeyPair {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let public = self.public_key();
        let prefix: String = public[..6].iter().map(|b| format!("{:02x}", b)).collect();
        f.debug_struct("IdentityKeyPair")
            .field("public", &prefix)
            .finish_non_exhaustive()
    }
}

/// Check `signature` over `message` against `public_key`.
///
/// Uses strict verification, so malleable and small-order encodings fail.
pub fn verify(
    public_key: &[u8; 32],
    message: &[u8],
    signature: &[u8; 64],
) -> Result<(), CryptoError> {
    let key = VerifyingKey::from_bytes(public_key).map_err(|_| CryptoError::SignatureInvalid)?;
    key.verify_strict(message, &Signature::from_bytes(signature))
        .map_err(|_| CryptoError::SignatureInvalid)
}

fn fixed<const N: usize>(bytes: &[u8]) -> Result<[u8; N], CryptoError> {
    bytes.try_into().map_err(|_| CryptoError::InvalidKeyLength {
        expected: N,
        actual: bytes.len(),
    })
}

/// A signature field from the wire.
pub fn signature_from_slice(bytes: &[u8]) -> Result<[u8; 64], CryptoError> {
    fixed(bytes)
}

/// A public key field from the wire.
pub fn public_key_from_slice(bytes: &[u8]) -> Result<[u8; 32], CryptoError> {
    fixed(bytes)
}
