//! Long-lived pairing identity of this client (or of a simulated host).
//!
//! The identity is an Ed25519 key pair plus a stable identifier derived from
//! the public key. Its certificate, the (identifier, public key) pair, is what
//! the peer sees during pairing; the seed never leaves this process except
//! into the identity file.

use crate::store::write_private;
use limelight_core::error::StoreError;
use limelight_core::HostFingerprint;
use limelight_crypto::digest;
use limelight_crypto::ed25519::IdentityKeyPair;
use std::path::Path;
use tracing::{debug, info};
use zeroize::Zeroizing;

/// Ed25519 identity with a stable identifier.
#[derive(Clone, Debug)]
pub struct PairingIdentity {
    /// Stable identifier, e.g. `"8F3A21C4-9B0D-..."`.
    id: String,
    keypair: IdentityKeyPair,
}

impl PairingIdentity {
    /// Generate a new identity.
    pub fn generate() -> Self {
        Self::from_keypair(IdentityKeyPair::generate())
    }

    /// Create from an existing keypair with an identifier derived from the public key.
    ///
    /// The format is `XXXXXXXX-XXXX-XXXX-XXXX-XXXXXXXXXXXX` over the first 16
    /// public key bytes.
    pub fn from_keypair(keypair: IdentityKeyPair) -> Self {
        let pk = keypair.public_key();
        let hex = hex::encode_upper(&pk[..16]);
        let id = format!(
            "{}-{}-{}-{}-{}",
            &hex[0..8],
            &hex[8..12],
            &hex[12..16],
            &hex[16..20],
            &hex[20..32]
        );
        Self { id, keypair }
    }

    /// Create from an existing keypair with a custom identifier.
    pub fn with_id(keypair: IdentityKeyPair, id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            keypair,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn public_key(&self) -> [u8; 32] {
        self.keypair.public_key()
    }

    /// Certificate presented to the peer.
    pub fn certificate(&self) -> (&str, [u8; 32]) {
        (&self.id, self.keypair.public_key())
    }

    /// SHA-256 fingerprint of the public key.
    pub fn fingerprint(&self) -> HostFingerprint {
        digest::fingerprint(&self.keypair.public_key())
    }

    pub fn sign(&self, message: &[u8]) -> [u8; 64] {
        self.keypair.sign(message)
    }

    /// Load identity from persistent storage.
    ///
    /// File format: line 1 = identifier, line 2 = hex-encoded Ed25519 seed.
    pub fn load(path: &Path) -> Result<Self, StoreError> {
        let contents = std::fs::read_to_string(path)?;
        let mut lines = contents.lines();

        let id = lines
            .next()
            .filter(|l| !l.trim().is_empty())
            .ok_or_else(|| StoreError::Corrupt("identity file missing identifier".to_string()))?
            .trim()
            .to_string();

        let seed_hex = lines
            .next()
            .ok_or_else(|| StoreError::Corrupt("identity file missing seed".to_string()))?;

        let seed_bytes = hex::decode(seed_hex.trim())
            .map_err(|e| StoreError::Corrupt(format!("invalid seed hex: {}", e)))?;

        let seed: [u8; 32] = seed_bytes.as_slice().try_into().map_err(|_| {
            StoreError::Corrupt(format!("seed must be 32 bytes, got {}", seed_bytes.len()))
        })?;

        let keypair = IdentityKeyPair::from_seed(&seed);
        debug!("Loaded pairing identity {}", id);
        Ok(Self { id, keypair })
    }

    /// Save identity to persistent storage, readable by the owner only.
    pub fn save(&self, path: &Path) -> Result<(), StoreError> {
        let contents = Zeroizing::new(format!(
            "{}\n{}\n",
            self.id,
            hex::encode(self.keypair.seed())
        ));
        write_private(path, contents.as_bytes())?;
        Ok(())
    }

    /// Load the identity if the file exists, else generate and save one.
    pub fn load_or_generate(path: &Path) -> Result<Self, StoreError> {
        if path.exists() {
            Self::load(path)
        } else {
            let identity = Self::generate();
            identity.save(path)?;
            info!("Created pairing identity {}", identity.id);
            Ok(identity)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn generate_creates_valid_identity() {
        let identity = PairingIdentity::generate();
        assert_eq!(identity.id().len(), 36);
        assert_eq!(identity.id().matches('-').count(), 4);
    }

    #[test]
    fn id_is_derived_from_public_key() {
        let keypair = IdentityKeyPair::from_seed(&[1u8; 32]);
        let pk = keypair.public_key();
        let a = PairingIdentity::from_keypair(keypair.clone());
        let b = PairingIdentity::from_keypair(keypair);
        assert_eq!(a.id(), b.id());
        assert!(a.id().starts_with(&format!("{:02X}{:02X}", pk[0], pk[1])));
    }

    #[test]
    fn certificate_pairs_id_and_key() {
        let identity = PairingIdentity::with_id(IdentityKeyPair::generate(), "client-1");
        let (id, pk) = identity.certificate();
        assert_eq!(id, "client-1");
        assert_eq!(pk, identity.public_key());
    }

    #[test]
    fn signatures_verify_with_public_key() {
        let identity = PairingIdentity::generate();
        let sig = identity.sign(b"msg");
        limelight_crypto::ed25519::verify(&identity.public_key(), b"msg", &sig).unwrap();
    }

    mod persistence {
        use super::*;

        #[test]
        fn save_and_load_roundtrip() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("identity");
            let original = PairingIdentity::generate();
            original.save(&path).unwrap();

            let loaded = PairingIdentity::load(&path).unwrap();
            assert_eq!(original.id(), loaded.id());
            assert_eq!(original.public_key(), loaded.public_key());
        }

        #[test]
        fn load_or_generate_is_stable() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("state").join("identity");
            let first = PairingIdentity::load_or_generate(&path).unwrap();
            assert!(path.exists());
            let second = PairingIdentity::load_or_generate(&path).unwrap();
            assert_eq!(first.fingerprint(), second.fingerprint());
        }

        #[test]
        fn corrupt_file_is_rejected() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("identity");
            std::fs::write(&path, "id-only\n").unwrap();
            assert!(matches!(
                PairingIdentity::load(&path),
                Err(StoreError::Corrupt(_))
            ));

            std::fs::write(&path, "id\nabcd\n").unwrap();
            assert!(matches!(
                PairingIdentity::load(&path),
                Err(StoreError::Corrupt(_))
            ));
        }

        #[cfg(unix)]
        #[test]
        fn identity_file_is_private() {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempdir().unwrap();
            let path = dir.path().join("identity");
            PairingIdentity::generate().save(&path).unwrap();
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }

        #[cfg(unix)]
        #[test]
        fn save_replaces_file_through_private_temp() {
            use std::os::unix::fs::PermissionsExt;
            let dir = tempdir().unwrap();
            let path = dir.path().join("identity");
            let tmp = path.with_extension("tmp");
            std::fs::write(&path, "old\ncontents\n").unwrap();
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o644)).unwrap();
            std::fs::write(&tmp, "leftover").unwrap();
            std::fs::set_permissions(&tmp, std::fs::Permissions::from_mode(0o644)).unwrap();

            let identity = PairingIdentity::generate();
            identity.save(&path).unwrap();

            assert!(!tmp.exists());
            let mode = std::fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
            assert_eq!(
                PairingIdentity::load(&path).unwrap().public_key(),
                identity.public_key()
            );
        }

        #[test]
        fn failed_save_keeps_previous_identity() {
            let dir = tempdir().unwrap();
            let path = dir.path().join("identity");
            let original = PairingIdentity::generate();
            original.save(&path).unwrap();

            std::fs::create_dir(path.with_extension("tmp")).unwrap();
            assert!(PairingIdentity::generate().save(&path).is_err());
            assert_eq!(
                PairingIdentity::load(&path).unwrap().public_key(),
                original.public_key()
            );
        }
    }
}
