//! Pairing key material and secure random helpers.

use limelight_core::HostFingerprint;
use rand::{rngs::OsRng, RngCore};
use subtle::ConstantTimeEq;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Symmetric key bytes of a pairing.
pub const KEY_LEN: usize = 16;

/// Key material established by one successful pairing.
///
/// Valid only for the host identity it was negotiated with.
#[derive(Clone, ZeroizeOnDrop)]
pub struct KeyMaterial {
    key: [u8; KEY_LEN],
    #[zeroize(skip)]
    key_id: u32,
    #[zeroize(skip)]
    host: HostFingerprint,
}

impl KeyMaterial {
    pub fn new(key: [u8; KEY_LEN], key_id: u32, host: HostFingerprint) -> Self {
        Self { key, key_id, host }
    }

    /// Raw key bytes.
    pub fn key(&self) -> &[u8; KEY_LEN] {
        &self.key
    }

    pub fn key_id(&self) -> u32 {
        self.key_id
    }

    /// Key identifier as the 4-byte big-endian wire form.
    pub fn key_id_bytes(&self) -> [u8; 4] {
        self.key_id.to_be_bytes()
    }

    /// Fingerprint of the host this key was negotiated with.
    pub fn host(&self) -> &HostFingerprint {
        &self.host
    }

    pub fn is_for(&self, host: &HostFingerprint) -> bool {
        &self.host == host
    }
}

impl PartialEq for KeyMaterial {
    fn eq(&self, other: &Self) -> bool {
        bool::from(self.key[..].ct_eq(&other.key[..]))
            && self.key_id == other.key_id
            && self.host == other.host
    }
}

impl Eq for KeyMaterial {}

impl std::fmt::Debug for KeyMaterial {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("KeyMaterial")
            .field("key_id", &self.key_id)
            .field("host", &self.host)
            .finish_non_exhaustive()
    }
}

/// 32-byte key used only to confirm a pairing.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct ConfirmationKey(pub [u8; 32]);

impl ConfirmationKey {
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

/// Fill an array from the OS random source.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut out = [0u8; N];
    OsRng.fill_bytes(&mut out);
    out
}

/// Constant-time comparison of two byte slices.
pub fn ct_eq(a: &[u8], b: &[u8]) -> bool {
    a.len() == b.len() && bool::from(a.ct_eq(b))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fp(b: u8) -> HostFingerprint {
        HostFingerprint([b; 32])
    }

    mod key_material {
        use super::*;

        #[test]
        fn key_id_is_big_endian() {
            let km = KeyMaterial::new([0u8; 16], 0x0102_0304, fp(1));
            assert_eq!(km.key_id_bytes(), [1, 2, 3, 4]);
        }

        #[test]
        fn bound_to_host() {
            let km = KeyMaterial::new([5u8; 16], 1, fp(1));
            assert!(km.is_for(&fp(1)));
            assert!(!km.is_for(&fp(2)));
        }

        #[test]
        fn equality_covers_all_fields() {
            let a = KeyMaterial::new([5u8; 16], 1, fp(1));
            assert_eq!(a, a.clone());
            assert_ne!(a, KeyMaterial::new([6u8; 16], 1, fp(1)));
            assert_ne!(a, KeyMaterial::new([5u8; 16], 2, fp(1)));
            assert_ne!(a, KeyMaterial::new([5u8; 16], 1, fp(2)));
        }

        #[test]
        fn debug_hides_key() {
            let km = KeyMaterial::new([0xAB; 16], 7, fp(1));
            let dbg = format!("{:?}", km);
            assert!(dbg.contains("key_id: 7"));
            assert!(!dbg.contains("171"));
        }
    }

    #[test]
    fn random_bytes_differ() {
        let a: [u8; 16] = random_bytes();
        let b: [u8; 16] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn ct_eq_compares_length_and_content() {
        assert!(ct_eq(b"abc", b"abc"));
        assert!(!ct_eq(b"abc", b"abd"));
        assert!(!ct_eq(b"abc", b"ab"));
    }
}
