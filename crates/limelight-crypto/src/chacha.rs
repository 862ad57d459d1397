//! ChaCha20-Poly1305 for the pairing confirmation messages.
//!
//! Every confirmation message has a fixed label (`PC-Msg05`, `PC-Msg06`)
//! that doubles as its nonce, right-aligned in 12 zero bytes. A
//! confirmation key is only ever used for one label per direction.

use chacha20poly1305::aead::{Aead, KeyInit};
use chacha20poly1305::{ChaCha20Poly1305, Key, Nonce};
use limelight_core::error::CryptoError;

/// Poly1305 tag length.
pub const TAG_LEN: usize = 16;
pub const NONCE_LEN: usize = 12;

/// Nonce for a message label. Labels longer than the nonce keep their prefix.
pub fn label_nonce(label: &[u8]) -> [u8; NONCE_LEN] {
    let used = &label[..label.len().min(NONCE_LEN)];
    let mut nonce = [0u8; NONCE_LEN];
    nonce[NONCE_LEN - used.len()..].copy_from_slice(used);
    nonce
}

fn cipher(key: &[u8; 32]) -> ChaCha20Poly1305 {
    ChaCha20Poly1305::new(Key::from_slice(key))
}

/// Encrypt under `label`'s nonce. The tag is appended.
pub fn seal(key: &[u8; 32], label: &[u8], plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
    let nonce = label_nonce(label);
    cipher(key)
        .encrypt(Nonce::from_slice(&nonce), plaintext)
        .map_err(|_| CryptoError::Encryption(format!("cannot seal {}", label_text(label))))
}

/// Decrypt and authenticate a message sealed under `label`.
pub fn open(key: &[u8; 32], label: &[u8], sealed: &[u8]) -> Result<Vec<u8>, CryptoError> {
    if sealed.len() < TAG_LEN {
        return Err(CryptoError::Decryption(format!(
            "{}: {} bytes is shorter than the tag",
            label_text(label),
            sealed.len()
        )));
    }
    let nonce = label_nonce(label);
    cipher(key)
        .decrypt(Nonce::from_slice(&nonce), sealed)
        .map_err(|_| CryptoError::Decryption(format!("{} failed authentication", label_text(label))))
}

fn label_text(label: &[u8]) -> String {
    String::from_utf8_lossy(label).into_owned()
}
