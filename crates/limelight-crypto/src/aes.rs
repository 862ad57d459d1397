//! AES-128-ECB cipher for PIN-keyed pairing challenges.
//!
//! Challenge blobs are whole blocks built from fresh random nonces and
//! secrets, so every block is encrypted on its own.

use aes::cipher::generic_array::GenericArray;
use aes::cipher::{BlockDecrypt, BlockEncrypt, KeyInit};
use aes::{Aes128, Block};
use limelight_core::error::CryptoError;
use zeroize::ZeroizeOnDrop;

/// AES block size in bytes.
pub const BLOCK_SIZE: usize = 16;

/// Cipher keyed by the PIN-derived key.
#[derive(ZeroizeOnDrop)]
pub struct ChallengeCipher {
    key: [u8; 16],
}

impl ChallengeCipher {
    pub fn new(key: [u8; 16]) -> Self {
        Self { key }
    }

    pub fn encrypt(&self, plaintext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut blocks = to_blocks(plaintext).ok_or_else(|| {
            CryptoError::Encryption(format!(
                "challenge of {} bytes is not whole blocks",
                plaintext.len()
            ))
        })?;
        self.aes().encrypt_blocks(&mut blocks);
        Ok(from_blocks(&blocks))
    }

    pub fn decrypt(&self, ciphertext: &[u8]) -> Result<Vec<u8>, CryptoError> {
        let mut blocks = to_blocks(ciphertext).ok_or_else(|| {
            CryptoError::Decryption(format!(
                "challenge of {} bytes is not whole blocks",
                ciphertext.len()
            ))
        })?;
        self.aes().decrypt_blocks(&mut blocks);
        Ok(from_blocks(&blocks))
    }

    fn aes(&self) -> Aes128 {
        Aes128::new(GenericArray::from_slice(&self.key))
    }
}

/// Split into blocks; `None` for empty or unaligned input.
fn to_blocks(data: &[u8]) -> Option<Vec<Block>> {
    if data.is_empty() || data.len() % BLOCK_SIZE != 0 {
        return None;
    }
    Some(data.chunks_exact(BLOCK_SIZE).map(Block::clone_from_slice).collect())
}

fn from_blocks(blocks: &[Block]) -> Vec<u8> {
    blocks.iter().flat_map(|b| b.iter().copied()).collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn only_whole_blocks_are_accepted() {
        let cipher = ChallengeCipher::new([0u8; 16]);
        assert_eq!(cipher.encrypt(&[0u8; 48]).unwrap().len(), 48);
        assert!(cipher.encrypt(&[0u8; 15]).is_err());
        assert!(cipher.encrypt(&[]).is_err());
        assert!(cipher.decrypt(&[0u8; 20]).is_err());
        assert!(cipher.decrypt(&[]).is_err());
    }

    #[test]
    fn fips197_known_answer() {
        // FIPS-197 Appendix C.1
        let key = hex::decode("000102030405060708090a0b0c0d0e0f").unwrap();
        let pt = hex::decode("00112233445566778899aabbccddeeff").unwrap();
        let ct = hex::decode("69c4e0d86a7b0430d8cdb78070b4c55a").unwrap();

        let cipher = ChallengeCipher::new(key.try_into().unwrap());
        assert_eq!(cipher.encrypt(&pt).unwrap(), ct);
        assert_eq!(cipher.decrypt(&ct).unwrap(), pt);
    }

    #[test]
    fn equal_blocks_encrypt_equally() {
        let ct = ChallengeCipher::new([9u8; 16]).encrypt(&[0xA5; 32]).unwrap();
        assert_eq!(ct[..16], ct[16..]);
    }

    #[test]
    fn wrong_key_garbles_plaintext() {
        let data = [0x5Au8; 32];
        let ct = ChallengeCipher::new([1u8; 16]).encrypt(&data).unwrap();
        let pt = ChallengeCipher::new([2u8; 16]).decrypt(&ct).unwrap();
        assert_ne!(pt, data.to_vec());
    }
}
