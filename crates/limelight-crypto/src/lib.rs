//! # limelight-crypto
//!
//! Cryptographic primitives for the PIN pairing handshake.
//!
//! This crate provides:
//! - AES-128 challenge encryption under the PIN-derived key
//! - SHA-256 challenge hashes and host fingerprints
//! - Ed25519 for identity signatures
//! - ChaCha20-Poly1305 for the confirmation messages
//! - HKDF-SHA512 for the pairing key schedule
//! - TLV8 pairing records
//!
//! All secret material is zeroized on drop.

pub mod aes;
pub mod chacha;
pub mod digest;
pub mod ed25519;
pub mod hkdf;
pub mod keys;
pub mod tlv;

pub use self::aes::ChallengeCipher;
pub use ed25519::IdentityKeyPair;
pub use keys::{ConfirmationKey, KeyMaterial};
pub use tlv::{Tlv8, TlvError, TlvType};
