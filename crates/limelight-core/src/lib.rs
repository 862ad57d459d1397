//! # limelight-core
//!
//! Core types and error definitions shared across all limelight crates.
//!
//! This crate provides:
//! - Host representation and resolution states
//! - Host identity fingerprints
//! - Stream configuration presets
//! - Common error types

pub mod error;
pub mod host;
pub mod stream;

pub use error::{
    CryptoError, DiscoveryError, Error, LaunchError, PairingError, PairingErrorKind, ParseError,
    Result, StoreError,
};
pub use host::{Host, HostFingerprint, HostState, DEFAULT_PAIRING_PORT};
pub use stream::{StreamConfig, StreamPreset};
