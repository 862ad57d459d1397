//! Error types for the limelight client.

use crate::host::HostFingerprint;
use std::time::Duration;
use thiserror::Error;

/// Primary error type for all limelight operations.
#[derive(Error, Debug)]
pub enum Error {
    #[error("Discovery error: {0}")]
    Discovery(#[from] DiscoveryError),

    #[error("Pairing error: {0}")]
    Pairing(#[from] PairingError),

    #[error("Key store error: {0}")]
    Store(#[from] StoreError),

    #[error("Launch error: {0}")]
    Launch(#[from] LaunchError),

    #[error("Crypto error: {0}")]
    Crypto(#[from] CryptoError),

    #[error("Parse error: {0}")]
    Parse(#[from] ParseError),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Host {0} is not paired and no PIN was supplied")]
    PinRequired(String),
}

/// Errors during mDNS host discovery.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryError {
    #[error("mDNS daemon error: {0}")]
    Daemon(String),

    #[error("Discovery is already running")]
    AlreadyRunning,

    #[error("Host unreachable: {0}")]
    HostUnreachable(String),

    #[error("Host not found: {0}")]
    HostNotFound(String),
}

/// Broad class of a pairing failure.
///
/// The class decides the user-facing corrective action: transport failures
/// are retried, cryptographic failures need the PIN entered again.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum PairingErrorKind {
    /// Network failure, timeout or a malformed host message.
    Transport,
    /// Handshake verification failed (wrong PIN, rejection, tampering).
    Cryptographic,
    /// Local input validation failed before any I/O.
    InvalidInput,
    /// The API was misused by the caller.
    Usage,
    /// Persisted local state could not be read or written.
    Local,
}

/// Errors during the PIN pairing handshake.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum PairingError {
    #[error("Transport failure: {0}")]
    Transport(String),

    #[error("Host did not respond within {0:?}")]
    Timeout(Duration),

    #[error("Malformed pairing message: {0}")]
    Protocol(String),

    #[error("Challenge response mismatch (wrong PIN or tampering)")]
    ChallengeMismatch,

    #[error("Pairing rejected by host: {0}")]
    ServerRejected(String),

    #[error("Final pairing verification failed: {0}")]
    FinalVerification(String),

    #[error("Invalid PIN: {0}")]
    InvalidPin(String),

    #[error("Pairing already in progress for host {0}")]
    PairingInProgress(String),

    #[error("Pairing session already used; create a new session per attempt")]
    SessionConsumed,

    #[error("Invalid handshake state: {0}")]
    InvalidState(String),
}

impl PairingError {
    /// Classify this error.
    pub fn kind(&self) -> PairingErrorKind {
        match self {
            PairingError::Transport(_) | PairingError::Timeout(_) | PairingError::Protocol(_) => {
                PairingErrorKind::Transport
            }
            PairingError::ChallengeMismatch
            | PairingError::ServerRejected(_)
            | PairingError::FinalVerification(_) => PairingErrorKind::Cryptographic,
            PairingError::InvalidPin(_) => PairingErrorKind::InvalidInput,
            PairingError::PairingInProgress(_)
            | PairingError::SessionConsumed
            | PairingError::InvalidState(_) => PairingErrorKind::Usage,
        }
    }

    /// True when re-entering the PIN is the corrective action.
    pub fn needs_new_pin(&self) -> bool {
        self.kind() == PairingErrorKind::Cryptographic
    }

    /// Short user-facing hint for the corrective action.
    pub fn recovery_hint(&self) -> &'static str {
        match self.kind() {
            PairingErrorKind::Transport => "Check the network connection and retry",
            PairingErrorKind::Cryptographic => "Re-enter the PIN shown on the host",
            PairingErrorKind::InvalidInput => "Enter the 4-digit PIN shown on the host",
            PairingErrorKind::Usage => "Wait for the current pairing attempt to finish",
            PairingErrorKind::Local => "Check that the state directory is writable",
        }
    }
}

impl Error {
    /// Failure class of an error surfaced by a pairing attempt.
    pub fn failure_kind(&self) -> PairingErrorKind {
        match self {
            Error::Pairing(e) => e.kind(),
            Error::Discovery(_) | Error::Io(_) | Error::Parse(_) | Error::Crypto(_) => {
                PairingErrorKind::Transport
            }
            Error::Store(_) => PairingErrorKind::Local,
            Error::Launch(_) | Error::Config(_) | Error::PinRequired(_) => PairingErrorKind::Usage,
        }
    }
}

/// Errors reading or writing persisted pairing state.
#[derive(Error, Debug)]
pub enum StoreError {
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Unrecognised file format")]
    UnknownFormat,

    #[error("Unsupported format version: {0}")]
    UnsupportedVersion(u8),

    #[error("Corrupt store: {0}")]
    Corrupt(String),

    #[error("Key negotiated with {key_host} cannot be stored under {fingerprint}")]
    HostMismatch {
        fingerprint: HostFingerprint,
        key_host: HostFingerprint,
    },
}

/// Errors reported by the external streaming launcher.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum LaunchError {
    #[error("Host reports the pairing as revoked")]
    PairingRevoked,

    #[error("Launch rejected by host: {0}")]
    Rejected(String),

    #[error("Launcher unavailable: {0}")]
    Unavailable(String),
}

/// Cryptographic operation errors.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CryptoError {
    #[error("Encryption failed: {0}")]
    Encryption(String),

    #[error("Decryption failed: {0}")]
    Decryption(String),

    #[error("Key derivation failed: {0}")]
    KeyDerivation(String),

    #[error("Invalid key length: expected {expected}, got {actual}")]
    InvalidKeyLength { expected: usize, actual: usize },

    #[error("Signature verification failed")]
    SignatureInvalid,
}

/// Parsing errors for wire and record formats.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ParseError {
    #[error("Invalid format: {0}")]
    InvalidFormat(String),

    #[error("Missing required field: {0}")]
    MissingField(&'static str),

    #[error("Invalid hex value: {0}")]
    InvalidHex(String),

    #[error("Invalid value: {0}")]
    InvalidValue(String),
}

/// Convenience Result type.
pub type Result<T> = std::result::Result<T, Error>;
