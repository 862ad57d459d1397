//! Host representation and identification types.

use crate::error::ParseError;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::net::SocketAddr;

/// Default port of the host's pairing service.
pub const DEFAULT_PAIRING_PORT: u16 = 47989;

/// Resolution state of a discovered host.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HostState {
    /// Advertisement seen, nothing resolved yet.
    Discovered,
    /// Address resolution in flight.
    Resolving,
    /// At least one address is known; eligible for pairing and launch.
    Resolved,
    /// Resolution did not complete within the timeout.
    Unreachable,
}

impl HostState {
    /// Whether moving from `self` to `next` keeps the per-host ordering.
    ///
    /// `Resolved -> Resolved` is a refresh with new addresses and
    /// `Unreachable -> Resolving` is a fresh resolution attempt.
    pub fn can_transition_to(self, next: HostState) -> bool {
        use HostState::*;
        matches!(
            (self, next),
            (Discovered, Resolving)
                | (Resolving, Resolved)
                | (Resolving, Unreachable)
                | (Resolved, Resolved)
                | (Unreachable, Resolving)
        )
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            HostState::Discovered => "discovered",
            HostState::Resolving => "resolving",
            HostState::Resolved => "resolved",
            HostState::Unreachable => "unreachable",
        }
    }
}

impl fmt::Display for HostState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// SHA-256 fingerprint of a host's long-term public key.
#[derive(Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct HostFingerprint(pub [u8; 32]);

impl HostFingerprint {
    /// Parse from 64 hex characters.
    pub fn from_hex(s: &str) -> Result<Self, ParseError> {
        let bytes = hex::decode(s.trim()).map_err(|_| ParseError::InvalidHex(s.to_string()))?;
        if bytes.len() != 32 {
            return Err(ParseError::InvalidFormat(format!(
                "fingerprint must be 32 bytes, got {}",
                bytes.len()
            )));
        }
        let mut arr = [0u8; 32];
        arr.copy_from_slice(&bytes);
        Ok(Self(arr))
    }

    /// Lowercase hex rendering.
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }
}

impl fmt::Display for HostFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl fmt::Debug for HostFingerprint {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // Short form keeps logs readable
        write!(f, "HostFingerprint({}…)", &self.to_hex()[..12])
    }
}

/// A streaming host seen on the local network.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Host {
    /// Display name (TXT override or instance label).
    pub name: String,
    /// Full mDNS service instance name; the deduplication key.
    pub instance: String,
    /// Candidate addresses, most recent resolution only.
    pub addresses: Vec<SocketAddr>,
    pub state: HostState,
    /// Fingerprint advertised in the TXT record, if any.
    pub fingerprint: Option<HostFingerprint>,
}

impl Host {
    /// Create a freshly discovered host.
    pub fn new(instance: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            instance: instance.into(),
            addresses: Vec::new(),
            state: HostState::Discovered,
            fingerprint: None,
        }
    }

    /// Create an already resolved host (manual entry, tests).
    pub fn resolved(name: impl Into<String>, address: SocketAddr) -> Self {
        let name = name.into();
        Self {
            instance: name.clone(),
            name,
            addresses: vec![address],
            state: HostState::Resolved,
            fingerprint: None,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.state == HostState::Resolved && !self.addresses.is_empty()
    }

    /// Preferred address: first IPv4 candidate, else the first candidate.
    pub fn address(&self) -> Option<SocketAddr> {
        self.addresses
            .iter()
            .find(|a| a.is_ipv4())
            .or_else(|| self.addresses.first())
            .copied()
    }
}
