//! Client configuration, loadable from TOML.
//!
//! ```toml
//! service_type = "_nvstream._tcp.local."
//! resolve_timeout_secs = 5
//! liveness_window_secs = 300
//! pairing_timeout_secs = 10
//! state_dir = "/home/me/.local/state/limelight"
//! default_preset = "1080p60"
//! ```
//!
//! Absent fields take their defaults.

use limelight_core::error::{Error, Result};
use limelight_core::StreamPreset;
use limelight_discovery::{DiscoveryOptions, STREAMING_SERVICE_TYPE};
use limelight_pairing::PairingOptions;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

/// File name of the client identity inside the state directory.
pub const IDENTITY_FILE: &str = "identity";
/// File name of the key store inside the state directory.
pub const KEYSTORE_FILE: &str = "keystore";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClientConfig {
    #[serde(default = "default_service_type")]
    pub service_type: String,
    #[serde(default = "default_resolve_timeout")]
    pub resolve_timeout_secs: u64,
    #[serde(default = "default_liveness_window")]
    pub liveness_window_secs: u64,
    /// Bound for each pairing request/response exchange.
    #[serde(default = "default_pairing_timeout")]
    pub pairing_timeout_secs: u64,
    /// Where the identity and key store live. `None` keeps both in memory.
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub default_preset: StreamPreset,
}

fn default_service_type() -> String {
    STREAMING_SERVICE_TYPE.to_string()
}

fn default_resolve_timeout() -> u64 {
    5
}

fn default_liveness_window() -> u64 {
    300
}

fn default_pairing_timeout() -> u64 {
    10
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            service_type: default_service_type(),
            resolve_timeout_secs: default_resolve_timeout(),
            liveness_window_secs: default_liveness_window(),
            pairing_timeout_secs: default_pairing_timeout(),
            state_dir: None,
            default_preset: StreamPreset::default(),
        }
    }
}

impl ClientConfig {
    /// Parse and validate TOML text.
    pub fn from_toml_str(text: &str) -> Result<Self> {
        let config: ClientConfig =
            toml::from_str(text).map_err(|e| Error::Config(format!("invalid TOML: {}", e)))?;
        config.validate()?;
        Ok(config)
    }

    /// Load from a TOML file.
    pub fn load(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("cannot read {}: {}", path.display(), e)))?;
        Self::from_toml_str(&text)
    }

    pub fn to_toml_string(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| Error::Config(e.to_string()))
    }

    pub fn validate(&self) -> Result<()> {
        if self.service_type.trim().is_empty() {
            return Err(Error::Config("service_type must not be empty".to_string()));
        }
        for (name, value) in [
            ("resolve_timeout_secs", self.resolve_timeout_secs),
            ("liveness_window_secs", self.liveness_window_secs),
            ("pairing_timeout_secs", self.pairing_timeout_secs),
        ] {
            if value == 0 {
                return Err(Error::Config(format!("{} must be greater than zero", name)));
            }
        }
        if self.liveness_window_secs < self.resolve_timeout_secs {
            return Err(Error::Config(
                "liveness_window_secs must be at least resolve_timeout_secs".to_string(),
            ));
        }
        Ok(())
    }

    pub fn resolve_timeout(&self) -> Duration {
        Duration::from_secs(self.resolve_timeout_secs)
    }

    pub fn liveness_window(&self) -> Duration {
        Duration::from_secs(self.liveness_window_secs)
    }

    pub fn pairing_timeout(&self) -> Duration {
        Duration::from_secs(self.pairing_timeout_secs)
    }

    pub fn discovery_options(&self) -> DiscoveryOptions {
        DiscoveryOptions {
            service_type: self.service_type.clone(),
            resolve_timeout: self.resolve_timeout(),
            liveness_window: self.liveness_window(),
        }
    }

    pub fn pairing_options(&self) -> PairingOptions {
        PairingOptions {
            round_trip_timeout: self.pairing_timeout(),
        }
    }

    pub fn identity_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(IDENTITY_FILE))
    }

    pub fn keystore_path(&self) -> Option<PathBuf> {
        self.state_dir.as_ref().map(|d| d.join(KEYSTORE_FILE))
    }
}
