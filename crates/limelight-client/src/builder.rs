//! Client builder for configuration.

use crate::config::ClientConfig;
use crate::coordinator::{SessionCoordinator, TcpConnector, TransportConnector};
use crate::launcher::{Launcher, LogLauncher};
use limelight_core::error::Result;
use limelight_core::StreamPreset;
use limelight_discovery::{HostDiscovery, ServiceSource};
use limelight_pairing::{KeyStore, PairingIdentity};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Builder for configuring a [`SessionCoordinator`].
pub struct ClientBuilder {
    config: ClientConfig,
    source: Option<Arc<dyn ServiceSource>>,
    connector: Option<Arc<dyn TransportConnector>>,
    launcher: Option<Arc<dyn Launcher>>,
    identity: Option<PairingIdentity>,
    store: Option<Arc<KeyStore>>,
}

impl ClientBuilder {
    /// Create new builder with defaults.
    pub fn new() -> Self {
        Self::from_config(ClientConfig::default())
    }

    /// Start from a loaded configuration.
    pub fn from_config(config: ClientConfig) -> Self {
        Self {
            config,
            source: None,
            connector: None,
            launcher: None,
            identity: None,
            store: None,
        }
    }

    /// Persist identity and key store under `dir`.
    pub fn state_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.state_dir = Some(dir.into());
        self
    }

    pub fn default_preset(mut self, preset: StreamPreset) -> Self {
        self.config.default_preset = preset;
        self
    }

    /// Set the per-round-trip pairing timeout (rounded down to whole seconds, minimum 1).
    pub fn pairing_timeout(mut self, timeout: Duration) -> Self {
        self.config.pairing_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn resolve_timeout(mut self, timeout: Duration) -> Self {
        self.config.resolve_timeout_secs = timeout.as_secs().max(1);
        self
    }

    pub fn service_type(mut self, service_type: impl Into<String>) -> Self {
        self.config.service_type = service_type.into();
        self
    }

    /// Discover through this source instead of the mDNS daemon.
    pub fn discovery_source(mut self, source: Arc<dyn ServiceSource>) -> Self {
        self.source = Some(source);
        self
    }

    pub fn connector(mut self, connector: Arc<dyn TransportConnector>) -> Self {
        self.connector = Some(connector);
        self
    }

    pub fn launcher(mut self, launcher: Arc<dyn Launcher>) -> Self {
        self.launcher = Some(launcher);
        self
    }

    /// Use this identity instead of loading or creating one.
    pub fn identity(mut self, identity: PairingIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    /// Share an existing key store.
    pub fn key_store(mut self, store: Arc<KeyStore>) -> Self {
        self.store = Some(store);
        self
    }

    pub fn config(&self) -> &ClientConfig {
        &self.config
    }

    /// Build the coordinator. Discovery is not started yet.
    pub fn build(self) -> Result<SessionCoordinator> {
        self.config.validate()?;

        let store = match (self.store, self.config.keystore_path()) {
            (Some(store), _) => store,
            (None, Some(path)) => Arc::new(KeyStore::open(path)?),
            (None, None) => Arc::new(KeyStore::in_memory()),
        };

        let options = self.config.discovery_options();
        let discovery = match self.source {
            Some(source) => HostDiscovery::with_source(source, options),
            None => HostDiscovery::new(options)?,
        };

        let connector: Arc<dyn TransportConnector> = match self.connector {
            Some(connector) => connector,
            None => Arc::new(TcpConnector::new(self.config.pairing_timeout())),
        };
        let launcher: Arc<dyn Launcher> = match self.launcher {
            Some(launcher) => launcher,
            None => Arc::new(LogLauncher),
        };

        debug!(
            "Building coordinator (state dir: {:?}, preset: {})",
            self.config.state_dir, self.config.default_preset
        );
        Ok(SessionCoordinator::new(
            discovery,
            self.identity,
            self.config.identity_path(),
            store,
            connector,
            launcher,
            self.config.pairing_options(),
            self.config.default_preset,
        ))
    }
}

impl Default for ClientBuilder {
    fn default() -> Self {
        Self::new()
    }
}
