//! Session coordinator: pick a host, pair if needed, hand off to the launcher.

use crate::launcher::{LaunchRequest, Launcher};
use async_trait::async_trait;
use limelight_core::error::{DiscoveryError, Error, LaunchError, Result};
use limelight_core::{Host, HostFingerprint, StreamConfig, StreamPreset};
use limelight_crypto::KeyMaterial;
use limelight_discovery::{DiscoveryListener, HostDiscovery};
use limelight_pairing::{
    KeyStore, PairingIdentity, PairingOptions, PairingRegistry, PairingSession, Pin, TcpTransport,
    Transport,
};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::OnceCell;
use tracing::{debug, info, warn};

/// Opens a pairing transport to a resolved host.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait TransportConnector: Send + Sync {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Transport>>;
}

/// Connects over TCP to the host's preferred address.
#[derive(Debug, Clone, Copy)]
pub struct TcpConnector {
    connect_timeout: Duration,
}

impl TcpConnector {
    pub fn new(connect_timeout: Duration) -> Self {
        Self { connect_timeout }
    }
}

#[async_trait]
impl TransportConnector for TcpConnector {
    async fn connect(&self, host: &Host) -> Result<Box<dyn Transport>> {
        let addr = host
            .address()
            .ok_or_else(|| DiscoveryError::HostUnreachable(host.name.clone()))?;
        let transport = TcpTransport::connect(addr, self.connect_timeout).await?;
        Ok(Box::new(transport))
    }
}

/// Result of a successful launch handoff.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Launched {
    pub host: Host,
    pub config: StreamConfig,
    pub key_id: u32,
    /// Whether this launch had to pair first.
    pub newly_paired: bool,
}

/// Glue between discovery, pairing and the launcher.
///
/// Owns no protocol logic: it looks hosts up in the discovery snapshot,
/// runs a [`PairingSession`] when no key is cached, and passes the result on.
pub struct SessionCoordinator {
    discovery: HostDiscovery,
    identity: OnceCell<PairingIdentity>,
    identity_path: Option<PathBuf>,
    store: Arc<KeyStore>,
    registry: PairingRegistry,
    connector: Arc<dyn TransportConnector>,
    launcher: Arc<dyn Launcher>,
    pairing: PairingOptions,
    default_preset: StreamPreset,
}

impl SessionCoordinator {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        discovery: HostDiscovery,
        identity: Option<PairingIdentity>,
        identity_path: Option<PathBuf>,
        store: Arc<KeyStore>,
        connector: Arc<dyn TransportConnector>,
        launcher: Arc<dyn Launcher>,
        pairing: PairingOptions,
        default_preset: StreamPreset,
    ) -> Self {
        let cell = OnceCell::new();
        if let Some(identity) = identity {
            let _ = cell.set(identity);
        }
        Self {
            discovery,
            identity: cell,
            identity_path,
            store,
            registry: PairingRegistry::new(),
            connector,
            launcher,
            pairing,
            default_preset,
        }
    }

    /// Start background discovery; `listener` gets every host transition.
    pub fn start_discovery<L>(&mut self, listener: L) -> Result<()>
    where
        L: DiscoveryListener + 'static,
    {
        self.discovery.start(listener)
    }

    pub fn stop_discovery(&mut self) {
        self.discovery.stop();
    }

    pub fn is_discovering(&self) -> bool {
        self.discovery.is_running()
    }

    /// Current discovered hosts, sorted by name.
    pub async fn hosts(&self) -> Vec<Host> {
        self.discovery.hosts().await
    }

    /// Selectable stream presets.
    pub fn presets(&self) -> &'static [StreamPreset] {
        &StreamPreset::ALL
    }

    pub fn default_preset(&self) -> StreamPreset {
        self.default_preset
    }

    pub fn key_store(&self) -> &Arc<KeyStore> {
        &self.store
    }

    /// Cached key material for a host, if paired.
    pub async fn cached_key(&self, name: &str) -> Option<KeyMaterial> {
        let host = self.discovery.host(name).await;
        let fingerprint = self.fingerprint_of(host.as_ref(), name)?;
        self.store.load(&fingerprint)
    }

    /// Pair with a host without launching.
    pub async fn pair(&self, name: &str, pin: &str) -> Result<KeyMaterial> {
        let host = self.resolved_host(name).await?;
        self.pair_host(&host, pin).await
    }

    /// Launch a stream: cached key if paired, else pair with `pin` first.
    ///
    /// A launch the host rejects as revoked drops the cached key and fails
    /// with `PairingRevoked`; pairing again needs a new PIN.
    pub async fn begin_streaming(
        &self,
        name: &str,
        preset: Option<StreamPreset>,
        pin: Option<&str>,
    ) -> Result<Launched> {
        let host = self.resolved_host(name).await?;
        let config = preset.unwrap_or(self.default_preset).config();

        let cached = self
            .fingerprint_of(Some(&host), &host.name)
            .and_then(|fp| self.store.load(&fp));
        let (key, newly_paired) = match cached {
            Some(key) => {
                debug!("Using cached key id {} for {}", key.key_id(), host.name);
                (key, false)
            }
            None => {
                let pin = pin.ok_or_else(|| Error::PinRequired(host.name.clone()))?;
                (self.pair_host(&host, pin).await?, true)
            }
        };

        let address = host
            .address()
            .ok_or_else(|| DiscoveryError::HostUnreachable(host.name.clone()))?;
        let request = LaunchRequest::new(host.name.clone(), address, config, &key);

        match self.launcher.launch(request).await {
            Ok(()) => {
                info!("Launched {} on {}", config_label(&config), host.name);
                Ok(Launched {
                    host,
                    config,
                    key_id: key.key_id(),
                    newly_paired,
                })
            }
            Err(LaunchError::PairingRevoked) => {
                warn!("{} revoked our pairing; forgetting its key", host.name);
                self.store.invalidate(key.host())?;
                Err(LaunchError::PairingRevoked.into())
            }
            Err(e) => Err(e.into()),
        }
    }

    /// Forget the pairing for a host. Returns whether a key was dropped.
    pub async fn forget(&self, name: &str) -> Result<bool> {
        let host = self.discovery.host(name).await;
        match self.fingerprint_of(host.as_ref(), name) {
            Some(fp) => Ok(self.store.invalidate(&fp)?),
            None => Ok(false),
        }
    }

    async fn resolved_host(&self, name: &str) -> Result<Host> {
        let host = self
            .discovery
            .host(name)
            .await
            .ok_or_else(|| DiscoveryError::HostNotFound(name.to_string()))?;
        if !host.is_resolved() {
            return Err(DiscoveryError::HostUnreachable(host.name).into());
        }
        Ok(host)
    }

    /// Advertised fingerprint, else the one the host last paired under.
    fn fingerprint_of(&self, host: Option<&Host>, name: &str) -> Option<HostFingerprint> {
        host.and_then(|h| h.fingerprint)
            .or_else(|| self.store.fingerprint_for(host.map_or(name, |h| h.name.as_str())))
    }

    async fn pair_host(&self, host: &Host, pin: &str) -> Result<KeyMaterial> {
        // Reject bad input before opening a connection.
        Pin::parse(pin)?;
        let identity = self.identity().await?.clone();
        let mut transport = self.connector.connect(host).await?;
        let mut session = PairingSession::new(
            host.clone(),
            identity,
            Arc::clone(&self.store),
            self.registry.clone(),
        )
        .with_options(self.pairing);
        session.begin(transport.as_mut(), pin).await
    }

    /// Client identity, created on first use.
    async fn identity(&self) -> Result<&PairingIdentity> {
        self.identity
            .get_or_try_init(|| async {
                let identity = match &self.identity_path {
                    Some(path) => PairingIdentity::load_or_generate(path)?,
                    None => PairingIdentity::generate(),
                };
                Ok::<_, Error>(identity)
            })
            .await
    }
}

fn config_label(config: &StreamConfig) -> String {
    format!("{}x{}@{}", config.width(), config.height(), config.fps())
}
