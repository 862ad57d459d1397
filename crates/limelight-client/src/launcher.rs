//! Handoff to the external streaming launcher.

use async_trait::async_trait;
use limelight_core::error::LaunchError;
use limelight_core::StreamConfig;
use limelight_crypto::KeyMaterial;
use std::net::SocketAddr;
use tracing::info;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Everything a streaming session needs to start.
#[derive(Clone, PartialEq, Eq, Zeroize, ZeroizeOnDrop)]
pub struct LaunchRequest {
    #[zeroize(skip)]
    pub host: String,
    #[zeroize(skip)]
    pub address: SocketAddr,
    #[zeroize(skip)]
    pub config: StreamConfig,
    /// Remote-input key.
    pub key: [u8; 16],
    /// Key identifier, big-endian.
    pub key_id: [u8; 4],
}

impl LaunchRequest {
    pub fn new(
        host: impl Into<String>,
        address: SocketAddr,
        config: StreamConfig,
        key: &KeyMaterial,
    ) -> Self {
        Self {
            host: host.into(),
            address,
            config,
            key: *key.key(),
            key_id: key.key_id_bytes(),
        }
    }

    pub fn key_id(&self) -> u32 {
        u32::from_be_bytes(self.key_id)
    }
}

impl std::fmt::Debug for LaunchRequest {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LaunchRequest")
            .field("host", &self.host)
            .field("address", &self.address)
            .field("config", &self.config)
            .field("key_id", &self.key_id())
            .finish_non_exhaustive()
    }
}

/// External collaborator that starts the streaming session.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Launcher: Send + Sync {
    /// Start streaming. `PairingRevoked` means the host no longer knows the key.
    async fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError>;
}

/// Launcher that only logs the handoff.
#[derive(Debug, Default, Clone, Copy)]
pub struct LogLauncher;

#[async_trait]
impl Launcher for LogLauncher {
    async fn launch(&self, request: LaunchRequest) -> Result<(), LaunchError> {
        info!(
            "Launch {} at {}: {}x{}@{} {} kbps, key id {}",
            request.host,
            request.address,
            request.config.width(),
            request.config.height(),
            request.config.fps(),
            request.config.bitrate_kbps(),
            request.key_id()
        );
        Ok(())
    }
}
