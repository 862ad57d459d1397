//! Traits for pairing transport and outcome reporting.

use limelight_core::error::{PairingErrorKind, Result};
use limelight_crypto::KeyMaterial;
use async_trait::async_trait;
use tokio::sync::mpsc;

/// Request/response channel to a host's pairing endpoint.
#[async_trait]
#[cfg_attr(test, mockall::automock)]
pub trait Transport: Send {
    /// Send one handshake message and wait for the host's reply.
    async fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>>;
}

#[async_trait]
impl<T: Transport + ?Sized> Transport for Box<T> {
    async fn round_trip(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        (**self).round_trip(request).await
    }
}

/// Outcome of a background pairing attempt.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PairingOutcome {
    Paired(KeyMaterial),
    Failed(PairingErrorKind),
}

/// Receives the result of a spawned pairing attempt.
pub trait PairingListener: Send + Sync {
    fn on_paired(&self, key: &KeyMaterial);

    /// Called with the failure class, which decides whether to retry or re-prompt.
    fn on_pairing_failed(&self, kind: PairingErrorKind);
}

impl PairingListener for mpsc::UnboundedSender<PairingOutcome> {
    fn on_paired(&self, key: &KeyMaterial) {
        let _ = self.send(PairingOutcome::Paired(key.clone()));
    }

    fn on_pairing_failed(&self, kind: PairingErrorKind) {
        let _ = self.send(PairingOutcome::Failed(kind));
    }
}
