//! Pairing session orchestrator.
//!
//! Drives a [`ClientHandshake`] over a [`Transport`] against one resolved
//! host, bounds every round trip with a timeout, and saves the result into
//! the [`KeyStore`].

use crate::handshake::{ClientHandshake, HandshakeState};
use crate::identity::PairingIdentity;
use crate::pin::Pin;
use crate::store::KeyStore;
use crate::traits::{PairingListener, Transport};
use limelight_core::error::{DiscoveryError, Error, PairingError, Result};
use limelight_core::Host;
use limelight_crypto::KeyMaterial;
use std::collections::HashSet;
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::timeout;
use tracing::{info, warn};

/// Pairing tunables.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PairingOptions {
    /// Upper bound for each request/response exchange.
    pub round_trip_timeout: Duration,
}

impl Default for PairingOptions {
    fn default() -> Self {
        Self {
            round_trip_timeout: Duration::from_secs(10),
        }
    }
}

/// Hosts with a pairing attempt in flight.
///
/// Shared between sessions so only one attempt per host runs at a time.
#[derive(Clone, Default)]
pub struct PairingRegistry {
    active: Arc<Mutex<HashSet<String>>>,
}

impl PairingRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Claim the slot for `host`. The slot is released when the guard drops.
    pub fn try_acquire(&self, host: &str) -> std::result::Result<PairingSlot, PairingError> {
        let mut active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        if !active.insert(host.to_string()) {
            return Err(PairingError::PairingInProgress(host.to_string()));
        }
        Ok(PairingSlot {
            active: Arc::clone(&self.active),
            host: host.to_string(),
        })
    }

    pub fn is_active(&self, host: &str) -> bool {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .contains(host)
    }
}

impl std::fmt::Debug for PairingRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let active = self.active.lock().unwrap_or_else(|p| p.into_inner());
        f.debug_struct("PairingRegistry")
            .field("active", &*active)
            .finish()
    }
}

/// Exclusive claim on one host's pairing slot.
#[derive(Debug)]
pub struct PairingSlot {
    active: Arc<Mutex<HashSet<String>>>,
    host: String,
}

impl Drop for PairingSlot {
    fn drop(&mut self) {
        self.active
            .lock()
            .unwrap_or_else(|p| p.into_inner())
            .remove(&self.host);
    }
}

/// Single-use pairing attempt against one host.
pub struct PairingSession {
    host: Host,
    identity: PairingIdentity,
    store: Arc<KeyStore>,
    registry: PairingRegistry,
    options: PairingOptions,
    state: HandshakeState,
    failed_at: Option<HandshakeState>,
    consumed: bool,
}

impl PairingSession {
    pub fn new(
        host: Host,
        identity: PairingIdentity,
        store: Arc<KeyStore>,
        registry: PairingRegistry,
    ) -> Self {
        Self {
            host,
            identity,
            store,
            registry,
            options: PairingOptions::default(),
            state: HandshakeState::Idle,
            failed_at: None,
            consumed: false,
        }
    }

    pub fn with_options(mut self, options: PairingOptions) -> Self {
        self.options = options;
        self
    }

    pub fn with_timeout(mut self, round_trip_timeout: Duration) -> Self {
        self.options.round_trip_timeout = round_trip_timeout;
        self
    }

    pub fn host(&self) -> &Host {
        &self.host
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// State the handshake was in when it failed.
    pub fn failed_at(&self) -> Option<HandshakeState> {
        self.failed_at
    }

    /// Run the handshake to completion.
    ///
    /// The PIN and host are checked before any I/O. A session runs at most
    /// one handshake; later calls fail with `SessionConsumed`.
    pub async fn begin<T: Transport + ?Sized>(
        &mut self,
        transport: &mut T,
        pin: &str,
    ) -> Result<KeyMaterial> {
        if self.consumed {
            return Err(PairingError::SessionConsumed.into());
        }
        let pin = Pin::parse(pin)?;
        if !self.host.is_resolved() {
            return Err(DiscoveryError::HostUnreachable(self.host.name.clone()).into());
        }
        let _slot = self.registry.try_acquire(&self.host.instance)?;
        self.consumed = true;

        info!("Pairing with {}", self.host.name);
        let mut handshake =
            ClientHandshake::new(self.identity.clone(), pin).expect_host(self.host.fingerprint);
        let result = self.run(&mut handshake, transport).await;

        match &result {
            Ok(key) => {
                self.state = HandshakeState::Paired;
                info!("Paired with {} (key id {})", self.host.name, key.key_id());
            }
            Err(e) => {
                handshake.fail();
                self.state = HandshakeState::Failed;
                self.failed_at = handshake.failed_at();
                warn!("Pairing with {} failed: {}", self.host.name, e);
            }
        }
        result
    }

    /// Run the handshake on a tokio task and report to `listener`.
    pub fn spawn<T>(
        mut self,
        mut transport: T,
        pin: String,
        listener: Arc<dyn PairingListener>,
    ) -> JoinHandle<Result<KeyMaterial>>
    where
        T: Transport + 'static,
    {
        tokio::spawn(async move {
            let result = self.begin(&mut transport, &pin).await;
            match &result {
                Ok(key) => listener.on_paired(key),
                Err(e) => listener.on_pairing_failed(e.failure_kind()),
            }
            result
        })
    }

    async fn run<T: Transport + ?Sized>(
        &self,
        handshake: &mut ClientHandshake,
        transport: &mut T,
    ) -> Result<KeyMaterial> {
        let m1 = handshake.generate_m1()?;
        let m2 = self.exchange(transport, &m1).await?;
        handshake.process_m2(&m2)?;

        let m3 = handshake.generate_m3()?;
        let m4 = self.exchange(transport, &m3).await?;
        handshake.process_m4(&m4)?;

        // Allocated only once both sides proved the PIN.
        let key_id = self.store.allocate_key_id()?;
        let m5 = handshake.generate_m5(key_id)?;
        let m6 = self.exchange(transport, &m5).await?;
        let key = handshake.process_m6(&m6)?;

        let fingerprint = *key.host();
        self.store.save(fingerprint, key.clone())?;
        self.store.remember_host(&self.host.name, fingerprint)?;
        Ok(key)
    }

    async fn exchange<T: Transport + ?Sized>(
        &self,
        transport: &mut T,
        request: &[u8],
    ) -> Result<Vec<u8>> {
        let limit = self.options.round_trip_timeout;
        timeout(limit, transport.round_trip(request))
            .await
            .map_err(|_| Error::Pairing(PairingError::Timeout(limit)))?
    }
}

impl std::fmt::Debug for PairingSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingSession")
            .field("host", &self.host.name)
            .field("state", &self.state)
            .field("consumed", &self.consumed)
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::PairingResponder;
    use crate::traits::{MockTransport, PairingOutcome};
    use crate::transport::LoopbackTransport;
    use limelight_core::error::PairingErrorKind;
    use limelight_core::HostState;
    use tokio::sync::mpsc;

    fn resolved_host() -> Host {
        Host::resolved("LivingRoomPC", "192.0.2.10:47989".parse().unwrap())
    }

    fn session(store: Arc<KeyStore>) -> PairingSession {
        PairingSession::new(
            resolved_host(),
            PairingIdentity::generate(),
            store,
            PairingRegistry::new(),
        )
    }

    fn host(pin: &str) -> PairingResponder {
        PairingResponder::new(PairingIdentity::generate(), Pin::parse(pin).unwrap())
    }

    mod registry {
        use super::*;

        #[test]
        fn second_acquire_is_in_progress() {
            let registry = PairingRegistry::new();
            let _slot = registry.try_acquire("pc").unwrap();
            assert!(registry.is_active("pc"));
            assert!(matches!(
                registry.try_acquire("pc"),
                Err(PairingError::PairingInProgress(_))
            ));
            assert!(registry.try_acquire("other").is_ok());
        }

        #[test]
        fn dropping_slot_releases_host() {
            let registry = PairingRegistry::new();
            drop(registry.try_acquire("pc").unwrap());
            assert!(!registry.is_active("pc"));
            assert!(registry.try_acquire("pc").is_ok());
        }
    }

    mod begin {
        use super::*;

        #[tokio::test]
        async fn pairs_and_saves_key() {
            let store = Arc::new(KeyStore::in_memory());
            let host = host("1234");
            let mut session = session(Arc::clone(&store));
            let mut transport = LoopbackTransport::new(&host);

            let key = session.begin(&mut transport, "1234").await.unwrap();
            assert_eq!(session.state(), HandshakeState::Paired);
            assert_eq!(store.load(&host.fingerprint()), Some(key));
            assert_eq!(store.fingerprint_for("LivingRoomPC"), Some(host.fingerprint()));
        }

        #[tokio::test]
        async fn invalid_pin_fails_before_io() {
            let mut transport = MockTransport::new();
            transport.expect_round_trip().never();
            let mut session = session(Arc::new(KeyStore::in_memory()));

            let err = session.begin(&mut transport, "12a4").await.unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::InvalidPin(_))));
            assert_eq!(session.state(), HandshakeState::Idle);
        }

        #[tokio::test]
        async fn unresolved_host_is_unreachable() {
            let mut transport = MockTransport::new();
            transport.expect_round_trip().never();
            let mut host = resolved_host();
            host.state = HostState::Resolving;
            let mut session = PairingSession::new(
                host,
                PairingIdentity::generate(),
                Arc::new(KeyStore::in_memory()),
                PairingRegistry::new(),
            );

            let err = session.begin(&mut transport, "1234").await.unwrap_err();
            assert!(matches!(
                err,
                Error::Discovery(DiscoveryError::HostUnreachable(_))
            ));
        }

        #[tokio::test]
        async fn second_begin_is_consumed() {
            let host = host("1234");
            let mut session = session(Arc::new(KeyStore::in_memory()));
            let mut transport = LoopbackTransport::new(&host);
            session.begin(&mut transport, "1234").await.unwrap();

            let mut again = LoopbackTransport::new(&host);
            let err = session.begin(&mut again, "1234").await.unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::SessionConsumed)));
            assert_eq!(err.failure_kind(), PairingErrorKind::Usage);
        }

        #[tokio::test]
        async fn wrong_pin_leaves_store_untouched() {
            let store = Arc::new(KeyStore::in_memory());
            let host = host("1234");
            let mut session = session(Arc::clone(&store));
            let mut transport = LoopbackTransport::new(&host);

            let err = session.begin(&mut transport, "0000").await.unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::ChallengeMismatch)));
            assert_eq!(session.state(), HandshakeState::Failed);
            assert_eq!(
                session.failed_at(),
                Some(HandshakeState::AwaitServerChallengeResponse)
            );
            assert!(store.is_empty());
            assert!(store.fingerprint_for("LivingRoomPC").is_none());
        }

        #[tokio::test]
        async fn transport_failure_is_transport_class() {
            let mut transport = MockTransport::new();
            transport.expect_round_trip().times(1).returning(|_| {
                Box::pin(async {
                    Err(Error::Pairing(PairingError::Transport("reset".to_string())))
                })
            });
            let mut session = session(Arc::new(KeyStore::in_memory()));

            let err = session.begin(&mut transport, "1234").await.unwrap_err();
            assert_eq!(err.failure_kind(), PairingErrorKind::Transport);
            assert_eq!(session.state(), HandshakeState::Failed);
        }

        #[tokio::test(start_paused = true)]
        async fn slow_host_times_out() {
            let mut transport = MockTransport::new();
            transport.expect_round_trip().times(1).returning(|_| {
                Box::pin(async {
                    tokio::time::sleep(Duration::from_secs(60)).await;
                    Ok(Vec::new())
                })
            });
            let mut session = session(Arc::new(KeyStore::in_memory()))
                .with_timeout(Duration::from_secs(5));

            let err = session.begin(&mut transport, "1234").await.unwrap_err();
            assert!(matches!(
                err,
                Error::Pairing(PairingError::Timeout(d)) if d == Duration::from_secs(5)
            ));
            assert_eq!(err.failure_kind(), PairingErrorKind::Transport);
        }

        #[tokio::test]
        async fn slot_is_released_after_failure() {
            let registry = PairingRegistry::new();
            let host = host("1234");
            let mut first = PairingSession::new(
                resolved_host(),
                PairingIdentity::generate(),
                Arc::new(KeyStore::in_memory()),
                registry.clone(),
            );
            let _ = first
                .begin(&mut LoopbackTransport::new(&host), "9999")
                .await;
            assert!(!registry.is_active("LivingRoomPC"));
        }
    }

    mod spawn {
        use super::*;

        #[tokio::test]
        async fn reports_success_to_listener() {
            let host = host("1234");
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = session(Arc::new(KeyStore::in_memory())).spawn(
                LoopbackTransport::new(&host),
                "1234".to_string(),
                Arc::new(tx),
            );

            let key = handle.await.unwrap().unwrap();
            assert_eq!(rx.recv().await, Some(PairingOutcome::Paired(key)));
        }

        #[tokio::test]
        async fn reports_failure_kind_to_listener() {
            let host = host("1234");
            let (tx, mut rx) = mpsc::unbounded_channel();
            let handle = session(Arc::new(KeyStore::in_memory())).spawn(
                LoopbackTransport::new(&host),
                "4321".to_string(),
                Arc::new(tx),
            );

            assert!(handle.await.unwrap().is_err());
            assert_eq!(
                rx.recv().await,
                Some(PairingOutcome::Failed(PairingErrorKind::Cryptographic))
            );
        }
    }
}
