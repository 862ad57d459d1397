//! Host side of the PIN pairing handshake.
//!
//! Used by `serve-pairing` and by tests to stand in for a streaming host.
//! Each connection gets its own [`ResponderSession`]; completed pairings
//! are recorded in the shared client table.

use crate::handshake::{
    field, protocol, PC_MSG05_NONCE, PC_MSG06_NONCE, STATE_M1, STATE_M2, STATE_M3, STATE_M4,
    STATE_M5, STATE_M6,
};
use crate::identity::PairingIdentity;
use crate::pin::Pin;
use limelight_core::error::{Error, PairingError, Result};
use limelight_core::HostFingerprint;
use limelight_crypto::{
    chacha, digest, ed25519, hkdf,
    keys::{ct_eq, random_bytes},
    ChallengeCipher, ConfirmationKey, KeyMaterial, Tlv8, TlvError, TlvType,
};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, RwLock};
use tracing::{debug, info, warn};

/// A client that completed pairing.
#[derive(Clone, Debug)]
pub struct ClientRecord {
    pub public_key: [u8; 32],
    pub key: KeyMaterial,
}

struct Shared {
    identity: PairingIdentity,
    pin: Pin,
    accepting: AtomicBool,
    clients: RwLock<HashMap<String, ClientRecord>>,
}

/// Pairing responder for one host identity and PIN.
#[derive(Clone)]
pub struct PairingResponder {
    shared: Arc<Shared>,
}

impl PairingResponder {
    pub fn new(identity: PairingIdentity, pin: Pin) -> Self {
        Self {
            shared: Arc::new(Shared {
                identity,
                pin,
                accepting: AtomicBool::new(true),
                clients: RwLock::new(HashMap::new()),
            }),
        }
    }

    pub fn fingerprint(&self) -> HostFingerprint {
        self.shared.identity.fingerprint()
    }

    pub fn identity(&self) -> &PairingIdentity {
        &self.shared.identity
    }

    pub fn pin(&self) -> &Pin {
        &self.shared.pin
    }

    /// When false, new pairings are refused at M4 with `Unavailable`.
    pub fn set_accepting(&self, accepting: bool) {
        self.shared.accepting.store(accepting, Ordering::SeqCst);
    }

    pub fn is_accepting(&self) -> bool {
        self.shared.accepting.load(Ordering::SeqCst)
    }

    /// Start a handshake for a new connection.
    pub fn session(&self) -> ResponderSession {
        ResponderSession {
            shared: Arc::clone(&self.shared),
            step: Step::AwaitM1,
        }
    }

    pub fn is_paired(&self, client_id: &str) -> bool {
        self.clients_read().contains_key(client_id)
    }

    /// Host-side key for a paired client.
    pub fn key_for(&self, client_id: &str) -> Option<KeyMaterial> {
        self.clients_read().get(client_id).map(|r| r.key.clone())
    }

    /// Paired client identifiers, sorted.
    pub fn paired_clients(&self) -> Vec<String> {
        let mut ids: Vec<String> = self.clients_read().keys().cloned().collect();
        ids.sort();
        ids
    }

    /// Forget a client. Its next launch is treated as revoked.
    pub fn revoke(&self, client_id: &str) -> bool {
        let removed = self
            .shared
            .clients
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .remove(client_id)
            .is_some();
        if removed {
            info!("Revoked pairing for client {}", client_id);
        }
        removed
    }

    fn clients_read(&self) -> std::sync::RwLockReadGuard<'_, HashMap<String, ClientRecord>> {
        self.shared.clients.read().unwrap_or_else(|p| p.into_inner())
    }
}

impl std::fmt::Debug for PairingResponder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PairingResponder")
            .field("id", &self.shared.identity.id())
            .field("accepting", &self.is_accepting())
            .finish()
    }
}

enum Step {
    AwaitM1,
    AwaitM3 {
        cipher: ChallengeCipher,
        client_id: String,
        client_pk: [u8; 32],
        client_nonce: [u8; 16],
        server_nonce: [u8; 16],
    },
    AwaitM5 {
        client_id: String,
        client_pk: [u8; 32],
        key: [u8; 16],
        confirm: ConfirmationKey,
    },
    Done,
    Failed,
}

/// One host-side handshake.
pub struct ResponderSession {
    shared: Arc<Shared>,
    step: Step,
}

impl ResponderSession {
    /// Handle one client message and produce the reply.
    ///
    /// Authentication failures are answered with Error TLVs; malformed or
    /// out-of-order messages are returned as errors and end the session.
    pub fn handle(&mut self, request: &[u8]) -> Result<Vec<u8>> {
        let tlv = Tlv8::parse(request).map_err(|e| protocol(format!("bad request: {}", e)))?;
        let state = tlv
            .state()
            .ok_or_else(|| protocol("request missing state"))?;

        // Handlers install the next step on success.
        let step = std::mem::replace(&mut self.step, Step::Failed);
        let reply = match (step, state) {
            (Step::AwaitM1, STATE_M1) => self.handle_m1(&tlv)?,
            (Step::AwaitM3 { cipher, client_id, client_pk, client_nonce, server_nonce }, STATE_M3) => {
                self.handle_m3(&tlv, cipher, client_id, client_pk, client_nonce, server_nonce)?
            }
            (Step::AwaitM5 { client_id, client_pk, key, confirm }, STATE_M5) => {
                self.handle_m5(&tlv, client_id, client_pk, key, confirm)?
            }
            (_, state) => {
                return Err(Error::Pairing(PairingError::InvalidState(format!(
                    "unexpected M{} from client",
                    state
                ))))
            }
        };
        Ok(reply.encode())
    }

    pub fn is_complete(&self) -> bool {
        matches!(self.step, Step::Done)
    }

    fn handle_m1(&mut self, tlv: &Tlv8) -> Result<Tlv8> {
        let salt: [u8; 16] = field(tlv, TlvType::Salt)?
            .try_into()
            .map_err(|_| protocol("M1 salt must be 16 bytes"))?;
        let client_id = String::from_utf8(field(tlv, TlvType::Identifier)?.to_vec())
            .map_err(|_| protocol("M1 identifier is not UTF-8"))?;
        let client_pk = ed25519::public_key_from_slice(field(tlv, TlvType::PublicKey)?)
            .map_err(|e| protocol(format!("M1 public key: {}", e)))?;
        let challenge = field(tlv, TlvType::EncryptedData)?;
        if challenge.len() != 16 {
            return Err(protocol("M1 challenge must be 16 bytes"));
        }

        let cipher = ChallengeCipher::new(digest::pin_key(&salt, self.shared.pin.as_str()));
        let mut client_nonce = [0u8; 16];
        client_nonce.copy_from_slice(&cipher.decrypt(challenge)?);
        let server_nonce: [u8; 16] = random_bytes();

        let host_pk = self.shared.identity.public_key();
        let mut plaintext = Vec::with_capacity(48);
        plaintext.extend_from_slice(&digest::sha256(&[&client_nonce[..], &host_pk[..]]));
        plaintext.extend_from_slice(&server_nonce);

        let mut reply = Tlv8::with_state(STATE_M2);
        reply.set(TlvType::PublicKey, host_pk.to_vec());
        reply.set(TlvType::Identifier, self.shared.identity.id().as_bytes().to_vec());
        reply.set(TlvType::EncryptedData, cipher.encrypt(&plaintext)?);

        debug!("Pairing challenge from client {}", client_id);
        self.step = Step::AwaitM3 {
            cipher,
            client_id,
            client_pk,
            client_nonce,
            server_nonce,
        };
        Ok(reply)
    }

    fn handle_m3(
        &mut self,
        tlv: &Tlv8,
        cipher: ChallengeCipher,
        client_id: String,
        client_pk: [u8; 32],
        client_nonce: [u8; 16],
        server_nonce: [u8; 16],
    ) -> Result<Tlv8> {
        if !self.shared.accepting.load(Ordering::SeqCst) {
            info!("Refusing pairing from {}: not accepting", client_id);
            return Ok(Tlv8::error_reply(STATE_M4, TlvError::Unavailable));
        }

        let encrypted = field(tlv, TlvType::EncryptedData)?;
        if encrypted.len() != 48 {
            return Err(protocol("M3 challenge response must be 48 bytes"));
        }
        let signature = ed25519::signature_from_slice(field(tlv, TlvType::Signature)?)
            .map_err(|e| protocol(format!("M3 signature: {}", e)))?;

        let decrypted = cipher.decrypt(encrypted)?;
        let expected = digest::sha256(&[&server_nonce[..], &client_pk[..]]);
        if !ct_eq(&decrypted[..32], &expected) {
            warn!("Client {} failed the PIN challenge", client_id);
            return Ok(Tlv8::error_reply(STATE_M4, TlvError::Authentication));
        }
        let mut client_secret = [0u8; 16];
        client_secret.copy_from_slice(&decrypted[32..48]);

        if ed25519::verify(&client_pk, &[client_secret, server_nonce].concat(), &signature).is_err() {
            warn!("Client {} signature is invalid", client_id);
            return Ok(Tlv8::error_reply(STATE_M4, TlvError::Authentication));
        }

        let host_secret: [u8; 16] = random_bytes();
        let (key, confirm) = hkdf::derive_pairing_keys(
            &[client_secret, host_secret].concat(),
            &[client_nonce, server_nonce].concat(),
        )?;

        let mut reply = Tlv8::with_state(STATE_M4);
        reply.set(TlvType::EncryptedData, cipher.encrypt(&host_secret)?);
        reply.set(
            TlvType::Signature,
            self.shared
                .identity
                .sign(&[host_secret, client_secret].concat())
                .to_vec(),
        );

        self.step = Step::AwaitM5 {
            client_id,
            client_pk,
            key,
            confirm: ConfirmationKey(confirm),
        };
        Ok(reply)
    }

    fn handle_m5(
        &mut self,
        tlv: &Tlv8,
        client_id: String,
        client_pk: [u8; 32],
        key: [u8; 16],
        confirm: ConfirmationKey,
    ) -> Result<Tlv8> {
        let encrypted = field(tlv, TlvType::EncryptedData)?;
        let plaintext = match chacha::open(confirm.as_bytes(), PC_MSG05_NONCE, encrypted) {
            Ok(p) => p,
            Err(_) => {
                warn!("Client {} confirmation failed authentication", client_id);
                return Ok(Tlv8::error_reply(STATE_M6, TlvError::Authentication));
            }
        };

        let client_fingerprint = digest::fingerprint(&client_pk);
        if plaintext.len() != 36 || !ct_eq(&plaintext[4..], client_fingerprint.as_bytes()) {
            warn!("Client {} confirmation does not match", client_id);
            return Ok(Tlv8::error_reply(STATE_M6, TlvError::Authentication));
        }
        let key_id = u32::from_be_bytes([plaintext[0], plaintext[1], plaintext[2], plaintext[3]]);

        let mut body = key_id.to_be_bytes().to_vec();
        body.extend_from_slice(self.shared.identity.fingerprint().as_bytes());
        let encrypted = chacha::seal(confirm.as_bytes(), PC_MSG06_NONCE, &body)?;

        let record = ClientRecord {
            public_key: client_pk,
            key: KeyMaterial::new(key, key_id, client_fingerprint),
        };
        self.shared
            .clients
            .write()
            .unwrap_or_else(|p| p.into_inner())
            .insert(client_id.clone(), record);
        info!("Paired client {} with key id {}", client_id, key_id);
        self.step = Step::Done;

        let mut reply = Tlv8::with_state(STATE_M6);
        reply.set(TlvType::EncryptedData, encrypted);
        Ok(reply)
    }
}
