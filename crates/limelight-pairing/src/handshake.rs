//! Client side of the PIN pairing handshake (M1-M6).
//!
//! The handshake proves knowledge of the PIN in both directions before any
//! long-term secret is exchanged, then confirms the derived keys:
//!
//! - M1: salt, client certificate, AES(pin key, client nonce)
//! - M2: host certificate, AES(pin key, H(client nonce || host pk) || server nonce)
//! - M3: AES(pin key, H(server nonce || client pk) || client secret), signature
//! - M4: AES(pin key, host secret), host signature, or an Error TLV
//! - M5/M6: ChaCha20-Poly1305 confirmations under the derived confirm key
//!
//! `H` is SHA-256 and the pin key is the first 16 bytes of SHA-256(salt || PIN).

use crate::identity::PairingIdentity;
use crate::pin::Pin;
use limelight_core::error::{Error, PairingError, Result};
use limelight_core::HostFingerprint;
use limelight_crypto::{
    chacha, digest, ed25519, hkdf,
    keys::{ct_eq, random_bytes},
    ChallengeCipher, ConfirmationKey, KeyMaterial, Tlv8, TlvType,
};
use std::fmt;
use tracing::{debug, trace};
use zeroize::Zeroize;

pub(crate) const STATE_M1: u8 = 0x01;
pub(crate) const STATE_M2: u8 = 0x02;
pub(crate) const STATE_M3: u8 = 0x03;
pub(crate) const STATE_M4: u8 = 0x04;
pub(crate) const STATE_M5: u8 = 0x05;
pub(crate) const STATE_M6: u8 = 0x06;

/// Nonce label of the client confirmation.
pub(crate) const PC_MSG05_NONCE: &[u8] = b"PC-Msg05";
/// Nonce label of the host confirmation.
pub(crate) const PC_MSG06_NONCE: &[u8] = b"PC-Msg06";

/// Handshake progress as seen by the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum HandshakeState {
    Idle,
    ClientChallenge,
    AwaitServerChallengeResponse,
    ClientChallengeResponse,
    AwaitServerSecretAck,
    SecretExchange,
    Paired,
    Failed,
}

impl HandshakeState {
    pub fn as_str(&self) -> &'static str {
        match self {
            HandshakeState::Idle => "idle",
            HandshakeState::ClientChallenge => "client-challenge",
            HandshakeState::AwaitServerChallengeResponse => "await-server-challenge-response",
            HandshakeState::ClientChallengeResponse => "client-challenge-response",
            HandshakeState::AwaitServerSecretAck => "await-server-secret-ack",
            HandshakeState::SecretExchange => "secret-exchange",
            HandshakeState::Paired => "paired",
            HandshakeState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, HandshakeState::Paired | HandshakeState::Failed)
    }
}

impl fmt::Display for HandshakeState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Host half of the certificate exchange, learned from M2.
struct HostCertificate {
    id: String,
    public_key: [u8; 32],
}

/// Pairing handshake state machine (client role).
pub struct ClientHandshake {
    state: HandshakeState,
    identity: PairingIdentity,
    pin: Pin,
    expected_host: Option<HostFingerprint>,
    cipher: Option<ChallengeCipher>,
    client_nonce: [u8; 16],
    server_nonce: Option<[u8; 16]>,
    host: Option<HostCertificate>,
    client_secret: Option<[u8; 16]>,
    host_secret: Option<[u8; 16]>,
    derived_key: Option<[u8; 16]>,
    confirm_key: Option<ConfirmationKey>,
    key_id: Option<u32>,
    failed_at: Option<HandshakeState>,
}

pub(crate) fn protocol(msg: impl Into<String>) -> Error {
    Error::Pairing(PairingError::Protocol(msg.into()))
}

impl ClientHandshake {
    pub fn new(identity: PairingIdentity, pin: Pin) -> Self {
        Self {
            state: HandshakeState::Idle,
            identity,
            pin,
            expected_host: None,
            cipher: None,
            client_nonce: [0u8; 16],
            server_nonce: None,
            host: None,
            client_secret: None,
            host_secret: None,
            derived_key: None,
            confirm_key: None,
            key_id: None,
            failed_at: None,
        }
    }

    /// Require the host to present the identity with this fingerprint.
    pub fn expect_host(mut self, fingerprint: Option<HostFingerprint>) -> Self {
        self.expected_host = fingerprint;
        self
    }

    pub fn state(&self) -> HandshakeState {
        self.state
    }

    /// State the handshake was in when it failed.
    pub fn failed_at(&self) -> Option<HandshakeState> {
        self.failed_at
    }

    /// Abandon the handshake, e.g. after a transport failure.
    pub fn fail(&mut self) {
        if self.state != HandshakeState::Failed {
            self.failed_at = Some(self.state);
            self.state = HandshakeState::Failed;
        }
        self.wipe();
    }

    /// Fingerprint of the host identity, once M2 has been accepted.
    pub fn host_fingerprint(&self) -> Option<HostFingerprint> {
        self.host
            .as_ref()
            .map(|h| digest::fingerprint(&h.public_key))
    }

    /// Identifier the host presented in M2.
    pub fn host_id(&self) -> Option<&str> {
        self.host.as_ref().map(|h| h.id.as_str())
    }

    /// Generate M1: {State=1, Salt, Identifier, PublicKey, EncryptedData}.
    pub fn generate_m1(&mut self) -> Result<Vec<u8>> {
        let out = self.generate_m1_inner();
        self.fail_on_err(out)
    }

    /// Process M2: verify the host's proof of the PIN.
    pub fn process_m2(&mut self, response: &[u8]) -> Result<()> {
        let out = self.process_m2_inner(response);
        self.fail_on_err(out)
    }

    /// Generate M3: {State=3, EncryptedData, Signature}.
    pub fn generate_m3(&mut self) -> Result<Vec<u8>> {
        let out = self.generate_m3_inner();
        self.fail_on_err(out)
    }

    /// Process M4: host secret or rejection.
    pub fn process_m4(&mut self, response: &[u8]) -> Result<()> {
        let out = self.process_m4_inner(response);
        self.fail_on_err(out)
    }

    /// Generate M5 confirming `key_id` and this client's fingerprint.
    pub fn generate_m5(&mut self, key_id: u32) -> Result<Vec<u8>> {
        let out = self.generate_m5_inner(key_id);
        self.fail_on_err(out)
    }

    /// Process M6 and produce the key material.
    pub fn process_m6(&mut self, response: &[u8]) -> Result<KeyMaterial> {
        let out = self.process_m6_inner(response);
        self.fail_on_err(out)
    }

    fn fail_on_err<T>(&mut self, result: Result<T>) -> Result<T> {
        if let Err(e) = &result {
            debug!("Pairing handshake failed in {}: {}", self.state, e);
            self.fail();
        }
        result
    }

    fn expect_state(&self, expected: HandshakeState, step: &str) -> Result<()> {
        if self.state != expected {
            return Err(Error::Pairing(PairingError::InvalidState(format!(
                "{} requires state {}, current state is {}",
                step, expected, self.state
            ))));
        }
        Ok(())
    }

    fn generate_m1_inner(&mut self) -> Result<Vec<u8>> {
        self.expect_state(HandshakeState::Idle, "M1")?;
        self.state = HandshakeState::ClientChallenge;

        let salt: [u8; 16] = random_bytes();
        self.client_nonce = random_bytes();
        let cipher = ChallengeCipher::new(digest::pin_key(&salt, self.pin.as_str()));
        let challenge = cipher.encrypt(&self.client_nonce)?;
        self.cipher = Some(cipher);

        let (id, public_key) = self.identity.certificate();
        let mut tlv = Tlv8::with_state(STATE_M1);
        tlv.set(TlvType::Salt, salt.to_vec());
        tlv.set(TlvType::Identifier, id.as_bytes().to_vec());
        tlv.set(TlvType::PublicKey, public_key.to_vec());
        tlv.set(TlvType::EncryptedData, challenge);

        self.state = HandshakeState::AwaitServerChallengeResponse;
        trace!("M1 generated");
        Ok(tlv.encode())
    }

    fn process_m2_inner(&mut self, response: &[u8]) -> Result<()> {
        self.expect_state(HandshakeState::AwaitServerChallengeResponse, "M2")?;
        let tlv = parse_reply(response, STATE_M2)?;

        let public_key = ed25519::public_key_from_slice(field(&tlv, TlvType::PublicKey)?)
            .map_err(|e| protocol(format!("M2 host public key: {}", e)))?;
        let id = String::from_utf8(field(&tlv, TlvType::Identifier)?.to_vec())
            .map_err(|_| protocol("M2 host identifier is not UTF-8"))?;
        let encrypted = field(&tlv, TlvType::EncryptedData)?;
        if encrypted.len() != 48 {
            return Err(protocol(format!(
                "M2 challenge response has {} bytes (expected 48)",
                encrypted.len()
            )));
        }

        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| protocol("M2 received before M1"))?;
        let mut decrypted = cipher.decrypt(encrypted)?;

        let expected = digest::sha256(&[&self.client_nonce[..], &public_key[..]]);
        let matches = ct_eq(&decrypted[..32], &expected);
        if !matches {
            decrypted.zeroize();
            return Err(Error::Pairing(PairingError::ChallengeMismatch));
        }

        if let Some(expected_host) = &self.expected_host {
            if &digest::fingerprint(&public_key) != expected_host {
                return Err(Error::Pairing(PairingError::ChallengeMismatch));
            }
        }

        let mut server_nonce = [0u8; 16];
        server_nonce.copy_from_slice(&decrypted[32..48]);
        decrypted.zeroize();

        self.server_nonce = Some(server_nonce);
        self.host = Some(HostCertificate { id, public_key });
        self.state = HandshakeState::ClientChallengeResponse;
        trace!("M2 verified");
        Ok(())
    }

    fn generate_m3_inner(&mut self) -> Result<Vec<u8>> {
        self.expect_state(HandshakeState::ClientChallengeResponse, "M3")?;
        let server_nonce = self
            .server_nonce
            .ok_or_else(|| protocol("M3 without server nonce"))?;
        let cipher = self
            .cipher
            .as_ref()
            .ok_or_else(|| protocol("M3 without PIN key"))?;

        let client_secret: [u8; 16] = random_bytes();
        let mut plaintext = Vec::with_capacity(48);
        plaintext.extend_from_slice(&digest::sha256(&[&server_nonce[..], &self.identity.public_key()[..]]));
        plaintext.extend_from_slice(&client_secret);
        let encrypted = cipher.encrypt(&plaintext)?;
        plaintext.zeroize();

        let signature = self.identity.sign(&[client_secret, server_nonce].concat());

        let mut tlv = Tlv8::with_state(STATE_M3);
        tlv.set(TlvType::EncryptedData, encrypted);
        tlv.set(TlvType::Signature, signature.to_vec());

        self.client_secret = Some(client_secret);
        self.state = HandshakeState::AwaitServerSecretAck;
        trace!("M3 generated");
        Ok(tlv.encode())
    }

    fn process_m4_inner(&mut self, response: &[u8]) -> Result<()> {
        self.expect_state(HandshakeState::AwaitServerSecretAck, "M4")?;
        let tlv = parse_reply(response, STATE_M4)?;

        let encrypted = field(&tlv, TlvType::EncryptedData)?;
        if encrypted.len() != 16 {
            return Err(protocol(format!(
                "M4 host secret has {} bytes (expected 16)",
                encrypted.len()
            )));
        }
        let signature = ed25519::signature_from_slice(field(&tlv, TlvType::Signature)?)
            .map_err(|e| protocol(format!("M4 signature: {}", e)))?;

        let (cipher, host, client_secret) = match (&self.cipher, &self.host, self.client_secret) {
            (Some(c), Some(h), Some(s)) => (c, h, s),
            _ => return Err(protocol("M4 received before M3")),
        };

        let decrypted = cipher.decrypt(encrypted)?;
        let mut host_secret = [0u8; 16];
        host_secret.copy_from_slice(&decrypted);

        ed25519::verify(
            &host.public_key,
            &[host_secret, client_secret].concat(),
            &signature,
        )
        .map_err(|_| {
            Error::Pairing(PairingError::FinalVerification(
                "host secret signature is invalid".to_string(),
            ))
        })?;

        let server_nonce = self
            .server_nonce
            .ok_or_else(|| protocol("M4 without server nonce"))?;
        let ikm = [client_secret, host_secret].concat();
        let salt = [self.client_nonce, server_nonce].concat();
        let (key, confirm) = hkdf::derive_pairing_keys(&ikm, &salt)?;

        self.host_secret = Some(host_secret);
        self.derived_key = Some(key);
        self.confirm_key = Some(ConfirmationKey(confirm));
        self.state = HandshakeState::SecretExchange;
        trace!("M4 verified, keys derived");
        Ok(())
    }

    fn generate_m5_inner(&mut self, key_id: u32) -> Result<Vec<u8>> {
        self.expect_state(HandshakeState::SecretExchange, "M5")?;
        if self.key_id.is_some() {
            return Err(Error::Pairing(PairingError::InvalidState(
                "M5 already generated".to_string(),
            )));
        }
        let confirm = self
            .confirm_key
            .as_ref()
            .ok_or_else(|| protocol("M5 without confirm key"))?;

        let mut plaintext = key_id.to_be_bytes().to_vec();
        plaintext.extend_from_slice(self.identity.fingerprint().as_bytes());
        let encrypted = chacha::seal(confirm.as_bytes(), PC_MSG05_NONCE, &plaintext)?;

        let mut tlv = Tlv8::with_state(STATE_M5);
        tlv.set(TlvType::EncryptedData, encrypted);

        self.key_id = Some(key_id);
        trace!("M5 generated for key id {}", key_id);
        Ok(tlv.encode())
    }

    fn process_m6_inner(&mut self, response: &[u8]) -> Result<KeyMaterial> {
        self.expect_state(HandshakeState::SecretExchange, "M6")?;
        let key_id = self
            .key_id
            .ok_or_else(|| Error::Pairing(PairingError::InvalidState("M6 before M5".to_string())))?;
        let tlv = parse_reply(response, STATE_M6)?;
        let encrypted = field(&tlv, TlvType::EncryptedData)?;

        let (confirm, host, key) = match (&self.confirm_key, &self.host, self.derived_key) {
            (Some(c), Some(h), Some(k)) => (c, h, k),
            _ => return Err(protocol("M6 without derived keys")),
        };

        let plaintext = chacha::open(confirm.as_bytes(), PC_MSG06_NONCE, encrypted)
        .map_err(|_| {
            Error::Pairing(PairingError::FinalVerification(
                "host confirmation failed authentication".to_string(),
            ))
        })?;

        let host_fingerprint = digest::fingerprint(&host.public_key);
        let mut expected = key_id.to_be_bytes().to_vec();
        expected.extend_from_slice(host_fingerprint.as_bytes());
        if !ct_eq(&plaintext, &expected) {
            return Err(Error::Pairing(PairingError::FinalVerification(
                "host confirmation does not match".to_string(),
            )));
        }

        let material = KeyMaterial::new(key, key_id, host_fingerprint);
        self.state = HandshakeState::Paired;
        self.wipe();
        debug!("Paired with host {} (key id {})", host_fingerprint, key_id);
        Ok(material)
    }

    /// Drop every transient secret.
    fn wipe(&mut self) {
        self.cipher = None;
        self.confirm_key = None;
        self.client_nonce.zeroize();
        if let Some(mut s) = self.server_nonce.take() {
            s.zeroize();
        }
        if let Some(mut s) = self.client_secret.take() {
            s.zeroize();
        }
        if let Some(mut s) = self.host_secret.take() {
            s.zeroize();
        }
        if let Some(mut k) = self.derived_key.take() {
            k.zeroize();
        }
    }
}

impl Drop for ClientHandshake {
    fn drop(&mut self) {
        self.wipe();
    }
}

/// Required TLV field; absence is a protocol violation.
pub(crate) fn field(tlv: &Tlv8, typ: TlvType) -> Result<&[u8]> {
    tlv.require(typ).map_err(|e| protocol(e.to_string()))
}

/// Parse a host reply, checking its State and surfacing Error TLVs.
pub(crate) fn parse_reply(response: &[u8], expected_state: u8) -> Result<Tlv8> {
    let tlv = Tlv8::parse(response)
        .map_err(|e| protocol(format!("Failed to parse M{}: {}", expected_state, e)))?;

    if tlv.error().is_some() {
        let desc = tlv
            .error_description()
            .unwrap_or_else(|| "unspecified".to_string());
        return Err(Error::Pairing(PairingError::ServerRejected(desc)));
    }

    match tlv.state() {
        Some(state) if state == expected_state => Ok(tlv),
        Some(state) => Err(protocol(format!(
            "expected M{}, got M{}",
            expected_state, state
        ))),
        None => Err(protocol(format!("M{} missing state", expected_state))),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::responder::PairingResponder;

    fn pin(s: &str) -> Pin {
        Pin::parse(s).unwrap()
    }

    fn responder(host_pin: &str) -> PairingResponder {
        PairingResponder::new(PairingIdentity::generate(), pin(host_pin))
    }

    /// Drive the full client/host exchange in memory.
    fn run(client: &mut ClientHandshake, host: &PairingResponder, key_id: u32) -> Result<KeyMaterial> {
        let mut session = host.session();
        let m1 = client.generate_m1()?;
        let m2 = session.handle(&m1)?;
        client.process_m2(&m2)?;
        let m3 = client.generate_m3()?;
        let m4 = session.handle(&m3)?;
        client.process_m4(&m4)?;
        let m5 = client.generate_m5(key_id)?;
        let m6 = session.handle(&m5)?;
        client.process_m6(&m6)
    }

    mod state_machine {
        use super::*;

        #[test]
        fn starts_idle() {
            let client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            assert_eq!(client.state(), HandshakeState::Idle);
        }

        #[test]
        fn m1_moves_to_await_server_challenge_response() {
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            client.generate_m1().unwrap();
            assert_eq!(client.state(), HandshakeState::AwaitServerChallengeResponse);
        }

        #[test]
        fn full_exchange_reaches_paired() {
            let host = responder("1234");
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            let km = run(&mut client, &host, 42).unwrap();
            assert_eq!(client.state(), HandshakeState::Paired);
            assert_eq!(km.key_id(), 42);
            assert_eq!(km.host(), &host.fingerprint());
        }

        #[test]
        fn out_of_order_step_fails_with_invalid_state() {
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            let err = client.generate_m3().unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::InvalidState(_))));
            assert_eq!(client.state(), HandshakeState::Failed);
        }

        #[test]
        fn failed_handshake_cannot_restart() {
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            client.generate_m1().unwrap();
            let _ = client.process_m2(&[0xFF]);
            assert_eq!(client.state(), HandshakeState::Failed);
            assert!(client.generate_m1().is_err());
        }
    }

    mod verification {
        use super::*;

        #[test]
        fn wrong_pin_is_challenge_mismatch_at_m2() {
            let host = responder("1234");
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("0000"));
            let mut session = host.session();
            let m1 = client.generate_m1().unwrap();
            let m2 = session.handle(&m1).unwrap();
            let err = client.process_m2(&m2).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::ChallengeMismatch)));
            assert_eq!(client.state(), HandshakeState::Failed);
            assert_eq!(
                client.failed_at(),
                Some(HandshakeState::AwaitServerChallengeResponse)
            );
        }

        #[test]
        fn unexpected_host_identity_is_rejected() {
            let host = responder("1234");
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"))
                .expect_host(Some(HostFingerprint([0x11; 32])));
            let err = run(&mut client, &host, 1).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::ChallengeMismatch)));
        }

        #[test]
        fn expected_host_identity_is_accepted() {
            let host = responder("1234");
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"))
                .expect_host(Some(host.fingerprint()));
            assert!(run(&mut client, &host, 1).is_ok());
        }

        #[test]
        fn error_tlv_in_m4_is_server_rejected() {
            let host = responder("1234");
            host.set_accepting(false);
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            let err = run(&mut client, &host, 1).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::ServerRejected(_))));
            assert_eq!(client.state(), HandshakeState::Failed);
        }

        #[test]
        fn forged_m4_signature_is_final_verification() {
            let host = responder("1234");
            let mut session = host.session();
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            let m2 = session.handle(&client.generate_m1().unwrap()).unwrap();
            client.process_m2(&m2).unwrap();
            let m4 = session.handle(&client.generate_m3().unwrap()).unwrap();

            let mut tlv = Tlv8::parse(&m4).unwrap();
            tlv.set(TlvType::Signature, vec![0u8; 64]);
            let err = client.process_m4(&tlv.encode()).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::FinalVerification(_))));
        }

        #[test]
        fn tampered_m6_is_final_verification() {
            let host = responder("1234");
            let mut session = host.session();
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            let m2 = session.handle(&client.generate_m1().unwrap()).unwrap();
            client.process_m2(&m2).unwrap();
            let m4 = session.handle(&client.generate_m3().unwrap()).unwrap();
            client.process_m4(&m4).unwrap();
            let m6 = session.handle(&client.generate_m5(9).unwrap()).unwrap();

            let mut tlv = Tlv8::parse(&m6).unwrap();
            let mut data = tlv.get(TlvType::EncryptedData).unwrap().to_vec();
            data[0] ^= 0x01;
            tlv.set(TlvType::EncryptedData, data);
            let err = client.process_m6(&tlv.encode()).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::FinalVerification(_))));
        }
    }

    mod parsing {
        use super::*;

        #[test]
        fn wrong_state_is_protocol_error() {
            let err = parse_reply(&Tlv8::with_state(STATE_M4).encode(), STATE_M2).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::Protocol(_))));
        }

        #[test]
        fn missing_state_is_protocol_error() {
            let err = parse_reply(&Tlv8::new().encode(), STATE_M2).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::Protocol(_))));
        }

        #[test]
        fn garbage_is_protocol_error() {
            let err = parse_reply(&[0x06, 0x09], STATE_M2).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::Protocol(_))));
        }

        #[test]
        fn error_tlv_wins_over_state() {
            let reply = Tlv8::error_reply(STATE_M2, limelight_crypto::TlvError::Busy);
            let err = parse_reply(&reply.encode(), STATE_M2).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::ServerRejected(ref d)) if d.contains("Busy")));
        }

        #[test]
        fn short_m2_challenge_is_protocol_error() {
            let mut client = ClientHandshake::new(PairingIdentity::generate(), pin("1234"));
            client.generate_m1().unwrap();
            let mut tlv = Tlv8::with_state(STATE_M2);
            tlv.set(TlvType::PublicKey, vec![0u8; 32]);
            tlv.set(TlvType::Identifier, b"host".to_vec());
            tlv.set(TlvType::EncryptedData, vec![0u8; 16]);
            let err = client.process_m2(&tlv.encode()).unwrap_err();
            assert!(matches!(err, Error::Pairing(PairingError::Protocol(_))));
        }
    }
}
