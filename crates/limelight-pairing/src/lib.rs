//! # limelight-pairing
//!
//! PIN pairing with game-streaming hosts.
//!
//! This crate implements:
//! - The client handshake (PIN challenge, secret exchange, key confirmation)
//! - The matching host-side responder, used for tests and `serve-pairing`
//! - Length-prefixed TCP and in-process loopback transports
//! - The client's long-lived identity and the per-host key store
//!
//! ## Example
//!
//! ```ignore
//! use limelight_pairing::{KeyStore, PairingIdentity, PairingRegistry, PairingSession, TcpTransport};
//!
//! let store = Arc::new(KeyStore::in_memory());
//! let mut session = PairingSession::new(host, PairingIdentity::generate(), store, PairingRegistry::new());
//! let mut transport = TcpTransport::connect(addr, Duration::from_secs(5)).await?;
//! let key = session.begin(&mut transport, "1234").await?;
//! ```

mod handshake;
mod identity;
mod pin;
mod responder;
mod session;
pub mod store;
mod traits;
mod transport;

pub use handshake::{ClientHandshake, HandshakeState};
pub use identity::PairingIdentity;
pub use pin::{Pin, PIN_LEN};
pub use responder::{ClientRecord, PairingResponder, ResponderSession};
pub use session::{PairingOptions, PairingRegistry, PairingSession, PairingSlot};
pub use store::KeyStore;
pub use traits::{PairingListener, PairingOutcome, Transport};
pub use transport::{read_frame, serve_tcp, write_frame, LoopbackTransport, TcpTransport, MAX_FRAME_LEN};
