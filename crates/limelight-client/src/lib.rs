//! # limelight-client
//!
//! Session coordinator for LAN game streaming.
//!
//! This crate provides:
//! - A coordinator that picks a discovered host, pairs if needed and
//!   hands host, stream configuration and key material to a launcher
//! - TOML configuration and a builder for wiring collaborators
//! - The launcher handoff type
//!
//! ## Example
//!
//! ```ignore
//! use limelight_client::{ClientBuilder, StreamPreset};
//! use tokio::sync::mpsc;
//!
//! let mut coordinator = ClientBuilder::new().state_dir("/var/lib/limelight").build()?;
//! let (tx, mut events) = mpsc::unbounded_channel();
//! coordinator.start_discovery(tx)?;
//! // ... wait for "LivingRoomPC" to resolve ...
//! coordinator
//!     .begin_streaming("LivingRoomPC", Some(StreamPreset::FullHd1080p60), Some("1234"))
//!     .await?;
//! ```

mod builder;
mod config;
mod coordinator;
mod launcher;

pub use builder::ClientBuilder;
pub use config::{ClientConfig, IDENTITY_FILE, KEYSTORE_FILE};
pub use coordinator::{Launched, SessionCoordinator, TcpConnector, TransportConnector};
pub use launcher::{LaunchRequest, Launcher, LogLauncher};

// Re-export commonly used types
pub use limelight_core::{Error, Host, HostState, Result, StreamConfig, StreamPreset};
pub use limelight_discovery::DiscoveryEvent;
pub use limelight_pairing::{KeyStore, PairingIdentity};
