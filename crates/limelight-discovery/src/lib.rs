//! # limelight-discovery
//!
//! mDNS discovery of game-streaming hosts.
//!
//! This crate provides:
//! - Continuous browsing with ordered per-host state transitions
//! - Resolve timeouts and a liveness window for stale hosts
//! - TXT record parsing for host fingerprints and display names
//! - A source trait so tests and manual entry can replace the daemon
//!
//! ## Example
//!
//! ```ignore
//! use limelight_discovery::{DiscoveryOptions, HostDiscovery};
//! use tokio::sync::mpsc;
//!
//! let mut discovery = HostDiscovery::new(DiscoveryOptions::default())?;
//! let (tx, mut rx) = mpsc::unbounded_channel();
//! discovery.start(tx)?;
//! while let Some(event) = rx.recv().await {
//!     println!("{:?}", event);
//! }
//! ```

mod browser;
mod parser;
mod source;
mod tracker;
mod traits;

pub use browser::{DiscoveryOptions, HostDiscovery};
pub use parser::{TxtInfo, TxtRecordParser};
pub use source::{ChannelSource, MdnsSource, ResolvedService, ServiceNotice, ServiceSource};
pub use tracker::{HostTracker, Transition};
pub use traits::{DiscoveryEvent, DiscoveryListener};

/// Service type advertised by streaming hosts.
pub const STREAMING_SERVICE_TYPE: &str = "_nvstream._tcp.local.";
