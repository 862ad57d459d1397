//! Listener interface for discovery notifications.

use limelight_core::{Host, HostState};
use tokio::sync::mpsc;

/// Notification emitted by host discovery.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// Host state changed. `previous` is `None` on first sighting.
    Updated {
        host: Host,
        previous: Option<HostState>,
        current: HostState,
    },
    /// Advertisement withdrawn or liveness window elapsed.
    Removed(Host),
}

impl DiscoveryEvent {
    pub fn host(&self) -> &Host {
        match self {
            DiscoveryEvent::Updated { host, .. } | DiscoveryEvent::Removed(host) => host,
        }
    }

    pub fn is_removed(&self) -> bool {
        matches!(self, DiscoveryEvent::Removed(_))
    }

    /// New state for updates, `None` for removals.
    pub fn current(&self) -> Option<HostState> {
        match self {
            DiscoveryEvent::Updated { current, .. } => Some(*current),
            DiscoveryEvent::Removed(_) => None,
        }
    }
}

/// Receiver of discovery notifications.
///
/// Called from the discovery worker task; implementations must not block.
#[cfg_attr(test, mockall::automock)]
pub trait DiscoveryListener: Send + Sync {
    fn on_host_updated(&self, host: &Host, previous: Option<HostState>, current: HostState);

    fn on_host_removed(&self, host: &Host);
}

impl DiscoveryListener for mpsc::UnboundedSender<DiscoveryEvent> {
    fn on_host_updated(&self, host: &Host, previous: Option<HostState>, current: HostState) {
        // Receiver gone means nobody is listening any more
        let _ = self.send(DiscoveryEvent::Updated {
            host: host.clone(),
            previous,
            current,
        });
    }

    fn on_host_removed(&self, host: &Host) {
        let _ = self.send(DiscoveryEvent::Removed(host.clone()));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    mod discovery_event {
        use super::*;

        #[test]
        fn accessors() {
            let host = Host::new("pc._nvstream._tcp.local.", "pc");
            let event = DiscoveryEvent::Updated {
                host: host.clone(),
                previous: None,
                current: HostState::Discovered,
            };
            assert_eq!(event.host().name, "pc");
            assert_eq!(event.current(), Some(HostState::Discovered));
            assert!(!event.is_removed());

            let event = DiscoveryEvent::Removed(host);
            assert!(event.is_removed());
            assert!(event.current().is_none());
        }
    }

    mod channel_listener {
        use super::*;

        #[tokio::test]
        async fn forwards_updates_and_removals() {
            let (tx, mut rx) = mpsc::unbounded_channel();
            let host = Host::new("pc._nvstream._tcp.local.", "pc");

            tx.on_host_updated(&host, Some(HostState::Discovered), HostState::Resolving);
            tx.on_host_removed(&host);

            assert_eq!(
                rx.recv().await,
                Some(DiscoveryEvent::Updated {
                    host: host.clone(),
                    previous: Some(HostState::Discovered),
                    current: HostState::Resolving,
                })
            );
            assert_eq!(rx.recv().await, Some(DiscoveryEvent::Removed(host)));
        }

        #[test]
        fn closed_receiver_is_ignored() {
            let (tx, rx) = mpsc::unbounded_channel::<DiscoveryEvent>();
            drop(rx);
            tx.on_host_removed(&Host::new("pc", "pc"));
        }
    }
}
