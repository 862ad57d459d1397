//! Service notice sources: the mDNS daemon and an in-process channel.

use limelight_core::error::DiscoveryError;
use limelight_core::Result;
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use std::collections::HashMap;
use std::net::IpAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use tokio::sync::mpsc;
use tracing::{debug, trace, warn};

/// A resolved service advertisement.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedService {
    /// Full service instance name.
    pub instance: String,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
    pub txt: HashMap<String, String>,
}

/// Raw notice from a service source, before state tracking.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ServiceNotice {
    /// Advertisement seen; resolution is under way.
    Found(String),
    Resolved(ResolvedService),
    /// Advertisement withdrawn.
    Removed(String),
}

impl ServiceNotice {
    pub fn instance(&self) -> &str {
        match self {
            ServiceNotice::Found(instance) | ServiceNotice::Removed(instance) => instance,
            ServiceNotice::Resolved(service) => &service.instance,
        }
    }
}

/// Producer of service notices for one service type.
#[cfg_attr(test, mockall::automock)]
pub trait ServiceSource: Send + Sync {
    /// Begin browsing; notices are delivered on the returned channel.
    fn subscribe(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<ServiceNotice>>;

    /// Ask the source to re-announce every instance it still sees.
    ///
    /// Called periodically while subscribed; re-announced instances arrive
    /// on the subscription channel and keep their hosts alive.
    fn refresh(&self, service_type: &str) -> Result<()>;

    /// Stop browsing and release source-side resources.
    fn unsubscribe(&self, service_type: &str);
}

/// How long a forwarding thread waits on the daemon before rechecking its stop flag.
const FORWARD_POLL: Duration = Duration::from_millis(100);

struct Forwarder {
    stop: Arc<AtomicBool>,
    tx: mpsc::UnboundedSender<ServiceNotice>,
}

/// One poll of the daemon's event channel.
enum Polled {
    Event(ServiceEvent),
    Idle,
    Disconnected,
}

/// Forward converted events until stopped or either end goes away.
fn forward_events(
    stop: &AtomicBool,
    tx: &mpsc::UnboundedSender<ServiceNotice>,
    mut poll: impl FnMut() -> Polled,
) {
    while !stop.load(Ordering::SeqCst) && !tx.is_closed() {
        match poll() {
            Polled::Event(event) => {
                if let Some(notice) = MdnsSource::convert(event) {
                    if tx.send(notice).is_err() {
                        break;
                    }
                }
            }
            Polled::Idle => {}
            Polled::Disconnected => break,
        }
    }
}

/// Service source backed by the mdns-sd daemon.
///
/// Each browse runs a detached forwarding thread that drains the daemon's
/// channel and converts events into [`ServiceNotice`]s. A refresh browses
/// again, which makes the daemon replay its cached instances, and hands the
/// subscription channel to a new thread.
pub struct MdnsSource {
    daemon: ServiceDaemon,
    forwarders: Mutex<HashMap<String, Forwarder>>,
}

impl MdnsSource {
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new()
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to create mDNS daemon: {}", e)))?;
        Ok(Self {
            daemon,
            forwarders: Mutex::new(HashMap::new()),
        })
    }

    fn convert(event: ServiceEvent) -> Option<ServiceNotice> {
        match event {
            ServiceEvent::ServiceFound(_, fullname) => {
                trace!("Service found: {}", fullname);
                Some(ServiceNotice::Found(fullname))
            }
            ServiceEvent::ServiceResolved(info) => {
                trace!("Service resolved: {}", info.get_fullname());
                Some(ServiceNotice::Resolved(Self::resolved_from_info(&info)))
            }
            ServiceEvent::ServiceRemoved(_, fullname) => {
                trace!("Service removed: {}", fullname);
                Some(ServiceNotice::Removed(fullname))
            }
            ServiceEvent::SearchStarted(_) => {
                trace!("Search started");
                None
            }
            ServiceEvent::SearchStopped(_) => {
                trace!("Search stopped");
                None
            }
            #[allow(unreachable_patterns)]
            _ => None,
        }
    }

    fn resolved_from_info(info: &ServiceInfo) -> ResolvedService {
        ResolvedService {
            instance: info.get_fullname().to_string(),
            port: info.get_port(),
            addresses: info.get_addresses().iter().copied().collect(),
            txt: info
                .get_properties()
                .iter()
                .map(|prop| (prop.key().to_string(), prop.val_str().to_string()))
                .collect(),
        }
    }

    fn lock_forwarders(&self) -> std::sync::MutexGuard<'_, HashMap<String, Forwarder>> {
        // A panicked forwarder holds no invariants worth abandoning the map for
        self.forwarders
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl MdnsSource {
    /// Browse `service_type` and forward its events into `tx`, replacing any
    /// forwarder already running for it.
    fn forward(&self, service_type: &str, tx: mpsc::UnboundedSender<ServiceNotice>) -> Result<()> {
        let receiver = self
            .daemon
            .browse(service_type)
            .map_err(|e| DiscoveryError::Daemon(format!("Failed to browse {}: {}", service_type, e)))?;

        let stop = Arc::new(AtomicBool::new(false));
        let thread_stop = Arc::clone(&stop);
        let thread_tx = tx.clone();
        // Detached; it notices the stop flag within one poll.
        std::thread::Builder::new()
            .name("limelight-mdns".to_string())
            .spawn(move || {
                forward_events(&thread_stop, &thread_tx, || {
                    match receiver.recv_timeout(FORWARD_POLL) {
                        Ok(event) => Polled::Event(event),
                        Err(_) if receiver.is_disconnected() => Polled::Disconnected,
                        Err(_) => Polled::Idle,
                    }
                });
                debug!("mDNS forwarding thread exiting");
            })?;

        let previous = self
            .lock_forwarders()
            .insert(service_type.to_string(), Forwarder { stop, tx });
        if let Some(previous) = previous {
            previous.stop.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

impl ServiceSource for MdnsSource {
    fn subscribe(&self, service_type: &str) -> Result<mpsc::UnboundedReceiver<ServiceNotice>> {
        let (tx, rx) = mpsc::unbounded_channel();
        self.forward(service_type, tx)?;
        Ok(rx)
    }

    fn refresh(&self, service_type: &str) -> Result<()> {
        let tx = self
            .lock_forwarders()
            .get(service_type)
            .map(|forwarder| forwarder.tx.clone())
            .ok_or_else(|| DiscoveryError::Daemon(format!("Not browsing {}", service_type)))?;
        trace!("Re-browsing {}", service_type);
        self.forward(service_type, tx)
    }

    fn unsubscribe(&self, service_type: &str) {
        if let Err(e) = self.daemon.stop_browse(service_type) {
            warn!("Failed to stop browsing {}: {}", service_type, e);
        }
        if let Some(forwarder) = self.lock_forwarders().remove(service_type) {
            forwarder.stop.store(true, Ordering::SeqCst);
        }
    }
}

impl Drop for MdnsSource {
    fn drop(&mut self) {
        let types: Vec<String> = self.lock_forwarders().keys().cloned().collect();
        for service_type in types {
            self.unsubscribe(&service_type);
        }
        if let Err(e) = self.daemon.shutdown() {
            debug!("mDNS daemon shutdown: {}", e);
        }
    }
}

/// In-process source fed through a sender.
///
/// Hosts entered by hand and simulated networks use this in place of the
/// mDNS daemon.
pub struct ChannelSource {
    receiver: Mutex<Option<mpsc::UnboundedReceiver<ServiceNotice>>>,
}

impl ChannelSource {
    /// Create a source and the sender that feeds it.
    pub fn new() -> (Self, mpsc::UnboundedSender<ServiceNotice>) {
        let (tx, rx) = mpsc::unbounded_channel();
        (
            Self {
                receiver: Mutex::new(Some(rx)),
            },
            tx,
        )
    }
}

impl ServiceSource for ChannelSource {
    fn subscribe(&self, _service_type: &str) -> Result<mpsc::UnboundedReceiver<ServiceNotice>> {
        self.receiver
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .take()
            .ok_or_else(|| DiscoveryError::Daemon("channel source already subscribed".into()).into())
    }

    /// The feeder re-sends notices itself.
    fn refresh(&self, _service_type: &str) -> Result<()> {
        Ok(())
    }

    fn unsubscribe(&self, _service_type: &str) {}
}
