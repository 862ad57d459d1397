//! Continuous host discovery over a service source.

use crate::source::{MdnsSource, ServiceNotice, ServiceSource};
use crate::tracker::{HostTracker, Transition};
use crate::traits::DiscoveryListener;
use crate::STREAMING_SERVICE_TYPE;
use limelight_core::error::DiscoveryError;
use limelight_core::{Host, Result};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::{mpsc, RwLock};
use tokio::task::JoinHandle;
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

/// Lower bound on the source refresh period.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// Discovery tuning.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DiscoveryOptions {
    pub service_type: String,
    /// How long a host may stay Resolving before it is marked Unreachable.
    pub resolve_timeout: Duration,
    /// How long a host survives without any refresh.
    pub liveness_window: Duration,
}

impl Default for DiscoveryOptions {
    fn default() -> Self {
        Self {
            service_type: STREAMING_SERVICE_TYPE.to_string(),
            resolve_timeout: Duration::from_secs(5),
            liveness_window: Duration::from_secs(300),
        }
    }
}

impl DiscoveryOptions {
    /// How often the source is asked to re-announce live instances.
    ///
    /// A third of the liveness window, and never under one second.
    pub fn refresh_interval(&self) -> Duration {
        (self.liveness_window / 3).max(MIN_REFRESH_INTERVAL)
    }
}

/// Background discovery of streaming hosts.
///
/// `start` spawns a tokio worker that owns all host state, so it has to be
/// called from within a runtime. Browsing stops on [`stop`](Self::stop) or
/// when the handle is dropped.
pub struct HostDiscovery {
    source: Arc<dyn ServiceSource>,
    options: DiscoveryOptions,
    hosts: Arc<RwLock<HashMap<String, Host>>>,
    worker: Option<JoinHandle<()>>,
}

impl HostDiscovery {
    /// Create discovery backed by the system mDNS daemon.
    pub fn new(options: DiscoveryOptions) -> Result<Self> {
        let source = MdnsSource::new()?;
        Ok(Self::with_source(Arc::new(source), options))
    }

    /// Create discovery over any notice source.
    pub fn with_source(source: Arc<dyn ServiceSource>, options: DiscoveryOptions) -> Self {
        Self {
            source,
            options,
            hosts: Arc::new(RwLock::new(HashMap::new())),
            worker: None,
        }
    }

    pub fn options(&self) -> &DiscoveryOptions {
        &self.options
    }

    /// Begin browsing, delivering notifications to `listener`.
    pub fn start<L>(&mut self, listener: L) -> Result<()>
    where
        L: DiscoveryListener + 'static,
    {
        if self.is_running() {
            return Err(DiscoveryError::AlreadyRunning.into());
        }

        let rx = self.source.subscribe(&self.options.service_type)?;
        let tracker = HostTracker::new(
            self.options.service_type.clone(),
            self.options.resolve_timeout,
            self.options.liveness_window,
        );
        let refresher = Refresher {
            source: Arc::clone(&self.source),
            service_type: self.options.service_type.clone(),
            every: self.options.refresh_interval(),
        };
        let hosts = Arc::clone(&self.hosts);
        let listener: Arc<dyn DiscoveryListener> = Arc::new(listener);

        info!("Browsing for {}", self.options.service_type);
        let worker = run_worker(rx, tracker, refresher, listener, hosts);
        self.worker = Some(tokio::spawn(worker));
        Ok(())
    }

    /// Halt browsing. Pending resolutions are dropped with the worker.
    pub fn stop(&mut self) {
        if let Some(worker) = self.worker.take() {
            debug!("Stopping discovery of {}", self.options.service_type);
            self.source.unsubscribe(&self.options.service_type);
            worker.abort();
            // Snapshot is stale once nobody maintains it
            if let Ok(mut hosts) = self.hosts.try_write() {
                hosts.clear();
            }
        }
    }

    pub fn is_running(&self) -> bool {
        self.worker.as_ref().is_some_and(|w| !w.is_finished())
    }

    /// Snapshot of every known host, sorted by name.
    pub async fn hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.hosts.read().await.values().cloned().collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        hosts
    }

    /// Hosts eligible for pairing and launch.
    pub async fn resolved_hosts(&self) -> Vec<Host> {
        let mut hosts = self.hosts().await;
        hosts.retain(Host::is_resolved);
        hosts
    }

    /// Look up a host by display name or service instance name.
    pub async fn host(&self, name: &str) -> Option<Host> {
        let hosts = self.hosts.read().await;
        if let Some(host) = hosts.get(name) {
            return Some(host.clone());
        }
        hosts
            .values()
            .find(|h| h.name.eq_ignore_ascii_case(name))
            .cloned()
    }
}

impl Drop for HostDiscovery {
    fn drop(&mut self) {
        self.stop();
    }
}

/// Periodic re-announcement request against the worker's source.
struct Refresher {
    source: Arc<dyn ServiceSource>,
    service_type: String,
    every: Duration,
}

async fn run_worker(
    mut rx: mpsc::UnboundedReceiver<ServiceNotice>,
    mut tracker: HostTracker,
    refresher: Refresher,
    listener: Arc<dyn DiscoveryListener>,
    hosts: Arc<RwLock<HashMap<String, Host>>>,
) {
    let mut refresh = tokio::time::interval_at(Instant::now() + refresher.every, refresher.every);
    refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        let deadline = tracker.next_deadline();
        let transitions = tokio::select! {
            notice = rx.recv() => match notice {
                Some(notice) => tracker.apply(notice, Instant::now()),
                None => break,
            },
            _ = sleep_until(deadline) => tracker.tick(Instant::now()),
            _ = refresh.tick() => {
                if let Err(e) = refresher.source.refresh(&refresher.service_type) {
                    warn!("Failed to refresh {}: {}", refresher.service_type, e);
                }
                continue;
            }
        };
        publish(transitions, &hosts, listener.as_ref()).await;
    }
    debug!("Discovery worker exiting");
}

async fn sleep_until(deadline: Option<Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

async fn publish(
    transitions: Vec<Transition>,
    hosts: &RwLock<HashMap<String, Host>>,
    listener: &dyn DiscoveryListener,
) {
    for transition in transitions {
        match transition {
            Transition::Updated {
                host,
                previous,
                current,
            } => {
                hosts.write().await.insert(host.instance.clone(), host.clone());
                listener.on_host_updated(&host, previous, current);
            }
            Transition::Removed(host) => {
                hosts.write().await.remove(&host.instance);
                listener.on_host_removed(&host);
            }
        }
    }
}
