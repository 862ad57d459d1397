//! Per-host resolution state tracking.
//!
//! The tracker owns every host's state and turns raw service notices into
//! ordered transitions. It performs no I/O; the caller supplies the clock.

use crate::parser::TxtRecordParser;
use crate::source::{ResolvedService, ServiceNotice};
use limelight_core::{Host, HostState};
use std::collections::HashMap;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::time::Instant;
use tracing::{debug, trace};

/// Change produced by the tracker, in delivery order.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transition {
    Updated {
        host: Host,
        previous: Option<HostState>,
        current: HostState,
    },
    Removed(Host),
}

struct Entry {
    host: Host,
    last_seen: Instant,
    resolve_deadline: Option<Instant>,
}

/// Host state machine keyed by service instance name.
pub struct HostTracker {
    service_type: String,
    resolve_timeout: Duration,
    liveness_window: Duration,
    entries: HashMap<String, Entry>,
}

impl HostTracker {
    pub fn new(service_type: impl Into<String>, resolve_timeout: Duration, liveness_window: Duration) -> Self {
        Self {
            service_type: service_type.into(),
            resolve_timeout,
            liveness_window,
            entries: HashMap::new(),
        }
    }

    /// Apply one notice.
    pub fn apply(&mut self, notice: ServiceNotice, now: Instant) -> Vec<Transition> {
        let mut out = Vec::new();
        match notice {
            ServiceNotice::Found(instance) => self.found(&instance, now, &mut out),
            ServiceNotice::Resolved(service) => self.resolved(service, now, &mut out),
            ServiceNotice::Removed(instance) => {
                if let Some(entry) = self.entries.remove(&instance) {
                    debug!("Host {} withdrawn", entry.host.name);
                    out.push(Transition::Removed(entry.host));
                }
            }
        }
        out
    }

    /// Fire resolve timeouts and liveness expiry due at `now`.
    pub fn tick(&mut self, now: Instant) -> Vec<Transition> {
        let mut out = Vec::new();

        let mut timed_out: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.resolve_deadline.is_some_and(|d| d <= now))
            .map(|(k, _)| k.clone())
            .collect();
        timed_out.sort();
        for instance in timed_out {
            if let Some(entry) = self.entries.get_mut(&instance) {
                entry.resolve_deadline = None;
                debug!("Host {} did not resolve in time", entry.host.name);
                Self::transition(entry, HostState::Unreachable, &mut out);
            }
        }

        let mut expired: Vec<String> = self
            .entries
            .iter()
            .filter(|(_, e)| e.last_seen + self.liveness_window <= now)
            .map(|(k, _)| k.clone())
            .collect();
        expired.sort();
        for instance in expired {
            if let Some(entry) = self.entries.remove(&instance) {
                debug!("Host {} not refreshed within liveness window", entry.host.name);
                out.push(Transition::Removed(entry.host));
            }
        }

        out
    }

    /// Earliest instant at which [`tick`](Self::tick) has work to do.
    pub fn next_deadline(&self) -> Option<Instant> {
        self.entries
            .values()
            .flat_map(|e| {
                let expiry = e.last_seen + self.liveness_window;
                std::iter::once(expiry).chain(e.resolve_deadline)
            })
            .min()
    }

    /// Snapshot of all tracked hosts.
    pub fn hosts(&self) -> Vec<Host> {
        let mut hosts: Vec<Host> = self.entries.values().map(|e| e.host.clone()).collect();
        hosts.sort_by(|a, b| a.name.cmp(&b.name));
        hosts
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    fn found(&mut self, instance: &str, now: Instant, out: &mut Vec<Transition>) {
        let deadline = now + self.resolve_timeout;
        match self.entries.get_mut(instance) {
            Some(entry) => {
                entry.last_seen = now;
                if entry.host.state == HostState::Unreachable {
                    entry.resolve_deadline = Some(deadline);
                    Self::transition(entry, HostState::Resolving, out);
                }
            }
            None => {
                let name = TxtRecordParser::instance_label(instance, &self.service_type);
                let host = Host::new(instance, name);
                trace!("New host {}", host.name);
                out.push(Transition::Updated {
                    host: host.clone(),
                    previous: None,
                    current: HostState::Discovered,
                });
                let mut entry = Entry {
                    host,
                    last_seen: now,
                    resolve_deadline: Some(deadline),
                };
                Self::transition(&mut entry, HostState::Resolving, out);
                self.entries.insert(instance.to_string(), entry);
            }
        }
    }

    fn resolved(&mut self, service: ResolvedService, now: Instant, out: &mut Vec<Transition>) {
        if service.addresses.is_empty() {
            trace!("Resolution for {} carried no addresses", service.instance);
            self.found(&service.instance, now, out);
            return;
        }

        // Make sure the host has passed through Resolving first
        let needs_resolving = self
            .entries
            .get(&service.instance)
            .map_or(true, |e| e.host.state == HostState::Unreachable);
        if needs_resolving {
            self.found(&service.instance, now, out);
        }

        let Some(entry) = self.entries.get_mut(&service.instance) else {
            return;
        };

        let txt = TxtRecordParser::parse_lenient(&service.instance, &service.txt);
        if let Some(name) = txt.name {
            entry.host.name = name;
        }
        if txt.fingerprint.is_some() {
            entry.host.fingerprint = txt.fingerprint;
        }
        entry.host.addresses = service
            .addresses
            .iter()
            .map(|ip| SocketAddr::new(*ip, service.port))
            .collect();
        entry.last_seen = now;
        entry.resolve_deadline = None;
        Self::transition(entry, HostState::Resolved, out);
    }

    fn transition(entry: &mut Entry, next: HostState, out: &mut Vec<Transition>) {
        let previous = entry.host.state;
        debug_assert!(
            previous.can_transition_to(next),
            "illegal host transition {} -> {}",
            previous,
            next
        );
        entry.host.state = next;
        out.push(Transition::Updated {
            host: entry.host.clone(),
            previous: Some(previous),
            current: next,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};

    const SERVICE: &str = "_nvstream._tcp.local.";
    const INSTANCE: &str = "LivingRoomPC._nvstream._tcp.local.";

    fn tracker() -> HostTracker {
        HostTracker::new(SERVICE, Duration::from_secs(5), Duration::from_secs(60))
    }

    fn resolved(instance: &str, last_octet: u8) -> ServiceNotice {
        ServiceNotice::Resolved(ResolvedService {
            instance: instance.to_string(),
            port: 47989,
            addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, last_octet))],
            txt: HashMap::new(),
        })
    }

    fn states(transitions: &[Transition]) -> Vec<(Option<HostState>, Option<HostState>)> {
        transitions
            .iter()
            .map(|t| match t {
                Transition::Updated { previous, current, .. } => (*previous, Some(*current)),
                Transition::Removed(_) => (None, None),
            })
            .collect()
    }

    mod ordering {
        use super::*;

        #[test]
        fn found_then_resolved() {
            let mut t = tracker();
            let now = Instant::now();
            let first = t.apply(ServiceNotice::Found(INSTANCE.into()), now);
            assert_eq!(
                states(&first),
                vec![
                    (None, Some(HostState::Discovered)),
                    (Some(HostState::Discovered), Some(HostState::Resolving)),
                ]
            );

            let second = t.apply(resolved(INSTANCE, 10), now);
            assert_eq!(
                states(&second),
                vec![(Some(HostState::Resolving), Some(HostState::Resolved))]
            );
        }

        #[test]
        fn resolution_for_unknown_instance_is_expanded() {
            let mut t = tracker();
            let out = t.apply(resolved(INSTANCE, 10), Instant::now());
            assert_eq!(
                states(&out),
                vec![
                    (None, Some(HostState::Discovered)),
                    (Some(HostState::Discovered), Some(HostState::Resolving)),
                    (Some(HostState::Resolving), Some(HostState::Resolved)),
                ]
            );
        }

        #[test]
        fn re_resolution_reports_resolved_to_resolved_with_new_address() {
            let mut t = tracker();
            let now = Instant::now();
            t.apply(resolved(INSTANCE, 10), now);
            let out = t.apply(resolved(INSTANCE, 11), now);
            assert_eq!(
                states(&out),
                vec![(Some(HostState::Resolved), Some(HostState::Resolved))]
            );
            let host = &t.hosts()[0];
            assert_eq!(host.address().unwrap().ip(), IpAddr::V4(Ipv4Addr::new(192, 0, 2, 11)));
            assert_eq!(host.addresses.len(), 1);
        }

        #[test]
        fn duplicate_found_is_deduplicated() {
            let mut t = tracker();
            let now = Instant::now();
            t.apply(ServiceNotice::Found(INSTANCE.into()), now);
            let out = t.apply(ServiceNotice::Found(INSTANCE.into()), now);
            assert!(out.is_empty());
            assert_eq!(t.len(), 1);
        }

        #[test]
        fn empty_resolution_stays_resolving() {
            let mut t = tracker();
            let now = Instant::now();
            let out = t.apply(
                ServiceNotice::Resolved(ResolvedService {
                    instance: INSTANCE.into(),
                    port: 47989,
                    addresses: vec![],
                    txt: HashMap::new(),
                }),
                now,
            );
            assert_eq!(t.hosts()[0].state, HostState::Resolving);
            assert_eq!(out.len(), 2);
        }

        #[test]
        fn resolved_never_appears_without_prior_resolving() {
            let mut t = tracker();
            let now = Instant::now();
            let mut all = Vec::new();
            all.extend(t.apply(resolved(INSTANCE, 10), now));
            all.extend(t.apply(ServiceNotice::Removed(INSTANCE.into()), now));
            all.extend(t.apply(resolved(INSTANCE, 12), now));

            let mut last: Option<HostState> = None;
            for (previous, current) in states(&all) {
                if current.is_none() {
                    // Removal resets the chain
                    last = None;
                    continue;
                }
                if current == Some(HostState::Resolved) {
                    assert!(matches!(
                        previous,
                        Some(HostState::Resolving | HostState::Resolved)
                    ));
                }
                assert_eq!(previous, last, "transitions must chain");
                last = current;
            }
        }
    }

    mod timing {
        use super::*;

        #[test]
        fn unresolved_host_becomes_unreachable_after_timeout() {
            let mut t = tracker();
            let start = Instant::now();
            t.apply(ServiceNotice::Found(INSTANCE.into()), start);

            assert!(t.tick(start + Duration::from_secs(4)).is_empty());
            let out = t.tick(start + Duration::from_secs(5));
            assert_eq!(
                states(&out),
                vec![(Some(HostState::Resolving), Some(HostState::Unreachable))]
            );
            // Fires only once
            assert!(t.tick(start + Duration::from_secs(6)).is_empty());
        }

        #[test]
        fn unreachable_host_recovers_through_resolving() {
            let mut t = tracker();
            let start = Instant::now();
            t.apply(ServiceNotice::Found(INSTANCE.into()), start);
            t.tick(start + Duration::from_secs(5));

            let out = t.apply(resolved(INSTANCE, 10), start + Duration::from_secs(7));
            assert_eq!(
                states(&out),
                vec![
                    (Some(HostState::Unreachable), Some(HostState::Resolving)),
                    (Some(HostState::Resolving), Some(HostState::Resolved)),
                ]
            );
        }

        #[test]
        fn liveness_window_removes_stale_host() {
            let mut t = tracker();
            let start = Instant::now();
            t.apply(resolved(INSTANCE, 10), start);

            assert!(t.tick(start + Duration::from_secs(59)).is_empty());
            let out = t.tick(start + Duration::from_secs(60));
            assert!(matches!(out.as_slice(), [Transition::Removed(h)] if h.instance == INSTANCE));
            assert!(t.is_empty());
        }

        #[test]
        fn refresh_extends_liveness() {
            let mut t = tracker();
            let start = Instant::now();
            t.apply(resolved(INSTANCE, 10), start);
            t.apply(resolved(INSTANCE, 10), start + Duration::from_secs(30));
            assert!(t.tick(start + Duration::from_secs(60)).is_empty());
            assert_eq!(t.len(), 1);
        }

        #[test]
        fn next_deadline_tracks_earliest_event() {
            let mut t = tracker();
            assert!(t.next_deadline().is_none());
            let start = Instant::now();
            t.apply(ServiceNotice::Found(INSTANCE.into()), start);
            assert_eq!(t.next_deadline(), Some(start + Duration::from_secs(5)));
            t.apply(resolved(INSTANCE, 10), start);
            assert_eq!(t.next_deadline(), Some(start + Duration::from_secs(60)));
        }
    }

    mod records {
        use super::*;

        #[test]
        fn txt_name_and_fingerprint_applied() {
            let mut t = tracker();
            let mut txt = HashMap::new();
            txt.insert("name".to_string(), "Living Room".to_string());
            txt.insert("pk".to_string(), "cd".repeat(32));
            t.apply(
                ServiceNotice::Resolved(ResolvedService {
                    instance: INSTANCE.into(),
                    port: 47989,
                    addresses: vec![IpAddr::V4(Ipv4Addr::new(192, 0, 2, 10))],
                    txt,
                }),
                Instant::now(),
            );
            let host = &t.hosts()[0];
            assert_eq!(host.name, "Living Room");
            assert_eq!(host.fingerprint.unwrap().0, [0xCD; 32]);
        }

        #[test]
        fn default_name_is_instance_label() {
            let mut t = tracker();
            t.apply(resolved(INSTANCE, 10), Instant::now());
            assert_eq!(t.hosts()[0].name, "LivingRoomPC");
        }

        #[test]
        fn removal_of_unknown_instance_is_silent() {
            let mut t = tracker();
            assert!(t.apply(ServiceNotice::Removed(INSTANCE.into()), Instant::now()).is_empty());
        }
    }
}
