//! Peer discovery over multicast DNS.
//!
//! Discovered peers live in an [`ExpiryCache`]; a resolved service either
//! inserts a profile (and notifies subscribers) or silently refreshes it.
//! Removal is only ever signalled by the cache evicting an entry that
//! stopped being refreshed. A goodbye from the link just ages a known
//! entry to zero.
//!
//! The transport is a trait so the engine can run against the mDNS daemon
//! or an in-memory recorder.

use std::net::IpAddr;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::Result;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use mdns_sd::ServiceInfo;
use tokio::sync::{broadcast, mpsc};
use tokio::task::JoinHandle;

use oscquery_core::attributes::MATCHED_SERVICE_NAMES;
use oscquery_core::{ServiceProfile, ServiceType};

use crate::expiry::{ExpiryCache, Touch};

/// Refresh never runs more often than this, whatever the TTL.
const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

// ── Names ─────────────────────────────────────────────────────────────────────

/// `name` with the trailing root dot mDNS expects.
pub(crate) fn fqdn(name: &str) -> String {
    if name.ends_with('.') {
        name.to_string()
    } else {
        format!("{name}.")
    }
}

/// Lowercase, without the trailing dot: the form service names are compared in.
fn canonical(name: &str) -> String {
    name.trim_end_matches('.').to_ascii_lowercase()
}

/// Split `Peer1._oscjson._tcp.local.` into the first label and the service
/// it belongs to. `None` for services we don't track.
fn split_instance(fullname: &str) -> Option<(&str, ServiceType)> {
    let (instance, service) = fullname.split_once('.')?;
    let service_type = ServiceType::from_service_name(&canonical(service));
    if instance.is_empty() || service_type == ServiceType::Unknown {
        return None;
    }
    Some((instance, service_type))
}

// ── Transport ─────────────────────────────────────────────────────────────────

/// A DNS-SD service record to publish: `<instance>.<service_type>.local.`
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceRecord {
    pub instance: String,
    /// e.g. `_oscjson._tcp`
    pub service_type: &'static str,
    pub port: u16,
    pub addresses: Vec<IpAddr>,
}

impl ServiceRecord {
    pub fn from_profile(profile: &ServiceProfile) -> Self {
        Self {
            instance: profile.name.clone(),
            service_type: profile.service_type_str(),
            port: profile.port,
            addresses: vec![profile.address],
        }
    }

    /// `_oscjson._tcp.local.`
    pub fn service_name(&self) -> String {
        format!("{}.local.", self.service_type)
    }

    /// `Synth._oscjson._tcp.local.`
    pub fn instance_name(&self) -> String {
        format!("{}.{}", self.instance, self.service_name())
    }

    /// `Synth.local.`, with characters that don't belong in a host label replaced.
    pub fn host_name(&self) -> String {
        let host: String = self
            .instance
            .chars()
            .map(|c| if c.is_ascii_alphanumeric() || c == '-' { c } else { '-' })
            .collect();
        format!("{host}.local.")
    }
}

/// What discovery needs from the multicast link.
pub trait MdnsTransport: Send + Sync {
    /// Ask the link who offers `service` (e.g. `_osc._udp.local`).
    fn send_query(&self, service: &str) -> Result<()>;

    /// Publish (or re-publish) a record.
    fn announce(&self, record: &ServiceRecord) -> Result<()>;

    /// Retract a previously published record.
    fn unadvertise(&self, record: &ServiceRecord) -> Result<()>;
}

/// Transport for a service running with discovery disabled.
pub struct NullTransport;

impl MdnsTransport for NullTransport {
    fn send_query(&self, service: &str) -> Result<()> {
        tracing::trace!(service, "discovery disabled, query dropped");
        Ok(())
    }

    fn announce(&self, record: &ServiceRecord) -> Result<()> {
        tracing::trace!(instance = %record.instance, "discovery disabled, announce dropped");
        Ok(())
    }

    fn unadvertise(&self, _record: &ServiceRecord) -> Result<()> {
        Ok(())
    }
}

// ── Subscriptions ─────────────────────────────────────────────────────────────

pub type PeerEvents = mpsc::UnboundedReceiver<ServiceProfile>;

#[derive(Default)]
struct Subscribers {
    osc: Vec<mpsc::UnboundedSender<ServiceProfile>>,
    oscquery: Vec<mpsc::UnboundedSender<ServiceProfile>>,
    any: Vec<mpsc::UnboundedSender<ServiceProfile>>,
    removed: Vec<mpsc::UnboundedSender<ServiceProfile>>,
}

impl Subscribers {
    fn added(&mut self, profile: &ServiceProfile) {
        match profile.service_type {
            ServiceType::Osc => emit(&mut self.osc, profile),
            ServiceType::OscQuery => emit(&mut self.oscquery, profile),
            ServiceType::Unknown => {}
        }
        emit(&mut self.any, profile);
    }
}

/// Send to every live subscriber, dropping the ones whose receiver is gone.
fn emit(senders: &mut Vec<mpsc::UnboundedSender<ServiceProfile>>, profile: &ServiceProfile) {
    senders.retain(|tx| tx.send(profile.clone()).is_ok());
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Stream {
    Osc,
    OscQuery,
    Any,
    Removed,
}

// ── Discovery ─────────────────────────────────────────────────────────────────

pub struct Discovery {
    transport: Arc<dyn MdnsTransport>,
    cache: Arc<ExpiryCache<ServiceProfile>>,
    advertised: DashMap<ServiceProfile, ServiceRecord>,
    /// Guards registration and emission together, so a new subscriber's
    /// snapshot and the events after it never overlap or leave a gap.
    subscribers: Arc<Mutex<Subscribers>>,
}

impl Discovery {
    pub fn new(transport: Arc<dyn MdnsTransport>, default_ttl: Duration, max_ttl: Duration) -> Self {
        let cache = Arc::new(ExpiryCache::new(default_ttl, Some(max_ttl)));
        let subscribers = Arc::new(Mutex::new(Subscribers::default()));

        let subs = subscribers.clone();
        cache.on_expiry(move |profile: &ServiceProfile| {
            tracing::info!(peer = %profile, "peer expired");
            let mut subs = subs
                .lock()
                .map_err(|_| anyhow::anyhow!("subscriber lock poisoned"))?;
            emit(&mut subs.removed, profile);
            Ok(())
        });

        Self {
            transport,
            cache,
            advertised: DashMap::new(),
            subscribers,
        }
    }

    pub fn cache(&self) -> &Arc<ExpiryCache<ServiceProfile>> {
        &self.cache
    }

    /// Peers currently believed alive.
    pub fn discovered(&self) -> Vec<ServiceProfile> {
        self.cache.items()
    }

    pub fn discovered_of(&self, service_type: ServiceType) -> Vec<ServiceProfile> {
        self.cache
            .items()
            .into_iter()
            .filter(|p| p.service_type == service_type)
            .collect()
    }

    pub fn advertised(&self) -> Vec<ServiceProfile> {
        self.advertised.iter().map(|e| e.key().clone()).collect()
    }

    /// Refresh interval: half the max TTL.
    pub fn refresh_interval(&self) -> Duration {
        (self.cache.max_ttl() / 2).max(MIN_REFRESH_INTERVAL)
    }

    // ── Advertising ───────────────────────────────────────────────────────────

    /// Publish `profile` and track it for periodic re-announcement.
    /// Advertising a tracked profile again re-announces the same record.
    pub fn advertise(&self, profile: ServiceProfile) -> Result<()> {
        let record = match self.advertised.entry(profile.clone()) {
            Entry::Occupied(e) => {
                tracing::warn!(profile = %profile, "service already advertised, re-announcing");
                e.get().clone()
            }
            Entry::Vacant(e) => {
                tracing::info!(profile = %profile, "advertising service");
                e.insert(ServiceRecord::from_profile(&profile)).value().clone()
            }
        };
        self.transport.announce(&record)
    }

    /// Retract `profile` if it was advertised. Untracked profiles are a no-op.
    pub fn unadvertise(&self, profile: &ServiceProfile) -> Result<()> {
        match self.advertised.remove(profile) {
            Some((_, record)) => {
                tracing::info!(profile = %profile, "unadvertising service");
                self.transport.unadvertise(&record)
            }
            None => {
                tracing::debug!(profile = %profile, "unadvertise: not advertised");
                Ok(())
            }
        }
    }

    /// Retract everything. Each failure is logged and the rest still go.
    pub fn unadvertise_all(&self) {
        for profile in self.advertised() {
            if let Err(e) = self.unadvertise(&profile) {
                tracing::warn!(profile = %profile, error = %e, "unadvertise failed");
            }
        }
    }

    /// Query the link for both well-known services.
    pub fn refresh_services(&self) {
        for service in MATCHED_SERVICE_NAMES {
            if let Err(e) = self.transport.send_query(service) {
                tracing::warn!(service, error = %e, "mDNS query failed");
            }
        }
    }

    fn reannounce(&self) {
        for entry in self.advertised.iter() {
            if let Err(e) = self.transport.announce(entry.value()) {
                tracing::warn!(profile = %entry.key(), error = %e, "re-announce failed");
            }
        }
    }

    // ── Answers ───────────────────────────────────────────────────────────────

    /// Handle one resolved service (SRV plus its addresses). Returns how
    /// many peers were new.
    pub fn handle_resolved(&self, info: &ServiceInfo) -> usize {
        let fullname = info.get_fullname();
        let Some((instance, service_type)) = split_instance(fullname) else {
            tracing::trace!(service = %fullname, "ignoring unrelated service");
            return 0;
        };

        let mut addresses: Vec<IpAddr> = info
            .get_addresses()
            .iter()
            .map(|addr| IpAddr::from(*addr))
            .collect();
        if addresses.is_empty() {
            tracing::info!(instance, "resolved service carried no address");
            return 0;
        }
        addresses.sort();

        let ttl = Duration::from_secs(u64::from(info.get_other_ttl()));
        let mut new_peers = 0;
        for address in addresses {
            let profile = ServiceProfile::new(instance, address, info.get_port(), service_type);
            if self.record_peer(profile, ttl) == Some(Touch::New) {
                new_peers += 1;
            }
        }
        new_peers
    }

    /// Handle a goodbye for `fullname`: every cached profile of that
    /// instance expires on the next sweep. Returns how many were aged.
    pub fn handle_removed(&self, fullname: &str) -> usize {
        let Some((instance, service_type)) = split_instance(fullname) else {
            return 0;
        };
        self.cache
            .items()
            .into_iter()
            .filter(|p| p.name == instance && p.service_type == service_type)
            .filter(|p| self.record_peer(p.clone(), Duration::ZERO).is_some())
            .count()
    }

    /// Insert or refresh `profile`. A zero TTL only ages an entry that is
    /// already cached, so a goodbye never announces a peer.
    fn record_peer(&self, profile: ServiceProfile, ttl: Duration) -> Option<Touch> {
        if ttl.is_zero() {
            if !self.cache.touch_existing(&profile, ttl) {
                return None;
            }
            tracing::debug!(peer = %profile, "peer said goodbye");
            return Some(Touch::Refreshed);
        }

        let Ok(mut subs) = self.subscribers.lock() else {
            return Some(self.cache.add_or_touch(profile, Some(ttl)));
        };
        let touch = self.cache.add_or_touch(profile.clone(), Some(ttl));
        if touch == Touch::New {
            tracing::info!(peer = %profile, "peer discovered");
            subs.added(&profile);
        }
        Some(touch)
    }

    // ── Subscriptions ─────────────────────────────────────────────────────────

    /// New OSC peers. Already-known ones are delivered first.
    pub fn subscribe_osc(&self) -> PeerEvents {
        self.subscribe(Stream::Osc)
    }

    /// New OSCQuery peers. Already-known ones are delivered first.
    pub fn subscribe_oscquery(&self) -> PeerEvents {
        self.subscribe(Stream::OscQuery)
    }

    /// New peers of either type. Already-known ones are delivered first.
    pub fn subscribe_any(&self) -> PeerEvents {
        self.subscribe(Stream::Any)
    }

    /// Peers that expired. Nothing is replayed: the cache keeps no record
    /// of entries it already evicted.
    pub fn subscribe_removed(&self) -> PeerEvents {
        self.subscribe(Stream::Removed)
    }

    fn subscribe(&self, stream: Stream) -> PeerEvents {
        let (tx, rx) = mpsc::unbounded_channel();
        let Ok(mut subs) = self.subscribers.lock() else {
            return rx;
        };

        let wanted = match stream {
            Stream::Osc => Some(ServiceType::Osc),
            Stream::OscQuery => Some(ServiceType::OscQuery),
            Stream::Any | Stream::Removed => None,
        };
        if stream != Stream::Removed {
            for profile in self.cache.items() {
                if wanted.map_or(true, |t| profile.service_type == t) {
                    let _ = tx.send(profile);
                }
            }
        }

        match stream {
            Stream::Osc => subs.osc.push(tx),
            Stream::OscQuery => subs.oscquery.push(tx),
            Stream::Any => subs.any.push(tx),
            Stream::Removed => subs.removed.push(tx),
        }
        rx
    }

    // ── Background tasks ──────────────────────────────────────────────────────

    /// Re-announce advertised records and query the link, every half max TTL.
    pub async fn refresh_loop(self: Arc<Self>, mut shutdown: broadcast::Receiver<()>) {
        let period = self.refresh_interval();
        let mut interval = tokio::time::interval(period);
        tracing::info!(interval_secs = period.as_secs(), "discovery refresh starting");

        loop {
            tokio::select! {
                _ = shutdown.recv() => break,
                _ = interval.tick() => {
                    self.reannounce();
                    self.refresh_services();
                }
            }
        }
        tracing::debug!("discovery refresh stopped");
    }

    /// Spawn the cache reaper and the refresh loop, both bound to `shutdown`.
    pub fn start(self: &Arc<Self>, shutdown: &broadcast::Sender<()>) -> Vec<JoinHandle<()>> {
        vec![
            tokio::spawn(self.cache.clone().run(shutdown.subscribe())),
            tokio::spawn(self.clone().refresh_loop(shutdown.subscribe())),
        ]
    }
}
