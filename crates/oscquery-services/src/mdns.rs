//! Multicast DNS through the `mdns-sd` service daemon.
//!
//! The daemon owns the socket on 224.0.0.251:5353, answers queries for the
//! services we register and sends the goodbye when one is unregistered.
//! Each browse gets a small forwarding thread that moves its events into
//! one channel, which [`listener_loop`] feeds to [`Discovery`].
//!
//! [`listener_loop`]: MdnsSdTransport::listener_loop

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use anyhow::{Context, Result};
use mdns_sd::{ServiceDaemon, ServiceEvent, ServiceInfo};
use tokio::sync::{broadcast, mpsc};

use crate::discovery::{fqdn, Discovery, MdnsTransport, ServiceRecord};

pub struct MdnsSdTransport {
    daemon: ServiceDaemon,
    events_tx: mpsc::UnboundedSender<ServiceEvent>,
    events_rx: Mutex<Option<mpsc::UnboundedReceiver<ServiceEvent>>>,
}

impl MdnsSdTransport {
    /// Start the mDNS daemon thread.
    pub fn new() -> Result<Self> {
        let daemon = ServiceDaemon::new().context("failed to start mDNS daemon")?;
        let (events_tx, events_rx) = mpsc::unbounded_channel();
        Ok(Self {
            daemon,
            events_tx,
            events_rx: Mutex::new(Some(events_rx)),
        })
    }

    /// Feed browse results to `discovery` until `shutdown`, then stop the daemon.
    pub async fn listener_loop(
        self: Arc<Self>,
        discovery: Arc<Discovery>,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<()> {
        let mut events = self
            .events_rx
            .lock()
            .ok()
            .and_then(|mut rx| rx.take())
            .context("mDNS listener already running")?;
        tracing::info!("mDNS listener starting");

        loop {
            let event = tokio::select! {
                _ = shutdown.recv() => break,
                event = events.recv() => match event {
                    Some(e) => e,
                    None => break,
                },
            };
            dispatch(&discovery, event);
        }

        self.stop();
        tracing::info!("mDNS listener stopped");
        Ok(())
    }

    fn stop(&self) {
        if let Err(e) = self.daemon.shutdown() {
            tracing::warn!(error = %e, "mDNS daemon shutdown failed");
        }
    }
}

fn dispatch(discovery: &Discovery, event: ServiceEvent) {
    match event {
        ServiceEvent::ServiceResolved(info) => {
            discovery.handle_resolved(&info);
        }
        ServiceEvent::ServiceRemoved(_, fullname) => {
            discovery.handle_removed(&fullname);
        }
        other => tracing::trace!(event = ?other, "mDNS event"),
    }
}

impl MdnsTransport for MdnsSdTransport {
    /// Starts a fresh browse, which sends a query right away. The daemon
    /// closes the previous browse channel for the same type, ending its
    /// forwarder.
    fn send_query(&self, service: &str) -> Result<()> {
        let receiver = self
            .daemon
            .browse(&fqdn(service))
            .with_context(|| format!("browse {service} failed"))?;
        let tx = self.events_tx.clone();
        std::thread::Builder::new()
            .name(format!("mdns-browse {service}"))
            .spawn(move || {
                while let Ok(event) = receiver.recv() {
                    if tx.send(event).is_err() {
                        break;
                    }
                }
            })
            .context("failed to spawn browse forwarder")?;
        Ok(())
    }

    /// Registering again under the same name re-announces it.
    fn announce(&self, record: &ServiceRecord) -> Result<()> {
        let info = service_info(record)?;
        self.daemon
            .register(info)
            .with_context(|| format!("register {} failed", record.instance_name()))
    }

    fn unadvertise(&self, record: &ServiceRecord) -> Result<()> {
        self.daemon
            .unregister(&record.instance_name())
            .with_context(|| format!("unregister {} failed", record.instance_name()))?;
        Ok(())
    }
}

/// The daemon's form of `record`: SRV `<instance>.<type>.local.` pointing at
/// `<host>.local.`, with one A/AAAA per address.
pub fn service_info(record: &ServiceRecord) -> Result<ServiceInfo> {
    let addresses = record
        .addresses
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join(",");
    ServiceInfo::new(
        &record.service_name(),
        &record.instance,
        &record.host_name(),
        addresses.as_str(),
        record.port,
        HashMap::<String, String>::new(),
    )
    .with_context(|| format!("invalid service record for {}", record.instance))
}
