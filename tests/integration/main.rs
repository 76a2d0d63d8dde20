//! OSCQuery integration test harness.
//!
//! Every test runs in-process: services bind real HTTP listeners on
//! 127.0.0.1 with an ephemeral port, and discovery runs over an in-memory
//! link that hands each announcement to every service the way the mDNS
//! daemon reports a resolved peer. No multicast traffic leaves the process.

use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, Weak};

use anyhow::{Context, Result};

use oscquery::{Discovery, MdnsTransport, OscQueryService, ServiceRecord};
use oscquery_services::service_info;

mod client;
mod discovery;
mod query;

pub const LOCALHOST: IpAddr = IpAddr::V4(Ipv4Addr::LOCALHOST);

// ── In-memory link ────────────────────────────────────────────────────────────

/// A shared "network segment": every announcement and goodbye reaches
/// every attached discovery instance.
#[derive(Default)]
pub struct Link {
    members: Mutex<Vec<Weak<Discovery>>>,
}

impl Link {
    pub fn new() -> Arc<Self> {
        Arc::new(Self::default())
    }

    pub fn attach(&self, discovery: &Arc<Discovery>) {
        self.members.lock().unwrap().push(Arc::downgrade(discovery));
    }

    fn members(&self) -> Vec<Arc<Discovery>> {
        self.members
            .lock()
            .unwrap()
            .iter()
            .filter_map(Weak::upgrade)
            .collect()
    }

    fn resolve(&self, record: &ServiceRecord) -> Result<()> {
        let info = service_info(record).context("service info")?;
        for member in self.members() {
            member.handle_resolved(&info);
        }
        Ok(())
    }

    fn goodbye(&self, record: &ServiceRecord) -> Result<()> {
        for member in self.members() {
            member.handle_removed(&record.instance_name());
        }
        Ok(())
    }
}

/// One service's connection to a [`Link`].
pub struct LinkTransport {
    link: Arc<Link>,
}

impl MdnsTransport for LinkTransport {
    fn send_query(&self, _service: &str) -> Result<()> {
        Ok(())
    }

    fn announce(&self, record: &ServiceRecord) -> Result<()> {
        self.link.resolve(record)
    }

    fn unadvertise(&self, record: &ServiceRecord) -> Result<()> {
        self.link.goodbye(record)
    }
}

// ── Helpers ───────────────────────────────────────────────────────────────────

/// A service on loopback, attached to `link`, with HTTP not yet started.
pub fn service_on(link: &Arc<Link>, name: &str) -> OscQueryService {
    let transport = Arc::new(LinkTransport { link: link.clone() });
    let service = OscQueryService::new(name, LOCALHOST, transport);
    link.attach(service.discovery());
    service
}

/// A service with its HTTP server running. Returns the service and port.
pub async fn serving(name: &str) -> Result<(OscQueryService, u16)> {
    let service = service_on(&Link::new(), name);
    let port = service.start_http(0, false).await?;
    Ok((service, port))
}

pub fn url(port: u16, path_and_query: &str) -> String {
    format!("http://127.0.0.1:{port}{path_and_query}")
}
