//! HOST_INFO: the descriptor a client fetches before walking the tree.

use std::collections::BTreeMap;
use std::net::{IpAddr, SocketAddr};

use serde::{Deserialize, Serialize};

use crate::attributes;

pub const OSC_TRANSPORT_UDP: &str = "UDP";
pub const OSC_TRANSPORT_TCP: &str = "TCP";

/// Describes the local OSC + OSCQuery endpoint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct HostInfo {
    #[serde(rename = "NAME")]
    pub name: String,

    /// Which optional attributes this server supports.
    #[serde(rename = "EXTENSIONS", default = "default_extensions")]
    pub extensions: BTreeMap<String, bool>,

    #[serde(rename = "OSC_IP")]
    pub osc_ip: String,

    /// 0 until an OSC service is advertised.
    #[serde(rename = "OSC_PORT", default)]
    pub osc_port: u16,

    #[serde(rename = "OSC_TRANSPORT", default = "default_transport")]
    pub osc_transport: String,
}

impl HostInfo {
    pub fn new(name: impl Into<String>, osc_ip: IpAddr) -> Self {
        Self {
            name: name.into(),
            extensions: default_extensions(),
            osc_ip: osc_ip.to_string(),
            osc_port: 0,
            osc_transport: default_transport(),
        }
    }

    /// Where to send OSC to this host, if the advertised IP parses.
    pub fn osc_endpoint(&self) -> Option<SocketAddr> {
        let ip: IpAddr = self.osc_ip.parse().ok()?;
        Some(SocketAddr::new(ip, self.osc_port))
    }

    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }

    pub fn from_json(json: &str) -> serde_json::Result<Self> {
        serde_json::from_str(json)
    }
}

fn default_extensions() -> BTreeMap<String, bool> {
    [
        (attributes::ACCESS, true),
        (attributes::CLIPMODE, false),
        (attributes::RANGE, true),
        (attributes::TYPE, true),
        (attributes::VALUE, true),
    ]
    .into_iter()
    .map(|(k, v)| (k.to_string(), v))
    .collect()
}

fn default_transport() -> String {
    OSC_TRANSPORT_UDP.to_string()
}
