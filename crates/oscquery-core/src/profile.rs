//! Service profiles: one advertised or discovered OSC/OSCQuery endpoint.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

use crate::attributes::{LOCAL_OSCJSON_SERVICE, LOCAL_OSC_UDP_SERVICE, SERVICE_OSCJSON_TCP, SERVICE_OSC_UDP};

/// Which protocol a profile speaks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ServiceType {
    Unknown,
    OscQuery,
    Osc,
}

impl ServiceType {
    /// DNS-SD service type, e.g. `_oscjson._tcp`.
    pub fn service_type_str(self) -> &'static str {
        match self {
            ServiceType::Osc => SERVICE_OSC_UDP,
            ServiceType::OscQuery => SERVICE_OSCJSON_TCP,
            ServiceType::Unknown => "UNKNOWN",
        }
    }

    /// Classify a fully qualified service name. Only exact matches count.
    pub fn from_service_name(name: &str) -> Self {
        match name {
            LOCAL_OSCJSON_SERVICE => ServiceType::OscQuery,
            LOCAL_OSC_UDP_SERVICE => ServiceType::Osc,
            _ => ServiceType::Unknown,
        }
    }
}

impl fmt::Display for ServiceType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ServiceType::Osc => f.write_str("OSC"),
            ServiceType::OscQuery => f.write_str("OSCQuery"),
            ServiceType::Unknown => f.write_str("Unknown"),
        }
    }
}

/// A named service at an address and port. Equal when all four fields are.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ServiceProfile {
    pub name: String,
    pub address: IpAddr,
    pub port: u16,
    pub service_type: ServiceType,
}

impl ServiceProfile {
    pub fn new(name: impl Into<String>, address: IpAddr, port: u16, service_type: ServiceType) -> Self {
        Self {
            name: name.into(),
            address,
            port,
            service_type,
        }
    }

    pub fn endpoint(&self) -> SocketAddr {
        SocketAddr::new(self.address, self.port)
    }

    pub fn service_type_str(&self) -> &'static str {
        self.service_type.service_type_str()
    }
}

impl fmt::Display for ServiceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({}) at {}", self.name, self.service_type, self.endpoint())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashSet;

    #[test]
    fn classification_is_exact() {
        assert_eq!(ServiceType::from_service_name("_oscjson._tcp.local"), ServiceType::OscQuery);
        assert_eq!(ServiceType::from_service_name("_osc._udp.local"), ServiceType::Osc);
        assert_eq!(ServiceType::from_service_name("_osc._udp.local."), ServiceType::Unknown);
        assert_eq!(ServiceType::from_service_name("_http._tcp.local"), ServiceType::Unknown);
    }

    #[test]
    fn equality_covers_all_fields() {
        let ip: IpAddr = "10.0.0.5".parse().unwrap();
        let a = ServiceProfile::new("Peer1", ip, 9000, ServiceType::OscQuery);
        let b = ServiceProfile::new("Peer1", ip, 9000, ServiceType::OscQuery);
        let c = ServiceProfile::new("Peer1", ip, 9000, ServiceType::Osc);
        let d = ServiceProfile::new("Peer1", ip, 9001, ServiceType::OscQuery);
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert_ne!(a, d);

        let set: HashSet<_> = [a, b, c, d].into_iter().collect();
        assert_eq!(set.len(), 3);
    }
}
