//! oscquery-services: the expiry cache, peer discovery and the mDNS transport.

pub mod discovery;
pub mod expiry;
pub mod mdns;

pub use discovery::{Discovery, MdnsTransport, NullTransport, PeerEvents, ServiceRecord};
pub use expiry::{ExpiryCache, Touch};
pub use mdns::{service_info, MdnsSdTransport};
pub use mdns_sd::ServiceInfo;
