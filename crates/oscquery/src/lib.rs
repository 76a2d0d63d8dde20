//! oscquery: an OSCQuery server with discovery, plus helpers for querying peers.

pub mod client;
pub mod service;
pub mod utils;

pub use client::{fetch_host_info, fetch_tree};
pub use service::{OscQueryService, ServiceError};
pub use utils::{available_tcp_port, available_udp_port};

pub use oscquery_services::{Discovery, MdnsTransport, NullTransport, PeerEvents, ServiceRecord};

pub use oscquery_core::{Access, HostInfo, OscNode, OscTree, OscValue, ServiceProfile, ServiceType};
