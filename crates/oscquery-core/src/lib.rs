//! oscquery-core: the attribute tree, node model, host info, service profiles and config.
//! All other OSCQuery crates depend on this one.

pub mod attributes;
pub mod config;
pub mod host_info;
pub mod node;
pub mod profile;
pub mod tree;
pub mod value;

pub use attributes::{Access, OscTyped};
pub use host_info::HostInfo;
pub use node::{NodeValue, OscNode, OscRange, ValueProvider};
pub use profile::{ServiceProfile, ServiceType};
pub use tree::{OscTree, TreeError};
pub use value::OscValue;
