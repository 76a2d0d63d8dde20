//! HTTP handlers: map OSCQuery requests onto the tree and host info.

pub mod host_info;
pub mod node;

use std::panic::{catch_unwind, AssertUnwindSafe};
use std::net::SocketAddr;
use std::sync::{Arc, RwLock};

use axum::http::{header, StatusCode};
use axum::response::{IntoResponse, Response};

use oscquery_core::{HostInfo, OscTree};

#[derive(Clone)]
pub struct ApiState {
    pub tree: Arc<OscTree>,
    /// Written once when an OSC port is advertised.
    pub host_info: Arc<RwLock<HostInfo>>,
}

impl ApiState {
    pub fn new(tree: Arc<OscTree>, host_info: HostInfo) -> Self {
        Self {
            tree,
            host_info: Arc::new(RwLock::new(host_info)),
        }
    }
}

// ── Shared helpers ────────────────────────────────────────────────────────────

/// JSON body with caching disabled; values change between requests.
fn no_cache_json(body: Vec<u8>) -> Response {
    (
        [
            (header::CONTENT_TYPE, "application/json"),
            (header::PRAGMA, "no-cache"),
            (header::CACHE_CONTROL, "no-cache"),
        ],
        body,
    )
        .into_response()
}

/// Run a serializer that may call into application code (value providers).
/// A failure or panic becomes a 500 logged with the path and remote address.
fn render<F>(path: &str, remote: SocketAddr, serialize: F) -> Result<Response, (StatusCode, String)>
where
    F: FnOnce() -> serde_json::Result<Vec<u8>>,
{
    match catch_unwind(AssertUnwindSafe(serialize)) {
        Ok(Ok(body)) => Ok(no_cache_json(body)),
        Ok(Err(e)) => {
            tracing::error!(path, remote = %remote, error = %e, "failed to serialize response");
            Err((StatusCode::INTERNAL_SERVER_ERROR, e.to_string()))
        }
        Err(_) => {
            tracing::error!(path, remote = %remote, "handler panicked while serializing");
            Err((
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ))
        }
    }
}

pub use host_info::handle_host_info;
pub use node::handle_node;
