//! Catch-all handler: `GET /some/path[?ATTRIBUTE]`.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::{StatusCode, Uri};
use axum::response::Response;
use percent_encoding::percent_decode_str;

use oscquery_core::attributes::{HOST_INFO, QUERYABLE};

use super::{render, ApiState};

pub async fn handle_node(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
    uri: Uri,
) -> Result<Response, (StatusCode, String)> {
    // The whole query string is the attribute name, e.g. `?VALUE`.
    let attribute = uri.query().filter(|q| !q.is_empty());
    if attribute == Some(HOST_INFO) {
        return super::handle_host_info(State(state), ConnectInfo(remote)).await;
    }

    let path = percent_decode_str(uri.path()).decode_utf8_lossy();
    let Some(node) = state.tree.get(&path) else {
        tracing::debug!(path = %path, remote = %remote, "OSC path not found");
        return Err((StatusCode::NOT_FOUND, "OSC Path not found".to_string()));
    };

    match attribute {
        None => render(&path, remote, || serde_json::to_vec(node.as_ref())),
        Some(attr) if QUERYABLE.contains(&attr) => {
            // VALUE may call a provider, so it resolves inside `render`.
            render(&path, remote, || serde_json::to_vec(&node.attribute_json(attr)))
        }
        Some(attr) => {
            tracing::debug!(path = %path, attribute = attr, remote = %remote, "unknown attribute");
            Err((StatusCode::BAD_REQUEST, format!("Unknown attribute {attr}")))
        }
    }
}
