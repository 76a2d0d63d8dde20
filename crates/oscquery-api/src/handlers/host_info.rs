//! /HOST_INFO handler.

use std::net::SocketAddr;

use axum::extract::{ConnectInfo, State};
use axum::http::StatusCode;
use axum::response::Response;

use oscquery_core::attributes::HOST_INFO;

use super::{render, ApiState};

pub async fn handle_host_info(
    State(state): State<ApiState>,
    ConnectInfo(remote): ConnectInfo<SocketAddr>,
) -> Result<Response, (StatusCode, String)> {
    let info = state
        .host_info
        .read()
        .map_err(|_| {
            tracing::error!(remote = %remote, "host info lock poisoned");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                "host info unavailable".to_string(),
            )
        })?
        .clone();

    tracing::trace!(remote = %remote, "host info requested");
    render(&format!("/{HOST_INFO}"), remote, || serde_json::to_vec(&info))
}
