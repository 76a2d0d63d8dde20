//! Fetch a peer's tree or host info over HTTP.

use std::net::{IpAddr, SocketAddr};

use anyhow::{Context, Result};

use oscquery_core::attributes::HOST_INFO;
use oscquery_core::{HostInfo, OscTree};

fn base_url(ip: IpAddr, port: u16) -> String {
    format!("http://{}", SocketAddr::new(ip, port))
}

/// GET `path` (default `/`) from a peer and parse it as a tree.
///
/// The returned tree's index is rebuilt, so every node is reachable by path.
pub async fn fetch_tree(ip: IpAddr, port: u16, path: Option<&str>) -> Result<OscTree> {
    let path = path.filter(|p| !p.is_empty()).unwrap_or("/");
    let slash = if path.starts_with('/') { "" } else { "/" };
    let url = format!("{}{slash}{path}", base_url(ip, port));

    let body = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?
        .error_for_status()
        .with_context(|| format!("{url} returned an error"))?
        .bytes()
        .await
        .context("failed to read response body")?;

    OscTree::from_slice(&body).with_context(|| format!("invalid OSCQuery tree from {url}"))
}

/// GET `?HOST_INFO` from a peer.
pub async fn fetch_host_info(ip: IpAddr, port: u16) -> Result<HostInfo> {
    let url = format!("{}/?{HOST_INFO}", base_url(ip, port));
    reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?
        .error_for_status()
        .with_context(|| format!("{url} returned an error"))?
        .json::<HostInfo>()
        .await
        .context("failed to parse host info")
}

/// GET `path?attribute` from a peer and return the raw JSON.
pub async fn fetch_attribute(
    ip: IpAddr,
    port: u16,
    path: &str,
    attribute: Option<&str>,
) -> Result<serde_json::Value> {
    let mut url = format!("{}{path}", base_url(ip, port));
    if let Some(attr) = attribute {
        url.push('?');
        url.push_str(attr);
    }
    let resp = reqwest::get(&url)
        .await
        .with_context(|| format!("failed to connect to {url}"))?;
    let status = resp.status();
    if !status.is_success() {
        let text = resp.text().await.unwrap_or_default();
        anyhow::bail!("{url}: {status} {text}");
    }
    resp.json().await.context("failed to parse response")
}
