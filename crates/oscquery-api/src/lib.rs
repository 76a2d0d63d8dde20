//! The OSCQuery HTTP front end.

pub mod handlers;

use std::net::SocketAddr;

use axum::routing::get;
use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::cors::{Any, CorsLayer};

use oscquery_core::attributes::HOST_INFO;

pub use handlers::ApiState;

/// `/HOST_INFO` plus a catch-all that resolves every other path in the tree.
pub fn router(state: ApiState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    Router::new()
        .route(&format!("/{HOST_INFO}"), get(handlers::handle_host_info))
        .fallback(handlers::handle_node)
        .with_state(state)
        .layer(cors)
}

/// Serve on an already-bound listener until `shutdown` fires.
pub async fn serve(
    state: ApiState,
    listener: TcpListener,
    mut shutdown: broadcast::Receiver<()>,
) -> anyhow::Result<()> {
    let addr = listener.local_addr()?;
    tracing::info!(%addr, "OSCQuery HTTP listening");

    axum::serve(
        listener,
        router(state).into_make_service_with_connect_info::<SocketAddr>(),
    )
    .with_graceful_shutdown(async move {
        let _ = shutdown.recv().await;
    })
    .await?;

    tracing::info!(%addr, "OSCQuery HTTP stopped");
    Ok(())
}
