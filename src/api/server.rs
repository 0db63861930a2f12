use std::net::SocketAddr;

use tokio::net::TcpListener;
use tokio_util::sync::CancellationToken;
use tracing::info;

use super::routes::{build_router, ApiState};
use crate::errors::{Error, Result};

/// Serve the control API until `shutdown` is cancelled.
pub async fn start_api_server(
    addr: SocketAddr,
    state: ApiState,
    shutdown: CancellationToken,
) -> Result<()> {
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| Error::config(format!("Failed to bind API server on {}: {}", addr, e)))?;

    info!(address = %addr, "Starting control API server");
    axum::serve(listener, build_router(state))
        .with_graceful_shutdown(async move { shutdown.cancelled().await })
        .await
        .map_err(|e| Error::internal(format!("API server error: {}", e)))?;

    info!("Control API server shutdown completed");
    Ok(())
}
