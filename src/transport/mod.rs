//! Transport layer for the daemon.
//!
//! - HTTP: the local daemon API (`/health`, `/query`, `/session`, `/shutdown`)
//! - Stdio: MCP over standard input/output for CLI integration

pub mod http;
pub mod stdio;

pub use http::HttpTransport;
pub use stdio::StdioTransport;

use crate::error::DbResult;
use std::future::Future;
use tokio::signal;
use tracing::info;

/// A front end that serves the shared query handler until the daemon stops.
///
/// `run` closes the pool before it finishes. The stdio transport cannot
/// interrupt its stdin reader, so it exits the process after a signal or a
/// shutdown request instead of returning.
pub trait Transport: Send + Sync {
    fn run(&self) -> impl Future<Output = DbResult<()>> + Send;

    /// Short label used in startup logs.
    fn name(&self) -> &'static str;
}

/// Resolves on the first SIGINT or SIGTERM.
pub(crate) async fn wait_for_signal() {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("install SIGINT handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("Received SIGINT"),
        _ = terminate => info!("Received SIGTERM"),
    }
}
