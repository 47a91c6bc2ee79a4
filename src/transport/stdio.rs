//! Stdio transport: MCP over standard input/output.
//!
//! Logs go to stderr, so stdout carries only JSON-RPC frames.

use crate::db::SnowflakeDriver;
use crate::error::{DbError, DbResult};
use crate::mcp::DaemonService;
use crate::tools::QueryToolHandler;
use crate::transport::{Transport, wait_for_signal};
use rmcp::{ServiceExt, transport::stdio};
use std::sync::Arc;
use tracing::{info, warn};

/// Why the stdio loop stopped.
enum StopReason {
    ClientClosed,
    Signal,
    Requested,
}

pub struct StdioTransport {
    handler: Arc<QueryToolHandler<SnowflakeDriver>>,
}

impl StdioTransport {
    pub fn new(handler: Arc<QueryToolHandler<SnowflakeDriver>>) -> Self {
        Self { handler }
    }
}

impl Transport for StdioTransport {
    async fn run(&self) -> DbResult<()> {
        info!("Starting MCP server with stdio transport");

        let service = DaemonService::new(self.handler.clone());
        let running_service = service
            .serve(stdio())
            .await
            .map_err(|e| DbError::internal(format!("Failed to start stdio transport: {}", e)))?;

        let token = self.handler.shutdown_token().clone();
        let reason = tokio::select! {
            result = running_service.waiting() => {
                if let Err(e) = result {
                    warn!(error = %e, "Stdio transport error");
                    self.handler.pool().shutdown().await;
                    return Err(DbError::internal(format!("Stdio transport error: {}", e)));
                }
                info!("Stdio transport completed normally");
                StopReason::ClientClosed
            }
            _ = wait_for_signal() => {
                info!("Shutdown signal received (send again to force exit)");
                StopReason::Signal
            }
            _ = token.cancelled() => {
                info!("Shutdown requested");
                StopReason::Requested
            }
        };

        if matches!(reason, StopReason::Signal) {
            tokio::spawn(async {
                wait_for_signal().await;
                warn!("Received second signal, forcing immediate exit");
                std::process::exit(1);
            });
        }

        info!("Closing Snowflake sessions");
        self.handler.pool().shutdown().await;

        if !matches!(reason, StopReason::ClientClosed) {
            // The stdin reader cannot be interrupted from here.
            info!("Exiting process");
            std::process::exit(0);
        }

        Ok(())
    }

    fn name(&self) -> &'static str {
        "stdio"
    }
}
