//! HTTP transport: the local daemon API.
//!
//! - `GET /health`: daemon and pool health
//! - `POST /query`: execute one statement (body is a `QueryRequest`)
//! - `GET /session`: context of a pooled session
//! - `POST /shutdown`: request an orderly shutdown
//!
//! `/query` always answers 200 with a `QueryResult`; failures are reported in
//! the body. `/session` maps errors onto HTTP status codes.

use crate::db::Driver;
use crate::error::{DbError, DbResult};
use crate::models::{QueryRequest, QueryResult, SessionSnapshot};
use crate::tools::{HealthReport, QueryToolHandler, ShutdownAck};
use crate::transport::{Transport, wait_for_signal};
use axum::extract::{Request, State};
use axum::http::StatusCode;
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::Serialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::TcpListener;
use tracing::{error, info, warn};

/// How long in-flight requests may run once shutdown has begun.
const GRACEFUL_TIMEOUT: Duration = Duration::from_secs(30);

type Shared<D> = Arc<QueryToolHandler<D>>;

/// Error body for non-query endpoints.
#[derive(Debug, Serialize)]
struct ErrorBody {
    error: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    suggestion: Option<String>,
}

struct ApiError(DbError);

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = match &self.0 {
            DbError::PoolClosed | DbError::ConnectionUnavailable { .. } => {
                StatusCode::SERVICE_UNAVAILABLE
            }
            DbError::Authentication { .. } | DbError::Network { .. } => StatusCode::BAD_GATEWAY,
            DbError::Timeout { .. } => StatusCode::GATEWAY_TIMEOUT,
            DbError::InvalidInput { .. } | DbError::ValidationRejected { .. } => {
                StatusCode::BAD_REQUEST
            }
            _ => StatusCode::INTERNAL_SERVER_ERROR,
        };
        let body = ErrorBody {
            error: self.0.to_string(),
            suggestion: self.0.suggestion().map(str::to_string),
        };
        (status, Json(body)).into_response()
    }
}

/// Build the daemon API router.
pub fn router<D: Driver>(handler: Shared<D>) -> Router {
    Router::new()
        .route("/health", get(health::<D>))
        .route("/query", post(query::<D>))
        .route("/session", get(session::<D>))
        .route("/shutdown", post(shutdown::<D>))
        .layer(middleware::from_fn_with_state(
            handler.clone(),
            record_activity::<D>,
        ))
        .with_state(handler)
}

/// Every request counts as activity for the idle timer.
async fn record_activity<D: Driver>(
    State(handler): State<Shared<D>>,
    request: Request,
    next: Next,
) -> Response {
    handler.clock().touch();
    next.run(request).await
}

async fn health<D: Driver>(State(handler): State<Shared<D>>) -> Json<HealthReport> {
    Json(handler.health())
}

async fn query<D: Driver>(
    State(handler): State<Shared<D>>,
    Json(request): Json<QueryRequest>,
) -> Json<QueryResult> {
    Json(handler.query(request).await)
}

async fn session<D: Driver>(
    State(handler): State<Shared<D>>,
) -> Result<Json<SessionSnapshot>, ApiError> {
    handler.session().await.map(Json).map_err(ApiError)
}

async fn shutdown<D: Driver>(State(handler): State<Shared<D>>) -> Json<ShutdownAck> {
    Json(handler.shutdown())
}

pub struct HttpTransport<D: Driver> {
    handler: Shared<D>,
    host: String,
    port: u16,
}

impl<D: Driver> HttpTransport<D> {
    pub fn new(handler: Shared<D>, host: impl Into<String>, port: u16) -> Self {
        Self {
            handler,
            host: host.into(),
            port,
        }
    }

    /// Get the bind address.
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Serve on an already bound listener until a signal or the shutdown
    /// token stops the server, then close the pool.
    pub async fn serve(&self, listener: TcpListener) -> DbResult<()> {
        let app = router(self.handler.clone());
        let token = self.handler.shutdown_token().clone();

        let stop_token = token.clone();
        let shutdown_signal = async move {
            tokio::select! {
                _ = wait_for_signal() => {
                    info!("Shutdown signal received");
                    stop_token.cancel();
                }
                _ = stop_token.cancelled() => info!("Shutdown requested"),
            }
        };

        let server = axum::serve(listener, app).with_graceful_shutdown(shutdown_signal);

        let result = tokio::select! {
            result = server => match result {
                Ok(()) => {
                    info!("HTTP server stopped");
                    Ok(())
                }
                Err(e) => {
                    error!(error = %e, "HTTP server error");
                    Err(DbError::internal(format!("HTTP server error: {}", e)))
                }
            },
            _ = async {
                token.cancelled().await;
                info!(
                    timeout_secs = GRACEFUL_TIMEOUT.as_secs(),
                    "Waiting for requests to finish (send signal again to force exit)..."
                );
                tokio::select! {
                    _ = tokio::time::sleep(GRACEFUL_TIMEOUT) => {
                        warn!("Graceful shutdown timeout, forcing exit");
                    }
                    _ = wait_for_signal() => {
                        warn!("Received second signal, forcing immediate exit");
                    }
                }
            } => Ok(()),
        };

        info!("Closing Snowflake sessions");
        self.handler.pool().shutdown().await;
        result
    }
}

impl<D: Driver> Transport for HttpTransport<D> {
    async fn run(&self) -> DbResult<()> {
        let bind_addr = self.bind_addr();
        info!("Starting daemon API on {}", bind_addr);

        let listener = TcpListener::bind(&bind_addr).await.map_err(|e| {
            DbError::connection_unavailable(
                format!("Failed to bind to {}: {}", bind_addr, e),
                "Check that the port is available or pass --http-port",
            )
        })?;

        self.serve(listener).await
    }

    fn name(&self) -> &'static str {
        "http"
    }
}
