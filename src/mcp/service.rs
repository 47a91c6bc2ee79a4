//! MCP service implementation using rmcp.
//!
//! Exposes the daemon's query, session, health and shutdown operations as MCP
//! tools. Each tool delegates to the shared [`QueryToolHandler`].

use crate::db::SnowflakeDriver;
use crate::models::{QueryRequest, QueryResult, SessionSnapshot};
use crate::tools::{HealthReport, QueryToolHandler, ShutdownAck};
use rmcp::Json;
use rmcp::{
    ErrorData as McpError, ServerHandler,
    handler::server::tool::ToolRouter,
    handler::server::wrapper::Parameters,
    model::{Implementation, ProtocolVersion, ServerCapabilities, ServerInfo},
    tool, tool_handler, tool_router,
};
use std::sync::Arc;

#[derive(Clone)]
pub struct DaemonService {
    /// Shared handler, also used by the HTTP transport
    handler: Arc<QueryToolHandler<SnowflakeDriver>>,
    /// Tool router for MCP tool dispatch (auto-generated)
    tool_router: ToolRouter<Self>,
}

impl DaemonService {
    pub fn new(handler: Arc<QueryToolHandler<SnowflakeDriver>>) -> Self {
        Self {
            handler,
            tool_router: Self::tool_router(),
        }
    }
}

#[tool_router]
impl DaemonService {
    #[tool(
        description = "Execute a SQL statement on a pooled Snowflake session.\nSELECT/WITH queries without LIMIT get one appended (default 100, max 10000).\nUSE DATABASE/SCHEMA/WAREHOUSE/ROLE changes persist on the pooled session.\nWrite statements are rejected unless the daemon was started with --allow-dml/--allow-ddl.\nFailures are returned as success=false with an error message and hints."
    )]
    async fn query(&self, Parameters(request): Parameters<QueryRequest>) -> Json<QueryResult> {
        Json(self.handler.query(request).await)
    }

    #[tool(description = "Show the current database, schema, warehouse and role of a pooled session.")]
    async fn session(&self) -> Result<Json<SessionSnapshot>, McpError> {
        self.handler
            .session()
            .await
            .map(Json)
            .map_err(McpError::from)
    }

    #[tool(description = "Report daemon health: status, uptime, pool size, active queries and idle time.")]
    async fn health(&self) -> Json<HealthReport> {
        Json(self.handler.health())
    }

    #[tool(description = "Shut the daemon down. Open Snowflake sessions are closed.")]
    async fn shutdown(&self) -> Json<ShutdownAck> {
        Json(self.handler.shutdown())
    }
}

#[tool_handler]
impl ServerHandler for DaemonService {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            protocol_version: ProtocolVersion::V_2025_03_26,
            capabilities: ServerCapabilities::builder().enable_tools().build(),
            server_info: Implementation {
                name: "snowflake-daemon".to_owned(),
                title: Some("Snowflake Daemon".to_owned()),
                version: env!("CARGO_PKG_VERSION").to_owned(),
                icons: None,
                website_url: None,
            },
            instructions: Some(
                "Snowflake query tools backed by long-lived, pooled sessions.\n\
                \n\
                ## Workflow\n\
                1. Call `session` to see the current database/schema/warehouse/role\n\
                2. Switch context with `query` and `USE WAREHOUSE x`, `USE SCHEMA db.s`, ...\n\
                3. Run SELECT/SHOW/DESCRIBE/EXPLAIN statements with `query`\n\
                \n\
                ## Notes\n\
                - One statement per call; multi-statement text is rejected\n\
                - Results are capped by `limit` (default 100)\n\
                - Set `transaction: true` to wrap a write in BEGIN/COMMIT"
                    .to_string(),
            ),
        }
    }
}
