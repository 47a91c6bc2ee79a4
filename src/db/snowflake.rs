//! Snowflake driver over the REST session protocol.
//!
//! Sessions are opened with `POST /session/v1/login-request`, statements run
//! through `POST /queries/v1/query-request` with the session token, and
//! `POST /session?delete=true` logs out. Only inline (JSON) result sets are
//! read; chunked result downloads are not fetched.

use crate::db::driver::{Driver, DriverSession};
use crate::error::{DbError, DbResult};
use crate::models::{ColumnMetadata, RowSet, SessionState};
use chrono::Utc;
use reqwest::StatusCode;
use reqwest::header::{ACCEPT, AUTHORIZATION};
use serde::Deserialize;
use serde::de::DeserializeOwned;
use serde_json::{Value as JsonValue, json};
use std::time::Duration;
use tracing::{debug, info, warn};
use url::Url;
use uuid::Uuid;

/// Client identifier sent at login.
const CLIENT_APP_ID: &str = "snowflake-daemon";

/// Delay between polls of a query that is still running.
const RESULT_POLL_INTERVAL: Duration = Duration::from_millis(500);

/// Login response codes meaning the credentials were refused.
const AUTHENTICATION_CODES: &[&str] = &["390100", "390101", "390144"];

/// Query response codes meaning the session token is no longer valid.
const SESSION_EXPIRED_CODES: &[&str] = &["390112", "390114"];

/// Query response codes meaning the statement is still executing.
const IN_PROGRESS_CODES: &[&str] = &["333333", "333334"];

/// Account credentials and the session defaults applied at login.
#[derive(Clone, Default, PartialEq, Eq)]
pub struct SnowflakeCredentials {
    /// Account identifier, e.g. "xy12345.us-east-1"
    pub account: String,
    pub user: String,
    pub password: String,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

impl std::fmt::Debug for SnowflakeCredentials {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeCredentials")
            .field("account", &self.account)
            .field("user", &self.user)
            .field("password", &"********")
            .field("database", &self.database)
            .field("schema", &self.schema)
            .field("warehouse", &self.warehouse)
            .field("role", &self.role)
            .finish()
    }
}

impl SnowflakeCredentials {
    /// Session context a fresh login starts with.
    pub fn session_defaults(&self) -> SessionState {
        let mut state = SessionState::new();
        if let Some(database) = &self.database {
            state.set_database(database.clone());
        }
        if let Some(schema) = &self.schema {
            state.set_schema(schema.clone());
        }
        if let Some(warehouse) = &self.warehouse {
            state.set_warehouse(warehouse.clone());
        }
        if let Some(role) = &self.role {
            state.set_role(role.clone());
        }
        state
    }

    /// Account name as expected in the login body (locator without region).
    fn account_name(&self) -> &str {
        self.account.split('.').next().unwrap_or(&self.account)
    }
}

/// Base URL for an account identifier.
///
/// A full URL is used as-is, which lets tests and proxies point the driver
/// elsewhere.
pub fn account_url(account: &str) -> DbResult<Url> {
    let account = account.trim();
    if account.is_empty() {
        return Err(DbError::configuration("Snowflake account must not be empty"));
    }
    let raw = if account.contains("://") {
        account.to_string()
    } else if account.ends_with(".snowflakecomputing.com") {
        format!("https://{}", account)
    } else {
        format!("https://{}.snowflakecomputing.com", account)
    };
    Url::parse(&raw)
        .map_err(|e| DbError::configuration(format!("Invalid Snowflake account '{}': {}", account, e)))
}

fn endpoint(base: &Url, path: &str, query: &[(&str, &str)]) -> DbResult<Url> {
    let mut url = base
        .join(path)
        .map_err(|e| DbError::internal(format!("Invalid endpoint {}: {}", path, e)))?;
    if !query.is_empty() {
        url.query_pairs_mut().extend_pairs(query);
    }
    Ok(url)
}

/// Production driver talking to Snowflake over HTTPS.
#[derive(Debug, Clone)]
pub struct SnowflakeDriver {
    client: reqwest::Client,
    base_url: Url,
    credentials: SnowflakeCredentials,
}

impl SnowflakeDriver {
    /// Create a driver for the credentials' account.
    pub fn new(credentials: SnowflakeCredentials, request_timeout: Duration) -> DbResult<Self> {
        let base_url = account_url(&credentials.account)?;
        Self::with_base_url(credentials, base_url, request_timeout)
    }

    /// Create a driver against an explicit base URL.
    pub fn with_base_url(
        credentials: SnowflakeCredentials,
        base_url: Url,
        request_timeout: Duration,
    ) -> DbResult<Self> {
        let client = reqwest::Client::builder()
            .timeout(request_timeout)
            .user_agent(format!("{}/{}", CLIENT_APP_ID, env!("CARGO_PKG_VERSION")))
            .build()?;
        Ok(Self {
            client,
            base_url,
            credentials,
        })
    }

    pub fn credentials(&self) -> &SnowflakeCredentials {
        &self.credentials
    }

    fn login_body(&self) -> JsonValue {
        json!({
            "data": {
                "CLIENT_APP_ID": CLIENT_APP_ID,
                "CLIENT_APP_VERSION": env!("CARGO_PKG_VERSION"),
                "ACCOUNT_NAME": self.credentials.account_name(),
                "LOGIN_NAME": self.credentials.user,
                "PASSWORD": self.credentials.password,
                "SESSION_PARAMETERS": {
                    "QUERY_RESULT_FORMAT": "JSON"
                }
            }
        })
    }
}

impl Driver for SnowflakeDriver {
    type Session = SnowflakeSession;

    async fn connect(&self) -> DbResult<SnowflakeSession> {
        let request_id = Uuid::new_v4().to_string();
        let mut query: Vec<(&str, &str)> = vec![("requestId", request_id.as_str())];
        let creds = &self.credentials;
        for (key, value) in [
            ("databaseName", &creds.database),
            ("schemaName", &creds.schema),
            ("warehouse", &creds.warehouse),
            ("roleName", &creds.role),
        ] {
            if let Some(value) = value {
                query.push((key, value.as_str()));
            }
        }
        let url = endpoint(&self.base_url, "/session/v1/login-request", &query)?;

        debug!(account = %creds.account, user = %creds.user, "Logging in to Snowflake");
        let response = self
            .client
            .post(url)
            .header(ACCEPT, "application/json")
            .json(&self.login_body())
            .send()
            .await?;
        let envelope: Envelope<LoginData> = read_envelope(response, Phase::Login).await?;

        if !envelope.success {
            let code = envelope.code();
            let message = envelope.message_or("login rejected");
            return Err(match code.as_deref() {
                Some(c) if AUTHENTICATION_CODES.contains(&c) => DbError::authentication(message),
                _ => DbError::configuration(format!(
                    "Snowflake login failed ({}): {}",
                    code.as_deref().unwrap_or("no code"),
                    message
                )),
            });
        }

        let data = envelope
            .data
            .ok_or_else(|| DbError::internal("Snowflake login response carried no session data"))?;
        info!(account = %creds.account, user = %creds.user, "Snowflake session established");
        Ok(SnowflakeSession {
            client: self.client.clone(),
            base_url: self.base_url.clone(),
            token: data.token,
            sequence_id: 0,
        })
    }

    fn name(&self) -> &'static str {
        "snowflake"
    }
}

/// One logged-in Snowflake session.
pub struct SnowflakeSession {
    client: reqwest::Client,
    base_url: Url,
    token: String,
    sequence_id: u64,
}

impl std::fmt::Debug for SnowflakeSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SnowflakeSession")
            .field("base_url", &self.base_url.as_str())
            .field("sequence_id", &self.sequence_id)
            .finish_non_exhaustive()
    }
}

impl SnowflakeSession {
    fn auth_header(&self) -> String {
        format!("Snowflake Token=\"{}\"", self.token)
    }

    async fn poll_result(&self, result_url: &str) -> DbResult<Envelope<QueryData>> {
        let url = self
            .base_url
            .join(result_url)
            .map_err(|e| DbError::internal(format!("Invalid result URL {}: {}", result_url, e)))?;
        let response = self
            .client
            .get(url)
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/snowflake")
            .send()
            .await?;
        read_envelope(response, Phase::Query).await
    }
}

impl DriverSession for SnowflakeSession {
    async fn execute(&mut self, sql: &str) -> DbResult<RowSet> {
        self.sequence_id += 1;
        let request_id = Uuid::new_v4().to_string();
        let url = endpoint(
            &self.base_url,
            "/queries/v1/query-request",
            &[("requestId", request_id.as_str())],
        )?;
        let body = json!({
            "sqlText": sql,
            "asyncExec": false,
            "sequenceId": self.sequence_id,
            "querySubmissionTime": Utc::now().timestamp_millis(),
        });

        let response = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/snowflake")
            .json(&body)
            .send()
            .await?;
        let mut envelope: Envelope<QueryData> = read_envelope(response, Phase::Query).await?;

        while let Some(result_url) = envelope.in_progress_url() {
            tokio::time::sleep(RESULT_POLL_INTERVAL).await;
            envelope = self.poll_result(&result_url).await?;
        }

        into_rowset(envelope)
    }

    async fn close(&mut self) {
        let url = match endpoint(&self.base_url, "/session", &[("delete", "true")]) {
            Ok(url) => url,
            Err(err) => {
                warn!(error = %err, "Skipping Snowflake logout");
                return;
            }
        };
        let result = self
            .client
            .post(url)
            .header(AUTHORIZATION, self.auth_header())
            .header(ACCEPT, "application/json")
            .send()
            .await;
        match result {
            Ok(response) if response.status().is_success() => debug!("Snowflake session closed"),
            Ok(response) => debug!(status = %response.status(), "Snowflake logout not acknowledged"),
            Err(err) => debug!(error = %err, "Snowflake logout failed"),
        }
    }
}

#[derive(Debug, Clone, Copy)]
enum Phase {
    Login,
    Query,
}

#[derive(Debug, Deserialize)]
struct Envelope<T> {
    #[serde(default)]
    success: bool,
    #[serde(default)]
    message: Option<String>,
    #[serde(default)]
    code: Option<JsonValue>,
    data: Option<T>,
}

impl<T> Envelope<T> {
    /// Response code as a string; Snowflake sends it either quoted or bare.
    fn code(&self) -> Option<String> {
        match &self.code {
            Some(JsonValue::String(s)) => Some(s.clone()),
            Some(JsonValue::Number(n)) => Some(n.to_string()),
            _ => None,
        }
    }

    fn message_or(&self, fallback: &str) -> String {
        self.message
            .clone()
            .filter(|m| !m.is_empty())
            .unwrap_or_else(|| fallback.to_string())
    }
}

impl Envelope<QueryData> {
    fn in_progress_url(&self) -> Option<String> {
        let code = self.code()?;
        if !IN_PROGRESS_CODES.contains(&code.as_str()) {
            return None;
        }
        self.data.as_ref()?.get_result_url.clone()
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct LoginData {
    token: String,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct QueryData {
    #[serde(default)]
    rowtype: Vec<RowType>,
    #[serde(default)]
    rowset: Vec<Vec<JsonValue>>,
    #[serde(default)]
    sql_state: Option<String>,
    #[serde(default)]
    query_id: Option<String>,
    #[serde(default)]
    get_result_url: Option<String>,
    #[serde(default)]
    chunks: Vec<JsonValue>,
    /// Row count of the whole result, inline and chunked.
    #[serde(default)]
    total: Option<u64>,
}

#[derive(Debug, Clone, Deserialize)]
struct RowType {
    name: String,
    #[serde(rename = "type")]
    type_name: String,
    #[serde(default)]
    nullable: bool,
    #[serde(default)]
    scale: Option<i64>,
}

async fn read_envelope<T: DeserializeOwned>(
    response: reqwest::Response,
    phase: Phase,
) -> DbResult<Envelope<T>> {
    let status = response.status();
    if !status.is_success() {
        let text = response.text().await.unwrap_or_default();
        let detail: String = text.chars().take(200).collect();
        return Err(match (status, phase) {
            (s, _) if s.is_server_error() => {
                DbError::network(format!("Snowflake returned HTTP {}: {}", s, detail))
            }
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, Phase::Login) => {
                DbError::authentication(format!("HTTP {}: {}", status, detail))
            }
            (StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN, Phase::Query) => {
                DbError::session_expired(format!("HTTP {}", status))
            }
            (s, _) => DbError::internal(format!("Unexpected HTTP {} from Snowflake: {}", s, detail)),
        });
    }
    Ok(response.json::<Envelope<T>>().await?)
}

fn into_rowset(envelope: Envelope<QueryData>) -> DbResult<RowSet> {
    if !envelope.success {
        let code = envelope.code();
        let message = envelope.message_or("query failed");
        if code
            .as_deref()
            .is_some_and(|c| SESSION_EXPIRED_CODES.contains(&c))
        {
            return Err(DbError::session_expired(message));
        }
        let sql_state = envelope.data.and_then(|d| d.sql_state);
        return Err(DbError::engine(message, code, sql_state));
    }

    let data = envelope.data.unwrap_or_default();
    let truncated = !data.chunks.is_empty();
    if truncated {
        warn!(
            query_id = ?data.query_id,
            chunks = data.chunks.len(),
            total = ?data.total,
            "Result has remote chunks; only the inline rows are returned"
        );
    }

    let columns = data
        .rowtype
        .iter()
        .map(|c| ColumnMetadata::new(c.name.clone(), c.type_name.to_ascii_lowercase(), c.nullable))
        .collect();
    let rows = data
        .rowset
        .into_iter()
        .map(|row| {
            row.into_iter()
                .enumerate()
                .map(|(i, cell)| match data.rowtype.get(i) {
                    Some(column) => convert_cell(cell, column),
                    None => cell,
                })
                .collect()
        })
        .collect();
    let rowset = RowSet::new(columns, rows);
    Ok(if truncated {
        rowset.truncated(data.total)
    } else {
        rowset
    })
}

/// Convert a Snowflake JSON rowset cell (string or null) by column type.
fn convert_cell(cell: JsonValue, column: &RowType) -> JsonValue {
    let JsonValue::String(text) = cell else {
        return cell;
    };
    match column.type_name.to_ascii_lowercase().as_str() {
        "fixed" if column.scale.unwrap_or(0) == 0 => text
            .parse::<i64>()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::String(text)),
        "real" => text
            .parse::<f64>()
            .ok()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::String(text)),
        "boolean" => match text.as_str() {
            "1" | "true" | "TRUE" => JsonValue::Bool(true),
            "0" | "false" | "FALSE" => JsonValue::Bool(false),
            _ => JsonValue::String(text),
        },
        "variant" | "object" | "array" => {
            serde_json::from_str(&text).unwrap_or(JsonValue::String(text))
        }
        _ => JsonValue::String(text),
    }
}
