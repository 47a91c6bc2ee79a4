//! Session context tracked per pooled connection.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Context dimension changed by a `USE` statement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "lowercase")]
pub enum ContextDimension {
    Database,
    Schema,
    Warehouse,
    Role,
}

impl ContextDimension {
    /// Keyword used in `USE <keyword> <name>`.
    pub fn keyword(&self) -> &'static str {
        match self {
            Self::Database => "DATABASE",
            Self::Schema => "SCHEMA",
            Self::Warehouse => "WAREHOUSE",
            Self::Role => "ROLE",
        }
    }

    /// Parse a `USE` target keyword, case-insensitively.
    pub fn from_keyword(word: &str) -> Option<Self> {
        match word.to_ascii_uppercase().as_str() {
            "DATABASE" => Some(Self::Database),
            "SCHEMA" => Some(Self::Schema),
            "WAREHOUSE" => Some(Self::Warehouse),
            "ROLE" => Some(Self::Role),
            _ => None,
        }
    }
}

impl std::fmt::Display for ContextDimension {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.keyword().to_ascii_lowercase())
    }
}

/// A context change requested by a statement, applied only after it succeeds.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ContextChange {
    pub dimension: ContextDimension,
    pub name: String,
}

/// Ambient context of one remote session.
///
/// Values are stored as written by the caller; the remote engine is the
/// only judge of whether they are valid.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SessionState {
    database: Option<String>,
    schema: Option<String>,
    warehouse: Option<String>,
    role: Option<String>,
}

impl SessionState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn database(&self) -> Option<&str> {
        self.database.as_deref()
    }

    pub fn schema(&self) -> Option<&str> {
        self.schema.as_deref()
    }

    pub fn warehouse(&self) -> Option<&str> {
        self.warehouse.as_deref()
    }

    pub fn role(&self) -> Option<&str> {
        self.role.as_deref()
    }

    pub fn set_database(&mut self, database: impl Into<String>) {
        self.database = Some(database.into());
    }

    pub fn set_schema(&mut self, schema: impl Into<String>) {
        self.schema = Some(schema.into());
    }

    pub fn set_warehouse(&mut self, warehouse: impl Into<String>) {
        self.warehouse = Some(warehouse.into());
    }

    pub fn set_role(&mut self, role: impl Into<String>) {
        self.role = Some(role.into());
    }

    /// Set a single dimension.
    pub fn set(&mut self, dimension: ContextDimension, value: impl Into<String>) {
        match dimension {
            ContextDimension::Database => self.set_database(value),
            ContextDimension::Schema => self.set_schema(value),
            ContextDimension::Warehouse => self.set_warehouse(value),
            ContextDimension::Role => self.set_role(value),
        }
    }

    /// Apply a context change from a successful `USE` statement.
    pub fn apply(&mut self, change: &ContextChange) {
        self.set(change.dimension, change.name.clone());
    }

    /// Statements that re-establish this context on a fresh session.
    ///
    /// Role comes first since it decides which warehouses and databases are visible.
    pub fn restore_statements(&self) -> Vec<String> {
        [
            (ContextDimension::Role, &self.role),
            (ContextDimension::Warehouse, &self.warehouse),
            (ContextDimension::Database, &self.database),
            (ContextDimension::Schema, &self.schema),
        ]
        .into_iter()
        .filter_map(|(dimension, value)| {
            value
                .as_ref()
                .map(|v| format!("USE {} {}", dimension.keyword(), v))
        })
        .collect()
    }

    /// Immutable copy for observability.
    pub fn snapshot(&self) -> SessionSnapshot {
        SessionSnapshot {
            connection_id: None,
            database: self.database.clone(),
            schema: self.schema.clone(),
            warehouse: self.warehouse.clone(),
            role: self.role.clone(),
        }
    }
}

/// Point-in-time copy of a [`SessionState`].
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionSnapshot {
    /// Pool-assigned id of the connection this context belongs to
    #[serde(skip_serializing_if = "Option::is_none")]
    pub connection_id: Option<u64>,
    pub database: Option<String>,
    pub schema: Option<String>,
    pub warehouse: Option<String>,
    pub role: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_apply_changes_only_target_dimension() {
        let mut state = SessionState::new();
        state.set_warehouse("COMPUTE_WH");
        state.apply(&ContextChange {
            dimension: ContextDimension::Database,
            name: "FOO".to_string(),
        });

        assert_eq!(state.database(), Some("FOO"));
        assert_eq!(state.warehouse(), Some("COMPUTE_WH"));
        assert_eq!(state.schema(), None);
        assert_eq!(state.role(), None);
    }

    #[test]
    fn test_snapshot_is_detached_copy() {
        let mut state = SessionState::new();
        state.set_schema("PUBLIC");
        let snapshot = state.snapshot();
        state.set_schema("RAW");

        assert_eq!(snapshot.schema.as_deref(), Some("PUBLIC"));
        assert_eq!(state.schema(), Some("RAW"));
    }

    #[test]
    fn test_restore_statements_order() {
        let mut state = SessionState::new();
        state.set_schema("PUBLIC");
        state.set_role("ANALYST");
        state.set_database("SALES");

        assert_eq!(
            state.restore_statements(),
            vec![
                "USE ROLE ANALYST".to_string(),
                "USE DATABASE SALES".to_string(),
                "USE SCHEMA PUBLIC".to_string(),
            ]
        );
        assert!(SessionState::new().restore_statements().is_empty());
    }

    #[test]
    fn test_dimension_from_keyword() {
        assert_eq!(
            ContextDimension::from_keyword("warehouse"),
            Some(ContextDimension::Warehouse)
        );
        assert_eq!(ContextDimension::from_keyword("TABLE"), None);
    }
}
