//! Governance store
//!
//! Holds the declared schema and permitted actions for each warehouse table.
//! One `TableDefinition` per (namespace, table); a DEFINE_SCHEMA run replaces
//! the whole definition, never merges. In-memory storage behind a `RwLock`
//! (can be extended to persistent storage); injected into the orchestrator
//! so tests can supply isolated instances.

use crate::classifier::Action;
use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::collections::{HashMap, HashSet};
use std::fmt;
use std::str::FromStr;
use tokio::sync::RwLock;
use tracing::info;

/// Closed set of column types the engine will declare and coerce to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ColumnType {
    SmallInt,
    Integer,
    BigInt,
    Real,
    Double,
    Numeric,
    Boolean,
    Text,
    Date,
    Timestamp,
}

impl ColumnType {
    /// SQL type name used in DDL and insert casts
    pub fn as_sql(&self) -> &'static str {
        match self {
            ColumnType::SmallInt => "smallint",
            ColumnType::Integer => "integer",
            ColumnType::BigInt => "bigint",
            ColumnType::Real => "real",
            ColumnType::Double => "double precision",
            ColumnType::Numeric => "numeric",
            ColumnType::Boolean => "boolean",
            ColumnType::Text => "text",
            ColumnType::Date => "date",
            ColumnType::Timestamp => "timestamp",
        }
    }

    /// Whether a raw text cell can be coerced to this type. Empty cells load
    /// as NULL and always pass.
    pub fn accepts(&self, cell: &str) -> bool {
        if cell.is_empty() {
            return true;
        }
        match self {
            ColumnType::SmallInt => cell.parse::<i16>().is_ok(),
            ColumnType::Integer => cell.parse::<i32>().is_ok(),
            ColumnType::BigInt => cell.parse::<i64>().is_ok(),
            ColumnType::Real => cell.parse::<f32>().is_ok(),
            ColumnType::Double | ColumnType::Numeric => cell.parse::<f64>().is_ok(),
            ColumnType::Boolean => matches!(
                cell.to_ascii_lowercase().as_str(),
                "true" | "false" | "t" | "f" | "1" | "0" | "yes" | "no"
            ),
            ColumnType::Text => true,
            ColumnType::Date => NaiveDate::parse_from_str(cell, "%Y-%m-%d").is_ok(),
            ColumnType::Timestamp => {
                NaiveDateTime::parse_from_str(cell, "%Y-%m-%d %H:%M:%S").is_ok()
                    || NaiveDateTime::parse_from_str(cell, "%Y-%m-%dT%H:%M:%S").is_ok()
            }
        }
    }
}

impl fmt::Display for ColumnType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_sql())
    }
}

impl FromStr for ColumnType {
    type Err = ();

    /// Case-insensitive parse over common SQL aliases
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "smallint" | "int2" => Ok(ColumnType::SmallInt),
            "integer" | "int" | "int4" => Ok(ColumnType::Integer),
            "bigint" | "int8" => Ok(ColumnType::BigInt),
            "real" | "float4" => Ok(ColumnType::Real),
            "double precision" | "double" | "float8" | "float" => Ok(ColumnType::Double),
            "numeric" | "decimal" => Ok(ColumnType::Numeric),
            "boolean" | "bool" => Ok(ColumnType::Boolean),
            "text" | "varchar" | "character varying" | "string" => Ok(ColumnType::Text),
            "date" => Ok(ColumnType::Date),
            "timestamp" | "timestamp without time zone" | "datetime" => Ok(ColumnType::Timestamp),
            _ => Err(()),
        }
    }
}

/// One declared column: name plus warehouse type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnSpec {
    pub name: String,
    #[serde(rename = "type")]
    pub data_type: ColumnType,
}

/// Identity of a governed table
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TableRef {
    pub namespace: String,
    pub table: String,
}

impl TableRef {
    pub fn new(namespace: impl Into<String>, table: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            table: table.into(),
        }
    }
}

impl fmt::Display for TableRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}.{}", self.namespace, self.table)
    }
}

/// Governance record for one table: ordered columns and permitted actions
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TableDefinition {
    pub columns: Vec<ColumnSpec>,
    pub allowed_actions: HashSet<Action>,
}

impl TableDefinition {
    pub fn column_names(&self) -> Vec<&str> {
        self.columns.iter().map(|c| c.name.as_str()).collect()
    }

    pub fn permits(&self, action: Action) -> bool {
        self.allowed_actions.contains(&action)
    }
}

/// In-memory registry of table definitions
pub struct GovernanceStore {
    definitions: RwLock<HashMap<TableRef, TableDefinition>>,
}

impl GovernanceStore {
    pub fn new() -> Self {
        Self {
            definitions: RwLock::new(HashMap::new()),
        }
    }

    /// Look up the definition for a table, if one has been declared.
    pub async fn get(&self, table: &TableRef) -> Option<TableDefinition> {
        self.definitions.read().await.get(table).cloned()
    }

    /// Full-replace commit of a definition. Schema evolution is whole-
    /// definition replacement; there are no partial updates.
    pub async fn put(&self, table: TableRef, definition: TableDefinition) {
        info!(
            table = %table,
            columns = definition.columns.len(),
            actions = ?definition.allowed_actions,
            "governance definition committed"
        );
        self.definitions.write().await.insert(table, definition);
    }
}

impl Default for GovernanceStore {
    fn default() -> Self {
        Self::new()
    }
}
