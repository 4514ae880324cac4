//! Storage key classification
//!
//! Parses a landed object's storage key into `{namespace}/{action}/{table}/
//! {artifact}` and validates its shape. The key convention is the sole
//! contract between the upload side and this engine. Pure, no side effects.

use crate::error::IngestError;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;

/// PostgreSQL identifiers: start with a letter or underscore, then letters,
/// digits, underscores, dollar signs. Namespace, table, and column names all
/// go through this before they are quoted into SQL.
static IDENTIFIER_RE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[a-zA-Z_][a-zA-Z0-9_$]*$").unwrap());

/// Maximum identifier length accepted (PostgreSQL truncates at 63 bytes).
pub const MAX_IDENTIFIER_LEN: usize = 63;

/// Whether a string is usable as a warehouse identifier.
pub fn valid_identifier(name: &str) -> bool {
    name.len() <= MAX_IDENTIFIER_LEN && IDENTIFIER_RE.is_match(name)
}

/// The three warehouse mutations a storage key can request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Action {
    Append,
    Truncate,
    DefineSchema,
}

impl Action {
    pub fn as_str(&self) -> &'static str {
        match self {
            Action::Append => "append",
            Action::Truncate => "truncate",
            Action::DefineSchema => "define_schema",
        }
    }
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Action {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "append" => Ok(Action::Append),
            "truncate" => Ok(Action::Truncate),
            "define_schema" => Ok(Action::DefineSchema),
            _ => Err(()),
        }
    }
}

/// Classified storage key
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageKey {
    pub namespace: String,
    pub action: Action,
    pub table: String,
    pub artifact_name: String,
}

impl StorageKey {
    /// Parse a raw storage key of the form `namespace/action/table/artifact`.
    pub fn parse(raw: &str) -> Result<Self, IngestError> {
        let segments: Vec<&str> = raw.split('/').collect();
        if segments.len() != 4 {
            return Err(IngestError::MalformedKey(format!(
                "expected 4 path segments (namespace/action/table/artifact), got {} in '{}'",
                segments.len(),
                raw
            )));
        }
        if segments.iter().any(|s| s.is_empty()) {
            return Err(IngestError::MalformedKey(format!(
                "empty path segment in '{}'",
                raw
            )));
        }

        let action = Action::from_str(segments[1]).map_err(|_| {
            IngestError::MalformedKey(format!(
                "unrecognized action token '{}' (expected append, truncate, or define_schema)",
                segments[1]
            ))
        })?;

        let namespace = segments[0].to_string();
        let table = segments[2].to_string();
        if !valid_identifier(&namespace) {
            return Err(IngestError::MalformedKey(format!(
                "invalid namespace identifier '{}'",
                namespace
            )));
        }
        if !valid_identifier(&table) {
            return Err(IngestError::MalformedKey(format!(
                "invalid table identifier '{}'",
                table
            )));
        }

        Ok(Self {
            namespace,
            action,
            table,
            artifact_name: segments[3].to_string(),
        })
    }

    /// Best-effort table name extraction for logging rejected keys. Never
    /// fails; returns None when the segment is missing or empty.
    pub fn table_hint(raw: &str) -> Option<String> {
        let segments: Vec<&str> = raw.split('/').collect();
        segments
            .get(2)
            .filter(|s| !s.is_empty())
            .map(|s| s.to_string())
    }

}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn parses_valid_key() {
        let key = StorageKey::parse("sales/append/orders/jan.csv").unwrap();
        assert_eq!(key.namespace, "sales");
        assert_eq!(key.action, Action::Append);
        assert_eq!(key.table, "orders");
        assert_eq!(key.artifact_name, "jan.csv");
    }

    #[test]
    fn action_token_is_case_insensitive() {
        let key = StorageKey::parse("sales/TRUNCATE/orders/reset.csv").unwrap();
        assert_eq!(key.action, Action::Truncate);
        let key = StorageKey::parse("sales/Define_Schema/orders/s.json").unwrap();
        assert_eq!(key.action, Action::DefineSchema);
    }

    #[test]
    fn parses_keys_across_namespaces() {
        for raw in [
            "sales/append/orders/jan.csv",
            "hr/truncate/employees/full.csv",
            "sales/define_schema/orders/schema.json",
        ] {
            assert!(StorageKey::parse(raw).is_ok());
        }
    }

    #[test]
    fn rejects_wrong_segment_count() {
        for raw in [
            "sales/append/orders",
            "sales/append/orders/sub/jan.csv",
            "jan.csv",
            "",
        ] {
            let err = StorageKey::parse(raw).unwrap_err();
            assert_eq!(err.kind(), "MalformedKey");
        }
    }

    #[test]
    fn rejects_unknown_action_before_table_lookup() {
        let err = StorageKey::parse("sales/delete/orders/x.csv").unwrap_err();
        assert_eq!(err.kind(), "MalformedKey");
        assert!(err.to_string().contains("delete"));
    }

    #[test]
    fn rejects_empty_segments() {
        let err = StorageKey::parse("sales//orders/x.csv").unwrap_err();
        assert_eq!(err.kind(), "MalformedKey");
    }

    #[test]
    fn rejects_unquotable_identifiers() {
        assert!(StorageKey::parse("sa les/append/orders/x.csv").is_err());
        assert!(StorageKey::parse("sales/append/orders;drop/x.csv").is_err());
        assert!(StorageKey::parse("sales/append/1orders/x.csv").is_err());
    }

    #[test]
    fn table_hint_survives_malformed_action() {
        assert_eq!(
            StorageKey::table_hint("sales/delete/orders/x.csv"),
            Some("orders".to_string())
        );
        assert_eq!(StorageKey::table_hint("jan.csv"), None);
    }

    #[test]
    fn identifier_rule() {
        assert!(valid_identifier("orders"));
        assert!(valid_identifier("_staging$1"));
        assert!(!valid_identifier("0rders"));
        assert!(!valid_identifier("or-ders"));
        assert!(!valid_identifier(&"x".repeat(64)));
    }
}
