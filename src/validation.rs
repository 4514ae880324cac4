//! Schema validation
//!
//! Turns a classified key plus raw artifact bytes into a validated
//! `Mutation`, or the first governance rule it violates (fail-fast, no
//! accumulated diagnostics). Row-level type coercion is deferred to the
//! warehouse mutator.

use crate::artifact::{DataFile, SchemaArtifact};
use crate::classifier::{valid_identifier, Action, StorageKey};
use crate::error::IngestError;
use crate::governance::{ColumnSpec, ColumnType, TableDefinition, TableRef};
use std::collections::HashSet;

/// A validated warehouse mutation, ready for the mutator. The three-way
/// action dispatch lives in this closed variant so adding an action is a
/// compile-checked change in every match downstream.
#[derive(Debug, Clone)]
pub enum Mutation {
    Append {
        table: TableRef,
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<String>>,
    },
    Truncate {
        table: TableRef,
        columns: Vec<ColumnSpec>,
        rows: Vec<Vec<String>>,
    },
    DefineSchema {
        table: TableRef,
        definition: TableDefinition,
    },
}

impl Mutation {
    pub fn table(&self) -> &TableRef {
        match self {
            Mutation::Append { table, .. }
            | Mutation::Truncate { table, .. }
            | Mutation::DefineSchema { table, .. } => table,
        }
    }

    pub fn action(&self) -> Action {
        match self {
            Mutation::Append { .. } => Action::Append,
            Mutation::Truncate { .. } => Action::Truncate,
            Mutation::DefineSchema { .. } => Action::DefineSchema,
        }
    }
}

/// Validate an artifact against governance rules for the requested action.
///
/// `definition` is the current governance record for the key's table, or
/// None when the table is undeclared. For DEFINE_SCHEMA the artifact itself
/// carries the candidate definition and no prior record is required;
/// governance is authoritative, so redefinition is never gated on the
/// table's `allowed_actions`.
pub fn validate(
    key: &StorageKey,
    definition: Option<&TableDefinition>,
    bytes: &[u8],
    delimiter: char,
) -> Result<Mutation, IngestError> {
    let table = TableRef::new(key.namespace.clone(), key.table.clone());

    match key.action {
        Action::Append | Action::Truncate => {
            let def = definition.ok_or_else(|| IngestError::UnknownTable {
                namespace: key.namespace.clone(),
                table: key.table.clone(),
            })?;

            if !def.permits(key.action) {
                return Err(IngestError::ActionNotPermitted {
                    namespace: key.namespace.clone(),
                    table: key.table.clone(),
                    action: key.action.to_string(),
                });
            }

            let file = DataFile::parse(bytes, delimiter)?;
            let expected = def.column_names();
            if file.header != expected {
                return Err(IngestError::SchemaMismatch(format!(
                    "artifact header [{}] does not match declared columns [{}]",
                    file.header.join(", "),
                    expected.join(", ")
                )));
            }

            let columns = def.columns.clone();
            match key.action {
                Action::Append => Ok(Mutation::Append {
                    table,
                    columns,
                    rows: file.rows,
                }),
                Action::Truncate => Ok(Mutation::Truncate {
                    table,
                    columns,
                    rows: file.rows,
                }),
                Action::DefineSchema => unreachable!("outer match covers define_schema"),
            }
        }
        Action::DefineSchema => {
            let artifact = SchemaArtifact::parse(bytes)?;
            let definition = candidate_definition(&artifact)?;
            Ok(Mutation::DefineSchema { table, definition })
        }
    }
}

/// Build the candidate TableDefinition a DEFINE_SCHEMA run proposes,
/// checking the definition invariants.
fn candidate_definition(artifact: &SchemaArtifact) -> Result<TableDefinition, IngestError> {
    if artifact.allowed_operations.is_empty() {
        return Err(IngestError::InvalidDefinition(
            "allowed_operations must not be empty".to_string(),
        ));
    }

    let mut allowed_actions = HashSet::new();
    for op in &artifact.allowed_operations {
        let action: Action = op.parse().map_err(|_| {
            IngestError::InvalidDefinition(format!(
                "unknown operation '{}' in allowed_operations",
                op
            ))
        })?;
        allowed_actions.insert(action);
    }

    if artifact.columns.is_empty() {
        return Err(IngestError::InvalidDefinition(
            "column list must not be empty".to_string(),
        ));
    }

    let mut seen = HashSet::new();
    let mut columns = Vec::with_capacity(artifact.columns.len());
    for col in &artifact.columns {
        if !valid_identifier(&col.name) {
            return Err(IngestError::InvalidDefinition(format!(
                "invalid column name '{}'",
                col.name
            )));
        }
        if !seen.insert(col.name.as_str()) {
            return Err(IngestError::InvalidDefinition(format!(
                "duplicate column name '{}'",
                col.name
            )));
        }
        let data_type: ColumnType = col.data_type.parse().map_err(|_| {
            IngestError::InvalidDefinition(format!(
                "unknown column type '{}' for column '{}'",
                col.data_type, col.name
            ))
        })?;
        columns.push(ColumnSpec {
            name: col.name.clone(),
            data_type,
        });
    }

    Ok(TableDefinition {
        columns,
        allowed_actions,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::governance::ColumnType;
    use pretty_assertions::assert_eq;

    fn key(raw: &str) -> StorageKey {
        StorageKey::parse(raw).unwrap()
    }

    fn orders_definition() -> TableDefinition {
        TableDefinition {
            columns: vec![
                ColumnSpec {
                    name: "id".to_string(),
                    data_type: ColumnType::BigInt,
                },
                ColumnSpec {
                    name: "amount".to_string(),
                    data_type: ColumnType::Numeric,
                },
                ColumnSpec {
                    name: "date".to_string(),
                    data_type: ColumnType::Date,
                },
            ],
            allowed_actions: [Action::Append, Action::Truncate].into_iter().collect(),
        }
    }

    #[test]
    fn append_with_matching_header_is_valid() {
        let def = orders_definition();
        let mutation = validate(
            &key("sales/append/orders/jan.csv"),
            Some(&def),
            b"id,amount,date\n1,9.99,2024-01-01\n",
            ',',
        )
        .unwrap();

        match mutation {
            Mutation::Append { table, columns, rows } => {
                assert_eq!(table, TableRef::new("sales", "orders"));
                assert_eq!(columns, def.columns);
                assert_eq!(rows.len(), 1);
            }
            other => panic!("expected Append, got {:?}", other),
        }
    }

    #[test]
    fn append_on_undeclared_table_is_unknown_table() {
        let err = validate(
            &key("sales/append/orders/jan.csv"),
            None,
            b"id,amount,date\n",
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "UnknownTable");
        assert!(err.is_rejection());
    }

    #[test]
    fn disallowed_action_is_rejected() {
        let mut def = orders_definition();
        def.allowed_actions = [Action::Append].into_iter().collect();
        let err = validate(
            &key("sales/truncate/orders/reset.csv"),
            Some(&def),
            b"id,amount,date\n",
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "ActionNotPermitted");
        assert!(err.to_string().contains("truncate"));
    }

    #[test]
    fn missing_column_is_schema_mismatch() {
        let def = orders_definition();
        let err = validate(
            &key("sales/truncate/orders/reset.csv"),
            Some(&def),
            b"id,amount\n1,2\n",
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
        assert!(err.to_string().contains("date"));
    }

    #[test]
    fn reordered_columns_are_schema_mismatch() {
        let def = orders_definition();
        let err = validate(
            &key("sales/append/orders/jan.csv"),
            Some(&def),
            b"amount,id,date\n",
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn extra_column_is_schema_mismatch() {
        let def = orders_definition();
        let err = validate(
            &key("sales/append/orders/jan.csv"),
            Some(&def),
            b"id,amount,date,region\n",
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "SchemaMismatch");
    }

    #[test]
    fn define_schema_produces_candidate_definition() {
        let mutation = validate(
            &key("sales/define_schema/orders/schema.json"),
            None,
            br#"{"columns":[{"name":"id","type":"bigint"},{"name":"amount","type":"numeric"}],
                "allowed_operations":["append","truncate"]}"#,
            ',',
        )
        .unwrap();

        match mutation {
            Mutation::DefineSchema { table, definition } => {
                assert_eq!(table, TableRef::new("sales", "orders"));
                assert_eq!(definition.columns.len(), 2);
                assert!(definition.permits(Action::Append));
                assert!(definition.permits(Action::Truncate));
                assert!(!definition.permits(Action::DefineSchema));
            }
            other => panic!("expected DefineSchema, got {:?}", other),
        }
    }

    #[test]
    fn empty_allowed_operations_is_invalid_definition() {
        let err = validate(
            &key("sales/define_schema/orders/new_schema.json"),
            Some(&orders_definition()),
            br#"{"columns":[{"name":"id","type":"bigint"}],"allowed_operations":[]}"#,
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
    }

    #[test]
    fn unknown_operation_is_invalid_definition() {
        let err = validate(
            &key("sales/define_schema/orders/s.json"),
            None,
            br#"{"columns":[{"name":"id","type":"bigint"}],"allowed_operations":["merge"]}"#,
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
        assert!(err.to_string().contains("merge"));
    }

    #[test]
    fn empty_columns_is_invalid_definition() {
        let err = validate(
            &key("sales/define_schema/orders/s.json"),
            None,
            br#"{"columns":[],"allowed_operations":["append"]}"#,
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
    }

    #[test]
    fn duplicate_column_is_invalid_definition() {
        let err = validate(
            &key("sales/define_schema/orders/s.json"),
            None,
            br#"{"columns":[{"name":"id","type":"bigint"},{"name":"id","type":"text"}],
                "allowed_operations":["append"]}"#,
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
        assert!(err.to_string().contains("duplicate"));
    }

    #[test]
    fn unknown_column_type_is_invalid_definition() {
        let err = validate(
            &key("sales/define_schema/orders/s.json"),
            None,
            br#"{"columns":[{"name":"loc","type":"geography"}],"allowed_operations":["append"]}"#,
            ',',
        )
        .unwrap_err();
        assert_eq!(err.kind(), "InvalidDefinition");
        assert!(err.to_string().contains("geography"));
    }

    #[test]
    fn redefinition_is_not_gated_on_allowed_actions() {
        // Governance is authoritative: an existing definition without
        // define_schema in its allowed_actions can still be replaced.
        let mutation = validate(
            &key("sales/define_schema/orders/s.json"),
            Some(&orders_definition()),
            br#"{"columns":[{"name":"id","type":"integer"}],"allowed_operations":["append"]}"#,
            ',',
        )
        .unwrap();
        assert_eq!(mutation.action(), Action::DefineSchema);
    }
}
