//! Warehouse mutation
//!
//! Applies a validated `Mutation` to the relational warehouse. Data-changing
//! actions (append, truncate-load) run inside a single transaction: the
//! transaction handle rolls back on drop, so any error exit leaves the table
//! exactly as it was. DEFINE_SCHEMA creates the table or alters it to match
//! the new column list; it touches no data.

use crate::error::IngestError;
use crate::governance::{ColumnSpec, ColumnType, TableDefinition, TableRef};
use crate::validation::Mutation;
use async_trait::async_trait;
use deadpool_postgres::Pool;
use tokio_postgres::types::ToSql;
use tracing::{debug, info};

/// Result of a successful mutation
#[derive(Debug, Clone)]
pub struct MutationOutcome {
    /// Rows written for data actions; None for schema changes
    pub rows_affected: Option<i64>,
    pub detail: String,
}

/// Seam between the orchestrator and the physical warehouse
#[async_trait]
pub trait Warehouse: Send + Sync {
    async fn apply(&self, mutation: &Mutation) -> Result<MutationOutcome, IngestError>;
}

/// PostgreSQL-backed warehouse. The storage key's namespace maps to a
/// schema; tables live at `"namespace"."table"`.
pub struct PgWarehouse {
    pool: Pool,
    insert_chunk_size: usize,
}

impl PgWarehouse {
    pub fn new(pool: Pool, insert_chunk_size: usize) -> Self {
        Self {
            pool,
            insert_chunk_size,
        }
    }

    async fn load(
        &self,
        table: &TableRef,
        columns: &[ColumnSpec],
        rows: &[Vec<String>],
        truncate_first: bool,
    ) -> Result<MutationOutcome, IngestError> {
        // Reject uncoercible cells before opening the transaction so the
        // error names the row and column instead of a server cast failure.
        check_rows(columns, rows)?;

        let mut client = self
            .pool
            .get()
            .await
            .map_err(|e| IngestError::Load(format!("warehouse connection unavailable: {}", e)))?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| IngestError::Load(format!("failed to open transaction: {}", e)))?;

        let target = qualified_name(table);

        if truncate_first {
            tx.execute(format!("TRUNCATE TABLE {}", target).as_str(), &[])
                .await
                .map_err(|e| IngestError::Load(format!("truncate failed: {}", e)))?;
        }

        let mut inserted: u64 = 0;
        for chunk in rows.chunks(self.insert_chunk_size) {
            let sql = build_insert(&target, columns, chunk.len());
            let cells: Vec<Option<&str>> = chunk
                .iter()
                .flat_map(|row| {
                    row.iter()
                        .map(|cell| if cell.is_empty() { None } else { Some(cell.as_str()) })
                })
                .collect();
            let params: Vec<&(dyn ToSql + Sync)> =
                cells.iter().map(|c| c as &(dyn ToSql + Sync)).collect();
            inserted += tx
                .execute(sql.as_str(), &params)
                .await
                .map_err(|e| IngestError::Load(format!("insert failed: {}", e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::Load(format!("commit failed: {}", e)))?;

        info!(table = %table, rows = inserted, truncated = truncate_first, "load committed");
        Ok(MutationOutcome {
            rows_affected: Some(inserted as i64),
            detail: if truncate_first {
                format!("truncated and loaded {} rows", inserted)
            } else {
                format!("appended {} rows", inserted)
            },
        })
    }

    async fn apply_definition(
        &self,
        table: &TableRef,
        definition: &TableDefinition,
    ) -> Result<MutationOutcome, IngestError> {
        let mut client = self.pool.get().await.map_err(|e| {
            IngestError::SchemaApply(format!("warehouse connection unavailable: {}", e))
        })?;
        let tx = client
            .transaction()
            .await
            .map_err(|e| IngestError::SchemaApply(format!("failed to open transaction: {}", e)))?;

        tx.execute(
            format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&table.namespace)).as_str(),
            &[],
        )
        .await
        .map_err(|e| IngestError::SchemaApply(format!("create schema failed: {}", e)))?;

        let existing = tx
            .query(EXISTING_COLUMNS, &[&table.namespace, &table.table])
            .await
            .map_err(|e| IngestError::SchemaApply(format!("column introspection failed: {}", e)))?
            .into_iter()
            .map(|row| ExistingColumn {
                name: row.get(0),
                data_type: row.get(1),
            })
            .collect::<Vec<_>>();

        let statements = plan_schema_ddl(&qualified_name(table), &existing, definition);
        let detail = if existing.is_empty() {
            format!("created table with {} columns", definition.columns.len())
        } else {
            format!("altered table ({} statements)", statements.len())
        };

        for sql in &statements {
            debug!(table = %table, sql = %sql, "applying schema statement");
            tx.execute(sql.as_str(), &[])
                .await
                .map_err(|e| IngestError::SchemaApply(format!("'{}' failed: {}", sql, e)))?;
        }

        tx.commit()
            .await
            .map_err(|e| IngestError::SchemaApply(format!("commit failed: {}", e)))?;

        info!(table = %table, "{}", detail);
        Ok(MutationOutcome {
            rows_affected: None,
            detail,
        })
    }
}

#[async_trait]
impl Warehouse for PgWarehouse {
    async fn apply(&self, mutation: &Mutation) -> Result<MutationOutcome, IngestError> {
        match mutation {
            Mutation::Append {
                table,
                columns,
                rows,
            } => self.load(table, columns, rows, false).await,
            Mutation::Truncate {
                table,
                columns,
                rows,
            } => self.load(table, columns, rows, true).await,
            Mutation::DefineSchema { table, definition } => {
                self.apply_definition(table, definition).await
            }
        }
    }
}

/// Live columns of a warehouse table, from information_schema
#[derive(Debug, Clone)]
pub struct ExistingColumn {
    pub name: String,
    pub data_type: String,
}

const EXISTING_COLUMNS: &str = r#"
    SELECT column_name, data_type
    FROM information_schema.columns
    WHERE table_schema = $1
        AND table_name = $2
    ORDER BY ordinal_position
"#;

/// Quote an already-validated identifier for SQL
fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name)
}

fn qualified_name(table: &TableRef) -> String {
    format!(
        "{}.{}",
        quote_ident(&table.namespace),
        quote_ident(&table.table)
    )
}

/// Check every cell against its declared column type. Fails with the first
/// offending row so the run log can name it.
fn check_rows(columns: &[ColumnSpec], rows: &[Vec<String>]) -> Result<(), IngestError> {
    for (i, row) in rows.iter().enumerate() {
        if row.len() != columns.len() {
            return Err(IngestError::Load(format!(
                "row {} has {} fields, expected {}",
                i + 1,
                row.len(),
                columns.len()
            )));
        }
        for (cell, col) in row.iter().zip(columns) {
            if !col.data_type.accepts(cell) {
                return Err(IngestError::Load(format!(
                    "row {}, column '{}': cannot coerce '{}' to {}",
                    i + 1,
                    col.name,
                    cell,
                    col.data_type
                )));
            }
        }
    }
    Ok(())
}

/// Multi-row INSERT with one text parameter per cell. Parameters bind as
/// text and the statement casts them, so the warehouse enforces the same
/// column types `check_rows` pre-validated.
fn build_insert(target: &str, columns: &[ColumnSpec], row_count: usize) -> String {
    let column_list = columns
        .iter()
        .map(|c| quote_ident(&c.name))
        .collect::<Vec<_>>()
        .join(", ");

    let mut values = Vec::with_capacity(row_count);
    let mut placeholder = 1;
    for _ in 0..row_count {
        let tuple = columns
            .iter()
            .map(|c| {
                let p = format!("(${}::text)::{}", placeholder, c.data_type.as_sql());
                placeholder += 1;
                p
            })
            .collect::<Vec<_>>()
            .join(", ");
        values.push(format!("({})", tuple));
    }

    format!(
        "INSERT INTO {} ({}) VALUES {}",
        target,
        column_list,
        values.join(", ")
    )
}

/// DDL statements that bring a live table in line with a definition:
/// create when absent, otherwise add / drop / retype columns. Governance is
/// authoritative; destructive changes are emitted as requested.
fn plan_schema_ddl(
    target: &str,
    existing: &[ExistingColumn],
    definition: &TableDefinition,
) -> Vec<String> {
    if existing.is_empty() {
        let cols = definition
            .columns
            .iter()
            .map(|c| format!("{} {}", quote_ident(&c.name), c.data_type.as_sql()))
            .collect::<Vec<_>>()
            .join(", ");
        return vec![format!("CREATE TABLE {} ({})", target, cols)];
    }

    let mut statements = Vec::new();

    for col in &definition.columns {
        match existing.iter().find(|e| e.name == col.name) {
            None => statements.push(format!(
                "ALTER TABLE {} ADD COLUMN {} {}",
                target,
                quote_ident(&col.name),
                col.data_type.as_sql()
            )),
            Some(live) => {
                let live_type = live.data_type.parse::<ColumnType>().ok();
                if live_type != Some(col.data_type) {
                    statements.push(format!(
                        "ALTER TABLE {} ALTER COLUMN {} TYPE {} USING {}::{}",
                        target,
                        quote_ident(&col.name),
                        col.data_type.as_sql(),
                        quote_ident(&col.name),
                        col.data_type.as_sql()
                    ));
                }
            }
        }
    }

    for live in existing {
        if !definition.columns.iter().any(|c| c.name == live.name) {
            statements.push(format!(
                "ALTER TABLE {} DROP COLUMN {}",
                target,
                quote_ident(&live.name)
            ));
        }
    }

    statements
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classifier::Action;
    use pretty_assertions::assert_eq;

    fn columns() -> Vec<ColumnSpec> {
        vec![
            ColumnSpec {
                name: "id".to_string(),
                data_type: ColumnType::BigInt,
            },
            ColumnSpec {
                name: "amount".to_string(),
                data_type: ColumnType::Numeric,
            },
        ]
    }

    fn definition(cols: Vec<ColumnSpec>) -> TableDefinition {
        TableDefinition {
            columns: cols,
            allowed_actions: [Action::Append].into_iter().collect(),
        }
    }

    #[test]
    fn insert_sql_casts_each_cell() {
        let sql = build_insert("\"sales\".\"orders\"", &columns(), 2);
        assert_eq!(
            sql,
            "INSERT INTO \"sales\".\"orders\" (\"id\", \"amount\") VALUES \
             (($1::text)::bigint, ($2::text)::numeric), \
             (($3::text)::bigint, ($4::text)::numeric)"
        );
    }

    #[test]
    fn ragged_row_fails_with_row_number() {
        let rows = vec![
            vec!["1".to_string(), "9.99".to_string()],
            vec!["2".to_string()],
        ];
        let err = check_rows(&columns(), &rows).unwrap_err();
        assert_eq!(err.kind(), "LoadError");
        assert!(err.to_string().contains("row 2"));
    }

    #[test]
    fn uncoercible_cell_fails_with_column_name() {
        let rows = vec![vec!["not-a-number".to_string(), "9.99".to_string()]];
        let err = check_rows(&columns(), &rows).unwrap_err();
        assert_eq!(err.kind(), "LoadError");
        assert!(err.to_string().contains("'id'"));
    }

    #[test]
    fn empty_cells_load_as_null() {
        let rows = vec![vec!["1".to_string(), String::new()]];
        assert!(check_rows(&columns(), &rows).is_ok());
    }

    #[test]
    fn plan_creates_table_when_absent() {
        let ddl = plan_schema_ddl("\"sales\".\"orders\"", &[], &definition(columns()));
        assert_eq!(
            ddl,
            vec!["CREATE TABLE \"sales\".\"orders\" (\"id\" bigint, \"amount\" numeric)"]
        );
    }

    #[test]
    fn plan_adds_drops_and_retypes() {
        let existing = vec![
            ExistingColumn {
                name: "id".to_string(),
                data_type: "integer".to_string(),
            },
            ExistingColumn {
                name: "legacy".to_string(),
                data_type: "text".to_string(),
            },
        ];
        let ddl = plan_schema_ddl("\"sales\".\"orders\"", &existing, &definition(columns()));
        assert_eq!(
            ddl,
            vec![
                "ALTER TABLE \"sales\".\"orders\" ALTER COLUMN \"id\" TYPE bigint USING \"id\"::bigint",
                "ALTER TABLE \"sales\".\"orders\" ADD COLUMN \"amount\" numeric",
                "ALTER TABLE \"sales\".\"orders\" DROP COLUMN \"legacy\"",
            ]
        );
    }

    #[test]
    fn plan_is_empty_when_definitions_match() {
        let existing = vec![
            ExistingColumn {
                name: "id".to_string(),
                data_type: "bigint".to_string(),
            },
            ExistingColumn {
                name: "amount".to_string(),
                data_type: "numeric".to_string(),
            },
        ];
        let ddl = plan_schema_ddl("\"sales\".\"orders\"", &existing, &definition(columns()));
        assert!(ddl.is_empty());
    }

    #[test]
    fn plan_maps_information_schema_type_names() {
        // information_schema reports "double precision" and "timestamp
        // without time zone"; both must compare equal to the enum types.
        let existing = vec![ExistingColumn {
            name: "ts".to_string(),
            data_type: "timestamp without time zone".to_string(),
        }];
        let def = definition(vec![ColumnSpec {
            name: "ts".to_string(),
            data_type: ColumnType::Timestamp,
        }]);
        assert!(plan_schema_ddl("\"s\".\"t\"", &existing, &def).is_empty());
    }
}
