//! Schema Registry - the trust anchor shared by the guard and the planner
//!
//! The registry derives three artifacts from one declaration: the table
//! allow-list, the per-table column sets, and the schema document the LLM
//! sees. Deriving all three from a single source keeps "what the model sees"
//! and "what the guard permits" from drifting apart.

use crate::error::{ServiceError, ServiceResult};
use crate::schema::declaration::TableSpec;
use sqlx::{PgPool, Row};
use std::collections::{BTreeMap, BTreeSet};

pub struct SchemaRegistry {
    specs: Vec<TableSpec>,
    tables: BTreeSet<String>,
    columns: BTreeMap<String, BTreeSet<String>>,
    doc: String,
}

impl SchemaRegistry {
    /// Build the registry from a static declaration. No database contact;
    /// call [`SchemaRegistry::verify`] at startup before serving.
    pub fn from_declaration(specs: Vec<TableSpec>) -> Self {
        let tables: BTreeSet<String> = specs.iter().map(|t| t.name.clone()).collect();
        let columns: BTreeMap<String, BTreeSet<String>> = specs
            .iter()
            .map(|t| {
                (
                    t.name.clone(),
                    t.columns.iter().map(|c| c.name.clone()).collect(),
                )
            })
            .collect();
        let doc = render_doc(&specs);
        Self {
            specs,
            tables,
            columns,
            doc,
        }
    }

    /// Check every declared table and column against the live database.
    /// Fails with `SchemaMismatch` when a declared table has no columns in
    /// information_schema or a declared column is absent. Comparison is
    /// case-insensitive.
    pub async fn verify(&self, pool: &PgPool) -> ServiceResult<()> {
        for spec in &self.specs {
            let (schema, table) = spec
                .name
                .split_once('.')
                .ok_or_else(|| {
                    ServiceError::schema_mismatch(format!(
                        "declared table '{}' is not schema-qualified",
                        spec.name
                    ))
                })?;

            let rows = sqlx::query(
                "SELECT lower(column_name) AS column_name \
                 FROM information_schema.columns \
                 WHERE lower(table_schema) = $1 AND lower(table_name) = $2",
            )
            .bind(schema)
            .bind(table)
            .fetch_all(pool)
            .await
            .map_err(|e| ServiceError::database_unavailable(e.to_string()))?;

            if rows.is_empty() {
                return Err(ServiceError::schema_mismatch(format!(
                    "declared table '{}' has no columns in information_schema",
                    spec.name
                )));
            }

            let live: BTreeSet<String> = rows
                .iter()
                .map(|r| r.get::<String, _>("column_name"))
                .collect();
            for col in &spec.columns {
                if !live.contains(&col.name) {
                    return Err(ServiceError::schema_mismatch(format!(
                        "declared column '{}.{}' does not exist in the live database",
                        spec.name, col.name
                    )));
                }
            }
        }
        Ok(())
    }

    /// Fully-qualified lower-cased table names
    pub fn tables(&self) -> &BTreeSet<String> {
        &self.tables
    }

    /// Allowed columns for a declared table. Empty only when the table was
    /// declared without columns, in which case column checks are skipped.
    pub fn columns(&self, fqtn: &str) -> Option<&BTreeSet<String>> {
        self.columns.get(fqtn)
    }

    pub fn columns_by_table(&self) -> &BTreeMap<String, BTreeSet<String>> {
        &self.columns
    }

    /// The schema document, the only picture of the database the LLM sees
    pub fn doc(&self) -> &str {
        &self.doc
    }

    pub fn specs(&self) -> &[TableSpec] {
        &self.specs
    }
}

/// Stable line format: header, columns, optional primary key, blank line
fn render_doc(specs: &[TableSpec]) -> String {
    let mut doc = String::new();
    for spec in specs {
        doc.push_str(&format!("{} — {}\n", spec.name, spec.description));
        doc.push_str("columns:\n");
        for col in &spec.columns {
            doc.push_str(&format!("- {}: {}\n", col.name, col.description));
        }
        if !spec.primary_key.is_empty() {
            doc.push_str(&format!("primary_key: [{}]\n", spec.primary_key.join(", ")));
        }
        doc.push('\n');
    }
    doc
}
