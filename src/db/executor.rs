//! Executor - run one guarded statement under a bounded time budget
//!
//! The pool is the only shared mutable resource in the process. A statement
//! borrows one connection, gets a fresh statement_timeout (a recycled
//! connection must not inherit an unbounded one), runs, and the connection
//! returns to the pool on every exit path because the checkout is dropped.

use crate::config::DatabaseConfig;
use crate::error::{ServiceError, ServiceResult};
use serde_json::Value as JsonValue;
use sqlx::postgres::{PgPoolOptions, PgRow};
use sqlx::{Column, PgPool, Row as SqlxRow, TypeInfo};
use std::time::Duration;
use tracing::{debug, info};

/// One result row: column label to scalar
pub type Row = serde_json::Map<String, JsonValue>;

pub struct Db {
    pool: PgPool,
    statement_timeout_ms: u64,
    debug_sql: bool,
}

impl Db {
    pub async fn connect(config: &DatabaseConfig) -> ServiceResult<Self> {
        let pool = PgPoolOptions::new()
            .max_connections(config.pool_max_connections)
            .acquire_timeout(Duration::from_millis(config.pool_acquire_timeout_ms))
            .idle_timeout(Duration::from_millis(config.pool_idle_timeout_ms))
            .connect(&config.url)
            .await
            .map_err(|e| ServiceError::database_unavailable(e.to_string()))?;
        Ok(Self {
            pool,
            statement_timeout_ms: config.statement_timeout_ms,
            debug_sql: config.debug_sql,
        })
    }

    /// Cheap liveness probe, run before any LLM spend
    pub async fn probe(&self) -> ServiceResult<()> {
        sqlx::query("SELECT 1")
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(|e| ServiceError::database_unavailable(e.to_string()))
    }

    /// Execute one statement and decode every cell to JSON
    pub async fn run(&self, sql: &str) -> ServiceResult<Vec<Row>> {
        let mut conn = self
            .pool
            .acquire()
            .await
            .map_err(|e| ServiceError::database_unavailable(e.to_string()))?;

        sqlx::query(&format!(
            "SET statement_timeout = {}",
            self.statement_timeout_ms
        ))
        .execute(&mut *conn)
        .await
        .map_err(|e| ServiceError::execution(e.to_string(), sql))?;

        if self.debug_sql {
            info!(%sql, "executing statement");
        } else {
            debug!(%sql, "executing statement");
        }

        let rows = sqlx::query(sql)
            .fetch_all(&mut *conn)
            .await
            .map_err(|e| ServiceError::execution(e.to_string(), sql))?;

        Ok(rows.iter().map(row_to_json).collect())
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

fn row_to_json(row: &PgRow) -> Row {
    let mut out = Row::new();
    for (idx, col) in row.columns().iter().enumerate() {
        let value = cell_to_json(row, idx, col.type_info().name());
        out.insert(col.name().to_string(), value);
    }
    out
}

/// Decode one cell by Postgres type name, falling back through a few
/// generic attempts for everything else
fn cell_to_json(row: &PgRow, idx: usize, pg_type_name: &str) -> JsonValue {
    match pg_type_name {
        "BOOL" => row
            .try_get::<Option<bool>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::Bool)
            .unwrap_or(JsonValue::Null),
        "INT2" => row
            .try_get::<Option<i16>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::from(i64::from(v)))
            .unwrap_or(JsonValue::Null),
        "INT4" => row
            .try_get::<Option<i32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| JsonValue::from(i64::from(v)))
            .unwrap_or(JsonValue::Null),
        "INT8" => row
            .try_get::<Option<i64>, _>(idx)
            .ok()
            .flatten()
            .map(JsonValue::from)
            .unwrap_or(JsonValue::Null),
        "FLOAT4" => row
            .try_get::<Option<f32>, _>(idx)
            .ok()
            .flatten()
            .map(|v| v as f64)
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "FLOAT8" => row
            .try_get::<Option<f64>, _>(idx)
            .ok()
            .flatten()
            .and_then(serde_json::Number::from_f64)
            .map(JsonValue::Number)
            .unwrap_or(JsonValue::Null),
        "NUMERIC" => row
            .try_get::<Option<sqlx::types::BigDecimal>, _>(idx)
            .ok()
            .flatten()
            .map(|v| {
                // values beyond f64 range survive as strings
                let rendered = v.to_string();
                rendered
                    .parse::<f64>()
                    .ok()
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::String(rendered))
            })
            .unwrap_or(JsonValue::Null),
        "DATE" => row
            .try_get::<Option<chrono::NaiveDate>, _>(idx)
            .ok()
            .flatten()
            .map(|d| JsonValue::from(d.format("%Y-%m-%d").to_string()))
            .unwrap_or(JsonValue::Null),
        "TIMESTAMP" => row
            .try_get::<Option<chrono::NaiveDateTime>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| JsonValue::from(format!("{}Z", dt.format("%Y-%m-%dT%H:%M:%S%.f"))))
            .unwrap_or(JsonValue::Null),
        "TIMESTAMPTZ" => row
            .try_get::<Option<chrono::DateTime<chrono::Utc>>, _>(idx)
            .ok()
            .flatten()
            .map(|dt| JsonValue::from(dt.to_rfc3339()))
            .unwrap_or(JsonValue::Null),
        _ => {
            if let Ok(v) = row.try_get::<Option<String>, _>(idx) {
                return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<i64>, _>(idx) {
                return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<f64>, _>(idx) {
                return v
                    .and_then(serde_json::Number::from_f64)
                    .map(JsonValue::Number)
                    .unwrap_or(JsonValue::Null);
            }
            if let Ok(v) = row.try_get::<Option<bool>, _>(idx) {
                return v.map(JsonValue::from).unwrap_or(JsonValue::Null);
            }
            JsonValue::Null
        }
    }
}
