//! `sql` executor — runs a SQL statement against the shared state-store pool.
//!
//! params: `{"query": "SELECT ..."}`. Result: `{"rows": [...]}` where each
//! row is a JSON object keyed by column name. Read-only by convention; this
//! executor does not open its own transaction beyond the single statement.

use async_trait::async_trait;
use db::DbPool;
use serde_json::{json, Map, Value};
use sqlx::{Column, Row, TypeInfo};

use crate::traits::{ExecutionContext, Executor};
use crate::NodeError;

pub struct SqlExecutor {
    pool: DbPool,
}

impl SqlExecutor {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl Executor for SqlExecutor {
    async fn execute(&self, params: Value, _ctx: &ExecutionContext) -> Result<Value, NodeError> {
        let query = params
            .get("query")
            .and_then(Value::as_str)
            .ok_or_else(|| NodeError::Fatal("sql executor requires a string 'query' param".into()))?;

        let rows = sqlx::query(query)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| NodeError::Retryable(format!("sql query failed: {e}")))?;

        let json_rows: Vec<Value> = rows.iter().map(row_to_json).collect();

        Ok(json!({ "rows": json_rows }))
    }
}

/// Best-effort conversion of a generic `sqlx::postgres::PgRow` into a JSON
/// object, reading each column as text. Good enough for the engine's
/// orchestration context (downstream `condition` expressions and logs);
/// typed column access belongs to a real application-level `sql` node.
fn row_to_json(row: &sqlx::postgres::PgRow) -> Value {
    let mut obj = Map::new();
    for column in row.columns() {
        let name = column.name();
        let value = match column.type_info().name() {
            "INT4" | "INT8" | "INT2" => row
                .try_get::<i64, _>(name)
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "FLOAT4" | "FLOAT8" | "NUMERIC" => row
                .try_get::<f64, _>(name)
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            "BOOL" => row
                .try_get::<bool, _>(name)
                .map(|v| json!(v))
                .unwrap_or(Value::Null),
            _ => row
                .try_get::<String, _>(name)
                .map(Value::String)
                .unwrap_or(Value::Null),
        };
        obj.insert(name.to_string(), value);
    }
    Value::Object(obj)
}
