//! Query executor: resolves the caller's current database, enforces
//! policy, and runs SQL in a read-only or read-write transaction.

use serde_json::{Map, Value};
use sqlx::{Column, Row, TypeInfo};

use crate::catalog::model::OperationKind;
use crate::error::{GatewayError, Result};
use crate::policy;
use crate::pool::PoolManager;
use crate::session::{DatabaseContext, SessionContext};

/// Wraps an identifier in backticks, doubling any embedded backtick.
pub fn quote_identifier(ident: &str) -> String {
    format!("`{}`", ident.replace('`', "``"))
}

pub async fn execute(ctx: &dyn SessionContext, pools: &PoolManager, sql: &str) -> Result<Value> {
    let current = ctx.current_database().await.ok_or(GatewayError::NoCurrentDatabase)?;
    run(&current, pools, sql).await
}

async fn run(current: &DatabaseContext, pools: &PoolManager, sql: &str) -> Result<Value> {
    let kind = policy::classify(sql);
    let (allowed, reason) = policy::allow(kind, current.permissions, &current.alias);
    if !allowed {
        return Err(GatewayError::PermissionDenied(reason.unwrap_or_default()));
    }

    let pool = pools.get_pool(&current.connection_id).await?;
    let mut conn = pool.acquire().await?;

    sqlx::query(&format!("USE {}", quote_identifier(&current.real_name)))
        .execute(&mut *conn)
        .await?;

    let mut tx = conn.begin().await?;
    if kind == OperationKind::Select {
        sqlx::query("SET TRANSACTION READ ONLY").execute(&mut *tx).await?;
    }

    let started = std::time::Instant::now();
    let outcome = if kind == OperationKind::Select {
        sqlx::query(sql).fetch_all(&mut *tx).await.map(QueryOutcome::Rows)
    } else {
        sqlx::query(sql).execute(&mut *tx).await.map(QueryOutcome::Write)
    };

    let outcome = match outcome {
        Ok(o) => o,
        Err(e) => {
            if let Err(rollback_err) = tx.rollback().await {
                tracing::warn!(err = %rollback_err, "rollback failed after query error");
            }
            return Err(GatewayError::Query(e.to_string()));
        }
    };

    tx.commit().await?;
    let elapsed = started.elapsed();

    Ok(shape_result(outcome, elapsed))
}

enum QueryOutcome {
    Rows(Vec<sqlx::mysql::MySqlRow>),
    Write(sqlx::mysql::MySqlQueryResult),
}

fn shape_result(outcome: QueryOutcome, elapsed: std::time::Duration) -> Value {
    let execution_time = format!("{}ms", elapsed.as_millis());

    match outcome {
        QueryOutcome::Rows(rows) => {
            let fields: Vec<String> = rows
                .first()
                .map(|r| r.columns().iter().map(|c| c.name().to_string()).collect())
                .unwrap_or_default();
            let shaped_rows: Vec<Value> = rows.iter().map(row_to_json).collect();
            let row_count = shaped_rows.len();
            serde_json::json!({
                "rows": shaped_rows,
                "fields": fields,
                "rowCount": row_count,
                "executionTime": execution_time,
            })
        }
        QueryOutcome::Write(result) => {
            let affected_rows = result.rows_affected();
            serde_json::json!({
                "rows": [{
                    "affectedRows": affected_rows,
                    "insertId": result.last_insert_id(),
                    "changedRows": affected_rows,
                }],
                "fields": ["affectedRows", "insertId", "changedRows"],
                "rowCount": affected_rows,
                "executionTime": execution_time,
            })
        }
    }
}

/// Shapes a row into a JSON object keyed by column name, rendering each
/// value via its MySQL type, falling back to a string for anything
/// `sqlx` doesn't decode directly into a JSON-representable type.
fn row_to_json(row: &sqlx::mysql::MySqlRow) -> Value {
    let mut map = Map::new();
    for (i, column) in row.columns().iter().enumerate() {
        let value = match column.type_info().name() {
            "TINYINT" | "SMALLINT" | "MEDIUMINT" | "INT" | "BIGINT" => row
                .try_get::<i64, _>(i)
                .map(Value::from)
                .or_else(|_| row.try_get::<i32, _>(i).map(Value::from))
                .unwrap_or(Value::Null),
            "FLOAT" | "DOUBLE" | "DECIMAL" => {
                row.try_get::<f64, _>(i).map(Value::from).unwrap_or(Value::Null)
            }
            _ => row
                .try_get::<String, _>(i)
                .map(Value::from)
                .unwrap_or(Value::Null),
        };
        map.insert(column.name().to_string(), value);
    }
    Value::Object(map)
}
