use chrono::{DateTime, Utc};
use serde_json::Value;
use sqlx::types::Json;
use sqlx::{Executor, MySql};

use crate::error::AttendanceError;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    Json(Value),
    DateTime(DateTime<Utc>),
    Null,
}

/// ===============================
/// SQL update container
/// ===============================
#[derive(Debug)]
pub struct SqlUpdate {
    pub sql: String,
    pub values: Vec<SqlValue>,
}

/// ===============================
/// Build dynamic UPDATE SQL
/// ===============================
/// Column names come from callers' whitelists, never from request payloads.
/// Each `increments` column gets `col = col + 1`; each `guards` predicate is
/// ANDed onto the id match.
pub fn build_update_sql(
    table: &str,
    assignments: Vec<(&'static str, SqlValue)>,
    increments: &[&'static str],
    id_column: &str,
    id_value: &str,
    guards: &[&'static str],
) -> Result<SqlUpdate, AttendanceError> {
    if assignments.is_empty() {
        return Err(AttendanceError::Validation(
            "No fields provided for update".to_string(),
        ));
    }

    let set_clause = assignments
        .iter()
        .map(|(column, _)| format!("{} = ?", column))
        .chain(increments.iter().map(|column| format!("{0} = {0} + 1", column)))
        .collect::<Vec<_>>()
        .join(", ");

    let mut sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table, set_clause, id_column
    );
    for guard in guards {
        sql.push_str(" AND ");
        sql.push_str(guard);
    }

    let mut values: Vec<SqlValue> = assignments.into_iter().map(|(_, value)| value).collect();

    // WHERE id = ?
    values.push(SqlValue::String(id_value.to_string()));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update<'e, E>(executor: E, update: SqlUpdate) -> Result<u64, sqlx::Error>
where
    E: Executor<'e, Database = MySql>,
{
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::Json(v) => query.bind(Json(v)),
            SqlValue::DateTime(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(executor).await?;
    Ok(result.rows_affected())
}
