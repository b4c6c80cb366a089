use chrono::{NaiveDate, NaiveDateTime};
use serde_json::{Map, Value};
use sqlx::MySqlPool;

use crate::error::ApiError;

/// ===============================
/// SQL bindable value enum
/// ===============================
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    String(String),
    I64(i64),
    U64(u64),
    F64(f64),
    Bool(bool),
    Date(NaiveDate),
    DateTime(NaiveDateTime),
    Null,
}

impl SqlValue {
    fn from_json(value: &Value) -> Result<Self, ApiError> {
        Ok(match value {
            Value::String(s) => {
                if let Ok(d) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
                    SqlValue::Date(d)
                } else if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
                    SqlValue::DateTime(dt)
                } else {
                    SqlValue::String(s.clone())
                }
            }
            Value::Number(n) => {
                if let Some(u) = n.as_u64() {
                    SqlValue::U64(u)
                } else if let Some(i) = n.as_i64() {
                    SqlValue::I64(i)
                } else if let Some(f) = n.as_f64() {
                    SqlValue::F64(f)
                } else {
                    return Err(ApiError::bad_request("Unsupported number"));
                }
            }
            Value::Bool(b) => SqlValue::Bool(*b),
            Value::Null => SqlValue::Null,
            _ => return Err(ApiError::bad_request("Unsupported JSON value type")),
        })
    }
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
///
/// Only keys listed in `allowed` become columns; anything else is a 400.
pub fn build_update_sql(
    table: &str,
    payload: &Map<String, Value>,
    allowed: &[&str],
    id_column: &str,
    id_value: u64,
) -> Result<SqlUpdate, ApiError> {
    if payload.is_empty() {
        return Err(ApiError::bad_request("No fields provided for update"));
    }

    let mut columns = Vec::with_capacity(payload.len());
    let mut values = Vec::with_capacity(payload.len() + 1);

    for (key, value) in payload {
        if !allowed.contains(&key.as_str()) {
            return Err(ApiError::bad_request(format!("Field '{key}' cannot be updated")));
        }
        columns.push(format!("{key} = ?"));
        values.push(SqlValue::from_json(value)?);
    }

    let sql = format!(
        "UPDATE {} SET {} WHERE {} = ?",
        table,
        columns.join(", "),
        id_column
    );

    // WHERE id = ?
    values.push(SqlValue::U64(id_value));

    Ok(SqlUpdate { sql, values })
}

/// ===============================
/// Execute the update
/// ===============================
pub async fn execute_update(pool: &MySqlPool, update: SqlUpdate) -> Result<u64, sqlx::Error> {
    let mut query = sqlx::query(&update.sql);

    for value in update.values {
        query = match value {
            SqlValue::String(v) => query.bind(v),
            SqlValue::I64(v) => query.bind(v),
            SqlValue::U64(v) => query.bind(v),
            SqlValue::F64(v) => query.bind(v),
            SqlValue::Bool(v) => query.bind(v),
            SqlValue::Date(v) => query.bind(v),
            SqlValue::DateTime(v) => query.bind(v),
            SqlValue::Null => query.bind(None::<String>),
        };
    }

    let result = query.execute(pool).await?;
    Ok(result.rows_affected())
}

/// Returns the body as a JSON object or a 400.
pub fn as_object(body: &Value) -> Result<&Map<String, Value>, ApiError> {
    body.as_object()
        .ok_or_else(|| ApiError::bad_request("Payload must be a JSON object"))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    const ALLOWED: &[&str] = &["name", "class_id", "status"];

    #[test]
    fn builds_set_clause_for_allowed_columns() {
        let body = json!({"name": "Grade 9", "class_id": 4});
        let update = build_update_sql("users", as_object(&body).unwrap(), ALLOWED, "id", 12)
            .unwrap();

        assert!(update.sql.starts_with("UPDATE users SET "));
        assert!(update.sql.contains("name = ?"));
        assert!(update.sql.contains("class_id = ?"));
        assert!(update.sql.ends_with("WHERE id = ?"));
        assert_eq!(update.values.len(), 3);
        assert_eq!(update.values.last(), Some(&SqlValue::U64(12)));
    }

    #[test]
    fn unknown_columns_are_rejected() {
        let body = json!({"name": "x", "password = 'x', role": "admin"});
        assert!(build_update_sql("users", as_object(&body).unwrap(), ALLOWED, "id", 1).is_err());
    }

    #[test]
    fn empty_and_non_object_payloads_are_rejected() {
        let body = json!({});
        assert!(build_update_sql("users", as_object(&body).unwrap(), ALLOWED, "id", 1).is_err());
        assert!(as_object(&json!([1, 2])).is_err());
    }

    #[test]
    fn json_values_map_to_sql_values() {
        assert_eq!(
            SqlValue::from_json(&json!("2026-02-01")).unwrap(),
            SqlValue::Date(NaiveDate::from_ymd_opt(2026, 2, 1).unwrap())
        );
        assert_eq!(SqlValue::from_json(&json!(null)).unwrap(), SqlValue::Null);
        assert_eq!(SqlValue::from_json(&json!(-3)).unwrap(), SqlValue::I64(-3));
        assert!(SqlValue::from_json(&json!({"a": 1})).is_err());
    }
}
