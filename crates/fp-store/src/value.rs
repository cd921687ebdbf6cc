//! Converts an `extra_schema` column's declared physical type plus an
//! optional JSON field value into the dynamic SQL parameter DuckDB
//! binds against, and routes a `ScalarValue` to its typed column.

use duckdb::types::Value as SqlValue;
use fp_core::{PhysicalType, ScalarValue};
use serde_json::Value as JsonValue;

/// Convert a payload field (absent fields become SQL `NULL`, per the
/// spec's extra-schema NULLability invariant) into the SQL value bound
/// for an extra column of the declared physical type.
pub fn extra_sql_value(physical_type: PhysicalType, field: Option<&JsonValue>) -> SqlValue {
    let field = match field {
        Some(JsonValue::Null) | None => return SqlValue::Null,
        Some(value) => value,
    };

    match physical_type {
        PhysicalType::Text => field
            .as_str()
            .map(|s| SqlValue::Text(s.to_string()))
            .unwrap_or_else(|| SqlValue::Text(field.to_string())),
        PhysicalType::BigInt => field.as_i64().map(SqlValue::BigInt).unwrap_or(SqlValue::Null),
        PhysicalType::Double => field.as_f64().map(SqlValue::Double).unwrap_or(SqlValue::Null),
        PhysicalType::Boolean => field.as_bool().map(SqlValue::Boolean).unwrap_or(SqlValue::Null),
        PhysicalType::Timestamp => field
            .as_str()
            .and_then(fp_core::parse_timestamp)
            .map(|instant| SqlValue::Text(fp_core::serialize_timestamp(instant)))
            .unwrap_or(SqlValue::Null),
    }
}

/// `Some(s)` becomes a text value, `None` becomes SQL `NULL`.
pub fn opt_text(value: Option<String>) -> SqlValue {
    value.map(SqlValue::Text).unwrap_or(SqlValue::Null)
}

/// `Some(i)` becomes a bigint value, `None` becomes SQL `NULL`.
pub fn opt_bigint(value: Option<i64>) -> SqlValue {
    value.map(SqlValue::BigInt).unwrap_or(SqlValue::Null)
}

/// Route a [`ScalarValue`] to the `(value_int, value_float,
/// value_string)` triple the collection engine's tables carry, exactly
/// one non-null per row.
pub fn scalar_columns(value: &ScalarValue) -> (SqlValue, SqlValue, SqlValue) {
    match value {
        ScalarValue::Int(i) => (SqlValue::BigInt(*i), SqlValue::Null, SqlValue::Null),
        ScalarValue::Float(f) => (SqlValue::Null, SqlValue::Double(*f), SqlValue::Null),
        ScalarValue::String(s) => (SqlValue::Null, SqlValue::Null, SqlValue::Text(s.clone())),
        ScalarValue::Null => (SqlValue::Null, SqlValue::Null, SqlValue::Null),
    }
}

/// Reconstruct a [`ScalarValue`] from a typed-column triple read back
/// out of the store — the inverse of [`scalar_columns`].
pub fn scalar_from_columns(
    value_int: Option<i64>,
    value_float: Option<f64>,
    value_string: Option<String>,
) -> ScalarValue {
    if let Some(i) = value_int {
        ScalarValue::Int(i)
    } else if let Some(f) = value_float {
        ScalarValue::Float(f)
    } else if let Some(s) = value_string {
        ScalarValue::String(s)
    } else {
        ScalarValue::Null
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn missing_field_is_null() {
        let v = extra_sql_value(PhysicalType::BigInt, None);
        assert!(matches!(v, SqlValue::Null));
    }

    #[test]
    fn bigint_field_converts() {
        let json = serde_json::json!(42);
        let v = extra_sql_value(PhysicalType::BigInt, Some(&json));
        assert!(matches!(v, SqlValue::BigInt(42)));
    }

    #[test]
    fn scalar_routing_round_trips() {
        let (i, f, s) = scalar_columns(&ScalarValue::Int(7));
        assert!(matches!(i, SqlValue::BigInt(7)));
        assert!(matches!(f, SqlValue::Null));
        assert!(matches!(s, SqlValue::Null));
        assert_eq!(scalar_from_columns(Some(7), None, None), ScalarValue::Int(7));
    }

    #[test]
    fn null_scalar_has_no_column() {
        let (i, f, s) = scalar_columns(&ScalarValue::Null);
        assert!(matches!(i, SqlValue::Null));
        assert!(matches!(f, SqlValue::Null));
        assert!(matches!(s, SqlValue::Null));
        assert_eq!(scalar_from_columns(None, None, None), ScalarValue::Null);
    }
}
