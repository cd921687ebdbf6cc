//! The value types that flow from a caller's write call through the
//! cache, the WAL, and into the column store.
//!
//! The dated engine stores an opaque JSON payload per `(key,
//! process_name)`. The collection engine stores one typed scalar per
//! `(key, collection_name, item_name)`, routed to a type-specific
//! DuckDB column so the store can query it without a JSON decode. Both
//! shapes are modelled here since both travel through the same WAL
//! record and cache machinery.

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

/// The JSON document stored by the dated engine.
///
/// Kept as an opaque `serde_json::Value` rather than a fixed struct:
/// the dated engine never inspects payload fields, it only stores and
/// returns them, plus whatever columns `extra_schema` promotes out of
/// the same document for querying.
pub type Payload = JsonValue;

/// A single typed scalar value, as stored by the collection engine.
///
/// Routed at write time to one of `value_int` / `value_float` /
/// `value_string` in the column store so that only one of the three
/// columns is ever non-null for a given row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum ScalarValue {
    /// A signed 64-bit integer.
    Int(i64),
    /// A double-precision float.
    Float(f64),
    /// A UTF-8 string.
    String(String),
    /// An explicit absence of a value, distinct from the field never
    /// having been written.
    Null,
}

impl ScalarValue {
    /// The physical column this value is routed to in the collection
    /// engine's `storage_history` / `storage_latest` tables.
    pub fn column_name(&self) -> Option<&'static str> {
        match self {
            ScalarValue::Int(_) => Some("value_int"),
            ScalarValue::Float(_) => Some("value_float"),
            ScalarValue::String(_) => Some("value_string"),
            ScalarValue::Null => None,
        }
    }

    /// `true` if this is the null variant.
    pub fn is_null(&self) -> bool {
        matches!(self, ScalarValue::Null)
    }

    /// Mirror this value back into a cached JSON payload, e.g. under the
    /// `"value"` key the collection engine strips out before writing the
    /// `data` column.
    pub fn to_json(&self) -> JsonValue {
        serde_json::to_value(self).expect("ScalarValue serialization is infallible")
    }
}

impl From<i64> for ScalarValue {
    fn from(value: i64) -> Self {
        ScalarValue::Int(value)
    }
}

impl From<f64> for ScalarValue {
    fn from(value: f64) -> Self {
        ScalarValue::Float(value)
    }
}

impl From<String> for ScalarValue {
    fn from(value: String) -> Self {
        ScalarValue::String(value)
    }
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        ScalarValue::String(value.to_string())
    }
}

impl From<JsonValue> for ScalarValue {
    /// Coerce an arbitrary JSON scalar into a `ScalarValue`. Objects and
    /// arrays have no column to route to and collapse to `Null` —
    /// callers at the engine boundary reject those before they reach
    /// here.
    fn from(value: JsonValue) -> Self {
        match value {
            JsonValue::Null => ScalarValue::Null,
            JsonValue::Bool(b) => ScalarValue::String(b.to_string()),
            JsonValue::Number(n) => {
                if let Some(i) = n.as_i64() {
                    ScalarValue::Int(i)
                } else if let Some(f) = n.as_f64() {
                    ScalarValue::Float(f)
                } else {
                    ScalarValue::Null
                }
            }
            JsonValue::String(s) => ScalarValue::String(s),
            JsonValue::Array(_) | JsonValue::Object(_) => ScalarValue::Null,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn column_routing() {
        assert_eq!(ScalarValue::Int(1).column_name(), Some("value_int"));
        assert_eq!(ScalarValue::Float(1.0).column_name(), Some("value_float"));
        assert_eq!(
            ScalarValue::String("a".into()).column_name(),
            Some("value_string")
        );
        assert_eq!(ScalarValue::Null.column_name(), None);
    }

    #[test]
    fn json_number_coercion_prefers_integer() {
        let v: ScalarValue = serde_json::json!(42).into();
        assert_eq!(v, ScalarValue::Int(42));
    }

    #[test]
    fn json_float_coercion() {
        let v: ScalarValue = serde_json::json!(3.5).into();
        assert_eq!(v, ScalarValue::Float(3.5));
    }

    #[test]
    fn json_object_has_no_column() {
        let v: ScalarValue = serde_json::json!({"a": 1}).into();
        assert!(v.is_null());
    }

    #[test]
    fn to_json_mirrors_the_scalar_shape() {
        assert_eq!(ScalarValue::Int(3).to_json(), serde_json::json!(3));
        assert_eq!(ScalarValue::Null.to_json(), serde_json::Value::Null);
    }

    #[test]
    fn serde_round_trip() {
        let v = ScalarValue::String("hello".into());
        let json = serde_json::to_string(&v).unwrap();
        let back: ScalarValue = serde_json::from_str(&json).unwrap();
        assert_eq!(v, back);
    }
}
