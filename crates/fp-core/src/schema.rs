//! The fixed catalogue of physical column types an `extra_schema`
//! declaration may use, and validation of such declarations against an
//! engine variant's reserved column names.
//!
//! Both engine variants let a caller promote fields out of the stored
//! payload into dedicated DuckDB columns for querying (`extra_schema`).
//! That declaration is just a list of `(column name, physical type)`
//! pairs, validated once at engine construction time rather than on
//! every write.

use crate::error::SchemaError;

/// The physical DuckDB column types an `extra_schema` entry may
/// declare. Deliberately small and fixed — this is not a general type
/// system, just the handful of scalar shapes the column store needs to
/// index and filter on.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhysicalType {
    /// `TEXT`
    Text,
    /// `BIGINT`
    BigInt,
    /// `DOUBLE`
    Double,
    /// `BOOLEAN`
    Boolean,
    /// `TIMESTAMP`
    Timestamp,
}

impl PhysicalType {
    /// The DuckDB column type name this maps to in a `CREATE TABLE` /
    /// `ALTER TABLE ... ADD COLUMN` statement.
    pub fn as_sql(&self) -> &'static str {
        match self {
            PhysicalType::Text => "TEXT",
            PhysicalType::BigInt => "BIGINT",
            PhysicalType::Double => "DOUBLE",
            PhysicalType::Boolean => "BOOLEAN",
            PhysicalType::Timestamp => "TIMESTAMP",
        }
    }

    /// Parse a caller-supplied type name (case-insensitive) from the
    /// fixed catalogue. Anything outside the catalogue is rejected up
    /// front, not deferred to a DuckDB `CREATE TABLE` failure.
    pub fn parse(type_name: &str) -> Option<PhysicalType> {
        match type_name.to_ascii_lowercase().as_str() {
            "text" | "string" => Some(PhysicalType::Text),
            "bigint" | "int" | "integer" => Some(PhysicalType::BigInt),
            "double" | "float" => Some(PhysicalType::Double),
            "boolean" | "bool" => Some(PhysicalType::Boolean),
            "timestamp" | "datetime" => Some(PhysicalType::Timestamp),
            _ => None,
        }
    }
}

/// One declared extra column: a name promoted from the payload plus its
/// physical type.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ExtraColumn {
    /// The column name, also the payload field name it is read from.
    pub name: String,
    /// The physical type of the column.
    pub physical_type: PhysicalType,
}

/// A validated `extra_schema` declaration: extra columns an engine
/// should maintain alongside the reserved identity/value columns.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ExtraSchema {
    columns: Vec<ExtraColumn>,
}

impl ExtraSchema {
    /// Validate a raw list of `(column name, type name)` pairs against
    /// an engine variant's reserved column names, producing a usable
    /// `ExtraSchema` or the first violation found.
    ///
    /// Validation runs once, at engine construction — not per write —
    /// so an `ExtraSchema` is infallible to consult afterwards.
    pub fn validate(
        declared: &[(String, String)],
        reserved: &[&str],
    ) -> Result<ExtraSchema, SchemaError> {
        let mut columns = Vec::with_capacity(declared.len());
        for (name, type_name) in declared {
            if reserved.iter().any(|r| r.eq_ignore_ascii_case(name)) {
                return Err(SchemaError::ReservedName { name: name.clone() });
            }
            let physical_type = PhysicalType::parse(type_name).ok_or_else(|| SchemaError::UnknownType {
                name: name.clone(),
                type_name: type_name.clone(),
            })?;
            columns.push(ExtraColumn {
                name: name.clone(),
                physical_type,
            });
        }
        Ok(ExtraSchema { columns })
    }

    /// The declared extra columns, in declaration order.
    pub fn columns(&self) -> &[ExtraColumn] {
        &self.columns
    }

    /// `true` if no extra columns were declared.
    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }
}

/// Reserved column names for the dated engine's table. An `extra_schema`
/// entry may not reuse any of these.
pub const DATED_RESERVED_COLUMNS: &[&str] = &[
    "key",
    "process_name",
    "data",
    "timestamp",
    "status",
    "status_int",
    "username",
    "updated_at",
    "version",
];

/// Reserved column names for the collection engine's tables. An
/// `extra_schema` entry may not reuse any of these.
pub const COLLECTION_RESERVED_COLUMNS: &[&str] = &[
    "key",
    "collection_name",
    "item_name",
    "data",
    "value_int",
    "value_float",
    "value_string",
    "timestamp",
    "status",
    "status_int",
    "username",
    "updated_at",
    "version",
];

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn accepts_known_types() {
        let declared = vec![("region".to_string(), "text".to_string())];
        let schema = ExtraSchema::validate(&declared, DATED_RESERVED_COLUMNS).unwrap();
        assert_eq!(schema.columns().len(), 1);
        assert_eq!(schema.columns()[0].physical_type, PhysicalType::Text);
    }

    #[test]
    fn rejects_reserved_name() {
        let declared = vec![("key".to_string(), "text".to_string())];
        let err = ExtraSchema::validate(&declared, DATED_RESERVED_COLUMNS).unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn rejects_reserved_name_case_insensitive() {
        let declared = vec![("KEY".to_string(), "text".to_string())];
        let err = ExtraSchema::validate(&declared, DATED_RESERVED_COLUMNS).unwrap_err();
        assert!(matches!(err, SchemaError::ReservedName { .. }));
    }

    #[test]
    fn rejects_unknown_type() {
        let declared = vec![("region".to_string(), "json".to_string())];
        let err = ExtraSchema::validate(&declared, DATED_RESERVED_COLUMNS).unwrap_err();
        assert!(matches!(err, SchemaError::UnknownType { .. }));
    }

    #[test]
    fn empty_declaration_is_empty_schema() {
        let schema = ExtraSchema::validate(&[], DATED_RESERVED_COLUMNS).unwrap();
        assert!(schema.is_empty());
    }

    #[test]
    fn physical_type_sql_names() {
        assert_eq!(PhysicalType::Text.as_sql(), "TEXT");
        assert_eq!(PhysicalType::BigInt.as_sql(), "BIGINT");
        assert_eq!(PhysicalType::Double.as_sql(), "DOUBLE");
        assert_eq!(PhysicalType::Boolean.as_sql(), "BOOLEAN");
        assert_eq!(PhysicalType::Timestamp.as_sql(), "TIMESTAMP");
    }
}
