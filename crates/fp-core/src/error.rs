//! Error types shared by the core value/time/schema types.
//!
//! These are the errors that can occur before any I/O is involved —
//! malformed timestamps, schema declaration conflicts. Durability and
//! storage errors live in their own crates and wrap these via `#[from]`
//! where needed.

use thiserror::Error;

/// Errors raised while validating an `extra_schema` declaration.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum SchemaError {
    /// A declared extra column collides with a reserved column name for
    /// the engine variant.
    #[error("extra_schema column {name:?} collides with a reserved column")]
    ReservedName {
        /// The offending column name.
        name: String,
    },

    /// A declared physical type is not in the fixed catalogue.
    #[error("extra_schema column {name:?} has unknown physical type {type_name:?}")]
    UnknownType {
        /// The offending column name.
        name: String,
        /// The unrecognised type string.
        type_name: String,
    },
}
