//! Core types shared by the durability, store, and engine layers:
//! timestamps and cohort dates, the value shapes stored by each engine
//! variant, identity keys, and `extra_schema` validation.
//!
//! Nothing in this crate touches a filesystem or a database — it is
//! the vocabulary the rest of the workspace is built from.

pub mod error;
pub mod identity;
pub mod payload;
pub mod schema;
pub mod time;

pub use error::SchemaError;
pub use identity::{CollectionIdentity, DatedIdentity};
pub use payload::{Payload, ScalarValue};
pub use schema::{
    ExtraColumn, ExtraSchema, PhysicalType, COLLECTION_RESERVED_COLUMNS, DATED_RESERVED_COLUMNS,
};
pub use time::{now, normalize_cohort, parse_timestamp, serialize_timestamp, CohortSource, Instant};
