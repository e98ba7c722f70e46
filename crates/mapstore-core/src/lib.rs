//! Core types and traits for mapstore.
//!
//! This crate provides the foundational abstractions of the data mapper:
//!
//! - `Model` trait for entity-to-record mapping
//! - `FieldInfo` descriptors and the process-wide schema registry
//! - `Value`/`Record` dynamic values exchanged with the backend
//! - The backend contract traits (`Backend`, `Transaction`, `Collection`,
//!   `QueryHandle`) and the opaque forwarded `Context`

pub mod backend;
pub mod error;
pub mod field;
pub mod model;
pub mod record;
pub mod schema;
pub mod value;

pub use backend::{
    Backend, CmpOp, Collection, Cond, Context, Order, OrderDirection, QueryHandle, Transaction,
};
pub use error::{BackendError, BackendErrorKind, Error, Result};
pub use field::{FieldInfo, FieldType};
pub use model::Model;
pub use record::Record;
pub use schema::{ModelSchema, primary_key_of, schema_of};
pub use value::Value;
