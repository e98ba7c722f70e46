//! Model trait for entity-to-record mapping.
//!
//! The `Model` trait is the minimal capability an entity needs to be
//! persisted: it declares its collection name and a static column
//! descriptor, and it can move its state in and out of a [`Record`].
//! Lifecycle hooks live in a separate trait in the session crate so that
//! entities only opt into the hooks they care about.

use crate::Result;
use crate::field::FieldInfo;
use crate::record::Record;
use crate::value::Value;

/// Capability trait for types persisted under a backend collection.
///
/// Implementations supply an explicit field descriptor instead of relying
/// on runtime reflection; the schema registry consumes `fields()` once per
/// type and caches the result for the life of the process.
///
/// # Example
///
/// ```
/// use mapstore_core::{FieldInfo, FieldType, Model, Record, Result, Value};
///
/// struct Account {
///     id: i64,
///     name: String,
/// }
///
/// impl Model for Account {
///     fn collection_name(&self) -> &str {
///         "accounts"
///     }
///
///     fn fields() -> &'static [FieldInfo] {
///         static FIELDS: &[FieldInfo] = &[
///             FieldInfo::new("id", "id", FieldType::Int)
///                 .primary_key(true)
///                 .omit_when_zero(true),
///             FieldInfo::new("name", "name", FieldType::Text),
///         ];
///         FIELDS
///     }
///
///     fn to_record(&self) -> Record {
///         let mut record = Record::with_capacity(2);
///         record.set("id", self.id);
///         record.set("name", self.name.clone());
///         record
///     }
///
///     fn from_record(record: &Record) -> Result<Self> {
///         Ok(Self {
///             id: record.get("id").and_then(Value::as_i64).unwrap_or_default(),
///             name: record
///                 .get("name")
///                 .and_then(Value::as_str)
///                 .unwrap_or_default()
///                 .to_string(),
///         })
///     }
///
///     fn set(&mut self, column: &str, value: Value) {
///         match column {
///             "id" => self.id = value.as_i64().unwrap_or_default(),
///             "name" => {
///                 if let Value::Text(name) = value {
///                     self.name = name;
///                 }
///             }
///             _ => {}
///         }
///     }
/// }
/// ```
pub trait Model: Send + 'static {
    /// Name of the backend collection this entity persists under.
    fn collection_name(&self) -> &str;

    /// Static column descriptor for this type.
    fn fields() -> &'static [FieldInfo]
    where
        Self: Sized;

    /// Snapshot the entity as a record of column values.
    fn to_record(&self) -> Record;

    /// Rebuild an entity from a backend record.
    fn from_record(record: &Record) -> Result<Self>
    where
        Self: Sized;

    /// Current value of one column, by column name.
    ///
    /// Returns `None` when the column is not mapped by this entity. The
    /// default implementation reads from [`Model::to_record`].
    fn get(&self, column: &str) -> Option<Value> {
        self.to_record().get(column).cloned()
    }

    /// Write one column value back into the entity.
    ///
    /// Used by the store to assign the backend-returned identifier to the
    /// primary-key field after a create. Implementations must accept every
    /// column listed in `fields()` and ignore unknown columns.
    fn set(&mut self, column: &str, value: Value);
}
