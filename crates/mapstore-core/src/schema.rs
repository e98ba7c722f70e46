//! Schema resolution and the process-wide schema registry.
//!
//! Schemas are computed once per entity type from its static field
//! descriptor and cached for the life of the process. The cache is safe for
//! concurrent readers; writes are serialized on a mutex held only for the
//! lookup-or-insert step, so concurrent resolvers observe either a fully
//! computed schema or none. The cache is never invalidated.

use crate::error::{Error, Result};
use crate::field::FieldInfo;
use crate::model::Model;
use crate::record::Record;
use crate::value::Value;
use std::any::TypeId;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, OnceLock, PoisonError};

/// The resolved column layout of one entity type.
///
/// Immutable once computed; every resolution of the same type returns the
/// same `Arc`.
#[derive(Debug)]
pub struct ModelSchema {
    type_name: &'static str,
    fields: &'static [FieldInfo],
    primary_key: Option<usize>,
}

impl ModelSchema {
    /// Name of the entity type this schema describes.
    pub fn type_name(&self) -> &'static str {
        self.type_name
    }

    /// The ordered field descriptors.
    pub fn fields(&self) -> &'static [FieldInfo] {
        self.fields
    }

    /// The field flagged as primary key, if any.
    pub fn primary_key(&self) -> Option<&'static FieldInfo> {
        self.primary_key.map(|index| &self.fields[index])
    }

    /// Look up a field descriptor by column name.
    pub fn field(&self, column: &str) -> Option<&'static FieldInfo> {
        self.fields.iter().find(|f| f.column_name == column)
    }

    /// Build the record written on insert.
    ///
    /// Fields flagged `omit_when_zero` are dropped while their value is the
    /// zero value, so the backend can assign identifiers and defaults.
    pub fn insert_record<M: Model>(&self, item: &M) -> Record {
        let mut record = Record::with_capacity(self.fields.len());
        for field in self.fields {
            let value = item.get(field.column_name).unwrap_or(Value::Null);
            if field.omit_when_zero && field.is_zero_value(&value) {
                continue;
            }
            record.set(field.column_name, value);
        }
        record
    }

    /// Build the record written on update.
    ///
    /// Same filtering as [`ModelSchema::insert_record`], minus the primary
    /// key: the key addresses the row and is not part of the payload.
    pub fn update_record<M: Model>(&self, item: &M) -> Record {
        let mut record = Record::with_capacity(self.fields.len());
        for field in self.fields {
            if field.primary_key {
                continue;
            }
            let value = item.get(field.column_name).unwrap_or(Value::Null);
            if field.omit_when_zero && field.is_zero_value(&value) {
                continue;
            }
            record.set(field.column_name, value);
        }
        record
    }
}

type SchemaCache = Mutex<HashMap<TypeId, Arc<ModelSchema>>>;

static SCHEMAS: OnceLock<SchemaCache> = OnceLock::new();

fn cache() -> &'static SchemaCache {
    SCHEMAS.get_or_init(|| Mutex::new(HashMap::new()))
}

/// Resolve the schema of an entity type, computing it on first encounter.
///
/// Fails with [`Error::ExpectingStruct`] when the type declares no mapped
/// fields.
pub fn schema_of<M: Model>() -> Result<Arc<ModelSchema>> {
    let type_id = TypeId::of::<M>();

    {
        let guard = cache().lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(schema) = guard.get(&type_id) {
            return Ok(Arc::clone(schema));
        }
    }

    // Computed outside the lock; a racing resolver's copy is discarded in
    // favor of whichever landed first.
    let schema = Arc::new(build_schema::<M>()?);

    let mut guard = cache().lock().unwrap_or_else(PoisonError::into_inner);
    Ok(Arc::clone(guard.entry(type_id).or_insert(schema)))
}

/// Resolve the primary-key value of an entity along with its schema.
///
/// Fails with [`Error::MissingPrimaryKey`] when no field is flagged as the
/// key, and [`Error::ExpectingNonNilValue`] when the entity yields no value
/// for the key column.
pub fn primary_key_of<M: Model>(item: &M) -> Result<(Value, &'static FieldInfo, Arc<ModelSchema>)> {
    let schema = schema_of::<M>()?;
    let field = schema.primary_key().ok_or(Error::MissingPrimaryKey {
        type_name: schema.type_name(),
    })?;
    let value = item
        .get(field.column_name)
        .ok_or(Error::ExpectingNonNilValue)?;
    Ok((value, field, schema))
}

fn build_schema<M: Model>() -> Result<ModelSchema> {
    let type_name = std::any::type_name::<M>();
    let fields = M::fields();
    if fields.is_empty() {
        return Err(Error::ExpectingStruct { type_name });
    }
    // First flagged field wins when more than one carries the flag.
    let primary_key = fields.iter().position(|f| f.primary_key);
    tracing::debug!(
        model = type_name,
        fields = fields.len(),
        has_primary_key = primary_key.is_some(),
        "computed model schema"
    );
    Ok(ModelSchema {
        type_name,
        fields,
        primary_key,
    })
}
