//! Column/value records exchanged with the backend.

use crate::value::Value;
use serde::{Deserialize, Serialize};

/// An ordered set of named column values.
///
/// Records are what the mapper hands to the backend on insert/update and
/// what the backend hands back on reads. Column order follows the entity's
/// declared field order; names are unique.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Record {
    entries: Vec<(String, Value)>,
}

impl Record {
    /// Create an empty record.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Create an empty record with room for `capacity` columns.
    #[must_use]
    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            entries: Vec::with_capacity(capacity),
        }
    }

    /// Number of columns in this record.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// Check if this record has no columns.
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Get a value by column name.
    pub fn get(&self, column: &str) -> Option<&Value> {
        self.entries
            .iter()
            .find(|(name, _)| name == column)
            .map(|(_, value)| value)
    }

    /// Check if a column exists.
    pub fn contains_column(&self, column: &str) -> bool {
        self.entries.iter().any(|(name, _)| name == column)
    }

    /// Set a column value, replacing any existing value under that name.
    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        let column = column.into();
        let value = value.into();
        match self.entries.iter_mut().find(|(name, _)| *name == column) {
            Some(entry) => entry.1 = value,
            None => self.entries.push((column, value)),
        }
    }

    /// Remove a column, returning its value if it was present.
    pub fn remove(&mut self, column: &str) -> Option<Value> {
        let index = self.entries.iter().position(|(name, _)| name == column)?;
        Some(self.entries.remove(index).1)
    }

    /// Merge another record into this one, overwriting shared columns.
    pub fn merge(&mut self, other: &Record) {
        for (column, value) in &other.entries {
            self.set(column.clone(), value.clone());
        }
    }

    /// Keep only the listed columns, in their current order.
    pub fn project(&mut self, columns: &[String]) {
        self.entries.retain(|(name, _)| columns.iter().any(|c| c == name));
    }

    /// Column names in order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(name, _)| name.as_str())
    }

    /// Iterate over `(column, value)` pairs in order.
    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries
            .iter()
            .map(|(name, value)| (name.as_str(), value))
    }
}

impl FromIterator<(String, Value)> for Record {
    fn from_iter<I: IntoIterator<Item = (String, Value)>>(iter: I) -> Self {
        let mut record = Record::new();
        for (column, value) in iter {
            record.set(column, value);
        }
        record
    }
}

impl IntoIterator for Record {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.entries.into_iter()
    }
}
