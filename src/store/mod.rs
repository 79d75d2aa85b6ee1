//! Record store and relation lookup seams.
//!
//! The traversal engine only talks to [`RelationLookup`]; seed loading only
//! talks to [`RecordStore`]. [`SqliteStore`] implements both over a live
//! database, [`MemoryStore`] over rows held in memory.

mod memory;
mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use thiserror::Error;

use crate::error::Result;
use crate::record::{KeyValue, Record};
use crate::schema::{HardRelation, Model, Schema, SoftRelation};

/// Narrows `find_by_type`.
#[derive(Debug, Clone, Default)]
pub struct RecordFilter {
    /// Return at most this many rows, chosen at random.
    pub sample: Option<usize>,
}

/// Why a relation yielded nothing. Always recoverable.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum RelationError {
    #[error("relation {0} does not apply")]
    NotApplicable(String),

    #[error("related record {0} does not exist")]
    TargetMissing(String),

    #[error("store failure while resolving relation: {0}")]
    Store(String),
}

pub type RelationResult<T> = std::result::Result<T, RelationError>;

/// Query interface over stored records.
pub trait RecordStore {
    /// All rows of a type (pk order), or a random sample of them.
    fn find_by_type(&self, type_name: &str, filter: &RecordFilter) -> Result<Vec<Record>>;

    /// Rows with the given primary keys, in the order the keys were given.
    /// Keys with no row are silently absent.
    fn find_by_type_and_keys(&self, type_name: &str, keys: &[KeyValue]) -> Result<Vec<Record>>;
}

/// Relation descriptors plus their resolution against concrete records.
pub trait RelationLookup {
    fn schema(&self) -> &Schema;

    fn hard_relations(&self, type_name: &str) -> &[HardRelation] {
        self.schema()
            .get(type_name)
            .map(|m| m.hard.as_slice())
            .unwrap_or(&[])
    }

    fn soft_relations(&self, type_name: &str) -> &[SoftRelation] {
        self.schema()
            .get(type_name)
            .map(|m| m.soft.as_slice())
            .unwrap_or(&[])
    }

    /// Follow a foreign key. `Ok(None)` when the column is null.
    fn resolve_hard(&self, record: &Record, relation: &HardRelation) -> RelationResult<Option<Record>>;

    /// Follow a reverse or many-to-many relation, returning at most `limit` rows.
    fn resolve_soft(
        &self,
        record: &Record,
        relation: &SoftRelation,
        limit: Option<usize>,
    ) -> RelationResult<Vec<Record>>;
}

/// Value of `column` on `record`, treating the model's pk column specially
/// since rowid tables do not carry it among their fields.
pub(crate) fn column_value(model: &Model, record: &Record, column: &str) -> Option<KeyValue> {
    if column == model.pk_column {
        return Some(record.pk.clone());
    }
    record.field(column).map(KeyValue::from_json)
}

/// Fill in the natural-key tuple declared by `model`.
pub(crate) fn attach_natural_key(model: &Model, record: &mut Record) {
    record.natural_key = model.natural_key.as_ref().map(|columns| {
        columns
            .iter()
            .map(|c| column_value(model, record, c).unwrap_or(KeyValue::Null))
            .collect()
    });
}

/// Lookup model for a relation, or `NotApplicable`.
pub(crate) fn relation_model<'a>(schema: &'a Schema, type_name: &str, relation: &str) -> RelationResult<&'a Model> {
    schema
        .get(type_name)
        .ok_or_else(|| RelationError::NotApplicable(format!("{} on {}", relation, type_name)))
}
