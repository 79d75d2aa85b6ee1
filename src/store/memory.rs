//! In-memory store.
//!
//! Rows are held per type in primary-key order. Useful for driving the
//! traversal engine without a database file; `find_by_type` samples are the
//! first `n` rows rather than random ones so results stay reproducible.

use std::collections::BTreeMap;

use super::{
    attach_natural_key, column_value, relation_model, RecordFilter, RecordStore, RelationError,
    RelationLookup, RelationResult,
};
use crate::error::Result;
use crate::record::{KeyValue, Record};
use crate::schema::{HardRelation, Model, Schema, SoftKind, SoftRelation};

/// A full [`RecordStore`] and [`RelationLookup`] backend over rows supplied
/// by the caller, for sources that are not a SQLite file.
pub struct MemoryStore {
    schema: Schema,
    rows: BTreeMap<String, BTreeMap<KeyValue, Record>>,
}

impl MemoryStore {
    pub fn new(schema: Schema) -> Self {
        Self {
            schema,
            rows: BTreeMap::new(),
        }
    }

    /// Add or replace a row. The type must exist in the schema.
    pub fn insert(&mut self, mut record: Record) -> Result<()> {
        let model = self.schema.require(&record.type_name)?;
        attach_natural_key(model, &mut record);
        self.rows
            .entry(record.type_name.clone())
            .or_default()
            .insert(record.pk.clone(), record);
        Ok(())
    }

    fn rows_of(&self, type_name: &str) -> impl Iterator<Item = &Record> {
        self.rows.get(type_name).into_iter().flat_map(|rows| rows.values())
    }

    /// Rows of `model` whose `column` equals `value`, in pk order.
    fn matching<'a>(&'a self, model: &'a Model, column: &'a str, value: &'a KeyValue) -> impl Iterator<Item = &'a Record> + 'a {
        self.rows_of(&model.type_name)
            .filter(move |r| column_value(model, r, column).as_ref() == Some(value))
    }
}

impl RecordStore for MemoryStore {
    fn find_by_type(&self, type_name: &str, filter: &RecordFilter) -> Result<Vec<Record>> {
        self.schema.require(type_name)?;
        let take = filter.sample.unwrap_or(usize::MAX);
        Ok(self.rows_of(type_name).take(take).cloned().collect())
    }

    fn find_by_type_and_keys(&self, type_name: &str, keys: &[KeyValue]) -> Result<Vec<Record>> {
        self.schema.require(type_name)?;
        let Some(rows) = self.rows.get(type_name) else {
            return Ok(Vec::new());
        };
        Ok(keys.iter().filter_map(|k| rows.get(k)).cloned().collect())
    }
}

impl RelationLookup for MemoryStore {
    fn schema(&self) -> &Schema {
        &self.schema
    }

    fn resolve_hard(&self, record: &Record, relation: &HardRelation) -> RelationResult<Option<Record>> {
        let source = relation_model(&self.schema, &record.type_name, &relation.column)?;
        let target = relation_model(&self.schema, &relation.target_type, &relation.column)?;
        let value = column_value(source, record, &relation.column)
            .ok_or_else(|| RelationError::NotApplicable(format!("{} on {}", relation.column, record.type_name)))?;
        if value.is_null() {
            return Ok(None);
        }
        let found = self.matching(target, &relation.target_column, &value).next().cloned();
        found
            .map(Some)
            .ok_or_else(|| RelationError::TargetMissing(format!("{}:{}", target.type_name, value)))
    }

    fn resolve_soft(
        &self,
        record: &Record,
        relation: &SoftRelation,
        limit: Option<usize>,
    ) -> RelationResult<Vec<Record>> {
        let near = relation_model(&self.schema, &record.type_name, &relation.accessor)?;
        let far = relation_model(&self.schema, &relation.target_type, &relation.accessor)?;
        let limit = limit.unwrap_or(usize::MAX);

        match &relation.kind {
            SoftKind::Reverse { source_column, local_column, .. } => {
                let Some(value) = column_value(near, record, local_column).filter(|v| !v.is_null()) else {
                    return Ok(Vec::new());
                };
                Ok(self.matching(far, source_column, &value).take(limit).cloned().collect())
            }
            SoftKind::ManyToMany {
                through_table,
                near_column,
                far_column,
                local_column,
                far_target_column,
            } => {
                let through = self
                    .schema
                    .type_for_table(through_table)
                    .and_then(|t| self.schema.get(t))
                    .ok_or_else(|| RelationError::NotApplicable(relation.accessor.clone()))?;
                let Some(value) = column_value(near, record, local_column).filter(|v| !v.is_null()) else {
                    return Ok(Vec::new());
                };

                let mut found: BTreeMap<KeyValue, Record> = BTreeMap::new();
                for link in self.matching(through, near_column, &value) {
                    let Some(far_value) = column_value(through, link, far_column) else {
                        continue;
                    };
                    for row in self.matching(far, far_target_column, &far_value) {
                        found.insert(row.pk.clone(), row.clone());
                    }
                }
                Ok(found.into_values().take(limit).collect())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::schema::introspect;
    use rusqlite::Connection;
    use serde_json::json;
    use std::collections::HashMap;

    fn store() -> MemoryStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE blog_author (id INTEGER PRIMARY KEY, name TEXT);
             CREATE TABLE blog_article (id INTEGER PRIMARY KEY, author_id INTEGER REFERENCES blog_author(id));
             CREATE TABLE blog_tag (id INTEGER PRIMARY KEY);
             CREATE TABLE blog_article_tags (
                 id INTEGER PRIMARY KEY,
                 article_id INTEGER REFERENCES blog_article(id),
                 tag_id INTEGER REFERENCES blog_tag(id)
             );",
        )
        .unwrap();
        let mut store = MemoryStore::new(introspect(&conn, &HashMap::new()).unwrap());
        store
            .insert(Record::new("blog.author", KeyValue::Int(1)).with_field("id", json!(1)))
            .unwrap();
        for (id, author) in [(10, json!(1)), (20, json!(1)), (30, json!(7))] {
            store
                .insert(
                    Record::new("blog.article", KeyValue::Int(id))
                        .with_field("id", json!(id))
                        .with_field("author_id", author),
                )
                .unwrap();
        }
        for id in [5, 6] {
            store
                .insert(Record::new("blog.tag", KeyValue::Int(id)).with_field("id", json!(id)))
                .unwrap();
        }
        for (id, article, tag) in [(1, 10, 6), (2, 10, 5)] {
            store
                .insert(
                    Record::new("blog.article_tags", KeyValue::Int(id))
                        .with_field("id", json!(id))
                        .with_field("article_id", json!(article))
                        .with_field("tag_id", json!(tag)),
                )
                .unwrap();
        }
        store
    }

    #[test]
    fn test_insert_unknown_type() {
        let mut store = store();
        assert!(store.insert(Record::new("shop.item", KeyValue::Int(1))).is_err());
    }

    #[test]
    fn test_find_by_type_and_sample() {
        let store = store();
        assert_eq!(store.find_by_type("blog.article", &RecordFilter::default()).unwrap().len(), 3);
        let sample = store
            .find_by_type("blog.article", &RecordFilter { sample: Some(2) })
            .unwrap();
        assert_eq!(sample.len(), 2);
        assert_eq!(sample[0].pk, KeyValue::Int(10));
    }

    #[test]
    fn test_resolve_hard_and_dangling() {
        let store = store();
        let relation = store.hard_relations("blog.article")[0].clone();
        let rows = store
            .find_by_type_and_keys("blog.article", &[KeyValue::Int(10), KeyValue::Int(30)])
            .unwrap();
        assert_eq!(store.resolve_hard(&rows[0], &relation).unwrap().unwrap().pk, KeyValue::Int(1));
        assert!(matches!(
            store.resolve_hard(&rows[1], &relation),
            Err(RelationError::TargetMissing(_))
        ));
    }

    #[test]
    fn test_resolve_reverse_and_m2m() {
        let store = store();
        let author = store.find_by_type_and_keys("blog.author", &[KeyValue::Int(1)]).unwrap().remove(0);
        let reverse = store.soft_relations("blog.author")[0].clone();
        assert_eq!(store.resolve_soft(&author, &reverse, Some(1)).unwrap().len(), 1);
        assert_eq!(store.resolve_soft(&author, &reverse, None).unwrap().len(), 2);

        let article = store.find_by_type_and_keys("blog.article", &[KeyValue::Int(10)]).unwrap().remove(0);
        let m2m = store
            .soft_relations("blog.article")
            .iter()
            .find(|s| matches!(s.kind, SoftKind::ManyToMany { .. }))
            .unwrap()
            .clone();
        let tags: Vec<KeyValue> = store
            .resolve_soft(&article, &m2m, None)
            .unwrap()
            .into_iter()
            .map(|r| r.pk)
            .collect();
        assert_eq!(tags, vec![KeyValue::Int(5), KeyValue::Int(6)]);
    }
}
