//! Records to snapshot entries, optionally keyed by natural key.

use std::collections::HashMap;

use serde_json::{Map, Value};

use super::SnapshotEntry;
use crate::record::{KeyValue, Record};
use crate::schema::{HardRelation, Model};
use crate::store::RelationLookup;

#[derive(Debug, Clone, Copy, Default)]
pub struct EmitOptions {
    /// Null every `pk` and point foreign keys at natural keys where the target declares one.
    pub natural: bool,
}

/// Serialize `records` in the given order.
///
/// The primary-key column is carried in `pk`, not repeated in `fields`. In
/// natural mode every entry gets a null `pk`, and foreign keys pointing at
/// natural-keyed types become the target's key tuple.
pub fn emit<L>(records: &[Record], lookup: &L, options: &EmitOptions) -> Vec<SnapshotEntry>
where
    L: RelationLookup + ?Sized,
{
    let known: HashMap<(String, KeyValue), &[KeyValue]> = if options.natural {
        records
            .iter()
            .filter_map(|r| {
                r.natural_key
                    .as_deref()
                    .map(|nk| ((r.type_name.clone(), r.pk.clone()), nk))
            })
            .collect()
    } else {
        HashMap::new()
    };

    records
        .iter()
        .map(|record| {
            let model = lookup.schema().get(&record.type_name);
            let mut fields = Map::new();
            for (name, value) in &record.fields {
                if model.is_some_and(|m| m.pk_column == *name) {
                    continue;
                }
                let value = match model.and_then(|m| m.hard_relation(name)) {
                    Some(relation) if options.natural => {
                        natural_reference(lookup, &known, record, relation).unwrap_or_else(|| value.clone())
                    }
                    _ => value.clone(),
                };
                fields.insert(name.clone(), value);
            }

            let pk = if options.natural {
                Value::Null
            } else {
                record.pk.to_json()
            };

            SnapshotEntry {
                model: record.type_name.clone(),
                pk,
                fields,
            }
        })
        .collect()
}

/// The natural-key tuple of the record `relation` points at, if it has one.
fn natural_reference<L>(
    lookup: &L,
    known: &HashMap<(String, KeyValue), &[KeyValue]>,
    record: &Record,
    relation: &HardRelation,
) -> Option<Value>
where
    L: RelationLookup + ?Sized,
{
    let target: &Model = lookup.schema().get(&relation.target_type)?;
    target.natural_key.as_ref()?;

    let raw = KeyValue::from_json(record.field(&relation.column)?);
    if raw.is_null() {
        return None;
    }

    if target.pk_column == relation.target_column {
        if let Some(values) = known.get(&(relation.target_type.clone(), raw)) {
            return Some(to_array(values));
        }
    }

    match lookup.resolve_hard(record, relation) {
        Ok(Some(found)) => found.natural_key.as_deref().map(to_array),
        Ok(None) => None,
        Err(e) => {
            log::debug!("Keeping raw {} on {}: {}", relation.column, record.type_name, e);
            None
        }
    }
}

fn to_array(values: &[KeyValue]) -> Value {
    Value::Array(values.iter().map(KeyValue::to_json).collect())
}
