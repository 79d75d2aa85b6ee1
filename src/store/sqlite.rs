//! [`RecordStore`] and [`RelationLookup`] over a SQLite database.

use std::collections::HashMap;

use base64::Engine;
use rusqlite::types::ValueRef;
use rusqlite::{Connection, Row, ToSql};
use serde_json::Value;

use super::{
    attach_natural_key, column_value, relation_model, RecordFilter, RecordStore, RelationError,
    RelationLookup, RelationResult,
};
use crate::cache::RecordCache;
use crate::config::Config;
use crate::db::Db;
use crate::error::Result;
use crate::record::{KeyValue, Record, RecordKey};
use crate::schema::{self, quote_ident, HardRelation, Model, Schema, SoftKind, SoftRelation};

/// Alias under which every query selects the primary key.
const PK_ALIAS: &str = "__fixdump_pk";

pub struct SqliteStore {
    conn: Connection,
    schema: Schema,
    cache: RecordCache,
}

impl SqliteStore {
    /// Open `db` read-only and introspect it with the configured overrides and natural keys.
    pub fn open(db: &Db, config: &Config) -> Result<Self> {
        let conn = db.open_read_only()?;
        let mut schema = schema::introspect(&conn, &config.schema.model_tables)?;
        schema.apply_natural_keys(&config.natural_keys)?;
        log::info!("Loaded {} models from {}", schema.len(), db.path().display());
        Ok(Self::with_schema(conn, schema, config.performance.row_cache_capacity))
    }

    pub fn with_schema(conn: Connection, schema: Schema, cache_capacity: usize) -> Self {
        Self {
            conn,
            schema,
            cache: RecordCache::new(cache_capacity),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    fn pk_expr(model: &Model, table_alias: Option<&str>) -> String {
        let column = if model.pk_column == "rowid" {
            "rowid".to_string()
        } else {
            quote_ident(&model.pk_column)
        };
        match table_alias {
            Some(alias) => format!("{}.{}", alias, column),
            None => column,
        }
    }

    /// Run `SELECT <pk>, * FROM <model> <tail>` and build records.
    fn select(&self, model: &Model, tail: &str, params: &[&dyn ToSql]) -> rusqlite::Result<Vec<Record>> {
        let sql = format!(
            "SELECT {} AS {}, * FROM {} {}",
            Self::pk_expr(model, None),
            PK_ALIAS,
            quote_ident(&model.table),
            tail
        );
        self.query_records(model, &sql, params)
    }

    fn query_records(&self, model: &Model, sql: &str, params: &[&dyn ToSql]) -> rusqlite::Result<Vec<Record>> {
        let mut stmt = self.conn.prepare_cached(sql)?;
        let names: Vec<String> = stmt.column_names().into_iter().map(String::from).collect();
        let mut rows = stmt.query(params)?;
        let mut out = Vec::new();
        while let Some(row) = rows.next()? {
            let record = read_record(model, &names, row)?;
            self.cache.put(
                RecordKey::primary(model.type_name.clone(), record.pk.clone()),
                record.clone(),
            );
            out.push(record);
        }
        Ok(out)
    }
}

fn read_record(model: &Model, names: &[String], row: &Row<'_>) -> rusqlite::Result<Record> {
    let mut record = Record::new(model.type_name.clone(), key_from_ref(row.get_ref(0)?));
    for (idx, name) in names.iter().enumerate().skip(1) {
        record.fields.push((name.clone(), json_from_ref(row.get_ref(idx)?)));
    }
    attach_natural_key(model, &mut record);
    Ok(record)
}

fn json_from_ref(value: ValueRef<'_>) -> Value {
    match value {
        ValueRef::Null => Value::Null,
        ValueRef::Integer(i) => Value::from(i),
        ValueRef::Real(f) => serde_json::Number::from_f64(f)
            .map(Value::Number)
            .unwrap_or(Value::Null),
        ValueRef::Text(bytes) => Value::String(String::from_utf8_lossy(bytes).into_owned()),
        ValueRef::Blob(bytes) => Value::String(base64::engine::general_purpose::STANDARD.encode(bytes)),
    }
}

fn key_from_ref(value: ValueRef<'_>) -> KeyValue {
    match value {
        ValueRef::Null => KeyValue::Null,
        ValueRef::Integer(i) => KeyValue::Int(i),
        other => KeyValue::from_json(&json_from_ref(other)),
    }
}

fn limit_param(limit: Option<usize>) -> i64 {
    // SQLite treats a negative LIMIT as unbounded.
    limit.map(|n| n as i64).unwrap_or(-1)
}

impl RecordStore for SqliteStore {
    fn find_by_type(&self, type_name: &str, filter: &RecordFilter) -> Result<Vec<Record>> {
        let model = self.schema.require(type_name)?;
        let records = match filter.sample {
            Some(n) => {
                let limit = n as i64;
                self.select(model, "ORDER BY RANDOM() LIMIT ?1", &[&limit])?
            }
            None => self.select(model, &format!("ORDER BY {}", Self::pk_expr(model, None)), &[])?,
        };
        Ok(records)
    }

    fn find_by_type_and_keys(&self, type_name: &str, keys: &[KeyValue]) -> Result<Vec<Record>> {
        let model = self.schema.require(type_name)?;
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let placeholders = (1..=keys.len()).map(|i| format!("?{}", i)).collect::<Vec<_>>().join(",");
        let tail = format!("WHERE {} IN ({})", Self::pk_expr(model, None), placeholders);
        let params: Vec<&dyn ToSql> = keys.iter().map(|k| k as &dyn ToSql).collect();
        let rows = self.select(model, &tail, &params)?;

        // Keep the caller's key order; compare textually so "1" finds 1.
        let mut by_pk: HashMap<String, Record> =
            rows.into_iter().map(|r| (r.pk.to_string(), r)).collect();
        Ok(keys.iter().filter_map(|k| by_pk.remove(&k.to_string())).collect())
    }
}

impl RelationLookup for SqliteStore {
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

        let by_pk = relation.target_column == target.pk_column;
        if by_pk {
            let key = RecordKey::primary(target.type_name.clone(), value.clone());
            if let Some(hit) = self.cache.get(&key) {
                return Ok(Some(hit));
            }
        }

        let column = if by_pk {
            Self::pk_expr(target, None)
        } else {
            quote_ident(&relation.target_column)
        };
        let rows = self
            .select(target, &format!("WHERE {} = ?1 LIMIT 1", column), &[&value])
            .map_err(|e| RelationError::Store(e.to_string()))?;

        match rows.into_iter().next() {
            Some(found) => Ok(Some(found)),
            None => Err(RelationError::TargetMissing(format!("{}:{}", target.type_name, value))),
        }
    }

    fn resolve_soft(
        &self,
        record: &Record,
        relation: &SoftRelation,
        limit: Option<usize>,
    ) -> RelationResult<Vec<Record>> {
        let near = relation_model(&self.schema, &record.type_name, &relation.accessor)?;
        let far = relation_model(&self.schema, &relation.target_type, &relation.accessor)?;
        let limit = limit_param(limit);

        let rows = match &relation.kind {
            SoftKind::Reverse { source_column, local_column, .. } => {
                let Some(value) = column_value(near, record, local_column).filter(|v| !v.is_null()) else {
                    return Ok(Vec::new());
                };
                let tail = format!(
                    "WHERE {} = ?1 ORDER BY {} LIMIT ?2",
                    quote_ident(source_column),
                    Self::pk_expr(far, None)
                );
                self.select(far, &tail, &[&value, &limit])
            }
            SoftKind::ManyToMany {
                through_table,
                near_column,
                far_column,
                local_column,
                far_target_column,
            } => {
                let Some(value) = column_value(near, record, local_column).filter(|v| !v.is_null()) else {
                    return Ok(Vec::new());
                };
                let far_join = if *far_target_column == far.pk_column {
                    Self::pk_expr(far, Some("f"))
                } else {
                    format!("f.{}", quote_ident(far_target_column))
                };
                let sql = format!(
                    "SELECT DISTINCT {pk} AS {alias}, f.* FROM {far} AS f \
                     JOIN {link} AS l ON {far_join} = l.{fc} \
                     WHERE l.{nc} = ?1 ORDER BY {pk} LIMIT ?2",
                    pk = Self::pk_expr(far, Some("f")),
                    alias = PK_ALIAS,
                    far = quote_ident(&far.table),
                    link = quote_ident(through_table),
                    far_join = far_join,
                    fc = quote_ident(far_column),
                    nc = quote_ident(near_column),
                );
                self.query_records(far, &sql, &[&value, &limit])
            }
        };

        rows.map_err(|e| RelationError::Store(e.to_string()))
    }
}
