//! Snapshot replay into a SQLite database with foreign keys enforced.

use base64::Engine;
use rusqlite::types::Value as SqlValue;
use rusqlite::{params_from_iter, Connection, OptionalExtension, Transaction};
use serde_json::Value;

use super::SnapshotEntry;
use crate::error::{DumpError, Result};
use crate::schema::{quote_ident, Model, Schema};

/// What a replay did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LoadReport {
    pub inserted: usize,
    pub updated: usize,
}

impl LoadReport {
    pub fn total(&self) -> usize {
        self.inserted + self.updated
    }
}

/// Replay `entries` in order into `conn` inside one transaction, with
/// foreign keys enforced immediately. `schema` must describe the target
/// database, natural keys included.
pub fn load_snapshot(conn: &mut Connection, schema: &Schema, entries: &[SnapshotEntry]) -> Result<LoadReport> {
    // Has no effect once a transaction is open.
    conn.execute_batch("PRAGMA foreign_keys = ON")?;
    let tx = conn.transaction()?;
    let mut report = LoadReport::default();

    for (idx, entry) in entries.iter().enumerate() {
        let model = schema.require(&entry.model.to_lowercase())?;
        let columns = bind_fields(&tx, schema, model, entry)
            .map_err(|e| DumpError::Load(format!("entry {} ({}): {}", idx, entry.model, e)))?;
        let updated = write_entry(&tx, model, entry, columns)
            .map_err(|e| DumpError::Load(format!("entry {} ({}): {}", idx, entry.model, e)))?;
        if updated {
            report.updated += 1;
        } else {
            report.inserted += 1;
        }
    }

    tx.commit()?;
    log::info!(
        "Loaded {} entries ({} inserted, {} updated)",
        report.total(),
        report.inserted,
        report.updated
    );
    Ok(report)
}

/// Convert the entry's fields to SQL values, resolving natural-key references.
fn bind_fields(tx: &Transaction<'_>, schema: &Schema, model: &Model, entry: &SnapshotEntry) -> Result<Vec<(String, SqlValue)>> {
    let mut out = Vec::with_capacity(entry.fields.len());
    for (name, value) in &entry.fields {
        if !model.has_column(name) {
            return Err(DumpError::Load(format!("unknown column {}", name)));
        }
        let bound = match (value, model.hard_relation(name)) {
            (Value::Array(parts), Some(relation)) => {
                let target = schema.require(&relation.target_type)?;
                let nk = target.natural_key.as_ref().ok_or_else(|| {
                    DumpError::Load(format!("{} has no natural key to resolve {}", target.type_name, name))
                })?;
                let values: Vec<SqlValue> = parts.iter().map(|v| to_sql(v, false)).collect::<Result<_>>()?;
                find_by_natural_key(tx, target, nk, &relation.target_column, &values)?.ok_or_else(|| {
                    DumpError::Load(format!("no {} matches natural key {}", target.type_name, value))
                })?
            }
            _ => to_sql(value, is_blob_column(model, name))?,
        };
        out.push((name.clone(), bound));
    }
    Ok(out)
}

/// Insert or update one row. Returns true when an existing row was updated.
fn write_entry(tx: &Transaction<'_>, model: &Model, entry: &SnapshotEntry, columns: Vec<(String, SqlValue)>) -> Result<bool> {
    let existing = match (&entry.pk, &model.natural_key) {
        (Value::Null, Some(nk)) => {
            let mut values = Vec::with_capacity(nk.len());
            for column in nk {
                let value = columns
                    .iter()
                    .find(|(n, _)| n == column)
                    .map(|(_, v)| v.clone())
                    .ok_or_else(|| DumpError::Load(format!("natural key column {} missing", column)))?;
                values.push(value);
            }
            find_by_natural_key(tx, model, nk, &model.pk_column, &values)?
        }
        // Natural mode without a natural key: nothing to match on, so a fresh row.
        (Value::Null, None) => None,
        (pk, _) => {
            let pk = to_sql(pk, false)?;
            let sql = format!(
                "SELECT {pk} FROM {table} WHERE {pk} = ?1",
                pk = pk_column_sql(model),
                table = quote_ident(&model.table)
            );
            tx.query_row(&sql, rusqlite::params![pk], |row| row.get::<_, SqlValue>(0))
                .optional()?
        }
    };

    match existing {
        Some(pk) => {
            if !columns.is_empty() {
                let assignments: Vec<String> = columns
                    .iter()
                    .enumerate()
                    .map(|(i, (n, _))| format!("{} = ?{}", quote_ident(n), i + 1))
                    .collect();
                let sql = format!(
                    "UPDATE {} SET {} WHERE {} = ?{}",
                    quote_ident(&model.table),
                    assignments.join(", "),
                    pk_column_sql(model),
                    columns.len() + 1
                );
                let params = columns.into_iter().map(|(_, v)| v).chain(std::iter::once(pk));
                tx.execute(&sql, params_from_iter(params))?;
            }
            Ok(true)
        }
        None => {
            let mut names: Vec<String> = columns.iter().map(|(n, _)| quote_ident(n)).collect();
            let mut values: Vec<SqlValue> = columns.into_iter().map(|(_, v)| v).collect();
            if !entry.pk.is_null() {
                names.push(pk_column_sql(model));
                values.push(to_sql(&entry.pk, false)?);
            }
            let sql = if names.is_empty() {
                format!("INSERT INTO {} DEFAULT VALUES", quote_ident(&model.table))
            } else {
                let placeholders: Vec<String> = (1..=names.len()).map(|i| format!("?{}", i)).collect();
                format!(
                    "INSERT INTO {} ({}) VALUES ({})",
                    quote_ident(&model.table),
                    names.join(", "),
                    placeholders.join(", ")
                )
            };
            tx.execute(&sql, params_from_iter(values))?;
            Ok(false)
        }
    }
}

/// `select_column` of the row of `model` whose natural-key columns equal `values`.
fn find_by_natural_key(
    tx: &Transaction<'_>,
    model: &Model,
    nk: &[String],
    select_column: &str,
    values: &[SqlValue],
) -> Result<Option<SqlValue>> {
    if nk.len() != values.len() {
        return Err(DumpError::Load(format!(
            "natural key of {} has {} columns, got {} values",
            model.type_name,
            nk.len(),
            values.len()
        )));
    }
    let select = if select_column == "rowid" {
        "rowid".to_string()
    } else {
        quote_ident(select_column)
    };
    let conditions: Vec<String> = nk
        .iter()
        .enumerate()
        .map(|(i, c)| format!("{} IS ?{}", quote_ident(c), i + 1))
        .collect();
    let sql = format!(
        "SELECT {} FROM {} WHERE {} LIMIT 1",
        select,
        quote_ident(&model.table),
        conditions.join(" AND ")
    );
    Ok(tx
        .query_row(&sql, params_from_iter(values.iter()), |row| row.get::<_, SqlValue>(0))
        .optional()?)
}

fn pk_column_sql(model: &Model) -> String {
    if model.pk_column == "rowid" {
        "rowid".to_string()
    } else {
        quote_ident(&model.pk_column)
    }
}

fn is_blob_column(model: &Model, name: &str) -> bool {
    model
        .columns
        .iter()
        .any(|c| c.name == name && c.declared_type.to_uppercase().contains("BLOB"))
}

fn to_sql(value: &Value, blob: bool) -> Result<SqlValue> {
    Ok(match value {
        Value::Null => SqlValue::Null,
        Value::Bool(b) => SqlValue::Integer(i64::from(*b)),
        Value::Number(n) => match (n.as_i64(), n.as_f64()) {
            (Some(i), _) => SqlValue::Integer(i),
            (None, Some(f)) => SqlValue::Real(f),
            (None, None) => SqlValue::Text(n.to_string()),
        },
        Value::String(s) if blob => SqlValue::Blob(
            base64::engine::general_purpose::STANDARD
                .decode(s)
                .map_err(|e| DumpError::Load(format!("invalid base64 blob: {}", e)))?,
        ),
        Value::String(s) => SqlValue::Text(s.clone()),
        other => SqlValue::Text(other.to_string()),
    })
}
