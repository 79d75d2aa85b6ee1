//! Records and their identity.
//!
//! A [`Record`] is one row pulled from the store. Its [`RecordKey`] is the
//! identity used for deduplication, dependency bookkeeping and tie-breaking.

use std::cmp::Ordering;
use std::fmt;

use serde_json::Value;

/// Scalar identity component.
///
/// Variants are ordered `Null < Int < Text`, which gives every key set a
/// total order independent of where the values came from.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum KeyValue {
    Null,
    Int(i64),
    Text(String),
}

impl KeyValue {
    /// Build a key component from a JSON field value.
    ///
    /// Floats, booleans and nested values are carried as their textual form.
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => KeyValue::Null,
            Value::Number(n) => match n.as_i64() {
                Some(i) => KeyValue::Int(i),
                None => KeyValue::Text(n.to_string()),
            },
            Value::String(s) => KeyValue::Text(s.clone()),
            Value::Bool(b) => KeyValue::Int(i64::from(*b)),
            other => KeyValue::Text(other.to_string()),
        }
    }

    pub fn to_json(&self) -> Value {
        match self {
            KeyValue::Null => Value::Null,
            KeyValue::Int(i) => Value::from(*i),
            KeyValue::Text(s) => Value::String(s.clone()),
        }
    }

    pub fn is_null(&self) -> bool {
        matches!(self, KeyValue::Null)
    }

    /// Parse command-line ids: integers when every id parses, text otherwise.
    pub fn parse_ids(ids: &[String]) -> Vec<KeyValue> {
        let parsed: std::result::Result<Vec<i64>, _> =
            ids.iter().map(|id| id.trim().parse::<i64>()).collect();
        match parsed {
            Ok(ints) => ints.into_iter().map(KeyValue::Int).collect(),
            Err(_) => {
                log::debug!("Primary keys are not all integers, using them as text keys");
                ids.iter().map(|id| KeyValue::Text(id.clone())).collect()
            }
        }
    }
}

impl fmt::Display for KeyValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeyValue::Null => write!(f, "null"),
            KeyValue::Int(i) => write!(f, "{}", i),
            KeyValue::Text(s) => write!(f, "{}", s),
        }
    }
}

impl rusqlite::ToSql for KeyValue {
    fn to_sql(&self) -> rusqlite::Result<rusqlite::types::ToSqlOutput<'_>> {
        use rusqlite::types::{ToSqlOutput, Value as SqlValue, ValueRef};
        Ok(match self {
            KeyValue::Null => ToSqlOutput::Owned(SqlValue::Null),
            KeyValue::Int(i) => ToSqlOutput::Owned(SqlValue::Integer(*i)),
            KeyValue::Text(s) => ToSqlOutput::Borrowed(ValueRef::Text(s.as_bytes())),
        })
    }
}

/// The identity half of a [`RecordKey`].
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Identity {
    Primary(KeyValue),
    Natural(Vec<KeyValue>),
}

/// Which identity a traversal deduplicates on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum KeyMode {
    #[default]
    Primary,
    /// Natural keys where a type declares one, primary keys elsewhere.
    Natural,
}

/// `(type_name, identity)`; equal keys mean the same record.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct RecordKey {
    pub type_name: String,
    pub identity: Identity,
}

impl RecordKey {
    pub fn primary(type_name: impl Into<String>, pk: KeyValue) -> Self {
        Self {
            type_name: type_name.into(),
            identity: Identity::Primary(pk),
        }
    }

    pub fn natural(type_name: impl Into<String>, values: Vec<KeyValue>) -> Self {
        Self {
            type_name: type_name.into(),
            identity: Identity::Natural(values),
        }
    }
}

impl Ord for RecordKey {
    fn cmp(&self, other: &Self) -> Ordering {
        self.type_name
            .cmp(&other.type_name)
            .then_with(|| self.identity.cmp(&other.identity))
    }
}

impl PartialOrd for RecordKey {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.identity {
            Identity::Primary(pk) => write!(f, "{}:{}", self.type_name, pk),
            Identity::Natural(values) => {
                let parts: Vec<String> = values.iter().map(|v| v.to_string()).collect();
                write!(f, "{}:({})", self.type_name, parts.join(","))
            }
        }
    }
}

/// One row of one model.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    pub type_name: String,
    pub pk: KeyValue,
    /// Columns in table order, primary key column included.
    pub fields: Vec<(String, Value)>,
    /// Natural-key tuple, present when the model declares one.
    pub natural_key: Option<Vec<KeyValue>>,
}

impl Record {
    pub fn new(type_name: impl Into<String>, pk: KeyValue) -> Self {
        Self {
            type_name: type_name.into(),
            pk,
            fields: Vec::new(),
            natural_key: None,
        }
    }

    /// Builder-style field setter, mostly for fixtures.
    pub fn with_field(mut self, name: impl Into<String>, value: Value) -> Self {
        self.set_field(name, value);
        self
    }

    pub fn set_field(&mut self, name: impl Into<String>, value: Value) {
        let name = name.into();
        match self.fields.iter_mut().find(|(n, _)| *n == name) {
            Some((_, v)) => *v = value,
            None => self.fields.push((name, value)),
        }
    }

    pub fn field(&self, name: &str) -> Option<&Value> {
        self.fields.iter().find(|(n, _)| n == name).map(|(_, v)| v)
    }

    /// Identity under the given key mode.
    pub fn key(&self, mode: KeyMode) -> RecordKey {
        match (mode, &self.natural_key) {
            (KeyMode::Natural, Some(values)) => {
                RecordKey::natural(self.type_name.clone(), values.clone())
            }
            _ => RecordKey::primary(self.type_name.clone(), self.pk.clone()),
        }
    }
}
