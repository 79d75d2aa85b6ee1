//! Relation descriptor registry.
//!
//! Built once per invocation from the store's schema (see [`introspect`]) and
//! queried by type name. Each model lists its hard relations (single-column
//! foreign keys it owns) and its soft relations (reverse foreign keys and
//! many-to-many links through pure link tables).

mod introspect;

pub use introspect::introspect;

use std::collections::{BTreeMap, HashMap};
use std::sync::OnceLock;

use regex::Regex;

use crate::error::{DumpError, Result};

/// Validate an `app_label.model_name` type identifier and normalise it to lower case.
pub fn parse_type_identifier(raw: &str) -> Result<String> {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    let pattern = PATTERN.get_or_init(|| {
        Regex::new(r"^[A-Za-z_][A-Za-z0-9_]*\.[A-Za-z_][A-Za-z0-9_]*$").expect("type identifier pattern")
    });
    if !pattern.is_match(raw.trim()) {
        return Err(DumpError::Usage(format!(
            "object_class must be provided in the following format: app_name.model_name (got '{}')",
            raw
        )));
    }
    Ok(raw.trim().to_lowercase())
}

/// Quote an SQL identifier for SQLite.
pub(crate) fn quote_ident(name: &str) -> String {
    format!("\"{}\"", name.replace('"', "\"\""))
}

/// A column as reported by `PRAGMA table_info`.
#[derive(Debug, Clone, PartialEq)]
pub struct Column {
    pub name: String,
    pub declared_type: String,
    pub not_null: bool,
}

/// Foreign-key style reference owned by a model: `column` points at
/// `target_column` of `target_type`.
#[derive(Debug, Clone, PartialEq)]
pub struct HardRelation {
    pub column: String,
    pub target_type: String,
    pub target_column: String,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoftKind {
    /// Rows of `source_type` whose `source_column` equals this record's `local_column`.
    Reverse {
        source_type: String,
        source_column: String,
        local_column: String,
    },
    /// Rows of the far model joined through a link table.
    ManyToMany {
        through_table: String,
        near_column: String,
        far_column: String,
        local_column: String,
        far_target_column: String,
    },
}

/// Reverse or many-valued relation, followed for reach only.
#[derive(Debug, Clone, PartialEq)]
pub struct SoftRelation {
    pub accessor: String,
    pub target_type: String,
    pub kind: SoftKind,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Model {
    pub type_name: String,
    pub table: String,
    /// Single primary-key column, or `rowid` for tables without one.
    pub pk_column: String,
    pub columns: Vec<Column>,
    pub hard: Vec<HardRelation>,
    pub soft: Vec<SoftRelation>,
    pub natural_key: Option<Vec<String>>,
}

impl Model {
    pub fn has_column(&self, name: &str) -> bool {
        self.columns.iter().any(|c| c.name == name)
    }

    /// The hard relation stored in `column`, if any.
    pub fn hard_relation(&self, column: &str) -> Option<&HardRelation> {
        self.hard.iter().find(|r| r.column == column)
    }

    /// The part after the dot, e.g. `article` for `blog.article`.
    pub fn short_name(&self) -> &str {
        self.type_name
            .split_once('.')
            .map(|(_, m)| m)
            .unwrap_or(&self.type_name)
    }
}

/// Registry of models keyed by type name.
#[derive(Debug, Clone, Default)]
pub struct Schema {
    models: BTreeMap<String, Model>,
    tables: HashMap<String, String>,
}

impl Schema {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, model: Model) {
        self.tables
            .insert(model.table.clone(), model.type_name.clone());
        self.models.insert(model.type_name.clone(), model);
    }

    pub fn get(&self, type_name: &str) -> Option<&Model> {
        self.models.get(type_name)
    }

    pub fn get_mut(&mut self, type_name: &str) -> Option<&mut Model> {
        self.models.get_mut(type_name)
    }

    /// Resolve a type name or fail with [`DumpError::ModelNotFound`].
    pub fn require(&self, type_name: &str) -> Result<&Model> {
        self.get(type_name)
            .ok_or_else(|| DumpError::ModelNotFound(type_name.to_string()))
    }

    pub fn type_for_table(&self, table: &str) -> Option<&str> {
        self.tables.get(table).map(String::as_str)
    }

    /// Models in type-name order.
    pub fn models(&self) -> impl Iterator<Item = &Model> {
        self.models.values()
    }

    pub fn len(&self) -> usize {
        self.models.len()
    }

    pub fn is_empty(&self) -> bool {
        self.models.is_empty()
    }

    /// Attach configured natural keys.
    ///
    /// Types absent from this store are skipped so one config can serve
    /// several databases; unknown columns are a configuration error.
    pub fn apply_natural_keys(&mut self, natural_keys: &HashMap<String, Vec<String>>) -> Result<()> {
        for (type_name, columns) in natural_keys {
            let Some(model) = self.models.get_mut(&type_name.to_lowercase()) else {
                log::warn!("Natural key configured for unknown model {}, ignoring", type_name);
                continue;
            };
            if let Some(missing) = columns.iter().find(|c| !model.has_column(c)) {
                return Err(DumpError::Config(format!(
                    "Natural key column {} does not exist on {}",
                    missing, model.type_name
                )));
            }
            model.natural_key = Some(columns.clone());
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn author() -> Model {
        Model {
            type_name: "blog.author".into(),
            table: "blog_author".into(),
            pk_column: "id".into(),
            columns: vec![
                Column { name: "id".into(), declared_type: "INTEGER".into(), not_null: false },
                Column { name: "name".into(), declared_type: "TEXT".into(), not_null: true },
            ],
            hard: vec![],
            soft: vec![],
            natural_key: None,
        }
    }

    #[test]
    fn test_parse_type_identifier() {
        assert_eq!(parse_type_identifier("Blog.Article").unwrap(), "blog.article");
        assert!(parse_type_identifier("blog").unwrap_err().is_usage());
        assert!(parse_type_identifier("blog.article.extra").unwrap_err().is_usage());
        assert!(parse_type_identifier(".article").unwrap_err().is_usage());
    }

    #[test]
    fn test_parse_type_identifier_shared_across_threads() {
        let handles: Vec<_> = (0..4)
            .map(|i| std::thread::spawn(move || parse_type_identifier(&format!("App{}.Model", i))))
            .collect();
        for (i, handle) in handles.into_iter().enumerate() {
            assert_eq!(handle.join().unwrap().unwrap(), format!("app{}.model", i));
        }
        assert!(parse_type_identifier("not valid").unwrap_err().is_usage());
    }

    #[test]
    fn test_quote_ident() {
        assert_eq!(quote_ident("blog_author"), "\"blog_author\"");
        assert_eq!(quote_ident("we\"ird"), "\"we\"\"ird\"");
    }

    #[test]
    fn test_require_unknown_model() {
        let schema = Schema::new();
        assert!(matches!(
            schema.require("blog.post"),
            Err(DumpError::ModelNotFound(_))
        ));
    }

    #[test]
    fn test_apply_natural_keys() {
        let mut schema = Schema::new();
        schema.insert(author());

        let mut keys = HashMap::new();
        keys.insert("blog.author".to_string(), vec!["name".to_string()]);
        keys.insert("shop.item".to_string(), vec!["sku".to_string()]);
        schema.apply_natural_keys(&keys).unwrap();
        assert_eq!(
            schema.get("blog.author").unwrap().natural_key,
            Some(vec!["name".to_string()])
        );

        let mut bad = HashMap::new();
        bad.insert("blog.author".to_string(), vec!["email".to_string()]);
        assert!(matches!(
            schema.apply_natural_keys(&bad),
            Err(DumpError::Config(_))
        ));
    }

    #[test]
    fn test_type_for_table() {
        let mut schema = Schema::new();
        schema.insert(author());
        assert_eq!(schema.type_for_table("blog_author"), Some("blog.author"));
        assert_eq!(schema.get("blog.author").unwrap().short_name(), "author");
    }
}
