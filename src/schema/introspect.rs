//! Build the relation descriptor registry from SQLite's own catalog.

use std::collections::{BTreeMap, HashMap, HashSet};

use rusqlite::Connection;

use super::{quote_ident, Column, HardRelation, Model, Schema, SoftKind, SoftRelation};
use crate::error::Result;

/// Tables owned by fixdump itself, never treated as models.
const INTERNAL_TABLES: &[&str] = &["schema_migrations"];

/// Raw single-column foreign key from `PRAGMA foreign_key_list`.
struct ForeignKey {
    column: String,
    target_table: String,
    target_column: Option<String>,
}

/// Introspect every user table of `conn` into a [`Schema`].
///
/// `model_tables` maps type names to table names for tables whose names do
/// not follow the `app_model` convention.
pub fn introspect(conn: &Connection, model_tables: &HashMap<String, String>) -> Result<Schema> {
    let table_overrides: HashMap<&str, String> = model_tables
        .iter()
        .map(|(type_name, table)| (table.as_str(), type_name.to_lowercase()))
        .collect();

    let mut stmt = conn.prepare(
        "SELECT name FROM sqlite_master WHERE type = 'table' AND name NOT LIKE 'sqlite_%' ORDER BY name",
    )?;
    let tables: Vec<String> = stmt
        .query_map([], |row| row.get::<_, String>(0))?
        .collect::<std::result::Result<Vec<_>, rusqlite::Error>>()?;

    let mut schema = Schema::new();
    let mut foreign_keys: BTreeMap<String, Vec<ForeignKey>> = BTreeMap::new();

    for table in tables.iter().filter(|t| !INTERNAL_TABLES.contains(&t.as_str())) {
        let (columns, pk_columns) = table_columns(conn, table)?;
        let pk_column = match pk_columns.as_slice() {
            [single] => single.clone(),
            _ => "rowid".to_string(),
        };
        let type_name = table_overrides
            .get(table.as_str())
            .cloned()
            .unwrap_or_else(|| type_name_for_table(table));

        schema.insert(Model {
            type_name,
            table: table.clone(),
            pk_column,
            columns,
            hard: Vec::new(),
            soft: Vec::new(),
            natural_key: None,
        });
        foreign_keys.insert(table.clone(), table_foreign_keys(conn, table)?);
    }

    // Hard relations first; soft relations are derived from them.
    let mut resolved: Vec<(String, HardRelation)> = Vec::new();
    for (table, fks) in &foreign_keys {
        let Some(source_type) = schema.type_for_table(table).map(str::to_string) else {
            continue;
        };
        for fk in fks {
            let Some(target) = schema
                .type_for_table(&fk.target_table)
                .and_then(|t| schema.get(t))
            else {
                log::warn!(
                    "{}.{} references unknown table {}, ignoring",
                    table,
                    fk.column,
                    fk.target_table
                );
                continue;
            };
            let relation = HardRelation {
                column: fk.column.clone(),
                target_type: target.type_name.clone(),
                target_column: fk
                    .target_column
                    .clone()
                    .unwrap_or_else(|| target.pk_column.clone()),
            };
            resolved.push((source_type.clone(), relation));
        }
    }

    for (source_type, relation) in &resolved {
        if let Some(model) = schema.get_mut(source_type) {
            model.hard.push(relation.clone());
        }
    }

    add_reverse_relations(&mut schema, &resolved);
    add_many_to_many_relations(&mut schema);

    log::debug!("Introspected {} models", schema.len());
    Ok(schema)
}

/// `blog_article` → `blog.article`; tables without an underscore land in `main`.
fn type_name_for_table(table: &str) -> String {
    match table.split_once('_') {
        Some((app, model)) if !app.is_empty() && !model.is_empty() => {
            format!("{}.{}", app, model).to_lowercase()
        }
        _ => format!("main.{}", table).to_lowercase(),
    }
}

fn table_columns(conn: &Connection, table: &str) -> Result<(Vec<Column>, Vec<String>)> {
    let mut stmt = conn.prepare(&format!("PRAGMA table_info({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut columns = Vec::new();
    let mut pk: Vec<(i64, String)> = Vec::new();
    while let Some(row) = rows.next()? {
        let name: String = row.get(1)?;
        let declared_type: String = row.get::<_, Option<String>>(2)?.unwrap_or_default();
        let not_null: bool = row.get::<_, i64>(3)? != 0;
        let pk_position: i64 = row.get(5)?;
        if pk_position > 0 {
            pk.push((pk_position, name.clone()));
        }
        columns.push(Column {
            name,
            declared_type,
            not_null,
        });
    }
    pk.sort();
    Ok((columns, pk.into_iter().map(|(_, name)| name).collect()))
}

fn table_foreign_keys(conn: &Connection, table: &str) -> Result<Vec<ForeignKey>> {
    let mut stmt = conn.prepare(&format!("PRAGMA foreign_key_list({})", quote_ident(table)))?;
    let mut rows = stmt.query([])?;
    let mut grouped: BTreeMap<i64, Vec<ForeignKey>> = BTreeMap::new();
    while let Some(row) = rows.next()? {
        let id: i64 = row.get(0)?;
        grouped.entry(id).or_default().push(ForeignKey {
            target_table: row.get(2)?,
            column: row.get(3)?,
            target_column: row.get(4)?,
        });
    }

    let mut out = Vec::new();
    for (_, mut parts) in grouped {
        if parts.len() != 1 {
            log::debug!("Skipping composite foreign key on {}", table);
            continue;
        }
        out.extend(parts.pop());
    }
    out.sort_by(|a, b| a.column.cmp(&b.column));
    Ok(out)
}

fn unique_accessor(taken: &HashSet<String>, base: String, fallback: String) -> String {
    if taken.contains(&base) {
        fallback
    } else {
        base
    }
}

fn add_reverse_relations(schema: &mut Schema, resolved: &[(String, HardRelation)]) {
    // Sources referencing the same target more than once get column-qualified accessors.
    let mut fan_in: HashMap<(&str, &str), usize> = HashMap::new();
    for (source, relation) in resolved {
        *fan_in
            .entry((source.as_str(), relation.target_type.as_str()))
            .or_default() += 1;
    }

    for (source_type, relation) in resolved {
        let Some(source_short) = schema.get(source_type).map(|m| m.short_name().to_string()) else {
            continue;
        };
        let Some(target) = schema.get_mut(&relation.target_type) else {
            continue;
        };
        let base = format!("{}_set", source_short);
        let qualified = format!("{}_set_by_{}", source_short, relation.column);
        let accessor = if fan_in[&(source_type.as_str(), relation.target_type.as_str())] > 1 {
            qualified
        } else {
            let taken: HashSet<String> = target.soft.iter().map(|s| s.accessor.clone()).collect();
            unique_accessor(&taken, base, qualified)
        };
        target.soft.push(SoftRelation {
            accessor,
            target_type: source_type.clone(),
            kind: SoftKind::Reverse {
                source_type: source_type.clone(),
                source_column: relation.column.clone(),
                local_column: relation.target_column.clone(),
            },
        });
    }
}

/// A link table has exactly two hard relations and no columns besides them and its pk.
fn link_ends(model: &Model) -> Option<(&HardRelation, &HardRelation)> {
    let [a, b] = model.hard.as_slice() else {
        return None;
    };
    let only_links = model
        .columns
        .iter()
        .all(|c| c.name == model.pk_column || c.name == a.column || c.name == b.column);
    only_links.then_some((a, b))
}

fn add_many_to_many_relations(schema: &mut Schema) {
    let mut additions: Vec<(String, String, String, SoftKind)> = Vec::new();
    for model in schema.models() {
        let Some((a, b)) = link_ends(model) else {
            continue;
        };
        for (near, far) in [(a, b), (b, a)] {
            additions.push((
                near.target_type.clone(),
                far.target_type.clone(),
                far.column.clone(),
                SoftKind::ManyToMany {
                    through_table: model.table.clone(),
                    near_column: near.column.clone(),
                    far_column: far.column.clone(),
                    local_column: near.target_column.clone(),
                    far_target_column: far.target_column.clone(),
                },
            ));
        }
    }

    for (near_type, far_type, far_column, kind) in additions {
        let Some(far_short) = schema.get(&far_type).map(|m| m.short_name().to_string()) else {
            continue;
        };
        let Some(near) = schema.get_mut(&near_type) else {
            continue;
        };
        let SoftKind::ManyToMany { through_table, .. } = &kind else {
            continue;
        };
        let base = format!("{}_via_{}", far_short, through_table);
        let qualified = format!("{}_{}", base, far_column);
        let taken: HashSet<String> = near.soft.iter().map(|s| s.accessor.clone()).collect();
        let accessor = unique_accessor(&taken, base, qualified);
        near.soft.push(SoftRelation {
            accessor,
            target_type: far_type,
            kind,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn blog_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(
            "CREATE TABLE blog_author (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
             CREATE TABLE blog_article (
                 id INTEGER PRIMARY KEY,
                 title TEXT,
                 author_id INTEGER NOT NULL REFERENCES blog_author(id),
                 editor_id INTEGER REFERENCES blog_author(id)
             );
             CREATE TABLE blog_tag (id INTEGER PRIMARY KEY, label TEXT);
             CREATE TABLE blog_article_tags (
                 id INTEGER PRIMARY KEY,
                 article_id INTEGER NOT NULL REFERENCES blog_article(id),
                 tag_id INTEGER NOT NULL REFERENCES blog_tag(id)
             );
             CREATE TABLE settings (key TEXT, value TEXT);
             CREATE TABLE schema_migrations (version INTEGER PRIMARY KEY, name TEXT);",
        )
        .unwrap();
        conn
    }

    #[test]
    fn test_type_name_for_table() {
        assert_eq!(type_name_for_table("blog_article"), "blog.article");
        assert_eq!(type_name_for_table("blog_article_tags"), "blog.article_tags");
        assert_eq!(type_name_for_table("Settings"), "main.settings");
        assert_eq!(type_name_for_table("_hidden"), "main._hidden");
    }

    #[test]
    fn test_introspect_models_and_pks() {
        let schema = introspect(&blog_db(), &HashMap::new()).unwrap();
        assert!(schema.get("blog.author").is_some());
        assert!(schema.get("blog.article_tags").is_some());
        assert_eq!(schema.require("main.settings").unwrap().pk_column, "rowid");
        assert!(schema.get("schema.migrations").is_none());
        assert_eq!(schema.len(), 5);
    }

    #[test]
    fn test_introspect_hard_relations() {
        let schema = introspect(&blog_db(), &HashMap::new()).unwrap();
        let article = schema.require("blog.article").unwrap();
        let author_fk = article.hard_relation("author_id").unwrap();
        assert_eq!(author_fk.target_type, "blog.author");
        assert_eq!(author_fk.target_column, "id");
        assert!(article.hard_relation("editor_id").is_some());
    }

    #[test]
    fn test_introspect_reverse_relations_disambiguated() {
        let schema = introspect(&blog_db(), &HashMap::new()).unwrap();
        let author = schema.require("blog.author").unwrap();
        let accessors: Vec<&str> = author.soft.iter().map(|s| s.accessor.as_str()).collect();
        assert!(accessors.contains(&"article_set_by_author_id"));
        assert!(accessors.contains(&"article_set_by_editor_id"));

        let tag = schema.require("blog.tag").unwrap();
        assert!(tag.soft.iter().any(|s| s.accessor == "article_tags_set"));
    }

    #[test]
    fn test_introspect_many_to_many() {
        let schema = introspect(&blog_db(), &HashMap::new()).unwrap();
        let article = schema.require("blog.article").unwrap();
        let m2m = article
            .soft
            .iter()
            .find(|s| matches!(s.kind, SoftKind::ManyToMany { .. }))
            .unwrap();
        assert_eq!(m2m.target_type, "blog.tag");
        assert_eq!(m2m.accessor, "tag_via_blog_article_tags");

        let tag = schema.require("blog.tag").unwrap();
        assert!(tag
            .soft
            .iter()
            .any(|s| s.target_type == "blog.article" && matches!(s.kind, SoftKind::ManyToMany { .. })));
    }

    #[test]
    fn test_introspect_table_override() {
        let mut overrides = HashMap::new();
        overrides.insert("Core.Setting".to_string(), "settings".to_string());
        let schema = introspect(&blog_db(), &overrides).unwrap();
        assert_eq!(schema.require("core.setting").unwrap().table, "settings");
        assert!(schema.get("main.settings").is_none());
    }
}
