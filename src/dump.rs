//! The dump pipeline: resolve seeds, traverse, order, emit.

use std::collections::HashSet;

use crate::config::DumpConfig;
use crate::error::Result;
use crate::graph::{self, DependencyGraph, FilterPolicy, OrderStrategy, TraversalOptions, TraversalStats};
use crate::record::{KeyMode, KeyValue};
use crate::schema::parse_type_identifier;
use crate::snapshot::{emit, EmitOptions, SnapshotEntry};
use crate::store::{RecordFilter, RecordStore, RelationLookup};

/// One `dump-object` invocation.
#[derive(Debug, Clone, Default)]
pub struct DumpRequest {
    /// `app_label.model_name`, validated by [`dump`].
    pub object_class: String,
    /// Primary keys of the seeds. Empty means every row (or a sample).
    pub ids: Vec<String>,
    pub recursive: bool,
    pub natural: bool,
    pub max_depth: Option<usize>,
    pub max_fanout: Option<usize>,
    pub hard_only: bool,
    pub exclude: HashSet<String>,
    pub include: HashSet<String>,
    pub filter_policy: FilterPolicy,
    pub order: OrderStrategy,
    /// Random sample size when no ids are given.
    pub sample: Option<usize>,
}

impl DumpRequest {
    /// A request carrying the configured defaults.
    pub fn from_config(object_class: impl Into<String>, ids: Vec<String>, config: &DumpConfig) -> Self {
        Self {
            object_class: object_class.into(),
            ids,
            recursive: false,
            natural: false,
            max_depth: config.max_depth,
            max_fanout: config.max_fanout,
            hard_only: config.hard_only,
            exclude: parse_type_list(&config.exclude),
            include: parse_type_list(&config.include),
            filter_policy: config.filter_policy,
            order: config.order,
            sample: config.sample_size,
        }
    }

    fn key_mode(&self) -> KeyMode {
        if self.natural {
            KeyMode::Natural
        } else {
            KeyMode::Primary
        }
    }

    fn traversal_options(&self) -> TraversalOptions {
        TraversalOptions {
            recursive: self.recursive,
            max_depth: self.max_depth,
            max_fanout: self.max_fanout,
            hard_only: self.hard_only,
            exclude_types: self.exclude.clone(),
            include_types: self.include.clone(),
            filter_policy: self.filter_policy,
            key_mode: self.key_mode(),
        }
    }
}

/// Split comma- or space-separated type lists, lower-cased.
pub fn parse_type_list<S: AsRef<str>>(raw: &[S]) -> HashSet<String> {
    raw.iter()
        .flat_map(|item| {
            item.as_ref()
                .split(|c: char| c == ',' || c.is_whitespace())
                .filter(|s| !s.is_empty())
                .map(str::to_lowercase)
                .collect::<Vec<_>>()
        })
        .collect()
}

/// Result of a dump: loadable entries plus what the traversal saw.
#[derive(Debug, Clone)]
pub struct DumpOutput {
    pub entries: Vec<SnapshotEntry>,
    pub graph: DependencyGraph,
    pub stats: TraversalStats,
}

pub fn dump<S>(store: &S, request: &DumpRequest) -> Result<DumpOutput>
where
    S: RecordStore + RelationLookup,
{
    let type_name = parse_type_identifier(&request.object_class)?;
    store.schema().require(&type_name)?;

    let seeds = if request.ids.is_empty() {
        let filter = RecordFilter {
            sample: request.sample,
        };
        store.find_by_type(&type_name, &filter)?
    } else {
        if request.sample.is_some() {
            log::debug!("Ids given, ignoring sample size");
        }
        let keys = KeyValue::parse_ids(&request.ids);
        let found = store.find_by_type_and_keys(&type_name, &keys)?;
        if found.len() < keys.len() {
            log::warn!(
                "{} of {} requested {} rows do not exist",
                keys.len() - found.len(),
                keys.len(),
                type_name
            );
        }
        found
    };

    if seeds.is_empty() {
        log::warn!("No {} rows matched, writing an empty snapshot", type_name);
    }

    let mode = request.key_mode();
    let traversal = graph::traverse(store, seeds, &request.traversal_options());
    let ordered = graph::order(traversal.records, &traversal.graph, request.order, mode);
    let entries = emit(
        &ordered,
        store,
        &EmitOptions {
            natural: request.natural,
        },
    );

    log::info!(
        "Dumped {} records ({} dependency edges)",
        entries.len(),
        traversal.graph.edge_count()
    );

    Ok(DumpOutput {
        entries,
        graph: traversal.graph,
        stats: traversal.stats,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::DumpError;
    use crate::schema::introspect;
    use crate::snapshot::load_snapshot;
    use crate::store::SqliteStore;
    use rusqlite::Connection;
    use serde_json::json;
    use std::collections::HashMap;

    const BLOG_DDL: &str = "
        CREATE TABLE blog_author (id INTEGER PRIMARY KEY, name TEXT NOT NULL);
        CREATE TABLE blog_article (
            id INTEGER PRIMARY KEY,
            title TEXT,
            author_id INTEGER REFERENCES blog_author(id)
        );";

    fn blog(natural: bool) -> SqliteStore {
        let conn = Connection::open_in_memory().unwrap();
        conn.execute_batch(BLOG_DDL).unwrap();
        conn.execute_batch(
            "INSERT INTO blog_author VALUES (1, 'ada'), (2, 'grace');
             INSERT INTO blog_article VALUES (1, 'one', 2), (2, 'two', 2), (10, 'ten', 1), (20, 'twenty', 1);",
        )
        .unwrap();
        let mut schema = introspect(&conn, &HashMap::new()).unwrap();
        if natural {
            let mut keys = HashMap::new();
            keys.insert("blog.author".to_string(), vec!["name".to_string()]);
            schema.apply_natural_keys(&keys).unwrap();
        }
        SqliteStore::with_schema(conn, schema, 32)
    }

    fn request(object_class: &str, ids: &[&str]) -> DumpRequest {
        DumpRequest {
            object_class: object_class.to_string(),
            ids: ids.iter().map(|s| s.to_string()).collect(),
            ..Default::default()
        }
    }

    fn keys(output: &DumpOutput) -> Vec<String> {
        output
            .entries
            .iter()
            .map(|e| format!("{}:{}", e.model, e.pk))
            .collect()
    }

    #[test]
    fn test_non_recursive_dumps_exactly_the_seeds() {
        let store = blog(false);
        let output = dump(&store, &request("blog.article", &["1", "2"])).unwrap();
        assert_eq!(keys(&output), vec!["blog.article:1", "blog.article:2"]);
        assert_eq!(output.graph.edge_count(), 0);
    }

    #[test]
    fn test_kitchensink_orders_author_first() {
        let store = blog(false);
        let mut req = request("blog.author", &["1"]);
        req.recursive = true;
        let output = dump(&store, &req).unwrap();
        assert_eq!(
            keys(&output),
            vec!["blog.author:1", "blog.article:10", "blog.article:20"]
        );
    }

    #[test]
    fn test_natural_mode_nulls_author_pk() {
        let store = blog(true);
        let mut req = request("blog.article", &["10"]);
        req.recursive = true;
        req.natural = true;
        let output = dump(&store, &req).unwrap();
        let author = output
            .entries
            .iter()
            .find(|e| e.model == "blog.author")
            .unwrap();
        assert!(author.pk.is_null());
        let article = output
            .entries
            .iter()
            .find(|e| e.model == "blog.article" && e.fields["title"] == json!("ten"))
            .unwrap();
        assert!(article.pk.is_null());
        assert_eq!(article.fields["author_id"], json!(["ada"]));
    }

    #[test]
    fn test_natural_mode_without_natural_keys_still_nulls_pk() {
        let store = blog(false);
        let mut req = request("blog.article", &["10"]);
        req.natural = true;
        let output = dump(&store, &req).unwrap();
        assert_eq!(output.entries.len(), 1);
        assert!(output.entries[0].pk.is_null());
        // No natural key on the author, so the reference stays raw.
        assert_eq!(output.entries[0].fields["author_id"], json!(1));
    }

    #[test]
    fn test_type_identifier_is_validated_and_lowercased() {
        let store = blog(false);
        let err = dump(&store, &request("article", &["1"])).unwrap_err();
        assert!(err.is_usage());
        assert!(dump(&store, &request("", &[])).unwrap_err().is_usage());

        let output = dump(&store, &request("Blog.Article", &["1"])).unwrap();
        assert_eq!(output.entries.len(), 1);
    }

    #[test]
    fn test_unknown_model_is_fatal() {
        let store = blog(false);
        let err = dump(&store, &request("blog.comment", &["1"])).unwrap_err();
        assert!(matches!(err, DumpError::ModelNotFound(_)));
    }

    #[test]
    fn test_text_ids_and_missing_rows_give_empty_output() {
        let store = blog(false);
        let output = dump(&store, &request("blog.article", &["abc"])).unwrap();
        assert!(output.entries.is_empty());
    }

    #[test]
    fn test_all_rows_or_sample_without_ids() {
        let store = blog(false);
        assert_eq!(dump(&store, &request("blog.article", &[])).unwrap().entries.len(), 4);

        let mut req = request("blog.article", &[]);
        req.sample = Some(2);
        assert_eq!(dump(&store, &req).unwrap().entries.len(), 2);
    }

    #[test]
    fn test_excluded_type_never_emitted() {
        let store = blog(false);
        let mut req = request("blog.article", &["10"]);
        req.recursive = true;
        req.exclude = parse_type_list(&["Blog.Author"]);
        let output = dump(&store, &req).unwrap();
        assert!(output.entries.iter().all(|e| e.model != "blog.author"));
        // Pass-through still reaches the author's other article.
        assert_eq!(keys(&output), vec!["blog.article:10", "blog.article:20"]);
    }

    #[test]
    fn test_excluded_seed_type_is_not_emitted() {
        let store = blog(false);
        let mut req = request("blog.author", &["1"]);
        req.recursive = true;
        req.exclude = parse_type_list(&["blog.author"]);
        let output = dump(&store, &req).unwrap();
        assert_eq!(keys(&output), vec!["blog.article:10", "blog.article:20"]);
    }

    #[test]
    fn test_depth_bound_keeps_author_first_and_replays() {
        let store = blog(false);
        let mut req = request("blog.author", &["1"]);
        req.recursive = true;
        req.max_depth = Some(1);
        let output = dump(&store, &req).unwrap();
        assert_eq!(
            keys(&output),
            vec!["blog.author:1", "blog.article:10", "blog.article:20"]
        );

        let mut target = Connection::open_in_memory().unwrap();
        target.execute_batch(BLOG_DDL).unwrap();
        let schema = introspect(&target, &HashMap::new()).unwrap();
        let report = load_snapshot(&mut target, &schema, &output.entries).unwrap();
        assert_eq!(report.inserted, 3);
    }

    #[test]
    fn test_depth_zero_is_seeds_only() {
        let store = blog(false);
        let mut req = request("blog.author", &["1"]);
        req.recursive = true;
        req.max_depth = Some(0);
        let output = dump(&store, &req).unwrap();
        assert_eq!(keys(&output), vec!["blog.author:1"]);
    }

    #[test]
    fn test_parse_type_list() {
        let parsed = parse_type_list(&["blog.Author, auth.user", "shop.item"]);
        assert_eq!(parsed.len(), 3);
        assert!(parsed.contains("blog.author"));
        assert!(parsed.contains("auth.user"));
        assert!(parsed.contains("shop.item"));
    }

    #[test]
    fn test_from_config_defaults() {
        let config = DumpConfig {
            max_depth: Some(2),
            exclude: vec!["auth.session".into()],
            ..Default::default()
        };
        let req = DumpRequest::from_config("blog.article", vec![], &config);
        assert_eq!(req.max_depth, Some(2));
        assert!(req.exclude.contains("auth.session"));
        assert!(!req.recursive);
    }
}
