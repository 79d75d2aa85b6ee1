//! Linearize a visited record set so dependencies come first.

use std::cmp::Ordering;
use std::collections::{BTreeMap, HashMap};

use serde::Deserialize;

use crate::graph::DependencyGraph;
use crate::record::{KeyMode, Record, RecordKey};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStrategy {
    /// Depth-first topological sort; on a cycle the first-visited record wins.
    #[default]
    Topological,
    /// Legacy pairwise "depends on" comparator. Not transitive on diamonds
    /// or cycles, so the result is only an approximation of a topological order.
    Pairwise,
}

impl std::str::FromStr for OrderStrategy {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "topological" | "topo" => Ok(OrderStrategy::Topological),
            "pairwise" | "legacy" => Ok(OrderStrategy::Pairwise),
            other => Err(format!("unknown order strategy '{}'", other)),
        }
    }
}

/// Reorder `records` so that, for every hard edge between two of them, the
/// dependency precedes the dependent. The output is a permutation of the
/// input and depends only on the input.
pub fn order(records: Vec<Record>, graph: &DependencyGraph, strategy: OrderStrategy, mode: KeyMode) -> Vec<Record> {
    match strategy {
        OrderStrategy::Topological => topological(records, graph, mode),
        OrderStrategy::Pairwise => pairwise(records, graph, mode),
    }
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Mark {
    Unseen,
    Active,
    Done,
}

fn topological(records: Vec<Record>, graph: &DependencyGraph, mode: KeyMode) -> Vec<Record> {
    // Group by key so repeated records travel together and nothing is dropped.
    let mut groups: BTreeMap<RecordKey, Vec<Record>> = BTreeMap::new();
    for record in records {
        groups.entry(record.key(mode)).or_default().push(record);
    }
    let keys: Vec<RecordKey> = groups.keys().cloned().collect();
    let index_of: HashMap<&RecordKey, usize> = keys.iter().enumerate().map(|(i, k)| (k, i)).collect();

    // Dependencies outside the record set (excluded or unreached) are ignored.
    let deps: Vec<Vec<usize>> = keys
        .iter()
        .map(|k| {
            graph
                .depends_on(k)
                .iter()
                .filter_map(|d| index_of.get(d).copied())
                .collect()
        })
        .collect();

    let mut marks = vec![Mark::Unseen; keys.len()];
    let mut emitted: Vec<usize> = Vec::with_capacity(keys.len());

    for root in 0..keys.len() {
        if marks[root] != Mark::Unseen {
            continue;
        }
        marks[root] = Mark::Active;
        let mut stack: Vec<(usize, usize)> = vec![(root, 0)];

        while let Some((node, next)) = stack.last_mut() {
            if let Some(&dep) = deps[*node].get(*next) {
                *next += 1;
                match marks[dep] {
                    Mark::Unseen => {
                        marks[dep] = Mark::Active;
                        stack.push((dep, 0));
                    }
                    Mark::Active => {
                        log::debug!("Dependency cycle between {} and {}, keeping first-seen order", keys[*node], keys[dep]);
                    }
                    Mark::Done => {}
                }
            } else {
                let node = *node;
                marks[node] = Mark::Done;
                emitted.push(node);
                stack.pop();
            }
        }
    }

    let mut out = Vec::new();
    for idx in emitted {
        if let Some(group) = groups.remove(&keys[idx]) {
            out.extend(group);
        }
    }
    out
}

fn pairwise(records: Vec<Record>, graph: &DependencyGraph, mode: KeyMode) -> Vec<Record> {
    let mut items: Vec<(RecordKey, Record)> = records.into_iter().map(|r| (r.key(mode), r)).collect();

    let compare = |a: &RecordKey, b: &RecordKey| -> Ordering {
        if graph.depends_on(a).contains(b) {
            Ordering::Greater
        } else if graph.depends_on(b).contains(a) {
            Ordering::Less
        } else {
            a.cmp(b)
        }
    };

    // Insertion sort: terminates and stays deterministic for any comparator,
    // unlike slice::sort_by which may panic on a non-total order.
    for i in 1..items.len() {
        let mut j = i;
        while j > 0 && compare(&items[j - 1].0, &items[j].0) == Ordering::Greater {
            items.swap(j - 1, j);
            j -= 1;
        }
    }

    items.into_iter().map(|(_, r)| r).collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::KeyValue;

    fn rec(t: &str, pk: i64) -> Record {
        Record::new(t, KeyValue::Int(pk))
    }

    fn key(t: &str, pk: i64) -> RecordKey {
        RecordKey::primary(t, KeyValue::Int(pk))
    }

    fn names(records: &[Record]) -> Vec<String> {
        records.iter().map(|r| r.key(KeyMode::Primary).to_string()).collect()
    }

    fn position(records: &[Record], k: &RecordKey) -> usize {
        records
            .iter()
            .position(|r| &r.key(KeyMode::Primary) == k)
            .unwrap()
    }

    fn assert_edges_respected(records: &[Record], graph: &DependencyGraph) {
        for (dependent, dependency) in graph.edges() {
            assert!(
                position(records, dependency) < position(records, dependent),
                "{} should precede {}",
                dependency,
                dependent
            );
        }
    }

    /// "zzz.root" depends on "aaa.left" and "aaa.right", both depend on "mmm.base".
    fn diamond() -> (Vec<Record>, DependencyGraph) {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&key("zzz.root", 1), &key("aaa.left", 1));
        graph.add_edge(&key("zzz.root", 1), &key("aaa.right", 1));
        graph.add_edge(&key("aaa.left", 1), &key("mmm.base", 1));
        graph.add_edge(&key("aaa.right", 1), &key("mmm.base", 1));
        let records = vec![
            rec("zzz.root", 1),
            rec("aaa.left", 1),
            rec("aaa.right", 1),
            rec("mmm.base", 1),
        ];
        (records, graph)
    }

    #[test]
    fn test_unrelated_records_sort_by_key() {
        let graph = DependencyGraph::new();
        let records = vec![rec("blog.article", 2), rec("blog.article", 1)];
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(names(&ordered), vec!["blog.article:1", "blog.article:2"]);
    }

    #[test]
    fn test_author_before_articles() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&key("blog.article", 10), &key("blog.author", 1));
        graph.add_edge(&key("blog.article", 20), &key("blog.author", 1));
        let records = vec![rec("blog.author", 1), rec("blog.article", 10), rec("blog.article", 20)];
        for strategy in [OrderStrategy::Topological, OrderStrategy::Pairwise] {
            let ordered = order(records.clone(), &graph, strategy, KeyMode::Primary);
            assert_eq!(
                names(&ordered),
                vec!["blog.author:1", "blog.article:10", "blog.article:20"]
            );
        }
    }

    #[test]
    fn test_diamond_topological() {
        let (records, graph) = diamond();
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(ordered.len(), 4);
        assert_edges_respected(&ordered, &graph);
        assert_eq!(names(&ordered)[0], "mmm.base:1");
    }

    #[test]
    fn test_long_chain_beats_key_order() {
        // a.a:1 -> b.b:1 -> c.c:1 -> d.d:1, given in reverse key order.
        let mut graph = DependencyGraph::new();
        graph.add_edge(&key("a.a", 1), &key("b.b", 1));
        graph.add_edge(&key("b.b", 1), &key("c.c", 1));
        graph.add_edge(&key("c.c", 1), &key("d.d", 1));
        let records = vec![rec("a.a", 1), rec("b.b", 1), rec("c.c", 1), rec("d.d", 1)];
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(names(&ordered), vec!["d.d:1", "c.c:1", "b.b:1", "a.a:1"]);
    }

    #[test]
    fn test_cycle_keeps_every_record() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&key("graph.node", 1), &key("graph.node", 2));
        graph.add_edge(&key("graph.node", 2), &key("graph.node", 1));
        let records = vec![rec("graph.node", 1), rec("graph.node", 2)];
        for strategy in [OrderStrategy::Topological, OrderStrategy::Pairwise] {
            let ordered = order(records.clone(), &graph, strategy, KeyMode::Primary);
            assert_eq!(ordered.len(), 2);
        }
        // First-seen wins: node 1 is the DFS root, so its dependency lands first.
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(names(&ordered), vec!["graph.node:2", "graph.node:1"]);
    }

    #[test]
    fn test_dependencies_outside_the_set_ignored() {
        let mut graph = DependencyGraph::new();
        graph.add_edge(&key("blog.article", 10), &key("blog.author", 1));
        let records = vec![rec("blog.article", 10)];
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(names(&ordered), vec!["blog.article:10"]);
    }

    #[test]
    fn test_duplicates_preserved() {
        let graph = DependencyGraph::new();
        let records = vec![rec("blog.tag", 1), rec("blog.tag", 1)];
        let ordered = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(ordered.len(), 2);
    }

    #[test]
    fn test_deterministic_regardless_of_input_order() {
        let (records, graph) = diamond();
        let mut reversed = records.clone();
        reversed.reverse();
        let a = order(records, &graph, OrderStrategy::Topological, KeyMode::Primary);
        let b = order(reversed, &graph, OrderStrategy::Topological, KeyMode::Primary);
        assert_eq!(names(&a), names(&b));
    }

    #[test]
    fn test_parse_strategy() {
        assert_eq!("pairwise".parse::<OrderStrategy>().unwrap(), OrderStrategy::Pairwise);
        assert_eq!("Topological".parse::<OrderStrategy>().unwrap(), OrderStrategy::Topological);
        assert!("random".parse::<OrderStrategy>().is_err());
    }
}
