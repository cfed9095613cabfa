use std::collections::{HashSet, VecDeque};

use proptest::prelude::*;

use proctor::dag::ProcessGraph;
use proctor::procfile::parse;

fn graph_of(input: &str) -> ProcessGraph {
    ProcessGraph::from_procfile(parse(input).unwrap()).unwrap()
}

#[test]
fn roots_are_the_indegree_zero_processes() {
    let graph = graph_of("a: x\nb: x\nc after=a,b: x");
    let roots: Vec<&str> = graph.roots().into_iter().map(|id| graph.name(id)).collect();
    assert_eq!(roots, vec!["a", "b"]);
}

#[test]
fn topo_order_respects_every_edge() {
    // Diamond: a -> {b, c} -> d
    let graph = graph_of("a: x\nb after=a: x\nc after=a: x\nd after=b,c: x");
    let order: Vec<&str> = graph.topo_order().iter().map(|&id| graph.name(id)).collect();

    let pos = |name: &str| order.iter().position(|n| *n == name).unwrap();
    assert!(pos("a") < pos("b"));
    assert!(pos("a") < pos("c"));
    assert!(pos("b") < pos("d"));
    assert!(pos("c") < pos("d"));
}

#[test]
fn shutdown_order_is_reverse_topological() {
    let graph = graph_of("a: x\nb after=a: x\nc after=b: x");
    let order: Vec<&str> = graph.shutdown_order().into_iter().map(|id| graph.name(id)).collect();
    assert_eq!(order, vec!["c", "b", "a"]);
}

#[test]
fn descendants_are_transitive_and_topo_ordered() {
    let graph = graph_of("a: x\nb after=a: x\nc after=b: x\nd: x");
    let a = graph.id_of("a").unwrap();
    let descendants: Vec<&str> =
        graph.descendants(a).into_iter().map(|id| graph.name(id)).collect();
    assert_eq!(descendants, vec!["b", "c"]);
}

#[test]
fn reaches_follows_dependency_paths_only() {
    let graph = graph_of("a: x\nb after=a: x\nc: x");
    let (a, b, c) = (
        graph.id_of("a").unwrap(),
        graph.id_of("b").unwrap(),
        graph.id_of("c").unwrap(),
    );
    assert!(graph.reaches(a, b));
    assert!(!graph.reaches(b, a));
    assert!(!graph.reaches(a, c));
    assert!(!graph.reaches(a, a));
}

/// Independent acyclicity check (Kahn's algorithm) used as the oracle for
/// the property test below.
fn is_acyclic(n: usize, edges: &HashSet<(usize, usize)>) -> bool {
    let mut indegree = vec![0usize; n];
    for &(_, to) in edges {
        indegree[to] += 1;
    }
    let mut queue: VecDeque<usize> =
        (0..n).filter(|&i| indegree[i] == 0).collect();
    let mut visited = 0;
    while let Some(node) = queue.pop_front() {
        visited += 1;
        for &(from, to) in edges {
            if from == node {
                indegree[to] -= 1;
                if indegree[to] == 0 {
                    queue.push_back(to);
                }
            }
        }
    }
    visited == n
}

fn procfile_text(n: usize, edges: &HashSet<(usize, usize)>) -> String {
    let mut out = String::new();
    for i in 0..n {
        let deps: Vec<String> = edges
            .iter()
            .filter(|&&(_, to)| to == i)
            .map(|&(from, _)| format!("p{from}"))
            .collect();
        if deps.is_empty() {
            out.push_str(&format!("p{i}: true\n"));
        } else {
            out.push_str(&format!("p{i} after={}: true\n", deps.join(",")));
        }
    }
    out
}

proptest! {
    /// The parser accepts precisely the acyclic dependency graphs.
    #[test]
    fn cycle_detection_matches_kahn(
        n in 1usize..8,
        raw_edges in proptest::collection::vec((0usize..8, 0usize..8), 0..20),
    ) {
        let edges: HashSet<(usize, usize)> = raw_edges
            .into_iter()
            .map(|(a, b)| (a % n, b % n))
            .collect();

        let text = procfile_text(n, &edges);
        let parsed = parse(&text);
        prop_assert_eq!(
            parsed.is_ok(),
            is_acyclic(n, &edges),
            "parser and Kahn disagree on:\n{}",
            text
        );
    }

    /// Forward-only edges always form a DAG the parser accepts, and the
    /// cached topological order respects every edge.
    #[test]
    fn layered_dags_parse_and_sort(
        n in 1usize..8,
        raw_edges in proptest::collection::vec((0usize..8, 1usize..8), 0..16),
    ) {
        let edges: HashSet<(usize, usize)> = raw_edges
            .into_iter()
            .filter_map(|(a, b)| {
                let to = b % n;
                if to == 0 {
                    return None;
                }
                Some((a % to, to))
            })
            .collect();

        let text = procfile_text(n, &edges);
        let graph = ProcessGraph::from_procfile(parse(&text).unwrap()).unwrap();
        let order: Vec<usize> =
            graph.topo_order().iter().map(|&id| id.index()).collect();
        let pos: Vec<usize> = {
            let mut pos = vec![0; n];
            for (rank, &idx) in order.iter().enumerate() {
                pos[idx] = rank;
            }
            pos
        };
        for &(from, to) in &edges {
            prop_assert!(pos[from] < pos[to]);
        }
    }
}
