// src/dag/graph.rs

use std::collections::{BTreeMap, HashMap};
use std::fmt;

use anyhow::{anyhow, Result};
use petgraph::algo::toposort;
use petgraph::graphmap::DiGraphMap;

use crate::procfile::{Procfile, ProcessSpec};

/// Index of a process in the graph arena. Supervisors hold their own id;
/// the orchestrator owns the arrays.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct ProcId(usize);

impl ProcId {
    pub fn index(self) -> usize {
        self.0
    }
}

impl fmt::Display for ProcId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// The static process graph: spec arena plus adjacency in both directions.
///
/// An edge A -> B means "B depends on A"; B starts only after A is ready.
/// Built from an already-validated [`Procfile`], so lookups by name and the
/// topological sort are expected to succeed.
#[derive(Debug, Clone)]
pub struct ProcessGraph {
    specs: Vec<ProcessSpec>,
    env: BTreeMap<String, String>,
    ids_by_name: HashMap<String, ProcId>,
    dependencies: Vec<Vec<ProcId>>,
    dependents: Vec<Vec<ProcId>>,
    topo: Vec<ProcId>,
}

impl ProcessGraph {
    pub fn from_procfile(procfile: Procfile) -> Result<Self> {
        let Procfile { env, processes: specs } = procfile;

        let ids_by_name: HashMap<String, ProcId> = specs
            .iter()
            .enumerate()
            .map(|(idx, spec)| (spec.name.clone(), ProcId(idx)))
            .collect();

        let mut dependencies: Vec<Vec<ProcId>> = vec![Vec::new(); specs.len()];
        let mut dependents: Vec<Vec<ProcId>> = vec![Vec::new(); specs.len()];

        for (idx, spec) in specs.iter().enumerate() {
            for dep in &spec.dependencies {
                let dep_id = *ids_by_name
                    .get(dep.as_str())
                    .ok_or_else(|| anyhow!("unknown dependency '{}' survived validation", dep))?;
                dependencies[idx].push(dep_id);
                dependents[dep_id.0].push(ProcId(idx));
            }
        }

        let mut petgraph: DiGraphMap<usize, ()> = DiGraphMap::new();
        for idx in 0..specs.len() {
            petgraph.add_node(idx);
        }
        for (idx, deps) in dependencies.iter().enumerate() {
            for dep in deps {
                petgraph.add_edge(dep.0, idx, ());
            }
        }
        let topo = toposort(&petgraph, None)
            .map_err(|cycle| {
                anyhow!(
                    "dependency cycle survived validation (at '{}')",
                    specs[cycle.node_id()].name
                )
            })?
            .into_iter()
            .map(ProcId)
            .collect();

        Ok(Self { specs, env, ids_by_name, dependencies, dependents, topo })
    }

    pub fn len(&self) -> usize {
        self.specs.len()
    }

    pub fn is_empty(&self) -> bool {
        self.specs.is_empty()
    }

    pub fn ids(&self) -> impl Iterator<Item = ProcId> {
        (0..self.specs.len()).map(ProcId)
    }

    pub fn spec(&self, id: ProcId) -> &ProcessSpec {
        &self.specs[id.0]
    }

    pub fn name(&self, id: ProcId) -> &str {
        &self.specs[id.0].name
    }

    pub fn id_of(&self, name: &str) -> Option<ProcId> {
        self.ids_by_name.get(name).copied()
    }

    pub fn global_env(&self) -> &BTreeMap<String, String> {
        &self.env
    }

    /// Direct dependencies (the processes this one waits for).
    pub fn dependencies(&self, id: ProcId) -> &[ProcId] {
        &self.dependencies[id.0]
    }

    /// Direct dependents (the processes waiting on this one).
    pub fn dependents(&self, id: ProcId) -> &[ProcId] {
        &self.dependents[id.0]
    }

    /// Indegree-0 processes, in file order.
    pub fn roots(&self) -> Vec<ProcId> {
        self.ids().filter(|id| self.dependencies(*id).is_empty()).collect()
    }

    /// Cached topological order: dependencies before dependents.
    pub fn topo_order(&self) -> &[ProcId] {
        &self.topo
    }

    /// Shutdown order: dependents before dependencies.
    pub fn shutdown_order(&self) -> Vec<ProcId> {
        self.topo.iter().rev().copied().collect()
    }

    /// Strict transitive dependents of `id`, in topological order.
    pub fn descendants(&self, id: ProcId) -> Vec<ProcId> {
        let mut reachable = vec![false; self.specs.len()];
        let mut stack = vec![id];
        while let Some(node) = stack.pop() {
            for &next in self.dependents(node) {
                if !reachable[next.0] {
                    reachable[next.0] = true;
                    stack.push(next);
                }
            }
        }
        self.topo.iter().copied().filter(|n| reachable[n.0]).collect()
    }

    /// Is there a dependency path from `from` to `to` (i.e. `to` transitively
    /// depends on `from`)?
    pub fn reaches(&self, from: ProcId, to: ProcId) -> bool {
        if from == to {
            return false;
        }
        let mut seen = vec![false; self.specs.len()];
        let mut stack = vec![from];
        while let Some(node) = stack.pop() {
            for &next in self.dependents(node) {
                if next == to {
                    return true;
                }
                if !seen[next.0] {
                    seen[next.0] = true;
                    stack.push(next);
                }
            }
        }
        false
    }
}
