// src/dag/mod.rs

//! Process dependency graph.
//!
//! [`graph`] holds the arena-indexed DAG built from a validated Procfile:
//! adjacency in both directions, the cached topological order used for
//! startup and the reload cascade, and its reverse used for shutdown.

pub mod graph;

pub use graph::{ProcId, ProcessGraph};
