// src/exec/mod.rs

//! Process execution layer.
//!
//! Spawns Procfile commands through the user's shell with
//! `tokio::process::Command`, always in a fresh process group so that
//! reload and shutdown signals reach the whole tree, and keeps the shared
//! registry of live groups that backs kill escalation and panic cleanup.

pub mod spawn;

pub use spawn::{signal_group, spawn_in_group, GroupRegistry, KillGuard, SpawnedChild};
