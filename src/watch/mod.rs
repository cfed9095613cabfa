// src/watch/mod.rs

//! File watching and change filtering.
//!
//! - Compiles per-process include/exclude glob profiles (`patterns`).
//! - Applies gitignore semantics before any glob is consulted (`gitignore`).
//! - Bridges `notify` events into supervisor mailboxes (`watcher`).
//!
//! Debouncing lives in the supervisors, not here: the watcher forwards raw
//! matched paths and each supervisor coalesces them with its own timer.

pub mod gitignore;
pub mod patterns;
pub mod watcher;

pub use gitignore::IgnoreMatcher;
pub use patterns::{build_watch_profiles, normalize_pattern, WatchProfile};
pub use watcher::{spawn_watcher, WatcherHandle};
