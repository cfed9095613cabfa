// src/watch/patterns.rs

use std::fmt;

use anyhow::{Context, Result};
use globset::{Glob, GlobSet, GlobSetBuilder};

use crate::dag::ProcId;
use crate::procfile::ProcessSpec;

/// Strip a leading `./`; globset treats `./x` and `x` as different patterns.
pub fn normalize_pattern(pattern: &str) -> &str {
    pattern.strip_prefix("./").unwrap_or(pattern)
}

/// Compiled include/exclude globs for one process.
///
/// Patterns are anchored at the Procfile's directory; a pattern starting
/// with `/` instead matches the absolute path. The watcher hands both forms
/// of a changed path to [`WatchProfile::matches`].
#[derive(Clone)]
pub struct WatchProfile {
    id: ProcId,
    name: String,
    includes: GlobSet,
    excludes: GlobSet,
    abs_includes: GlobSet,
    abs_excludes: GlobSet,
    has_includes: bool,
}

impl fmt::Debug for WatchProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("WatchProfile")
            .field("id", &self.id)
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl WatchProfile {
    pub fn id(&self) -> ProcId {
        self.id
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Does this process care about the given path?
    ///
    /// `rel_path` is the path relative to the Procfile's directory with
    /// forward slashes; `abs_path` is the absolute form for leading-`/`
    /// patterns. A process with no include patterns matches nothing.
    pub fn matches(&self, rel_path: &str, abs_path: &str) -> bool {
        if !self.has_includes {
            return false;
        }
        let included = self.includes.is_match(rel_path) || self.abs_includes.is_match(abs_path);
        if !included {
            return false;
        }
        !(self.excludes.is_match(rel_path) || self.abs_excludes.is_match(abs_path))
    }
}

/// Compile a watch profile for every process that declares include patterns.
pub fn build_watch_profiles(
    specs: impl Iterator<Item = (ProcId, ProcessSpec)>,
) -> Result<Vec<WatchProfile>> {
    let mut profiles = Vec::new();

    for (id, spec) in specs {
        if !spec.is_watched() {
            continue;
        }

        let (includes, abs_includes) = build_sets(&spec.watch_includes)
            .with_context(|| format!("building include globs for process '{}'", spec.name))?;
        let (excludes, abs_excludes) = build_sets(&spec.watch_excludes)
            .with_context(|| format!("building exclude globs for process '{}'", spec.name))?;

        profiles.push(WatchProfile {
            id,
            name: spec.name.clone(),
            includes,
            excludes,
            abs_includes,
            abs_excludes,
            has_includes: true,
        });
    }

    Ok(profiles)
}

/// Split patterns into (relative, absolute) glob sets.
fn build_sets(patterns: &[String]) -> Result<(GlobSet, GlobSet)> {
    let mut relative = GlobSetBuilder::new();
    let mut absolute = GlobSetBuilder::new();

    for pattern in patterns {
        let normalized = normalize_pattern(pattern);
        let glob = Glob::new(normalized)
            .with_context(|| format!("invalid glob pattern: '{}'", pattern))?;
        if normalized.starts_with('/') {
            absolute.add(glob);
        } else {
            relative.add(glob);
        }
    }

    Ok((relative.build()?, absolute.build()?))
}
