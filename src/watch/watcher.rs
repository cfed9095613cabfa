// src/watch/watcher.rs

use std::path::{Path, PathBuf};
use std::sync::Arc;

use anyhow::Result;
use notify::event::ModifyKind;
use notify::{Config, Event, EventKind, RecommendedWatcher, RecursiveMode, Watcher};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{ProcId, ProcessGraph};
use crate::engine::SupervisorMsg;
use crate::watch::gitignore::IgnoreMatcher;
use crate::watch::patterns::WatchProfile;

/// Keeps the underlying `notify` watcher alive; dropping it stops watching.
pub struct WatcherHandle {
    _inner: RecommendedWatcher,
}

impl std::fmt::Debug for WatcherHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WatcherHandle").finish()
    }
}

/// Watch `root` recursively and route changed paths to the supervisors whose
/// patterns match.
///
/// Filtering, in order: event kind (create/modify/remove, metadata-only
/// changes dropped), gitignore, per-process include/exclude globs, then a
/// graph-aware pass so that a path matching both a process and one of its
/// transitive dependents only triggers the upstream process; the dependent
/// is reached by the orchestrator's reload cascade instead.
pub fn spawn_watcher(
    root: impl Into<PathBuf>,
    profiles: Vec<WatchProfile>,
    ignore: IgnoreMatcher,
    graph: Arc<ProcessGraph>,
    supervisors: Vec<mpsc::Sender<SupervisorMsg>>,
) -> Result<WatcherHandle> {
    let root = root.into();
    let root = root.canonicalize().unwrap_or(root);

    let profiles = Arc::new(profiles);
    let (event_tx, mut event_rx) = mpsc::unbounded_channel::<Event>();

    // notify invokes the callback synchronously; hop into the async world.
    let mut watcher = RecommendedWatcher::new(
        move |res: notify::Result<Event>| match res {
            Ok(event) => {
                let _ = event_tx.send(event);
            }
            Err(err) => {
                eprintln!("proctor: file watch error: {err}");
            }
        },
        Config::default(),
    )?;
    watcher.watch(&root, RecursiveMode::Recursive)?;
    info!(root = %root.display(), "file watcher started");

    tokio::spawn(async move {
        while let Some(event) = event_rx.recv().await {
            if !is_relevant(&event.kind) {
                continue;
            }
            for path in &event.paths {
                dispatch_path(&root, path, &profiles, &ignore, &graph, &supervisors).await;
            }
        }
        debug!("file watcher loop ended");
    });

    Ok(WatcherHandle { _inner: watcher })
}

fn is_relevant(kind: &EventKind) -> bool {
    match kind {
        EventKind::Modify(ModifyKind::Metadata(_)) => false,
        EventKind::Create(_) | EventKind::Modify(_) | EventKind::Remove(_) => true,
        _ => false,
    }
}

async fn dispatch_path(
    root: &Path,
    path: &Path,
    profiles: &Arc<Vec<WatchProfile>>,
    ignore: &IgnoreMatcher,
    graph: &Arc<ProcessGraph>,
    supervisors: &[mpsc::Sender<SupervisorMsg>],
) {
    let rel = match relative_str(root, path) {
        Some(s) => s,
        None => {
            debug!(path = %path.display(), "event outside watch root, skipping");
            return;
        }
    };

    if ignore.is_ignored(path, path.is_dir()) {
        debug!(path = %rel, "gitignored, skipping");
        return;
    }

    let abs = path.to_string_lossy().replace('\\', "/");
    let matched: Vec<ProcId> = profiles
        .iter()
        .filter(|p| p.matches(&rel, &abs))
        .map(|p| p.id())
        .collect();
    if matched.is_empty() {
        return;
    }

    // Only the upstream-most matches trigger directly.
    let roots: Vec<ProcId> = matched
        .iter()
        .copied()
        .filter(|&id| !matched.iter().any(|&other| graph.reaches(other, id)))
        .collect();

    for id in roots {
        debug!(process = graph.name(id), path = %rel, "watch match");
        if let Err(err) = supervisors[id.index()]
            .send(SupervisorMsg::FileChanged { path: PathBuf::from(&rel) })
            .await
        {
            warn!(process = graph.name(id), error = %err, "supervisor mailbox closed");
            return;
        }
    }
}

/// Path relative to `root`, with forward slashes.
fn relative_str(root: &Path, path: &Path) -> Option<String> {
    let rel = path.strip_prefix(root).ok()?;
    Some(rel.to_string_lossy().replace('\\', "/"))
}
