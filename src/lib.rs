// src/lib.rs

pub mod cli;
pub mod dag;
pub mod engine;
pub mod errors;
pub mod exec;
pub mod logging;
pub mod output;
pub mod probe;
pub mod procfile;
pub mod watch;

use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Context;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::warn;

use crate::cli::CliArgs;
use crate::dag::ProcessGraph;
use crate::engine::{
    spawn_supervisor, EngineEvent, EngineExit, Orchestrator, SupervisorMsg,
};
use crate::exec::{GroupRegistry, KillGuard};
use crate::output::LogRouter;
use crate::watch::{build_watch_profiles, spawn_watcher, IgnoreMatcher, WatcherHandle};

/// A second SIGINT within this window SIGKILLs every process group.
const SIGINT_ESCALATION_WINDOW: Duration = Duration::from_secs(2);

/// High-level entry point used by `main.rs`.
///
/// Wires together: Procfile parsing, the process graph, one supervisor per
/// process, the file watcher, signal handling and the orchestrator loop.
/// Returns the process exit code.
pub async fn run(args: CliArgs) -> errors::Result<i32> {
    let procfile = procfile::load(&args.procfile)?;

    if args.check {
        let n = procfile.processes.len();
        println!(
            "Procfile is valid ({} process{})",
            n,
            if n == 1 { "" } else { "es" }
        );
        return Ok(0);
    }

    let graph = ProcessGraph::from_procfile(procfile)?;

    if args.dry_run {
        print_dry_run(&graph);
        return Ok(0);
    }

    let base_dir = procfile_dir(&args.procfile)?;
    let options = EngineOptions { timestamps: args.timestamps };
    let engine = Engine::new(graph, base_dir, options)?;
    let exit = engine.run().await?;
    Ok(exit.code())
}

/// The directory containing the Procfile anchors watch patterns and
/// relative working directories.
fn procfile_dir(procfile: &std::path::Path) -> anyhow::Result<PathBuf> {
    let dir = match procfile.parent() {
        Some(parent) if !parent.as_os_str().is_empty() => parent.to_path_buf(),
        _ => std::env::current_dir().context("determining working directory")?,
    };
    Ok(dir.canonicalize().unwrap_or(dir))
}

#[derive(Debug, Clone, Default)]
pub struct EngineOptions {
    pub timestamps: bool,
}

/// Test hook: lets integration tests drive shutdown without sending real
/// signals to the test process.
#[derive(Clone)]
pub struct EngineHandle {
    events: mpsc::Sender<EngineEvent>,
}

impl EngineHandle {
    pub async fn shutdown(&self) {
        let _ = self.events.send(EngineEvent::ShutdownRequested).await;
    }

    pub async fn kill_all(&self) {
        let _ = self.events.send(EngineEvent::KillAll).await;
    }
}

/// One configured engine run: supervisors spawned, watcher attached,
/// waiting for [`Engine::run`].
pub struct Engine {
    graph: Arc<ProcessGraph>,
    router: LogRouter,
    router_task: JoinHandle<()>,
    registry: GroupRegistry,
    supervisors: Vec<mpsc::Sender<SupervisorMsg>>,
    supervisor_tasks: Vec<JoinHandle<()>>,
    events_tx: mpsc::Sender<EngineEvent>,
    events_rx: mpsc::Receiver<EngineEvent>,
    watcher: Option<WatcherHandle>,
    watch_enabled: bool,
}

impl Engine {
    /// Must be called within a tokio runtime: supervisors and the log
    /// writer are spawned here (idle until started).
    pub fn new(
        graph: ProcessGraph,
        base_dir: PathBuf,
        options: EngineOptions,
    ) -> anyhow::Result<Self> {
        let graph = Arc::new(graph);

        let names: Vec<&str> = graph.ids().map(|id| graph.name(id)).collect();
        let (router, router_task) = LogRouter::start(&names, options.timestamps);

        let registry = GroupRegistry::default();
        let (events_tx, events_rx) = mpsc::channel::<EngineEvent>(256);
        let global_env = Arc::new(graph.global_env().clone());

        let mut supervisors = Vec::with_capacity(graph.len());
        let mut supervisor_tasks = Vec::with_capacity(graph.len());
        for id in graph.ids() {
            let (tx, task) = spawn_supervisor(
                id,
                graph.spec(id).clone(),
                base_dir.clone(),
                Arc::clone(&global_env),
                router.clone(),
                events_tx.clone(),
                registry.clone(),
            );
            supervisors.push(tx);
            supervisor_tasks.push(task);
        }

        let watch_enabled = graph.ids().any(|id| graph.spec(id).is_watched());
        let watcher = if watch_enabled {
            let profiles =
                build_watch_profiles(graph.ids().map(|id| (id, graph.spec(id).clone())))?;
            let ignore = IgnoreMatcher::new(&base_dir);
            Some(spawn_watcher(
                base_dir,
                profiles,
                ignore,
                Arc::clone(&graph),
                supervisors.clone(),
            )?)
        } else {
            None
        };

        Ok(Self {
            graph,
            router,
            router_task,
            registry,
            supervisors,
            supervisor_tasks,
            events_tx,
            events_rx,
            watcher,
            watch_enabled,
        })
    }

    pub fn handle(&self) -> EngineHandle {
        EngineHandle { events: self.events_tx.clone() }
    }

    pub async fn run(self) -> anyhow::Result<EngineExit> {
        let Engine {
            graph,
            router,
            router_task,
            registry,
            supervisors,
            supervisor_tasks,
            events_tx,
            events_rx,
            watcher,
            watch_enabled,
        } = self;

        // Children must not outlive the engine, whatever the exit path.
        let mut guard = KillGuard::new(registry.clone());

        let signal_task = spawn_signal_listener(events_tx.clone());

        let orchestrator = Orchestrator::new(
            Arc::clone(&graph),
            supervisors,
            events_rx,
            router.clone(),
            registry,
            watch_enabled,
        );
        let exit = orchestrator.run().await?;

        guard.disarm();
        signal_task.abort();
        drop(watcher);

        router.flush().await;
        for task in supervisor_tasks {
            task.abort();
        }
        router_task.abort();

        Ok(exit)
    }
}

/// SIGINT/SIGTERM trigger one graceful shutdown; repeated SIGINTs inside
/// the escalation window force a SIGKILL of every process group.
fn spawn_signal_listener(events: mpsc::Sender<EngineEvent>) -> JoinHandle<()> {
    tokio::spawn(async move {
        use tokio::signal::unix::{signal, SignalKind};

        let (mut interrupt, mut terminate, mut hangup) = match (
            signal(SignalKind::interrupt()),
            signal(SignalKind::terminate()),
            signal(SignalKind::hangup()),
        ) {
            (Ok(i), Ok(t), Ok(h)) => (i, t, h),
            _ => {
                warn!("failed to install signal handlers");
                return;
            }
        };

        let mut requested = false;
        let mut last_interrupt: Option<Instant> = None;

        loop {
            tokio::select! {
                _ = interrupt.recv() => {
                    let now = Instant::now();
                    let escalate = requested
                        && last_interrupt
                            .is_some_and(|t| now.duration_since(t) <= SIGINT_ESCALATION_WINDOW);
                    last_interrupt = Some(now);
                    let event = if escalate {
                        EngineEvent::KillAll
                    } else if !requested {
                        requested = true;
                        EngineEvent::ShutdownRequested
                    } else {
                        continue;
                    };
                    if events.send(event).await.is_err() {
                        return;
                    }
                }
                _ = terminate.recv() => {
                    if !requested {
                        requested = true;
                        if events.send(EngineEvent::ShutdownRequested).await.is_err() {
                            return;
                        }
                    }
                }
                // Loss of the controlling terminal also shuts down.
                _ = hangup.recv() => {
                    if !requested {
                        requested = true;
                        if events.send(EngineEvent::ShutdownRequested).await.is_err() {
                            return;
                        }
                    }
                }
            }
        }
    })
}

/// `--dry-run`: print the resolved graph and do nothing.
fn print_dry_run(graph: &ProcessGraph) {
    println!("proctor dry-run");

    if !graph.global_env().is_empty() {
        println!("global env:");
        for (key, value) in graph.global_env() {
            println!("  {key}={value}");
        }
    }

    println!("processes ({}), in start order:", graph.len());
    for &id in graph.topo_order() {
        let spec = graph.spec(id);
        print!("  - {}", spec.name);
        if spec.kind.is_one_shot() {
            print!(" (one-shot)");
        }
        println!(": {}", spec.command.lines().next().unwrap_or(""));
        if !spec.dependencies.is_empty() {
            println!("      after: {}", spec.dependencies.join(", "));
        }
        if !spec.watch_includes.is_empty() {
            println!("      watch: {}", spec.watch_includes.join(" "));
        }
        if !spec.watch_excludes.is_empty() {
            println!("      exclude: {}", spec.watch_excludes.join(" "));
        }
        if let Some(ready) = &spec.ready {
            println!("      ready: {:?}", ready);
        }
        if let Some(dir) = &spec.dir {
            println!("      dir: {dir}");
        }
    }

    let shutdown: Vec<&str> = graph
        .shutdown_order()
        .into_iter()
        .map(|id| graph.name(id))
        .collect();
    println!("shutdown order: {}", shutdown.join(", "));
}
