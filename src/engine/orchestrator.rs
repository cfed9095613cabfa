// src/engine/orchestrator.rs

//! Graph-level coordination.
//!
//! The orchestrator is the only task holding the whole-graph view. It
//! starts the indegree-0 processes, releases dependents as their
//! dependencies come up, cascades reloads downstream in topological order,
//! and drives the reverse-topological shutdown where each process is only
//! stopped once all of its dependents have fully stopped.

use std::collections::VecDeque;
use std::sync::Arc;

use anyhow::Result;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::dag::{ProcId, ProcessGraph};
use crate::engine::{EngineEvent, StartCause, SupervisorMsg};
use crate::exec::GroupRegistry;
use crate::output::LogRouter;

/// How the engine ended; maps onto the process exit code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct EngineExit {
    /// A one-shot failed (or could not spawn) and aborted startup.
    pub startup_aborted: bool,
    /// At least one process needed SIGKILL, or the operator escalated.
    pub forced_kill: bool,
}

impl EngineExit {
    pub fn is_clean(self) -> bool {
        !self.startup_aborted && !self.forced_kill
    }

    pub fn code(self) -> i32 {
        if self.is_clean() {
            0
        } else {
            1
        }
    }
}

pub struct Orchestrator {
    graph: Arc<ProcessGraph>,
    supervisors: Vec<mpsc::Sender<SupervisorMsg>>,
    events_rx: mpsc::Receiver<EngineEvent>,
    router: LogRouter,
    groups: GroupRegistry,
    /// Any process with watch patterns keeps the engine alive after
    /// everything has run to completion.
    watch_enabled: bool,

    waiting_deps: Vec<usize>,
    started: Vec<bool>,
    released: Vec<bool>,
    done: Vec<bool>,

    shutting_down: bool,
    stop_issued: Vec<bool>,
    stopped: Vec<bool>,
    dependents_alive: Vec<usize>,

    cascade: VecDeque<ProcId>,
    cascade_waiting: Option<ProcId>,

    startup_aborted: bool,
    forced_kill: bool,
}

impl Orchestrator {
    pub fn new(
        graph: Arc<ProcessGraph>,
        supervisors: Vec<mpsc::Sender<SupervisorMsg>>,
        events_rx: mpsc::Receiver<EngineEvent>,
        router: LogRouter,
        groups: GroupRegistry,
        watch_enabled: bool,
    ) -> Self {
        let n = graph.len();
        let waiting_deps = graph.ids().map(|id| graph.dependencies(id).len()).collect();
        Self {
            graph,
            supervisors,
            events_rx,
            router,
            groups,
            watch_enabled,
            waiting_deps,
            started: vec![false; n],
            released: vec![false; n],
            done: vec![false; n],
            shutting_down: false,
            stop_issued: vec![false; n],
            stopped: vec![false; n],
            dependents_alive: vec![0; n],
            cascade: VecDeque::new(),
            cascade_waiting: None,
            startup_aborted: false,
            forced_kill: false,
        }
    }

    pub async fn run(mut self) -> Result<EngineExit> {
        if self.graph.is_empty() {
            return Ok(self.exit());
        }

        info!(processes = self.graph.len(), "engine starting");
        for id in self.graph.roots() {
            self.start(id).await?;
        }

        while let Some(event) = self.events_rx.recv().await {
            debug!(?event, "orchestrator event");
            let keep_running = match event {
                EngineEvent::Ready { id, cause } => self.handle_up(id, false, cause).await?,
                EngineEvent::Completed { id, cause } => self.handle_up(id, true, cause).await?,
                EngineEvent::Failed { id } => self.handle_failed(id).await?,
                EngineEvent::Stopped { id, forced } => self.handle_stopped(id, forced).await?,
                EngineEvent::ShutdownRequested => self.begin_shutdown().await?,
                EngineEvent::KillAll => self.escalate().await?,
            };
            if !keep_running {
                break;
            }
            if !self.shutting_down && !self.watch_enabled && self.all_done() {
                info!("all processes finished");
                break;
            }
        }

        Ok(self.exit())
    }

    fn exit(&self) -> EngineExit {
        EngineExit { startup_aborted: self.startup_aborted, forced_kill: self.forced_kill }
    }

    async fn start(&mut self, id: ProcId) -> Result<()> {
        if self.started[id.index()] || self.shutting_down {
            return Ok(());
        }
        self.started[id.index()] = true;
        self.send(id, SupervisorMsg::Start).await
    }

    /// A process came up (`Ready`) or finished cleanly (`Completed`).
    async fn handle_up(&mut self, id: ProcId, completed: bool, cause: StartCause) -> Result<bool> {
        self.done[id.index()] = completed;

        // First time up: release dependents whose last dependency this was.
        if !self.released[id.index()] {
            self.released[id.index()] = true;
            for dependent in self.graph.dependents(id).to_vec() {
                self.waiting_deps[dependent.index()] -= 1;
                if self.waiting_deps[dependent.index()] == 0 {
                    self.start(dependent).await?;
                }
            }
        }

        if !self.shutting_down {
            if cause == StartCause::FileReload {
                self.enqueue_cascade(id);
            }
            if self.cascade_waiting == Some(id) {
                self.cascade_waiting = None;
            }
            if self.cascade_waiting.is_none() {
                self.advance_cascade().await?;
            }
        }

        Ok(true)
    }

    /// Reload every transitive dependent, one at a time, in topo order.
    fn enqueue_cascade(&mut self, id: ProcId) {
        for dependent in self.graph.descendants(id) {
            if self.cascade_waiting != Some(dependent) && !self.cascade.contains(&dependent) {
                self.cascade.push_back(dependent);
            }
        }
    }

    async fn advance_cascade(&mut self) -> Result<()> {
        if let Some(next) = self.cascade.pop_front() {
            debug!(process = self.graph.name(next), "cascading reload");
            self.cascade_waiting = Some(next);
            self.send(next, SupervisorMsg::Reload { cause: StartCause::CascadeReload })
                .await?;
        }
        Ok(())
    }

    async fn handle_failed(&mut self, id: ProcId) -> Result<bool> {
        self.done[id.index()] = true;
        if self.shutting_down {
            return Ok(true);
        }
        self.startup_aborted = true;
        self.router
            .control(format!("'{}' failed, shutting down", self.graph.name(id)))
            .await;
        self.begin_shutdown().await
    }

    /// Stop sinks first; everything else is gated on its dependents in
    /// [`Orchestrator::handle_stopped`].
    async fn begin_shutdown(&mut self) -> Result<bool> {
        if self.shutting_down {
            return Ok(true);
        }
        self.shutting_down = true;
        self.cascade.clear();
        self.cascade_waiting = None;
        self.router.control("shutting down".to_string()).await;

        for id in self.graph.ids() {
            self.dependents_alive[id.index()] = self.graph.dependents(id).len();
        }
        let sinks: Vec<ProcId> = self
            .graph
            .ids()
            .filter(|id| self.dependents_alive[id.index()] == 0)
            .collect();
        for id in sinks {
            self.issue_stop(id).await?;
        }
        Ok(!self.all_stopped())
    }

    async fn issue_stop(&mut self, id: ProcId) -> Result<()> {
        if self.stop_issued[id.index()] {
            return Ok(());
        }
        self.stop_issued[id.index()] = true;
        self.send(id, SupervisorMsg::Stop).await
    }

    async fn handle_stopped(&mut self, id: ProcId, forced: bool) -> Result<bool> {
        if forced {
            self.forced_kill = true;
        }
        self.done[id.index()] = true;
        self.stopped[id.index()] = true;

        if !self.shutting_down {
            // Shouldn't happen: stops are only issued during shutdown.
            warn!(process = self.graph.name(id), "stopped outside shutdown");
            return Ok(true);
        }

        for dep in self.graph.dependencies(id).to_vec() {
            self.dependents_alive[dep.index()] -= 1;
            if self.dependents_alive[dep.index()] == 0 {
                self.issue_stop(dep).await?;
            }
        }

        Ok(!self.all_stopped())
    }

    /// Second SIGINT inside the escalation window: stop everything now and
    /// SIGKILL every live process group.
    async fn escalate(&mut self) -> Result<bool> {
        self.forced_kill = true;
        self.router.control("force killing all processes".to_string()).await;
        if !self.shutting_down {
            self.begin_shutdown().await?;
        }
        for id in self.graph.ids().collect::<Vec<_>>() {
            self.issue_stop(id).await?;
        }
        self.groups.kill_all();
        Ok(!self.all_stopped())
    }

    fn all_stopped(&self) -> bool {
        self.stopped.iter().all(|&s| s)
    }

    fn all_done(&self) -> bool {
        self.done.iter().all(|&d| d)
    }

    async fn send(&self, id: ProcId, msg: SupervisorMsg) -> Result<()> {
        self.supervisors[id.index()]
            .send(msg)
            .await
            .map_err(|_| anyhow::anyhow!("supervisor for '{}' is gone", self.graph.name(id)))
    }
}
