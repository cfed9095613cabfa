// src/engine/supervisor.rs

//! Per-process supervisor actor.
//!
//! One supervisor owns the runtime state of one Procfile process for the
//! engine's whole lifetime. It runs as a tokio task consuming its mailbox;
//! child waits, readiness probes, debounce timers, grace timers and backoff
//! timers are all helper tasks that post back into the same mailbox, tagged
//! with the epoch (or generation) they belong to. The epoch guard makes a
//! killed incarnation unable to drive transitions for its successor.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use nix::sys::signal::Signal;
use nix::unistd::Pid;
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tokio::time::{sleep, Instant};
use tracing::{debug, trace};

use crate::dag::ProcId;
use crate::engine::{EngineEvent, ExitKind, Phase, StartCause, SupervisorMsg};
use crate::exec::{signal_group, spawn_in_group, GroupRegistry};
use crate::output::{pump_lines, LogRouter, StreamKind};
use crate::probe::{self, ProbeOutcome};
use crate::procfile::ProcessSpec;

/// Restart delay after the `level`-th consecutive crash: min(2^level, 32)s.
pub fn backoff_delay(level: u32) -> Duration {
    Duration::from_secs(1u64 << level.min(5))
}

/// Spawn the supervisor task for one process. The returned sender is its
/// mailbox; the task lives until every sender is dropped.
pub fn spawn_supervisor(
    id: ProcId,
    spec: ProcessSpec,
    base_dir: PathBuf,
    global_env: Arc<BTreeMap<String, String>>,
    router: LogRouter,
    events: mpsc::Sender<EngineEvent>,
    groups: GroupRegistry,
) -> (mpsc::Sender<SupervisorMsg>, JoinHandle<()>) {
    let (tx, rx) = mpsc::channel(64);
    let supervisor = Supervisor {
        id,
        spec,
        base_dir,
        global_env,
        router,
        events,
        groups,
        mailbox: rx,
        self_tx: tx.clone(),
        phase: Phase::Pending,
        epoch: 0,
        backoff_level: 0,
        spawned_at: None,
        start_cause: StartCause::Initial,
        reload_cause: StartCause::FileReload,
        pending_paths: BTreeSet::new(),
        debounce_gen: 0,
        pgid: None,
        probe_cancel: None,
        kill_escalated: false,
    };
    let task = tokio::spawn(supervisor.run());
    (tx, task)
}

struct Supervisor {
    id: ProcId,
    spec: ProcessSpec,
    base_dir: PathBuf,
    global_env: Arc<BTreeMap<String, String>>,
    router: LogRouter,
    events: mpsc::Sender<EngineEvent>,
    groups: GroupRegistry,
    mailbox: mpsc::Receiver<SupervisorMsg>,
    self_tx: mpsc::Sender<SupervisorMsg>,

    phase: Phase,
    epoch: u64,
    backoff_level: u32,
    spawned_at: Option<Instant>,
    start_cause: StartCause,
    reload_cause: StartCause,
    pending_paths: BTreeSet<PathBuf>,
    debounce_gen: u64,
    pgid: Option<Pid>,
    probe_cancel: Option<watch::Sender<bool>>,
    kill_escalated: bool,
}

impl Supervisor {
    async fn run(mut self) {
        while let Some(msg) = self.mailbox.recv().await {
            trace!(process = %self.spec.name, ?msg, phase = ?self.phase, "supervisor message");
            match msg {
                SupervisorMsg::Start => self.handle_start().await,
                SupervisorMsg::Stop => self.handle_stop().await,
                SupervisorMsg::Reload { cause } => self.handle_reload(cause).await,
                SupervisorMsg::FileChanged { path } => self.handle_file_changed(path),
                SupervisorMsg::DebounceFired { generation } => {
                    self.handle_debounce(generation).await
                }
                SupervisorMsg::ChildExited { epoch, exit } => {
                    self.handle_child_exit(epoch, exit).await
                }
                SupervisorMsg::ProbeResult { epoch, outcome } => {
                    self.handle_probe(epoch, outcome).await
                }
                SupervisorMsg::GraceExpired { epoch } => self.handle_grace(epoch).await,
                SupervisorMsg::BackoffExpired { epoch } => self.handle_backoff(epoch).await,
            }
        }
        debug!(process = %self.spec.name, "supervisor mailbox closed");
    }

    async fn handle_start(&mut self) {
        if self.phase != Phase::Pending {
            debug!(process = %self.spec.name, phase = ?self.phase, "duplicate start ignored");
            return;
        }
        self.start_child(StartCause::Initial).await;
    }

    /// Spawn a new incarnation. Bumps the epoch first so everything the old
    /// incarnation still sends gets discarded.
    async fn start_child(&mut self, cause: StartCause) {
        self.epoch += 1;
        self.start_cause = cause;
        self.kill_escalated = false;

        let env = self.merged_env();
        let dir = self.workdir();
        let spawned = match spawn_in_group(&self.spec.command, &dir, &env) {
            Ok(spawned) => spawned,
            Err(err) => {
                if self.spec.kind.is_one_shot() {
                    self.router
                        .control(format!(
                            "{}: failed to start: {} (aborting)",
                            self.spec.name, err
                        ))
                        .await;
                    self.phase = Phase::Failed;
                    let _ = self.events.send(EngineEvent::Failed { id: self.id }).await;
                } else {
                    self.schedule_restart(None, format!("failed to start: {}", err)).await;
                }
                return;
            }
        };

        self.groups.track(spawned.pgid);
        self.pgid = Some(spawned.pgid);
        self.spawned_at = Some(Instant::now());

        tokio::spawn(pump_lines(
            spawned.stdout,
            self.router.clone(),
            self.spec.name.clone(),
            StreamKind::Stdout,
        ));
        tokio::spawn(pump_lines(
            spawned.stderr,
            self.router.clone(),
            self.spec.name.clone(),
            StreamKind::Stderr,
        ));

        let mut child = spawned.child;
        let waiter_tx = self.self_tx.clone();
        let waiter_groups = self.groups.clone();
        let pgid = spawned.pgid;
        let epoch = self.epoch;
        tokio::spawn(async move {
            let exit = match child.wait().await {
                Ok(status) => ExitKind::from(status),
                Err(_) => ExitKind::Unknown,
            };
            waiter_groups.untrack(pgid);
            let _ = waiter_tx.send(SupervisorMsg::ChildExited { epoch, exit }).await;
        });

        if self.spec.kind.is_one_shot() {
            self.phase = Phase::Starting;
        } else if let Some(ready) = self.spec.ready.clone() {
            self.phase = Phase::Starting;
            self.spawn_probe(ready, env, dir);
        } else {
            self.router.control(format!("{}: started", self.spec.name)).await;
            self.announce_up().await;
        }
    }

    fn spawn_probe(&mut self, ready: crate::procfile::ReadySpec, env: HashMap<String, String>, dir: PathBuf) {
        let (cancel_tx, cancel_rx) = watch::channel(false);
        self.probe_cancel = Some(cancel_tx);
        let tx = self.self_tx.clone();
        let epoch = self.epoch;
        tokio::spawn(async move {
            let outcome = probe::wait_until_ready(&ready, &env, &dir, cancel_rx).await;
            let _ = tx.send(SupervisorMsg::ProbeResult { epoch, outcome }).await;
        });
    }

    /// Tell the orchestrator we are up, then settle into `Running`. Changes
    /// that queued while we were starting or reloading get their debounce
    /// re-armed now.
    async fn announce_up(&mut self) {
        self.phase = Phase::Ready;
        let _ = self
            .events
            .send(EngineEvent::Ready { id: self.id, cause: self.start_cause })
            .await;
        self.phase = Phase::Running;
        if !self.pending_paths.is_empty() {
            self.arm_debounce();
        }
    }

    fn handle_file_changed(&mut self, path: PathBuf) {
        match self.phase {
            Phase::Starting
            | Phase::Ready
            | Phase::Running
            | Phase::Reloading
            | Phase::Completed => {
                self.pending_paths.insert(path);
                self.arm_debounce();
            }
            _ => {
                trace!(process = %self.spec.name, phase = ?self.phase, "change dropped");
            }
        }
    }

    /// Each event resets the timer; only the newest generation fires.
    fn arm_debounce(&mut self) {
        self.debounce_gen += 1;
        let generation = self.debounce_gen;
        let delay = self.spec.debounce;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SupervisorMsg::DebounceFired { generation }).await;
        });
    }

    async fn handle_debounce(&mut self, generation: u64) {
        if generation != self.debounce_gen {
            return;
        }
        if self.pending_paths.is_empty() || !self.phase.can_reload() {
            // Not reloadable right now; paths stay queued and announce_up
            // re-arms the timer once the process is back.
            return;
        }
        self.begin_reload(StartCause::FileReload).await;
    }

    async fn handle_reload(&mut self, cause: StartCause) {
        if !self.phase.can_reload() {
            debug!(process = %self.spec.name, phase = ?self.phase, "reload ignored");
            return;
        }
        self.begin_reload(cause).await;
    }

    /// Kill protocol: configured signal to the group, `shutdown_grace` to
    /// comply, then SIGKILL. Already-exited processes respawn immediately.
    async fn begin_reload(&mut self, cause: StartCause) {
        let paths = std::mem::take(&mut self.pending_paths);
        self.reload_cause = cause;
        self.cancel_probe();

        let why = match cause {
            StartCause::FileReload => format!("change detected ({})", summarize_paths(&paths)),
            _ => "dependency reloaded".to_string(),
        };

        match self.pgid {
            Some(pgid) => {
                self.phase = Phase::Reloading;
                self.router
                    .control(format!(
                        "{}: {}, sending SIG{}",
                        self.spec.name,
                        why,
                        self.spec.signal.name()
                    ))
                    .await;
                signal_group(pgid, self.spec.signal.as_nix());
                self.arm_grace_timer();
            }
            None => {
                self.router
                    .control(format!("{}: {}, restarting", self.spec.name, why))
                    .await;
                self.start_child(cause).await;
            }
        }
    }

    fn arm_grace_timer(&self) {
        let epoch = self.epoch;
        let delay = self.spec.shutdown_grace;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SupervisorMsg::GraceExpired { epoch }).await;
        });
    }

    async fn handle_grace(&mut self, epoch: u64) {
        if epoch != self.epoch || !matches!(self.phase, Phase::Reloading | Phase::Stopping) {
            return;
        }
        if let Some(pgid) = self.pgid {
            self.kill_escalated = true;
            self.router
                .control(format!(
                    "{}: still alive after {:?}, sending SIGKILL",
                    self.spec.name, self.spec.shutdown_grace
                ))
                .await;
            signal_group(pgid, Signal::SIGKILL);
        }
    }

    async fn handle_child_exit(&mut self, epoch: u64, exit: ExitKind) {
        if epoch != self.epoch {
            trace!(process = %self.spec.name, epoch, current = self.epoch, "stale exit ignored");
            return;
        }
        self.pgid = None;
        self.cancel_probe();
        let ran_for = self.spawned_at.take().map(|t| t.elapsed());

        match self.phase {
            Phase::Stopping => {
                self.phase = Phase::Stopped;
                let _ = self
                    .events
                    .send(EngineEvent::Stopped { id: self.id, forced: self.kill_escalated })
                    .await;
            }
            Phase::Reloading => {
                self.start_child(self.reload_cause).await;
            }
            Phase::Starting | Phase::Ready | Phase::Running => {
                if exit.is_clean() {
                    self.phase = Phase::Completed;
                    self.router.control(format!("{}: finished", self.spec.name)).await;
                    let _ = self
                        .events
                        .send(EngineEvent::Completed { id: self.id, cause: self.start_cause })
                        .await;
                    if !self.pending_paths.is_empty() {
                        self.arm_debounce();
                    }
                } else if self.spec.kind.is_one_shot() {
                    self.phase = Phase::Failed;
                    self.router
                        .control(format!("{}: {} (aborting)", self.spec.name, exit))
                        .await;
                    let _ = self.events.send(EngineEvent::Failed { id: self.id }).await;
                } else {
                    self.schedule_restart(ran_for, format!("crashed ({})", exit)).await;
                }
            }
            _ => {
                debug!(process = %self.spec.name, phase = ?self.phase, "exit in unexpected phase");
            }
        }
    }

    /// Crash path. A run that lasted at least the current delay earns one
    /// level back; reload restarts never come through here.
    async fn schedule_restart(&mut self, ran_for: Option<Duration>, why: String) {
        if let Some(ran) = ran_for {
            if ran >= backoff_delay(self.backoff_level) {
                self.backoff_level = self.backoff_level.saturating_sub(1);
            }
        }
        let delay = backoff_delay(self.backoff_level);
        self.backoff_level += 1;
        self.phase = Phase::Crashed;

        self.router
            .control(format!(
                "{}: {}, restarting in {}s",
                self.spec.name,
                why,
                delay.as_secs()
            ))
            .await;

        let epoch = self.epoch;
        let tx = self.self_tx.clone();
        tokio::spawn(async move {
            sleep(delay).await;
            let _ = tx.send(SupervisorMsg::BackoffExpired { epoch }).await;
        });
    }

    async fn handle_backoff(&mut self, epoch: u64) {
        if epoch != self.epoch || self.phase != Phase::Crashed {
            return;
        }
        self.start_child(StartCause::CrashBackoff).await;
    }

    async fn handle_probe(&mut self, epoch: u64, outcome: ProbeOutcome) {
        if epoch != self.epoch || self.phase != Phase::Starting {
            return;
        }
        match outcome {
            ProbeOutcome::Ready => {
                self.router.control(format!("{}: ready", self.spec.name)).await;
                self.announce_up().await;
            }
            ProbeOutcome::TimedOut => {
                // Not fatal: the process keeps running, its dependents stay
                // blocked, and probing stops here.
                self.router
                    .control(format!(
                        "{}: ready probe timed out after {:?}",
                        self.spec.name,
                        probe::PROBE_TIMEOUT
                    ))
                    .await;
            }
            ProbeOutcome::Cancelled => {}
        }
    }

    async fn handle_stop(&mut self) {
        self.cancel_probe();
        self.pending_paths.clear();
        match self.phase {
            Phase::Stopping | Phase::Stopped => {}
            _ => match self.pgid {
                Some(pgid) => {
                    self.phase = Phase::Stopping;
                    signal_group(pgid, self.spec.signal.as_nix());
                    self.arm_grace_timer();
                }
                None => {
                    self.phase = Phase::Stopped;
                    let _ = self
                        .events
                        .send(EngineEvent::Stopped { id: self.id, forced: false })
                        .await;
                }
            },
        }
    }

    fn cancel_probe(&mut self) {
        if let Some(cancel) = self.probe_cancel.take() {
            let _ = cancel.send(true);
        }
    }

    /// inherited ∪ global ∪ inline, right wins.
    fn merged_env(&self) -> HashMap<String, String> {
        let mut env: HashMap<String, String> = self
            .global_env
            .iter()
            .map(|(k, v)| (k.clone(), v.clone()))
            .collect();
        env.extend(self.spec.inline_env.iter().cloned());
        env
    }

    fn workdir(&self) -> PathBuf {
        match &self.spec.dir {
            Some(dir) => self.base_dir.join(dir),
            None => self.base_dir.clone(),
        }
    }
}

fn summarize_paths(paths: &BTreeSet<PathBuf>) -> String {
    if paths.is_empty() {
        return "files changed".to_string();
    }
    let shown: Vec<String> = paths.iter().take(3).map(|p| p.display().to_string()).collect();
    if paths.len() > 3 {
        format!("{} +{} more", shown.join(", "), paths.len() - 3)
    } else {
        shown.join(", ")
    }
}
