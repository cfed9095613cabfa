// src/engine/mod.rs

//! Orchestration engine.
//!
//! Each process gets a [`supervisor`] actor driven by a mailbox; the
//! [`orchestrator`] owns the graph and reacts to supervisor notifications:
//! releasing dependents at startup, cascading reloads downstream, and
//! running the reverse-topological shutdown. Supervisors share no state
//! with one another.

pub mod orchestrator;
pub mod supervisor;

use std::path::PathBuf;
use std::process::ExitStatus;

use crate::dag::ProcId;
use crate::probe::ProbeOutcome;

pub use orchestrator::{EngineExit, Orchestrator};
pub use supervisor::spawn_supervisor;

/// Lifecycle phase of one supervised process.
///
/// `Ready` is the instant a long-running process passes its gate (probe ok,
/// or spawn for probe-less processes); it settles into `Running` right
/// after the orchestrator has been notified. `Crashed` means a backoff
/// restart is pending, so it is not terminal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Phase {
    Pending,
    Starting,
    Ready,
    Running,
    Reloading,
    Completed,
    Crashed,
    Stopping,
    Stopped,
    Failed,
}

impl Phase {
    /// Reload is legal once a process has come up (or finished, for
    /// one-shots and cleanly exited long-running processes).
    pub fn can_reload(self) -> bool {
        matches!(self, Phase::Ready | Phase::Running | Phase::Completed)
    }
}

/// Why the current incarnation was started.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StartCause {
    Initial,
    CrashBackoff,
    FileReload,
    CascadeReload,
}

/// Normalised child exit status.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExitKind {
    Clean,
    Code(i32),
    Signal(i32),
    Unknown,
}

impl ExitKind {
    pub fn is_clean(self) -> bool {
        matches!(self, ExitKind::Clean)
    }
}

impl From<ExitStatus> for ExitKind {
    fn from(status: ExitStatus) -> Self {
        if status.success() {
            return ExitKind::Clean;
        }
        if let Some(code) = status.code() {
            return ExitKind::Code(code);
        }
        #[cfg(unix)]
        {
            use std::os::unix::process::ExitStatusExt;
            if let Some(sig) = status.signal() {
                return ExitKind::Signal(sig);
            }
        }
        ExitKind::Unknown
    }
}

impl std::fmt::Display for ExitKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ExitKind::Clean => write!(f, "exit 0"),
            ExitKind::Code(code) => write!(f, "exit {}", code),
            ExitKind::Signal(sig) => write!(f, "signal {}", sig),
            ExitKind::Unknown => write!(f, "exit ?"),
        }
    }
}

/// Mailbox protocol of a supervisor.
///
/// `Start`, `Stop` and `Reload` come from the orchestrator, `FileChanged`
/// from the watcher; the remaining variants are sent back by the
/// supervisor's own helper tasks (child waiter, probe, timers) and carry
/// the epoch or generation that guards against stale deliveries.
#[derive(Debug)]
pub enum SupervisorMsg {
    Start,
    Stop,
    Reload { cause: StartCause },
    FileChanged { path: PathBuf },
    DebounceFired { generation: u64 },
    ChildExited { epoch: u64, exit: ExitKind },
    ProbeResult { epoch: u64, outcome: ProbeOutcome },
    GraceExpired { epoch: u64 },
    BackoffExpired { epoch: u64 },
}

/// Notifications from supervisors (and the signal listener) to the
/// orchestrator.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EngineEvent {
    /// A long-running process came up.
    Ready { id: ProcId, cause: StartCause },
    /// A process exited cleanly; counts as ready for dependents.
    Completed { id: ProcId, cause: StartCause },
    /// A one-shot exited non-zero (or could not spawn); aborts startup.
    Failed { id: ProcId },
    /// Stop finished; `forced` records a SIGKILL escalation.
    Stopped { id: ProcId, forced: bool },
    ShutdownRequested,
    KillAll,
}
