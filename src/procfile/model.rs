// src/procfile/model.rs

//! Parsed Procfile data model.
//!
//! Everything here is immutable once the parser returns: the engine clones
//! what it needs and never writes back.

use std::collections::BTreeMap;
use std::time::Duration;

/// Whether a process is expected to exit (`name!`) or stay alive.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessKind {
    OneShot,
    LongRunning,
}

impl ProcessKind {
    pub fn is_one_shot(self) -> bool {
        matches!(self, ProcessKind::OneShot)
    }
}

/// Readiness probe declared with `ready=`.
///
/// - bare port: `ready=5432` probes TCP connect.
/// - `ready=http:8080/health=200` probes an HTTP GET.
/// - `ready=exec:'pg_isready -q'` runs a shell command until it exits 0.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadySpec {
    Tcp { port: u16 },
    Http { port: u16, path: String, status: Option<u16> },
    Exec { command: String },
}

/// Signal delivered to a process group on reload (default TERM).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ReloadSignal {
    Hup,
    Int,
    Quit,
    #[default]
    Term,
    Kill,
    Usr1,
    Usr2,
}

impl ReloadSignal {
    pub fn from_name(name: &str) -> Option<Self> {
        let upper = name.to_ascii_uppercase();
        let bare = upper.strip_prefix("SIG").unwrap_or(&upper);
        match bare {
            "HUP" => Some(Self::Hup),
            "INT" => Some(Self::Int),
            "QUIT" => Some(Self::Quit),
            "TERM" => Some(Self::Term),
            "KILL" => Some(Self::Kill),
            "USR1" => Some(Self::Usr1),
            "USR2" => Some(Self::Usr2),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Self::Hup => "HUP",
            Self::Int => "INT",
            Self::Quit => "QUIT",
            Self::Term => "TERM",
            Self::Kill => "KILL",
            Self::Usr1 => "USR1",
            Self::Usr2 => "USR2",
        }
    }

    pub fn as_nix(self) -> nix::sys::signal::Signal {
        use nix::sys::signal::Signal;
        match self {
            Self::Hup => Signal::SIGHUP,
            Self::Int => Signal::SIGINT,
            Self::Quit => Signal::SIGQUIT,
            Self::Term => Signal::SIGTERM,
            Self::Kill => Signal::SIGKILL,
            Self::Usr1 => Signal::SIGUSR1,
            Self::Usr2 => Signal::SIGUSR2,
        }
    }
}

pub const DEFAULT_DEBOUNCE: Duration = Duration::from_millis(500);
pub const DEFAULT_SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

/// One process definition from the Procfile.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessSpec {
    pub name: String,
    pub kind: ProcessKind,
    pub command: String,
    pub inline_env: Vec<(String, String)>,
    pub watch_includes: Vec<String>,
    pub watch_excludes: Vec<String>,
    pub dependencies: Vec<String>,
    pub ready: Option<ReadySpec>,
    pub signal: ReloadSignal,
    pub debounce: Duration,
    pub dir: Option<String>,
    pub shutdown_grace: Duration,
}

impl ProcessSpec {
    pub fn new(name: impl Into<String>, kind: ProcessKind) -> Self {
        Self {
            name: name.into(),
            kind,
            command: String::new(),
            inline_env: Vec::new(),
            watch_includes: Vec::new(),
            watch_excludes: Vec::new(),
            dependencies: Vec::new(),
            ready: None,
            signal: ReloadSignal::default(),
            debounce: DEFAULT_DEBOUNCE,
            dir: None,
            shutdown_grace: DEFAULT_SHUTDOWN_GRACE,
        }
    }

    /// Processes with at least one include pattern participate in watching.
    pub fn is_watched(&self) -> bool {
        !self.watch_includes.is_empty()
    }
}

/// A fully parsed and validated Procfile.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Procfile {
    pub env: BTreeMap<String, String>,
    pub processes: Vec<ProcessSpec>,
}
