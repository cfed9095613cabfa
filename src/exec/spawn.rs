// src/exec/spawn.rs

use std::collections::{HashMap, HashSet};
use std::io;
use std::path::Path;
use std::process::Stdio;
use std::sync::{Arc, Mutex};

use nix::sys::signal::{killpg, Signal};
use nix::unistd::Pid;
use tokio::process::{Child, ChildStderr, ChildStdout, Command};
use tracing::debug;

/// A freshly spawned child with its output streams split off.
pub struct SpawnedChild {
    pub child: Child,
    pub pgid: Pid,
    pub stdout: ChildStdout,
    pub stderr: ChildStderr,
}

/// Spawn `command` through the user's shell in its own process group.
///
/// The group is what gets signalled later, so shell subprocesses and their
/// children die together with the shell.
pub fn spawn_in_group(
    command: &str,
    dir: &Path,
    env: &HashMap<String, String>,
) -> io::Result<SpawnedChild> {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());

    let mut cmd = Command::new(&shell);
    cmd.arg("-c")
        .arg(command)
        .current_dir(dir)
        .envs(env)
        .stdin(Stdio::null())
        .stdout(Stdio::piped())
        .stderr(Stdio::piped())
        .process_group(0);

    let mut child = cmd.spawn()?;
    let pid = child
        .id()
        .ok_or_else(|| io::Error::other("spawned child has no pid"))?;
    let pgid = Pid::from_raw(pid as i32);

    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| io::Error::other("child stdout was not captured"))?;
    let stderr = child
        .stderr
        .take()
        .ok_or_else(|| io::Error::other("child stderr was not captured"))?;

    debug!(%pgid, shell = %shell, "spawned process group");
    Ok(SpawnedChild { child, pgid, stdout, stderr })
}

/// Deliver a signal to a whole process group. ESRCH (group already gone)
/// is not an error worth surfacing.
pub fn signal_group(pgid: Pid, signal: Signal) {
    if let Err(err) = killpg(pgid, signal) {
        if err != nix::errno::Errno::ESRCH {
            debug!(%pgid, ?signal, error = %err, "killpg failed");
        }
    }
}

/// Shared registry of live process groups.
///
/// Supervisors track/untrack their groups; the orchestrator uses
/// [`GroupRegistry::kill_all`] for the second-SIGINT escalation, and
/// [`KillGuard`] replays it on any abnormal exit path so no child outlives
/// the engine.
#[derive(Clone, Default)]
pub struct GroupRegistry {
    inner: Arc<Mutex<HashSet<i32>>>,
}

impl GroupRegistry {
    pub fn track(&self, pgid: Pid) {
        self.lock().insert(pgid.as_raw());
    }

    pub fn untrack(&self, pgid: Pid) {
        self.lock().remove(&pgid.as_raw());
    }

    pub fn kill_all(&self) {
        let groups: Vec<i32> = self.lock().iter().copied().collect();
        for raw in groups {
            signal_group(Pid::from_raw(raw), Signal::SIGKILL);
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashSet<i32>> {
        // A poisoned registry still holds valid pgids; recover it.
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }
}

/// SIGKILLs every registered group when dropped, unless disarmed after a
/// clean shutdown.
pub struct KillGuard {
    registry: GroupRegistry,
    armed: bool,
}

impl KillGuard {
    pub fn new(registry: GroupRegistry) -> Self {
        Self { registry, armed: true }
    }

    pub fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for KillGuard {
    fn drop(&mut self) {
        if self.armed {
            self.registry.kill_all();
        }
    }
}
