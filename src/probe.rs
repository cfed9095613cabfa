// src/probe.rs

//! Readiness probing.
//!
//! A probe task is spawned alongside each child that declares `ready=`; it
//! polls every 250ms until the probe passes, the 30s deadline elapses, or
//! the supervisor cancels it (reload or stop). Probe failures are never
//! fatal: a connection refused, an HTTP 5xx or a non-zero exec exit all
//! just mean "not ready yet".

use std::collections::HashMap;
use std::net::{IpAddr, Ipv4Addr, Ipv6Addr, SocketAddr};
use std::path::Path;
use std::time::Duration;

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout, Instant};
use tracing::trace;

use crate::procfile::ReadySpec;

pub const POLL_INTERVAL: Duration = Duration::from_millis(250);
pub const PROBE_TIMEOUT: Duration = Duration::from_secs(30);
const CONNECT_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProbeOutcome {
    Ready,
    TimedOut,
    Cancelled,
}

/// Poll `spec` until it reports ready, times out, or is cancelled.
///
/// `env` and `dir` are the child's merged environment and working directory;
/// exec probes inherit both. Cancellation (the watch value flipping to
/// `true`, or the sender going away) is observed within one poll interval.
pub async fn wait_until_ready(
    spec: &ReadySpec,
    env: &HashMap<String, String>,
    dir: &Path,
    mut cancel: watch::Receiver<bool>,
) -> ProbeOutcome {
    let deadline = Instant::now() + PROBE_TIMEOUT;

    loop {
        if *cancel.borrow() {
            return ProbeOutcome::Cancelled;
        }

        tokio::select! {
            ready = check_once(spec, env, dir) => {
                if ready {
                    return ProbeOutcome::Ready;
                }
            }
            _ = cancelled(&mut cancel) => return ProbeOutcome::Cancelled,
        }

        if Instant::now() >= deadline {
            return ProbeOutcome::TimedOut;
        }

        tokio::select! {
            _ = sleep(POLL_INTERVAL) => {}
            _ = cancelled(&mut cancel) => return ProbeOutcome::Cancelled,
        }
    }
}

async fn cancelled(cancel: &mut watch::Receiver<bool>) {
    loop {
        if cancel.changed().await.is_err() {
            // Sender dropped: the supervisor is gone, stop probing.
            return;
        }
        if *cancel.borrow() {
            return;
        }
    }
}

/// One probe attempt.
pub async fn check_once(spec: &ReadySpec, env: &HashMap<String, String>, dir: &Path) -> bool {
    match spec {
        ReadySpec::Tcp { port } => check_tcp(*port).await,
        ReadySpec::Http { port, path, status } => check_http(*port, path, *status).await,
        ReadySpec::Exec { command } => check_exec(command, env, dir).await,
    }
}

/// TCP connect to loopback, IPv4 then IPv6.
async fn check_tcp(port: u16) -> bool {
    for addr in loopback_addrs(port) {
        if timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await.is_ok_and(|r| r.is_ok()) {
            return true;
        }
    }
    false
}

fn loopback_addrs(port: u16) -> [SocketAddr; 2] {
    [
        SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), port),
        SocketAddr::new(IpAddr::V6(Ipv6Addr::LOCALHOST), port),
    ]
}

/// Minimal HTTP/1.0 GET. With an expected status, ready iff it matches
/// exactly; otherwise ready iff the status is below 500.
async fn check_http(port: u16, path: &str, expected: Option<u16>) -> bool {
    for addr in loopback_addrs(port) {
        if let Some(status) = http_status(addr, port, path).await {
            trace!(port, status, "http probe response");
            return match expected {
                Some(want) => status == want,
                None => status < 500,
            };
        }
    }
    false
}

async fn http_status(addr: SocketAddr, port: u16, path: &str) -> Option<u16> {
    let path = if path.starts_with('/') {
        path.to_string()
    } else {
        format!("/{path}")
    };
    let request =
        format!("GET {path} HTTP/1.0\r\nHost: localhost:{port}\r\nConnection: close\r\n\r\n");

    let mut stream = timeout(CONNECT_TIMEOUT, TcpStream::connect(addr)).await.ok()?.ok()?;
    timeout(CONNECT_TIMEOUT, stream.write_all(request.as_bytes())).await.ok()?.ok()?;

    let mut response = [0u8; 256];
    let n = timeout(CONNECT_TIMEOUT, stream.read(&mut response)).await.ok()?.ok()?;
    parse_http_status(&String::from_utf8_lossy(&response[..n]))
}

/// `HTTP/1.x STATUS REASON` -> STATUS.
fn parse_http_status(response: &str) -> Option<u16> {
    let first_line = response.lines().next()?;
    let mut parts = first_line.split_whitespace();
    let _version = parts.next()?;
    parts.next()?.parse().ok()
}

/// Shell out and treat exit 0 as ready.
async fn check_exec(command: &str, env: &HashMap<String, String>, dir: &Path) -> bool {
    let shell = std::env::var("SHELL").unwrap_or_else(|_| "/bin/sh".to_string());
    let status = tokio::process::Command::new(shell)
        .arg("-c")
        .arg(command)
        .envs(env)
        .current_dir(dir)
        .stdin(std::process::Stdio::null())
        .stdout(std::process::Stdio::null())
        .stderr(std::process::Stdio::null())
        .kill_on_drop(true)
        .status()
        .await;
    status.is_ok_and(|s| s.success())
}
