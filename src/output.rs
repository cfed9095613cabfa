// src/output.rs

//! Terminal log multiplexer.
//!
//! Every line the engine prints flows through one writer task fed by an
//! mpsc channel, so prefixes and bodies from different children never
//! interleave. Each line is rendered as
//!
//! ```text
//! <name padded right> | <content>
//! ```
//!
//! with the prefix in a colour derived from the process name. Stderr lines
//! use the dimmed variant of the same colour; line bodies stay uncoloured.
//! Engine events (ready, crash, restart, probe timeout) are reported under
//! the synthetic `proctor` name.

use std::hash::{DefaultHasher, Hash, Hasher};
use std::sync::OnceLock;

use owo_colors::{DynColors, OwoColorize, XtermColors};
use tokio::io::{AsyncBufReadExt, AsyncRead, BufReader};
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::Instant;

/// Name used for lines the engine emits about itself.
pub const ENGINE_NAME: &str = "proctor";

/// Long lines are split at this many bytes so one runaway child cannot
/// stall the multiplexer.
const LINE_CAP: usize = 8 * 1024;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StreamKind {
    Stdout,
    Stderr,
    Control,
}

#[derive(Debug, Clone)]
pub struct LogLine {
    pub name: String,
    pub stream: StreamKind,
    pub content: String,
}

enum RouterMsg {
    Line(LogLine),
    Flush(oneshot::Sender<()>),
}

/// Cloneable sender half of the multiplexer.
#[derive(Clone)]
pub struct LogRouter {
    tx: mpsc::Sender<RouterMsg>,
}

impl LogRouter {
    /// Start the writer task. `names` is every process name from the
    /// Procfile; the padding width is fixed here and never changes.
    pub fn start(names: &[&str], timestamps: bool) -> (Self, JoinHandle<()>) {
        let width = names
            .iter()
            .map(|n| n.chars().count())
            .chain(std::iter::once(ENGINE_NAME.len()))
            .max()
            .unwrap_or(ENGINE_NAME.len());

        let (tx, mut rx) = mpsc::channel::<RouterMsg>(256);
        let formatter = Formatter { width, timestamps, started: Instant::now() };

        let task = tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RouterMsg::Line(line) => println!("{}", formatter.render(&line)),
                    RouterMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });

        (Self { tx }, task)
    }

    pub async fn line(&self, name: impl Into<String>, stream: StreamKind, content: String) {
        let line = LogLine { name: name.into(), stream, content };
        let _ = self.tx.send(RouterMsg::Line(line)).await;
    }

    /// Report an engine event under the `proctor` prefix.
    pub async fn control(&self, content: String) {
        self.line(ENGINE_NAME, StreamKind::Control, content).await;
    }

    /// Wait until everything queued before this call has been written.
    pub async fn flush(&self) {
        let (ack_tx, ack_rx) = oneshot::channel();
        if self.tx.send(RouterMsg::Flush(ack_tx)).await.is_ok() {
            let _ = ack_rx.await;
        }
    }

    /// Capture variant: lines come back on a channel instead of being
    /// printed. Tests use this to observe engine output.
    pub fn capture() -> (Self, mpsc::Receiver<LogLine>) {
        let (tx, mut rx) = mpsc::channel::<RouterMsg>(256);
        let (line_tx, line_rx) = mpsc::channel::<LogLine>(256);
        tokio::spawn(async move {
            while let Some(msg) = rx.recv().await {
                match msg {
                    RouterMsg::Line(line) => {
                        let _ = line_tx.send(line).await;
                    }
                    RouterMsg::Flush(ack) => {
                        let _ = ack.send(());
                    }
                }
            }
        });
        (Self { tx }, line_rx)
    }
}

struct Formatter {
    width: usize,
    timestamps: bool,
    started: Instant,
}

impl Formatter {
    fn render(&self, line: &LogLine) -> String {
        let mut prefix = format!("{:<width$}", line.name, width = self.width);
        if self.timestamps {
            prefix.push_str(&format!(" {:>4}", self.elapsed()));
        }
        prefix.push_str(" |");

        let colour = DynColors::Xterm(XtermColors::from(colour_for_name(&line.name)));
        let styled = match line.stream {
            StreamKind::Stderr => format!("{}", prefix.color(colour).dimmed()),
            StreamKind::Stdout | StreamKind::Control => format!("{}", prefix.color(colour)),
        };

        format!("{} {}", styled, line.content)
    }

    /// Adaptive elapsed column: `0.00`..`9.99`, `10.0`..`99.9`, whole
    /// seconds to four digits, then minutes.
    fn elapsed(&self) -> String {
        let total_ms = self.started.elapsed().as_millis() as u64;
        if total_ms < 10_000 {
            format!("{:.2}", total_ms as f64 / 1000.0)
        } else if total_ms < 100_000 {
            format!("{:.1}", total_ms as f64 / 1000.0)
        } else if total_ms < 10_000_000 {
            format!("{:>4}", total_ms / 1000)
        } else {
            format!("{:>3}m", total_ms / 60_000)
        }
    }
}

/// Stable colour per process: hash the name into the curated palette.
fn colour_for_name(name: &str) -> u8 {
    let palette = palette();
    let mut hasher = DefaultHasher::new();
    name.hash(&mut hasher);
    palette[(hasher.finish() as usize) % palette.len()]
}

/// Mid-brightness slice of the 6x6x6 colour cube: near-black and
/// near-white entries are excluded so prefixes stay readable on both dark
/// and light terminals. 176 codes survive the filter.
fn palette() -> &'static [u8] {
    static PALETTE: OnceLock<Vec<u8>> = OnceLock::new();
    PALETTE.get_or_init(|| {
        (16u8..=231)
            .filter(|&code| {
                let idx = code - 16;
                let r = idx / 36;
                let g = (idx % 36) / 6;
                let b = idx % 6;
                (4..=11).contains(&(r + g + b))
            })
            .collect()
    })
}

/// Pump one child stream into the router, splitting on newlines and
/// breaking lines longer than [`LINE_CAP`].
pub async fn pump_lines<R: AsyncRead + Unpin>(
    reader: R,
    router: LogRouter,
    name: String,
    stream: StreamKind,
) {
    let mut reader = BufReader::new(reader);
    let mut line: Vec<u8> = Vec::new();

    loop {
        let mut flush = false;
        let consumed = {
            let buf = match reader.fill_buf().await {
                Ok(buf) => buf,
                Err(_) => break,
            };
            if buf.is_empty() {
                break;
            }
            match buf.iter().position(|&b| b == b'\n') {
                Some(pos) => {
                    line.extend_from_slice(&buf[..pos]);
                    if line.last() == Some(&b'\r') {
                        line.pop();
                    }
                    flush = true;
                    pos + 1
                }
                None => {
                    line.extend_from_slice(buf);
                    if line.len() >= LINE_CAP {
                        flush = true;
                    }
                    buf.len()
                }
            }
        };
        reader.consume(consumed);

        if flush {
            let content = String::from_utf8_lossy(&line).into_owned();
            line.clear();
            router.line(name.clone(), stream, content).await;
        }
    }

    if !line.is_empty() {
        let content = String::from_utf8_lossy(&line).into_owned();
        router.line(name, stream, content).await;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn colour_is_stable_per_name() {
        assert_eq!(colour_for_name("api"), colour_for_name("api"));
    }

    #[test]
    fn palette_size_is_within_bounds() {
        let p = palette();
        assert!(p.len() >= 100 && p.len() <= 220, "palette has {} codes", p.len());
    }

    #[test]
    fn palette_excludes_extremes() {
        let p = palette();
        assert!(!p.contains(&16), "colour 16 is near-black");
        assert!(!p.contains(&231), "colour 231 is near-white");
    }

    #[test]
    fn elapsed_formats_scale() {
        let f = Formatter { width: 4, timestamps: true, started: Instant::now() };
        let s = f.elapsed();
        assert!(s.starts_with("0.0"), "fresh elapsed renders as {s}");
    }
}
