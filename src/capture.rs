//! Capture engine: one-shot capture, adaptive paged capture, bounded tail,
//! and live pane streaming.
//!
//! Streaming has two regimes. The pipe regime duplicates pane output into a
//! FIFO via `pipe-pane` and forwards bytes as they arrive; the polling
//! regime re-captures the pane on a timer and emits suffix deltas. Polling
//! is forced when the caller supplies a poll interval or when pipe setup
//! fails. Chunk sequence numbers stay monotone across a pipe-to-polling
//! fallback.

#![allow(dead_code)]

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::OnceLock;
use std::time::Duration;

use regex::Regex;
use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::ops::TmuxClient;
use crate::target::PaneRef;

/// Lines captured when the caller does not say how many.
pub const DEFAULT_CAPTURE_LINES: u32 = 200;
/// Upper bound on a single chunk's payload.
pub const DEFAULT_MAX_CHUNK_BYTES: usize = 8192;
/// Page sizes tried by adaptive capture, smallest first.
pub const DEFAULT_PAGE_BUDGETS: &[u32] = &[20, 100, 400];
/// Heartbeat cadence for live streams.
pub const HEARTBEAT_INTERVAL: Duration = Duration::from_secs(5);
/// Floor for caller-supplied poll intervals.
pub const MIN_POLL_INTERVAL: Duration = Duration::from_millis(50);
/// Default poll cadence when none is given.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(1);

fn ansi_regex() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| {
        Regex::new(r"[\x1B\x9B][\[\]()#;?]*(?:(?:[0-9]{1,4}(?:;[0-9]{0,4})*)?[0-9A-ORZcf-nqry=><~])")
            .expect("ansi regex")
    })
}

/// Remove CSI/OSC escape sequences from captured text.
pub fn strip_ansi(s: &str) -> String {
    ansi_regex().replace_all(s, "").into_owned()
}

/// Best-effort extraction of recently-entered commands from captured text.
///
/// Matches shell-prompt shapes (`$`, `#`, `>` followed by a command) and
/// returns the last 15. Heuristic only; nothing in the core depends on it.
pub fn recent_commands(text: &str) -> Vec<String> {
    static RE: OnceLock<Regex> = OnceLock::new();
    let re = RE.get_or_init(|| Regex::new(r"[$#>] ([^\s].*)$").expect("prompt regex"));
    let mut commands: Vec<String> = text
        .lines()
        .filter_map(|line| re.captures(line))
        .filter_map(|caps| caps.get(1).map(|m| m.as_str().trim_end().to_string()))
        .collect();
    let keep = commands.len().saturating_sub(15);
    commands.drain(..keep);
    commands
}

/// Result of an adaptive paged capture.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PagedCapture {
    pub captured: String,
    /// The page size that satisfied the request.
    pub requested: u32,
    #[serde(rename = "historySize")]
    pub history_size: u32,
    #[serde(rename = "pagesTried")]
    pub pages_tried: u32,
    #[serde(rename = "moreAvailable")]
    pub more_available: bool,
}

/// Capture "enough" output without guessing a size: grow the page until it
/// covers the pane history or the budget list runs out.
pub async fn capture_paged(
    client: &TmuxClient,
    host: Option<&str>,
    pane: &str,
    budgets: Option<&[u32]>,
) -> Result<PagedCapture> {
    let history_size: u32 = client
        .display_message(host, pane, "#{history_size}")
        .await
        .ok()
        .and_then(|out| out.trim().parse().ok())
        .unwrap_or(0);

    let budgets = match budgets {
        Some(budgets) if !budgets.is_empty() => budgets,
        _ => DEFAULT_PAGE_BUDGETS,
    };

    let mut captured = String::new();
    let mut requested = 0;
    let mut pages_tried = 0;
    for &budget in budgets {
        requested = budget;
        pages_tried += 1;
        captured = client
            .capture_pane(host, pane, Some(-i64::from(budget)), None)
            .await?;
        let line_count = captured.lines().count() as u32;
        if line_count >= budget.min(history_size) || budget >= history_size {
            break;
        }
    }

    Ok(PagedCapture {
        captured,
        requested,
        history_size,
        pages_tried,
        more_available: history_size > requested,
    })
}

/// Poll a pane a fixed number of times, labelling each capture.
///
/// Cancellation returns whatever accumulated so far.
pub async fn tail_bounded(
    client: &TmuxClient,
    host: Option<&str>,
    pane: &str,
    lines: u32,
    iterations: u32,
    interval: Duration,
    cancel: &CancellationToken,
) -> Result<String> {
    let lines = if lines == 0 { 20 } else { lines };
    let iterations = if iterations == 0 { 1 } else { iterations };
    let mut buffer = String::new();
    for iteration in 1..=iterations {
        if iteration > 1 {
            tokio::select! {
                _ = cancel.cancelled() => return Ok(buffer),
                _ = tokio::time::sleep(interval) => {}
            }
        }
        let capture = client
            .capture_pane(host, pane, Some(-i64::from(lines)), None)
            .await?;
        buffer.push_str(&format!("--- tail iteration {iteration}/{iterations} ---\n"));
        buffer.push_str(&capture);
        buffer.push('\n');
        if cancel.is_cancelled() {
            break;
        }
    }
    Ok(buffer)
}

/// The unit of streamed output.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct PaneChunk {
    pub target: PaneRef,
    pub seq: u64,
    /// Emission time, epoch milliseconds.
    pub ts: i64,
    pub data: String,
    pub heartbeat: bool,
    pub eof: bool,
    /// Non-empty only on termination or truncation.
    pub reason: String,
}

/// Caller-tunable streaming knobs.
#[derive(Debug, Clone)]
pub struct StreamOptions {
    /// Sequence numbers start above this value.
    pub from_seq: u64,
    /// Forces the polling regime when set.
    pub poll_interval: Option<Duration>,
    pub max_chunk_bytes: usize,
    pub strip_ansi: bool,
    pub heartbeat_interval: Duration,
    /// Lines per capture in the polling regime.
    pub capture_lines: u32,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            from_seq: 0,
            poll_interval: None,
            max_chunk_bytes: DEFAULT_MAX_CHUNK_BYTES,
            strip_ansi: false,
            heartbeat_interval: HEARTBEAT_INTERVAL,
            capture_lines: DEFAULT_CAPTURE_LINES,
        }
    }
}

struct ChunkSender {
    target: PaneRef,
    seq: u64,
    tx: mpsc::Sender<PaneChunk>,
}

impl ChunkSender {
    /// Send one chunk; `false` means the consumer went away.
    async fn send(&mut self, data: String, heartbeat: bool, eof: bool, reason: &str) -> bool {
        self.seq += 1;
        let chunk = PaneChunk {
            target: self.target.clone(),
            seq: self.seq,
            ts: chrono::Utc::now().timestamp_millis(),
            data,
            heartbeat,
            eof,
            reason: reason.to_string(),
        };
        self.tx.send(chunk).await.is_ok()
    }
}

/// Split `data` into pieces no larger than `max` bytes, on char boundaries.
fn split_chunks(data: &str, max: usize) -> Vec<String> {
    if max == 0 || data.len() <= max {
        return vec![data.to_string()];
    }
    let mut pieces = Vec::new();
    let mut rest = data;
    while !rest.is_empty() {
        let mut cut = rest.len().min(max);
        while !rest.is_char_boundary(cut) {
            cut -= 1;
        }
        let (piece, remainder) = rest.split_at(cut);
        pieces.push(piece.to_string());
        rest = remainder;
    }
    pieces
}

/// Stream a pane as an ordered sequence of [`PaneChunk`]s.
///
/// Chunks go to `tx`; backpressure is the channel itself. Cancellation
/// stops the stream without a terminal chunk. Transport failures terminate
/// it with a final `eof` chunk carrying the error as `reason`.
pub async fn stream_pane(
    client: &TmuxClient,
    target: PaneRef,
    pane: &str,
    opts: StreamOptions,
    tx: mpsc::Sender<PaneChunk>,
    cancel: CancellationToken,
) -> Result<()> {
    let mut sender = ChunkSender {
        target,
        seq: opts.from_seq,
        tx,
    };

    if opts.poll_interval.is_none() {
        match stream_via_pipe(client, pane, &opts, &mut sender, &cancel).await {
            Ok(()) => return Ok(()),
            Err(e) => {
                tracing::debug!(error = %e, pane, "pipe regime unavailable, falling back to polling");
            }
        }
    }

    stream_via_polling(client, pane, &opts, &mut sender, &cancel).await
}

async fn stream_via_polling(
    client: &TmuxClient,
    pane: &str,
    opts: &StreamOptions,
    sender: &mut ChunkSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let interval = opts
        .poll_interval
        .unwrap_or(DEFAULT_POLL_INTERVAL)
        .max(MIN_POLL_INTERVAL);
    let mut poll = tokio::time::interval(interval);
    poll.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut heartbeat = tokio::time::interval(opts.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    // The first interval tick fires immediately; swallow the heartbeat one
    // so the stream does not open with a heartbeat.
    heartbeat.tick().await;

    let host = sender.target.host().map(str::to_string);
    let mut last = String::new();

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return Ok(()),
            _ = poll.tick() => {
                let capture = match client
                    .capture_pane(host.as_deref(), pane, Some(-i64::from(opts.capture_lines)), None)
                    .await
                {
                    Ok(capture) => capture,
                    Err(e) => {
                        let reason = e.to_string();
                        let _ = sender.send(String::new(), false, true, &reason).await;
                        return Err(e);
                    }
                };
                if capture == last {
                    if !sender.send(String::new(), true, false, "").await {
                        return Ok(());
                    }
                    continue;
                }
                let delta = if capture.starts_with(&last) {
                    capture[last.len()..].to_string()
                } else {
                    capture.clone()
                };
                let delta = if opts.strip_ansi { strip_ansi(&delta) } else { delta };
                let truncated = delta.len() > opts.max_chunk_bytes;
                for piece in split_chunks(&delta, opts.max_chunk_bytes) {
                    if !sender.send(piece, false, false, "").await {
                        return Ok(());
                    }
                }
                if truncated && !sender.send(String::new(), false, false, "truncated").await {
                    return Ok(());
                }
                last = capture;
            }
            _ = heartbeat.tick() => {
                if !sender.send(String::new(), true, false, "").await {
                    return Ok(());
                }
            }
        }
    }
}

static STREAM_COUNTER: AtomicU64 = AtomicU64::new(0);

fn stream_dir() -> std::path::PathBuf {
    let n = STREAM_COUNTER.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!("tmux-fleet-{}-{}", std::process::id(), n))
}

async fn stream_via_pipe(
    client: &TmuxClient,
    pane: &str,
    opts: &StreamOptions,
    sender: &mut ChunkSender,
    cancel: &CancellationToken,
) -> Result<()> {
    let host = sender.target.host().map(str::to_string);
    let dir = stream_dir();
    let fifo = dir.join("pipe");
    let dir_str = dir.display().to_string();
    let fifo_str = fifo.display().to_string();

    // Set up the FIFO on whichever side owns the pane.
    let mut reader: Box<dyn AsyncRead + Send + Unpin> = if let Some(host) = host.as_deref() {
        client
            .run_shell(
                Some(host),
                &format!("mkdir -p {dir_str} && rm -f {fifo_str} && mkfifo {fifo_str}"),
            )
            .await?;
        if let Err(e) = client
            .pipe_pane(Some(host), pane, Some(&format!("cat >> {fifo_str}")))
            .await
        {
            cleanup_pipe(client, Some(host), pane, &dir_str, false).await;
            return Err(e);
        }
        let mut child = match client.transport().open_remote_reader(host, &fifo_str).await {
            Ok(child) => child,
            Err(e) => {
                cleanup_pipe(client, Some(host), pane, &dir_str, true).await;
                return Err(e);
            }
        };
        match child.stdout.take() {
            Some(stdout) => Box::new(RemoteReader { _child: child, stdout }),
            None => {
                cleanup_pipe(client, Some(host), pane, &dir_str, true).await;
                return Err(Error::transport("ssh reader has no stdout", "", ""));
            }
        }
    } else {
        if let Err(e) = tokio::fs::create_dir_all(&dir).await {
            return Err(Error::transport(format!("fifo dir: {e}"), "", ""));
        }
        if let Err(e) = mkfifo(&fifo_str).await {
            let _ = tokio::fs::remove_dir_all(&dir).await;
            return Err(e);
        }
        if let Err(e) = client
            .pipe_pane(None, pane, Some(&format!("cat >> {fifo_str}")))
            .await
        {
            cleanup_pipe(client, None, pane, &dir_str, false).await;
            return Err(e);
        }
        // The open blocks until pipe-pane's writer side appears; keep it
        // interruptible so a cancelled stream never hangs here.
        let opened = tokio::select! {
            _ = cancel.cancelled() => {
                cleanup_pipe(client, None, pane, &dir_str, true).await;
                return Ok(());
            }
            opened = tokio::fs::File::open(&fifo) => opened,
        };
        match opened {
            Ok(file) => Box::new(file),
            Err(e) => {
                cleanup_pipe(client, None, pane, &dir_str, true).await;
                return Err(Error::transport(format!("fifo open: {e}"), "", ""));
            }
        }
    };

    let mut heartbeat = tokio::time::interval(opts.heartbeat_interval);
    heartbeat.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    heartbeat.tick().await;

    let mut buf = vec![0u8; 4096];
    let mut got_data = false;
    let outcome = loop {
        tokio::select! {
            _ = cancel.cancelled() => break Ok(()),
            read = reader.read(&mut buf) => match read {
                Ok(0) => {
                    // A remote reader that dies before the first byte usually
                    // lost the race with FIFO creation; hand the stream to the
                    // polling regime instead of reporting a spurious EOF.
                    if host.is_some() && !got_data {
                        break Err(Error::transport(
                            "pipe reader closed before first byte",
                            "",
                            "",
                        ));
                    }
                    let _ = sender.send(String::new(), false, true, "eof").await;
                    break Ok(());
                }
                Ok(n) => {
                    got_data = true;
                    let data = String::from_utf8_lossy(&buf[..n]).into_owned();
                    let data = if opts.strip_ansi { strip_ansi(&data) } else { data };
                    let mut consumer_gone = false;
                    for piece in split_chunks(&data, opts.max_chunk_bytes) {
                        if !sender.send(piece, false, false, "").await {
                            consumer_gone = true;
                            break;
                        }
                    }
                    if consumer_gone {
                        break Ok(());
                    }
                }
                Err(e) => {
                    let reason = format!("pipe read: {e}");
                    let _ = sender.send(String::new(), false, true, &reason).await;
                    break Ok(());
                }
            },
            _ = heartbeat.tick() => {
                if !sender.send(String::new(), true, false, "").await {
                    break Ok(());
                }
            }
        }
    };

    drop(reader);
    cleanup_pipe(client, host.as_deref(), pane, &dir_str, true).await;
    outcome
}

struct RemoteReader {
    _child: tokio::process::Child,
    stdout: tokio::process::ChildStdout,
}

impl AsyncRead for RemoteReader {
    fn poll_read(
        mut self: std::pin::Pin<&mut Self>,
        cx: &mut std::task::Context<'_>,
        buf: &mut tokio::io::ReadBuf<'_>,
    ) -> std::task::Poll<std::io::Result<()>> {
        std::pin::Pin::new(&mut self.stdout).poll_read(cx, buf)
    }
}

async fn mkfifo(path: &str) -> Result<()> {
    let output = tokio::process::Command::new("mkfifo")
        .arg(path)
        .output()
        .await
        .map_err(|e| Error::transport(format!("mkfifo spawn: {e}"), "", ""))?;
    if output.status.success() {
        Ok(())
    } else {
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        Err(Error::transport(format!("mkfifo failed: {}", stderr.trim()), "", stderr))
    }
}

/// Turn pipe-pane off (when it was attached) and remove the stream's
/// temporary directory. Best-effort; failures are logged, never raised.
async fn cleanup_pipe(
    client: &TmuxClient,
    host: Option<&str>,
    pane: &str,
    dir: &str,
    detach: bool,
) {
    if detach {
        if let Err(e) = client.pipe_pane(host, pane, None).await {
            tracing::warn!(error = %e, pane, "failed to detach pipe-pane");
        }
    }
    let result = match host {
        Some(host) => client
            .run_shell(Some(host), &format!("rm -rf {dir}"))
            .await
            .map(|_| ()),
        None => tokio::fs::remove_dir_all(dir)
            .await
            .map_err(|e| Error::transport(e.to_string(), "", "")),
    };
    if let Err(e) = result {
        tracing::warn!(error = %e, dir, "failed to remove stream temp dir");
    }
}
