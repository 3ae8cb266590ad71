//! MCP server implementation for tmux-fleet-rs.
//!
//! This module registers all tools and resources using the rmcp crate. The
//! tool layer stays thin: it resolves targets, runs the safety gate, calls
//! into the core modules, and shapes replies.

use std::sync::Arc;
use std::time::Duration;

use rmcp::handler::server::router::tool::ToolRouter;
use rmcp::handler::server::wrapper::Parameters;
use rmcp::model::{
    Annotated, CallToolResult, Content, RawResource, RawResourceTemplate, Resource,
    ResourceContents, ServerCapabilities, ServerInfo,
};
use rmcp::schemars::JsonSchema;
use rmcp::serde::{Deserialize, Serialize};
use rmcp::serde_json;
use rmcp::tool;
use rmcp::tool_router;
use rmcp::ErrorData as McpError;
use tokio_util::sync::CancellationToken;

use crate::capture::{
    self, capture_paged, recent_commands, strip_ansi, stream_pane, tail_bounded, PaneChunk,
    StreamOptions,
};
use crate::errors::Error;
use crate::fanout::{Fanout, FanoutRequest, FanoutResult};
use crate::layouts::{capture_layout, restore_layout, LayoutProfile, LayoutStore, WindowLayout};
use crate::logs::LogSinks;
use crate::ops::TmuxClient;
use crate::security::SafetyGate;
use crate::snapshot::{snapshot, Snapshot};
use crate::target::{PaneRef, TargetResolver};

/// The main MCP server for multi-host tmux mediation.
#[derive(Clone)]
pub struct TmuxFleetServer {
    client: TmuxClient,
    resolver: TargetResolver,
    gate: Arc<SafetyGate>,
    sinks: Arc<LogSinks>,
    layouts: Arc<LayoutStore>,
    fanout: Fanout,
    tool_router: ToolRouter<Self>,
}

fn structured_output<T: Serialize>(value: &T) -> CallToolResult {
    match serde_json::to_value(value) {
        Ok(json) => CallToolResult::structured(json),
        Err(e) => CallToolResult::error(vec![Content::text(format!(
            "Error serializing output: {e}"
        ))]),
    }
}

fn error_result(e: &Error) -> CallToolResult {
    CallToolResult::error(vec![Content::text(format!("{e}"))])
}

// ============================================================================
// Tool Input Schemas
// ============================================================================

/// Partial target address accepted by most tools.
#[derive(Debug, Clone, Default, Deserialize, Serialize, JsonSchema)]
pub struct TargetInput {
    /// Remote host alias; omit for the local tmux server
    #[serde(default)]
    pub host: Option<String>,
    /// Session name or id ($n)
    #[serde(default)]
    pub session: Option<String>,
    /// Window index, name, or id (@n)
    #[serde(default)]
    pub window: Option<String>,
    /// Pane token: %n, session:window.pane, or any tmux target notation
    #[serde(default)]
    pub pane: Option<String>,
}

impl From<TargetInput> for PaneRef {
    fn from(input: TargetInput) -> Self {
        let norm = |v: Option<String>| v.filter(|s| !s.is_empty());
        PaneRef {
            host: norm(input.host),
            session: norm(input.session),
            window: norm(input.window),
            pane: norm(input.pane),
        }
    }
}

fn target_of(input: Option<TargetInput>) -> PaneRef {
    input.map(PaneRef::from).unwrap_or_default()
}

/// Input for tools that only take an optional target.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TargetOnlyInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
}

/// Input parameters for the snapshot tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SnapshotInput {
    /// Remote host alias; omit for the default host
    #[serde(default)]
    pub host: Option<String>,
    /// Session to snapshot; omit for the default session
    #[serde(default)]
    pub session: Option<String>,
    /// Lines to capture from the capture target (default 200)
    #[serde(default, rename = "captureLines")]
    pub capture_lines: Option<u32>,
}

/// Input parameters for the open-session tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct OpenSessionInput {
    /// Remote host alias; omit for the local tmux server
    #[serde(default)]
    pub host: Option<String>,
    /// Session name to open or create
    pub session: String,
    /// Optional command for the initial window when the session is created
    #[serde(default)]
    pub command: Option<String>,
}

/// Input parameters for the capture-pane tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CapturePaneInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Lines from the bottom of scrollback (default 200)
    #[serde(default)]
    pub lines: Option<u32>,
    /// Explicit start line (negative counts from the bottom); overrides lines
    #[serde(default)]
    pub start: Option<i64>,
    /// Explicit end line
    #[serde(default)]
    pub end: Option<i64>,
    /// Remove ANSI escape sequences from the capture
    #[serde(default, rename = "stripAnsi")]
    pub strip_ansi: bool,
}

/// Input parameters for the capture-paged tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CapturePagedInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Page-size budgets tried in order (default [20, 100, 400])
    #[serde(default, rename = "lineBudgets")]
    pub line_budgets: Option<Vec<u32>>,
    /// Remove ANSI escape sequences from the capture
    #[serde(default, rename = "stripAnsi")]
    pub strip_ansi: bool,
}

/// Input parameters for the tail-pane tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct TailPaneInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Lines per capture (default 20)
    #[serde(default)]
    pub lines: Option<u32>,
    /// Number of captures (default 3)
    #[serde(default)]
    pub iterations: Option<u32>,
    /// Pause between captures in milliseconds (default 1000)
    #[serde(default, rename = "intervalMs")]
    pub interval_ms: Option<u64>,
}

/// Input parameters for the stream-pane tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct StreamPaneInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Polling cadence in milliseconds; forces the polling regime (min 50)
    #[serde(default, rename = "pollMs")]
    pub poll_ms: Option<u64>,
    /// Upper bound on a chunk's payload bytes (default 8192)
    #[serde(default, rename = "maxChunkBytes")]
    pub max_chunk_bytes: Option<u32>,
    /// Sequence numbers continue above this value
    #[serde(default, rename = "fromSeq")]
    pub from_seq: Option<u64>,
    /// Remove ANSI escape sequences from deltas
    #[serde(default, rename = "stripAnsi")]
    pub strip_ansi: bool,
    /// Stop after this many chunks (default 50)
    #[serde(default, rename = "maxChunks")]
    pub max_chunks: Option<u32>,
    /// Stop after this much wall time in milliseconds (default 5000)
    #[serde(default, rename = "durationMs")]
    pub duration_ms: Option<u64>,
}

/// Output payload for the stream-pane tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct StreamPaneOutput {
    pub chunks: Vec<PaneChunk>,
    /// Pass this as fromSeq to continue the stream.
    #[serde(rename = "nextSeq")]
    pub next_seq: u64,
    /// True when the stream ended with a terminal chunk.
    pub ended: bool,
}

/// Input parameters for the send-keys tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SendKeysInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Keys to send; <SPACE>, <TAB>, <ESC>, <ENTER> map to tmux key names
    #[serde(default)]
    pub keys: String,
    /// Press Enter after the keys (or alone when keys is empty)
    #[serde(default)]
    pub enter: bool,
    /// Capture this many lines after sending (0 = no capture)
    #[serde(default, rename = "captureLines")]
    pub capture_lines: Option<u32>,
    /// Pause before the follow-up capture in milliseconds
    #[serde(default, rename = "delayMs")]
    pub delay_ms: Option<u64>,
}

/// Input parameters for the run-batch tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunBatchInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Shell steps joined and sent as one line
    pub steps: Vec<String>,
    /// Joiner between steps (default "&&")
    #[serde(default, rename = "joinWith")]
    pub join_with: Option<String>,
    /// Send C-c C-u first to clear a half-typed prompt
    #[serde(default, rename = "cleanPrompt")]
    pub clean_prompt: bool,
    /// Capture this many lines after sending (0 = no capture)
    #[serde(default, rename = "captureLines")]
    pub capture_lines: Option<u32>,
}

/// Input parameters for the run-command tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RunCommandInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Raw tmux argument vector, e.g. ["display-message", "-p", "#{pane_id}"]
    pub args: Vec<String>,
    /// Required for destructive verbs (kill-*, unlink-*, attach-session -k)
    #[serde(default)]
    pub confirm: bool,
    /// Remove ANSI escape sequences from the output
    #[serde(default, rename = "stripAnsi")]
    pub strip_ansi: bool,
}

/// Input parameters for the fan-out tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct FanoutInput {
    #[serde(flatten)]
    pub request: FanoutRequest,
}

/// Input parameters for the create-window tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct NewWindowInput {
    /// Target carrying host and session
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Name for the new window
    #[serde(default)]
    pub name: Option<String>,
    /// Command to run in the new window
    #[serde(default)]
    pub command: Option<String>,
}

/// Input parameters for the split-pane tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SplitPaneInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Split below instead of beside
    #[serde(default)]
    pub vertical: bool,
    /// Command to run in the new pane
    #[serde(default)]
    pub command: Option<String>,
}

/// Input parameters for kill tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct KillInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Destructive verbs refuse to run without this
    #[serde(default)]
    pub confirm: bool,
}

/// Input parameters for rename tools.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RenameInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// New name
    pub name: String,
}

/// Input parameters for the set-sync-panes tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetSyncPanesInput {
    /// Target window
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Whether keystrokes fan out to every pane in the window
    pub enabled: bool,
}

/// Input parameters for the set-default tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetDefaultInput {
    /// Fields to merge into the default target. Omitted fields keep their
    /// value; empty strings clear it.
    pub target: TargetInput,
}

/// Input parameters for the set-audit tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct SetAuditInput {
    /// Host scope; omit for local
    #[serde(default)]
    pub host: Option<String>,
    /// Session scope
    pub session: String,
    /// Whether side-effecting calls for this pair are written to the audit log
    pub enabled: bool,
}

/// Input parameters for the list-defaults tool (none).
#[derive(Debug, Default, Deserialize, JsonSchema)]
pub struct ListDefaultsInput {}

/// Input parameters for the capture-layout tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct CaptureLayoutInput {
    /// Target carrying host and session
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Persist the captured layout under this profile name
    #[serde(default, rename = "saveAs")]
    pub save_as: Option<String>,
}

/// Input parameters for the restore-layout tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RestoreLayoutInput {
    /// Target carrying host and session
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Named profile to apply (mutually exclusive with windows)
    #[serde(default)]
    pub profile: Option<String>,
    /// Explicit window layouts to apply
    #[serde(default)]
    pub windows: Option<Vec<WindowLayout>>,
}

/// Input parameters for the recent-commands tool.
#[derive(Debug, Deserialize, JsonSchema)]
pub struct RecentCommandsInput {
    /// Target; omitted fields fall back to defaults
    #[serde(default)]
    pub target: Option<TargetInput>,
    /// Lines of scrollback to scan (default 200)
    #[serde(default)]
    pub lines: Option<u32>,
}

// ============================================================================
// Tool Output Schemas
// ============================================================================

/// Output payload for listing tools.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListSessionsOutput {
    pub sessions: Vec<crate::ops::SessionInfo>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListWindowsOutput {
    pub windows: Vec<crate::ops::WindowInfo>,
}

#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct ListPanesOutput {
    pub panes: Vec<crate::ops::PaneInfo>,
}

/// Output payload for the capture-layout tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct CaptureLayoutOutput {
    pub session: String,
    pub windows: Vec<WindowLayout>,
    #[serde(rename = "savedAs", skip_serializing_if = "Option::is_none")]
    pub saved_as: Option<String>,
}

/// Output payload for the list-defaults tool.
#[derive(Debug, Serialize, JsonSchema)]
pub struct ListDefaultsOutput {
    pub current: PaneRef,
    #[serde(rename = "persisted")]
    pub persisted: bool,
}

// ============================================================================
// Tool Router Implementation
// ============================================================================

#[tool_router]
impl TmuxFleetServer {
    /// Create a new MCP server over the shared core components.
    pub fn new(
        client: TmuxClient,
        resolver: TargetResolver,
        gate: Arc<SafetyGate>,
        sinks: Arc<LogSinks>,
        layouts: Arc<LayoutStore>,
    ) -> Self {
        let fanout = Fanout::new(client.clone(), resolver.clone());
        Self {
            client,
            resolver,
            gate,
            sinks,
            layouts,
            fanout,
            tool_router: Self::tool_router(),
        }
    }

    /// Session log always; audit log when enabled for the host/session pair.
    async fn record_side_effect(&self, host: Option<&str>, session: Option<&str>, summary: &str) {
        let session = session.unwrap_or("");
        self.sinks.session_event(host, session, summary).await;
        if self.gate.audit_enabled(host, session).await {
            self.sinks.audit_event(host, session, summary).await;
        }
    }

    #[tool(
        name = "snapshot",
        description = "Grounded view of a session: raw session/window/pane listings plus a capture of the default or active pane. Use at task start and after topology changes instead of trusting remembered state.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<Snapshot>().into()
    )]
    async fn snapshot(&self, input: Parameters<SnapshotInput>) -> Result<CallToolResult, McpError> {
        if let Err(e) = self.gate.check_host(input.0.host.as_deref()) {
            return Ok(error_result(&e));
        }
        match snapshot(
            &self.client,
            &self.resolver,
            input.0.host.as_deref(),
            input.0.session.as_deref(),
            input.0.capture_lines,
        )
        .await
        {
            Ok(snap) => Ok(structured_output(&snap)),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "open-session",
        description = "Ensure a session exists: probe with has-session, create it detached when absent, and make it the default target. Returns whether it was created or reused.",
        annotations(idempotent_hint = true)
    )]
    async fn open_session(
        &self,
        input: Parameters<OpenSessionInput>,
    ) -> Result<CallToolResult, McpError> {
        let host = input.0.host.as_deref().filter(|h| !h.is_empty());
        if let Err(e) = self.gate.check_host(host) {
            return Ok(error_result(&e));
        }
        let session = input.0.session.as_str();
        if session.is_empty() {
            return Ok(error_result(&Error::NoSession {
                message: "session name required".into(),
            }));
        }

        let existed = match self.client.has_session(host, session).await {
            Ok(existed) => existed,
            Err(e) => return Ok(error_result(&e)),
        };
        if !existed {
            if let Err(e) = self
                .client
                .new_session(host, session, input.0.command.as_deref())
                .await
            {
                return Ok(error_result(&e));
            }
        }

        self.resolver
            .defaults
            .update(&PaneRef {
                host: host.map(str::to_string),
                session: Some(session.to_string()),
                window: None,
                pane: None,
            })
            .await;

        let text = match (existed, host) {
            (false, Some(host)) => format!("Created remote session {session} on {host}"),
            (false, None) => format!("Created session {session}"),
            (true, Some(host)) => format!("Reusing existing session {session} on {host}"),
            (true, None) => format!("Reusing existing session {session}"),
        };
        self.record_side_effect(host, Some(session), &format!("open-session {session}"))
            .await;
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        name = "list-sessions",
        description = "List sessions on a host with id, name, window count, attached flag, and creation time. Returns JSON: { sessions: [...] }.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<ListSessionsOutput>().into()
    )]
    async fn list_sessions(
        &self,
        input: Parameters<TargetOnlyInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(_) => target,
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match self.client.list_sessions(target.host()).await {
            Ok(sessions) => Ok(structured_output(&ListSessionsOutput { sessions })),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "list-windows",
        description = "List windows, optionally scoped to a session. Returns JSON: { windows: [...] } with index, name, active flag, pane count, and flags.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<ListWindowsOutput>().into()
    )]
    async fn list_windows(
        &self,
        input: Parameters<TargetOnlyInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(_) => target,
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match self
            .client
            .list_windows(target.host(), target.session())
            .await
        {
            Ok(windows) => Ok(structured_output(&ListWindowsOutput { windows })),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "list-panes",
        description = "List panes of a window (session:window, @id, or a session's active window). Returns JSON: { panes: [...] } with id, index, active flag, tty, running command, and title. Use to pick safe targets before send-keys or kill-pane.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<ListPanesOutput>().into()
    )]
    async fn list_panes(
        &self,
        input: Parameters<TargetOnlyInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(_) => target,
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let list_target = match (target.session(), target.window()) {
            (Some(session), Some(window)) => Some(format!("{session}:{window}")),
            (Some(session), None) => Some(session.to_string()),
            (None, Some(window)) => Some(window.to_string()),
            (None, None) => None,
        };
        match self
            .client
            .list_panes(target.host(), list_target.as_deref())
            .await
        {
            Ok(panes) => Ok(structured_output(&ListPanesOutput { panes })),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "capture-pane",
        description = "Read a slice of pane scrollback as text. Defaults to the last 200 lines; pass start/end for explicit ranges and stripAnsi for plain text.",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn capture_pane(
        &self,
        input: Parameters<CapturePaneInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let start = input
            .0
            .start
            .or(input.0.lines.map(|lines| -i64::from(lines)));
        match self
            .client
            .capture_pane(target.host(), &pane, start, input.0.end)
            .await
        {
            Ok(capture) => {
                let capture = if input.0.strip_ansi {
                    strip_ansi(&capture)
                } else {
                    capture
                };
                Ok(CallToolResult::success(vec![Content::text(
                    if capture.is_empty() {
                        "(no content captured)".to_string()
                    } else {
                        capture
                    },
                )]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "capture-paged",
        description = "Capture 'enough' output without guessing a size: pages grow over the line budgets until the pane history is covered. Returns the capture plus historySize/moreAvailable for follow-up paging.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<capture::PagedCapture>().into()
    )]
    async fn capture_paged(
        &self,
        input: Parameters<CapturePagedInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match capture_paged(
            &self.client,
            target.host(),
            &pane,
            input.0.line_budgets.as_deref(),
        )
        .await
        {
            Ok(mut page) => {
                if input.0.strip_ansi {
                    page.captured = strip_ansi(&page.captured);
                }
                Ok(structured_output(&page))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "tail-pane",
        description = "Poll a pane a bounded number of times, labelling each capture with '--- tail iteration k/N ---'. Good for watching a command settle without a live stream.",
        annotations(read_only_hint = true)
    )]
    async fn tail_pane(&self, input: Parameters<TailPaneInput>) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match tail_bounded(
            &self.client,
            target.host(),
            &pane,
            input.0.lines.unwrap_or(20),
            input.0.iterations.unwrap_or(3),
            Duration::from_millis(input.0.interval_ms.unwrap_or(1000)),
            &CancellationToken::new(),
        )
        .await
        {
            Ok(buffer) => Ok(CallToolResult::success(vec![Content::text(buffer)])),
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "stream-pane",
        description = "Live-stream pane output as ordered chunks with heartbeats and sequence numbers. Collects up to maxChunks or durationMs, then returns them with nextSeq for resuming. Prefers pipe-pane; falls back to polling.",
        annotations(read_only_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<StreamPaneOutput>().into()
    )]
    async fn stream_pane(
        &self,
        input: Parameters<StreamPaneInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }

        let opts = StreamOptions {
            from_seq: input.0.from_seq.unwrap_or(0),
            poll_interval: input.0.poll_ms.map(Duration::from_millis),
            max_chunk_bytes: input
                .0
                .max_chunk_bytes
                .map(|b| b as usize)
                .unwrap_or(capture::DEFAULT_MAX_CHUNK_BYTES),
            strip_ansi: input.0.strip_ansi,
            ..Default::default()
        };
        let max_chunks = input.0.max_chunks.unwrap_or(50) as usize;
        let duration = Duration::from_millis(input.0.duration_ms.unwrap_or(5000));

        let (tx, mut rx) = tokio::sync::mpsc::channel(16);
        let cancel = CancellationToken::new();
        let producer = {
            let client = self.client.clone();
            let cancel = cancel.clone();
            let pane = pane.clone();
            tokio::spawn(async move { stream_pane(&client, target, &pane, opts, tx, cancel).await })
        };

        let mut chunks: Vec<PaneChunk> = Vec::new();
        let mut ended = false;
        let deadline = tokio::time::sleep(duration);
        tokio::pin!(deadline);
        while chunks.len() < max_chunks {
            tokio::select! {
                _ = &mut deadline => break,
                chunk = rx.recv() => match chunk {
                    Some(chunk) => {
                        let eof = chunk.eof;
                        chunks.push(chunk);
                        if eof {
                            ended = true;
                            break;
                        }
                    }
                    None => {
                        ended = true;
                        break;
                    }
                }
            }
        }
        cancel.cancel();
        let _ = producer.await;

        let next_seq = chunks
            .last()
            .map(|c| c.seq)
            .unwrap_or(input.0.from_seq.unwrap_or(0));
        Ok(structured_output(&StreamPaneOutput {
            chunks,
            next_seq,
            ended,
        }))
    }

    #[tool(
        name = "send-keys",
        description = "Send keys to a pane with a synchronous ack. <SPACE>/<TAB>/<ESC>/<ENTER> map to tmux key names; enter=true appends Enter. Optionally captures the pane afterwards (best-effort delay, not a sync primitive)."
    )]
    async fn send_keys(&self, input: Parameters<SendKeysInput>) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        if let Err(e) = self
            .client
            .send_keys(target.host(), &pane, &input.0.keys, input.0.enter)
            .await
        {
            return Ok(error_result(&e));
        }
        self.record_side_effect(
            target.host(),
            target.session(),
            &format!("send-keys target={pane} enter={}", input.0.enter),
        )
        .await;

        let mut text = format!("keys sent to {pane}");
        if let Some(lines) = input.0.capture_lines.filter(|l| *l > 0) {
            if let Some(delay_ms) = input.0.delay_ms {
                tokio::time::sleep(Duration::from_millis(delay_ms)).await;
            }
            match self
                .client
                .capture_pane(target.host(), &pane, Some(-i64::from(lines)), None)
                .await
            {
                Ok(capture) => text = format!("{text}\n{capture}"),
                Err(e) => text = format!("{text}\n(capture failed: {e})"),
            }
        }
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        name = "run-batch",
        description = "Join shell steps with a joiner (default &&) and send them as one line. cleanPrompt clears a half-typed prompt first; captureLines returns output afterwards."
    )]
    async fn run_batch(&self, input: Parameters<RunBatchInput>) -> Result<CallToolResult, McpError> {
        if input.0.steps.is_empty() {
            return Ok(error_result(&Error::InvalidKeys {
                message: "steps are required".into(),
            }));
        }
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }

        let joiner = input.0.join_with.as_deref().unwrap_or("&&");
        let command = input.0.steps.join(&format!(" {joiner} "));
        if input.0.clean_prompt {
            let _ = self
                .client
                .run(target.host(), &["send-keys", "-t", &pane, "C-c", "C-u"])
                .await;
        }
        if let Err(e) = self
            .client
            .send_keys(target.host(), &pane, &command, true)
            .await
        {
            return Ok(error_result(&e));
        }
        self.record_side_effect(
            target.host(),
            target.session(),
            &format!("run-batch target={pane} steps={}", input.0.steps.len()),
        )
        .await;

        let mut text = "batch sent".to_string();
        if let Some(lines) = input.0.capture_lines.filter(|l| *l > 0) {
            if let Ok(capture) = self
                .client
                .capture_pane(target.host(), &pane, Some(-i64::from(lines)), None)
                .await
            {
                text = format!("{text}\n{capture}");
            }
        }
        Ok(CallToolResult::success(vec![Content::text(text)]))
    }

    #[tool(
        name = "run-command",
        description = "Run a raw tmux argument vector. Destructive verbs (kill-*, unlink-*, attach-session -k) refuse to run without confirm=true. The escape hatch when no dedicated tool fits.",
        annotations(destructive_hint = true)
    )]
    async fn run_command(
        &self,
        input: Parameters<RunCommandInput>,
    ) -> Result<CallToolResult, McpError> {
        if input.0.args.is_empty() {
            return Ok(error_result(&Error::Parse {
                message: "args are required".into(),
            }));
        }
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(_) => target,
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        if let Err(e) = self.gate.check_destructive(&input.0.args, input.0.confirm) {
            return Ok(error_result(&e));
        }
        let args: Vec<&str> = input.0.args.iter().map(String::as_str).collect();
        match self.client.run(target.host(), &args).await {
            Ok(out) => {
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("run-command {}", input.0.args.join(" ")),
                )
                .await;
                let out = if input.0.strip_ansi { strip_ansi(&out) } else { out };
                Ok(CallToolResult::success(vec![Content::text(if out.is_empty() {
                    "(no output)".to_string()
                } else {
                    out
                })]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "fan-out",
        description = "Run one request against many targets concurrently: send keys, then read back per target (one-shot capture, bounded tail, or regex pattern test). Per-target failures are embedded; the summary counts successes and failures.",
        output_schema = rmcp::handler::server::common::schema_for_type::<FanoutResult>().into()
    )]
    async fn fan_out(&self, input: Parameters<FanoutInput>) -> Result<CallToolResult, McpError> {
        for spec in &input.0.request.targets {
            if let Err(e) = self.gate.check_host(spec.host.as_deref()) {
                return Ok(error_result(&e));
            }
        }
        let hosts: Vec<Option<String>> = input
            .0
            .request
            .targets
            .iter()
            .map(|t| t.host.clone())
            .collect();
        let sent_keys = input.0.request.keys.is_some();
        match self.fanout.run(input.0.request, &CancellationToken::new()).await {
            Ok(result) => {
                if sent_keys {
                    for host in hosts {
                        self.record_side_effect(host.as_deref(), None, "fan-out send-keys")
                            .await;
                    }
                }
                Ok(structured_output(&result))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "create-window",
        description = "Create a window in a session, optionally named and running a command. Returns the final window name."
    )]
    async fn create_window(
        &self,
        input: Parameters<NewWindowInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let Some(session) = target.session() else {
            return Ok(error_result(&Error::NoSession {
                message: "session is required".into(),
            }));
        };
        match self
            .client
            .new_window(
                target.host(),
                session,
                input.0.name.as_deref(),
                input.0.command.as_deref(),
            )
            .await
        {
            Ok(name) => {
                self.record_side_effect(
                    target.host(),
                    Some(session),
                    &format!("create-window name={name}"),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "window {name} created"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "split-pane",
        description = "Split a pane horizontally (beside) or vertically (below), optionally running a command in the new pane."
    )]
    async fn split_pane(
        &self,
        input: Parameters<SplitPaneInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match self
            .client
            .split_pane(target.host(), &pane, input.0.vertical, input.0.command.as_deref())
            .await
        {
            Ok(_) => {
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("split-pane target={pane} vertical={}", input.0.vertical),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "pane {pane} split"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "kill-session",
        description = "Kill a session and everything in it. Destructive: requires confirm=true.",
        annotations(destructive_hint = true)
    )]
    async fn kill_session(&self, input: Parameters<KillInput>) -> Result<CallToolResult, McpError> {
        self.kill(input.0, "kill-session").await
    }

    #[tool(
        name = "kill-window",
        description = "Kill a window and its panes. Destructive: requires confirm=true.",
        annotations(destructive_hint = true)
    )]
    async fn kill_window(&self, input: Parameters<KillInput>) -> Result<CallToolResult, McpError> {
        self.kill(input.0, "kill-window").await
    }

    #[tool(
        name = "kill-pane",
        description = "Kill a single pane. Destructive: requires confirm=true.",
        annotations(destructive_hint = true)
    )]
    async fn kill_pane(&self, input: Parameters<KillInput>) -> Result<CallToolResult, McpError> {
        self.kill(input.0, "kill-pane").await
    }

    #[tool(
        name = "rename-session",
        description = "Rename a session."
    )]
    async fn rename_session(
        &self,
        input: Parameters<RenameInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let Some(session) = target.session() else {
            return Ok(error_result(&Error::NoSession {
                message: "session is required".into(),
            }));
        };
        match self
            .client
            .rename_session(target.host(), session, &input.0.name)
            .await
        {
            Ok(_) => {
                self.record_side_effect(
                    target.host(),
                    Some(session),
                    &format!("rename-session {} -> {}", session, input.0.name),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "session renamed to {}",
                    input.0.name
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "rename-window",
        description = "Rename a window. Target the window as session:index or @id."
    )]
    async fn rename_window(
        &self,
        input: Parameters<RenameInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let window_target = match (target.session(), target.window()) {
            (Some(session), Some(window)) => format!("{session}:{window}"),
            (_, Some(window)) => window.to_string(),
            (Some(session), None) => session.to_string(),
            (None, None) => {
                return Ok(error_result(&Error::InvalidTarget {
                    message: "window target required".into(),
                }))
            }
        };
        match self
            .client
            .rename_window(target.host(), &window_target, &input.0.name)
            .await
        {
            Ok(_) => {
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("rename-window {} -> {}", window_target, input.0.name),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "window renamed to {}",
                    input.0.name
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "select-pane",
        description = "Focus a pane and make it the default capture target for later calls."
    )]
    async fn select_pane(
        &self,
        input: Parameters<TargetOnlyInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        match self.client.select_pane(target.host(), &pane).await {
            Ok(_) => {
                self.resolver
                    .defaults
                    .update(&PaneRef {
                        host: None,
                        session: None,
                        window: None,
                        pane: Some(pane.clone()),
                    })
                    .await;
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("select-pane {pane}"),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "pane {pane} selected"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "select-window",
        description = "Focus a window (session:index, name, or @id) and make its active pane current."
    )]
    async fn select_window(
        &self,
        input: Parameters<TargetOnlyInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let window_target = match (target.session(), target.window()) {
            (Some(session), Some(window)) => format!("{session}:{window}"),
            (_, Some(window)) => window.to_string(),
            _ => {
                return Ok(error_result(&Error::InvalidTarget {
                    message: "window target required".into(),
                }))
            }
        };
        match self.client.select_window(target.host(), &window_target).await {
            Ok(_) => {
                // The previously selected pane no longer matches; clear it so
                // resolution follows the newly selected window.
                self.resolver
                    .defaults
                    .update(&PaneRef {
                        host: None,
                        session: target.session().map(str::to_string),
                        window: target.window().map(str::to_string),
                        pane: Some(String::new()),
                    })
                    .await;
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("select-window {window_target}"),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "window {window_target} selected"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "set-sync-panes",
        description = "Toggle synchronize-panes on a window so keystrokes fan out to every pane in it."
    )]
    async fn set_sync_panes(
        &self,
        input: Parameters<SetSyncPanesInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let window_target = match (target.session(), target.window()) {
            (Some(session), Some(window)) => format!("{session}:{window}"),
            (Some(session), None) => session.to_string(),
            (_, Some(window)) => window.to_string(),
            (None, None) => {
                return Ok(error_result(&Error::InvalidTarget {
                    message: "window target required".into(),
                }))
            }
        };
        match self
            .client
            .set_sync_panes(target.host(), &window_target, input.0.enabled)
            .await
        {
            Ok(_) => {
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("set-sync-panes {} {}", window_target, input.0.enabled),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "synchronize-panes {} for {window_target}",
                    if input.0.enabled { "on" } else { "off" }
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "set-default",
        description = "Merge fields into the process-wide default target. Omitted fields keep their value; empty strings clear one. Persisted when a defaults file is configured.",
        annotations(idempotent_hint = true)
    )]
    async fn set_default(
        &self,
        input: Parameters<SetDefaultInput>,
    ) -> Result<CallToolResult, McpError> {
        if let Err(e) = self
            .gate
            .check_host(input.0.target.host.as_deref().filter(|h| !h.is_empty()))
        {
            return Ok(error_result(&e));
        }
        let update = PaneRef {
            host: input.0.target.host,
            session: input.0.target.session,
            window: input.0.target.window,
            pane: input.0.target.pane,
        };
        let merged = self.resolver.defaults.update(&update).await;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "Defaults set {}",
            merged.describe()
        ))]))
    }

    #[tool(
        name = "list-defaults",
        description = "Show the current default target and whether it is persisted to disk.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<ListDefaultsOutput>().into()
    )]
    async fn list_defaults(
        &self,
        _input: Parameters<ListDefaultsInput>,
    ) -> Result<CallToolResult, McpError> {
        let current = self.resolver.defaults.get().await;
        let persisted = self.resolver.defaults.persisted();
        Ok(structured_output(&ListDefaultsOutput { current, persisted }))
    }

    #[tool(
        name = "set-audit",
        description = "Enable or disable the audit log for a host/session pair. Session logs always record side-effecting verbs; the audit file additionally records parameters.",
        annotations(idempotent_hint = true)
    )]
    async fn set_audit(&self, input: Parameters<SetAuditInput>) -> Result<CallToolResult, McpError> {
        let host = input.0.host.as_deref().filter(|h| !h.is_empty());
        if let Err(e) = self.gate.check_host(host) {
            return Ok(error_result(&e));
        }
        self.gate.set_audit(host, &input.0.session, input.0.enabled).await;
        Ok(CallToolResult::success(vec![Content::text(format!(
            "audit {} for {}:{}",
            if input.0.enabled { "enabled" } else { "disabled" },
            host.unwrap_or("local"),
            input.0.session
        ))]))
    }

    #[tool(
        name = "capture-layout",
        description = "Read the layout string of every window in a session; optionally save them as a named profile for later restore.",
        annotations(read_only_hint = true, idempotent_hint = true),
        output_schema = rmcp::handler::server::common::schema_for_type::<CaptureLayoutOutput>().into()
    )]
    async fn capture_layout(
        &self,
        input: Parameters<CaptureLayoutInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let Some(session) = target.session() else {
            return Ok(error_result(&Error::NoSession {
                message: "session is required".into(),
            }));
        };
        let windows = match capture_layout(&self.client, target.host(), session).await {
            Ok(windows) => windows,
            Err(e) => return Ok(error_result(&e)),
        };
        let mut saved_as = None;
        if let Some(name) = input.0.save_as.filter(|n| !n.is_empty()) {
            let profile = LayoutProfile {
                name: name.clone(),
                host: target.host().map(str::to_string),
                session: session.to_string(),
                windows: windows.clone(),
            };
            if let Err(e) = self.layouts.save(profile).await {
                return Ok(error_result(&e));
            }
            saved_as = Some(name);
        }
        Ok(structured_output(&CaptureLayoutOutput {
            session: session.to_string(),
            windows,
            saved_as,
        }))
    }

    #[tool(
        name = "restore-layout",
        description = "Apply window layouts to a session, from an explicit list or a saved profile. Per-window failures are logged and skipped."
    )]
    async fn restore_layout(
        &self,
        input: Parameters<RestoreLayoutInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let profile = match &input.0.profile {
            Some(name) => match self.layouts.get(name).await {
                Some(profile) => Some(profile),
                None => {
                    return Ok(error_result(&Error::Config {
                        message: format!("no layout profile named {name}"),
                    }))
                }
            },
            None => None,
        };
        let target = if target.is_empty() {
            match &profile {
                Some(profile) => PaneRef {
                    host: profile.host.clone(),
                    session: Some(profile.session.clone()),
                    window: None,
                    pane: None,
                },
                None => match self.resolver.require(&target).await {
                    Ok(target) => target,
                    Err(e) => return Ok(error_result(&e)),
                },
            }
        } else {
            target
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let Some(session) = target.session() else {
            return Ok(error_result(&Error::NoSession {
                message: "session is required".into(),
            }));
        };
        let windows = match (&input.0.windows, &profile) {
            (Some(windows), _) => windows.clone(),
            (None, Some(profile)) => profile.windows.clone(),
            (None, None) => Vec::new(),
        };
        match restore_layout(&self.client, target.host(), session, &windows).await {
            Ok(applied) => {
                self.record_side_effect(
                    target.host(),
                    Some(session),
                    &format!("restore-layout windows={applied}"),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "{applied} layouts applied"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }

    #[tool(
        name = "recent-commands",
        description = "Best-effort extraction of recently entered commands from a pane's scrollback (prompt-shape heuristic, last 15 matches). Not a contract; use for orientation only.",
        annotations(read_only_hint = true, idempotent_hint = true)
    )]
    async fn recent_commands(
        &self,
        input: Parameters<RecentCommandsInput>,
    ) -> Result<CallToolResult, McpError> {
        let target = target_of(input.0.target);
        let (target, pane) = match self.resolver.resolve(&target).await {
            Ok(resolved) => resolved,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let lines = input.0.lines.unwrap_or(capture::DEFAULT_CAPTURE_LINES);
        match self
            .client
            .capture_pane(target.host(), &pane, Some(-i64::from(lines)), None)
            .await
        {
            Ok(capture) => {
                let commands = recent_commands(&strip_ansi(&capture));
                Ok(CallToolResult::success(vec![Content::text(if commands.is_empty() {
                    "(no commands recognized)".to_string()
                } else {
                    commands.join("\n")
                })]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }
}

impl TmuxFleetServer {
    async fn kill(&self, input: KillInput, verb: &str) -> Result<CallToolResult, McpError> {
        let target = target_of(input.target);
        let target = match self.resolver.require(&target).await {
            Ok(target) => target,
            Err(e) => return Ok(error_result(&e)),
        };
        if let Err(e) = self.gate.check_host(target.host()) {
            return Ok(error_result(&e));
        }
        let kill_target = match verb {
            "kill-pane" => match self.resolver.resolve(&target).await {
                Ok((_, pane)) => pane,
                Err(e) => return Ok(error_result(&e)),
            },
            "kill-window" => match (target.session(), target.window()) {
                (Some(session), Some(window)) => format!("{session}:{window}"),
                (_, Some(window)) => window.to_string(),
                (Some(session), None) => session.to_string(),
                (None, None) => {
                    return Ok(error_result(&Error::InvalidTarget {
                        message: "window target required".into(),
                    }))
                }
            },
            _ => match target.session() {
                Some(session) => session.to_string(),
                None => {
                    return Ok(error_result(&Error::NoSession {
                        message: "session is required".into(),
                    }))
                }
            },
        };

        let args = vec![verb.to_string(), "-t".to_string(), kill_target.clone()];
        if let Err(e) = self.gate.check_destructive(&args, input.confirm) {
            return Ok(error_result(&e));
        }
        let arg_refs: Vec<&str> = args.iter().map(String::as_str).collect();
        match self.client.run(target.host(), &arg_refs).await {
            Ok(_) => {
                self.record_side_effect(
                    target.host(),
                    target.session(),
                    &format!("{verb} {kill_target} confirmed"),
                )
                .await;
                Ok(CallToolResult::success(vec![Content::text(format!(
                    "{verb} {kill_target} done"
                ))]))
            }
            Err(e) => Ok(error_result(&e)),
        }
    }
}

// ============================================================================
// ServerHandler Implementation
// ============================================================================

#[rmcp::tool_handler]
impl rmcp::ServerHandler for TmuxFleetServer {
    fn get_info(&self) -> ServerInfo {
        ServerInfo {
            instructions: Some(
                "Multi-host tmux mediation server. Targets are (host, session, window, pane); omitted fields fall back to the default target (see set-default/list-defaults). Start with snapshot or list-sessions to ground yourself; destructive verbs need confirm=true. Remote hosts go through ssh using host profiles from the hosts file.".into(),
            ),
            capabilities: ServerCapabilities::builder()
                .enable_tools()
                .enable_resources()
                .build(),
            ..Default::default()
        }
    }

    async fn list_resources(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> Result<rmcp::model::ListResourcesResult, McpError> {
        let mut resources: Vec<Resource> = vec![
            Annotated::new(
                RawResource {
                    uri: "tmux://defaults".into(),
                    name: "Default Target".into(),
                    title: None,
                    description: Some(
                        "The process-wide default target used when a call omits fields.".into(),
                    ),
                    mime_type: Some("application/json".into()),
                    size: None,
                    icons: None,
                },
                None,
            ),
            Annotated::new(
                RawResource {
                    uri: "tmux://hosts".into(),
                    name: "Host Profiles".into(),
                    title: None,
                    description: Some(
                        "Configured host aliases with their PATH additions and per-host defaults."
                            .into(),
                    ),
                    mime_type: Some("application/json".into()),
                    size: None,
                    icons: None,
                },
                None,
            ),
        ];
        for name in self.layouts.names().await {
            resources.push(Annotated::new(
                RawResource {
                    uri: format!("tmux://layout/{name}"),
                    name: format!("Layout Profile: {name}"),
                    title: None,
                    description: Some("Saved window layouts for restore-layout.".into()),
                    mime_type: Some("application/json".into()),
                    size: None,
                    icons: None,
                },
                None,
            ));
        }
        Ok(rmcp::model::ListResourcesResult {
            resources,
            next_cursor: None,
        })
    }

    async fn list_resource_templates(
        &self,
        _request: Option<rmcp::model::PaginatedRequestParam>,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> Result<rmcp::model::ListResourceTemplatesResult, McpError> {
        Ok(rmcp::model::ListResourceTemplatesResult {
            resource_templates: vec![
                Annotated::new(
                    RawResourceTemplate {
                        uri_template: "tmux://defaults".into(),
                        name: "Default Target".into(),
                        title: None,
                        description: Some("Current default host/session/window/pane.".into()),
                        mime_type: Some("application/json".into()),
                    },
                    None,
                ),
                Annotated::new(
                    RawResourceTemplate {
                        uri_template: "tmux://hosts".into(),
                        name: "Host Profiles".into(),
                        title: None,
                        description: Some("Host aliases usable in target.host.".into()),
                        mime_type: Some("application/json".into()),
                    },
                    None,
                ),
                Annotated::new(
                    RawResourceTemplate {
                        uri_template: "tmux://layout/{name}".into(),
                        name: "Layout Profile".into(),
                        title: None,
                        description: Some("Saved window layouts by profile name.".into()),
                        mime_type: Some("application/json".into()),
                    },
                    None,
                ),
            ],
            next_cursor: None,
        })
    }

    async fn read_resource(
        &self,
        request: rmcp::model::ReadResourceRequestParam,
        _context: rmcp::service::RequestContext<rmcp::service::RoleServer>,
    ) -> Result<rmcp::model::ReadResourceResult, McpError> {
        let uri = request.uri.as_str();
        if uri == "tmux://defaults" {
            let current = self.resolver.defaults.get().await;
            return Ok(rmcp::model::ReadResourceResult {
                contents: vec![ResourceContents::text(
                    serde_json::to_string_pretty(&current).unwrap_or_default(),
                    uri,
                )],
            });
        }
        if uri == "tmux://hosts" {
            let profiles: std::collections::BTreeMap<String, crate::target::HostProfile> = self
                .resolver
                .profiles
                .iter()
                .map(|(name, profile)| (name.clone(), profile.clone()))
                .collect();
            return Ok(rmcp::model::ReadResourceResult {
                contents: vec![ResourceContents::text(
                    serde_json::to_string_pretty(&profiles).unwrap_or_default(),
                    uri,
                )],
            });
        }
        if let Some(name) = uri.strip_prefix("tmux://layout/") {
            return match self.layouts.get(name).await {
                Some(profile) => Ok(rmcp::model::ReadResourceResult {
                    contents: vec![ResourceContents::text(
                        serde_json::to_string_pretty(&profile).unwrap_or_default(),
                        uri,
                    )],
                }),
                None => Ok(rmcp::model::ReadResourceResult {
                    contents: vec![ResourceContents::text(
                        format!("No layout profile named {name}"),
                        uri,
                    )],
                }),
            };
        }
        Ok(rmcp::model::ReadResourceResult {
            contents: vec![ResourceContents::text("Unknown resource", uri)],
        })
    }
}
