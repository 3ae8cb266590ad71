//! Primitive tmux operations: fixed argv templates over the transport.

#![allow(dead_code)]

use std::sync::Arc;
use std::time::Duration;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::target::HostProfiles;
use crate::transport::{RunRequest, Transport};

/// Tab-separated list formats with fixed field orders.
pub const SESSION_FORMAT: &str =
    "#{session_id}\t#{session_name}\t#{session_windows}\t#{?session_attached,1,0}\t#{session_created}";
pub const WINDOW_FORMAT: &str =
    "#{session_name}\t#{window_id}\t#{window_index}\t#{window_name}\t#{?window_active,1,0}\t#{window_panes}\t#{window_flags}";
pub const PANE_FORMAT: &str =
    "#{session_name}\t#{window_index}\t#{pane_id}\t#{pane_index}\t#{?pane_active,1,0}\t#{pane_tty}\t#{pane_current_command}\t#{pane_title}";

/// Summary of a tmux session.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct SessionInfo {
    pub id: String,
    pub name: String,
    pub windows: u32,
    pub attached: bool,
    pub created: Option<i64>,
}

/// Summary of a tmux window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WindowInfo {
    pub session: String,
    pub id: String,
    pub index: u32,
    pub name: String,
    pub active: bool,
    pub panes: u32,
    pub flags: String,
}

/// Summary of a tmux pane.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PaneInfo {
    pub session: String,
    pub window: u32,
    pub id: String,
    pub index: u32,
    pub active: bool,
    pub tty: String,
    pub command: String,
    pub title: String,
}

/// Map the documented special-key tokens onto tmux key names.
///
/// The map is applied to the whole input or to its trimmed form; anything
/// else is sent verbatim.
pub fn map_special_key(keys: &str) -> Option<&'static str> {
    let mapped = |s: &str| match s {
        "<SPACE>" => Some("Space"),
        "<TAB>" => Some("Tab"),
        "<ESC>" => Some("Escape"),
        "<ENTER>" => Some("Enter"),
        _ => None,
    };
    mapped(keys).or_else(|| mapped(keys.trim()))
}

/// Thin semantic client over the subprocess transport. Each operation has a
/// fixed argv template; per-host profile overrides pick the binary and PATH
/// additions.
#[derive(Clone)]
pub struct TmuxClient {
    transport: Arc<dyn Transport>,
    bin: String,
    path_add: Vec<String>,
    timeout: Duration,
    profiles: Arc<HostProfiles>,
}

impl TmuxClient {
    pub fn new(
        transport: Arc<dyn Transport>,
        bin: impl Into<String>,
        path_add: Vec<String>,
        timeout: Duration,
        profiles: Arc<HostProfiles>,
    ) -> Self {
        Self {
            transport,
            bin: bin.into(),
            path_add,
            timeout,
            profiles,
        }
    }

    fn request(&self, host: Option<&str>, args: Vec<String>) -> RunRequest {
        let mut bin = self.bin.clone();
        let mut path_add = self.path_add.clone();
        if let Some(profile) = host.and_then(|h| self.profiles.get(h)) {
            if let Some(profile_bin) = &profile.tmux_bin {
                bin = profile_bin.clone();
            }
            path_add.extend(profile.path_add.iter().cloned());
        }
        RunRequest {
            host: host.map(str::to_string),
            bin,
            path_add,
            args,
            timeout: self.timeout,
        }
    }

    /// Run a tmux argv to completion.
    pub async fn run(&self, host: Option<&str>, args: &[&str]) -> Result<String> {
        let owned: Vec<String> = args.iter().map(|a| a.to_string()).collect();
        self.run_owned(host, owned, &CancellationToken::new()).await
    }

    /// Run an owned argv, honouring an external cancellation signal.
    pub async fn run_owned(
        &self,
        host: Option<&str>,
        args: Vec<String>,
        cancel: &CancellationToken,
    ) -> Result<String> {
        let req = self.request(host, args);
        self.transport.run(&req, cancel).await
    }

    pub fn transport(&self) -> &Arc<dyn Transport> {
        &self.transport
    }

    // ------------------------------------------------------------------
    // Listings
    // ------------------------------------------------------------------

    pub async fn list_sessions(&self, host: Option<&str>) -> Result<Vec<SessionInfo>> {
        let out = self
            .run(host, &["list-sessions", "-F", SESSION_FORMAT])
            .await?;
        Ok(parse_sessions(&out))
    }

    pub async fn list_windows(
        &self,
        host: Option<&str>,
        target: Option<&str>,
    ) -> Result<Vec<WindowInfo>> {
        let mut args = vec!["list-windows"];
        if let Some(target) = target {
            args.extend(["-t", target]);
        }
        args.extend(["-F", WINDOW_FORMAT]);
        let out = self.run(host, &args).await?;
        Ok(parse_windows(&out))
    }

    pub async fn list_panes(
        &self,
        host: Option<&str>,
        target: Option<&str>,
    ) -> Result<Vec<PaneInfo>> {
        let mut args = vec!["list-panes"];
        if let Some(target) = target {
            args.extend(["-t", target]);
        }
        args.extend(["-F", PANE_FORMAT]);
        let out = self.run(host, &args).await?;
        Ok(parse_panes(&out))
    }

    /// Raw listing text used by snapshot sections.
    pub async fn list_raw(
        &self,
        host: Option<&str>,
        verb: &str,
        target: Option<&str>,
    ) -> Result<String> {
        let mut args = vec![verb];
        if let Some(target) = target {
            args.extend(["-t", target]);
        }
        self.run(host, &args).await
    }

    // ------------------------------------------------------------------
    // Capture & keys
    // ------------------------------------------------------------------

    /// One-shot capture of pane scrollback. `start` defaults to -200 lines
    /// from the bottom.
    pub async fn capture_pane(
        &self,
        host: Option<&str>,
        pane: &str,
        start: Option<i64>,
        end: Option<i64>,
    ) -> Result<String> {
        let start = start.unwrap_or(-200).to_string();
        let mut args = vec!["capture-pane", "-p", "-t", pane, "-S", &start];
        let end_str;
        if let Some(end) = end {
            end_str = end.to_string();
            args.extend(["-E", &end_str]);
        }
        self.run(host, &args).await
    }

    /// Send keys to a pane, applying the special-token map and the Enter
    /// policy. Empty keys are only allowed when `enter` is set.
    pub async fn send_keys(
        &self,
        host: Option<&str>,
        pane: &str,
        keys: &str,
        enter: bool,
    ) -> Result<String> {
        if keys.is_empty() && !enter {
            return Err(Error::InvalidKeys {
                message: "keys or enter required".into(),
            });
        }
        let mut args = vec!["send-keys", "-t", pane, "--"];
        let mapped = map_special_key(keys);
        if !keys.is_empty() {
            args.push(mapped.unwrap_or(keys));
        }
        if enter && mapped != Some("Enter") {
            args.push("Enter");
        }
        self.run(host, &args).await
    }

    // ------------------------------------------------------------------
    // Topology changes
    // ------------------------------------------------------------------

    pub async fn new_session(
        &self,
        host: Option<&str>,
        name: &str,
        command: Option<&str>,
    ) -> Result<String> {
        if name.is_empty() {
            return Err(Error::InvalidTarget {
                message: "session name required".into(),
            });
        }
        let mut args = vec!["new-session", "-d", "-s", name];
        if let Some(command) = command {
            args.push(command);
        }
        self.run(host, &args).await
    }

    /// Create a window and return its final name.
    pub async fn new_window(
        &self,
        host: Option<&str>,
        session: &str,
        name: Option<&str>,
        command: Option<&str>,
    ) -> Result<String> {
        let mut args = vec!["new-window", "-t", session, "-P", "-F", "#{window_name}"];
        if let Some(name) = name {
            args.extend(["-n", name]);
        }
        if let Some(command) = command {
            args.push(command);
        }
        self.run(host, &args).await
    }

    pub async fn split_pane(
        &self,
        host: Option<&str>,
        pane: &str,
        vertical: bool,
        command: Option<&str>,
    ) -> Result<String> {
        let direction = if vertical { "-v" } else { "-h" };
        let mut args = vec!["split-window", "-t", pane, direction];
        if let Some(command) = command {
            args.push(command);
        }
        self.run(host, &args).await
    }

    pub async fn kill_session(&self, host: Option<&str>, target: &str) -> Result<String> {
        self.run(host, &["kill-session", "-t", target]).await
    }

    pub async fn kill_window(&self, host: Option<&str>, target: &str) -> Result<String> {
        self.run(host, &["kill-window", "-t", target]).await
    }

    pub async fn kill_pane(&self, host: Option<&str>, target: &str) -> Result<String> {
        self.run(host, &["kill-pane", "-t", target]).await
    }

    pub async fn rename_session(
        &self,
        host: Option<&str>,
        target: &str,
        name: &str,
    ) -> Result<String> {
        self.run(host, &["rename-session", "-t", target, name]).await
    }

    pub async fn rename_window(
        &self,
        host: Option<&str>,
        target: &str,
        name: &str,
    ) -> Result<String> {
        self.run(host, &["rename-window", "-t", target, name]).await
    }

    pub async fn select_window(&self, host: Option<&str>, target: &str) -> Result<String> {
        self.run(host, &["select-window", "-t", target]).await
    }

    pub async fn select_pane(&self, host: Option<&str>, target: &str) -> Result<String> {
        self.run(host, &["select-pane", "-t", target]).await
    }

    pub async fn set_sync_panes(
        &self,
        host: Option<&str>,
        target: &str,
        enabled: bool,
    ) -> Result<String> {
        let value = if enabled { "on" } else { "off" };
        self.run(
            host,
            &["set-window-option", "-t", target, "synchronize-panes", value],
        )
        .await
    }

    /// Probe for a session. Any non-zero exit means absent.
    pub async fn has_session(&self, host: Option<&str>, name: &str) -> Result<bool> {
        match self.run(host, &["has-session", "-t", name]).await {
            Ok(_) => Ok(true),
            Err(Error::Transport { .. }) => Ok(false),
            Err(e) => Err(e),
        }
    }

    /// Attach or detach a pipe-pane command. `None` turns piping off.
    pub async fn pipe_pane(
        &self,
        host: Option<&str>,
        pane: &str,
        shell_cmd: Option<&str>,
    ) -> Result<String> {
        let mut args = vec!["pipe-pane", "-t", pane];
        if let Some(shell_cmd) = shell_cmd {
            args.push(shell_cmd);
        }
        self.run(host, &args).await
    }

    pub async fn select_layout(
        &self,
        host: Option<&str>,
        target: &str,
        layout: &str,
    ) -> Result<String> {
        self.run(host, &["select-layout", "-t", target, layout]).await
    }

    /// Expand a format string for a target via `display-message -p`.
    pub async fn display_message(
        &self,
        host: Option<&str>,
        target: &str,
        format: &str,
    ) -> Result<String> {
        self.run(host, &["display-message", "-p", "-t", target, format])
            .await
    }

    /// Run a shell command on the tmux server host (FIFO setup/teardown).
    pub async fn run_shell(&self, host: Option<&str>, command: &str) -> Result<String> {
        self.run(host, &["run-shell", command]).await
    }
}

// ----------------------------------------------------------------------
// List parsing
// ----------------------------------------------------------------------

pub fn parse_sessions(output: &str) -> Vec<SessionInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() >= 5 {
                Some(SessionInfo {
                    id: parts[0].to_string(),
                    name: parts[1].to_string(),
                    windows: parts[2].parse().unwrap_or(0),
                    attached: parts[3] == "1",
                    created: parts[4].parse().ok(),
                })
            } else {
                None
            }
        })
        .collect()
}

pub fn parse_windows(output: &str) -> Vec<WindowInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() >= 7 {
                Some(WindowInfo {
                    session: parts[0].to_string(),
                    id: parts[1].to_string(),
                    index: parts[2].parse().unwrap_or(0),
                    name: parts[3].to_string(),
                    active: parts[4] == "1",
                    panes: parts[5].parse().unwrap_or(0),
                    flags: parts[6].to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

pub fn parse_panes(output: &str) -> Vec<PaneInfo> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.split('\t').collect();
            if parts.len() >= 8 {
                Some(PaneInfo {
                    session: parts[0].to_string(),
                    window: parts[1].parse().unwrap_or(0),
                    id: parts[2].to_string(),
                    index: parts[3].parse().unwrap_or(0),
                    active: parts[4] == "1",
                    tty: parts[5].to_string(),
                    command: parts[6].to_string(),
                    title: parts[7].to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}
