//! Subprocess transport: run a tmux argv locally or through SSH.
//!
//! The transport is a trait so the capture engine and fan-out coordinator
//! can be exercised against a recording fake. Local invocations run the
//! argv directly (no shell) with the composed PATH in the child
//! environment; remote invocations wrap the command line in `base64 -d |
//! sh` so the login shell never reinterprets tmux format tokens.

#![allow(dead_code)]

use std::process::Stdio;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio_util::sync::CancellationToken;

use crate::errors::{Error, Result};
use crate::quote::{build_path, exec_command, remote_command};

/// Default subprocess deadline in milliseconds.
pub const DEFAULT_TIMEOUT_MS: u64 = 15_000;

/// Reject host aliases that could be mistaken for options or split into
/// multiple ssh arguments.
pub fn validate_host(host: &str) -> Result<()> {
    if host.starts_with('-') {
        return Err(Error::InvalidHost {
            message: format!("host must not start with '-': {host}"),
        });
    }
    if host.chars().any(char::is_whitespace) {
        return Err(Error::InvalidHost {
            message: format!("host must not contain whitespace: {host:?}"),
        });
    }
    Ok(())
}

/// A fully-specified subprocess invocation.
#[derive(Debug, Clone)]
pub struct RunRequest {
    /// Remote host alias; `None` runs locally.
    pub host: Option<String>,
    /// tmux binary name or path.
    pub bin: String,
    /// Extra PATH directories appended after the inherited PATH.
    pub path_add: Vec<String>,
    /// Arguments passed to the tmux binary.
    pub args: Vec<String>,
    /// Deadline for the whole subprocess.
    pub timeout: Duration,
}

impl RunRequest {
    pub fn new(host: Option<String>, bin: impl Into<String>, args: Vec<String>) -> Self {
        Self {
            host,
            bin: bin.into(),
            path_add: Vec::new(),
            args,
            timeout: Duration::from_millis(DEFAULT_TIMEOUT_MS),
        }
    }
}

/// Abstraction over subprocess execution.
///
/// Implementations: [`SubprocessTransport`] for production, and the
/// recording fake in `test_support` for engine-level tests.
#[async_trait]
pub trait Transport: Send + Sync {
    /// Run the request to completion and return its stdout with trailing
    /// newlines stripped.
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<String>;

    /// Open a long-lived reader for a remote file (used by the pipe-tail
    /// regime to consume a FIFO through `ssh cat`). Transports that cannot
    /// stream return an error, which forces the polling fallback.
    async fn open_remote_reader(&self, _host: &str, _path: &str) -> Result<Child> {
        Err(Error::transport("remote streaming not supported", "", ""))
    }
}

/// Production transport backed by `tokio::process`.
#[derive(Debug, Clone, Default)]
pub struct SubprocessTransport {
    /// Extra arguments spliced before the host on every ssh invocation
    /// (e.g. `-i key` or `-o BatchMode=yes`).
    pub ssh_args: Vec<String>,
}

impl SubprocessTransport {
    pub fn new(ssh_args: Vec<String>) -> Self {
        Self { ssh_args }
    }

    fn command_for(&self, req: &RunRequest) -> Result<Command> {
        let path = build_path(
            &std::env::var("PATH").unwrap_or_default(),
            &req.path_add,
        );

        let mut cmd = match req.host.as_deref() {
            Some(host) if !host.is_empty() => {
                validate_host(host)?;
                let command_line = exec_command(&path, &req.bin, &req.args);
                let mut cmd = Command::new("ssh");
                cmd.arg("-T");
                cmd.args(&self.ssh_args);
                cmd.arg(host);
                cmd.arg(remote_command(&command_line));
                cmd
            }
            _ => {
                let mut cmd = Command::new(&req.bin);
                cmd.args(&req.args);
                cmd.env("PATH", &path);
                cmd
            }
        };
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        Ok(cmd)
    }
}

#[async_trait]
impl Transport for SubprocessTransport {
    async fn run(&self, req: &RunRequest, cancel: &CancellationToken) -> Result<String> {
        let mut cmd = self.command_for(req)?;
        let output = tokio::select! {
            _ = cancel.cancelled() => return Err(Error::Canceled),
            outcome = tokio::time::timeout(req.timeout, cmd.output()) => match outcome {
                Err(_) => {
                    return Err(Error::Timeout {
                        message: format!(
                            "subprocess exceeded {}ms deadline",
                            req.timeout.as_millis()
                        ),
                    })
                }
                Ok(Err(e)) => return Err(Error::transport(format!("failed to spawn: {e}"), "", "")),
                Ok(Ok(output)) => output,
            },
        };

        let stdout = String::from_utf8_lossy(&output.stdout).into_owned();
        let stderr = String::from_utf8_lossy(&output.stderr).into_owned();
        if output.status.success() {
            Ok(stdout.trim_end_matches('\n').to_string())
        } else {
            let message = match output.status.code() {
                Some(code) => format!("exit code {code}: {}", stderr.trim()),
                None => format!("terminated by signal: {}", stderr.trim()),
            };
            Err(Error::transport(message, stdout, stderr))
        }
    }

    async fn open_remote_reader(&self, host: &str, path: &str) -> Result<Child> {
        validate_host(host)?;
        let mut cmd = Command::new("ssh");
        cmd.arg("-T");
        cmd.args(&self.ssh_args);
        cmd.arg(host);
        cmd.arg("cat");
        cmd.arg(path);
        cmd.stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::null())
            .kill_on_drop(true);
        cmd.spawn()
            .map_err(|e| Error::transport(format!("failed to spawn ssh reader: {e}"), "", ""))
    }
}
