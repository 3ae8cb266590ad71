//! Error types and Result alias for the library.

#![allow(dead_code)]

use thiserror::Error;

/// Convenience result type for tmux-fleet-rs operations.
pub type Result<T> = std::result::Result<T, Error>;

/// Error variants returned by tmux-fleet-rs APIs.
#[derive(Debug, Error)]
pub enum Error {
    /// Target resolution produced no usable pane token.
    #[error("invalid target: {message}")]
    InvalidTarget { message: String },

    /// Host alias failed validation.
    #[error("invalid host: {message}")]
    InvalidHost { message: String },

    /// send-keys called with nothing to send.
    #[error("invalid keys: {message}")]
    InvalidKeys { message: String },

    /// Destructive verb invoked without confirmation.
    #[error("confirm required: {message}")]
    ConfirmRequired { message: String },

    /// No session could be resolved for a session-scoped request.
    #[error("no session: {message}")]
    NoSession { message: String },

    /// Subprocess exceeded its deadline.
    #[error("timeout: {message}")]
    Timeout { message: String },

    /// Cancellation signal received before completion.
    #[error("canceled")]
    Canceled,

    /// Subprocess exited non-zero or could not be spawned.
    #[error("transport failure: {message}")]
    Transport {
        message: String,
        stdout: String,
        stderr: String,
    },

    /// Output parsing failed.
    #[error("parse error: {message}")]
    Parse { message: String },

    /// Configuration parsing or IO failure.
    #[error("config error: {message}")]
    Config { message: String },
}

impl Error {
    /// Build a transport failure from captured subprocess output.
    pub fn transport(message: impl Into<String>, stdout: impl Into<String>, stderr: impl Into<String>) -> Self {
        Error::Transport {
            message: message.into(),
            stdout: stdout.into(),
            stderr: stderr.into(),
        }
    }
}
