//! Append-only session and audit log sinks.
//!
//! Files live at `{root}/{host}/{session}/{YYYY-MM-DD}.log` for session
//! logs and `audit-{YYYY-MM-DD}.log` in the same directory for audit
//! records. Appends to the same file are serialized; different files
//! proceed independently.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use chrono::{SecondsFormat, Utc};
use tokio::io::AsyncWriteExt;
use tokio::sync::Mutex;

/// Replace bytes outside `[A-Za-z0-9_.-]` with `_`.
pub fn sanitize_segment(segment: &str, fallback: &str) -> String {
    if segment.is_empty() {
        return fallback.to_string();
    }
    segment
        .chars()
        .map(|c| {
            if c.is_ascii_alphanumeric() || matches!(c, '_' | '.' | '-') {
                c
            } else {
                '_'
            }
        })
        .collect()
}

/// Per-host/per-session daily log writer.
#[derive(Debug)]
pub struct LogSinks {
    root: PathBuf,
    locks: Mutex<HashMap<PathBuf, Arc<Mutex<()>>>>,
}

impl LogSinks {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn day_dir(&self, host: Option<&str>, session: &str) -> PathBuf {
        self.root
            .join(sanitize_segment(host.unwrap_or(""), "local"))
            .join(sanitize_segment(session, "unknown"))
    }

    /// Record a side-effecting verb summary in the session log.
    pub async fn session_event(&self, host: Option<&str>, session: &str, line: &str) {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.day_dir(host, session).join(format!("{date}.log"));
        self.append(&path, line).await;
    }

    /// Record a full audit entry (verb plus redacted parameter summary).
    pub async fn audit_event(&self, host: Option<&str>, session: &str, line: &str) {
        let date = Utc::now().format("%Y-%m-%d");
        let path = self.day_dir(host, session).join(format!("audit-{date}.log"));
        self.append(&path, line).await;
    }

    async fn append(&self, path: &Path, line: &str) {
        let lock = {
            let mut locks = self.locks.lock().await;
            locks
                .entry(path.to_path_buf())
                .or_insert_with(|| Arc::new(Mutex::new(())))
                .clone()
        };
        let _guard = lock.lock().await;

        if let Some(parent) = path.parent() {
            if let Err(e) = tokio::fs::create_dir_all(parent).await {
                tracing::warn!(path = %parent.display(), error = %e, "failed to create log dir");
                return;
            }
        }
        let ts = Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true);
        let entry = format!("[{ts}] {line}\n");
        let result = tokio::fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(path)
            .await;
        match result {
            Ok(mut file) => {
                if let Err(e) = file.write_all(entry.as_bytes()).await {
                    tracing::warn!(path = %path.display(), error = %e, "failed to append log line");
                }
            }
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "failed to open log file");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;
    use tempfile::TempDir;

    #[rstest]
    #[case("work", "work")]
    #[case("user@host", "user_host")]
    #[case("a/b\\c", "a_b_c")]
    #[case("x y\tz", "x_y_z")]
    #[case("ok_name-1.2", "ok_name-1.2")]
    fn sanitize_replaces_disallowed_bytes(#[case] input: &str, #[case] expected: &str) {
        assert_eq!(sanitize_segment(input, "unknown"), expected);
    }

    #[test]
    fn sanitize_empty_uses_fallback() {
        assert_eq!(sanitize_segment("", "local"), "local");
        assert_eq!(sanitize_segment("", "unknown"), "unknown");
    }

    #[tokio::test]
    async fn session_event_writes_daily_file() {
        let dir = TempDir::new().expect("temp dir");
        let sinks = LogSinks::new(dir.path());
        sinks.session_event(Some("h1"), "work", "send-keys target=%1").await;

        let date = Utc::now().format("%Y-%m-%d");
        let path = dir.path().join("h1").join("work").join(format!("{date}.log"));
        let content = std::fs::read_to_string(&path).expect("log file");
        assert!(content.starts_with('['));
        assert!(content.contains("] send-keys target=%1\n"));
    }

    #[tokio::test]
    async fn audit_event_uses_separate_file_family() {
        let dir = TempDir::new().expect("temp dir");
        let sinks = LogSinks::new(dir.path());
        sinks.audit_event(None, "work", "kill-window confirmed").await;

        let date = Utc::now().format("%Y-%m-%d");
        let path = dir
            .path()
            .join("local")
            .join("work")
            .join(format!("audit-{date}.log"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn hostile_segments_stay_inside_the_log_root() {
        let dir = TempDir::new().expect("temp dir");
        let sinks = LogSinks::new(dir.path());
        sinks.session_event(Some("../../etc"), "a/b", "event").await;

        let date = Utc::now().format("%Y-%m-%d");
        let path = dir
            .path()
            .join(".._.._etc")
            .join("a_b")
            .join(format!("{date}.log"));
        assert!(path.exists());
    }

    #[tokio::test]
    async fn concurrent_appends_to_one_file_all_land() {
        let dir = TempDir::new().expect("temp dir");
        let sinks = Arc::new(LogSinks::new(dir.path()));
        let mut handles = Vec::new();
        for i in 0..10 {
            let sinks = sinks.clone();
            handles.push(tokio::spawn(async move {
                sinks.session_event(None, "shared", &format!("event-{i}")).await;
            }));
        }
        for handle in handles {
            handle.await.expect("append task");
        }

        let date = Utc::now().format("%Y-%m-%d");
        let path = dir
            .path()
            .join("local")
            .join("shared")
            .join(format!("{date}.log"));
        let content = std::fs::read_to_string(&path).expect("log file");
        assert_eq!(content.lines().count(), 10);
    }
}
