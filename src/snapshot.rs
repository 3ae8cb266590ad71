//! State assembler: one call that gathers listings and a capture into a
//! single grounded view of a session.

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};

use crate::capture::DEFAULT_CAPTURE_LINES;
use crate::errors::{Error, Result};
use crate::ops::TmuxClient;
use crate::target::TargetResolver;

/// Composite view returned by the snapshot verb.
#[derive(Debug, Clone, Serialize, Deserialize, JsonSchema)]
pub struct Snapshot {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub session: String,
    #[serde(rename = "sessionsText")]
    pub sessions_text: String,
    #[serde(rename = "windowsText")]
    pub windows_text: String,
    #[serde(rename = "panesText")]
    pub panes_text: String,
    #[serde(rename = "captureTarget", skip_serializing_if = "Option::is_none")]
    pub capture_target: Option<String>,
    pub capture: String,
    #[serde(rename = "captureRequestedLines")]
    pub capture_requested_lines: u32,
    #[serde(rename = "captureTruncated")]
    pub capture_truncated: bool,
}

/// Assemble a [`Snapshot`].
///
/// Host and session fall back to the default registry (then the host
/// profile); a missing session fails with `NoSession`. Listing failures
/// degrade to empty sections. The capture target is the default pane when
/// one is registered, else the active pane of the active window.
pub async fn snapshot(
    client: &TmuxClient,
    resolver: &TargetResolver,
    host: Option<&str>,
    session: Option<&str>,
    capture_lines: Option<u32>,
) -> Result<Snapshot> {
    let defaults = resolver.defaults.get().await;
    let host: Option<String> = host
        .filter(|h| !h.is_empty())
        .map(str::to_string)
        .or_else(|| defaults.host().map(str::to_string));

    let session: String = session
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .or_else(|| defaults.session().map(str::to_string))
        .or_else(|| {
            host.as_deref()
                .and_then(|h| resolver.profiles.get(h))
                .and_then(|p| p.default_session.clone())
        })
        .ok_or_else(|| Error::NoSession {
            message: "no session resolvable (set defaults or provide one)".into(),
        })?;

    let capture_lines = capture_lines.unwrap_or(DEFAULT_CAPTURE_LINES).max(1);

    let (sessions_text, windows_text, panes_text) = tokio::join!(
        client.list_raw(host.as_deref(), "list-sessions", None),
        client.list_raw(host.as_deref(), "list-windows", Some(&session)),
        client.list_raw(host.as_deref(), "list-panes", Some(&session)),
    );
    let sessions_text = sessions_text.unwrap_or_default();
    let windows_text = windows_text.unwrap_or_default();
    let panes_text = panes_text.unwrap_or_default();

    // Default pane wins; otherwise ask tmux for the active pane.
    let explicit = defaults.pane().map(str::to_string);
    let capture_target = match &explicit {
        Some(pane) => Some(pane.clone()),
        None => client
            .display_message(host.as_deref(), &session, "#{pane_id}")
            .await
            .ok()
            .filter(|id| !id.is_empty()),
    };

    let (capture, capture_truncated) = match &capture_target {
        None => ("(no capture target)".to_string(), false),
        Some(pane) => {
            match client
                .capture_pane(host.as_deref(), pane, Some(-i64::from(capture_lines)), None)
                .await
            {
                Ok(capture) => {
                    let truncated = capture.lines().count() as u32 >= capture_lines;
                    (capture, truncated)
                }
                // An explicitly configured pane that cannot be captured is a
                // real failure; a discovered one degrades.
                Err(e) if explicit.is_some() => return Err(e),
                Err(_) => ("(no capture target)".to_string(), false),
            }
        }
    };

    Ok(Snapshot {
        host,
        session,
        sessions_text,
        windows_text,
        panes_text,
        capture_target,
        capture,
        capture_requested_lines: capture_lines,
        capture_truncated,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::target::{DefaultRegistry, HostProfiles, PaneRef};
    use crate::test_support::client_with_fake;
    use std::sync::Arc;

    fn resolver(defaults: PaneRef) -> TargetResolver {
        TargetResolver::new(
            Arc::new(DefaultRegistry::new(defaults, None)),
            Arc::new(HostProfiles::default()),
        )
    }

    fn defaults(host: &str, session: &str, pane: &str) -> PaneRef {
        let opt = |s: &str| (!s.is_empty()).then(|| s.to_string());
        PaneRef {
            host: opt(host),
            session: opt(session),
            window: None,
            pane: opt(pane),
        }
    }

    #[tokio::test]
    async fn snapshot_requires_a_session() {
        let (client, _fake) = client_with_fake();
        let resolver = resolver(PaneRef::default());
        let err = snapshot(&client, &resolver, None, None, None).await.unwrap_err();
        assert!(matches!(err, Error::NoSession { .. }));
    }

    #[tokio::test]
    async fn snapshot_gathers_sections_and_capture() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(PaneRef::default());
        fake.push_output("sessions-here");
        fake.push_output("windows-here");
        fake.push_output("panes-here");
        fake.push_output("%3"); // active pane
        fake.push_output("captured text");

        let snap = snapshot(&client, &resolver, None, Some("work"), Some(50))
            .await
            .expect("snapshot");
        assert_eq!(snap.session, "work");
        assert_eq!(snap.sessions_text, "sessions-here");
        assert_eq!(snap.windows_text, "windows-here");
        assert_eq!(snap.panes_text, "panes-here");
        assert_eq!(snap.capture_target.as_deref(), Some("%3"));
        assert_eq!(snap.capture, "captured text");
        assert_eq!(snap.capture_requested_lines, 50);
        assert!(!snap.capture_truncated);
    }

    #[tokio::test]
    async fn snapshot_prefers_default_pane_over_discovery() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(defaults("", "work", "%7"));
        let snap = snapshot(&client, &resolver, None, None, None).await.expect("snapshot");
        assert_eq!(snap.capture_target.as_deref(), Some("%7"));
        // No display-message call was needed.
        assert!(fake
            .calls()
            .iter()
            .all(|c| c.args[0] != "display-message"));
    }

    #[tokio::test]
    async fn snapshot_tolerates_listing_failures() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(PaneRef::default());
        fake.fail_next("no server");
        fake.fail_next("no server");
        fake.fail_next("no server");
        fake.fail_next("no server"); // display-message
        let snap = snapshot(&client, &resolver, None, Some("work"), None)
            .await
            .expect("snapshot");
        assert_eq!(snap.sessions_text, "");
        assert_eq!(snap.capture, "(no capture target)");
        assert!(snap.capture_target.is_none());
    }

    #[tokio::test]
    async fn snapshot_fails_when_explicit_pane_cannot_be_captured() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(defaults("", "work", "%7"));
        fake.push_output(""); // sessions
        fake.push_output(""); // windows
        fake.push_output(""); // panes
        fake.fail_next("no such pane"); // capture of %7
        let err = snapshot(&client, &resolver, None, None, None).await.unwrap_err();
        assert!(matches!(err, Error::Transport { .. }));
    }

    #[tokio::test]
    async fn snapshot_marks_truncation_when_capture_fills_request() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(PaneRef::default());
        fake.push_output("");
        fake.push_output("");
        fake.push_output("");
        fake.push_output("%1");
        fake.push_output("a\nb\nc");
        let snap = snapshot(&client, &resolver, None, Some("work"), Some(3))
            .await
            .expect("snapshot");
        assert!(snap.capture_truncated);
    }

    #[tokio::test]
    async fn snapshot_uses_default_host() {
        let (client, fake) = client_with_fake();
        let resolver = resolver(defaults("h9", "work", ""));
        fake.push_output("");
        fake.push_output("");
        fake.push_output("");
        fake.push_output("%1");
        fake.push_output("text");
        let snap = snapshot(&client, &resolver, None, None, None).await.expect("snapshot");
        assert_eq!(snap.host.as_deref(), Some("h9"));
        assert!(fake.calls().iter().all(|c| c.host.as_deref() == Some("h9")));
    }
}
