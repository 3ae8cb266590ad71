//! Safety gate: destructive-verb classification, confirmation enforcement,
//! and the audit-enablement map.

use std::collections::HashSet;

use tokio::sync::RwLock;

use crate::errors::{Error, Result};
use crate::transport::validate_host;

const DESTRUCTIVE_VERBS: &[&str] = &[
    "kill-session",
    "kill-window",
    "kill-pane",
    "kill-server",
    "unlink-window",
    "unlink-pane",
];

/// Classify an argv as destructive.
///
/// A verb is destructive when it is in the named set, when it starts with
/// `kill-`, or when it is `attach-session` carrying `-k`.
pub fn is_destructive(args: &[String]) -> bool {
    let Some(verb) = args.first() else {
        return false;
    };
    if DESTRUCTIVE_VERBS.contains(&verb.as_str()) || verb.starts_with("kill-") {
        return true;
    }
    if verb == "attach-session" {
        return args.iter().any(|a| a == "-k");
    }
    false
}

/// Key for the audit-enablement map.
fn audit_key(host: Option<&str>, session: &str) -> String {
    format!("{}:{}", host.unwrap_or(""), session)
}

/// Enforces the confirmation funnel and tracks which host/session pairs
/// have auditing enabled. Single writer, lock-free-ish reads.
#[derive(Debug, Default)]
pub struct SafetyGate {
    audit_enabled: RwLock<HashSet<String>>,
}

impl SafetyGate {
    pub fn new() -> Self {
        Self::default()
    }

    /// Fail with `ConfirmRequired` when `args` is destructive and the caller
    /// did not confirm. Must run before any transport call.
    pub fn check_destructive(&self, args: &[String], confirm: bool) -> Result<()> {
        if is_destructive(args) && !confirm {
            let verb = args.first().map(String::as_str).unwrap_or("");
            return Err(Error::ConfirmRequired {
                message: format!("confirm=true required for destructive command {verb}"),
            });
        }
        Ok(())
    }

    /// Validate a host alias before it reaches any argv.
    pub fn check_host(&self, host: Option<&str>) -> Result<()> {
        match host {
            Some(host) if !host.is_empty() => validate_host(host),
            _ => Ok(()),
        }
    }

    pub async fn set_audit(&self, host: Option<&str>, session: &str, enabled: bool) {
        let key = audit_key(host, session);
        let mut map = self.audit_enabled.write().await;
        if enabled {
            map.insert(key);
        } else {
            map.remove(&key);
        }
    }

    pub async fn audit_enabled(&self, host: Option<&str>, session: &str) -> bool {
        self.audit_enabled.read().await.contains(&audit_key(host, session))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn argv(parts: &[&str]) -> Vec<String> {
        parts.iter().map(|s| s.to_string()).collect()
    }

    #[rstest]
    #[case(&["kill-session", "-t", "s"], true)]
    #[case(&["kill-window", "-t", "s:1"], true)]
    #[case(&["kill-pane", "-t", "%1"], true)]
    #[case(&["kill-server"], true)]
    #[case(&["unlink-window", "-t", "s:1"], true)]
    #[case(&["unlink-pane", "-t", "%1"], true)]
    #[case(&["kill-anything-new"], true)]
    #[case(&["attach-session", "-t", "s", "-k"], true)]
    #[case(&["attach-session", "-t", "s"], false)]
    #[case(&["list-sessions"], false)]
    #[case(&["send-keys", "-t", "%1", "kill-session"], false)]
    #[case(&[], false)]
    fn destructive_classification(#[case] args: &[&str], #[case] expected: bool) {
        assert_eq!(is_destructive(&argv(args)), expected);
    }

    #[test]
    fn unconfirmed_destructive_is_rejected() {
        let gate = SafetyGate::new();
        let err = gate
            .check_destructive(&argv(&["kill-window", "-t", "s:1"]), false)
            .unwrap_err();
        assert!(matches!(err, Error::ConfirmRequired { .. }));
    }

    #[test]
    fn confirmed_destructive_passes() {
        let gate = SafetyGate::new();
        assert!(gate
            .check_destructive(&argv(&["kill-window", "-t", "s:1"]), true)
            .is_ok());
    }

    #[test]
    fn non_destructive_never_needs_confirmation() {
        let gate = SafetyGate::new();
        assert!(gate
            .check_destructive(&argv(&["capture-pane", "-p", "-t", "%1"]), false)
            .is_ok());
    }

    #[test]
    fn host_validation_routes_through_gate() {
        let gate = SafetyGate::new();
        assert!(gate.check_host(Some("build-01")).is_ok());
        assert!(gate.check_host(None).is_ok());
        assert!(matches!(
            gate.check_host(Some("-oEvil")),
            Err(Error::InvalidHost { .. })
        ));
    }

    #[tokio::test]
    async fn audit_map_is_keyed_by_host_and_session() {
        let gate = SafetyGate::new();
        gate.set_audit(Some("h1"), "work", true).await;
        assert!(gate.audit_enabled(Some("h1"), "work").await);
        assert!(!gate.audit_enabled(Some("h2"), "work").await);
        assert!(!gate.audit_enabled(None, "work").await);

        gate.set_audit(Some("h1"), "work", false).await;
        assert!(!gate.audit_enabled(Some("h1"), "work").await);
    }
}
