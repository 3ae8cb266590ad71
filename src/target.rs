//! Pane addressing: partial targets, host profiles, and the process-wide
//! default-target registry.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{Error, Result};

/// A partially-specified pane address. Any combination of fields is
/// allowed; resolution fills the gaps from profiles and defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct PaneRef {
    /// Remote host alias; empty/absent means local.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    /// Session name or id (`$n`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub session: Option<String>,
    /// Window index, name, or id (`@n`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub window: Option<String>,
    /// Pane token: `%n`, `session:window.pane`, or any tmux target notation.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub pane: Option<String>,
}

fn field(value: &Option<String>) -> Option<&str> {
    value.as_deref().filter(|s| !s.is_empty())
}

impl PaneRef {
    pub fn is_empty(&self) -> bool {
        field(&self.host).is_none()
            && field(&self.session).is_none()
            && field(&self.window).is_none()
            && field(&self.pane).is_none()
    }

    pub fn host(&self) -> Option<&str> {
        field(&self.host)
    }

    pub fn session(&self) -> Option<&str> {
        field(&self.session)
    }

    pub fn window(&self) -> Option<&str> {
        field(&self.window)
    }

    pub fn pane(&self) -> Option<&str> {
        field(&self.pane)
    }

    /// One-line rendering for log records and replies.
    pub fn describe(&self) -> String {
        format!(
            "host={} session={} window={} pane={}",
            self.host().unwrap_or("-"),
            self.session().unwrap_or("-"),
            self.window().unwrap_or("-"),
            self.pane().unwrap_or("-"),
        )
    }
}

/// Per-host settings loaded once at startup.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct HostProfile {
    #[serde(default, rename = "pathAdd")]
    pub path_add: Vec<String>,
    #[serde(default, rename = "tmuxBin", skip_serializing_if = "Option::is_none")]
    pub tmux_bin: Option<String>,
    #[serde(default, rename = "defaultSession", skip_serializing_if = "Option::is_none")]
    pub default_session: Option<String>,
    #[serde(default, rename = "defaultPane", skip_serializing_if = "Option::is_none")]
    pub default_pane: Option<String>,
}

/// Read-only map of host alias to profile.
#[derive(Debug, Default)]
pub struct HostProfiles {
    map: HashMap<String, HostProfile>,
}

impl HostProfiles {
    pub fn from_map(map: HashMap<String, HostProfile>) -> Self {
        Self { map }
    }

    /// Load profiles from a JSON document. A missing or malformed file
    /// degrades to an empty map; the process keeps running.
    pub fn load(path: &Path) -> Self {
        let data = match std::fs::read_to_string(path) {
            Ok(data) => data,
            Err(_) => return Self::default(),
        };
        match serde_json::from_str::<HashMap<String, HostProfile>>(&data) {
            Ok(map) => Self { map },
            Err(e) => {
                tracing::warn!(path = %path.display(), error = %e, "ignoring unparsable hosts file");
                Self::default()
            }
        }
    }

    pub fn get(&self, host: &str) -> Option<&HostProfile> {
        self.map.get(host)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &HostProfile)> {
        self.map.iter()
    }
}

/// Process-wide default target with optional JSON persistence.
///
/// Update semantics: an absent field keeps the previous value, an
/// empty-string field clears it. Reads never wait on persistence.
#[derive(Debug)]
pub struct DefaultRegistry {
    current: RwLock<PaneRef>,
    persist_path: Option<PathBuf>,
}

impl DefaultRegistry {
    pub fn new(initial: PaneRef, persist_path: Option<PathBuf>) -> Self {
        Self {
            current: RwLock::new(initial),
            persist_path,
        }
    }

    /// Load the persisted record if one exists, otherwise start from
    /// `fallback` (typically the env/config defaults).
    pub fn load(persist_path: Option<PathBuf>, fallback: PaneRef) -> Self {
        let initial = persist_path
            .as_deref()
            .and_then(|path| std::fs::read_to_string(path).ok())
            .and_then(|data| serde_json::from_str::<PaneRef>(&data).ok())
            .filter(|stored| !stored.is_empty())
            .unwrap_or(fallback);
        Self::new(initial, persist_path)
    }

    pub async fn get(&self) -> PaneRef {
        self.current.read().await.clone()
    }

    /// Whether writes are mirrored to disk.
    pub fn persisted(&self) -> bool {
        self.persist_path.is_some()
    }

    /// Merge `update` into the registry and return the new record.
    pub async fn update(&self, update: &PaneRef) -> PaneRef {
        let merged = {
            let mut current = self.current.write().await;
            merge_field(&mut current.host, &update.host);
            merge_field(&mut current.session, &update.session);
            merge_field(&mut current.window, &update.window);
            merge_field(&mut current.pane, &update.pane);
            current.clone()
        };
        self.persist(&merged).await;
        merged
    }

    async fn persist(&self, record: &PaneRef) {
        let Some(path) = &self.persist_path else {
            return;
        };
        if let Some(parent) = path.parent() {
            let _ = tokio::fs::create_dir_all(parent).await;
        }
        let data = match serde_json::to_string_pretty(record) {
            Ok(data) => data,
            Err(e) => {
                tracing::warn!(error = %e, "failed to serialize default target");
                return;
            }
        };
        if let Err(e) = tokio::fs::write(path, data).await {
            tracing::warn!(path = %path.display(), error = %e, "failed to persist default target");
        }
    }
}

/// Absent keeps, empty string clears, anything else overwrites.
fn merge_field(current: &mut Option<String>, update: &Option<String>) {
    match update {
        None => {}
        Some(value) if value.is_empty() => *current = None,
        Some(value) => *current = Some(value.clone()),
    }
}

/// Normalizes partial targets into concrete pane tokens.
#[derive(Clone)]
pub struct TargetResolver {
    pub defaults: Arc<DefaultRegistry>,
    pub profiles: Arc<HostProfiles>,
}

impl TargetResolver {
    pub fn new(defaults: Arc<DefaultRegistry>, profiles: Arc<HostProfiles>) -> Self {
        Self { defaults, profiles }
    }

    /// Fall back to the default record when the input is empty. Used by
    /// verbs that need a host or session but no pane.
    pub async fn require(&self, input: &PaneRef) -> Result<PaneRef> {
        if !input.is_empty() {
            return Ok(input.clone());
        }
        let defaults = self.defaults.get().await;
        if defaults.is_empty() {
            return Err(Error::InvalidTarget {
                message: "target required (set defaults or provide one)".into(),
            });
        }
        Ok(defaults)
    }

    /// Resolve an input to a concrete pane token, filling session/pane gaps
    /// from the host profile. The caller's input is not mutated.
    pub async fn resolve(&self, input: &PaneRef) -> Result<(PaneRef, String)> {
        let mut target = self.require(input).await?;

        if let Some(profile) = target.host().and_then(|h| self.profiles.get(h)) {
            if target.session().is_none() {
                target.session = profile.default_session.clone();
            }
            if target.pane().is_none() {
                target.pane = profile.default_pane.clone();
            }
        }

        let pane = if let Some(pane) = target.pane() {
            pane.to_string()
        } else if let (Some(session), Some(window)) = (target.session(), target.window()) {
            format!("{session}:{window}.0")
        } else if let Some(session) = target.session() {
            format!("{session}.0")
        } else {
            return Err(Error::InvalidTarget {
                message: "pane required (set defaults or provide pane/session/window)".into(),
            });
        };

        Ok((target, pane))
    }
}
