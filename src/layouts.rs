//! Window-layout capture/restore and named layout profiles.
//!
//! Layout strings are opaque: tmux produces them, tmux consumes them. The
//! store only maps profile names to `(index, name, layout)` triples.

#![allow(dead_code)]

use std::collections::HashMap;
use std::path::PathBuf;

use schemars::JsonSchema;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use crate::errors::{Error, Result};
use crate::ops::TmuxClient;

const LAYOUT_FORMAT: &str = "#{window_index}\t#{window_name}\t#{window_layout}";

/// One window's layout inside a profile.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct WindowLayout {
    pub index: u32,
    pub name: String,
    pub layout: String,
}

/// A named, persistable arrangement of a session's windows.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, JsonSchema)]
pub struct LayoutProfile {
    pub name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
    pub session: String,
    pub windows: Vec<WindowLayout>,
}

/// Read the current layout of every window in a session.
pub async fn capture_layout(
    client: &TmuxClient,
    host: Option<&str>,
    session: &str,
) -> Result<Vec<WindowLayout>> {
    let out = client
        .run(host, &["list-windows", "-t", session, "-F", LAYOUT_FORMAT])
        .await?;
    Ok(parse_layouts(&out))
}

fn parse_layouts(output: &str) -> Vec<WindowLayout> {
    output
        .lines()
        .filter_map(|line| {
            let parts: Vec<&str> = line.splitn(3, '\t').collect();
            if parts.len() == 3 {
                Some(WindowLayout {
                    index: parts[0].parse().unwrap_or(0),
                    name: parts[1].to_string(),
                    layout: parts[2].to_string(),
                })
            } else {
                None
            }
        })
        .collect()
}

/// Apply layouts window by window. Per-window failures are logged and
/// skipped; the returned count is how many applied cleanly.
pub async fn restore_layout(
    client: &TmuxClient,
    host: Option<&str>,
    session: &str,
    windows: &[WindowLayout],
) -> Result<u32> {
    if windows.is_empty() {
        return Err(Error::InvalidTarget {
            message: "layouts are required".into(),
        });
    }
    let mut applied = 0;
    for window in windows {
        if window.layout.is_empty() {
            continue;
        }
        let target = format!("{session}:{}", window.index);
        match client.select_layout(host, &target, &window.layout).await {
            Ok(_) => applied += 1,
            Err(e) => {
                tracing::warn!(target, error = %e, "restore layout failed for window");
            }
        }
    }
    Ok(applied)
}

/// File-backed mapping from profile name to [`LayoutProfile`].
#[derive(Debug)]
pub struct LayoutStore {
    path: PathBuf,
    profiles: RwLock<HashMap<String, LayoutProfile>>,
}

impl LayoutStore {
    /// Load the store, tolerating a missing or unparsable file.
    pub fn load(path: PathBuf) -> Self {
        let profiles = std::fs::read_to_string(&path)
            .ok()
            .and_then(|data| serde_json::from_str(&data).ok())
            .unwrap_or_default();
        Self {
            path,
            profiles: RwLock::new(profiles),
        }
    }

    pub async fn get(&self, name: &str) -> Option<LayoutProfile> {
        self.profiles.read().await.get(name).cloned()
    }

    pub async fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.profiles.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    pub async fn save(&self, profile: LayoutProfile) -> Result<()> {
        let snapshot = {
            let mut profiles = self.profiles.write().await;
            profiles.insert(profile.name.clone(), profile);
            profiles.clone()
        };
        self.persist(&snapshot).await
    }

    pub async fn remove(&self, name: &str) -> Result<bool> {
        let (removed, snapshot) = {
            let mut profiles = self.profiles.write().await;
            let removed = profiles.remove(name).is_some();
            (removed, profiles.clone())
        };
        if removed {
            self.persist(&snapshot).await?;
        }
        Ok(removed)
    }

    async fn persist(&self, profiles: &HashMap<String, LayoutProfile>) -> Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Config {
                    message: format!("failed to create layout dir: {e}"),
                })?;
        }
        let data = serde_json::to_string_pretty(profiles).map_err(|e| Error::Config {
            message: format!("failed to serialize layouts: {e}"),
        })?;
        tokio::fs::write(&self.path, data)
            .await
            .map_err(|e| Error::Config {
                message: format!("failed to write layouts file: {e}"),
            })
    }
}
