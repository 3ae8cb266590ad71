//! Configuration surface: TOML file, `TMUX_FLEET_*` environment, CLI flags.
//!
//! Precedence, highest first: CLI flag, environment variable, config file,
//! built-in default.

#![allow(dead_code)]

use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;

use crate::errors::{Error, Result};
use crate::transport::DEFAULT_TIMEOUT_MS;

/// `[defaults]` table: target components used when a request omits them.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct DefaultsConfig {
    #[serde(default)]
    pub host: Option<String>,
    #[serde(default)]
    pub session: Option<String>,
}

/// `[transport]` table.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct TransportConfig {
    #[serde(default)]
    pub tmux_bin: Option<String>,
    #[serde(default)]
    pub timeout_ms: Option<u64>,
    /// Extra PATH entries, colon-separated.
    #[serde(default)]
    pub path_add: Option<String>,
}

/// `[logging]` table.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct LoggingConfig {
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// `[ssh]` table.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct SshConfig {
    /// Extra ssh arguments, parsed with shell word rules
    /// (e.g. `"-i ~/.ssh/ci -o BatchMode=yes"`).
    #[serde(default)]
    pub args: Option<String>,
}

/// `[files]` table: persisted-state locations.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct FilesConfig {
    #[serde(default)]
    pub hosts_file: Option<PathBuf>,
    #[serde(default)]
    pub defaults_file: Option<PathBuf>,
    #[serde(default)]
    pub layouts_file: Option<PathBuf>,
}

/// Root schema for the optional TOML configuration file.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConfigFile {
    #[serde(default)]
    pub defaults: DefaultsConfig,
    #[serde(default)]
    pub transport: TransportConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
    #[serde(default)]
    pub ssh: SshConfig,
    #[serde(default)]
    pub files: FilesConfig,
}

impl ConfigFile {
    pub fn load(path: &std::path::Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| Error::Config {
            message: format!("failed to read config file: {e}"),
        })?;
        toml::from_str(&content).map_err(|e| Error::Config {
            message: format!("failed to parse config file: {e}"),
        })
    }
}

/// CLI-level overrides, filled by the clap parser in `main`.
#[derive(Debug, Clone, Default)]
pub struct Overrides {
    pub host: Option<String>,
    pub session: Option<String>,
    pub tmux_bin: Option<String>,
    pub timeout_ms: Option<u64>,
    pub hosts_file: Option<PathBuf>,
    pub defaults_file: Option<PathBuf>,
    pub log_dir: Option<PathBuf>,
}

/// Fully-resolved runtime settings.
#[derive(Debug, Clone)]
pub struct Settings {
    pub host: Option<String>,
    pub session: Option<String>,
    pub tmux_bin: String,
    pub timeout: Duration,
    pub path_add: Vec<String>,
    pub hosts_file: PathBuf,
    pub defaults_file: Option<PathBuf>,
    pub layouts_file: PathBuf,
    pub log_dir: PathBuf,
    pub ssh_args: Vec<String>,
}

fn env_var(name: &str) -> Option<String> {
    std::env::var(name).ok().filter(|v| !v.is_empty())
}

fn config_root() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join("tmux-fleet")
}

impl Settings {
    /// Merge overrides, environment, and file config into final settings.
    pub fn resolve(overrides: Overrides, file: ConfigFile) -> Result<Self> {
        let root = config_root();

        let host = overrides
            .host
            .or_else(|| env_var("TMUX_FLEET_HOST"))
            .or(file.defaults.host)
            .filter(|h| !h.is_empty());
        let session = overrides
            .session
            .or_else(|| env_var("TMUX_FLEET_SESSION"))
            .or(file.defaults.session)
            .filter(|s| !s.is_empty());

        let tmux_bin = overrides
            .tmux_bin
            .or_else(|| env_var("TMUX_FLEET_BIN"))
            .or(file.transport.tmux_bin)
            .unwrap_or_else(|| "tmux".to_string());

        let timeout_ms = match overrides
            .timeout_ms
            .map(Ok)
            .or_else(|| env_var("TMUX_FLEET_TIMEOUT_MS").map(|v| v.parse::<u64>()))
        {
            Some(Ok(ms)) => Some(ms),
            Some(Err(e)) => {
                return Err(Error::Config {
                    message: format!("invalid TMUX_FLEET_TIMEOUT_MS: {e}"),
                })
            }
            None => file.transport.timeout_ms,
        };
        let timeout = Duration::from_millis(timeout_ms.unwrap_or(DEFAULT_TIMEOUT_MS));

        let path_add = env_var("TMUX_FLEET_PATH_ADD")
            .or(file.transport.path_add)
            .map(|raw| {
                raw.split(':')
                    .filter(|p| !p.is_empty())
                    .map(str::to_string)
                    .collect()
            })
            .unwrap_or_default();

        let hosts_file = overrides
            .hosts_file
            .or_else(|| env_var("TMUX_FLEET_HOSTS_FILE").map(PathBuf::from))
            .or(file.files.hosts_file)
            .unwrap_or_else(|| root.join("hosts.json"));

        let defaults_file = overrides
            .defaults_file
            .or_else(|| env_var("TMUX_FLEET_DEFAULTS_FILE").map(PathBuf::from))
            .or(file.files.defaults_file)
            .or_else(|| Some(root.join("defaults.json")));

        let layouts_file = file
            .files
            .layouts_file
            .unwrap_or_else(|| root.join("layouts.json"));

        let log_dir = overrides
            .log_dir
            .or_else(|| env_var("TMUX_FLEET_LOG_DIR").map(PathBuf::from))
            .or(file.logging.log_dir)
            .unwrap_or_else(|| root.join("logs"));

        let ssh_args = match env_var("TMUX_FLEET_SSH_ARGS").or(file.ssh.args) {
            Some(raw) => shell_words::split(&raw).map_err(|e| Error::Config {
                message: format!("invalid ssh args: {e}"),
            })?,
            None => Vec::new(),
        };

        Ok(Self {
            host,
            session,
            tmux_bin,
            timeout,
            path_add,
            hosts_file,
            defaults_file,
            layouts_file,
            log_dir,
            ssh_args,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::EnvGuard;
    use std::io::Write;
    use tempfile::NamedTempFile;

    #[test]
    fn config_file_parses_all_tables() {
        let mut file = NamedTempFile::new().expect("temp config");
        writeln!(
            file,
            r#"
[defaults]
host = "build-01"
session = "ci"

[transport]
tmux_bin = "/usr/local/bin/tmux"
timeout_ms = 30000
path_add = "/opt/homebrew/bin:/usr/local/bin"

[logging]
log_dir = "/var/log/tmux-fleet"

[ssh]
args = "-o BatchMode=yes"
"#
        )
        .expect("write config");

        let parsed = ConfigFile::load(file.path()).expect("load config");
        assert_eq!(parsed.defaults.host.as_deref(), Some("build-01"));
        assert_eq!(parsed.transport.timeout_ms, Some(30000));

        let settings = {
            let _env = EnvGuard::clear(ALL_VARS);
            Settings::resolve(Overrides::default(), parsed).expect("resolve")
        };
        assert_eq!(settings.host.as_deref(), Some("build-01"));
        assert_eq!(settings.session.as_deref(), Some("ci"));
        assert_eq!(settings.tmux_bin, "/usr/local/bin/tmux");
        assert_eq!(settings.timeout, Duration::from_millis(30000));
        assert_eq!(
            settings.path_add,
            vec!["/opt/homebrew/bin".to_string(), "/usr/local/bin".to_string()]
        );
        assert_eq!(settings.ssh_args, vec!["-o".to_string(), "BatchMode=yes".to_string()]);
    }

    #[test]
    fn config_file_rejects_bad_toml() {
        let mut file = NamedTempFile::new().expect("temp config");
        writeln!(file, "not = = valid").expect("write config");
        let err = ConfigFile::load(file.path()).unwrap_err();
        assert!(matches!(err, Error::Config { .. }));
    }

    const ALL_VARS: &[&str] = &[
        "TMUX_FLEET_HOST",
        "TMUX_FLEET_SESSION",
        "TMUX_FLEET_BIN",
        "TMUX_FLEET_TIMEOUT_MS",
        "TMUX_FLEET_PATH_ADD",
        "TMUX_FLEET_HOSTS_FILE",
        "TMUX_FLEET_DEFAULTS_FILE",
        "TMUX_FLEET_LOG_DIR",
        "TMUX_FLEET_SSH_ARGS",
    ];

    #[test]
    fn overrides_beat_file_values() {
        let _env = EnvGuard::clear(ALL_VARS);
        let file = ConfigFile {
            defaults: DefaultsConfig {
                host: Some("from-file".into()),
                session: None,
            },
            transport: TransportConfig {
                timeout_ms: Some(1000),
                ..Default::default()
            },
            ..Default::default()
        };
        let overrides = Overrides {
            host: Some("from-flag".into()),
            timeout_ms: Some(2000),
            ..Default::default()
        };
        let settings = Settings::resolve(overrides, file).expect("resolve");
        assert_eq!(settings.host.as_deref(), Some("from-flag"));
        assert_eq!(settings.timeout, Duration::from_millis(2000));
    }

    #[test]
    fn env_beats_file_values() {
        let mut env = EnvGuard::clear(ALL_VARS);
        env.set("TMUX_FLEET_HOST", "from-env");
        let file = ConfigFile {
            defaults: DefaultsConfig {
                host: Some("from-file".into()),
                session: None,
            },
            ..Default::default()
        };
        let settings = Settings::resolve(Overrides::default(), file).expect("resolve");
        assert_eq!(settings.host.as_deref(), Some("from-env"));
    }

    #[test]
    fn defaults_apply_when_nothing_is_set() {
        let _env = EnvGuard::clear(ALL_VARS);
        let settings = Settings::resolve(Overrides::default(), ConfigFile::default()).expect("resolve");
        assert_eq!(settings.tmux_bin, "tmux");
        assert_eq!(settings.timeout, Duration::from_millis(DEFAULT_TIMEOUT_MS));
        assert!(settings.hosts_file.ends_with("hosts.json"));
        assert!(settings.log_dir.ends_with("logs"));
    }
}
