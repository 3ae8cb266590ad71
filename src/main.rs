mod capture;
mod config;
mod errors;
mod fanout;
mod layouts;
mod logs;
mod ops;
mod quote;
mod security;
mod server;
mod snapshot;
mod target;
#[cfg(test)]
mod test_support;
mod transport;

use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use rmcp::ServiceExt;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

use crate::config::{ConfigFile, Overrides, Settings};
use crate::layouts::LayoutStore;
use crate::logs::LogSinks;
use crate::ops::TmuxClient;
use crate::security::SafetyGate;
use crate::server::TmuxFleetServer;
use crate::target::{DefaultRegistry, HostProfiles, PaneRef, TargetResolver};
use crate::transport::SubprocessTransport;

#[derive(Parser, Debug)]
#[command(name = "tmux-fleet-rs")]
#[command(about = "MCP mediation server for tmux on local and remote hosts")]
#[command(version)]
struct Cli {
    /// Path to TOML configuration file
    #[arg(short = 'c', long = "config")]
    config: Option<PathBuf>,

    /// Default host alias used when a target omits one
    #[arg(long = "host")]
    host: Option<String>,

    /// Default session used when a target omits one
    #[arg(long = "session")]
    session: Option<String>,

    /// tmux binary name or path
    #[arg(long = "tmux")]
    tmux: Option<String>,

    /// Subprocess deadline in milliseconds
    #[arg(long = "timeout-ms")]
    timeout_ms: Option<u64>,

    /// Path to the host-profile document
    #[arg(long = "hosts-file")]
    hosts_file: Option<PathBuf>,

    /// Path where the default target is persisted
    #[arg(long = "defaults-file")]
    defaults_file: Option<PathBuf>,

    /// Root directory for session and audit logs
    #[arg(long = "log-dir")]
    log_dir: Option<PathBuf>,
}

fn init_tracing() {
    if let Ok(filter) = EnvFilter::try_from_default_env() {
        tracing_subscriber::registry()
            .with(filter)
            .with(tracing_subscriber::fmt::layer().with_writer(std::io::stderr))
            .init();
    }
}

async fn shutdown_signal() {
    let ctrl_c = tokio::signal::ctrl_c();

    #[cfg(unix)]
    {
        use tokio::signal::unix::{signal, SignalKind};
        let mut term = match signal(SignalKind::terminate()) {
            Ok(signal) => signal,
            Err(_) => {
                let _ = ctrl_c.await;
                return;
            }
        };

        tokio::select! {
            _ = ctrl_c => {}
            _ = term.recv() => {}
        }
    }

    #[cfg(not(unix))]
    {
        let _ = ctrl_c.await;
    }
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();

    init_tracing();

    let file = match &cli.config {
        Some(path) => match ConfigFile::load(path) {
            Ok(file) => file,
            Err(e) => {
                eprintln!("Error loading config file: {e}");
                std::process::exit(1);
            }
        },
        None => ConfigFile::default(),
    };

    let overrides = Overrides {
        host: cli.host,
        session: cli.session,
        tmux_bin: cli.tmux,
        timeout_ms: cli.timeout_ms,
        hosts_file: cli.hosts_file,
        defaults_file: cli.defaults_file,
        log_dir: cli.log_dir,
    };
    let settings = match Settings::resolve(overrides, file) {
        Ok(settings) => settings,
        Err(e) => {
            eprintln!("Error resolving settings: {e}");
            std::process::exit(1);
        }
    };

    let profiles = Arc::new(HostProfiles::load(&settings.hosts_file));
    let defaults = Arc::new(DefaultRegistry::load(
        settings.defaults_file.clone(),
        PaneRef {
            host: settings.host.clone(),
            session: settings.session.clone(),
            window: None,
            pane: None,
        },
    ));
    let resolver = TargetResolver::new(defaults, profiles.clone());
    let client = TmuxClient::new(
        Arc::new(SubprocessTransport::new(settings.ssh_args.clone())),
        settings.tmux_bin.clone(),
        settings.path_add.clone(),
        settings.timeout,
        profiles,
    );
    let server = TmuxFleetServer::new(
        client,
        resolver,
        Arc::new(SafetyGate::new()),
        Arc::new(LogSinks::new(settings.log_dir.clone())),
        Arc::new(LayoutStore::load(settings.layouts_file.clone())),
    );

    tracing::info!(tmux = %settings.tmux_bin, "Starting tmux-fleet-rs server with stdio transport");

    let transport = rmcp::transport::io::stdio();

    match server.serve(transport).await {
        Ok(service) => {
            let cancel_token = service.cancellation_token();
            let mut wait = Box::pin(service.waiting());

            tokio::select! {
                result = &mut wait => {
                    if let Err(e) = result {
                        eprintln!("Server error: {e}");
                        std::process::exit(1);
                    }
                }
                _ = shutdown_signal() => {
                    cancel_token.cancel();
                    if let Err(e) = wait.await {
                        eprintln!("Server error: {e}");
                        std::process::exit(1);
                    }
                }
            }
        }
        Err(e) => {
            eprintln!("Failed to start server: {e}");
            std::process::exit(1);
        }
    }
}
