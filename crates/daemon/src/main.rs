//! davgate
//!
//! Multi-user WebDAV server.

use std::path::PathBuf;
use std::sync::Arc;

use anyhow::Context;
use clap::{Parser, Subcommand};
use davgate::{Config, DavServer};
use tracing_subscriber::prelude::*;
use tracing_subscriber::{fmt, reload, EnvFilter};

/// davgate - multi-user WebDAV server with per-user scopes.
#[derive(Parser, Debug)]
#[command(name = "davgate")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file (TOML, JSON or YAML)
    #[arg(short, long, global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    pub verbose: bool,

    /// Subcommand to execute (defaults to start)
    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Available commands.
#[derive(Subcommand, Debug, Clone, PartialEq, Eq)]
pub enum Commands {
    /// Start serving WebDAV
    Start,

    /// Validate the configuration and print the resolved users
    Check,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Initialize tracing before the config is read; the level is refined
    // once the configured log_level is known
    let env_filter = std::env::var("RUST_LOG").ok().filter(|v| !v.is_empty());
    let initial = env_filter
        .clone()
        .unwrap_or_else(|| log_filter(cli.verbose, "info"));
    let (filter, reload_handle) = reload::Layer::new(EnvFilter::new(initial));
    tracing_subscriber::registry()
        .with(filter)
        .with(fmt::layer())
        .init();

    // Load configuration
    let mut config = match &cli.config {
        Some(config_path) => {
            tracing::info!("Using config file: {:?}", config_path);
            Config::load(config_path)?
        }
        None => Config::load_default()?,
    };

    // Apply environment variable overrides
    config.apply_env_overrides();

    // Validate configuration
    config.validate().context("Invalid configuration")?;

    if let Some(directive) = refined_filter(cli.verbose, env_filter.is_some(), &config.log_level) {
        if let Err(e) = reload_handle.reload(EnvFilter::new(&directive)) {
            tracing::warn!("Failed to apply log_level {}: {}", directive, e);
        }
    }

    match cli.command.unwrap_or(Commands::Start) {
        Commands::Start => run(config).await?,
        Commands::Check => check(config)?,
    }

    Ok(())
}

/// Directive used when RUST_LOG is unset.
fn log_filter(verbose: bool, log_level: &str) -> String {
    if verbose {
        "debug".to_string()
    } else {
        log_level.to_lowercase()
    }
}

/// Directive to switch to once the config is loaded, if any.
///
/// RUST_LOG and `--verbose` win over the configured level.
fn refined_filter(verbose: bool, rust_log_set: bool, log_level: &str) -> Option<String> {
    if rust_log_set || verbose {
        return None;
    }
    let level = log_filter(false, log_level);
    (level != "info").then_some(level)
}

/// Serve until SIGTERM or SIGINT.
async fn run(config: Config) -> anyhow::Result<()> {
    tracing::info!("davgate starting...");

    let server = Arc::new(DavServer::new(config)?);

    let token = server.shutdown_token();
    let signals = tokio::spawn(async move {
        if let Err(e) = wait_for_shutdown_signal().await {
            tracing::error!("Failed to listen for shutdown signals: {}", e);
            return;
        }
        tracing::info!("Received shutdown signal");
        token.cancel();
    });

    let result = server.run().await;
    signals.abort();
    result.map(|_| ())
}

/// Print the users the configuration resolves to.
fn check(config: Config) -> anyhow::Result<()> {
    let server = DavServer::with_audit_sink(config, Arc::new(davgate_vfs::TracingAuditSink));
    let registry = server.registry();

    println!("Configuration OK");
    println!("Listen address: {}", server.config().listen_addr());

    let default = registry.default_identity();
    println!(
        "  {} (fallback): root={} modify={}",
        default.name(),
        default.root().display(),
        default.can_modify()
    );
    for identity in registry.identities() {
        println!(
            "  {}: root={} modify={}",
            identity.name(),
            identity.root().display(),
            identity.can_modify()
        );
    }
    Ok(())
}

/// Wait for a shutdown signal (SIGTERM or SIGINT).
#[cfg(unix)]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    use tokio::signal::unix::{signal, SignalKind};

    let mut sigterm = signal(SignalKind::terminate())?;
    let mut sigint = signal(SignalKind::interrupt())?;

    tokio::select! {
        _ = sigterm.recv() => {
            tracing::info!("Received SIGTERM");
        }
        _ = sigint.recv() => {
            tracing::info!("Received SIGINT");
        }
    }
    Ok(())
}

#[cfg(not(unix))]
async fn wait_for_shutdown_signal() -> std::io::Result<()> {
    tokio::signal::ctrl_c().await
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::CommandFactory;

    #[test]
    fn test_cli_debug_assert() {
        Cli::command().debug_assert();
    }

    #[test]
    fn test_default_command_is_none() {
        let cli = Cli::try_parse_from(["davgate"]).unwrap();
        assert_eq!(cli.command, None);
        assert!(!cli.verbose);
        assert!(cli.config.is_none());
    }

    #[test]
    fn test_start_command() {
        let cli = Cli::try_parse_from(["davgate", "start"]).unwrap();
        assert_eq!(cli.command, Some(Commands::Start));
    }

    #[test]
    fn test_check_with_config() {
        let cli = Cli::try_parse_from(["davgate", "check", "--config", "/etc/davgate/config.yaml"])
            .unwrap();
        assert_eq!(cli.command, Some(Commands::Check));
        assert_eq!(cli.config, Some(PathBuf::from("/etc/davgate/config.yaml")));
    }

    #[test]
    fn test_global_flags_before_subcommand() {
        let cli = Cli::try_parse_from(["davgate", "-v", "-c", "config.json", "start"]).unwrap();
        assert!(cli.verbose);
        assert_eq!(cli.config, Some(PathBuf::from("config.json")));
    }

    #[test]
    fn test_unknown_command() {
        assert!(Cli::try_parse_from(["davgate", "stop"]).is_err());
    }

    #[test]
    fn test_log_filter() {
        assert_eq!(log_filter(true, "warn"), "debug");
        assert_eq!(log_filter(false, "WARN"), "warn");
    }

    #[test]
    fn test_refined_filter_uses_configured_level() {
        assert_eq!(refined_filter(false, false, "WARN"), Some("warn".to_string()));
        assert_eq!(refined_filter(false, false, "trace"), Some("trace".to_string()));
        // already running at info
        assert_eq!(refined_filter(false, false, "info"), None);
    }

    #[test]
    fn test_refined_filter_respects_overrides() {
        assert_eq!(refined_filter(true, false, "error"), None);
        assert_eq!(refined_filter(false, true, "error"), None);
    }
}
