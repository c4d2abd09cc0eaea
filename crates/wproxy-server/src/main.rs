//! # wproxy-server
//!
//! Binary entry point: load settings, start the listener, relay until
//! Ctrl-C.

#![deny(unsafe_code)]

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use tracing::info;
use wproxy_server::{WproxyServer, logging, metrics};
use wproxy_settings::ProxySettings;

/// WebSocket relay server.
#[derive(Parser, Debug)]
#[command(name = "wproxy-server", about = "WebSocket relay server")]
struct Cli {
    /// Settings file (defaults to `~/.wproxy/settings.json`).
    #[arg(long)]
    config: Option<PathBuf>,

    /// Host to bind (overrides settings).
    #[arg(long)]
    host: Option<String>,

    /// Port to bind, 0 for auto-assign (overrides settings).
    #[arg(long)]
    port: Option<u16>,

    /// Target WebSocket URL (overrides settings).
    #[arg(long)]
    target: Option<String>,

    /// Log level when `RUST_LOG` is unset (overrides settings).
    #[arg(long)]
    log_level: Option<String>,

    /// Log JSON lines.
    #[arg(long)]
    log_json: bool,
}

impl Cli {
    /// CLI flags win over file and environment.
    fn apply(&self, settings: &mut ProxySettings) {
        if let Some(host) = &self.host {
            settings.server.host.clone_from(host);
        }
        if let Some(port) = self.port {
            settings.server.port = port;
        }
        if let Some(target) = &self.target {
            settings.proxy.target_url.clone_from(target);
        }
        if let Some(level) = &self.log_level {
            settings.logging.level.clone_from(level);
        }
        if self.log_json {
            settings.logging.json = true;
        }
    }
}

fn load(cli: &Cli) -> Result<ProxySettings> {
    let mut settings = match &cli.config {
        Some(path) => wproxy_settings::load_settings_from_path(path)
            .with_context(|| format!("Failed to load settings from {}", path.display()))?,
        None => wproxy_settings::load_settings().context("Failed to load settings")?,
    };
    cli.apply(&mut settings);
    settings.validate().context("Invalid settings")?;
    Ok(settings)
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();
    let settings = load(&cli)?;
    logging::init_subscriber(&settings.logging.level, settings.logging.json);

    let prometheus = metrics::install_recorder().context("Failed to install metrics recorder")?;
    let server = WproxyServer::new(settings).with_metrics(prometheus);
    let (addr, handle) = server.listen().await.context("Failed to bind server")?;
    info!(%addr, "ready");

    tokio::signal::ctrl_c()
        .await
        .context("Failed to listen for Ctrl-C")?;
    info!("shutting down");
    server.shutdown().graceful_shutdown(vec![handle], None).await;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn cli_defaults_leave_settings_alone() {
        let cli = Cli::parse_from(["wproxy-server"]);
        let mut settings = ProxySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings, ProxySettings::default());
    }

    #[test]
    fn cli_overrides_settings() {
        let cli = Cli::parse_from([
            "wproxy-server",
            "--host",
            "127.0.0.1",
            "--port",
            "0",
            "--target",
            "wss://feed.example/ws",
            "--log-level",
            "debug",
            "--log-json",
        ]);
        let mut settings = ProxySettings::default();
        cli.apply(&mut settings);
        assert_eq!(settings.server.host, "127.0.0.1");
        assert_eq!(settings.server.port, 0);
        assert_eq!(settings.proxy.target_url, "wss://feed.example/ws");
        assert_eq!(settings.logging.level, "debug");
        assert!(settings.logging.json);
    }

    #[test]
    fn cli_config_path() {
        let cli = Cli::parse_from(["wproxy-server", "--config", "/tmp/wproxy.json"]);
        assert_eq!(cli.config, Some(PathBuf::from("/tmp/wproxy.json")));
    }

    #[test]
    fn cli_rejects_invalid_port() {
        assert!(Cli::try_parse_from(["wproxy-server", "--port", "70000"]).is_err());
    }

    #[test]
    fn load_rejects_invalid_target_flag() {
        let dir = std::env::temp_dir().join("wproxy-cli-test-missing.json");
        let cli = Cli::parse_from([
            "wproxy-server",
            "--config",
            dir.to_str().unwrap(),
            "--target",
            "http://not-a-websocket",
        ]);
        assert!(load(&cli).is_err());
    }
}
