use anyhow::Context;
use clap::Parser;
use log::info;
use std::path::PathBuf;
use std::sync::Arc;
use tokio::net::TcpListener;

use pc_remote_lib::config::Config;
use pc_remote_lib::mcp::{self, Gateway};
use pc_remote_lib::session::SessionRegistry;

/// Host-routed MCP gateway for remote control of this machine
#[derive(Debug, Parser)]
#[command(name = "pc-remote", version, about)]
struct Cli {
    /// Configuration file (defaults to <config_dir>/pc-remote/config.toml)
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Socket address to bind, overrides the configuration
    #[arg(short, long)]
    listen: Option<String>,

    /// Shared secret, overrides the configuration and PC_REMOTE_API_KEY
    #[arg(long)]
    api_key: Option<String>,

    /// Log filter used when RUST_LOG is unset
    #[arg(long, default_value = "info")]
    log_level: String,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(cli.log_level.as_str()))
        .init();

    let mut config = Config::load(cli.config.as_deref()).context("loading configuration")?;
    config.apply_env();
    if let Some(listen) = cli.listen {
        config.listen = listen;
    }
    if let Some(api_key) = cli.api_key {
        config.api_key = api_key;
    }

    let sessions = Arc::new(SessionRegistry::with_settings(config.sessions.clone()));
    let gateway = Gateway::from_config(&config, Arc::clone(&sessions)).context("invalid configuration")?;
    info!(
        "{} tenants configured, auth type {}",
        gateway.catalog().len(),
        gateway.auth_type()
    );

    let addr = config.listen_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .with_context(|| format!("binding {}", addr))?;

    let app = mcp::router(Arc::new(gateway), &config.mcp_path, config.max_body_bytes);
    mcp::serve(listener, app, shutdown_signal()).await?;

    let stopped = sessions.shutdown_all();
    if stopped > 0 {
        // Let the drain tasks signal their process groups before the runtime goes away
        tokio::time::sleep(config.sessions.terminate_grace()).await;
    }
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("Cannot listen for Ctrl+C: {}", e);
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut sigterm) => {
                sigterm.recv().await;
            }
            Err(e) => {
                log::error!("Cannot listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("Shutdown signal received");
}
