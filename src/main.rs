//! embyfin-kiosk: plays Emby/Jellyfin items in a local external player.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use embyfin_kiosk::{build_state, config, server, start_background_discovery, ConfigStore};

#[derive(Parser, Debug)]
#[command(name = "embyfin-kiosk")]
#[command(about = "Local daemon that opens Emby/Jellyfin items in mpv or VLC")]
#[command(version)]
struct Args {
  /// Port to listen on (overrides the configured port for this run)
  #[arg(short, long)]
  port: Option<u16>,

  /// Configuration file
  #[arg(short, long)]
  config: Option<PathBuf>,

  /// Skip the startup server scan
  #[arg(long)]
  no_discovery: bool,

  /// Debug logging
  #[arg(short, long)]
  verbose: bool,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
  let args = Args::parse();

  let default_level = if args.verbose { "debug" } else { "info" };
  env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(default_level))
    .init();

  let config_path = match args.config {
    Some(path) => path,
    None => config::default_config_path()?,
  };
  let store = Arc::new(ConfigStore::open(&config_path)?);
  log::info!("Using config {}", store.path().display());

  let state = build_state(store.clone())?;
  if !args.no_discovery {
    start_background_discovery(&state);
  }

  let port = args.port.unwrap_or_else(|| store.read(|c| c.port));
  let addr = SocketAddr::from(([127, 0, 0, 1], port));
  let listener = tokio::net::TcpListener::bind(addr).await.map_err(|e| {
    log::error!("Failed to bind {}: {}", addr, e);
    e
  })?;

  tokio::select! {
    result = server::serve(listener, state) => result?,
    _ = shutdown_signal() => log::info!("Shutting down"),
  }
  Ok(())
}

async fn shutdown_signal() {
  if let Err(e) = tokio::signal::ctrl_c().await {
    log::warn!("Failed to install Ctrl+C handler: {}", e);
    std::future::pending::<()>().await;
  }
}
