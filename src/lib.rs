use std::sync::Arc;

pub mod config;
pub mod discovery;
pub mod mapping;
pub mod mediaserver;
pub mod mpv;
pub mod player;
pub mod sequencer;
pub mod server;
pub mod session;

pub use config::{AppConfig, ConfigStore};
use discovery::Discovery;
use mediaserver::{MediaServerClient, MediaServerError, ProgressReporter};
use player::PlayerManager;
pub use server::AppState;
use session::SessionHandle;

/// Wire up the shared state behind the HTTP API.
pub fn build_state(config: Arc<ConfigStore>) -> Result<AppState, MediaServerError> {
  let client = Arc::new(MediaServerClient::new()?);
  let reporter = ProgressReporter::new(client);
  let player = Arc::new(PlayerManager::new(
    SessionHandle::new(),
    config.clone(),
    reporter,
  ));

  Ok(AppState {
    config,
    player,
    discovery: Arc::new(Discovery::new()),
  })
}

/// Start the background scan that fills in server URLs, unless the user
/// configured them explicitly.
pub fn start_background_discovery(state: &AppState) {
  if state.config.read(|c| c.server_urls_set) {
    log::debug!("Server URLs set by user, skipping discovery");
    return;
  }

  let discovery = state.discovery.clone();
  let config = state.config.clone();
  tokio::spawn(async move {
    log::info!("Discovering media servers...");
    discovery.scan_and_configure(&config).await;
  });
}
