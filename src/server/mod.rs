//! Localhost HTTP API called by the page script.

mod handlers;

use std::sync::Arc;

use axum::routing::{get, post};
use axum::Router;
use tokio::net::TcpListener;
use tower_http::cors::CorsLayer;

pub use handlers::ApiError;

use crate::config::ConfigStore;
use crate::discovery::Discovery;
use crate::player::PlayerManager;

/// Shared state handed to every handler.
#[derive(Clone)]
pub struct AppState {
  pub config: Arc<ConfigStore>,
  pub player: Arc<PlayerManager>,
  pub discovery: Arc<Discovery>,
}

pub fn router(state: AppState) -> Router {
  Router::new()
    .route("/", get(handlers::root))
    .route("/api/play", get(handlers::play))
    .route("/api/playlist", post(handlers::playlist))
    .route("/api/stop", post(handlers::stop).get(handlers::stop))
    .route("/api/status", get(handlers::status))
    .route("/api/config", get(handlers::get_config).post(handlers::save_config))
    .route("/config", post(handlers::save_config_form))
    .route("/api/discover", get(handlers::discover))
    .route(
      "/api/discover/reset",
      get(handlers::reset_discovery).post(handlers::reset_discovery),
    )
    .layer(CorsLayer::permissive())
    .with_state(state)
}

/// Serve the API until the process exits.
pub async fn serve(listener: TcpListener, state: AppState) -> std::io::Result<()> {
  if let Ok(addr) = listener.local_addr() {
    log::info!("Listening on http://{}", addr);
  }
  axum::serve(listener, router(state)).await
}
