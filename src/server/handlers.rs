//! Request handlers for the localhost API.
//!
//! Errors are returned as `{"error": "..."}` with a 400 for bad input and a
//! 500 when the player or the config file fails.

use std::collections::HashMap;

use axum::extract::{Query, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::{Form, Json};
use serde::{Deserialize, Deserializer};
use serde_json::{json, Value};
use thiserror::Error;

use super::AppState;
use crate::config::{AppConfig, ConfigError, DEFAULT_PLAYER};
use crate::mapping::{MappingKind, PathMapping};
use crate::player::{process, LaunchRequest, PlayerKind, ProcessError};
use crate::session::{Credentials, PlaylistItem, SessionStatus};

/// Highest mapping row index the settings form may use; rows can have gaps.
const MAX_FORM_MAPPINGS: usize = 100;

#[derive(Error, Debug)]
pub enum ApiError {
  #[error("{0}")]
  BadRequest(String),
  #[error("{0}")]
  Internal(String),
}

impl IntoResponse for ApiError {
  fn into_response(self) -> Response {
    let status = match self {
      ApiError::BadRequest(_) => StatusCode::BAD_REQUEST,
      ApiError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
    };
    (status, Json(json!({ "error": self.to_string() }))).into_response()
  }
}

impl From<ProcessError> for ApiError {
  fn from(err: ProcessError) -> Self {
    match err {
      ProcessError::NoFiles => ApiError::BadRequest(err.to_string()),
      _ => ApiError::Internal(format!("failed to start player: {}", err)),
    }
  }
}

impl From<ConfigError> for ApiError {
  fn from(err: ConfigError) -> Self {
    match err {
      ConfigError::Invalid(_) => ApiError::BadRequest(err.to_string()),
      _ => ApiError::Internal(format!("failed to save configuration: {}", err)),
    }
  }
}

fn is_truthy(value: Option<&str>) -> bool {
  matches!(value, Some("1") | Some("true") | Some("yes"))
}

/// Accept `true`, `1` or `"1"` alike, as the query-string form does.
fn truthy<'de, D>(deserializer: D) -> Result<bool, D::Error>
where
  D: Deserializer<'de>,
{
  Ok(match Value::deserialize(deserializer)? {
    Value::Bool(b) => b,
    Value::Number(n) => n.as_f64().is_some_and(|n| n != 0.0),
    Value::String(s) => is_truthy(Some(s.as_str())),
    _ => false,
  })
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlayParams {
  path: Option<String>,
  item_id: Option<String>,
  server_url: Option<String>,
  user_id: Option<String>,
  token: Option<String>,
  resume: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistBody {
  #[serde(default)]
  items: Vec<PlaylistItem>,
  #[serde(flatten)]
  credentials: Credentials,
  #[serde(default, deserialize_with = "truthy")]
  resume: bool,
}

#[derive(Debug, Default, Deserialize)]
pub struct DiscoverParams {
  status: Option<String>,
}

pub async fn root() -> Json<Value> {
  Json(json!({
    "name": env!("CARGO_PKG_NAME"),
    "version": env!("CARGO_PKG_VERSION"),
  }))
}

/// GET /api/play
pub async fn play(
  State(state): State<AppState>,
  Query(params): Query<PlayParams>,
) -> Result<Json<Value>, ApiError> {
  let path = params
    .path
    .filter(|p| !p.is_empty())
    .ok_or_else(|| ApiError::BadRequest("missing 'path' parameter".to_string()))?;

  let request = LaunchRequest {
    items: vec![PlaylistItem {
      path,
      item_id: params.item_id.unwrap_or_default(),
    }],
    credentials: Credentials {
      server_url: params.server_url.unwrap_or_default(),
      user_id: params.user_id.unwrap_or_default(),
      token: params.token.unwrap_or_default(),
    },
    resume: is_truthy(params.resume.as_deref()),
  };

  let launched = state.player.launch(request).await.map_err(|e| {
    log::error!("Error starting player: {}", e);
    ApiError::from(e)
  })?;

  Ok(Json(json!({
    "status": "playing",
    "path": launched.paths.first().cloned().unwrap_or_default(),
  })))
}

/// POST /api/playlist
pub async fn playlist(
  State(state): State<AppState>,
  Json(body): Json<PlaylistBody>,
) -> Result<Json<Value>, ApiError> {
  if body.items.is_empty() {
    return Err(ApiError::BadRequest("no items to play".to_string()));
  }
  if let Some(idx) = body.items.iter().position(|i| i.path.is_empty()) {
    return Err(ApiError::BadRequest(format!("item {} has no path", idx)));
  }

  let count = body.items.len();
  state
    .player
    .launch(LaunchRequest {
      items: body.items,
      credentials: body.credentials,
      resume: body.resume,
    })
    .await
    .map_err(|e| {
      log::error!("Error starting playlist: {}", e);
      ApiError::from(e)
    })?;

  Ok(Json(json!({ "status": "playing", "items": count })))
}

/// POST /api/stop. Succeeds whether or not anything was playing.
pub async fn stop(State(state): State<AppState>) -> Json<Value> {
  state.player.stop().await;
  Json(json!({ "status": "stopped" }))
}

pub async fn status(State(state): State<AppState>) -> Json<SessionStatus> {
  Json(state.player.status().await)
}

pub async fn get_config(State(state): State<AppState>) -> Json<AppConfig> {
  Json(state.config.get())
}

/// POST /api/config: replace the whole configuration.
pub async fn save_config(
  State(state): State<AppState>,
  Json(mut config): Json<AppConfig>,
) -> Result<Json<AppConfig>, ApiError> {
  config.normalize();
  state.config.replace(config)?;
  log::info!("Configuration saved to {}", state.config.path().display());
  Ok(Json(state.config.get()))
}

/// POST /config: the settings form.
pub async fn save_config_form(
  State(state): State<AppState>,
  Form(form): Form<HashMap<String, String>>,
) -> Result<Json<Value>, ApiError> {
  let field = |name: &str| form.get(name).map(String::as_str).unwrap_or("");

  let (player, executable) = state.config.read(|c| {
    let requested = field("player");
    let key = if c.players.contains_key(requested) {
      requested
    } else {
      DEFAULT_PLAYER
    };
    let executable = c
      .players
      .get(key)
      .map(|p| p.executable_path.clone())
      .filter(|p| !p.is_empty())
      .unwrap_or_else(|| key.to_string());
    (key.to_string(), executable)
  });

  if process::resolve_executable(&executable, PlayerKind::from_key(&player)).is_err() {
    return Err(ApiError::BadRequest(format!(
      "Player '{}' not found on PATH. Please install it or configure a custom path.",
      executable
    )));
  }

  let mappings: Vec<PathMapping> = (0..=MAX_FORM_MAPPINGS)
    .filter_map(|i| {
      let pattern = field(&format!("mapping_match_{}", i));
      if pattern.is_empty() {
        return None;
      }
      Some(PathMapping::new(
        MappingKind::from_name(field(&format!("mapping_type_{}", i))),
        pattern,
        field(&format!("mapping_replace_{}", i)),
      ))
    })
    .collect();
  let url_encode = field("url_encode") == "1";

  state.config.update(|c| {
    c.player = player;
    c.path_mappings = mappings;
    c.url_encode = url_encode;
  })?;
  log::info!("Configuration saved from settings form");

  Ok(Json(json!({ "status": "saved" })))
}

/// GET /api/discover
pub async fn discover(
  State(state): State<AppState>,
  Query(params): Query<DiscoverParams>,
) -> Json<Value> {
  if params.status.as_deref() == Some("1") {
    let status = if state.discovery.is_running() {
      "scanning"
    } else {
      "complete"
    };
    let urls = state.config.read(|c| c.server_urls.clone());
    return Json(json!({ "status": status, "servers": urls }));
  }

  match state.discovery.scan().await {
    Some(servers) => Json(json!({ "status": "complete", "servers": servers })),
    // A scan started elsewhere; report what the previous one found.
    None => Json(json!({
      "status": "scanning",
      "servers": state.discovery.last_results(),
    })),
  }
}

/// GET /api/discover/reset: forget server URLs and rediscover in the background.
pub async fn reset_discovery(State(state): State<AppState>) -> Result<Json<Value>, ApiError> {
  state.config.update(|c| {
    c.server_urls.clear();
    c.server_urls_set = false;
  })?;
  state.discovery.clear();

  let discovery = state.discovery.clone();
  let config = state.config.clone();
  tokio::spawn(async move {
    discovery.scan_and_configure(&config).await;
  });

  Ok(Json(json!({ "status": "reset" })))
}
