//! Media server error types.

use thiserror::Error;

/// Errors that can occur when talking to Emby/Jellyfin.
#[derive(Debug, Error)]
pub enum MediaServerError {
  #[error("HTTP request failed: {0}")]
  Http(#[from] reqwest::Error),

  #[error("HTTP error: {0}")]
  HttpError(String),

  #[error("No media server configured for this playback")]
  NotConfigured,
}
