//! Emby/Jellyfin HTTP client for session-tracking calls.
//!
//! The daemon never logs in itself; every call carries the credentials the
//! browser page handed over with the play request.

use std::time::Duration;

use reqwest::{header, Client};
use uuid::Uuid;

use super::error::MediaServerError;
use super::types::*;
use crate::session::Credentials;

/// Device info for client identification.
const DEVICE_NAME: &str = "Embyfin Kiosk";
const DEVICE_ID_PREFIX: &str = "embyfin-kiosk-";
const CLIENT_NAME: &str = "Embyfin Kiosk";
const CLIENT_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Timeout for every media-server request.
pub const HTTP_TIMEOUT: Duration = Duration::from_secs(10);

/// Emby/Jellyfin HTTP API client.
pub struct MediaServerClient {
  http: Client,
  device_id: String,
}

impl MediaServerClient {
  /// Create a new client.
  pub fn new() -> Result<Self, MediaServerError> {
    Ok(Self {
      http: Client::builder().timeout(HTTP_TIMEOUT).build()?,
      device_id: format!("{}{}", DEVICE_ID_PREFIX, Uuid::new_v4()),
    })
  }

  /// Build authorization header value.
  fn auth_header(&self, token: &str) -> String {
    format!(
      r#"MediaBrowser Client="{}", Device="{}", DeviceId="{}", Version="{}", Token="{}""#,
      CLIENT_NAME, DEVICE_NAME, self.device_id, CLIENT_VERSION, token
    )
  }

  fn url(creds: &Credentials, path: &str) -> Result<String, MediaServerError> {
    if !creds.can_report() {
      return Err(MediaServerError::NotConfigured);
    }
    Ok(format!("{}{}", creds.server_url.trim_end_matches('/'), path))
  }

  /// Make an authenticated GET request.
  async fn get<T: serde::de::DeserializeOwned>(
    &self,
    creds: &Credentials,
    path: &str,
  ) -> Result<T, MediaServerError> {
    let url = Self::url(creds, path)?;

    let response = self
      .http
      .get(&url)
      .header("X-Emby-Authorization", self.auth_header(&creds.token))
      .header("X-Emby-Token", &creds.token)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      return Err(MediaServerError::HttpError(format!("GET {} -> HTTP {}", path, status)));
    }

    Ok(response.json().await?)
  }

  /// Make an authenticated POST request without expecting a response body.
  async fn post_empty<B: serde::Serialize + std::fmt::Debug>(
    &self,
    creds: &Credentials,
    path: &str,
    body: &B,
  ) -> Result<(), MediaServerError> {
    let url = Self::url(creds, path)?;

    log::debug!("POST {} with body: {:?}", path, body);

    let response = self
      .http
      .post(&url)
      .header(header::CONTENT_TYPE, "application/json")
      .header("X-Emby-Authorization", self.auth_header(&creds.token))
      .header("X-Emby-Token", &creds.token)
      .json(body)
      .send()
      .await?;

    let status = response.status();
    if !status.is_success() {
      let body = response.text().await.unwrap_or_default();
      return Err(MediaServerError::HttpError(format!(
        "POST {} -> HTTP {} - {}",
        path, status, body
      )));
    }

    Ok(())
  }

  /// Report playback started.
  pub async fn report_playback_start(
    &self,
    creds: &Credentials,
    info: &PlaybackStartInfo,
  ) -> Result<(), MediaServerError> {
    self.post_empty(creds, "/Sessions/Playing", info).await
  }

  /// Report playback stopped.
  pub async fn report_playback_stop(
    &self,
    creds: &Credentials,
    info: &PlaybackStopInfo,
  ) -> Result<(), MediaServerError> {
    self.post_empty(creds, "/Sessions/Playing/Stopped", info).await
  }

  /// Stored resume position for `item_id`, in seconds. `None` when there is none.
  pub async fn get_resume_position(
    &self,
    creds: &Credentials,
    item_id: &str,
  ) -> Result<Option<f64>, MediaServerError> {
    if creds.user_id.is_empty() {
      return Err(MediaServerError::NotConfigured);
    }

    let item: UserItem = self
      .get(creds, &format!("/Users/{}/Items/{}", creds.user_id, item_id))
      .await?;

    let ticks = item
      .user_data
      .map(|d| d.playback_position_ticks)
      .unwrap_or(0);
    Ok((ticks > 0).then(|| ticks_to_seconds(ticks)))
  }
}
