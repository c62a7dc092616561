//! Fire-and-forget progress reporting on top of [`MediaServerClient`].
//!
//! Nothing here returns an error: failures are logged and playback carries on.

use std::sync::Arc;

use super::client::MediaServerClient;
use super::types::*;
use crate::session::{Credentials, PlaybackSession};

/// Reporting needs a server and a token. No credentials at all is a normal
/// mode; a partial set is worth a warning.
fn can_report(creds: &Credentials) -> bool {
  if creds.can_report() {
    return true;
  }
  if creds.is_empty() {
    log::debug!("No media server credentials, skipping report");
  } else {
    log::warn!("Incomplete media server credentials, skipping report");
  }
  false
}

/// Announces playback start/stop for the session's active item.
#[derive(Clone)]
pub struct ProgressReporter {
  client: Arc<MediaServerClient>,
}

impl ProgressReporter {
  pub fn new(client: Arc<MediaServerClient>) -> Self {
    Self { client }
  }

  /// Post a "playback started" event for the session's active item.
  pub async fn report_start(&self, session: &PlaybackSession) {
    if !can_report(&session.credentials) {
      return;
    }

    let info = PlaybackStartInfo {
      item_id: session.item_id.clone(),
      play_session_id: session.play_session_id.clone(),
      position_ticks: seconds_to_ticks(session.position),
      is_paused: false,
      can_seek: true,
      play_method: "DirectPlay".to_string(),
    };

    log::info!("Reporting playback start: item={}", info.item_id);
    if let Err(e) = self
      .client
      .report_playback_start(&session.credentials, &info)
      .await
    {
      log::error!("Failed to report playback start: {}", e);
    }
  }

  /// Post a "playback stopped" event with the session's last known position.
  pub async fn report_stop(&self, session: &PlaybackSession) {
    if !can_report(&session.credentials) {
      return;
    }

    let info = PlaybackStopInfo {
      item_id: session.item_id.clone(),
      play_session_id: session.play_session_id.clone(),
      position_ticks: seconds_to_ticks(session.position),
    };

    log::info!(
      "Reporting playback stop: item={} position={:.1}s",
      info.item_id,
      session.position
    );
    if let Err(e) = self
      .client
      .report_playback_stop(&session.credentials, &info)
      .await
    {
      log::error!("Failed to report playback stop: {}", e);
    }
  }

  /// Dispatch `report_start` without waiting for it.
  pub fn spawn_start(&self, session: PlaybackSession) {
    let reporter = self.clone();
    tokio::spawn(async move {
      reporter.report_start(&session).await;
    });
  }

  /// Stored resume position in seconds, if the server has a positive one.
  pub async fn resume_position(&self, creds: &Credentials, item_id: &str) -> Option<f64> {
    if item_id.is_empty() || creds.user_id.is_empty() || !creds.can_report() {
      log::debug!("Resume requested without item/credentials, starting from 0");
      return None;
    }

    match self.client.get_resume_position(creds, item_id).await {
      Ok(pos) => {
        log::info!("Resume position for {}: {:?}", item_id, pos);
        pos
      }
      Err(e) => {
        log::warn!("Failed to fetch resume position for {}: {}", item_id, e);
        None
      }
    }
  }
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::session::{new_play_session_id, ProcessHandle};
  use wiremock::matchers::{method, path};
  use wiremock::{Mock, MockServer, ResponseTemplate};

  fn reporter() -> ProgressReporter {
    ProgressReporter::new(Arc::new(MediaServerClient::new().unwrap()))
  }

  fn session(server_url: String) -> PlaybackSession {
    PlaybackSession {
      process: Some(ProcessHandle::new(None)),
      item_id: "item1".into(),
      play_session_id: new_play_session_id(),
      credentials: Credentials {
        server_url,
        user_id: "u".into(),
        token: "t".into(),
      },
      position: 12.0,
      ..PlaybackSession::default()
    }
  }

  #[tokio::test]
  async fn test_stop_carries_position_in_ticks() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .and(path("/Sessions/Playing/Stopped"))
      .respond_with(ResponseTemplate::new(204))
      .expect(1)
      .mount(&server)
      .await;

    reporter().report_stop(&session(server.uri())).await;

    let requests = server.received_requests().await.unwrap();
    let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
    assert_eq!(body["ItemId"], "item1");
    assert_eq!(body["PositionTicks"], 120_000_000i64);
  }

  #[tokio::test]
  async fn test_server_error_is_swallowed() {
    let server = MockServer::start().await;
    Mock::given(method("POST"))
      .respond_with(ResponseTemplate::new(500))
      .mount(&server)
      .await;

    let r = reporter();
    let s = session(server.uri());
    r.report_start(&s).await;
    r.report_stop(&s).await;
    assert_eq!(server.received_requests().await.unwrap().len(), 2);
  }

  #[tokio::test]
  async fn test_no_credentials_skips_silently() {
    let server = MockServer::start().await;
    let mut s = session(server.uri());
    s.credentials = Credentials::default();

    let r = reporter();
    r.report_start(&s).await;
    r.report_stop(&s).await;
    assert!(r.resume_position(&s.credentials, "item1").await.is_none());
    assert!(server.received_requests().await.unwrap().is_empty());
  }
}
