//! Background poll loop for an IPC-capable player.
//!
//! Every tick refreshes position, duration and pause state. For multi-item
//! invocations it also watches `playlist-pos` and hands progress reporting over
//! from one item to the next. The playlist index only moves forward. The loop
//! ends only when cancelled by the exit watcher.

use std::time::Duration;

use tokio_util::sync::CancellationToken;

use crate::mediaserver::ProgressReporter;
use crate::mpv::{self, PropertyValue};
use crate::session::{PlaybackSession, SessionHandle};

pub const POLL_INTERVAL: Duration = Duration::from_secs(1);

/// Values read from the player in one refresh. Missing fields were unavailable.
#[derive(Debug, Default, Clone, Copy)]
struct Observed {
  position: Option<f64>,
  duration: Option<f64>,
  paused: Option<bool>,
}

async fn observe(endpoint: &str) -> Observed {
  let position = match mpv::query_f64(endpoint, "time-pos").await {
    Ok(v) => v,
    Err(e) => {
      log::debug!("time-pos unavailable: {}", e);
      // Nothing else will answer either.
      return Observed::default();
    }
  };
  let duration = mpv::query_f64(endpoint, "duration").await.ok().flatten();
  let paused = mpv::query_property(endpoint, "pause")
    .await
    .ok()
    .as_ref()
    .and_then(PropertyValue::as_bool);

  Observed {
    position,
    duration,
    paused,
  }
}

/// Query the player and store what it reports. Returns false when the
/// session changed hands or the player did not answer.
pub async fn refresh_position(endpoint: &str, session: &SessionHandle, generation: u64) -> bool {
  store(session, generation, observe(endpoint).await)
}

fn store(session: &SessionHandle, generation: u64, observed: Observed) -> bool {
  if observed.position.is_none() && observed.duration.is_none() && observed.paused.is_none() {
    return false;
  }

  session
    .update_if(generation, |s| {
      if let Some(pos) = observed.position {
        s.position = pos;
      }
      if let Some(dur) = observed.duration {
        s.duration = dur;
      }
      if let Some(paused) = observed.paused {
        s.paused = paused;
      }
    })
    .is_some()
}

/// Poll loop bound to one player process.
pub struct Sequencer {
  pub generation: u64,
  pub endpoint: String,
  pub session: SessionHandle,
  pub reporter: ProgressReporter,
  pub interval: Duration,
}

impl Sequencer {
  /// Run until `cancel` fires.
  pub async fn run(self, cancel: CancellationToken) {
    let multi_item = self
      .session
      .update_if(self.generation, |s| s.playlist.len() > 1)
      .unwrap_or(false);
    let mut last_index = 0usize;

    log::debug!(
      "Sequencer started (generation {}, playlist: {})",
      self.generation,
      multi_item
    );

    loop {
      tokio::select! {
        _ = cancel.cancelled() => break,
        _ = tokio::time::sleep(self.interval) => {}
      }

      if !multi_item {
        refresh_position(&self.endpoint, &self.session, self.generation).await;
        continue;
      }

      let Some(index) = self.follow_playlist(&cancel, &mut last_index).await else {
        continue;
      };
      if cancel.is_cancelled() {
        break;
      }
      // The player is on an item other than the tracked one.
      if index != last_index {
        continue;
      }
      let observed = observe(&self.endpoint).await;
      // Values read across an item change may belong to the next item.
      if self.playlist_pos().await != Some(index) {
        log::debug!("playlist-pos moved during refresh, dropping sample");
        continue;
      }
      store(&self.session, self.generation, observed);
    }

    log::debug!("Sequencer stopped (generation {})", self.generation);
  }

  async fn playlist_pos(&self) -> Option<usize> {
    match mpv::query_f64(&self.endpoint, "playlist-pos").await {
      Ok(Some(pos)) if pos >= 0.0 => Some(pos as usize),
      Ok(_) => None,
      Err(e) => {
        log::debug!("playlist-pos unavailable: {}", e);
        None
      }
    }
  }

  /// Check `playlist-pos` and report the handoff if the player moved on.
  /// Returns the index the player reported.
  ///
  /// Runs before the position refresh so the finished item keeps its own duration.
  async fn follow_playlist(
    &self,
    cancel: &CancellationToken,
    last_index: &mut usize,
  ) -> Option<usize> {
    let index = self.playlist_pos().await?;

    // Exit handling owns the last report once cancellation started.
    if index == *last_index || cancel.is_cancelled() {
      return Some(index);
    }

    match self.transition(index) {
      Some((finished, started)) => {
        log::info!(
          "Playlist advanced {} -> {} (item {} -> {})",
          last_index,
          index,
          finished.item_id,
          started.item_id
        );
        self.reporter.report_stop(&finished).await;
        self.reporter.report_start(&started).await;
        *last_index = index;
      }
      None => log::debug!("Ignoring playlist-pos {} (current {})", index, last_index),
    }
    Some(index)
  }

  /// Move the session forward to `index`, returning the finished item's final
  /// state and the new item's initial state. `None` for an index that is out
  /// of range or not ahead of the current one, or a session that is no
  /// longer ours.
  fn transition(&self, index: usize) -> Option<(PlaybackSession, PlaybackSession)> {
    self
      .session
      .update_if(self.generation, |s| {
        if index >= s.playlist.len() || index <= s.playlist_index {
          return None;
        }
        let mut finished = s.clone();
        if finished.duration > 0.0 {
          finished.position = finished.duration;
        }
        s.advance_to(index);
        Some((finished, s.clone()))
      })
      .flatten()
  }
}
