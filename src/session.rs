//! Shared record of the one external-player invocation currently in flight.
//!
//! Request handlers, the exit watcher and the sequencer all go through
//! [`SessionHandle`], which serializes access behind a single lock. The lock is
//! synchronous and never held across an `.await`, so IPC and HTTP calls always
//! happen on copies.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

static GENERATION: AtomicU64 = AtomicU64::new(1);

/// Media-server context captured from the browser session.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Credentials {
  #[serde(default)]
  pub server_url: String,
  #[serde(default)]
  pub user_id: String,
  #[serde(default)]
  pub token: String,
}

impl Credentials {
  /// No media-server integration configured for this playback.
  pub fn is_empty(&self) -> bool {
    self.server_url.is_empty() && self.user_id.is_empty() && self.token.is_empty()
  }

  /// Enough context to post session events.
  pub fn can_report(&self) -> bool {
    !self.server_url.is_empty() && !self.token.is_empty()
  }
}

/// One entry of a multi-item invocation.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PlaylistItem {
  pub path: String,
  #[serde(default)]
  pub item_id: String,
}

/// Ownership token for a spawned player process.
///
/// The process itself is owned by its exit watcher; this handle identifies it
/// and lets anyone request a forced termination.
#[derive(Debug, Clone)]
pub struct ProcessHandle {
  pub generation: u64,
  pub pid: Option<u32>,
  kill: CancellationToken,
}

impl ProcessHandle {
  pub fn new(pid: Option<u32>) -> Self {
    Self {
      generation: GENERATION.fetch_add(1, Ordering::SeqCst),
      pid,
      kill: CancellationToken::new(),
    }
  }

  /// Ask the watcher to kill the process.
  pub fn kill(&self) {
    self.kill.cancel();
  }

  pub(crate) fn kill_token(&self) -> CancellationToken {
    self.kill.clone()
  }
}

/// The playback session. `Default` is the empty, nothing-playing state.
#[derive(Debug, Clone, Default)]
pub struct PlaybackSession {
  pub process: Option<ProcessHandle>,
  /// Control channel address; empty when the player has no IPC.
  pub ipc_endpoint: String,
  pub item_id: String,
  /// Identifier of the current logical playback, regenerated per item.
  pub play_session_id: String,
  pub credentials: Credentials,
  pub position: f64,
  pub duration: f64,
  pub paused: bool,
  /// Items of this invocation in player order; a single entry for one file.
  pub playlist: Vec<PlaylistItem>,
  pub playlist_index: usize,
}

impl PlaybackSession {
  pub fn is_playing(&self) -> bool {
    self.process.is_some()
  }

  pub fn generation(&self) -> Option<u64> {
    self.process.as_ref().map(|p| p.generation)
  }

  /// Make `index` the active playlist entry, starting it from zero.
  pub fn advance_to(&mut self, index: usize) {
    if let Some(item) = self.playlist.get(index) {
      self.item_id = item.item_id.clone();
      self.playlist_index = index;
      self.play_session_id = new_play_session_id();
      self.position = 0.0;
      self.duration = 0.0;
      self.paused = false;
    }
  }

  pub fn status(&self) -> SessionStatus {
    if !self.is_playing() {
      return SessionStatus::default();
    }
    SessionStatus {
      playing: true,
      paused: self.paused,
      item_id: self.item_id.clone(),
      position: self.position,
      duration: self.duration,
    }
  }
}

/// Status as returned by `/api/status`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionStatus {
  pub playing: bool,
  pub paused: bool,
  pub item_id: String,
  pub position: f64,
  pub duration: f64,
}

pub fn new_play_session_id() -> String {
  uuid::Uuid::new_v4().simple().to_string()
}

/// Cloneable handle to the single shared session.
#[derive(Debug, Clone, Default)]
pub struct SessionHandle(Arc<RwLock<PlaybackSession>>);

impl SessionHandle {
  pub fn new() -> Self {
    Self::default()
  }

  pub fn snapshot(&self) -> PlaybackSession {
    self.0.read().clone()
  }

  pub fn status(&self) -> SessionStatus {
    self.0.read().status()
  }

  /// Currently tracked process and its IPC endpoint, if any.
  pub fn current_process(&self) -> Option<(ProcessHandle, String)> {
    let s = self.0.read();
    s.process.clone().map(|p| (p, s.ipc_endpoint.clone()))
  }

  /// Install a freshly launched session.
  pub fn begin(&self, session: PlaybackSession) {
    *self.0.write() = session;
  }

  /// Mutate the session only while `generation` is still the tracked process.
  pub fn update_if<T>(
    &self,
    generation: u64,
    f: impl FnOnce(&mut PlaybackSession) -> T,
  ) -> Option<T> {
    let mut s = self.0.write();
    if s.generation() != Some(generation) {
      return None;
    }
    Some(f(&mut *s))
  }

  /// Reset to the empty state if `generation` is still the tracked process.
  pub fn clear_if(&self, generation: u64) -> bool {
    self
      .update_if(generation, |s| *s = PlaybackSession::default())
      .is_some()
  }
}
