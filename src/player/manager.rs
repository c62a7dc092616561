//! Lifecycle of the one tracked player process.
//!
//! A launch spawns the player, installs a fresh [`PlaybackSession`] and starts
//! two background tasks: the exit watcher, which owns the child process, and
//! for IPC-capable players the [`Sequencer`]. The watcher alone posts the final
//! stop report and clears the session, so a stop request racing a natural exit
//! reports once.

use std::sync::Arc;
use std::time::Duration;

use parking_lot::Mutex;
use tokio::process::Child;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use super::process::*;
use crate::config::{AppConfig, ConfigStore, PlayerConfig};
use crate::mapping;
use crate::mediaserver::ProgressReporter;
use crate::mpv;
use crate::sequencer::{self, Sequencer, POLL_INTERVAL};
use crate::session::{
  new_play_session_id, Credentials, PlaybackSession, PlaylistItem, ProcessHandle, SessionHandle,
  SessionStatus,
};

/// Time an acknowledged `quit` gets before the process is killed.
pub const QUIT_GRACE: Duration = Duration::from_secs(3);
/// Upper bound on waiting for a previous session to wind down before a new launch.
pub const HANDOVER_TIMEOUT: Duration = Duration::from_secs(5);

/// A play or playlist request after parameter parsing.
#[derive(Debug, Clone, Default)]
pub struct LaunchRequest {
  pub items: Vec<PlaylistItem>,
  pub credentials: Credentials,
  pub resume: bool,
}

/// What a successful launch started.
#[derive(Debug, Clone)]
pub struct Launched {
  pub player: String,
  /// Translated paths in player order.
  pub paths: Vec<String>,
  pub start: Option<f64>,
}

/// Player selection and translated paths for one launch.
#[derive(Debug, Clone, PartialEq)]
pub struct LaunchPlan {
  pub player_key: String,
  pub player: PlayerConfig,
  pub kind: PlayerKind,
  pub paths: Vec<String>,
  pub url_encode: bool,
}

impl LaunchPlan {
  pub fn new(config: &AppConfig, items: &[PlaylistItem]) -> Self {
    let (player_key, player) = config.selected_player();
    let paths = items
      .iter()
      .map(|item| {
        let translated = mapping::translate(&item.path, &config.path_mappings);
        log::info!("Translated path: {} -> {}", item.path, translated);
        translated
      })
      .collect();

    Self {
      kind: PlayerKind::from_key(&player_key),
      player_key,
      player,
      paths,
      url_encode: config.url_encode,
    }
  }
}

type SequencerTask = (CancellationToken, JoinHandle<()>);

pub struct PlayerManager {
  session: SessionHandle,
  config: Arc<ConfigStore>,
  reporter: ProgressReporter,
  watcher: Mutex<Option<JoinHandle<()>>>,
  launching: tokio::sync::Mutex<()>,
  poll_interval: Duration,
}

impl PlayerManager {
  pub fn new(session: SessionHandle, config: Arc<ConfigStore>, reporter: ProgressReporter) -> Self {
    Self {
      session,
      config,
      reporter,
      watcher: Mutex::new(None),
      launching: tokio::sync::Mutex::new(()),
      poll_interval: POLL_INTERVAL,
    }
  }

  pub fn with_poll_interval(mut self, interval: Duration) -> Self {
    self.poll_interval = interval;
    self
  }

  pub fn session(&self) -> &SessionHandle {
    &self.session
  }

  /// Launch the configured player for `request.items`.
  ///
  /// Any tracked session is stopped first and its final report awaited.
  /// Returns once the new process exists.
  pub async fn launch(&self, request: LaunchRequest) -> Result<Launched, ProcessError> {
    if request.items.is_empty() {
      return Err(ProcessError::NoFiles);
    }
    let _guard = self.launching.lock().await;

    let plan = self.config.read(|c| LaunchPlan::new(c, &request.items));
    let first_item = request.items[0].item_id.clone();

    let start = if request.resume {
      self
        .reporter
        .resume_position(&request.credentials, &first_item)
        .await
    } else {
      None
    };

    self.stop_and_wait().await;

    let endpoint = if plan.kind.supports_ipc() {
      let endpoint = ipc_endpoint();
      cleanup_ipc(&endpoint);
      endpoint
    } else {
      String::new()
    };

    let executable = resolve_executable(&plan.player.executable_path, plan.kind)?;
    let args = build_args(
      &plan.player.base_args,
      plan.kind,
      (!endpoint.is_empty()).then_some(endpoint.as_str()),
      start,
      &plan.paths,
      plan.url_encode,
    );
    let child = spawn_player(&executable, &args)?;

    let process = ProcessHandle::new(child.id());
    log::info!(
      "Started {} (pid {:?}, {} item(s))",
      plan.player_key,
      process.pid,
      request.items.len()
    );

    let session = PlaybackSession {
      process: Some(process.clone()),
      ipc_endpoint: endpoint.clone(),
      item_id: first_item,
      play_session_id: new_play_session_id(),
      credentials: request.credentials,
      position: start.unwrap_or(0.0),
      playlist: request.items,
      ..PlaybackSession::default()
    };
    self.session.begin(session.clone());
    self.reporter.spawn_start(session);

    let sequencer = (!endpoint.is_empty()).then(|| {
      let cancel = CancellationToken::new();
      let task = tokio::spawn(
        Sequencer {
          generation: process.generation,
          endpoint: endpoint.clone(),
          session: self.session.clone(),
          reporter: self.reporter.clone(),
          interval: self.poll_interval,
        }
        .run(cancel.clone()),
      );
      (cancel, task)
    });

    let watcher = tokio::spawn(watch_process(
      child,
      process,
      endpoint,
      self.session.clone(),
      self.reporter.clone(),
      sequencer,
    ));
    *self.watcher.lock() = Some(watcher);

    Ok(Launched {
      player: plan.player_key,
      paths: plan.paths,
      start,
    })
  }

  /// Ask the tracked player to terminate. Returns false when nothing is playing.
  ///
  /// Gracefully quits over IPC when possible and kills otherwise. Cleanup and
  /// the final report happen in the exit watcher either way.
  pub async fn stop(&self) -> bool {
    let Some((process, endpoint)) = self.session.current_process() else {
      log::debug!("Stop requested with nothing playing");
      return false;
    };

    log::info!("Stopping player (pid {:?})", process.pid);

    if !endpoint.is_empty() {
      sequencer::refresh_position(&endpoint, &self.session, process.generation).await;
      match mpv::send_command(&endpoint, "quit").await {
        Ok(()) => {
          tokio::spawn(async move {
            tokio::time::sleep(QUIT_GRACE).await;
            process.kill();
          });
          return true;
        }
        Err(e) => log::debug!("IPC quit failed ({}), killing player", e),
      }
    }

    process.kill();
    true
  }

  /// Current status, refreshed from the player when it has IPC.
  pub async fn status(&self) -> SessionStatus {
    if let Some((process, endpoint)) = self.session.current_process() {
      if !endpoint.is_empty() {
        sequencer::refresh_position(&endpoint, &self.session, process.generation).await;
      }
    }
    self.session.status()
  }

  async fn stop_and_wait(&self) {
    let previous = self.watcher.lock().take();
    if self.stop().await {
      log::info!("Replacing the current playback session");
    }
    if let Some(task) = previous {
      if tokio::time::timeout(HANDOVER_TIMEOUT, task).await.is_err() {
        log::warn!("Previous player did not exit in time, launching anyway");
      }
    }
  }
}

/// Own `child` until it exits, then post the final report and clear the session.
async fn watch_process(
  mut child: Child,
  process: ProcessHandle,
  endpoint: String,
  session: SessionHandle,
  reporter: ProgressReporter,
  sequencer: Option<SequencerTask>,
) {
  let kill = process.kill_token();
  tokio::select! {
    status = child.wait() => match status {
      Ok(status) => log::info!("Player exited: {}", status),
      Err(e) => log::warn!("Failed to wait for player: {}", e),
    },
    _ = kill.cancelled() => {
      log::info!("Killing player (pid {:?})", process.pid);
      if let Err(e) = child.kill().await {
        log::warn!("Failed to kill player: {}", e);
      }
    }
  }

  if let Some((cancel, task)) = sequencer {
    cancel.cancel();
    let _ = task.await;
  }

  let generation = process.generation;
  if !endpoint.is_empty() {
    sequencer::refresh_position(&endpoint, &session, generation).await;
  }

  let Some(last) = session.update_if(generation, |s| s.clone()) else {
    log::debug!("Session {} already replaced, skipping final report", generation);
    return;
  };

  cleanup_ipc(&endpoint);
  reporter.report_stop(&last).await;
  session.clear_if(generation);
  log::info!("Playback session ended");
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::config::{default_player_config, DEFAULT_PLAYER};
  use crate::mapping::{MappingKind, PathMapping};
  use crate::mediaserver::MediaServerClient;

  fn item(path: &str, id: &str) -> PlaylistItem {
    PlaylistItem {
      path: path.to_string(),
      item_id: id.to_string(),
    }
  }

  #[test]
  fn test_unknown_player_falls_back_to_default() {
    let config = AppConfig {
      player: "winamp".to_string(),
      path_mappings: vec![PathMapping::new(MappingKind::Prefix, "/mnt/movies", r"\\server\Movies")],
      ..AppConfig::default()
    };
    let plan = LaunchPlan::new(&config, &[item("/mnt/movies/Foo/Foo.mkv", "1")]);
    assert_eq!(plan.player_key, DEFAULT_PLAYER);
    assert_eq!(plan.player, default_player_config());
    assert_eq!(plan.player.base_args, vec!["--fs".to_string()]);
    assert_eq!(plan.kind, PlayerKind::Mpv);
    assert_eq!(plan.paths, vec![r"\\server\Movies\Foo\Foo.mkv".to_string()]);
  }

  #[tokio::test]
  async fn test_stop_with_nothing_playing() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.json");
    let config = Arc::new(ConfigStore::with_config(path, AppConfig::default()));
    let reporter = ProgressReporter::new(Arc::new(MediaServerClient::new().unwrap()));
    let manager = PlayerManager::new(SessionHandle::new(), config, reporter);

    assert!(!manager.stop().await);
    assert!(!manager.status().await.playing);
  }

  #[tokio::test]
  async fn test_empty_launch_is_rejected() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("c.json");
    let config = Arc::new(ConfigStore::with_config(path, AppConfig::default()));
    let reporter = ProgressReporter::new(Arc::new(MediaServerClient::new().unwrap()));
    let manager = PlayerManager::new(SessionHandle::new(), config, reporter);

    let err = manager.launch(LaunchRequest::default()).await.unwrap_err();
    assert!(matches!(err, ProcessError::NoFiles));
    assert!(!manager.session().status().playing);
  }

  #[cfg(unix)]
  mod lifecycle {
    use super::*;
    use crate::mpv::ipc::testing::FakeMpv;
    use wiremock::matchers::{method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    /// Manager whose "player" is a coreutils binary taking the item path as its argument.
    fn manager(dir: &std::path::Path, executable: &str) -> PlayerManager {
      let mut config = AppConfig {
        player: "shell".to_string(),
        ..AppConfig::default()
      };
      config
        .players
        .insert("shell".to_string(), PlayerConfig::new("Shell", executable, &[]));
      let store = Arc::new(ConfigStore::with_config(dir.join("c.json"), config));
      let reporter = ProgressReporter::new(Arc::new(MediaServerClient::new().unwrap()));
      PlayerManager::new(SessionHandle::new(), store, reporter)
    }

    fn request(server: &MockServer, arg: &str) -> LaunchRequest {
      LaunchRequest {
        items: vec![item(arg, "item1")],
        credentials: Credentials {
          server_url: server.uri(),
          user_id: "u".into(),
          token: "t".into(),
        },
        resume: false,
      }
    }

    async fn mock_sessions(server: &MockServer) {
      Mock::given(method("POST"))
        .respond_with(ResponseTemplate::new(204))
        .mount(server)
        .await;
    }

    async fn wait_until_idle(manager: &PlayerManager) {
      for _ in 0..200 {
        if !manager.session().status().playing {
          return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
      }
      panic!("session never cleared");
    }

    async fn stop_reports(server: &MockServer) -> usize {
      server
        .received_requests()
        .await
        .unwrap()
        .iter()
        .filter(|r| r.url.path() == "/Sessions/Playing/Stopped")
        .count()
    }

    #[tokio::test]
    async fn test_natural_exit_reports_once_and_clears() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      mock_sessions(&server).await;
      let manager = manager(dir.path(), "sleep");

      let launched = manager.launch(request(&server, "0.2")).await.unwrap();
      assert_eq!(launched.player, "shell");
      assert_eq!(launched.paths, vec!["0.2".to_string()]);
      assert!(manager.session().status().playing);

      wait_until_idle(&manager).await;
      assert_eq!(stop_reports(&server).await, 1);
    }

    #[tokio::test]
    async fn test_stop_racing_exit_reports_once() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      mock_sessions(&server).await;
      let manager = manager(dir.path(), "sleep");

      manager.launch(request(&server, "30")).await.unwrap();
      let (a, b) = tokio::join!(manager.stop(), manager.stop());
      assert!(a && b);

      wait_until_idle(&manager).await;
      tokio::time::sleep(Duration::from_millis(100)).await;
      assert_eq!(stop_reports(&server).await, 1);
      assert!(!manager.stop().await);
    }

    #[tokio::test]
    async fn test_relaunch_stops_previous_session_first() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      mock_sessions(&server).await;
      let manager = manager(dir.path(), "sleep");

      manager.launch(request(&server, "30")).await.unwrap();
      let first = manager.session().snapshot().generation().unwrap();
      tokio::time::sleep(Duration::from_millis(50)).await;

      manager.launch(request(&server, "30")).await.unwrap();
      let second = manager.session().snapshot().generation().unwrap();
      assert_ne!(first, second);
      assert_eq!(stop_reports(&server).await, 1);

      manager.stop().await;
      wait_until_idle(&manager).await;
      assert_eq!(stop_reports(&server).await, 2);
    }

    /// An IPC session whose process is a real `sleep` and whose control
    /// channel is a fake mpv, wired up the way `launch` does it.
    #[tokio::test]
    async fn test_ipc_stop_after_playlist_advance() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      mock_sessions(&server).await;
      let fake = FakeMpv::default();
      fake.set("time-pos", serde_json::json!(1500.0));
      fake.set("duration", serde_json::json!(1800.0));
      fake.set("pause", serde_json::json!(false));
      fake.set("playlist-pos", serde_json::json!(0));
      let endpoint = fake.serve(dir.path());

      let manager = manager(dir.path(), "sleep");
      let executable = resolve_executable("sleep", PlayerKind::Generic).unwrap();
      let child = spawn_player(&executable, &["30".to_string()]).unwrap();
      let process = ProcessHandle::new(child.id());
      manager.session().begin(PlaybackSession {
        process: Some(process.clone()),
        ipc_endpoint: endpoint.clone(),
        item_id: "item0".into(),
        play_session_id: new_play_session_id(),
        credentials: request(&server, "x").credentials,
        playlist: vec![item("/m/0.mkv", "item0"), item("/m/1.mkv", "item1")],
        ..PlaybackSession::default()
      });

      let cancel = CancellationToken::new();
      let sequencer = tokio::spawn(
        Sequencer {
          generation: process.generation,
          endpoint: endpoint.clone(),
          session: manager.session().clone(),
          reporter: manager.reporter.clone(),
          interval: Duration::from_millis(20),
        }
        .run(cancel.clone()),
      );
      let watcher = tokio::spawn(watch_process(
        child,
        process,
        endpoint,
        manager.session().clone(),
        manager.reporter.clone(),
        Some((cancel, sequencer)),
      ));
      *manager.watcher.lock() = Some(watcher);

      tokio::time::sleep(Duration::from_millis(100)).await;
      fake.set("playlist-pos", serde_json::json!(1));
      for _ in 0..100 {
        if server.received_requests().await.unwrap().len() >= 2 {
          break;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
      }
      fake.set("time-pos", serde_json::json!(42.0));
      fake.set("duration", serde_json::json!(600.0));

      // The fake acknowledges quit but keeps running, so only the kill ends it.
      assert!(manager.stop().await);
      assert_eq!(fake.commands.lock().as_slice(), ["quit".to_string()]);
      tokio::time::sleep(Duration::from_millis(200)).await;
      assert!(manager.session().status().playing);

      wait_until_idle(&manager).await;
      tokio::time::sleep(Duration::from_millis(100)).await;

      let requests = server.received_requests().await.unwrap();
      let events: Vec<(String, serde_json::Value)> = requests
        .iter()
        .map(|r| {
          let body: serde_json::Value = serde_json::from_slice(&r.body).unwrap();
          (r.url.path().to_string(), body)
        })
        .collect();
      assert_eq!(events.len(), 3);

      assert_eq!(events[0].0, "/Sessions/Playing/Stopped");
      assert_eq!(events[0].1["ItemId"], "item0");
      assert_eq!(events[0].1["PositionTicks"], 18_000_000_000i64);

      assert_eq!(events[1].0, "/Sessions/Playing");
      assert_eq!(events[1].1["ItemId"], "item1");

      assert_eq!(events[2].0, "/Sessions/Playing/Stopped");
      assert_eq!(events[2].1["ItemId"], "item1");
      assert_eq!(events[2].1["PositionTicks"], 420_000_000i64);
    }

    #[tokio::test]
    async fn test_missing_executable_creates_no_session() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      let missing = dir.path().join("no-such-player");
      let manager = manager(dir.path(), missing.to_str().unwrap());

      let err = manager.launch(request(&server, "x")).await.unwrap_err();
      assert!(matches!(err, ProcessError::NotFound(_)));
      assert!(!manager.session().status().playing);
      assert!(server.received_requests().await.unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_resume_position_used_as_start() {
      let dir = tempfile::tempdir().unwrap();
      let server = MockServer::start().await;
      mock_sessions(&server).await;
      Mock::given(method("GET"))
        .and(path("/Users/u/Items/item1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(serde_json::json!({
          "UserData": { "PlaybackPositionTicks": 600_000_000i64 }
        })))
        .mount(&server)
        .await;
      let manager = manager(dir.path(), "sleep");

      let mut req = request(&server, "30");
      req.resume = true;
      let launched = manager.launch(req).await.unwrap();
      assert_eq!(launched.start, Some(60.0));
      assert_eq!(manager.session().status().position, 60.0);

      manager.stop().await;
      wait_until_idle(&manager).await;
    }
  }
}
