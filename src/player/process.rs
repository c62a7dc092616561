//! Player detection, argument building and spawning.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use thiserror::Error;
use tokio::process::{Child, Command};

#[derive(Error, Debug)]
pub enum ProcessError {
  #[error("Player executable not found: {0}")]
  NotFound(String),
  #[error("Failed to spawn player: {0}")]
  SpawnFailed(#[from] std::io::Error),
  #[error("No files to play")]
  NoFiles,
}

#[cfg(windows)]
const CREATE_NO_WINDOW: u32 = 0x0800_0000;

/// Characters left alone when percent-encoding a path.
const PATH_ENCODE_SET: &AsciiSet = &NON_ALPHANUMERIC
  .remove(b'-')
  .remove(b'.')
  .remove(b'_')
  .remove(b'~');

/// Command-line dialect of the configured player.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayerKind {
  /// JSON IPC and `--start=`.
  Mpv,
  /// `--start-time=`, no IPC.
  Vlc,
  /// Paths only.
  Generic,
}

impl PlayerKind {
  pub fn from_key(key: &str) -> Self {
    match key.to_ascii_lowercase().as_str() {
      "mpv" => PlayerKind::Mpv,
      "vlc" => PlayerKind::Vlc,
      _ => PlayerKind::Generic,
    }
  }

  pub fn supports_ipc(self) -> bool {
    self == PlayerKind::Mpv
  }

  fn start_arg(self, seconds: f64) -> Option<String> {
    match self {
      PlayerKind::Mpv => Some(format!("--start={}", seconds)),
      PlayerKind::Vlc => Some(format!("--start-time={}", seconds)),
      PlayerKind::Generic => None,
    }
  }
}

/// Get the IPC socket/pipe path for the player.
pub fn ipc_endpoint() -> String {
  #[cfg(windows)]
  {
    r"\\.\pipe\embyfin-kiosk-mpv".to_string()
  }
  #[cfg(not(windows))]
  {
    std::env::temp_dir()
      .join("embyfin-kiosk-mpv.sock")
      .to_string_lossy()
      .into_owned()
  }
}

/// Remove a stale socket left behind by a previous player.
pub fn cleanup_ipc(endpoint: &str) {
  #[cfg(not(windows))]
  {
    if !endpoint.is_empty() {
      let _ = std::fs::remove_file(endpoint);
    }
  }
  #[cfg(windows)]
  {
    // Named pipes go away with their server.
    let _ = endpoint;
  }
}

/// Find MPV executable in common locations.
pub fn find_mpv() -> Option<PathBuf> {
  if let Ok(path) = which::which("mpv") {
    return Some(path);
  }

  #[cfg(windows)]
  let common_paths: &[&str] = &[
    r"C:\Program Files\mpv\mpv.exe",
    r"C:\Program Files (x86)\mpv\mpv.exe",
    r"C:\mpv\mpv.exe",
  ];
  #[cfg(target_os = "macos")]
  let common_paths: &[&str] = &[
    "/usr/local/bin/mpv",
    "/opt/homebrew/bin/mpv",
    "/Applications/mpv.app/Contents/MacOS/mpv",
  ];
  #[cfg(not(any(windows, target_os = "macos")))]
  let common_paths: &[&str] = &["/usr/bin/mpv", "/usr/local/bin/mpv"];

  common_paths
    .iter()
    .map(PathBuf::from)
    .find(|p| p.exists())
}

/// Resolve a configured executable to something spawnable.
///
/// Explicit paths must exist; bare names are looked up on `PATH`. MPV also
/// gets the usual install locations checked.
pub fn resolve_executable(executable: &str, kind: PlayerKind) -> Result<PathBuf, ProcessError> {
  let configured = Path::new(executable);
  if configured.components().count() > 1 || configured.is_absolute() {
    if configured.exists() {
      return Ok(configured.to_path_buf());
    }
  } else if let Ok(path) = which::which(executable) {
    return Ok(path);
  }

  if kind == PlayerKind::Mpv {
    if let Some(path) = find_mpv() {
      return Ok(path);
    }
  }

  Err(ProcessError::NotFound(executable.to_string()))
}

pub fn encode_path(path: &str) -> String {
  utf8_percent_encode(path, PATH_ENCODE_SET).to_string()
}

/// Full argument list: base args, IPC, start offset, then the files.
///
/// With several files, MPV gets the offset scoped to the first one through a
/// per-file option block so later entries start from zero.
pub fn build_args(
  base_args: &[String],
  kind: PlayerKind,
  ipc_endpoint: Option<&str>,
  start: Option<f64>,
  paths: &[String],
  url_encode: bool,
) -> Vec<String> {
  let mut args: Vec<String> = base_args.to_vec();

  if let (PlayerKind::Mpv, Some(endpoint)) = (kind, ipc_endpoint) {
    args.push(format!("--input-ipc-server={}", endpoint));
  }

  let files: Vec<String> = paths
    .iter()
    .map(|p| if url_encode { encode_path(p) } else { p.clone() })
    .collect();

  let start_arg = start.filter(|s| *s > 0.0).and_then(|s| kind.start_arg(s));

  match start_arg {
    Some(arg) if kind == PlayerKind::Mpv && files.len() > 1 => {
      args.push("--{".to_string());
      args.push(arg);
      args.push(files[0].clone());
      args.push("--}".to_string());
      args.extend(files.into_iter().skip(1));
    }
    Some(arg) => {
      args.push(arg);
      args.extend(files);
    }
    None => args.extend(files),
  }

  args
}

/// Spawn the player detached from our stdio. Returns once the process exists.
pub fn spawn_player(executable: &Path, args: &[String]) -> Result<Child, ProcessError> {
  log::info!("Spawning player: {:?} {}", executable, args.join(" "));

  let mut cmd = Command::new(executable);
  cmd
    .args(args)
    .stdin(Stdio::null())
    .stdout(Stdio::null())
    .stderr(Stdio::null());

  // No console window next to the player's own.
  #[cfg(windows)]
  cmd.creation_flags(CREATE_NO_WINDOW);

  let child = cmd.spawn()?;

  Ok(child)
}
