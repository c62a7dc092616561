//! Application configuration with persistence.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::mapping::PathMapping;

const APP_DIR_NAME: &str = "embyfin-kiosk";
const CONFIG_FILE_NAME: &str = "config.json";

/// Player used when the configured selection is unknown.
pub const DEFAULT_PLAYER: &str = "mpv";

#[derive(Error, Debug)]
pub enum ConfigError {
  #[error("Config I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("Config JSON invalid: {0}")]
  Json(#[from] serde_json::Error),
  #[error("Invalid configuration: {0}")]
  Invalid(String),
  #[error("Could not determine a configuration directory")]
  NoConfigDir,
}

/// External player definition.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PlayerConfig {
  /// Human readable name.
  #[serde(rename = "name", default)]
  pub display_name: String,
  /// Executable name or absolute path.
  #[serde(rename = "path", default)]
  pub executable_path: String,
  /// Arguments placed before everything the daemon adds.
  #[serde(rename = "args", default)]
  pub base_args: Vec<String>,
}

impl PlayerConfig {
  pub fn new(display_name: &str, executable_path: &str, base_args: &[&str]) -> Self {
    Self {
      display_name: display_name.to_string(),
      executable_path: executable_path.to_string(),
      base_args: base_args.iter().map(|s| s.to_string()).collect(),
    }
  }
}

/// Application configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppConfig {
  /// Port the daemon listens on (localhost only).
  #[serde(default = "default_port")]
  pub port: u16,

  /// Key into `players` of the selected player.
  #[serde(default = "default_player")]
  pub player: String,

  /// Known players keyed by identifier ("mpv", "vlc", ...).
  #[serde(default = "default_players")]
  pub players: BTreeMap<String, PlayerConfig>,

  /// Ordered path rewrite rules; first match wins.
  #[serde(default)]
  pub path_mappings: Vec<PathMapping>,

  /// Percent-encode translated paths before handing them to the player.
  #[serde(default)]
  pub url_encode: bool,

  /// Media server URL patterns (discovered or user supplied).
  #[serde(default)]
  pub server_urls: Vec<String>,

  /// True once the user has set `server_urls` explicitly.
  #[serde(default)]
  pub server_urls_set: bool,
}

fn default_port() -> u16 {
  9998
}

fn default_player() -> String {
  DEFAULT_PLAYER.to_string()
}

fn default_players() -> BTreeMap<String, PlayerConfig> {
  let mut players = BTreeMap::new();
  players.insert("mpv".to_string(), default_player_config());
  players.insert(
    "vlc".to_string(),
    PlayerConfig::new("VLC", "vlc", &["--fullscreen"]),
  );
  players
}

/// Hard-coded fallback used when the selected player key is unknown.
pub fn default_player_config() -> PlayerConfig {
  PlayerConfig::new("mpv", "mpv", &["--fs"])
}

impl Default for AppConfig {
  fn default() -> Self {
    Self {
      port: default_port(),
      player: default_player(),
      players: default_players(),
      path_mappings: Vec::new(),
      url_encode: false,
      server_urls: Vec::new(),
      server_urls_set: false,
    }
  }
}

impl AppConfig {
  /// Validate configuration values.
  pub fn validate(&self) -> Result<(), ConfigError> {
    if self.port == 0 {
      return Err(ConfigError::Invalid("Port cannot be 0".to_string()));
    }
    if self.player.trim().is_empty() {
      return Err(ConfigError::Invalid("Player selection cannot be empty".to_string()));
    }
    if let Some(idx) = self.path_mappings.iter().position(|m| m.pattern.is_empty()) {
      return Err(ConfigError::Invalid(format!(
        "Path mapping {} has an empty match pattern",
        idx + 1
      )));
    }
    Ok(())
  }

  /// Repair values that would otherwise break playback, logging what changed.
  pub fn normalize(&mut self) {
    if self.port == 0 {
      log::warn!("Configured port 0 is invalid, using {}", default_port());
      self.port = default_port();
    }
    if self.player.trim().is_empty() {
      self.player = default_player();
    }
    if self.players.is_empty() {
      self.players = default_players();
    }
    let before = self.path_mappings.len();
    self.path_mappings.retain(|m| !m.pattern.is_empty());
    if self.path_mappings.len() != before {
      log::warn!(
        "Dropped {} path mapping(s) with an empty match pattern",
        before - self.path_mappings.len()
      );
    }
  }

  /// Selected player key and definition, falling back to the default player.
  pub fn selected_player(&self) -> (String, PlayerConfig) {
    match self.players.get(&self.player) {
      Some(player) => (self.player.clone(), player.clone()),
      None => {
        log::warn!("Unknown player {:?}, falling back to {}", self.player, DEFAULT_PLAYER);
        (DEFAULT_PLAYER.to_string(), default_player_config())
      }
    }
  }

  /// Parse a config document. Missing fields take their defaults.
  pub fn from_json(data: &str) -> Result<Self, ConfigError> {
    let mut config: AppConfig = serde_json::from_str(data)?;
    config.normalize();
    Ok(config)
  }

  pub fn to_json(&self) -> Result<String, ConfigError> {
    Ok(serde_json::to_string_pretty(self)?)
  }
}

/// Default config file location inside the platform config directory.
pub fn default_config_path() -> Result<PathBuf, ConfigError> {
  let dir = dirs::config_dir().ok_or(ConfigError::NoConfigDir)?;
  Ok(dir.join(APP_DIR_NAME).join(CONFIG_FILE_NAME))
}

/// Live configuration shared between request handlers, plus its file location.
pub struct ConfigStore {
  path: PathBuf,
  config: RwLock<AppConfig>,
}

impl ConfigStore {
  /// Open the config at `path`, creating its directory and a default file if needed.
  ///
  /// Only directory creation is fatal. Unreadable or malformed files fall back
  /// to defaults with a warning.
  pub fn open(path: impl Into<PathBuf>) -> Result<Self, ConfigError> {
    let path = path.into();
    if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
      std::fs::create_dir_all(dir)?;
    }

    let config = if path.exists() {
      load_or_default(&path)
    } else {
      log::info!("No config at {}, writing defaults", path.display());
      let config = AppConfig::default();
      if let Err(e) = write_config(&path, &config) {
        log::warn!("Failed to write default config: {}", e);
      }
      config
    };

    Ok(Self {
      path,
      config: RwLock::new(config),
    })
  }

  /// In-memory store that never touched disk yet.
  pub fn with_config(path: impl Into<PathBuf>, config: AppConfig) -> Self {
    Self {
      path: path.into(),
      config: RwLock::new(config),
    }
  }

  pub fn path(&self) -> &Path {
    &self.path
  }

  /// Snapshot of the current configuration.
  pub fn get(&self) -> AppConfig {
    self.config.read().clone()
  }

  /// Run `f` against the current configuration under the read lock.
  pub fn read<T>(&self, f: impl FnOnce(&AppConfig) -> T) -> T {
    f(&self.config.read())
  }

  /// Replace the configuration wholesale and persist it.
  pub fn replace(&self, config: AppConfig) -> Result<(), ConfigError> {
    config.validate()?;
    let mut guard = self.config.write();
    write_config(&self.path, &config)?;
    *guard = config;
    Ok(())
  }

  /// Mutate the configuration and persist the result.
  pub fn update<T>(&self, f: impl FnOnce(&mut AppConfig) -> T) -> Result<T, ConfigError> {
    let mut guard = self.config.write();
    let mut next = guard.clone();
    let out = f(&mut next);
    next.validate()?;
    write_config(&self.path, &next)?;
    *guard = next;
    Ok(out)
  }
}

fn load_or_default(path: &Path) -> AppConfig {
  let data = match std::fs::read_to_string(path) {
    Ok(data) => data,
    Err(e) => {
      log::warn!("Failed to read config {}: {}, using defaults", path.display(), e);
      return AppConfig::default();
    }
  };

  match AppConfig::from_json(&data) {
    Ok(config) => {
      log::info!("Loaded config from {}", path.display());
      config
    }
    Err(e) => {
      log::warn!("Failed to parse config {}: {}, using defaults", path.display(), e);
      AppConfig::default()
    }
  }
}

fn write_config(path: &Path, config: &AppConfig) -> Result<(), ConfigError> {
  std::fs::write(path, config.to_json()?)?;
  Ok(())
}

#[cfg(test)]
mod tests {
  use super::*;
  use crate::mapping::MappingKind;

  fn sample() -> AppConfig {
    AppConfig {
      port: 9999,
      player: "vlc".to_string(),
      path_mappings: vec![
        PathMapping::new(MappingKind::Prefix, "/mnt/movies", r"\\server\Movies"),
        PathMapping::new(MappingKind::Wildcard, "nfs://*/media", r"\\nas\media"),
        PathMapping::new(MappingKind::Regex, r"^/tv/(.*)", r"T:\$1"),
      ],
      url_encode: true,
      server_urls: vec!["http://jf:8096/*".to_string()],
      server_urls_set: true,
      ..AppConfig::default()
    }
  }

  #[test]
  fn test_missing_fields_take_defaults() {
    let config = AppConfig::from_json(r#"{"player":"vlc"}"#).unwrap();
    assert_eq!(config.port, 9998);
    assert_eq!(config.player, "vlc");
    assert!(config.players.contains_key("mpv"));
    assert!(config.path_mappings.is_empty());
    assert!(!config.server_urls_set);
  }

  #[test]
  fn test_save_reload_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");

    let store = ConfigStore::with_config(&path, AppConfig::default());
    store.replace(sample()).unwrap();
    let first = std::fs::read_to_string(&path).unwrap();

    let reopened = ConfigStore::open(&path).unwrap();
    assert_eq!(reopened.get(), sample());
    reopened.replace(reopened.get()).unwrap();
    assert_eq!(std::fs::read_to_string(&path).unwrap(), first);
  }

  #[test]
  fn test_open_writes_defaults_in_new_directory() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("nested").join("config.json");

    let store = ConfigStore::open(&path).unwrap();
    assert_eq!(store.get(), AppConfig::default());
    assert!(path.exists());
  }

  #[test]
  fn test_malformed_file_falls_back_to_defaults() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("config.json");
    std::fs::write(&path, "{ not json").unwrap();

    let store = ConfigStore::open(&path).unwrap();
    assert_eq!(store.get(), AppConfig::default());
    // The broken file stays until the next save.
    assert_eq!(std::fs::read_to_string(&path).unwrap(), "{ not json");
  }

  #[test]
  fn test_empty_patterns_dropped_on_load() {
    let config = AppConfig::from_json(
      concat!(
        r#"{"path_mappings":[{"type":"prefix","match":"","replace":""},"#,
        r#"{"type":"prefix","match":"/a","replace":"B:"}]}"#,
      ),
    )
    .unwrap();
    assert_eq!(config.path_mappings.len(), 1);
    assert_eq!(config.path_mappings[0].pattern, "/a");
  }

  #[test]
  fn test_unknown_player_falls_back() {
    let config = AppConfig {
      player: "winamp".to_string(),
      ..AppConfig::default()
    };
    let (key, player) = config.selected_player();
    assert_eq!(key, DEFAULT_PLAYER);
    assert_eq!(player, default_player_config());
  }

  #[test]
  fn test_replace_rejects_invalid() {
    let dir = tempfile::tempdir().unwrap();
    let store = ConfigStore::with_config(dir.path().join("c.json"), AppConfig::default());
    let mut bad = AppConfig::default();
    bad.path_mappings.push(PathMapping::new(MappingKind::Prefix, "", "X:"));
    assert!(matches!(store.replace(bad), Err(ConfigError::Invalid(_))));
    assert_eq!(store.get(), AppConfig::default());
  }
}
