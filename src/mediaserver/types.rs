//! Emby/Jellyfin session-tracking wire types.
//!
//! Both servers accept the same PascalCase payloads on `/Sessions/Playing*`.

use serde::{Deserialize, Serialize};

/// Playback start info (sent when an item starts playing).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStartInfo {
  pub item_id: String,
  pub play_session_id: String,
  pub position_ticks: i64,
  pub is_paused: bool,
  pub can_seek: bool,
  pub play_method: String,
}

/// Playback stop info (sent when an item stops playing).
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct PlaybackStopInfo {
  pub item_id: String,
  pub play_session_id: String,
  pub position_ticks: i64,
}

/// Subset of `/Users/{userId}/Items/{itemId}` we care about.
#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserItem {
  #[serde(default)]
  pub user_data: Option<UserItemData>,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct UserItemData {
  #[serde(default)]
  pub playback_position_ticks: i64,
}

/// Ticks conversion helpers (1 tick = 100 nanoseconds).
pub const TICKS_PER_SECOND: i64 = 10_000_000;

/// Convert seconds to ticks.
pub fn seconds_to_ticks(seconds: f64) -> i64 {
  (seconds * TICKS_PER_SECOND as f64) as i64
}

/// Convert ticks to seconds.
pub fn ticks_to_seconds(ticks: i64) -> f64 {
  ticks as f64 / TICKS_PER_SECOND as f64
}

#[cfg(test)]
mod tests {
  use super::*;

  #[test]
  fn test_ticks_conversion() {
    assert_eq!(seconds_to_ticks(1.5), 15_000_000);
    assert_eq!(ticks_to_seconds(36_000_000_000), 3600.0);
  }

  #[test]
  fn test_stop_info_wire_names() {
    let info = PlaybackStopInfo {
      item_id: "abc".into(),
      play_session_id: "s1".into(),
      position_ticks: 10,
    };
    let json = serde_json::to_value(&info).unwrap();
    assert_eq!(json["ItemId"], "abc");
    assert_eq!(json["PlaySessionId"], "s1");
    assert_eq!(json["PositionTicks"], 10);
  }
}
