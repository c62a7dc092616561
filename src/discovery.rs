//! Emby/Jellyfin server discovery over UDP broadcast.
//!
//! Both servers answer a well-known query on port 7359 with a small JSON
//! document. Results are a best-effort cache; the configuration holds the
//! authoritative server URL list.

use std::collections::HashSet;
use std::net::{IpAddr, Ipv4Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tokio::net::UdpSocket;
use tokio::time::Instant;

use crate::config::{AppConfig, ConfigStore};

pub const DISCOVERY_PORT: u16 = 7359;
pub const SCAN_TIMEOUT: Duration = Duration::from_secs(3);

const QUERIES: [(&str, &str); 2] = [
  ("Who is JellyfinServer?", "jellyfin"),
  ("who is EmbyServer?", "emby"),
];

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DiscoveredServer {
  pub name: String,
  /// IP the reply came from.
  pub address: String,
  /// URL pattern, `<server url>/*`.
  pub url: String,
  /// "jellyfin" or "emby".
  pub platform: String,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "PascalCase")]
struct DiscoveryReply {
  #[serde(default)]
  name: String,
  #[serde(default)]
  address: String,
  #[serde(default)]
  local_address: String,
}

/// Turn one reply datagram into a server entry. Non-JSON replies are ignored.
fn parse_reply(data: &[u8], from: IpAddr, platform: &str) -> Option<DiscoveredServer> {
  let reply: DiscoveryReply = serde_json::from_slice(data).ok()?;
  let base = if !reply.local_address.is_empty() {
    reply.local_address
  } else if !reply.address.is_empty() {
    reply.address
  } else {
    format!("http://{}:8096", from)
  };

  Some(DiscoveredServer {
    name: reply.name,
    address: from.to_string(),
    url: format!("{}/*", base),
    platform: platform.to_string(),
  })
}

/// Global broadcast plus the directed broadcast of every IPv4 interface.
pub fn broadcast_addresses() -> Vec<Ipv4Addr> {
  let mut addrs = vec![Ipv4Addr::BROADCAST];

  let interfaces = match get_if_addrs::get_if_addrs() {
    Ok(interfaces) => interfaces,
    Err(e) => {
      log::debug!("Failed to list interfaces: {}", e);
      return addrs;
    }
  };

  for iface in interfaces {
    if iface.is_loopback() {
      continue;
    }
    if let get_if_addrs::IfAddr::V4(v4) = &iface.addr {
      let ip = u32::from(v4.ip);
      let mask = u32::from(v4.netmask);
      let broadcast = Ipv4Addr::from(ip | !mask);
      if !addrs.contains(&broadcast) {
        log::debug!("Discovery: will try broadcast {} (from {})", broadcast, iface.name);
        addrs.push(broadcast);
      }
    }
  }

  addrs
}

/// Add discovered URLs the configuration does not list yet. Returns true if
/// anything was added.
pub fn merge_server_urls(config: &mut AppConfig, servers: &[DiscoveredServer]) -> bool {
  let mut added = false;
  for server in servers {
    if !config.server_urls.contains(&server.url) {
      config.server_urls.push(server.url.clone());
      added = true;
    }
  }
  added
}

/// Clears the running flag when a scan ends, however it ends.
struct ScanGuard<'a>(&'a AtomicBool);

impl Drop for ScanGuard<'_> {
  fn drop(&mut self) {
    self.0.store(false, Ordering::SeqCst);
  }
}

pub struct Discovery {
  running: AtomicBool,
  last: Mutex<Vec<DiscoveredServer>>,
  /// Fixed destinations instead of broadcast, for tests.
  targets: Option<Vec<SocketAddr>>,
  timeout: Duration,
}

impl Default for Discovery {
  fn default() -> Self {
    Self::new()
  }
}

impl Discovery {
  pub fn new() -> Self {
    Self {
      running: AtomicBool::new(false),
      last: Mutex::new(Vec::new()),
      targets: None,
      timeout: SCAN_TIMEOUT,
    }
  }

  pub fn with_targets(targets: Vec<SocketAddr>, timeout: Duration) -> Self {
    Self {
      targets: Some(targets),
      timeout,
      ..Self::new()
    }
  }

  pub fn is_running(&self) -> bool {
    self.running.load(Ordering::SeqCst)
  }

  /// Servers found by the most recent completed scan.
  pub fn last_results(&self) -> Vec<DiscoveredServer> {
    self.last.lock().clone()
  }

  pub fn clear(&self) {
    self.last.lock().clear();
  }

  /// Run one scan. `None` when another scan is already in progress.
  pub async fn scan(&self) -> Option<Vec<DiscoveredServer>> {
    if self.running.swap(true, Ordering::SeqCst) {
      log::debug!("Discovery already running");
      return None;
    }
    let _guard = ScanGuard(&self.running);

    let targets = match &self.targets {
      Some(targets) => targets.clone(),
      None => broadcast_addresses()
        .into_iter()
        .map(|ip| SocketAddr::new(IpAddr::V4(ip), DISCOVERY_PORT))
        .collect(),
    };

    let deadline = Instant::now() + self.timeout;
    let mut tasks = Vec::new();
    for (message, platform) in QUERIES {
      let targets = targets.clone();
      tasks.push(tokio::spawn(async move {
        match query(message, platform, &targets, deadline).await {
          Ok(found) => found,
          Err(e) => {
            log::warn!("Discovery ({}) failed: {}", platform, e);
            Vec::new()
          }
        }
      }));
    }

    let mut seen = HashSet::new();
    let mut servers = Vec::new();
    for task in tasks {
      for server in task.await.unwrap_or_default() {
        if seen.insert(format!("{}|{}", server.address, server.platform)) {
          log::info!(
            "Discovery: found {} server {:?} at {}",
            server.platform,
            server.name,
            server.url
          );
          servers.push(server);
        }
      }
    }

    *self.last.lock() = servers.clone();
    Some(servers)
  }

  /// Scan and add results to the configuration unless the user set the
  /// server list explicitly.
  pub async fn scan_and_configure(&self, config: &ConfigStore) {
    let Some(servers) = self.scan().await else {
      return;
    };
    if servers.is_empty() {
      return;
    }

    let result = config.update(|c| {
      if c.server_urls_set {
        return None;
      }
      merge_server_urls(c, &servers);
      Some(c.server_urls.len())
    });
    match result {
      Ok(Some(count)) => log::info!("Discovery: auto-configured {} server URL(s)", count),
      Ok(None) => {}
      Err(e) => log::error!("Failed to save discovered servers: {}", e),
    }
  }
}

async fn query(
  message: &str,
  platform: &str,
  targets: &[SocketAddr],
  deadline: Instant,
) -> std::io::Result<Vec<DiscoveredServer>> {
  let socket = UdpSocket::bind((Ipv4Addr::UNSPECIFIED, 0)).await?;
  socket.set_broadcast(true)?;

  for target in targets {
    if let Err(e) = socket.send_to(message.as_bytes(), target).await {
      log::debug!("Discovery: failed to send to {}: {}", target, e);
    }
  }

  let mut found = Vec::new();
  let mut buf = [0u8; 4096];
  loop {
    let (n, from) = match tokio::time::timeout_at(deadline, socket.recv_from(&mut buf)).await {
      Ok(Ok(received)) => received,
      Ok(Err(e)) => {
        log::debug!("Discovery receive failed: {}", e);
        break;
      }
      Err(_) => break,
    };
    if let Some(server) = parse_reply(&buf[..n], from.ip(), platform) {
      found.push(server);
    }
  }

  Ok(found)
}
