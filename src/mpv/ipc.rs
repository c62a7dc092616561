//! One-shot IPC round trips to MPV.
//!
//! Every call opens a fresh connection (Named Pipe on Windows, Unix socket
//! elsewhere), writes one command line, reads until the matching reply, and
//! closes. The whole exchange runs under a sub-second deadline.

use std::time::Duration;

use thiserror::Error;
use tokio::io::{AsyncBufReadExt, AsyncRead, AsyncWrite, AsyncWriteExt, BufReader};

use super::protocol::{MpvCommand, MpvMessage, MpvResponse, PropertyValue};

/// Deadline covering connect, write and read.
pub const IPC_TIMEOUT: Duration = Duration::from_millis(500);

#[derive(Error, Debug)]
pub enum IpcError {
  #[error("Connection failed: {0}")]
  ConnectionFailed(String),
  #[error("I/O failed: {0}")]
  Io(#[from] std::io::Error),
  #[error("Command timeout")]
  Timeout,
  #[error("Malformed reply: {0}")]
  Protocol(#[from] serde_json::Error),
  #[error("MPV error: {0}")]
  CommandFailed(String),
  #[error("Disconnected")]
  Disconnected,
}

/// Read a property from the player.
pub async fn query_property(endpoint: &str, name: &str) -> Result<PropertyValue, IpcError> {
  let response = round_trip(endpoint, MpvCommand::get_property(name)).await?;
  Ok(
    response
      .data
      .map(PropertyValue::from)
      .unwrap_or(PropertyValue::Null),
  )
}

/// Read a numeric property, `None` when the player reports something else.
pub async fn query_f64(endpoint: &str, name: &str) -> Result<Option<f64>, IpcError> {
  Ok(query_property(endpoint, name).await?.as_f64())
}

/// Send a bare command such as `quit`.
pub async fn send_command(endpoint: &str, name: &str) -> Result<(), IpcError> {
  round_trip(endpoint, MpvCommand::verb(name)).await?;
  Ok(())
}

async fn round_trip(endpoint: &str, cmd: MpvCommand) -> Result<MpvResponse, IpcError> {
  let request = async {
    let stream = connect(endpoint).await?;
    exchange(stream, &cmd).await
  };

  let response = tokio::time::timeout(IPC_TIMEOUT, request)
    .await
    .map_err(|_| IpcError::Timeout)??;

  if !response.is_success() {
    return Err(IpcError::CommandFailed(response.error));
  }
  Ok(response)
}

#[cfg(windows)]
async fn connect(
  endpoint: &str,
) -> Result<tokio::net::windows::named_pipe::NamedPipeClient, IpcError> {
  use tokio::net::windows::named_pipe::ClientOptions;

  ClientOptions::new()
    .open(endpoint)
    .map_err(|e| IpcError::ConnectionFailed(format!("Failed to open pipe: {}", e)))
}

#[cfg(not(windows))]
async fn connect(endpoint: &str) -> Result<tokio::net::UnixStream, IpcError> {
  tokio::net::UnixStream::connect(endpoint)
    .await
    .map_err(|e| IpcError::ConnectionFailed(e.to_string()))
}

async fn exchange<S>(stream: S, cmd: &MpvCommand) -> Result<MpvResponse, IpcError>
where
  S: AsyncRead + AsyncWrite + Unpin,
{
  let (reader, mut writer) = tokio::io::split(stream);
  writer.write_all(cmd.to_line()?.as_bytes()).await?;
  writer.flush().await?;

  let mut lines = BufReader::new(reader).lines();
  while let Some(line) = lines.next_line().await? {
    let trimmed = line.trim();
    if trimmed.is_empty() {
      continue;
    }

    match MpvMessage::parse(trimmed)? {
      MpvMessage::Response(response) => {
        if response.request_id.is_none() || response.request_id == Some(cmd.request_id) {
          return Ok(response);
        }
        log::debug!("Ignoring reply for request_id={:?}", response.request_id);
      }
      // Events are broadcast to every client; skip them.
      MpvMessage::Event(_) => continue,
    }
  }

  Err(IpcError::Disconnected)
}

#[cfg(all(test, unix))]
pub(crate) mod testing {
  //! Minimal fake MPV speaking the JSON IPC protocol on a Unix socket.

  use std::collections::HashMap;
  use std::path::PathBuf;
  use std::sync::Arc;

  use parking_lot::Mutex;
  use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader};
  use tokio::net::UnixListener;

  type Changes = Vec<(String, serde_json::Value)>;

  /// Properties missing from the table are reported as unavailable.
  #[derive(Clone, Default)]
  pub struct FakeMpv {
    pub properties: Arc<Mutex<HashMap<String, serde_json::Value>>>,
    pub commands: Arc<Mutex<Vec<String>>>,
    after_query: Arc<Mutex<HashMap<String, Changes>>>,
  }

  impl FakeMpv {
    pub fn set(&self, name: &str, value: serde_json::Value) {
      self.properties.lock().insert(name.to_string(), value);
    }

    /// Apply `changes` once, right after the next reply for `name`.
    pub fn set_after_query(&self, name: &str, changes: &[(&str, serde_json::Value)]) {
      let changes = changes
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect();
      self.after_query.lock().insert(name.to_string(), changes);
    }

    /// Serve on a fresh socket inside `dir`, returning its path.
    pub fn serve(&self, dir: &std::path::Path) -> String {
      let path: PathBuf = dir.join("mpv.sock");
      let listener = UnixListener::bind(&path).unwrap();
      let fake = self.clone();
      tokio::spawn(async move {
        while let Ok((stream, _)) = listener.accept().await {
          let fake = fake.clone();
          tokio::spawn(async move {
            let (reader, mut writer) = stream.into_split();
            let mut lines = BufReader::new(reader).lines();
            // An unsolicited event first, as real MPV may send one.
            let _ = writer.write_all(b"{\"event\":\"idle\"}\n").await;
            while let Ok(Some(line)) = lines.next_line().await {
              let request: serde_json::Value = serde_json::from_str(&line).unwrap();
              let args = request["command"].as_array().cloned().unwrap_or_default();
              let verb = args.first().and_then(|v| v.as_str()).unwrap_or("").to_string();
              let reply = if verb == "get_property" {
                let name = args[1].as_str().unwrap_or("");
                let value = fake.properties.lock().get(name).cloned();
                if let Some(changes) = fake.after_query.lock().remove(name) {
                  for (k, v) in changes {
                    fake.set(&k, v);
                  }
                }
                match value {
                  Some(value) => serde_json::json!({
                    "data": value, "error": "success", "request_id": request["request_id"]
                  }),
                  None => serde_json::json!({
                    "error": "property unavailable", "request_id": request["request_id"]
                  }),
                }
              } else {
                fake.commands.lock().push(verb);
                serde_json::json!({"error": "success", "request_id": request["request_id"]})
              };
              let mut out = reply.to_string();
              out.push('\n');
              if writer.write_all(out.as_bytes()).await.is_err() {
                break;
              }
            }
          });
        }
      });
      path.to_string_lossy().into_owned()
    }
  }
}
