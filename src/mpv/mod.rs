//! MPV IPC module - controls a running MPV player via JSON IPC.
//!
//! Architecture:
//! - `ipc.rs` - One-shot request/response over Named Pipes (Windows) or Unix Sockets
//! - `protocol.rs` - JSON command/response types and serialization

pub mod ipc;
mod protocol;

pub use ipc::{query_f64, query_property, send_command, IpcError};
pub use protocol::PropertyValue;
