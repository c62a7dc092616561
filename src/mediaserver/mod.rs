//! Emby/Jellyfin API client module.
//!
//! Handles resume lookups and session start/stop reporting.

mod client;
mod error;
mod reporter;
mod types;

pub use client::MediaServerClient;
pub use error::MediaServerError;
pub use reporter::ProgressReporter;
pub use types::*;
