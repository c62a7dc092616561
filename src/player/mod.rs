//! External player launching and lifecycle.

mod manager;
pub mod process;

pub use manager::{LaunchPlan, LaunchRequest, Launched, PlayerManager};
pub use process::{PlayerKind, ProcessError};
