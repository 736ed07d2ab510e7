//! Rusty Relay - real-time presence and messaging over WebSockets
//!
//! Tracks live connections per user, fans events out through rooms,
//! throttles high-frequency actions, suppresses duplicate sends and
//! announces presence changes to conversation peers.

pub mod auth;
pub mod config;
pub mod constants;
pub mod core;
pub mod error;
pub mod handlers;
pub mod storage;

// Re-export main components
pub use config::*;
pub use constants::*;
pub use error::{RelayError, Result};
