//! Session acquisition for the device
//!
//! This module handles:
//! - Loading the persisted session token
//! - Resolving the current network address info (IP, MAC)
//! - The one-shot handshake that exchanges token + identity for a Session

mod manager;
mod network;
mod token;

pub use manager::{build_handshake_url, parse_handshake_body, HandshakeConfig, SessionManager};
pub use network::{NetworkInfo, NetworkProbe, SystemNetwork};
pub use token::load_token;

use std::path::PathBuf;
use thiserror::Error;

/// Startup failures; any of these ends the process
#[derive(Error, Debug)]
pub enum SessionError {
    #[error("session token file not found: {}", .0.display())]
    TokenMissing(PathBuf),

    #[error("session token file was empty after trimming: {}", .0.display())]
    TokenEmpty(PathBuf),

    #[error("failed to read session token file {}: {source}", .path.display())]
    TokenRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("handshake request failed: {0}")]
    Transport(#[from] reqwest::Error),

    #[error("Invalid response: {0}")]
    InvalidResponse(#[from] serde_json::Error),

    #[error("Session ID not found")]
    SessionIdMissing,
}
