//! Persisted session token loading

use super::SessionError;
use simiot_shared::SessionToken;
use std::io::ErrorKind;
use std::path::Path;
use tracing::{debug, error, info};

/// Read and trim the token file; missing or empty files are fatal
pub fn load_token(path: &Path) -> Result<SessionToken, SessionError> {
    info!("Looking for session file at {}", path.display());

    let raw = match std::fs::read_to_string(path) {
        Ok(raw) => raw,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            error!("Session file {} not found", path.display());
            return Err(SessionError::TokenMissing(path.to_path_buf()));
        }
        Err(source) => {
            return Err(SessionError::TokenRead {
                path: path.to_path_buf(),
                source,
            })
        }
    };
    debug!("Raw session file contents: {:?}", raw);

    match SessionToken::parse(&raw) {
        Some(token) => {
            info!("Parsed session token ({} chars)", token.as_str().len());
            Ok(token)
        }
        None => {
            error!("Session file {} was empty after trimming", path.display());
            Err(SessionError::TokenEmpty(path.to_path_buf()))
        }
    }
}
