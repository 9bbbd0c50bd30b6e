//! Credential blob encoding for a WhatsApp session snapshot.

use base64::{engine::general_purpose::STANDARD, Engine};
use serde_json::json;
use wadispatch_core::{credentials::Credentials, error::DispatchError};

/// Value of the `format` field in blobs produced by `wadispatch pair`.
pub const SESSION_FORMAT: &str = "wadispatch-session/1";

/// Wrap a store snapshot as credential JSON text.
pub fn encode_session(snapshot: &[u8]) -> Result<String, DispatchError> {
    let blob = json!({
        "format": SESSION_FORMAT,
        "session": STANDARD.encode(snapshot),
    });
    Ok(serde_json::to_string_pretty(&blob)?)
}

/// Extract the store snapshot from credentials.
pub fn decode_session(credentials: &Credentials) -> Result<Vec<u8>, DispatchError> {
    match credentials.str_field("format") {
        Some(SESSION_FORMAT) => {}
        Some(other) => {
            return Err(DispatchError::Transport(format!(
                "unsupported credentials format '{other}'"
            )))
        }
        None => {
            return Err(DispatchError::Transport(
                "credentials are not a WhatsApp session (missing 'format')".into(),
            ))
        }
    }

    let encoded = credentials.str_field("session").ok_or_else(|| {
        DispatchError::Transport("credentials are missing the 'session' field".into())
    })?;
    let snapshot = STANDARD
        .decode(encoded.trim())
        .map_err(|e| DispatchError::Transport(format!("session snapshot is not base64: {e}")))?;
    if snapshot.is_empty() {
        return Err(DispatchError::Transport("session snapshot is empty".into()));
    }
    Ok(snapshot)
}
