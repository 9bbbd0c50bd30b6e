//! Credential blobs and server-side source precedence.
//!
//! A credential blob is a UTF-8 JSON object. Transports interpret its fields;
//! this module only guarantees it parses as an object. Sources, highest
//! precedence first: environment variable, default file, uploaded file.

use serde_json::{Map, Value};
use std::fmt;
use std::path::Path;
use tracing::info;

use crate::config::{shellexpand, CredentialsConfig};
use crate::error::DispatchError;

/// Where a credential blob came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CredentialSource {
    Environment,
    DefaultFile,
    Upload,
}

impl fmt::Display for CredentialSource {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Environment => "environment",
            Self::DefaultFile => "default file",
            Self::Upload => "upload",
        })
    }
}

/// A validated credential blob.
#[derive(Clone)]
pub struct Credentials {
    fields: Map<String, Value>,
    source: CredentialSource,
}

impl fmt::Debug for Credentials {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credentials")
            .field("source", &self.source)
            .field("keys", &self.fields.keys().collect::<Vec<_>>())
            .finish()
    }
}

impl Credentials {
    /// Parse a blob; it must be a JSON object.
    pub fn parse(text: &str, source: CredentialSource) -> Result<Self, DispatchError> {
        let value: Value = serde_json::from_str(text.trim())
            .map_err(|_| DispatchError::Credentials("Invalid credentials JSON file".into()))?;
        match value {
            Value::Object(fields) => Ok(Self { fields, source }),
            _ => Err(DispatchError::Credentials(
                "Invalid credentials JSON file: expected a JSON object".into(),
            )),
        }
    }

    pub fn source(&self) -> CredentialSource {
        self.source
    }

    /// A string field, if present.
    pub fn str_field(&self, key: &str) -> Option<&str> {
        self.fields.get(key).and_then(Value::as_str)
    }
}

/// Whether any server-side credential source is available.
pub fn server_side_available(config: &CredentialsConfig) -> bool {
    env_blob(config).is_some() || Path::new(&shellexpand(&config.default_file)).is_file()
}

/// Resolve credentials by precedence: env var, default file, then upload.
///
/// Returns a validation error when no source supplies a blob, and a
/// credentials error when the chosen blob is not a JSON object.
pub fn resolve(
    config: &CredentialsConfig,
    upload: Option<&str>,
) -> Result<Credentials, DispatchError> {
    if let Some(blob) = env_blob(config) {
        info!("using credentials from ${}", config.env_var);
        return Credentials::parse(&blob, CredentialSource::Environment);
    }

    let default_path = shellexpand(&config.default_file);
    if Path::new(&default_path).is_file() {
        let blob = std::fs::read_to_string(&default_path).map_err(|e| {
            DispatchError::Credentials(format!("failed to read {default_path}: {e}"))
        })?;
        info!("using credentials from {default_path}");
        return Credentials::parse(&blob, CredentialSource::DefaultFile);
    }

    match upload {
        Some(blob) => Credentials::parse(blob, CredentialSource::Upload),
        None => Err(DispatchError::Validation("Missing credentials file".into())),
    }
}

fn env_blob(config: &CredentialsConfig) -> Option<String> {
    if config.env_var.is_empty() {
        return None;
    }
    std::env::var(&config.env_var)
        .ok()
        .filter(|v| !v.trim().is_empty())
}
