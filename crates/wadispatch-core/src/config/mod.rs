mod defaults;

#[cfg(test)]
mod tests;

use serde::{Deserialize, Serialize};
use std::path::Path;

use crate::error::DispatchError;
use defaults::*;

/// Top-level wadispatch configuration.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub api: ApiConfig,
    #[serde(default)]
    pub delivery: DeliveryConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub memory: MemoryConfig,
    #[serde(default)]
    pub whatsapp: WhatsAppConfig,
}

/// General process settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    #[serde(default = "default_data_dir")]
    pub data_dir: String,
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            log_level: default_log_level(),
        }
    }
}

/// HTTP API configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ApiConfig {
    #[serde(default = "default_api_host")]
    pub host: String,
    #[serde(default = "default_api_port")]
    pub port: u16,
    /// Bearer token for API authentication. Empty = no auth (for local-only use).
    #[serde(default)]
    pub api_key: String,
    /// Upper bound on a multipart `/start` body.
    #[serde(default = "default_max_upload_bytes")]
    pub max_upload_bytes: usize,
}

impl Default for ApiConfig {
    fn default() -> Self {
        Self {
            host: default_api_host(),
            port: default_api_port(),
            api_key: String::new(),
            max_upload_bytes: default_max_upload_bytes(),
        }
    }
}

/// Pacing and retry defaults for the delivery engine.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeliveryConfig {
    /// Inter-line delay used when a request does not supply one.
    #[serde(default = "default_delay_ms")]
    pub default_delay_ms: u64,
    /// Requests below this delay are accepted but logged as risky.
    #[serde(default = "default_min_recommended_delay_ms")]
    pub min_recommended_delay_ms: u64,
    /// Fixed pause between retry attempts, independent of the request delay.
    #[serde(default = "default_retry_backoff_ms")]
    pub retry_backoff_ms: u64,
    #[serde(default = "default_max_retries")]
    pub default_max_retries: u32,
    /// How long to wait for the transport to report `connected`.
    #[serde(default = "default_connect_timeout_secs")]
    pub connect_timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            default_delay_ms: default_delay_ms(),
            min_recommended_delay_ms: default_min_recommended_delay_ms(),
            retry_backoff_ms: default_retry_backoff_ms(),
            default_max_retries: default_max_retries(),
            connect_timeout_secs: default_connect_timeout_secs(),
        }
    }
}

/// Server-side credential sources, consulted before the uploaded file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CredentialsConfig {
    /// Environment variable holding the credential JSON verbatim.
    #[serde(default = "default_creds_env_var")]
    pub env_var: String,
    /// On-disk credential file used when present.
    #[serde(default = "default_creds_file")]
    pub default_file: String,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            env_var: default_creds_env_var(),
            default_file: default_creds_file(),
        }
    }
}

/// Session store config.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    #[serde(default = "default_db_path")]
    pub db_path: String,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            db_path: default_db_path(),
        }
    }
}

/// WhatsApp transport config.
///
/// Per-connection session files live under `{data_dir}/sessions/`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WhatsAppConfig {
    /// Parent directory for per-connection session databases.
    #[serde(default = "default_sessions_dir")]
    pub sessions_dir: String,
}

impl Default for WhatsAppConfig {
    fn default() -> Self {
        Self {
            sessions_dir: default_sessions_dir(),
        }
    }
}

/// Expand `~` to home directory.
pub fn shellexpand(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/") {
        if let Some(home) = std::env::var_os("HOME") {
            return format!("{}/{rest}", home.to_string_lossy());
        }
    }
    path.to_string()
}

/// Load configuration from a TOML file.
///
/// Falls back to defaults if the file does not exist.
pub fn load(path: &str) -> Result<Config, DispatchError> {
    let path = Path::new(path);
    if !path.exists() {
        tracing::info!(
            "Config file not found at {}, using defaults",
            path.display()
        );
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| DispatchError::Config(format!("failed to read {}: {e}", path.display())))?;

    parse(&content)
}

/// Parse configuration from TOML text.
pub fn parse(content: &str) -> Result<Config, DispatchError> {
    let config: Config = toml::from_str(content)
        .map_err(|e| DispatchError::Config(format!("failed to parse config: {e}")))?;

    if config.delivery.retry_backoff_ms == 0 {
        return Err(DispatchError::Config(
            "delivery.retry_backoff_ms must be greater than zero".into(),
        ));
    }

    Ok(config)
}
