//! Default value functions used by serde for config deserialization.

pub fn default_data_dir() -> String {
    "~/.wadispatch".to_string()
}

pub fn default_log_level() -> String {
    "info".to_string()
}

pub fn default_api_host() -> String {
    "127.0.0.1".to_string()
}

pub fn default_api_port() -> u16 {
    3000
}

pub fn default_max_upload_bytes() -> usize {
    5 * 1024 * 1024
}

pub fn default_delay_ms() -> u64 {
    1000
}

pub fn default_min_recommended_delay_ms() -> u64 {
    500
}

pub fn default_retry_backoff_ms() -> u64 {
    1000
}

pub fn default_max_retries() -> u32 {
    3
}

pub fn default_connect_timeout_secs() -> u64 {
    30
}

pub fn default_creds_env_var() -> String {
    "WADISPATCH_CREDS".to_string()
}

pub fn default_creds_file() -> String {
    "~/.wadispatch/creds.json".to_string()
}

pub fn default_db_path() -> String {
    "~/.wadispatch/data/sessions.db".to_string()
}

pub fn default_sessions_dir() -> String {
    "~/.wadispatch/sessions".to_string()
}
