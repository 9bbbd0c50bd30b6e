use super::*;

#[test]
fn test_empty_config_uses_defaults() {
    let cfg = parse("").unwrap();
    assert_eq!(cfg.general.data_dir, "~/.wadispatch");
    assert_eq!(cfg.api.port, 3000);
    assert_eq!(cfg.api.max_upload_bytes, 5 * 1024 * 1024);
    assert_eq!(cfg.delivery.default_delay_ms, 1000);
    assert_eq!(cfg.delivery.retry_backoff_ms, 1000);
    assert_eq!(cfg.delivery.default_max_retries, 3);
    assert_eq!(cfg.credentials.env_var, "WADISPATCH_CREDS");
}

#[test]
fn test_partial_section_keeps_other_defaults() {
    let cfg = parse(
        r#"
        [api]
        port = 8080
        api_key = "secret"

        [delivery]
        default_delay_ms = 750
    "#,
    )
    .unwrap();
    assert_eq!(cfg.api.port, 8080);
    assert_eq!(cfg.api.host, "127.0.0.1");
    assert_eq!(cfg.api.api_key, "secret");
    assert_eq!(cfg.delivery.default_delay_ms, 750);
    assert_eq!(cfg.delivery.min_recommended_delay_ms, 500);
    assert_eq!(cfg.delivery.connect_timeout_secs, 30);
}

#[test]
fn test_zero_backoff_rejected() {
    let err = parse("[delivery]\nretry_backoff_ms = 0\n").unwrap_err();
    assert!(matches!(err, DispatchError::Config(_)));
}

#[test]
fn test_malformed_toml_is_config_error() {
    let err = parse("[api\nport = 1").unwrap_err();
    assert!(err.to_string().contains("failed to parse config"));
}

#[test]
fn test_load_missing_file_falls_back() {
    let cfg = load("/nonexistent/__wadispatch__/config.toml").unwrap();
    assert_eq!(cfg.memory.db_path, "~/.wadispatch/data/sessions.db");
    assert_eq!(cfg.whatsapp.sessions_dir, "~/.wadispatch/sessions");
}

#[test]
fn test_shellexpand_leaves_absolute_paths() {
    assert_eq!(shellexpand("/tmp/x.db"), "/tmp/x.db");
}
