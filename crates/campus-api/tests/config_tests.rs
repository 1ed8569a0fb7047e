//! Tests for configuration loading, overrides and validation.

use std::collections::HashMap;
use std::time::Duration;

use campus_api::config::{ENV_API_URL, ENV_TIME_ZONE};
use campus_api::{ApiConfig, ApiError};

#[test]
fn empty_document_yields_defaults() {
    let config = ApiConfig::from_toml_str("").unwrap();

    assert_eq!(config, ApiConfig::default());
    assert_eq!(config.base_url, "https://api.intra.42.fr");
    assert_eq!(config.page_size, 100);
    assert_eq!(config.max_rate_limit_retries, None);
    assert_eq!(config.tz().unwrap(), chrono_tz::Europe::Paris);
}

#[test]
fn explicit_values_override_defaults() {
    let config = ApiConfig::from_toml_str(
        r#"
        base_url = "https://intra.example.test"
        page_size = 30
        max_rate_limit_retries = 4
        cache_ttl_secs = 60
        time_zone = "Asia/Tokyo"
        "#,
    )
    .unwrap();

    assert_eq!(config.base_url, "https://intra.example.test");
    assert_eq!(config.page_size, 30);
    assert_eq!(config.max_rate_limit_retries, Some(4));
    assert_eq!(config.cache_ttl(), chrono::Duration::seconds(60));
    assert_eq!(config.tz().unwrap(), chrono_tz::Asia::Tokyo);
    // Untouched fields keep their defaults.
    assert_eq!(config.timeout(), Duration::from_secs(30));
}

#[test]
fn invalid_values_are_rejected() {
    for source in [
        "base_url = \"\"",
        "page_size = 0",
        "max_pages = 0",
        "timeout_secs = 0",
        "sweep_interval_secs = 0",
        "time_zone = \"Mars/Olympus_Mons\"",
        "page_size = \"many\"",
        "this is not toml",
    ] {
        let result = ApiConfig::from_toml_str(source);
        assert!(
            matches!(result, Err(ApiError::Config(_))),
            "{source:?} should be rejected"
        );
    }
}

#[test]
fn overrides_replace_url_and_zone() {
    let env: HashMap<&str, &str> = [
        (ENV_API_URL, "http://localhost:8080"),
        (ENV_TIME_ZONE, "America/New_York"),
    ]
    .into_iter()
    .collect();

    let config = ApiConfig::default()
        .with_overrides(|name| env.get(name).map(|v| v.to_string()))
        .unwrap();

    assert_eq!(config.base_url, "http://localhost:8080");
    assert_eq!(config.tz().unwrap(), chrono_tz::America::New_York);
}

#[test]
fn invalid_override_is_rejected() {
    let result = ApiConfig::default().with_overrides(|name| {
        (name == ENV_TIME_ZONE).then(|| "Nowhere/Special".to_string())
    });

    assert!(matches!(result, Err(ApiError::Config(_))));
}

#[test]
fn from_file_reads_toml() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("campus.toml");
    std::fs::write(&path, "page_size = 42\n").unwrap();

    let config = ApiConfig::from_file(&path).unwrap();
    assert_eq!(config.page_size, 42);

    let missing = ApiConfig::from_file(&dir.path().join("missing.toml"));
    assert!(matches!(missing, Err(ApiError::Config(_))));
}

#[test]
fn backoff_doubles_and_caps() {
    let config = ApiConfig {
        backoff_base_ms: 100,
        backoff_max_ms: 1_000,
        ..ApiConfig::default()
    };

    assert_eq!(config.backoff(0), Duration::from_millis(100));
    assert_eq!(config.backoff(1), Duration::from_millis(200));
    assert_eq!(config.backoff(3), Duration::from_millis(800));
    assert_eq!(config.backoff(4), Duration::from_millis(1_000));
    assert_eq!(config.backoff(200), Duration::from_millis(1_000));
}
