use crate::config::models::AppConfig;
use crate::hashing::DEFAULT_BUCKET_COUNT;

#[test]
fn test_default_config() {
    let config = AppConfig::default();
    assert!(config.validate().is_ok());

    assert_eq!(config.broker.bucket_count, DEFAULT_BUCKET_COUNT);
    assert!(config.broker.broker_id.starts_with("broker-"));
    assert_eq!(config.dispatch.default_timeout_ms, 3000);
    assert_eq!(config.workflow.max_nodes, 200);
    assert!(!config.observability.metrics_enabled);
}

#[test]
fn test_config_from_toml() {
    let toml_content = r#"
[broker]
broker_id = "broker-a"
bucket_count = 16
rebalance_interval_seconds = 5

[timer]
max_concurrent_executions = 8

[dispatch]
default_timeout_ms = 1500
worker_http_path = "/rpc/dispatch"

[observability]
log_level = "debug"
log_format = "json"
"#;

    let config = AppConfig::from_toml(toml_content).unwrap();

    assert_eq!(config.broker.broker_id, "broker-a");
    assert_eq!(config.broker.bucket_count, 16);
    assert_eq!(config.broker.rebalance_interval_seconds, 5);
    // 未配置的字段使用默认值
    assert_eq!(config.broker.lock_lease_seconds, 60);
    assert_eq!(config.timer.max_concurrent_executions, 8);
    assert_eq!(config.dispatch.default_timeout_ms, 1500);
    assert_eq!(config.dispatch.worker_http_path, "/rpc/dispatch");
    assert_eq!(config.workflow.max_nodes, 200);
    assert_eq!(config.observability.log_format, "json");
}

#[test]
fn test_config_to_toml() {
    let mut config = AppConfig::default();
    config.broker.broker_id = "broker-roundtrip".to_string();

    let toml_str = config.to_toml().unwrap();
    assert!(toml_str.contains("[broker]"));
    assert!(toml_str.contains("broker-roundtrip"));

    let parsed = AppConfig::from_toml(&toml_str).unwrap();
    assert_eq!(parsed.broker.broker_id, "broker-roundtrip");
}

#[test]
fn test_invalid_sections_are_rejected() {
    let mut config = AppConfig::default();
    config.broker.bucket_count = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.broker.broker_id = "  ".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.timer.max_concurrent_executions = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.dispatch.worker_http_path = "rpc".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.workflow.max_nodes = 1;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.log_level = "verbose".to_string();
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.observability.metrics_enabled = true;
    config.observability.metrics_bind_address = "not-an-address".to_string();
    assert!(config.validate().is_err());
}

#[test]
fn test_invalid_toml_is_rejected() {
    let result = AppConfig::from_toml("[broker]\nbucket_count = \"many\"");
    assert!(result.is_err());
}
