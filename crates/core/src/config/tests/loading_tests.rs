use crate::config::models::AppConfig;
use std::env;
use std::io::Write;
use tempfile::NamedTempFile;

#[test]
fn test_load_from_file() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(
        file,
        r#"
[broker]
broker_id = "broker-file"
bucket_count = 32

[workflow]
max_nodes = 50
"#
    )
    .unwrap();

    let path = file.path().to_str().unwrap().to_string();
    let config = AppConfig::load(Some(&path)).unwrap();

    assert_eq!(config.broker.broker_id, "broker-file");
    assert_eq!(config.broker.bucket_count, 32);
    assert_eq!(config.workflow.max_nodes, 50);
}

#[test]
fn test_load_missing_file() {
    let result = AppConfig::load(Some("/nonexistent/scheduler.toml"));
    assert!(result.is_err());
    assert!(result.unwrap_err().to_string().contains("配置文件不存在"));
}

#[test]
fn test_environment_override() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[dispatch]\nusage_window_seconds = 120").unwrap();

    env::set_var("SCHEDULER__DISPATCH__USAGE_WINDOW_SECONDS", "45");
    let config = AppConfig::load(Some(file.path().to_str().unwrap()));
    env::remove_var("SCHEDULER__DISPATCH__USAGE_WINDOW_SECONDS");

    let config = config.unwrap();
    assert_eq!(config.dispatch.usage_window_seconds, 45);
}

#[test]
fn test_invalid_file_fails_validation() {
    let mut file = NamedTempFile::new().unwrap();
    writeln!(file, "[timer]\nmax_concurrent_executions = 0").unwrap();

    let result = AppConfig::load(Some(file.path().to_str().unwrap()));
    assert!(result.is_err());
}
