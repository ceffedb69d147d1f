use std::time::Duration;

use scheduler::{Application, ShutdownManager};
use scheduler_core::config::BrokerConfig;
use scheduler_core::models::{Job, ScheduleOption};
use scheduler_core::traits::JobRepository;
use scheduler_core::AppConfig;
use scheduler_domain::PublishScheduleCommand;

fn config() -> AppConfig {
    AppConfig {
        broker: BrokerConfig {
            broker_id: "broker-test".to_string(),
            bucket_count: 4,
            ..BrokerConfig::default()
        },
        ..AppConfig::default()
    }
}

#[test]
fn test_bundled_config_file_is_valid() {
    let config = AppConfig::load(Some("config/scheduler.toml")).unwrap();
    assert_eq!(config.broker.bucket_count, 64);
    assert_eq!(config.dispatch.worker_http_path, "/worker/rpc/dispatch");
}

#[tokio::test]
async fn test_published_schedule_is_armed_after_partition_tick() {
    let app = Application::new(config()).await.unwrap();
    let change = app.partitioner().tick().await.unwrap();
    assert_eq!(change.gained, vec![1, 2, 3, 4]);

    app.jobs()
        .save(&Job::executor(1, "order-service", "sync-orders", "order-sync"))
        .await
        .unwrap();

    let option = ScheduleOption::fixed_rate(chrono::Duration::minutes(5))
        .with_delay(chrono::Duration::hours(1));
    app.bus()
        .send(PublishScheduleCommand {
            schedule_id: 7,
            job_id: 1,
            option,
            expected_version: None,
        })
        .await
        .unwrap();

    assert!(app.manager().is_armed(7));
}

#[tokio::test]
async fn test_run_returns_after_shutdown_and_releases_timers() {
    let app = std::sync::Arc::new(Application::new(config()).await.unwrap());
    let shutdown = ShutdownManager::new();

    let handle = {
        let app = app.clone();
        let rx = shutdown.subscribe().await;
        tokio::spawn(async move { app.run(rx).await })
    };

    tokio::time::sleep(Duration::from_millis(100)).await;
    shutdown.shutdown().await;

    let result = tokio::time::timeout(Duration::from_secs(2), handle).await;
    assert!(result.unwrap().unwrap().is_ok());
    assert!(!app.partitioner().is_running().await);
    assert!(app.manager().armed_schedule_ids().is_empty());
}
