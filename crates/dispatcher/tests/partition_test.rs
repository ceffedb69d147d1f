use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;

use scheduler_core::config::BrokerConfig;
use scheduler_core::traits::{BrokerRegistry, BucketRepository, DistributedLock};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_dispatcher::partition::REBALANCE_LOCK_NAME;
use scheduler_dispatcher::{BucketOwnershipListener, ClusterPartitioner, RebalanceOutcome};
use scheduler_domain::NoopEventPublisher;
use scheduler_infrastructure::{
    InMemoryBrokerRegistry, InMemoryBucketRepository, InMemoryLeaseLock, MetricsCollector,
};

const BUCKETS: u32 = 8;

#[derive(Default)]
struct RecordingListener {
    changes: Mutex<Vec<(Vec<u32>, Vec<u32>)>>,
}

#[async_trait]
impl BucketOwnershipListener for RecordingListener {
    async fn on_buckets_changed(&self, gained: &[u32], lost: &[u32]) -> SchedulerResult<()> {
        self.changes
            .lock()
            .unwrap()
            .push((gained.to_vec(), lost.to_vec()));
        Ok(())
    }
}

/// 第一次通知失败，之后正常记录
#[derive(Default)]
struct FlakyListener {
    failed: AtomicBool,
    inner: RecordingListener,
}

#[async_trait]
impl BucketOwnershipListener for FlakyListener {
    async fn on_buckets_changed(&self, gained: &[u32], lost: &[u32]) -> SchedulerResult<()> {
        if !self.failed.swap(true, Ordering::SeqCst) {
            return Err(SchedulerError::Internal("装载调度计划失败".to_string()));
        }
        self.inner.on_buckets_changed(gained, lost).await
    }
}

/// 共享同一套锁、心跳表和分桶表的集群
struct Cluster {
    lock: Arc<InMemoryLeaseLock>,
    brokers: Arc<InMemoryBrokerRegistry>,
    buckets: Arc<InMemoryBucketRepository>,
}

impl Cluster {
    fn new() -> Self {
        Self {
            lock: Arc::new(InMemoryLeaseLock::new()),
            brokers: Arc::new(InMemoryBrokerRegistry::new(30)),
            buckets: Arc::new(InMemoryBucketRepository::new()),
        }
    }

    fn node(&self, broker_id: &str) -> ClusterPartitioner {
        ClusterPartitioner::new(
            self.lock.clone(),
            self.brokers.clone(),
            self.buckets.clone(),
            Arc::new(NoopEventPublisher),
            Arc::new(MetricsCollector::new()),
            Some(BrokerConfig {
                broker_id: broker_id.to_string(),
                bucket_count: BUCKETS,
                ..BrokerConfig::default()
            }),
        )
    }

    async fn owners(&self) -> Vec<(u32, String)> {
        self.buckets
            .list()
            .await
            .unwrap()
            .into_iter()
            .map(|b| (b.bucket, b.broker_id))
            .collect()
    }
}

#[tokio::test]
async fn test_first_broker_creates_all_buckets() {
    let cluster = Cluster::new();
    let node = cluster.node("broker-a");
    let listener = Arc::new(RecordingListener::default());
    node.set_listener(listener.clone()).await;

    let change = node.tick().await.unwrap();

    let expected: Vec<u32> = (1..=BUCKETS).collect();
    assert_eq!(change.gained, expected);
    assert!(change.lost.is_empty());
    assert_eq!(node.owned_buckets().await, expected);
    assert!(cluster.owners().await.iter().all(|(_, owner)| owner == "broker-a"));

    let changes = listener.changes.lock().unwrap().clone();
    assert_eq!(changes, vec![(expected, Vec::new())]);
}

#[tokio::test]
async fn test_second_tick_without_changes_does_not_notify() {
    let cluster = Cluster::new();
    let node = cluster.node("broker-a");
    let listener = Arc::new(RecordingListener::default());
    node.set_listener(listener.clone()).await;

    node.tick().await.unwrap();
    let change = node.tick().await.unwrap();

    assert!(change.is_empty());
    assert_eq!(listener.changes.lock().unwrap().len(), 1);
}

#[tokio::test]
async fn test_dead_broker_buckets_are_reassigned_to_alive_brokers() {
    let cluster = Cluster::new();
    let a = cluster.node("broker-a");
    let b = cluster.node("broker-b");
    let c = cluster.node("broker-c");

    a.tick().await.unwrap();
    cluster.brokers.heartbeat("broker-c").await.unwrap();

    // broker-a 崩溃，心跳消失
    cluster.brokers.remove("broker-a");
    let outcome = b.rebalance().await.unwrap();
    assert_eq!(
        outcome,
        RebalanceOutcome::Applied {
            reassigned: BUCKETS as usize,
            created: 0
        }
    );

    let owners = cluster.owners().await;
    assert_eq!(owners.len(), BUCKETS as usize);
    let alive: HashSet<&str> = ["broker-b", "broker-c"].into_iter().collect();
    for (bucket, owner) in &owners {
        assert!(alive.contains(owner.as_str()), "分桶 {bucket} 归属于 {owner}");
    }
    let distinct: HashSet<&str> = owners.iter().map(|(_, o)| o.as_str()).collect();
    assert_eq!(distinct.len(), 2);

    let b_change = b.sync_ownership().await.unwrap();
    let c_change = c.sync_ownership().await.unwrap();
    assert_eq!(b_change.gained.len() + c_change.gained.len(), BUCKETS as usize);
    let overlap: HashSet<u32> = b_change.gained.iter().copied().collect();
    assert!(c_change.gained.iter().all(|bucket| !overlap.contains(bucket)));
}

#[tokio::test]
async fn test_lost_buckets_are_reported() {
    let cluster = Cluster::new();
    let a = cluster.node("broker-a");
    let b = cluster.node("broker-b");
    a.tick().await.unwrap();
    assert_eq!(a.owned_buckets().await.len(), BUCKETS as usize);

    cluster.brokers.remove("broker-a");
    b.tick().await.unwrap();
    assert_eq!(b.owned_buckets().await.len(), BUCKETS as usize);

    let change = a.sync_ownership().await.unwrap();
    assert!(change.gained.is_empty());
    assert_eq!(change.lost.len(), BUCKETS as usize);
    assert!(a.owned_buckets().await.is_empty());
}

#[tokio::test]
async fn test_rebalance_skipped_when_lock_is_held() {
    let cluster = Cluster::new();
    let node = cluster.node("broker-a");
    assert!(cluster
        .lock
        .try_lock(REBALANCE_LOCK_NAME, "broker-b", Duration::from_secs(60))
        .await
        .unwrap());

    assert_eq!(node.rebalance().await.unwrap(), RebalanceOutcome::Skipped);
    // 锁被占用时仍然同步本地归属，但没有分桶可同步
    let change = node.tick().await.unwrap();
    assert!(change.is_empty());
    assert!(cluster.owners().await.is_empty());
}

#[tokio::test]
async fn test_failed_notification_is_retried_on_next_sync() {
    let cluster = Cluster::new();
    let node = cluster.node("broker-a");
    let listener = Arc::new(FlakyListener::default());
    node.set_listener(listener.clone()).await;

    assert!(node.tick().await.is_err());
    assert!(node.owned_buckets().await.is_empty());
    assert!(listener.inner.changes.lock().unwrap().is_empty());

    let change = node.sync_ownership().await.unwrap();
    let expected: Vec<u32> = (1..=BUCKETS).collect();
    assert_eq!(change.gained, expected);
    assert_eq!(node.owned_buckets().await, expected);
    let changes = listener.inner.changes.lock().unwrap().clone();
    assert_eq!(changes, vec![(expected, Vec::new())]);
}

#[tokio::test]
async fn test_rebalance_releases_lock() {
    let cluster = Cluster::new();
    let node = cluster.node("broker-a");

    node.rebalance().await.unwrap();
    assert!(!cluster.lock.is_locked(REBALANCE_LOCK_NAME));
}

#[tokio::test]
async fn test_run_loop_stops() {
    let cluster = Cluster::new();
    let node = Arc::new(cluster.node("broker-a"));

    let runner = node.clone();
    let handle = tokio::spawn(async move { runner.run().await });

    let started = async {
        for _ in 0..50 {
            if node.is_running().await && !node.owned_buckets().await.is_empty() {
                return true;
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }
        false
    };
    assert!(started.await);

    node.stop().await;
    handle.abort();
    assert!(!node.is_running().await);
}
