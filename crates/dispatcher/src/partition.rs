//! 集群分桶归属
//!
//! 在分布式锁保护下把分桶重新分配给存活的Broker，随后对比本地归属的变化并通知监听者。

use std::collections::{BTreeSet, HashSet};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::sync::RwLock;
use tracing::{debug, error, info, warn};

use scheduler_core::config::BrokerConfig;
use scheduler_core::models::Bucket;
use scheduler_core::traits::{BrokerRegistry, BucketRepository, DistributedLock};
use scheduler_core::SchedulerResult;
use scheduler_domain::{EventPublisher, SchedulerEvent};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 分桶重平衡使用的锁名
pub const REBALANCE_LOCK_NAME: &str = "bucket_rebalance";

/// 本地分桶归属变化的监听者
#[async_trait]
pub trait BucketOwnershipListener: Send + Sync {
    async fn on_buckets_changed(&self, gained: &[u32], lost: &[u32]) -> SchedulerResult<()>;
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebalanceOutcome {
    /// 其他Broker持有锁
    Skipped,
    Applied { reassigned: usize, created: usize },
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct OwnershipChange {
    pub gained: Vec<u32>,
    pub lost: Vec<u32>,
}

impl OwnershipChange {
    pub fn is_empty(&self) -> bool {
        self.gained.is_empty() && self.lost.is_empty()
    }
}

pub struct ClusterPartitioner {
    config: BrokerConfig,
    lock: Arc<dyn DistributedLock>,
    brokers: Arc<dyn BrokerRegistry>,
    bucket_repo: Arc<dyn BucketRepository>,
    listener: RwLock<Option<Arc<dyn BucketOwnershipListener>>>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
    owned: RwLock<BTreeSet<u32>>,
    running: Arc<RwLock<bool>>,
}

impl ClusterPartitioner {
    pub fn new(
        lock: Arc<dyn DistributedLock>,
        brokers: Arc<dyn BrokerRegistry>,
        bucket_repo: Arc<dyn BucketRepository>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
        config: Option<BrokerConfig>,
    ) -> Self {
        Self {
            config: config.unwrap_or_default(),
            lock,
            brokers,
            bucket_repo,
            listener: RwLock::new(None),
            events,
            metrics,
            owned: RwLock::new(BTreeSet::new()),
            running: Arc::new(RwLock::new(false)),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.config.broker_id
    }

    pub async fn set_listener(&self, listener: Arc<dyn BucketOwnershipListener>) {
        *self.listener.write().await = Some(listener);
    }

    pub async fn owned_buckets(&self) -> Vec<u32> {
        self.owned.read().await.iter().copied().collect()
    }

    /// 心跳、在锁内重平衡，然后同步本地归属
    pub async fn tick(&self) -> SchedulerResult<OwnershipChange> {
        self.brokers.heartbeat(&self.config.broker_id).await?;
        match self.rebalance().await {
            Ok(RebalanceOutcome::Skipped) => debug!("未获取到重平衡锁，本轮跳过"),
            Ok(RebalanceOutcome::Applied { .. }) => {}
            Err(e) => warn!("分桶重平衡失败: {}", e),
        }
        // 其他Broker的重平衡也可能改变本地归属
        self.sync_ownership().await
    }

    /// 在分布式锁保护下执行一次重平衡，锁总是会被释放
    pub async fn rebalance(&self) -> SchedulerResult<RebalanceOutcome> {
        let lease = Duration::from_secs(self.config.lock_lease_seconds);
        if !self
            .lock
            .try_lock(REBALANCE_LOCK_NAME, &self.config.broker_id, lease)
            .await?
        {
            self.metrics.record_rebalance(false);
            return Ok(RebalanceOutcome::Skipped);
        }

        let result = self.rebalance_locked().await;
        if let Err(e) = self
            .lock
            .unlock(REBALANCE_LOCK_NAME, &self.config.broker_id)
            .await
        {
            warn!("释放重平衡锁失败: {}", e);
        }

        let outcome = result?;
        self.metrics.record_rebalance(true);
        Ok(outcome)
    }

    async fn rebalance_locked(&self) -> SchedulerResult<RebalanceOutcome> {
        let mut alive = self.brokers.alive_broker_ids().await?;
        alive.push(self.config.broker_id.clone());
        alive.sort();
        alive.dedup();
        let alive_set: HashSet<&str> = alive.iter().map(String::as_str).collect();

        let buckets = self.bucket_repo.list().await?;
        let mut reassigned = 0;
        for bucket in &buckets {
            if alive_set.contains(bucket.broker_id.as_str()) {
                continue;
            }
            let owner = &alive[bucket.bucket as usize % alive.len()];
            self.bucket_repo.update_owner(bucket.bucket, owner).await?;
            debug!("分桶 {} 从 {} 转移到 {}", bucket.bucket, bucket.broker_id, owner);
            reassigned += 1;
        }

        let existing: HashSet<u32> = buckets.iter().map(|b| b.bucket).collect();
        let mut created = 0;
        for number in 1..=self.config.bucket_count {
            if existing.contains(&number) {
                continue;
            }
            if self
                .bucket_repo
                .insert_if_absent(&Bucket::new(number, self.config.broker_id.clone()))
                .await?
            {
                created += 1;
            }
        }

        StructuredLogger::log_buckets_rebalanced(&self.config.broker_id, alive.len(), reassigned);
        if created > 0 {
            info!("新建 {} 个分桶并归属到 {}", created, self.config.broker_id);
        }
        Ok(RebalanceOutcome::Applied {
            reassigned,
            created,
        })
    }

    /// 读取分桶表，计算本地归属的变化并通知监听者
    ///
    /// 监听者处理成功后才提交新的归属，失败时下一轮会重新得到同样的变化。
    pub async fn sync_ownership(&self) -> SchedulerResult<OwnershipChange> {
        let mine: BTreeSet<u32> = self
            .bucket_repo
            .list()
            .await?
            .into_iter()
            .filter(|b| b.broker_id == self.config.broker_id)
            .map(|b| b.bucket)
            .collect();

        let mut owned = self.owned.write().await;
        let change = OwnershipChange {
            gained: mine.difference(&owned).copied().collect(),
            lost: owned.difference(&mine).copied().collect(),
        };
        if change.is_empty() {
            return Ok(change);
        }

        StructuredLogger::log_bucket_ownership_changed(
            &self.config.broker_id,
            &change.gained,
            &change.lost,
        );

        let listener = self.listener.read().await.clone();
        if let Some(listener) = listener {
            listener
                .on_buckets_changed(&change.gained, &change.lost)
                .await?;
        }
        *owned = mine;
        self.metrics.set_owned_buckets(owned.len());
        drop(owned);

        if let Err(e) = self
            .events
            .publish(SchedulerEvent::buckets_rebalanced(
                self.config.broker_id.clone(),
                change.gained.clone(),
                change.lost.clone(),
            ))
            .await
        {
            warn!("发布分桶变化事件失败: {}", e);
        }

        Ok(change)
    }

    /// 周期性重平衡循环，直到 `stop` 被调用
    pub async fn run(&self) -> SchedulerResult<()> {
        {
            let mut running = self.running.write().await;
            if *running {
                warn!("分桶重平衡循环已经在运行");
                return Ok(());
            }
            *running = true;
        }

        info!(
            "启动分桶重平衡循环，间隔: {}秒",
            self.config.rebalance_interval_seconds
        );
        let interval = Duration::from_secs(self.config.rebalance_interval_seconds);
        loop {
            if !*self.running.read().await {
                break;
            }
            if let Err(e) = self.tick().await {
                error!("分桶重平衡周期执行失败: {}", e);
            }
            tokio::time::sleep(interval).await;
        }
        info!("分桶重平衡循环已停止");
        Ok(())
    }

    pub async fn stop(&self) {
        *self.running.write().await = false;
    }

    pub async fn is_running(&self) -> bool {
        *self.running.read().await
    }
}
