//! 分布式协调原语的内存实现

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tracing::debug;

use scheduler_core::traits::{BrokerRegistry, DistributedLock};
use scheduler_core::SchedulerResult;

#[derive(Debug, Clone)]
struct Lease {
    holder: String,
    expires_at: Instant,
}

/// 带租约的锁，租约到期后其他调用方可以直接抢占
#[derive(Debug, Clone, Default)]
pub struct InMemoryLeaseLock {
    leases: Arc<DashMap<String, Lease>>,
}

impl InMemoryLeaseLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_locked(&self, name: &str) -> bool {
        self.leases
            .get(name)
            .map(|lease| lease.expires_at > Instant::now())
            .unwrap_or(false)
    }

    pub fn holder(&self, name: &str) -> Option<String> {
        self.leases
            .get(name)
            .filter(|lease| lease.expires_at > Instant::now())
            .map(|lease| lease.holder.clone())
    }
}

#[async_trait]
impl DistributedLock for InMemoryLeaseLock {
    async fn try_lock(&self, name: &str, holder: &str, lease: Duration) -> SchedulerResult<bool> {
        let now = Instant::now();
        let granted = Lease {
            holder: holder.to_string(),
            expires_at: now + lease,
        };
        match self.leases.entry(name.to_string()) {
            Entry::Occupied(mut entry) => {
                if entry.get().expires_at > now {
                    return Ok(false);
                }
                debug!(
                    "锁 {} 原持有者 {} 的租约已过期，由 {} 重新获取",
                    name,
                    entry.get().holder,
                    holder
                );
                entry.insert(granted);
                Ok(true)
            }
            Entry::Vacant(entry) => {
                entry.insert(granted);
                Ok(true)
            }
        }
    }

    async fn unlock(&self, name: &str, holder: &str) -> SchedulerResult<()> {
        if self
            .leases
            .remove_if(name, |_, lease| lease.holder == holder)
            .is_none()
        {
            debug!("锁 {} 已不由 {} 持有，忽略释放", name, holder);
        }
        Ok(())
    }
}

/// Broker心跳表，超时未上报的Broker视为下线
#[derive(Debug, Clone)]
pub struct InMemoryBrokerRegistry {
    heartbeats: Arc<DashMap<String, DateTime<Utc>>>,
    timeout: chrono::Duration,
}

impl InMemoryBrokerRegistry {
    pub fn new(heartbeat_timeout_seconds: i64) -> Self {
        Self {
            heartbeats: Arc::new(DashMap::new()),
            timeout: chrono::Duration::seconds(heartbeat_timeout_seconds),
        }
    }

    /// 模拟Broker崩溃
    pub fn remove(&self, broker_id: &str) {
        self.heartbeats.remove(broker_id);
    }
}

#[async_trait]
impl BrokerRegistry for InMemoryBrokerRegistry {
    async fn heartbeat(&self, broker_id: &str) -> SchedulerResult<()> {
        self.heartbeats.insert(broker_id.to_string(), Utc::now());
        Ok(())
    }

    async fn alive_broker_ids(&self) -> SchedulerResult<Vec<String>> {
        let now = Utc::now();
        let mut alive: Vec<String> = self
            .heartbeats
            .iter()
            .filter(|entry| now - *entry.value() <= self.timeout)
            .map(|entry| entry.key().clone())
            .collect();
        alive.sort();
        Ok(alive)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_lease_lock_is_exclusive_until_expiry() {
        let lock = InMemoryLeaseLock::new();
        assert!(lock.try_lock("rebalance", "a", Duration::from_millis(50)).await.unwrap());
        assert!(!lock.try_lock("rebalance", "b", Duration::from_millis(50)).await.unwrap());

        tokio::time::sleep(Duration::from_millis(80)).await;
        // 持有者崩溃后租约到期即可被抢占
        assert!(lock.try_lock("rebalance", "b", Duration::from_secs(5)).await.unwrap());
        assert_eq!(lock.holder("rebalance").as_deref(), Some("b"));

        lock.unlock("rebalance", "b").await.unwrap();
        assert!(!lock.is_locked("rebalance"));
    }

    #[tokio::test]
    async fn test_expired_holder_cannot_release_new_lease() {
        let lock = InMemoryLeaseLock::new();
        assert!(lock.try_lock("rebalance", "a", Duration::from_millis(30)).await.unwrap());
        tokio::time::sleep(Duration::from_millis(60)).await;
        assert!(lock.try_lock("rebalance", "b", Duration::from_secs(5)).await.unwrap());

        // a 在租约过期后才完成工作并释放
        lock.unlock("rebalance", "a").await.unwrap();
        assert!(lock.is_locked("rebalance"));
        assert_eq!(lock.holder("rebalance").as_deref(), Some("b"));
        assert!(!lock.try_lock("rebalance", "c", Duration::from_secs(5)).await.unwrap());
    }

    #[tokio::test]
    async fn test_broker_registry_timeout() {
        let registry = InMemoryBrokerRegistry::new(30);
        registry.heartbeat("b").await.unwrap();
        registry.heartbeat("a").await.unwrap();
        assert_eq!(registry.alive_broker_ids().await.unwrap(), vec!["a", "b"]);

        let expired = InMemoryBrokerRegistry::new(-1);
        expired.heartbeat("a").await.unwrap();
        assert!(expired.alive_broker_ids().await.unwrap().is_empty());
    }
}
