use std::time::Duration;

use async_trait::async_trait;

use crate::SchedulerResult;

/// 带租约的分布式锁
///
/// 持有者崩溃后锁在租约到期时自动释放。
#[async_trait]
pub trait DistributedLock: Send + Sync {
    /// 尝试以 `holder` 身份获取锁，锁在租约内被占用时立即返回 `false`
    async fn try_lock(&self, name: &str, holder: &str, lease: Duration) -> SchedulerResult<bool>;

    /// 只释放 `holder` 自己持有的锁，租约过期后被他人抢占的锁不受影响
    async fn unlock(&self, name: &str, holder: &str) -> SchedulerResult<()>;
}

/// Broker成员注册中心
#[async_trait]
pub trait BrokerRegistry: Send + Sync {
    async fn heartbeat(&self, broker_id: &str) -> SchedulerResult<()>;

    async fn alive_broker_ids(&self) -> SchedulerResult<Vec<String>>;
}
