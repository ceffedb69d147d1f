use std::collections::{BTreeMap, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use rand::Rng;
use tracing::debug;

use scheduler_core::hashing::stable_hash;
use scheduler_core::models::{LoadBalanceKind, Worker};
use scheduler_core::traits::UsageStatistics;
use scheduler_core::{SchedulerError, SchedulerResult};

/// 一次选择调用的上下文
#[derive(Debug, Clone, Default)]
pub struct SelectionContext {
    /// 一致性哈希使用的调用键
    pub invocation_key: String,
    /// APPOINT 策略指定的Worker
    pub appoint_server: Option<String>,
}

impl SelectionContext {
    pub fn new(invocation_key: impl Into<String>) -> Self {
        Self {
            invocation_key: invocation_key.into(),
            appoint_server: None,
        }
    }

    pub fn with_appoint_server(mut self, server: Option<String>) -> Self {
        self.appoint_server = server;
        self
    }
}

/// 负载均衡策略，候选为空时返回 `None` 而不是错误
#[async_trait]
pub trait LoadBalanceStrategy: Send + Sync {
    async fn select(
        &self,
        context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>>;

    fn kind(&self) -> LoadBalanceKind;
}

pub struct RandomStrategy;

impl RandomStrategy {
    pub fn new() -> Self {
        Self
    }
}

impl Default for RandomStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalanceStrategy for RandomStrategy {
    async fn select(
        &self,
        _context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>> {
        if workers.is_empty() {
            return Ok(None);
        }
        let index = rand::rng().random_range(0..workers.len());
        debug!("随机策略选择Worker: {}", workers[index].address);
        Ok(Some(workers[index].clone()))
    }

    fn kind(&self) -> LoadBalanceKind {
        LoadBalanceKind::Random
    }
}

pub struct RoundRobinStrategy {
    counter: AtomicUsize,
}

impl RoundRobinStrategy {
    pub fn new() -> Self {
        Self {
            counter: AtomicUsize::new(0),
        }
    }
}

impl Default for RoundRobinStrategy {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl LoadBalanceStrategy for RoundRobinStrategy {
    async fn select(
        &self,
        _context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>> {
        if workers.is_empty() {
            debug!("没有可用的Worker节点");
            return Ok(None);
        }
        let index = self.counter.fetch_add(1, Ordering::Relaxed) % workers.len();
        debug!(
            "轮询策略选择Worker: {} (索引: {}/{})",
            workers[index].address,
            index,
            workers.len()
        );
        Ok(Some(workers[index].clone()))
    }

    fn kind(&self) -> LoadBalanceKind {
        LoadBalanceKind::RoundRobin
    }
}

/// 指定Worker，指定的Worker不在候选中时不选择任何Worker
pub struct AppointStrategy;

#[async_trait]
impl LoadBalanceStrategy for AppointStrategy {
    async fn select(
        &self,
        context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>> {
        let Some(server) = context.appoint_server.as_deref() else {
            return Err(SchedulerError::LoadBalance(
                "APPOINT 策略未指定Worker".to_string(),
            ));
        };
        let selected = workers.iter().find(|w| w.server_id() == server).cloned();
        if selected.is_none() {
            debug!("指定的Worker {} 不在候选列表中", server);
        }
        Ok(selected)
    }

    fn kind(&self) -> LoadBalanceKind {
        LoadBalanceKind::Appoint
    }
}

/// 基于使用统计的策略：最少使用次数 / 最久未使用
pub struct UsageStrategy {
    kind: LoadBalanceKind,
    statistics: Arc<dyn UsageStatistics>,
    window: Duration,
}

impl UsageStrategy {
    pub fn least_frequently_used(statistics: Arc<dyn UsageStatistics>, window: Duration) -> Self {
        Self {
            kind: LoadBalanceKind::LeastFrequentlyUsed,
            statistics,
            window,
        }
    }

    pub fn least_recently_used(statistics: Arc<dyn UsageStatistics>, window: Duration) -> Self {
        Self {
            kind: LoadBalanceKind::LeastRecentlyUsed,
            statistics,
            window,
        }
    }
}

#[async_trait]
impl LoadBalanceStrategy for UsageStrategy {
    async fn select(
        &self,
        _context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>> {
        if workers.is_empty() {
            return Ok(None);
        }

        let server_ids: Vec<String> = workers.iter().map(|w| w.server_id().to_string()).collect();
        let usage = self
            .statistics
            .usage(&server_ids, self.window)
            .await
            .map_err(|e| SchedulerError::LoadBalance(format!("获取使用统计失败: {e}")))?;

        let stats_of = |w: &Worker| usage.get(w.server_id()).cloned().unwrap_or_default();
        // min_by_key 在相等时保留第一个，候选顺序即为平局的决胜规则
        let selected = match self.kind {
            LoadBalanceKind::LeastFrequentlyUsed => {
                workers.iter().min_by_key(|w| stats_of(w).dispatch_count)
            }
            _ => workers.iter().min_by_key(|w| stats_of(w).last_used_at),
        };

        if let Some(worker) = selected {
            debug!("{} 策略选择Worker: {}", self.kind, worker.address);
        }
        Ok(selected.cloned())
    }

    fn kind(&self) -> LoadBalanceKind {
        self.kind
    }
}

/// 一致性哈希，每个Worker在环上占多个虚拟节点
pub struct ConsistentHashStrategy {
    virtual_nodes: usize,
}

impl ConsistentHashStrategy {
    pub const DEFAULT_VIRTUAL_NODES: usize = 16;

    pub fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
        }
    }

    fn ring<'a>(&self, workers: &'a [Worker]) -> BTreeMap<u64, &'a Worker> {
        let mut ring = BTreeMap::new();
        for worker in workers {
            for i in 0..self.virtual_nodes {
                let key = format!("{}#{}", worker.server_id(), i);
                ring.insert(stable_hash(key.as_bytes()), worker);
            }
        }
        ring
    }
}

impl Default for ConsistentHashStrategy {
    fn default() -> Self {
        Self::new(Self::DEFAULT_VIRTUAL_NODES)
    }
}

#[async_trait]
impl LoadBalanceStrategy for ConsistentHashStrategy {
    async fn select(
        &self,
        context: &SelectionContext,
        workers: &[Worker],
    ) -> SchedulerResult<Option<Worker>> {
        if workers.is_empty() {
            return Ok(None);
        }
        let ring = self.ring(workers);
        let position = stable_hash(context.invocation_key.as_bytes());
        let selected = ring
            .range(position..)
            .next()
            .or_else(|| ring.iter().next())
            .map(|(_, worker)| (*worker).clone());
        Ok(selected)
    }

    fn kind(&self) -> LoadBalanceKind {
        LoadBalanceKind::ConsistentHash
    }
}

/// 按负载均衡类型查找策略实例
pub struct LoadBalancers {
    strategies: HashMap<LoadBalanceKind, Arc<dyn LoadBalanceStrategy>>,
}

impl LoadBalancers {
    pub fn new(statistics: Arc<dyn UsageStatistics>, usage_window: Duration) -> Self {
        let strategies: Vec<Arc<dyn LoadBalanceStrategy>> = vec![
            Arc::new(RandomStrategy::new()),
            Arc::new(RoundRobinStrategy::new()),
            Arc::new(AppointStrategy),
            Arc::new(UsageStrategy::least_frequently_used(
                statistics.clone(),
                usage_window,
            )),
            Arc::new(UsageStrategy::least_recently_used(statistics, usage_window)),
            Arc::new(ConsistentHashStrategy::default()),
        ];
        Self {
            strategies: strategies.into_iter().map(|s| (s.kind(), s)).collect(),
        }
    }

    pub fn get(&self, kind: LoadBalanceKind) -> SchedulerResult<Arc<dyn LoadBalanceStrategy>> {
        self.strategies
            .get(&kind)
            .cloned()
            .ok_or_else(|| SchedulerError::InvalidLoadBalance(kind.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn workers(n: usize) -> Vec<Worker> {
        (0..n)
            .map(|i| Worker::new("app", format!("10.0.0.{i}:8080")))
            .collect()
    }

    #[tokio::test]
    async fn test_round_robin_cycles() {
        let strategy = RoundRobinStrategy::new();
        let workers = workers(3);
        let ctx = SelectionContext::default();
        let mut picked = Vec::new();
        for _ in 0..6 {
            picked.push(strategy.select(&ctx, &workers).await.unwrap().unwrap().address);
        }
        assert_eq!(picked[0], picked[3]);
        assert_eq!(picked[1], picked[4]);
        assert_ne!(picked[0], picked[1]);
    }

    #[tokio::test]
    async fn test_empty_candidates_yield_none() {
        let ctx = SelectionContext::new("k");
        assert!(RandomStrategy::new().select(&ctx, &[]).await.unwrap().is_none());
        assert!(ConsistentHashStrategy::default()
            .select(&ctx, &[])
            .await
            .unwrap()
            .is_none());
    }

    #[tokio::test]
    async fn test_appoint_requires_server() {
        let workers = workers(2);
        let err = AppointStrategy
            .select(&SelectionContext::default(), &workers)
            .await
            .unwrap_err();
        assert!(matches!(err, SchedulerError::LoadBalance(_)));

        let ctx = SelectionContext::default().with_appoint_server(Some("10.0.0.1:8080".into()));
        let selected = AppointStrategy.select(&ctx, &workers).await.unwrap().unwrap();
        assert_eq!(selected.address, "10.0.0.1:8080");
    }

    #[tokio::test]
    async fn test_consistent_hash_is_stable() {
        let strategy = ConsistentHashStrategy::default();
        let workers = workers(5);
        let ctx = SelectionContext::new("job-42");
        let first = strategy.select(&ctx, &workers).await.unwrap().unwrap();
        for _ in 0..10 {
            let again = strategy.select(&ctx, &workers).await.unwrap().unwrap();
            assert_eq!(again.address, first.address);
        }

        let mut reversed = workers.clone();
        reversed.reverse();
        let reordered = strategy.select(&ctx, &reversed).await.unwrap().unwrap();
        assert_eq!(reordered.address, first.address);
    }
}
