//! Worker注册表与使用统计的内存实现
//!
//! 注册表实例由调用方持有并注入，不使用进程级全局状态。

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tracing::info;

use scheduler_core::models::{Worker, WorkerMetrics, WorkerStatus};
use scheduler_core::traits::{UsageStatistics, WorkerRegistry, WorkerUsage};
use scheduler_core::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone)]
pub struct InMemoryWorkerRegistry {
    /// 地址 -> Worker
    workers: Arc<DashMap<String, Worker>>,
    heartbeat_timeout_seconds: i64,
}

impl InMemoryWorkerRegistry {
    pub fn new(heartbeat_timeout_seconds: i64) -> Self {
        Self {
            workers: Arc::new(DashMap::new()),
            heartbeat_timeout_seconds,
        }
    }

    pub fn register(&self, worker: Worker) {
        info!("注册Worker: {} (应用 {})", worker.address, worker.app_id);
        self.workers.insert(worker.address.clone(), worker);
    }

    pub fn unregister(&self, address: &str) -> Option<Worker> {
        self.workers.remove(address).map(|(_, worker)| worker)
    }

    pub fn heartbeat(&self, address: &str, metrics: WorkerMetrics) -> SchedulerResult<()> {
        let mut worker = self
            .workers
            .get_mut(address)
            .ok_or_else(|| SchedulerError::Internal(format!("Worker未注册: {address}")))?;
        worker.metrics = metrics;
        worker.status = WorkerStatus::Alive;
        Ok(())
    }

    pub fn len(&self) -> usize {
        self.workers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.workers.is_empty()
    }
}

#[async_trait]
impl WorkerRegistry for InMemoryWorkerRegistry {
    async fn all_by_app(&self, app_id: &str) -> SchedulerResult<Vec<Worker>> {
        let mut workers: Vec<Worker> = self
            .workers
            .iter()
            .filter(|entry| entry.app_id == app_id)
            .map(|entry| {
                let mut worker = entry.value().clone();
                if worker.is_heartbeat_expired(self.heartbeat_timeout_seconds) {
                    worker.status = WorkerStatus::Down;
                }
                worker
            })
            .collect();
        workers.sort_by(|a, b| a.address.cmp(&b.address));
        Ok(workers)
    }
}

/// 记录每个Worker被分发的时间点
#[derive(Debug, Clone, Default)]
pub struct InMemoryUsageStatistics {
    dispatches: Arc<DashMap<String, Vec<DateTime<Utc>>>>,
}

impl InMemoryUsageStatistics {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl UsageStatistics for InMemoryUsageStatistics {
    async fn usage(
        &self,
        server_ids: &[String],
        window: Duration,
    ) -> SchedulerResult<HashMap<String, WorkerUsage>> {
        let window = chrono::Duration::from_std(window)
            .map_err(|e| SchedulerError::Internal(format!("无效的统计窗口: {e}")))?;
        let since = Utc::now() - window;

        Ok(server_ids
            .iter()
            .map(|id| {
                let usage = self
                    .dispatches
                    .get(id)
                    .map(|times| {
                        let recent: Vec<_> = times.iter().filter(|t| **t >= since).collect();
                        WorkerUsage {
                            dispatch_count: recent.len() as u64,
                            last_used_at: recent.into_iter().max().copied(),
                        }
                    })
                    .unwrap_or_default();
                (id.clone(), usage)
            })
            .collect())
    }

    async fn record(&self, server_id: &str, at: DateTime<Utc>) -> SchedulerResult<()> {
        self.dispatches
            .entry(server_id.to_string())
            .or_default()
            .push(at);
        Ok(())
    }
}
