use std::collections::HashMap;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{DispatchPayload, Worker};
use crate::SchedulerResult;

/// Worker注册中心，返回的存活状态来自心跳
#[async_trait]
pub trait WorkerRegistry: Send + Sync {
    async fn all_by_app(&self, app_id: &str) -> SchedulerResult<Vec<Worker>>;
}

/// Worker传输层
#[async_trait]
pub trait WorkerTransport: Send + Sync {
    /// 请求Worker执行任务，返回Worker是否接受
    async fn dispatch(
        &self,
        worker: &Worker,
        payload: &DispatchPayload,
        timeout: Duration,
    ) -> SchedulerResult<bool>;
}

/// 单个Worker在统计窗口内的使用情况
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct WorkerUsage {
    pub dispatch_count: u64,
    pub last_used_at: Option<DateTime<Utc>>,
}

/// 使用统计提供方，供 LFU / LRU 负载均衡使用
#[async_trait]
pub trait UsageStatistics: Send + Sync {
    async fn usage(
        &self,
        server_ids: &[String],
        window: Duration,
    ) -> SchedulerResult<HashMap<String, WorkerUsage>>;

    async fn record(&self, server_id: &str, at: DateTime<Utc>) -> SchedulerResult<()>;
}
