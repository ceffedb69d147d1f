//! 数据仓储层接口定义
//!
//! 调度核心只依赖以下抽象，具体存储由外部协作方实现：
//! - 调度计划仓储 (ScheduleRepository)
//! - 作业定义仓储 (JobRepository)
//! - 执行实例 / 任务仓储 (ExecutionRepository / TaskRepository)
//! - 分桶归属仓储 (BucketRepository)
//! - 序列仓储 (SequenceRepository)
//!
//! 所有接口都是异步的，返回 `SchedulerResult<T>`，实现需满足 `Send + Sync`。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::models::{Bucket, Execution, Job, Schedule, Task};
use crate::SchedulerResult;

#[async_trait]
pub trait ScheduleRepository: Send + Sync {
    async fn get(&self, id: i64) -> SchedulerResult<Option<Schedule>>;

    /// 乐观并发写入：`expected_version` 为 `None` 时要求记录不存在，
    /// 否则要求已存储记录的版本与之相同，不满足时返回 `VersionConflict`
    async fn upsert(&self, schedule: &Schedule, expected_version: Option<&str>)
        -> SchedulerResult<()>;

    async fn update_trigger_state(
        &self,
        id: i64,
        last_trigger_at: DateTime<Utc>,
        next_trigger_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()>;

    async fn update_feedback(&self, id: i64, feedback_at: DateTime<Utc>) -> SchedulerResult<()>;

    async fn update_owner(&self, id: i64, broker_id: &str) -> SchedulerResult<()>;

    /// 查询归属于指定Broker、且在 `since` 之后更新过的调度计划（增量加载）
    async fn find_owned_since(
        &self,
        broker_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<Schedule>>;

    /// 查询落在指定分桶内的全部未删除调度计划
    async fn find_by_buckets(
        &self,
        buckets: &[u32],
        bucket_count: u32,
    ) -> SchedulerResult<Vec<Schedule>>;
}

#[async_trait]
pub trait JobRepository: Send + Sync {
    async fn get(&self, id: i64) -> SchedulerResult<Option<Job>>;
    async fn save(&self, job: &Job) -> SchedulerResult<()>;
}

#[async_trait]
pub trait ExecutionRepository: Send + Sync {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution>;
    async fn get(&self, id: i64) -> SchedulerResult<Option<Execution>>;
    async fn update(&self, execution: &Execution) -> SchedulerResult<()>;
}

#[async_trait]
pub trait TaskRepository: Send + Sync {
    /// 创建任务并分配ID
    async fn create(&self, task: &Task) -> SchedulerResult<Task>;

    /// 同一执行实例下同一工作流节点只允许创建一次，已存在时返回 `None`
    async fn create_if_absent(&self, task: &Task) -> SchedulerResult<Option<Task>>;

    async fn get(&self, id: i64) -> SchedulerResult<Option<Task>>;
    async fn update(&self, task: &Task) -> SchedulerResult<()>;
    async fn find_by_execution(&self, execution_id: i64) -> SchedulerResult<Vec<Task>>;
}

#[async_trait]
pub trait BucketRepository: Send + Sync {
    async fn list(&self) -> SchedulerResult<Vec<Bucket>>;
    async fn update_owner(&self, bucket: u32, broker_id: &str) -> SchedulerResult<()>;

    /// 首个写入者胜出，记录已存在时返回 `false`
    async fn insert_if_absent(&self, bucket: &Bucket) -> SchedulerResult<bool>;
}

#[async_trait]
pub trait SequenceRepository: Send + Sync {
    /// 查询键对应的最后一个值
    async fn find_last(&self, key: &str) -> SchedulerResult<Option<i64>>;

    /// 原子地生成键的下一个值
    async fn next_value(&self, key: &str) -> SchedulerResult<i64>;
}
