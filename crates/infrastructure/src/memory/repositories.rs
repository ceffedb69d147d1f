//! 仓储接口的内存实现
//!
//! 单进程部署和测试使用，语义与持久化实现一致：
//! 乐观版本校验、(执行实例, 节点) 唯一约束、分桶首写胜出。

use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::RwLock;

use scheduler_core::hashing::bucket_of;
use scheduler_core::models::{Bucket, Execution, Job, Schedule, Task};
use scheduler_core::traits::{
    BucketRepository, ExecutionRepository, JobRepository, ScheduleRepository, SequenceRepository,
    TaskRepository,
};
use scheduler_core::{SchedulerError, SchedulerResult};

#[derive(Debug, Clone, Default)]
pub struct InMemoryScheduleRepository {
    schedules: Arc<RwLock<HashMap<i64, Schedule>>>,
}

impl InMemoryScheduleRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn count(&self) -> usize {
        self.schedules.read().await.len()
    }
}

#[async_trait]
impl ScheduleRepository for InMemoryScheduleRepository {
    async fn get(&self, id: i64) -> SchedulerResult<Option<Schedule>> {
        Ok(self.schedules.read().await.get(&id).cloned())
    }

    async fn upsert(
        &self,
        schedule: &Schedule,
        expected_version: Option<&str>,
    ) -> SchedulerResult<()> {
        let mut schedules = self.schedules.write().await;
        let current = schedules.get(&schedule.id).map(|s| s.version.as_str());
        if current != expected_version {
            return Err(SchedulerError::VersionConflict {
                id: schedule.id,
                expected: expected_version.unwrap_or("<none>").to_string(),
            });
        }

        let mut stored = schedule.clone();
        stored.updated_at = Utc::now();
        schedules.insert(stored.id, stored);
        Ok(())
    }

    async fn update_trigger_state(
        &self,
        id: i64,
        last_trigger_at: DateTime<Utc>,
        next_trigger_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&id)
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        schedule.last_trigger_at = Some(last_trigger_at);
        schedule.next_trigger_at = next_trigger_at;
        Ok(())
    }

    async fn update_feedback(&self, id: i64, feedback_at: DateTime<Utc>) -> SchedulerResult<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&id)
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        schedule.last_feedback_at = Some(feedback_at);
        Ok(())
    }

    async fn update_owner(&self, id: i64, broker_id: &str) -> SchedulerResult<()> {
        let mut schedules = self.schedules.write().await;
        let schedule = schedules
            .get_mut(&id)
            .ok_or(SchedulerError::ScheduleNotFound { id })?;
        schedule.broker_id = Some(broker_id.to_string());
        schedule.updated_at = Utc::now();
        Ok(())
    }

    async fn find_owned_since(
        &self,
        broker_id: &str,
        since: Option<DateTime<Utc>>,
    ) -> SchedulerResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut owned: Vec<Schedule> = schedules
            .values()
            .filter(|s| s.broker_id.as_deref() == Some(broker_id))
            .filter(|s| since.map_or(true, |since| s.updated_at > since))
            .cloned()
            .collect();
        owned.sort_by_key(|s| s.id);
        Ok(owned)
    }

    async fn find_by_buckets(
        &self,
        buckets: &[u32],
        bucket_count: u32,
    ) -> SchedulerResult<Vec<Schedule>> {
        let schedules = self.schedules.read().await;
        let mut found: Vec<Schedule> = schedules
            .values()
            .filter(|s| !s.deleted && buckets.contains(&bucket_of(s.id, bucket_count)))
            .cloned()
            .collect();
        found.sort_by_key(|s| s.id);
        Ok(found)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryJobRepository {
    jobs: Arc<RwLock<HashMap<i64, Job>>>,
}

impl InMemoryJobRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl JobRepository for InMemoryJobRepository {
    async fn get(&self, id: i64) -> SchedulerResult<Option<Job>> {
        Ok(self.jobs.read().await.get(&id).cloned())
    }

    async fn save(&self, job: &Job) -> SchedulerResult<()> {
        self.jobs.write().await.insert(job.id, job.clone());
        Ok(())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryExecutionRepository {
    executions: Arc<RwLock<HashMap<i64, Execution>>>,
}

impl InMemoryExecutionRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl ExecutionRepository for InMemoryExecutionRepository {
    async fn create(&self, execution: &Execution) -> SchedulerResult<Execution> {
        let mut executions = self.executions.write().await;
        if executions.contains_key(&execution.id) {
            return Err(SchedulerError::Internal(format!(
                "执行实例已存在: {}",
                execution.id
            )));
        }
        executions.insert(execution.id, execution.clone());
        Ok(execution.clone())
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<Execution>> {
        Ok(self.executions.read().await.get(&id).cloned())
    }

    async fn update(&self, execution: &Execution) -> SchedulerResult<()> {
        let mut executions = self.executions.write().await;
        match executions.get_mut(&execution.id) {
            Some(stored) => {
                *stored = execution.clone();
                Ok(())
            }
            None => Err(SchedulerError::ExecutionNotFound { id: execution.id }),
        }
    }
}

#[derive(Debug, Default)]
struct TaskTable {
    tasks: BTreeMap<i64, Task>,
    next_id: i64,
}

impl TaskTable {
    fn insert(&mut self, task: &Task) -> Task {
        self.next_id += 1;
        let mut created = task.clone();
        created.id = self.next_id;
        self.tasks.insert(created.id, created.clone());
        created
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryTaskRepository {
    table: Arc<RwLock<TaskTable>>,
}

impl InMemoryTaskRepository {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn all(&self) -> Vec<Task> {
        self.table.read().await.tasks.values().cloned().collect()
    }
}

#[async_trait]
impl TaskRepository for InMemoryTaskRepository {
    async fn create(&self, task: &Task) -> SchedulerResult<Task> {
        Ok(self.table.write().await.insert(task))
    }

    async fn create_if_absent(&self, task: &Task) -> SchedulerResult<Option<Task>> {
        let mut table = self.table.write().await;
        let exists = table
            .tasks
            .values()
            .any(|t| t.execution_id == task.execution_id && t.ref_id == task.ref_id);
        if exists {
            return Ok(None);
        }
        Ok(Some(table.insert(task)))
    }

    async fn get(&self, id: i64) -> SchedulerResult<Option<Task>> {
        Ok(self.table.read().await.tasks.get(&id).cloned())
    }

    async fn update(&self, task: &Task) -> SchedulerResult<()> {
        let mut table = self.table.write().await;
        match table.tasks.get_mut(&task.id) {
            Some(stored) => {
                *stored = task.clone();
                Ok(())
            }
            None => Err(SchedulerError::TaskNotFound { id: task.id }),
        }
    }

    async fn find_by_execution(&self, execution_id: i64) -> SchedulerResult<Vec<Task>> {
        Ok(self
            .table
            .read()
            .await
            .tasks
            .values()
            .filter(|t| t.execution_id == execution_id)
            .cloned()
            .collect())
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemoryBucketRepository {
    buckets: Arc<RwLock<BTreeMap<u32, Bucket>>>,
}

impl InMemoryBucketRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl BucketRepository for InMemoryBucketRepository {
    async fn list(&self) -> SchedulerResult<Vec<Bucket>> {
        Ok(self.buckets.read().await.values().cloned().collect())
    }

    async fn update_owner(&self, bucket: u32, broker_id: &str) -> SchedulerResult<()> {
        let mut buckets = self.buckets.write().await;
        let row = buckets
            .get_mut(&bucket)
            .ok_or_else(|| SchedulerError::Internal(format!("分桶不存在: {bucket}")))?;
        row.broker_id = broker_id.to_string();
        row.updated_at = Utc::now();
        Ok(())
    }

    async fn insert_if_absent(&self, bucket: &Bucket) -> SchedulerResult<bool> {
        let mut buckets = self.buckets.write().await;
        if buckets.contains_key(&bucket.bucket) {
            return Ok(false);
        }
        buckets.insert(bucket.bucket, bucket.clone());
        Ok(true)
    }
}

#[derive(Debug, Clone, Default)]
pub struct InMemorySequenceRepository {
    values: Arc<RwLock<HashMap<String, i64>>>,
}

impl InMemorySequenceRepository {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl SequenceRepository for InMemorySequenceRepository {
    async fn find_last(&self, key: &str) -> SchedulerResult<Option<i64>> {
        Ok(self.values.read().await.get(key).copied())
    }

    async fn next_value(&self, key: &str) -> SchedulerResult<i64> {
        let mut values = self.values.write().await;
        let value = values.entry(key.to_string()).or_insert(0);
        *value += 1;
        Ok(*value)
    }
}
