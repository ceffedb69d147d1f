//! 调度计划管理
//!
//! 只为分桶归属于本Broker的调度计划装载定时器，分桶归属变化时停止或重新装载。

use std::collections::HashSet;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::DashMap;
use tokio::sync::{Mutex, RwLock};
use tracing::{debug, info};

use scheduler_core::config::{BrokerConfig, WorkflowConfig};
use scheduler_core::hashing::bucket_of;
use scheduler_core::models::{Execution, JobTarget, Schedule, ScheduleKind};
use scheduler_core::traits::{BucketRepository, JobRepository, ScheduleRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    next_trigger, validate_option, validate_workflow, PublishScheduleCommand, NEVER_TRIGGER_AT,
};
use scheduler_infrastructure::StructuredLogger;

use crate::dispatch_service::ExecutionListener;
use crate::launcher::{ScheduleFireBody, ScheduleLauncher};
use crate::partition::BucketOwnershipListener;
use crate::timer::{ScheduledTimer, TimerEngine};

pub struct ScheduleManager {
    broker_id: String,
    bucket_count: u32,
    schedule_repo: Arc<dyn ScheduleRepository>,
    job_repo: Arc<dyn JobRepository>,
    bucket_repo: Arc<dyn BucketRepository>,
    launcher: Arc<ScheduleLauncher>,
    timers: TimerEngine,
    workflow_config: WorkflowConfig,
    owned_buckets: RwLock<HashSet<u32>>,
    /// 已装载的调度计划及装载时的版本
    armed: DashMap<i64, String>,
    manual_sequence: AtomicU64,
    last_reload: Mutex<Option<DateTime<Utc>>>,
}

impl ScheduleManager {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        job_repo: Arc<dyn JobRepository>,
        bucket_repo: Arc<dyn BucketRepository>,
        launcher: Arc<ScheduleLauncher>,
        timers: TimerEngine,
        broker_config: Option<BrokerConfig>,
        workflow_config: Option<WorkflowConfig>,
    ) -> Self {
        let broker_config = broker_config.unwrap_or_default();
        Self {
            broker_id: broker_config.broker_id,
            bucket_count: broker_config.bucket_count,
            schedule_repo,
            job_repo,
            bucket_repo,
            launcher,
            timers,
            workflow_config: workflow_config.unwrap_or_default(),
            owned_buckets: RwLock::new(HashSet::new()),
            armed: DashMap::new(),
            manual_sequence: AtomicU64::new(0),
            last_reload: Mutex::new(None),
        }
    }

    pub fn broker_id(&self) -> &str {
        &self.broker_id
    }

    /// 发布（新建或更新）调度计划，返回最新版本号
    pub async fn publish(&self, command: PublishScheduleCommand) -> SchedulerResult<String> {
        validate_option(&command.option)?;

        let job = self
            .job_repo
            .get(command.job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id: command.job_id })?;
        if let JobTarget::Workflow { nodes, edges } = &job.target {
            validate_workflow(nodes, edges, self.workflow_config.max_nodes)?;
        }

        let owner = self
            .bucket_owner(bucket_of(command.schedule_id, self.bucket_count))
            .await?;

        let (schedule, expected) = match self.schedule_repo.get(command.schedule_id).await? {
            Some(mut existing) => {
                let expected = command
                    .expected_version
                    .clone()
                    .unwrap_or_else(|| existing.version.clone());
                let changed = existing.replace_option(command.option);
                if !changed
                    && existing.job_id == command.job_id
                    && !existing.deleted
                    && expected == existing.version
                {
                    debug!("调度计划 {} 配置未变化", existing.id);
                    return Ok(existing.version);
                }
                existing.job_id = command.job_id;
                existing.deleted = false;
                existing.broker_id = owner;
                (existing, Some(expected))
            }
            None => {
                let mut schedule =
                    Schedule::new(command.schedule_id, command.job_id, command.option);
                schedule.broker_id = owner;
                (schedule, command.expected_version)
            }
        };

        self.schedule_repo
            .upsert(&schedule, expected.as_deref())
            .await?;
        info!(
            "发布调度计划 {}，类型: {}，版本: {}",
            schedule.id,
            schedule.option.kind(),
            schedule.version
        );

        self.disarm(schedule.id, "配置已更新");
        if self.is_local(&schedule).await {
            self.arm(&schedule).await?;
        }
        Ok(schedule.version)
    }

    /// 为调度计划装载周期定时器，返回是否装载成功
    pub async fn arm(&self, schedule: &Schedule) -> SchedulerResult<bool> {
        if !schedule.is_active() {
            return Ok(false);
        }

        let option = &schedule.option;
        let next = next_trigger(
            option,
            schedule.last_trigger_at,
            schedule.last_feedback_at,
            Utc::now(),
        )?;
        if next == NEVER_TRIGGER_AT || option.end_time().is_some_and(|end| next > end) {
            debug!("调度计划 {} 没有下一次触发时间", schedule.id);
            return Ok(false);
        }

        let body = Arc::new(ScheduleFireBody::recurring(
            self.launcher.clone(),
            schedule.id,
        ));
        let timer = ScheduledTimer::recurring(
            schedule.id.to_string(),
            next,
            option.clone(),
            schedule.last_feedback_at,
            body,
        );
        if !self.timers.schedule(timer) {
            return Ok(false);
        }

        self.armed.insert(schedule.id, schedule.version.clone());
        StructuredLogger::log_schedule_armed(schedule.id, option.kind().as_str(), next);
        Ok(true)
    }

    pub fn disarm(&self, schedule_id: i64, reason: &str) -> bool {
        self.armed.remove(&schedule_id);
        let stopped = self.timers.stop(&schedule_id.to_string());
        if stopped {
            StructuredLogger::log_schedule_disarmed(schedule_id, reason);
        }
        stopped
    }

    pub fn is_armed(&self, schedule_id: i64) -> bool {
        self.timers.contains(&schedule_id.to_string())
    }

    pub fn armed_schedule_ids(&self) -> Vec<i64> {
        let mut ids: Vec<i64> = self.armed.iter().map(|e| *e.key()).collect();
        ids.sort_unstable();
        ids
    }

    pub async fn enable(&self, schedule_id: i64) -> SchedulerResult<()> {
        self.set_enabled(schedule_id, true).await
    }

    pub async fn disable(&self, schedule_id: i64) -> SchedulerResult<()> {
        self.set_enabled(schedule_id, false).await
    }

    async fn set_enabled(&self, schedule_id: i64, enabled: bool) -> SchedulerResult<()> {
        let mut schedule = self.load(schedule_id).await?;
        if schedule.enabled == enabled {
            return Ok(());
        }
        schedule.enabled = enabled;
        let version = schedule.version.clone();
        self.schedule_repo.upsert(&schedule, Some(version.as_str())).await?;

        if enabled {
            if self.is_local(&schedule).await {
                self.arm(&schedule).await?;
            }
        } else {
            self.disarm(schedule_id, "已禁用");
        }
        Ok(())
    }

    /// 逻辑删除，记录保留
    pub async fn delete(&self, schedule_id: i64) -> SchedulerResult<()> {
        let mut schedule = self.load(schedule_id).await?;
        if schedule.deleted {
            return Ok(());
        }
        schedule.deleted = true;
        let version = schedule.version.clone();
        self.schedule_repo.upsert(&schedule, Some(version.as_str())).await?;
        self.disarm(schedule_id, "已删除");
        info!("调度计划 {} 已删除", schedule_id);
        Ok(())
    }

    /// 立即（或在指定时刻）额外触发一次，返回手动定时器ID
    pub async fn trigger_now(
        &self,
        schedule_id: i64,
        trigger_at: Option<DateTime<Utc>>,
    ) -> SchedulerResult<String> {
        let schedule = self.load(schedule_id).await?;
        if schedule.deleted {
            return Err(SchedulerError::ScheduleNotFound { id: schedule_id });
        }

        let sequence = self.manual_sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let timer_id = format!("manual-{}-{}", schedule_id, sequence);
        let body = Arc::new(ScheduleFireBody::manual(self.launcher.clone(), schedule_id));
        self.timers.schedule(ScheduledTimer::one_shot(
            timer_id.clone(),
            trigger_at.unwrap_or_else(Utc::now),
            body,
        ));
        info!("手动触发调度计划 {}，定时器: {}", schedule_id, timer_id);
        Ok(timer_id)
    }

    pub async fn record_feedback(
        &self,
        schedule_id: i64,
        feedback_at: DateTime<Utc>,
    ) -> SchedulerResult<()> {
        self.schedule_repo
            .update_feedback(schedule_id, feedback_at)
            .await
    }

    /// 增量加载上次加载之后更新过的本地调度计划，返回新装载的数量
    pub async fn refresh(&self) -> SchedulerResult<usize> {
        let started = Utc::now();
        let since = *self.last_reload.lock().await;
        let schedules = self
            .schedule_repo
            .find_owned_since(&self.broker_id, since)
            .await?;
        let owned = self.owned_buckets.read().await.clone();

        let mut armed = 0;
        for schedule in schedules {
            if !schedule.is_active() || !owned.contains(&schedule.bucket(self.bucket_count)) {
                self.disarm(schedule.id, "不再由本节点负责");
                continue;
            }

            let current = self.armed.get(&schedule.id).map(|v| v.value().clone());
            if current.as_deref() == Some(schedule.version.as_str()) && self.is_armed(schedule.id)
            {
                continue;
            }

            self.disarm(schedule.id, "配置已更新");
            if self.arm(&schedule).await? {
                armed += 1;
            }
        }

        *self.last_reload.lock().await = Some(started);
        if armed > 0 {
            info!("增量加载完成，新装载 {} 个调度计划", armed);
        }
        Ok(armed)
    }

    /// 停止全部定时器，用于进程退出
    pub fn shutdown(&self) -> usize {
        self.armed.clear();
        self.timers.stop_all()
    }

    async fn is_local(&self, schedule: &Schedule) -> bool {
        self.owned_buckets
            .read()
            .await
            .contains(&schedule.bucket(self.bucket_count))
    }

    async fn bucket_owner(&self, bucket: u32) -> SchedulerResult<Option<String>> {
        Ok(self
            .bucket_repo
            .list()
            .await?
            .into_iter()
            .find(|b| b.bucket == bucket)
            .map(|b| b.broker_id))
    }

    async fn load(&self, schedule_id: i64) -> SchedulerResult<Schedule> {
        self.schedule_repo
            .get(schedule_id)
            .await?
            .ok_or(SchedulerError::ScheduleNotFound { id: schedule_id })
    }
}

/// FIXED_DELAY 以周期触发的执行实例结束时刻作为反馈，并据此装载下一次
#[async_trait]
impl ExecutionListener for ScheduleManager {
    async fn on_execution_finished(&self, execution: &Execution) -> SchedulerResult<()> {
        let (Some(schedule_id), Some(finished_at)) = (execution.schedule_id, execution.completed_at)
        else {
            return Ok(());
        };
        if execution.manual {
            return Ok(());
        }

        let Some(schedule) = self.schedule_repo.get(schedule_id).await? else {
            return Ok(());
        };
        // 只认最近一次周期触发产生的执行实例
        if schedule.option.kind() != ScheduleKind::FixedDelay
            || schedule.last_trigger_at != Some(execution.trigger_at)
        {
            return Ok(());
        }

        self.record_feedback(schedule_id, finished_at).await?;
        if self.timers.resume(&schedule_id.to_string(), finished_at) {
            debug!(
                "调度计划 {} 执行实例 {} 已结束，装载下一次触发",
                schedule_id, execution.id
            );
        }
        Ok(())
    }
}

#[async_trait]
impl BucketOwnershipListener for ScheduleManager {
    async fn on_buckets_changed(&self, gained: &[u32], lost: &[u32]) -> SchedulerResult<()> {
        {
            let mut owned = self.owned_buckets.write().await;
            for bucket in lost {
                owned.remove(bucket);
            }
            owned.extend(gained.iter().copied());
        }

        if !lost.is_empty() {
            for schedule_id in self.armed_schedule_ids() {
                if lost.contains(&bucket_of(schedule_id, self.bucket_count)) {
                    self.disarm(schedule_id, "分桶已转移");
                }
            }
        }

        if !gained.is_empty() {
            let schedules = self
                .schedule_repo
                .find_by_buckets(gained, self.bucket_count)
                .await?;
            let mut armed = 0;
            for schedule in schedules {
                if schedule.broker_id.as_deref() != Some(self.broker_id.as_str()) {
                    self.schedule_repo
                        .update_owner(schedule.id, &self.broker_id)
                        .await?;
                }
                if self.arm(&schedule).await? {
                    armed += 1;
                }
            }
            info!(
                "获得 {} 个分桶，装载 {} 个调度计划",
                gained.len(),
                armed
            );
        }
        Ok(())
    }
}
