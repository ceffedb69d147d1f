//! 调度计划触发后的任务体：记录触发状态、创建执行实例并交给分发器

use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tracing::{debug, warn};

use scheduler_core::models::Execution;
use scheduler_core::traits::{ExecutionRepository, JobRepository, ScheduleRepository, SequenceRepository};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{next_trigger, EventPublisher, SchedulerEvent, NEVER_TRIGGER_AT};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::dispatch_service::TaskDispatcher;
use crate::timer::TimerBody;

/// 执行实例ID序列的键
pub const EXECUTION_SEQUENCE_KEY: &str = "execution";

pub struct ScheduleLauncher {
    schedule_repo: Arc<dyn ScheduleRepository>,
    job_repo: Arc<dyn JobRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    sequence_repo: Arc<dyn SequenceRepository>,
    dispatcher: Arc<TaskDispatcher>,
    events: Arc<dyn EventPublisher>,
    metrics: Arc<MetricsCollector>,
}

impl ScheduleLauncher {
    pub fn new(
        schedule_repo: Arc<dyn ScheduleRepository>,
        job_repo: Arc<dyn JobRepository>,
        execution_repo: Arc<dyn ExecutionRepository>,
        sequence_repo: Arc<dyn SequenceRepository>,
        dispatcher: Arc<TaskDispatcher>,
        events: Arc<dyn EventPublisher>,
        metrics: Arc<MetricsCollector>,
    ) -> Self {
        Self {
            schedule_repo,
            job_repo,
            execution_repo,
            sequence_repo,
            dispatcher,
            events,
            metrics,
        }
    }

    /// 触发一次调度计划，返回新建执行实例的ID
    ///
    /// 手动触发不检查启用状态，也不改变周期触发的时间记录。
    pub async fn fire(
        &self,
        schedule_id: i64,
        trigger_at: DateTime<Utc>,
        manual: bool,
    ) -> SchedulerResult<Option<i64>> {
        let Some(schedule) = self.schedule_repo.get(schedule_id).await? else {
            warn!("调度计划 {} 不存在，跳过触发", schedule_id);
            return Ok(None);
        };
        if schedule.deleted || (!manual && !schedule.enabled) {
            debug!("调度计划 {} 未启用，跳过触发", schedule_id);
            return Ok(None);
        }

        let job = self
            .job_repo
            .get(schedule.job_id)
            .await?
            .ok_or(SchedulerError::JobNotFound {
                id: schedule.job_id,
            })?;

        if !manual {
            let next = next_trigger(
                &schedule.option,
                Some(trigger_at),
                schedule.last_feedback_at,
                Utc::now(),
            )?;
            let next = (next != NEVER_TRIGGER_AT).then_some(next);
            self.schedule_repo
                .update_trigger_state(schedule_id, trigger_at, next)
                .await?;
        }

        let execution_id = self.sequence_repo.next_value(EXECUTION_SEQUENCE_KEY).await?;
        let execution = self
            .execution_repo
            .create(
                &Execution::new(execution_id, job.id, Some(schedule_id), trigger_at)
                    .with_manual(manual),
            )
            .await?;

        self.metrics.record_fire();
        StructuredLogger::log_schedule_fired(schedule_id, execution.id, trigger_at);
        if let Err(e) = self
            .events
            .publish(SchedulerEvent::schedule_fired(schedule_id, execution.id))
            .await
        {
            warn!("发布触发事件失败: {}", e);
        }

        self.dispatcher.launch(&execution, &job).await?;
        Ok(Some(execution.id))
    }
}

/// 绑定到某个调度计划的定时器任务体
pub struct ScheduleFireBody {
    launcher: Arc<ScheduleLauncher>,
    schedule_id: i64,
    manual: bool,
}

impl ScheduleFireBody {
    pub fn recurring(launcher: Arc<ScheduleLauncher>, schedule_id: i64) -> Self {
        Self {
            launcher,
            schedule_id,
            manual: false,
        }
    }

    pub fn manual(launcher: Arc<ScheduleLauncher>, schedule_id: i64) -> Self {
        Self {
            launcher,
            schedule_id,
            manual: true,
        }
    }
}

#[async_trait]
impl TimerBody for ScheduleFireBody {
    async fn run(&self, _timer_id: &str, trigger_at: DateTime<Utc>) -> SchedulerResult<()> {
        self.launcher
            .fire(self.schedule_id, trigger_at, self.manual)
            .await
            .map(|_| ())
    }

    /// 周期触发的 FIXED_DELAY 以执行实例结束作为反馈，由调度计划管理恢复装载
    fn awaits_feedback(&self) -> bool {
        !self.manual
    }
}
