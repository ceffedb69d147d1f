//! 任务分发
//!
//! 负责把执行实例拆成任务并交给Worker，处理Worker的状态上报、失败重试，
//! 以及执行实例的最终状态。分发失败（没有Worker、Worker拒绝、调用超时）
//! 与运行时失败走同一条失败路径。

use std::sync::{Arc, OnceLock, Weak};
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use futures::future::BoxFuture;
use futures::FutureExt;
use tracing::{debug, info, warn};

use scheduler_core::config::{DispatchConfig, WorkflowConfig};
use scheduler_core::models::{
    DispatchPayload, Execution, ExecutionStatus, Job, JobTarget, Task, TaskStatus,
    TaskStatusReport, Worker,
};
use scheduler_core::traits::{
    ExecutionRepository, JobRepository, TaskRepository, UsageStatistics, WorkerRegistry,
    WorkerTransport,
};
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{
    batch_outcome, retry_targets, BatchOutcome, EventPublisher, SchedulerEvent, TaskStateMachine,
};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

use crate::retry_service::{RetryConfig, RetryDecision, RetryService};
use crate::selection::WorkerSelector;
use crate::strategies::LoadBalancers;
use crate::timer::{ScheduledTimer, TimerBody, TimerEngine};
use crate::workflow::{WorkflowExecutor, WorkflowProgress};

/// 分发所需的外部协作方
#[derive(Clone)]
pub struct DispatchCollaborators {
    pub job_repo: Arc<dyn JobRepository>,
    pub execution_repo: Arc<dyn ExecutionRepository>,
    pub task_repo: Arc<dyn TaskRepository>,
    pub worker_registry: Arc<dyn WorkerRegistry>,
    pub transport: Arc<dyn WorkerTransport>,
    pub usage: Arc<dyn UsageStatistics>,
    pub events: Arc<dyn EventPublisher>,
}

/// 执行实例进入最终状态后的回调
#[async_trait]
pub trait ExecutionListener: Send + Sync {
    async fn on_execution_finished(&self, execution: &Execution) -> SchedulerResult<()>;
}

pub struct TaskDispatcher {
    job_repo: Arc<dyn JobRepository>,
    execution_repo: Arc<dyn ExecutionRepository>,
    task_repo: Arc<dyn TaskRepository>,
    transport: Arc<dyn WorkerTransport>,
    usage: Arc<dyn UsageStatistics>,
    events: Arc<dyn EventPublisher>,
    selector: WorkerSelector,
    workflow: WorkflowExecutor,
    retry: RetryService,
    timers: TimerEngine,
    metrics: Arc<MetricsCollector>,
    config: DispatchConfig,
    listener: OnceLock<Weak<dyn ExecutionListener>>,
    this: Weak<TaskDispatcher>,
}

impl TaskDispatcher {
    pub fn new(
        collaborators: DispatchCollaborators,
        timers: TimerEngine,
        metrics: Arc<MetricsCollector>,
        config: Option<DispatchConfig>,
        workflow_config: Option<WorkflowConfig>,
        retry_config: Option<RetryConfig>,
    ) -> Arc<Self> {
        let config = config.unwrap_or_default();
        let balancers = LoadBalancers::new(
            collaborators.usage.clone(),
            Duration::from_secs(config.usage_window_seconds),
        );

        Arc::new_cyclic(|this| Self {
            job_repo: collaborators.job_repo,
            execution_repo: collaborators.execution_repo,
            task_repo: collaborators.task_repo.clone(),
            transport: collaborators.transport,
            usage: collaborators.usage,
            events: collaborators.events,
            selector: WorkerSelector::new(collaborators.worker_registry, balancers),
            workflow: WorkflowExecutor::new(collaborators.task_repo, workflow_config),
            retry: RetryService::new(retry_config),
            timers,
            metrics,
            config,
            listener: OnceLock::new(),
            this: this.clone(),
        })
    }

    /// 设置执行结束回调，只能设置一次，只持有弱引用
    pub fn set_execution_listener(&self, listener: Arc<dyn ExecutionListener>) {
        if self.listener.set(Arc::downgrade(&listener)).is_err() {
            warn!("执行结束回调已设置，忽略重复设置");
        }
    }

    pub fn workflow(&self) -> &WorkflowExecutor {
        &self.workflow
    }

    /// 为一次触发创建任务并分发
    pub async fn launch(&self, execution: &Execution, job: &Job) -> SchedulerResult<()> {
        match &job.target {
            JobTarget::Workflow { .. } => {
                let progress = self.workflow.start(execution, job).await?;
                self.apply_progress(execution.id, job, progress).await
            }
            JobTarget::Executor { executor, param } if job.dispatch.broadcast => {
                self.launch_broadcast(execution, job, executor, param).await
            }
            JobTarget::Executor { executor, param } => {
                let task = Task::new(execution.id, job.id, "", executor.clone(), execution.trigger_at)
                    .with_param(param.clone());
                let task = self.task_repo.create(&task).await?;
                self.dispatch(task, job.clone()).await
            }
        }
    }

    /// 广播：每个符合条件的Worker一个任务，不经过负载均衡
    async fn launch_broadcast(
        &self,
        execution: &Execution,
        job: &Job,
        executor: &str,
        param: &serde_json::Value,
    ) -> SchedulerResult<()> {
        let workers = self
            .selector
            .eligible(&job.app_id, executor, &job.dispatch)
            .await?;

        let template = Task::new(execution.id, job.id, "", executor, execution.trigger_at)
            .with_param(param.clone());

        if workers.is_empty() {
            let task = self.task_repo.create(&template).await?;
            return self
                .fail_dispatch(task, job, None, "没有可用的Worker".to_string(), Instant::now())
                .await;
        }

        let mut tasks = Vec::with_capacity(workers.len());
        for worker in &workers {
            let mut task = template.clone();
            task.worker_address = Some(worker.address.clone());
            tasks.push(self.task_repo.create(&task).await?);
        }
        info!("执行实例 {} 广播到 {} 个Worker", execution.id, tasks.len());
        self.dispatch_all(tasks, job.clone()).await
    }

    fn dispatch_all(&self, tasks: Vec<Task>, job: Job) -> BoxFuture<'_, SchedulerResult<()>> {
        async move {
            for task in tasks {
                let task_id = task.id;
                if let Err(e) = self.dispatch(task, job.clone()).await {
                    warn!("任务 {} 分发出错: {}", task_id, e);
                }
            }
            Ok(())
        }
        .boxed()
    }

    async fn dispatch(&self, mut task: Task, job: Job) -> SchedulerResult<()> {
        let started = Instant::now();

        let pinned = task.worker_address.clone().filter(|_| job.dispatch.broadcast);
        let selected = match pinned.clone() {
            Some(address) => self.pinned_worker(&job, &task.executor, &address).await,
            None => {
                self.selector
                    .select(&job.app_id, &task.executor, &job.dispatch, &invocation_key(&task))
                    .await
            }
        };

        let worker = match selected {
            Ok(Some(worker)) => worker,
            Ok(None) => {
                return self
                    .fail_dispatch(task, &job, pinned, "没有可用的Worker".to_string(), started)
                    .await;
            }
            Err(e) => {
                self.fail_dispatch(task, &job, pinned, e.to_string(), started)
                    .await?;
                return Err(e);
            }
        };

        // 先持久化DISPATCHED，Worker的状态上报可能早于分发调用返回
        let from = task.status;
        task.worker_address = Some(worker.address.clone());
        TaskStateMachine::apply(&mut task, TaskStatus::Dispatched, Utc::now())?;
        self.task_repo.update(&task).await?;

        let payload = DispatchPayload::from(&task);
        let timeout = Duration::from_millis(
            job.dispatch
                .timeout_ms
                .unwrap_or(self.config.default_timeout_ms),
        );
        let outcome = match tokio::time::timeout(
            timeout,
            self.transport.dispatch(&worker, &payload, timeout),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(SchedulerError::DispatchTimeout),
        };

        match outcome {
            Ok(true) => {
                self.metrics
                    .record_dispatch(true, started.elapsed().as_secs_f64());
                StructuredLogger::log_task_dispatched(
                    task.id,
                    task.execution_id,
                    &task.executor,
                    &worker.address,
                );
                if let Err(e) = self.usage.record(worker.server_id(), Utc::now()).await {
                    warn!("记录Worker {} 使用统计失败: {}", worker.address, e);
                }
                self.publish(SchedulerEvent::task_status_changed(
                    task.id,
                    task.execution_id,
                    from,
                    TaskStatus::Dispatched,
                ))
                .await;
                Ok(())
            }
            Ok(false) => {
                self.fail_unacknowledged(&task, &job, &worker, "Worker拒绝执行任务".to_string(), started)
                    .await
            }
            Err(e) if e.is_dispatch_failure() => {
                self.fail_unacknowledged(&task, &job, &worker, e.to_string(), started)
                    .await
            }
            Err(e) => {
                self.fail_unacknowledged(&task, &job, &worker, e.to_string(), started)
                    .await?;
                Err(e)
            }
        }
    }

    /// 分发调用未确认时重新读取任务
    ///
    /// Worker的上报可能早于分发调用返回，只有任务仍是本次分发给该Worker的
    /// DISPATCHED状态时才走失败路径，否则保留已上报的状态。
    async fn fail_unacknowledged(
        &self,
        dispatched: &Task,
        job: &Job,
        worker: &Worker,
        reason: String,
        started: Instant,
    ) -> SchedulerResult<()> {
        let current = self.load_task(dispatched.id).await?;
        let unchanged = current.status == TaskStatus::Dispatched
            && current.retry_count == dispatched.retry_count
            && current.worker_address.as_deref() == Some(worker.address.as_str());
        if !unchanged {
            self.metrics
                .record_dispatch(false, started.elapsed().as_secs_f64());
            debug!(
                "任务 {} 已变为 {}，忽略迟到的分发结果: {}",
                current.id, current.status, reason
            );
            return Ok(());
        }
        self.fail_dispatch(current, job, Some(worker.address.clone()), reason, started)
            .await
    }

    /// 广播任务固定在创建时的Worker上，该Worker仍需满足过滤条件
    async fn pinned_worker(
        &self,
        job: &Job,
        executor: &str,
        address: &str,
    ) -> SchedulerResult<Option<Worker>> {
        let eligible = self
            .selector
            .eligible(&job.app_id, executor, &job.dispatch)
            .await?;
        Ok(eligible.into_iter().find(|w| w.address == address))
    }

    async fn fail_dispatch(
        &self,
        mut task: Task,
        job: &Job,
        worker: Option<String>,
        reason: String,
        started: Instant,
    ) -> SchedulerResult<()> {
        self.metrics
            .record_dispatch(false, started.elapsed().as_secs_f64());
        task.worker_address = worker;
        self.fail_task(task, job, reason).await
    }

    /// 失败路径：标记失败，不增加重试次数，然后决定重试或结束
    async fn fail_task(&self, mut task: Task, job: &Job, reason: String) -> SchedulerResult<()> {
        let from = task.status;
        if !TaskStateMachine::apply(&mut task, TaskStatus::Failed, Utc::now())? {
            return Ok(());
        }
        task.error_message = Some(reason.clone());
        self.task_repo.update(&task).await?;

        StructuredLogger::log_task_failed(
            task.id,
            task.retry_count,
            task.worker_address.as_deref(),
            &reason,
        );
        self.publish(SchedulerEvent::task_status_changed(
            task.id,
            task.execution_id,
            from,
            TaskStatus::Failed,
        ))
        .await;

        self.on_settled(task, job).await
    }

    /// 任务本次尝试结束后的处理
    async fn on_settled(&self, task: Task, job: &Job) -> SchedulerResult<()> {
        if !TaskStateMachine::is_settled(task.status) {
            return Ok(());
        }

        if job.dispatch.broadcast && !job.is_workflow() {
            return self.on_broadcast_settled(task.execution_id, job).await;
        }

        if task.status == TaskStatus::Failed {
            if let RetryDecision::Retry { delay } = self.retry.decide(&job.retry, task.retry_count) {
                self.schedule_task_retry(&task, job, delay);
                return Ok(());
            }
        }

        if job.is_workflow() {
            let execution = self.load_execution(task.execution_id).await?;
            if execution.status.is_finished() {
                return Ok(());
            }
            let progress = self.workflow.advance(&execution, job, &task).await?;
            return self.apply_progress(execution.id, job, progress).await;
        }

        self.finish_execution(task.execution_id, execution_status_of(task.status))
            .await
    }

    async fn apply_progress(
        &self,
        execution_id: i64,
        job: &Job,
        progress: WorkflowProgress,
    ) -> SchedulerResult<()> {
        if !progress.ready.is_empty() {
            self.dispatch_all(progress.ready, job.clone()).await?;
        }
        if let Some(status) = progress.outcome {
            self.finish_execution(execution_id, status).await?;
        }
        Ok(())
    }

    async fn on_broadcast_settled(&self, execution_id: i64, job: &Job) -> SchedulerResult<()> {
        let tasks = self.task_repo.find_by_execution(execution_id).await?;
        match batch_outcome(&tasks) {
            BatchOutcome::Pending => Ok(()),
            BatchOutcome::Succeeded => {
                self.finish_execution(execution_id, ExecutionStatus::Completed)
                    .await
            }
            BatchOutcome::Cancelled => {
                self.finish_execution(execution_id, ExecutionStatus::Cancelled)
                    .await
            }
            BatchOutcome::Failed => {
                let mut execution = self.load_execution(execution_id).await?;
                if execution.status.is_finished() {
                    return Ok(());
                }
                match self.retry.decide(&job.retry, execution.retried) {
                    RetryDecision::Retry { delay } => {
                        execution.retried += 1;
                        self.execution_repo.update(&execution).await?;
                        self.schedule_execution_retry(&execution, job, delay);
                        Ok(())
                    }
                    RetryDecision::Exhausted => {
                        self.finish_execution(execution_id, ExecutionStatus::Failed)
                            .await
                    }
                }
            }
        }
    }

    fn schedule_task_retry(&self, task: &Task, job: &Job, delay: Duration) {
        let body = Arc::new(RetryBody {
            dispatcher: self.this.clone(),
            target: RetryTarget::Task(task.id),
        });
        let timer = ScheduledTimer::one_shot(task_retry_timer_id(task), after(delay), body);
        if self.timers.schedule(timer) {
            self.metrics.record_retry();
            StructuredLogger::log_task_retry(
                task.id,
                task.retry_count + 1,
                job.retry.retry_times,
                delay.as_millis() as u64,
            );
        }
    }

    fn schedule_execution_retry(&self, execution: &Execution, job: &Job, delay: Duration) {
        let body = Arc::new(RetryBody {
            dispatcher: self.this.clone(),
            target: RetryTarget::Execution(execution.id),
        });
        let timer =
            ScheduledTimer::one_shot(execution_retry_timer_id(execution), after(delay), body);
        if self.timers.schedule(timer) {
            self.metrics.record_retry();
            info!(
                "执行实例 {} 将在 {}ms 后整体重试（第 {}/{} 次）",
                execution.id,
                delay.as_millis(),
                execution.retried,
                job.retry.retry_times
            );
        }
    }

    /// 重试单个失败任务，任务状态已变化（如被取消）时放弃
    pub async fn retry_task(&self, task_id: i64) -> SchedulerResult<()> {
        let mut task = self.load_task(task_id).await?;
        if task.status != TaskStatus::Failed {
            debug!("任务 {} 当前状态为 {}，放弃重试", task_id, task.status);
            return Ok(());
        }
        let job = self.load_job(task.job_id).await?;

        TaskStateMachine::apply(&mut task, TaskStatus::Restarted, Utc::now())?;
        task.worker_address = None;
        self.task_repo.update(&task).await?;
        self.publish(SchedulerEvent::task_status_changed(
            task.id,
            task.execution_id,
            TaskStatus::Failed,
            TaskStatus::Restarted,
        ))
        .await;

        self.dispatch(task, job).await
    }

    /// 广播执行整体重试，按重试类型选择需要重新分发的子任务
    pub async fn retry_execution(&self, execution_id: i64) -> SchedulerResult<()> {
        let execution = self.load_execution(execution_id).await?;
        if execution.status.is_finished() {
            return Ok(());
        }
        let job = self.load_job(execution.job_id).await?;
        let tasks = self.task_repo.find_by_execution(execution_id).await?;

        let mut restarted = Vec::new();
        for task in retry_targets(&tasks, job.retry.retry_type) {
            let mut task = task.clone();
            TaskStateMachine::restart_for_batch(&mut task, Utc::now())?;
            self.task_repo.update(&task).await?;
            restarted.push(task);
        }

        info!(
            "执行实例 {} 整体重试，重新分发 {} 个子任务",
            execution_id,
            restarted.len()
        );
        self.dispatch_all(restarted, job).await
    }

    /// 处理Worker上报的任务状态
    pub async fn handle_report(&self, report: TaskStatusReport) -> SchedulerResult<()> {
        let mut task = self.load_task(report.task_id).await?;

        if let Some(address) = task.worker_address.as_deref() {
            if address != report.worker_address {
                warn!(
                    "忽略Worker {} 对任务 {} 的状态上报，任务当前分配给 {}",
                    report.worker_address, task.id, address
                );
                return Ok(());
            }
        }

        if !matches!(
            report.status,
            TaskStatus::Running | TaskStatus::Succeed | TaskStatus::Failed
        ) {
            return Err(SchedulerError::InvalidTransition {
                from: task.status.to_string(),
                to: report.status.to_string(),
            });
        }

        let job = self.load_job(task.job_id).await?;

        if report.status == TaskStatus::Failed {
            let reason = report
                .message
                .unwrap_or_else(|| "Worker上报执行失败".to_string());
            return self.fail_task(task, &job, reason).await;
        }

        let from = task.status;
        if !TaskStateMachine::apply(&mut task, report.status, report.reported_at)? {
            return Ok(());
        }
        self.task_repo.update(&task).await?;
        self.publish(SchedulerEvent::task_status_changed(
            task.id,
            task.execution_id,
            from,
            task.status,
        ))
        .await;

        self.on_settled(task, &job).await
    }

    /// 取消执行实例下所有未结束的任务，返回被取消的任务数
    pub async fn cancel_execution(&self, execution_id: i64) -> SchedulerResult<usize> {
        let execution = self.load_execution(execution_id).await?;
        let tasks = self.task_repo.find_by_execution(execution_id).await?;

        let mut cancelled = 0;
        for mut task in tasks {
            if !TaskStateMachine::can_transition(task.status, TaskStatus::Cancelled) {
                continue;
            }
            let from = task.status;
            self.timers.stop(&task_retry_timer_id(&task));
            TaskStateMachine::apply(&mut task, TaskStatus::Cancelled, Utc::now())?;
            self.task_repo.update(&task).await?;
            self.publish(SchedulerEvent::task_status_changed(
                task.id,
                task.execution_id,
                from,
                TaskStatus::Cancelled,
            ))
            .await;
            cancelled += 1;
        }

        self.timers.stop(&execution_retry_timer_id(&execution));
        self.finish_execution(execution_id, ExecutionStatus::Cancelled)
            .await?;
        info!("执行实例 {} 已取消，共取消 {} 个任务", execution_id, cancelled);
        Ok(cancelled)
    }

    pub async fn pause_task(&self, task_id: i64) -> SchedulerResult<Task> {
        let task = self.transition(task_id, TaskStatus::Paused).await?;
        self.timers.stop(&task_retry_timer_id(&task));
        Ok(task)
    }

    /// 恢复暂停的任务并重新分发
    pub async fn resume_task(&self, task_id: i64) -> SchedulerResult<()> {
        let task = self.load_task(task_id).await?;
        if task.status != TaskStatus::Paused {
            return Err(SchedulerError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Restarted.to_string(),
            });
        }
        let task = self.transition(task_id, TaskStatus::Restarted).await?;
        let job = self.load_job(task.job_id).await?;
        self.dispatch(task, job).await
    }

    pub async fn terminate_task(&self, task_id: i64) -> SchedulerResult<()> {
        let task = self.transition(task_id, TaskStatus::Terminated).await?;
        self.timers.stop(&task_retry_timer_id(&task));
        let job = self.load_job(task.job_id).await?;
        self.on_settled(task, &job).await
    }

    pub async fn get_execution(&self, execution_id: i64) -> SchedulerResult<Option<(Execution, Vec<Task>)>> {
        let Some(execution) = self.execution_repo.get(execution_id).await? else {
            return Ok(None);
        };
        let tasks = self.task_repo.find_by_execution(execution_id).await?;
        Ok(Some((execution, tasks)))
    }

    async fn transition(&self, task_id: i64, to: TaskStatus) -> SchedulerResult<Task> {
        let mut task = self.load_task(task_id).await?;
        let from = task.status;
        if TaskStateMachine::apply(&mut task, to, Utc::now())? {
            self.task_repo.update(&task).await?;
            self.publish(SchedulerEvent::task_status_changed(
                task.id,
                task.execution_id,
                from,
                to,
            ))
            .await;
        }
        Ok(task)
    }

    async fn finish_execution(&self, execution_id: i64, status: ExecutionStatus) -> SchedulerResult<()> {
        let mut execution = self.load_execution(execution_id).await?;
        if execution.status.is_finished() {
            return Ok(());
        }
        execution.status = status;
        execution.completed_at = Some(Utc::now());
        self.execution_repo.update(&execution).await?;

        let success = status == ExecutionStatus::Completed;
        self.metrics.record_execution_finished(success);
        StructuredLogger::log_execution_finished(execution_id, status.as_str());
        self.publish(SchedulerEvent::execution_finished(execution_id, success))
            .await;

        let listener = self.listener.get().and_then(Weak::upgrade);
        if let Some(listener) = listener {
            if let Err(e) = listener.on_execution_finished(&execution).await {
                warn!("执行实例 {} 结束回调失败: {}", execution_id, e);
            }
        }
        Ok(())
    }

    async fn publish(&self, event: SchedulerEvent) {
        if let Err(e) = self.events.publish(event).await {
            warn!("发布事件失败: {}", e);
        }
    }

    async fn load_task(&self, id: i64) -> SchedulerResult<Task> {
        self.task_repo
            .get(id)
            .await?
            .ok_or(SchedulerError::TaskNotFound { id })
    }

    async fn load_job(&self, id: i64) -> SchedulerResult<Job> {
        self.job_repo
            .get(id)
            .await?
            .ok_or(SchedulerError::JobNotFound { id })
    }

    async fn load_execution(&self, id: i64) -> SchedulerResult<Execution> {
        self.execution_repo
            .get(id)
            .await?
            .ok_or(SchedulerError::ExecutionNotFound { id })
    }
}

fn execution_status_of(status: TaskStatus) -> ExecutionStatus {
    match status {
        TaskStatus::Succeed => ExecutionStatus::Completed,
        TaskStatus::Cancelled => ExecutionStatus::Cancelled,
        _ => ExecutionStatus::Failed,
    }
}

/// 一致性哈希使用的调用键，同一作业的同一节点落在同一个Worker上
fn invocation_key(task: &Task) -> String {
    format!("{}:{}", task.job_id, task.ref_id)
}

/// 重试定时器ID带上重试次数，重试中再次失败时可以装载新的定时器
fn task_retry_timer_id(task: &Task) -> String {
    format!("retry-task-{}-{}", task.id, task.retry_count)
}

fn execution_retry_timer_id(execution: &Execution) -> String {
    format!("retry-execution-{}-{}", execution.id, execution.retried)
}

fn after(delay: Duration) -> DateTime<Utc> {
    Utc::now() + chrono::Duration::from_std(delay).unwrap_or_else(|_| chrono::Duration::zero())
}

enum RetryTarget {
    Task(i64),
    Execution(i64),
}

struct RetryBody {
    dispatcher: Weak<TaskDispatcher>,
    target: RetryTarget,
}

#[async_trait]
impl TimerBody for RetryBody {
    async fn run(&self, timer_id: &str, _trigger_at: DateTime<Utc>) -> SchedulerResult<()> {
        let Some(dispatcher) = self.dispatcher.upgrade() else {
            debug!("分发器已释放，跳过重试定时器 {}", timer_id);
            return Ok(());
        };
        match self.target {
            RetryTarget::Task(id) => dispatcher.retry_task(id).await,
            RetryTarget::Execution(id) => dispatcher.retry_execution(id).await,
        }
    }
}
