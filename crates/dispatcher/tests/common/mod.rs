#![allow(dead_code)]

use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use chrono::Utc;

use scheduler_core::config::{BrokerConfig, DispatchConfig};
use scheduler_core::models::{DispatchPayload, Execution, Job, Task, TaskStatus, TaskStatusReport, Worker, WorkerMetrics};
use scheduler_core::traits::{ExecutionRepository, JobRepository, TaskRepository, WorkerTransport};
use scheduler_core::SchedulerResult;
use scheduler_dispatcher::{DispatchCollaborators, ScheduleLauncher, ScheduleManager, TaskDispatcher, TimerEngine};
use scheduler_infrastructure::{
    InMemoryBucketRepository, InMemoryExecutionRepository, InMemoryJobRepository,
    InMemoryScheduleRepository, InMemorySequenceRepository, InMemoryTaskRepository,
    InMemoryUsageStatistics, InMemoryWorkerRegistry, InProcessEventBus, MetricsCollector,
};

pub const APP: &str = "order-service";
pub const EXECUTOR: &str = "order-sync";
pub const BROKER_ID: &str = "broker-a";
pub const BUCKET_COUNT: u32 = 4;

/// 记录所有分发调用的传输层
#[derive(Default)]
pub struct RecordingTransport {
    reject: AtomicBool,
    delay_ms: AtomicU64,
    calls: Mutex<Vec<(String, DispatchPayload)>>,
}

impl RecordingTransport {
    pub fn reject_all(&self, reject: bool) {
        self.reject.store(reject, Ordering::SeqCst);
    }

    /// 记录调用后延迟返回，用于模拟Worker响应慢
    pub fn respond_after(&self, delay: Duration) {
        self.delay_ms.store(delay.as_millis() as u64, Ordering::SeqCst);
    }

    pub fn calls(&self) -> Vec<(String, DispatchPayload)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().unwrap().len()
    }
}

#[async_trait]
impl WorkerTransport for RecordingTransport {
    async fn dispatch(
        &self,
        worker: &Worker,
        payload: &DispatchPayload,
        _timeout: Duration,
    ) -> SchedulerResult<bool> {
        self.calls
            .lock()
            .unwrap()
            .push((worker.address.clone(), payload.clone()));
        let delay = self.delay_ms.load(Ordering::SeqCst);
        if delay > 0 {
            tokio::time::sleep(Duration::from_millis(delay)).await;
        }
        Ok(!self.reject.load(Ordering::SeqCst))
    }
}

pub fn worker(address: &str) -> Worker {
    Worker::new(APP, address)
        .with_executor(EXECUTOR)
        .with_metrics(WorkerMetrics {
            cpu_available: 4.0,
            free_memory_mb: 8192,
            queue_available: 16,
            heartbeat_at: Utc::now(),
        })
}

pub fn broker_config() -> BrokerConfig {
    BrokerConfig {
        broker_id: BROKER_ID.to_string(),
        bucket_count: BUCKET_COUNT,
        ..BrokerConfig::default()
    }
}

pub struct Harness {
    pub jobs: Arc<InMemoryJobRepository>,
    pub executions: Arc<InMemoryExecutionRepository>,
    pub tasks: Arc<InMemoryTaskRepository>,
    pub schedules: Arc<InMemoryScheduleRepository>,
    pub buckets: Arc<InMemoryBucketRepository>,
    pub sequences: Arc<InMemorySequenceRepository>,
    pub workers: Arc<InMemoryWorkerRegistry>,
    pub transport: Arc<RecordingTransport>,
    pub usage: Arc<InMemoryUsageStatistics>,
    pub events: Arc<InProcessEventBus>,
    pub metrics: Arc<MetricsCollector>,
    pub timers: TimerEngine,
    pub dispatcher: Arc<TaskDispatcher>,
    pub launcher: Arc<ScheduleLauncher>,
    pub manager: Arc<ScheduleManager>,
}

impl Harness {
    pub fn new() -> Self {
        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let buckets = Arc::new(InMemoryBucketRepository::new());
        let sequences = Arc::new(InMemorySequenceRepository::new());
        let workers = Arc::new(InMemoryWorkerRegistry::new(60));
        let transport = Arc::new(RecordingTransport::default());
        let usage = Arc::new(InMemoryUsageStatistics::new());
        let events = Arc::new(InProcessEventBus::new());
        let metrics = Arc::new(MetricsCollector::new());
        let timers = TimerEngine::new(8, metrics.clone());

        let dispatcher = TaskDispatcher::new(
            DispatchCollaborators {
                job_repo: jobs.clone(),
                execution_repo: executions.clone(),
                task_repo: tasks.clone(),
                worker_registry: workers.clone(),
                transport: transport.clone(),
                usage: usage.clone(),
                events: events.clone(),
            },
            timers.clone(),
            metrics.clone(),
            Some(DispatchConfig {
                default_timeout_ms: 500,
                ..DispatchConfig::default()
            }),
            None,
            None,
        );

        let launcher = Arc::new(ScheduleLauncher::new(
            schedules.clone(),
            jobs.clone(),
            executions.clone(),
            sequences.clone(),
            dispatcher.clone(),
            events.clone(),
            metrics.clone(),
        ));

        let manager = Arc::new(ScheduleManager::new(
            schedules.clone(),
            jobs.clone(),
            buckets.clone(),
            launcher.clone(),
            timers.clone(),
            Some(broker_config()),
            None,
        ));
        dispatcher.set_execution_listener(manager.clone());

        Self {
            jobs,
            executions,
            tasks,
            schedules,
            buckets,
            sequences,
            workers,
            transport,
            usage,
            events,
            metrics,
            timers,
            dispatcher,
            launcher,
            manager,
        }
    }

    pub fn register_workers(&self, addresses: &[&str]) {
        for address in addresses {
            self.workers.register(worker(address));
        }
    }

    pub async fn save_job(&self, job: &Job) {
        self.jobs.save(job).await.unwrap();
    }

    pub async fn new_execution(&self, id: i64, job: &Job) -> Execution {
        self.executions
            .create(&Execution::new(id, job.id, None, Utc::now()))
            .await
            .unwrap()
    }

    pub async fn execution(&self, id: i64) -> Execution {
        self.executions.get(id).await.unwrap().unwrap()
    }

    pub async fn task(&self, id: i64) -> Task {
        self.tasks.get(id).await.unwrap().unwrap()
    }

    pub async fn tasks_of(&self, execution_id: i64) -> Vec<Task> {
        self.tasks.find_by_execution(execution_id).await.unwrap()
    }

    pub async fn task_by_ref(&self, execution_id: i64, ref_id: &str) -> Option<Task> {
        self.tasks_of(execution_id)
            .await
            .into_iter()
            .find(|t| t.ref_id == ref_id)
    }

    /// 以任务当前分配的Worker身份上报状态
    pub async fn report(&self, task_id: i64, status: TaskStatus) -> SchedulerResult<()> {
        let task = self.task(task_id).await;
        self.dispatcher
            .handle_report(TaskStatusReport {
                task_id,
                status,
                worker_address: task.worker_address.unwrap_or_default(),
                message: None,
                reported_at: Utc::now(),
            })
            .await
    }
}

/// 轮询直到条件成立，最多等待约2秒
pub async fn eventually<F, Fut>(mut check: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    for _ in 0..100 {
        if check().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(20)).await;
    }
    false
}
