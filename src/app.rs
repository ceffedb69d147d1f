use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use scheduler_core::AppConfig;
use scheduler_dispatcher::{
    register_handlers, ClusterPartitioner, DispatchCollaborators, ScheduleLauncher,
    ScheduleManager, TaskDispatcher, TimerEngine,
};
use scheduler_infrastructure::{
    CommandBus, HttpWorkerTransport, InMemoryBrokerRegistry, InMemoryBucketRepository,
    InMemoryExecutionRepository, InMemoryJobRepository, InMemoryLeaseLock,
    InMemoryScheduleRepository, InMemorySequenceRepository, InMemoryTaskRepository,
    InMemoryUsageStatistics, InMemoryWorkerRegistry, InProcessEventBus, MetricsCollector,
};
use tokio::sync::broadcast;
use tracing::{error, info};

/// Broker进程：持有所有组件并驱动周期任务
pub struct Application {
    config: AppConfig,
    manager: Arc<ScheduleManager>,
    dispatcher: Arc<TaskDispatcher>,
    partitioner: Arc<ClusterPartitioner>,
    workers: Arc<InMemoryWorkerRegistry>,
    jobs: Arc<InMemoryJobRepository>,
    bus: Arc<CommandBus>,
}

impl Application {
    pub async fn new(config: AppConfig) -> Result<Self> {
        info!("初始化Broker: {}", config.broker.broker_id);

        let metrics = Arc::new(MetricsCollector::new());
        let events = Arc::new(InProcessEventBus::new());

        let jobs = Arc::new(InMemoryJobRepository::new());
        let executions = Arc::new(InMemoryExecutionRepository::new());
        let tasks = Arc::new(InMemoryTaskRepository::new());
        let schedules = Arc::new(InMemoryScheduleRepository::new());
        let buckets = Arc::new(InMemoryBucketRepository::new());
        let sequences = Arc::new(InMemorySequenceRepository::new());
        let workers = Arc::new(InMemoryWorkerRegistry::new(
            config.broker.heartbeat_timeout_seconds,
        ));
        let brokers = Arc::new(InMemoryBrokerRegistry::new(
            config.broker.heartbeat_timeout_seconds,
        ));
        let lock = Arc::new(InMemoryLeaseLock::new());
        let usage = Arc::new(InMemoryUsageStatistics::new());
        let transport = Arc::new(HttpWorkerTransport::new(
            config.dispatch.worker_http_path.clone(),
        ));

        let timers = TimerEngine::new(config.timer.max_concurrent_executions, metrics.clone());

        let dispatcher = TaskDispatcher::new(
            DispatchCollaborators {
                job_repo: jobs.clone(),
                execution_repo: executions.clone(),
                task_repo: tasks,
                worker_registry: workers.clone(),
                transport,
                usage,
                events: events.clone(),
            },
            timers.clone(),
            metrics.clone(),
            Some(config.dispatch.clone()),
            Some(config.workflow.clone()),
            None,
        );

        let launcher = Arc::new(ScheduleLauncher::new(
            schedules.clone(),
            jobs.clone(),
            executions,
            sequences,
            dispatcher.clone(),
            events.clone(),
            metrics.clone(),
        ));

        let manager = Arc::new(ScheduleManager::new(
            schedules,
            jobs.clone(),
            buckets.clone(),
            launcher,
            timers,
            Some(config.broker.clone()),
            Some(config.workflow.clone()),
        ));

        let partitioner = Arc::new(ClusterPartitioner::new(
            lock,
            brokers,
            buckets,
            events,
            metrics,
            Some(config.broker.clone()),
        ));
        partitioner.set_listener(manager.clone()).await;
        dispatcher.set_execution_listener(manager.clone());

        let bus = Arc::new(CommandBus::new());
        register_handlers(&bus, manager.clone(), dispatcher.clone());

        Ok(Self {
            config,
            manager,
            dispatcher,
            partitioner,
            workers,
            jobs,
            bus,
        })
    }

    /// 命令总线，供嵌入方发布调度计划、上报任务状态
    pub fn bus(&self) -> Arc<CommandBus> {
        Arc::clone(&self.bus)
    }

    pub fn manager(&self) -> Arc<ScheduleManager> {
        Arc::clone(&self.manager)
    }

    pub fn dispatcher(&self) -> Arc<TaskDispatcher> {
        Arc::clone(&self.dispatcher)
    }

    pub fn partitioner(&self) -> Arc<ClusterPartitioner> {
        Arc::clone(&self.partitioner)
    }

    pub fn workers(&self) -> Arc<InMemoryWorkerRegistry> {
        Arc::clone(&self.workers)
    }

    pub fn jobs(&self) -> Arc<InMemoryJobRepository> {
        Arc::clone(&self.jobs)
    }

    /// 运行重平衡和增量加载循环，直到收到关闭信号
    pub async fn run(&self, mut shutdown_rx: broadcast::Receiver<()>) -> Result<()> {
        info!("启动Broker: {}", self.config.broker.broker_id);

        let partition_handle = {
            let partitioner = Arc::clone(&self.partitioner);
            tokio::spawn(async move {
                if let Err(e) = partitioner.run().await {
                    error!("分桶重平衡循环异常退出: {}", e);
                }
            })
        };

        let reload_handle = {
            let manager = Arc::clone(&self.manager);
            let interval = Duration::from_secs(self.config.broker.reload_interval_seconds);
            let shutdown_rx = shutdown_rx.resubscribe();
            tokio::spawn(async move {
                run_reload_loop(manager, interval, shutdown_rx).await;
            })
        };

        let _ = shutdown_rx.recv().await;
        info!("Broker收到关闭信号");

        self.partitioner.stop().await;
        partition_handle.abort();
        let _ = reload_handle.await;

        let stopped = self.manager.shutdown();
        info!("Broker已停止，释放定时器 {} 个", stopped);
        Ok(())
    }
}

/// 周期性加载本节点负责且有更新的调度计划
async fn run_reload_loop(
    manager: Arc<ScheduleManager>,
    interval: Duration,
    mut shutdown_rx: broadcast::Receiver<()>,
) {
    let mut ticker = tokio::time::interval(interval);
    loop {
        tokio::select! {
            _ = ticker.tick() => {
                match manager.refresh().await {
                    Ok(0) => {}
                    Ok(count) => info!("增量加载调度计划 {} 个", count),
                    Err(e) => error!("增量加载调度计划失败: {}", e),
                }
            }
            _ = shutdown_rx.recv() => {
                info!("增量加载循环收到关闭信号");
                break;
            }
        }
    }
}
