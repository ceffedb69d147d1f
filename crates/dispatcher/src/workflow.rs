//! 工作流执行
//!
//! 每个节点对应一个任务（ref_id 为节点ID）。节点成功后检查后继节点的汇聚条件，
//! 满足时创建后继任务；同一执行实例同一节点只会创建一次。

use std::collections::HashSet;
use std::sync::Arc;

use chrono::Utc;
use dashmap::DashMap;
use tracing::debug;

use scheduler_core::config::WorkflowConfig;
use scheduler_core::hashing::content_hash;
use scheduler_core::models::{Execution, ExecutionStatus, Job, JobTarget, Task, TaskStatus, WorkflowNode};
use scheduler_core::traits::TaskRepository;
use scheduler_core::{SchedulerError, SchedulerResult};
use scheduler_domain::{validate_workflow, TaskStateMachine, WorkflowGraph};

/// 一次推进的结果
#[derive(Debug, Default)]
pub struct WorkflowProgress {
    /// 新创建、等待分发的执行器节点任务
    pub ready: Vec<Task>,
    /// 执行实例已经结束时的最终状态
    pub outcome: Option<ExecutionStatus>,
}

pub struct WorkflowExecutor {
    task_repo: Arc<dyn TaskRepository>,
    config: WorkflowConfig,
    /// job_id -> (定义指纹, DAG)
    graphs: DashMap<i64, (String, Arc<WorkflowGraph>)>,
}

impl WorkflowExecutor {
    pub fn new(task_repo: Arc<dyn TaskRepository>, config: Option<WorkflowConfig>) -> Self {
        Self {
            task_repo,
            config: config.unwrap_or_default(),
            graphs: DashMap::new(),
        }
    }

    /// 获取工作流的DAG，定义不变时复用已构建的图
    pub fn graph_for(&self, job: &Job) -> SchedulerResult<Arc<WorkflowGraph>> {
        let JobTarget::Workflow { nodes, edges } = &job.target else {
            return Err(SchedulerError::Internal(format!("作业 {} 不是工作流", job.id)));
        };

        let fingerprint = content_hash(&serde_json::to_vec(&job.target)?);
        if let Some(cached) = self.graphs.get(&job.id) {
            if cached.0 == fingerprint {
                return Ok(cached.1.clone());
            }
        }

        let graph = Arc::new(validate_workflow(nodes, edges, self.config.max_nodes)?);
        self.graphs.insert(job.id, (fingerprint, graph.clone()));
        Ok(graph)
    }

    /// 从所有起点开始一个新的执行实例
    pub async fn start(&self, execution: &Execution, job: &Job) -> SchedulerResult<WorkflowProgress> {
        let graph = self.graph_for(job)?;
        let mut progress = WorkflowProgress::default();
        let mut completed = Vec::new();

        for origin in graph.origins() {
            if let Some(task) = self.materialize(execution, job, origin).await? {
                route(origin, task, &mut progress, &mut completed);
            }
        }

        self.drain(&graph, execution, job, completed, progress).await
    }

    /// 某个节点任务到达终态后推进工作流
    pub async fn advance(
        &self,
        execution: &Execution,
        job: &Job,
        finished: &Task,
    ) -> SchedulerResult<WorkflowProgress> {
        let graph = self.graph_for(job)?;
        let progress = WorkflowProgress::default();

        match finished.status {
            TaskStatus::Succeed => {
                self.drain(&graph, execution, job, vec![finished.clone()], progress)
                    .await
            }
            TaskStatus::Cancelled => Ok(WorkflowProgress {
                outcome: Some(ExecutionStatus::Cancelled),
                ..progress
            }),
            TaskStatus::Failed | TaskStatus::Terminated => Ok(WorkflowProgress {
                outcome: Some(ExecutionStatus::Failed),
                ..progress
            }),
            _ => Ok(progress),
        }
    }

    async fn drain(
        &self,
        graph: &WorkflowGraph,
        execution: &Execution,
        job: &Job,
        mut completed: Vec<Task>,
        mut progress: WorkflowProgress,
    ) -> SchedulerResult<WorkflowProgress> {
        let mut succeeded: HashSet<String> = self
            .task_repo
            .find_by_execution(execution.id)
            .await?
            .into_iter()
            .filter(|t| t.status == TaskStatus::Succeed)
            .map(|t| t.ref_id)
            .collect();

        while let Some(done) = completed.pop() {
            succeeded.insert(done.ref_id.clone());

            for next in graph.successors(&done.ref_id) {
                let satisfied = graph
                    .predecessors(&next.id)
                    .iter()
                    .filter(|p| succeeded.contains(&p.id))
                    .count();
                if !graph.fan_in_satisfied(&next.id, satisfied) {
                    debug!(
                        "节点 {} 汇聚未完成: {}/{}",
                        next.id,
                        satisfied,
                        graph.predecessor_count(&next.id)
                    );
                    continue;
                }

                if let Some(task) = self.materialize(execution, job, next).await? {
                    route(next, task, &mut progress, &mut completed);
                }
            }
        }

        let lasts = graph.lasts();
        if !lasts.is_empty() && lasts.iter().all(|n| succeeded.contains(&n.id)) {
            progress.outcome = Some(ExecutionStatus::Completed);
        }
        Ok(progress)
    }

    /// 为节点创建任务，控制节点直接标记为成功；节点任务已存在时返回 `None`
    async fn materialize(
        &self,
        execution: &Execution,
        job: &Job,
        node: &WorkflowNode,
    ) -> SchedulerResult<Option<Task>> {
        let executor = node.executor.clone().unwrap_or_default();
        let mut task = Task::new(execution.id, job.id, node.id.clone(), executor, execution.trigger_at)
            .with_param(node.param.clone());

        if node.is_control_flow() {
            let now = Utc::now();
            TaskStateMachine::apply(&mut task, TaskStatus::Dispatched, now)?;
            TaskStateMachine::apply(&mut task, TaskStatus::Succeed, now)?;
        }

        let created = self.task_repo.create_if_absent(&task).await?;
        if created.is_none() {
            debug!("执行实例 {} 的节点 {} 已创建过任务", execution.id, node.id);
        }
        Ok(created)
    }
}

fn route(node: &WorkflowNode, task: Task, progress: &mut WorkflowProgress, completed: &mut Vec<Task>) {
    if node.is_control_flow() {
        completed.push(task);
    } else {
        progress.ready.push(task);
    }
}
