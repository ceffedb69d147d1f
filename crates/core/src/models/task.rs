use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};

/// 任务状态
///
/// ```text
/// CREATED → DISPATCHED → RUNNING → SUCCEED
///    ↓          ↓           ↓
///    └──────────┴───────→ FAILED → RESTARTED → DISPATCHED ...
/// ```
/// 外部控制可在任意非终止状态下转为 CANCELLED / TERMINATED / PAUSED。
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TaskStatus {
    Created,
    Dispatched,
    Running,
    Succeed,
    Failed,
    Restarted,
    Cancelled,
    Terminated,
    Paused,
}

impl TaskStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            TaskStatus::Created => "CREATED",
            TaskStatus::Dispatched => "DISPATCHED",
            TaskStatus::Running => "RUNNING",
            TaskStatus::Succeed => "SUCCEED",
            TaskStatus::Failed => "FAILED",
            TaskStatus::Restarted => "RESTARTED",
            TaskStatus::Cancelled => "CANCELLED",
            TaskStatus::Terminated => "TERMINATED",
            TaskStatus::Paused => "PAUSED",
        }
    }

    /// 尚在处理中（等待分发或已交给Worker）
    pub fn is_in_flight(&self) -> bool {
        matches!(
            self,
            TaskStatus::Created | TaskStatus::Dispatched | TaskStatus::Running | TaskStatus::Restarted
        )
    }
}

impl fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for TaskStatus {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "CREATED" => Ok(TaskStatus::Created),
            "DISPATCHED" => Ok(TaskStatus::Dispatched),
            "RUNNING" => Ok(TaskStatus::Running),
            "SUCCEED" => Ok(TaskStatus::Succeed),
            "FAILED" => Ok(TaskStatus::Failed),
            "RESTARTED" => Ok(TaskStatus::Restarted),
            "CANCELLED" => Ok(TaskStatus::Cancelled),
            "TERMINATED" => Ok(TaskStatus::Terminated),
            "PAUSED" => Ok(TaskStatus::Paused),
            _ => Err(SchedulerError::Internal(format!("未知的任务状态: {s}"))),
        }
    }
}

/// 一个可分发的工作单元
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: i64,
    /// 同一次触发产生的所有任务共享同一个执行ID
    pub execution_id: i64,
    pub job_id: i64,
    /// 工作流节点ID，独立执行器任务为空
    pub ref_id: String,
    pub executor: String,
    pub param: serde_json::Value,
    pub status: TaskStatus,
    pub trigger_at: DateTime<Utc>,
    pub start_at: Option<DateTime<Utc>>,
    pub end_at: Option<DateTime<Utc>>,
    pub retry_count: u32,
    pub worker_address: Option<String>,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl Task {
    pub fn new(
        execution_id: i64,
        job_id: i64,
        ref_id: impl Into<String>,
        executor: impl Into<String>,
        trigger_at: DateTime<Utc>,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: 0, // 由仓储生成
            execution_id,
            job_id,
            ref_id: ref_id.into(),
            executor: executor.into(),
            param: serde_json::Value::Null,
            status: TaskStatus::Created,
            trigger_at,
            start_at: None,
            end_at: None,
            retry_count: 0,
            worker_address: None,
            error_message: None,
            created_at: now,
            updated_at: now,
        }
    }

    pub fn with_param(mut self, param: serde_json::Value) -> Self {
        self.param = param;
        self
    }

    pub fn is_workflow_node(&self) -> bool {
        !self.ref_id.is_empty()
    }
}

/// 执行实例状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ExecutionStatus {
    Running,
    Completed,
    Failed,
    Cancelled,
}

impl ExecutionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ExecutionStatus::Running => "RUNNING",
            ExecutionStatus::Completed => "COMPLETED",
            ExecutionStatus::Failed => "FAILED",
            ExecutionStatus::Cancelled => "CANCELLED",
        }
    }

    pub fn is_finished(&self) -> bool {
        !matches!(self, ExecutionStatus::Running)
    }
}

impl fmt::Display for ExecutionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 一次触发对应的执行实例
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Execution {
    pub id: i64,
    pub job_id: i64,
    pub schedule_id: Option<i64>,
    pub trigger_at: DateTime<Utc>,
    pub status: ExecutionStatus,
    /// 广播执行整体重试的次数
    pub retried: u32,
    /// 手动触发的执行不影响周期触发的时间记录
    #[serde(default)]
    pub manual: bool,
    pub created_at: DateTime<Utc>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Execution {
    pub fn new(id: i64, job_id: i64, schedule_id: Option<i64>, trigger_at: DateTime<Utc>) -> Self {
        Self {
            id,
            job_id,
            schedule_id,
            trigger_at,
            status: ExecutionStatus::Running,
            retried: 0,
            manual: false,
            created_at: Utc::now(),
            completed_at: None,
        }
    }

    pub fn with_manual(mut self, manual: bool) -> Self {
        self.manual = manual;
        self
    }
}

/// Worker上报的任务状态
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskStatusReport {
    pub task_id: i64,
    pub status: TaskStatus,
    pub worker_address: String,
    pub message: Option<String>,
    pub reported_at: DateTime<Utc>,
}

/// 发送给Worker的分发载荷
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPayload {
    pub task_id: i64,
    pub execution_id: i64,
    pub job_id: i64,
    pub executor: String,
    pub param: serde_json::Value,
    pub retry_count: u32,
    pub trigger_at: DateTime<Utc>,
}

impl From<&Task> for DispatchPayload {
    fn from(task: &Task) -> Self {
        Self {
            task_id: task.id,
            execution_id: task.execution_id,
            job_id: task.job_id,
            executor: task.executor.clone(),
            param: task.param.clone(),
            retry_count: task.retry_count,
            trigger_at: task.trigger_at,
        }
    }
}
