//! 命令 / 查询消息端口
//!
//! 调度核心只依赖 `send(command) -> result` 这一原语，不关心消息如何路由。
//! 与消息具体类型匹配的处理器被调用，从调用方看是同步完成的。

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use scheduler_core::models::{Execution, ScheduleOption, Task, TaskStatusReport};
use scheduler_core::SchedulerResult;

/// 会修改状态并返回结果的消息
pub trait Command: Send + 'static {
    type Output: Send + 'static;
}

/// 只读消息
pub trait Query: Send + 'static {
    type Output: Send + 'static;
}

#[async_trait]
pub trait CommandHandler<C: Command>: Send + Sync {
    async fn handle(&self, command: C) -> SchedulerResult<C::Output>;
}

#[async_trait]
pub trait QueryHandler<Q: Query>: Send + Sync {
    async fn handle(&self, query: Q) -> SchedulerResult<Q::Output>;
}

/// 发布（新建或更新）调度计划
#[derive(Debug, Clone)]
pub struct PublishScheduleCommand {
    pub schedule_id: i64,
    pub job_id: i64,
    pub option: ScheduleOption,
    /// 更新时携带调用方看到的版本号
    pub expected_version: Option<String>,
}

impl Command for PublishScheduleCommand {
    /// 发布后的版本号
    type Output = String;
}

/// 立即触发一次
#[derive(Debug, Clone)]
pub struct TriggerScheduleCommand {
    pub schedule_id: i64,
    pub trigger_at: Option<DateTime<Utc>>,
}

impl Command for TriggerScheduleCommand {
    /// 手动定时器的ID
    type Output = String;
}

#[derive(Debug, Clone)]
pub struct ReportTaskStatusCommand {
    pub report: TaskStatusReport,
}

impl Command for ReportTaskStatusCommand {
    type Output = ();
}

#[derive(Debug, Clone)]
pub struct CancelExecutionCommand {
    pub execution_id: i64,
}

impl Command for CancelExecutionCommand {
    /// 被取消的任务数量
    type Output = usize;
}

/// 查询执行实例及其全部任务
#[derive(Debug, Clone)]
pub struct GetExecutionQuery {
    pub execution_id: i64,
}

impl Query for GetExecutionQuery {
    type Output = Option<(Execution, Vec<Task>)>;
}
