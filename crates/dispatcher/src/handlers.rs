//! 命令 / 查询处理器

use std::sync::Arc;

use async_trait::async_trait;

use scheduler_core::models::{Execution, Task};
use scheduler_core::SchedulerResult;
use scheduler_domain::{
    CancelExecutionCommand, CommandHandler, GetExecutionQuery, PublishScheduleCommand,
    QueryHandler, ReportTaskStatusCommand, TriggerScheduleCommand,
};
use scheduler_infrastructure::CommandBus;

use crate::dispatch_service::TaskDispatcher;
use crate::scheduler::ScheduleManager;

#[async_trait]
impl CommandHandler<PublishScheduleCommand> for ScheduleManager {
    async fn handle(&self, command: PublishScheduleCommand) -> SchedulerResult<String> {
        self.publish(command).await
    }
}

#[async_trait]
impl CommandHandler<TriggerScheduleCommand> for ScheduleManager {
    async fn handle(&self, command: TriggerScheduleCommand) -> SchedulerResult<String> {
        self.trigger_now(command.schedule_id, command.trigger_at)
            .await
    }
}

#[async_trait]
impl CommandHandler<ReportTaskStatusCommand> for TaskDispatcher {
    async fn handle(&self, command: ReportTaskStatusCommand) -> SchedulerResult<()> {
        self.handle_report(command.report).await
    }
}

#[async_trait]
impl CommandHandler<CancelExecutionCommand> for TaskDispatcher {
    async fn handle(&self, command: CancelExecutionCommand) -> SchedulerResult<usize> {
        self.cancel_execution(command.execution_id).await
    }
}

#[async_trait]
impl QueryHandler<GetExecutionQuery> for TaskDispatcher {
    async fn handle(
        &self,
        query: GetExecutionQuery,
    ) -> SchedulerResult<Option<(Execution, Vec<Task>)>> {
        self.get_execution(query.execution_id).await
    }
}

/// 把调度计划和任务相关的处理器注册到命令总线
pub fn register_handlers(
    bus: &CommandBus,
    manager: Arc<ScheduleManager>,
    dispatcher: Arc<TaskDispatcher>,
) {
    bus.register_command::<PublishScheduleCommand>(manager.clone());
    bus.register_command::<TriggerScheduleCommand>(manager);
    bus.register_command::<ReportTaskStatusCommand>(dispatcher.clone());
    bus.register_command::<CancelExecutionCommand>(dispatcher.clone());
    bus.register_query::<GetExecutionQuery>(dispatcher);
}
