//! 任务生命周期状态机与重试策略

use chrono::{DateTime, Utc};
use tracing::debug;

use scheduler_core::models::{RetryPolicy, RetryType, Task, TaskStatus};
use scheduler_core::{SchedulerError, SchedulerResult};

/// 状态转换表
pub struct TaskStateMachine;

impl TaskStateMachine {
    /// 允许的状态转换，同一状态不算转换
    pub fn can_transition(from: TaskStatus, to: TaskStatus) -> bool {
        use TaskStatus::*;

        match (from, to) {
            (Created, Dispatched) => true,
            (Dispatched, Running) | (Dispatched, Succeed) => true,
            (Running, Succeed) => true,
            (Created | Dispatched | Running | Restarted, Failed) => true,
            (Failed, Restarted) | (Paused, Restarted) => true,
            (Restarted, Dispatched) => true,
            (Created | Dispatched | Running | Restarted, Paused) => true,
            (Created | Dispatched | Running | Restarted | Paused, Cancelled | Terminated) => true,
            // 失败但还在等待重试的任务也可以被取消
            (Failed, Cancelled | Terminated) => true,
            _ => false,
        }
    }

    /// 对任务应用状态转换并维护开始/结束时间
    ///
    /// 目标状态与当前状态相同时不做任何修改，返回 `false`。
    pub fn apply(task: &mut Task, to: TaskStatus, at: DateTime<Utc>) -> SchedulerResult<bool> {
        let from = task.status;
        if from == to {
            return Ok(false);
        }
        if !Self::can_transition(from, to) {
            return Err(SchedulerError::InvalidTransition {
                from: from.to_string(),
                to: to.to_string(),
            });
        }

        match to {
            TaskStatus::Dispatched => {
                task.end_at = None;
            }
            TaskStatus::Running => {
                task.start_at = Some(at);
            }
            TaskStatus::Succeed
            | TaskStatus::Failed
            | TaskStatus::Cancelled
            | TaskStatus::Terminated => {
                task.start_at.get_or_insert(at);
                task.end_at = Some(at);
            }
            TaskStatus::Restarted => {
                // 从暂停恢复不消耗重试次数
                if from == TaskStatus::Failed {
                    task.retry_count += 1;
                }
                task.start_at = None;
                task.end_at = None;
                task.error_message = None;
            }
            TaskStatus::Created | TaskStatus::Paused => {}
        }

        debug!("任务 {} 状态转换: {} -> {}", task.id, from, to);
        task.status = to;
        task.updated_at = at;
        Ok(true)
    }

    /// 执行实例整体重试（广播任务）时重新开始一个子任务
    ///
    /// 与单任务重试不同，`RetryType::All` 会把已成功的子任务也重新分发。
    pub fn restart_for_batch(task: &mut Task, at: DateTime<Utc>) -> SchedulerResult<()> {
        if task.status == TaskStatus::Succeed {
            debug!("任务 {} 随执行实例整体重试", task.id);
            task.status = TaskStatus::Failed;
        }
        Self::apply(task, TaskStatus::Restarted, at).map(|_| ())
    }

    /// 任务是否已不再变化
    pub fn is_terminal(task: &Task, retry: &RetryPolicy) -> bool {
        match task.status {
            TaskStatus::Succeed | TaskStatus::Cancelled | TaskStatus::Terminated => true,
            TaskStatus::Failed => !retry.can_retry(task.retry_count),
            _ => false,
        }
    }

    /// 本次尝试已结束（不考虑是否还会重试）
    pub fn is_settled(status: TaskStatus) -> bool {
        matches!(
            status,
            TaskStatus::Succeed | TaskStatus::Failed | TaskStatus::Cancelled | TaskStatus::Terminated
        )
    }
}

/// 重试时需要重新分发的子任务
pub fn retry_targets(tasks: &[Task], retry_type: RetryType) -> Vec<&Task> {
    tasks
        .iter()
        .filter(|t| !matches!(t.status, TaskStatus::Cancelled | TaskStatus::Terminated))
        .filter(|t| match retry_type {
            RetryType::All => true,
            RetryType::OnlyFailPart => t.status != TaskStatus::Succeed,
        })
        .collect()
}

/// 一组子任务汇总后的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BatchOutcome {
    /// 仍有子任务未结束
    Pending,
    Succeeded,
    /// 至少一个子任务失败
    Failed,
    Cancelled,
}

pub fn batch_outcome(tasks: &[Task]) -> BatchOutcome {
    if tasks.iter().any(|t| !TaskStateMachine::is_settled(t.status)) {
        return BatchOutcome::Pending;
    }
    if tasks.iter().all(|t| t.status == TaskStatus::Succeed) {
        BatchOutcome::Succeeded
    } else if tasks.iter().any(|t| t.status == TaskStatus::Failed) {
        BatchOutcome::Failed
    } else {
        BatchOutcome::Cancelled
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(status: TaskStatus) -> Task {
        let mut task = Task::new(1, 1, "", "echo", Utc::now());
        task.status = status;
        task
    }

    #[test]
    fn test_happy_path() {
        let mut t = task(TaskStatus::Created);
        let now = Utc::now();
        assert!(TaskStateMachine::apply(&mut t, TaskStatus::Dispatched, now).unwrap());
        assert!(TaskStateMachine::apply(&mut t, TaskStatus::Running, now).unwrap());
        assert!(!TaskStateMachine::apply(&mut t, TaskStatus::Running, now).unwrap());
        assert!(TaskStateMachine::apply(&mut t, TaskStatus::Succeed, now).unwrap());
        assert_eq!(t.end_at, Some(now));
    }

    #[test]
    fn test_illegal_transitions() {
        let mut t = task(TaskStatus::Succeed);
        let err = TaskStateMachine::apply(&mut t, TaskStatus::Running, Utc::now()).unwrap_err();
        assert!(matches!(err, SchedulerError::InvalidTransition { .. }));

        assert!(!TaskStateMachine::can_transition(TaskStatus::Created, TaskStatus::Running));
        assert!(!TaskStateMachine::can_transition(TaskStatus::Cancelled, TaskStatus::Restarted));
    }

    #[test]
    fn test_restart_increments_retry_count() {
        let mut t = task(TaskStatus::Failed);
        t.error_message = Some("boom".into());
        TaskStateMachine::apply(&mut t, TaskStatus::Restarted, Utc::now()).unwrap();
        assert_eq!(t.retry_count, 1);
        assert!(t.error_message.is_none());

        let mut paused = task(TaskStatus::Paused);
        TaskStateMachine::apply(&mut paused, TaskStatus::Restarted, Utc::now()).unwrap();
        assert_eq!(paused.retry_count, 0);
    }

    #[test]
    fn test_batch_restart_accepts_succeeded() {
        let mut t = task(TaskStatus::Succeed);
        TaskStateMachine::restart_for_batch(&mut t, Utc::now()).unwrap();
        assert_eq!(t.status, TaskStatus::Restarted);
        assert_eq!(t.retry_count, 1);

        let mut cancelled = task(TaskStatus::Cancelled);
        assert!(TaskStateMachine::restart_for_batch(&mut cancelled, Utc::now()).is_err());
    }

    #[test]
    fn test_failed_is_terminal_only_without_budget() {
        let retry = RetryPolicy::new(2, 0, RetryType::All);
        assert!(retry.can_retry(0));
        assert!(retry.can_retry(1));
        assert!(!retry.can_retry(2));

        let mut t = task(TaskStatus::Failed);
        assert!(!TaskStateMachine::is_terminal(&t, &retry));
        t.retry_count = 2;
        assert!(TaskStateMachine::is_terminal(&t, &retry));
        assert!(TaskStateMachine::is_terminal(&task(TaskStatus::Cancelled), &retry));
    }

    #[test]
    fn test_retry_targets_by_type() {
        let tasks = vec![
            task(TaskStatus::Succeed),
            task(TaskStatus::Failed),
            task(TaskStatus::Terminated),
        ];
        assert_eq!(retry_targets(&tasks, RetryType::All).len(), 2);
        let only_failed = retry_targets(&tasks, RetryType::OnlyFailPart);
        assert_eq!(only_failed.len(), 1);
        assert_eq!(only_failed[0].status, TaskStatus::Failed);
    }

    #[test]
    fn test_batch_outcome() {
        assert_eq!(
            batch_outcome(&[task(TaskStatus::Succeed), task(TaskStatus::Running)]),
            BatchOutcome::Pending
        );
        assert_eq!(
            batch_outcome(&[task(TaskStatus::Succeed), task(TaskStatus::Succeed)]),
            BatchOutcome::Succeeded
        );
        assert_eq!(
            batch_outcome(&[task(TaskStatus::Succeed), task(TaskStatus::Failed)]),
            BatchOutcome::Failed
        );
    }
}
