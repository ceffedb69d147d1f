mod common;

use chrono::Utc;

use scheduler_core::models::{
    DispatchPolicy, ExecutionStatus, Job, RetryPolicy, RetryType, TaskStatus, TaskStatusReport,
};
use scheduler_core::SchedulerError;

use common::{eventually, Harness, APP, EXECUTOR};

fn executor_job(id: i64) -> Job {
    Job::executor(id, APP, "sync-orders", EXECUTOR)
}

fn broadcast_job(id: i64, retry: RetryPolicy) -> Job {
    executor_job(id)
        .with_dispatch(DispatchPolicy {
            broadcast: true,
            ..DispatchPolicy::default()
        })
        .with_retry(retry)
}

#[tokio::test]
async fn test_single_task_dispatched_and_completed() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(1);
    h.save_job(&job).await;
    let execution = h.new_execution(100, &job).await;

    h.dispatcher.launch(&execution, &job).await.unwrap();

    let tasks = h.tasks_of(100).await;
    assert_eq!(tasks.len(), 1);
    let task = &tasks[0];
    assert_eq!(task.status, TaskStatus::Dispatched);
    assert_eq!(task.worker_address.as_deref(), Some("10.0.0.1:7001"));
    assert_eq!(h.transport.call_count(), 1);
    assert_eq!(h.transport.calls()[0].1.task_id, task.id);

    h.report(task.id, TaskStatus::Running).await.unwrap();
    assert_eq!(h.task(task.id).await.status, TaskStatus::Running);
    assert!(h.task(task.id).await.start_at.is_some());

    h.report(task.id, TaskStatus::Succeed).await.unwrap();
    let execution = h.execution(100).await;
    assert_eq!(execution.status, ExecutionStatus::Completed);
    assert!(execution.completed_at.is_some());
}

#[tokio::test]
async fn test_no_worker_fails_without_consuming_retry() {
    let h = &Harness::new();
    let job = executor_job(2);
    h.save_job(&job).await;
    let execution = h.new_execution(200, &job).await;

    h.dispatcher.launch(&execution, &job).await.unwrap();

    let task = h.tasks_of(200).await.remove(0);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 0);
    assert!(task.error_message.is_some());
    assert_eq!(h.transport.call_count(), 0);
    assert_eq!(h.execution(200).await.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_worker_rejection_goes_through_failure_path() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    h.transport.reject_all(true);
    let job = executor_job(3);
    h.save_job(&job).await;
    let execution = h.new_execution(300, &job).await;

    h.dispatcher.launch(&execution, &job).await.unwrap();

    let task = h.tasks_of(300).await.remove(0);
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.worker_address.as_deref(), Some("10.0.0.1:7001"));
    assert_eq!(h.execution(300).await.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_late_dispatch_timeout_keeps_reported_success() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    // 分发调用在500ms超时之后才返回，Worker在此之前已经执行完毕
    h.transport.respond_after(std::time::Duration::from_millis(800));
    let job = executor_job(13);
    h.save_job(&job).await;
    let execution = h.new_execution(1300, &job).await;

    let report = async {
        assert!(eventually(|| async move { h.transport.call_count() == 1 }).await);
        let task_id = h.transport.calls()[0].1.task_id;
        h.report(task_id, TaskStatus::Running).await.unwrap();
        h.report(task_id, TaskStatus::Succeed).await.unwrap();
        task_id
    };
    let (launched, task_id) = tokio::join!(h.dispatcher.launch(&execution, &job), report);
    launched.unwrap();

    let task = h.task(task_id).await;
    assert_eq!(task.status, TaskStatus::Succeed);
    assert!(task.error_message.is_none());
    assert_eq!(h.execution(1300).await.status, ExecutionStatus::Completed);
    assert_eq!(h.transport.call_count(), 1);
}

#[tokio::test]
async fn test_failed_task_retried_until_budget_exhausted() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(4).with_retry(RetryPolicy::new(2, 0, RetryType::All));
    h.save_job(&job).await;
    let execution = h.new_execution(400, &job).await;

    h.dispatcher.launch(&execution, &job).await.unwrap();
    let task_id = h.tasks_of(400).await[0].id;

    for expected_retry in 1..=2u32 {
        h.report(task_id, TaskStatus::Failed).await.unwrap();
        let redispatched = eventually(|| async move {
            let task = h.task(task_id).await;
            task.status == TaskStatus::Dispatched && task.retry_count == expected_retry
        })
        .await;
        assert!(redispatched, "第 {expected_retry} 次重试没有重新分发");
        assert_eq!(h.execution(400).await.status, ExecutionStatus::Running);
    }

    h.report(task_id, TaskStatus::Failed).await.unwrap();
    let task = h.task(task_id).await;
    assert_eq!(task.status, TaskStatus::Failed);
    assert_eq!(task.retry_count, 2);
    assert_eq!(h.execution(400).await.status, ExecutionStatus::Failed);
    assert_eq!(h.transport.call_count(), 3);
}

#[tokio::test]
async fn test_report_from_other_worker_is_ignored() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(5);
    h.save_job(&job).await;
    let execution = h.new_execution(500, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();
    let task_id = h.tasks_of(500).await[0].id;

    h.dispatcher
        .handle_report(TaskStatusReport {
            task_id,
            status: TaskStatus::Succeed,
            worker_address: "10.0.0.9:7001".to_string(),
            message: None,
            reported_at: Utc::now(),
        })
        .await
        .unwrap();

    assert_eq!(h.task(task_id).await.status, TaskStatus::Dispatched);
    assert_eq!(h.execution(500).await.status, ExecutionStatus::Running);
}

#[tokio::test]
async fn test_report_with_unsupported_status_is_rejected() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(6);
    h.save_job(&job).await;
    let execution = h.new_execution(600, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();
    let task_id = h.tasks_of(600).await[0].id;

    let result = h.report(task_id, TaskStatus::Paused).await;
    assert!(matches!(
        result,
        Err(SchedulerError::InvalidTransition { .. })
    ));
}

#[tokio::test]
async fn test_broadcast_dispatches_to_every_eligible_worker() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001", "10.0.0.2:7001", "10.0.0.3:7001"]);
    let job = broadcast_job(7, RetryPolicy::default());
    h.save_job(&job).await;
    let execution = h.new_execution(700, &job).await;

    h.dispatcher.launch(&execution, &job).await.unwrap();

    let tasks = h.tasks_of(700).await;
    assert_eq!(tasks.len(), 3);
    let mut addresses: Vec<String> = tasks
        .iter()
        .filter_map(|t| t.worker_address.clone())
        .collect();
    addresses.sort();
    assert_eq!(
        addresses,
        vec!["10.0.0.1:7001", "10.0.0.2:7001", "10.0.0.3:7001"]
    );
    assert!(tasks.iter().all(|t| t.status == TaskStatus::Dispatched));

    for (i, task) in tasks.iter().enumerate() {
        h.report(task.id, TaskStatus::Succeed).await.unwrap();
        let expected = if i + 1 == tasks.len() {
            ExecutionStatus::Completed
        } else {
            ExecutionStatus::Running
        };
        assert_eq!(h.execution(700).await.status, expected);
    }
}

#[tokio::test]
async fn test_broadcast_retry_only_redispatches_failed_part() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001", "10.0.0.2:7001"]);
    let job = broadcast_job(8, RetryPolicy::new(1, 0, RetryType::OnlyFailPart));
    h.save_job(&job).await;
    let execution = h.new_execution(800, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();

    let tasks = h.tasks_of(800).await;
    let ok = tasks.iter().find(|t| t.worker_address.as_deref() == Some("10.0.0.1:7001")).unwrap().id;
    let bad = tasks.iter().find(|t| t.worker_address.as_deref() == Some("10.0.0.2:7001")).unwrap().id;

    h.report(ok, TaskStatus::Succeed).await.unwrap();
    h.report(bad, TaskStatus::Failed).await.unwrap();

    let redispatched = eventually(|| async move {
        let task = h.task(bad).await;
        task.status == TaskStatus::Dispatched && task.retry_count == 1
    })
    .await;
    assert!(redispatched);
    assert_eq!(h.task(bad).await.worker_address.as_deref(), Some("10.0.0.2:7001"));
    assert_eq!(h.task(ok).await.status, TaskStatus::Succeed);
    assert_eq!(h.execution(800).await.retried, 1);
    assert_eq!(h.transport.call_count(), 3);

    h.report(bad, TaskStatus::Succeed).await.unwrap();
    assert_eq!(h.execution(800).await.status, ExecutionStatus::Completed);
}

#[tokio::test]
async fn test_broadcast_retry_all_restarts_succeeded_tasks() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001", "10.0.0.2:7001"]);
    let job = broadcast_job(9, RetryPolicy::new(1, 0, RetryType::All));
    h.save_job(&job).await;
    let execution = h.new_execution(900, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();

    let tasks = h.tasks_of(900).await;
    let (first, second) = (tasks[0].id, tasks[1].id);
    h.report(first, TaskStatus::Succeed).await.unwrap();
    h.report(second, TaskStatus::Failed).await.unwrap();

    let redispatched = eventually(|| async move {
        let tasks = h.tasks_of(900).await;
        tasks.iter().all(|t| t.status == TaskStatus::Dispatched && t.retry_count == 1)
    })
    .await;
    assert!(redispatched);
    assert_eq!(h.transport.call_count(), 4);
}

#[tokio::test]
async fn test_cancel_execution_cancels_unfinished_tasks() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001", "10.0.0.2:7001"]);
    let job = broadcast_job(10, RetryPolicy::default());
    h.save_job(&job).await;
    let execution = h.new_execution(1000, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();

    let tasks = h.tasks_of(1000).await;
    h.report(tasks[0].id, TaskStatus::Succeed).await.unwrap();

    let cancelled = h.dispatcher.cancel_execution(1000).await.unwrap();
    assert_eq!(cancelled, 1);
    assert_eq!(h.task(tasks[0].id).await.status, TaskStatus::Succeed);
    assert_eq!(h.task(tasks[1].id).await.status, TaskStatus::Cancelled);
    assert_eq!(h.execution(1000).await.status, ExecutionStatus::Cancelled);
}

#[tokio::test]
async fn test_pause_and_resume_keeps_retry_budget() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(11);
    h.save_job(&job).await;
    let execution = h.new_execution(1100, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();
    let task_id = h.tasks_of(1100).await[0].id;

    let paused = h.dispatcher.pause_task(task_id).await.unwrap();
    assert_eq!(paused.status, TaskStatus::Paused);

    h.dispatcher.resume_task(task_id).await.unwrap();
    let task = h.task(task_id).await;
    assert_eq!(task.status, TaskStatus::Dispatched);
    assert_eq!(task.retry_count, 0);
    assert_eq!(h.transport.call_count(), 2);

    // 非暂停状态不能恢复
    assert!(h.dispatcher.resume_task(task_id).await.is_err());
}

#[tokio::test]
async fn test_terminate_task_fails_execution() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(12);
    h.save_job(&job).await;
    let execution = h.new_execution(1200, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();
    let task_id = h.tasks_of(1200).await[0].id;

    h.dispatcher.terminate_task(task_id).await.unwrap();

    assert_eq!(h.task(task_id).await.status, TaskStatus::Terminated);
    assert_eq!(h.execution(1200).await.status, ExecutionStatus::Failed);
}

#[tokio::test]
async fn test_get_execution_returns_tasks() {
    let h = &Harness::new();
    h.register_workers(&["10.0.0.1:7001"]);
    let job = executor_job(13);
    h.save_job(&job).await;
    let execution = h.new_execution(1300, &job).await;
    h.dispatcher.launch(&execution, &job).await.unwrap();

    let (execution, tasks) = h.dispatcher.get_execution(1300).await.unwrap().unwrap();
    assert_eq!(execution.job_id, 13);
    assert_eq!(tasks.len(), 1);
    assert!(h.dispatcher.get_execution(9999).await.unwrap().is_none());
}
