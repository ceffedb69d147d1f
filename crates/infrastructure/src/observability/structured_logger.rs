//! Structured logging helpers for scheduling events

use chrono::{DateTime, Utc};
use tracing::{debug, error, info, warn};

/// Structured logging utilities
pub struct StructuredLogger;

impl StructuredLogger {
    pub fn log_schedule_armed(schedule_id: i64, kind: &str, trigger_at: DateTime<Utc>) {
        debug!(
            event = "schedule_armed",
            schedule.id = schedule_id,
            schedule.kind = kind,
            schedule.trigger_at = %trigger_at,
            "Schedule armed"
        );
    }

    pub fn log_schedule_disarmed(schedule_id: i64, reason: &str) {
        info!(
            event = "schedule_disarmed",
            schedule.id = schedule_id,
            schedule.reason = reason,
            "Schedule disarmed"
        );
    }

    pub fn log_schedule_fired(schedule_id: i64, execution_id: i64, trigger_at: DateTime<Utc>) {
        info!(
            event = "schedule_fired",
            schedule.id = schedule_id,
            execution.id = execution_id,
            schedule.trigger_at = %trigger_at,
            "Schedule fired"
        );
    }

    pub fn log_task_dispatched(task_id: i64, execution_id: i64, executor: &str, worker: &str) {
        info!(
            event = "task_dispatched",
            task.id = task_id,
            execution.id = execution_id,
            task.executor = executor,
            worker.address = worker,
            "Task dispatched to worker"
        );
    }

    pub fn log_task_failed(task_id: i64, retry_count: u32, worker: Option<&str>, reason: &str) {
        warn!(
            event = "task_failed",
            task.id = task_id,
            task.retry_count = retry_count,
            worker.address = worker.unwrap_or("-"),
            task.error = reason,
            "Task failed"
        );
    }

    pub fn log_task_retry(task_id: i64, retry_count: u32, max_retries: u32, delay_ms: u64) {
        warn!(
            event = "task_retry",
            task.id = task_id,
            task.retry_count = retry_count,
            task.max_retries = max_retries,
            task.retry_delay_ms = delay_ms,
            "Task retry scheduled"
        );
    }

    pub fn log_execution_finished(execution_id: i64, status: &str) {
        info!(
            event = "execution_finished",
            execution.id = execution_id,
            execution.status = status,
            "Execution finished"
        );
    }

    pub fn log_buckets_rebalanced(broker_id: &str, alive_brokers: usize, reassigned: usize) {
        info!(
            event = "buckets_rebalanced",
            broker.id = broker_id,
            cluster.alive_brokers = alive_brokers,
            buckets.reassigned = reassigned,
            "Bucket ownership rebalanced"
        );
    }

    pub fn log_bucket_ownership_changed(broker_id: &str, gained: &[u32], lost: &[u32]) {
        info!(
            event = "bucket_ownership_changed",
            broker.id = broker_id,
            buckets.gained = ?gained,
            buckets.lost = ?lost,
            "Local bucket ownership changed"
        );
    }

    pub fn log_timer_body_error(timer_id: &str, error: &str) {
        error!(
            event = "timer_body_error",
            timer.id = timer_id,
            error = error,
            "Timer body returned an error"
        );
    }
}
