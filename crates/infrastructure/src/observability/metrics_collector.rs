//! Metrics for the scheduling engine, exposed through the `metrics` facade

use metrics::{counter, gauge, histogram, Counter, Gauge, Histogram};

/// Metrics collector for the scheduling engine
///
/// 没有安装exporter时所有记录都是空操作。
pub struct MetricsCollector {
    schedule_fires_total: Counter,
    timer_body_errors_total: Counter,
    armed_timers: Gauge,

    dispatch_success_total: Counter,
    dispatch_failures_total: Counter,
    dispatch_duration: Histogram,
    task_retries_total: Counter,

    executions_completed_total: Counter,
    executions_failed_total: Counter,

    rebalance_runs_total: Counter,
    rebalance_skipped_total: Counter,
    owned_buckets: Gauge,
}

impl MetricsCollector {
    pub fn new() -> Self {
        Self {
            schedule_fires_total: counter!("scheduler_schedule_fires_total"),
            timer_body_errors_total: counter!("scheduler_timer_body_errors_total"),
            armed_timers: gauge!("scheduler_armed_timers"),
            dispatch_success_total: counter!("scheduler_dispatch_total", "outcome" => "success"),
            dispatch_failures_total: counter!("scheduler_dispatch_total", "outcome" => "failure"),
            dispatch_duration: histogram!("scheduler_dispatch_duration_seconds"),
            task_retries_total: counter!("scheduler_task_retries_total"),
            executions_completed_total: counter!(
                "scheduler_executions_total",
                "status" => "completed"
            ),
            executions_failed_total: counter!("scheduler_executions_total", "status" => "failed"),
            rebalance_runs_total: counter!("scheduler_rebalance_total", "outcome" => "applied"),
            rebalance_skipped_total: counter!("scheduler_rebalance_total", "outcome" => "skipped"),
            owned_buckets: gauge!("scheduler_owned_buckets"),
        }
    }

    pub fn record_fire(&self) {
        self.schedule_fires_total.increment(1);
    }

    pub fn record_timer_error(&self) {
        self.timer_body_errors_total.increment(1);
    }

    pub fn set_armed_timers(&self, count: usize) {
        self.armed_timers.set(count as f64);
    }

    pub fn record_dispatch(&self, success: bool, duration_seconds: f64) {
        if success {
            self.dispatch_success_total.increment(1);
        } else {
            self.dispatch_failures_total.increment(1);
        }
        self.dispatch_duration.record(duration_seconds);
    }

    pub fn record_retry(&self) {
        self.task_retries_total.increment(1);
    }

    pub fn record_execution_finished(&self, success: bool) {
        if success {
            self.executions_completed_total.increment(1);
        } else {
            self.executions_failed_total.increment(1);
        }
    }

    pub fn record_rebalance(&self, applied: bool) {
        if applied {
            self.rebalance_runs_total.increment(1);
        } else {
            self.rebalance_skipped_total.increment(1);
        }
    }

    pub fn set_owned_buckets(&self, count: usize) {
        self.owned_buckets.set(count as f64);
    }
}

impl Default for MetricsCollector {
    fn default() -> Self {
        Self::new()
    }
}
