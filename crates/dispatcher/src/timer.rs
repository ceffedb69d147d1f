//! 定时器引擎
//!
//! 每个ID同一时刻最多只有一个已装载的定时器。到期后先检查停止标记，
//! 再把任务体交给有界的执行许可池；周期性定时器按调度类型在任务体之前
//! （FIXED_RATE / CRON）或之后（FIXED_DELAY）装载下一次。等待外部反馈的
//! FIXED_DELAY 任务体结束后保留在跟踪表中，由 [`TimerEngine::resume`] 按反馈时间装载。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use tokio::sync::Semaphore;
use tracing::{debug, error, warn};

use scheduler_core::models::{ScheduleKind, ScheduleOption};
use scheduler_core::SchedulerResult;
use scheduler_domain::{next_trigger, NEVER_TRIGGER_AT};
use scheduler_infrastructure::{MetricsCollector, StructuredLogger};

/// 定时器到期时执行的任务体
#[async_trait]
pub trait TimerBody: Send + Sync {
    async fn run(&self, timer_id: &str, trigger_at: DateTime<Utc>) -> SchedulerResult<()>;

    /// FIXED_DELAY 任务体返回后是否等待外部反馈再装载下一次
    fn awaits_feedback(&self) -> bool {
        false
    }
}

#[derive(Debug, Clone)]
pub enum TimerKind {
    /// 一次性延时任务，执行完即移除
    OneShot,
    Recurring {
        option: ScheduleOption,
        last_feedback_at: Option<DateTime<Utc>>,
    },
}

pub struct ScheduledTimer {
    id: String,
    trigger_at: DateTime<Utc>,
    /// 同一周期链上的所有后继定时器共享同一个停止标记
    stopped: Arc<AtomicBool>,
    fired: AtomicBool,
    kind: TimerKind,
    body: Arc<dyn TimerBody>,
}

impl ScheduledTimer {
    pub fn one_shot(
        id: impl Into<String>,
        trigger_at: DateTime<Utc>,
        body: Arc<dyn TimerBody>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_at,
            stopped: Arc::new(AtomicBool::new(false)),
            fired: AtomicBool::new(false),
            kind: TimerKind::OneShot,
            body,
        }
    }

    pub fn recurring(
        id: impl Into<String>,
        trigger_at: DateTime<Utc>,
        option: ScheduleOption,
        last_feedback_at: Option<DateTime<Utc>>,
        body: Arc<dyn TimerBody>,
    ) -> Self {
        Self {
            id: id.into(),
            trigger_at,
            stopped: Arc::new(AtomicBool::new(false)),
            fired: AtomicBool::new(false),
            kind: TimerKind::Recurring {
                option,
                last_feedback_at,
            },
            body,
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn trigger_at(&self) -> DateTime<Utc> {
        self.trigger_at
    }

    pub fn kind(&self) -> &TimerKind {
        &self.kind
    }

    pub fn is_stopped(&self) -> bool {
        self.stopped.load(Ordering::Acquire)
    }

    pub fn stop(&self) {
        self.stopped.store(true, Ordering::Release);
    }

    fn schedule_kind(&self) -> Option<ScheduleKind> {
        match &self.kind {
            TimerKind::OneShot => None,
            TimerKind::Recurring { option, .. } => Some(option.kind()),
        }
    }

    fn successor(&self, trigger_at: DateTime<Utc>, last_feedback_at: Option<DateTime<Utc>>) -> Self {
        let kind = match &self.kind {
            TimerKind::Recurring { option, .. } => TimerKind::Recurring {
                option: option.clone(),
                last_feedback_at,
            },
            TimerKind::OneShot => TimerKind::OneShot,
        };
        Self {
            id: self.id.clone(),
            trigger_at,
            stopped: self.stopped.clone(),
            fired: AtomicBool::new(false),
            kind,
            body: self.body.clone(),
        }
    }
}

struct TimerEngineInner {
    timers: DashMap<String, Arc<ScheduledTimer>>,
    permits: Arc<Semaphore>,
    metrics: Arc<MetricsCollector>,
}

/// 可克隆的定时器引擎句柄，所有克隆共享同一张跟踪表
#[derive(Clone)]
pub struct TimerEngine {
    inner: Arc<TimerEngineInner>,
}

impl TimerEngine {
    pub fn new(max_concurrent_executions: usize, metrics: Arc<MetricsCollector>) -> Self {
        Self {
            inner: Arc::new(TimerEngineInner {
                timers: DashMap::new(),
                permits: Arc::new(Semaphore::new(max_concurrent_executions.max(1))),
                metrics,
            }),
        }
    }

    /// 装载定时器，ID已存在时不做任何事并返回 `false`
    pub fn schedule(&self, timer: ScheduledTimer) -> bool {
        if timer.trigger_at == NEVER_TRIGGER_AT {
            debug!("定时器 {} 永不触发，跳过装载", timer.id);
            return false;
        }

        let timer = Arc::new(timer);
        match self.inner.timers.entry(timer.id.clone()) {
            Entry::Occupied(_) => {
                debug!("定时器 {} 已存在，忽略重复装载", timer.id);
                return false;
            }
            Entry::Vacant(entry) => {
                entry.insert(timer.clone());
            }
        }

        self.inner.metrics.set_armed_timers(self.inner.timers.len());
        self.arm(timer);
        true
    }

    /// 停止定时器，正在等待或即将执行的任务体会变成空操作
    pub fn stop(&self, id: &str) -> bool {
        let timer = self.inner.timers.get(id).map(|t| t.value().clone());
        let Some(timer) = timer else {
            return false;
        };
        self.stop_timer(&timer);
        debug!("定时器 {} 已停止", id);
        true
    }

    /// 只移除被停止的那一个，期间装载的后继由共享的停止标记处理，
    /// 之后以同一ID新装载的定时器不受影响
    fn stop_timer(&self, timer: &Arc<ScheduledTimer>) {
        timer.stop();
        self.release(timer);
    }

    pub fn stop_all(&self) -> usize {
        let ids = self.ids();
        ids.iter().filter(|id| self.stop(id)).count()
    }

    /// 用外部反馈时间装载等待中的 FIXED_DELAY 定时器的下一次触发
    ///
    /// 只有当前定时器已经触发过任务体时才生效，返回是否装载了后继。
    pub fn resume(&self, id: &str, feedback_at: DateTime<Utc>) -> bool {
        let timer = self.inner.timers.get(id).map(|t| t.value().clone());
        let Some(timer) = timer else {
            return false;
        };
        if timer.schedule_kind() != Some(ScheduleKind::FixedDelay)
            || !timer.fired.load(Ordering::Acquire)
        {
            debug!("定时器 {} 不在等待反馈，忽略", id);
            return false;
        }
        self.rearm(&timer, Some(feedback_at))
    }

    pub fn contains(&self, id: &str) -> bool {
        self.inner.timers.contains_key(id)
    }

    pub fn trigger_at(&self, id: &str) -> Option<DateTime<Utc>> {
        self.inner.timers.get(id).map(|t| t.trigger_at)
    }

    pub fn ids(&self) -> Vec<String> {
        self.inner.timers.iter().map(|e| e.key().clone()).collect()
    }

    pub fn len(&self) -> usize {
        self.inner.timers.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.timers.is_empty()
    }

    fn arm(&self, timer: Arc<ScheduledTimer>) {
        let engine = self.clone();
        tokio::spawn(async move {
            let delay = (timer.trigger_at - Utc::now())
                .to_std()
                .unwrap_or_default();
            tokio::time::sleep(delay).await;
            engine.fire(timer).await;
        });
    }

    async fn fire(&self, timer: Arc<ScheduledTimer>) {
        if timer.is_stopped() {
            self.release(&timer);
            return;
        }

        let rearm_first = timer
            .schedule_kind()
            .is_some_and(|kind| kind.rearm_before_execute());
        if rearm_first {
            self.rearm(&timer, None);
        }

        let permit = match self.inner.permits.clone().acquire_owned().await {
            Ok(permit) => permit,
            Err(e) => {
                error!("定时器 {} 获取执行许可失败: {}", timer.id, e);
                self.release(&timer);
                return;
            }
        };

        // 在许可等待期间可能已被停止
        if timer.is_stopped() {
            drop(permit);
            self.release(&timer);
            return;
        }

        timer.fired.store(true, Ordering::Release);
        let result = timer.body.run(&timer.id, timer.trigger_at).await;
        drop(permit);

        if let Err(e) = &result {
            StructuredLogger::log_timer_body_error(&timer.id, &e.to_string());
            self.inner.metrics.record_timer_error();
        }

        self.after_execute(&timer, result.is_ok());
    }

    fn after_execute(&self, timer: &Arc<ScheduledTimer>, succeeded: bool) {
        match timer.schedule_kind() {
            None => self.release(timer),
            Some(ScheduleKind::FixedDelay) if succeeded && timer.body.awaits_feedback() => {
                debug!("定时器 {} 等待反馈后装载下一次", timer.id);
            }
            Some(ScheduleKind::FixedDelay) => {
                // 任务体失败时不会有反馈，以当前时刻继续
                if self.is_current(timer) {
                    self.rearm(timer, Some(Utc::now()));
                }
            }
            // FIXED_RATE / CRON 已在执行前装载
            Some(_) => {}
        }
    }

    fn is_current(&self, timer: &Arc<ScheduledTimer>) -> bool {
        self.inner
            .timers
            .get(&timer.id)
            .is_some_and(|current| Arc::ptr_eq(current.value(), timer))
    }

    /// 计算并装载后继定时器，只在跟踪表中仍是当前定时器时替换
    fn rearm(&self, timer: &Arc<ScheduledTimer>, feedback_at: Option<DateTime<Utc>>) -> bool {
        let TimerKind::Recurring {
            option,
            last_feedback_at,
        } = &timer.kind
        else {
            return false;
        };

        if timer.is_stopped() {
            self.release(timer);
            return false;
        }

        let now = Utc::now();
        if !option.window_contains(now) {
            debug!("定时器 {} 已超出生效时间窗口，不再装载", timer.id);
            self.release(timer);
            return false;
        }

        let feedback_at = feedback_at.or(*last_feedback_at);
        let next = match next_trigger(option, Some(timer.trigger_at), feedback_at, now) {
            Ok(next) => next,
            Err(e) => {
                error!("定时器 {} 计算下次触发时间失败: {}", timer.id, e);
                self.release(timer);
                return false;
            }
        };

        if next == NEVER_TRIGGER_AT || option.end_time().is_some_and(|end| next > end) {
            debug!("定时器 {} 没有下一次触发时间", timer.id);
            self.release(timer);
            return false;
        }

        let successor = Arc::new(timer.successor(next, feedback_at));
        match self.inner.timers.entry(timer.id.clone()) {
            Entry::Occupied(mut entry) if Arc::ptr_eq(entry.get(), timer) => {
                entry.insert(successor.clone());
            }
            _ => {
                warn!("定时器 {} 已被停止或替换，放弃装载后继", timer.id);
                return false;
            }
        }

        // 与并发的 stop 竞争：插入后再检查一次
        if successor.is_stopped() {
            self.release(&successor);
            return false;
        }

        debug!("定时器 {} 装载下一次触发: {} ({})", timer.id, next, option.kind());
        self.arm(successor);
        true
    }

    fn release(&self, timer: &Arc<ScheduledTimer>) {
        self.inner
            .timers
            .remove_if(&timer.id, |_, current| Arc::ptr_eq(current, timer));
        self.inner.metrics.set_armed_timers(self.inner.timers.len());
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicUsize;

    struct Noop;

    #[async_trait]
    impl TimerBody for Noop {
        async fn run(&self, _timer_id: &str, _trigger_at: DateTime<Utc>) -> SchedulerResult<()> {
            Ok(())
        }
    }

    struct Counter(AtomicUsize);

    #[async_trait]
    impl TimerBody for Counter {
        async fn run(&self, _timer_id: &str, _trigger_at: DateTime<Utc>) -> SchedulerResult<()> {
            self.0.fetch_add(1, Ordering::SeqCst);
            Ok(())
        }
    }

    fn engine() -> TimerEngine {
        TimerEngine::new(4, Arc::new(MetricsCollector::new()))
    }

    #[tokio::test]
    async fn test_never_instant_is_not_armed() {
        let engine = engine();
        assert!(!engine.schedule(ScheduledTimer::one_shot("x", NEVER_TRIGGER_AT, Arc::new(Noop))));
        assert!(engine.is_empty());
    }

    #[tokio::test]
    async fn test_stop_unknown_id_is_noop() {
        let engine = engine();
        assert!(!engine.stop("missing"));
    }

    #[tokio::test]
    async fn test_one_shot_fires_once_and_is_released() {
        let engine = engine();
        let body = Arc::new(Counter(AtomicUsize::new(0)));
        let at = Utc::now() + chrono::Duration::milliseconds(20);
        assert!(engine.schedule(ScheduledTimer::one_shot("once", at, body.clone())));
        assert!(engine.contains("once"));

        tokio::time::sleep(std::time::Duration::from_millis(150)).await;
        assert_eq!(body.0.load(Ordering::SeqCst), 1);
        assert!(!engine.contains("once"));
    }

    #[tokio::test]
    async fn test_stale_stop_keeps_timer_scheduled_under_same_id() {
        let engine = engine();
        let at = Utc::now() + chrono::Duration::hours(1);
        assert!(engine.schedule(ScheduledTimer::one_shot("job", at, Arc::new(Noop))));
        let first = engine.inner.timers.get("job").map(|t| t.value().clone());
        let Some(first) = first else {
            panic!("定时器未装载");
        };

        assert!(engine.stop("job"));
        assert!(engine.schedule(ScheduledTimer::one_shot("job", at, Arc::new(Noop))));

        // 针对旧定时器的停止晚到
        engine.stop_timer(&first);
        assert!(engine.contains("job"));
        assert_eq!(engine.len(), 1);
    }

    #[tokio::test]
    async fn test_resume_ignores_timer_that_has_not_fired() {
        let engine = engine();
        let option = ScheduleOption::fixed_delay(chrono::Duration::minutes(5));
        let at = Utc::now() + chrono::Duration::hours(1);
        assert!(engine.schedule(ScheduledTimer::recurring("delay", at, option, None, Arc::new(Noop))));

        assert!(!engine.resume("delay", Utc::now()));
        assert_eq!(engine.trigger_at("delay"), Some(at));
        assert!(!engine.resume("missing", Utc::now()));
    }
}
