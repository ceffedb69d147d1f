use std::time::Duration;

use chrono::{DateTime, Utc};
use rand::Rng;
use tracing::debug;

use scheduler_core::models::RetryPolicy;

/// 重试间隔配置，基础间隔来自任务自身的重试策略
#[derive(Debug, Clone)]
pub struct RetryConfig {
    /// 最大重试间隔（毫秒）
    pub max_interval_ms: u64,
    /// 退避倍数，1.0 表示固定间隔
    pub backoff_multiplier: f64,
    /// 重试间隔的随机抖动范围（0.0-1.0）
    pub jitter_factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            max_interval_ms: 3_600_000,
            backoff_multiplier: 1.0,
            jitter_factor: 0.0,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RetryDecision {
    Retry { delay: Duration },
    Exhausted,
}

/// 决定失败任务是否重试以及何时重试
#[derive(Debug, Clone, Default)]
pub struct RetryService {
    config: RetryConfig,
}

impl RetryService {
    pub fn new(config: Option<RetryConfig>) -> Self {
        Self {
            config: config.unwrap_or_default(),
        }
    }

    pub fn decide(&self, policy: &RetryPolicy, retried: u32) -> RetryDecision {
        if !policy.can_retry(retried) {
            debug!(
                "已重试 {} 次，达到最大重试次数 {}，不再重试",
                retried, policy.retry_times
            );
            return RetryDecision::Exhausted;
        }
        RetryDecision::Retry {
            delay: self.delay_for(policy, retried),
        }
    }

    /// 第 `retried + 1` 次重试前的等待时间
    pub fn delay_for(&self, policy: &RetryPolicy, retried: u32) -> Duration {
        let base = policy.retry_interval_ms as f64;
        let multiplier = self.config.backoff_multiplier.max(1.0);
        let mut delay = base * multiplier.powi(retried.min(32) as i32);
        delay = delay.min(self.config.max_interval_ms as f64);

        let jitter = self.config.jitter_factor.clamp(0.0, 1.0);
        if jitter > 0.0 && delay > 0.0 {
            let range = delay * jitter;
            delay += rand::rng().random_range(-range..=range);
        }

        Duration::from_millis(delay.max(0.0) as u64)
    }

    pub fn next_retry_at(
        &self,
        policy: &RetryPolicy,
        retried: u32,
        now: DateTime<Utc>,
    ) -> DateTime<Utc> {
        let delay = chrono::Duration::from_std(self.delay_for(policy, retried))
            .unwrap_or_else(|_| chrono::Duration::zero());
        now + delay
    }
}
