use serde::{Deserialize, Serialize};

use crate::hashing::DEFAULT_BUCKET_COUNT;

fn default_broker_id() -> String {
    let host = hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "localhost".to_string());
    format!("broker-{host}")
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// 集群内唯一的Broker标识，默认取主机名
    pub broker_id: String,
    pub bucket_count: u32,
    pub rebalance_interval_seconds: u64,
    pub lock_lease_seconds: u64,
    pub reload_interval_seconds: u64,
    pub heartbeat_timeout_seconds: i64,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            broker_id: default_broker_id(),
            bucket_count: DEFAULT_BUCKET_COUNT,
            rebalance_interval_seconds: 30,
            lock_lease_seconds: 60,
            reload_interval_seconds: 10,
            heartbeat_timeout_seconds: 90,
        }
    }
}

impl BrokerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.broker_id.trim().is_empty() {
            return Err(anyhow::anyhow!("Broker ID不能为空"));
        }

        if self.bucket_count == 0 {
            return Err(anyhow::anyhow!("分桶数量必须大于0"));
        }

        if self.rebalance_interval_seconds == 0 {
            return Err(anyhow::anyhow!("重平衡间隔必须大于0"));
        }

        if self.lock_lease_seconds == 0 {
            return Err(anyhow::anyhow!("锁租约时间必须大于0"));
        }

        if self.reload_interval_seconds == 0 {
            return Err(anyhow::anyhow!("调度计划重载间隔必须大于0"));
        }

        if self.heartbeat_timeout_seconds <= 0 {
            return Err(anyhow::anyhow!("心跳超时时间必须大于0"));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimerConfig {
    /// 定时任务体的最大并发执行数
    pub max_concurrent_executions: usize,
}

impl Default for TimerConfig {
    fn default() -> Self {
        Self {
            max_concurrent_executions: 64,
        }
    }
}

impl TimerConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_concurrent_executions == 0 {
            return Err(anyhow::anyhow!("最大并发执行数必须大于0"));
        }
        Ok(())
    }
}
