use std::collections::{HashMap, HashSet};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Worker状态
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum WorkerStatus {
    #[serde(rename = "ALIVE")]
    Alive,
    #[serde(rename = "DOWN")]
    Down,
}

/// Worker通信协议
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum Protocol {
    #[default]
    Http,
    Tcp,
}

/// Worker最近一次心跳上报的资源快照
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerMetrics {
    /// 可用CPU核数
    pub cpu_available: f64,
    /// 可用内存（MB）
    pub free_memory_mb: u64,
    /// 剩余可接收任务的队列槽位
    pub queue_available: i32,
    pub heartbeat_at: DateTime<Utc>,
}

impl Default for WorkerMetrics {
    fn default() -> Self {
        Self {
            cpu_available: 0.0,
            free_memory_mb: 0,
            queue_available: 0,
            heartbeat_at: Utc::now(),
        }
    }
}

/// Worker节点信息（由Worker注册中心维护，调度核心只读）
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Worker {
    pub app_id: String,
    /// host:port
    pub address: String,
    pub protocol: Protocol,
    pub executors: HashSet<String>,
    pub tags: HashMap<String, HashSet<String>>,
    pub metrics: WorkerMetrics,
    pub enabled: bool,
    pub status: WorkerStatus,
}

impl Worker {
    pub fn new(app_id: impl Into<String>, address: impl Into<String>) -> Self {
        Self {
            app_id: app_id.into(),
            address: address.into(),
            protocol: Protocol::default(),
            executors: HashSet::new(),
            tags: HashMap::new(),
            metrics: WorkerMetrics::default(),
            enabled: true,
            status: WorkerStatus::Alive,
        }
    }

    pub fn with_executor(mut self, executor: impl Into<String>) -> Self {
        self.executors.insert(executor.into());
        self
    }

    pub fn with_tag(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.tags.entry(name.into()).or_default().insert(value.into());
        self
    }

    pub fn with_metrics(mut self, metrics: WorkerMetrics) -> Self {
        self.metrics = metrics;
        self
    }

    /// Worker唯一标识，即网络地址
    pub fn server_id(&self) -> &str {
        &self.address
    }

    /// 检查Worker是否存活
    pub fn is_alive(&self) -> bool {
        matches!(self.status, WorkerStatus::Alive)
    }

    pub fn supports(&self, executor: &str) -> bool {
        self.executors.contains(executor)
    }

    /// 检查心跳是否超时
    pub fn is_heartbeat_expired(&self, timeout_seconds: i64) -> bool {
        (Utc::now() - self.metrics.heartbeat_at).num_seconds() > timeout_seconds
    }
}
