use std::fmt;
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::errors::{Result, SchedulerError};

/// 作业定义：独立执行器或多节点工作流
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub app_id: String,
    pub name: String,
    pub target: JobTarget,
    pub dispatch: DispatchPolicy,
    pub retry: RetryPolicy,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum JobTarget {
    Executor {
        executor: String,
        #[serde(default)]
        param: serde_json::Value,
    },
    Workflow {
        nodes: Vec<WorkflowNode>,
        edges: Vec<Edge>,
    },
}

impl Job {
    pub fn executor(
        id: i64,
        app_id: impl Into<String>,
        name: impl Into<String>,
        executor: impl Into<String>,
    ) -> Self {
        Self {
            id,
            app_id: app_id.into(),
            name: name.into(),
            target: JobTarget::Executor {
                executor: executor.into(),
                param: serde_json::Value::Null,
            },
            dispatch: DispatchPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn workflow(
        id: i64,
        app_id: impl Into<String>,
        name: impl Into<String>,
        nodes: Vec<WorkflowNode>,
        edges: Vec<Edge>,
    ) -> Self {
        Self {
            id,
            app_id: app_id.into(),
            name: name.into(),
            target: JobTarget::Workflow { nodes, edges },
            dispatch: DispatchPolicy::default(),
            retry: RetryPolicy::default(),
        }
    }

    pub fn with_dispatch(mut self, dispatch: DispatchPolicy) -> Self {
        self.dispatch = dispatch;
        self
    }

    pub fn with_retry(mut self, retry: RetryPolicy) -> Self {
        self.retry = retry;
        self
    }

    pub fn is_workflow(&self) -> bool {
        matches!(self.target, JobTarget::Workflow { .. })
    }
}

/// 工作流节点类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum NodeKind {
    Start,
    End,
    Executor,
}

/// 工作流节点
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub id: String,
    pub kind: NodeKind,
    pub executor: Option<String>,
    #[serde(default)]
    pub param: serde_json::Value,
}

impl WorkflowNode {
    pub fn start(id: impl Into<String>) -> Self {
        Self::control(id, NodeKind::Start)
    }

    pub fn end(id: impl Into<String>) -> Self {
        Self::control(id, NodeKind::End)
    }

    pub fn executor(id: impl Into<String>, executor: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            kind: NodeKind::Executor,
            executor: Some(executor.into()),
            param: serde_json::Value::Null,
        }
    }

    fn control(id: impl Into<String>, kind: NodeKind) -> Self {
        Self {
            id: id.into(),
            kind,
            executor: None,
            param: serde_json::Value::Null,
        }
    }

    /// 开始/结束节点由Broker直接执行，不需要分发到Worker
    pub fn is_control_flow(&self) -> bool {
        matches!(self.kind, NodeKind::Start | NodeKind::End)
    }
}

/// 有向边 (source → target)
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Hash)]
pub struct Edge {
    pub source: String,
    pub target: String,
}

impl Edge {
    pub fn new(source: impl Into<String>, target: impl Into<String>) -> Self {
        Self {
            source: source.into(),
            target: target.into(),
        }
    }
}

/// 标签匹配条件
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TagCondition {
    Exists,
    NotExists,
    MustMatchValue,
    MustNotMatchValue,
    MustMatchValueRegex,
}

impl FromStr for TagCondition {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "EXISTS" => Ok(TagCondition::Exists),
            "NOT_EXISTS" => Ok(TagCondition::NotExists),
            "MUST_MATCH_VALUE" => Ok(TagCondition::MustMatchValue),
            "MUST_NOT_MATCH_VALUE" => Ok(TagCondition::MustNotMatchValue),
            "MUST_MATCH_VALUE_REGEX" => Ok(TagCondition::MustMatchValueRegex),
            _ => Err(SchedulerError::InvalidTagCondition(s.to_string())),
        }
    }
}

/// 标签过滤规则 (tag_name, condition, value)
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TagFilter {
    pub tag_name: String,
    pub condition: TagCondition,
    #[serde(default)]
    pub value: String,
}

impl TagFilter {
    pub fn new(
        tag_name: impl Into<String>,
        condition: TagCondition,
        value: impl Into<String>,
    ) -> Self {
        Self {
            tag_name: tag_name.into(),
            condition,
            value: value.into(),
        }
    }
}

/// 资源需求，小于等于0表示不限制
#[derive(Debug, Clone, Copy, Serialize, Deserialize, Default, PartialEq)]
pub struct ResourceRequirement {
    pub cpu: f64,
    pub memory_mb: i64,
}

/// 负载均衡策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Hash, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum LoadBalanceKind {
    #[default]
    Random,
    RoundRobin,
    Appoint,
    LeastFrequentlyUsed,
    LeastRecentlyUsed,
    ConsistentHash,
}

impl LoadBalanceKind {
    pub const ALL: [LoadBalanceKind; 6] = [
        LoadBalanceKind::Random,
        LoadBalanceKind::RoundRobin,
        LoadBalanceKind::Appoint,
        LoadBalanceKind::LeastFrequentlyUsed,
        LoadBalanceKind::LeastRecentlyUsed,
        LoadBalanceKind::ConsistentHash,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            LoadBalanceKind::Random => "RANDOM",
            LoadBalanceKind::RoundRobin => "ROUND_ROBIN",
            LoadBalanceKind::Appoint => "APPOINT",
            LoadBalanceKind::LeastFrequentlyUsed => "LEAST_FREQUENTLY_USED",
            LoadBalanceKind::LeastRecentlyUsed => "LEAST_RECENTLY_USED",
            LoadBalanceKind::ConsistentHash => "CONSISTENT_HASH",
        }
    }
}

impl fmt::Display for LoadBalanceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for LoadBalanceKind {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        let upper = s.trim().to_ascii_uppercase();
        LoadBalanceKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == upper)
            .ok_or_else(|| SchedulerError::InvalidLoadBalance(s.to_string()))
    }
}

/// 分发策略
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DispatchPolicy {
    #[serde(default)]
    pub tag_filters: Vec<TagFilter>,
    #[serde(default)]
    pub resource: ResourceRequirement,
    #[serde(default)]
    pub load_balance: LoadBalanceKind,
    /// APPOINT 策略指定的Worker地址
    pub appoint_server: Option<String>,
    /// 广播到所有符合条件的Worker
    #[serde(default)]
    pub broadcast: bool,
    /// 单次分发调用的超时时间（毫秒），为空时使用全局配置
    pub timeout_ms: Option<u64>,
}

impl Default for DispatchPolicy {
    fn default() -> Self {
        Self {
            tag_filters: Vec::new(),
            resource: ResourceRequirement::default(),
            load_balance: LoadBalanceKind::default(),
            appoint_server: None,
            broadcast: false,
            timeout_ms: None,
        }
    }
}

/// 重试类型
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum RetryType {
    /// 重新分发所有子任务
    #[default]
    All,
    /// 只重新分发未成功的子任务
    OnlyFailPart,
}

impl FromStr for RetryType {
    type Err = SchedulerError;

    fn from_str(s: &str) -> Result<Self> {
        match s.trim().to_ascii_uppercase().as_str() {
            "ALL" => Ok(RetryType::All),
            "ONLY_FAIL_PART" => Ok(RetryType::OnlyFailPart),
            _ => Err(SchedulerError::InvalidRetryType(s.to_string())),
        }
    }
}

/// 重试策略
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct RetryPolicy {
    pub retry_times: u32,
    pub retry_interval_ms: u64,
    #[serde(default)]
    pub retry_type: RetryType,
}

impl RetryPolicy {
    pub fn new(retry_times: u32, retry_interval_ms: u64, retry_type: RetryType) -> Self {
        Self {
            retry_times,
            retry_interval_ms,
            retry_type,
        }
    }

    /// 已重试 `retried` 次后是否还能继续重试
    pub fn can_retry(&self, retried: u32) -> bool {
        retried < self.retry_times
    }
}
