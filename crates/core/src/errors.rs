use std::fmt;

use thiserror::Error;

/// 配置校验失败时返回给调用方的稳定错误码
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ValidationCode {
    ScheduleConfigError,
    FlowNodeEmpty,
    FlowNodeExceedsMaxSize,
    FlowStartNodeInvalid,
    FlowEndNodeInvalid,
    FlowHasCyclic,
    FlowNodeDuplicated,
}

impl ValidationCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            ValidationCode::ScheduleConfigError => "schedule config error",
            ValidationCode::FlowNodeEmpty => "flow node is empty",
            ValidationCode::FlowNodeExceedsMaxSize => "flow node exceeds max size",
            ValidationCode::FlowStartNodeInvalid => "flow start node invalid",
            ValidationCode::FlowEndNodeInvalid => "flow end node invalid",
            ValidationCode::FlowHasCyclic => "flow has cyclic",
            ValidationCode::FlowNodeDuplicated => "flow node duplicated",
        }
    }
}

impl fmt::Display for ValidationCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// 调度器错误类型定义
#[derive(Debug, Error)]
pub enum SchedulerError {
    #[error("无效的调度类型: {0}")]
    InvalidScheduleKind(String),

    #[error("无效的CRON表达式: {expr} - {message}")]
    InvalidCron { expr: String, message: String },

    #[error("配置校验失败[{code}]: {message}")]
    Validation {
        code: ValidationCode,
        message: String,
    },

    #[error("非法的状态转换: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("无效的标签匹配条件: {0}")]
    InvalidTagCondition(String),

    #[error("无效的重试类型: {0}")]
    InvalidRetryType(String),

    #[error("无效的负载均衡策略: {0}")]
    InvalidLoadBalance(String),

    #[error("负载均衡失败: {0}")]
    LoadBalance(String),

    #[error("任务分发失败: {0}")]
    Dispatch(String),

    #[error("任务分发超时")]
    DispatchTimeout,

    #[error("调度计划未找到: {id}")]
    ScheduleNotFound { id: i64 },

    #[error("任务未找到: {id}")]
    TaskNotFound { id: i64 },

    #[error("作业未找到: {id}")]
    JobNotFound { id: i64 },

    #[error("执行实例未找到: {id}")]
    ExecutionNotFound { id: i64 },

    #[error("版本冲突: 调度计划 {id} 期望版本 {expected}")]
    VersionConflict { id: i64, expected: String },

    #[error("没有注册的命令处理器: {0}")]
    NoCommandHandler(String),

    #[error("分布式锁错误: {0}")]
    Lock(String),

    #[error("配置错误: {0}")]
    Configuration(String),

    #[error("序列化错误: {0}")]
    Serialization(String),

    #[error("网络错误: {0}")]
    Network(String),

    #[error("内部错误: {0}")]
    Internal(String),
}

impl SchedulerError {
    pub fn validation<S: Into<String>>(code: ValidationCode, message: S) -> Self {
        Self::Validation {
            code,
            message: message.into(),
        }
    }

    pub fn schedule_config<S: Into<String>>(message: S) -> Self {
        Self::validation(ValidationCode::ScheduleConfigError, message)
    }

    /// 校验错误对应的错误码
    pub fn validation_code(&self) -> Option<ValidationCode> {
        match self {
            SchedulerError::Validation { code, .. } => Some(*code),
            _ => None,
        }
    }

    /// 是否属于分发失败（无可用Worker、远端拒绝或超时）
    pub fn is_dispatch_failure(&self) -> bool {
        matches!(
            self,
            SchedulerError::Dispatch(_)
                | SchedulerError::DispatchTimeout
                | SchedulerError::LoadBalance(_)
                | SchedulerError::Network(_)
        )
    }
}

impl From<serde_json::Error> for SchedulerError {
    fn from(e: serde_json::Error) -> Self {
        SchedulerError::Serialization(e.to_string())
    }
}

/// 统一的Result类型
pub type Result<T> = std::result::Result<T, SchedulerError>;
