use serde::{Deserialize, Serialize};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DispatchConfig {
    /// 分发调用默认超时（毫秒）
    pub default_timeout_ms: u64,
    /// LFU / LRU 统计窗口（秒）
    pub usage_window_seconds: u64,
    /// Worker接收任务的HTTP路径
    pub worker_http_path: String,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            default_timeout_ms: 3000,
            usage_window_seconds: 600,
            worker_http_path: "/worker/rpc/dispatch".to_string(),
        }
    }
}

impl DispatchConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.default_timeout_ms == 0 {
            return Err(anyhow::anyhow!("分发超时时间必须大于0"));
        }

        if self.usage_window_seconds == 0 {
            return Err(anyhow::anyhow!("使用统计窗口必须大于0"));
        }

        if !self.worker_http_path.starts_with('/') {
            return Err(anyhow::anyhow!(
                "Worker HTTP路径必须以'/'开头: {}",
                self.worker_http_path
            ));
        }

        Ok(())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    /// 单个工作流允许的最大节点数
    pub max_nodes: usize,
}

impl Default for WorkflowConfig {
    fn default() -> Self {
        Self { max_nodes: 200 }
    }
}

impl WorkflowConfig {
    pub fn validate(&self) -> anyhow::Result<()> {
        if self.max_nodes < 2 {
            return Err(anyhow::anyhow!("工作流最大节点数至少为2"));
        }
        Ok(())
    }
}
