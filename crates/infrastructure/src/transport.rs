use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{debug, warn};

use scheduler_core::models::{DispatchPayload, Protocol, Worker};
use scheduler_core::traits::WorkerTransport;
use scheduler_core::{SchedulerError, SchedulerResult};

/// Worker对分发请求的应答
#[derive(Debug, Deserialize)]
struct DispatchAck {
    #[serde(default = "accepted_by_default")]
    accepted: bool,
    #[serde(default)]
    message: Option<String>,
}

fn accepted_by_default() -> bool {
    true
}

/// 通过HTTP POST把任务交给Worker
pub struct HttpWorkerTransport {
    http_client: reqwest::Client,
    dispatch_path: String,
}

impl HttpWorkerTransport {
    pub fn new(dispatch_path: impl Into<String>) -> Self {
        Self {
            http_client: reqwest::Client::new(),
            dispatch_path: dispatch_path.into(),
        }
    }

    fn url_for(&self, worker: &Worker) -> String {
        format!("http://{}{}", worker.address, self.dispatch_path)
    }
}

#[async_trait]
impl WorkerTransport for HttpWorkerTransport {
    async fn dispatch(
        &self,
        worker: &Worker,
        payload: &DispatchPayload,
        timeout: Duration,
    ) -> SchedulerResult<bool> {
        if worker.protocol != Protocol::Http {
            return Err(SchedulerError::Dispatch(format!(
                "不支持的Worker协议: {:?}",
                worker.protocol
            )));
        }

        let url = self.url_for(worker);
        let response = self
            .http_client
            .post(&url)
            .timeout(timeout)
            .json(payload)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    SchedulerError::DispatchTimeout
                } else {
                    SchedulerError::Network(format!("连接Worker {} 失败: {e}", worker.address))
                }
            })?;

        let status = response.status();
        if !status.is_success() {
            warn!("Worker {} 拒绝任务 {}: HTTP {}", worker.address, payload.task_id, status);
            return Ok(false);
        }

        let body = response.text().await.unwrap_or_default();
        let ack = serde_json::from_str::<DispatchAck>(&body).unwrap_or(DispatchAck {
            accepted: true,
            message: None,
        });
        if !ack.accepted {
            warn!(
                "Worker {} 拒绝任务 {}: {}",
                worker.address,
                payload.task_id,
                ack.message.as_deref().unwrap_or("")
            );
        } else {
            debug!("任务 {} 已交给Worker {}", payload.task_id, worker.address);
        }
        Ok(ack.accepted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_ack_defaults_to_accepted() {
        let ack: DispatchAck = serde_json::from_str("{}").unwrap();
        assert!(ack.accepted);
        let ack: DispatchAck =
            serde_json::from_str(r#"{"accepted": false, "message": "queue full"}"#).unwrap();
        assert!(!ack.accepted);
        assert_eq!(ack.message.as_deref(), Some("queue full"));
    }

    #[tokio::test]
    async fn test_tcp_workers_are_rejected() {
        let transport = HttpWorkerTransport::new("/worker/rpc/dispatch");
        let mut worker = Worker::new("app", "127.0.0.1:1");
        worker.protocol = Protocol::Tcp;
        let task = scheduler_core::models::Task::new(1, 1, "", "echo", chrono::Utc::now());

        let err = transport
            .dispatch(&worker, &DispatchPayload::from(&task), Duration::from_millis(10))
            .await
            .unwrap_err();
        assert!(err.is_dispatch_failure());
    }
}
