//! 领域事件
//!
//! 调度引擎产生的事件只用于通知，发布失败不影响主流程。

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use scheduler_core::models::TaskStatus;
use scheduler_core::SchedulerResult;

/// 领域事件基础trait
pub trait DomainEvent: Send + Sync {
    fn event_id(&self) -> Uuid;
    fn event_type(&self) -> &str;
    fn occurred_at(&self) -> DateTime<Utc>;
    fn aggregate_id(&self) -> String;
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum SchedulerEvent {
    ScheduleFired {
        id: Uuid,
        schedule_id: i64,
        execution_id: i64,
        occurred_at: DateTime<Utc>,
    },
    TaskStatusChanged {
        id: Uuid,
        task_id: i64,
        execution_id: i64,
        from: TaskStatus,
        to: TaskStatus,
        occurred_at: DateTime<Utc>,
    },
    ExecutionFinished {
        id: Uuid,
        execution_id: i64,
        success: bool,
        occurred_at: DateTime<Utc>,
    },
    BucketsRebalanced {
        id: Uuid,
        broker_id: String,
        gained: Vec<u32>,
        lost: Vec<u32>,
        occurred_at: DateTime<Utc>,
    },
}

impl SchedulerEvent {
    pub fn schedule_fired(schedule_id: i64, execution_id: i64) -> Self {
        SchedulerEvent::ScheduleFired {
            id: Uuid::new_v4(),
            schedule_id,
            execution_id,
            occurred_at: Utc::now(),
        }
    }

    pub fn task_status_changed(
        task_id: i64,
        execution_id: i64,
        from: TaskStatus,
        to: TaskStatus,
    ) -> Self {
        SchedulerEvent::TaskStatusChanged {
            id: Uuid::new_v4(),
            task_id,
            execution_id,
            from,
            to,
            occurred_at: Utc::now(),
        }
    }

    pub fn execution_finished(execution_id: i64, success: bool) -> Self {
        SchedulerEvent::ExecutionFinished {
            id: Uuid::new_v4(),
            execution_id,
            success,
            occurred_at: Utc::now(),
        }
    }

    pub fn buckets_rebalanced(broker_id: impl Into<String>, gained: Vec<u32>, lost: Vec<u32>) -> Self {
        SchedulerEvent::BucketsRebalanced {
            id: Uuid::new_v4(),
            broker_id: broker_id.into(),
            gained,
            lost,
            occurred_at: Utc::now(),
        }
    }
}

impl DomainEvent for SchedulerEvent {
    fn event_id(&self) -> Uuid {
        match self {
            SchedulerEvent::ScheduleFired { id, .. }
            | SchedulerEvent::TaskStatusChanged { id, .. }
            | SchedulerEvent::ExecutionFinished { id, .. }
            | SchedulerEvent::BucketsRebalanced { id, .. } => *id,
        }
    }

    fn event_type(&self) -> &str {
        match self {
            SchedulerEvent::ScheduleFired { .. } => "ScheduleFired",
            SchedulerEvent::TaskStatusChanged { .. } => "TaskStatusChanged",
            SchedulerEvent::ExecutionFinished { .. } => "ExecutionFinished",
            SchedulerEvent::BucketsRebalanced { .. } => "BucketsRebalanced",
        }
    }

    fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            SchedulerEvent::ScheduleFired { occurred_at, .. }
            | SchedulerEvent::TaskStatusChanged { occurred_at, .. }
            | SchedulerEvent::ExecutionFinished { occurred_at, .. }
            | SchedulerEvent::BucketsRebalanced { occurred_at, .. } => *occurred_at,
        }
    }

    fn aggregate_id(&self) -> String {
        match self {
            SchedulerEvent::ScheduleFired { schedule_id, .. } => schedule_id.to_string(),
            SchedulerEvent::TaskStatusChanged { task_id, .. } => task_id.to_string(),
            SchedulerEvent::ExecutionFinished { execution_id, .. } => execution_id.to_string(),
            SchedulerEvent::BucketsRebalanced { broker_id, .. } => broker_id.clone(),
        }
    }
}

/// 事件发布端口
#[async_trait]
pub trait EventPublisher: Send + Sync {
    async fn publish(&self, event: SchedulerEvent) -> SchedulerResult<()>;
}

/// 事件监听者，零个或多个
#[async_trait]
pub trait EventListener: Send + Sync {
    async fn on_event(&self, event: &SchedulerEvent) -> SchedulerResult<()>;
}

/// 不做任何事的发布者
pub struct NoopEventPublisher;

#[async_trait]
impl EventPublisher for NoopEventPublisher {
    async fn publish(&self, _event: SchedulerEvent) -> SchedulerResult<()> {
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_event_metadata() {
        let event = SchedulerEvent::task_status_changed(7, 3, TaskStatus::Running, TaskStatus::Succeed);
        assert_eq!(event.event_type(), "TaskStatusChanged");
        assert_eq!(event.aggregate_id(), "7");

        let event = SchedulerEvent::buckets_rebalanced("broker-a", vec![1], vec![]);
        assert_eq!(event.aggregate_id(), "broker-a");
    }
}
