//! 调度与分发
//!
//! 定时器引擎驱动调度计划的触发，触发后由分发器选择Worker执行任务；
//! 分桶归属决定本Broker负责哪些调度计划。

pub mod dispatch_service;
pub mod filters;
pub mod handlers;
pub mod launcher;
pub mod partition;
pub mod retry_service;
pub mod scheduler;
pub mod selection;
pub mod strategies;
pub mod timer;
pub mod workflow;

pub use dispatch_service::{DispatchCollaborators, ExecutionListener, TaskDispatcher};
pub use handlers::register_handlers;
pub use launcher::{ScheduleFireBody, ScheduleLauncher};
pub use partition::{BucketOwnershipListener, ClusterPartitioner, OwnershipChange, RebalanceOutcome};
pub use retry_service::{RetryConfig, RetryDecision, RetryService};
pub use scheduler::ScheduleManager;
pub use selection::WorkerSelector;
pub use strategies::*;
pub use timer::{ScheduledTimer, TimerBody, TimerEngine, TimerKind};
pub use workflow::{WorkflowExecutor, WorkflowProgress};
