//! # 数据模型
//!
//! 调度与分发引擎使用的核心数据结构。
//!
//! ## 核心模型
//!
//! ### Schedule / ScheduleOption - 调度计划
//! 触发器定义及其触发、反馈时间记录。`version` 由调度配置内容哈希得到，
//! 用于在不逐字段比较的情况下识别配置变化。
//!
//! ### Job - 作业定义
//! 独立执行器或工作流（节点 + 边），附带分发策略和重试策略。
//!
//! ### Execution / Task - 执行实例与任务
//! 一次触发对应一个执行实例，执行实例下的每个可分发单元是一个任务。
//!
//! ### Worker - Worker节点
//! 由Worker注册中心维护，包含执行器能力、标签和资源快照。
//!
//! ### Bucket - 分桶归属
//! 固定数量的分桶到Broker的映射。
//!
//! ## 状态管理
//!
//! ### 任务状态流转
//! ```text
//! CREATED → DISPATCHED → RUNNING → SUCCEED
//!                                → FAILED → RESTARTED → DISPATCHED
//! (外部) CANCELLED / TERMINATED / PAUSED
//! ```

pub mod bucket;
pub mod job;
pub mod schedule;
pub mod task;
pub mod worker;

pub use bucket::*;
pub use job::*;
pub use schedule::*;
pub use task::*;
pub use worker::*;
