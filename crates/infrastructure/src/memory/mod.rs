//! 外部协作方接口的内存实现

pub mod coordination;
pub mod repositories;
pub mod workers;

pub use coordination::{InMemoryBrokerRegistry, InMemoryLeaseLock};
pub use repositories::{
    InMemoryBucketRepository, InMemoryExecutionRepository, InMemoryJobRepository,
    InMemoryScheduleRepository, InMemorySequenceRepository, InMemoryTaskRepository,
};
pub use workers::{InMemoryUsageStatistics, InMemoryWorkerRegistry};
