pub mod app_config;
pub mod broker;
pub mod dispatch;
pub mod observability;

pub use app_config::AppConfig;
pub use broker::{BrokerConfig, TimerConfig};
pub use dispatch::{DispatchConfig, WorkflowConfig};
pub use observability::ObservabilityConfig;
