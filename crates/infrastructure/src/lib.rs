pub mod bus;
pub mod memory;
pub mod observability;
pub mod transport;

pub use bus::{CommandBus, InProcessEventBus};
pub use memory::*;
pub use observability::{MetricsCollector, StructuredLogger};
pub use transport::HttpWorkerTransport;
