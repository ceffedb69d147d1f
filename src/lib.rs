//! Broker进程的组件装配与生命周期

pub mod app;
pub mod shutdown;

pub use app::Application;
pub use shutdown::{wait_for_signal, ShutdownManager};
