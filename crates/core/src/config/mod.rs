//! 调度引擎配置
//!
//! 配置来源依次为默认值、TOML配置文件和 `SCHEDULER__` 前缀的环境变量。

pub mod models;

#[cfg(test)]
mod tests;

pub use models::*;
