//! 核心功能模块
//!
//! 包含配置、日志和错误处理等与图形 API 无关的基础设施。

pub mod config;
pub mod error;
pub mod log;

pub use config::{BackendSelection, Config, DeviceConfig, LogLevel};
pub use error::{ConfigError, GraphicsError, KestrelError, Result};
