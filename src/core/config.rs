//! 配置管理模块
//!
//! 提供引擎配置的加载、解析和管理功能。
//! 支持从 TOML 配置文件加载，也支持命令行参数覆盖。
//!
//! # 配置文件格式 (config.toml)
//!
//! ```toml
//! [window]
//! width = 1280
//! height = 720
//! title = "KestrelEngine"
//!
//! [device]
//! backend = "software"       # 或 "dx12"
//! debug_layer = false
//! vsync = true
//! allow_tearing = false
//! frame_buffer_count = 3
//!
//! [logging]
//! level = "info"             # trace, debug, info, warn, error
//! file_output = false
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;

use super::error::{ConfigError, Result};

/// 引擎配置
///
/// 包含了引擎运行所需的所有配置项。
/// 可以从配置文件加载，也可以通过代码构建。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// 窗口配置
    pub window: WindowConfig,

    /// 图形设备配置
    pub device: DeviceConfig,

    /// 日志配置
    pub logging: LoggingConfig,
}

/// 窗口配置
///
/// 窗口系统本身由上层应用负责，这里只保留设备层需要的尺寸和标题信息。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowConfig {
    /// 窗口宽度
    #[serde(default = "default_width")]
    pub width: u32,

    /// 窗口高度
    #[serde(default = "default_height")]
    pub height: u32,

    /// 窗口标题
    #[serde(default = "default_title")]
    pub title: String,
}

/// 图形设备配置
///
/// 对应 `Device::create` 所需的 `DeviceDesc`，由应用在启动时传入。
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// 图形后端选择
    #[serde(default = "default_backend")]
    pub backend: BackendSelection,

    /// 是否启用调试层（仅 DX12 后端生效）
    #[serde(default = "default_debug_layer")]
    pub debug_layer: bool,

    /// 垂直同步
    #[serde(default = "default_vsync")]
    pub vsync: bool,

    /// 是否允许撕裂模式呈现
    #[serde(default = "default_allow_tearing")]
    pub allow_tearing: bool,

    /// 交换链后备缓冲区数量（同时也是在途帧数上限）
    #[serde(default = "default_frame_buffer_count")]
    pub frame_buffer_count: u32,
}

/// 图形后端类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendSelection {
    /// 软件模拟后端（跨平台，用于无头运行和测试）
    Software,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

/// 日志配置
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// 日志级别
    #[serde(default = "default_log_level")]
    pub level: LogLevel,

    /// 是否输出到文件
    #[serde(default = "default_file_output")]
    pub file_output: bool,

    /// 日志文件路径
    #[serde(default = "default_log_file")]
    pub log_file: String,
}

/// 日志级别
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

// 默认值函数
fn default_width() -> u32 { 1280 }
fn default_height() -> u32 { 720 }
fn default_title() -> String { "KestrelEngine".to_string() }
fn default_backend() -> BackendSelection { BackendSelection::Software }
fn default_debug_layer() -> bool { false }
fn default_vsync() -> bool { true }
fn default_allow_tearing() -> bool { false }
fn default_frame_buffer_count() -> u32 { 3 }
fn default_log_level() -> LogLevel { LogLevel::Info }
fn default_file_output() -> bool { false }
fn default_log_file() -> String { "kestrel.log".to_string() }

impl Default for Config {
    fn default() -> Self {
        Self {
            window: WindowConfig::default(),
            device: DeviceConfig::default(),
            logging: LoggingConfig::default(),
        }
    }
}

impl Default for WindowConfig {
    fn default() -> Self {
        Self {
            width: default_width(),
            height: default_height(),
            title: default_title(),
        }
    }
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            debug_layer: default_debug_layer(),
            vsync: default_vsync(),
            allow_tearing: default_allow_tearing(),
            frame_buffer_count: default_frame_buffer_count(),
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file_output: default_file_output(),
            log_file: default_log_file(),
        }
    }
}

impl Config {
    /// 从配置文件加载
    ///
    /// # 参数
    ///
    /// * `path` - 配置文件路径
    ///
    /// # 返回值
    ///
    /// 成功返回 `Config` 实例，失败返回错误
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path_str = path.as_ref().to_string_lossy().to_string();

        let contents = std::fs::read_to_string(path)
            .map_err(|_| ConfigError::FileNotFound(path_str.clone()))?;

        toml::from_str(&contents)
            .map_err(|e| ConfigError::ParseError(e.to_string()).into())
    }

    /// 从配置文件加载，如果文件不存在则使用默认配置
    pub fn from_file_or_default<P: AsRef<Path>>(path: P) -> Self {
        Self::from_file(path).unwrap_or_default()
    }

    /// 保存配置到文件
    #[allow(dead_code)]
    pub fn save_to_file<P: AsRef<Path>>(&self, path: P) -> Result<()> {
        let contents = toml::to_string_pretty(self)
            .map_err(|e| ConfigError::ParseError(e.to_string()))?;

        std::fs::write(path, contents)?;
        Ok(())
    }

    /// 从命令行参数覆盖配置
    ///
    /// # 说明
    ///
    /// 支持的参数：
    /// - `--dx12`: 使用 DirectX 12 后端
    /// - `--software`: 使用软件模拟后端
    /// - `--debug-layer`: 启用图形调试层
    /// - `--width <value>`: 设置窗口宽度
    /// - `--height <value>`: 设置窗口高度
    pub fn apply_args<I>(&mut self, args: I)
    where
        I: IntoIterator,
        I::Item: AsRef<str>,
    {
        let args: Vec<String> = args.into_iter().map(|s| s.as_ref().to_string()).collect();

        if args.iter().any(|a| a == "--dx12") {
            self.device.backend = BackendSelection::Dx12;
        }

        if args.iter().any(|a| a == "--software") {
            self.device.backend = BackendSelection::Software;
        }

        if args.iter().any(|a| a == "--debug-layer") {
            self.device.debug_layer = true;
        }

        if let Some(idx) = args.iter().position(|a| a == "--width") {
            if let Some(width_str) = args.get(idx + 1) {
                if let Ok(width) = width_str.parse() {
                    self.window.width = width;
                }
            }
        }

        if let Some(idx) = args.iter().position(|a| a == "--height") {
            if let Some(height_str) = args.get(idx + 1) {
                if let Ok(height) = height_str.parse() {
                    self.window.height = height;
                }
            }
        }
    }

    /// 验证配置的有效性
    pub fn validate(&self) -> Result<()> {
        // 验证窗口尺寸
        if self.window.width == 0 || self.window.height == 0 {
            return Err(ConfigError::InvalidValue {
                field: "window.width/height".to_string(),
                reason: "Window dimensions must be greater than 0".to_string(),
            }.into());
        }

        // 后备缓冲区数量限制为 2 或 3（双缓冲/三缓冲）
        if !matches!(self.device.frame_buffer_count, 2 | 3) {
            return Err(ConfigError::InvalidValue {
                field: "device.frame_buffer_count".to_string(),
                reason: "Frame buffer count must be 2 or 3".to_string(),
            }.into());
        }

        Ok(())
    }
}

impl BackendSelection {
    /// 检查是否为 DX12 后端
    #[allow(dead_code)]
    pub fn is_dx12(&self) -> bool {
        matches!(self, BackendSelection::Dx12)
    }

    /// 获取后端名称
    pub fn name(&self) -> &'static str {
        match self {
            BackendSelection::Software => "Software",
            BackendSelection::Dx12 => "DirectX 12",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = Config::default();
        assert_eq!(config.window.width, 1280);
        assert_eq!(config.window.height, 720);
        assert_eq!(config.device.backend, BackendSelection::Software);
        assert_eq!(config.device.frame_buffer_count, 3);
    }

    #[test]
    fn test_config_validation() {
        let mut config = Config::default();
        assert!(config.validate().is_ok());

        config.window.width = 0;
        assert!(config.validate().is_err());

        config.window.width = 800;
        config.device.frame_buffer_count = 5;
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_apply_args() {
        let mut config = Config::default();
        config.apply_args(["--dx12", "--width", "1920", "--height", "1080"]);
        assert_eq!(config.device.backend, BackendSelection::Dx12);
        assert_eq!(config.window.width, 1920);
        assert_eq!(config.window.height, 1080);

        config.apply_args(["--software", "--debug-layer"]);
        assert_eq!(config.device.backend, BackendSelection::Software);
        assert!(config.device.debug_layer);
    }

    #[test]
    fn test_parse_toml() {
        let text = r#"
            [window]
            width = 640
            height = 480

            [device]
            backend = "dx12"
            frame_buffer_count = 2

            [logging]
            level = "debug"
        "#;
        let config: Config = toml::from_str(text).unwrap();
        assert_eq!(config.window.width, 640);
        assert_eq!(config.device.backend, BackendSelection::Dx12);
        assert_eq!(config.device.frame_buffer_count, 2);
        assert_eq!(config.logging.level, LogLevel::Debug);
        // 未写明的字段回退到默认值
        assert!(config.device.vsync);
    }
}
