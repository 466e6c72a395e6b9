//! 错误处理模块
//!
//! 定义了引擎中使用的统一错误类型，按照设备层的错误分类设计：
//!
//! - **不可恢复的设备错误**：原生设备/队列/Fence 创建失败等，初始化整体失败，
//!   不会返回部分构造的 Device
//! - **可恢复的资源错误**：描述符堆耗尽、根签名序列化失败、交换链创建失败等，
//!   以显式 `Result` 返回并携带后端状态码，由调用方决定重试或降级
//! - **编程错误**：通过 `debug_assert!` 在调试构建中检测
//! - **超时**：Fence 等待超时记录警告后继续执行，不作为错误传播

use std::fmt;

/// 引擎统一的 Result 类型
///
/// 所有可能返回错误的函数都应该使用这个类型。
pub type Result<T> = std::result::Result<T, KestrelError>;

/// KestrelEngine 的错误类型
///
/// 包含了引擎运行过程中可能遇到的各种错误情况。
#[derive(Debug)]
pub enum KestrelError {
    /// 配置错误
    Config(ConfigError),

    /// 图形设备层错误
    Graphics(GraphicsError),

    /// IO 错误
    Io(std::io::Error),

    /// 初始化错误
    Initialization(String),

    /// 运行时错误
    Runtime(String),
}

/// 配置相关的错误
#[derive(Debug)]
pub enum ConfigError {
    /// 配置文件未找到
    FileNotFound(String),

    /// 配置文件解析失败
    ParseError(String),

    /// 配置值无效
    InvalidValue { field: String, reason: String },
}

/// 图形设备层相关的错误
#[derive(Debug)]
pub enum GraphicsError {
    /// 设备创建失败（不可恢复：适配器枚举失败、特性级别不满足等）
    DeviceCreation(String),

    /// 请求的后端在当前平台不可用
    UnsupportedBackend(String),

    /// 请求调试层但调试接口不可用
    DebugLayerUnavailable(String),

    /// 后端调用失败，携带原生状态码（可恢复：由调用方决定处理策略）
    Backend { code: i32, message: String },

    /// 描述符堆耗尽（配置错误，调用方可以用更小的容量重试）
    HeapExhausted { heap: &'static str, capacity: u32 },

    /// 根签名序列化/创建失败（可恢复）
    RootSignature(String),

    /// 交换链错误（可恢复）
    SwapChain(String),

    /// 资源创建失败
    ResourceCreation(String),

    /// 命令记录/提交/重置违反使用约定
    CommandExecution(String),

    /// 设备已进入销毁流程，拒绝继续提交工作
    DeviceTearingDown,
}

impl fmt::Display for KestrelError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KestrelError::Config(e) => write!(f, "Configuration error: {}", e),
            KestrelError::Graphics(e) => write!(f, "Graphics error: {}", e),
            KestrelError::Io(e) => write!(f, "IO error: {}", e),
            KestrelError::Initialization(msg) => write!(f, "Initialization error: {}", msg),
            KestrelError::Runtime(msg) => write!(f, "Runtime error: {}", msg),
        }
    }
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::FileNotFound(path) => write!(f, "Config file not found: {}", path),
            ConfigError::ParseError(msg) => write!(f, "Failed to parse config: {}", msg),
            ConfigError::InvalidValue { field, reason } => {
                write!(f, "Invalid value for '{}': {}", field, reason)
            }
        }
    }
}

impl fmt::Display for GraphicsError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            GraphicsError::DeviceCreation(msg) => write!(f, "Device creation failed: {}", msg),
            GraphicsError::UnsupportedBackend(msg) => {
                write!(f, "Unsupported graphics backend: {}", msg)
            }
            GraphicsError::DebugLayerUnavailable(msg) => {
                write!(f, "Debug layer unavailable: {}", msg)
            }
            GraphicsError::Backend { code, message } => {
                write!(f, "Backend error {:#010x}: {}", code, message)
            }
            GraphicsError::HeapExhausted { heap, capacity } => {
                write!(f, "{} descriptor heap exhausted (capacity {})", heap, capacity)
            }
            GraphicsError::RootSignature(msg) => {
                write!(f, "Root signature creation failed: {}", msg)
            }
            GraphicsError::SwapChain(msg) => write!(f, "Swap chain error: {}", msg),
            GraphicsError::ResourceCreation(msg) => {
                write!(f, "Resource creation failed: {}", msg)
            }
            GraphicsError::CommandExecution(msg) => {
                write!(f, "Command execution failed: {}", msg)
            }
            GraphicsError::DeviceTearingDown => {
                write!(f, "Device is tearing down; no further work accepted")
            }
        }
    }
}

impl std::error::Error for KestrelError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            KestrelError::Io(e) => Some(e),
            _ => None,
        }
    }
}

impl std::error::Error for ConfigError {}
impl std::error::Error for GraphicsError {}

// 实现 From trait 以便于错误转换
impl From<std::io::Error> for KestrelError {
    fn from(err: std::io::Error) -> Self {
        KestrelError::Io(err)
    }
}

impl From<ConfigError> for KestrelError {
    fn from(err: ConfigError) -> Self {
        KestrelError::Config(err)
    }
}

impl From<GraphicsError> for KestrelError {
    fn from(err: GraphicsError) -> Self {
        KestrelError::Graphics(err)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_graphics_error_display() {
        let err = GraphicsError::HeapExhausted {
            heap: "RTV",
            capacity: 64,
        };
        assert_eq!(
            err.to_string(),
            "RTV descriptor heap exhausted (capacity 64)"
        );

        let err = GraphicsError::Backend {
            code: -2005270523,
            message: "device removed".to_string(),
        };
        assert!(err.to_string().contains("device removed"));
    }

    #[test]
    fn test_error_conversion() {
        let err: KestrelError = GraphicsError::DeviceTearingDown.into();
        assert!(matches!(err, KestrelError::Graphics(_)));

        let err: KestrelError = ConfigError::FileNotFound("config.toml".to_string()).into();
        assert!(err.to_string().contains("config.toml"));
    }
}
