//! KestrelEngine - 图形设备抽象层
//!
//! KestrelEngine 在 DirectX 12 风格的底层 API 之上提供一层与后端无关的
//! 设备/资源抽象。核心关注点是生命周期与同步的正确性：
//!
//! - **Fence**：单调递增的 u64 计数器，GPU 推进、CPU 有界等待
//! - **延迟释放**：资源析构后按 Fence 值排队，GPU 越过该值才物理释放
//! - **子对象注册表**：设备销毁时统一断开所有反向引用，杜绝悬垂访问
//!
//! # 模块结构
//!
//! - `core`：核心功能模块（配置、日志、错误处理）
//! - `gfx`：图形设备抽象层（设备、Fence、命令、描述符、资源、交换链）
//!
//! # 使用示例
//!
//! ```no_run
//! use kestrel_engine::gfx::{BackendKind, Device, DeviceDesc, QueueKind};
//!
//! # fn main() -> kestrel_engine::core::Result<()> {
//! // 创建软件后端设备（跨平台，无需窗口）
//! let mut device = Device::create(DeviceDesc::new(BackendKind::Software))?;
//!
//! // 记录并提交一帧
//! let mut ctx = device.create_command_context(QueueKind::Direct)?;
//! ctx.insert_marker("frame 0")?;
//! device.graphics_queue().execute(&mut ctx)?;
//! device.end_frame()?;
//!
//! device.shutdown();
//! # Ok(())
//! # }
//! ```

pub mod core;
pub mod gfx;
