//! 图形设备抽象层
//!
//! 封装 DirectX 12 风格的设备/资源协议，向上提供与后端无关的
//! `Device` / `Fence` / `CommandQueue` / `DescriptorHeap` / `Texture` /
//! `SwapChain` 类型。原生对象以按后端划分的枚举承载，通过 `match` 派发，
//! 避免热路径上的虚调用开销。
//!
//! # 模块说明
//!
//! - `backend`：后端种类与设备创建描述
//! - `device`：设备工厂、延迟释放队列、销毁流程
//! - `device_child`：设备子对象的反向引用与存活注册表
//! - `fence`：GPU/CPU 同步 Fence
//! - `command`：命令队列与命令上下文
//! - `descriptor`：描述符堆与句柄分配
//! - `resource`：纹理与根签名
//! - `swapchain`：交换链与后备缓冲区周期
//! - `software`：跨平台软件模拟后端
//! - `dx12`：DirectX 12 原生后端（仅 Windows）

pub mod backend;
pub mod command;
pub mod descriptor;
pub mod device;
pub mod device_child;
pub mod fence;
pub mod resource;
pub mod swapchain;

pub(crate) mod software;

#[cfg(target_os = "windows")]
pub(crate) mod dx12;

pub use backend::{BackendKind, DeviceDesc};
pub use command::{CommandContext, CommandQueue, ContextState, QueueKind};
pub use descriptor::{
    CpuDescriptorHandle, DescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorType,
    GpuDescriptorHandle,
};
pub use device::{Device, DeviceState};
pub use device_child::DeviceLink;
pub use fence::{Fence, DEFAULT_WAIT_TIMEOUT};
pub use resource::{
    RootSignature, RootSignatureDesc, Texture, TextureDesc, TextureFormat, TextureUsage,
};
pub use swapchain::{SwapChain, SwapChainDesc};
