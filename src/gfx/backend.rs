//! 图形后端选择
//!
//! 后端种类是一个封闭的标签变体，在 `Device::create` 时选定一次，
//! 之后所有原生对象都以按后端划分的枚举承载，通过 `match` 派发。
//! 通过枚举模式实现零成本抽象，避免热路径上的虚调用开销。

use crate::core::config::{BackendSelection, DeviceConfig};

/// 图形后端种类
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackendKind {
    /// 软件模拟后端（跨平台）
    Software,
    /// DirectX 12 后端（仅 Windows）
    Dx12,
}

impl BackendKind {
    /// 后端名称，用于日志输出
    pub fn name(&self) -> &'static str {
        match self {
            BackendKind::Software => "Software",
            BackendKind::Dx12 => "DirectX 12",
        }
    }

    /// 当前平台是否支持该后端
    pub fn is_supported(&self) -> bool {
        match self {
            BackendKind::Software => true,
            BackendKind::Dx12 => cfg!(target_os = "windows"),
        }
    }
}

impl From<BackendSelection> for BackendKind {
    fn from(selection: BackendSelection) -> Self {
        match selection {
            BackendSelection::Software => BackendKind::Software,
            BackendSelection::Dx12 => BackendKind::Dx12,
        }
    }
}

/// 设备创建描述
///
/// 由应用在启动时从配置构建，传入 `Device::create`。
#[derive(Debug, Clone)]
pub struct DeviceDesc {
    /// 后端种类
    pub backend: BackendKind,
    /// 是否启用调试层（仅 DX12 后端生效）
    pub enable_debug_layer: bool,
    /// 在途帧数上限（同时是交换链默认后备缓冲区数量）
    pub frame_buffer_count: u32,
    /// RTV 描述符堆容量
    pub rtv_heap_capacity: u32,
    /// DSV 描述符堆容量
    pub dsv_heap_capacity: u32,
    /// SRV/CBV/UAV 描述符堆容量
    pub srv_heap_capacity: u32,
    /// 调试名称
    pub name: String,
}

impl DeviceDesc {
    /// 以默认堆容量创建描述
    pub fn new(backend: BackendKind) -> Self {
        Self {
            backend,
            enable_debug_layer: false,
            frame_buffer_count: 3,
            rtv_heap_capacity: 64,
            dsv_heap_capacity: 32,
            srv_heap_capacity: 256,
            name: "Device".to_string(),
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    /// 启用调试层
    pub fn with_debug_layer(mut self, enable: bool) -> Self {
        self.enable_debug_layer = enable;
        self
    }

    /// 从设备配置构建
    pub fn from_config(config: &DeviceConfig) -> Self {
        let mut desc = Self::new(config.backend.into());
        desc.enable_debug_layer = config.debug_layer;
        desc.frame_buffer_count = config.frame_buffer_count;
        desc
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_backend_support() {
        assert!(BackendKind::Software.is_supported());
        assert_eq!(
            BackendKind::Dx12.is_supported(),
            cfg!(target_os = "windows")
        );
    }

    #[test]
    fn test_desc_from_config() {
        let mut config = DeviceConfig::default();
        config.debug_layer = true;
        config.frame_buffer_count = 2;

        let desc = DeviceDesc::from_config(&config);
        assert_eq!(desc.backend, BackendKind::Software);
        assert!(desc.enable_debug_layer);
        assert_eq!(desc.frame_buffer_count, 2);
        assert_eq!(desc.rtv_heap_capacity, 64);
    }
}
