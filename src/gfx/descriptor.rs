//! 描述符堆管理
//!
//! 描述符堆是固定容量的视图槽位池（RTV、DSV、SRV/CBV/UAV、采样器）。
//! 分配器以空闲链（LIFO 栈）复用槽位：释放的索引会被下一次分配优先返还。
//! 堆容量在创建时固定，不做隐式增长——耗尽是配置错误，直接反馈给调用方。
//!
//! # DirectX 12 描述符类型
//!
//! - **RTV** (Render Target View)：渲染目标视图
//! - **DSV** (Depth Stencil View)：深度模板视图
//! - **CBV/SRV/UAV**：着色器常量/资源/无序访问视图
//! - **Sampler**：采样器

use std::sync::Mutex;

use tracing::warn;

use super::device_child::DeviceLink;

#[cfg(target_os = "windows")]
use super::dx12::Dx12DescriptorHeap;

/// 描述符类型
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DescriptorType {
    /// 渲染目标视图 (RTV)
    RenderTargetView,
    /// 深度模板视图 (DSV)
    DepthStencilView,
    /// 常量缓冲视图 (CBV)
    ConstantBufferView,
    /// 着色资源视图 (SRV)
    ShaderResourceView,
    /// 无序访问视图 (UAV)
    UnorderedAccessView,
    /// 采样器
    Sampler,
}

impl DescriptorType {
    /// 描述符类型是否需要着色器可见
    pub fn is_shader_visible(&self) -> bool {
        matches!(
            self,
            DescriptorType::ConstantBufferView
                | DescriptorType::ShaderResourceView
                | DescriptorType::UnorderedAccessView
                | DescriptorType::Sampler
        )
    }

    /// 获取描述符类型名称
    pub fn name(&self) -> &'static str {
        match self {
            DescriptorType::RenderTargetView => "RTV",
            DescriptorType::DepthStencilView => "DSV",
            DescriptorType::ConstantBufferView => "CBV",
            DescriptorType::ShaderResourceView => "SRV",
            DescriptorType::UnorderedAccessView => "UAV",
            DescriptorType::Sampler => "Sampler",
        }
    }
}

/// 描述符堆描述信息
#[derive(Debug, Clone)]
pub struct DescriptorHeapDesc {
    /// 描述符类型
    pub descriptor_type: DescriptorType,
    /// 容量（槽位数）
    pub capacity: u32,
    /// 是否着色器可见
    pub shader_visible: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl DescriptorHeapDesc {
    /// 创建新的描述符堆描述
    pub fn new(descriptor_type: DescriptorType, capacity: u32) -> Self {
        Self {
            descriptor_type,
            capacity,
            shader_visible: descriptor_type.is_shader_visible(),
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置着色器可见性
    pub fn with_shader_visible(mut self, visible: bool) -> Self {
        self.shader_visible = visible;
        self
    }

    /// 创建 RTV 堆描述
    pub fn rtv(capacity: u32) -> Self {
        Self::new(DescriptorType::RenderTargetView, capacity).with_name("RTV Heap")
    }

    /// 创建 DSV 堆描述
    pub fn dsv(capacity: u32) -> Self {
        Self::new(DescriptorType::DepthStencilView, capacity).with_name("DSV Heap")
    }

    /// 创建 SRV/CBV/UAV 堆描述
    pub fn srv_cbv_uav(capacity: u32) -> Self {
        Self::new(DescriptorType::ShaderResourceView, capacity)
            .with_shader_visible(true)
            .with_name("SRV/CBV/UAV Heap")
    }

    /// 创建采样器堆描述
    pub fn sampler(capacity: u32) -> Self {
        Self::new(DescriptorType::Sampler, capacity)
            .with_shader_visible(true)
            .with_name("Sampler Heap")
    }
}

/// 描述符句柄（CPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: usize,
}

/// 描述符句柄（GPU 可见）
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuDescriptorHandle {
    /// 句柄指针值
    pub ptr: u64,
}

/// 描述符句柄三元组：CPU 地址、GPU 地址（仅着色器可见堆）、槽位索引
///
/// 由分配它的堆拥有，通过 `DescriptorHeap::free` 归还。
#[derive(Debug, Clone, Copy)]
pub struct DescriptorHandle {
    /// CPU 可见句柄
    pub cpu: CpuDescriptorHandle,
    /// GPU 可见句柄（仅对着色器可见的堆有效）
    pub gpu: Option<GpuDescriptorHandle>,
    /// 堆内槽位索引
    pub index: u32,
}

/// 空闲链状态
///
/// `free` 是可分配索引的 LIFO 栈，`live` 标记每个槽位是否在用，
/// 用于在调试构建中捕获重复释放。
struct SlotState {
    free: Vec<u32>,
    live: Vec<bool>,
}

/// 按后端划分的原生描述符堆
pub(crate) enum NativeDescriptorHeap {
    /// 软件后端只需要合成地址，没有原生对象
    Software,
    #[cfg(target_os = "windows")]
    Dx12(Dx12DescriptorHeap),
}

/// 描述符堆
///
/// 设备子对象；空闲链由独立互斥锁保护（每堆一把锁）。
pub struct DescriptorHeap {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    native: NativeDescriptorHeap,
    descriptor_type: DescriptorType,
    capacity: u32,
    increment_size: u32,
    cpu_base: usize,
    gpu_base: Option<u64>,
    slots: Mutex<SlotState>,
    link: DeviceLink,
}

impl DescriptorHeap {
    pub(crate) fn new(
        native: NativeDescriptorHeap,
        desc: &DescriptorHeapDesc,
        increment_size: u32,
        cpu_base: usize,
        gpu_base: Option<u64>,
        link: DeviceLink,
    ) -> Self {
        // 逆序填充空闲栈，保证首次分配从索引 0 开始
        let free: Vec<u32> = (0..desc.capacity).rev().collect();
        Self {
            native,
            descriptor_type: desc.descriptor_type,
            capacity: desc.capacity,
            increment_size,
            cpu_base,
            gpu_base,
            slots: Mutex::new(SlotState {
                free,
                live: vec![false; desc.capacity as usize],
            }),
            link,
        }
    }

    /// 分配一个描述符槽位
    ///
    /// 空闲链耗尽时返回 `None`——调用方必须在使用前检查。
    /// 耗尽同时记录一条警告，这是容量配置错误的信号。
    pub fn allocate(&self) -> Option<DescriptorHandle> {
        let mut slots = self.slots.lock().unwrap();
        match slots.free.pop() {
            Some(index) => {
                slots.live[index as usize] = true;
                Some(self.handle_at(index))
            }
            None => {
                warn!(
                    target: "kestrel::engine",
                    heap = self.descriptor_type.name(),
                    capacity = self.capacity,
                    "Descriptor heap exhausted"
                );
                None
            }
        }
    }

    /// 归还一个描述符槽位
    ///
    /// 重复释放是编程错误，在调试构建中触发断言。
    pub fn free(&self, handle: DescriptorHandle) {
        let mut slots = self.slots.lock().unwrap();
        let index = handle.index as usize;
        debug_assert!(
            index < self.capacity as usize,
            "descriptor index {} out of range for {} heap",
            handle.index,
            self.descriptor_type.name()
        );
        debug_assert!(
            slots.live[index],
            "double free of {} descriptor index {}",
            self.descriptor_type.name(),
            handle.index
        );
        if slots.live[index] {
            slots.live[index] = false;
            slots.free.push(handle.index);
        }
    }

    /// 计算指定槽位的句柄三元组
    fn handle_at(&self, index: u32) -> DescriptorHandle {
        DescriptorHandle {
            cpu: CpuDescriptorHandle {
                ptr: self.cpu_base + (index * self.increment_size) as usize,
            },
            gpu: self.gpu_base.map(|base| GpuDescriptorHandle {
                ptr: base + (index * self.increment_size) as u64,
            }),
            index,
        }
    }

    /// 描述符类型
    pub fn descriptor_type(&self) -> DescriptorType {
        self.descriptor_type
    }

    /// 总容量
    pub fn capacity(&self) -> u32 {
        self.capacity
    }

    /// 已分配数量
    pub fn allocated_count(&self) -> u32 {
        let slots = self.slots.lock().unwrap();
        self.capacity - slots.free.len() as u32
    }

    /// 描述符增量大小
    pub fn increment_size(&self) -> u32 {
        self.increment_size
    }

    /// 是否着色器可见
    pub fn is_shader_visible(&self) -> bool {
        self.gpu_base.is_some()
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[cfg(target_os = "windows")]
    pub(crate) fn native(&self) -> &NativeDescriptorHeap {
        &self.native
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BackendKind, DeviceDesc};
    use crate::gfx::device::Device;

    fn heap_with_capacity(capacity: u32) -> (Device, DescriptorHeap) {
        let device = Device::create(DeviceDesc::new(BackendKind::Software)).unwrap();
        let heap = device
            .create_descriptor_heap(&DescriptorHeapDesc::rtv(capacity))
            .unwrap();
        (device, heap)
    }

    #[test]
    fn test_descriptor_type() {
        assert!(DescriptorType::ShaderResourceView.is_shader_visible());
        assert!(!DescriptorType::RenderTargetView.is_shader_visible());
        assert_eq!(DescriptorType::RenderTargetView.name(), "RTV");
    }

    #[test]
    fn test_heap_desc_builders() {
        let desc = DescriptorHeapDesc::rtv(64);
        assert_eq!(desc.descriptor_type, DescriptorType::RenderTargetView);
        assert!(!desc.shader_visible);

        let desc = DescriptorHeapDesc::srv_cbv_uav(128);
        assert!(desc.shader_visible);
        assert_eq!(desc.name, Some("SRV/CBV/UAV Heap".to_string()));
    }

    #[test]
    fn test_allocate_unique_indices() {
        let (_device, heap) = heap_with_capacity(8);

        let mut indices = Vec::new();
        for _ in 0..8 {
            let handle = heap.allocate().unwrap();
            assert!(!indices.contains(&handle.index));
            indices.push(handle.index);
        }
        assert_eq!(heap.allocated_count(), 8);
    }

    #[test]
    fn test_free_list_reuse() {
        let (_device, heap) = heap_with_capacity(4);

        let a = heap.allocate().unwrap();
        let _b = heap.allocate().unwrap();

        heap.free(a);
        let c = heap.allocate().unwrap();
        // LIFO 复用：刚释放的索引被优先返还
        assert_eq!(c.index, a.index);
        assert_eq!(c.cpu.ptr, a.cpu.ptr);
    }

    #[test]
    fn test_exhaustion_returns_none() {
        let (_device, heap) = heap_with_capacity(4);

        let handles: Vec<_> = (0..4).map(|_| heap.allocate().unwrap()).collect();
        // 第 5 次分配失败而不是崩溃或别名
        assert!(heap.allocate().is_none());

        heap.free(handles[2]);
        let again = heap.allocate().unwrap();
        assert_eq!(again.index, handles[2].index);
    }

    #[test]
    fn test_handle_addresses_follow_stride() {
        let (_device, heap) = heap_with_capacity(4);
        let a = heap.allocate().unwrap();
        let b = heap.allocate().unwrap();
        assert_eq!(
            b.cpu.ptr - a.cpu.ptr,
            heap.increment_size() as usize * (b.index - a.index) as usize
        );
        // RTV 堆不是着色器可见的
        assert!(a.gpu.is_none());
    }

    #[test]
    fn test_shader_visible_heap_has_gpu_handles() {
        let device = Device::create(DeviceDesc::new(BackendKind::Software)).unwrap();
        let heap = device
            .create_descriptor_heap(&DescriptorHeapDesc::srv_cbv_uav(8))
            .unwrap();
        let handle = heap.allocate().unwrap();
        assert!(handle.gpu.is_some());
        assert!(heap.is_shader_visible());
    }
}
