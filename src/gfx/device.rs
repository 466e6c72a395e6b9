//! 图形设备
//!
//! `Device` 拥有原生设备、主命令队列、帧 Fence 和各类描述符堆，
//! 是所有设备子对象的工厂。两条核心职责：
//!
//! 1. **延迟释放**：资源析构时记录 `(原生资源, 当前帧 Fence 值)`，
//!    只有 `completed_value` 越过记录值后才物理释放——保证 GPU
//!    不会访问已释放的资源
//! 2. **安全销毁**：`shutdown` 先阻塞等待所有在途工作完成，再断开
//!    全部子对象的反向引用，最后无条件清空延迟释放队列；原生设备
//!    在此之后才被释放
//!
//! # 状态机
//!
//! `Uninitialized → Initializing → Ready → TearingDown → Destroyed`
//!
//! 进入 `TearingDown` 后，工厂方法和帧推进一律拒绝新工作。

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, OnceLock};

use raw_window_handle::HasWindowHandle;
use tracing::{debug, info, warn};

use crate::core::error::{GraphicsError, Result};

use super::backend::{BackendKind, DeviceDesc};
use super::command::{CommandContext, CommandQueue, NativeContext, NativeQueue, QueueKind};
use super::descriptor::{
    DescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorType, NativeDescriptorHeap,
};
use super::device_child::{ChildId, ChildRegistry, DeviceLink};
use super::fence::{Fence, NativeFence};
use super::resource::{
    NativeResource, NativeRootSignature, RootSignature, RootSignatureDesc, Texture, TextureDesc,
    TextureUsage, TextureView,
};
use super::software::{SoftwareContext, SoftwareDevice, SoftwareFence, SoftwareQueue};
use super::swapchain::{SwapChain, SwapChainDesc};

#[cfg(target_os = "windows")]
use super::dx12::Dx12Device;

/// 设备生命周期状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// 尚未初始化
    Uninitialized,
    /// 正在初始化
    Initializing,
    /// 就绪，可以创建子对象和提交工作
    Ready,
    /// 正在销毁，拒绝新工作
    TearingDown,
    /// 已销毁
    Destroyed,
}

/// 按后端划分的原生设备
pub(crate) enum NativeDevice {
    Software(SoftwareDevice),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Device),
}

/// 延迟释放队列条目
///
/// 原生资源的所有权转移到这里，直到记录的 Fence 值完成。
struct DeferredRelease {
    resource: NativeResource,
    fence_value: u64,
}

/// 设备堆集合：按视图类型各一个
struct DeviceHeaps {
    rtv: DescriptorHeap,
    dsv: DescriptorHeap,
    srv: DescriptorHeap,
}

/// 设备内部共享状态
///
/// 子对象通过 `DeviceLink` 以弱引用访问；一把锁一个职责：
/// 子对象注册表一把，延迟释放队列一把（描述符堆各自带锁）。
pub struct DeviceShared {
    kind: BackendKind,
    native: NativeDevice,
    children: Mutex<ChildRegistry>,
    deferred: Mutex<VecDeque<DeferredRelease>>,
    /// 主队列和堆在 `Arc` 建立后再初始化（它们需要指向设备的弱引用）
    heaps: OnceLock<DeviceHeaps>,
    queue: OnceLock<CommandQueue>,
    state: Mutex<DeviceState>,
}

impl DeviceShared {
    /// 注册一个子对象并返回设备反向引用
    pub(crate) fn register_child(self: &Arc<Self>, name: impl Into<String>) -> DeviceLink {
        let (id, slot) = self.children.lock().unwrap().register(name.into());
        DeviceLink::new(Arc::downgrade(self), id, slot)
    }

    /// 注销一个子对象（由 `DeviceLink` 析构调用，幂等）
    pub(crate) fn unregister_child(&self, id: ChildId) {
        self.children.lock().unwrap().unregister(id);
    }

    /// 主命令队列
    pub(crate) fn queue(&self) -> &CommandQueue {
        self.queue.get().expect("queue initialized in Device::create")
    }

    fn heaps(&self) -> &DeviceHeaps {
        self.heaps.get().expect("heaps initialized in Device::create")
    }

    /// 把原生资源交给延迟释放队列
    ///
    /// 记录当前帧 Fence 的下一个信号值：该值完成意味着 GPU 已经执行完
    /// 所有可能引用此资源的已提交工作。
    pub(crate) fn defer_release(&self, resource: NativeResource) {
        let fence_value = self.queue().fence().next_value();
        debug!(
            target: "kestrel::engine",
            resource = resource.id(),
            fence_value,
            "Resource handed to deferred-release queue"
        );
        self.deferred.lock().unwrap().push_back(DeferredRelease {
            resource,
            fence_value,
        });
    }

    /// 释放所有 Fence 值已完成的延迟释放条目
    ///
    /// 条目按 Fence 值（epoch）有序，从队首回收即可。
    pub(crate) fn process_deferred_releases(&self) {
        let completed = self.queue().fence().completed_value();
        let mut deferred = self.deferred.lock().unwrap();
        let mut reclaimed = 0usize;
        while let Some(front) = deferred.front() {
            if front.fence_value > completed {
                break;
            }
            deferred.pop_front();
            reclaimed += 1;
        }
        if reclaimed > 0 {
            debug!(
                target: "kestrel::engine",
                reclaimed,
                completed,
                "Deferred releases reclaimed"
            );
        }
    }

    /// 把视图句柄归还到对应的设备堆
    pub(crate) fn free_view(&self, descriptor_type: DescriptorType, handle: DescriptorHandle) {
        let heaps = self.heaps();
        match descriptor_type {
            DescriptorType::RenderTargetView => heaps.rtv.free(handle),
            DescriptorType::DepthStencilView => heaps.dsv.free(handle),
            DescriptorType::ConstantBufferView
            | DescriptorType::ShaderResourceView
            | DescriptorType::UnorderedAccessView => heaps.srv.free(handle),
            DescriptorType::Sampler => {
                debug_assert!(false, "device does not own a sampler heap");
            }
        }
    }

    fn state(&self) -> DeviceState {
        *self.state.lock().unwrap()
    }

    fn set_state(&self, state: DeviceState) {
        *self.state.lock().unwrap() = state;
    }

    /// 原生设备（交换链创建时需要按后端分支）
    pub(crate) fn backend_native(&self) -> &NativeDevice {
        &self.native
    }

    /// 按后端创建一个原生纹理资源
    pub(crate) fn acquire_native_texture(&self, desc: &TextureDesc) -> Result<NativeResource> {
        let _ = desc;
        match &self.native {
            NativeDevice::Software(device) => Ok(NativeResource::Software(device.create_resource())),
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_texture(desc),
        }
    }

    /// 把原生资源包装成纹理：按用途分配视图并注册为设备子对象
    ///
    /// 堆耗尽时回滚已分配的视图并返回 `HeapExhausted`（可恢复）。
    pub(crate) fn wrap_texture(
        self: &Arc<Self>,
        native: NativeResource,
        desc: &TextureDesc,
        back_buffer: bool,
    ) -> Result<Texture> {
        let heaps = self.heaps();
        let mut views = Vec::new();
        let needed: &[DescriptorType] = match desc.usage {
            TextureUsage::RenderTarget => &[DescriptorType::RenderTargetView],
            TextureUsage::DepthStencil => &[DescriptorType::DepthStencilView],
            TextureUsage::ShaderResource => &[DescriptorType::ShaderResourceView],
        };

        for &descriptor_type in needed {
            let (heap, heap_name) = match descriptor_type {
                DescriptorType::RenderTargetView => (&heaps.rtv, "RTV"),
                DescriptorType::DepthStencilView => (&heaps.dsv, "DSV"),
                _ => (&heaps.srv, "SRV"),
            };
            match heap.allocate() {
                Some(handle) => {
                    #[cfg(target_os = "windows")]
                    if let NativeDevice::Dx12(device) = &self.native {
                        device.create_view(&native, desc, descriptor_type, &handle);
                    }
                    views.push(TextureView {
                        descriptor_type,
                        handle,
                    });
                }
                None => {
                    // 回滚已分配的视图后向调用方报告
                    for view in views {
                        self.free_view(view.descriptor_type, view.handle);
                    }
                    return Err(GraphicsError::HeapExhausted {
                        heap: heap_name,
                        capacity: heap.capacity(),
                    }
                    .into());
                }
            }
        }

        let name = desc.name.clone().unwrap_or_else(|| "Texture".to_string());
        let link = self.register_child(name);
        Ok(Texture::new(native, desc.clone(), views, back_buffer, link))
    }
}

/// 图形设备
///
/// 每个应用创建一个；销毁前必须（显式或经由析构）走完 `shutdown` 流程。
pub struct Device {
    shared: Arc<DeviceShared>,
    desc: DeviceDesc,
    /// 当前帧在后备缓冲区周期中的索引
    frame_index: usize,
    /// 每个帧槽位上一次收尾时的 Fence 值，用于门控分配器复用
    frame_fence_values: Vec<u64>,
}

impl Device {
    /// 创建设备
    ///
    /// 按 `desc.backend` 选择后端；请求的后端在当前平台不可用、
    /// 原生设备初始化失败时返回错误，不会返回部分构造的设备。
    pub fn create(desc: DeviceDesc) -> Result<Device> {
        info!(
            target: "kestrel::engine",
            backend = desc.backend.name(),
            debug_layer = desc.enable_debug_layer,
            "Creating graphics device"
        );

        let native = match desc.backend {
            BackendKind::Software => NativeDevice::Software(SoftwareDevice::new()),
            #[cfg(target_os = "windows")]
            BackendKind::Dx12 => NativeDevice::Dx12(Dx12Device::create(&desc)?),
            #[cfg(not(target_os = "windows"))]
            BackendKind::Dx12 => {
                return Err(GraphicsError::UnsupportedBackend(
                    "DirectX 12 backend is only available on Windows".to_string(),
                )
                .into())
            }
        };

        let shared = Arc::new(DeviceShared {
            kind: desc.backend,
            native,
            children: Mutex::new(ChildRegistry::new()),
            deferred: Mutex::new(VecDeque::new()),
            heaps: OnceLock::new(),
            queue: OnceLock::new(),
            state: Mutex::new(DeviceState::Initializing),
        });

        // 描述符堆：RTV / DSV / SRV 各一个
        let heaps = DeviceHeaps {
            rtv: Self::create_heap_on(&shared, &DescriptorHeapDesc::rtv(desc.rtv_heap_capacity))?,
            dsv: Self::create_heap_on(&shared, &DescriptorHeapDesc::dsv(desc.dsv_heap_capacity))?,
            srv: Self::create_heap_on(
                &shared,
                &DescriptorHeapDesc::srv_cbv_uav(desc.srv_heap_capacity),
            )?,
        };
        let _ = shared.heaps.set(heaps);

        // 主队列及其帧 Fence
        let fence_native = Self::create_native_fence(&shared, 0)?;
        let fence = Fence::new(
            fence_native,
            shared.register_child("Frame Fence"),
            0,
            "Frame Fence".to_string(),
        );
        let queue_native = Self::create_native_queue(&shared, QueueKind::Direct)?;
        let queue = CommandQueue::new(
            QueueKind::Direct,
            queue_native,
            fence,
            shared.register_child("Direct Queue"),
        );
        let _ = shared.queue.set(queue);

        shared.set_state(DeviceState::Ready);
        info!(
            target: "kestrel::engine",
            backend = desc.backend.name(),
            frame_buffers = desc.frame_buffer_count,
            "Graphics device ready"
        );

        let frame_buffer_count = desc.frame_buffer_count as usize;
        Ok(Device {
            shared,
            desc,
            frame_index: 0,
            frame_fence_values: vec![0; frame_buffer_count],
        })
    }

    fn create_heap_on(
        shared: &Arc<DeviceShared>,
        desc: &DescriptorHeapDesc,
    ) -> Result<DescriptorHeap> {
        let name = desc
            .name
            .clone()
            .unwrap_or_else(|| desc.descriptor_type.name().to_string());
        let link = shared.register_child(name);

        match &shared.native {
            NativeDevice::Software(device) => {
                let cpu_base = device.allocate_heap_base(desc.capacity);
                let gpu_base = desc.shader_visible.then_some(cpu_base as u64);
                Ok(DescriptorHeap::new(
                    NativeDescriptorHeap::Software,
                    desc,
                    super::software::DESCRIPTOR_INCREMENT_SIZE,
                    cpu_base,
                    gpu_base,
                    link,
                ))
            }
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_descriptor_heap(desc, link),
        }
    }

    fn create_native_fence(shared: &Arc<DeviceShared>, initial: u64) -> Result<NativeFence> {
        match &shared.native {
            NativeDevice::Software(_) => Ok(NativeFence::Software(SoftwareFence::new(initial))),
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_fence(initial),
        }
    }

    fn create_native_queue(shared: &Arc<DeviceShared>, kind: QueueKind) -> Result<NativeQueue> {
        match &shared.native {
            NativeDevice::Software(_) => Ok(NativeQueue::Software(SoftwareQueue::new())),
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_queue(kind),
        }
    }

    /// 后端种类
    pub fn backend(&self) -> BackendKind {
        self.shared.kind
    }

    /// 当前生命周期状态
    pub fn state(&self) -> DeviceState {
        self.shared.state()
    }

    /// 设备创建描述
    pub fn desc(&self) -> &DeviceDesc {
        &self.desc
    }

    /// 当前帧索引（后备缓冲区周期内）
    pub fn frame_index(&self) -> usize {
        self.frame_index
    }

    /// 主（直接）命令队列
    pub fn graphics_queue(&self) -> &CommandQueue {
        self.shared.queue()
    }

    /// 帧 Fence（主队列的 Fence）
    pub fn frame_fence(&self) -> &Fence {
        self.shared.queue().fence()
    }

    /// RTV 描述符堆
    pub fn rtv_heap(&self) -> &DescriptorHeap {
        &self.shared.heaps().rtv
    }

    /// DSV 描述符堆
    pub fn dsv_heap(&self) -> &DescriptorHeap {
        &self.shared.heaps().dsv
    }

    /// SRV/CBV/UAV 描述符堆
    pub fn srv_heap(&self) -> &DescriptorHeap {
        &self.shared.heaps().srv
    }

    /// 存活子对象数量
    pub fn live_child_count(&self) -> usize {
        self.shared.children.lock().unwrap().len()
    }

    /// 延迟释放队列长度
    pub fn deferred_release_count(&self) -> usize {
        self.shared.deferred.lock().unwrap().len()
    }

    fn ensure_ready(&self) -> Result<()> {
        match self.shared.state() {
            DeviceState::Ready => Ok(()),
            _ => Err(GraphicsError::DeviceTearingDown.into()),
        }
    }

    /// 创建一个 Fence
    ///
    /// 原生 Fence 创建失败属于不可恢复的设备级错误（视同设备丢失）。
    pub fn create_fence(&self, initial: u64, name: &str) -> Result<Fence> {
        self.ensure_ready()?;
        let native = Self::create_native_fence(&self.shared, initial)?;
        let link = self.shared.register_child(name);
        Ok(Fence::new(native, link, initial, name.to_string()))
    }

    /// 创建一个命令上下文（分配器 + 命令列表）
    pub fn create_command_context(&self, kind: QueueKind) -> Result<CommandContext> {
        self.ensure_ready()?;
        let native = match &self.shared.native {
            NativeDevice::Software(_) => NativeContext::Software(SoftwareContext::new()),
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_context(kind)?,
        };
        let link = self
            .shared
            .register_child(format!("{} Command Context", kind.name()));
        Ok(CommandContext::new(kind, native, link))
    }

    /// 创建一个纹理
    ///
    /// 按用途在设备堆中分配视图；堆耗尽返回 `HeapExhausted`（可恢复）。
    pub fn create_texture(&self, desc: &TextureDesc) -> Result<Texture> {
        self.ensure_ready()?;
        let native = self.shared.acquire_native_texture(desc)?;
        self.shared.wrap_texture(native, desc, false)
    }

    /// 创建一个根签名
    ///
    /// 序列化失败是可恢复错误，调用方可修改描述后重试。
    pub fn create_root_signature(&self, desc: &RootSignatureDesc) -> Result<RootSignature> {
        self.ensure_ready()?;
        desc.validate()?;

        let native = match &self.shared.native {
            NativeDevice::Software(_) => NativeRootSignature::Software,
            #[cfg(target_os = "windows")]
            NativeDevice::Dx12(device) => device.create_root_signature(desc)?,
        };
        let name = desc
            .name
            .clone()
            .unwrap_or_else(|| "Root Signature".to_string());
        let link = self.shared.register_child(name);
        Ok(RootSignature::new(native, desc.clone(), link))
    }

    /// 创建无窗口交换链（软件后端）
    ///
    /// DirectX 12 后端需要窗口句柄，请使用 [`Device::create_swap_chain_for_window`]。
    pub fn create_swap_chain(&self, desc: &SwapChainDesc) -> Result<SwapChain> {
        self.ensure_ready()?;
        SwapChain::create(&self.shared, desc, None)
    }

    /// 为窗口创建交换链
    pub fn create_swap_chain_for_window(
        &self,
        desc: &SwapChainDesc,
        window: &impl HasWindowHandle,
    ) -> Result<SwapChain> {
        self.ensure_ready()?;
        let handle = window
            .window_handle()
            .map_err(|e| GraphicsError::SwapChain(format!("window handle unavailable: {}", e)))?;
        SwapChain::create(&self.shared, desc, Some(handle.as_raw()))
    }

    /// 创建一个独立的描述符堆
    ///
    /// 创建失败返回携带后端状态码的可恢复错误。
    pub fn create_descriptor_heap(&self, desc: &DescriptorHeapDesc) -> Result<DescriptorHeap> {
        self.ensure_ready()?;
        Self::create_heap_on(&self.shared, desc)
    }

    /// 回收延迟释放队列中所有已完成的条目
    pub fn process_deferred_releases(&self) {
        self.shared.process_deferred_releases();
    }

    /// 收尾当前帧
    ///
    /// 在主队列上发出帧 Fence 信号、推进帧索引、阻塞等待新帧槽位的
    /// 上一次 Fence 值完成（门控命令分配器复用），最后回收延迟释放。
    /// 返回本帧的 Fence 值。
    pub fn end_frame(&mut self) -> Result<u64> {
        self.ensure_ready()?;
        let queue = self.shared.queue();

        let signaled = queue.signal();
        self.frame_fence_values[self.frame_index] = signaled;
        self.frame_index = (self.frame_index + 1) % self.frame_fence_values.len();

        let gate = self.frame_fence_values[self.frame_index];
        if gate != 0 {
            queue.fence().wait(gate);
        }

        self.shared.process_deferred_releases();
        Ok(signaled)
    }

    /// 阻塞等待设备上所有已提交的工作完成
    pub fn flush(&self) {
        self.shared.queue().flush();
    }

    /// 销毁设备
    ///
    /// 幂等。阻塞等待全部在途工作 → 断开所有子对象 → 无条件清空
    /// 延迟释放队列 → 进入 `Destroyed`。原生设备在 `Device`（及所有
    /// 强引用）释放时随 `DeviceShared` 一起销毁。
    pub fn shutdown(&mut self) {
        {
            let mut state = self.shared.state.lock().unwrap();
            match *state {
                DeviceState::TearingDown | DeviceState::Destroyed => return,
                _ => *state = DeviceState::TearingDown,
            }
        }

        info!(target: "kestrel::engine", backend = self.shared.kind.name(), "Device shutdown started");

        // 1. 等待所有队列上的在途工作完成
        if !self.shared.queue().flush() {
            warn!(
                target: "kestrel::engine",
                "Flush timed out during shutdown; releasing resources anyway"
            );
        }

        // 2. 断开所有子对象的反向引用，输出存活对象报告
        let names = self.shared.children.lock().unwrap().disconnect_all();
        if !names.is_empty() {
            debug!(
                target: "kestrel::engine",
                count = names.len(),
                objects = ?names,
                "Live device children disconnected at shutdown"
            );
        }

        // 3. GPU 已空闲，无条件清空延迟释放队列
        let drained: usize = {
            let mut deferred = self.shared.deferred.lock().unwrap();
            let n = deferred.len();
            deferred.clear();
            n
        };
        if drained > 0 {
            debug!(target: "kestrel::engine", drained, "Deferred-release queue drained");
        }

        self.shared.set_state(DeviceState::Destroyed);
        info!(target: "kestrel::engine", "Device shutdown complete");
    }
}

impl Drop for Device {
    fn drop(&mut self) {
        if self.shared.state() != DeviceState::Destroyed {
            self.shutdown();
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::resource::TextureFormat;

    fn software_device() -> Device {
        Device::create(DeviceDesc::new(BackendKind::Software)).unwrap()
    }

    #[test]
    fn test_create_software_device() {
        let device = software_device();
        assert_eq!(device.backend(), BackendKind::Software);
        assert_eq!(device.state(), DeviceState::Ready);
        assert_eq!(device.frame_index(), 0);
        // 三个堆 + 帧 Fence + 主队列
        assert_eq!(device.live_child_count(), 5);
    }

    #[cfg(not(target_os = "windows"))]
    #[test]
    fn test_dx12_rejected_off_windows() {
        let result = Device::create(DeviceDesc::new(BackendKind::Dx12));
        let err = result.err().unwrap().to_string();
        assert!(err.contains("only available on Windows"));
    }

    #[test]
    fn test_deferred_release_respects_fence() {
        let device = software_device();
        let desc = TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm);

        let pending_value = device.frame_fence().next_value();
        let texture = device.create_texture(&desc).unwrap();
        drop(texture);

        // 资源进入延迟释放队列，记录值尚未完成
        assert_eq!(device.deferred_release_count(), 1);
        device.process_deferred_releases();
        assert_eq!(device.deferred_release_count(), 1);
        assert!(device.frame_fence().completed_value() < pending_value);

        // Fence 越过记录值后回收
        device.frame_fence().signal(pending_value);
        device.process_deferred_releases();
        assert_eq!(device.deferred_release_count(), 0);
    }

    #[test]
    fn test_end_frame_reclaims_deferred() {
        let mut device = software_device();
        let desc = TextureDesc::render_target(32, 32, TextureFormat::Rgba8Unorm);

        drop(device.create_texture(&desc).unwrap());
        assert_eq!(device.deferred_release_count(), 1);

        device.end_frame().unwrap();
        assert_eq!(device.deferred_release_count(), 0);
        assert_eq!(device.frame_index(), 1);
    }

    #[test]
    fn test_frame_index_wraps() {
        let mut device = software_device();
        let count = device.desc().frame_buffer_count as usize;
        for _ in 0..count {
            device.end_frame().unwrap();
        }
        assert_eq!(device.frame_index(), 0);
    }

    #[test]
    fn test_texture_view_released_on_drop() {
        let device = software_device();
        let desc = TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm);

        let before = device.rtv_heap().allocated_count();
        let texture = device.create_texture(&desc).unwrap();
        assert_eq!(device.rtv_heap().allocated_count(), before + 1);

        drop(texture);
        assert_eq!(device.rtv_heap().allocated_count(), before);
    }

    #[test]
    fn test_heap_exhaustion_is_recoverable() {
        let mut desc = DeviceDesc::new(BackendKind::Software);
        desc.rtv_heap_capacity = 1;
        let device = Device::create(desc).unwrap();

        let tex_desc = TextureDesc::render_target(16, 16, TextureFormat::Rgba8Unorm);
        let _first = device.create_texture(&tex_desc).unwrap();

        let err = device.create_texture(&tex_desc).err().unwrap();
        assert!(err.to_string().contains("exhausted"));

        // 释放后可以继续创建
        drop(_first);
        assert!(device.create_texture(&tex_desc).is_ok());
    }

    #[test]
    fn test_shutdown_disconnects_children_and_drains_queue() {
        let mut device = software_device();
        let desc = TextureDesc::render_target(64, 64, TextureFormat::Rgba8Unorm);

        let fence = device.create_fence(0, "user fence").unwrap();
        let texture = device.create_texture(&desc).unwrap();
        drop(device.create_texture(&desc).unwrap());
        assert_eq!(device.deferred_release_count(), 1);

        device.shutdown();
        assert_eq!(device.state(), DeviceState::Destroyed);
        assert_eq!(device.deferred_release_count(), 0);
        assert_eq!(device.live_child_count(), 0);

        // 幸存子对象的反向引用已断开
        assert!(!fence.is_connected());
        assert!(!texture.is_connected());

        // 断开后的析构是安全的空操作
        drop(texture);
        drop(fence);
    }

    #[test]
    fn test_factories_refuse_after_shutdown() {
        let mut device = software_device();
        device.shutdown();

        assert!(device.create_fence(0, "late").is_err());
        assert!(device
            .create_texture(&TextureDesc::render_target(8, 8, TextureFormat::Rgba8Unorm))
            .is_err());
        assert!(device.end_frame().is_err());
    }

    #[test]
    fn test_shutdown_is_idempotent() {
        let mut device = software_device();
        device.shutdown();
        device.shutdown();
        assert_eq!(device.state(), DeviceState::Destroyed);
    }

    #[test]
    fn test_root_signature_validation_error_is_recoverable() {
        let device = software_device();
        assert!(device
            .create_root_signature(&RootSignatureDesc::new(65))
            .is_err());
        assert!(device
            .create_root_signature(&RootSignatureDesc::new(16).with_name("main"))
            .is_ok());
    }
}
