//! DirectX 12 原生后端
//!
//! 封装 D3D12/DXGI 对象并桥接到设备层的原生枚举。初始化流程：
//!
//! 1. 按需启用调试层
//! 2. 创建 DXGI 工厂和 D3D12 设备
//! 3. 设备层随后按需创建队列、Fence、描述符堆、资源和交换链
//!
//! 所有调用失败都以 `GraphicsError::Backend` 携带原生 HRESULT 返回，
//! 由设备层决定是整体失败（初始化路径）还是交给调用方（资源路径）。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use raw_window_handle::Win32WindowHandle;
use tracing::{debug, warn};
use windows::{
    core::Interface, Win32::Foundation::*, Win32::Graphics::Direct3D::*,
    Win32::Graphics::Direct3D12::*, Win32::Graphics::Dxgi::Common::*, Win32::Graphics::Dxgi::*,
    Win32::System::Threading::*,
};

use crate::core::error::{GraphicsError, Result};

use super::backend::DeviceDesc;
use super::command::{CommandQueue, NativeContext, NativeQueue, QueueKind};
use super::descriptor::{
    DescriptorHandle, DescriptorHeap, DescriptorHeapDesc, DescriptorType, NativeDescriptorHeap,
};
use super::device_child::DeviceLink;
use super::fence::NativeFence;
use super::resource::{
    NativeResource, NativeRootSignature, RootSignatureDesc, TextureDesc, TextureFormat,
    TextureUsage,
};
use super::swapchain::SwapChainDesc;

/// 把 windows 错误转换成携带 HRESULT 的后端错误
fn backend_error(context: &str, err: windows::core::Error) -> GraphicsError {
    GraphicsError::Backend {
        code: err.code().0,
        message: format!("{}: {}", context, err.message()),
    }
}

fn dxgi_format(format: TextureFormat) -> DXGI_FORMAT {
    match format {
        TextureFormat::Rgba8Unorm => DXGI_FORMAT_R8G8B8A8_UNORM,
        TextureFormat::Bgra8Unorm => DXGI_FORMAT_B8G8R8A8_UNORM,
        TextureFormat::Depth32Float => DXGI_FORMAT_D32_FLOAT,
    }
}

fn command_list_type(kind: QueueKind) -> D3D12_COMMAND_LIST_TYPE {
    match kind {
        QueueKind::Direct => D3D12_COMMAND_LIST_TYPE_DIRECT,
        QueueKind::Compute => D3D12_COMMAND_LIST_TYPE_COMPUTE,
        QueueKind::Copy => D3D12_COMMAND_LIST_TYPE_COPY,
    }
}

fn heap_type(descriptor_type: DescriptorType) -> D3D12_DESCRIPTOR_HEAP_TYPE {
    match descriptor_type {
        DescriptorType::RenderTargetView => D3D12_DESCRIPTOR_HEAP_TYPE_RTV,
        DescriptorType::DepthStencilView => D3D12_DESCRIPTOR_HEAP_TYPE_DSV,
        DescriptorType::Sampler => D3D12_DESCRIPTOR_HEAP_TYPE_SAMPLER,
        _ => D3D12_DESCRIPTOR_HEAP_TYPE_CBV_SRV_UAV,
    }
}

/// 资源身份编号派发器（日志与延迟释放追踪用）
static NEXT_RESOURCE_ID: AtomicU64 = AtomicU64::new(1);

/// D3D12 设备
pub(crate) struct Dx12Device {
    device: ID3D12Device,
    factory: IDXGIFactory4,
}

// D3D12 接口本身是线程安全的
unsafe impl Send for Dx12Device {}
unsafe impl Sync for Dx12Device {}

impl Dx12Device {
    /// 创建 D3D12 设备
    ///
    /// 调试层按需启用：请求了但接口不可用时记录警告并继续，
    /// 设备创建失败才作为不可恢复错误返回。
    pub(crate) fn create(desc: &DeviceDesc) -> Result<Dx12Device> {
        unsafe {
            let mut factory_flags = DXGI_CREATE_FACTORY_FLAGS(0);
            if desc.enable_debug_layer {
                let mut debug_interface: Option<ID3D12Debug> = None;
                match D3D12GetDebugInterface(&mut debug_interface) {
                    Ok(()) => {
                        if let Some(debug_interface) = debug_interface {
                            debug_interface.EnableDebugLayer();
                            factory_flags = DXGI_CREATE_FACTORY_DEBUG;
                            debug!(target: "kestrel::engine", "D3D12 debug layer enabled");
                        }
                    }
                    Err(e) => {
                        warn!(
                            target: "kestrel::engine",
                            error = %e.message(),
                            "D3D12 debug layer unavailable; continuing without it"
                        );
                    }
                }
            }

            let factory: IDXGIFactory4 = CreateDXGIFactory2(factory_flags)
                .map_err(|e| backend_error("CreateDXGIFactory2", e))?;

            let mut device: Option<ID3D12Device> = None;
            D3D12CreateDevice(None, D3D_FEATURE_LEVEL_11_0, &mut device).map_err(|e| {
                GraphicsError::DeviceCreation(format!(
                    "D3D12CreateDevice failed ({:#010x}): {}",
                    e.code().0,
                    e.message()
                ))
            })?;
            let device = device.ok_or_else(|| {
                GraphicsError::DeviceCreation("D3D12CreateDevice returned no device".to_string())
            })?;

            debug!(target: "kestrel::engine", "D3D12 device created");
            Ok(Dx12Device { device, factory })
        }
    }

    pub(crate) fn create_fence(&self, initial: u64) -> Result<NativeFence> {
        unsafe {
            let fence: ID3D12Fence = self
                .device
                .CreateFence(initial, D3D12_FENCE_FLAG_NONE)
                .map_err(|e| GraphicsError::DeviceCreation(format!(
                    "CreateFence failed: {}",
                    e.message()
                )))?;
            let event = CreateEventA(None, false, false, None)
                .map_err(|e| GraphicsError::DeviceCreation(format!(
                    "CreateEvent failed: {}",
                    e.message()
                )))?;
            Ok(NativeFence::Dx12(Dx12Fence { fence, event }))
        }
    }

    pub(crate) fn create_queue(&self, kind: QueueKind) -> Result<NativeQueue> {
        unsafe {
            let queue_desc = D3D12_COMMAND_QUEUE_DESC {
                Type: command_list_type(kind),
                Flags: D3D12_COMMAND_QUEUE_FLAG_NONE,
                ..Default::default()
            };
            let queue: ID3D12CommandQueue = self
                .device
                .CreateCommandQueue(&queue_desc)
                .map_err(|e| GraphicsError::DeviceCreation(format!(
                    "CreateCommandQueue failed: {}",
                    e.message()
                )))?;
            Ok(NativeQueue::Dx12(Dx12Queue { queue }))
        }
    }

    pub(crate) fn create_context(&self, kind: QueueKind) -> Result<NativeContext> {
        unsafe {
            let list_type = command_list_type(kind);
            let allocator: ID3D12CommandAllocator = self
                .device
                .CreateCommandAllocator(list_type)
                .map_err(|e| backend_error("CreateCommandAllocator", e))?;
            let list: ID3D12GraphicsCommandList = self
                .device
                .CreateCommandList(0, list_type, &allocator, None)
                .map_err(|e| backend_error("CreateCommandList", e))?;
            Ok(NativeContext::Dx12(Dx12Context { allocator, list }))
        }
    }

    pub(crate) fn create_descriptor_heap(
        &self,
        desc: &DescriptorHeapDesc,
        link: DeviceLink,
    ) -> Result<DescriptorHeap> {
        unsafe {
            let heap_desc = D3D12_DESCRIPTOR_HEAP_DESC {
                Type: heap_type(desc.descriptor_type),
                NumDescriptors: desc.capacity,
                Flags: if desc.shader_visible {
                    D3D12_DESCRIPTOR_HEAP_FLAG_SHADER_VISIBLE
                } else {
                    D3D12_DESCRIPTOR_HEAP_FLAG_NONE
                },
                NodeMask: 0,
            };
            let heap: ID3D12DescriptorHeap = self
                .device
                .CreateDescriptorHeap(&heap_desc)
                .map_err(|e| backend_error("CreateDescriptorHeap", e))?;

            let increment_size = self
                .device
                .GetDescriptorHandleIncrementSize(heap_desc.Type);
            let cpu_base = heap.GetCPUDescriptorHandleForHeapStart().ptr;
            let gpu_base = desc
                .shader_visible
                .then(|| heap.GetGPUDescriptorHandleForHeapStart().ptr);

            Ok(DescriptorHeap::new(
                NativeDescriptorHeap::Dx12(Dx12DescriptorHeap { heap }),
                desc,
                increment_size,
                cpu_base,
                gpu_base,
                link,
            ))
        }
    }

    pub(crate) fn create_texture(&self, desc: &TextureDesc) -> Result<NativeResource> {
        unsafe {
            let heap_props = D3D12_HEAP_PROPERTIES {
                Type: D3D12_HEAP_TYPE_DEFAULT,
                ..Default::default()
            };
            let (flags, initial_state) = match desc.usage {
                TextureUsage::RenderTarget => (
                    D3D12_RESOURCE_FLAG_ALLOW_RENDER_TARGET,
                    D3D12_RESOURCE_STATE_RENDER_TARGET,
                ),
                TextureUsage::DepthStencil => (
                    D3D12_RESOURCE_FLAG_ALLOW_DEPTH_STENCIL,
                    D3D12_RESOURCE_STATE_DEPTH_WRITE,
                ),
                TextureUsage::ShaderResource => {
                    (D3D12_RESOURCE_FLAG_NONE, D3D12_RESOURCE_STATE_COMMON)
                }
            };
            let resource_desc = D3D12_RESOURCE_DESC {
                Dimension: D3D12_RESOURCE_DIMENSION_TEXTURE2D,
                Width: desc.width as u64,
                Height: desc.height,
                DepthOrArraySize: 1,
                MipLevels: 1,
                Format: dxgi_format(desc.format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                Layout: D3D12_TEXTURE_LAYOUT_UNKNOWN,
                Flags: flags,
                ..Default::default()
            };

            let mut resource: Option<ID3D12Resource> = None;
            self.device
                .CreateCommittedResource(
                    &heap_props,
                    D3D12_HEAP_FLAG_NONE,
                    &resource_desc,
                    initial_state,
                    None,
                    &mut resource,
                )
                .map_err(|e| {
                    GraphicsError::ResourceCreation(format!(
                        "CreateCommittedResource failed ({:#010x}): {}",
                        e.code().0,
                        e.message()
                    ))
                })?;
            let resource = resource.ok_or_else(|| {
                GraphicsError::ResourceCreation(
                    "CreateCommittedResource returned no resource".to_string(),
                )
            })?;
            Ok(NativeResource::Dx12(Dx12Resource::wrap(resource)))
        }
    }

    /// 在已分配的描述符槽位上创建视图
    pub(crate) fn create_view(
        &self,
        resource: &NativeResource,
        desc: &TextureDesc,
        descriptor_type: DescriptorType,
        handle: &DescriptorHandle,
    ) {
        let NativeResource::Dx12(resource) = resource else {
            return;
        };
        let cpu_handle = D3D12_CPU_DESCRIPTOR_HANDLE {
            ptr: handle.cpu.ptr,
        };
        unsafe {
            match descriptor_type {
                DescriptorType::RenderTargetView => {
                    self.device
                        .CreateRenderTargetView(&resource.resource, None, cpu_handle);
                }
                DescriptorType::DepthStencilView => {
                    self.device
                        .CreateDepthStencilView(&resource.resource, None, cpu_handle);
                }
                _ => {
                    let srv_desc = D3D12_SHADER_RESOURCE_VIEW_DESC {
                        Format: dxgi_format(desc.format),
                        ViewDimension: D3D12_SRV_DIMENSION_TEXTURE2D,
                        Shader4ComponentMapping: D3D12_DEFAULT_SHADER_4_COMPONENT_MAPPING,
                        Anonymous: D3D12_SHADER_RESOURCE_VIEW_DESC_0 {
                            Texture2D: D3D12_TEX2D_SRV {
                                MipLevels: 1,
                                ..Default::default()
                            },
                        },
                    };
                    self.device.CreateShaderResourceView(
                        &resource.resource,
                        Some(&srv_desc),
                        cpu_handle,
                    );
                }
            }
        }
    }

    pub(crate) fn create_root_signature(
        &self,
        desc: &RootSignatureDesc,
    ) -> Result<NativeRootSignature> {
        unsafe {
            // 以 32 位根常量的形式占用 desc.parameter_dwords 个 DWORD
            let parameter = D3D12_ROOT_PARAMETER {
                ParameterType: D3D12_ROOT_PARAMETER_TYPE_32BIT_CONSTANTS,
                Anonymous: D3D12_ROOT_PARAMETER_0 {
                    Constants: D3D12_ROOT_CONSTANTS {
                        ShaderRegister: 0,
                        RegisterSpace: 0,
                        Num32BitValues: desc.parameter_dwords,
                    },
                },
                ShaderVisibility: D3D12_SHADER_VISIBILITY_ALL,
            };
            let root_desc = D3D12_ROOT_SIGNATURE_DESC {
                NumParameters: if desc.parameter_dwords > 0 { 1 } else { 0 },
                pParameters: &parameter,
                NumStaticSamplers: 0,
                pStaticSamplers: std::ptr::null(),
                Flags: D3D12_ROOT_SIGNATURE_FLAG_ALLOW_INPUT_ASSEMBLER_INPUT_LAYOUT,
            };

            let mut blob = None;
            let mut error_blob = None;
            D3D12SerializeRootSignature(
                &root_desc,
                D3D_ROOT_SIGNATURE_VERSION_1,
                &mut blob,
                Some(&mut error_blob),
            )
            .map_err(|e| {
                let detail = error_blob
                    .map(|b: ID3DBlob| {
                        String::from_utf8_lossy(std::slice::from_raw_parts(
                            b.GetBufferPointer() as *const u8,
                            b.GetBufferSize(),
                        ))
                        .into_owned()
                    })
                    .unwrap_or_else(|| e.message());
                GraphicsError::RootSignature(detail)
            })?;
            let blob = blob.ok_or_else(|| {
                GraphicsError::RootSignature("serialization produced no blob".to_string())
            })?;

            let signature: ID3D12RootSignature = self
                .device
                .CreateRootSignature(
                    0,
                    std::slice::from_raw_parts(
                        blob.GetBufferPointer() as *const u8,
                        blob.GetBufferSize(),
                    ),
                )
                .map_err(|e| GraphicsError::RootSignature(e.message()))?;
            Ok(NativeRootSignature::Dx12(Dx12RootSignature { signature }))
        }
    }

    pub(crate) fn create_swap_chain(
        &self,
        desc: &SwapChainDesc,
        window: Win32WindowHandle,
        queue: &CommandQueue,
    ) -> Result<Dx12SwapChain> {
        let NativeQueue::Dx12(queue) = queue.native_queue() else {
            return Err(GraphicsError::SwapChain(
                "swap chain requires a DirectX 12 command queue".to_string(),
            )
            .into());
        };
        unsafe {
            let hwnd = HWND(window.hwnd.get() as *mut core::ffi::c_void);
            let flags = if desc.allow_tearing {
                DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING.0 as u32
            } else {
                0
            };
            let swap_chain_desc = DXGI_SWAP_CHAIN_DESC1 {
                Width: desc.width,
                Height: desc.height,
                Format: dxgi_format(desc.format),
                SampleDesc: DXGI_SAMPLE_DESC {
                    Count: 1,
                    ..Default::default()
                },
                BufferUsage: DXGI_USAGE_RENDER_TARGET_OUTPUT,
                BufferCount: desc.buffer_count,
                SwapEffect: DXGI_SWAP_EFFECT_FLIP_DISCARD,
                Flags: flags,
                ..Default::default()
            };

            let swap_chain: IDXGISwapChain1 = self
                .factory
                .CreateSwapChainForHwnd(&queue.queue, hwnd, &swap_chain_desc, None, None)
                .map_err(|e| GraphicsError::SwapChain(format!(
                    "CreateSwapChainForHwnd failed ({:#010x}): {}",
                    e.code().0,
                    e.message()
                )))?;
            let swap_chain: IDXGISwapChain3 = swap_chain.cast().map_err(|e| {
                GraphicsError::SwapChain(format!("IDXGISwapChain3 cast failed: {}", e.message()))
            })?;
            Ok(Dx12SwapChain {
                swap_chain,
                allow_tearing: desc.allow_tearing,
            })
        }
    }
}

/// D3D12 Fence 加事件句柄
///
/// 事件用于阻塞等待；同一个 Fence 同一时刻只应有一个等待者。
pub(crate) struct Dx12Fence {
    fence: ID3D12Fence,
    event: HANDLE,
}

unsafe impl Send for Dx12Fence {}
unsafe impl Sync for Dx12Fence {}

impl Dx12Fence {
    pub(crate) fn completed_value(&self) -> u64 {
        unsafe { self.fence.GetCompletedValue() }
    }

    pub(crate) fn signal(&self, value: u64) {
        // CPU 侧信号。ID3D12Fence::Signal 直接设置计数器（可以倒退），
        // 单调性由 Fence 包装层在调用前保证
        unsafe {
            let _ = self.fence.Signal(value);
        }
    }

    pub(crate) fn wait(&self, value: u64, timeout: Duration) -> bool {
        unsafe {
            if self.fence.GetCompletedValue() >= value {
                return true;
            }
            if self.fence.SetEventOnCompletion(value, self.event).is_err() {
                return false;
            }
            let result = WaitForSingleObject(self.event, timeout.as_millis() as u32);
            result == WAIT_OBJECT_0
        }
    }
}

impl Drop for Dx12Fence {
    fn drop(&mut self) {
        unsafe {
            let _ = CloseHandle(self.event);
        }
    }
}

/// D3D12 命令队列
pub(crate) struct Dx12Queue {
    queue: ID3D12CommandQueue,
}

unsafe impl Send for Dx12Queue {}
unsafe impl Sync for Dx12Queue {}

impl Dx12Queue {
    pub(crate) fn execute(&self, context: &Dx12Context) {
        unsafe {
            let list: ID3D12CommandList = context.list.cast().expect("command list interface");
            self.queue.ExecuteCommandLists(&[Some(list)]);
        }
    }

    /// GPU 侧信号：队列执行到此处时推进 Fence
    pub(crate) fn signal(&self, fence: &Dx12Fence, value: u64) {
        unsafe {
            let _ = self.queue.Signal(&fence.fence, value);
        }
    }
}

/// D3D12 命令分配器 + 图形命令列表
pub(crate) struct Dx12Context {
    allocator: ID3D12CommandAllocator,
    list: ID3D12GraphicsCommandList,
}

unsafe impl Send for Dx12Context {}

impl Dx12Context {
    pub(crate) fn clear_render_target(&mut self, rtv: &DescriptorHandle) {
        let handle = D3D12_CPU_DESCRIPTOR_HANDLE { ptr: rtv.cpu.ptr };
        unsafe {
            self.list
                .ClearRenderTargetView(handle, &[0.0, 0.0, 0.0, 1.0], None);
        }
    }

    pub(crate) fn close(&mut self) {
        unsafe {
            let _ = self.list.Close();
        }
    }

    /// 重置分配器和列表
    ///
    /// 调用方（`CommandContext::reset`）已经确认对应的 Fence 值完成。
    pub(crate) fn reset(&mut self) {
        unsafe {
            let _ = self.allocator.Reset();
            let _ = self.list.Reset(&self.allocator, None);
        }
    }
}

/// D3D12 描述符堆
pub(crate) struct Dx12DescriptorHeap {
    #[allow(dead_code)]
    heap: ID3D12DescriptorHeap,
}

unsafe impl Send for Dx12DescriptorHeap {}
unsafe impl Sync for Dx12DescriptorHeap {}

/// D3D12 资源加身份编号
pub(crate) struct Dx12Resource {
    resource: ID3D12Resource,
    id: u64,
}

unsafe impl Send for Dx12Resource {}
unsafe impl Sync for Dx12Resource {}

impl Dx12Resource {
    fn wrap(resource: ID3D12Resource) -> Self {
        Self {
            resource,
            id: NEXT_RESOURCE_ID.fetch_add(1, Ordering::Relaxed),
        }
    }

    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// D3D12 根签名
pub(crate) struct Dx12RootSignature {
    #[allow(dead_code)]
    signature: ID3D12RootSignature,
}

unsafe impl Send for Dx12RootSignature {}
unsafe impl Sync for Dx12RootSignature {}

/// DXGI 交换链
pub(crate) struct Dx12SwapChain {
    swap_chain: IDXGISwapChain3,
    allow_tearing: bool,
}

unsafe impl Send for Dx12SwapChain {}

impl Dx12SwapChain {
    /// 取出第 `index` 个后备缓冲区资源
    pub(crate) fn buffer(&self, index: u32) -> Result<NativeResource> {
        unsafe {
            let resource: ID3D12Resource = self.swap_chain.GetBuffer(index).map_err(|e| {
                GraphicsError::SwapChain(format!("GetBuffer({}) failed: {}", index, e.message()))
            })?;
            Ok(NativeResource::Dx12(Dx12Resource::wrap(resource)))
        }
    }

    pub(crate) fn current_index(&self) -> usize {
        unsafe { self.swap_chain.GetCurrentBackBufferIndex() as usize }
    }

    pub(crate) fn present(&mut self, vsync: bool, allow_tearing: bool) -> Result<usize> {
        unsafe {
            let interval = if vsync { 1 } else { 0 };
            let flags = if !vsync && allow_tearing && self.allow_tearing {
                DXGI_PRESENT_ALLOW_TEARING
            } else {
                DXGI_PRESENT(0)
            };
            self.swap_chain
                .Present(interval, flags)
                .ok()
                .map_err(|e| GraphicsError::SwapChain(format!(
                    "Present failed ({:#010x}): {}",
                    e.code().0,
                    e.message()
                )))?;
            Ok(self.swap_chain.GetCurrentBackBufferIndex() as usize)
        }
    }

    /// 重建后备缓冲区
    ///
    /// 调用方保证 GPU 已空闲且旧缓冲区引用已全部释放。
    pub(crate) fn resize(
        &mut self,
        width: u32,
        height: u32,
        buffer_count: u32,
        format: TextureFormat,
    ) -> Result<()> {
        unsafe {
            let flags = if self.allow_tearing {
                DXGI_SWAP_CHAIN_FLAG_ALLOW_TEARING
            } else {
                DXGI_SWAP_CHAIN_FLAG(0)
            };
            self.swap_chain
                .ResizeBuffers(buffer_count, width, height, dxgi_format(format), flags)
                .map_err(|e| GraphicsError::SwapChain(format!(
                    "ResizeBuffers failed ({:#010x}): {}",
                    e.code().0,
                    e.message()
                )))?;
            Ok(())
        }
    }
}
