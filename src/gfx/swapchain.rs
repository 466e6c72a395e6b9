//! 交换链
//!
//! 封装 N 个后备缓冲区的呈现周期。后备缓冲区是带 back-buffer 标记的
//! 纹理：它们的原生资源由交换链拥有，不进入设备的延迟释放记账。
//!
//! # 生命周期约定
//!
//! `destroy` 必须显式调用（或在设备销毁后析构）。`resize` 和 `destroy`
//! 都会先阻塞等待设备队列空闲——DXGI 要求释放后备缓冲区时 GPU 不得
//! 引用它们，软件后端沿用同一约定。

use std::sync::Arc;

use raw_window_handle::RawWindowHandle;
use tracing::{debug, info};

use crate::core::error::{GraphicsError, Result};

use super::device::DeviceShared;
use super::device_child::DeviceLink;
use super::resource::{Texture, TextureDesc, TextureFormat};
use super::software::SoftwareSwapChain;

#[cfg(target_os = "windows")]
use super::dx12::Dx12SwapChain;

/// 交换链描述信息
#[derive(Debug, Clone)]
pub struct SwapChainDesc {
    /// 宽度（像素）
    pub width: u32,
    /// 高度（像素）
    pub height: u32,
    /// 后备缓冲区格式
    pub format: TextureFormat,
    /// 后备缓冲区数量
    pub buffer_count: u32,
    /// 是否垂直同步
    pub vsync: bool,
    /// 是否允许撕裂（关闭垂直同步时生效）
    pub allow_tearing: bool,
    /// 调试名称
    pub name: Option<String>,
}

impl SwapChainDesc {
    /// 创建新的交换链描述
    pub fn new(width: u32, height: u32) -> Self {
        Self {
            width,
            height,
            format: TextureFormat::Bgra8Unorm,
            buffer_count: 3,
            vsync: true,
            allow_tearing: false,
            name: None,
        }
    }

    /// 设置后备缓冲区数量
    pub fn with_buffer_count(mut self, count: u32) -> Self {
        self.buffer_count = count;
        self
    }

    /// 设置垂直同步
    pub fn with_vsync(mut self, vsync: bool) -> Self {
        self.vsync = vsync;
        self
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }
}

/// 按后端划分的原生交换链
pub(crate) enum NativeSwapChain {
    Software(SoftwareSwapChain),
    #[cfg(target_os = "windows")]
    Dx12(Dx12SwapChain),
}

/// 交换链
///
/// 设备子对象；持有后备缓冲区纹理和当前索引。
pub struct SwapChain {
    /// `None` 表示已销毁
    native: Option<NativeSwapChain>,
    desc: SwapChainDesc,
    back_buffers: Vec<Texture>,
    link: DeviceLink,
}

impl SwapChain {
    /// 创建交换链
    ///
    /// 软件后端不需要窗口句柄；DirectX 12 后端要求 Win32 窗口。
    pub(crate) fn create(
        shared: &Arc<DeviceShared>,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> Result<SwapChain> {
        if desc.buffer_count < 2 {
            return Err(GraphicsError::SwapChain(format!(
                "swap chain requires at least 2 back buffers, got {}",
                desc.buffer_count
            ))
            .into());
        }

        let native = Self::create_native(shared, desc, window)?;
        let back_buffers = Self::build_back_buffers(shared, &native, desc)?;
        let name = desc.name.clone().unwrap_or_else(|| "Swap Chain".to_string());
        let link = shared.register_child(name);

        info!(
            target: "kestrel::engine",
            width = desc.width,
            height = desc.height,
            buffers = desc.buffer_count,
            format = desc.format.name(),
            "Swap chain created"
        );
        Ok(SwapChain {
            native: Some(native),
            desc: desc.clone(),
            back_buffers,
            link,
        })
    }

    fn create_native(
        shared: &Arc<DeviceShared>,
        desc: &SwapChainDesc,
        window: Option<RawWindowHandle>,
    ) -> Result<NativeSwapChain> {
        match shared.backend_native() {
            super::device::NativeDevice::Software(_) => Ok(NativeSwapChain::Software(
                SoftwareSwapChain::new(desc.buffer_count as usize),
            )),
            #[cfg(target_os = "windows")]
            super::device::NativeDevice::Dx12(device) => {
                let hwnd = match window {
                    Some(RawWindowHandle::Win32(handle)) => handle,
                    _ => {
                        return Err(GraphicsError::SwapChain(
                            "DirectX 12 swap chain requires a Win32 window handle".to_string(),
                        )
                        .into())
                    }
                };
                Ok(NativeSwapChain::Dx12(device.create_swap_chain(
                    desc,
                    hwnd,
                    shared.queue(),
                )?))
            }
        }
    }

    fn build_back_buffers(
        shared: &Arc<DeviceShared>,
        native: &NativeSwapChain,
        desc: &SwapChainDesc,
    ) -> Result<Vec<Texture>> {
        let mut buffers = Vec::with_capacity(desc.buffer_count as usize);
        for index in 0..desc.buffer_count {
            let tex_desc = TextureDesc::render_target(desc.width, desc.height, desc.format)
                .with_name(format!("Back Buffer {}", index));
            let resource = match native {
                NativeSwapChain::Software(_) => shared.acquire_native_texture(&tex_desc)?,
                #[cfg(target_os = "windows")]
                NativeSwapChain::Dx12(chain) => chain.buffer(index)?,
            };
            buffers.push(shared.wrap_texture(resource, &tex_desc, true)?);
        }
        Ok(buffers)
    }

    /// 交换链描述
    pub fn desc(&self) -> &SwapChainDesc {
        &self.desc
    }

    /// 当前后备缓冲区索引
    pub fn current_index(&self) -> usize {
        match &self.native {
            Some(NativeSwapChain::Software(chain)) => chain.current_index(),
            #[cfg(target_os = "windows")]
            Some(NativeSwapChain::Dx12(chain)) => chain.current_index(),
            None => 0,
        }
    }

    /// 当前后备缓冲区纹理
    pub fn current_back_buffer(&self) -> Option<&Texture> {
        self.back_buffers.get(self.current_index())
    }

    /// 后备缓冲区数量
    pub fn buffer_count(&self) -> u32 {
        self.desc.buffer_count
    }

    /// 是否已销毁
    pub fn is_destroyed(&self) -> bool {
        self.native.is_none()
    }

    /// 呈现当前帧并推进后备缓冲区索引
    ///
    /// 返回新的当前索引。
    pub fn present(&mut self) -> Result<usize> {
        match &mut self.native {
            Some(NativeSwapChain::Software(chain)) => Ok(chain.present()),
            #[cfg(target_os = "windows")]
            Some(NativeSwapChain::Dx12(chain)) => {
                chain.present(self.desc.vsync, self.desc.allow_tearing)
            }
            None => Err(GraphicsError::SwapChain(
                "present called on a destroyed swap chain".to_string(),
            )
            .into()),
        }
    }

    /// 调整交换链尺寸
    ///
    /// 先阻塞等待设备队列空闲并释放旧的后备缓冲区，再重建为新尺寸；
    /// 重建后当前索引回到 0。旧缓冲区释放后重建失败时没有可用的
    /// 后备缓冲区，交换链转入已销毁状态，后续 `present` 返回错误。
    pub fn resize(&mut self, width: u32, height: u32) -> Result<()> {
        if width == 0 || height == 0 {
            return Err(GraphicsError::SwapChain(format!(
                "invalid swap chain size {}x{}",
                width, height
            ))
            .into());
        }
        let shared = self
            .link
            .device()
            .ok_or(GraphicsError::DeviceTearingDown)?;
        let native = self.native.as_mut().ok_or_else(|| {
            GraphicsError::SwapChain("resize called on a destroyed swap chain".to_string())
        })?;

        // 释放旧缓冲区前 GPU 不得再引用它们
        shared.queue().flush();
        self.back_buffers.clear();

        self.desc.width = width;
        self.desc.height = height;
        match native {
            NativeSwapChain::Software(chain) => chain.resize(),
            #[cfg(target_os = "windows")]
            NativeSwapChain::Dx12(chain) => {
                chain.resize(width, height, self.desc.buffer_count, self.desc.format)?
            }
        }

        self.back_buffers = match Self::build_back_buffers(&shared, native, &self.desc) {
            Ok(buffers) => buffers,
            Err(e) => {
                // 不停留在零缓冲区的半初始化状态
                self.native = None;
                return Err(e);
            }
        };
        debug!(
            target: "kestrel::engine",
            width,
            height,
            "Swap chain resized"
        );
        Ok(())
    }

    /// 销毁交换链
    ///
    /// 幂等。等待设备队列空闲后释放后备缓冲区和原生交换链。
    pub fn destroy(&mut self) {
        if self.native.is_none() {
            return;
        }
        if let Some(shared) = self.link.device() {
            shared.queue().flush();
        }
        self.back_buffers.clear();
        self.native = None;
        debug!(target: "kestrel::engine", "Swap chain destroyed");
    }
}

impl Drop for SwapChain {
    fn drop(&mut self) {
        // 存活的交换链必须先显式销毁；设备已断开时析构兜底
        debug_assert!(
            self.native.is_none() || !self.link.is_connected(),
            "swap chain dropped without destroy()"
        );
        self.destroy();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gfx::backend::{BackendKind, DeviceDesc};
    use crate::gfx::device::Device;

    fn test_device() -> Device {
        Device::create(DeviceDesc::new(BackendKind::Software)).unwrap()
    }

    #[test]
    fn test_create_and_destroy() {
        let device = test_device();
        let mut chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();
        assert_eq!(chain.buffer_count(), 3);
        assert_eq!(chain.current_index(), 0);
        assert!(chain.current_back_buffer().unwrap().is_back_buffer());

        chain.destroy();
        assert!(chain.is_destroyed());
        assert!(chain.present().is_err());

        // 幂等
        chain.destroy();
    }

    #[test]
    fn test_buffer_count_validation() {
        let device = test_device();
        let result = device.create_swap_chain(&SwapChainDesc::new(640, 480).with_buffer_count(1));
        assert!(result.is_err());
    }

    #[test]
    fn test_present_cycles_buffers() {
        let device = test_device();
        let mut chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();

        assert_eq!(chain.present().unwrap(), 1);
        assert_eq!(chain.present().unwrap(), 2);
        assert_eq!(chain.present().unwrap(), 0);
        chain.destroy();
    }

    #[test]
    fn test_resize_recreates_buffers() {
        let device = test_device();
        let mut chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();
        chain.present().unwrap();

        chain.resize(1920, 1080).unwrap();
        assert_eq!(chain.current_index(), 0);
        let buffer = chain.current_back_buffer().unwrap();
        assert_eq!(buffer.width(), 1920);
        assert_eq!(buffer.height(), 1080);

        // 后备缓冲区不进入延迟释放记账
        assert_eq!(device.deferred_release_count(), 0);
        chain.destroy();
    }

    #[test]
    fn test_resize_rejects_zero_size() {
        let device = test_device();
        let mut chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();
        assert!(chain.resize(0, 720).is_err());
        chain.destroy();
    }

    #[test]
    fn test_resize_after_destroy_is_rejected() {
        let device = test_device();
        let mut chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();
        chain.destroy();

        // 已销毁（含重建失败后转入的销毁态）的交换链拒绝 resize 和 present
        assert!(chain.resize(800, 600).is_err());
        assert!(chain.present().is_err());
        assert!(chain.current_back_buffer().is_none());
    }

    #[test]
    fn test_drop_after_device_shutdown_is_safe() {
        let mut device = test_device();
        let chain = device
            .create_swap_chain(&SwapChainDesc::new(640, 480))
            .unwrap();

        device.shutdown();
        // 设备已断开：析构兜底，不触发断言
        drop(chain);
    }
}
