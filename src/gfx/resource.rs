//! GPU 资源封装
//!
//! 设备拥有的 GPU 资源（纹理、根签名）。纹理析构时不会立即释放原生资源，
//! 而是交给设备的延迟释放队列，等 GPU 完成所有可能引用它的工作后再物理释放。
//! 交换链后备缓冲区例外：其生命周期由交换链管理，不进入延迟释放记账。

use super::descriptor::{DescriptorHandle, DescriptorType};
use super::device_child::DeviceLink;
use super::software::SoftwareResource;

use crate::core::error::Result;

#[cfg(target_os = "windows")]
use super::dx12::{Dx12Resource, Dx12RootSignature};

/// 纹理像素格式
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureFormat {
    /// 8 位 RGBA，无符号归一化
    Rgba8Unorm,
    /// 8 位 BGRA，无符号归一化（交换链常用）
    Bgra8Unorm,
    /// 32 位浮点深度
    Depth32Float,
}

impl TextureFormat {
    /// 格式名称
    pub fn name(&self) -> &'static str {
        match self {
            TextureFormat::Rgba8Unorm => "RGBA8_UNORM",
            TextureFormat::Bgra8Unorm => "BGRA8_UNORM",
            TextureFormat::Depth32Float => "D32_FLOAT",
        }
    }

    /// 是否为深度格式
    pub fn is_depth(&self) -> bool {
        matches!(self, TextureFormat::Depth32Float)
    }
}

/// 纹理用途
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TextureUsage {
    /// 渲染目标（分配 RTV）
    RenderTarget,
    /// 深度模板（分配 DSV）
    DepthStencil,
    /// 着色器资源（分配 SRV）
    ShaderResource,
}

/// 纹理描述信息
#[derive(Debug, Clone)]
pub struct TextureDesc {
    /// 宽度（像素）
    pub width: u32,
    /// 高度（像素）
    pub height: u32,
    /// 像素格式
    pub format: TextureFormat,
    /// 用途
    pub usage: TextureUsage,
    /// 调试名称
    pub name: Option<String>,
}

impl TextureDesc {
    /// 创建新的纹理描述
    pub fn new(width: u32, height: u32, format: TextureFormat, usage: TextureUsage) -> Self {
        Self {
            width,
            height,
            format,
            usage,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 创建渲染目标描述
    pub fn render_target(width: u32, height: u32, format: TextureFormat) -> Self {
        Self::new(width, height, format, TextureUsage::RenderTarget)
    }

    /// 创建深度缓冲描述
    pub fn depth_stencil(width: u32, height: u32) -> Self {
        Self::new(width, height, TextureFormat::Depth32Float, TextureUsage::DepthStencil)
    }
}

/// 按后端划分的原生资源
pub(crate) enum NativeResource {
    Software(SoftwareResource),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Resource),
}

impl NativeResource {
    /// 资源身份编号，用于日志和测试中的追踪
    pub(crate) fn id(&self) -> u64 {
        match self {
            NativeResource::Software(r) => r.id(),
            #[cfg(target_os = "windows")]
            NativeResource::Dx12(r) => r.id(),
        }
    }
}

/// 附着在纹理上的视图句柄
///
/// 记录句柄来自哪类堆，析构时按类型归还。
pub(crate) struct TextureView {
    pub(crate) descriptor_type: DescriptorType,
    pub(crate) handle: DescriptorHandle,
}

/// GPU 纹理
///
/// 设备子对象。析构路径：
/// - 视图句柄归还到所属描述符堆
/// - 原生资源进入延迟释放队列（后备缓冲区除外）
/// - 设备已断开时直接释放——销毁流程已保证 GPU 空闲
pub struct Texture {
    native: Option<NativeResource>,
    desc: TextureDesc,
    views: Vec<TextureView>,
    /// 交换链后备缓冲区标记：跳过延迟释放记账
    back_buffer: bool,
    link: DeviceLink,
}

impl Texture {
    pub(crate) fn new(
        native: NativeResource,
        desc: TextureDesc,
        views: Vec<TextureView>,
        back_buffer: bool,
        link: DeviceLink,
    ) -> Self {
        Self {
            native: Some(native),
            desc,
            views,
            back_buffer,
            link,
        }
    }

    /// 纹理描述
    pub fn desc(&self) -> &TextureDesc {
        &self.desc
    }

    /// 宽度
    pub fn width(&self) -> u32 {
        self.desc.width
    }

    /// 高度
    pub fn height(&self) -> u32 {
        self.desc.height
    }

    /// 是否为交换链后备缓冲区
    pub fn is_back_buffer(&self) -> bool {
        self.back_buffer
    }

    /// 指定类型的视图句柄
    pub fn view(&self, descriptor_type: DescriptorType) -> Option<&DescriptorHandle> {
        self.views
            .iter()
            .find(|v| v.descriptor_type == descriptor_type)
            .map(|v| &v.handle)
    }

    /// 渲染目标视图句柄
    pub fn rtv(&self) -> Option<&DescriptorHandle> {
        self.view(DescriptorType::RenderTargetView)
    }

    /// 深度模板视图句柄
    pub fn dsv(&self) -> Option<&DescriptorHandle> {
        self.view(DescriptorType::DepthStencilView)
    }

    /// 着色资源视图句柄
    pub fn srv(&self) -> Option<&DescriptorHandle> {
        self.view(DescriptorType::ShaderResourceView)
    }

    /// 原生资源编号（测试和日志用）
    pub fn resource_id(&self) -> Option<u64> {
        self.native.as_ref().map(|n| n.id())
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

impl Drop for Texture {
    fn drop(&mut self) {
        match self.link.device() {
            Some(device) => {
                for view in self.views.drain(..) {
                    device.free_view(view.descriptor_type, view.handle);
                }
                if let Some(native) = self.native.take() {
                    if self.back_buffer {
                        // 交换链拥有后备缓冲区的生命周期，直接释放
                        drop(native);
                    } else {
                        device.defer_release(native);
                    }
                }
            }
            None => {
                // 设备已断开：销毁流程已等待 GPU 空闲，直接释放是安全的
                self.views.clear();
                self.native = None;
            }
        }
    }
}

/// 根签名描述信息
///
/// 参数以 32 位 DWORD 计；D3D12 根签名上限为 64 个 DWORD。
#[derive(Debug, Clone)]
pub struct RootSignatureDesc {
    /// 根参数占用的 DWORD 数
    pub parameter_dwords: u32,
    /// 静态采样器数量
    pub static_samplers: u32,
    /// 调试名称
    pub name: Option<String>,
}

impl RootSignatureDesc {
    /// 创建新的根签名描述
    pub fn new(parameter_dwords: u32) -> Self {
        Self {
            parameter_dwords,
            static_samplers: 0,
            name: None,
        }
    }

    /// 设置调试名称
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// 设置静态采样器数量
    pub fn with_static_samplers(mut self, count: u32) -> Self {
        self.static_samplers = count;
        self
    }

    /// 校验描述是否满足后端约束
    ///
    /// 序列化前的本地校验；超出 64 DWORD 上限是可恢复错误。
    pub(crate) fn validate(&self) -> Result<()> {
        use crate::core::error::GraphicsError;
        if self.parameter_dwords > 64 {
            return Err(GraphicsError::RootSignature(format!(
                "root signature uses {} DWORDs, limit is 64",
                self.parameter_dwords
            ))
            .into());
        }
        Ok(())
    }
}

/// 按后端划分的原生根签名
pub(crate) enum NativeRootSignature {
    /// 软件后端只保留描述
    Software,
    #[cfg(target_os = "windows")]
    Dx12(Dx12RootSignature),
}

/// 根签名
///
/// 设备子对象；创建失败（序列化错误）是可恢复的，调用方可修改描述后重试。
pub struct RootSignature {
    #[cfg_attr(not(target_os = "windows"), allow(dead_code))]
    native: NativeRootSignature,
    desc: RootSignatureDesc,
    link: DeviceLink,
}

impl RootSignature {
    pub(crate) fn new(native: NativeRootSignature, desc: RootSignatureDesc, link: DeviceLink) -> Self {
        Self { native, desc, link }
    }

    /// 根签名描述
    pub fn desc(&self) -> &RootSignatureDesc {
        &self.desc
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_texture_desc_builders() {
        let desc = TextureDesc::render_target(1920, 1080, TextureFormat::Rgba8Unorm)
            .with_name("scene color");
        assert_eq!(desc.usage, TextureUsage::RenderTarget);
        assert_eq!(desc.name, Some("scene color".to_string()));

        let desc = TextureDesc::depth_stencil(1920, 1080);
        assert!(desc.format.is_depth());
        assert_eq!(desc.usage, TextureUsage::DepthStencil);
    }

    #[test]
    fn test_root_signature_desc_validation() {
        assert!(RootSignatureDesc::new(16).validate().is_ok());
        assert!(RootSignatureDesc::new(64).validate().is_ok());
        assert!(RootSignatureDesc::new(65).validate().is_err());
    }
}
