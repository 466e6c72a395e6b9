//! 命令队列与命令上下文
//!
//! `CommandContext` 封装一对命令分配器 + 命令列表，按队列类型绑定；
//! `CommandQueue` 封装原生队列，提交后用下一个 Fence 值发出信号，
//! 该值代表"截至本次提交的全部工作"。
//!
//! # 分配器复用约定
//!
//! 命令分配器只有在其上一次提交对应的 Fence 值完成后才能重置，
//! 违反会破坏在途的 GPU 工作。`reset` 显式检查这一条件并拒绝违规调用。

use tracing::debug;

use crate::core::error::{GraphicsError, Result};

use super::descriptor::DescriptorHandle;
use super::device_child::DeviceLink;
use super::fence::{Fence, NativeFence};
use super::software::{SoftwareContext, SoftwareQueue};

#[cfg(target_os = "windows")]
use super::dx12::{Dx12Context, Dx12Queue};

/// 命令队列类型
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum QueueKind {
    /// 直接队列：图形和计算命令
    Direct,
    /// 计算专用队列
    Compute,
    /// 复制专用队列
    Copy,
}

impl QueueKind {
    /// 队列类型名称
    pub fn name(&self) -> &'static str {
        match self {
            QueueKind::Direct => "Direct",
            QueueKind::Compute => "Compute",
            QueueKind::Copy => "Copy",
        }
    }
}

/// 命令上下文状态
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    /// 正在记录
    Recording,
    /// 已关闭，等待提交或重置
    Closed,
}

/// 按后端划分的原生命令队列
pub(crate) enum NativeQueue {
    Software(SoftwareQueue),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Queue),
}

impl NativeQueue {
    /// 提交后在队列上对 Fence 发出信号
    fn signal(&self, fence: &NativeFence, value: u64) {
        match (self, fence) {
            (NativeQueue::Software(q), NativeFence::Software(f)) => q.signal(f, value),
            #[cfg(target_os = "windows")]
            (NativeQueue::Dx12(q), NativeFence::Dx12(f)) => q.signal(f, value),
            #[cfg(target_os = "windows")]
            _ => unreachable!("queue and fence belong to different backends"),
        }
    }
}

/// 按后端划分的原生命令记录
pub(crate) enum NativeContext {
    Software(SoftwareContext),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Context),
}

/// 命令队列
///
/// 设备子对象；持有自己的 Fence，提交顺序即执行顺序。
pub struct CommandQueue {
    kind: QueueKind,
    native: NativeQueue,
    fence: Fence,
    link: DeviceLink,
}

impl CommandQueue {
    pub(crate) fn new(kind: QueueKind, native: NativeQueue, fence: Fence, link: DeviceLink) -> Self {
        Self {
            kind,
            native,
            fence,
            link,
        }
    }

    /// 队列类型
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// 队列的同步 Fence
    pub fn fence(&self) -> &Fence {
        &self.fence
    }

    /// 提交一个命令上下文并发出 Fence 信号
    ///
    /// 返回与本次提交关联的 Fence 值。上下文随之关闭，
    /// 在该值完成前不可重置。
    pub fn execute(&self, context: &mut CommandContext) -> Result<u64> {
        if context.state == ContextState::Closed {
            return Err(GraphicsError::CommandExecution(
                "command context already closed; reset before re-submitting".to_string(),
            )
            .into());
        }

        context.close();

        match &context.native {
            NativeContext::Software(ctx) => {
                if let NativeQueue::Software(queue) = &self.native {
                    queue.execute(ctx.command_count());
                }
            }
            #[cfg(target_os = "windows")]
            NativeContext::Dx12(ctx) => {
                if let NativeQueue::Dx12(queue) = &self.native {
                    queue.execute(ctx);
                }
            }
        }

        let value = self.fence.advance();
        self.native.signal(self.fence.native(), value);
        context.last_submitted = value;

        debug!(
            target: "kestrel::engine",
            queue = self.kind.name(),
            fence_value = value,
            "Command context submitted"
        );
        Ok(value)
    }

    /// 在没有待提交工作的情况下推进并发出一次 Fence 信号
    ///
    /// 用于帧收尾：返回发出的 Fence 值。
    pub fn signal(&self) -> u64 {
        let value = self.fence.advance();
        self.native.signal(self.fence.native(), value);
        value
    }

    /// 阻塞等待队列上所有已提交的工作完成
    ///
    /// 返回 `false` 表示等待超时（已记录警告）。
    pub fn flush(&self) -> bool {
        let value = self.signal();
        self.fence.wait(value)
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    #[cfg(target_os = "windows")]
    pub(crate) fn native_queue(&self) -> &NativeQueue {
        &self.native
    }
}

/// 命令上下文
///
/// 一对命令分配器 + 命令列表，创建后处于记录状态。
pub struct CommandContext {
    kind: QueueKind,
    state: ContextState,
    native: NativeContext,
    /// 上一次提交关联的 Fence 值（0 表示尚未提交过）
    last_submitted: u64,
    link: DeviceLink,
}

impl CommandContext {
    pub(crate) fn new(kind: QueueKind, native: NativeContext, link: DeviceLink) -> Self {
        Self {
            kind,
            state: ContextState::Recording,
            native,
            last_submitted: 0,
            link,
        }
    }

    /// 绑定的队列类型
    pub fn kind(&self) -> QueueKind {
        self.kind
    }

    /// 当前状态
    pub fn state(&self) -> ContextState {
        self.state
    }

    /// 上一次提交关联的 Fence 值
    pub fn last_submitted(&self) -> u64 {
        self.last_submitted
    }

    /// 记录一次渲染目标清除
    pub fn clear_render_target(&mut self, rtv: &DescriptorHandle) -> Result<()> {
        self.ensure_recording()?;
        match &mut self.native {
            NativeContext::Software(ctx) => {
                ctx.record(format!("clear_rtv index={}", rtv.index));
            }
            #[cfg(target_os = "windows")]
            NativeContext::Dx12(ctx) => {
                ctx.clear_render_target(rtv);
            }
        }
        Ok(())
    }

    /// 记录一个调试标记
    pub fn insert_marker(&mut self, name: &str) -> Result<()> {
        self.ensure_recording()?;
        match &mut self.native {
            NativeContext::Software(ctx) => {
                ctx.record(format!("marker {}", name));
            }
            #[cfg(target_os = "windows")]
            NativeContext::Dx12(_) => {}
        }
        Ok(())
    }

    /// 重置上下文以便重新记录
    ///
    /// 只有在 `queue` 的 Fence 完成了上一次提交对应的值之后才允许，
    /// 否则返回错误——过早重置会破坏在途的 GPU 工作。
    pub fn reset(&mut self, queue: &CommandQueue) -> Result<()> {
        if self.last_submitted != 0 && !queue.fence().is_completed(self.last_submitted) {
            return Err(GraphicsError::CommandExecution(format!(
                "command allocator still in flight (fence value {} not completed, completed {})",
                self.last_submitted,
                queue.fence().completed_value()
            ))
            .into());
        }

        match &mut self.native {
            NativeContext::Software(ctx) => ctx.reset(),
            #[cfg(target_os = "windows")]
            NativeContext::Dx12(ctx) => ctx.reset(),
        }
        self.state = ContextState::Recording;
        Ok(())
    }

    fn close(&mut self) {
        if self.state == ContextState::Recording {
            match &mut self.native {
                NativeContext::Software(_) => {}
                #[cfg(target_os = "windows")]
                NativeContext::Dx12(ctx) => ctx.close(),
            }
            self.state = ContextState::Closed;
        }
    }

    fn ensure_recording(&self) -> Result<()> {
        if self.state != ContextState::Recording {
            return Err(GraphicsError::CommandExecution(
                "command context is closed; reset before recording".to_string(),
            )
            .into());
        }
        Ok(())
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
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
    fn test_context_starts_recording() {
        let device = test_device();
        let ctx = device.create_command_context(QueueKind::Direct).unwrap();
        assert_eq!(ctx.state(), ContextState::Recording);
        assert_eq!(ctx.last_submitted(), 0);
    }

    #[test]
    fn test_execute_signals_fence() {
        let device = test_device();
        let mut ctx = device.create_command_context(QueueKind::Direct).unwrap();
        ctx.insert_marker("frame 0").unwrap();

        let queue = device.graphics_queue();
        let value = queue.execute(&mut ctx).unwrap();
        assert!(queue.fence().is_completed(value));
        assert_eq!(ctx.state(), ContextState::Closed);
        assert_eq!(ctx.last_submitted(), value);
    }

    #[test]
    fn test_double_submit_rejected() {
        let device = test_device();
        let mut ctx = device.create_command_context(QueueKind::Direct).unwrap();

        let queue = device.graphics_queue();
        queue.execute(&mut ctx).unwrap();
        assert!(queue.execute(&mut ctx).is_err());
    }

    #[test]
    fn test_reset_after_completion() {
        let device = test_device();
        let mut ctx = device.create_command_context(QueueKind::Direct).unwrap();

        let queue = device.graphics_queue();
        queue.execute(&mut ctx).unwrap();

        // 软件后端提交即完成，重置立即被允许
        ctx.reset(queue).unwrap();
        assert_eq!(ctx.state(), ContextState::Recording);
        ctx.insert_marker("frame 1").unwrap();
    }

    #[test]
    fn test_recording_rejected_when_closed() {
        let device = test_device();
        let mut ctx = device.create_command_context(QueueKind::Direct).unwrap();

        device.graphics_queue().execute(&mut ctx).unwrap();
        assert!(ctx.insert_marker("late").is_err());
    }

    #[test]
    fn test_flush_waits_everything() {
        let device = test_device();
        let queue = device.graphics_queue();
        let v1 = queue.signal();
        let v2 = queue.signal();
        assert!(v2 > v1);
        assert!(queue.flush());
    }
}
