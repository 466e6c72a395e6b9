//! GPU/CPU 同步 Fence
//!
//! Fence 是一个单调递增的 u64 计数器：GPU 队列在工作完成时推进它，
//! CPU 轮询或阻塞等待它。等待统一采用有界超时策略（默认 5000 毫秒），
//! 超时记录警告后继续执行，避免设备丢失时永久死锁。
//!
//! # 并发约定
//!
//! 同一个 Fence 同一时刻只应有一个线程在等待（一个通知句柄）；
//! 不同的 Fence 实例可以在不同线程上并发等待。

use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use tracing::warn;

use super::device_child::DeviceLink;
use super::software::SoftwareFence;

#[cfg(target_os = "windows")]
use super::dx12::Dx12Fence;

/// Fence 等待的默认超时
pub const DEFAULT_WAIT_TIMEOUT: Duration = Duration::from_millis(5000);

/// 按后端划分的原生 Fence
pub(crate) enum NativeFence {
    Software(SoftwareFence),
    #[cfg(target_os = "windows")]
    Dx12(Dx12Fence),
}

impl NativeFence {
    pub(crate) fn completed_value(&self) -> u64 {
        match self {
            NativeFence::Software(f) => f.completed_value(),
            #[cfg(target_os = "windows")]
            NativeFence::Dx12(f) => f.completed_value(),
        }
    }

    pub(crate) fn signal(&self, value: u64) {
        match self {
            NativeFence::Software(f) => f.signal(value),
            #[cfg(target_os = "windows")]
            NativeFence::Dx12(f) => f.signal(value),
        }
    }

    pub(crate) fn wait(&self, value: u64, timeout: Duration) -> bool {
        match self {
            NativeFence::Software(f) => f.wait(value, timeout),
            #[cfg(target_os = "windows")]
            NativeFence::Dx12(f) => f.wait(value, timeout),
        }
    }
}

/// GPU/CPU 同步 Fence
///
/// 设备子对象；`next_value` 是下一次信号要使用的值，
/// `completed_value` 从后端读取且单调不减。
pub struct Fence {
    native: NativeFence,
    link: DeviceLink,
    /// 下一次信号使用的值
    next_value: AtomicU64,
    /// 调试名称
    name: String,
}

impl Fence {
    pub(crate) fn new(native: NativeFence, link: DeviceLink, initial: u64, name: String) -> Self {
        Self {
            native,
            link,
            next_value: AtomicU64::new(initial + 1),
            name,
        }
    }

    /// 读取已完成的 Fence 值
    pub fn completed_value(&self) -> u64 {
        self.native.completed_value()
    }

    /// 非阻塞轮询：`value` 对应的工作是否已完成
    pub fn is_completed(&self, value: u64) -> bool {
        self.completed_value() >= value
    }

    /// CPU 侧信号：把完成值推进到 `value`
    ///
    /// 用于在没有 GPU 工作的情况下收尾一帧。完成值单调不减：
    /// 倒退的信号在包装层统一拦截，不下发到后端
    /// （D3D12 的 `ID3D12Fence::Signal` 会把计数器直接设置为给定值）。
    pub fn signal(&self, value: u64) {
        if value <= self.completed_value() {
            return;
        }
        self.native.signal(value);
        // 保持 next_value 始终领先于已用过的值
        self.next_value.fetch_max(value + 1, Ordering::AcqRel);
    }

    /// 阻塞等待 `value` 完成，使用默认超时
    ///
    /// 超时记录警告并返回 `false`，调用方照常继续（可能是驱动挂起，
    /// 不作为崩溃条件处理）。
    pub fn wait(&self, value: u64) -> bool {
        self.wait_timeout(value, DEFAULT_WAIT_TIMEOUT)
    }

    /// 阻塞等待 `value` 完成，自定义超时
    pub fn wait_timeout(&self, value: u64, timeout: Duration) -> bool {
        if self.is_completed(value) {
            return true;
        }

        let reached = self.native.wait(value, timeout);
        if !reached {
            warn!(
                target: "kestrel::engine",
                fence = %self.name,
                value,
                completed = self.completed_value(),
                timeout_ms = timeout.as_millis() as u64,
                "Fence wait timed out; continuing"
            );
        }
        reached
    }

    /// 查看下一次信号将使用的值
    pub fn next_value(&self) -> u64 {
        self.next_value.load(Ordering::Acquire)
    }

    /// 取出下一个信号值并推进计数器
    ///
    /// 由命令队列在提交时调用，返回值与"截至本次提交的全部工作"关联。
    pub(crate) fn advance(&self) -> u64 {
        self.next_value.fetch_add(1, Ordering::AcqRel)
    }

    /// 调试名称
    pub fn name(&self) -> &str {
        &self.name
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.link.is_connected()
    }

    pub(crate) fn native(&self) -> &NativeFence {
        &self.native
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
    fn test_completed_value_never_skips_backward() {
        let device = test_device();
        let fence = device.create_fence(0, "ordering").unwrap();

        let mut observed = vec![fence.completed_value()];
        for v in [1u64, 2, 3, 4] {
            fence.signal(v);
            observed.push(fence.completed_value());
        }

        // 观测序列只会是 {0, 1, ..., 4} 的非降子序列
        for pair in observed.windows(2) {
            assert!(pair[0] <= pair[1]);
        }
        assert_eq!(*observed.last().unwrap(), 4);
    }

    #[test]
    fn test_signal_is_monotonic() {
        let device = test_device();
        let fence = device.create_fence(0, "monotonic").unwrap();

        // 倒退和重复的信号在包装层被拦截，与后端行为无关
        fence.signal(10);
        fence.signal(3);
        assert_eq!(fence.completed_value(), 10);
        assert!(fence.is_completed(3));

        fence.signal(10);
        assert_eq!(fence.completed_value(), 10);
        assert!(fence.next_value() > 10);
    }

    #[test]
    fn test_wait_returns_after_signal() {
        let device = test_device();
        let fence = device.create_fence(0, "wait").unwrap();

        fence.signal(1);
        assert!(fence.wait(1));
        assert!(fence.is_completed(1));
    }

    #[test]
    fn test_wait_timeout_logs_and_continues() {
        let device = test_device();
        let fence = device.create_fence(0, "timeout").unwrap();

        // 值 2 永远不会被信号，短超时后返回 false
        assert!(!fence.wait_timeout(2, Duration::from_millis(20)));
        assert!(!fence.is_completed(2));
    }

    #[test]
    fn test_initial_value_offsets_next() {
        let device = test_device();
        let fence = device.create_fence(41, "initial").unwrap();
        assert_eq!(fence.completed_value(), 41);
        assert_eq!(fence.next_value(), 42);
    }
}
