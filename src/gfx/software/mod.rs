//! 软件模拟后端
//!
//! 提供一个跨平台的进程内后端实现，完整模拟 DirectX 12 风格的
//! 设备/队列/Fence 协议：队列在"提交"时立即完成工作并推进 Fence，
//! 相当于一块零延迟的 GPU。用于无头运行、非 Windows 平台和测试。
//!
//! # 模拟语义
//!
//! - **Fence**：互斥锁保护的单调计数器 + 条件变量，支持有界阻塞等待
//! - **队列**：提交即完成，`signal` 直接推进对应 Fence 的完成值
//! - **资源/堆**：只分配编号和合成地址，不占用真实显存

use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

/// 软件设备
///
/// 负责派发资源编号和描述符堆的合成基址。
pub(crate) struct SoftwareDevice {
    /// 下一个资源编号
    next_resource_id: AtomicU64,
    /// 下一个描述符堆基址（合成地址空间）
    next_heap_base: AtomicUsize,
}

/// 软件后端的统一描述符步长
pub(crate) const DESCRIPTOR_INCREMENT_SIZE: u32 = 32;

impl SoftwareDevice {
    pub(crate) fn new() -> Self {
        Self {
            next_resource_id: AtomicU64::new(1),
            next_heap_base: AtomicUsize::new(0x0010_0000),
        }
    }

    /// 创建一个模拟 GPU 资源
    pub(crate) fn create_resource(&self) -> SoftwareResource {
        SoftwareResource {
            id: self.next_resource_id.fetch_add(1, Ordering::Relaxed),
        }
    }

    /// 为描述符堆划出一段合成地址空间，返回 CPU 基址
    ///
    /// 不同堆的地址区间互不重叠，便于在测试中核对句柄计算。
    pub(crate) fn allocate_heap_base(&self, capacity: u32) -> usize {
        let span = (capacity * DESCRIPTOR_INCREMENT_SIZE) as usize;
        self.next_heap_base.fetch_add(span, Ordering::Relaxed)
    }
}

/// 软件 Fence
///
/// 互斥锁保护的完成值加条件变量，`signal` 只会向前推进计数器。
pub(crate) struct SoftwareFence {
    completed: Mutex<u64>,
    cond: Condvar,
}

impl SoftwareFence {
    pub(crate) fn new(initial: u64) -> Self {
        Self {
            completed: Mutex::new(initial),
            cond: Condvar::new(),
        }
    }

    /// 读取已完成的 Fence 值
    pub(crate) fn completed_value(&self) -> u64 {
        *self.completed.lock().unwrap()
    }

    /// 将完成值推进到 `value`
    ///
    /// 完成值单调不减：小于当前值的信号被忽略。
    pub(crate) fn signal(&self, value: u64) {
        let mut completed = self.completed.lock().unwrap();
        if value > *completed {
            *completed = value;
            self.cond.notify_all();
        }
    }

    /// 阻塞等待完成值到达 `value`，最多等待 `timeout`
    ///
    /// 到达返回 `true`，超时返回 `false`。
    pub(crate) fn wait(&self, value: u64, timeout: Duration) -> bool {
        let deadline = Instant::now() + timeout;
        let mut completed = self.completed.lock().unwrap();
        while *completed < value {
            let now = Instant::now();
            if now >= deadline {
                return false;
            }
            let (guard, result) = self
                .cond
                .wait_timeout(completed, deadline - now)
                .unwrap();
            completed = guard;
            if result.timed_out() && *completed < value {
                return false;
            }
        }
        true
    }
}

/// 软件命令队列
///
/// 提交即完成：`signal` 直接推进 Fence 的完成值，
/// 模拟 GPU 已经执行完"本次提交之前的全部工作"。
pub(crate) struct SoftwareQueue;

impl SoftwareQueue {
    pub(crate) fn new() -> Self {
        Self
    }

    /// 执行一段已关闭的命令记录
    ///
    /// 软件后端没有真实 GPU，记录的命令数只用于统计。
    pub(crate) fn execute(&self, _command_count: usize) {}

    /// GPU 侧信号：把 Fence 推进到 `value`
    pub(crate) fn signal(&self, fence: &SoftwareFence, value: u64) {
        fence.signal(value);
    }
}

/// 软件 GPU 资源
///
/// 只携带编号，用于在释放路径上追踪身份。
#[derive(Debug)]
pub(crate) struct SoftwareResource {
    id: u64,
}

impl SoftwareResource {
    pub(crate) fn id(&self) -> u64 {
        self.id
    }
}

/// 软件命令记录
///
/// 以字符串标记的形式记录命令，重置时清空。
pub(crate) struct SoftwareContext {
    commands: Vec<String>,
}

impl SoftwareContext {
    pub(crate) fn new() -> Self {
        Self {
            commands: Vec::new(),
        }
    }

    pub(crate) fn record(&mut self, command: String) {
        self.commands.push(command);
    }

    pub(crate) fn command_count(&self) -> usize {
        self.commands.len()
    }

    pub(crate) fn reset(&mut self) {
        self.commands.clear();
    }
}

/// 软件交换链
///
/// 只维护后备缓冲区数量和当前索引。
pub(crate) struct SoftwareSwapChain {
    buffer_count: usize,
    current: usize,
}

impl SoftwareSwapChain {
    pub(crate) fn new(buffer_count: usize) -> Self {
        Self {
            buffer_count,
            current: 0,
        }
    }

    /// 呈现并切换到下一个后备缓冲区
    pub(crate) fn present(&mut self) -> usize {
        self.current = (self.current + 1) % self.buffer_count;
        self.current
    }

    pub(crate) fn current_index(&self) -> usize {
        self.current
    }

    /// 调整尺寸后索引回到 0（与 DXGI 重建缓冲区后的行为一致）
    pub(crate) fn resize(&mut self) {
        self.current = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;
    use std::thread;

    #[test]
    fn test_fence_signal_monotonic() {
        let fence = SoftwareFence::new(0);
        fence.signal(5);
        assert_eq!(fence.completed_value(), 5);

        // 倒退的信号被忽略
        fence.signal(3);
        assert_eq!(fence.completed_value(), 5);
    }

    #[test]
    fn test_fence_wait_timeout() {
        let fence = SoftwareFence::new(0);
        assert!(!fence.wait(1, Duration::from_millis(20)));

        fence.signal(1);
        assert!(fence.wait(1, Duration::from_millis(20)));
    }

    #[test]
    fn test_fence_cross_thread_wait() {
        let fence = Arc::new(SoftwareFence::new(0));
        let signaler = Arc::clone(&fence);

        let handle = thread::spawn(move || {
            thread::sleep(Duration::from_millis(10));
            signaler.signal(7);
        });

        assert!(fence.wait(7, Duration::from_secs(5)));
        handle.join().unwrap();
    }

    #[test]
    fn test_heap_bases_do_not_overlap() {
        let device = SoftwareDevice::new();
        let a = device.allocate_heap_base(16);
        let b = device.allocate_heap_base(16);
        assert!(b >= a + (16 * DESCRIPTOR_INCREMENT_SIZE) as usize);
    }

    #[test]
    fn test_swapchain_cycling() {
        let mut chain = SoftwareSwapChain::new(3);
        assert_eq!(chain.current_index(), 0);
        assert_eq!(chain.present(), 1);
        assert_eq!(chain.present(), 2);
        assert_eq!(chain.present(), 0);

        chain.resize();
        assert_eq!(chain.current_index(), 0);
    }
}
