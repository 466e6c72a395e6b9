//! 设备子对象生命周期管理
//!
//! 所有由 `Device` 创建的对象（Fence、纹理、命令上下文、根签名、描述符堆、
//! 交换链）都持有一个指向设备的非拥有反向引用 `DeviceLink`。
//! 设备维护一个存活子对象注册表，在销毁流程中统一断开所有反向引用，
//! 保证子对象在设备销毁后访问设备只会得到 `None`，而不是悬垂指针。
//!
//! # 设计原则
//!
//! - **非拥有**：子对象不会延长设备的生命周期（`Weak` 引用）
//! - **幂等注销**：子对象析构时如果已被设备断开，注销是安全的空操作
//! - **统一断开**：设备销毁前对注册表做一次断开扫描，之后才释放原生设备

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use tracing::debug;

use super::device::DeviceShared;

/// 子对象标识
///
/// 由注册表分配的单调递增编号，在设备生命周期内唯一。
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChildId(u64);

impl ChildId {
    /// 获取内部编号
    pub fn value(&self) -> u64 {
        self.0
    }
}

/// 注册表中的子对象槽位
///
/// 连接标志由子对象和注册表共享：设备销毁扫描清除标志后，
/// 子对象的任何设备访问都会退化为安全的空操作。
pub(crate) struct ChildSlot {
    /// 是否仍与设备连接
    connected: AtomicBool,
    /// 调试名称，用于存活对象报告
    name: String,
}

impl ChildSlot {
    fn new(name: String) -> Self {
        Self {
            connected: AtomicBool::new(true),
            name,
        }
    }

    pub(crate) fn is_connected(&self) -> bool {
        self.connected.load(Ordering::Acquire)
    }

    fn disconnect(&self) {
        self.connected.store(false, Ordering::Release);
    }
}

/// 存活子对象注册表
///
/// 设备持有，记录所有仍然存活的子对象。
pub(crate) struct ChildRegistry {
    next_id: u64,
    children: HashMap<u64, Arc<ChildSlot>>,
}

impl ChildRegistry {
    pub(crate) fn new() -> Self {
        Self {
            next_id: 1,
            children: HashMap::new(),
        }
    }

    /// 注册一个子对象，返回其标识和共享槽位
    pub(crate) fn register(&mut self, name: String) -> (ChildId, Arc<ChildSlot>) {
        let id = ChildId(self.next_id);
        self.next_id += 1;

        let slot = Arc::new(ChildSlot::new(name));
        self.children.insert(id.value(), Arc::clone(&slot));
        (id, slot)
    }

    /// 注销一个子对象
    ///
    /// 设备销毁扫描之后子对象可能已不在表中，此时为空操作。
    pub(crate) fn unregister(&mut self, id: ChildId) {
        self.children.remove(&id.value());
    }

    /// 断开所有子对象并清空注册表
    ///
    /// 返回断开的子对象名称列表，供销毁时的存活对象报告使用。
    pub(crate) fn disconnect_all(&mut self) -> Vec<String> {
        let mut names = Vec::with_capacity(self.children.len());
        for slot in self.children.values() {
            slot.disconnect();
            names.push(slot.name.clone());
        }
        self.children.clear();
        names
    }

    /// 存活子对象数量
    pub(crate) fn len(&self) -> usize {
        self.children.len()
    }
}

/// 设备反向引用
///
/// 子对象通过它访问所属设备。`Weak` 保证子对象不会阻止设备释放；
/// 连接标志保证设备销毁扫描之后 `device()` 一律返回 `None`。
pub struct DeviceLink {
    shared: Weak<DeviceShared>,
    slot: Arc<ChildSlot>,
    id: ChildId,
}

impl DeviceLink {
    pub(crate) fn new(shared: Weak<DeviceShared>, id: ChildId, slot: Arc<ChildSlot>) -> Self {
        Self { shared, slot, id }
    }

    /// 获取所属设备
    ///
    /// 设备已进入销毁流程（连接标志被清除）或已释放时返回 `None`。
    pub(crate) fn device(&self) -> Option<Arc<DeviceShared>> {
        if !self.slot.is_connected() {
            return None;
        }
        self.shared.upgrade()
    }

    /// 是否仍与设备连接
    pub fn is_connected(&self) -> bool {
        self.slot.is_connected() && self.shared.strong_count() > 0
    }

    /// 子对象标识
    pub fn id(&self) -> ChildId {
        self.id
    }
}

impl Drop for DeviceLink {
    fn drop(&mut self) {
        // 幂等注销：设备销毁扫描已清除连接标志时跳过
        if self.slot.connected.swap(false, Ordering::AcqRel) {
            if let Some(shared) = self.shared.upgrade() {
                shared.unregister_child(self.id);
                debug!(target: "kestrel::engine", id = self.id.value(), "Device child unregistered");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_registry_register_unregister() {
        let mut registry = ChildRegistry::new();
        let (id1, slot1) = registry.register("fence".to_string());
        let (id2, _slot2) = registry.register("texture".to_string());
        assert_ne!(id1, id2);
        assert_eq!(registry.len(), 2);
        assert!(slot1.is_connected());

        registry.unregister(id1);
        assert_eq!(registry.len(), 1);

        // 重复注销是空操作
        registry.unregister(id1);
        assert_eq!(registry.len(), 1);
    }

    #[test]
    fn test_disconnect_all() {
        let mut registry = ChildRegistry::new();
        let (_, slot1) = registry.register("fence".to_string());
        let (_, slot2) = registry.register("texture".to_string());

        let mut names = registry.disconnect_all();
        names.sort();
        assert_eq!(names, vec!["fence".to_string(), "texture".to_string()]);
        assert_eq!(registry.len(), 0);
        assert!(!slot1.is_connected());
        assert!(!slot2.is_connected());
    }
}
