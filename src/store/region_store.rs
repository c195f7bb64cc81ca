//! 题目区域存储 - 共享数据层
//!
//! ## 职责
//!
//! - 持有所有 `RegionGroup`（唯一所有者）
//! - 提供创建 / 追加 / 按关联 ID 查找 / 按页和状态批量删除
//! - 每次变更后通知订阅者
//!
//! 不认识扫描流程，也不认识批处理队列。两个控制器都只通过这里读取和追加数据。

use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tracing::{debug, warn};

use crate::models::{Fragment, GroupId, GroupKind, GroupStatus, NewGroup, Region, RegionGroup};

/// 存储变更事件
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreEvent {
    GroupCreated { id: GroupId },
    RegionAppended { id: GroupId },
    GroupsRemoved { ids: Vec<GroupId> },
    StatusChanged {
        id: GroupId,
        from: GroupStatus,
        to: GroupStatus,
    },
}

/// 订阅句柄，用于取消订阅
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SubscriptionId(u64);

type Observer = Arc<dyn Fn(&StoreEvent) + Send + Sync>;

#[derive(Default)]
struct StoreInner {
    groups: Vec<RegionGroup>,
    active: Option<GroupId>,
    next_group_id: u64,
    observers: Vec<(SubscriptionId, Observer)>,
    next_subscription_id: u64,
}

impl StoreInner {
    fn allocate_id(&mut self) -> GroupId {
        self.next_group_id += 1;
        GroupId(self.next_group_id)
    }

    fn find_mut(&mut self, id: GroupId) -> Option<&mut RegionGroup> {
        self.groups.iter_mut().find(|g| g.id == id)
    }

    /// 重新计算显示名称（按顺序从 1 开始）
    fn relabel(&mut self) {
        for (index, group) in self.groups.iter_mut().enumerate() {
            group.label = format!("第{}题", index + 1);
        }
    }

    fn insert(&mut self, new_group: NewGroup, regions: Vec<Region>) -> GroupId {
        let id = self.allocate_id();
        self.groups.push(RegionGroup {
            id,
            label: String::new(),
            regions,
            tags: new_group.tags,
            status: new_group.status.unwrap_or(GroupStatus::Draft),
            correlation_id: new_group.correlation_id,
            kind: new_group.kind,
        });
        self.active = Some(id);
        self.relabel();
        id
    }
}

/// 题目区域存储
///
/// 显式创建后注入到各个控制器；克隆得到的是同一份数据的句柄。
#[derive(Clone, Default)]
pub struct RegionStore {
    inner: Arc<Mutex<StoreInner>>,
}

impl RegionStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, StoreInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// 在锁外依次通知所有订阅者
    fn notify(&self, events: Vec<StoreEvent>) {
        if events.is_empty() {
            return;
        }
        let observers: Vec<Observer> = self
            .lock()
            .observers
            .iter()
            .map(|(_, observer)| Arc::clone(observer))
            .collect();
        for event in &events {
            for observer in &observers {
                observer(event);
            }
        }
    }

    // ========== 订阅 ==========

    /// 订阅所有变更
    pub fn subscribe<F>(&self, observer: F) -> SubscriptionId
    where
        F: Fn(&StoreEvent) + Send + Sync + 'static,
    {
        let mut inner = self.lock();
        inner.next_subscription_id += 1;
        let id = SubscriptionId(inner.next_subscription_id);
        inner.observers.push((id, Arc::new(observer)));
        id
    }

    pub fn unsubscribe(&self, id: SubscriptionId) {
        self.lock().observers.retain(|(sub, _)| *sub != id);
    }

    // ========== 写操作 ==========

    /// 创建题目组，新组成为当前活动组
    pub fn create_group(&self, new_group: NewGroup) -> GroupId {
        let id = self.lock().insert(new_group, Vec::new());
        debug!("创建题目组 {}", id);
        self.notify(vec![StoreEvent::GroupCreated { id }]);
        id
    }

    /// 追加区域
    ///
    /// `target` 为空时追加到当前活动组；目标不存在时什么也不做，返回 `false`。
    pub fn append_region(&self, target: Option<GroupId>, region: Region) -> bool {
        let appended = {
            let mut inner = self.lock();
            let Some(id) = target.or(inner.active) else {
                return false;
            };
            match inner.find_mut(id) {
                Some(group) => {
                    group.regions.push(region);
                    Some(id)
                }
                None => None,
            }
        };
        match appended {
            Some(id) => {
                self.notify(vec![StoreEvent::RegionAppended { id }]);
                true
            }
            None => false,
        }
    }

    /// 写入一个片段，按关联 ID 决定合并还是新建
    ///
    /// 只有至少一方是 `Partial` 时才合并到已有组；两个 `Whole` 片段即使关联 ID
    /// 相同也会各自成组。已经 ready / sent 的组不再接收新区域。
    pub fn upsert_fragment(
        &self,
        fragment: Fragment,
        status: GroupStatus,
        tags: &BTreeSet<String>,
    ) -> GroupId {
        let (id, event) = {
            let mut inner = self.lock();
            let merge_target = fragment.correlation_id.as_deref().and_then(|cid| {
                inner
                    .groups
                    .iter()
                    .rev()
                    .find(|g| g.correlation_id.as_deref() == Some(cid))
                    .filter(|g| g.status < GroupStatus::Ready)
                    .filter(|g| g.kind == GroupKind::Partial || fragment.kind == GroupKind::Partial)
                    .map(|g| g.id)
            });

            match merge_target.and_then(|id| inner.find_mut(id)) {
                Some(group) => {
                    group.regions.push(fragment.region);
                    group.tags.extend(tags.iter().cloned());
                    group.advance_status(status);
                    (group.id, StoreEvent::RegionAppended { id: group.id })
                }
                None => {
                    let new_group = NewGroup {
                        tags: tags.clone(),
                        kind: fragment.kind,
                        status: Some(status),
                        correlation_id: fragment.correlation_id,
                    };
                    let id = inner.insert(new_group, vec![fragment.region]);
                    (id, StoreEvent::GroupCreated { id })
                }
            }
        };
        self.notify(vec![event]);
        id
    }

    /// 删除某一页上指定状态的所有组（用于丢弃被替换的草稿）
    ///
    /// 返回删除数量；重复调用是空操作。
    pub fn remove_by_page_and_status(&self, page: u32, status: GroupStatus) -> usize {
        let removed = {
            let mut inner = self.lock();
            let removed: Vec<GroupId> = inner
                .groups
                .iter()
                .filter(|g| g.page() == Some(page) && g.status == status)
                .map(|g| g.id)
                .collect();
            if !removed.is_empty() {
                inner.groups.retain(|g| !removed.contains(&g.id));
                if inner.active.is_some_and(|id| removed.contains(&id)) {
                    inner.active = None;
                }
                inner.relabel();
            }
            removed
        };
        let count = removed.len();
        if count > 0 {
            debug!("第 {} 页删除 {} 个 {} 组", page, count, status);
            self.notify(vec![StoreEvent::GroupsRemoved { ids: removed }]);
        }
        count
    }

    /// 删除单个组（用户操作）
    pub fn remove_group(&self, id: GroupId) -> bool {
        let removed = {
            let mut inner = self.lock();
            let before = inner.groups.len();
            inner.groups.retain(|g| g.id != id);
            let removed = inner.groups.len() != before;
            if removed {
                if inner.active == Some(id) {
                    inner.active = None;
                }
                inner.relabel();
            }
            removed
        };
        if removed {
            self.notify(vec![StoreEvent::GroupsRemoved { ids: vec![id] }]);
        }
        removed
    }

    /// 设置状态，只允许向前推进
    ///
    /// 组不存在或请求回退时返回 `false`。
    pub fn set_status(&self, id: GroupId, status: GroupStatus) -> bool {
        let change = {
            let mut inner = self.lock();
            let Some(group) = inner.find_mut(id) else {
                return false;
            };
            let from = group.status;
            if !group.advance_status(status) {
                warn!("拒绝将 {} 的状态从 {} 回退到 {}", id, from, status);
                return false;
            }
            (from != status).then_some(StoreEvent::StatusChanged {
                id,
                from,
                to: status,
            })
        };
        if let Some(event) = change {
            self.notify(vec![event]);
        }
        true
    }

    pub fn set_active(&self, id: GroupId) -> bool {
        let mut inner = self.lock();
        if inner.groups.iter().any(|g| g.id == id) {
            inner.active = Some(id);
            true
        } else {
            false
        }
    }

    // ========== 读操作 ==========

    pub fn active(&self) -> Option<GroupId> {
        self.lock().active
    }

    pub fn get(&self, id: GroupId) -> Option<RegionGroup> {
        self.lock().groups.iter().find(|g| g.id == id).cloned()
    }

    /// 按关联 ID 查找（最新的一个）
    pub fn find_by_correlation(&self, correlation_id: &str) -> Option<RegionGroup> {
        self.lock()
            .groups
            .iter()
            .rev()
            .find(|g| g.correlation_id.as_deref() == Some(correlation_id))
            .cloned()
    }

    /// 所有组的快照（按顺序）
    pub fn groups(&self) -> Vec<RegionGroup> {
        self.lock().groups.clone()
    }

    pub fn groups_on_page(&self, page: u32) -> Vec<RegionGroup> {
        self.lock()
            .groups
            .iter()
            .filter(|g| g.page() == Some(page))
            .cloned()
            .collect()
    }

    pub fn len(&self) -> usize {
        self.lock().groups.len()
    }

    pub fn is_empty(&self) -> bool {
        self.lock().groups.is_empty()
    }
}
