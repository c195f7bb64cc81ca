//! 二次提交 - 业务能力层
//!
//! 为题目组打开处理上下文，并最终通过 `ProcessingComplete` 报告该组有哪些补图位。

use std::sync::atomic::{AtomicU64, Ordering};

use anyhow::Result;
use async_trait::async_trait;
use tracing::debug;

use crate::events::{BatchEventPublisher, ContextId};
use crate::models::{RegionGroup, SlotId, TAG_SLOT_MODE};

/// 二次提交接口
#[async_trait]
pub trait GroupSubmitter: Send + Sync {
    /// 为题目组打开处理上下文
    async fn open_context(&self, group: &RegionGroup) -> Result<ContextId>;

    /// 执行二次提交；完成时发布 `ProcessingComplete`
    async fn submit(
        &self,
        context_id: ContextId,
        group: RegionGroup,
        events: BatchEventPublisher,
    ) -> Result<()>;
}

/// 本地二次提交
///
/// slot-mode 的题目每个区域对应一个补图位，其他题目没有补图位。
#[derive(Debug, Default)]
pub struct LocalSubmitter {
    next_context: AtomicU64,
}

impl LocalSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    /// 题目组声明的补图位
    pub fn slots_for(group: &RegionGroup) -> Vec<SlotId> {
        if !group.has_tag(TAG_SLOT_MODE) {
            return Vec::new();
        }
        (1..=group.regions.len() as u64).map(SlotId::numbered).collect()
    }
}

#[async_trait]
impl GroupSubmitter for LocalSubmitter {
    async fn open_context(&self, group: &RegionGroup) -> Result<ContextId> {
        let n = self.next_context.fetch_add(1, Ordering::Relaxed) + 1;
        Ok(ContextId(format!("ctx-{}-{}", group.id, n)))
    }

    async fn submit(
        &self,
        context_id: ContextId,
        group: RegionGroup,
        events: BatchEventPublisher,
    ) -> Result<()> {
        let slots = Self::slots_for(&group);
        debug!("{} 提交完成，声明 {} 个补图位", context_id, slots.len());
        events.processing_complete(context_id, slots);
        Ok(())
    }
}
