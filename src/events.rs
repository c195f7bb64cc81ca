//! 批处理事件通道
//!
//! 批处理队列拥有这条通道；外部服务通过 `BatchEventPublisher` 报告进度，
//! 界面等消费者通过 `BatchQueue::subscribe()` 显式订阅。

use std::fmt;

use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use tracing::trace;

use crate::models::{GroupId, SlotId};

/// 处理上下文 ID（每个题目组在二次提交时打开一个）
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ContextId(pub String);

impl fmt::Display for ContextId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// 批处理事件
#[derive(Debug, Clone, PartialEq)]
pub enum BatchEvent {
    /// 某个补图位已填好
    SlotFilled { slot_id: SlotId },
    /// 二次提交完成，声明该组实际拥有的补图位
    ProcessingComplete {
        context_id: ContextId,
        has_pending_slots: bool,
        slot_ids: Vec<SlotId>,
    },
    /// 题目组已标记为 ready
    GroupReady { group_id: GroupId, label: String },
    /// 没有需要处理的题目组
    NothingToProcess,
    /// 整个队列结束
    BatchFinished {
        processed_count: usize,
        total_count: usize,
    },
}

/// 事件发布句柄
#[derive(Clone, Debug)]
pub struct BatchEventPublisher {
    tx: broadcast::Sender<BatchEvent>,
}

impl BatchEventPublisher {
    pub(crate) fn new(tx: broadcast::Sender<BatchEvent>) -> Self {
        Self { tx }
    }

    /// 发布事件；没有订阅者时直接丢弃
    pub fn publish(&self, event: BatchEvent) {
        trace!("批处理事件: {:?}", event);
        let _ = self.tx.send(event);
    }

    pub fn slot_filled(&self, slot_id: impl Into<SlotId>) {
        self.publish(BatchEvent::SlotFilled {
            slot_id: slot_id.into(),
        });
    }

    pub fn processing_complete(&self, context_id: ContextId, slot_ids: Vec<SlotId>) {
        self.publish(BatchEvent::ProcessingComplete {
            context_id,
            has_pending_slots: !slot_ids.is_empty(),
            slot_ids,
        });
    }
}
