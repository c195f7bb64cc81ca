use std::collections::BTreeSet;
use std::fmt;

use serde::{Deserialize, Serialize};

use crate::models::region::{NormalizedBox, Region};

/// 机器（AI）生成的题目
pub const TAG_AI: &str = "ai";
/// 用户手动框选的题目
pub const TAG_MANUAL: &str = "manual";
/// 需要补图的题目
pub const TAG_SLOT_MODE: &str = "slot-mode";

/// 题目组 ID
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct GroupId(pub u64);

impl fmt::Display for GroupId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "g{}", self.0)
    }
}

/// 题目组状态，只能向前推进：draft → verified → ready → sent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum GroupStatus {
    /// 刚提取出来，尚未审核
    Draft,
    /// 审核通过（或已修正）
    Verified,
    /// 补图完成，可以提交
    Ready,
    /// 已提交
    Sent,
}

impl fmt::Display for GroupStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            GroupStatus::Draft => "draft",
            GroupStatus::Verified => "verified",
            GroupStatus::Ready => "ready",
            GroupStatus::Sent => "sent",
        };
        f.write_str(name)
    }
}

/// 题目是否完整
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
pub enum GroupKind {
    /// 完整的一道题
    #[default]
    #[serde(rename = "whole-item")]
    Whole,
    /// 跨页题目的一部分
    #[serde(rename = "partial-item")]
    Partial,
}

/// 一道题：由一个或多个区域加上状态和标签组成
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RegionGroup {
    pub id: GroupId,
    /// 显示名称，由在列表中的位置决定
    pub label: String,
    pub regions: Vec<Region>,
    pub tags: BTreeSet<String>,
    pub status: GroupStatus,
    /// 外部关联 ID，用于跨页合并
    pub correlation_id: Option<String>,
    pub kind: GroupKind,
}

impl RegionGroup {
    /// 所在页（第一个区域的页码）
    pub fn page(&self) -> Option<u32> {
        self.regions.first().map(|r| r.page)
    }

    pub fn has_tag(&self, tag: &str) -> bool {
        self.tags.contains(tag)
    }

    /// 是否为机器生成
    pub fn is_machine(&self) -> bool {
        self.has_tag(TAG_AI)
    }

    /// 推进状态
    ///
    /// 只允许向前（或保持不变）；返回是否接受了该状态。
    pub fn advance_status(&mut self, to: GroupStatus) -> bool {
        if to < self.status {
            return false;
        }
        self.status = to;
        true
    }

    /// 第一页上所有区域的外接框
    pub fn bounding_box(&self) -> Option<(u32, NormalizedBox)> {
        let page = self.page()?;
        self.regions
            .iter()
            .filter(|r| r.page == page)
            .map(|r| r.normalized)
            .reduce(NormalizedBox::union)
            .map(|b| (page, b))
    }
}

/// 新建题目组的参数
#[derive(Debug, Clone, Default)]
pub struct NewGroup {
    pub tags: BTreeSet<String>,
    pub kind: GroupKind,
    pub status: Option<GroupStatus>,
    pub correlation_id: Option<String>,
}

impl NewGroup {
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    pub fn with_kind(mut self, kind: GroupKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn with_status(mut self, status: GroupStatus) -> Self {
        self.status = Some(status);
        self
    }

    pub fn with_correlation_id(mut self, correlation_id: Option<String>) -> Self {
        self.correlation_id = correlation_id;
        self
    }
}

/// 外部送来的一个题目片段
#[derive(Debug, Clone, PartialEq)]
pub struct Fragment {
    pub correlation_id: Option<String>,
    pub kind: GroupKind,
    pub region: Region,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn group(status: GroupStatus) -> RegionGroup {
        RegionGroup {
            id: GroupId(1),
            label: String::new(),
            regions: Vec::new(),
            tags: BTreeSet::new(),
            status,
            correlation_id: None,
            kind: GroupKind::Whole,
        }
    }

    #[test]
    fn test_status_only_moves_forward() {
        let mut g = group(GroupStatus::Draft);
        assert!(g.advance_status(GroupStatus::Verified));
        assert!(g.advance_status(GroupStatus::Ready));
        assert!(!g.advance_status(GroupStatus::Draft));
        assert_eq!(g.status, GroupStatus::Ready);
    }

    #[test]
    fn test_sent_is_terminal() {
        let mut g = group(GroupStatus::Sent);
        for status in [GroupStatus::Draft, GroupStatus::Verified, GroupStatus::Ready] {
            assert!(!g.advance_status(status));
        }
        assert_eq!(g.status, GroupStatus::Sent);
    }

    #[test]
    fn test_kind_wire_names() {
        assert_eq!(serde_json::to_string(&GroupKind::Partial).unwrap(), "\"partial-item\"");
        let kind: GroupKind = serde_json::from_str("\"whole-item\"").unwrap();
        assert_eq!(kind, GroupKind::Whole);
    }
}
