//! 补图位标识
//!
//! 同一个补图位会以两种形式出现：纯数字（`3`）和带前缀的字符串（`slot-3`）。
//! 这里统一成带前缀的形式再比较，不做其他推断。

use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;

const SLOT_PREFIX: &str = "slot-";

/// 规范化后的补图位标识
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct SlotId(String);

impl SlotId {
    /// 规范化：纯数字补上前缀，其余原样保留（去掉首尾空白）
    pub fn normalize(raw: &str) -> Self {
        let trimmed = raw.trim();
        match trimmed.parse::<u64>() {
            Ok(n) => Self::numbered(n),
            Err(_) => Self(trimmed.to_string()),
        }
    }

    pub fn numbered(n: u64) -> Self {
        Self(format!("{}{}", SLOT_PREFIX, n))
    }

    /// 从 JSON 值解析（数字或字符串），其他类型返回 `None`
    pub fn from_json(value: &JsonValue) -> Option<Self> {
        match value {
            JsonValue::Number(n) => n.as_u64().map(Self::numbered),
            JsonValue::String(s) if !s.trim().is_empty() => Some(Self::normalize(s)),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl From<&str> for SlotId {
    fn from(raw: &str) -> Self {
        Self::normalize(raw)
    }
}

impl From<u64> for SlotId {
    fn from(n: u64) -> Self {
        Self::numbered(n)
    }
}

impl fmt::Display for SlotId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}
