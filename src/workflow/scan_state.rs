//! 扫描状态
//!
//! 封装"正在处理哪一页、走到了哪一步"这一信息，是断点续扫的最小单位

use std::fmt::{self, Display};
use std::sync::{Arc, Mutex, PoisonError};

use serde::{Deserialize, Serialize};

use crate::models::{ExtractionResult, PageImage};

/// 单页状态机的步骤
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ScanStep {
    Extraction,
    Audit,
    Correction,
    Idle,
}

impl Display for ScanStep {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ScanStep::Extraction => "extraction",
            ScanStep::Audit => "audit",
            ScanStep::Correction => "correction",
            ScanStep::Idle => "idle",
        };
        f.write_str(name)
    }
}

/// 一页正在进行中的工作
#[derive(Debug, Clone, PartialEq)]
pub struct ScanState {
    /// 页码（从 1 开始）
    pub page: u32,
    pub step: ScanStep,
    /// 缓存的页面图片
    pub image: Option<PageImage>,
    /// 最近一次提取结果
    pub extraction: Option<ExtractionResult>,
    /// 最近一次审核意见
    pub feedback: Option<String>,
}

impl ScanState {
    /// 从提取开始处理一页
    pub fn new(page: u32) -> Self {
        Self {
            page,
            step: ScanStep::Extraction,
            image: None,
            extraction: None,
            feedback: None,
        }
    }

    /// 是否可以直接从记录的步骤继续
    ///
    /// 审核和修正都需要缓存的图片和提取结果；缺任何一个就只能从头提取。
    pub fn is_resumable(&self) -> bool {
        match self.step {
            ScanStep::Extraction => true,
            ScanStep::Audit => self.image.is_some() && self.extraction.is_some(),
            ScanStep::Correction => {
                self.image.is_some() && self.extraction.is_some() && self.feedback.is_some()
            }
            ScanStep::Idle => false,
        }
    }
}

impl Display for ScanState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "[第 {} 页 步骤#{}]", self.page, self.step)
    }
}

/// 断点记录（只保存在内存中）
///
/// 克隆得到的是同一份记录的句柄。
#[derive(Debug, Clone, Default)]
pub struct Checkpoint {
    state: Arc<Mutex<Option<ScanState>>>,
}

impl Checkpoint {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn save(&self, state: &ScanState) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = Some(state.clone());
    }

    pub fn load(&self) -> Option<ScanState> {
        self.state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    pub fn clear(&self) {
        *self.state.lock().unwrap_or_else(PoisonError::into_inner) = None;
    }
}
