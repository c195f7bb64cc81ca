//! 单页处理流程 - 流程层
//!
//! 核心职责：把"一页"推进到确定的结果
//!
//! 流程顺序：
//! 1. extraction：渲染 → 提取 → 写入草稿
//! 2. audit：审核通过则丢弃草稿、重新写入为 verified
//! 3. correction：按审核意见修正一次，结果无条件写入为 verified（不再二次审核）
//!
//! 每次进入下一步之前都会保存断点，页面完成后清除断点。

use std::collections::BTreeSet;
use std::sync::Arc;

use tracing::{info, warn};

use crate::config::ScanConfig;
use crate::error::{AppError, AppResult, ServiceStage};
use crate::infrastructure::CancelToken;
use crate::models::{ExtractionResult, GroupStatus, NewGroup, PageImage, TAG_AI, TAG_SLOT_MODE};
use crate::services::{PageRenderer, StatusSink, VisionService, EXTRACTION_INSTRUCTIONS, EXTRACTION_SCHEMA};
use crate::store::RegionStore;
use crate::utils::truncate_text;
use crate::workflow::scan_state::{Checkpoint, ScanState, ScanStep};

/// 单页处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PageOutcome {
    /// 没有题目，提交空结果
    Empty,
    /// 审核通过
    Verified { count: usize },
    /// 审核未通过，已修正
    Corrected { count: usize },
}

/// 单页处理流程
///
/// - 只处理一页，不关心页码顺序
/// - 不持有运行状态（暂停 / 停止由编排层负责）
/// - 只通过 `RegionStore` 写入结果
pub struct PageFlow {
    store: RegionStore,
    vision: Arc<dyn VisionService>,
    renderer: Arc<dyn PageRenderer>,
    status: Arc<dyn StatusSink>,
    config: ScanConfig,
    checkpoint: Checkpoint,
}

impl PageFlow {
    pub fn new(
        store: RegionStore,
        vision: Arc<dyn VisionService>,
        renderer: Arc<dyn PageRenderer>,
        status: Arc<dyn StatusSink>,
        config: ScanConfig,
        checkpoint: Checkpoint,
    ) -> Self {
        Self {
            store,
            vision,
            renderer,
            status,
            config,
            checkpoint,
        }
    }

    /// 从 `state` 记录的步骤开始，把这一页推进到完成
    pub async fn run(&self, state: ScanState, cancel: &CancelToken) -> AppResult<PageOutcome> {
        let page = state.page;
        let scope = format!("第 {} 页", page);
        let mut state = if state.is_resumable() {
            state
        } else {
            ScanState::new(page)
        };

        if state.step != ScanStep::Extraction {
            info!("[{}] ⏯️ 从 {} 步骤继续", scope, state.step);
        }

        loop {
            match (state.step, state.image.clone(), state.extraction.clone()) {
                (ScanStep::Audit, Some(image), Some(regions)) => {
                    self.status
                        .on_status(&scope, &format!("🔍 正在审核 {} 个区域...", regions.regions.len()));

                    let verdict = cancel
                        .run(self.vision.audit(&image, &regions))
                        .await?
                        .map_err(|e| AppError::service(ServiceStage::Audit, e))?;

                    if verdict.ok {
                        let count = self.commit_verified(&image, &regions);
                        self.checkpoint.clear();
                        self.status
                            .on_status(&scope, &format!("✓ 审核通过，确认 {} 道题", count));
                        // 停留展示；被停止时页面已经提交，不影响结果
                        let _ = cancel.sleep(self.config.verify_delay(count)).await;
                        return Ok(PageOutcome::Verified { count });
                    }

                    let feedback = verdict
                        .feedback
                        .filter(|f| !f.trim().is_empty())
                        .unwrap_or_else(|| "审核未通过".to_string());
                    self.status.on_status(
                        &scope,
                        &format!("⚠️ 审核未通过: {}", truncate_text(&feedback, 80)),
                    );
                    state.feedback = Some(feedback);
                    state.step = ScanStep::Correction;
                    self.checkpoint.save(&state);
                }

                (ScanStep::Correction, Some(image), Some(regions)) => {
                    let feedback = state.feedback.clone().unwrap_or_default();
                    self.status.on_status(&scope, "🛠️ 正在按审核意见修正...");

                    let corrected = match cancel
                        .run(self.vision.correct(&image, &regions, &feedback))
                        .await?
                    {
                        Ok(corrected) => corrected,
                        Err(e) => {
                            warn!("[{}] 修正失败，保留原结果: {:#}", scope, e);
                            regions
                        }
                    };

                    let count = self.commit_verified(&image, &corrected);
                    self.checkpoint.clear();
                    self.status
                        .on_status(&scope, &format!("✓ 修正完成，确认 {} 道题", count));
                    return Ok(PageOutcome::Corrected { count });
                }

                // extraction，或缓存不完整的其他步骤
                _ => {
                    let image = match state.image.clone() {
                        Some(image) => image,
                        None => {
                            let image = cancel
                                .run(self.renderer.render_page(page))
                                .await?
                                .map_err(|e| AppError::service(ServiceStage::Render, e))?;
                            state.image = Some(image.clone());
                            image
                        }
                    };

                    self.status.on_status(&scope, "📄 正在提取题目区域...");
                    let result = cancel
                        .run(self.vision.extract(&image, EXTRACTION_INSTRUCTIONS, EXTRACTION_SCHEMA))
                        .await?
                        .map_err(|e| AppError::service(ServiceStage::Extract, e))?;

                    if result.is_empty() {
                        self.store.remove_by_page_and_status(page, GroupStatus::Draft);
                        self.checkpoint.clear();
                        self.status.on_status(&scope, "未发现题目，提交空结果");
                        return Ok(PageOutcome::Empty);
                    }

                    let drafts = self.commit_drafts(&image, &result);
                    self.status
                        .on_status(&scope, &format!("✓ 提取到 {} 个区域（草稿）", drafts));

                    state.step = ScanStep::Audit;
                    state.extraction = Some(result);
                    state.feedback = None;
                    self.checkpoint.save(&state);
                }
            }
        }
    }

    /// 放弃一页：丢弃它的草稿并清除断点
    pub fn abandon(&self, page: u32) {
        let removed = self.store.remove_by_page_and_status(page, GroupStatus::Draft);
        if removed > 0 {
            warn!("[第 {} 页] 丢弃 {} 个未确认的草稿", page, removed);
        }
        self.checkpoint.clear();
    }

    /// 写入草稿：每个区域单独成组，草稿从不合并
    fn commit_drafts(&self, image: &PageImage, result: &ExtractionResult) -> usize {
        for region in &result.regions {
            let fragment = region.to_fragment(image);
            let id = self.store.create_group(
                NewGroup::default()
                    .with_tag(TAG_AI)
                    .with_kind(fragment.kind)
                    .with_status(GroupStatus::Draft)
                    .with_correlation_id(fragment.correlation_id),
            );
            self.store.append_region(Some(id), fragment.region);
        }
        result.regions.len()
    }

    /// 丢弃这一页的草稿，再把结果写入为 verified（按关联 ID 合并）
    fn commit_verified(&self, image: &PageImage, result: &ExtractionResult) -> usize {
        self.store.remove_by_page_and_status(image.page, GroupStatus::Draft);

        let mut tags = BTreeSet::from([TAG_AI.to_string()]);
        if self.config.slot_mode {
            tags.insert(TAG_SLOT_MODE.to_string());
        }

        for region in &result.regions {
            self.store
                .upsert_fragment(region.to_fragment(image), GroupStatus::Verified, &tags);
        }
        result.regions.len()
    }
}
