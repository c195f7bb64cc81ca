//! 集成测试共用的脚本化服务

#![allow(dead_code)]

use std::collections::{BTreeSet, HashMap};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use anyhow::{anyhow, Result};
use async_trait::async_trait;
use tokio::sync::Notify;

use question_region_scan::config::{BatchConfig, ScanConfig};
use question_region_scan::events::{BatchEventPublisher, ContextId};
use question_region_scan::models::{
    AuditVerdict, ExtractedRegion, ExtractionResult, GroupKind, PageImage, RegionGroup, SlotId,
};
use question_region_scan::services::{
    FillRequest, GroupSubmitter, ImageFillService, PageRenderer, StatusSink, VisionService,
};

// ========== 数据构造 ==========

pub fn region(correlation_id: Option<&str>, kind: GroupKind, bbox: [i64; 4]) -> ExtractedRegion {
    ExtractedRegion {
        id: None,
        correlation_id: correlation_id.map(str::to_string),
        kind,
        bbox,
        confidence: Some(0.9),
    }
}

/// `n` 个互不重叠的整题区域
pub fn whole_regions(n: usize) -> Vec<ExtractedRegion> {
    (0..n)
        .map(|i| {
            let top = (i as i64) * 100;
            region(None, GroupKind::Whole, [top, 50, top + 90, 950])
        })
        .collect()
}

pub fn fast_scan_config() -> ScanConfig {
    ScanConfig {
        pause_check_interval: Duration::from_millis(5),
        verify_delay_per_region: Duration::ZERO,
        verify_delay_max: Duration::ZERO,
        slot_mode: false,
    }
}

pub fn batch_config() -> BatchConfig {
    BatchConfig::default()
}

// ========== 视觉服务 ==========

/// 单页的脚本
#[derive(Clone, Default)]
pub struct PageScript {
    pub extraction: Vec<ExtractedRegion>,
    pub verdict: Option<AuditVerdict>,
    pub correction: Option<Vec<ExtractedRegion>>,
    pub fail_extract: bool,
    pub fail_audit: bool,
    pub fail_correct: bool,
}

impl PageScript {
    pub fn approved(extraction: Vec<ExtractedRegion>) -> Self {
        Self {
            extraction,
            verdict: Some(AuditVerdict::approved()),
            ..Default::default()
        }
    }

    pub fn rejected(
        extraction: Vec<ExtractedRegion>,
        feedback: &str,
        correction: Vec<ExtractedRegion>,
    ) -> Self {
        Self {
            extraction,
            verdict: Some(AuditVerdict::rejected(feedback)),
            correction: Some(correction),
            ..Default::default()
        }
    }

    pub fn failing() -> Self {
        Self {
            fail_extract: true,
            ..Default::default()
        }
    }

    pub fn failing_audit(extraction: Vec<ExtractedRegion>) -> Self {
        Self {
            extraction,
            fail_audit: true,
            ..Default::default()
        }
    }

    /// 审核驳回后修正调用失败
    pub fn failing_correction(extraction: Vec<ExtractedRegion>, feedback: &str) -> Self {
        Self {
            extraction,
            verdict: Some(AuditVerdict::rejected(feedback)),
            fail_correct: true,
            ..Default::default()
        }
    }
}

/// 按页返回预设结果，并记录每次调用
#[derive(Default)]
pub struct ScriptedVision {
    scripts: Mutex<HashMap<u32, PageScript>>,
    calls: Mutex<Vec<(&'static str, u32)>>,
    /// 审核停住的页，直到 `release_audit()` 或被取消
    hold_audit_on: Mutex<Option<u32>>,
    release: Notify,
    pub audit_entered: Notify,
}

impl ScriptedVision {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_page(self, page: u32, script: PageScript) -> Self {
        self.scripts.lock().unwrap().insert(page, script);
        self
    }

    pub fn hold_audit_on(&self, page: Option<u32>) {
        *self.hold_audit_on.lock().unwrap() = page;
    }

    pub fn release_audit(&self) {
        self.release.notify_one();
    }

    pub fn calls(&self) -> Vec<(&'static str, u32)> {
        self.calls.lock().unwrap().clone()
    }

    pub fn count(&self, kind: &str, page: u32) -> usize {
        self.calls()
            .iter()
            .filter(|(k, p)| *k == kind && *p == page)
            .count()
    }

    fn script(&self, page: u32) -> PageScript {
        self.scripts
            .lock()
            .unwrap()
            .get(&page)
            .cloned()
            .unwrap_or_default()
    }

    fn record(&self, kind: &'static str, page: u32) {
        self.calls.lock().unwrap().push((kind, page));
    }
}

#[async_trait]
impl VisionService for ScriptedVision {
    async fn extract(
        &self,
        image: &PageImage,
        _instructions: &str,
        _schema: &str,
    ) -> Result<ExtractionResult> {
        self.record("extract", image.page);
        let script = self.script(image.page);
        if script.fail_extract {
            return Err(anyhow!("模型服务不可用"));
        }
        Ok(ExtractionResult::new(script.extraction))
    }

    async fn audit(&self, image: &PageImage, _regions: &ExtractionResult) -> Result<AuditVerdict> {
        self.record("audit", image.page);
        let hold = *self.hold_audit_on.lock().unwrap();
        if hold == Some(image.page) {
            self.audit_entered.notify_one();
            self.release.notified().await;
        }
        let script = self.script(image.page);
        if script.fail_audit {
            return Err(anyhow!("审核服务超时"));
        }
        Ok(script.verdict.unwrap_or_else(AuditVerdict::approved))
    }

    async fn correct(
        &self,
        image: &PageImage,
        regions: &ExtractionResult,
        _feedback: &str,
    ) -> Result<ExtractionResult> {
        self.record("correct", image.page);
        let script = self.script(image.page);
        if script.fail_correct {
            return Err(anyhow!("修正服务不可用"));
        }
        match script.correction {
            Some(corrected) => Ok(ExtractionResult::new(corrected)),
            None => Ok(regions.clone()),
        }
    }
}

// ========== 渲染 ==========

pub struct FakeRenderer {
    pages: u32,
    pub renders: AtomicUsize,
}

impl FakeRenderer {
    pub fn new(pages: u32) -> Self {
        Self {
            pages,
            renders: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl PageRenderer for FakeRenderer {
    async fn page_count(&self) -> Result<u32> {
        Ok(self.pages)
    }

    async fn render_page(&self, page: u32) -> Result<PageImage> {
        self.renders.fetch_add(1, Ordering::SeqCst);
        Ok(PageImage::new(page, 1000, 1400, "image/png", vec![page as u8]))
    }
}

// ========== 状态输出 ==========

#[derive(Default)]
pub struct RecordingStatus {
    lines: Mutex<Vec<(String, String)>>,
}

impl RecordingStatus {
    pub fn lines(&self) -> Vec<(String, String)> {
        self.lines.lock().unwrap().clone()
    }

    pub fn contains(&self, needle: &str) -> bool {
        self.lines().iter().any(|(_, m)| m.contains(needle))
    }
}

impl StatusSink for RecordingStatus {
    fn on_status(&self, scope: &str, message: &str) {
        self.lines
            .lock()
            .unwrap()
            .push((scope.to_string(), message.to_string()));
    }
}

// ========== 二次提交 ==========

/// 按题目标签声明补图位；可以指定提交失败的题目
#[derive(Default)]
pub struct ScriptedSubmitter {
    slots_by_label: Mutex<HashMap<String, Vec<SlotId>>>,
    failing_labels: Mutex<BTreeSet<String>>,
    /// 提交完成前的延迟
    delay: Mutex<Duration>,
}

impl ScriptedSubmitter {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_slots(self, label: &str, slots: &[&str]) -> Self {
        self.slots_by_label.lock().unwrap().insert(
            label.to_string(),
            slots.iter().map(|s| SlotId::normalize(s)).collect(),
        );
        self
    }

    pub fn failing(self, label: &str) -> Self {
        self.failing_labels.lock().unwrap().insert(label.to_string());
        self
    }

    pub fn with_delay(self, delay: Duration) -> Self {
        *self.delay.lock().unwrap() = delay;
        self
    }
}

#[async_trait]
impl GroupSubmitter for ScriptedSubmitter {
    async fn open_context(&self, group: &RegionGroup) -> Result<ContextId> {
        Ok(ContextId(format!("ctx-{}", group.id)))
    }

    async fn submit(
        &self,
        context_id: ContextId,
        group: RegionGroup,
        events: BatchEventPublisher,
    ) -> Result<()> {
        let delay = *self.delay.lock().unwrap();
        if !delay.is_zero() {
            tokio::time::sleep(delay).await;
        }
        if self.failing_labels.lock().unwrap().contains(&group.label) {
            return Err(anyhow!("提交被拒绝"));
        }
        let slots = self
            .slots_by_label
            .lock()
            .unwrap()
            .get(&group.label)
            .cloned()
            .unwrap_or_default();
        events.processing_complete(context_id, slots);
        Ok(())
    }
}

// ========== 补图 ==========

/// 按组标签在指定延迟后报告补图位（原始 ID 形式原样发布）
#[derive(Default)]
pub struct ScriptedFiller {
    fills: Mutex<HashMap<String, Vec<(Duration, String)>>>,
    pub requests: Mutex<Vec<FillRequest>>,
}

impl ScriptedFiller {
    pub fn new() -> Self {
        Self::default()
    }

    /// `group_key` 是题目组 ID 的显示形式（如 `g1`）
    pub fn fills(self, group_key: &str, fills: &[(u64, &str)]) -> Self {
        self.fills.lock().unwrap().insert(
            group_key.to_string(),
            fills
                .iter()
                .map(|(ms, raw)| (Duration::from_millis(*ms), raw.to_string()))
                .collect(),
        );
        self
    }
}

#[async_trait]
impl ImageFillService for ScriptedFiller {
    async fn fill(&self, request: FillRequest, events: BatchEventPublisher) -> Result<()> {
        let key = request.group_id.to_string();
        self.requests.lock().unwrap().push(request);
        let plan = self.fills.lock().unwrap().get(&key).cloned().unwrap_or_default();

        let mut waited = Duration::ZERO;
        for (at, raw) in plan {
            if at > waited {
                tokio::time::sleep(at - waited).await;
                waited = at;
            }
            events.slot_filled(raw.as_str());
        }
        Ok(())
    }
}

pub fn shared<T>(value: T) -> Arc<T> {
    Arc::new(value)
}
