//! 扫描控制器 - 编排层
//!
//! ## 职责
//!
//! 按页码升序遍历整份文档，把每一页交给 `PageFlow` 推进到完成。
//!
//! ## 核心功能
//!
//! 1. **单飞**：同一时间只允许一次扫描运行
//! 2. **暂停**：暂停只是"请求"，在下一个页边界才生效，不会打断正在进行的步骤
//! 3. **停止**：立即生效，取消正在进行的服务调用，已提交的页面不受影响
//! 4. **断点续扫**：从记录的页和步骤继续，已完成的步骤不会重做
//! 5. **容错**：单页失败只记录日志，继续下一页

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tracing::{error, info, warn};

use crate::config::ScanConfig;
use crate::error::{AppError, AppResult, ServiceStage};
use crate::infrastructure::CancelToken;
use crate::orchestrator::ui_lock::UiLock;
use crate::orchestrator::RunningGuard;
use crate::services::{PageRenderer, StatusSink, VisionService};
use crate::store::RegionStore;
use crate::workflow::{Checkpoint, PageFlow, PageOutcome, ScanState, ScanStep};

const SCOPE: &str = "扫描";

/// 扫描启动参数
#[derive(Debug, Clone, Copy)]
pub struct ScanOptions {
    /// 起始页（非续扫时使用）
    pub start_page: u32,
    /// 是否从断点继续
    pub resume: bool,
    /// 结束后保持界面锁，交给批处理队列解锁
    pub keep_ui_locked: bool,
}

impl Default for ScanOptions {
    fn default() -> Self {
        Self {
            start_page: 1,
            resume: false,
            keep_ui_locked: false,
        }
    }
}

/// 扫描统计
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct ScanSummary {
    /// 完成的页数（含空白页）
    pub completed: usize,
    /// 没有题目的页数
    pub empty: usize,
    /// 失败的页数
    pub failed: usize,
    /// 是否被停止
    pub stopped: bool,
}

/// 本次会话的进度
#[derive(Debug, Default)]
struct SessionProgress {
    scanned: BTreeSet<u32>,
    failed: BTreeSet<u32>,
    last_completed: u32,
}

/// 扫描控制器
pub struct ScanController {
    flow: PageFlow,
    renderer: Arc<dyn PageRenderer>,
    status: Arc<dyn StatusSink>,
    checkpoint: Checkpoint,
    pause_check_interval: Duration,
    ui_lock: UiLock,
    running: AtomicBool,
    full_scan: AtomicBool,
    pause_requested: AtomicBool,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    cancel: Mutex<CancelToken>,
    progress: Mutex<SessionProgress>,
}

impl ScanController {
    pub fn new(
        store: RegionStore,
        vision: Arc<dyn VisionService>,
        renderer: Arc<dyn PageRenderer>,
        status: Arc<dyn StatusSink>,
        config: ScanConfig,
        ui_lock: UiLock,
    ) -> Self {
        let checkpoint = Checkpoint::new();
        let pause_check_interval = config.pause_check_interval;
        let flow = PageFlow::new(
            store,
            vision,
            Arc::clone(&renderer),
            Arc::clone(&status),
            config,
            checkpoint.clone(),
        );
        Self {
            flow,
            renderer,
            status,
            checkpoint,
            pause_check_interval,
            ui_lock,
            running: AtomicBool::new(false),
            full_scan: AtomicBool::new(false),
            pause_requested: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            cancel: Mutex::new(CancelToken::new()),
            progress: Mutex::new(SessionProgress::default()),
        }
    }

    // ========== 控制 ==========

    /// 扫描整份文档
    pub async fn start(&self, options: ScanOptions) -> AppResult<ScanSummary> {
        let _guard = self.enter()?;
        self.full_scan.store(true, Ordering::SeqCst);
        let _full_scan = RunningGuard(&self.full_scan);

        self.pause_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        let cancel = self.fresh_token();
        self.ui_lock.acquire();

        let result = self.run_pages(options, &cancel).await;

        let hand_off = options.keep_ui_locked && matches!(&result, Ok(s) if !s.stopped);
        if !hand_off {
            self.ui_lock.release();
        }
        result
    }

    /// 只处理一页；整份扫描进行中时拒绝
    pub async fn process_page(&self, page: u32) -> AppResult<PageOutcome> {
        if self.full_scan.load(Ordering::SeqCst) {
            return Err(AppError::ScanBusy);
        }
        let _guard = self.enter()?;
        let cancel = self.fresh_token();

        let page_count = self.page_count(&cancel).await?;
        if page == 0 || page > page_count {
            return Err(AppError::InvalidPage { page, page_count });
        }

        let saved = self.checkpoint.load().filter(|s| s.step != ScanStep::Idle);
        let (state, foreign) = match saved {
            Some(s) if s.page == page => (s, None),
            other => (ScanState::new(page), other),
        };

        let result = match self.flow.run(state, &cancel).await {
            Ok(outcome) => {
                self.record_completed(page);
                Ok(outcome)
            }
            Err(e) if e.is_cancelled() => Err(e),
            Err(e) => {
                self.flow.abandon(page);
                self.record_failed(page);
                Err(e)
            }
        };

        // 其他页的断点留给下一次恢复
        if let Some(state) = &foreign {
            self.checkpoint.save(state);
        }
        result
    }

    /// 请求暂停（在下一个页边界生效）
    pub fn pause(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.pause_requested.store(true, Ordering::SeqCst);
            self.status.on_status(SCOPE, "⏸️ 已请求暂停，将在当前页完成后生效");
        }
    }

    pub fn resume(&self) {
        self.pause_requested.store(false, Ordering::SeqCst);
        if self.paused.swap(false, Ordering::SeqCst) {
            self.status.on_status(SCOPE, "▶️ 继续扫描");
        }
    }

    /// 立即停止：取消正在进行的调用
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.pause_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.lock_cancel().cancel();
        if self.running.load(Ordering::SeqCst) {
            self.status.on_status(SCOPE, "⏹️ 正在停止...");
        }
    }

    // ========== 查询 ==========

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 暂停是否已经生效
    pub fn is_paused(&self) -> bool {
        self.paused.load(Ordering::SeqCst)
    }

    /// 当前断点
    pub fn scan_state(&self) -> Option<ScanState> {
        self.checkpoint.load()
    }

    pub fn last_completed_page(&self) -> u32 {
        self.lock_progress().last_completed
    }

    pub fn scanned_pages(&self) -> BTreeSet<u32> {
        self.lock_progress().scanned.clone()
    }

    /// 本次会话中失败的页
    pub fn failed_pages(&self) -> BTreeSet<u32> {
        self.lock_progress().failed.clone()
    }

    // ========== 内部 ==========

    fn enter(&self) -> AppResult<RunningGuard<'_>> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AppError::ScanBusy)?;
        self.stop_requested.store(false, Ordering::SeqCst);
        Ok(RunningGuard(&self.running))
    }

    fn fresh_token(&self) -> CancelToken {
        let token = CancelToken::new();
        *self.lock_cancel() = token.clone();
        token
    }

    fn lock_cancel(&self) -> MutexGuard<'_, CancelToken> {
        self.cancel.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn lock_progress(&self) -> MutexGuard<'_, SessionProgress> {
        self.progress.lock().unwrap_or_else(PoisonError::into_inner)
    }

    async fn page_count(&self, cancel: &CancelToken) -> AppResult<u32> {
        cancel
            .run(self.renderer.page_count())
            .await?
            .map_err(|e| AppError::service(ServiceStage::Render, e))
    }

    /// 决定从哪一页、哪一步开始
    fn resume_point(&self, options: &ScanOptions) -> (u32, Option<ScanState>) {
        if !options.resume {
            self.checkpoint.clear();
            return (options.start_page.max(1), None);
        }
        match self.checkpoint.load().filter(|s| s.step != ScanStep::Idle) {
            Some(state) => (state.page, Some(state)),
            None => (self.last_completed_page() + 1, None),
        }
    }

    async fn run_pages(&self, options: ScanOptions, cancel: &CancelToken) -> AppResult<ScanSummary> {
        let page_count = match self.page_count(cancel).await {
            Ok(count) => count,
            Err(e) if e.is_cancelled() => {
                return Ok(ScanSummary {
                    stopped: true,
                    ..Default::default()
                })
            }
            Err(e) => return Err(e),
        };
        let (first_page, mut resumed) = self.resume_point(&options);

        info!("{}", "=".repeat(60));
        info!("📚 开始扫描: 第 {}-{} 页", first_page, page_count);
        if let Some(state) = &resumed {
            info!("⏯️ 断点: {}", state);
        }
        info!("{}", "=".repeat(60));

        let mut summary = ScanSummary::default();

        for page in first_page..=page_count {
            if self.lock_progress().scanned.contains(&page) {
                continue;
            }

            if !self.wait_if_paused().await {
                summary.stopped = true;
                break;
            }

            let state = match resumed.take() {
                Some(state) if state.page == page => state,
                _ => ScanState::new(page),
            };

            info!("\n[第 {} 页] {}", page, "─".repeat(30));
            match self.flow.run(state, cancel).await {
                Ok(outcome) => {
                    self.record_completed(page);
                    summary.completed += 1;
                    if outcome == PageOutcome::Empty {
                        summary.empty += 1;
                    }
                }
                Err(e) if e.is_cancelled() => {
                    info!("[第 {} 页] ⏹️ 已停止，未完成的工作不再保存", page);
                    summary.stopped = true;
                    break;
                }
                Err(e) => {
                    error!("[第 {} 页] ❌ 处理失败: {}", page, e);
                    self.status
                        .on_status(&format!("第 {} 页", page), &format!("❌ 处理失败: {}", e));
                    self.flow.abandon(page);
                    self.record_failed(page);
                    summary.failed += 1;
                }
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                summary.stopped = true;
                break;
            }
        }

        self.status.on_status(
            SCOPE,
            &format!(
                "完成 {} 页（空白 {} 页），失败 {} 页{}",
                summary.completed,
                summary.empty,
                summary.failed,
                if summary.stopped { "，已停止" } else { "" }
            ),
        );
        Ok(summary)
    }

    /// 应用延迟的暂停请求，并在暂停期间阻塞
    ///
    /// 返回 `false` 表示等待期间收到了停止请求。
    async fn wait_if_paused(&self) -> bool {
        if self.pause_requested.swap(false, Ordering::SeqCst) {
            self.paused.store(true, Ordering::SeqCst);
            self.status.on_status(SCOPE, "⏸️ 已暂停");
        }
        while self.paused.load(Ordering::SeqCst) {
            if self.stop_requested.load(Ordering::SeqCst) {
                return false;
            }
            tokio::time::sleep(self.pause_check_interval).await;
        }
        !self.stop_requested.load(Ordering::SeqCst)
    }

    fn record_completed(&self, page: u32) {
        let mut progress = self.lock_progress();
        progress.scanned.insert(page);
        progress.failed.remove(&page);
        progress.last_completed = progress.last_completed.max(page);
    }

    fn record_failed(&self, page: u32) {
        warn!("[第 {} 页] 标记为失败，继续下一页", page);
        self.lock_progress().failed.insert(page);
    }
}
