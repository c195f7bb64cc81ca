//! 批处理队列 - 编排层
//!
//! ## 职责
//!
//! 扫描结束后，把机器生成的题目组逐个推过"二次提交 + 补图"阶段，
//! 同一时间只处理一个组。
//!
//! ## 推进条件
//!
//! - 待填补图位集合清空 → 立即推进
//! - 否则先等宽限期，之后每个轮询间隔检查一次
//! - 超过 `宽限期 + 上限` 仍未填完 → 照样推进（接受部分结果，不重试）
//!
//! 补图位集合在收到当前上下文的 `ProcessingComplete` 之前是未知的；
//! 在此之前到达的 `SlotFilled` 会先记下来，集合确定后再扣除。

use std::collections::{BTreeSet, VecDeque};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use anyhow::anyhow;
use tokio::sync::{broadcast, Notify};
use tokio::task::JoinHandle;
use tokio::time::{sleep_until, Instant};
use tracing::{debug, error, info, warn};

use crate::config::BatchConfig;
use crate::error::{AppError, AppResult};
use crate::events::{BatchEvent, BatchEventPublisher, ContextId};
use crate::models::{GroupId, GroupStatus, RegionGroup, SlotId};
use crate::orchestrator::ui_lock::UiLock;
use crate::orchestrator::RunningGuard;
use crate::services::{FillRequest, GroupSubmitter, ImageFillService, StatusSink};
use crate::store::RegionStore;

const SCOPE: &str = "批处理";

/// 批处理结果
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct BatchReport {
    /// 已处理（含出错）的组数
    pub processed: usize,
    /// 快照中的组数
    pub total: usize,
    /// 实际处理顺序
    pub order: Vec<GroupId>,
    pub stopped: bool,
}

/// 正在处理的任务
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BatchJob {
    pub group_id: GroupId,
    pub context_id: Option<ContextId>,
    /// 仍在等待的补图位（集合未确定时为空）
    pub pending_slots: BTreeSet<SlotId>,
    pub processed: usize,
    pub total: usize,
}

/// 单个组的处理结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum GroupOutcome {
    Ready,
    Skipped,
    Stopped,
}

/// 等待补图位的结果
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum WaitOutcome {
    Filled,
    TimedOut,
    Stopped,
}

/// 补图位跟踪
#[derive(Debug, Default)]
struct SlotTracker {
    /// `None` 表示还没收到 `ProcessingComplete`
    pending: Option<BTreeSet<SlotId>>,
    filled_early: BTreeSet<SlotId>,
}

impl SlotTracker {
    fn on_filled(&mut self, slot: SlotId) {
        match self.pending.as_mut() {
            Some(pending) => {
                pending.remove(&slot);
            }
            None => {
                self.filled_early.insert(slot);
            }
        }
    }

    fn on_declared(&mut self, has_pending_slots: bool, slot_ids: Vec<SlotId>) {
        let pending = if has_pending_slots {
            slot_ids
                .into_iter()
                .filter(|s| !self.filled_early.contains(s))
                .collect()
        } else {
            BTreeSet::new()
        };
        self.pending = Some(pending);
    }

    fn is_done(&self) -> bool {
        matches!(&self.pending, Some(pending) if pending.is_empty())
    }

    fn snapshot(&self) -> BTreeSet<SlotId> {
        self.pending.clone().unwrap_or_default()
    }
}

/// 批处理队列
pub struct BatchQueue {
    store: RegionStore,
    submitter: Arc<dyn GroupSubmitter>,
    filler: Arc<dyn ImageFillService>,
    status: Arc<dyn StatusSink>,
    config: BatchConfig,
    ui_lock: UiLock,
    events: broadcast::Sender<BatchEvent>,
    running: AtomicBool,
    paused: AtomicBool,
    stop_requested: AtomicBool,
    control: Notify,
    job: Mutex<Option<BatchJob>>,
}

impl BatchQueue {
    pub fn new(
        store: RegionStore,
        submitter: Arc<dyn GroupSubmitter>,
        filler: Arc<dyn ImageFillService>,
        status: Arc<dyn StatusSink>,
        config: BatchConfig,
        ui_lock: UiLock,
    ) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity.max(1));
        Self {
            store,
            submitter,
            filler,
            status,
            config,
            ui_lock,
            events,
            running: AtomicBool::new(false),
            paused: AtomicBool::new(false),
            stop_requested: AtomicBool::new(false),
            control: Notify::new(),
            job: Mutex::new(None),
        }
    }

    /// 订阅批处理事件
    pub fn subscribe(&self) -> broadcast::Receiver<BatchEvent> {
        self.events.subscribe()
    }

    /// 外部服务用来报告进度的发布句柄
    pub fn publisher(&self) -> BatchEventPublisher {
        BatchEventPublisher::new(self.events.clone())
    }

    /// 处理所有符合条件的题目组
    pub async fn start(&self) -> AppResult<BatchReport> {
        self.running
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .map_err(|_| AppError::BatchBusy)?;
        let _guard = RunningGuard(&self.running);
        self.stop_requested.store(false, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);

        let mut rx = self.events.subscribe();
        let mut queue: VecDeque<GroupId> = self
            .store
            .groups()
            .into_iter()
            .filter(Self::is_eligible)
            .map(|g| g.id)
            .collect();

        let mut report = BatchReport {
            total: queue.len(),
            ..Default::default()
        };

        if queue.is_empty() {
            info!("📭 没有需要处理的题目组");
            self.publisher().publish(BatchEvent::NothingToProcess);
            self.finish(&report);
            return Ok(report);
        }

        info!("{}", "=".repeat(60));
        info!("📦 批处理开始: 共 {} 个题目组", report.total);
        info!("{}", "=".repeat(60));

        while let Some(id) = queue.pop_front() {
            if !self.wait_while_paused().await.1 {
                report.stopped = true;
                break;
            }

            self.set_job(Some(BatchJob {
                group_id: id,
                context_id: None,
                pending_slots: BTreeSet::new(),
                processed: report.processed,
                total: report.total,
            }));
            drain(&mut rx);

            match self.process_group(id, &mut rx).await {
                Ok(GroupOutcome::Ready) => {
                    report.processed += 1;
                    report.order.push(id);
                }
                Ok(GroupOutcome::Skipped) => {
                    debug!("[批处理 {}] 题目组已不存在或已完成，跳过", id);
                }
                Ok(GroupOutcome::Stopped) => {
                    report.stopped = true;
                    break;
                }
                Err(e) => {
                    error!("[批处理 {}] ❌ 处理失败: {}", id, e);
                    self.status
                        .on_status(SCOPE, &format!("❌ {} 处理失败: {}", id, e));
                    report.processed += 1;
                    report.order.push(id);
                }
            }

            if self.stop_requested.load(Ordering::SeqCst) {
                report.stopped = !queue.is_empty();
                break;
            }
        }

        drop(rx);
        self.finish(&report);
        Ok(report)
    }

    /// 在组与组之间、或补图等待的检查点暂停
    pub fn pause(&self) {
        if self.running.load(Ordering::SeqCst) {
            self.paused.store(true, Ordering::SeqCst);
            self.status.on_status(SCOPE, "⏸️ 已暂停");
        }
    }

    pub fn resume(&self) {
        if self.paused.swap(false, Ordering::SeqCst) {
            self.status.on_status(SCOPE, "▶️ 继续处理");
            self.control.notify_one();
        }
    }

    /// 停止：当前等待在下一个检查点结束，之后不再处理新的组
    pub fn stop(&self) {
        self.stop_requested.store(true, Ordering::SeqCst);
        self.paused.store(false, Ordering::SeqCst);
        self.control.notify_one();
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// 当前任务快照
    pub fn current_job(&self) -> Option<BatchJob> {
        self.lock_job().clone()
    }

    // ========== 内部 ==========

    /// 只接收已审核提交的机器组；草稿仍归扫描控制器所有
    fn is_eligible(group: &RegionGroup) -> bool {
        group.is_machine() && group.status == GroupStatus::Verified
    }

    async fn process_group(
        &self,
        id: GroupId,
        rx: &mut broadcast::Receiver<BatchEvent>,
    ) -> AppResult<GroupOutcome> {
        // 处理期间可能被用户删除或手动完成
        let group = match self.store.get(id) {
            Some(group) if group.status < GroupStatus::Ready => group,
            _ => return Ok(GroupOutcome::Skipped),
        };

        info!("[批处理 {}] 🔄 开始处理 {}", id, group.label);
        let context_id = self.submitter.open_context(&group).await?;
        self.update_job(|job| job.context_id = Some(context_id.clone()));

        let submit = {
            let submitter = Arc::clone(&self.submitter);
            let (ctx, group, events) = (context_id.clone(), group.clone(), self.publisher());
            tokio::spawn(async move { submitter.submit(ctx, group, events).await })
        };

        let fill = FillRequest::for_group(context_id.clone(), &group).map(|request| {
            let filler = Arc::clone(&self.filler);
            let events = self.publisher();
            tokio::spawn(async move {
                if let Err(e) = filler.fill(request, events).await {
                    warn!("补图服务调用失败: {:#}", e);
                }
            })
        });

        let waited = self.wait_for_slots(id, &context_id, submit, rx).await;
        if let Some(fill) = fill {
            // 等任务真正结束，避免迟到的补图事件落到下一个组
            fill.abort();
            let _ = fill.await;
        }

        match waited? {
            WaitOutcome::Stopped => return Ok(GroupOutcome::Stopped),
            WaitOutcome::TimedOut => {
                warn!("[批处理 {}] ⏱️ 等待补图超时，接受部分结果", id);
            }
            WaitOutcome::Filled => {}
        }

        if self.store.set_status(id, GroupStatus::Ready) {
            self.publisher().publish(BatchEvent::GroupReady {
                group_id: id,
                label: group.label.clone(),
            });
            self.status
                .on_status(SCOPE, &format!("✓ {} 已就绪", group.label));
            Ok(GroupOutcome::Ready)
        } else {
            Ok(GroupOutcome::Skipped)
        }
    }

    /// 等待补图位填满，或超时
    async fn wait_for_slots(
        &self,
        id: GroupId,
        context_id: &ContextId,
        submit: JoinHandle<anyhow::Result<()>>,
        rx: &mut broadcast::Receiver<BatchEvent>,
    ) -> AppResult<WaitOutcome> {
        let started = Instant::now();
        let mut deadline = started + self.config.grace_period + self.config.ceiling;
        let mut next_check = started + self.config.grace_period;
        let mut tracker = SlotTracker::default();
        let mut submit = Some(submit);

        let outcome = loop {
            if tracker.is_done() {
                break Ok(WaitOutcome::Filled);
            }

            tokio::select! {
                biased;

                _ = self.control.notified() => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break Ok(WaitOutcome::Stopped);
                    }
                }

                joined = async {
                    match submit.as_mut() {
                        Some(handle) => handle.await,
                        None => std::future::pending().await,
                    }
                } => {
                    submit = None;
                    match joined {
                        Ok(Ok(())) => {}
                        Ok(Err(e)) => break Err(AppError::Other(e.context("二次提交失败"))),
                        Err(e) => break Err(AppError::Other(anyhow!("二次提交任务异常: {}", e))),
                    }
                }

                event = rx.recv() => match event {
                    Ok(BatchEvent::SlotFilled { slot_id }) => {
                        debug!("[批处理 {}] 补图位已填: {}", id, slot_id.as_str());
                        tracker.on_filled(slot_id);
                        self.update_job(|job| job.pending_slots = tracker.snapshot());
                    }
                    Ok(BatchEvent::ProcessingComplete { context_id: ctx, has_pending_slots, slot_ids })
                        if &ctx == context_id =>
                    {
                        debug!("[批处理 {}] 二次提交完成，声明 {} 个补图位", id, slot_ids.len());
                        tracker.on_declared(has_pending_slots, slot_ids);
                        self.update_job(|job| job.pending_slots = tracker.snapshot());
                    }
                    Ok(_) => {}
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        warn!("[批处理 {}] 事件积压，丢失 {} 条", id, n);
                    }
                    Err(broadcast::error::RecvError::Closed) => {
                        // 发送端由队列持有，不会关闭
                    }
                },

                _ = sleep_until(next_check.min(deadline)) => {
                    if self.stop_requested.load(Ordering::SeqCst) {
                        break Ok(WaitOutcome::Stopped);
                    }
                    let (paused_for, keep_going) = self.wait_while_paused().await;
                    if !keep_going {
                        break Ok(WaitOutcome::Stopped);
                    }
                    deadline += paused_for;

                    let now = Instant::now();
                    if tracker.is_done() {
                        break Ok(WaitOutcome::Filled);
                    }
                    if now >= deadline {
                        break Ok(WaitOutcome::TimedOut);
                    }
                    next_check = now + self.config.poll_interval;
                }
            }
        };

        if let Some(handle) = submit {
            handle.abort();
            let _ = handle.await;
        }
        outcome
    }

    /// 暂停期间阻塞，返回暂停时长；收到停止请求时第二项为 `false`
    async fn wait_while_paused(&self) -> (Duration, bool) {
        let started = Instant::now();
        while self.paused.load(Ordering::SeqCst) {
            if self.stop_requested.load(Ordering::SeqCst) {
                break;
            }
            tokio::select! {
                _ = self.control.notified() => {}
                _ = tokio::time::sleep(self.config.poll_interval) => {}
            }
        }
        (started.elapsed(), !self.stop_requested.load(Ordering::SeqCst))
    }

    fn finish(&self, report: &BatchReport) {
        self.set_job(None);
        self.publisher().publish(BatchEvent::BatchFinished {
            processed_count: report.processed,
            total_count: report.total,
        });
        self.ui_lock.release();
        self.status.on_status(
            SCOPE,
            &format!(
                "完成 {}/{}{}",
                report.processed,
                report.total,
                if report.stopped { "，已停止" } else { "" }
            ),
        );
    }

    fn lock_job(&self) -> MutexGuard<'_, Option<BatchJob>> {
        self.job.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn set_job(&self, job: Option<BatchJob>) {
        *self.lock_job() = job;
    }

    fn update_job(&self, f: impl FnOnce(&mut BatchJob)) {
        if let Some(job) = self.lock_job().as_mut() {
            f(job);
        }
    }
}

/// 丢弃上一个组残留的事件
fn drain(rx: &mut broadcast::Receiver<BatchEvent>) {
    loop {
        match rx.try_recv() {
            Ok(_) | Err(broadcast::error::TryRecvError::Lagged(_)) => continue,
            Err(_) => break,
        }
    }
}
