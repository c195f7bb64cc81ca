//! 应用入口 - 编排层
//!
//! 负责装配：创建共享的 `RegionStore`、各个外部服务和两个控制器，
//! 然后按"先扫描、再批处理"的顺序运行。

use std::sync::Arc;

use anyhow::Result;
use tracing::{info, warn};

use crate::config::Config;
use crate::orchestrator::{BatchQueue, ScanController, ScanOptions, UiLock};
use crate::services::{
    DirectoryRenderer, FileStatusSink, HttpImageFillService, LlmVisionService, LocalSubmitter,
    StatusSink,
};
use crate::store::RegionStore;
use crate::utils::logging::{init_log_file, log_scan_complete, log_startup, print_final_stats};

/// 应用主结构
pub struct App {
    config: Config,
    store: RegionStore,
    scan: Arc<ScanController>,
    batch: Arc<BatchQueue>,
}

impl App {
    /// 初始化应用
    pub async fn initialize(config: Config) -> Result<Self> {
        init_log_file(&config.output_log_file)?;
        log_startup(&config);

        let store = RegionStore::new();
        let ui_lock = UiLock::new();
        let status: Arc<dyn StatusSink> =
            Arc::new(FileStatusSink::new(config.output_log_file.clone()));

        let scan = ScanController::new(
            store.clone(),
            Arc::new(LlmVisionService::new(&config)?),
            Arc::new(DirectoryRenderer::new(&config.page_image_folder)),
            Arc::clone(&status),
            config.scan_config(),
            ui_lock.clone(),
        );
        let batch = BatchQueue::new(
            store.clone(),
            Arc::new(LocalSubmitter::new()),
            Arc::new(HttpImageFillService::new(config.image_fill_endpoint.clone())),
            status,
            config.batch_config(),
            ui_lock,
        );

        Ok(Self {
            config,
            store,
            scan: Arc::new(scan),
            batch: Arc::new(batch),
        })
    }

    /// 运行应用主逻辑
    pub async fn run(&self) -> Result<()> {
        let ctrl_c = {
            let (scan, batch) = (Arc::clone(&self.scan), Arc::clone(&self.batch));
            tokio::spawn(async move {
                if tokio::signal::ctrl_c().await.is_ok() {
                    warn!("⏹️ 收到 Ctrl-C，正在停止...");
                    scan.stop();
                    batch.stop();
                }
            })
        };

        let summary = self
            .scan
            .start(ScanOptions {
                start_page: self.config.start_page,
                resume: self.config.resume,
                keep_ui_locked: true,
            })
            .await?;
        log_scan_complete(summary.completed, summary.empty, summary.failed, summary.stopped);

        if summary.stopped {
            ctrl_c.abort();
            return Ok(());
        }

        info!("📋 共 {} 个题目组", self.store.len());
        let report = self.batch.start().await?;
        ctrl_c.abort();

        print_final_stats(report.processed, report.total, &self.config.output_log_file);
        Ok(())
    }

    pub fn store(&self) -> &RegionStore {
        &self.store
    }

    pub fn scan_controller(&self) -> &Arc<ScanController> {
        &self.scan
    }

    pub fn batch_queue(&self) -> &Arc<BatchQueue> {
        &self.batch
    }
}
