//! # Question Region Scan
//!
//! 逐页扫描试卷图片，找出每道题所在的区域，并在扫描之后逐个完成补图
//!
//! ## 架构设计
//!
//! 本系统采用严格的四层架构：
//!
//! ### ① 基础设施层（Infrastructure）
//! - `infrastructure/` - 与业务无关的底层能力
//! - `CancelToken` - 一次扫描共用的取消令牌
//! - `store/` - `RegionStore`，两个控制器唯一共享的状态
//!
//! ### ② 业务能力层（Services）
//! - `services/` - 描述"我能做什么"
//! - `VisionService` - 提取 / 审核 / 修正
//! - `PageRenderer` - 渲染页面
//! - `GroupSubmitter` / `ImageFillService` - 二次提交和补图
//! - `StatusSink` - 进度输出
//!
//! ### ③ 流程层（Workflow）
//! - `workflow/` - 定义"一页"的完整处理流程
//! - `ScanState` - 断点（页码 + 步骤 + 缓存）
//! - `PageFlow` - 流程编排（extraction → audit → correction）
//!
//! ### ④ 编排层（Orchestration）
//! - `orchestrator/scan_controller` - 扫描控制器，遍历所有页
//! - `orchestrator/batch_queue` - 批处理队列，逐个处理题目组
//!
//! ## 模块结构

pub mod config;
pub mod error;
pub mod events;
pub mod infrastructure;

pub mod models;
pub mod orchestrator;
pub mod services;
pub mod store;
pub mod utils;
pub mod workflow;

// 重新导出常用类型
pub use config::{BatchConfig, Config, ScanConfig};
pub use error::{AppError, AppResult};
pub use events::{BatchEvent, BatchEventPublisher, ContextId};
pub use infrastructure::CancelToken;
pub use models::{GroupId, GroupKind, GroupStatus, RegionGroup, SlotId};
pub use orchestrator::{App, BatchQueue, BatchReport, ScanController, ScanOptions, ScanSummary};
pub use store::RegionStore;
pub use workflow::{PageFlow, PageOutcome, ScanState, ScanStep};
