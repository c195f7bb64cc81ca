//! 编排层（Orchestration Layer）
//!
//! ## 职责
//!
//! 本层负责整份文档的扫描调度和扫描之后的批处理，是整个系统的"指挥中心"。
//!
//! ## 模块划分
//!
//! ### `scan_controller` - 扫描控制器
//! - 按页码升序遍历整份文档
//! - 单飞、暂停（页边界生效）、停止（立即取消）
//! - 断点续扫、单页失败不影响后续页
//!
//! ### `batch_queue` - 批处理队列
//! - 按快照顺序逐个处理机器生成的题目组
//! - 二次提交 + 补图，等待补图位填满或超时
//! - 拥有批处理事件通道
//!
//! ### `ui_lock` - 界面锁
//!
//! ### `app` - 应用装配
//!
//! ## 层次关系
//!
//! ```text
//! App
//!  ├─ ScanController (处理所有页)
//!  │     ↓
//!  │  workflow::PageFlow (处理单页)
//!  │     ↓
//!  │  services (能力层：vision / renderer / status)
//!  │
//!  └─ BatchQueue (处理所有题目组)
//!        ↓
//!     services (能力层：submitter / image_fill)
//!
//! 两者共享的只有 store::RegionStore
//! ```
//!
//! ## 设计原则
//!
//! 1. **单一职责**：scan_controller 管页，batch_queue 管组
//! 2. **向下依赖**：编排层 → workflow → services → infrastructure
//! 3. **无业务逻辑**：只做调度和统计，不做具体业务判断

use std::sync::atomic::{AtomicBool, Ordering};

pub mod app;
pub mod batch_queue;
pub mod scan_controller;
pub mod ui_lock;

// 重新导出主要类型
pub use app::App;
pub use batch_queue::{BatchJob, BatchQueue, BatchReport};
pub use scan_controller::{ScanController, ScanOptions, ScanSummary};
pub use ui_lock::UiLock;

/// 运行标志的守卫，离开作用域时自动复位
pub(crate) struct RunningGuard<'a>(pub(crate) &'a AtomicBool);

impl Drop for RunningGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
