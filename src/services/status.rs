//! 状态输出 - 业务能力层
//!
//! 单向的进度通道：只报告，不参与控制

use std::fs::OpenOptions;
use std::io::Write;
use std::sync::Mutex;

use tracing::{info, warn};

/// 进度输出接口
pub trait StatusSink: Send + Sync {
    fn on_status(&self, scope: &str, message: &str);
}

/// 输出到 tracing 日志
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingStatusSink;

impl StatusSink for TracingStatusSink {
    fn on_status(&self, scope: &str, message: &str) {
        info!("[{}] {}", scope, message);
    }
}

/// 追加写入日志文件，同时输出到 tracing
///
/// 每行格式：`时间 | scope | message`
pub struct FileStatusSink {
    log_file_path: String,
    write_lock: Mutex<()>,
    console: TracingStatusSink,
}

impl FileStatusSink {
    pub fn new(log_file_path: impl Into<String>) -> Self {
        Self {
            log_file_path: log_file_path.into(),
            write_lock: Mutex::new(()),
            console: TracingStatusSink,
        }
    }

    fn append(&self, line: &str) -> std::io::Result<()> {
        let _guard = self.write_lock.lock().unwrap_or_else(|e| e.into_inner());
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.log_file_path)?;
        file.write_all(line.as_bytes())
    }
}

impl StatusSink for FileStatusSink {
    fn on_status(&self, scope: &str, message: &str) {
        self.console.on_status(scope, message);
        let line = format!(
            "{} | {} | {}\n",
            chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
            scope,
            message
        );
        if let Err(e) = self.append(&line) {
            warn!("写入日志文件失败 ({}): {}", self.log_file_path, e);
        }
    }
}
