//! 日志工具模块
//!
//! 提供日志初始化、格式化和输出的辅助函数

use anyhow::Result;
use std::fs;
use tracing::info;
use tracing_subscriber::EnvFilter;

use crate::config::Config;

/// 初始化 tracing 日志
///
/// 默认级别为 `info`（`verbose` 时为 `debug`），可以通过 `RUST_LOG` 覆盖。重复调用是安全的。
pub fn init(verbose: bool) {
    let default_level = if verbose { "debug" } else { "info" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

/// 初始化日志文件
///
/// # 参数
/// - `log_file_path`: 日志文件路径
pub fn init_log_file(log_file_path: &str) -> Result<()> {
    let log_header = format!(
        "{}\n题目区域扫描日志 - {}\n{}\n\n",
        "=".repeat(60),
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S"),
        "=".repeat(60)
    );
    fs::write(log_file_path, log_header)?;
    Ok(())
}

/// 记录程序启动信息
pub fn log_startup(config: &Config) {
    info!("{}", "=".repeat(60));
    info!("🚀 程序启动 - 题目区域扫描模式");
    info!("📁 页面目录: {}", config.page_image_folder);
    info!("🤖 模型: {}", config.llm_model_name);
    if config.resume {
        info!("⏯️ 将从上次中断处继续");
    }
    info!("{}", "=".repeat(60));
}

/// 记录扫描阶段结束信息
///
/// # 参数
/// - `completed`: 完成的页数
/// - `empty`: 没有题目的页数
/// - `failed`: 失败的页数
/// - `stopped`: 是否被手动停止
pub fn log_scan_complete(completed: usize, empty: usize, failed: usize, stopped: bool) {
    info!("\n{}", "─".repeat(60));
    if stopped {
        info!("⏹️ 扫描已停止");
    } else {
        info!("✓ 扫描完成");
    }
    info!("📄 完成 {} 页 (空白 {} 页), 失败 {} 页", completed, empty, failed);
    info!("{}", "─".repeat(60));
}

/// 打印最终统计信息
///
/// # 参数
/// - `processed`: 批处理完成数量
/// - `total`: 批处理总数
/// - `log_file_path`: 日志文件路径
pub fn print_final_stats(processed: usize, total: usize, log_file_path: &str) {
    info!("\n{}", "=".repeat(60));
    info!("📊 全部处理完成统计");
    info!(
        "完成时间: {}",
        chrono::Local::now().format("%Y-%m-%d %H:%M:%S")
    );
    info!("{}", "=".repeat(60));
    info!("✅ 批处理: {}/{}", processed, total);
    info!("{}", "=".repeat(60));
    info!("\n日志已保存至: {}", log_file_path);
}

/// 截断长文本用于日志显示
///
/// # 参数
/// - `text`: 原始文本
/// - `max_len`: 最大长度
///
/// # 返回
/// 返回截断后的文本
pub fn truncate_text(text: &str, max_len: usize) -> String {
    if text.chars().count() > max_len {
        text.chars().take(max_len).collect::<String>() + "..."
    } else {
        text.to_string()
    }
}
