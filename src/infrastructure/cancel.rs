//! 取消令牌 - 基础设施层
//!
//! 每次扫描运行持有一个令牌，沿着所有异步调用链传下去。
//! `cancel()` 之后，所有正在等待的调用立即以 `AppError::Cancelled` 返回。

use std::future::Future;
use std::sync::Arc;

use tokio::sync::watch;

use crate::error::{AppError, AppResult};

/// 可在任意等待点生效的取消令牌
///
/// 克隆得到的令牌共享同一个取消状态。
#[derive(Clone, Debug)]
pub struct CancelToken {
    state: Arc<watch::Sender<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        let (state, _) = watch::channel(false);
        Self {
            state: Arc::new(state),
        }
    }

    /// 取消；重复调用是安全的
    pub fn cancel(&self) {
        self.state.send_replace(true);
    }

    pub fn is_cancelled(&self) -> bool {
        *self.state.borrow()
    }

    /// 等待直到被取消
    pub async fn cancelled(&self) {
        let mut rx = self.state.subscribe();
        // 发送端由 self 持有，wait_for 不会因通道关闭而返回错误
        let _ = rx.wait_for(|cancelled| *cancelled).await;
    }

    /// 运行一个异步步骤；若期间被取消则立即返回 `AppError::Cancelled`
    pub async fn run<F>(&self, fut: F) -> AppResult<F::Output>
    where
        F: Future,
    {
        if self.is_cancelled() {
            return Err(AppError::Cancelled);
        }
        tokio::select! {
            biased;
            _ = self.cancelled() => Err(AppError::Cancelled),
            output = fut => Ok(output),
        }
    }

    /// 可被取消的等待
    pub async fn sleep(&self, duration: std::time::Duration) -> AppResult<()> {
        self.run(tokio::time::sleep(duration)).await
    }
}

impl Default for CancelToken {
    fn default() -> Self {
        Self::new()
    }
}
