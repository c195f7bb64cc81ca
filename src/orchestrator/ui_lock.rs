//! 界面锁
//!
//! 扫描开始时加锁，批处理队列结束时解锁（或扫描被停止时由扫描控制器解锁）。

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use tokio::sync::Notify;

#[derive(Clone, Debug, Default)]
pub struct UiLock {
    locked: Arc<AtomicBool>,
    released: Arc<Notify>,
}

impl UiLock {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn acquire(&self) {
        self.locked.store(true, Ordering::SeqCst);
    }

    pub fn release(&self) {
        if self.locked.swap(false, Ordering::SeqCst) {
            self.released.notify_waiters();
        }
    }

    pub fn is_locked(&self) -> bool {
        self.locked.load(Ordering::SeqCst)
    }

    /// 等待解锁
    pub async fn wait_released(&self) {
        loop {
            let notified = self.released.notified();
            if !self.is_locked() {
                return;
            }
            notified.await;
        }
    }
}
