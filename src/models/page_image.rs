use std::fmt;
use std::sync::Arc;

use base64::{engine::general_purpose, Engine};

/// 渲染后的页面图片（不透明句柄）
///
/// 字节内容用 `Arc` 共享，缓存到扫描状态里时不会复制。
#[derive(Clone, PartialEq, Eq)]
pub struct PageImage {
    pub page: u32,
    pub width: u32,
    pub height: u32,
    pub mime: String,
    pub bytes: Arc<[u8]>,
}

impl PageImage {
    pub fn new(page: u32, width: u32, height: u32, mime: impl Into<String>, bytes: Vec<u8>) -> Self {
        Self {
            page,
            width,
            height,
            mime: mime.into(),
            bytes: bytes.into(),
        }
    }

    /// 转成 data URL，供视觉模型使用
    pub fn to_data_url(&self) -> String {
        format!(
            "data:{};base64,{}",
            self.mime,
            general_purpose::STANDARD.encode(&self.bytes)
        )
    }
}

impl fmt::Debug for PageImage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PageImage")
            .field("page", &self.page)
            .field("width", &self.width)
            .field("height", &self.height)
            .field("mime", &self.mime)
            .field("bytes", &self.bytes.len())
            .finish()
    }
}
