//! 页面渲染 - 业务能力层
//!
//! 把页码变成一张图片。真正的栅格化在外部完成，这里只读取结果。

use std::io::Cursor;
use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use async_trait::async_trait;
use image::ImageReader;
use tokio::fs;
use tracing::debug;

use crate::models::PageImage;

/// 页面渲染接口
#[async_trait]
pub trait PageRenderer: Send + Sync {
    /// 文档总页数
    async fn page_count(&self) -> Result<u32>;

    /// 渲染指定页（从 1 开始）
    async fn render_page(&self, page: u32) -> Result<PageImage>;
}

/// 从目录读取预先渲染好的页面图片
///
/// 目录中的 png / jpg 文件按文件名排序，第 N 个文件就是第 N 页。
pub struct DirectoryRenderer {
    folder: PathBuf,
}

impl DirectoryRenderer {
    pub fn new(folder: impl Into<PathBuf>) -> Self {
        Self {
            folder: folder.into(),
        }
    }

    async fn page_files(&self) -> Result<Vec<PathBuf>> {
        if !self.folder.exists() {
            anyhow::bail!("文件夹不存在: {}", self.folder.display());
        }

        let mut files = Vec::new();
        let mut entries = fs::read_dir(&self.folder)
            .await
            .with_context(|| format!("无法读取文件夹: {}", self.folder.display()))?;

        while let Some(entry) = entries.next_entry().await? {
            let path = entry.path();
            if mime_for(&path).is_some() {
                files.push(path);
            }
        }
        files.sort();
        Ok(files)
    }
}

fn mime_for(path: &Path) -> Option<&'static str> {
    let ext = path.extension()?.to_str()?.to_ascii_lowercase();
    match ext.as_str() {
        "png" => Some("image/png"),
        "jpg" | "jpeg" => Some("image/jpeg"),
        _ => None,
    }
}

#[async_trait]
impl PageRenderer for DirectoryRenderer {
    async fn page_count(&self) -> Result<u32> {
        let count = self.page_files().await?.len();
        Ok(u32::try_from(count)?)
    }

    async fn render_page(&self, page: u32) -> Result<PageImage> {
        let files = self.page_files().await?;
        let index = usize::try_from(page.saturating_sub(1))?;
        let path = files
            .get(index)
            .filter(|_| page >= 1)
            .with_context(|| format!("第 {} 页不存在（共 {} 页）", page, files.len()))?;

        let bytes = fs::read(path)
            .await
            .with_context(|| format!("无法读取页面图片: {}", path.display()))?;
        let (width, height) = ImageReader::new(Cursor::new(&bytes))
            .with_guessed_format()?
            .into_dimensions()
            .with_context(|| format!("无法识别图片尺寸: {}", path.display()))?;
        let mime = mime_for(path).unwrap_or("image/png");

        debug!("渲染第 {} 页: {} ({}x{})", page, path.display(), width, height);
        Ok(PageImage::new(page, width, height, mime, bytes))
    }
}
