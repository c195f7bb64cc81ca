//! 补图服务 - 业务能力层
//!
//! 给定一个题目组的外接区域，异步地为空的补图位找图。
//! 结果只通过事件报告；找不到图不算错误。

use anyhow::{Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value as JsonValue;
use tracing::{debug, info};

use crate::events::{BatchEventPublisher, ContextId};
use crate::models::{GroupId, NormalizedBox, PixelRect, RegionGroup, SlotId};

/// 补图请求
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct FillRequest {
    pub context_id: ContextId,
    pub group_id: GroupId,
    pub page: u32,
    pub bounds: NormalizedBox,
    pub pixels: PixelRect,
}

impl FillRequest {
    /// 以题目组第一页上的外接框构建请求；组里没有区域时返回 `None`
    pub fn for_group(context_id: ContextId, group: &RegionGroup) -> Option<Self> {
        let (page, bounds) = group.bounding_box()?;
        let pixels = group
            .regions
            .iter()
            .filter(|r| r.page == page)
            .map(|r| r.pixels)
            .reduce(|a, b| {
                let x = a.x.min(b.x);
                let y = a.y.min(b.y);
                PixelRect {
                    x,
                    y,
                    width: (a.x + a.width).max(b.x + b.width) - x,
                    height: (a.y + a.height).max(b.y + b.height) - y,
                }
            })?;
        Some(Self {
            context_id,
            group_id: group.id,
            page,
            bounds,
            pixels,
        })
    }
}

/// 补图服务接口
#[async_trait]
pub trait ImageFillService: Send + Sync {
    /// 尝试填充补图位，每填好一个就发布一次 `SlotFilled`
    async fn fill(&self, request: FillRequest, events: BatchEventPublisher) -> Result<()>;
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct FillResponse {
    #[serde(default)]
    filled_slots: Vec<JsonValue>,
}

/// 通过 HTTP 调用的补图服务
pub struct HttpImageFillService {
    client: reqwest::Client,
    endpoint: String,
}

impl HttpImageFillService {
    pub fn new(endpoint: impl Into<String>) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
        }
    }
}

#[async_trait]
impl ImageFillService for HttpImageFillService {
    async fn fill(&self, request: FillRequest, events: BatchEventPublisher) -> Result<()> {
        debug!("补图请求: {} -> {}", request.group_id, self.endpoint);

        let response: FillResponse = self
            .client
            .post(&self.endpoint)
            .json(&request)
            .send()
            .await
            .with_context(|| format!("补图请求失败: {}", self.endpoint))?
            .error_for_status()
            .with_context(|| format!("补图服务返回错误: {}", self.endpoint))?
            .json()
            .await
            .context("无法解析补图服务响应")?;

        let slots: Vec<SlotId> = response
            .filled_slots
            .iter()
            .filter_map(SlotId::from_json)
            .collect();
        info!("[批处理 {}] 补图服务填好 {} 个位置", request.group_id, slots.len());

        for slot in slots {
            events.slot_filled(slot);
        }
        Ok(())
    }
}
