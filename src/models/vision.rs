//! 视觉服务的数据结构
//!
//! 字段名与模型返回的 JSON 保持一致（camelCase）

use serde::{Deserialize, Serialize};

use crate::models::group::{Fragment, GroupKind};
use crate::models::page_image::PageImage;
use crate::models::region::{NormalizedBox, Region};

/// 默认坐标系名称
pub const NORMALIZED_1000: &str = "normalized-1000";

/// 提取（或修正）结果
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractionResult {
    #[serde(default = "default_coordinate_system")]
    pub coordinate_system: String,
    #[serde(default)]
    pub regions: Vec<ExtractedRegion>,
}

fn default_coordinate_system() -> String {
    NORMALIZED_1000.to_string()
}

impl ExtractionResult {
    pub fn new(regions: Vec<ExtractedRegion>) -> Self {
        Self {
            coordinate_system: default_coordinate_system(),
            regions,
        }
    }

    pub fn is_empty(&self) -> bool {
        self.regions.is_empty()
    }
}

/// 模型返回的单个区域
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExtractedRegion {
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub correlation_id: Option<String>,
    #[serde(default)]
    pub kind: GroupKind,
    /// `[ymin, xmin, ymax, xmax]`，范围 0–1000
    #[serde(rename = "box")]
    pub bbox: [i64; 4],
    #[serde(default)]
    pub confidence: Option<f64>,
}

impl ExtractedRegion {
    /// 转换为落在指定页面上的片段
    pub fn to_fragment(&self, image: &PageImage) -> Fragment {
        let normalized = NormalizedBox::from_raw(self.bbox);
        Fragment {
            correlation_id: self.correlation_id.clone(),
            kind: self.kind,
            region: Region::new(image.page, normalized, image.width, image.height),
        }
    }
}

/// 审核结论
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AuditVerdict {
    pub ok: bool,
    #[serde(default)]
    pub feedback: Option<String>,
}

impl AuditVerdict {
    pub fn approved() -> Self {
        Self {
            ok: true,
            feedback: None,
        }
    }

    pub fn rejected(feedback: impl Into<String>) -> Self {
        Self {
            ok: false,
            feedback: Some(feedback.into()),
        }
    }
}
