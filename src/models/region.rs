//! 页面区域（一个框）
//!
//! 同一个框同时保存两套坐标：
//! - 归一化坐标（0–1000），与视觉模型交互时使用
//! - 页面像素坐标，供下游使用

use serde::{Deserialize, Serialize};

/// 归一化坐标的上限
pub const NORMALIZED_MAX: u16 = 1000;

/// 归一化框，顺序与模型返回的 `[ymin, xmin, ymax, xmax]` 一致
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct NormalizedBox {
    pub ymin: u16,
    pub xmin: u16,
    pub ymax: u16,
    pub xmax: u16,
}

impl NormalizedBox {
    /// 从模型返回的原始数组构建，越界值会被截断，颠倒的边会被交换
    pub fn from_raw(raw: [i64; 4]) -> Self {
        let clamp = |v: i64| v.clamp(0, i64::from(NORMALIZED_MAX)) as u16;
        let (y1, x1, y2, x2) = (clamp(raw[0]), clamp(raw[1]), clamp(raw[2]), clamp(raw[3]));
        Self {
            ymin: y1.min(y2),
            xmin: x1.min(x2),
            ymax: y1.max(y2),
            xmax: x1.max(x2),
        }
    }

    pub fn to_raw(self) -> [i64; 4] {
        [
            i64::from(self.ymin),
            i64::from(self.xmin),
            i64::from(self.ymax),
            i64::from(self.xmax),
        ]
    }

    /// 两个框的外接框
    pub fn union(self, other: Self) -> Self {
        Self {
            ymin: self.ymin.min(other.ymin),
            xmin: self.xmin.min(other.xmin),
            ymax: self.ymax.max(other.ymax),
            xmax: self.xmax.max(other.xmax),
        }
    }

    /// 换算成页面像素坐标
    pub fn to_pixels(self, page_width: u32, page_height: u32) -> PixelRect {
        let scale = |v: u16, size: u32| -> u32 {
            (u64::from(v) * u64::from(size) / u64::from(NORMALIZED_MAX)) as u32
        };
        let x = scale(self.xmin, page_width);
        let y = scale(self.ymin, page_height);
        PixelRect {
            x,
            y,
            width: scale(self.xmax, page_width).saturating_sub(x),
            height: scale(self.ymax, page_height).saturating_sub(y),
        }
    }
}

/// 页面像素坐标
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PixelRect {
    pub x: u32,
    pub y: u32,
    pub width: u32,
    pub height: u32,
}

/// 锚定在某一页上的区域
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Region {
    /// 页码（从 1 开始）
    pub page: u32,
    pub normalized: NormalizedBox,
    pub pixels: PixelRect,
}

impl Region {
    /// 根据归一化框和页面尺寸创建区域
    pub fn new(page: u32, normalized: NormalizedBox, page_width: u32, page_height: u32) -> Self {
        Self {
            page,
            normalized,
            pixels: normalized.to_pixels(page_width, page_height),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_raw_clamps_and_orders() {
        let b = NormalizedBox::from_raw([900, -20, 100, 1200]);
        assert_eq!(
            b,
            NormalizedBox {
                ymin: 100,
                xmin: 0,
                ymax: 900,
                xmax: 1000
            }
        );
    }

    #[test]
    fn test_to_pixels_scales_each_axis() {
        let b = NormalizedBox::from_raw([100, 250, 500, 750]);
        let px = b.to_pixels(800, 2000);
        assert_eq!(
            px,
            PixelRect {
                x: 200,
                y: 200,
                width: 400,
                height: 800
            }
        );
    }

    #[test]
    fn test_union_covers_both() {
        let a = NormalizedBox::from_raw([100, 100, 200, 300]);
        let b = NormalizedBox::from_raw([150, 50, 400, 250]);
        assert_eq!(a.union(b).to_raw(), [100, 50, 400, 300]);
    }
}
