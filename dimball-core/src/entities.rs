//! Data model shared by every pipeline component.
//!
//! Coordinates are normalized to the `[0, 1000]` integer frame used
//! throughout the pipeline (see [`BBox`]); this is the frame OCR and VLM
//! providers are expected to report in, and the frame zone labeling keys
//! off of. No type here is mutated after the component that produced it
//! returns — downstream components only ever read.

use serde::{Deserialize, Serialize};

pub type PageIndex = usize;
pub type DimensionId = usize;

/// Normalized axis-aligned box, `[0, 1000]` on both axes.
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq, Deserialize, Serialize)]
pub struct BBox {
    pub xmin: i32,
    pub ymin: i32,
    pub xmax: i32,
    pub ymax: i32,
}

impl BBox {
    pub fn new(xmin: i32, ymin: i32, xmax: i32, ymax: i32) -> Self {
        Self {
            xmin,
            ymin,
            xmax,
            ymax,
        }
    }

    #[inline(always)]
    pub fn width(&self) -> i32 {
        self.xmax - self.xmin
    }

    #[inline(always)]
    pub fn height(&self) -> i32 {
        self.ymax - self.ymin
    }

    #[inline(always)]
    pub fn area(&self) -> i64 {
        (self.width().max(0) as i64) * (self.height().max(0) as i64)
    }

    #[inline(always)]
    pub fn center(&self) -> (f32, f32) {
        (
            (self.xmin + self.xmax) as f32 / 2.0,
            (self.ymin + self.ymax) as f32 / 2.0,
        )
    }

    #[inline(always)]
    pub fn is_degenerate(&self) -> bool {
        self.width() <= 0 || self.height() <= 0
    }

    #[inline(always)]
    fn overlap_x(&self, other: &Self) -> i32 {
        (self.xmax.min(other.xmax) - self.xmin.max(other.xmin)).max(0)
    }

    #[inline(always)]
    fn overlap_y(&self, other: &Self) -> i32 {
        (self.ymax.min(other.ymax) - self.ymin.max(other.ymin)).max(0)
    }

    #[inline(always)]
    pub fn intersection_area(&self, other: &Self) -> i64 {
        self.overlap_x(other) as i64 * self.overlap_y(other) as i64
    }

    #[inline(always)]
    pub fn intersects(&self, other: &Self) -> bool {
        self.intersection_area(other) > 0
    }

    #[inline(always)]
    pub fn union_area(&self, other: &Self) -> i64 {
        self.area() + other.area() - self.intersection_area(other)
    }

    #[inline(always)]
    pub fn iou(&self, other: &Self) -> f32 {
        let union = self.union_area(other);
        if union == 0 {
            0.0
        } else {
            self.intersection_area(other) as f32 / union as f32
        }
    }

    /// Weighted squared center distance, used by the fusion matcher's
    /// `loc` score (see [`crate::fusion`]).
    #[inline(always)]
    pub fn distance_sq(&self, other: &Self, x_weight: f32, y_weight: f32) -> f32 {
        let (ax, ay) = self.center();
        let (bx, by) = other.center();
        (ax - bx).powi(2) * x_weight + (ay - by).powi(2) * y_weight
    }

    #[inline(always)]
    pub fn merge(&self, other: &Self) -> Self {
        Self {
            xmin: self.xmin.min(other.xmin),
            ymin: self.ymin.min(other.ymin),
            xmax: self.xmax.max(other.xmax),
            ymax: self.ymax.max(other.ymax),
        }
    }
}

/// A single rasterized page plus whatever vector text the decoder could
/// pull out of the source without running OCR.
#[derive(Debug, Clone)]
pub struct PageRaster {
    pub page: PageIndex,
    pub png_bytes: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub vector_text: Vec<VectorTextSpan>,
}

/// Vector text extracted directly from a PDF content stream, when present.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VectorTextSpan {
    pub text: String,
    pub bbox: BBox,
}

/// A word-level span reported by the OCR adapter, with an accurate bbox.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrSpan {
    pub text: String,
    pub bbox: BBox,
    pub confidence: f32,
}

/// A grouped token produced by the Token Grouper from one or more [`OcrSpan`]s.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OcrToken {
    pub text: String,
    pub bbox: BBox,
    pub confidence: f32,
    pub used: bool,
}

impl From<OcrSpan> for OcrToken {
    fn from(span: OcrSpan) -> Self {
        Self {
            text: span.text,
            bbox: span.bbox,
            confidence: span.confidence,
            used: false,
        }
    }
}

/// A dimension string identified by the VLM, with an approximate, noisy
/// location expressed as percentages of page width/height.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct VlmDimension {
    pub value: String,
    pub x_percent: f32,
    pub y_percent: f32,
    pub confidence: f32,
}

impl VlmDimension {
    /// Approximate bbox in the `[0, 1000]` frame, centered on the reported
    /// point. Only ever used as the `loc` anchor for matching, never as a
    /// dimension's final bbox (that always comes from OCR or is synthesized,
    /// see [`crate::fusion`]).
    pub fn anchor(&self) -> (f32, f32) {
        (self.x_percent * 10.0, self.y_percent * 10.0)
    }
}

/// Optional grid override reported by a grid-detection collaborator
/// (see [`crate::vlm::VlmProvider::detect_grid`]).
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct GridOverride {
    pub columns: Vec<String>,
    pub rows: Vec<String>,
}

/// A fused, finalized dimension, assigned its global id and zone label by
/// the Page Assembler.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Dimension {
    pub id: DimensionId,
    pub page: PageIndex,
    pub value: String,
    #[serde(rename = "bounding_box")]
    pub bbox: BBox,
    pub zone: String,
    pub confidence: f32,
}

/// Per-page output: the raster the dimensions were found on, plus the
/// dimensions themselves.
#[derive(Debug, Clone, Serialize)]
pub struct PageAssembly {
    pub page: PageIndex,
    #[serde(skip_serializing)]
    pub png_bytes: Vec<u8>,
    pub width_px: u32,
    pub height_px: u32,
    pub grid_detected: bool,
    pub dimensions: Vec<Dimension>,
}

/// Final pipeline output.
#[derive(Debug, Clone, Serialize)]
pub struct Assembly {
    pub total_pages: usize,
    pub pages: Vec<PageAssembly>,
    pub all_dimensions: Vec<Dimension>,
    pub warnings: Vec<crate::error::PageWarning>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn area_and_center() {
        let b = BBox::new(0, 0, 100, 50);
        assert_eq!(b.width(), 100);
        assert_eq!(b.height(), 50);
        assert_eq!(b.area(), 5000);
        assert_eq!(b.center(), (50.0, 25.0));
    }

    #[test]
    fn iou_of_identical_boxes_is_one() {
        let a = BBox::new(10, 10, 110, 60);
        assert!((a.iou(&a) - 1.0).abs() < 1e-6);
    }

    #[test]
    fn disjoint_boxes_have_zero_intersection() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(20, 20, 30, 30);
        assert_eq!(a.intersection_area(&b), 0);
        assert!(!a.intersects(&b));
        assert_eq!(a.iou(&b), 0.0);
    }

    #[test]
    fn merge_is_the_bounding_union() {
        let a = BBox::new(0, 0, 10, 10);
        let b = BBox::new(5, 5, 20, 8);
        let m = a.merge(&b);
        assert_eq!(m, BBox::new(0, 0, 20, 10));
    }

    #[test]
    fn degenerate_box_detected() {
        assert!(BBox::new(5, 5, 5, 10).is_degenerate());
        assert!(!BBox::new(5, 5, 6, 10).is_degenerate());
    }
}
