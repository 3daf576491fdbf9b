//! OCR Adapter (component B): calls an external word-level OCR provider and
//! normalizes its response into [`OcrSpan`]s in the `[0, 1000]` frame.
//!
//! Bounding boxes from this source are trusted; text is not — callers should
//! expect individual words, not semantic tokens (grouping them into tokens
//! is [`crate::grouper`]'s job).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::entities::{BBox, OcrSpan};
use crate::error::ErrorKind;

const NORMALIZED_COORD_SYSTEM: f32 = 1000.0;
const DEFAULT_CONFIDENCE: f32 = 0.95;

#[async_trait]
pub trait OcrProvider: Send + Sync {
    /// Detects word-level text spans in a rasterized page.
    async fn detect_text(
        &self,
        png_bytes: &[u8],
        width_px: u32,
        height_px: u32,
    ) -> Result<Vec<OcrSpan>, ErrorKind>;
}

/// A provider speaking a Google-Cloud-Vision-shaped `images:annotate`
/// contract: POST a base64 image, get back per-word polygons.
pub struct HttpOcrProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpOcrProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        }
    }
}

#[derive(Deserialize)]
struct AnnotateResponse {
    responses: Vec<AnnotateResult>,
}

#[derive(Deserialize)]
struct AnnotateResult {
    #[serde(rename = "textAnnotations", default)]
    text_annotations: Vec<TextAnnotation>,
}

#[derive(Deserialize)]
struct TextAnnotation {
    description: String,
    #[serde(rename = "boundingPoly")]
    bounding_poly: BoundingPoly,
    #[serde(default)]
    confidence: Option<f32>,
}

#[derive(Deserialize)]
struct BoundingPoly {
    vertices: Vec<Vertex>,
}

#[derive(Deserialize)]
struct Vertex {
    #[serde(default)]
    x: f32,
    #[serde(default)]
    y: f32,
}

#[async_trait]
impl OcrProvider for HttpOcrProvider {
    async fn detect_text(
        &self,
        png_bytes: &[u8],
        width_px: u32,
        height_px: u32,
    ) -> Result<Vec<OcrSpan>, ErrorKind> {
        let body = serde_json::json!({
            "requests": [{
                "image": { "content": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png_bytes) },
                "features": [
                    { "type": "TEXT_DETECTION" },
                    { "type": "DOCUMENT_TEXT_DETECTION" },
                ],
                "imageContext": { "languageHints": ["en"] },
            }]
        });

        let resp = tokio::time::timeout(
            self.timeout,
            self.client
                .post(&self.endpoint)
                .query(&[("key", &self.api_key)])
                .json(&body)
                .send(),
        )
        .await
        .map_err(|_| ErrorKind::OcrApiError("timed out".into()))?
        .map_err(ErrorKind::ocr)?;

        if !resp.status().is_success() {
            return Err(ErrorKind::OcrApiError(format!(
                "provider returned {}",
                resp.status()
            )));
        }

        let parsed: AnnotateResponse = resp.json().await.map_err(ErrorKind::parse)?;
        let annotations = parsed
            .responses
            .into_iter()
            .next()
            .map(|r| r.text_annotations)
            .unwrap_or_default();

        // The first annotation is Google's convention for the full-page text
        // block; word-level spans start at index 1.
        let spans = annotations
            .into_iter()
            .skip(1)
            .filter(|a| !a.description.trim().is_empty())
            .map(|a| TextAnnotation {
                description: a.description,
                bounding_poly: a.bounding_poly,
                confidence: a.confidence,
            })
            .map(|a| to_ocr_span(a, width_px, height_px))
            .collect();

        Ok(spans)
    }
}

fn to_ocr_span(annotation: TextAnnotation, width_px: u32, height_px: u32) -> OcrSpan {
    let xs: Vec<f32> = annotation.bounding_poly.vertices.iter().map(|v| v.x).collect();
    let ys: Vec<f32> = annotation.bounding_poly.vertices.iter().map(|v| v.y).collect();
    let xmin = xs.iter().cloned().fold(f32::INFINITY, f32::min);
    let xmax = xs.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    let ymin = ys.iter().cloned().fold(f32::INFINITY, f32::min);
    let ymax = ys.iter().cloned().fold(f32::NEG_INFINITY, f32::max);

    let normalize = |v: f32, dim: u32| -> i32 {
        ((v / dim.max(1) as f32) * NORMALIZED_COORD_SYSTEM)
            .round()
            .clamp(0.0, NORMALIZED_COORD_SYSTEM) as i32
    };

    OcrSpan {
        text: annotation.description,
        bbox: BBox::new(
            normalize(xmin, width_px),
            normalize(ymin, height_px),
            normalize(xmax, width_px),
            normalize(ymax, height_px),
        ),
        confidence: annotation.confidence.unwrap_or(DEFAULT_CONFIDENCE),
    }
}

#[cfg(test)]
pub mod tests {
    use super::*;

    /// Test double returning a fixed span list, for exercising the
    /// orchestrator/fusion without a network call.
    #[derive(Default)]
    pub struct FixtureOcrProvider {
        pub spans: Vec<OcrSpan>,
    }

    #[async_trait]
    impl OcrProvider for FixtureOcrProvider {
        async fn detect_text(
            &self,
            _png_bytes: &[u8],
            _width_px: u32,
            _height_px: u32,
        ) -> Result<Vec<OcrSpan>, ErrorKind> {
            Ok(self.spans.clone())
        }
    }

    #[test]
    fn vertex_normalization_clamps_to_frame() {
        let annotation = TextAnnotation {
            description: "2.50".into(),
            bounding_poly: BoundingPoly {
                vertices: vec![
                    Vertex { x: 0.0, y: 0.0 },
                    Vertex { x: 2000.0, y: 10.0 },
                    Vertex { x: 2000.0, y: 40.0 },
                    Vertex { x: 0.0, y: 40.0 },
                ],
            },
            confidence: None,
        };
        let span = to_ocr_span(annotation, 1000, 100);
        assert_eq!(span.bbox.xmax, 1000);
        assert_eq!(span.confidence, DEFAULT_CONFIDENCE);
    }
}
