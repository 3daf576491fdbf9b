//! VLM Adapter (component C): calls an external vision-language model to
//! identify dimension strings semantically. Locations it reports are
//! approximate (percent-of-page) and noisy; only the OCR Adapter's boxes are
//! trusted for final placement (see [`crate::fusion`]).

use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;

use crate::entities::{GridOverride, VlmDimension};
use crate::error::ErrorKind;

/// The five grouping rules a VLM must follow when reading dimensions off a
/// drawing: treat a compound callout as one atom, keep mixed fractions
/// whole, keep a tolerance stack with its nominal, do not report a bare
/// modifier with nothing to modify, and do not emit a second entry for the
/// same text at the same location.
pub const SYSTEM_PROMPT: &str = r#"You are reading dimensions off an engineering or manufacturing drawing.
Report every dimension string exactly as printed, each as one JSON object with
"value" (the text), "x_percent" and "y_percent" (its approximate location as
percentages of page width/height), and "confidence" (0.0-1.0).

Rules:
1. A compound callout (e.g. "4X R.125 TYP") is one dimension, not several.
2. A mixed fraction (e.g. "1 3/4") is one dimension, never split across the
   whole number and the fraction.
3. A tolerance stack (e.g. "2.500 +.005/-.002") stays attached to its
   nominal value as a single dimension.
4. Never report a bare modifier ("TYP", "REF", "4X") with nothing attached.
5. Never report the same dimension text twice for the same on-page location.

Respond with strict JSON: {"dimensions": [{"value": "...", "x_percent": 0.0,
"y_percent": 0.0, "confidence": 0.0}, ...]}. No prose, no markdown fences."#;

#[async_trait]
pub trait VlmProvider: Send + Sync {
    /// Identifies dimension strings and their approximate locations.
    async fn identify_dimensions(&self, png_bytes: &[u8]) -> Result<Vec<VlmDimension>, ErrorKind>;

    /// Optional collaborator: detect the drawing's actual grid labels, if
    /// any. Default implementation reports none, so providers that don't
    /// support it don't need to override anything.
    async fn detect_grid(&self, _png_bytes: &[u8]) -> Option<GridOverride> {
        None
    }
}

pub struct HttpVlmProvider {
    client: reqwest::Client,
    endpoint: String,
    api_key: String,
    timeout: Duration,
}

impl HttpVlmProvider {
    pub fn new(endpoint: impl Into<String>, api_key: impl Into<String>, timeout: Duration) -> Self {
        Self {
            client: reqwest::Client::new(),
            endpoint: endpoint.into(),
            api_key: api_key.into(),
            timeout,
        }
    }

    fn image_part(png_bytes: &[u8]) -> serde_json::Value {
        serde_json::json!({
            "inline_data": {
                "mime_type": "image/png",
                "data": base64::Engine::encode(&base64::engine::general_purpose::STANDARD, png_bytes),
            }
        })
    }
}

#[derive(Deserialize)]
struct DimensionsEnvelope {
    dimensions: Vec<VlmDimension>,
}

#[derive(Deserialize)]
struct GridEnvelope {
    has_grid: bool,
    #[serde(default)]
    columns: Vec<String>,
    #[serde(default)]
    rows: Vec<String>,
}

/// Strips a leading/trailing markdown code fence some VLMs wrap JSON in,
/// e.g. "```json\n{...}\n```".
fn strip_code_fence(text: &str) -> &str {
    let trimmed = text.trim();
    if let Some(rest) = trimmed.strip_prefix("```") {
        let rest = rest.strip_prefix("json").unwrap_or(rest);
        let rest = rest.trim_start_matches('\n');
        rest.strip_suffix("```").unwrap_or(rest).trim()
    } else {
        trimmed
    }
}

#[async_trait]
impl VlmProvider for HttpVlmProvider {
    #[tracing::instrument(skip_all)]
    async fn identify_dimensions(&self, png_bytes: &[u8]) -> Result<Vec<VlmDimension>, ErrorKind> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": SYSTEM_PROMPT },
                    Self::image_part(png_bytes),
                ]
            }],
            "generationConfig": {
                "temperature": 0.1,
                "maxOutputTokens": 4096,
                "responseMimeType": "application/json",
            }
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
        .map_err(|_| ErrorKind::VlmApiError("timed out".into()))?
        .map_err(ErrorKind::vlm)?;

        if !resp.status().is_success() {
            return Err(ErrorKind::VlmApiError(format!(
                "provider returned {}",
                resp.status()
            )));
        }

        let text = extract_text_response(resp.json().await.map_err(ErrorKind::parse)?)?;
        let cleaned = strip_code_fence(&text);
        let envelope: DimensionsEnvelope = serde_json::from_str(cleaned).map_err(ErrorKind::parse)?;
        Ok(envelope.dimensions)
    }

    async fn detect_grid(&self, png_bytes: &[u8]) -> Option<GridOverride> {
        let body = serde_json::json!({
            "contents": [{
                "parts": [
                    { "text": "Does this drawing have a zone/grid reference system on its border? Respond with strict JSON: {\"has_grid\": bool, \"columns\": [...], \"rows\": [...]}." },
                    Self::image_part(png_bytes),
                ]
            }],
            "generationConfig": { "temperature": 0.0, "responseMimeType": "application/json" }
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
        .ok()?
        .ok()?;

        if !resp.status().is_success() {
            return None;
        }

        let value: serde_json::Value = resp.json().await.ok()?;
        let text = extract_text_response(value).ok()?;
        let cleaned = strip_code_fence(&text);
        let grid: GridEnvelope = serde_json::from_str(cleaned).ok()?;
        if !grid.has_grid || grid.columns.is_empty() || grid.rows.is_empty() {
            return None;
        }
        Some(GridOverride {
            columns: grid.columns,
            rows: grid.rows,
        })
    }
}

fn extract_text_response(value: serde_json::Value) -> Result<String, ErrorKind> {
    value
        .pointer("/candidates/0/content/parts/0/text")
        .and_then(|v| v.as_str())
        .map(|s| s.to_string())
        .ok_or_else(|| ErrorKind::ParseError("no text in provider response".into()))
}

#[cfg(test)]
pub mod tests {
    use super::*;

    #[derive(Default)]
    pub struct FixtureVlmProvider {
        pub dimensions: Vec<VlmDimension>,
        pub grid: Option<GridOverride>,
    }

    #[async_trait]
    impl VlmProvider for FixtureVlmProvider {
        async fn identify_dimensions(&self, _png_bytes: &[u8]) -> Result<Vec<VlmDimension>, ErrorKind> {
            Ok(self.dimensions.clone())
        }

        async fn detect_grid(&self, _png_bytes: &[u8]) -> Option<GridOverride> {
            self.grid.clone()
        }
    }

    #[test]
    fn strips_json_code_fence() {
        let wrapped = "```json\n{\"dimensions\": []}\n```";
        assert_eq!(strip_code_fence(wrapped), "{\"dimensions\": []}");
    }

    #[test]
    fn passes_through_bare_json() {
        let bare = "{\"dimensions\": []}";
        assert_eq!(strip_code_fence(bare), bare);
    }
}
