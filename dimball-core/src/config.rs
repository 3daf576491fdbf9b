use std::sync::Arc;
use std::time::Duration;

use crate::error::ErrorKind;
use crate::ocr::OcrProvider;
use crate::vlm::VlmProvider;

/// Default grid columns, right-to-left, per drawing convention (leftmost
/// column is the highest letter).
pub const DEFAULT_GRID_COLUMNS: &[&str] = &["H", "G", "F", "E", "D", "C", "B", "A"];
/// Default grid rows, top-to-bottom, descending.
pub const DEFAULT_GRID_ROWS: &[&str] = &["4", "3", "2", "1"];

const MAX_PAGES_HARD_CAP: usize = 20;

/// Tunable knobs for a [`crate::orchestrator::Pipeline`] run.
///
/// Construct via [`PipelineConfig::builder`]; every setter clamps to a sane
/// range so a misconfigured caller degrades gracefully instead of producing
/// an unusable pipeline.
pub struct PipelineConfig {
    pub max_pages: usize,
    pub pdf_dpi: u32,
    pub page_concurrency: usize,
    pub ocr_timeout: Duration,
    pub vlm_timeout: Duration,
    pub max_dist: f32,
    pub grid_columns: Vec<String>,
    pub grid_rows: Vec<String>,
    pub ocr_provider: Arc<dyn OcrProvider>,
    pub vlm_provider: Arc<dyn VlmProvider>,
}

impl std::fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("max_pages", &self.max_pages)
            .field("pdf_dpi", &self.pdf_dpi)
            .field("page_concurrency", &self.page_concurrency)
            .field("ocr_timeout", &self.ocr_timeout)
            .field("vlm_timeout", &self.vlm_timeout)
            .field("max_dist", &self.max_dist)
            .field("grid_columns", &self.grid_columns)
            .field("grid_rows", &self.grid_rows)
            .finish_non_exhaustive()
    }
}

impl PipelineConfig {
    pub fn builder(
        ocr_provider: Arc<dyn OcrProvider>,
        vlm_provider: Arc<dyn VlmProvider>,
    ) -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            max_pages: 20,
            pdf_dpi: 200,
            page_concurrency: 4,
            ocr_timeout_secs: 60,
            vlm_timeout_secs: 120,
            max_dist: 150.0,
            grid_columns: None,
            grid_rows: None,
            ocr_provider,
            vlm_provider,
        }
    }
}

pub struct PipelineConfigBuilder {
    max_pages: usize,
    pdf_dpi: u32,
    page_concurrency: usize,
    ocr_timeout_secs: u64,
    vlm_timeout_secs: u64,
    max_dist: f32,
    grid_columns: Option<Vec<String>>,
    grid_rows: Option<Vec<String>>,
    ocr_provider: Arc<dyn OcrProvider>,
    vlm_provider: Arc<dyn VlmProvider>,
}

impl PipelineConfigBuilder {
    /// Caps the number of pages a single request will process. Clamped to
    /// `[1, 20]`; pages beyond this are simply not decoded.
    pub fn max_pages(mut self, n: usize) -> Self {
        self.max_pages = n.clamp(1, MAX_PAGES_HARD_CAP);
        self
    }

    /// Rasterization DPI for the File Decoder. Clamped to `[72, 600]`.
    pub fn pdf_dpi(mut self, dpi: u32) -> Self {
        self.pdf_dpi = dpi.clamp(72, 600);
        self
    }

    /// How many pages the orchestrator processes concurrently. Clamped to
    /// `[1, 16]`.
    pub fn page_concurrency(mut self, n: usize) -> Self {
        self.page_concurrency = n.clamp(1, 16);
        self
    }

    pub fn ocr_timeout_secs(mut self, secs: u64) -> Self {
        self.ocr_timeout_secs = secs.max(1);
        self
    }

    pub fn vlm_timeout_secs(mut self, secs: u64) -> Self {
        self.vlm_timeout_secs = secs.max(1);
        self
    }

    /// Maximum center-distance (in the `[0, 1000]` frame) the fusion matcher
    /// will consider for a candidate OCR/VLM pairing.
    pub fn max_dist(mut self, dist: f32) -> Self {
        self.max_dist = dist.max(0.0);
        self
    }

    pub fn grid_columns(mut self, columns: Vec<String>) -> Self {
        self.grid_columns = Some(columns);
        self
    }

    pub fn grid_rows(mut self, rows: Vec<String>) -> Self {
        self.grid_rows = Some(rows);
        self
    }

    pub fn build(self) -> Result<PipelineConfig, ErrorKind> {
        let grid_columns = self
            .grid_columns
            .unwrap_or_else(|| DEFAULT_GRID_COLUMNS.iter().map(|s| s.to_string()).collect());
        let grid_rows = self
            .grid_rows
            .unwrap_or_else(|| DEFAULT_GRID_ROWS.iter().map(|s| s.to_string()).collect());

        if grid_columns.is_empty() || grid_rows.is_empty() {
            return Err(ErrorKind::ProcessingError(
                "grid must have at least one column and one row".into(),
            ));
        }

        Ok(PipelineConfig {
            max_pages: self.max_pages,
            pdf_dpi: self.pdf_dpi,
            page_concurrency: self.page_concurrency,
            ocr_timeout: Duration::from_secs(self.ocr_timeout_secs),
            vlm_timeout: Duration::from_secs(self.vlm_timeout_secs),
            max_dist: self.max_dist,
            grid_columns,
            grid_rows,
            ocr_provider: self.ocr_provider,
            vlm_provider: self.vlm_provider,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ocr::tests::FixtureOcrProvider;
    use crate::vlm::tests::FixtureVlmProvider;

    #[test]
    fn defaults_match_spec() {
        let cfg = PipelineConfig::builder(
            Arc::new(FixtureOcrProvider::default()),
            Arc::new(FixtureVlmProvider::default()),
        )
        .build()
        .unwrap();
        assert_eq!(cfg.max_pages, 20);
        assert_eq!(cfg.pdf_dpi, 200);
        assert_eq!(cfg.grid_columns, vec!["H", "G", "F", "E", "D", "C", "B", "A"]);
        assert_eq!(cfg.grid_rows, vec!["4", "3", "2", "1"]);
    }

    #[test]
    fn max_pages_clamped_to_hard_cap() {
        let cfg = PipelineConfig::builder(
            Arc::new(FixtureOcrProvider::default()),
            Arc::new(FixtureVlmProvider::default()),
        )
        .max_pages(1000)
        .build()
        .unwrap();
        assert_eq!(cfg.max_pages, MAX_PAGES_HARD_CAP);
    }

    #[test]
    fn empty_grid_rejected() {
        let result = PipelineConfig::builder(
            Arc::new(FixtureOcrProvider::default()),
            Arc::new(FixtureVlmProvider::default()),
        )
        .grid_columns(vec![])
        .build();
        assert!(result.is_err());
    }
}
