//! Pipeline Orchestrator (component H): sequences A -> (B || C) -> D -> F
//! per page, bounded by `page_concurrency`, then hands every page's fused
//! dimensions to the Page Assembler (component G) for global IDs and zones.

use std::sync::Arc;

use futures::stream::{self, StreamExt};
use tracing::{instrument, warn};

use crate::assemble::{self, Grid};
use crate::config::PipelineConfig;
use crate::entities::{Assembly, Dimension, OcrToken, PageAssembly, PageIndex};
use crate::error::{ErrorKind, PageWarning};
use crate::{decode, fusion, grouper};

pub struct Pipeline {
    config: PipelineConfig,
}

impl Pipeline {
    pub fn new(config: PipelineConfig) -> Self {
        Self { config }
    }

    /// Primary operation (see spec's external-interface contract): decodes
    /// `file_bytes`, fans out over pages with bounded concurrency, and
    /// assembles one [`Assembly`].
    #[instrument(skip(self, file_bytes), fields(filename = hint_filename.unwrap_or("")))]
    pub async fn process(
        &self,
        file_bytes: Arc<[u8]>,
        hint_filename: Option<&str>,
    ) -> Result<Assembly, ErrorKind> {
        let (pages, decode_warning) =
            decode::decode(file_bytes, hint_filename, self.config.pdf_dpi, self.config.max_pages)
                .await?;
        let total_pages = pages.len();

        let grid_override = if let Some(first) = pages.first() {
            self.config.vlm_provider.detect_grid(&first.png_bytes).await
        } else {
            None
        };
        let grid_detected = grid_override.is_some();
        let grid = match grid_override {
            Some(g) => Grid {
                columns: g.columns,
                rows: g.rows,
            },
            None => Grid {
                columns: self.config.grid_columns.clone(),
                rows: self.config.grid_rows.clone(),
            },
        };

        let concurrency = self.config.page_concurrency;
        let ocr_provider = Arc::clone(&self.config.ocr_provider);
        let vlm_provider = Arc::clone(&self.config.vlm_provider);
        let ocr_timeout = self.config.ocr_timeout;
        let vlm_timeout = self.config.vlm_timeout;
        let max_dist_floor = self.config.max_dist;

        let page_results: Vec<(PageAssembly, Vec<PageWarning>)> = stream::iter(pages.into_iter())
            .map(|raster| {
                let ocr_provider = Arc::clone(&ocr_provider);
                let vlm_provider = Arc::clone(&vlm_provider);
                async move {
                    process_page(
                        raster,
                        ocr_provider,
                        vlm_provider,
                        ocr_timeout,
                        vlm_timeout,
                        max_dist_floor,
                        grid_detected,
                    )
                    .await
                }
            })
            .buffer_unordered(concurrency)
            .collect()
            .await;

        let mut warnings: Vec<PageWarning> = Vec::new();
        if let Some(w) = decode_warning {
            warnings.push(PageWarning { page: 0, message: w });
        }

        let mut pages_for_assembly: Vec<(PageIndex, Vec<Dimension>)> = Vec::with_capacity(page_results.len());
        let mut page_assemblies: Vec<PageAssembly> = Vec::with_capacity(page_results.len());

        for (mut page_assembly, page_warnings) in page_results {
            warnings.extend(page_warnings);
            pages_for_assembly.push((page_assembly.page, std::mem::take(&mut page_assembly.dimensions)));
            page_assemblies.push(page_assembly);
        }
        page_assemblies.sort_by_key(|p| p.page);
        pages_for_assembly.sort_by_key(|(page, _)| *page);

        let all_dimensions = assemble::assemble(&mut pages_for_assembly, &grid);

        let dims_by_page: std::collections::HashMap<PageIndex, Vec<Dimension>> = {
            let mut map: std::collections::HashMap<PageIndex, Vec<Dimension>> = std::collections::HashMap::new();
            for dim in &all_dimensions {
                map.entry(dim.page).or_default().push(dim.clone());
            }
            map
        };
        for page_assembly in &mut page_assemblies {
            page_assembly.dimensions = dims_by_page.get(&page_assembly.page).cloned().unwrap_or_default();
        }

        Ok(Assembly {
            total_pages,
            pages: page_assemblies,
            all_dimensions,
            warnings,
        })
    }
}

#[allow(clippy::too_many_arguments)]
async fn process_page(
    raster: crate::entities::PageRaster,
    ocr_provider: Arc<dyn crate::ocr::OcrProvider>,
    vlm_provider: Arc<dyn crate::vlm::VlmProvider>,
    ocr_timeout: std::time::Duration,
    vlm_timeout: std::time::Duration,
    max_dist_floor: f32,
    grid_detected: bool,
) -> (PageAssembly, Vec<PageWarning>) {
    let page = raster.page;
    let mut warnings = Vec::new();

    let ocr_call = tokio::time::timeout(
        ocr_timeout,
        ocr_provider.detect_text(&raster.png_bytes, raster.width_px, raster.height_px),
    );
    let vlm_call = tokio::time::timeout(vlm_timeout, vlm_provider.identify_dimensions(&raster.png_bytes));
    let (ocr_result, vlm_result) = tokio::join!(ocr_call, vlm_call);

    let ocr_spans = match ocr_result {
        Ok(Ok(spans)) => spans,
        Ok(Err(kind)) => {
            warn!(page, error = %kind, "OCR adapter failed, continuing with empty OCR");
            warnings.push(PageWarning::new(page, &kind));
            Vec::new()
        }
        Err(_) => {
            let kind = ErrorKind::OcrApiError("timed out".into());
            warn!(page, "OCR adapter timed out, continuing with empty OCR");
            warnings.push(PageWarning::new(page, &kind));
            Vec::new()
        }
    };

    let vlm_entries = match vlm_result {
        Ok(Ok(entries)) => entries,
        Ok(Err(kind)) => {
            warn!(page, error = %kind, "VLM adapter failed, page yields zero dimensions");
            warnings.push(PageWarning::new(page, &kind));
            Vec::new()
        }
        Err(_) => {
            let kind = ErrorKind::VlmApiError("timed out".into());
            warn!(page, "VLM adapter timed out, page yields zero dimensions");
            warnings.push(PageWarning::new(page, &kind));
            Vec::new()
        }
    };

    let mut raw_tokens: Vec<OcrToken> = ocr_spans.iter().cloned().map(OcrToken::from).collect();
    let avg_char_height = if ocr_spans.is_empty() {
        12.0
    } else {
        ocr_spans.iter().map(|s| s.bbox.height() as f32).sum::<f32>() / ocr_spans.len() as f32
    }
    .clamp(5.0, 200.0);
    let max_dist = max_dist_floor.max(5.0 * avg_char_height);

    let grouped_spans = grouper::group_tokens(ocr_spans);
    let mut grouped_tokens: Vec<OcrToken> = grouped_spans.into_iter().map(OcrToken::from).collect();

    let dimensions = fusion::fuse_page(&vlm_entries, &mut grouped_tokens, &mut raw_tokens, max_dist);

    let page_assembly = PageAssembly {
        page,
        png_bytes: raster.png_bytes,
        width_px: raster.width_px,
        height_px: raster.height_px,
        grid_detected,
        dimensions,
    };

    (page_assembly, warnings)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::entities::{BBox, OcrSpan, VlmDimension};
    use crate::ocr::tests::FixtureOcrProvider;
    use crate::vlm::tests::FixtureVlmProvider;

    fn fixture_config(ocr: FixtureOcrProvider, vlm: FixtureVlmProvider) -> PipelineConfig {
        PipelineConfig::builder(Arc::new(ocr), Arc::new(vlm))
            .build()
            .unwrap()
    }

    #[tokio::test]
    async fn empty_vlm_yields_zero_dimensions_on_the_page() {
        let ocr = FixtureOcrProvider {
            spans: vec![OcrSpan {
                text: "2.500\"".into(),
                bbox: BBox::new(490, 390, 520, 410),
                confidence: 0.9,
            }],
        };
        let vlm = FixtureVlmProvider::default();
        let pipeline = Pipeline::new(fixture_config(ocr, vlm));

        // A 1x1 PNG is enough: the fixture providers never touch the bytes.
        let bytes: Arc<[u8]> = Arc::from(tiny_png());
        let assembly = pipeline.process(bytes, Some("page.png")).await.unwrap();
        assert_eq!(assembly.total_pages, 1);
        assert_eq!(assembly.all_dimensions.len(), 0);
    }

    #[tokio::test]
    async fn matched_vlm_entry_produces_one_dimension_with_dense_id() {
        let ocr = FixtureOcrProvider {
            spans: vec![OcrSpan {
                text: "2.500\"".into(),
                bbox: BBox::new(490, 390, 520, 410),
                confidence: 0.9,
            }],
        };
        let vlm = FixtureVlmProvider {
            dimensions: vec![VlmDimension {
                value: "2.500\"".into(),
                x_percent: 50.0,
                y_percent: 40.0,
                confidence: 0.9,
            }],
            grid: None,
        };
        let pipeline = Pipeline::new(fixture_config(ocr, vlm));
        let bytes: Arc<[u8]> = Arc::from(tiny_png());
        let assembly = pipeline.process(bytes, Some("page.png")).await.unwrap();
        assert_eq!(assembly.all_dimensions.len(), 1);
        assert_eq!(assembly.all_dimensions[0].id, 1);
        assert_eq!(assembly.all_dimensions[0].zone, "D3");
    }

    fn tiny_png() -> Vec<u8> {
        let img = image::DynamicImage::ImageRgb8(image::RgbImage::new(4, 4));
        let mut bytes = Vec::new();
        img.write_to(&mut std::io::Cursor::new(&mut bytes), image::ImageFormat::Png)
            .unwrap();
        bytes
    }
}
