//! File Decoder (component A): detects PDF vs. raster by magic bytes,
//! rasterizes PDF pages at a fixed DPI, and opportunistically extracts
//! vector text spans from the PDF text layer.
//!
//! pdfium is not safe to drive from an async context (it relies on
//! thread-local state), so the actual decode runs inside
//! `tokio::task::spawn_blocking`, the way `edgequake_pdf2md::pipeline::render`
//! isolates its own pdfium calls.

use std::sync::Arc;

use image::{DynamicImage, GenericImageView};
use pdfium_render::prelude::{PdfPageTextChar, PdfRenderConfig, Pdfium};

use crate::entities::{BBox, PageRaster, VectorTextSpan};
use crate::error::ErrorKind;

/// Absolute upper bound on pages processed, regardless of configuration —
/// `PipelineConfig::max_pages` is clamped against this, never used directly.
pub const MAX_PAGES: usize = 20;
const NORMALIZED_COORD_SYSTEM: f32 = 1000.0;

/// Decodes opaque input bytes into one [`PageRaster`] per page (capped at
/// `max_pages.min(MAX_PAGES)`), returning a warning string when pages were
/// dropped.
pub async fn decode(
    bytes: Arc<[u8]>,
    hint_filename: Option<&str>,
    dpi: u32,
    max_pages: usize,
) -> Result<(Vec<PageRaster>, Option<String>), ErrorKind> {
    match sniff_format(&bytes, hint_filename) {
        Format::Pdf => decode_pdf(bytes, dpi, max_pages).await,
        Format::Raster => decode_raster(&bytes).map(|r| (vec![r], None)),
        Format::Unknown => Err(ErrorKind::UnsupportedFormat(
            "bytes are neither a recognized PDF nor a raster image".into(),
        )),
    }
}

enum Format {
    Pdf,
    Raster,
    Unknown,
}

fn sniff_format(bytes: &[u8], hint_filename: Option<&str>) -> Format {
    if bytes.starts_with(b"%PDF") {
        return Format::Pdf;
    }
    if bytes.starts_with(&[0x89, b'P', b'N', b'G']) || bytes.starts_with(&[0xFF, 0xD8]) {
        return Format::Raster;
    }
    match hint_filename.map(|f| f.to_lowercase()) {
        Some(name) if name.ends_with(".pdf") => Format::Pdf,
        Some(name)
            if name.ends_with(".png")
                || name.ends_with(".jpg")
                || name.ends_with(".jpeg")
                || name.ends_with(".tif")
                || name.ends_with(".tiff") =>
        {
            Format::Raster
        }
        _ => Format::Unknown,
    }
}

fn decode_raster(bytes: &[u8]) -> Result<PageRaster, ErrorKind> {
    let image = image::load_from_memory(bytes)
        .map_err(|e| ErrorKind::InvalidFile(format!("can't decode raster image: {e}")))?;
    let image = to_rgb_if_needed(image);
    let (width_px, height_px) = image.dimensions();
    let mut png_bytes = Vec::new();
    image
        .write_to(
            &mut std::io::Cursor::new(&mut png_bytes),
            image::ImageFormat::Png,
        )
        .map_err(|e| ErrorKind::ProcessingError(format!("can't re-encode raster as PNG: {e}")))?;
    Ok(PageRaster {
        page: 1,
        png_bytes,
        width_px,
        height_px,
        vector_text: Vec::new(),
    })
}

fn to_rgb_if_needed(image: DynamicImage) -> DynamicImage {
    match image {
        DynamicImage::ImageRgb8(_) | DynamicImage::ImageRgba8(_) => image,
        other => DynamicImage::ImageRgb8(other.to_rgb8()),
    }
}

async fn decode_pdf(
    bytes: Arc<[u8]>,
    dpi: u32,
    max_pages: usize,
) -> Result<(Vec<PageRaster>, Option<String>), ErrorKind> {
    tokio::task::spawn_blocking(move || decode_pdf_blocking(&bytes, dpi, max_pages))
        .await
        .map_err(|e| ErrorKind::ProcessingError(format!("decode task panicked: {e}")))?
}

fn decode_pdf_blocking(
    bytes: &[u8],
    dpi: u32,
    max_pages: usize,
) -> Result<(Vec<PageRaster>, Option<String>), ErrorKind> {
    let pdfium = Pdfium::new(
        Pdfium::bind_to_statically_linked_library()
            .map_err(|e| ErrorKind::ProcessingError(format!("can't load pdfium bindings: {e:?}")))?,
    );
    let document = pdfium
        .load_pdf_from_byte_slice(bytes, None)
        .map_err(|e| ErrorKind::InvalidFile(format!("corrupt PDF: {e:?}")))?;

    let pages = document.pages();
    let total_pages = pages.len() as usize;
    if total_pages == 0 {
        return Err(ErrorKind::InvalidFile("PDF has no pages".into()));
    }

    let effective_cap = max_pages.min(MAX_PAGES);
    let take = total_pages.min(effective_cap);
    let warning = (total_pages > take).then(|| {
        format!("document has {total_pages} pages; only the first {take} were processed")
    });

    let render_config = PdfRenderConfig::new().set_target_width((dpi as f32 / 72.0 * 850.0) as i32);

    let mut out = Vec::with_capacity(take);
    for idx in 0..take {
        let page = pages.get(idx as u16).map_err(|e| {
            ErrorKind::ProcessingError(format!("can't open page {}: {e:?}", idx + 1))
        })?;

        let page_width = page.width().value;
        let page_height = page.height().value;
        let page_bbox_pdf = (0.0, 0.0, page_width, page_height);

        let bitmap = page.render_with_config(&render_config).map_err(|e| {
            ErrorKind::ProcessingError(format!("can't rasterize page {}: {e:?}", idx + 1))
        })?;
        let image = bitmap.as_image();
        let (width_px, height_px) = image.dimensions();

        let mut png_bytes = Vec::new();
        image
            .write_to(&mut std::io::Cursor::new(&mut png_bytes), image::ImageFormat::Png)
            .map_err(|e| ErrorKind::ProcessingError(format!("can't encode page {}: {e}", idx + 1)))?;

        let vector_text = page
            .text()
            .ok()
            .map(|text| extract_vector_spans(text.chars().iter(), page_bbox_pdf))
            .unwrap_or_default();

        out.push(PageRaster {
            page: idx + 1,
            png_bytes,
            width_px,
            height_px,
            vector_text,
        });
    }

    Ok((out, warning))
}

/// Groups PDF text-layer chars into spans (breaking on whitespace-sized
/// gaps or line changes) and normalizes each span's rectangle to the
/// `[0, 1000]` frame. Best-effort: failures here never fail the page, the
/// caller treats an empty result the same as "no vector layer".
fn extract_vector_spans<'a>(
    chars: impl Iterator<Item = PdfPageTextChar<'a>>,
    page_bbox: (f32, f32, f32, f32),
) -> Vec<VectorTextSpan> {
    let (_, _, page_w, page_h) = page_bbox;
    if page_w <= 0.0 || page_h <= 0.0 {
        return Vec::new();
    }

    struct Accum {
        text: String,
        xmin: f32,
        ymin: f32,
        xmax: f32,
        ymax: f32,
    }

    let mut spans: Vec<Accum> = Vec::new();
    for ch in chars {
        let unicode = ch.unicode_string().unwrap_or_default();
        let rect = match ch.tight_bounds() {
            Ok(r) => r,
            Err(_) => continue,
        };
        // PDF origin is bottom-left; flip to top-left for the [0,1000] frame.
        let xmin = rect.left().value;
        let xmax = rect.right().value;
        let ymin = page_h - rect.top().value;
        let ymax = page_h - rect.bottom().value;

        let should_start_new = match spans.last() {
            None => true,
            Some(last) => {
                let gap = xmin - last.xmax;
                let vertical_drift = (ymin - last.ymin).abs();
                unicode.trim().is_empty() || gap > page_w * 0.02 || vertical_drift > page_h * 0.01
            }
        };

        if unicode.trim().is_empty() {
            continue;
        }

        if should_start_new {
            spans.push(Accum {
                text: unicode,
                xmin,
                ymin,
                xmax,
                ymax,
            });
        } else {
            let last = spans.last_mut().unwrap();
            last.text.push_str(&unicode);
            last.xmin = last.xmin.min(xmin);
            last.ymin = last.ymin.min(ymin);
            last.xmax = last.xmax.max(xmax);
            last.ymax = last.ymax.max(ymax);
        }
    }

    spans
        .into_iter()
        .filter(|s| !s.text.trim().is_empty())
        .map(|s| VectorTextSpan {
            text: s.text,
            bbox: BBox::new(
                ((s.xmin / page_w) * NORMALIZED_COORD_SYSTEM) as i32,
                ((s.ymin / page_h) * NORMALIZED_COORD_SYSTEM) as i32,
                ((s.xmax / page_w) * NORMALIZED_COORD_SYSTEM) as i32,
                ((s.ymax / page_h) * NORMALIZED_COORD_SYSTEM) as i32,
            ),
        })
        .collect()
}
