//! Dimension detection & fusion pipeline: takes a rasterizable engineering
//! drawing (PDF or raster image) and produces a flat, zone-labeled list of
//! every dimension on it, fused from an OCR adapter's accurate boxes and a
//! VLM adapter's semantic reading.
//!
//! [`orchestrator::Pipeline::process`] is the entry point. Everything else
//! is exposed for collaborators that want to drive individual stages
//! (manual region capture, balloon re-placement) without a full re-run.

pub mod assemble;
pub mod config;
pub mod decode;
pub mod entities;
pub mod error;
pub mod fusion;
pub mod grouper;
pub mod ocr;
pub mod orchestrator;
pub mod pattern;
pub mod vlm;

pub use assemble::recompute_zone;
pub use config::PipelineConfig;
pub use entities::{Assembly, BBox, Dimension, PageAssembly};
pub use error::{ErrorKind, PageWarning};
pub use fusion::make_manual_dimension;
pub use ocr::OcrProvider;
pub use orchestrator::Pipeline;
pub use vlm::VlmProvider;
