use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use clap::Parser;
use dimball_core::config::PipelineConfig;
use dimball_core::ocr::HttpOcrProvider;
use dimball_core::orchestrator::Pipeline;
use dimball_core::vlm::HttpVlmProvider;
use indicatif::{ProgressBar, ProgressStyle};
use memmap2::Mmap;
use tokio::fs::File;

const DEFAULT_OCR_ENDPOINT: &str =
    "https://vision.googleapis.com/v1/images:annotate";
const DEFAULT_VLM_ENDPOINT: &str =
    "https://generativelanguage.googleapis.com/v1beta/models/gemini-1.5-pro:generateContent";

#[derive(Parser, Debug)]
#[command(
    version,
    about = "dimball - dimension detection & fusion pipeline for engineering drawings",
    long_about = "dimball decodes an engineering or manufacturing drawing (PDF or raster image), \
fuses OCR and VLM readings of every dimension on it, and emits a flat, zone-labeled JSON list."
)]
struct Args {
    /// Path to the drawing file (PDF, PNG, JPEG, or TIFF)
    file_path: PathBuf,

    /// Write the result JSON here instead of stdout
    #[arg(long, short = 'o')]
    output: Option<PathBuf>,

    /// Google Cloud Vision-shaped OCR endpoint
    #[arg(long, env = "DIMBALL_OCR_ENDPOINT", default_value = DEFAULT_OCR_ENDPOINT)]
    ocr_endpoint: String,

    /// API key for the OCR endpoint
    #[arg(long, env = "DIMBALL_OCR_API_KEY")]
    ocr_api_key: String,

    /// Gemini-shaped VLM endpoint
    #[arg(long, env = "DIMBALL_VLM_ENDPOINT", default_value = DEFAULT_VLM_ENDPOINT)]
    vlm_endpoint: String,

    /// API key for the VLM endpoint
    #[arg(long, env = "DIMBALL_VLM_API_KEY")]
    vlm_api_key: String,

    /// Hard cap on PDF pages processed
    #[arg(long, default_value_t = 20)]
    max_pages: usize,

    /// PDF rasterization DPI
    #[arg(long, default_value_t = 200)]
    pdf_dpi: u32,

    /// Pages processed concurrently
    #[arg(long, default_value_t = 4)]
    page_concurrency: usize,

    /// Pretty-print the output JSON
    #[arg(long, default_value_t = false)]
    pretty: bool,
}

fn setup_progress_bar() -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::with_template("{spinner:.green} [{elapsed_precise}] {msg}")
            .unwrap(),
    );
    pb.enable_steady_tick(Duration::from_millis(100));
    pb
}

#[tokio::main(flavor = "multi_thread")]
async fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt::init();

    let args = Args::parse();

    let ocr_provider = Arc::new(HttpOcrProvider::new(
        args.ocr_endpoint,
        args.ocr_api_key,
        Duration::from_secs(60),
    ));
    let vlm_provider = Arc::new(HttpVlmProvider::new(
        args.vlm_endpoint,
        args.vlm_api_key,
        Duration::from_secs(120),
    ));

    let config = PipelineConfig::builder(ocr_provider, vlm_provider)
        .max_pages(args.max_pages)
        .pdf_dpi(args.pdf_dpi)
        .page_concurrency(args.page_concurrency)
        .build()?;

    let pipeline = Pipeline::new(config);

    let file = File::open(&args.file_path).await?;
    let mmap = unsafe { Mmap::map(&file)? };
    let file_bytes: Arc<[u8]> = Arc::from(mmap.as_ref());

    let filename = args.file_path.file_name().and_then(|n| n.to_str());

    let pb = setup_progress_bar();
    pb.set_message(format!("processing {}", args.file_path.display()));
    let assembly = pipeline.process(file_bytes, filename).await?;
    pb.finish_with_message(format!(
        "found {} dimensions across {} pages",
        assembly.all_dimensions.len(),
        assembly.total_pages
    ));

    let json = if args.pretty {
        serde_json::to_string_pretty(&assembly)?
    } else {
        serde_json::to_string(&assembly)?
    };

    match args.output {
        Some(path) => tokio::fs::write(&path, json).await?,
        None => println!("{json}"),
    }

    Ok(())
}
