use thiserror::Error;

/// Fatal errors returned directly from [`crate::orchestrator::Pipeline::process`].
///
/// These abort the whole request: nothing downstream of the failing step ran,
/// so there is no partial [`crate::entities::Assembly`] to hand back.
#[derive(Debug, Error)]
pub enum ErrorKind {
    #[error("invalid file: {0}")]
    InvalidFile(String),

    #[error("unsupported format: {0}")]
    UnsupportedFormat(String),

    #[error("OCR provider error: {0}")]
    OcrApiError(String),

    #[error("VLM provider error: {0}")]
    VlmApiError(String),

    #[error("failed to parse provider response: {0}")]
    ParseError(String),

    #[error("internal processing error: {0}")]
    ProcessingError(String),
}

impl ErrorKind {
    pub fn ocr(err: impl std::fmt::Display) -> Self {
        Self::OcrApiError(err.to_string())
    }

    pub fn vlm(err: impl std::fmt::Display) -> Self {
        Self::VlmApiError(err.to_string())
    }

    pub fn parse(err: impl std::fmt::Display) -> Self {
        Self::ParseError(err.to_string())
    }
}

/// A single page-scoped failure that the orchestrator swallows instead of
/// aborting the request. Carried in [`crate::entities::Assembly::warnings`].
#[derive(Debug, Clone, serde::Serialize, serde::Deserialize)]
pub struct PageWarning {
    pub page: usize,
    pub message: String,
}

impl PageWarning {
    pub fn new(page: usize, kind: &ErrorKind) -> Self {
        Self {
            page,
            message: kind.to_string(),
        }
    }
}
