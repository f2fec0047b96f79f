//! Pipeline stages for PDF summarisation.
//!
//! Each submodule implements one transformation step; the orchestrator only
//! sees the two traits defined here, so every stage can be swapped for a
//! fake in tests.
//!
//! ## Data Flow
//!
//! ```text
//! render ──▶ encode ──▶ llm ──▶ extract
//! (pdfium)   (base64)   (VLM)   (per-page text + summary)
//! ```
//!
//! 1. [`render`]: rasterise every page to an image file; runs in
//!    `spawn_blocking` because pdfium is CPU-bound
//! 2. [`encode`]: base64-wrap a page image for the multimodal request
//! 3. [`llm`]: the [`llm::CompletionBackend`] seam and the edgequake-llm
//!    implementation; the only stage with network I/O
//! 4. [`extract`]: sequential per-page extraction with rate-limit retry,
//!    followed by the summary call

pub mod encode;
pub mod extract;
pub mod llm;
pub mod render;

use crate::config::{ImageFormat, SummarizerConfig};
use crate::error::{AnalysisError, ConfigError, ConversionError};
use crate::progress::PageProgress;
use async_trait::async_trait;
use std::path::PathBuf;
use std::sync::Arc;

/// Input of the convert stage.
#[derive(Debug, Clone)]
pub struct ConvertRequest {
    pub pdf_path: PathBuf,
    pub output_dir: PathBuf,
    pub dpi: u32,
    pub format: ImageFormat,
    pub max_pages: usize,
    pub max_rendered_pixels: u32,
}

impl ConvertRequest {
    /// Request for `pdf_path` using the config's rendering settings.
    pub fn from_config(pdf_path: impl Into<PathBuf>, config: &SummarizerConfig) -> Self {
        Self {
            pdf_path: pdf_path.into(),
            output_dir: config.temp_dir.clone(),
            dpi: config.dpi,
            format: config.image_format,
            max_pages: config.max_pages,
            max_rendered_pixels: config.max_rendered_pixels,
        }
    }
}

/// Output of the convert stage: one image file per page, in page order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConvertedPages {
    pub image_paths: Vec<PathBuf>,
    pub page_count: usize,
}

/// Output of extract + summarise.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DocumentAnalysis {
    /// Page-labelled text of every page.
    pub full_text: String,
    pub summary: String,
}

/// Convert stage: PDF → page images.
#[async_trait]
pub trait Converter: Send + Sync {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertedPages, ConversionError>;
}

/// Extract + summarise stage: page images → text and summary.
#[async_trait]
pub trait DocumentProcessor: Send + Sync {
    async fn process_document(
        &self,
        image_paths: &[PathBuf],
        progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError>;
}

/// The pair of stages an orchestrator drives.
#[derive(Clone)]
pub struct Pipeline {
    pub converter: Arc<dyn Converter>,
    pub processor: Arc<dyn DocumentProcessor>,
}

impl Pipeline {
    pub fn new(converter: Arc<dyn Converter>, processor: Arc<dyn DocumentProcessor>) -> Self {
        Self {
            converter,
            processor,
        }
    }

    /// pdfium rendering plus the configured LLM provider.
    pub fn from_config(config: &SummarizerConfig) -> Result<Self, ConfigError> {
        let backend = llm::LlmBackend::from_config(config)?;
        let analyzer = extract::DocumentAnalyzer::new(
            Arc::new(backend),
            extract::AnalyzerSettings::from_config(config),
        );
        Ok(Self::new(
            Arc::new(render::PdfConverter::pdfium()),
            Arc::new(analyzer),
        ))
    }
}
