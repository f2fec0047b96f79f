//! Error types for the pdf-summarizer library.
//!
//! Errors are split along the lifecycle of a task:
//!
//! * **Stage errors**: [`ConversionError`], [`ExtractionError`] and
//!   [`SummarizationError`] are produced by the pipeline stages. They never
//!   escape a background run: the orchestrator turns them into a terminal
//!   `failed` task whose message keeps the originating stage's context.
//!
//! * **Boundary errors**: [`ValidationError`] and [`SubmitError`] are
//!   reported synchronously to whoever submitted the upload and never touch
//!   the task store. "Task not found" is not an error at all: the store
//!   returns `None` and the HTTP layer maps it to a 404.
//!
//! * **Setup errors**: [`ConfigError`] covers invalid configuration and a
//!   model provider that cannot be initialised.

use std::path::PathBuf;
use thiserror::Error;

// ── Stage errors ─────────────────────────────────────────────────────────

/// Failure of the convert-to-images stage.
#[derive(Debug, Error)]
pub enum ConversionError {
    /// Source PDF was not found at the given path.
    #[error("PDF file not found: '{path}'")]
    FileNotFound { path: PathBuf },

    /// PDF header/trailer/xref is corrupt, or the file is not a PDF at all.
    #[error("Failed to read PDF '{path}': {detail}")]
    Unreadable { path: PathBuf, detail: String },

    /// The PDFium shared library could not be downloaded or bound.
    #[error(
        "PDF renderer unavailable: {0}\n\
Set PDFIUM_LIB_PATH=/path/to/libpdfium to use an existing copy."
    )]
    RendererUnavailable(String),

    /// The document has more pages than the configured maximum.
    #[error("PDF has {pages} pages, exceeds maximum of {max}")]
    PageLimitExceeded { pages: usize, max: usize },

    /// pdfium-render returned an error for a specific page.
    #[error("Rasterisation failed for page {page}: {detail}")]
    RenderFailed { page: usize, detail: String },

    /// A rendered page could not be written to the temp directory.
    #[error("Failed to save page {page} to '{path}': {detail}")]
    SaveFailed {
        page: usize,
        path: PathBuf,
        detail: String,
    },

    /// The output directory could not be created.
    #[error("Failed to prepare output directory '{path}': {source}")]
    OutputDir {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The blocking render task was cancelled before finishing.
    #[error("Render task aborted: {0}")]
    Aborted(String),
}

/// Failure of the per-page text extraction stage.
#[derive(Debug, Error)]
pub enum ExtractionError {
    /// The page image could not be read from disk.
    #[error("Failed to read image for page {page} ('{path}'): {source}")]
    ImageUnreadable {
        page: usize,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The page image has an extension no vision API accepts.
    #[error("Unsupported image type for page {page}: '{path}'")]
    UnsupportedImage { page: usize, path: PathBuf },

    /// The provider kept rate-limiting after every attempt.
    #[error("Rate limit exceeded on page {page} after {attempts} attempts: {detail}")]
    RateLimited {
        page: usize,
        attempts: u32,
        detail: String,
    },

    /// The provider returned a non-retryable error.
    #[error("Vision API error on page {page}: {detail}")]
    Api { page: usize, detail: String },

    /// The vision call did not answer within the configured budget.
    #[error("Vision call for page {page} timed out after {secs}s")]
    Timeout { page: usize, secs: u64 },
}

/// Failure of the summarisation stage.
#[derive(Debug, Error)]
pub enum SummarizationError {
    /// The provider returned an error for the summary request.
    #[error("Failed to generate summary: {0}")]
    Api(String),

    /// The summary call did not answer within the configured budget.
    #[error("Summary call timed out after {secs}s")]
    Timeout { secs: u64 },
}

/// Failure of the combined extract + summarise unit.
#[derive(Debug, Error)]
pub enum AnalysisError {
    #[error(transparent)]
    Extraction(#[from] ExtractionError),

    #[error(transparent)]
    Summarization(#[from] SummarizationError),
}

/// Error returned by a [`crate::pipeline::llm::CompletionBackend`].
///
/// Only the rate-limit class is retried by the extraction stage; everything
/// else fails the page immediately.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum BackendError {
    /// HTTP 429 / quota exhaustion; worth backing off and retrying.
    #[error("rate limited: {0}")]
    RateLimited(String),

    /// Any other provider failure.
    #[error("{0}")]
    Api(String),

    /// The call exceeded the per-call timeout.
    #[error("timed out after {secs}s")]
    Timeout { secs: u64 },
}

// ── Store errors ─────────────────────────────────────────────────────────

/// Error returned by [`crate::store::TaskStore::create`].
#[derive(Debug, Error, PartialEq, Eq)]
pub enum StoreError {
    /// A task with this identifier is already tracked.
    #[error("Task {0} already exists")]
    TaskExists(String),
}

// ── Boundary errors ──────────────────────────────────────────────────────

/// A rejected upload. Reported to the caller, never stored.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum ValidationError {
    /// The upload carried no filename.
    #[error("Filename is required")]
    MissingFilename,

    /// No `file` field was present in the request.
    #[error("No file uploaded")]
    MissingFile,

    /// Extension is not on the allow-list.
    #[error("Invalid file type. Allowed extensions: {allowed:?}")]
    InvalidExtension { allowed: Vec<String> },

    /// Declared content type is not a PDF.
    #[error("Invalid content type '{content_type}'. Expected application/pdf")]
    InvalidContentType { content_type: String },

    /// The bytes do not start with the `%PDF` magic.
    #[error("File is not a valid PDF (first bytes: {magic:?})")]
    NotAPdf { magic: Vec<u8> },

    /// The file was empty.
    #[error("Uploaded file is empty")]
    EmptyFile,

    /// The file exceeded the configured maximum size.
    #[error("File too large. Maximum size is {max} bytes ({:.1} MB)", mebibytes(.max))]
    FileTooLarge { max: u64 },
}

/// Error returned while accepting a new task.
#[derive(Debug, Error)]
pub enum SubmitError {
    #[error(transparent)]
    Validation(#[from] ValidationError),

    /// Writing the upload to disk failed.
    #[error("Failed to save file '{path}': {source}")]
    Storage {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error(transparent)]
    Store(#[from] StoreError),
}

fn mebibytes(bytes: &u64) -> f64 {
    *bytes as f64 / 1024.0 / 1024.0
}

// ── Setup errors ─────────────────────────────────────────────────────────

/// Error raised while building configuration or wiring the pipeline.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Builder validation failed.
    #[error("Invalid configuration: {0}")]
    Invalid(String),

    /// The configured provider is not initialised (missing API key etc.).
    #[error("LLM provider '{provider}' is not configured.\n{hint}")]
    ProviderNotConfigured { provider: String, hint: String },
}
