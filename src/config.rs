//! Configuration for the summarisation service.
//!
//! Every knob lives in [`SummarizerConfig`], built via its
//! [`SummarizerConfigBuilder`]. The config is constructed once at startup and
//! shared (behind an `Arc`) by the orchestrator, the pipeline stages and the
//! HTTP boundary; nothing reads settings from a global.

use crate::error::ConfigError;
use edgequake_llm::LLMProvider;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;

/// Configuration for PDF summarisation.
///
/// Built via [`SummarizerConfig::builder()`] or using
/// [`SummarizerConfig::default()`].
///
/// # Example
/// ```rust
/// use pdf_summarizer::{ImageFormat, SummarizerConfig};
///
/// let config = SummarizerConfig::builder()
///     .dpi(150)
///     .image_format(ImageFormat::Jpeg)
///     .max_pages(40)
///     .max_history_size(10)
///     .build()
///     .unwrap();
/// assert_eq!(config.max_pages, 40);
/// ```
#[derive(Clone)]
pub struct SummarizerConfig {
    /// Rendering DPI used when rasterising each page. Range: 72–400. Default: 200.
    pub dpi: u32,

    /// On-disk format of the intermediate page images. Default: PNG.
    pub image_format: ImageFormat,

    /// Maximum rendered image dimension (width or height) in pixels. Default: 3000.
    ///
    /// Caps huge pages (posters, plans) independently of DPI so a single
    /// render cannot exhaust memory.
    pub max_rendered_pixels: u32,

    /// Documents with more pages than this are rejected by the convert stage. Default: 100.
    pub max_pages: usize,

    /// Maximum accepted upload size in bytes. Default: 50 MiB.
    pub max_file_size: u64,

    /// Accepted filename extensions (lower-case, with dot). Default: `[".pdf"]`.
    pub allowed_extensions: Vec<String>,

    /// Where uploaded PDFs are stored. Default: `./uploads`.
    pub upload_dir: PathBuf,

    /// Where intermediate page images are written. Default: `./temp`.
    pub temp_dir: PathBuf,

    /// Number of completed results kept in the history ring. Default: 5.
    pub max_history_size: usize,

    /// LLM model identifier. Default: `gpt-4o-mini`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, the provider is auto-detected.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Sampling temperature for every completion. Default: 0.3.
    ///
    /// Kept low so the vision model transcribes what it sees instead of
    /// paraphrasing it.
    pub temperature: f32,

    /// Maximum tokens the model may generate per call. Default: 1000.
    pub max_tokens: usize,

    /// Image detail hint forwarded to the vision API (`low`, `high`, `auto`). Default: `auto`.
    pub vision_detail: String,

    /// Total attempts per page when the provider rate-limits. Default: 3.
    pub max_attempts: u32,

    /// Initial backoff in milliseconds, doubled after each rate-limited attempt. Default: 1000.
    pub retry_backoff_ms: u64,

    /// Per-model-call timeout in seconds. Default: 300.
    pub api_timeout_secs: u64,

    /// Finished tasks older than this are swept from the store. Default: 24.
    pub task_ttl_hours: u64,
}

/// Model used when neither the caller nor the environment picks one.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// Upper bound on extraction attempts per page.
pub const MAX_ATTEMPTS_CEILING: u32 = 10;

impl Default for SummarizerConfig {
    fn default() -> Self {
        Self {
            dpi: 200,
            image_format: ImageFormat::default(),
            max_rendered_pixels: 3000,
            max_pages: 100,
            max_file_size: 50 * 1024 * 1024,
            allowed_extensions: vec![".pdf".to_string()],
            upload_dir: PathBuf::from("./uploads"),
            temp_dir: PathBuf::from("./temp"),
            max_history_size: 5,
            model: None,
            provider_name: None,
            provider: None,
            temperature: 0.3,
            max_tokens: 1000,
            vision_detail: "auto".to_string(),
            max_attempts: 3,
            retry_backoff_ms: 1000,
            api_timeout_secs: 300,
            task_ttl_hours: 24,
        }
    }
}

impl fmt::Debug for SummarizerConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SummarizerConfig")
            .field("dpi", &self.dpi)
            .field("image_format", &self.image_format)
            .field("max_rendered_pixels", &self.max_rendered_pixels)
            .field("max_pages", &self.max_pages)
            .field("max_file_size", &self.max_file_size)
            .field("allowed_extensions", &self.allowed_extensions)
            .field("upload_dir", &self.upload_dir)
            .field("temp_dir", &self.temp_dir)
            .field("max_history_size", &self.max_history_size)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("temperature", &self.temperature)
            .field("max_tokens", &self.max_tokens)
            .field("vision_detail", &self.vision_detail)
            .field("max_attempts", &self.max_attempts)
            .field("retry_backoff_ms", &self.retry_backoff_ms)
            .field("api_timeout_secs", &self.api_timeout_secs)
            .field("task_ttl_hours", &self.task_ttl_hours)
            .finish()
    }
}

impl SummarizerConfig {
    /// Create a new builder for `SummarizerConfig`.
    pub fn builder() -> SummarizerConfigBuilder {
        SummarizerConfigBuilder {
            config: Self::default(),
        }
    }

    /// Model to request, falling back to [`DEFAULT_MODEL`].
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    /// Whether `filename` carries one of the allowed extensions (case-insensitive).
    pub fn is_file_allowed(&self, filename: &str) -> bool {
        let lower = filename.to_lowercase();
        self.allowed_extensions
            .iter()
            .any(|ext| lower.ends_with(ext.as_str()))
    }
}

/// Builder for [`SummarizerConfig`].
#[derive(Debug)]
pub struct SummarizerConfigBuilder {
    config: SummarizerConfig,
}

impl SummarizerConfigBuilder {
    pub fn dpi(mut self, dpi: u32) -> Self {
        self.config.dpi = dpi.clamp(72, 400);
        self
    }

    pub fn image_format(mut self, format: ImageFormat) -> Self {
        self.config.image_format = format;
        self
    }

    pub fn max_rendered_pixels(mut self, px: u32) -> Self {
        self.config.max_rendered_pixels = px.max(100);
        self
    }

    pub fn max_pages(mut self, n: usize) -> Self {
        self.config.max_pages = n;
        self
    }

    pub fn max_file_size(mut self, bytes: u64) -> Self {
        self.config.max_file_size = bytes;
        self
    }

    pub fn allowed_extensions<I, S>(mut self, exts: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.config.allowed_extensions = exts
            .into_iter()
            .map(|e| e.into().to_lowercase())
            .collect();
        self
    }

    pub fn upload_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.upload_dir = dir.into();
        self
    }

    pub fn temp_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.temp_dir = dir.into();
        self
    }

    pub fn max_history_size(mut self, n: usize) -> Self {
        self.config.max_history_size = n;
        self
    }

    pub fn model(mut self, model: impl Into<String>) -> Self {
        self.config.model = Some(model.into());
        self
    }

    pub fn provider_name(mut self, name: impl Into<String>) -> Self {
        self.config.provider_name = Some(name.into());
        self
    }

    pub fn provider(mut self, provider: Arc<dyn LLMProvider>) -> Self {
        self.config.provider = Some(provider);
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn vision_detail(mut self, detail: impl Into<String>) -> Self {
        self.config.vision_detail = detail.into();
        self
    }

    pub fn max_attempts(mut self, n: u32) -> Self {
        self.config.max_attempts = n.clamp(1, MAX_ATTEMPTS_CEILING);
        self
    }

    pub fn retry_backoff_ms(mut self, ms: u64) -> Self {
        self.config.retry_backoff_ms = ms;
        self
    }

    pub fn api_timeout_secs(mut self, secs: u64) -> Self {
        self.config.api_timeout_secs = secs;
        self
    }

    pub fn task_ttl_hours(mut self, hours: u64) -> Self {
        self.config.task_ttl_hours = hours;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<SummarizerConfig, ConfigError> {
        let c = &self.config;
        if c.max_pages == 0 {
            return Err(ConfigError::Invalid("max_pages must be ≥ 1".into()));
        }
        if c.max_file_size == 0 {
            return Err(ConfigError::Invalid("max_file_size must be ≥ 1 byte".into()));
        }
        if c.allowed_extensions.is_empty() {
            return Err(ConfigError::Invalid(
                "at least one allowed extension is required".into(),
            ));
        }
        if let Some(bad) = c.allowed_extensions.iter().find(|e| !e.starts_with('.')) {
            return Err(ConfigError::Invalid(format!(
                "extension '{bad}' must start with a dot"
            )));
        }
        if !matches!(c.vision_detail.as_str(), "low" | "high" | "auto") {
            return Err(ConfigError::Invalid(format!(
                "vision detail must be low, high or auto, got '{}'",
                c.vision_detail
            )));
        }
        if c.api_timeout_secs == 0 {
            return Err(ConfigError::Invalid("api_timeout_secs must be ≥ 1".into()));
        }
        Ok(self.config)
    }
}

// ── Enums ────────────────────────────────────────────────────────────────

/// On-disk format for rendered page images.
///
/// PNG is lossless and keeps small print crisp for the vision model; JPEG
/// trades some legibility for much smaller temp files on large documents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ImageFormat {
    #[default]
    Png,
    Jpeg,
}

impl ImageFormat {
    /// File extension without the dot.
    pub fn extension(self) -> &'static str {
        match self {
            ImageFormat::Png => "png",
            ImageFormat::Jpeg => "jpg",
        }
    }

    /// MIME type used in data-URIs.
    pub fn mime_type(self) -> &'static str {
        match self {
            ImageFormat::Png => "image/png",
            ImageFormat::Jpeg => "image/jpeg",
        }
    }

    /// Guess the format from a file extension (`png`, `jpg`, `jpeg`).
    pub fn from_extension(ext: &str) -> Option<Self> {
        match ext.to_ascii_lowercase().as_str() {
            "png" => Some(ImageFormat::Png),
            "jpg" | "jpeg" => Some(ImageFormat::Jpeg),
            _ => None,
        }
    }

    pub(crate) fn as_image_format(self) -> image::ImageFormat {
        match self {
            ImageFormat::Png => image::ImageFormat::Png,
            ImageFormat::Jpeg => image::ImageFormat::Jpeg,
        }
    }
}

impl std::str::FromStr for ImageFormat {
    type Err = ConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::from_extension(s.trim())
            .ok_or_else(|| ConfigError::Invalid(format!("unknown image format '{s}'")))
    }
}
