//! Extract and summarise: the model-facing half of the pipeline.
//!
//! ## Retry Strategy
//!
//! Pages are sent strictly one after another so a single document never
//! bursts the provider's rate limit. When a call is still rate-limited, it is
//! retried with exponential backoff (`retry_backoff_ms * 2^(attempt-1)`):
//! with the default 1 s base and 3 attempts the waits are 1 s then 2 s.
//! Any other error fails the page, and with it the document, immediately.

use crate::config::{SummarizerConfig, MAX_ATTEMPTS_CEILING};
use crate::error::{AnalysisError, BackendError, ExtractionError, SummarizationError};
use crate::pipeline::encode::encode_image_file;
use crate::pipeline::llm::{CompletionBackend, CompletionRequest};
use crate::pipeline::{DocumentAnalysis, DocumentProcessor};
use crate::progress::PageProgress;
use crate::prompts::{
    page_block, summary_prompt, EXTRACTION_PROMPT, MIN_SUMMARY_INPUT_CHARS, NO_TEXT_PLACEHOLDER,
    SUMMARY_FAILED_PLACEHOLDER, SUMMARY_SYSTEM_PROMPT,
};
use async_trait::async_trait;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::time::{sleep, Duration};
use tracing::{debug, info, warn};

/// Sampling and retry settings for [`DocumentAnalyzer`].
#[derive(Debug, Clone, PartialEq)]
pub struct AnalyzerSettings {
    pub temperature: f32,
    pub max_tokens: usize,
    /// Total attempts per page, including the first.
    pub max_attempts: u32,
    pub retry_backoff_ms: u64,
}

impl AnalyzerSettings {
    pub fn from_config(config: &SummarizerConfig) -> Self {
        Self {
            temperature: config.temperature,
            max_tokens: config.max_tokens,
            max_attempts: config.max_attempts.clamp(1, MAX_ATTEMPTS_CEILING),
            retry_backoff_ms: config.retry_backoff_ms,
        }
    }
}

impl Default for AnalyzerSettings {
    fn default() -> Self {
        Self::from_config(&SummarizerConfig::default())
    }
}

/// Wait before retry number `attempt` (1-indexed), saturating at `u64::MAX`.
fn backoff_ms(base_ms: u64, attempt: u32) -> u64 {
    base_ms.saturating_mul(2u64.saturating_pow(attempt.saturating_sub(1)))
}

/// Production [`DocumentProcessor`].
pub struct DocumentAnalyzer {
    backend: Arc<dyn CompletionBackend>,
    settings: AnalyzerSettings,
}

impl DocumentAnalyzer {
    pub fn new(backend: Arc<dyn CompletionBackend>, settings: AnalyzerSettings) -> Self {
        Self { backend, settings }
    }

    /// Transcribe one page image. `page` is 1-indexed.
    pub async fn extract_page(&self, image_path: &Path, page: usize) -> Result<String, ExtractionError> {
        let image = encode_image_file(image_path, page).await?;
        let request = CompletionRequest {
            system: None,
            text: EXTRACTION_PROMPT.to_string(),
            image: Some(image),
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };

        let max_attempts = self.settings.max_attempts;
        let mut attempt = 1;
        loop {
            match self.backend.complete(request.clone()).await {
                Ok(text) => {
                    debug!(page, attempt, chars = text.len(), "page extracted");
                    return Ok(text);
                }
                Err(BackendError::RateLimited(detail)) if attempt < max_attempts => {
                    let backoff = backoff_ms(self.settings.retry_backoff_ms, attempt);
                    warn!(
                        page,
                        attempt,
                        max_attempts,
                        backoff_ms = backoff,
                        %detail,
                        "rate limited, retrying"
                    );
                    sleep(Duration::from_millis(backoff)).await;
                    attempt += 1;
                }
                Err(BackendError::RateLimited(detail)) => {
                    return Err(ExtractionError::RateLimited {
                        page,
                        attempts: attempt,
                        detail,
                    })
                }
                Err(BackendError::Timeout { secs }) => {
                    return Err(ExtractionError::Timeout { page, secs })
                }
                Err(BackendError::Api(detail)) => {
                    return Err(ExtractionError::Api { page, detail })
                }
            }
        }
    }

    /// Extract every page in order and join the labelled blocks with blank
    /// lines. `progress` is told after each page.
    pub async fn extract_all(
        &self,
        image_paths: &[PathBuf],
        progress: &dyn PageProgress,
    ) -> Result<String, ExtractionError> {
        let total = image_paths.len();
        info!(pages = total, "extracting text");

        let mut blocks = Vec::with_capacity(total);
        for (index, path) in image_paths.iter().enumerate() {
            let page = index + 1;
            let text = self.extract_page(path, page).await?;
            blocks.push(page_block(page, &text));
            progress.on_page_extracted(page, total);
        }

        let full_text = blocks.join("\n\n");
        info!(pages = total, chars = full_text.len(), "extraction finished");
        Ok(full_text)
    }

    /// Summarise extracted text.
    ///
    /// Text shorter than [`MIN_SUMMARY_INPUT_CHARS`] once trimmed is returned
    /// as-is without a model call.
    pub async fn summarize(&self, full_text: &str) -> Result<String, SummarizationError> {
        let trimmed = full_text.trim();
        if trimmed.chars().count() < MIN_SUMMARY_INPUT_CHARS {
            warn!(chars = trimmed.len(), "extracted text too short, skipping summary call");
            return Ok(if trimmed.is_empty() {
                NO_TEXT_PLACEHOLDER.to_string()
            } else {
                trimmed.to_string()
            });
        }

        let request = CompletionRequest {
            system: Some(SUMMARY_SYSTEM_PROMPT.to_string()),
            text: summary_prompt(full_text),
            image: None,
            temperature: self.settings.temperature,
            max_tokens: self.settings.max_tokens,
        };
        let summary = self.backend.complete(request).await.map_err(|e| match e {
            BackendError::Timeout { secs } => SummarizationError::Timeout { secs },
            other => SummarizationError::Api(other.to_string()),
        })?;

        if summary.trim().is_empty() {
            warn!("model returned an empty summary");
            return Ok(SUMMARY_FAILED_PLACEHOLDER.to_string());
        }
        info!(chars = summary.len(), "summary generated");
        Ok(summary)
    }
}

#[async_trait]
impl DocumentProcessor for DocumentAnalyzer {
    async fn process_document(
        &self,
        image_paths: &[PathBuf],
        progress: &dyn PageProgress,
    ) -> Result<DocumentAnalysis, AnalysisError> {
        let full_text = self.extract_all(image_paths, progress).await?;
        let summary = self.summarize(&full_text).await?;
        Ok(DocumentAnalysis { full_text, summary })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoopProgress;
    use std::collections::VecDeque;
    use std::sync::Mutex;

    /// Replays scripted replies and records every request.
    struct Scripted {
        replies: Mutex<VecDeque<Result<String, BackendError>>>,
        seen: Mutex<Vec<CompletionRequest>>,
    }

    impl Scripted {
        fn new(replies: Vec<Result<String, BackendError>>) -> Arc<Self> {
            Arc::new(Self {
                replies: Mutex::new(replies.into()),
                seen: Mutex::new(Vec::new()),
            })
        }

        fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl CompletionBackend for Scripted {
        async fn complete(&self, request: CompletionRequest) -> Result<String, BackendError> {
            self.seen.lock().unwrap().push(request);
            self.replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Ok("default reply".into()))
        }
    }

    fn settings() -> AnalyzerSettings {
        AnalyzerSettings {
            retry_backoff_ms: 1,
            ..AnalyzerSettings::default()
        }
    }

    fn pages(dir: &Path, n: usize) -> Vec<PathBuf> {
        (1..=n)
            .map(|i| {
                let p = dir.join(format!("page_test_{i}.png"));
                std::fs::write(&p, b"png").unwrap();
                p
            })
            .collect()
    }

    fn rate_limited() -> Result<String, BackendError> {
        Err(BackendError::RateLimited("429 Too Many Requests".into()))
    }

    #[tokio::test]
    async fn pages_are_labelled_and_joined() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Scripted::new(vec![Ok("alpha".into()), Ok("beta".into())]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        let text = analyzer
            .extract_all(&pages(dir.path(), 2), &NoopProgress)
            .await
            .unwrap();

        assert_eq!(text, "--- Page 1 ---\nalpha\n\n\n--- Page 2 ---\nbeta\n");
        let seen = backend.seen.lock().unwrap();
        assert!(seen.iter().all(|r| r.image.is_some() && r.text == EXTRACTION_PROMPT));
    }

    #[tokio::test]
    async fn rate_limit_is_retried_until_success() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Scripted::new(vec![rate_limited(), rate_limited(), Ok("text".into())]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        let text = analyzer.extract_page(&pages(dir.path(), 1)[0], 1).await.unwrap();
        assert_eq!(text, "text");
        assert_eq!(backend.calls(), 3);
    }

    #[tokio::test]
    async fn rate_limit_gives_up_after_max_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Scripted::new(vec![rate_limited(), rate_limited(), rate_limited(), Ok("late".into())]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        let err = analyzer
            .extract_page(&pages(dir.path(), 1)[0], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::RateLimited { page: 1, attempts: 3, .. }));
        assert_eq!(backend.calls(), 3);
    }

    #[test]
    fn backoff_doubles_and_saturates() {
        assert_eq!(backoff_ms(1000, 1), 1000);
        assert_eq!(backoff_ms(1000, 2), 2000);
        assert_eq!(backoff_ms(1000, 3), 4000);
        assert_eq!(backoff_ms(1000, 80), u64::MAX);
        assert_eq!(backoff_ms(0, 80), 0);
    }

    #[tokio::test]
    async fn long_rate_limit_streak_surfaces_as_extraction_error() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Scripted::new((0..70).map(|_| rate_limited()).collect());
        let analyzer = DocumentAnalyzer::new(
            backend.clone(),
            AnalyzerSettings {
                max_attempts: 70,
                retry_backoff_ms: 0,
                ..AnalyzerSettings::default()
            },
        );

        let err = analyzer
            .extract_page(&pages(dir.path(), 1)[0], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::RateLimited { page: 1, attempts: 70, .. }));
        assert_eq!(backend.calls(), 70);
    }

    #[test]
    fn settings_from_config_cap_attempts() {
        let mut config = SummarizerConfig::default();
        config.max_attempts = 500;
        assert_eq!(AnalyzerSettings::from_config(&config).max_attempts, MAX_ATTEMPTS_CEILING);
        config.max_attempts = 0;
        assert_eq!(AnalyzerSettings::from_config(&config).max_attempts, 1);
    }

    #[tokio::test]
    async fn api_errors_are_not_retried() {
        let dir = tempfile::tempdir().unwrap();
        let backend = Scripted::new(vec![Err(BackendError::Api("invalid key".into()))]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        let err = analyzer
            .extract_page(&pages(dir.path(), 1)[0], 1)
            .await
            .unwrap_err();
        assert!(matches!(err, ExtractionError::Api { page: 1, .. }));
        assert_eq!(backend.calls(), 1);
    }

    #[tokio::test]
    async fn progress_hook_sees_every_page() {
        struct Rec(Mutex<Vec<(usize, usize)>>);
        impl PageProgress for Rec {
            fn on_page_extracted(&self, page: usize, total: usize) {
                self.0.lock().unwrap().push((page, total));
            }
        }

        let dir = tempfile::tempdir().unwrap();
        let analyzer = DocumentAnalyzer::new(Scripted::new(vec![]), settings());
        let rec = Rec(Mutex::new(Vec::new()));
        analyzer.extract_all(&pages(dir.path(), 3), &rec).await.unwrap();

        assert_eq!(*rec.0.lock().unwrap(), vec![(1, 3), (2, 3), (3, 3)]);
    }

    #[tokio::test]
    async fn short_text_skips_the_model() {
        let backend = Scripted::new(vec![]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        assert_eq!(analyzer.summarize("  tiny  ").await.unwrap(), "tiny");
        assert_eq!(analyzer.summarize(" \n ").await.unwrap(), NO_TEXT_PLACEHOLDER);
        assert_eq!(backend.calls(), 0);
    }

    #[tokio::test]
    async fn empty_model_summary_becomes_placeholder() {
        let backend = Scripted::new(vec![Ok(String::new())]);
        let analyzer = DocumentAnalyzer::new(backend.clone(), settings());

        let summary = analyzer.summarize(&"word ".repeat(40)).await.unwrap();
        assert_eq!(summary, SUMMARY_FAILED_PLACEHOLDER);

        let seen = backend.seen.lock().unwrap();
        assert_eq!(seen[0].system.as_deref(), Some(SUMMARY_SYSTEM_PROMPT));
        assert!(seen[0].image.is_none());
    }

    #[tokio::test]
    async fn summary_errors_are_wrapped() {
        let backend = Scripted::new(vec![Err(BackendError::Api("boom".into()))]);
        let analyzer = DocumentAnalyzer::new(backend, settings());

        let err = analyzer.summarize(&"word ".repeat(40)).await.unwrap_err();
        assert_eq!(err.to_string(), "Failed to generate summary: boom");
    }

    #[tokio::test]
    async fn process_document_returns_text_and_summary() {
        let dir = tempfile::tempdir().unwrap();
        let page_text = "This page holds more than fifty characters of meaningful text.";
        let backend = Scripted::new(vec![Ok(page_text.into()), Ok("the summary".into())]);
        let analyzer = DocumentAnalyzer::new(backend, settings());

        let analysis = analyzer
            .process_document(&pages(dir.path(), 1), &NoopProgress)
            .await
            .unwrap();
        assert!(analysis.full_text.contains(page_text));
        assert_eq!(analysis.summary, "the summary");
    }
}
