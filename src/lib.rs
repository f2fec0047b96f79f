//! # pdf-summarizer
//!
//! Summarise PDF documents with Vision Language Models, as a background task
//! service.
//!
//! ## Why render pages instead of extracting text?
//!
//! Text-layer extraction fails on scanned documents and garbles multi-column
//! layouts, tables and figures. Instead every page is rasterised and a vision
//! model reads it the way a person would; a second, text-only call condenses
//! the transcription into a summary.
//!
//! ## Pipeline Overview
//!
//! ```text
//! upload
//!  │
//!  ├─ 1. Store     task created: processing, 0 %
//!  ├─ 2. Convert   rasterise pages via pdfium (spawn_blocking)      10 → 30 %
//!  ├─ 3. Extract   one vision call per page, sequential, retried    30 → 90 %
//!  ├─ 4. Summarise one text call over the labelled page text
//!  └─ 5. Complete  result stored, history updated, images removed  100 %
//! ```
//!
//! The [`TaskStore`] is the only shared state. The [`Orchestrator`] drives
//! each task detached from the request that submitted it, and callers learn
//! the outcome by polling the store.
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use pdf_summarizer::{Orchestrator, Pipeline, SummarizerConfig, TaskStore, Upload};
//! use std::sync::Arc;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // Provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = Arc::new(SummarizerConfig::default());
//!     let store = Arc::new(TaskStore::new(config.max_history_size));
//!     let pipeline = Pipeline::from_config(&config)?;
//!     let orchestrator = Orchestrator::new(store.clone(), config, pipeline);
//!
//!     let id = orchestrator.register(Upload {
//!         filename: "report.pdf".into(),
//!         path: "report.pdf".into(),
//!         size: std::fs::metadata("report.pdf")?.len(),
//!     })?;
//!     orchestrator.run(&id).await;
//!
//!     let task = store.get(&id).expect("task exists");
//!     println!("{:?}: {:?}", task.status, task.result.map(|r| r.summary));
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature   | Default | Description |
//! |-----------|---------|-------------|
//! | `server`  | on      | axum HTTP boundary ([`server`]) |
//! | `cli`     | on      | `pdf-summarizer` binary (clap + anyhow + tracing-subscriber + indicatif) |
//! | `bundled` | off     | embed the pdfium shared library at build time |

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod error;
pub mod history;
pub mod orchestrator;
pub mod pipeline;
pub mod progress;
pub mod prompts;
#[cfg(feature = "server")]
pub mod server;
pub mod storage;
pub mod store;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{ImageFormat, SummarizerConfig, SummarizerConfigBuilder, DEFAULT_MODEL};
pub use error::{
    AnalysisError, BackendError, ConfigError, ConversionError, ExtractionError, StoreError,
    SubmitError, SummarizationError, ValidationError,
};
pub use orchestrator::{Orchestrator, Upload};
pub use pipeline::{ConvertRequest, ConvertedPages, Converter, DocumentAnalysis, DocumentProcessor, Pipeline};
pub use progress::{NoopProgress, PageProgress};
pub use store::{StoreStats, TaskStore, UpdateOutcome};
pub use task::{HistoryEntry, ProcessingResult, Task, TaskId, TaskStatus};
