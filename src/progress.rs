//! Per-page progress hook for the extraction stage.
//!
//! The extraction stage calls [`PageProgress::on_page_extracted`] after every
//! page. The orchestrator passes an implementation that writes through the
//! task store; library callers that drive a
//! [`crate::pipeline::DocumentProcessor`] directly can pass
//! [`NoopProgress`] or their own hook (a terminal bar, a channel, ...).
//!
//! # Example
//!
//! ```rust
//! use pdf_summarizer::PageProgress;
//! use std::sync::atomic::{AtomicUsize, Ordering};
//!
//! #[derive(Default)]
//! struct Counter(AtomicUsize);
//!
//! impl PageProgress for Counter {
//!     fn on_page_extracted(&self, _page: usize, _total: usize) {
//!         self.0.fetch_add(1, Ordering::SeqCst);
//!     }
//! }
//!
//! let counter = Counter::default();
//! counter.on_page_extracted(1, 2);
//! assert_eq!(counter.0.load(Ordering::SeqCst), 1);
//! ```

/// Called by the extraction stage as pages finish.
///
/// Methods are synchronous and default to no-ops, so implementations only
/// override what they need. They run on the orchestration task between two
/// model calls and must return quickly.
pub trait PageProgress: Send + Sync {
    /// A page's text has been extracted.
    ///
    /// * `page`: 1-indexed page number
    /// * `total`: number of pages in the document
    fn on_page_extracted(&self, page: usize, total: usize) {
        let _ = (page, total);
    }
}

/// A hook that ignores every event.
pub struct NoopProgress;

impl PageProgress for NoopProgress {}

/// Map page `page` of `total` into the `[start, end]` percentage band.
///
/// `total == 0` maps to `start`.
pub fn band_percent(start: u8, end: u8, page: usize, total: usize) -> i64 {
    if total == 0 {
        return i64::from(start);
    }
    let span = i64::from(end.saturating_sub(start));
    let page = page.min(total) as i64;
    i64::from(start) + span * page / total as i64
}
