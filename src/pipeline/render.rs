//! Convert stage: rasterise every page of a PDF and save it as an image file.
//!
//! ## Why spawn_blocking?
//!
//! `pdfium-render` wraps the pdfium C++ library, which is CPU-heavy and not
//! async-aware. [`PdfConverter`] runs the whole render loop on the blocking
//! pool so concurrent orchestrations keep reporting progress and the HTTP
//! handlers stay responsive.
//!
//! ## Layering
//!
//! A [`Rasterizer`] turns a PDF into `DynamicImage`s and hands each one to a
//! [`PageSink`] as soon as it is rendered, so at most one page bitmap is held
//! in memory. [`ImageWriter`] is the sink that enforces the page limit and
//! writes the files; if anything fails before it is finished, the files it
//! already wrote are removed again.

use crate::config::ImageFormat;
use crate::error::ConversionError;
use crate::pipeline::{ConvertRequest, ConvertedPages, Converter};
use async_trait::async_trait;
use image::DynamicImage;
use pdfium_render::prelude::*;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Receives pages from a [`Rasterizer`].
pub trait PageSink {
    /// Called once with the document's page count, before any page.
    fn begin(&mut self, page_count: usize) -> Result<(), ConversionError>;

    /// Called for each rendered page, in order. `index` is 0-based.
    fn accept(&mut self, index: usize, image: DynamicImage) -> Result<(), ConversionError>;
}

/// Blocking PDF renderer.
pub trait Rasterizer: Send + Sync {
    /// Render every page of `pdf` at `dpi`, capping the longest edge at
    /// `max_edge_px`, and feed the results to `sink`.
    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        max_edge_px: u32,
        sink: &mut dyn PageSink,
    ) -> Result<(), ConversionError>;
}

// ── pdfium ───────────────────────────────────────────────────────────────

/// [`Rasterizer`] backed by pdfium, bound through `pdfium-auto` (downloaded
/// and cached on first use unless `PDFIUM_LIB_PATH` points at a copy).
#[derive(Debug, Default, Clone, Copy)]
pub struct PdfiumRasterizer;

impl Rasterizer for PdfiumRasterizer {
    fn rasterize(
        &self,
        pdf: &Path,
        dpi: u32,
        max_edge_px: u32,
        sink: &mut dyn PageSink,
    ) -> Result<(), ConversionError> {
        let pdfium = pdfium_auto::bind_pdfium_silent()
            .map_err(|e| ConversionError::RendererUnavailable(e.to_string()))?;

        let document = pdfium
            .load_pdf_from_file(pdf, None)
            .map_err(|e| ConversionError::Unreadable {
                path: pdf.to_path_buf(),
                detail: format!("{e:?}"),
            })?;

        let pages = document.pages();
        let page_count = pages.len() as usize;
        info!(pages = page_count, path = %pdf.display(), "PDF loaded");
        sink.begin(page_count)?;

        let render_config = PdfRenderConfig::new()
            .scale_page_by_factor(dpi as f32 / 72.0)
            .set_maximum_width(max_edge_px as i32)
            .set_maximum_height(max_edge_px as i32);

        for (index, page) in pages.iter().enumerate() {
            let bitmap = page.render_with_config(&render_config).map_err(|e| {
                ConversionError::RenderFailed {
                    page: index + 1,
                    detail: format!("{e:?}"),
                }
            })?;
            let image = bitmap.as_image();
            debug!(
                page = index + 1,
                width = image.width(),
                height = image.height(),
                "rendered page"
            );
            sink.accept(index, image)?;
        }
        Ok(())
    }
}

// ── image files ──────────────────────────────────────────────────────────

/// [`PageSink`] that saves each page as `page_<batch>_<n>.<ext>`.
///
/// Dropping an unfinished writer deletes everything it wrote.
pub struct ImageWriter {
    dir: PathBuf,
    format: ImageFormat,
    max_pages: usize,
    batch: String,
    page_count: usize,
    written: Vec<PathBuf>,
    finished: bool,
}

impl ImageWriter {
    pub fn new(dir: impl Into<PathBuf>, format: ImageFormat, max_pages: usize) -> Self {
        let mut batch = Uuid::new_v4().simple().to_string();
        batch.truncate(8);
        Self {
            dir: dir.into(),
            format,
            max_pages,
            batch,
            page_count: 0,
            written: Vec::new(),
            finished: false,
        }
    }

    /// Keep the written files and hand them over.
    pub fn finish(mut self) -> ConvertedPages {
        self.finished = true;
        ConvertedPages {
            image_paths: std::mem::take(&mut self.written),
            page_count: self.page_count,
        }
    }

    fn page_path(&self, page: usize) -> PathBuf {
        self.dir
            .join(format!("page_{}_{}.{}", self.batch, page, self.format.extension()))
    }
}

impl PageSink for ImageWriter {
    fn begin(&mut self, page_count: usize) -> Result<(), ConversionError> {
        if page_count > self.max_pages {
            return Err(ConversionError::PageLimitExceeded {
                pages: page_count,
                max: self.max_pages,
            });
        }
        self.page_count = page_count;
        Ok(())
    }

    fn accept(&mut self, index: usize, image: DynamicImage) -> Result<(), ConversionError> {
        let page = index + 1;
        let path = self.page_path(page);
        // JPEG has no alpha channel.
        let image = match self.format {
            ImageFormat::Jpeg => DynamicImage::ImageRgb8(image.to_rgb8()),
            ImageFormat::Png => image,
        };
        image
            .save_with_format(&path, self.format.as_image_format())
            .map_err(|e| ConversionError::SaveFailed {
                page,
                path: path.clone(),
                detail: e.to_string(),
            })?;
        self.written.push(path);
        Ok(())
    }
}

impl Drop for ImageWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        for path in &self.written {
            if let Err(e) = std::fs::remove_file(path) {
                warn!(path = %path.display(), error = %e, "failed to remove partial page image");
            }
        }
    }
}

// ── converter ────────────────────────────────────────────────────────────

/// The production [`Converter`]: a [`Rasterizer`] driven on the blocking pool.
#[derive(Clone)]
pub struct PdfConverter {
    rasterizer: Arc<dyn Rasterizer>,
}

impl PdfConverter {
    pub fn new(rasterizer: Arc<dyn Rasterizer>) -> Self {
        Self { rasterizer }
    }

    /// A converter using pdfium.
    pub fn pdfium() -> Self {
        Self::new(Arc::new(PdfiumRasterizer))
    }
}

#[async_trait]
impl Converter for PdfConverter {
    async fn convert(&self, request: ConvertRequest) -> Result<ConvertedPages, ConversionError> {
        if !tokio::fs::try_exists(&request.pdf_path).await.unwrap_or(false) {
            return Err(ConversionError::FileNotFound {
                path: request.pdf_path,
            });
        }
        tokio::fs::create_dir_all(&request.output_dir)
            .await
            .map_err(|source| ConversionError::OutputDir {
                path: request.output_dir.clone(),
                source,
            })?;

        let rasterizer = Arc::clone(&self.rasterizer);
        let handle = tokio::task::spawn_blocking(move || {
            let mut writer =
                ImageWriter::new(&request.output_dir, request.format, request.max_pages);
            rasterizer.rasterize(
                &request.pdf_path,
                request.dpi,
                request.max_rendered_pixels,
                &mut writer,
            )?;
            Ok(writer.finish())
        });

        match handle.await {
            Ok(result) => result,
            // Let the orchestrator's catch-all see the original panic.
            Err(e) if e.is_panic() => std::panic::resume_unwind(e.into_panic()),
            Err(e) => Err(ConversionError::Aborted(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use image::{Rgba, RgbaImage};

    /// Renders `pages` solid squares, failing on `fail_on` (1-indexed) if set.
    struct FakeRasterizer {
        pages: usize,
        fail_on: Option<usize>,
    }

    impl Rasterizer for FakeRasterizer {
        fn rasterize(
            &self,
            _pdf: &Path,
            _dpi: u32,
            _max_edge_px: u32,
            sink: &mut dyn PageSink,
        ) -> Result<(), ConversionError> {
            sink.begin(self.pages)?;
            for index in 0..self.pages {
                if self.fail_on == Some(index + 1) {
                    return Err(ConversionError::RenderFailed {
                        page: index + 1,
                        detail: "corrupt content stream".into(),
                    });
                }
                let img = RgbaImage::from_pixel(8, 8, Rgba([0, 0, 255, 128]));
                sink.accept(index, DynamicImage::ImageRgba8(img))?;
            }
            Ok(())
        }
    }

    struct Fixture {
        _dir: tempfile::TempDir,
        pdf: PathBuf,
        out: PathBuf,
    }

    fn fixture() -> Fixture {
        let dir = tempfile::tempdir().unwrap();
        let pdf = dir.path().join("doc.pdf");
        std::fs::write(&pdf, b"%PDF-1.4\n").unwrap();
        let out = dir.path().join("temp");
        Fixture {
            pdf,
            out,
            _dir: dir,
        }
    }

    fn request(f: &Fixture, format: ImageFormat, max_pages: usize) -> ConvertRequest {
        ConvertRequest {
            pdf_path: f.pdf.clone(),
            output_dir: f.out.clone(),
            dpi: 200,
            format,
            max_pages,
            max_rendered_pixels: 3000,
        }
    }

    fn converter(pages: usize, fail_on: Option<usize>) -> PdfConverter {
        PdfConverter::new(Arc::new(FakeRasterizer { pages, fail_on }))
    }

    fn files_in(dir: &Path) -> usize {
        std::fs::read_dir(dir).map(|d| d.count()).unwrap_or(0)
    }

    #[tokio::test]
    async fn writes_one_file_per_page_in_order() {
        let f = fixture();
        let pages = converter(3, None)
            .convert(request(&f, ImageFormat::Png, 100))
            .await
            .unwrap();

        assert_eq!(pages.page_count, 3);
        assert_eq!(pages.image_paths.len(), 3);
        for (i, path) in pages.image_paths.iter().enumerate() {
            assert!(path.exists());
            let name = path.file_name().unwrap().to_str().unwrap();
            assert!(name.starts_with("page_"), "{name}");
            assert!(name.ends_with(&format!("_{}.png", i + 1)), "{name}");
        }
    }

    #[tokio::test]
    async fn jpeg_output_drops_alpha() {
        let f = fixture();
        let pages = converter(1, None)
            .convert(request(&f, ImageFormat::Jpeg, 100))
            .await
            .unwrap();

        let path = &pages.image_paths[0];
        assert_eq!(path.extension().unwrap(), "jpg");
        let decoded = image::open(path).unwrap();
        assert!(!decoded.color().has_alpha());
    }

    #[tokio::test]
    async fn page_limit_is_rejected_without_files() {
        let f = fixture();
        let err = converter(150, None)
            .convert(request(&f, ImageFormat::Png, 100))
            .await
            .unwrap_err();

        assert!(matches!(
            err,
            ConversionError::PageLimitExceeded { pages: 150, max: 100 }
        ));
        assert_eq!(files_in(&f.out), 0);
    }

    #[tokio::test]
    async fn render_failure_removes_pages_already_written() {
        let f = fixture();
        let err = converter(4, Some(3))
            .convert(request(&f, ImageFormat::Png, 100))
            .await
            .unwrap_err();

        assert!(matches!(err, ConversionError::RenderFailed { page: 3, .. }));
        assert_eq!(files_in(&f.out), 0, "partial pages must be cleaned up");
    }

    #[tokio::test]
    async fn missing_pdf_is_reported() {
        let f = fixture();
        let mut req = request(&f, ImageFormat::Png, 100);
        req.pdf_path = f.out.join("nope.pdf");

        let err = converter(1, None).convert(req).await.unwrap_err();
        assert!(matches!(err, ConversionError::FileNotFound { .. }));
    }

    #[test]
    fn batches_get_distinct_names() {
        let a = ImageWriter::new("/tmp", ImageFormat::Png, 1);
        let b = ImageWriter::new("/tmp", ImageFormat::Png, 1);
        assert_ne!(a.page_path(1), b.page_path(1));
        assert_eq!(a.batch.len(), 8);
    }
}
