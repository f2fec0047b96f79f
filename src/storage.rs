//! Upload handling on the local filesystem.
//!
//! Uploads are validated before a byte is written (extension, declared
//! content type), then streamed to disk chunk by chunk through an
//! [`UploadWriter`] that enforces the size cap and the `%PDF` magic as the
//! bytes arrive. A writer that is dropped before [`UploadWriter::finish`]
//! removes its partial file.

use crate::config::SummarizerConfig;
use crate::error::{SubmitError, ValidationError};
use once_cell::sync::Lazy;
use regex::Regex;
use std::path::{Path, PathBuf};
use tokio::fs::File;
use tokio::io::AsyncWriteExt;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Leading bytes of every PDF file.
pub const PDF_MAGIC: &[u8; 4] = b"%PDF";

/// Fallback name for uploads whose filename sanitises to nothing.
pub const FALLBACK_FILENAME: &str = "unnamed.pdf";

static RE_UNSAFE_CHARS: Lazy<Regex> = Lazy::new(|| Regex::new(r"[^A-Za-z0-9._-]").unwrap());

/// Strip directory components and replace every character outside
/// `[A-Za-z0-9._-]` with `_`.
pub fn sanitize_filename(filename: &str) -> String {
    let base = filename.rsplit(['/', '\\']).next().unwrap_or_default();
    let safe = RE_UNSAFE_CHARS.replace_all(base, "_");
    if safe.is_empty() || safe == "." {
        FALLBACK_FILENAME.to_string()
    } else {
        safe.into_owned()
    }
}

/// Sanitised filename prefixed with 8 random hex digits.
pub fn unique_filename(filename: &str) -> String {
    let mut prefix = Uuid::new_v4().simple().to_string();
    prefix.truncate(8);
    format!("{prefix}_{}", sanitize_filename(filename))
}

/// Check what can be checked before reading the body.
///
/// Returns the filename to record for the task.
pub fn validate_upload(
    filename: Option<&str>,
    content_type: Option<&str>,
    config: &SummarizerConfig,
) -> Result<String, ValidationError> {
    let filename = match filename.map(str::trim) {
        Some(name) if !name.is_empty() => name,
        _ => return Err(ValidationError::MissingFilename),
    };
    if !config.is_file_allowed(filename) {
        return Err(ValidationError::InvalidExtension {
            allowed: config.allowed_extensions.clone(),
        });
    }
    // Content type can be spoofed; only reject an explicit mismatch.
    if let Some(ct) = content_type {
        if !ct.is_empty() && !ct.starts_with("application/pdf") {
            return Err(ValidationError::InvalidContentType {
                content_type: ct.to_string(),
            });
        }
    }
    Ok(filename.to_string())
}

/// A fully written upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoredUpload {
    pub path: PathBuf,
    pub size: u64,
}

/// Streams one upload to disk.
pub struct UploadWriter {
    path: PathBuf,
    file: Option<File>,
    written: u64,
    max_size: u64,
    head: Vec<u8>,
    finished: bool,
}

impl UploadWriter {
    /// Create `dir` if needed and open a uniquely named file for `filename`.
    pub async fn create(dir: &Path, filename: &str, max_size: u64) -> Result<Self, SubmitError> {
        tokio::fs::create_dir_all(dir)
            .await
            .map_err(|source| SubmitError::Storage {
                path: dir.to_path_buf(),
                source,
            })?;
        let path = dir.join(unique_filename(filename));
        let file = File::create(&path)
            .await
            .map_err(|source| SubmitError::Storage {
                path: path.clone(),
                source,
            })?;
        Ok(Self {
            path,
            file: Some(file),
            written: 0,
            max_size,
            head: Vec::with_capacity(PDF_MAGIC.len()),
            finished: false,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Bytes accepted so far.
    pub fn written(&self) -> u64 {
        self.written
    }

    /// Append a chunk, rejecting it if the total would exceed the cap or the
    /// file turns out not to be a PDF.
    pub async fn write_chunk(&mut self, chunk: &[u8]) -> Result<(), SubmitError> {
        if chunk.is_empty() {
            return Ok(());
        }
        let total = self.written + chunk.len() as u64;
        if total > self.max_size {
            return Err(ValidationError::FileTooLarge { max: self.max_size }.into());
        }

        if self.head.len() < PDF_MAGIC.len() {
            let need = PDF_MAGIC.len() - self.head.len();
            self.head.extend_from_slice(&chunk[..need.min(chunk.len())]);
            if self.head.len() == PDF_MAGIC.len() && self.head != PDF_MAGIC {
                return Err(ValidationError::NotAPdf {
                    magic: self.head.clone(),
                }
                .into());
            }
        }

        let Some(file) = self.file.as_mut() else {
            return Err(SubmitError::Storage {
                path: self.path.clone(),
                source: std::io::Error::other("upload writer already closed"),
            });
        };
        file.write_all(chunk)
            .await
            .map_err(|source| SubmitError::Storage {
                path: self.path.clone(),
                source,
            })?;
        self.written = total;
        Ok(())
    }

    /// Flush and keep the file.
    pub async fn finish(mut self) -> Result<StoredUpload, SubmitError> {
        if self.written == 0 {
            return Err(ValidationError::EmptyFile.into());
        }
        if self.head != PDF_MAGIC {
            return Err(ValidationError::NotAPdf {
                magic: self.head.clone(),
            }
            .into());
        }
        if let Some(mut file) = self.file.take() {
            let flushed = async {
                file.flush().await?;
                file.sync_all().await
            }
            .await;
            flushed.map_err(|source| SubmitError::Storage {
                path: self.path.clone(),
                source,
            })?;
        }
        self.finished = true;
        debug!(path = %self.path.display(), bytes = self.written, "upload stored");
        Ok(StoredUpload {
            path: self.path.clone(),
            size: self.written,
        })
    }
}

impl Drop for UploadWriter {
    fn drop(&mut self) {
        if self.finished {
            return;
        }
        drop(self.file.take());
        match std::fs::remove_file(&self.path) {
            Ok(()) => debug!(path = %self.path.display(), "partial upload removed"),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
            Err(e) => warn!(path = %self.path.display(), error = %e, "failed to remove partial upload"),
        }
    }
}

/// Remove everything inside `dir`, keeping the directory itself.
///
/// A missing directory counts as already clean. Returns the number of
/// entries removed.
pub async fn clear_directory(dir: &Path) -> std::io::Result<usize> {
    let mut entries = match tokio::fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(0),
        Err(e) => return Err(e),
    };

    let mut removed = 0;
    while let Some(entry) = entries.next_entry().await? {
        let path = entry.path();
        let result = if entry.file_type().await?.is_dir() {
            tokio::fs::remove_dir_all(&path).await
        } else {
            tokio::fs::remove_file(&path).await
        };
        match result {
            Ok(()) => removed += 1,
            Err(e) => warn!(path = %path.display(), error = %e, "failed to remove entry"),
        }
    }
    info!(dir = %dir.display(), removed, "directory cleared");
    Ok(removed)
}
