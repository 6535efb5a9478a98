//! Input resolution: batch admission and loading of source images.
//!
//! Images arrive either as bytes already in memory (an upload handler) or
//! as local paths (the CLI). Either way the bytes are only read inside the
//! file's own unit of work, after the batch has been admitted, so an
//! oversized batch never touches the disk.

use crate::error::{BatchError, TaskError};
use chrono::{DateTime, Utc};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tracing::debug;

/// Where the bytes of a batch file come from.
#[derive(Debug, Clone)]
enum Source {
    Memory(Arc<[u8]>),
    Local(PathBuf),
}

/// One image submitted for conversion.
#[derive(Debug, Clone)]
pub struct BatchFile {
    name: String,
    source: Source,
}

impl BatchFile {
    /// An image already held in memory, e.g. from a multipart upload.
    pub fn from_bytes(name: impl Into<String>, bytes: impl Into<Vec<u8>>) -> Self {
        let bytes: Vec<u8> = bytes.into();
        Self {
            name: name.into(),
            source: Source::Memory(Arc::from(bytes)),
        }
    }

    /// An image on local disk. The file is not opened until the task runs.
    pub fn from_path(path: impl Into<PathBuf>) -> Self {
        let path = path.into();
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Self {
            name,
            source: Source::Local(path),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Local path, when the file came from disk.
    pub fn path(&self) -> Option<&Path> {
        match &self.source {
            Source::Local(p) => Some(p),
            Source::Memory(_) => None,
        }
    }

    /// Read the image bytes.
    pub async fn load(&self) -> Result<Arc<[u8]>, TaskError> {
        match &self.source {
            Source::Memory(bytes) => Ok(Arc::clone(bytes)),
            Source::Local(path) => {
                let bytes = tokio::fs::read(path).await.map_err(|e| {
                    TaskError::SourceUnreadable {
                        path: path.clone(),
                        detail: e.to_string(),
                    }
                })?;
                debug!("Loaded {} ({} bytes)", path.display(), bytes.len());
                Ok(Arc::from(bytes))
            }
        }
    }
}

/// Detect the MIME type of an image from its magic bytes.
///
/// Falls back to `application/octet-stream`, which the OCR service also
/// accepts.
pub fn image_content_type(bytes: &[u8]) -> &'static str {
    image::guess_format(bytes)
        .map(|f| f.to_mime_type())
        .unwrap_or("application/octet-stream")
}

/// An admitted batch: at most `max` files plus the owner they belong to.
///
/// Immutable once created.
#[derive(Debug, Clone)]
pub struct Batch {
    files: Vec<BatchFile>,
    owner_id: String,
    created_at: DateTime<Utc>,
}

impl Batch {
    /// Admit a batch, rejecting it before any I/O when it holds more than `max` files.
    pub fn new(
        files: Vec<BatchFile>,
        owner_id: impl Into<String>,
        max: usize,
    ) -> Result<Self, BatchError> {
        if files.len() > max {
            return Err(BatchError::BatchTooLarge {
                count: files.len(),
                max,
            });
        }
        Ok(Self {
            files,
            owner_id: owner_id.into(),
            created_at: Utc::now(),
        })
    }

    pub fn files(&self) -> &[BatchFile] {
        &self.files
    }

    pub fn owner_id(&self) -> &str {
        &self.owner_id
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }

    pub(crate) fn into_parts(self) -> (Vec<BatchFile>, String, DateTime<Utc>) {
        (self.files, self.owner_id, self.created_at)
    }
}
