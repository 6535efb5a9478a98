//! Artifact persistence: upload the spreadsheet to the storage backend.
//!
//! One multipart `POST {base}/api/collections/{collection}/records` per
//! file, carrying:
//!
//! | field   | content                                  |
//! |---------|------------------------------------------|
//! | `user`  | owner id                                 |
//! | `excel` | the generated `.xlsx`                    |
//! | `image` | the source image (only when configured)  |
//!
//! Each task creates exactly one new record, so no locking or
//! read-modify-write is needed.

use crate::config::PipelineConfig;
use crate::error::TaskError;
use crate::output::StorageRecord;
use async_trait::async_trait;
use once_cell::sync::Lazy;
use regex::Regex;
use reqwest::multipart::{Form, Part};
use serde::Deserialize;
use tracing::debug;

/// MIME type of generated spreadsheets.
pub const XLSX_MIME: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet";

static RE_RECORD_ID: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"^[A-Za-z0-9_-]{1,100}$").unwrap());

/// Whether a backend-issued id is safe to hand back to callers.
pub fn is_valid_record_id(id: &str) -> bool {
    RE_RECORD_ID.is_match(id)
}

/// The source image, attached when the caller has it at hand.
#[derive(Debug, Clone)]
pub struct SourceImage {
    pub name: String,
    pub bytes: Vec<u8>,
    pub content_type: String,
}

/// Everything the backend needs to create one record.
#[derive(Debug, Clone)]
pub struct ArtifactUpload {
    pub owner_id: String,
    pub file_name: String,
    pub spreadsheet: Vec<u8>,
    pub image: Option<SourceImage>,
}

/// A storage backend that accepts one record per converted file.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn store(&self, upload: ArtifactUpload) -> Result<StorageRecord, TaskError>;
}

#[derive(Deserialize)]
struct RecordResponse {
    id: String,
}

/// HTTP client for a PocketBase-style records API.
#[derive(Clone)]
pub struct StorageClient {
    http: reqwest::Client,
    records_url: String,
    collection: String,
    token: Option<String>,
}

impl StorageClient {
    pub fn new(http: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            http,
            records_url: config.records_url(),
            collection: config.storage_collection.clone(),
            token: config.storage_token.clone(),
        }
    }

    fn build_form(upload: &ArtifactUpload) -> Result<Form, TaskError> {
        let local = |e: reqwest::Error| TaskError::PersistenceFailed {
            status: None,
            body: format!("building upload: {e}"),
        };

        let excel = Part::bytes(upload.spreadsheet.clone())
            .file_name(upload.file_name.clone())
            .mime_str(XLSX_MIME)
            .map_err(local)?;

        let mut form = Form::new()
            .text("user", upload.owner_id.clone())
            .part("excel", excel);

        if let Some(ref image) = upload.image {
            let part = Part::bytes(image.bytes.clone())
                .file_name(image.name.clone())
                .mime_str(&image.content_type)
                .map_err(local)?;
            form = form.part("image", part);
        }
        Ok(form)
    }
}

#[async_trait]
impl ArtifactStore for StorageClient {
    async fn store(&self, upload: ArtifactUpload) -> Result<StorageRecord, TaskError> {
        let form = Self::build_form(&upload)?;

        let mut request = self.http.post(&self.records_url).multipart(form);
        if let Some(ref token) = self.token {
            request = request.bearer_auth(token);
        }

        let response = request
            .send()
            .await
            .map_err(|e| TaskError::PersistenceFailed {
                status: None,
                body: format!("upload to {}: {}", self.records_url, e),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .unwrap_or_else(|e| format!("<response body unreadable: {e}>"));
        if !status.is_success() {
            return Err(TaskError::PersistenceFailed {
                status: Some(status.as_u16()),
                body,
            });
        }

        let record: RecordResponse =
            serde_json::from_str(&body).map_err(|e| TaskError::PersistenceFailed {
                status: Some(status.as_u16()),
                body: format!("unreadable record response ({e}): {body}"),
            })?;

        if !is_valid_record_id(&record.id) {
            return Err(TaskError::PersistenceFailed {
                status: Some(status.as_u16()),
                body: format!("backend returned an invalid record id: {:?}", record.id),
            });
        }

        debug!("Stored {} as record {}", upload.file_name, record.id);

        Ok(StorageRecord {
            id: record.id,
            collection: self.collection.clone(),
            file_name: upload.file_name,
            owner_id: upload.owner_id,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn record_id_validation() {
        assert!(is_valid_record_id("a1b2c3d4e5f6g7h"));
        assert!(is_valid_record_id("rec_1-x"));
        assert!(!is_valid_record_id(""));
        assert!(!is_valid_record_id("../etc/passwd"));
        assert!(!is_valid_record_id("id with space"));
        assert!(!is_valid_record_id(&"x".repeat(101)));
        assert!(is_valid_record_id(&"x".repeat(100)));
    }

    #[test]
    fn bad_image_mime_is_a_persistence_failure() {
        let upload = ArtifactUpload {
            owner_id: "u1".into(),
            file_name: "output.xlsx".into(),
            spreadsheet: vec![1, 2, 3],
            image: Some(SourceImage {
                name: "a.jpg".into(),
                bytes: vec![0xFF, 0xD8],
                content_type: "not a mime type at all".into(),
            }),
        };
        let err = StorageClient::build_form(&upload).unwrap_err();
        assert!(matches!(err, TaskError::PersistenceFailed { status: None, .. }));
    }
}
