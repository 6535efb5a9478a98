//! Text extraction: the two-phase OCR protocol.
//!
//! ## Protocol
//!
//! ```text
//! POST {endpoint}            body = image bytes
//!   ◀── 202 Accepted         Operation-Location: {handle}
//! sleep(settle_delay)
//! GET  {handle}
//!   ◀── 200 OK               {"status":"succeeded","analyzeResult":{"readResults":[…]}}
//! ```
//!
//! The read operation completes asynchronously on the service side. The
//! client waits a fixed settling delay before each poll and re-polls only
//! while the service reports the operation as `notStarted`/`running`,
//! at most `max_polls` times. A non-success HTTP status on the poll is
//! terminal for the file.

use crate::config::PipelineConfig;
use crate::error::TaskError;
use async_trait::async_trait;
use reqwest::header::CONTENT_TYPE;
use serde::Deserialize;
use serde_json::Value;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, warn};

/// Header carrying the service credential on both submit and poll.
pub const SUBSCRIPTION_KEY_HEADER: &str = "Ocp-Apim-Subscription-Key";

/// Header carrying the operation handle in the submit response.
pub const OPERATION_LOCATION_HEADER: &str = "Operation-Location";

/// Anything that can turn an image into a flat text blob.
#[async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Recognise the text of one image.
    ///
    /// An empty string is a valid result (no text found).
    async fn recognize(&self, image: &[u8], content_type: &str) -> Result<String, TaskError>;
}

/// Raw nested result of a read operation.
#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecognitionResult {
    #[serde(default)]
    pub status: Option<String>,
    #[serde(default)]
    pub analyze_result: Option<AnalyzeResult>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AnalyzeResult {
    #[serde(default)]
    pub read_results: Vec<ReadResult>,
}

/// One page of recognised text.
#[derive(Debug, Default, Deserialize)]
pub struct ReadResult {
    #[serde(default)]
    pub lines: Vec<Line>,
}

#[derive(Debug, Default, Deserialize)]
pub struct Line {
    #[serde(default)]
    pub text: Option<String>,
}

impl RecognitionResult {
    /// Concatenate every line, page by page, each followed by a single space.
    ///
    /// Reading order is whatever order the service lists the lines in.
    pub fn flatten(&self) -> String {
        let mut text = String::new();
        if let Some(ref analyze) = self.analyze_result {
            for page in &analyze.read_results {
                for line in page.lines.iter().filter_map(|l| l.text.as_deref()) {
                    text.push_str(line);
                    text.push(' ');
                }
            }
        }
        text
    }
}

/// What one poll response says about the operation.
#[derive(Debug, PartialEq, Eq)]
pub enum PollOutcome {
    /// The operation has not finished; poll again.
    Pending,
    /// The service gave up on the image.
    Failed,
    /// Recognised text (or the raw body, when it was not JSON).
    Done(String),
}

/// Interpret a successful poll body.
///
/// A body that is not JSON is handed on verbatim so later stages can still
/// make a best-effort table from it. JSON that does not fit the read-result
/// shape is walked leniently: lines whose `text` is not a string are skipped.
pub fn parse_poll_body(body: &str) -> PollOutcome {
    let value: Value = match serde_json::from_str(body) {
        Ok(value) => value,
        Err(e) => {
            warn!("OCR poll body is not JSON ({}); passing it through raw", e);
            return PollOutcome::Done(body.to_string());
        }
    };

    match value.get("status").and_then(Value::as_str) {
        Some("notStarted") | Some("running") => return PollOutcome::Pending,
        Some("failed") => return PollOutcome::Failed,
        _ => {}
    }

    match RecognitionResult::deserialize(&value) {
        Ok(result) => PollOutcome::Done(result.flatten()),
        Err(e) => {
            warn!("OCR read result has unexpected shape ({}); keeping the readable lines", e);
            PollOutcome::Done(flatten_value(&value))
        }
    }
}

/// Same walk as [`RecognitionResult::flatten`], over untyped JSON.
fn flatten_value(value: &Value) -> String {
    let lines = value
        .pointer("/analyzeResult/readResults")
        .and_then(Value::as_array)
        .into_iter()
        .flatten()
        .filter_map(|page| page.get("lines").and_then(Value::as_array))
        .flatten()
        .filter_map(|line| line.get("text").and_then(Value::as_str));

    let mut text = String::new();
    for line in lines {
        text.push_str(line);
        text.push(' ');
    }
    text
}

/// HTTP client for the OCR read service.
#[derive(Clone)]
pub struct OcrClient {
    http: reqwest::Client,
    endpoint: String,
    key: String,
    settle_delay: Duration,
    max_polls: u32,
}

impl OcrClient {
    pub fn new(http: reqwest::Client, config: &PipelineConfig) -> Self {
        Self {
            http,
            endpoint: config.ocr_endpoint.clone(),
            key: config.ocr_key.clone(),
            settle_delay: config.ocr_settle_delay,
            max_polls: config.ocr_max_polls.max(1),
        }
    }

    /// Phase 1: upload the image and return the operation handle.
    async fn submit(&self, image: &[u8], content_type: &str) -> Result<String, TaskError> {
        let response = self
            .http
            .post(&self.endpoint)
            .header(CONTENT_TYPE, content_type)
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .body(image.to_vec())
            .send()
            .await
            .map_err(|e| TaskError::RecognitionUnavailable {
                detail: format!("submit to {}: {}", self.endpoint, e),
            })?;

        let status = response.status();
        if !status.is_success() {
            let body = response
                .text()
                .await
                .unwrap_or_else(|e| format!("<response body unreadable: {e}>"));
            return Err(TaskError::RecognitionRejected {
                status: Some(status.as_u16()),
                body,
            });
        }

        response
            .headers()
            .get(OPERATION_LOCATION_HEADER)
            .and_then(|v| v.to_str().ok())
            .map(str::to_string)
            .ok_or_else(|| TaskError::RecognitionRejected {
                status: Some(status.as_u16()),
                body: format!("response carries no {OPERATION_LOCATION_HEADER} header"),
            })
    }

    /// Phase 2: one authenticated read of the operation handle.
    ///
    /// `Ok(None)` means the operation is still running.
    async fn poll(&self, handle: &str) -> Result<Option<String>, TaskError> {
        let response = self
            .http
            .get(handle)
            .header(SUBSCRIPTION_KEY_HEADER, &self.key)
            .send()
            .await
            .map_err(|e| TaskError::RecognitionUnavailable {
                detail: format!("poll {}: {}", handle, e),
            })?;

        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|e| TaskError::RecognitionUnavailable {
                detail: format!("reading poll response: {}", e),
            })?;

        if !status.is_success() {
            return Err(TaskError::RecognitionRejected {
                status: Some(status.as_u16()),
                body,
            });
        }

        match parse_poll_body(&body) {
            PollOutcome::Done(text) => Ok(Some(text)),
            PollOutcome::Pending => Ok(None),
            PollOutcome::Failed => Err(TaskError::RecognitionRejected {
                status: Some(status.as_u16()),
                body,
            }),
        }
    }
}

#[async_trait]
impl TextRecognizer for OcrClient {
    async fn recognize(&self, image: &[u8], content_type: &str) -> Result<String, TaskError> {
        let handle = self.submit(image, content_type).await?;
        debug!("OCR operation accepted: {}", handle);

        for attempt in 1..=self.max_polls {
            sleep(self.settle_delay).await;
            match self.poll(&handle).await? {
                Some(text) => {
                    debug!("OCR finished after {} poll(s), {} chars", attempt, text.len());
                    return Ok(text);
                }
                None => debug!("OCR poll {}/{}: still running", attempt, self.max_polls),
            }
        }

        Err(TaskError::RecognitionRejected {
            status: None,
            body: format!(
                "timed out: operation still running after {} polls {:?} apart",
                self.max_polls, self.settle_delay
            ),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flatten_walks_pages_then_lines() {
        let body = r#"{
            "status": "succeeded",
            "analyzeResult": {
                "readResults": [
                    {"lines": [{"text": "INVOICE"}, {"text": "No. 42"}]},
                    {"lines": [{"text": "Total 100"}]}
                ]
            }
        }"#;
        assert_eq!(
            parse_poll_body(body),
            PollOutcome::Done("INVOICE No. 42 Total 100 ".to_string())
        );
    }

    #[test]
    fn no_lines_yields_empty_text() {
        let body = r#"{"status":"succeeded","analyzeResult":{"readResults":[{"lines":[]}]}}"#;
        assert_eq!(parse_poll_body(body), PollOutcome::Done(String::new()));
    }

    #[test]
    fn missing_analyze_result_yields_empty_text() {
        assert_eq!(parse_poll_body("{}"), PollOutcome::Done(String::new()));
    }

    #[test]
    fn non_json_body_passes_through_raw() {
        let raw = "plain text, not json";
        assert_eq!(parse_poll_body(raw), PollOutcome::Done(raw.to_string()));
    }

    #[test]
    fn running_and_failed_statuses() {
        assert_eq!(parse_poll_body(r#"{"status":"running"}"#), PollOutcome::Pending);
        assert_eq!(parse_poll_body(r#"{"status":"notStarted"}"#), PollOutcome::Pending);
        assert_eq!(parse_poll_body(r#"{"status":"failed"}"#), PollOutcome::Failed);
    }

    #[test]
    fn line_without_text_is_tolerated() {
        let body = r#"{"analyzeResult":{"readResults":[{"lines":[{"boundingBox":[1,2]},{"text":"x"}]}]}}"#;
        assert_eq!(parse_poll_body(body), PollOutcome::Done("x ".to_string()));
    }

    #[test]
    fn null_line_text_is_skipped() {
        let body = r#"{"status":"succeeded","analyzeResult":{"readResults":[{"lines":[{"text":"A"},{"text":null}]}]}}"#;
        assert_eq!(parse_poll_body(body), PollOutcome::Done("A ".to_string()));
    }

    #[test]
    fn mistyped_fields_keep_the_readable_lines() {
        let body = r#"{"status":"succeeded","analyzeResult":{"readResults":[
            {"lines":[{"text":"A"},{"text":7},{"text":"B"}]},
            {"lines":null},
            {"lines":[{"text":"C"}]}
        ]}}"#;
        assert_eq!(parse_poll_body(body), PollOutcome::Done("A B C ".to_string()));
    }

    #[test]
    fn json_that_is_not_a_read_result_has_no_text() {
        assert_eq!(parse_poll_body("[1,2,3]"), PollOutcome::Done(String::new()));
    }
}
