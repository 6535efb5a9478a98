//! Configuration types for invoice-to-spreadsheet conversion.
//!
//! All pipeline behaviour is controlled through [`PipelineConfig`], built via
//! its [`PipelineConfigBuilder`]. Keeping every knob in one struct makes it
//! trivial to share the config across the per-file tasks (it is cloned into
//! each spawned unit) and to log exactly which endpoints a run talked to.
//!
//! The three external services each get their own section: OCR
//! (`ocr_*`), text generation (`model`, `provider_*`, `max_tokens`, …) and
//! storage (`storage_*`).

use crate::error::BatchError;
use edgequake_llm::LLMProvider;
use std::fmt;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

/// Hard ceiling on the number of files a single batch may contain.
pub const MAX_BATCH_SIZE: usize = 10;

/// Configuration for a batch conversion.
///
/// Built via [`PipelineConfig::builder()`] or using
/// [`PipelineConfig::default()`].
///
/// # Example
/// ```rust
/// use invoice_sheets::PipelineConfig;
///
/// let config = PipelineConfig::builder()
///     .ocr_endpoint("https://centralindia.api.cognitive.microsoft.com/vision/v3.2/read/analyze")
///     .ocr_key("secret")
///     .storage_base_url("http://localhost:8090")
///     .concurrency(4)
///     .build()
///     .unwrap();
/// ```
#[derive(Clone)]
pub struct PipelineConfig {
    /// Full URL of the OCR "analyze" endpoint that accepts the image upload.
    pub ocr_endpoint: String,

    /// Subscription key sent as `Ocp-Apim-Subscription-Key` on submit and poll.
    pub ocr_key: String,

    /// Delay between OCR submission and each poll of the operation handle. Default: 2 s.
    ///
    /// The read operation is asynchronous on the service side; polling
    /// immediately almost always yields `running`.
    pub ocr_settle_delay: Duration,

    /// Maximum number of polls while the OCR operation reports `running`. Default: 10.
    ///
    /// A non-success HTTP status on any poll ends the task immediately; this
    /// bound only applies to operations the service reports as unfinished.
    pub ocr_max_polls: u32,

    /// LLM model identifier for table extraction. Default: `gpt-4o-mini`.
    pub model: Option<String>,

    /// LLM provider name (e.g. "openai", "anthropic", "ollama").
    /// If None along with `provider`, uses `ProviderFactory::from_env()`.
    pub provider_name: Option<String>,

    /// Pre-constructed LLM provider. Takes precedence over `provider_name`.
    pub provider: Option<Arc<dyn LLMProvider>>,

    /// Maximum tokens the LLM may generate per file. Default: 1500.
    pub max_tokens: usize,

    /// Sampling temperature for table extraction. Default: 0.0.
    pub temperature: f32,

    /// Custom extraction prompt template. Must contain `{text}`.
    /// If None, uses [`crate::prompts::DEFAULT_TABLE_PROMPT`].
    pub prompt_template: Option<String>,

    /// Base URL of the storage backend, e.g. `http://localhost:8090`.
    pub storage_base_url: String,

    /// Collection receiving spreadsheet records. Default: `excel_files`.
    pub storage_collection: String,

    /// Optional bearer token for the storage backend.
    pub storage_token: Option<String>,

    /// Send the source image alongside the spreadsheet as the `image` field. Default: false.
    pub attach_source_image: bool,

    /// Directory where generated spreadsheets are written. Default: `./output`.
    pub output_dir: PathBuf,

    /// Number of files converted at the same time. Default: 10.
    ///
    /// The limit is shared by every batch submitted through one
    /// [`crate::convert::BatchConverter`], so concurrent batches do not
    /// multiply the load on the OCR and LLM services.
    pub concurrency: usize,

    /// Largest batch accepted. Default and maximum: [`MAX_BATCH_SIZE`].
    pub max_batch_size: usize,

    /// Per-request HTTP timeout in seconds for OCR and storage calls. Default: 60.
    pub http_timeout_secs: u64,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ocr_endpoint: String::new(),
            ocr_key: String::new(),
            ocr_settle_delay: Duration::from_secs(2),
            ocr_max_polls: 10,
            model: None,
            provider_name: None,
            provider: None,
            max_tokens: 1500,
            temperature: 0.0,
            prompt_template: None,
            storage_base_url: "http://localhost:8090".to_string(),
            storage_collection: "excel_files".to_string(),
            storage_token: None,
            attach_source_image: false,
            output_dir: PathBuf::from("output"),
            concurrency: MAX_BATCH_SIZE,
            max_batch_size: MAX_BATCH_SIZE,
            http_timeout_secs: 60,
        }
    }
}

impl fmt::Debug for PipelineConfig {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("PipelineConfig")
            .field("ocr_endpoint", &self.ocr_endpoint)
            .field("ocr_key", &"<redacted>")
            .field("ocr_settle_delay", &self.ocr_settle_delay)
            .field("ocr_max_polls", &self.ocr_max_polls)
            .field("model", &self.model)
            .field("provider_name", &self.provider_name)
            .field("provider", &self.provider.as_ref().map(|_| "<dyn LLMProvider>"))
            .field("max_tokens", &self.max_tokens)
            .field("temperature", &self.temperature)
            .field("storage_base_url", &self.storage_base_url)
            .field("storage_collection", &self.storage_collection)
            .field("attach_source_image", &self.attach_source_image)
            .field("output_dir", &self.output_dir)
            .field("concurrency", &self.concurrency)
            .field("max_batch_size", &self.max_batch_size)
            .finish()
    }
}

impl PipelineConfig {
    /// Create a new builder for `PipelineConfig`.
    pub fn builder() -> PipelineConfigBuilder {
        PipelineConfigBuilder {
            config: Self::default(),
        }
    }

    /// URL of the record-creation endpoint for the configured collection.
    pub fn records_url(&self) -> String {
        format!(
            "{}/api/collections/{}/records",
            self.storage_base_url.trim_end_matches('/'),
            self.storage_collection
        )
    }
}

/// Builder for [`PipelineConfig`].
#[derive(Debug)]
pub struct PipelineConfigBuilder {
    config: PipelineConfig,
}

impl PipelineConfigBuilder {
    pub fn ocr_endpoint(mut self, url: impl Into<String>) -> Self {
        self.config.ocr_endpoint = url.into();
        self
    }

    pub fn ocr_key(mut self, key: impl Into<String>) -> Self {
        self.config.ocr_key = key.into();
        self
    }

    pub fn ocr_settle_delay(mut self, delay: Duration) -> Self {
        self.config.ocr_settle_delay = delay;
        self
    }

    pub fn ocr_max_polls(mut self, n: u32) -> Self {
        self.config.ocr_max_polls = n.max(1);
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

    pub fn max_tokens(mut self, n: usize) -> Self {
        self.config.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.config.temperature = t.clamp(0.0, 2.0);
        self
    }

    pub fn prompt_template(mut self, template: impl Into<String>) -> Self {
        self.config.prompt_template = Some(template.into());
        self
    }

    pub fn storage_base_url(mut self, url: impl Into<String>) -> Self {
        self.config.storage_base_url = url.into();
        self
    }

    pub fn storage_collection(mut self, collection: impl Into<String>) -> Self {
        self.config.storage_collection = collection.into();
        self
    }

    pub fn storage_token(mut self, token: impl Into<String>) -> Self {
        self.config.storage_token = Some(token.into());
        self
    }

    pub fn attach_source_image(mut self, v: bool) -> Self {
        self.config.attach_source_image = v;
        self
    }

    pub fn output_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.config.output_dir = dir.into();
        self
    }

    pub fn concurrency(mut self, n: usize) -> Self {
        self.config.concurrency = n.max(1);
        self
    }

    pub fn max_batch_size(mut self, n: usize) -> Self {
        self.config.max_batch_size = n;
        self
    }

    pub fn http_timeout_secs(mut self, secs: u64) -> Self {
        self.config.http_timeout_secs = secs;
        self
    }

    /// Build the configuration, validating constraints.
    pub fn build(self) -> Result<PipelineConfig, BatchError> {
        let c = &self.config;
        if c.max_batch_size == 0 || c.max_batch_size > MAX_BATCH_SIZE {
            return Err(BatchError::InvalidConfig(format!(
                "Batch size limit must be 1–{}, got {}",
                MAX_BATCH_SIZE, c.max_batch_size
            )));
        }
        if c.concurrency == 0 {
            return Err(BatchError::InvalidConfig(
                "Concurrency must be ≥ 1".into(),
            ));
        }
        if c.max_tokens == 0 {
            return Err(BatchError::InvalidConfig(
                "max_tokens must be ≥ 1".into(),
            ));
        }
        if let Some(ref template) = c.prompt_template {
            if !template.contains("{text}") {
                return Err(BatchError::InvalidConfig(
                    "Prompt template must contain the {text} placeholder".into(),
                ));
            }
        }
        if c.storage_collection.is_empty() {
            return Err(BatchError::InvalidConfig(
                "Storage collection must not be empty".into(),
            ));
        }
        Ok(self.config)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_service_contract() {
        let c = PipelineConfig::default();
        assert_eq!(c.ocr_settle_delay, Duration::from_secs(2));
        assert_eq!(c.max_tokens, 1500);
        assert_eq!(c.max_batch_size, 10);
        assert_eq!(c.storage_collection, "excel_files");
    }

    #[test]
    fn records_url_strips_trailing_slash() {
        let c = PipelineConfig::builder()
            .storage_base_url("http://localhost:8090/")
            .build()
            .unwrap();
        assert_eq!(
            c.records_url(),
            "http://localhost:8090/api/collections/excel_files/records"
        );
    }

    #[test]
    fn batch_limit_above_ceiling_is_rejected() {
        let err = PipelineConfig::builder().max_batch_size(11).build().unwrap_err();
        assert!(matches!(err, BatchError::InvalidConfig(_)));
    }

    #[test]
    fn prompt_template_requires_placeholder() {
        let err = PipelineConfig::builder()
            .prompt_template("make a table")
            .build()
            .unwrap_err();
        assert!(err.to_string().contains("{text}"));
    }

    #[test]
    fn debug_redacts_ocr_key() {
        let c = PipelineConfig::builder().ocr_key("super-secret").build().unwrap();
        let dbg = format!("{c:?}");
        assert!(!dbg.contains("super-secret"));
    }
}
