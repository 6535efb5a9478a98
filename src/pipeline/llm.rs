//! Table extraction: ask a text-generation model to turn OCR text into CSV.
//!
//! This module sends one chat request per file and hands the raw answer to
//! [`crate::pipeline::table`] for sentinel extraction. All prompt wording
//! lives in [`crate::prompts`] so it can change without touching the
//! request or error-handling logic here.
//!
//! There is deliberately no retry loop: a failed request fails the file,
//! and the batch result tells the caller which file to resubmit.

use crate::config::PipelineConfig;
use crate::error::{BatchError, TaskError};
use crate::pipeline::table::{extract_table_text, TableText};
use crate::prompts::table_prompt;
use async_trait::async_trait;
use edgequake_llm::{ChatMessage, CompletionOptions, LLMProvider, ProviderFactory};
use std::sync::Arc;
use tracing::{debug, warn};

/// Model used when none is configured.
pub const DEFAULT_MODEL: &str = "gpt-4o-mini";

/// A text-generation oracle: prompt in, free-form text out.
#[async_trait]
pub trait TextGenerator: Send + Sync {
    async fn generate(&self, prompt: &str) -> Result<String, TaskError>;
}

/// [`TextGenerator`] backed by an `edgequake-llm` provider.
pub struct LlmTextGenerator {
    provider: Arc<dyn LLMProvider>,
    options: CompletionOptions,
}

impl LlmTextGenerator {
    pub fn new(provider: Arc<dyn LLMProvider>, config: &PipelineConfig) -> Self {
        Self {
            provider,
            options: build_options(config),
        }
    }

    /// Resolve the provider from the config (see [`resolve_provider`]).
    pub fn from_config(config: &PipelineConfig) -> Result<Self, BatchError> {
        Ok(Self::new(resolve_provider(config)?, config))
    }
}

#[async_trait]
impl TextGenerator for LlmTextGenerator {
    async fn generate(&self, prompt: &str) -> Result<String, TaskError> {
        let messages = vec![ChatMessage::user(prompt)];
        let response = self
            .provider
            .chat(&messages, Some(&self.options))
            .await
            .map_err(|e| TaskError::ExtractionUnavailable {
                detail: e.to_string(),
            })?;
        debug!(
            "LLM: {} input tokens, {} output tokens",
            response.prompt_tokens, response.completion_tokens
        );
        Ok(response.content)
    }
}

/// Run the extraction stage for one document.
///
/// Fails only when the service cannot be reached or returns nothing; a
/// response without usable sentinels comes back as [`TableText::Degraded`].
pub async fn extract_table(
    generator: &dyn TextGenerator,
    text: &str,
    prompt_template: Option<&str>,
) -> Result<TableText, TaskError> {
    let prompt = table_prompt(prompt_template, text);
    let response = generator.generate(&prompt).await?;

    if response.trim().is_empty() {
        return Err(TaskError::ExtractionUnavailable {
            detail: "text-generation service returned an empty response".to_string(),
        });
    }

    let table = extract_table_text(&response);
    if table.is_degraded() {
        warn!(
            "Sentinels not found in model response ({} chars); using raw response",
            response.len()
        );
    }
    Ok(table)
}

/// Build `CompletionOptions` from the pipeline config.
fn build_options(config: &PipelineConfig) -> CompletionOptions {
    CompletionOptions {
        temperature: Some(config.temperature),
        max_tokens: Some(config.max_tokens),
        ..Default::default()
    }
}

fn create_provider(provider_name: &str, model: &str) -> Result<Arc<dyn LLMProvider>, BatchError> {
    ProviderFactory::create_llm_provider(provider_name, model).map_err(|e| {
        BatchError::ProviderNotConfigured {
            provider: provider_name.to_string(),
            hint: format!("{e}"),
        }
    })
}

/// Resolve the LLM provider, from most-specific to least-specific:
///
/// 1. a pre-built provider in `config.provider`;
/// 2. `config.provider_name` with `config.model` (default [`DEFAULT_MODEL`]);
/// 3. `EDGEQUAKE_LLM_PROVIDER` + `EDGEQUAKE_MODEL` when both are set;
/// 4. OpenAI when `OPENAI_API_KEY` is set;
/// 5. whatever `ProviderFactory::from_env` detects.
pub fn resolve_provider(config: &PipelineConfig) -> Result<Arc<dyn LLMProvider>, BatchError> {
    if let Some(ref provider) = config.provider {
        return Ok(Arc::clone(provider));
    }

    let model = config.model.as_deref().unwrap_or(DEFAULT_MODEL);

    if let Some(ref name) = config.provider_name {
        return create_provider(name, model);
    }

    if let (Ok(prov), Ok(env_model)) = (
        std::env::var("EDGEQUAKE_LLM_PROVIDER"),
        std::env::var("EDGEQUAKE_MODEL"),
    ) {
        if !prov.is_empty() && !env_model.is_empty() {
            return create_provider(&prov, &env_model);
        }
    }

    if let Ok(openai_key) = std::env::var("OPENAI_API_KEY") {
        if !openai_key.is_empty() {
            return create_provider("openai", model);
        }
    }

    let (llm_provider, _embedding) =
        ProviderFactory::from_env().map_err(|e| BatchError::ProviderNotConfigured {
            provider: "auto".to_string(),
            hint: format!(
                "No LLM provider could be auto-detected from environment.\n\
                Set OPENAI_API_KEY, ANTHROPIC_API_KEY, or configure a provider.\n\
                Error: {}",
                e
            ),
        })?;

    Ok(llm_provider)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    struct CannedGenerator {
        reply: Result<String, TaskError>,
        prompts: Mutex<Vec<String>>,
    }

    impl CannedGenerator {
        fn replying(reply: Result<String, TaskError>) -> Self {
            Self {
                reply,
                prompts: Mutex::new(Vec::new()),
            }
        }
    }

    #[async_trait]
    impl TextGenerator for CannedGenerator {
        async fn generate(&self, prompt: &str) -> Result<String, TaskError> {
            self.prompts.lock().unwrap().push(prompt.to_string());
            self.reply.clone()
        }
    }

    #[test]
    fn build_options_defaults() {
        let config = PipelineConfig::default();
        let opts = build_options(&config);
        assert_eq!(opts.temperature, Some(0.0));
        assert_eq!(opts.max_tokens, Some(1500));
    }

    #[tokio::test]
    async fn clean_extraction_sends_ocr_text_in_prompt() {
        let generator = CannedGenerator::replying(Ok("Sure!<*>1,2\n3,4<*>".into()));
        let table = extract_table(&generator, "ACME INVOICE", None).await.unwrap();
        assert_eq!(table, TableText::Clean("1,2\n3,4".into()));
        let prompts = generator.prompts.lock().unwrap();
        assert_eq!(prompts.len(), 1);
        assert!(prompts[0].contains("ACME INVOICE"));
    }

    #[tokio::test]
    async fn missing_sentinels_degrade_instead_of_failing() {
        let generator = CannedGenerator::replying(Ok("1,2\n3,4".into()));
        let table = extract_table(&generator, "", None).await.unwrap();
        assert_eq!(table, TableText::Degraded("1,2\n3,4".into()));
    }

    #[tokio::test]
    async fn empty_response_is_unavailable() {
        let generator = CannedGenerator::replying(Ok("   ".into()));
        let err = extract_table(&generator, "text", None).await.unwrap_err();
        assert!(matches!(err, TaskError::ExtractionUnavailable { .. }));
    }

    #[tokio::test]
    async fn transport_error_propagates() {
        let generator = CannedGenerator::replying(Err(TaskError::ExtractionUnavailable {
            detail: "connection reset".into(),
        }));
        let err = extract_table(&generator, "text", None).await.unwrap_err();
        assert!(err.to_string().contains("connection reset"));
    }
}
