//! Batch conversion coordinator.
//!
//! [`BatchConverter::convert`] admits a batch, spawns one Tokio task per
//! file, and waits for every one of them. Each unit owns its
//! [`ConversionTask`] and drives it through
//! `Recognizing → Extracting → Materializing → Persisting`. A failing unit
//! records its [`TaskError`] and stops; it never cancels or delays its
//! siblings. Even a panicking unit only turns into a `TaskAborted` entry.
//!
//! Units run in parallel, bounded by a semaphore shared by every batch
//! submitted through the same converter.

use crate::config::PipelineConfig;
use crate::error::{BatchError, TaskError};
use crate::output::{BatchResult, FileOutcome};
use crate::pipeline::input::{image_content_type, Batch, BatchFile};
use crate::pipeline::llm::{extract_table, LlmTextGenerator, TextGenerator};
use crate::pipeline::ocr::{OcrClient, TextRecognizer};
use crate::pipeline::persist::{ArtifactStore, ArtifactUpload, SourceImage, StorageClient};
use crate::pipeline::sheet::{artifact_file_name, materialize};
use crate::progress::{NoopProgressCallback, ProgressCallback};
use crate::task::ConversionTask;
use futures::future::join_all;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::Semaphore;
use tracing::{debug, info, warn};

/// Shared, read-only context handed to every unit of work.
struct Pipeline {
    config: PipelineConfig,
    recognizer: Arc<dyn TextRecognizer>,
    generator: Arc<dyn TextGenerator>,
    store: Arc<dyn ArtifactStore>,
    progress: ProgressCallback,
    permits: Arc<Semaphore>,
}

/// Converts batches of invoice images into stored spreadsheets.
///
/// Collaborators are injected at construction; [`BatchConverter::from_config`]
/// wires the HTTP clients for the real services.
///
/// # Example
/// ```rust,no_run
/// use invoice_sheets::{BatchConverter, BatchFile, PipelineConfig};
///
/// # #[tokio::main]
/// # async fn main() -> Result<(), Box<dyn std::error::Error>> {
/// let config = PipelineConfig::builder()
///     .ocr_endpoint("https://example.cognitiveservices.azure.com/vision/v3.2/read/analyze")
///     .ocr_key(std::env::var("API_TOKEN")?)
///     .build()?;
/// let converter = BatchConverter::from_config(config)?;
/// let result = converter
///     .convert(vec![BatchFile::from_path("invoice.jpg")], "user-123")
///     .await?;
/// println!("{}", result.summary());
/// # Ok(())
/// # }
/// ```
#[derive(Clone)]
pub struct BatchConverter {
    inner: Arc<Pipeline>,
}

impl BatchConverter {
    pub fn new(
        config: PipelineConfig,
        recognizer: Arc<dyn TextRecognizer>,
        generator: Arc<dyn TextGenerator>,
        store: Arc<dyn ArtifactStore>,
    ) -> Self {
        let permits = Arc::new(Semaphore::new(config.concurrency.max(1)));
        Self {
            inner: Arc::new(Pipeline {
                config,
                recognizer,
                generator,
                store,
                progress: Arc::new(NoopProgressCallback),
                permits,
            }),
        }
    }

    /// Build a converter talking to the services named in `config`.
    pub fn from_config(config: PipelineConfig) -> Result<Self, BatchError> {
        let http = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.http_timeout_secs))
            .build()
            .map_err(|e| BatchError::Internal(format!("HTTP client: {e}")))?;

        let recognizer = Arc::new(OcrClient::new(http.clone(), &config));
        let generator = Arc::new(LlmTextGenerator::from_config(&config)?);
        let store = Arc::new(StorageClient::new(http, &config));
        Ok(Self::new(config, recognizer, generator, store))
    }

    /// Attach a progress callback.
    ///
    /// Must be called before the converter is cloned or used; later calls
    /// on a shared converter leave the callback unchanged.
    pub fn with_progress(mut self, progress: ProgressCallback) -> Self {
        if let Some(inner) = Arc::get_mut(&mut self.inner) {
            inner.progress = progress;
        } else {
            warn!("with_progress called on a shared converter; callback ignored");
        }
        self
    }

    pub fn config(&self) -> &PipelineConfig {
        &self.inner.config
    }

    /// Convert a batch of files owned by `owner_id`.
    ///
    /// # Errors
    /// Returns `Err(BatchError::BatchTooLarge)` when more than
    /// `config.max_batch_size` files are submitted. Nothing is read or sent
    /// in that case. Every other failure is per file and reported inside
    /// the returned [`BatchResult`].
    pub async fn convert(
        &self,
        files: Vec<BatchFile>,
        owner_id: impl Into<String>,
    ) -> Result<BatchResult, BatchError> {
        let batch = Batch::new(files, owner_id, self.inner.config.max_batch_size)?;
        Ok(self.convert_batch(batch).await)
    }

    /// Convert an already admitted batch.
    pub async fn convert_batch(&self, batch: Batch) -> BatchResult {
        let start = Instant::now();
        let (files, owner_id, created_at) = batch.into_parts();
        let total = files.len();
        info!("Starting batch of {} file(s) for owner {}", total, owner_id);
        self.inner.progress.on_batch_start(total);

        let units: Vec<_> = files
            .into_iter()
            .enumerate()
            .map(|(index, file)| {
                let name = file.name().to_string();
                let task = ConversionTask::new(index, file, owner_id.clone());
                let pipeline = Arc::clone(&self.inner);
                let handle = tokio::spawn(run_task(pipeline, task, total));
                (index, name, handle)
            })
            .collect();

        let (meta, handles): (Vec<_>, Vec<_>) = units
            .into_iter()
            .map(|(index, name, handle)| ((index, name), handle))
            .unzip();

        let joined = join_all(handles).await;

        let mut outcomes: Vec<FileOutcome> = meta
            .into_iter()
            .zip(joined)
            .map(|((index, name), joined)| match joined {
                Ok(outcome) => outcome,
                Err(e) => {
                    let error = TaskError::TaskAborted {
                        detail: e.to_string(),
                    };
                    warn!("File {} ({}) aborted: {}", index + 1, name, error);
                    self.inner
                        .progress
                        .on_file_error(index, &name, total, &error.to_string());
                    FileOutcome {
                        index,
                        name,
                        result: Err(error),
                        degraded: false,
                        duration_ms: start.elapsed().as_millis() as u64,
                    }
                }
            })
            .collect();

        // Units finish in any order; present them in submission order.
        outcomes.sort_by_key(|o| o.index);

        let result = BatchResult {
            owner_id,
            created_at,
            files: outcomes,
            total_duration_ms: start.elapsed().as_millis() as u64,
        };

        info!(
            "Batch complete: {}/{} files stored ({} degraded), {}ms",
            result.succeeded(),
            total,
            result.degraded(),
            result.total_duration_ms
        );
        self.inner.progress.on_batch_complete(total, result.succeeded());
        result
    }
}

/// Convert local image files with the services named in `config`.
///
/// Convenience wrapper over [`BatchConverter::from_config`] +
/// [`BatchConverter::convert`].
pub async fn convert_files(
    paths: impl IntoIterator<Item = impl Into<std::path::PathBuf>>,
    owner_id: impl Into<String>,
    config: PipelineConfig,
) -> Result<BatchResult, BatchError> {
    let files: Vec<BatchFile> = paths.into_iter().map(BatchFile::from_path).collect();
    // Reject oversized batches before building any client.
    if files.len() > config.max_batch_size {
        return Err(BatchError::BatchTooLarge {
            count: files.len(),
            max: config.max_batch_size,
        });
    }
    BatchConverter::from_config(config)?
        .convert(files, owner_id)
        .await
}

/// One unit of work: drive a task to a terminal state and report it.
async fn run_task(pipeline: Arc<Pipeline>, mut task: ConversionTask, total: usize) -> FileOutcome {
    let start = Instant::now();
    let index = task.index;
    let name = task.source.name().to_string();

    let outcome = match Arc::clone(&pipeline.permits).acquire_owned().await {
        Ok(_permit) => drive(&pipeline, &mut task).await,
        Err(e) => Err(TaskError::TaskAborted {
            detail: format!("concurrency limiter closed: {e}"),
        }),
    };

    if let Err(error) = outcome {
        warn!(
            "File {} ({}) failed while {}: {}",
            index + 1,
            name,
            task.state().label(),
            error
        );
        pipeline
            .progress
            .on_file_error(index, &name, total, &error.to_string());
        task.fail(error);
    } else {
        info!(
            "File {} ({}) stored{}",
            index + 1,
            name,
            if task.is_degraded() { " (degraded)" } else { "" }
        );
        pipeline
            .progress
            .on_file_complete(index, &name, total, task.is_degraded());
    }

    let degraded = task.is_degraded();
    FileOutcome {
        index,
        name,
        result: task.into_outcome(),
        degraded,
        duration_ms: start.elapsed().as_millis() as u64,
    }
}

/// Advance to the next stage and tell the progress callback.
fn enter_next_stage(pipeline: &Pipeline, task: &mut ConversionTask) {
    if let Some(state) = task.advance().cloned() {
        debug!("File {} → {}", task.index + 1, state.label());
        pipeline
            .progress
            .on_stage(task.index, task.source.name(), &state);
    }
}

/// Run the four stages in order. The first error stops the task.
async fn drive(pipeline: &Pipeline, task: &mut ConversionTask) -> Result<(), TaskError> {
    let config = &pipeline.config;

    // ── Recognizing ──────────────────────────────────────────────────────
    enter_next_stage(pipeline, task);
    let image = task.source.load().await?;
    let content_type = image_content_type(&image);
    let text = pipeline.recognizer.recognize(&image, content_type).await?;
    debug!("File {}: {} chars of OCR text", task.index + 1, text.len());

    // ── Extracting ───────────────────────────────────────────────────────
    enter_next_stage(pipeline, task);
    let table = extract_table(
        pipeline.generator.as_ref(),
        &text,
        config.prompt_template.as_deref(),
    )
    .await?;
    if table.is_degraded() {
        task.mark_degraded();
    }

    // ── Materializing ────────────────────────────────────────────────────
    enter_next_stage(pipeline, task);
    let artifact = materialize(table.as_str(), &config.output_dir, &artifact_file_name()).await?;

    // ── Persisting ───────────────────────────────────────────────────────
    enter_next_stage(pipeline, task);
    let spreadsheet = artifact.read_bytes().await?;
    let upload = ArtifactUpload {
        owner_id: task.owner_id.clone(),
        file_name: artifact.file_name.clone(),
        spreadsheet,
        image: config.attach_source_image.then(|| SourceImage {
            name: task.source.name().to_string(),
            bytes: image.to_vec(),
            content_type: content_type.to_string(),
        }),
    };
    let record = pipeline.store.store(upload).await?;

    task.succeed(record);
    pipeline
        .progress
        .on_stage(task.index, task.source.name(), task.state());
    Ok(())
}
