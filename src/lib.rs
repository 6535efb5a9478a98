//! # invoice-sheets
//!
//! Turn batches of photographed invoices into stored spreadsheets.
//!
//! ## Why this crate?
//!
//! Invoices arrive as phone photos. OCR alone yields a soup of lines with no
//! column structure, so each file goes through a text-recognition service,
//! then a language model that reshapes the text into a fixed set of invoice
//! columns, then a local `.xlsx` file, and finally a storage backend. A
//! batch of up to ten files runs concurrently and one bad photo never takes
//! the others down with it.
//!
//! ## Pipeline Overview
//!
//! ```text
//! image
//!  │
//!  ├─ 1. Input        admit the batch (≤ 10 files), load bytes, sniff type
//!  ├─ 2. Recognize    submit to the OCR service, wait, poll for the text
//!  ├─ 3. Extract      one chat request; pull the table from between <*> markers
//!  ├─ 4. Materialize  split rows/cells, write output_<id>.xlsx
//!  └─ 5. Persist      multipart upload, one record per file
//! ```
//!
//! ## Quick Start
//!
//! ```rust,no_run
//! use invoice_sheets::{convert_files, PipelineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     // LLM provider auto-detected from OPENAI_API_KEY / ANTHROPIC_API_KEY / …
//!     let config = PipelineConfig::builder()
//!         .ocr_endpoint(std::env::var("API_ENDPOINT")?)
//!         .ocr_key(std::env::var("API_TOKEN")?)
//!         .build()?;
//!     let result = convert_files(["scan-1.jpg", "scan-2.png"], "user-123", config).await?;
//!     for file in &result.files {
//!         match &file.result {
//!             Ok(record) => println!("{} → {}", file.name, record.id),
//!             Err(e) => eprintln!("{}: {}", file.name, e),
//!         }
//!     }
//!     Ok(())
//! }
//! ```
//!
//! ## Feature Flags
//!
//! | Feature | Default | Description |
//! |---------|---------|-------------|
//! | `cli`   | on      | Enables the `invoice2xlsx` binary (clap + anyhow + tracing-subscriber) |
//!
//! Disable `cli` when using only the library:
//! ```toml
//! invoice-sheets = { version = "0.1", default-features = false }
//! ```

// ── Modules ──────────────────────────────────────────────────────────────

pub mod config;
pub mod convert;
pub mod error;
pub mod output;
pub mod pipeline;
pub mod progress;
pub mod prompts;
pub mod task;

// ── Re-exports ───────────────────────────────────────────────────────────

pub use config::{PipelineConfig, PipelineConfigBuilder, MAX_BATCH_SIZE};
pub use convert::{convert_files, BatchConverter};
pub use error::{BatchError, TaskError, TaskErrorKind};
pub use output::{BatchResult, FileOutcome, StorageRecord};
pub use pipeline::input::{Batch, BatchFile};
pub use pipeline::llm::TextGenerator;
pub use pipeline::ocr::TextRecognizer;
pub use pipeline::persist::{ArtifactStore, ArtifactUpload};
pub use pipeline::sheet::Grid;
pub use pipeline::table::TableText;
pub use progress::{BatchProgressCallback, NoopProgressCallback, ProgressCallback};
pub use task::{ConversionTask, TaskState};
