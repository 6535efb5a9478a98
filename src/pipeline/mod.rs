//! Pipeline stages for image-to-spreadsheet conversion.
//!
//! Each submodule implements exactly one transformation step, so each is
//! independently testable and the external services sit behind small
//! traits the coordinator receives at construction.
//!
//! ## Data Flow
//!
//! ```text
//! input ──▶ ocr ──▶ llm + table ──▶ sheet ──▶ persist
//! (bytes)   (text)   (TableText)     (.xlsx)   (record id)
//! ```
//!
//! 1. [`input`]   — batch admission; load image bytes and sniff their type
//! 2. [`ocr`]     — two-phase submit/poll OCR protocol ([`ocr::TextRecognizer`])
//! 3. [`llm`]     — one chat request per file ([`llm::TextGenerator`])
//! 4. [`table`]   — sentinel extraction, clean or degraded
//! 5. [`sheet`]   — grid parsing and `.xlsx` rendering
//! 6. [`persist`] — multipart upload to the storage backend ([`persist::ArtifactStore`])

pub mod input;
pub mod llm;
pub mod ocr;
pub mod persist;
pub mod sheet;
pub mod table;
