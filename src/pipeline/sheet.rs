//! Spreadsheet materialisation: table text → grid → `.xlsx` file.
//!
//! The grid is built by splitting on line breaks, then on commas. Rows may
//! be ragged and are never padded. Every value is written as a text cell;
//! no number or date inference happens, so `"007"` stays `"007"`.
//!
//! Only I/O failures writing the file are errors. Malformed input always
//! produces some spreadsheet, possibly an empty one.

use crate::error::TaskError;
use rust_xlsxwriter::{Workbook, XlsxError};
use serde::Serialize;
use std::path::{Path, PathBuf};
use tracing::{debug, warn};
use uuid::Uuid;

/// Rows per worksheet in the xlsx format.
const MAX_ROWS: usize = 1_048_576;
/// Columns per worksheet in the xlsx format.
const MAX_COLS: usize = 16_384;
/// Characters per cell in the xlsx format.
const MAX_CELL_CHARS: usize = 32_767;

/// Rows of trimmed string cells.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct Grid {
    rows: Vec<Vec<String>>,
}

impl Grid {
    /// Parse table text into a grid.
    ///
    /// The block is trimmed first; an empty block has zero rows. A blank
    /// line inside the block keeps its row position but holds no cells.
    pub fn parse(text: &str) -> Self {
        let trimmed = text.trim();
        if trimmed.is_empty() {
            return Self::default();
        }
        let rows = trimmed
            .lines()
            .map(|line| {
                if line.trim().is_empty() {
                    Vec::new()
                } else {
                    line.split(',').map(|cell| cell.trim().to_string()).collect()
                }
            })
            .collect();
        Self { rows }
    }

    pub fn rows(&self) -> &[Vec<String>] {
        &self.rows
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rows.is_empty()
    }

    /// Value at 1-based `(row, col)`, or `None` when the position holds no cell.
    pub fn cell(&self, row: usize, col: usize) -> Option<&str> {
        if row == 0 || col == 0 {
            return None;
        }
        self.rows
            .get(row - 1)
            .and_then(|r| r.get(col - 1))
            .map(String::as_str)
    }

    /// Every cell with its 1-based `(row, col)` position, row-major.
    pub fn cells(&self) -> impl Iterator<Item = (usize, usize, &str)> {
        self.rows.iter().enumerate().flat_map(|(r, row)| {
            row.iter()
                .enumerate()
                .map(move |(c, value)| (r + 1, c + 1, value.as_str()))
        })
    }
}

/// A spreadsheet written to local storage.
#[derive(Debug, Clone)]
pub struct SpreadsheetArtifact {
    pub path: PathBuf,
    pub file_name: String,
    pub grid: Grid,
}

impl SpreadsheetArtifact {
    /// Read the written file back, e.g. for upload.
    pub async fn read_bytes(&self) -> Result<Vec<u8>, TaskError> {
        tokio::fs::read(&self.path)
            .await
            .map_err(|e| TaskError::MaterializationFailed {
                path: self.path.clone(),
                detail: e.to_string(),
            })
    }
}

/// Collision-resistant artifact name, ordered by creation time.
pub fn artifact_file_name() -> String {
    format!("output_{}.xlsx", Uuid::now_v7().simple())
}

/// Render a grid as an in-memory single-sheet workbook.
///
/// Cells beyond the format limits are dropped (or truncated) with a warning.
pub fn render_workbook(grid: &Grid) -> Result<Vec<u8>, XlsxError> {
    let mut workbook = Workbook::new();
    let worksheet = workbook.add_worksheet();
    let mut clipped = 0usize;

    for (row, col, value) in grid.cells() {
        if row > MAX_ROWS || col > MAX_COLS {
            clipped += 1;
            continue;
        }
        let value = if value.chars().count() > MAX_CELL_CHARS {
            clipped += 1;
            value.chars().take(MAX_CELL_CHARS).collect::<String>()
        } else {
            value.to_string()
        };
        worksheet.write_string((row - 1) as u32, (col - 1) as u16, value)?;
    }

    if clipped > 0 {
        warn!("{} cell(s) exceeded spreadsheet limits and were clipped", clipped);
    }

    workbook.save_to_buffer()
}

/// Materialise table text into `output_dir/<file_name>`.
///
/// The file is written to a temporary name and renamed into place so a
/// half-written spreadsheet is never visible.
pub async fn materialize(
    table_text: &str,
    output_dir: &Path,
    file_name: &str,
) -> Result<SpreadsheetArtifact, TaskError> {
    let path = output_dir.join(file_name);
    let fail = |detail: String| TaskError::MaterializationFailed {
        path: path.clone(),
        detail,
    };

    let grid = Grid::parse(table_text);
    let bytes = render_workbook(&grid).map_err(|e| fail(e.to_string()))?;

    tokio::fs::create_dir_all(output_dir)
        .await
        .map_err(|e| fail(e.to_string()))?;

    let tmp_path = path.with_extension("xlsx.tmp");
    tokio::fs::write(&tmp_path, &bytes)
        .await
        .map_err(|e| fail(e.to_string()))?;
    tokio::fs::rename(&tmp_path, &path)
        .await
        .map_err(|e| fail(e.to_string()))?;

    debug!(
        "Wrote {} ({} rows, {} bytes)",
        path.display(),
        grid.row_count(),
        bytes.len()
    );

    Ok(SpreadsheetArtifact {
        path,
        file_name: file_name.to_string(),
        grid,
    })
}
