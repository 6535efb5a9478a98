//! Prompt for LLM-based table extraction.
//!
//! Centralising the prompt here keeps the column contract in one place and
//! lets unit tests inspect it without calling a model. Callers can override
//! the template via [`crate::config::PipelineConfig::prompt_template`]; the
//! constants here are used only when no override is provided.

/// Marker the model is told to place before and after the CSV body.
pub const SENTINEL: &str = "<*>";

/// Target column order of the generated spreadsheet.
pub const TABLE_COLUMNS: &[&str] = &[
    "Serial.no.",
    "Quantity.",
    "Pack",
    "HSN no.",
    "Product_name",
    "batch no.",
    "Expiry date",
    "MRP",
    "S.Rate(selling rate)",
    "GST",
    "CGST",
    "SGST",
    "Amount",
];

/// Default prompt template. `{text}` is replaced by the OCR output and
/// `{columns}` by [`TABLE_COLUMNS`] joined with commas.
pub const DEFAULT_TABLE_PROMPT: &str = "Use this to make a table {text} now convert it to a CSV \
in this column order: {columns} (GST is cgst = sgst). Ignore other data and only give the CSV \
and nothing else. Also put <*> at the start and end of the CSV.";

/// Render the extraction prompt for one document.
///
/// The output is a pure function of its inputs so the same OCR text always
/// produces the same request.
pub fn table_prompt(template: Option<&str>, text: &str) -> String {
    template
        .unwrap_or(DEFAULT_TABLE_PROMPT)
        .replace("{columns}", &TABLE_COLUMNS.join(","))
        .replace("{text}", text)
}
