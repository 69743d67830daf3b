//! Report rendering: plain text, JSON, the summary workbook and commented
//! submission copies.

pub mod commented;
pub mod json;
pub mod summary;
pub mod text;

pub use commented::comment_submission;
pub use json::{BatchReport, FailureRecord, render_batch_json, render_json};
pub use summary::render_summary_workbook;
pub use text::render_text_report;
