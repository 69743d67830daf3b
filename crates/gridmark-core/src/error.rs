//! Error types for Gridmark core.

use gridmark_engine::SchemeError;
use thiserror::Error;

/// Errors that can occur while grading.
#[derive(Error, Debug)]
pub enum GradeError {
    #[error("Malformed workbook: {0}")]
    MalformedWorkbook(String),

    #[error("Unreadable sheet: {0}")]
    UnreadableSheet(String),

    #[error("Invalid mark scheme: {0}")]
    InvalidMarkScheme(#[from] SchemeError),

    #[error("Answer key has no content at {cell} (question {question})")]
    MissingAnswerKeyCell { question: u32, cell: String },

    #[error("Answer key cell {cell} (question {question}) has no {what} to compare against")]
    MissingExpectation {
        question: u32,
        cell: String,
        what: &'static str,
    },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("Workbook write error: {0}")]
    Xlsx(#[from] rust_xlsxwriter::XlsxError),

    #[error("Workbook archive error: {0}")]
    Archive(#[from] zip::result::ZipError),

    #[error("Evaluation panicked: {0}")]
    EvaluationPanicked(String),
}

impl GradeError {
    /// Configuration problems would misgrade every submission, so they stop the run.
    pub fn is_fatal_to_run(&self) -> bool {
        matches!(
            self,
            GradeError::InvalidMarkScheme(_)
                | GradeError::MissingAnswerKeyCell { .. }
                | GradeError::MissingExpectation { .. }
                | GradeError::Config(_)
        )
    }

    /// Stable name used to tag failures in reports.
    pub fn kind(&self) -> &'static str {
        match self {
            GradeError::MalformedWorkbook(_) => "MalformedWorkbookError",
            GradeError::UnreadableSheet(_) => "UnreadableSheetError",
            GradeError::InvalidMarkScheme(_) => "InvalidMarkSchemeError",
            GradeError::MissingAnswerKeyCell { .. } => "MissingAnswerKeyCellError",
            GradeError::MissingExpectation { .. } => "MissingExpectationError",
            GradeError::Io(_) => "IoError",
            GradeError::Config(_) => "ConfigError",
            GradeError::Json(_) => "JsonError",
            GradeError::Xlsx(_) => "XlsxError",
            GradeError::Archive(_) => "ArchiveError",
            GradeError::EvaluationPanicked(_) => "EvaluationPanickedError",
        }
    }
}

pub type Result<T> = std::result::Result<T, GradeError>;
