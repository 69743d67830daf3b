//! JSON reports.
//!
//! Field names follow the result structs. Questions appear in question order
//! and cells in mark scheme order.

use chrono::{DateTime, Local};
use serde::Serialize;

use crate::batch::BatchEntry;
use crate::error::Result;
use crate::result::EvaluationResult;

#[derive(Debug, Serialize)]
pub struct BatchReport<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub generated_at: Option<DateTime<Local>>,
    pub total_students: usize,
    pub results: Vec<&'a EvaluationResult>,
    pub failures: Vec<FailureRecord>,
}

/// A submission that could not be graded.
#[derive(Debug, Serialize)]
pub struct FailureRecord {
    pub file: String,
    pub kind: &'static str,
    pub message: String,
}

impl<'a> BatchReport<'a> {
    pub fn new(entries: &'a [BatchEntry], generated_at: Option<DateTime<Local>>) -> Self {
        let mut results = Vec::new();
        let mut failures = Vec::new();
        for entry in entries {
            match &entry.outcome {
                Ok(result) => results.push(result),
                Err(e) => failures.push(FailureRecord {
                    file: entry.name.clone(),
                    kind: e.kind(),
                    message: e.to_string(),
                }),
            }
        }
        BatchReport {
            generated_at,
            total_students: results.len(),
            results,
            failures,
        }
    }
}

/// One result as a pretty-printed JSON object.
pub fn render_json(result: &EvaluationResult) -> Result<String> {
    Ok(serde_json::to_string_pretty(result)?)
}

/// A batch envelope. Pass `None` for `generated_at` to get byte-identical output
/// across runs.
pub fn render_batch_json(entries: &[BatchEntry], generated_at: Option<DateTime<Local>>) -> Result<String> {
    Ok(serde_json::to_string_pretty(&BatchReport::new(entries, generated_at))?)
}
