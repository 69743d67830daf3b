//! gridmark-core - workbook loading, evaluation, batch grading and reports.

pub mod batch;
pub mod config;
pub mod error;
pub mod evaluator;
pub mod naming;
pub mod report;
pub mod result;
pub mod workbook;

pub use batch::{BatchEntry, BatchRunner, Submission, discover_submissions};
pub use config::{GraderConfig, load_mark_scheme};
pub use error::{GradeError, Result};
pub use evaluator::{EvaluationState, Evaluator};
pub use result::{EvaluationResult, QuestionResult};
pub use workbook::{Sheet, Workbook, load_workbook, open_workbook};

pub use gridmark_engine;
