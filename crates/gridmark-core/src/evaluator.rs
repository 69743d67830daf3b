//! Single-submission evaluation.
//!
//! An evaluation moves `Loading → Comparing → Aggregating → Done`, or to
//! `Failed` from any state. It runs to completion on the calling thread.
//! Answer key and mark scheme problems are caught by [`Evaluator::new`] so
//! they stop a run before any student is graded.

use gridmark_engine::engine::{CellResult, CellWarning, Comparator, grade_conditional_format, score_question};
use gridmark_engine::scheme::{ComparisonMode, FormatRuleSpec, MarkScheme, QuestionSpec};
use std::fmt;
use std::path::Path;
use tracing::{debug, warn};

use crate::error::{GradeError, Result};
use crate::naming::student_name_from_path;
use crate::result::{EvaluationResult, QuestionResult};
use crate::workbook::{Workbook, load_workbook, open_workbook};

#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum EvaluationState {
    Loading,
    Comparing,
    Aggregating,
    Done,
    Failed,
}

impl EvaluationState {
    pub fn can_advance_to(self, next: EvaluationState) -> bool {
        use EvaluationState::*;
        matches!(
            (self, next),
            (Loading, Comparing) | (Comparing, Aggregating) | (Aggregating, Done)
        ) || (next == Failed && !matches!(self, Done | Failed))
    }
}

impl fmt::Display for EvaluationState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            EvaluationState::Loading => "LOADING",
            EvaluationState::Comparing => "COMPARING",
            EvaluationState::Aggregating => "AGGREGATING",
            EvaluationState::Done => "DONE",
            EvaluationState::Failed => "FAILED",
        };
        f.write_str(name)
    }
}

/// Tracks one evaluation's state and logs each transition.
struct Progress<'a> {
    file: &'a str,
    state: EvaluationState,
}

impl<'a> Progress<'a> {
    fn start(file: &'a str) -> Self {
        debug!(file, state = %EvaluationState::Loading, "evaluation started");
        Progress {
            file,
            state: EvaluationState::Loading,
        }
    }

    fn advance(&mut self, next: EvaluationState) {
        debug_assert!(self.state.can_advance_to(next), "{} -> {}", self.state, next);
        debug!(file = self.file, from = %self.state, to = %next, "evaluation state");
        self.state = next;
    }

    fn fail<T>(&mut self, err: GradeError) -> Result<T> {
        self.advance(EvaluationState::Failed);
        debug!(file = self.file, error = %err, "evaluation failed");
        Err(err)
    }
}

/// Grades submissions against one answer key and mark scheme.
pub struct Evaluator {
    answer_key: Workbook,
    scheme: MarkScheme,
    comparator: Box<dyn Comparator>,
}

impl Evaluator {
    /// Check that the answer key can back every graded cell, and that no two
    /// questions grade the same cell of the answer key's active sheet.
    pub fn new(answer_key: Workbook, scheme: MarkScheme, comparator: impl Comparator + 'static) -> Result<Self> {
        scheme.check_collisions(Some(&answer_key.active_sheet().name))?;

        for question in scheme.questions() {
            if let Some(rule) = &question.format_rule {
                check_key_format(&answer_key, question, rule);
            }
            let mode = question.comparison_mode;
            for spec in &question.cells {
                let Some(answer) = answer_key.get(&spec.cell_ref) else {
                    return Err(GradeError::MissingAnswerKeyCell {
                        question: question.question_num,
                        cell: spec.cell_ref.to_string(),
                    });
                };
                let has_formula =
                    spec.formula_pattern.is_some() || spec.expected_formula.is_some() || answer.formula.is_some();
                let has_value = spec.expected_value.is_some() || answer.value.is_some();
                let missing = match mode {
                    ComparisonMode::FormulaOnly => (!has_formula).then_some("formula"),
                    ComparisonMode::ValueOnly => (!has_value).then_some("value"),
                    ComparisonMode::FormulaAndValue if !has_formula => Some("formula"),
                    ComparisonMode::FormulaAndValue => (!has_value).then_some("value"),
                    ComparisonMode::Either => (!has_formula && !has_value).then_some("formula or value"),
                };
                if let Some(what) = missing {
                    return Err(GradeError::MissingExpectation {
                        question: question.question_num,
                        cell: spec.cell_ref.to_string(),
                        what,
                    });
                }
            }
        }

        debug!(
            questions = scheme.questions().len(),
            total_marks = scheme.total_marks(),
            "answer key validated against mark scheme"
        );
        Ok(Evaluator {
            answer_key,
            scheme,
            comparator: Box::new(comparator),
        })
    }

    pub fn scheme(&self) -> &MarkScheme {
        &self.scheme
    }

    pub fn answer_key(&self) -> &Workbook {
        &self.answer_key
    }

    /// Evaluate a submission file. The student name comes from the filename.
    pub fn evaluate_path(&self, path: &Path) -> Result<EvaluationResult> {
        let file = path.display().to_string();
        let mut progress = Progress::start(&file);
        let submission = match open_workbook(path) {
            Ok(wb) => wb,
            Err(e) => return progress.fail(e),
        };
        self.grade(&mut progress, &submission, student_name_from_path(path))
    }

    /// Evaluate submission bytes; `file_name` labels the result and names the student.
    pub fn evaluate_bytes(&self, file_name: &str, bytes: &[u8]) -> Result<EvaluationResult> {
        let mut progress = Progress::start(file_name);
        let submission = match load_workbook(bytes) {
            Ok(wb) => wb,
            Err(e) => return progress.fail(e),
        };
        self.grade(&mut progress, &submission, student_name_from_path(Path::new(file_name)))
    }

    /// Evaluate an already-loaded submission.
    pub fn evaluate_workbook(
        &self,
        submission: &Workbook,
        student_name: &str,
        student_file: &str,
    ) -> Result<EvaluationResult> {
        let mut progress = Progress::start(student_file);
        self.grade(&mut progress, submission, student_name.to_string())
    }

    fn grade(&self, progress: &mut Progress<'_>, submission: &Workbook, student_name: String) -> Result<EvaluationResult> {
        progress.advance(EvaluationState::Comparing);
        let mut compared: Vec<Vec<CellResult>> = Vec::with_capacity(self.scheme.questions().len());
        for question in self.scheme.questions() {
            let mut cells = Vec::with_capacity(question.cells.len());
            for spec in &question.cells {
                let Some(answer) = self.answer_key.get(&spec.cell_ref) else {
                    return progress.fail(GradeError::MissingAnswerKeyCell {
                        question: question.question_num,
                        cell: spec.cell_ref.to_string(),
                    });
                };
                let result = self.comparator.compare(
                    answer,
                    submission.get(&spec.cell_ref),
                    spec,
                    question.comparison_mode,
                );
                if let Some(warning) = &result.warning {
                    log_warning(progress.file, &result, warning);
                }
                cells.push(result);
            }
            compared.push(cells);
        }

        progress.advance(EvaluationState::Aggregating);
        let questions: Vec<QuestionResult> = self
            .scheme
            .questions()
            .iter()
            .zip(compared)
            .map(|(spec, cells)| {
                let (marks_awarded, feedback) = match &spec.format_rule {
                    Some(rule) => grade_format(submission, rule),
                    None => score_question(&cells, spec),
                };
                QuestionResult {
                    question_num: spec.question_num,
                    description: spec.description.clone(),
                    total_marks: spec.total_marks,
                    marks_awarded,
                    feedback,
                    cells,
                }
            })
            .collect();
        let result = EvaluationResult::new(student_name, progress.file.to_string(), questions);

        progress.advance(EvaluationState::Done);
        debug!(
            file = progress.file,
            awarded = result.marks_awarded,
            total = result.total_marks,
            "evaluation finished"
        );
        Ok(result)
    }
}

fn grade_format(workbook: &Workbook, rule: &FormatRuleSpec) -> (f64, String) {
    match workbook.resolve_sheet(rule.sheet.as_deref()) {
        Some(sheet) => grade_conditional_format(sheet.conditional_formats(), rule),
        None => (
            0.0,
            format!("Sheet '{}' not found.", rule.sheet.as_deref().unwrap_or_default()),
        ),
    }
}

/// A key that fails its own formatting rule means the scheme is probably wrong.
fn check_key_format(answer_key: &Workbook, question: &QuestionSpec, rule: &FormatRuleSpec) {
    let (marks, feedback) = grade_format(answer_key, rule);
    if marks < question.total_marks {
        warn!(
            question = question.question_num,
            marks,
            total = question.total_marks,
            %feedback,
            "answer key does not earn full marks on its conditional formatting"
        );
    }
}

fn log_warning(file: &str, result: &CellResult, warning: &CellWarning) {
    match warning {
        CellWarning::BlankSubmissionCell => {
            debug!(file, cell = %result.cell_ref, "blank submission cell")
        }
        CellWarning::TypeMismatch { expected, found } => {
            debug!(file, cell = %result.cell_ref, %expected, %found, "type mismatch")
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Sheet;
    use gridmark_engine::SchemeError;
    use gridmark_engine::engine::{
        CellContent, CellRef, CellValue, ConditionalFormat, DefaultComparator, FormatRule, Rgb,
    };
    use gridmark_engine::scheme::SchemeOptions;

    fn key() -> Workbook {
        let mut sheet = Sheet::new("Sheet1");
        sheet.insert(CellRef::new(0, 0), CellContent::new_value(CellValue::Number(10.0)));
        sheet.insert(
            CellRef::new(1, 1),
            CellContent::new_formula("A1*2", Some(CellValue::Number(20.0))),
        );
        Workbook::new(vec![sheet], 0).unwrap()
    }

    fn scheme(toml: &str) -> MarkScheme {
        MarkScheme::from_toml_str(toml, &SchemeOptions::default()).unwrap()
    }

    const B2_SCHEME: &str = r#"
[[questions]]
number = 1
description = "Double A1"
marks = 10
partial_credit = "all_or_nothing"
cells = [{ ref = "B2", tolerance = 0.01, weight = 10 }]
"#;

    #[test]
    fn test_state_transitions() {
        use EvaluationState::*;
        assert!(Loading.can_advance_to(Comparing));
        assert!(Comparing.can_advance_to(Aggregating));
        assert!(Aggregating.can_advance_to(Done));
        assert!(Loading.can_advance_to(Failed));
        assert!(Comparing.can_advance_to(Failed));
        assert!(!Done.can_advance_to(Failed));
        assert!(!Loading.can_advance_to(Done));
        assert!(!Failed.can_advance_to(Comparing));
    }

    #[test]
    fn test_missing_answer_key_cell_is_rejected_up_front() {
        let err = Evaluator::new(
            key(),
            scheme("[[questions]]\nnumber = 1\nmarks = 1\ncells = [\"C3\"]\n"),
            DefaultComparator::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GradeError::MissingAnswerKeyCell { question: 1, .. }));
        assert!(err.is_fatal_to_run());
    }

    #[test]
    fn test_missing_expected_formula_is_rejected() {
        let err = Evaluator::new(
            key(),
            scheme("[[questions]]\nnumber = 1\nmarks = 1\nmode = \"formula_only\"\ncells = [\"A1\"]\n"),
            DefaultComparator::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(err, GradeError::MissingExpectation { what: "formula", .. }));
    }

    #[test]
    fn test_value_only_accepts_literal_answer() {
        let evaluator = Evaluator::new(
            key(),
            scheme("[[questions]]\nnumber = 1\nmarks = 1\nmode = \"value_only\"\ncells = [\"A1\"]\n"),
            DefaultComparator::default(),
        );
        assert!(evaluator.is_ok());
    }

    #[test]
    fn test_correct_submission_scores_full_marks() {
        let evaluator = Evaluator::new(key(), scheme(B2_SCHEME), DefaultComparator::default()).unwrap();
        let mut sheet = Sheet::new("Sheet1");
        sheet.insert(
            CellRef::new(1, 1),
            CellContent::new_formula("A1*2", Some(CellValue::Number(19.999999))),
        );
        let submission = Workbook::new(vec![sheet], 0).unwrap();

        let result = evaluator
            .evaluate_workbook(&submission, "Jane Doe", "jane_doe.xlsx")
            .unwrap();
        assert_eq!(result.marks_awarded, 10.0);
        assert_eq!(result.percentage, 100.0);
        assert_eq!(result.questions[0].feedback, "Correct.");
    }

    #[test]
    fn test_empty_submission_scores_zero() {
        let evaluator = Evaluator::new(key(), scheme(B2_SCHEME), DefaultComparator::default()).unwrap();
        let submission = Workbook::new(vec![Sheet::new("Sheet1")], 0).unwrap();
        let result = evaluator.evaluate_workbook(&submission, "Nobody", "empty.xlsx").unwrap();
        assert_eq!(result.marks_awarded, 0.0);
        let cell = &result.questions[0].cells[0];
        assert!(cell.feedback.contains("cell is blank."));
        assert_eq!(cell.warning, Some(CellWarning::BlankSubmissionCell));
    }

    #[test]
    fn test_unqualified_cell_collides_with_active_sheet_ref() {
        let err = Evaluator::new(
            key(),
            scheme(
                "[[questions]]\nnumber = 1\nmarks = 1\ncells = [\"sheet1!B2\"]\n\n\
                 [[questions]]\nnumber = 2\nmarks = 1\ncells = [\"B2\"]\n",
            ),
            DefaultComparator::default(),
        )
        .err()
        .unwrap();
        assert!(matches!(
            err,
            GradeError::InvalidMarkScheme(SchemeError::CellCollision { first: 1, second: 2, .. })
        ));
        assert!(err.is_fatal_to_run());
    }

    #[test]
    fn test_conditional_formatting_question() {
        let toml = format!(
            "{}\n{}",
            B2_SCHEME,
            r#"
[[questions]]
number = 2
marks = 3
kind = "conditional_formatting"

[questions.conditional_formatting]
range = "A4:J15"
condition_pattern = '\$J\$?4="MISS"'
fill = "red"
"#
        );
        let evaluator = Evaluator::new(key(), scheme(&toml), DefaultComparator::default()).unwrap();

        let mut sheet = Sheet::new("Sheet1");
        sheet.insert(
            CellRef::new(1, 1),
            CellContent::new_formula("A1*2", Some(CellValue::Number(20.0))),
        );
        sheet.add_conditional_format(ConditionalFormat {
            ranges: ConditionalFormat::parse_sqref("A4:J15"),
            rules: vec![FormatRule {
                kind: "expression".into(),
                formulas: vec!["$J4=\"Miss\"".into()],
                fill: Some(Rgb::new(0, 0, 255)),
            }],
        });
        let submission = Workbook::new(vec![sheet], 0).unwrap();

        let result = evaluator.evaluate_workbook(&submission, "Sam", "sam.xlsx").unwrap();
        let q2 = &result.questions[1];
        assert!(q2.cells.is_empty());
        assert_eq!(q2.marks_awarded, 2.0);
        assert!(q2.feedback.contains("Fill should be red. Got: #0000FF."));
        assert_eq!(result.marks_awarded, 12.0);
        assert_eq!(result.total_marks, 13.0);

        let blank = Workbook::new(vec![Sheet::new("Sheet1")], 0).unwrap();
        let result = evaluator.evaluate_workbook(&blank, "Nobody", "blank.xlsx").unwrap();
        assert_eq!(result.questions[1].marks_awarded, 0.0);
        assert_eq!(result.questions[1].feedback, "No conditional formatting found.");
    }

    #[test]
    fn test_malformed_bytes_fail() {
        let evaluator = Evaluator::new(key(), scheme(B2_SCHEME), DefaultComparator::default()).unwrap();
        let err = evaluator.evaluate_bytes("broken.xlsx", b"not a zip").unwrap_err();
        assert!(matches!(err, GradeError::MalformedWorkbook(_)));
        assert!(!err.is_fatal_to_run());
    }
}
