//! Per-cell comparison of a submission against the answer key.
//!
//! [`Comparator`] is the seam for formula-equivalence strategies: callers hand
//! one to the evaluator instead of the evaluator choosing one itself.
//! [`DefaultComparator`] covers exact-text and relative-reference equivalence.

use serde::Serialize;

use super::cell::{CellContent, CellValue, ValueType};
use super::cell_ref::{CellAddress, CellRef};
use super::formula::{FormulaEquivalence, formula_matches_pattern, formulas_equivalent, offset_formula};
use crate::scheme::{CellSpec, ComparisonMode};

/// A recoverable condition found while grading a cell. The cell is scored
/// as incorrect; grading continues.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum CellWarning {
    BlankSubmissionCell,
    TypeMismatch { expected: ValueType, found: ValueType },
}

/// Verdict for one graded cell. `None` means the aspect is not graded under
/// the question's comparison mode.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct CellResult {
    pub cell_ref: CellAddress,
    pub formula_correct: Option<bool>,
    pub value_correct: Option<bool>,
    pub feedback: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub submitted_formula: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub warning: Option<CellWarning>,
}

impl CellResult {
    /// Whether the cell satisfies `mode`: either aspect for `Either`, every
    /// graded aspect otherwise.
    pub fn is_correct(&self, mode: ComparisonMode) -> bool {
        let formula = self.formula_correct;
        let value = self.value_correct;
        match mode {
            ComparisonMode::Either => formula == Some(true) || value == Some(true),
            _ => {
                (formula.is_some() || value.is_some())
                    && formula != Some(false)
                    && value != Some(false)
            }
        }
    }

    /// True when any graded aspect was wrong, even if the mode still accepts the cell.
    pub fn has_failure(&self) -> bool {
        self.formula_correct == Some(false) || self.value_correct == Some(false)
    }
}

/// Outcome of comparing two typed values.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ValueVerdict {
    Match,
    Mismatch,
    TypeMismatch { expected: ValueType, found: ValueType },
}

/// Compare a submitted value against the expected one.
///
/// Numbers match within `tolerance` (inclusive). Text matches after trimming,
/// ignoring case. Booleans, dates and error literals must be identical. Values
/// of different types never match.
pub fn compare_values(expected: &CellValue, submitted: &CellValue, tolerance: f64) -> ValueVerdict {
    let matched = match (expected, submitted) {
        (CellValue::Number(e), CellValue::Number(s)) => (s - e).abs() <= tolerance,
        (CellValue::Text(e), CellValue::Text(s)) => e.trim().to_lowercase() == s.trim().to_lowercase(),
        (CellValue::Bool(e), CellValue::Bool(s)) => e == s,
        (CellValue::Date(e), CellValue::Date(s)) => e == s,
        (CellValue::Error(e), CellValue::Error(s)) => e.eq_ignore_ascii_case(s),
        _ => {
            return ValueVerdict::TypeMismatch {
                expected: expected.value_type(),
                found: submitted.value_type(),
            };
        }
    };
    if matched { ValueVerdict::Match } else { ValueVerdict::Mismatch }
}

/// Decides formula and value correctness for one cell.
pub trait Comparator: Send + Sync {
    /// `answer` is the answer key's cell; `submission` is `None` when the
    /// student left the cell empty.
    fn compare(
        &self,
        answer: &CellContent,
        submission: Option<&CellContent>,
        spec: &CellSpec,
        mode: ComparisonMode,
    ) -> CellResult;
}

/// Comparator driven by a [`FormulaEquivalence`] policy.
#[derive(Clone, Copy, Debug, Default)]
pub struct DefaultComparator {
    pub equivalence: FormulaEquivalence,
}

impl DefaultComparator {
    pub fn new(equivalence: FormulaEquivalence) -> Self {
        Self { equivalence }
    }

    fn check_formula(
        &self,
        answer: &CellContent,
        submitted: Option<&str>,
        spec: &CellSpec,
    ) -> (bool, Option<String>) {
        let Some(submitted) = submitted else {
            return (false, Some("No formula entered.".to_string()));
        };
        let cell = spec.cell_ref.cell;

        if let Some(pattern) = &spec.formula_pattern {
            return if formula_matches_pattern(submitted, pattern) {
                (true, None)
            } else {
                (
                    false,
                    Some(format!("Formula structure incorrect; got {}.", display_formula(submitted))),
                )
            };
        }

        let (expected, host) = match (&spec.expected_formula, &answer.formula) {
            (Some(f), _) => (f.as_str(), spec.formula_host()),
            (None, Some(f)) => (f.as_str(), cell),
            (None, None) => {
                return (false, Some("No expected formula is available for this cell.".to_string()));
            }
        };

        if formulas_equivalent(expected, &host, submitted, &cell, self.equivalence) {
            (true, None)
        } else {
            let shown = expected_for_cell(expected, &host, &cell);
            (
                false,
                Some(format!(
                    "Formula incorrect. Expected {}, got {}.",
                    display_formula(&shown),
                    display_formula(submitted)
                )),
            )
        }
    }

    fn check_value(
        &self,
        answer: &CellContent,
        submitted: Option<&CellValue>,
        spec: &CellSpec,
    ) -> (bool, Option<String>, Option<CellWarning>) {
        let Some(expected) = spec.expected_value.as_ref().or(answer.value.as_ref()) else {
            return (false, Some("No expected value is available for this cell.".to_string()), None);
        };
        let Some(submitted) = submitted else {
            return (false, Some("The cell has no computed value.".to_string()), None);
        };

        match compare_values(expected, submitted, spec.value_tolerance) {
            ValueVerdict::Match => (true, None, None),
            ValueVerdict::Mismatch => (
                false,
                Some(format!("Value incorrect. Expected: {}, Got: {}.", expected, submitted)),
                None,
            ),
            ValueVerdict::TypeMismatch { expected: e, found } => (
                false,
                Some(format!(
                    "Type mismatch: expected {} ({}) but found {} ({}).",
                    e.describe(),
                    expected,
                    found.describe(),
                    submitted
                )),
                Some(CellWarning::TypeMismatch { expected: e, found }),
            ),
        }
    }
}

impl Comparator for DefaultComparator {
    fn compare(
        &self,
        answer: &CellContent,
        submission: Option<&CellContent>,
        spec: &CellSpec,
        mode: ComparisonMode,
    ) -> CellResult {
        let Some(submission) = submission.filter(|c| !c.is_empty()) else {
            return CellResult {
                cell_ref: spec.cell_ref.clone(),
                formula_correct: mode.checks_formula().then_some(false),
                value_correct: mode.checks_value().then_some(false),
                feedback: "The cell is blank.".to_string(),
                submitted_formula: None,
                warning: Some(CellWarning::BlankSubmissionCell),
            };
        };

        let submitted_formula = submission
            .formula
            .as_deref()
            .map(str::trim)
            .filter(|f| !f.is_empty());

        let mut problems: Vec<String> = Vec::new();
        let mut warning = None;

        let formula_correct = mode.checks_formula().then(|| {
            let (ok, problem) = self.check_formula(answer, submitted_formula, spec);
            problems.extend(problem);
            ok
        });
        let value_correct = mode.checks_value().then(|| {
            let (ok, problem, w) = self.check_value(answer, submission.value.as_ref(), spec);
            problems.extend(problem);
            warning = w;
            ok
        });

        let mut result = CellResult {
            cell_ref: spec.cell_ref.clone(),
            formula_correct,
            value_correct,
            feedback: String::new(),
            submitted_formula: submitted_formula.map(display_formula),
            warning,
        };

        result.feedback = if problems.is_empty() {
            "Correct.".to_string()
        } else if result.is_correct(mode) {
            let accepted = if formula_correct == Some(true) { "formula" } else { "value" };
            format!("Accepted on {}. {}", accepted, problems.join(" "))
        } else {
            problems.join(" ")
        };
        result
    }
}

/// Formula text with a leading `=`.
fn display_formula(formula: &str) -> String {
    let f = formula.trim();
    if f.starts_with('=') { f.to_string() } else { format!("={}", f) }
}

/// The expected formula as it should read in `cell` when authored for `host`.
fn expected_for_cell(expected: &str, host: &CellRef, cell: &CellRef) -> String {
    offset_formula(
        expected,
        cell.col as isize - host.col as isize,
        cell.row as isize - host.row as isize,
    )
}
