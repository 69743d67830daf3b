//! Turn per-cell verdicts into marks for a question.

use super::compare::CellResult;
use crate::scheme::{PartialCreditPolicy, QuestionSpec};

/// Score one question. `cells` must be in the same order as `spec.cells`.
///
/// Returns the awarded marks (always within `0..=total_marks`) and a feedback
/// line listing every cell that was not accepted, ordered by address.
pub fn score_question(cells: &[CellResult], spec: &QuestionSpec) -> (f64, String) {
    let mode = spec.comparison_mode;
    let total = cells.len();
    let correct = cells.iter().filter(|c| c.is_correct(mode)).count();

    let awarded = match spec.partial_credit_policy {
        PartialCreditPolicy::AllOrNothing => {
            if total > 0 && correct == total {
                spec.total_marks
            } else {
                0.0
            }
        }
        PartialCreditPolicy::ProportionalByCell => cells
            .iter()
            .zip(&spec.cells)
            .filter(|(result, _)| result.is_correct(mode))
            .map(|(_, cell)| cell.weight)
            .sum::<f64>(),
    };
    let awarded = round_marks(awarded).clamp(0.0, spec.total_marks);

    if total > 0 && correct == total {
        let feedback = if total == 1 {
            "Correct.".to_string()
        } else {
            format!("All {} cells correct.", total)
        };
        return (awarded, feedback);
    }

    let mut failing: Vec<&CellResult> = cells.iter().filter(|c| !c.is_correct(mode)).collect();
    failing.sort_by(|a, b| a.cell_ref.cmp(&b.cell_ref));
    let details: Vec<String> = failing
        .iter()
        .map(|c| format!("{}: {}", c.cell_ref, c.feedback))
        .collect();

    (
        awarded,
        format!("{}/{} cells correct. {}", correct, total, details.join(" ")),
    )
}

/// Drop floating-point noise from summed weights.
fn round_marks(marks: f64) -> f64 {
    (marks * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::CellAddress;
    use crate::scheme::{CellSpec, ComparisonMode};

    fn cell_spec(name: &str, weight: f64) -> CellSpec {
        CellSpec {
            cell_ref: CellAddress::parse(name).unwrap(),
            expected_formula: None,
            formula_anchor: None,
            formula_pattern: None,
            expected_value: None,
            value_tolerance: 0.0,
            weight,
        }
    }

    fn result(name: &str, ok: bool) -> CellResult {
        CellResult {
            cell_ref: CellAddress::parse(name).unwrap(),
            formula_correct: Some(ok),
            value_correct: Some(ok),
            feedback: if ok { "Correct.".into() } else { "Value incorrect.".into() },
            submitted_formula: None,
            warning: None,
        }
    }

    fn question(policy: PartialCreditPolicy, cells: Vec<CellSpec>, marks: f64) -> QuestionSpec {
        QuestionSpec {
            question_num: 1,
            description: String::new(),
            total_marks: marks,
            cells,
            comparison_mode: ComparisonMode::FormulaAndValue,
            partial_credit_policy: policy,
            format_rule: None,
        }
    }

    #[test]
    fn test_proportional_half_marks() {
        let q = question(
            PartialCreditPolicy::ProportionalByCell,
            vec![cell_spec("A1", 5.0), cell_spec("A2", 5.0)],
            10.0,
        );
        let (marks, feedback) = score_question(&[result("A1", true), result("A2", false)], &q);
        assert_eq!(marks, 5.0);
        assert_eq!(feedback, "1/2 cells correct. A2: Value incorrect.");
    }

    #[test]
    fn test_all_or_nothing() {
        let q = question(
            PartialCreditPolicy::AllOrNothing,
            vec![cell_spec("A1", 5.0), cell_spec("A2", 5.0)],
            10.0,
        );
        assert_eq!(score_question(&[result("A1", true), result("A2", false)], &q).0, 0.0);
        let (marks, feedback) = score_question(&[result("A1", true), result("A2", true)], &q);
        assert_eq!(marks, 10.0);
        assert_eq!(feedback, "All 2 cells correct.");
    }

    #[test]
    fn test_proportional_is_monotone_and_capped() {
        let specs: Vec<CellSpec> = (1..=3).map(|r| cell_spec(&format!("A{}", r), 1.0 / 3.0)).collect();
        let q = question(PartialCreditPolicy::ProportionalByCell, specs, 1.0);

        let mut previous = 0.0;
        for correct in 0..=3 {
            let results: Vec<CellResult> = (1..=3)
                .map(|r| result(&format!("A{}", r), r <= correct))
                .collect();
            let (marks, _) = score_question(&results, &q);
            assert!(marks >= previous);
            assert!(marks <= 1.0);
            previous = marks;
        }
        assert_eq!(previous, 1.0);
    }

    #[test]
    fn test_failing_cells_listed_in_address_order() {
        let q = question(
            PartialCreditPolicy::ProportionalByCell,
            vec![cell_spec("B3", 1.0), cell_spec("A1", 1.0), cell_spec("C2", 1.0)],
            3.0,
        );
        let results = vec![result("B3", false), result("A1", false), result("C2", false)];
        let (marks, feedback) = score_question(&results, &q);
        assert_eq!(marks, 0.0);
        assert_eq!(
            feedback,
            "0/3 cells correct. A1: Value incorrect. C2: Value incorrect. B3: Value incorrect."
        );
    }

    #[test]
    fn test_single_cell_correct_feedback() {
        let q = question(PartialCreditPolicy::AllOrNothing, vec![cell_spec("B2", 10.0)], 10.0);
        assert_eq!(score_question(&[result("B2", true)], &q), (10.0, "Correct.".to_string()));
    }
}
