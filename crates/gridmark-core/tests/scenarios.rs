use gridmark_core::gridmark_engine::engine::{CellAddress, CellValue, CellWarning, DefaultComparator};
use gridmark_core::gridmark_engine::{MarkScheme, SchemeOptions};
use gridmark_core::report::{comment_submission, render_batch_json, render_json, render_text_report};
use gridmark_core::{BatchRunner, Evaluator, GradeError, Submission, load_workbook};
use rust_xlsxwriter::{Formula, Workbook as XlsxWorkbook};

/// A single-sheet workbook. Each entry is `(row, col, formula, cached value)`;
/// a `None` formula writes a plain number.
fn workbook(cells: &[(u32, u16, Option<&str>, f64)]) -> Vec<u8> {
    let mut book = XlsxWorkbook::new();
    let sheet = book.add_worksheet();
    for (row, col, formula, value) in cells {
        match formula {
            Some(f) => {
                sheet
                    .write_formula(*row, *col, Formula::new(*f).set_result(value.to_string()))
                    .unwrap();
            }
            None => {
                sheet.write_number(*row, *col, *value).unwrap();
            }
        }
    }
    book.save_to_buffer().unwrap()
}

fn answer_key() -> Vec<u8> {
    workbook(&[(0, 0, None, 10.0), (1, 1, Some("=A1*2"), 20.0)])
}

fn evaluator(scheme: &str, key: &[u8]) -> Evaluator {
    let scheme = MarkScheme::from_toml_str(scheme, &SchemeOptions::default()).unwrap();
    Evaluator::new(load_workbook(key).unwrap(), scheme, DefaultComparator::default()).unwrap()
}

const DOUBLE_A1: &str = r#"
[[questions]]
number = 1
description = "Double A1"
marks = 10
mode = "FORMULA_AND_VALUE"
tolerance = 0.01
cells = ["B2"]
"#;

#[test]
fn test_matching_submission_gets_full_marks() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let result = eval.evaluate_bytes("jane_doe.xlsx", &answer_key()).unwrap();
    assert_eq!(result.marks_awarded, 10.0);
    assert_eq!(result.percentage, 100.0);
    assert_eq!(result.student_name, "Jane Doe");
    assert_eq!(result.questions[0].feedback, "Correct.");
}

#[test]
fn test_value_within_tolerance_gets_full_marks() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let submission = workbook(&[(0, 0, None, 10.0), (1, 1, Some("=A1*2"), 19.999999)]);
    let result = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    assert_eq!(result.marks_awarded, 10.0);
    assert_eq!(result.questions[0].cells[0].value_correct, Some(true));
}

#[test]
fn test_blank_cell_scores_zero() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let submission = workbook(&[(0, 0, None, 10.0)]);
    let result = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    assert_eq!(result.marks_awarded, 0.0);
    let cell = &result.questions[0].cells[0];
    assert_eq!(cell.warning, Some(CellWarning::BlankSubmissionCell));
    assert!(cell.feedback.contains("cell is blank."));
    assert!(result.questions[0].feedback.contains("cell is blank."));
}

#[test]
fn test_empty_submission_reports_every_cell_blank() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let result = eval.evaluate_bytes("empty.xlsx", &workbook(&[])).unwrap();
    assert_eq!(result.marks_awarded, 0.0);
    assert!(
        result
            .questions
            .iter()
            .flat_map(|q| &q.cells)
            .all(|c| c.warning == Some(CellWarning::BlankSubmissionCell))
    );
}

#[test]
fn test_proportional_credit_for_one_of_two_cells() {
    let scheme = r#"
[[questions]]
number = 1
marks = 10
mode = "value_only"
partial_credit = "PROPORTIONAL_BY_CELL"
cells = [
    { ref = "A1", weight = 5 },
    { ref = "A2", weight = 5 },
]
"#;
    let key = workbook(&[(0, 0, None, 1.0), (1, 0, None, 2.0)]);
    let eval = evaluator(scheme, &key);
    let submission = workbook(&[(0, 0, None, 1.0), (1, 0, None, 3.0)]);
    let result = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    assert_eq!(result.marks_awarded, 5.0);
    assert!(result.questions[0].feedback.starts_with("1/2 cells correct."));
}

#[test]
fn test_copied_down_formula_matches_anchor() {
    let scheme = r#"
[[questions]]
number = 1
marks = 2
mode = "formula_only"
expected_formula = "=SUM(A1:C1)"
formula_anchor = "D1"
cells = ["D1:D2"]
"#;
    let rows = [
        (0, 0, None, 1.0),
        (0, 1, None, 2.0),
        (0, 2, None, 3.0),
        (0, 3, Some("=SUM(A1:C1)"), 6.0),
        (1, 0, None, 4.0),
        (1, 1, None, 5.0),
        (1, 2, None, 6.0),
        (1, 3, Some("=SUM(A2:C2)"), 15.0),
    ];
    let key = workbook(&rows);
    let eval = evaluator(scheme, &key);
    let result = eval.evaluate_bytes("sub.xlsx", &key).unwrap();
    assert_eq!(result.marks_awarded, 2.0);

    let wrong = workbook(&[(1, 3, Some("=SUM(A1:C1)"), 6.0), (0, 3, Some("=SUM(A1:C1)"), 6.0)]);
    let result = eval.evaluate_bytes("sub.xlsx", &wrong).unwrap();
    assert_eq!(result.marks_awarded, 1.0);
    let d2 = &result.questions[0].cells[1];
    assert_eq!(d2.formula_correct, Some(false));
    assert!(d2.feedback.contains("=SUM(A2:C2)"));
}

#[test]
fn test_missing_answer_key_cell_stops_the_run() {
    let scheme = r#"
[[questions]]
number = 1
marks = 1
cells = ["Z99"]
"#;
    let scheme = MarkScheme::from_toml_str(scheme, &SchemeOptions::default()).unwrap();
    let err = Evaluator::new(load_workbook(&answer_key()).unwrap(), scheme, DefaultComparator::default())
        .err()
        .unwrap();
    assert!(matches!(err, GradeError::MissingAnswerKeyCell { .. }));
    assert!(err.is_fatal_to_run());
}

#[test]
fn test_malformed_file_is_isolated_in_batch() {
    let scheme = MarkScheme::from_toml_str(DOUBLE_A1, &SchemeOptions::default()).unwrap();
    let runner = BatchRunner::new(
        load_workbook(&answer_key()).unwrap(),
        scheme,
        DefaultComparator::default(),
        2,
    )
    .unwrap();
    let submissions = vec![
        Submission::new("amy.xlsx", answer_key()),
        Submission::new("corrupt.xlsx", b"PK\x03\x04 truncated".to_vec()),
        Submission::new("ben.xlsx", workbook(&[])),
    ];
    let entries = runner.run(&submissions);
    assert_eq!(entries.len(), 3);
    assert_eq!(entries[0].outcome.as_ref().unwrap().marks_awarded, 10.0);
    assert_eq!(entries[2].outcome.as_ref().unwrap().marks_awarded, 0.0);
    let err = entries[1].outcome.as_ref().err().unwrap();
    assert_eq!(err.kind(), "MalformedWorkbookError");

    let json: serde_json::Value = serde_json::from_str(&render_batch_json(&entries, None).unwrap()).unwrap();
    assert_eq!(json["total_students"], 2);
    assert_eq!(json["failures"][0]["file"], "corrupt.xlsx");
    assert_eq!(json["failures"][0]["kind"], "MalformedWorkbookError");
}

#[test]
fn test_reports_are_idempotent() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let submission = workbook(&[(0, 0, None, 10.0), (1, 1, None, 21.0)]);
    let first = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    let second = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    assert_eq!(render_text_report(&first), render_text_report(&second));
    assert_eq!(render_json(&first).unwrap(), render_json(&second).unwrap());
}

#[test]
fn test_commented_copy_keeps_cells() {
    let eval = evaluator(DOUBLE_A1, &answer_key());
    let submission = workbook(&[(0, 0, None, 10.0), (1, 1, Some("=A1+A1+1"), 21.0), (4, 4, None, 7.5)]);
    let result = eval.evaluate_bytes("sub.xlsx", &submission).unwrap();
    assert_eq!(result.marks_awarded, 0.0);

    let commented = comment_submission(&submission, &result, "Feedback").unwrap();
    let before = load_workbook(&submission).unwrap();
    let after = load_workbook(&commented).unwrap();
    assert_eq!(before, after);

    let b2 = after.get(&CellAddress::parse("B2").unwrap()).unwrap();
    assert_eq!(b2.formula.as_deref(), Some("A1+A1+1"));
    assert_eq!(b2.value, Some(CellValue::Number(21.0)));
}
