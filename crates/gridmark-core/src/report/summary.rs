//! Cross-submission summary workbook.

use gridmark_engine::engine::{CellRef, format_number};
use rust_xlsxwriter::{Color, Format, FormatAlign, FormatBorder, Formula, Workbook as XlsxWorkbook};

use crate::batch::BatchEntry;
use crate::error::Result;
use crate::result::EvaluationResult;

const HEADER_FILL: u32 = 0x4472C4;
const PASS_FILL: u32 = 0xC6EFCE;
const FAIL_FILL: u32 = 0xFFC7CE;
const PASS_PERCENTAGE: f64 = 50.0;

/// One row per graded submission plus a closing `Average` row. Submissions
/// that could not be graded are listed on a second `Not Graded` sheet.
pub fn render_summary_workbook(entries: &[BatchEntry]) -> Result<Vec<u8>> {
    let results: Vec<&EvaluationResult> = entries.iter().filter_map(|e| e.outcome.as_ref().ok()).collect();

    let border = Format::new().set_border(FormatBorder::Thin);
    let centered = border.clone().set_align(FormatAlign::Center);
    let header = centered
        .clone()
        .set_bold()
        .set_font_color(Color::White)
        .set_background_color(Color::RGB(HEADER_FILL));
    let percent = centered.clone().set_num_format("0.0\"%\"");
    let pass = Color::RGB(PASS_FILL);
    let fail = Color::RGB(FAIL_FILL);
    let average = centered.clone().set_bold();

    let mut workbook = XlsxWorkbook::new();
    let sheet = workbook.add_worksheet();
    sheet.set_name("Marking Summary")?;

    let mut headers = vec![
        "Student Name".to_string(),
        "File".to_string(),
        "Total Marks".to_string(),
        "Percentage".to_string(),
    ];
    if let Some(first) = results.first() {
        headers[2] = format!("Total Marks (/{})", format_number(first.total_marks));
        for q in &first.questions {
            headers.push(format!("Q{} (/{})", q.question_num, format_number(q.total_marks)));
        }
    }
    for (col, title) in headers.iter().enumerate() {
        sheet.write_string_with_format(0, col as u16, title, &header)?;
    }

    for (idx, result) in results.iter().enumerate() {
        let row = idx as u32 + 1;
        sheet.write_string_with_format(row, 0, &result.student_name, &border)?;
        sheet.write_string_with_format(row, 1, file_name(&result.student_file), &border)?;
        sheet.write_number_with_format(row, 2, result.marks_awarded, &centered)?;

        let pct_fill = if result.percentage >= PASS_PERCENTAGE { pass } else { fail };
        sheet.write_number_with_format(row, 3, round1(result.percentage), &percent.clone().set_background_color(pct_fill))?;

        for (offset, q) in result.questions.iter().enumerate() {
            let col = 4 + offset as u16;
            let format = if q.marks_awarded >= q.total_marks {
                centered.clone().set_background_color(pass)
            } else if q.marks_awarded <= 0.0 {
                centered.clone().set_background_color(fail)
            } else {
                centered.clone()
            };
            sheet.write_number_with_format(row, col, q.marks_awarded, &format)?;
        }
    }

    if !results.is_empty() {
        let row = results.len() as u32 + 1;
        let last = results.len() + 1;
        sheet.write_string_with_format(row, 0, "Average", &average)?;
        sheet.write_blank(row, 1, &average)?;

        let mut columns: Vec<(u16, f64)> = vec![
            (2, mean(results.iter().map(|r| r.marks_awarded))),
            (3, mean(results.iter().map(|r| r.percentage))),
        ];
        for (offset, q) in results[0].questions.iter().enumerate() {
            let values = results.iter().filter_map(|r| {
                r.questions
                    .iter()
                    .find(|other| other.question_num == q.question_num)
                    .map(|other| other.marks_awarded)
            });
            columns.push((4 + offset as u16, mean(values)));
        }
        for (col, value) in columns {
            let letter = CellRef::col_to_letters(col as usize);
            let formula = Formula::new(format!("=AVERAGE({}2:{}{})", letter, letter, last))
                .set_result(value.to_string());
            let format = if col == 3 { average.clone().set_num_format("0.0\"%\"") } else { average.clone() };
            sheet.write_formula_with_format(row, col, formula, &format)?;
        }
    }

    sheet.set_column_width(0, 20)?;
    sheet.set_column_width(1, 35)?;
    sheet.set_column_width(2, 16)?;
    sheet.set_column_width(3, 12)?;

    let failures: Vec<&BatchEntry> = entries.iter().filter(|e| e.outcome.is_err()).collect();
    if !failures.is_empty() {
        let sheet = workbook.add_worksheet();
        sheet.set_name("Not Graded")?;
        for (col, title) in ["File", "Error", "Reason"].iter().enumerate() {
            sheet.write_string_with_format(0, col as u16, *title, &header)?;
        }
        for (idx, entry) in failures.iter().enumerate() {
            let row = idx as u32 + 1;
            if let Err(e) = &entry.outcome {
                sheet.write_string_with_format(row, 0, &entry.name, &border)?;
                sheet.write_string_with_format(row, 1, e.kind(), &border)?;
                sheet.write_string_with_format(row, 2, e.to_string(), &border)?;
            }
        }
        sheet.set_column_width(0, 35)?;
        sheet.set_column_width(1, 28)?;
        sheet.set_column_width(2, 60)?;
    }

    Ok(workbook.save_to_buffer()?)
}

fn file_name(path: &str) -> String {
    std::path::Path::new(path)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| path.to_string())
}

fn mean(values: impl Iterator<Item = f64>) -> f64 {
    let (sum, count) = values.fold((0.0, 0usize), |(s, n), v| (s + v, n + 1));
    if count == 0 { 0.0 } else { sum / count as f64 }
}

fn round1(value: f64) -> f64 {
    (value * 10.0).round() / 10.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::GradeError;
    use crate::result::QuestionResult;
    use crate::workbook::load_workbook;
    use gridmark_engine::engine::{CellAddress, CellValue};

    fn result(name: &str, q1: f64, q2: f64) -> EvaluationResult {
        let q = |num: u32, awarded: f64| QuestionResult {
            question_num: num,
            description: String::new(),
            total_marks: 10.0,
            marks_awarded: awarded,
            feedback: String::new(),
            cells: Vec::new(),
        };
        EvaluationResult::new(name.into(), format!("{}.xlsx", name), vec![q(1, q1), q(2, q2)])
    }

    fn value(wb: &crate::workbook::Workbook, cell: &str) -> Option<CellValue> {
        wb.get(&CellAddress::parse(cell).unwrap()).and_then(|c| c.value.clone())
    }

    #[test]
    fn test_rows_and_average() {
        let entries = vec![
            BatchEntry {
                name: "amy.xlsx".into(),
                outcome: Ok(result("Amy", 10.0, 5.0)),
            },
            BatchEntry::failed("bad.xlsx", GradeError::MalformedWorkbook("not a zip".into())),
            BatchEntry {
                name: "bob.xlsx".into(),
                outcome: Ok(result("Bob", 0.0, 5.0)),
            },
        ];
        let bytes = render_summary_workbook(&entries).unwrap();
        let wb = load_workbook(&bytes).unwrap();

        assert_eq!(wb.sheets()[0].name, "Marking Summary");
        assert_eq!(value(&wb, "A1"), Some(CellValue::Text("Student Name".into())));
        assert_eq!(value(&wb, "E1"), Some(CellValue::Text("Q1 (/10)".into())));
        assert_eq!(value(&wb, "A2"), Some(CellValue::Text("Amy".into())));
        assert_eq!(value(&wb, "C2"), Some(CellValue::Number(15.0)));
        assert_eq!(value(&wb, "D2"), Some(CellValue::Number(75.0)));
        assert_eq!(value(&wb, "A3"), Some(CellValue::Text("Bob".into())));
        assert_eq!(value(&wb, "A4"), Some(CellValue::Text("Average".into())));
        assert_eq!(value(&wb, "C4"), Some(CellValue::Number(10.0)));
        assert_eq!(value(&wb, "E4"), Some(CellValue::Number(5.0)));

        let failures = wb.sheet("Not Graded").unwrap();
        assert_eq!(failures.len(), 6);
    }

    #[test]
    fn test_empty_batch_has_header_only() {
        let bytes = render_summary_workbook(&[]).unwrap();
        let wb = load_workbook(&bytes).unwrap();
        assert_eq!(wb.cell_count(), 4);
        assert!(wb.sheet("Not Graded").is_none());
    }
}
