//! Plain-text feedback report.

use std::path::Path;

use crate::result::EvaluationResult;

const RULE_WIDTH: usize = 60;

/// Render one result. The output depends only on `result`, so repeated runs
/// produce identical text.
pub fn render_text_report(result: &EvaluationResult) -> String {
    let heavy = "=".repeat(RULE_WIDTH);
    let light = "-".repeat(RULE_WIDTH);
    let file = Path::new(&result.student_file)
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_else(|| result.student_file.clone());

    let mut lines = vec![
        heavy.clone(),
        "SPREADSHEET EVALUATION REPORT".to_string(),
        heavy.clone(),
        format!("Student: {}", result.student_name),
        format!("File: {}", file),
        String::new(),
        format!("TOTAL SCORE: {}", result.score_text()),
        String::new(),
        light.clone(),
        "QUESTION BREAKDOWN".to_string(),
        light.clone(),
    ];

    for q in &result.questions {
        let mut line = format!("Q{}: {} {}", q.question_num, q.score_text(), q.status());
        if !q.description.is_empty() {
            line.push_str(" - ");
            line.push_str(&q.description);
        }
        lines.push(line);
    }

    lines.extend([
        String::new(),
        light.clone(),
        "DETAILED FEEDBACK".to_string(),
        light,
    ]);

    for q in &result.questions {
        lines.push(String::new());
        if q.description.is_empty() {
            lines.push(format!("Question {}", q.question_num));
        } else {
            lines.push(format!("Question {}: {}", q.question_num, q.description));
        }
        lines.push(format!("Marks: {}", q.score_text()));
        lines.push(format!("Feedback: {}", q.feedback));

        let issues: Vec<_> = q.cells.iter().filter(|c| c.has_failure()).collect();
        if !issues.is_empty() {
            lines.push("Issues found:".to_string());
            for cell in issues {
                lines.push(format!("  • {}: {}", cell.cell_ref, cell.feedback));
                if let Some(formula) = &cell.submitted_formula {
                    lines.push(format!("      Your formula: {}", formula));
                }
            }
        }
    }

    lines.extend([String::new(), heavy.clone(), "END OF REPORT".to_string(), heavy]);
    let mut out = lines.join("\n");
    out.push('\n');
    out
}
