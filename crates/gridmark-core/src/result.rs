//! Evaluation results.

use gridmark_engine::engine::{CellResult, format_number};
use serde::Serialize;

/// Marks for one question.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct QuestionResult {
    pub question_num: u32,
    pub description: String,
    pub total_marks: f64,
    pub marks_awarded: f64,
    pub feedback: String,
    /// In mark scheme order.
    pub cells: Vec<CellResult>,
}

impl QuestionResult {
    /// ✓ full marks, △ partial, ✗ none.
    pub fn status(&self) -> &'static str {
        if self.marks_awarded >= self.total_marks {
            "✓"
        } else if self.marks_awarded > 0.0 {
            "△"
        } else {
            "✗"
        }
    }

    /// `awarded/total` with numbers printed compactly.
    pub fn score_text(&self) -> String {
        format!("{}/{}", format_number(self.marks_awarded), format_number(self.total_marks))
    }
}

/// The graded outcome of one submission.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct EvaluationResult {
    pub student_name: String,
    pub student_file: String,
    pub total_marks: f64,
    pub marks_awarded: f64,
    pub percentage: f64,
    pub summary: String,
    /// Ordered by question number.
    pub questions: Vec<QuestionResult>,
}

impl EvaluationResult {
    pub(crate) fn new(student_name: String, student_file: String, questions: Vec<QuestionResult>) -> Self {
        let total_marks: f64 = questions.iter().map(|q| q.total_marks).sum();
        let marks_awarded = round_marks(questions.iter().map(|q| q.marks_awarded).sum());
        let percentage = if total_marks > 0.0 {
            marks_awarded / total_marks * 100.0
        } else {
            0.0
        };
        let mut result = EvaluationResult {
            student_name,
            student_file,
            total_marks,
            marks_awarded,
            percentage,
            summary: String::new(),
            questions,
        };
        result.summary = result.build_summary();
        result
    }

    pub fn score_text(&self) -> String {
        format!(
            "{}/{} ({:.1}%)",
            format_number(self.marks_awarded),
            format_number(self.total_marks),
            self.percentage
        )
    }

    fn build_summary(&self) -> String {
        let mut lines = vec![
            format!("Student: {}", self.student_name),
            format!("Total Score: {}", self.score_text()),
            String::new(),
            "Question Breakdown:".to_string(),
        ];
        for q in &self.questions {
            lines.push(format!("  Q{}: {} {}", q.question_num, q.score_text(), q.status()));
        }
        lines.join("\n")
    }
}

fn round_marks(marks: f64) -> f64 {
    (marks * 1e6).round() / 1e6
}

#[cfg(test)]
mod tests {
    use super::*;

    fn question(num: u32, awarded: f64, total: f64) -> QuestionResult {
        QuestionResult {
            question_num: num,
            description: format!("Question {}", num),
            total_marks: total,
            marks_awarded: awarded,
            feedback: String::new(),
            cells: Vec::new(),
        }
    }

    #[test]
    fn test_totals_and_percentage() {
        let result = EvaluationResult::new(
            "Jane Doe".into(),
            "jane_doe.xlsx".into(),
            vec![question(1, 10.0, 10.0), question(2, 2.5, 5.0), question(3, 0.0, 5.0)],
        );
        assert_eq!(result.total_marks, 20.0);
        assert_eq!(result.marks_awarded, 12.5);
        assert_eq!(result.percentage, 62.5);
        assert_eq!(
            result.summary,
            "Student: Jane Doe\nTotal Score: 12.5/20 (62.5%)\n\nQuestion Breakdown:\n  Q1: 10/10 ✓\n  Q2: 2.5/5 △\n  Q3: 0/5 ✗"
        );
    }

    #[test]
    fn test_zero_total_has_zero_percentage() {
        let result = EvaluationResult::new("A".into(), "a.xlsx".into(), vec![question(1, 0.0, 0.0)]);
        assert_eq!(result.percentage, 0.0);
        assert_eq!(result.questions[0].status(), "✓");
    }
}
