//! Batch grading over a bounded worker pool.
//!
//! Each submission is graded independently; one bad file never stops the
//! others. Results come back in input order whatever order workers finish in.

use gridmark_engine::engine::Comparator;
use gridmark_engine::scheme::MarkScheme;
use rayon::ThreadPoolBuilder;
use rayon::prelude::*;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::path::{Path, PathBuf};
use tracing::{debug, warn};

use crate::error::{GradeError, Result};
use crate::evaluator::Evaluator;
use crate::result::EvaluationResult;
use crate::workbook::Workbook;

/// One submission to grade: a file name and its bytes.
#[derive(Clone, Debug)]
pub struct Submission {
    pub name: String,
    pub bytes: Vec<u8>,
}

impl Submission {
    pub fn new(name: impl Into<String>, bytes: Vec<u8>) -> Submission {
        Submission {
            name: name.into(),
            bytes,
        }
    }

    /// Read a submission file; the name is the file name without its directory.
    pub fn read(path: &Path) -> Result<Submission> {
        let bytes = std::fs::read(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());
        Ok(Submission { name, bytes })
    }
}

/// Outcome for one submission of a batch.
#[derive(Debug)]
pub struct BatchEntry {
    pub name: String,
    pub outcome: Result<EvaluationResult>,
}

impl BatchEntry {
    pub fn failed(name: impl Into<String>, error: GradeError) -> BatchEntry {
        BatchEntry {
            name: name.into(),
            outcome: Err(error),
        }
    }
}

pub struct BatchRunner {
    evaluator: Evaluator,
    workers: usize,
}

impl BatchRunner {
    /// Validate the answer key against the scheme once for the whole batch.
    pub fn new(
        answer_key: Workbook,
        scheme: MarkScheme,
        comparator: impl Comparator + 'static,
        workers: usize,
    ) -> Result<BatchRunner> {
        let evaluator = Evaluator::new(answer_key, scheme, comparator)?;
        Ok(Self::with_evaluator(evaluator, workers))
    }

    pub fn with_evaluator(evaluator: Evaluator, workers: usize) -> BatchRunner {
        BatchRunner {
            evaluator,
            workers: workers.max(1),
        }
    }

    pub fn evaluator(&self) -> &Evaluator {
        &self.evaluator
    }

    pub fn workers(&self) -> usize {
        self.workers
    }

    /// Grade every submission. The output has one entry per input, in input order.
    pub fn run(&self, submissions: &[Submission]) -> Vec<BatchEntry> {
        debug!(count = submissions.len(), workers = self.workers, "batch started");
        let pool = ThreadPoolBuilder::new().num_threads(self.workers).build();
        let entries: Vec<BatchEntry> = match pool {
            Ok(pool) => pool.install(|| submissions.par_iter().map(|s| self.grade_one(s)).collect()),
            Err(e) => {
                warn!(error = %e, "worker pool unavailable, grading sequentially");
                submissions.iter().map(|s| self.grade_one(s)).collect()
            }
        };
        let failed = entries.iter().filter(|e| e.outcome.is_err()).count();
        debug!(graded = entries.len() - failed, failed, "batch finished");
        entries
    }

    /// Read and grade each file. Files that cannot be read keep their place
    /// in the output, paired with no submission.
    pub fn run_files(&self, paths: &[PathBuf]) -> Vec<(Option<Submission>, BatchEntry)> {
        let slots: Vec<std::result::Result<Submission, BatchEntry>> = paths
            .iter()
            .map(|path| Submission::read(path).map_err(|e| BatchEntry::failed(path.display().to_string(), e)))
            .collect();
        let readable: Vec<Submission> = slots.iter().filter_map(|s| s.as_ref().ok().cloned()).collect();
        let mut graded = self.run(&readable).into_iter();

        slots
            .into_iter()
            .map(|slot| match slot {
                Ok(submission) => {
                    let entry = graded.next().unwrap_or_else(|| {
                        BatchEntry::failed(&submission.name, GradeError::EvaluationPanicked("missing batch entry".into()))
                    });
                    (Some(submission), entry)
                }
                Err(entry) => (None, entry),
            })
            .collect()
    }

    fn grade_one(&self, submission: &Submission) -> BatchEntry {
        let outcome = catch_unwind(AssertUnwindSafe(|| {
            self.evaluator.evaluate_bytes(&submission.name, &submission.bytes)
        }))
        .unwrap_or_else(|payload| Err(GradeError::EvaluationPanicked(panic_message(payload.as_ref()))));
        BatchEntry {
            name: submission.name.clone(),
            outcome,
        }
    }
}

fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        s.to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "unknown panic".to_string()
    }
}

/// `*.xlsx` files in `folder`, sorted by file name.
///
/// The answer key itself is always skipped; with `skip_answer_files` any file
/// whose name contains `ans` (ignoring case) is skipped too. Office lock files
/// (`~$name.xlsx`) are ignored.
pub fn discover_submissions(folder: &Path, answer_key: Option<&Path>, skip_answer_files: bool) -> Result<Vec<PathBuf>> {
    let key = answer_key.and_then(|p| p.canonicalize().ok());
    let mut found = Vec::new();
    for entry in std::fs::read_dir(folder)? {
        let path = entry?.path();
        if !path.is_file() {
            continue;
        }
        let is_xlsx = path
            .extension()
            .and_then(|e| e.to_str())
            .is_some_and(|e| e.eq_ignore_ascii_case("xlsx"));
        if !is_xlsx {
            continue;
        }
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().to_lowercase())
            .unwrap_or_default();
        if name.starts_with("~$") {
            continue;
        }
        if skip_answer_files && name.contains("ans") {
            debug!(file = %path.display(), "skipping answer file");
            continue;
        }
        if key.is_some() && path.canonicalize().ok() == key {
            continue;
        }
        found.push(path);
    }
    found.sort_by(|a, b| a.file_name().cmp(&b.file_name()));
    Ok(found)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::workbook::Sheet;
    use gridmark_engine::engine::{CellContent, CellRef, CellValue, DefaultComparator};
    use gridmark_engine::scheme::SchemeOptions;
    use rust_xlsxwriter::{Formula, Workbook as XlsxWorkbook};

    fn runner(workers: usize) -> BatchRunner {
        let mut sheet = Sheet::new("Sheet1");
        sheet.insert(CellRef::new(0, 0), CellContent::new_value(CellValue::Number(10.0)));
        sheet.insert(
            CellRef::new(1, 1),
            CellContent::new_formula("A1*2", Some(CellValue::Number(20.0))),
        );
        let key = Workbook::new(vec![sheet], 0).unwrap();
        let scheme = MarkScheme::from_toml_str(
            "[[questions]]\nnumber = 1\nmarks = 10\ncells = [\"B2\"]\n",
            &SchemeOptions::default(),
        )
        .unwrap();
        BatchRunner::new(key, scheme, DefaultComparator::default(), workers).unwrap()
    }

    fn submission(name: &str, value: f64) -> Submission {
        let mut out = XlsxWorkbook::new();
        let ws = out.add_worksheet();
        ws.write_number(0, 0, 10.0).unwrap();
        ws.write_formula(1, 1, Formula::new("=A1*2").set_result(value.to_string()))
            .unwrap();
        Submission::new(name, out.save_to_buffer().unwrap())
    }

    #[test]
    fn test_failures_are_isolated_and_order_is_kept() {
        let submissions = vec![
            submission("alice_1.xlsx", 20.0),
            Submission::new("broken.xlsx", b"garbage".to_vec()),
            submission("bob_2.xlsx", 21.0),
            submission("carol_3.xlsx", 20.0),
        ];
        let entries = runner(3).run(&submissions);

        let names: Vec<&str> = entries.iter().map(|e| e.name.as_str()).collect();
        assert_eq!(names, vec!["alice_1.xlsx", "broken.xlsx", "bob_2.xlsx", "carol_3.xlsx"]);

        assert_eq!(entries[0].outcome.as_ref().unwrap().marks_awarded, 10.0);
        assert!(matches!(entries[1].outcome, Err(GradeError::MalformedWorkbook(_))));
        assert_eq!(entries[2].outcome.as_ref().unwrap().marks_awarded, 0.0);
        assert_eq!(entries[3].outcome.as_ref().unwrap().student_name, "Carol");
    }

    #[test]
    fn test_parallel_matches_sequential() {
        let submissions: Vec<Submission> = (0..8)
            .map(|i| submission(&format!("student_{}.xlsx", i), 18.0 + i as f64))
            .collect();
        let one: Vec<f64> = runner(1)
            .run(&submissions)
            .into_iter()
            .map(|e| e.outcome.unwrap().marks_awarded)
            .collect();
        let many: Vec<f64> = runner(4)
            .run(&submissions)
            .into_iter()
            .map(|e| e.outcome.unwrap().marks_awarded)
            .collect();
        assert_eq!(one, many);
        assert_eq!(one[2], 10.0);
    }

    #[test]
    fn test_unreadable_files_keep_their_place() {
        let dir = tempfile::tempdir().unwrap();
        let first = dir.path().join("alice_1.xlsx");
        let last = dir.path().join("carol_3.xlsx");
        std::fs::write(&first, submission("alice_1.xlsx", 20.0).bytes).unwrap();
        std::fs::write(&last, submission("carol_3.xlsx", 21.0).bytes).unwrap();
        let missing = dir.path().join("bob_2.xlsx");

        let entries = runner(2).run_files(&[first, missing.clone(), last]);
        let names: Vec<&str> = entries.iter().map(|(_, e)| e.name.as_str()).collect();
        assert_eq!(names, vec!["alice_1.xlsx", missing.display().to_string().as_str(), "carol_3.xlsx"]);

        assert!(entries[0].0.is_some());
        assert!(entries[1].0.is_none());
        assert!(matches!(entries[1].1.outcome, Err(GradeError::Io(_))));
        assert_eq!(entries[0].1.outcome.as_ref().unwrap().marks_awarded, 10.0);
        assert_eq!(entries[2].1.outcome.as_ref().unwrap().marks_awarded, 0.0);
    }

    #[test]
    fn test_discover_submissions() {
        let dir = tempfile::tempdir().unwrap();
        for name in ["zed.xlsx", "amy.xlsx", "SALES_ANS.xlsx", "notes.txt", "~$amy.xlsx", "key.xlsx"] {
            std::fs::write(dir.path().join(name), b"x").unwrap();
        }
        let key = dir.path().join("key.xlsx");
        let found = discover_submissions(dir.path(), Some(&key), true).unwrap();
        let names: Vec<String> = found
            .iter()
            .map(|p| p.file_name().unwrap().to_string_lossy().into_owned())
            .collect();
        assert_eq!(names, vec!["amy.xlsx", "zed.xlsx"]);

        let all = discover_submissions(dir.path(), None, false).unwrap();
        assert_eq!(all.len(), 4);
    }
}
