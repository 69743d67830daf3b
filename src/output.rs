//! Writing report artifacts to the output directory.

use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use gridmark_core::report::{comment_submission, render_batch_json, render_summary_workbook, render_text_report};
use gridmark_core::{BatchEntry, EvaluationResult, Submission};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::info;

use crate::cli::OutputFormat;

pub struct OutputWriter<'a> {
    dir: &'a Path,
    format: OutputFormat,
    comment_author: &'a str,
}

impl<'a> OutputWriter<'a> {
    pub fn new(dir: &'a Path, format: OutputFormat, comment_author: &'a str) -> Result<Self> {
        fs::create_dir_all(dir).with_context(|| format!("creating output directory {}", dir.display()))?;
        Ok(OutputWriter {
            dir,
            format,
            comment_author,
        })
    }

    /// Per-submission artifacts: `{stem}_feedback.txt` and `{stem}_commented.xlsx`.
    pub fn write_submission(&self, submission: &Submission, result: &EvaluationResult) -> Result<Vec<PathBuf>> {
        let stem = file_stem(&submission.name);
        let mut written = Vec::new();
        if self.format.text() {
            let path = self.dir.join(format!("{}_feedback.txt", stem));
            write(&path, render_text_report(result).as_bytes())?;
            written.push(path);
        }
        if self.format.excel() {
            let path = self.dir.join(format!("{}_commented.xlsx", stem));
            let bytes = comment_submission(&submission.bytes, result, self.comment_author)
                .with_context(|| format!("annotating {}", submission.name))?;
            write(&path, &bytes)?;
            written.push(path);
        }
        Ok(written)
    }

    /// Run-level artifacts, stamped with `now`. Nothing is written when no
    /// submission was graded.
    pub fn write_run(&self, entries: &[BatchEntry], now: DateTime<Local>) -> Result<Vec<PathBuf>> {
        let mut written = Vec::new();
        if !entries.iter().any(|e| e.outcome.is_ok()) {
            return Ok(written);
        }
        let timestamp = now.format("%Y%m%d_%H%M%S");
        if self.format.excel() {
            let path = self.dir.join(format!("marking_summary_{}.xlsx", timestamp));
            write(&path, &render_summary_workbook(entries)?)?;
            info!("Summary report saved to {}", path.display());
            written.push(path);
        }
        if self.format.json() {
            let path = self.dir.join(format!("marking_results_{}.json", timestamp));
            write(&path, render_batch_json(entries, Some(now))?.as_bytes())?;
            info!("JSON report saved to {}", path.display());
            written.push(path);
        }
        Ok(written)
    }
}

fn write(path: &Path, bytes: &[u8]) -> Result<()> {
    fs::write(path, bytes).with_context(|| format!("writing {}", path.display()))
}

fn file_stem(name: &str) -> String {
    Path::new(name)
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| name.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_file_stem() {
        assert_eq!(file_stem("jane_doe_1.xlsx"), "jane_doe_1");
        assert_eq!(file_stem("noext"), "noext");
    }

    #[test]
    fn test_no_run_artifacts_without_results() {
        let dir = tempfile::tempdir().unwrap();
        let writer = OutputWriter::new(dir.path(), OutputFormat::All, "Feedback").unwrap();
        let entries = vec![BatchEntry::failed(
            "bad.xlsx",
            gridmark_core::GradeError::MalformedWorkbook("not a zip".into()),
        )];
        assert!(writer.write_run(&entries, Local::now()).unwrap().is_empty());
    }
}
