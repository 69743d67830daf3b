//! gridmark - grade spreadsheet submissions from the command line.

mod cli;
mod logging;
mod output;

use anyhow::{Context, Result, bail};
use chrono::Local;
use clap::Parser;
use gridmark_core::{
    BatchRunner, Evaluator, GraderConfig, discover_submissions, load_mark_scheme, open_workbook,
};
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::{error, warn};

use cli::Cli;
use output::OutputWriter;

fn main() -> ExitCode {
    let cli = Cli::parse();
    logging::init(cli.verbose);
    match run(&cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{:#}", e);
            ExitCode::FAILURE
        }
    }
}

fn run(cli: &Cli) -> Result<()> {
    let config = GraderConfig::load(cli.config.as_deref()).context("loading grader configuration")?;
    let scheme = load_mark_scheme(&cli.scheme, &config.scheme_options())
        .with_context(|| format!("loading mark scheme {}", cli.scheme.display()))?;
    let answer_key = open_workbook(&cli.answer_key)
        .with_context(|| format!("loading answer key {}", cli.answer_key.display()))?;
    let evaluator = Evaluator::new(answer_key, scheme, config.comparator())
        .context("answer key does not fit the mark scheme")?;

    let files = collect_files(cli, config.skip_answer_files)?;
    let runner = BatchRunner::with_evaluator(evaluator, config.worker_count());
    logging::run_started(&cli.answer_key, files.len(), runner.workers());

    let graded = runner.run_files(&files);
    let writer = OutputWriter::new(&cli.output_dir, cli.output_format, &config.comment_author)?;
    let mut entries = Vec::with_capacity(graded.len());
    for (submission, entry) in graded {
        logging::file_outcome(&entry);
        if let (Some(submission), Ok(result)) = (&submission, &entry.outcome) {
            if let Err(e) = writer.write_submission(submission, result) {
                warn!("{:#}", e);
            }
            if cli.submission.is_some() && cli.batch_folder.is_none() && cli.output_format.text() {
                println!("{}", gridmark_core::report::render_text_report(result));
            }
        }
        entries.push(entry);
    }

    writer.write_run(&entries, Local::now())?;
    logging::run_finished(&entries, &cli.output_dir);
    Ok(())
}

/// The single submission first, then the batch folder in filename order.
fn collect_files(cli: &Cli, skip_answer_files: bool) -> Result<Vec<PathBuf>> {
    let mut files = Vec::new();
    if let Some(path) = &cli.submission {
        if !path.is_file() {
            bail!("submission not found: {}", path.display());
        }
        files.push(path.clone());
    }
    if let Some(folder) = &cli.batch_folder {
        if !folder.is_dir() {
            bail!("batch folder not found: {}", folder.display());
        }
        let found = discover_submissions(folder, Some(&cli.answer_key), skip_answer_files)
            .with_context(|| format!("scanning {}", folder.display()))?;
        files.extend(found.into_iter().filter(|p| Some(p) != cli.submission.as_ref()));
    }
    if files.is_empty() {
        bail!("no spreadsheet files found to evaluate");
    }
    Ok(files)
}
