//! Log setup and run banners.

use gridmark_core::BatchEntry;
use std::io::IsTerminal;
use std::path::Path;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

const RULE_WIDTH: usize = 50;

/// Install the stderr subscriber. `RUST_LOG` wins over `verbose`.
pub fn init(verbose: bool) {
    let default = if verbose { "gridmark=debug" } else { "gridmark=info" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_writer(std::io::stderr)
        .with_ansi(std::io::stderr().is_terminal())
        .with_target(false)
        .try_init();
}

pub fn run_started(answer_key: &Path, files: usize, workers: usize) {
    info!("Loaded answer key: {}", answer_key.display());
    info!("Found {} file(s) to evaluate ({} worker(s))", files, workers);
}

pub fn file_outcome(entry: &BatchEntry) {
    match &entry.outcome {
        Ok(result) => info!("Evaluated {}: {}", entry.name, result.score_text()),
        Err(e) => warn!(kind = e.kind(), "Not graded {}: {}", entry.name, e),
    }
}

/// Final statistics for the run.
pub fn run_finished(entries: &[BatchEntry], output_dir: &Path) {
    let graded: Vec<f64> = entries
        .iter()
        .filter_map(|e| e.outcome.as_ref().ok())
        .map(|r| r.percentage)
        .collect();
    let failed = entries.len() - graded.len();
    let rule = "=".repeat(RULE_WIDTH);

    info!("{}", rule);
    info!("EVALUATION COMPLETE");
    info!("{}", rule);
    info!("Files evaluated: {}", graded.len());
    if failed > 0 {
        info!("Files failed: {}", failed);
    }
    if !graded.is_empty() {
        let average = graded.iter().sum::<f64>() / graded.len() as f64;
        info!("Average score: {:.1}%", average);
    }
    info!("Results saved to: {}", output_dir.display());
}
