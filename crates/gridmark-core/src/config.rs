//! Grader configuration and mark scheme files.
//!
//! `GraderConfig` is read from `--config PATH` when given, else from
//! `config.toml` in the platform config directory, else defaults apply.

use directories::ProjectDirs;
use gridmark_engine::engine::{DefaultComparator, FormulaEquivalence};
use gridmark_engine::scheme::{DEFAULT_WEIGHT_TOLERANCE, MarkScheme, SchemeOptions};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::debug;

use crate::error::{GradeError, Result};

const MAX_CONFIG_FILE_BYTES: u64 = 1_048_576; // 1 MiB

#[derive(Clone, Debug, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct GraderConfig {
    /// Value tolerance for cells whose scheme entry sets none.
    pub default_tolerance: f64,
    /// Allowed gap between a question's marks and its summed cell weights.
    pub weight_tolerance: f64,
    pub formula_equivalence: FormulaEquivalence,
    /// Batch worker threads; `None` uses every available core.
    pub workers: Option<usize>,
    /// Author shown on feedback notes in commented workbooks.
    pub comment_author: String,
    /// Skip `*ans*` files when scanning a batch folder.
    pub skip_answer_files: bool,
}

impl Default for GraderConfig {
    fn default() -> Self {
        Self {
            default_tolerance: 0.0,
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            formula_equivalence: FormulaEquivalence::default(),
            workers: None,
            comment_author: "Feedback".to_string(),
            skip_answer_files: true,
        }
    }
}

impl GraderConfig {
    /// Resolve configuration: an explicit file must exist; the user config file is optional.
    pub fn load(explicit: Option<&Path>) -> Result<GraderConfig> {
        match explicit {
            Some(path) => Self::from_file(path),
            None => match user_config_path() {
                Some(path) if path.exists() => Self::from_file(&path),
                _ => {
                    debug!("no grader config file, using defaults");
                    Ok(GraderConfig::default())
                }
            },
        }
    }

    pub fn from_file(path: &Path) -> Result<GraderConfig> {
        let content = read_limited(path)?;
        let config = Self::from_toml_str(&content)
            .map_err(|e| GradeError::Config(format!("{}: {}", path.display(), e)))?;
        debug!(path = %path.display(), "loaded grader config");
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<GraderConfig> {
        let config: GraderConfig =
            toml::from_str(content).map_err(|e| GradeError::Config(e.to_string()))?;
        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("default_tolerance", self.default_tolerance),
            ("weight_tolerance", self.weight_tolerance),
        ] {
            if !value.is_finite() || value < 0.0 {
                return Err(GradeError::Config(format!(
                    "{} must be a non-negative number, got {}",
                    name, value
                )));
            }
        }
        if self.workers == Some(0) {
            return Err(GradeError::Config("workers must be at least 1".to_string()));
        }
        Ok(())
    }

    pub fn scheme_options(&self) -> SchemeOptions {
        SchemeOptions {
            weight_tolerance: self.weight_tolerance,
            default_tolerance: self.default_tolerance,
        }
    }

    pub fn comparator(&self) -> DefaultComparator {
        DefaultComparator::new(self.formula_equivalence)
    }

    /// Worker pool size for batch runs.
    pub fn worker_count(&self) -> usize {
        self.workers.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
        })
    }
}

/// Load a mark scheme file. `.json` files are read as JSON, anything else as TOML.
pub fn load_mark_scheme(path: &Path, options: &SchemeOptions) -> Result<MarkScheme> {
    let content = read_limited(path)?;
    let is_json = path
        .extension()
        .and_then(|e| e.to_str())
        .is_some_and(|e| e.eq_ignore_ascii_case("json"));
    let scheme = if is_json {
        MarkScheme::from_json_str(&content, options)?
    } else {
        MarkScheme::from_toml_str(&content, options)?
    };
    debug!(
        path = %path.display(),
        questions = scheme.questions().len(),
        "loaded mark scheme"
    );
    Ok(scheme)
}

fn read_limited(path: &Path) -> Result<String> {
    let meta = std::fs::metadata(path)?;
    if meta.len() > MAX_CONFIG_FILE_BYTES {
        return Err(GradeError::Config(format!(
            "Refusing to read {}: file too large ({} bytes, max {})",
            path.display(),
            meta.len(),
            MAX_CONFIG_FILE_BYTES
        )));
    }
    Ok(std::fs::read_to_string(path)?)
}

pub fn user_config_path() -> Option<PathBuf> {
    let proj = ProjectDirs::from("", "", "gridmark")?;
    let mut path = proj.config_dir().to_path_buf();
    path.push("config.toml");
    Some(path)
}
