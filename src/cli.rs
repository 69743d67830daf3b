//! Command-line arguments.

use clap::{ArgGroup, Parser, ValueEnum};
use std::path::PathBuf;

#[derive(Parser, Debug)]
#[command(name = "gridmark", version)]
#[command(about = "Grade spreadsheet submissions against an answer key and mark scheme")]
#[command(group(ArgGroup::new("input").required(true).multiple(true).args(["submission", "batch_folder"])))]
#[command(after_help = "\
Examples:
  gridmark -a SALES_ans.xlsx --scheme sales.toml -s jane_doe.xlsx
  gridmark -a SALES_ans.xlsx --scheme sales.toml -b ./submissions -o all")]
pub struct Cli {
    /// Answer key workbook
    #[arg(long, short = 'a', value_name = "FILE")]
    pub answer_key: PathBuf,

    /// Mark scheme (TOML, or JSON when the extension is .json)
    #[arg(long, value_name = "FILE")]
    pub scheme: PathBuf,

    /// A single student submission
    #[arg(long, short = 's', value_name = "FILE")]
    pub submission: Option<PathBuf>,

    /// Folder of submissions; every .xlsx file in it is graded
    #[arg(long, short = 'b', value_name = "DIR")]
    pub batch_folder: Option<PathBuf>,

    /// Reports to write
    #[arg(long, short = 'o', value_enum, default_value_t = OutputFormat::Text)]
    pub output_format: OutputFormat,

    /// Directory for reports
    #[arg(long, short = 'd', value_name = "DIR", default_value = "./evaluation_results")]
    pub output_dir: PathBuf,

    /// Grader configuration file (defaults to the user config file when present)
    #[arg(long, value_name = "FILE")]
    pub config: Option<PathBuf>,

    /// Debug logging
    #[arg(long, short = 'v')]
    pub verbose: bool,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Text feedback per submission
    Text,
    /// Summary workbook plus a commented copy of each submission
    Excel,
    /// JSON results for the run
    Json,
    /// Everything above
    All,
}

impl OutputFormat {
    pub fn text(self) -> bool {
        matches!(self, OutputFormat::Text | OutputFormat::All)
    }

    pub fn excel(self) -> bool {
        matches!(self, OutputFormat::Excel | OutputFormat::All)
    }

    pub fn json(self) -> bool {
        matches!(self, OutputFormat::Json | OutputFormat::All)
    }
}
