//! Mark scheme model and validation.
//!
//! A mark scheme is authored as TOML or JSON ([`MarkSchemeConfig`]) and turned
//! into an immutable [`MarkScheme`] by [`MarkScheme::parse`], which enforces:
//!
//! - question numbers are exactly `1..=N`
//! - every cell question grades at least one cell
//! - no cell is graded by two questions
//! - cell weights of a question sum to its marks (within a tolerance)
//!
//! A question can instead grade a conditional formatting rule
//! (`kind = "conditional_formatting"`), with marks split between the range the
//! rule applies to, its condition formula and its fill colour.
//!
//! ```toml
//! name = "Sales analysis"
//!
//! [[questions]]
//! number = 1
//! description = "Total sales per row"
//! marks = 12
//! mode = "formula_and_value"
//! expected_formula = "=SUM(C4:F4)"
//! formula_anchor = "G4"
//! tolerance = 0.01
//! cells = ["G4:G15"]
//!
//! [[questions]]
//! number = 2
//! description = "Highlight missed targets"
//! marks = 3
//! kind = "conditional_formatting"
//!
//! [questions.conditional_formatting]
//! range = "A4:J15"
//! condition_pattern = '\$J\$?4="MISS"'
//! fill = "red"
//! ```

use chrono::{NaiveDate, NaiveDateTime};
use regex::{Regex, RegexBuilder};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use thiserror::Error;

use crate::engine::{CellAddress, CellRange, CellRef, CellValue, FillColour, expand_range};

/// Default allowed difference between a question's marks and its cell weights.
pub const DEFAULT_WEIGHT_TOLERANCE: f64 = 1e-6;

/// Errors raised while building a mark scheme.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum SchemeError {
    #[error("Mark scheme has no questions")]
    NoQuestions,

    #[error("Question {question} has no cells")]
    NoCells { question: u32 },

    #[error("Question numbers must run 1..{count} without gaps; found {found:?}")]
    NonContiguous { count: usize, found: Vec<u32> },

    #[error("Question {question}: {field} must be a non-negative number, got {value}")]
    Negative {
        question: u32,
        field: &'static str,
        value: f64,
    },

    #[error("Question {question}: cell weights sum to {actual}, expected {expected}")]
    WeightSum {
        question: u32,
        expected: f64,
        actual: f64,
    },

    #[error("Question {question}: either every cell sets a weight or none does")]
    MixedWeights { question: u32 },

    #[error("Cell {cell} is graded by both question {first} and question {second}")]
    CellCollision { cell: String, first: u32, second: u32 },

    #[error("Question {question}: invalid cell reference '{cell}'")]
    InvalidCellRef { question: u32, cell: String },

    #[error("Question {question}: invalid formula pattern '{pattern}': {message}")]
    InvalidPattern {
        question: u32,
        pattern: String,
        message: String,
    },

    #[error("Question {question}: invalid date '{value}' (use YYYY-MM-DD or YYYY-MM-DDTHH:MM:SS)")]
    InvalidDate { question: u32, value: String },

    #[error("Question {question}: invalid fill colour '{value}' (use red, green, blue, yellow or RRGGBB)")]
    InvalidColour { question: u32, value: String },

    #[error("Question {question}: {message}")]
    InvalidFormatRule { question: u32, message: String },

    #[error("Failed to parse mark scheme: {0}")]
    Parse(String),
}

/// Which aspects of a cell are graded.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ComparisonMode {
    #[serde(alias = "FORMULA_ONLY")]
    FormulaOnly,
    #[serde(alias = "VALUE_ONLY")]
    ValueOnly,
    #[default]
    #[serde(alias = "FORMULA_AND_VALUE")]
    FormulaAndValue,
    /// Formula or value: a correct hard-coded value is accepted in lieu of the formula.
    #[serde(alias = "EITHER")]
    Either,
}

impl ComparisonMode {
    pub fn checks_formula(self) -> bool {
        !matches!(self, ComparisonMode::ValueOnly)
    }

    pub fn checks_value(self) -> bool {
        !matches!(self, ComparisonMode::FormulaOnly)
    }
}

/// How a question turns per-cell verdicts into marks.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PartialCreditPolicy {
    #[serde(alias = "ALL_OR_NOTHING")]
    AllOrNothing,
    #[default]
    #[serde(alias = "PROPORTIONAL_BY_CELL")]
    ProportionalByCell,
}

/// One graded cell.
#[derive(Clone, Debug)]
pub struct CellSpec {
    pub cell_ref: CellAddress,
    /// Expected formula; falls back to the answer key's formula when absent.
    pub expected_formula: Option<String>,
    /// Cell the expected formula was authored for (defaults to `cell_ref`).
    pub formula_anchor: Option<CellRef>,
    /// When set, decides formula correctness instead of formula equality.
    pub formula_pattern: Option<Regex>,
    /// Expected value; falls back to the answer key's value when absent.
    pub expected_value: Option<CellValue>,
    pub value_tolerance: f64,
    pub weight: f64,
}

impl CellSpec {
    /// The cell an expected formula is relative to.
    pub fn formula_host(&self) -> CellRef {
        self.formula_anchor.unwrap_or(self.cell_ref.cell)
    }
}

/// What a question grades.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QuestionKind {
    #[default]
    #[serde(alias = "CELLS")]
    Cells,
    #[serde(alias = "CONDITIONAL_FORMATTING")]
    ConditionalFormatting,
}

/// A conditional formatting rule the submission must contain.
#[derive(Clone, Debug)]
pub struct FormatRuleSpec {
    /// Sheet holding the rule; the active sheet when absent.
    pub sheet: Option<String>,
    /// Range the rule must apply to.
    pub range: CellRange,
    pub range_marks: f64,
    /// Matched against the rule's normalized condition formula.
    pub condition_pattern: Regex,
    pub condition_marks: f64,
    pub fill: FillColour,
    pub fill_marks: f64,
}

impl FormatRuleSpec {
    pub fn total(&self) -> f64 {
        self.range_marks + self.condition_marks + self.fill_marks
    }
}

/// One question of the scheme.
#[derive(Clone, Debug)]
pub struct QuestionSpec {
    pub question_num: u32,
    pub description: String,
    pub total_marks: f64,
    /// Graded cells; empty for conditional formatting questions.
    pub cells: Vec<CellSpec>,
    pub comparison_mode: ComparisonMode,
    pub partial_credit_policy: PartialCreditPolicy,
    pub format_rule: Option<FormatRuleSpec>,
}

impl QuestionSpec {
    pub fn kind(&self) -> QuestionKind {
        if self.format_rule.is_some() {
            QuestionKind::ConditionalFormatting
        } else {
            QuestionKind::Cells
        }
    }
}

/// Validated, immutable mark scheme shared by every evaluation against one answer key.
#[derive(Clone, Debug)]
pub struct MarkScheme {
    name: Option<String>,
    version: u32,
    questions: Vec<QuestionSpec>,
}

/// Knobs for [`MarkScheme::parse`].
#[derive(Clone, Copy, Debug)]
pub struct SchemeOptions {
    /// Allowed difference between a question's marks and the sum of its cell weights.
    pub weight_tolerance: f64,
    /// Value tolerance for cells and questions that do not set one.
    pub default_tolerance: f64,
}

impl Default for SchemeOptions {
    fn default() -> Self {
        Self {
            weight_tolerance: DEFAULT_WEIGHT_TOLERANCE,
            default_tolerance: 0.0,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct MarkSchemeConfig {
    pub name: Option<String>,
    pub version: Option<u32>,
    #[serde(default)]
    pub questions: Vec<QuestionConfig>,
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct QuestionConfig {
    #[serde(alias = "question_num")]
    pub number: u32,
    #[serde(default)]
    pub description: String,
    #[serde(alias = "total_marks")]
    pub marks: f64,
    #[serde(default, alias = "comparison_mode")]
    pub mode: ComparisonMode,
    #[serde(default, alias = "partial_credit_policy")]
    pub partial_credit: PartialCreditPolicy,
    pub tolerance: Option<f64>,
    pub expected_formula: Option<String>,
    pub formula_anchor: Option<String>,
    pub formula_pattern: Option<String>,
    #[serde(default)]
    pub kind: QuestionKind,
    pub conditional_formatting: Option<FormatRuleConfig>,
    #[serde(default)]
    pub cells: Vec<CellEntry>,
}

/// Authored form of a conditional formatting question. Criteria without marks
/// split the question's marks evenly.
#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct FormatRuleConfig {
    pub sheet: Option<String>,
    pub range: String,
    pub range_marks: Option<f64>,
    pub condition_pattern: String,
    pub condition_marks: Option<f64>,
    pub fill: String,
    pub fill_marks: Option<f64>,
}

/// A cell list entry: a bare reference/range, or a table with per-cell settings.
#[derive(Debug, Deserialize)]
#[serde(untagged)]
pub enum CellEntry {
    Ref(String),
    Spec(CellConfig),
}

#[derive(Debug, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CellConfig {
    #[serde(rename = "ref", alias = "cell_ref")]
    pub cell: String,
    pub expected_formula: Option<String>,
    pub formula_anchor: Option<String>,
    pub formula_pattern: Option<String>,
    pub expected_value: Option<ExpectedValue>,
    pub tolerance: Option<f64>,
    pub weight: Option<f64>,
}

/// An authored expected value. Dates are written as `{ date = "2025-12-31" }`.
#[derive(Debug, Clone, Deserialize)]
#[serde(untagged)]
pub enum ExpectedValue {
    Bool(bool),
    Number(f64),
    Text(String),
    Date { date: String },
}

impl MarkScheme {
    /// Parse a TOML mark scheme.
    pub fn from_toml_str(content: &str, options: &SchemeOptions) -> Result<MarkScheme, SchemeError> {
        let config: MarkSchemeConfig =
            toml::from_str(content).map_err(|e| SchemeError::Parse(e.to_string()))?;
        Self::parse(config, options)
    }

    /// Parse a JSON mark scheme.
    pub fn from_json_str(content: &str, options: &SchemeOptions) -> Result<MarkScheme, SchemeError> {
        let config: MarkSchemeConfig =
            serde_json::from_str(content).map_err(|e| SchemeError::Parse(e.to_string()))?;
        Self::parse(config, options)
    }

    /// Validate a deserialized configuration into a mark scheme.
    pub fn parse(config: MarkSchemeConfig, options: &SchemeOptions) -> Result<MarkScheme, SchemeError> {
        if config.questions.is_empty() {
            return Err(SchemeError::NoQuestions);
        }

        let mut numbers: Vec<u32> = config.questions.iter().map(|q| q.number).collect();
        numbers.sort_unstable();
        let contiguous = numbers
            .iter()
            .enumerate()
            .all(|(idx, n)| *n as usize == idx + 1);
        if !contiguous {
            return Err(SchemeError::NonContiguous {
                count: numbers.len(),
                found: numbers,
            });
        }

        let mut questions = config
            .questions
            .into_iter()
            .map(|q| build_question(q, options))
            .collect::<Result<Vec<_>, _>>()?;
        questions.sort_by_key(|q| q.question_num);

        let scheme = MarkScheme {
            name: config.name,
            version: config.version.unwrap_or(1),
            questions,
        };
        scheme.check_collisions(None)?;
        Ok(scheme)
    }

    /// Fail when two questions grade the same cell.
    ///
    /// Unqualified addresses are placed on `active_sheet` when it is given, so
    /// `B2` and `Sheet1!B2` collide once the active sheet is known to be `Sheet1`.
    /// Without it they are treated as different cells.
    pub fn check_collisions(&self, active_sheet: Option<&str>) -> Result<(), SchemeError> {
        let active = active_sheet.map(str::to_lowercase);
        let mut owners: HashMap<(Option<String>, CellRef), u32> = HashMap::new();
        for q in &self.questions {
            for cell in &q.cells {
                let sheet = match &cell.cell_ref.sheet {
                    Some(name) => Some(name.to_lowercase()),
                    None => active.clone(),
                };
                if let Some(first) = owners.insert((sheet, cell.cell_ref.cell), q.question_num) {
                    return Err(SchemeError::CellCollision {
                        cell: cell.cell_ref.to_string(),
                        first,
                        second: q.question_num,
                    });
                }
            }
        }
        Ok(())
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn version(&self) -> u32 {
        self.version
    }

    /// Questions ordered by number.
    pub fn questions(&self) -> &[QuestionSpec] {
        &self.questions
    }

    pub fn question(&self, num: u32) -> Option<&QuestionSpec> {
        self.questions.iter().find(|q| q.question_num == num)
    }

    /// Sum of every question's marks.
    pub fn total_marks(&self) -> f64 {
        self.questions.iter().map(|q| q.total_marks).sum()
    }

    /// Every graded cell, in question order.
    pub fn cells(&self) -> impl Iterator<Item = &CellSpec> {
        self.questions.iter().flat_map(|q| q.cells.iter())
    }
}

fn build_question(q: QuestionConfig, options: &SchemeOptions) -> Result<QuestionSpec, SchemeError> {
    let question = q.number;
    ensure_non_negative(question, "marks", q.marks)?;

    match (q.kind, q.conditional_formatting.is_some()) {
        (QuestionKind::ConditionalFormatting, _) => return build_format_question(q, options),
        (QuestionKind::Cells, true) => {
            return Err(SchemeError::InvalidFormatRule {
                question,
                message: "conditional_formatting needs kind = \"conditional_formatting\"".to_string(),
            });
        }
        (QuestionKind::Cells, false) => {}
    }

    let default_tolerance = q.tolerance.unwrap_or(options.default_tolerance);
    ensure_non_negative(question, "tolerance", default_tolerance)?;
    let default_pattern = q
        .formula_pattern
        .as_deref()
        .map(|p| compile_pattern(question, p))
        .transpose()?;
    let default_anchor = q
        .formula_anchor
        .as_deref()
        .map(|a| parse_anchor(question, a))
        .transpose()?;

    let mut cells: Vec<CellSpec> = Vec::new();
    let mut explicit_weights: Vec<Option<f64>> = Vec::new();

    for entry in q.cells {
        let (reference, config) = match entry {
            CellEntry::Ref(r) => (r, None),
            CellEntry::Spec(c) => (c.cell.clone(), Some(c)),
        };
        let addresses = expand_range(&reference).ok_or_else(|| SchemeError::InvalidCellRef {
            question,
            cell: reference.clone(),
        })?;

        let expected_formula = config
            .as_ref()
            .and_then(|c| c.expected_formula.clone())
            .or_else(|| q.expected_formula.clone());
        let formula_anchor = match config.as_ref().and_then(|c| c.formula_anchor.as_deref()) {
            Some(anchor) => Some(parse_anchor(question, anchor)?),
            None => default_anchor,
        };
        let formula_pattern = match config.as_ref().and_then(|c| c.formula_pattern.as_deref()) {
            Some(pattern) => Some(compile_pattern(question, pattern)?),
            None => default_pattern.clone(),
        };
        let expected_value = config
            .as_ref()
            .and_then(|c| c.expected_value.as_ref())
            .map(|v| convert_expected(question, v))
            .transpose()?;
        let tolerance = config
            .as_ref()
            .and_then(|c| c.tolerance)
            .unwrap_or(default_tolerance);
        ensure_non_negative(question, "tolerance", tolerance)?;
        let weight = config.as_ref().and_then(|c| c.weight);
        if let Some(w) = weight {
            ensure_non_negative(question, "weight", w)?;
        }

        for address in addresses {
            cells.push(CellSpec {
                cell_ref: address,
                expected_formula: expected_formula.clone(),
                formula_anchor,
                formula_pattern: formula_pattern.clone(),
                expected_value: expected_value.clone(),
                value_tolerance: tolerance,
                weight: weight.unwrap_or(0.0),
            });
            explicit_weights.push(weight);
        }
    }

    if cells.is_empty() {
        return Err(SchemeError::NoCells { question });
    }

    let weighted = explicit_weights.iter().filter(|w| w.is_some()).count();
    if weighted == 0 {
        let share = q.marks / cells.len() as f64;
        for cell in &mut cells {
            cell.weight = share;
        }
    } else if weighted != cells.len() {
        return Err(SchemeError::MixedWeights { question });
    }

    let actual: f64 = cells.iter().map(|c| c.weight).sum();
    if (actual - q.marks).abs() > options.weight_tolerance {
        return Err(SchemeError::WeightSum {
            question,
            expected: q.marks,
            actual,
        });
    }

    Ok(QuestionSpec {
        question_num: question,
        description: q.description,
        total_marks: q.marks,
        cells,
        comparison_mode: q.mode,
        partial_credit_policy: q.partial_credit,
        format_rule: None,
    })
}

fn build_format_question(q: QuestionConfig, options: &SchemeOptions) -> Result<QuestionSpec, SchemeError> {
    let question = q.number;
    let invalid = |message: &str| SchemeError::InvalidFormatRule {
        question,
        message: message.to_string(),
    };
    if !q.cells.is_empty() {
        return Err(invalid("conditional formatting questions do not grade cells"));
    }
    let Some(rule) = q.conditional_formatting else {
        return Err(invalid("missing [questions.conditional_formatting] table"));
    };

    let range = CellRange::parse(&rule.range).ok_or_else(|| SchemeError::InvalidCellRef {
        question,
        cell: rule.range.clone(),
    })?;
    let condition_pattern = compile_pattern(question, &rule.condition_pattern)?;
    let fill = FillColour::parse(&rule.fill).ok_or_else(|| SchemeError::InvalidColour {
        question,
        value: rule.fill.clone(),
    })?;

    let authored = [rule.range_marks, rule.condition_marks, rule.fill_marks];
    let [range_marks, condition_marks, fill_marks] = match authored.iter().filter(|m| m.is_some()).count() {
        0 => [q.marks / 3.0; 3],
        3 => authored.map(|m| m.unwrap_or_default()),
        _ => return Err(SchemeError::MixedWeights { question }),
    };
    for (field, value) in [
        ("range_marks", range_marks),
        ("condition_marks", condition_marks),
        ("fill_marks", fill_marks),
    ] {
        ensure_non_negative(question, field, value)?;
    }

    let spec = FormatRuleSpec {
        sheet: rule.sheet,
        range,
        range_marks,
        condition_pattern,
        condition_marks,
        fill,
        fill_marks,
    };
    if (spec.total() - q.marks).abs() > options.weight_tolerance {
        return Err(SchemeError::WeightSum {
            question,
            expected: q.marks,
            actual: spec.total(),
        });
    }

    Ok(QuestionSpec {
        question_num: question,
        description: q.description,
        total_marks: q.marks,
        cells: Vec::new(),
        comparison_mode: q.mode,
        partial_credit_policy: q.partial_credit,
        format_rule: Some(spec),
    })
}

fn ensure_non_negative(question: u32, field: &'static str, value: f64) -> Result<(), SchemeError> {
    if value.is_finite() && value >= 0.0 {
        Ok(())
    } else {
        Err(SchemeError::Negative {
            question,
            field,
            value,
        })
    }
}

fn compile_pattern(question: u32, pattern: &str) -> Result<Regex, SchemeError> {
    RegexBuilder::new(pattern)
        .case_insensitive(true)
        .build()
        .map_err(|e| SchemeError::InvalidPattern {
            question,
            pattern: pattern.to_string(),
            message: e.to_string(),
        })
}

fn parse_anchor(question: u32, anchor: &str) -> Result<CellRef, SchemeError> {
    CellAddress::parse(anchor)
        .map(|a| a.cell)
        .ok_or_else(|| SchemeError::InvalidCellRef {
            question,
            cell: anchor.to_string(),
        })
}

fn convert_expected(question: u32, value: &ExpectedValue) -> Result<CellValue, SchemeError> {
    Ok(match value {
        ExpectedValue::Bool(b) => CellValue::Bool(*b),
        ExpectedValue::Number(n) => CellValue::Number(*n),
        ExpectedValue::Text(s) => CellValue::Text(s.clone()),
        ExpectedValue::Date { date } => {
            let trimmed = date.trim();
            if let Ok(d) = NaiveDate::parse_from_str(trimmed, "%Y-%m-%d") {
                CellValue::date(d)
            } else if let Ok(dt) = NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%dT%H:%M:%S")
                .or_else(|_| NaiveDateTime::parse_from_str(trimmed, "%Y-%m-%d %H:%M:%S"))
            {
                CellValue::Date(dt)
            } else {
                return Err(SchemeError::InvalidDate {
                    question,
                    value: date.clone(),
                });
            }
        }
    })
}
