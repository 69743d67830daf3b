//! Conditional formatting rules read from a worksheet, and grading them.
//!
//! A worksheet carries zero or more [`ConditionalFormat`] blocks. Each block
//! applies its [`FormatRule`]s to one or more ranges. A rule is graded on three
//! criteria (applied range, condition formula, fill colour) and the question
//! scores the best single rule.

use serde::Serialize;
use std::fmt;

use super::cell_ref::CellRange;
use super::formula::formula_matches_pattern;
use crate::scheme::FormatRuleSpec;

/// An RGB colour, alpha dropped.
#[derive(Clone, Copy, Debug, Eq, PartialEq, Hash, Serialize)]
pub struct Rgb {
    pub r: u8,
    pub g: u8,
    pub b: u8,
}

impl Rgb {
    pub fn new(r: u8, g: u8, b: u8) -> Rgb {
        Rgb { r, g, b }
    }

    /// Parse `RRGGBB` or `AARRGGBB`, with or without a leading `#`.
    pub fn from_hex(hex: &str) -> Option<Rgb> {
        let s = hex.trim().trim_start_matches('#');
        let s = match s.len() {
            8 => &s[2..],
            6 => s,
            _ => return None,
        };
        if !s.is_ascii() {
            return None;
        }
        let channel = |i: usize| u8::from_str_radix(&s[i..i + 2], 16).ok();
        Some(Rgb::new(channel(0)?, channel(2)?, channel(4)?))
    }
}

impl fmt::Display for Rgb {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "#{:02X}{:02X}{:02X}", self.r, self.g, self.b)
    }
}

/// Broad colour families a marker can ask for without naming an exact shade.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ColourFamily {
    Red,
    Green,
    Blue,
    Yellow,
}

impl ColourFamily {
    fn contains(self, c: Rgb) -> bool {
        let (r, g, b) = (c.r, c.g, c.b);
        match self {
            ColourFamily::Red => r > 200 && g < 150 && b < 150,
            ColourFamily::Green => g > 150 && r < 150 && b < 150,
            ColourFamily::Blue => b > 150 && r < 150 && g < 150,
            ColourFamily::Yellow => r > 200 && g > 200 && b < 150,
        }
    }

    fn name(self) -> &'static str {
        match self {
            ColourFamily::Red => "red",
            ColourFamily::Green => "green",
            ColourFamily::Blue => "blue",
            ColourFamily::Yellow => "yellow",
        }
    }
}

/// The fill a rule must apply: a colour family or one exact colour.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum FillColour {
    Family(ColourFamily),
    Exact(Rgb),
}

impl FillColour {
    /// Parse `red`, `green`, `blue`, `yellow` or a hex colour.
    pub fn parse(input: &str) -> Option<FillColour> {
        let family = match input.trim().to_ascii_lowercase().as_str() {
            "red" => ColourFamily::Red,
            "green" => ColourFamily::Green,
            "blue" => ColourFamily::Blue,
            "yellow" => ColourFamily::Yellow,
            _ => return Rgb::from_hex(input).map(FillColour::Exact),
        };
        Some(FillColour::Family(family))
    }

    pub fn matches(&self, colour: Rgb) -> bool {
        match self {
            FillColour::Family(family) => family.contains(colour),
            FillColour::Exact(rgb) => *rgb == colour,
        }
    }
}

impl fmt::Display for FillColour {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FillColour::Family(family) => f.write_str(family.name()),
            FillColour::Exact(rgb) => write!(f, "{}", rgb),
        }
    }
}

/// One rule of a conditional formatting block.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct FormatRule {
    /// Rule type as stored in the workbook (`expression`, `cellIs`, ...).
    pub kind: String,
    pub formulas: Vec<String>,
    /// Background colour of the rule's differential format.
    pub fill: Option<Rgb>,
}

/// Rules and the ranges they apply to.
#[derive(Clone, Debug, Default, PartialEq)]
pub struct ConditionalFormat {
    pub ranges: Vec<CellRange>,
    pub rules: Vec<FormatRule>,
}

impl ConditionalFormat {
    /// Parse a space-separated `sqref` list such as `A4:J15 L4:L15`.
    /// Unparseable entries are skipped.
    pub fn parse_sqref(sqref: &str) -> Vec<CellRange> {
        sqref.split_whitespace().filter_map(CellRange::parse).collect()
    }
}

/// How one rule fared against each criterion.
#[derive(Clone, Copy, Debug, Default)]
struct RuleVerdict {
    range: bool,
    condition: bool,
    fill: bool,
}

impl RuleVerdict {
    fn marks(&self, spec: &FormatRuleSpec) -> f64 {
        let pick = |ok: bool, marks: f64| if ok { marks } else { 0.0 };
        pick(self.range, spec.range_marks) + pick(self.condition, spec.condition_marks) + pick(self.fill, spec.fill_marks)
    }
}

fn verdict(format: &ConditionalFormat, rule: &FormatRule, spec: &FormatRuleSpec) -> RuleVerdict {
    RuleVerdict {
        range: format.ranges.iter().any(|r| r.covers(&spec.range)),
        condition: rule
            .formulas
            .iter()
            .any(|f| formula_matches_pattern(f, &spec.condition_pattern)),
        fill: rule.fill.is_some_and(|c| spec.fill.matches(c)),
    }
}

/// Score a conditional formatting question against a worksheet's rules.
///
/// Returns the marks of the best-scoring rule (earliest rule on ties) and a
/// feedback line with one sentence per criterion.
pub fn grade_conditional_format(formats: &[ConditionalFormat], spec: &FormatRuleSpec) -> (f64, String) {
    let mut best: Option<(f64, RuleVerdict, &FormatRule)> = None;
    for format in formats {
        for rule in &format.rules {
            let v = verdict(format, rule, spec);
            let marks = v.marks(spec);
            if best.as_ref().is_none_or(|(top, _, _)| marks > *top) {
                best = Some((marks, v, rule));
            }
        }
    }

    let Some((marks, v, rule)) = best else {
        return (0.0, "No conditional formatting found.".to_string());
    };

    let mut parts = Vec::with_capacity(3);
    if v.range {
        parts.push(format!("Rule covers {}.", spec.range));
    } else {
        parts.push(format!("Rule should cover {}.", spec.range));
    }
    if v.condition {
        parts.push("Condition formula correct.".to_string());
    } else if let Some(formula) = rule.formulas.first() {
        parts.push(format!("Condition formula incorrect. Got: {}.", formula));
    } else {
        parts.push("Condition formula missing.".to_string());
    }
    match (v.fill, rule.fill) {
        (true, _) => parts.push(format!("Fill is {}.", spec.fill)),
        (false, Some(found)) => parts.push(format!("Fill should be {}. Got: {}.", spec.fill, found)),
        (false, None) => parts.push(format!("Fill should be {}.", spec.fill)),
    }

    let marks = ((marks * 1e6).round() / 1e6).clamp(0.0, spec.total());
    (marks, parts.join(" "))
}
