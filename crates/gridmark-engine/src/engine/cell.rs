//! Cell data structures for loaded workbooks.
//!
//! - [`ValueType`] - The kind of scalar stored in a cell
//! - [`CellValue`] - A typed scalar (number, text, boolean, date, or error)
//! - [`CellContent`] - A populated cell: formula text plus last computed value
//!
//! Values are kept as tagged variants so a text answer in a numeric cell is a
//! detectable mismatch rather than something coerced behind the caller's back.

use chrono::{NaiveDate, NaiveDateTime};
use serde::{Deserialize, Serialize};
use std::fmt;

/// The kind of scalar stored in a cell.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ValueType {
    Number,
    Text,
    Bool,
    Date,
    Error,
}

impl ValueType {
    /// Human name used in feedback ("a number", "text", ...).
    pub fn describe(self) -> &'static str {
        match self {
            ValueType::Number => "a number",
            ValueType::Text => "text",
            ValueType::Bool => "a TRUE/FALSE value",
            ValueType::Date => "a date",
            ValueType::Error => "an error value",
        }
    }
}

impl fmt::Display for ValueType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ValueType::Number => "number",
            ValueType::Text => "text",
            ValueType::Bool => "bool",
            ValueType::Date => "date",
            ValueType::Error => "error",
        };
        f.write_str(name)
    }
}

/// A typed scalar value.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", content = "value", rename_all = "snake_case")]
pub enum CellValue {
    Number(f64),
    Text(String),
    Bool(bool),
    Date(NaiveDateTime),
    /// Spreadsheet error literal such as `#DIV/0!`.
    Error(String),
}

impl CellValue {
    pub fn value_type(&self) -> ValueType {
        match self {
            CellValue::Number(_) => ValueType::Number,
            CellValue::Text(_) => ValueType::Text,
            CellValue::Bool(_) => ValueType::Bool,
            CellValue::Date(_) => ValueType::Date,
            CellValue::Error(_) => ValueType::Error,
        }
    }

    pub fn as_number(&self) -> Option<f64> {
        match self {
            CellValue::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Build a date value from a calendar date at midnight.
    pub fn date(date: NaiveDate) -> CellValue {
        CellValue::Date(date.and_hms_opt(0, 0, 0).unwrap_or_default())
    }
}

impl fmt::Display for CellValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            CellValue::Number(n) => f.write_str(&format_number(*n)),
            CellValue::Text(s) => write!(f, "\"{}\"", s),
            CellValue::Bool(b) => f.write_str(if *b { "TRUE" } else { "FALSE" }),
            CellValue::Date(dt) => {
                if dt.time() == chrono::NaiveTime::MIN {
                    write!(f, "{}", dt.format("%Y-%m-%d"))
                } else {
                    write!(f, "{}", dt.format("%Y-%m-%d %H:%M:%S"))
                }
            }
            CellValue::Error(e) => f.write_str(e),
        }
    }
}

/// A populated cell: raw formula text (if formula-backed) and the last value
/// stored in the file. Formula text is stored as the file holds it, usually
/// without a leading `=`; use [`CellContent::formula_text`] for display.
#[derive(Clone, Debug, Default, PartialEq, Serialize)]
pub struct CellContent {
    pub formula: Option<String>,
    pub value: Option<CellValue>,
}

impl CellContent {
    pub fn new_value(value: CellValue) -> CellContent {
        CellContent {
            formula: None,
            value: Some(value),
        }
    }

    pub fn new_formula(formula: &str, value: Option<CellValue>) -> CellContent {
        CellContent {
            formula: Some(formula.to_string()),
            value,
        }
    }

    pub fn value_type(&self) -> Option<ValueType> {
        self.value.as_ref().map(CellValue::value_type)
    }

    pub fn is_formula(&self) -> bool {
        self.formula.is_some()
    }

    /// Formula with a leading `=`, as a user would type it.
    pub fn formula_text(&self) -> Option<String> {
        self.formula.as_deref().map(|f| {
            let f = f.trim();
            if f.starts_with('=') {
                f.to_string()
            } else {
                format!("={}", f)
            }
        })
    }

    /// True when the cell carries neither a formula nor a value.
    pub fn is_empty(&self) -> bool {
        self.formula.as_deref().is_none_or(|f| f.trim().is_empty()) && self.value.is_none()
    }
}

/// Format a number for display in feedback and reports.
///
/// Integers print without decimals; other values print with up to six
/// decimals and trailing zeros removed.
pub fn format_number(n: f64) -> String {
    if n.is_nan() {
        "#NAN!".to_string()
    } else if n.is_infinite() {
        "#INF!".to_string()
    } else if n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{:.0}", n)
    } else {
        let s = format!("{:.6}", n);
        let s = s.trim_end_matches('0').trim_end_matches('.');
        if s == "-0" { "0".to_string() } else { s.to_string() }
    }
}
