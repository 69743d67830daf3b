//! Grading engine API.
//!
//! This module provides the pure comparison and scoring core:
//!
//! - [`CellContent`], [`CellValue`], [`ValueType`] - Data structures for loaded cells
//! - [`CellRef`], [`CellAddress`] - Cell reference parsing (A1 notation ↔ row/col indices)
//! - [`normalize_formula`], [`formulas_equivalent`] - Formula text equivalence
//! - [`Comparator`], [`DefaultComparator`] - Per-cell verdicts
//! - [`score_question`] - Per-question marks and feedback
//! - [`ConditionalFormat`], [`grade_conditional_format`] - Conditional formatting rules

mod cell;
mod cell_ref;
mod compare;
mod cond_format;
mod formula;
mod score;

pub use cell::{CellContent, CellValue, ValueType, format_number};
pub use cell_ref::{CellAddress, CellRange, CellRef, MAX_COL, MAX_RANGE_CELLS, MAX_ROW, expand_range};
pub use compare::{CellResult, CellWarning, Comparator, DefaultComparator, ValueVerdict, compare_values};
pub use cond_format::{ColourFamily, ConditionalFormat, FillColour, FormatRule, Rgb, grade_conditional_format};
pub use formula::{
    FormulaEquivalence, formula_matches_pattern, formulas_equivalent, normalize_formula, offset_formula,
    relative_form,
};
pub use score::score_question;
