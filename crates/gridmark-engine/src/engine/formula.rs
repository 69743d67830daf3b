//! Formula normalization and reference equivalence.
//!
//! Formulas are never executed. Two formulas are compared as text after
//! normalization, optionally after rewriting every cell reference relative to
//! the cell that hosts the formula:
//!
//! - **Normalization**: `= sum( a1 : a3 )` → `SUM(A1:A3)`. Text inside string
//!   literals is kept verbatim.
//! - **Relative form**: `A1*2` hosted in `B2` → `R[-1]C[-1]*2`. A formula copied
//!   down a column has the same relative form in every row.
//! - **Offsetting**: `SUM(C4:F4)` moved by one row → `SUM(C5:F5)`; `$`-marked
//!   parts stay fixed.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::sync::OnceLock;

use super::cell_ref::{CellRef, MAX_COL, MAX_ROW};

/// Matches an A1 reference with optional `$` markers.
fn ref_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"(?i)(\$?)([A-Z]{1,3})(\$?)([0-9]{1,7})").expect("valid reference regex"))
}

/// How two formula texts are judged equal.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FormulaEquivalence {
    /// Normalized text must match exactly.
    Exact,
    /// References are compared relative to each formula's host cell, so a
    /// correctly copied formula matches in every row/column it was copied to.
    #[default]
    Relative,
}

/// Strip the leading `=`, drop whitespace and uppercase everything outside
/// double-quoted string literals. Quoted sheet names are uppercased but keep
/// their inner spaces.
pub fn normalize_formula(formula: &str) -> String {
    let f = formula.trim();
    let f = f.strip_prefix('=').unwrap_or(f);

    let mut out = String::with_capacity(f.len());
    let mut in_string = false;
    let mut in_sheet = false;
    for ch in f.chars() {
        if in_string {
            out.push(ch);
            if ch == '"' {
                in_string = false;
            }
            continue;
        }
        if in_sheet {
            out.extend(ch.to_uppercase());
            if ch == '\'' {
                in_sheet = false;
            }
            continue;
        }
        match ch {
            '"' => {
                in_string = true;
                out.push(ch);
            }
            '\'' => {
                in_sheet = true;
                out.push(ch);
            }
            c if c.is_whitespace() => {}
            c => out.extend(c.to_uppercase()),
        }
    }
    out
}

/// Rewrite a normalized formula so every reference is expressed relative to
/// `host`. Absolute (`$`) parts keep their 1-based index.
pub fn relative_form(normalized: &str, host: &CellRef) -> String {
    rewrite_refs(normalized, |r| {
        let col = if r.col_absolute {
            format!("C{}", r.cell.col + 1)
        } else {
            format!("C[{}]", r.cell.col as isize - host.col as isize)
        };
        let row = if r.row_absolute {
            format!("R{}", r.cell.row + 1)
        } else {
            format!("R[{}]", r.cell.row as isize - host.row as isize)
        };
        format!("{}{}", row, col)
    })
}

/// Offset all relative references in a formula by a column/row delta.
///
/// Rules:
/// - `A1` offset by (+1, +2) becomes `B3`
/// - `$A1` offset by (+1, +2) becomes `$A3`
/// - references that move out of bounds become `#REF!`
pub fn offset_formula(formula: &str, delta_col: isize, delta_row: isize) -> String {
    if delta_col == 0 && delta_row == 0 {
        return formula.to_string();
    }

    rewrite_refs(formula, |r| {
        let new_col = if r.col_absolute {
            r.cell.col as isize
        } else {
            r.cell.col as isize + delta_col
        };
        let new_row = if r.row_absolute {
            r.cell.row as isize
        } else {
            r.cell.row as isize + delta_row
        };
        if new_col < 0 || new_row < 0 || new_col as usize > MAX_COL || new_row as usize > MAX_ROW {
            return "#REF!".to_string();
        }
        let moved = CellRef::new(new_col as usize, new_row as usize);
        format!(
            "{}{}{}{}",
            if r.col_absolute { "$" } else { "" },
            CellRef::col_to_letters(moved.col),
            if r.row_absolute { "$" } else { "" },
            moved.row + 1
        )
    })
}

/// Decide whether `submitted` (hosted in `submitted_host`) is the same answer
/// as `expected` (authored for `expected_host`).
pub fn formulas_equivalent(
    expected: &str,
    expected_host: &CellRef,
    submitted: &str,
    submitted_host: &CellRef,
    equivalence: FormulaEquivalence,
) -> bool {
    let expected = normalize_formula(expected);
    let submitted = normalize_formula(submitted);
    if expected.is_empty() || submitted.is_empty() {
        return false;
    }
    match equivalence {
        FormulaEquivalence::Exact => expected == submitted,
        FormulaEquivalence::Relative => {
            relative_form(&expected, expected_host) == relative_form(&submitted, submitted_host)
        }
    }
}

/// True when the normalized formula matches the pattern.
pub fn formula_matches_pattern(formula: &str, pattern: &Regex) -> bool {
    let normalized = normalize_formula(formula);
    !normalized.is_empty() && pattern.is_match(&normalized)
}

/// A cell reference found inside formula text.
struct RefToken {
    cell: CellRef,
    col_absolute: bool,
    row_absolute: bool,
}

/// Replace every cell reference outside string literals and quoted sheet
/// names using `f`. Function names (`LOG10(`), sheet prefixes (`Q1!`) and
/// identifiers that merely contain a reference (`TAX2024X`) are left alone.
fn rewrite_refs(formula: &str, mut f: impl FnMut(&RefToken) -> String) -> String {
    let mut replace_in_segment = |seg: &str| {
        let mut out = String::with_capacity(seg.len());
        let mut last = 0usize;
        for caps in ref_re().captures_iter(seg) {
            let Some(whole) = caps.get(0) else {
                continue;
            };
            let before = seg[..whole.start()].chars().next_back();
            let after = seg[whole.end()..].chars().next();
            let joined_before = before.is_some_and(|c| c.is_alphanumeric() || c == '_' || c == '.');
            let joined_after = after
                .is_some_and(|c| c.is_alphanumeric() || matches!(c, '_' | '.' | '(' | '!'));
            if joined_before || joined_after {
                continue;
            }

            let Some(col) = CellRef::letters_to_col(&caps[2]) else {
                continue;
            };
            let Some(row) = caps[4].parse::<usize>().ok().and_then(|r| r.checked_sub(1)) else {
                continue;
            };
            if col > MAX_COL || row > MAX_ROW {
                continue;
            }

            let token = RefToken {
                cell: CellRef::new(col, row),
                col_absolute: !caps[1].is_empty(),
                row_absolute: !caps[3].is_empty(),
            };
            out.push_str(&seg[last..whole.start()]);
            out.push_str(&f(&token));
            last = whole.end();
        }
        out.push_str(&seg[last..]);
        out
    };

    // Process outside of string literals and quoted sheet names.
    let mut out = String::with_capacity(formula.len());
    let mut seg_start = 0usize;
    let mut quote: Option<char> = None;

    for (i, ch) in formula.char_indices() {
        match quote {
            Some(q) if ch == q => {
                out.push_str(&formula[seg_start..i + ch.len_utf8()]);
                quote = None;
                seg_start = i + ch.len_utf8();
            }
            Some(_) => {}
            None if ch == '"' || ch == '\'' => {
                out.push_str(&replace_in_segment(&formula[seg_start..i]));
                quote = Some(ch);
                seg_start = i;
            }
            None => {}
        }
    }

    if seg_start < formula.len() {
        if quote.is_some() {
            out.push_str(&formula[seg_start..]);
        } else {
            out.push_str(&replace_in_segment(&formula[seg_start..]));
        }
    }

    out
}
