//! Cell reference parsing and formatting.
//!
//! Provides bidirectional conversion between spreadsheet-style cell references
//! (e.g., "A1", "B2", "AA100") and zero-indexed column/row coordinates, plus the
//! sheet-qualified form used by mark schemes ("Sheet1!B7", "'Q1 Data'!C4").
//!
//! # Examples
//!
//! ```ignore
//! let cell = CellRef::from_str("B3").unwrap();
//! assert_eq!(cell.col, 1);  // 0-indexed
//! assert_eq!(cell.row, 2);
//! assert_eq!(cell.to_string(), "B3");
//! ```

use regex::Regex;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use std::fmt;
use std::sync::OnceLock;

/// Largest column index a worksheet can address (XFD).
pub const MAX_COL: usize = 16_383;
/// Largest row index a worksheet can address (row 1048576).
pub const MAX_ROW: usize = 1_048_575;
/// Most cells a single range may expand to.
pub const MAX_RANGE_CELLS: usize = 65_536;

fn a1_re() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"^\$?(?<letters>[A-Za-z]+)\$?(?<numbers>[0-9]+)$").expect("valid A1 regex"))
}

/// A reference to a cell by column and row indices (0-indexed).
///
/// Ordering is row-major (row first, then column).
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq, PartialOrd, Ord, Serialize, Deserialize)]
pub struct CellRef {
    pub row: usize,
    pub col: usize,
}

impl CellRef {
    pub fn new(col: usize, row: usize) -> CellRef {
        CellRef { row, col }
    }

    /// Parse a cell reference from spreadsheet notation (e.g., "A1", "B2", "AA10").
    /// Absolute markers (`$B$2`) are accepted and ignored.
    /// Returns None if the input is invalid or lies outside the worksheet grid.
    #[allow(clippy::should_implement_trait)]
    pub fn from_str(name: &str) -> Option<CellRef> {
        Self::parse_a1(name)
    }

    fn parse_a1(name: &str) -> Option<CellRef> {
        let caps = a1_re().captures(name)?;
        let col = Self::letters_to_col(&caps["letters"])?;
        let row = caps["numbers"].parse::<usize>().ok()?.checked_sub(1)?;
        if col > MAX_COL || row > MAX_ROW {
            return None;
        }
        Some(CellRef::new(col, row))
    }

    /// Convert spreadsheet-style letters to a column index (A -> 0, Z -> 25, AA -> 26).
    pub fn letters_to_col(letters: &str) -> Option<usize> {
        if letters.is_empty() {
            return None;
        }
        let mut col_acc = 0usize;
        for c in letters.to_ascii_uppercase().bytes() {
            if !c.is_ascii_uppercase() {
                return None;
            }
            let digit = (c - b'A') as usize + 1;
            col_acc = col_acc.checked_mul(26)?.checked_add(digit)?;
        }
        col_acc.checked_sub(1)
    }

    /// Convert column index to spreadsheet-style letters (0 -> A, 25 -> Z, 26 -> AA).
    pub fn col_to_letters(col: usize) -> String {
        let mut result = String::new();
        let mut n = col as u128 + 1;
        while n > 0 {
            n -= 1;
            result.insert(0, (b'A' + (n % 26) as u8) as char);
            n /= 26;
        }
        result
    }
}

impl std::str::FromStr for CellRef {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse_a1(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl fmt::Display for CellRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", CellRef::col_to_letters(self.col), self.row + 1)
    }
}

/// A cell reference optionally qualified by a sheet name.
///
/// Unqualified addresses resolve against a workbook's active sheet.
#[derive(Clone, Debug, Hash, Eq, PartialEq, PartialOrd, Ord)]
pub struct CellAddress {
    pub sheet: Option<String>,
    pub cell: CellRef,
}

impl CellAddress {
    pub fn new(sheet: Option<String>, cell: CellRef) -> CellAddress {
        CellAddress { sheet, cell }
    }

    pub fn unqualified(cell: CellRef) -> CellAddress {
        CellAddress { sheet: None, cell }
    }

    /// Parse `B7`, `Sheet1!B7` or `'My Sheet'!B7`.
    pub fn parse(input: &str) -> Option<CellAddress> {
        let input = input.trim();
        match split_sheet_prefix(input) {
            Some((sheet, cell)) => Some(CellAddress {
                sheet: Some(sheet),
                cell: CellRef::from_str(cell)?,
            }),
            None => Some(CellAddress::unqualified(CellRef::from_str(input)?)),
        }
    }
}

/// Split `Sheet!Rest` into the unquoted sheet name and the rest.
/// Returns None when there is no sheet prefix. Empty sheet names are rejected by
/// returning a prefix that will fail to parse downstream.
pub(crate) fn split_sheet_prefix(input: &str) -> Option<(String, &str)> {
    if let Some(quoted) = input.strip_prefix('\'') {
        // Quoted sheet names escape a literal quote by doubling it.
        let mut name = String::new();
        let mut chars = quoted.char_indices().peekable();
        while let Some((idx, ch)) = chars.next() {
            if ch == '\'' {
                if matches!(chars.peek(), Some((_, '\''))) {
                    name.push('\'');
                    chars.next();
                    continue;
                }
                let rest = &quoted[idx + 1..];
                let rest = rest.strip_prefix('!')?;
                if name.is_empty() {
                    return None;
                }
                return Some((name, rest));
            }
            name.push(ch);
        }
        return None;
    }

    let (sheet, rest) = input.rsplit_once('!')?;
    if sheet.is_empty() {
        return None;
    }
    Some((sheet.to_string(), rest))
}

fn sheet_needs_quotes(sheet: &str) -> bool {
    !sheet.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
        || sheet.starts_with(|c: char| c.is_ascii_digit())
}

impl fmt::Display for CellAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.sheet {
            Some(sheet) if sheet_needs_quotes(sheet) => {
                write!(f, "'{}'!{}", sheet.replace('\'', "''"), self.cell)
            }
            Some(sheet) => write!(f, "{}!{}", sheet, self.cell),
            None => write!(f, "{}", self.cell),
        }
    }
}

impl std::str::FromStr for CellAddress {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        CellAddress::parse(s).ok_or_else(|| format!("Invalid cell reference: {}", s))
    }
}

impl Serialize for CellAddress {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

impl<'de> Deserialize<'de> for CellAddress {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        let raw = String::deserialize(deserializer)?;
        raw.parse().map_err(serde::de::Error::custom)
    }
}

/// A rectangular block of cells, normalized so `start` is the top-left corner.
#[derive(Clone, Copy, Debug, Hash, Eq, PartialEq)]
pub struct CellRange {
    pub start: CellRef,
    pub end: CellRef,
}

impl CellRange {
    pub fn new(a: CellRef, b: CellRef) -> CellRange {
        CellRange {
            start: CellRef::new(a.col.min(b.col), a.row.min(b.row)),
            end: CellRef::new(a.col.max(b.col), a.row.max(b.row)),
        }
    }

    /// Parse `B2` or `A4:J15` without a sheet prefix.
    pub fn parse(input: &str) -> Option<CellRange> {
        match input.trim().split_once(':') {
            Some((a, b)) => Some(CellRange::new(CellRef::from_str(a)?, CellRef::from_str(b)?)),
            None => {
                let cell = CellRef::from_str(input.trim())?;
                Some(CellRange::new(cell, cell))
            }
        }
    }

    /// Number of cells, or None when it does not fit in `usize`.
    pub fn cell_count(&self) -> Option<usize> {
        (self.end.row - self.start.row + 1).checked_mul(self.end.col - self.start.col + 1)
    }

    pub fn contains(&self, cell: &CellRef) -> bool {
        (self.start.row..=self.end.row).contains(&cell.row) && (self.start.col..=self.end.col).contains(&cell.col)
    }

    /// True when every cell of `other` lies inside this range.
    pub fn covers(&self, other: &CellRange) -> bool {
        self.contains(&other.start) && self.contains(&other.end)
    }

    /// Cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = CellRef> + '_ {
        (self.start.row..=self.end.row)
            .flat_map(move |row| (self.start.col..=self.end.col).map(move |col| CellRef::new(col, row)))
    }
}

impl fmt::Display for CellRange {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.start == self.end {
            write!(f, "{}", self.start)
        } else {
            write!(f, "{}:{}", self.start, self.end)
        }
    }
}

/// Expand `A1:B3` (optionally sheet-qualified) into addresses in row-major order.
/// A single reference expands to itself. Ranges over [`MAX_RANGE_CELLS`] cells
/// are rejected.
pub fn expand_range(input: &str) -> Option<Vec<CellAddress>> {
    let input = input.trim();
    let (sheet, body) = match split_sheet_prefix(input) {
        Some((sheet, rest)) => (Some(sheet), rest),
        None => (None, input),
    };
    let range = CellRange::parse(body)?;
    let count = range.cell_count()?;
    if count > MAX_RANGE_CELLS {
        return None;
    }
    let mut cells = Vec::with_capacity(count);
    cells.extend(range.cells().map(|cell| CellAddress::new(sheet.clone(), cell)));
    Some(cells)
}
