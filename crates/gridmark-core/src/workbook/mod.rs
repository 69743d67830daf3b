//! Read-only workbook model.
//!
//! A [`Workbook`] is an ordered list of [`Sheet`]s plus the index of the
//! active sheet. Only populated cells are stored; an absent cell is blank.
//! Each sheet also keeps its conditional formatting rules.

mod loader;
pub(crate) mod package;

use gridmark_engine::engine::{CellAddress, CellContent, CellRef, ConditionalFormat};
use std::collections::BTreeMap;

pub use loader::{load_workbook, open_workbook};

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Sheet {
    pub name: String,
    cells: BTreeMap<CellRef, CellContent>,
    conditional_formats: Vec<ConditionalFormat>,
}

impl Sheet {
    pub fn new(name: impl Into<String>) -> Sheet {
        Sheet {
            name: name.into(),
            cells: BTreeMap::new(),
            conditional_formats: Vec::new(),
        }
    }

    pub fn conditional_formats(&self) -> &[ConditionalFormat] {
        &self.conditional_formats
    }

    pub fn add_conditional_format(&mut self, format: ConditionalFormat) {
        self.conditional_formats.push(format);
    }

    pub fn get(&self, cell: &CellRef) -> Option<&CellContent> {
        self.cells.get(cell)
    }

    /// Store a cell; empty content is not stored.
    pub fn insert(&mut self, cell: CellRef, content: CellContent) {
        if content.is_empty() {
            self.cells.remove(&cell);
        } else {
            self.cells.insert(cell, content);
        }
    }

    pub(crate) fn entry(&mut self, cell: CellRef) -> &mut CellContent {
        self.cells.entry(cell).or_default()
    }

    pub(crate) fn prune_empty(&mut self) {
        self.cells.retain(|_, c| !c.is_empty());
    }

    /// Populated cells in row-major order.
    pub fn cells(&self) -> impl Iterator<Item = (&CellRef, &CellContent)> {
        self.cells.iter()
    }

    pub fn len(&self) -> usize {
        self.cells.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cells.is_empty()
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct Workbook {
    sheets: Vec<Sheet>,
    active: usize,
}

impl Workbook {
    /// Returns None when `active` does not name a sheet.
    pub fn new(sheets: Vec<Sheet>, active: usize) -> Option<Workbook> {
        (active < sheets.len()).then_some(Workbook { sheets, active })
    }

    pub fn sheets(&self) -> &[Sheet] {
        &self.sheets
    }

    pub fn active_index(&self) -> usize {
        self.active
    }

    pub fn active_sheet(&self) -> &Sheet {
        &self.sheets[self.active]
    }

    /// Sheet lookup ignores case, as spreadsheet applications do.
    pub fn sheet(&self, name: &str) -> Option<&Sheet> {
        self.sheets.iter().find(|s| s.name.eq_ignore_ascii_case(name))
    }

    /// The named sheet, or the active sheet when `name` is None.
    pub fn resolve_sheet(&self, name: Option<&str>) -> Option<&Sheet> {
        match name {
            Some(name) => self.sheet(name),
            None => Some(self.active_sheet()),
        }
    }

    /// Resolve an address; unqualified addresses use the active sheet.
    pub fn get(&self, address: &CellAddress) -> Option<&CellContent> {
        self.resolve_sheet(address.sheet.as_deref())?.get(&address.cell)
    }

    /// Populated cells across every sheet.
    pub fn cell_count(&self) -> usize {
        self.sheets.iter().map(Sheet::len).sum()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use gridmark_engine::engine::CellValue;

    fn book() -> Workbook {
        let mut data = Sheet::new("Data");
        data.insert(CellRef::new(0, 0), CellContent::new_value(CellValue::Number(1.0)));
        let mut answers = Sheet::new("Answers");
        answers.insert(CellRef::new(1, 1), CellContent::new_formula("A1*2", Some(CellValue::Number(2.0))));
        answers.insert(CellRef::new(2, 2), CellContent::default());
        Workbook::new(vec![data, answers], 1).unwrap()
    }

    #[test]
    fn test_unqualified_address_uses_active_sheet() {
        let wb = book();
        assert_eq!(wb.active_sheet().name, "Answers");
        let b2 = wb.get(&CellAddress::parse("B2").unwrap()).unwrap();
        assert_eq!(b2.formula.as_deref(), Some("A1*2"));
        assert!(wb.get(&CellAddress::parse("A1").unwrap()).is_none());
    }

    #[test]
    fn test_qualified_address_ignores_case() {
        let wb = book();
        assert!(wb.get(&CellAddress::parse("data!A1").unwrap()).is_some());
        assert!(wb.get(&CellAddress::parse("Missing!A1").unwrap()).is_none());
    }

    #[test]
    fn test_empty_cells_are_not_stored() {
        let wb = book();
        assert_eq!(wb.cell_count(), 2);
    }

    #[test]
    fn test_active_index_must_exist() {
        assert!(Workbook::new(vec![Sheet::new("Only")], 1).is_none());
        assert!(Workbook::new(Vec::new(), 0).is_none());
    }
}
