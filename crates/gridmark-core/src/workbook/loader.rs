//! XLSX loading via calamine.
//!
//! Every populated cell keeps both its formula text and the value cached in
//! the file; nothing is recalculated. The active sheet (the `activeTab` of the
//! workbook part) and conditional formatting are read from the package
//! directly, since calamine does not expose them.

use calamine::{Data, Reader, Xlsx};
use chrono::{NaiveDate, NaiveDateTime};
use gridmark_engine::engine::{CellRef, CellValue};
use std::io::Cursor;
use std::path::Path;
use tracing::{debug, warn};

use super::package::{Package, parse_conditional_formats};
use super::{Sheet, Workbook};
use crate::error::{GradeError, Result};

/// Read and parse a workbook file. The file handle is closed before parsing starts.
pub fn open_workbook(path: &Path) -> Result<Workbook> {
    let bytes = std::fs::read(path)?;
    load_workbook(&bytes)
}

/// Parse workbook bytes.
pub fn load_workbook(bytes: &[u8]) -> Result<Workbook> {
    let mut xlsx: Xlsx<_> =
        Xlsx::new(Cursor::new(bytes)).map_err(|e| GradeError::MalformedWorkbook(e.to_string()))?;

    let names = xlsx.sheet_names();
    if names.is_empty() {
        return Err(GradeError::UnreadableSheet(
            "workbook contains no sheets".to_string(),
        ));
    }

    let mut package = Package::open(bytes)?;
    let active = package.active_tab().unwrap_or(0);
    if active >= names.len() {
        return Err(GradeError::UnreadableSheet(format!(
            "active sheet index {} is out of range ({} sheets)",
            active,
            names.len()
        )));
    }

    let mut sheets = Vec::with_capacity(names.len());
    for (idx, name) in names.iter().enumerate() {
        let mut sheet = Sheet::new(name.clone());

        match xlsx.worksheet_range(name) {
            Ok(range) => {
                let (row_offset, col_offset) = range.start().unwrap_or((0, 0));
                for (row, col, data) in range.cells() {
                    if let Some(value) = convert_value(data) {
                        let cell = CellRef::new(col_offset as usize + col, row_offset as usize + row);
                        sheet.entry(cell).value = Some(value);
                    }
                }
            }
            Err(e) if idx == active => {
                return Err(GradeError::UnreadableSheet(format!("sheet '{}': {}", name, e)));
            }
            Err(e) => {
                warn!(sheet = %name, error = %e, "skipping unreadable sheet");
                sheets.push(sheet);
                continue;
            }
        }

        // Formula ranges may start at a different offset than the value range.
        match xlsx.worksheet_formula(name) {
            Ok(formulas) => {
                let (row_offset, col_offset) = formulas.start().unwrap_or((0, 0));
                for (row, col, formula) in formulas.cells() {
                    let formula = formula.trim();
                    if formula.is_empty() {
                        continue;
                    }
                    let cell = CellRef::new(col_offset as usize + col, row_offset as usize + row);
                    sheet.entry(cell).formula = Some(formula.to_string());
                }
            }
            Err(e) => warn!(sheet = %name, error = %e, "could not read formulas"),
        }

        sheet.prune_empty();
        sheets.push(sheet);
    }

    let parts = package.sheets();
    if !parts.is_empty() {
        let dxfs = package.dxf_fills();
        for sheet in &mut sheets {
            let Some(part) = parts.iter().find(|p| p.name == sheet.name) else {
                continue;
            };
            let Some(xml) = package.read_part(&part.path) else {
                continue;
            };
            for format in parse_conditional_formats(&xml, &dxfs) {
                sheet.add_conditional_format(format);
            }
        }
    }

    let workbook = Workbook::new(sheets, active).ok_or_else(|| {
        GradeError::UnreadableSheet(format!("active sheet index {} is out of range", active))
    })?;
    debug!(
        sheets = workbook.sheets().len(),
        active = %workbook.active_sheet().name,
        cells = workbook.cell_count(),
        "loaded workbook"
    );
    Ok(workbook)
}

fn convert_value(data: &Data) -> Option<CellValue> {
    match data {
        Data::Empty => None,
        Data::String(s) if s.is_empty() => None,
        Data::String(s) => Some(CellValue::Text(s.clone())),
        Data::Float(n) => Some(CellValue::Number(*n)),
        Data::Int(n) => Some(CellValue::Number(*n as f64)),
        Data::Bool(b) => Some(CellValue::Bool(*b)),
        Data::Error(e) => Some(CellValue::Error(e.to_string())),
        Data::DateTime(dt) if dt.is_duration() => Some(CellValue::Number(dt.as_f64())),
        Data::DateTime(dt) => Some(
            dt.as_datetime()
                .map(CellValue::Date)
                .unwrap_or(CellValue::Number(dt.as_f64())),
        ),
        Data::DateTimeIso(s) => Some(parse_iso_datetime(s).unwrap_or_else(|| CellValue::Text(s.clone()))),
        Data::DurationIso(s) => Some(CellValue::Text(s.clone())),
    }
}

fn parse_iso_datetime(s: &str) -> Option<CellValue> {
    if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f") {
        return Some(CellValue::Date(dt));
    }
    NaiveDate::parse_from_str(s, "%Y-%m-%d").ok().map(CellValue::date)
}
