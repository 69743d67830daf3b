//! Submission copies annotated with feedback notes.
//!
//! The copy is the original package with every part carried over byte for
//! byte. Only the parts needed for cell comments change: each annotated
//! sheet gets a comments part, a legacy VML drawing for the note shapes, the
//! relationships to both and a `<legacyDrawing>` element, and
//! `[Content_Types].xml` learns the new parts. A sheet that already has
//! comments keeps them, except on cells that receive feedback.

use gridmark_engine::engine::{CellAddress, CellRef};
use quick_xml::Reader as XmlReader;
use quick_xml::events::Event;
use std::collections::{BTreeMap, HashMap};
use std::io::{Cursor, Write};
use tracing::{debug, warn};
use zip::write::SimpleFileOptions;
use zip::{CompressionMethod, ZipWriter};

use crate::error::{GradeError, Result};
use crate::result::EvaluationResult;
use crate::workbook::package::{
    Package, REL_COMMENTS, REL_VML_DRAWING, Relationship, SheetPart, escape_xml, rels_path, resolve_target,
    unescape_xml,
};

const MAIN_NS: &str = "http://schemas.openxmlformats.org/spreadsheetml/2006/main";
const REL_NS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships";
const PACKAGE_REL_NS: &str = "http://schemas.openxmlformats.org/package/2006/relationships";
const COMMENTS_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.spreadsheetml.comments+xml";
const VML_CONTENT_TYPE: &str = "application/vnd.openxmlformats-officedocument.vmlDrawing";
const XML_DECLARATION: &str = r#"<?xml version="1.0" encoding="UTF-8" standalone="yes"?>"#;

/// Worksheet children that must come after `<legacyDrawing>`.
const AFTER_LEGACY_DRAWING: [&[u8]; 8] = [
    b"legacyDrawingHF",
    b"drawingHF",
    b"picture",
    b"oleObjects",
    b"controls",
    b"webPublishItems",
    b"tableParts",
    b"extLst",
];

/// Annotate a copy of `original` with one note per failed cell of `result`.
/// The input bytes are only read; with nothing to annotate the copy is identical.
pub fn comment_submission(original: &[u8], result: &EvaluationResult, author: &str) -> Result<Vec<u8>> {
    let mut package = Package::open(original)?;
    let sheets = package.sheets();
    if sheets.is_empty() {
        return Err(GradeError::UnreadableSheet("workbook contains no sheets".to_string()));
    }
    let active = package.active_tab().filter(|i| *i < sheets.len()).unwrap_or(0);

    let notes = group_notes(result, &sheets, active);
    if notes.is_empty() {
        return Ok(original.to_vec());
    }

    let mut edits = Edits::default();
    for (idx, cells) in &notes {
        annotate_sheet(&mut package, &mut edits, &sheets[*idx], *idx, cells, author)?;
    }
    register_content_types(&mut package, &mut edits)?;
    debug!(sheets = notes.len(), parts = edits.replaced.len() + edits.added.len(), "commented copy");

    write_package(package, edits)
}

/// Feedback grouped by sheet index, then cell.
fn group_notes(
    result: &EvaluationResult,
    sheets: &[SheetPart],
    active: usize,
) -> BTreeMap<usize, BTreeMap<CellRef, String>> {
    let mut notes: BTreeMap<usize, BTreeMap<CellRef, String>> = BTreeMap::new();
    for cell in result.questions.iter().flat_map(|q| &q.cells) {
        if !cell.has_failure() {
            continue;
        }
        match sheet_index(&cell.cell_ref, sheets, active) {
            Some(idx) => {
                notes.entry(idx).or_default().insert(cell.cell_ref.cell, cell.feedback.clone());
            }
            None => warn!(cell = %cell.cell_ref, "sheet missing from submission, feedback note skipped"),
        }
    }
    notes
}

fn sheet_index(address: &CellAddress, sheets: &[SheetPart], active: usize) -> Option<usize> {
    match &address.sheet {
        None => Some(active),
        Some(name) => sheets.iter().position(|s| s.name.eq_ignore_ascii_case(name)),
    }
}

/// Parts to rewrite and parts to create, by zip entry name.
#[derive(Default)]
struct Edits {
    replaced: HashMap<String, String>,
    added: BTreeMap<String, String>,
    /// New comments parts that need a content type override.
    new_comments: Vec<String>,
}

impl Edits {
    /// Current text of a part, preferring earlier edits.
    fn read(&self, package: &mut Package<'_>, name: &str) -> Option<String> {
        self.replaced
            .get(name)
            .or_else(|| self.added.get(name))
            .cloned()
            .or_else(|| package.read_part(name))
    }

    fn write(&mut self, package: &Package<'_>, name: String, text: String) {
        if package.has_part(&name) {
            self.replaced.insert(name, text);
        } else {
            self.added.insert(name, text);
        }
    }

    /// First `{prefix}{n}{suffix}` not already in the package or the edits.
    fn free_name(&self, package: &Package<'_>, prefix: &str, suffix: &str) -> String {
        (1..)
            .map(|n| format!("{}{}{}", prefix, n, suffix))
            .find(|name| !package.has_part(name) && !self.added.contains_key(name))
            .unwrap_or_else(|| format!("{}new{}", prefix, suffix))
    }
}

fn annotate_sheet(
    package: &mut Package<'_>,
    edits: &mut Edits,
    sheet: &SheetPart,
    sheet_idx: usize,
    notes: &BTreeMap<CellRef, String>,
    author: &str,
) -> Result<()> {
    let sheet_xml = edits
        .read(package, &sheet.path)
        .ok_or_else(|| GradeError::UnreadableSheet(format!("sheet '{}' has no worksheet part", sheet.name)))?;
    let rels_name = rels_path(&sheet.path);
    let rels_xml = edits.read(package, &rels_name);
    let rels = package.relationships(&sheet.path);
    let mut new_rels: Vec<(String, &str, String)> = Vec::new();
    let mut taken: Vec<String> = rels.iter().map(|r| r.id.clone()).collect();

    // Comments part.
    let existing_comments = find_rel(&rels, REL_COMMENTS).map(|r| resolve_target(&sheet.path, &r.target));
    let (comments_name, prior) = match existing_comments {
        Some(name) => {
            let prior = edits.read(package, &name).unwrap_or_default();
            (name, prior)
        }
        None => {
            let name = edits.free_name(package, "xl/comments", ".xml");
            let id = next_rel_id(&mut taken);
            new_rels.push((id, REL_COMMENTS, relative_target(&sheet.path, &name)));
            edits.new_comments.push(name.clone());
            (name, String::new())
        }
    };
    let (comments_xml, fresh_cells) = merge_comments(&prior, notes, author);
    edits.write(package, comments_name, comments_xml);

    // Note shapes, only for cells that had no comment before.
    let vml_rel = find_rel(&rels, REL_VML_DRAWING);
    let vml_id = match vml_rel {
        Some(rel) => {
            let name = resolve_target(&sheet.path, &rel.target);
            let prior = edits.read(package, &name).unwrap_or_default();
            edits.write(package, name, append_vml_shapes(&prior, &fresh_cells, sheet_idx));
            rel.id.clone()
        }
        None => {
            let name = edits.free_name(package, "xl/drawings/vmlDrawing", ".vml");
            let id = next_rel_id(&mut taken);
            new_rels.push((id.clone(), REL_VML_DRAWING, relative_target(&sheet.path, &name)));
            edits.write(package, name, new_vml(&fresh_cells, sheet_idx));
            id
        }
    };

    if !new_rels.is_empty() {
        let entries: String = new_rels
            .iter()
            .map(|(id, kind, target)| {
                format!(
                    r#"<Relationship Id="{}" Type="{}" Target="{}"/>"#,
                    escape_xml(id),
                    kind,
                    escape_xml(target)
                )
            })
            .collect();
        let rels_xml = match rels_xml {
            Some(xml) => insert_children(&xml, b"Relationships", &entries)
                .ok_or_else(|| GradeError::MalformedWorkbook(format!("unreadable {}", rels_name)))?,
            None => format!(
                r#"{}<Relationships xmlns="{}">{}</Relationships>"#,
                XML_DECLARATION, PACKAGE_REL_NS, entries
            ),
        };
        edits.write(package, rels_name, rels_xml);
    }

    if !has_element(&sheet_xml, b"legacyDrawing") {
        let element = format!(r#"<legacyDrawing xmlns:r="{}" r:id="{}"/>"#, REL_NS, escape_xml(&vml_id));
        let at = legacy_drawing_position(&sheet_xml)
            .ok_or_else(|| GradeError::UnreadableSheet(format!("sheet '{}' is not valid XML", sheet.name)))?;
        let mut updated = sheet_xml;
        updated.insert_str(at, &element);
        edits.write(package, sheet.path.clone(), updated);
    }
    Ok(())
}

fn find_rel<'r>(rels: &'r [Relationship], kind: &str) -> Option<&'r Relationship> {
    rels.iter().find(|r| r.kind == kind && !r.external)
}

fn next_rel_id(taken: &mut Vec<String>) -> String {
    let id = (1..)
        .map(|n| format!("rId{}", n))
        .find(|id| !taken.contains(id))
        .unwrap_or_else(|| "rIdNote".to_string());
    taken.push(id.clone());
    id
}

/// Path of `target_part` relative to the directory of `source_part`.
fn relative_target(source_part: &str, target_part: &str) -> String {
    let source_dir: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    let target: Vec<&str> = target_part.split('/').collect();
    let shared = source_dir
        .iter()
        .zip(&target)
        .take_while(|(a, b)| a == b)
        .count();
    let mut parts: Vec<&str> = vec![".."; source_dir.len() - shared];
    parts.extend(&target[shared..]);
    parts.join("/")
}

/// Byte span of an element found by [`element_spans`].
#[derive(Debug)]
struct Span {
    start: usize,
    end: usize,
    /// Content range; None for an empty element.
    inner: Option<(usize, usize)>,
    attrs: Vec<(String, String)>,
}

impl Span {
    fn attr(&self, key: &str) -> Option<&str> {
        self.attrs.iter().find(|(k, _)| k == key).map(|(_, v)| v.as_str())
    }
}

/// Every element with local name `name`, outermost first, with byte offsets into `xml`.
/// Returns None when the document is not well formed.
fn element_spans(xml: &str, name: &[u8]) -> Option<Vec<Span>> {
    let mut reader = XmlReader::from_str(xml);
    let mut open: Vec<Span> = Vec::new();
    let mut out = Vec::new();
    loop {
        let before = reader.buffer_position() as usize;
        let event = reader.read_event().ok()?;
        let after = reader.buffer_position() as usize;
        match event {
            Event::Start(ref e) | Event::Empty(ref e) if e.local_name().as_ref() == name => {
                let attrs = e
                    .attributes()
                    .flatten()
                    .map(|a| {
                        (
                            String::from_utf8_lossy(a.key.local_name().as_ref()).into_owned(),
                            unescape_xml(&String::from_utf8_lossy(&a.value)),
                        )
                    })
                    .collect();
                let span = Span {
                    start: before,
                    end: after,
                    inner: None,
                    attrs,
                };
                if matches!(event, Event::Start(_)) {
                    open.push(Span {
                        inner: Some((after, after)),
                        ..span
                    });
                } else {
                    out.push(span);
                }
            }
            Event::End(ref e) if e.local_name().as_ref() == name => {
                let mut span = open.pop()?;
                span.end = after;
                span.inner = span.inner.map(|(start, _)| (start, before));
                out.push(span);
            }
            Event::Eof => break,
            _ => {}
        }
    }
    out.sort_by_key(|s| s.start);
    Some(out)
}

fn has_element(xml: &str, name: &[u8]) -> bool {
    element_spans(xml, name).is_some_and(|spans| !spans.is_empty())
}

/// Insert `children` at the end of the first `name` element, expanding it if empty.
fn insert_children(xml: &str, name: &[u8], children: &str) -> Option<String> {
    let span = element_spans(xml, name)?.into_iter().next()?;
    let mut out = String::with_capacity(xml.len() + children.len());
    match span.inner {
        Some((_, inner_end)) => {
            out.push_str(&xml[..inner_end]);
            out.push_str(children);
            out.push_str(&xml[inner_end..]);
        }
        None => {
            let tag = xml[span.start..span.end].trim_end_matches('>').trim_end_matches('/');
            let qualified = tag[1..].split(|c: char| c.is_whitespace()).next().unwrap_or_default();
            out.push_str(&xml[..span.start]);
            out.push_str(tag);
            out.push('>');
            out.push_str(children);
            out.push_str(&format!("</{}>", qualified));
            out.push_str(&xml[span.end..]);
        }
    }
    Some(out)
}

/// Offset where `<legacyDrawing>` belongs among the worksheet's children.
fn legacy_drawing_position(sheet_xml: &str) -> Option<usize> {
    let mut reader = XmlReader::from_str(sheet_xml);
    let mut depth = 0usize;
    loop {
        let before = reader.buffer_position() as usize;
        match reader.read_event().ok()? {
            Event::Start(ref e) => {
                if depth == 1 && AFTER_LEGACY_DRAWING.contains(&e.local_name().as_ref()) {
                    return Some(before);
                }
                depth += 1;
            }
            Event::Empty(ref e) if depth == 1 && AFTER_LEGACY_DRAWING.contains(&e.local_name().as_ref()) => {
                return Some(before);
            }
            Event::End(_) => {
                if depth == 1 {
                    return Some(before);
                }
                depth = depth.saturating_sub(1);
            }
            Event::Eof => return None,
            _ => {}
        }
    }
}

fn comment_element(cell: &CellRef, author_id: usize, text: &str) -> String {
    format!(
        r#"<comment ref="{}" authorId="{}"><text><t xml:space="preserve">{}</t></text></comment>"#,
        cell,
        author_id,
        escape_xml(text)
    )
}

/// Merge `notes` into an existing comments part (or build a new one when `prior` is empty).
/// Returns the new part and the cells that had no comment before.
fn merge_comments(prior: &str, notes: &BTreeMap<CellRef, String>, author: &str) -> (String, Vec<CellRef>) {
    let parsed = (!prior.trim().is_empty())
        .then(|| {
            let authors = element_spans(prior, b"author")?;
            let comments = element_spans(prior, b"comment")?;
            Some((authors, comments))
        })
        .flatten();

    let Some((authors, comments)) = parsed else {
        let body: String = notes.iter().map(|(cell, text)| comment_element(cell, 0, text)).collect();
        let xml = format!(
            r#"{}<comments xmlns="{}"><authors><author>{}</author></authors><commentList>{}</commentList></comments>"#,
            XML_DECLARATION,
            MAIN_NS,
            escape_xml(author),
            body
        );
        return (xml, notes.keys().copied().collect());
    };

    let names: Vec<String> = authors
        .iter()
        .map(|s| s.inner.map(|(a, b)| unescape_xml(&prior[a..b])).unwrap_or_default())
        .collect();
    let author_id = names.iter().position(|n| n == author).unwrap_or(names.len());

    // Replace comments on annotated cells in place; everything else is kept verbatim.
    let mut xml = String::with_capacity(prior.len());
    let mut last = 0;
    let mut replaced: Vec<CellRef> = Vec::new();
    for span in &comments {
        let Some(cell) = span.attr("ref").and_then(CellRef::from_str) else {
            continue;
        };
        let Some(text) = notes.get(&cell) else {
            continue;
        };
        xml.push_str(&prior[last..span.start]);
        xml.push_str(&comment_element(&cell, author_id, text));
        last = span.end;
        replaced.push(cell);
    }
    xml.push_str(&prior[last..]);

    let fresh: Vec<CellRef> = notes.keys().filter(|c| !replaced.contains(c)).copied().collect();
    let appended: String = fresh
        .iter()
        .map(|cell| comment_element(cell, author_id, &notes[cell]))
        .collect();
    if !appended.is_empty() {
        xml = insert_children(&xml, b"commentList", &appended).unwrap_or(xml);
    }
    if author_id == names.len() {
        let entry = format!("<author>{}</author>", escape_xml(author));
        xml = insert_children(&xml, b"authors", &entry).unwrap_or(xml);
    }
    (xml, fresh)
}

fn vml_shape(cell: &CellRef, shape_id: usize) -> String {
    let top = cell.row.saturating_sub(1);
    format!(
        concat!(
            r##"<v:shape id="_x0000_s{id}" type="#_x0000_t202" "##,
            r##"style="position:absolute;margin-left:59.25pt;margin-top:1.5pt;width:108pt;height:59.25pt;z-index:{z};visibility:hidden" "##,
            r##"fillcolor="#ffffe1" o:insetmode="auto">"##,
            r##"<v:fill color2="#ffffe1"/><v:shadow on="t" color="black" obscured="t"/><v:path o:connecttype="none"/>"##,
            r##"<v:textbox style="mso-direction-alt:auto"><div style="text-align:left"></div></v:textbox>"##,
            r##"<x:ClientData ObjectType="Note"><x:MoveWithCells/><x:SizeWithCells/>"##,
            r##"<x:Anchor>{c1}, 15, {r1}, 10, {c2}, 15, {r2}, 4</x:Anchor><x:AutoFill>False</x:AutoFill>"##,
            r##"<x:Row>{row}</x:Row><x:Column>{col}</x:Column></x:ClientData></v:shape>"##
        ),
        id = shape_id,
        z = shape_id % 1024,
        c1 = cell.col + 1,
        r1 = top,
        c2 = cell.col + 3,
        r2 = top + 4,
        row = cell.row,
        col = cell.col,
    )
}

fn new_vml(cells: &[CellRef], sheet_idx: usize) -> String {
    let block = sheet_idx + 1;
    let shapes: String = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| vml_shape(cell, block * 1024 + i + 1))
        .collect();
    format!(
        concat!(
            r#"<xml xmlns:v="urn:schemas-microsoft-com:vml" xmlns:o="urn:schemas-microsoft-com:office:office" "#,
            r#"xmlns:x="urn:schemas-microsoft-com:office:excel">"#,
            r#"<o:shapelayout v:ext="edit"><o:idmap v:ext="edit" data="{block}"/></o:shapelayout>"#,
            r#"<v:shapetype id="_x0000_t202" coordsize="21600,21600" o:spt="202" path="m,l,21600r21600,l21600,xe">"#,
            r#"<v:stroke joinstyle="miter"/><v:path gradientshapeok="t" o:connecttype="rect"/></v:shapetype>"#,
            "{shapes}</xml>"
        ),
        block = block,
        shapes = shapes,
    )
}

/// Append note shapes to an existing drawing. Legacy VML is often not well
/// formed, so this works on the text rather than parsing it.
fn append_vml_shapes(prior: &str, cells: &[CellRef], sheet_idx: usize) -> String {
    if cells.is_empty() {
        return prior.to_string();
    }
    let Some(close) = prior.rfind("</xml>") else {
        return new_vml(cells, sheet_idx);
    };
    let highest = prior
        .match_indices("_x0000_s")
        .filter_map(|(at, marker)| {
            let digits: String = prior[at + marker.len()..]
                .chars()
                .take_while(|c| c.is_ascii_digit())
                .collect();
            digits.parse::<usize>().ok()
        })
        .max()
        .unwrap_or((sheet_idx + 1) * 1024);
    let shapes: String = cells
        .iter()
        .enumerate()
        .map(|(i, cell)| vml_shape(cell, highest + i + 1))
        .collect();
    format!("{}{}{}", &prior[..close], shapes, &prior[close..])
}

fn register_content_types(package: &mut Package<'_>, edits: &mut Edits) -> Result<()> {
    const NAME: &str = "[Content_Types].xml";
    let xml = edits
        .read(package, NAME)
        .ok_or_else(|| GradeError::MalformedWorkbook("missing [Content_Types].xml".to_string()))?;

    let has_vml_default = element_spans(&xml, b"Default")
        .unwrap_or_default()
        .iter()
        .any(|s| s.attr("Extension").is_some_and(|e| e.eq_ignore_ascii_case("vml")));
    let mut entries = String::new();
    if !has_vml_default {
        entries.push_str(&format!(r#"<Default Extension="vml" ContentType="{}"/>"#, VML_CONTENT_TYPE));
    }
    for part in &edits.new_comments {
        entries.push_str(&format!(
            r#"<Override PartName="/{}" ContentType="{}"/>"#,
            escape_xml(part),
            COMMENTS_CONTENT_TYPE
        ));
    }
    if entries.is_empty() {
        return Ok(());
    }
    let updated = insert_children(&xml, b"Types", &entries)
        .ok_or_else(|| GradeError::MalformedWorkbook("unreadable [Content_Types].xml".to_string()))?;
    edits.write(package, NAME.to_string(), updated);
    Ok(())
}

/// Copy every entry, compressed data untouched, swapping in rewritten parts.
fn write_package(package: Package<'_>, mut edits: Edits) -> Result<Vec<u8>> {
    let mut archive = package.into_archive();
    let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
    let options = SimpleFileOptions::default().compression_method(CompressionMethod::Deflated);

    for i in 0..archive.len() {
        let file = archive.by_index_raw(i)?;
        let name = file.name().to_string();
        match edits.replaced.remove(&name) {
            Some(text) => {
                writer.start_file(name, options)?;
                writer.write_all(text.as_bytes())?;
            }
            None => writer.raw_copy_file(file)?,
        }
    }
    for (name, text) in edits.added {
        writer.start_file(name, options)?;
        writer.write_all(text.as_bytes())?;
    }
    Ok(writer.finish()?.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::result::QuestionResult;
    use crate::workbook::load_workbook;
    use gridmark_engine::engine::{CellResult, CellValue};
    use rust_xlsxwriter::{Format, Formula, Note, Workbook as XlsxWorkbook};
    use std::io::Read;

    fn cell(name: &str, ok: bool, feedback: &str) -> CellResult {
        CellResult {
            cell_ref: CellAddress::parse(name).unwrap(),
            formula_correct: Some(ok),
            value_correct: Some(ok),
            feedback: feedback.into(),
            submitted_formula: None,
            warning: None,
        }
    }

    fn result(cells: Vec<CellResult>) -> EvaluationResult {
        EvaluationResult::new(
            "Jane".into(),
            "jane.xlsx".into(),
            vec![QuestionResult {
                question_num: 1,
                description: String::new(),
                total_marks: cells.len() as f64,
                marks_awarded: 0.0,
                feedback: String::new(),
                cells,
            }],
        )
    }

    fn failing() -> EvaluationResult {
        result(vec![
            cell("A1", true, "Correct."),
            cell("B2", false, "Value incorrect. Expected: 20, Got: 19.5."),
            cell("Data!C3", false, "Formula incorrect. Expected: =A1+B1 & \"x\"."),
        ])
    }

    fn entries(bytes: &[u8]) -> BTreeMap<String, Vec<u8>> {
        let mut archive = zip::ZipArchive::new(Cursor::new(bytes)).unwrap();
        let mut out = BTreeMap::new();
        for i in 0..archive.len() {
            let mut file = archive.by_index(i).unwrap();
            let mut data = Vec::new();
            file.read_to_end(&mut data).unwrap();
            out.insert(file.name().to_string(), data);
        }
        out
    }

    fn text(bytes: &[u8], name: &str) -> String {
        String::from_utf8(entries(bytes).remove(name).unwrap()).unwrap()
    }

    /// Swap one zip entry for new content.
    fn rewrite_entry(bytes: &[u8], name: &str, edit: impl Fn(String) -> String) -> Vec<u8> {
        let mut writer = ZipWriter::new(Cursor::new(Vec::new()));
        for (entry, data) in entries(bytes) {
            writer.start_file(entry.clone(), SimpleFileOptions::default()).unwrap();
            let data = if entry == name {
                edit(String::from_utf8(data).unwrap()).into_bytes()
            } else {
                data
            };
            writer.write_all(&data).unwrap();
        }
        writer.finish().unwrap().into_inner()
    }

    /// Main sheet with styling, a merge and a column width, plus a `Data` sheet.
    fn styled_submission() -> Vec<u8> {
        let mut out = XlsxWorkbook::new();
        let main = out.add_worksheet();
        main.set_name("Main").unwrap();
        let bold = Format::new().set_bold();
        main.write_number(0, 0, 10.0).unwrap();
        main.write_formula(1, 1, Formula::new("=A1*2").set_result("19.5")).unwrap();
        main.write_formula(0, 1, Formula::new("=A1>0").set_result("TRUE")).unwrap();
        main.write_formula(0, 2, Formula::new("=1/0").set_result("#DIV/0!")).unwrap();
        main.write_string_with_format(3, 0, "Totals", &bold).unwrap();
        main.merge_range(4, 0, 4, 3, "Merged", &bold).unwrap();
        main.set_column_width(0, 24).unwrap();
        let data = out.add_worksheet();
        data.set_name("Data").unwrap();
        data.write_formula(2, 2, Formula::new("=A1+B1").set_result("3")).unwrap();
        let bytes = out.save_to_buffer().unwrap();

        // Cached booleans and errors as Excel stores them.
        rewrite_entry(&bytes, "xl/worksheets/sheet1.xml", |xml| {
            xml.replace(
                r#"<c r="B1" t="str"><f>A1&gt;0</f><v>TRUE</v></c>"#,
                r#"<c r="B1" t="b"><f>A1&gt;0</f><v>1</v></c>"#,
            )
            .replace(
                r#"<c r="C1" t="str"><f>1/0</f><v>#DIV/0!</v></c>"#,
                r#"<c r="C1" t="e"><f>1/0</f><v>#DIV/0!</v></c>"#,
            )
        })
    }

    #[test]
    fn test_round_trip_keeps_typed_formula_results() {
        let original = styled_submission();
        let before = load_workbook(&original).unwrap();
        let b1 = before.get(&CellAddress::parse("B1").unwrap()).unwrap();
        assert_eq!(b1.value, Some(CellValue::Bool(true)));

        let commented = comment_submission(&original, &failing(), "Feedback").unwrap();
        let after = load_workbook(&commented).unwrap();
        assert_eq!(after, before);
    }

    #[test]
    fn test_other_parts_are_carried_over() {
        let original = styled_submission();
        let commented = comment_submission(&original, &failing(), "Feedback").unwrap();
        let (before, after) = (entries(&original), entries(&commented));

        let changed = ["[Content_Types].xml", "xl/worksheets/sheet1.xml", "xl/worksheets/sheet2.xml"];
        for (name, data) in &before {
            if changed.contains(&name.as_str()) {
                continue;
            }
            assert_eq!(after.get(name), Some(data), "{} changed", name);
        }
        assert!(String::from_utf8_lossy(&after["xl/styles.xml"]).contains("<b/>"));

        let sheet = text(&commented, "xl/worksheets/sheet1.xml");
        assert!(sheet.contains("<mergeCells"));
        assert!(sheet.contains("<cols>"));
        assert!(sheet.contains("<legacyDrawing"));
        let stripped = sheet.replace(
            &format!(r#"<legacyDrawing xmlns:r="{}" r:id="rId2"/>"#, REL_NS),
            "",
        );
        assert_eq!(stripped.as_bytes(), &before["xl/worksheets/sheet1.xml"][..]);
    }

    #[test]
    fn test_notes_only_on_failed_cells() {
        let commented = comment_submission(&styled_submission(), &failing(), "Marker").unwrap();
        let files = entries(&commented);

        let main = text(&commented, "xl/comments1.xml");
        assert!(main.contains("Value incorrect. Expected: 20, Got: 19.5."));
        assert!(main.contains("<author>Marker</author>"));
        assert!(main.contains(r#"ref="B2""#));
        assert!(!main.contains(r#"ref="A1""#));

        let data = text(&commented, "xl/comments2.xml");
        assert!(data.contains(r#"ref="C3""#));
        assert!(data.contains("=A1+B1 &amp; &quot;x&quot;."));

        assert!(files.contains_key("xl/drawings/vmlDrawing1.vml"));
        assert!(files.contains_key("xl/drawings/vmlDrawing2.vml"));
        let rels = text(&commented, "xl/worksheets/_rels/sheet1.xml.rels");
        assert!(rels.contains(r#"Target="../comments1.xml""#));
        assert!(rels.contains(r#"Target="../drawings/vmlDrawing1.vml""#));
        let types = text(&commented, "[Content_Types].xml");
        assert!(types.contains(r#"PartName="/xl/comments2.xml""#));
        assert!(types.contains(r#"Extension="vml""#));
    }

    #[test]
    fn test_no_failures_returns_identical_copy() {
        let original = styled_submission();
        let passing = result(vec![cell("A1", true, "Correct.")]);
        assert_eq!(comment_submission(&original, &passing, "Feedback").unwrap(), original);
    }

    #[test]
    fn test_existing_comments_are_kept() {
        let mut out = XlsxWorkbook::new();
        let ws = out.add_worksheet();
        ws.write_number(0, 0, 10.0).unwrap();
        ws.write_number(1, 1, 19.5).unwrap();
        ws.insert_note(0, 0, &Note::new("Student's own note").set_author("Jane"))
            .unwrap();
        ws.insert_note(1, 1, &Note::new("Check this").set_author("Jane")).unwrap();
        let original = out.save_to_buffer().unwrap();

        let commented = comment_submission(&original, &failing(), "Feedback").unwrap();
        let comments = text(&commented, "xl/comments1.xml");
        assert!(comments.contains("own note"));
        assert!(!comments.contains("Check this"));
        assert!(comments.contains("Value incorrect."));
        assert!(comments.contains("<author>Feedback</author>"));
        assert_eq!(comments.matches("<comment ").count(), 2);
        assert!(!entries(&commented).contains_key("xl/comments2.xml"));
        assert_eq!(load_workbook(&commented).unwrap(), load_workbook(&original).unwrap());
    }

    #[test]
    fn test_relative_target() {
        assert_eq!(relative_target("xl/worksheets/sheet1.xml", "xl/comments1.xml"), "../comments1.xml");
        assert_eq!(
            relative_target("xl/worksheets/sheet1.xml", "xl/drawings/vmlDrawing1.vml"),
            "../drawings/vmlDrawing1.vml"
        );
    }

    #[test]
    fn test_insert_children_expands_empty_element() {
        let xml = r#"<Types xmlns="x"><Default Extension="xml"/></Types>"#;
        assert_eq!(
            insert_children(xml, b"Types", "<a/>").unwrap(),
            r#"<Types xmlns="x"><Default Extension="xml"/><a/></Types>"#
        );
        assert_eq!(
            insert_children(r#"<Relationships xmlns="r"/>"#, b"Relationships", "<a/>").unwrap(),
            r#"<Relationships xmlns="r"><a/></Relationships>"#
        );
    }

    #[test]
    fn test_malformed_bytes() {
        let err = comment_submission(b"not a zip", &failing(), "Feedback").unwrap_err();
        assert!(matches!(err, GradeError::MalformedWorkbook(_)));
    }
}
