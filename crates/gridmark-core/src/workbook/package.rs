//! Direct access to the parts of an xlsx package.
//!
//! calamine covers cell data. Everything else the grader needs (active tab,
//! sheet part paths, conditional formatting, differential fills, relationships)
//! is read here with `zip` and `quick-xml`.

use gridmark_engine::engine::{ConditionalFormat, FormatRule, Rgb};
use quick_xml::Reader as XmlReader;
use quick_xml::events::{BytesStart, Event};
use std::io::{Cursor, Read};
use zip::ZipArchive;

use crate::error::{GradeError, Result};

pub(crate) const REL_OFFICE_DOCUMENT: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/officeDocument";
pub(crate) const REL_COMMENTS: &str = "http://schemas.openxmlformats.org/officeDocument/2006/relationships/comments";
pub(crate) const REL_VML_DRAWING: &str =
    "http://schemas.openxmlformats.org/officeDocument/2006/relationships/vmlDrawing";

const DEFAULT_WORKBOOK_PART: &str = "xl/workbook.xml";

/// A worksheet's display name and the zip entry holding its XML.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct SheetPart {
    pub name: String,
    pub path: String,
}

/// One `<Relationship>` entry of a `.rels` part.
#[derive(Clone, Debug, PartialEq)]
pub(crate) struct Relationship {
    pub id: String,
    pub kind: String,
    pub target: String,
    pub external: bool,
}

pub(crate) struct Package<'a> {
    archive: ZipArchive<Cursor<&'a [u8]>>,
}

impl<'a> Package<'a> {
    pub(crate) fn open(bytes: &'a [u8]) -> Result<Package<'a>> {
        let archive = ZipArchive::new(Cursor::new(bytes)).map_err(|e| GradeError::MalformedWorkbook(e.to_string()))?;
        Ok(Package { archive })
    }

    pub(crate) fn into_archive(self) -> ZipArchive<Cursor<&'a [u8]>> {
        self.archive
    }

    pub(crate) fn has_part(&self, name: &str) -> bool {
        self.archive.index_for_name(name).is_some()
    }

    /// A part as UTF-8 text, or None when it is absent or unreadable.
    pub(crate) fn read_part(&mut self, name: &str) -> Option<String> {
        let mut file = self.archive.by_name(name).ok()?;
        let mut text = String::new();
        file.read_to_string(&mut text).ok()?;
        Some(text)
    }

    pub(crate) fn relationships(&mut self, part: &str) -> Vec<Relationship> {
        self.read_part(&rels_path(part))
            .map(|xml| parse_relationships(&xml))
            .unwrap_or_default()
    }

    /// The workbook part named by the package relationships.
    pub(crate) fn workbook_part(&mut self) -> String {
        self.read_part("_rels/.rels")
            .map(|xml| parse_relationships(&xml))
            .unwrap_or_default()
            .into_iter()
            .find(|r| r.kind == REL_OFFICE_DOCUMENT)
            .map(|r| resolve_target("", &r.target))
            .unwrap_or_else(|| DEFAULT_WORKBOOK_PART.to_string())
    }

    /// Worksheets in workbook order. Sheets whose part cannot be found are left out.
    pub(crate) fn sheets(&mut self) -> Vec<SheetPart> {
        let workbook = self.workbook_part();
        let Some(xml) = self.read_part(&workbook) else {
            return Vec::new();
        };
        let rels = self.relationships(&workbook);
        parse_sheet_entries(&xml)
            .into_iter()
            .filter_map(|(name, rid)| {
                let rel = rels.iter().find(|r| r.id == rid)?;
                Some(SheetPart {
                    name,
                    path: resolve_target(&workbook, &rel.target),
                })
            })
            .collect()
    }

    /// Index of the active sheet, or None when the workbook does not record one.
    pub(crate) fn active_tab(&mut self) -> Option<usize> {
        let workbook = self.workbook_part();
        parse_active_tab(&self.read_part(&workbook)?)
    }

    /// Fill colour of each differential format in `xl/styles.xml`, by `dxfId`.
    pub(crate) fn dxf_fills(&mut self) -> Vec<Option<Rgb>> {
        self.read_part("xl/styles.xml")
            .map(|xml| parse_dxf_fills(&xml))
            .unwrap_or_default()
    }
}

/// `xl/worksheets/sheet1.xml` → `xl/worksheets/_rels/sheet1.xml.rels`.
pub(crate) fn rels_path(part: &str) -> String {
    match part.rsplit_once('/') {
        Some((dir, file)) => format!("{}/_rels/{}.rels", dir, file),
        None => format!("_rels/{}.rels", part),
    }
}

/// Resolve a relationship target against the part that owns the relationship.
pub(crate) fn resolve_target(source_part: &str, target: &str) -> String {
    if let Some(absolute) = target.strip_prefix('/') {
        return absolute.to_string();
    }
    let mut segments: Vec<&str> = match source_part.rsplit_once('/') {
        Some((dir, _)) => dir.split('/').collect(),
        None => Vec::new(),
    };
    for segment in target.split('/') {
        match segment {
            "" | "." => {}
            ".." => {
                segments.pop();
            }
            s => segments.push(s),
        }
    }
    segments.join("/")
}

/// Unescape the five predefined XML entities and numeric character references.
pub(crate) fn unescape_xml(s: &str) -> String {
    if !s.contains('&') {
        return s.to_string();
    }
    let mut out = String::with_capacity(s.len());
    let mut rest = s;
    while let Some(start) = rest.find('&') {
        out.push_str(&rest[..start]);
        let tail = &rest[start..];
        let Some(end) = tail.find(';') else {
            out.push_str(tail);
            return out;
        };
        let entity = &tail[1..end];
        let decoded = match entity {
            "quot" => Some('"'),
            "amp" => Some('&'),
            "lt" => Some('<'),
            "gt" => Some('>'),
            "apos" => Some('\''),
            _ => entity
                .strip_prefix("#x")
                .and_then(|hex| u32::from_str_radix(hex, 16).ok())
                .or_else(|| entity.strip_prefix('#').and_then(|dec| dec.parse().ok()))
                .and_then(char::from_u32),
        };
        match decoded {
            Some(c) => out.push(c),
            None => out.push_str(&tail[..=end]),
        }
        rest = &tail[end + 1..];
    }
    out.push_str(rest);
    out
}

/// Escape text for use in element content or a double-quoted attribute.
pub(crate) fn escape_xml(s: &str) -> String {
    let mut out = String::with_capacity(s.len());
    for c in s.chars() {
        match c {
            '&' => out.push_str("&amp;"),
            '<' => out.push_str("&lt;"),
            '>' => out.push_str("&gt;"),
            '"' => out.push_str("&quot;"),
            '\'' => out.push_str("&apos;"),
            c => out.push(c),
        }
    }
    out
}

/// Unescaped value of the attribute whose local name is `key`.
pub(crate) fn attr(e: &BytesStart, key: &[u8]) -> Option<String> {
    e.attributes()
        .flatten()
        .find(|a| a.key.local_name().as_ref() == key)
        .map(|a| unescape_xml(&String::from_utf8_lossy(&a.value)))
}

pub(crate) fn parse_relationships(xml: &str) -> Vec<Relationship> {
    let mut reader = XmlReader::from_str(xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"Relationship" => {
                if let (Some(id), Some(kind), Some(target)) = (attr(e, b"Id"), attr(e, b"Type"), attr(e, b"Target")) {
                    out.push(Relationship {
                        id,
                        kind,
                        target,
                        external: attr(e, b"TargetMode").is_some_and(|m| m.eq_ignore_ascii_case("External")),
                    });
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

/// `(name, relationship id)` for each `<sheet>` of the workbook part.
fn parse_sheet_entries(workbook_xml: &str) -> Vec<(String, String)> {
    let mut reader = XmlReader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"sheet" => {
                if let (Some(name), Some(rid)) = (attr(e, b"name"), attr(e, b"id")) {
                    out.push((name, rid));
                }
            }
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}

pub(crate) fn parse_active_tab(workbook_xml: &str) -> Option<usize> {
    let mut reader = XmlReader::from_str(workbook_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Empty(ref e)) | Ok(Event::Start(ref e)) if e.local_name().as_ref() == b"workbookView" => {
                // Only the first view matters.
                return attr(e, b"activeTab").and_then(|v| v.trim().parse().ok());
            }
            Ok(Event::Eof) | Err(_) => return None,
            _ => {}
        }
        buf.clear();
    }
}

/// Colour of a `<color>`-like element: `rgb` first, then the legacy indexed palette.
/// Theme colours are not resolved.
fn element_colour(e: &BytesStart) -> Option<Rgb> {
    if let Some(rgb) = attr(e, b"rgb") {
        return Rgb::from_hex(&rgb);
    }
    let idx: u8 = attr(e, b"indexed")?.parse().ok()?;
    let rgb = match idx % 8 {
        0 => Rgb::new(0, 0, 0),
        1 => Rgb::new(255, 255, 255),
        2 => Rgb::new(255, 0, 0),
        3 => Rgb::new(0, 255, 0),
        4 => Rgb::new(0, 0, 255),
        5 => Rgb::new(255, 255, 0),
        6 => Rgb::new(255, 0, 255),
        _ => Rgb::new(0, 255, 255),
    };
    (idx < 16).then_some(rgb)
}

fn parse_dxf_fills(styles_xml: &str) -> Vec<Option<Rgb>> {
    let mut reader = XmlReader::from_str(styles_xml);
    reader.config_mut().trim_text(true);
    let mut buf = Vec::new();
    let mut fills = Vec::new();
    let mut in_dxfs = false;
    let mut in_dxf = false;
    let mut in_fill = false;
    let mut background: Option<Rgb> = None;
    let mut foreground: Option<Rgb> = None;

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"dxfs" => in_dxfs = true,
                b"dxf" if in_dxfs => {
                    in_dxf = true;
                    background = None;
                    foreground = None;
                }
                b"fill" if in_dxf => in_fill = true,
                b"bgColor" if in_fill => background = element_colour(e),
                b"fgColor" if in_fill => foreground = element_colour(e),
                _ => {}
            },
            Ok(Event::Empty(ref e)) => match e.local_name().as_ref() {
                b"dxf" if in_dxfs => fills.push(None),
                b"bgColor" if in_fill => background = element_colour(e),
                b"fgColor" if in_fill => foreground = element_colour(e),
                _ => {}
            },
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"dxfs" => break,
                b"dxf" if in_dxf => {
                    // Differential solid fills store their colour in bgColor.
                    fills.push(background.or(foreground));
                    in_dxf = false;
                }
                b"fill" => in_fill = false,
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    fills
}

/// Conditional formatting blocks of a worksheet, with each rule's fill looked up in `dxfs`.
/// Blocks inside `<extLst>` are ignored.
pub(crate) fn parse_conditional_formats(sheet_xml: &str, dxfs: &[Option<Rgb>]) -> Vec<ConditionalFormat> {
    // Untrimmed, so spaces inside string literals of a formula survive.
    let mut reader = XmlReader::from_str(sheet_xml);
    let mut buf = Vec::new();
    let mut out = Vec::new();
    let mut ext_depth = 0usize;
    let mut block: Option<ConditionalFormat> = None;
    let mut rule: Option<FormatRule> = None;
    let mut formula: Option<String> = None;

    let start_rule = |e: &BytesStart| FormatRule {
        kind: attr(e, b"type").unwrap_or_default(),
        formulas: Vec::new(),
        fill: attr(e, b"dxfId")
            .and_then(|id| id.parse::<usize>().ok())
            .and_then(|id| dxfs.get(id).copied().flatten()),
    };

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(ref e)) => match e.local_name().as_ref() {
                b"extLst" => ext_depth += 1,
                _ if ext_depth > 0 => {}
                b"conditionalFormatting" => {
                    block = Some(ConditionalFormat {
                        ranges: ConditionalFormat::parse_sqref(&attr(e, b"sqref").unwrap_or_default()),
                        rules: Vec::new(),
                    });
                }
                b"cfRule" if block.is_some() => rule = Some(start_rule(e)),
                b"formula" if rule.is_some() => formula = Some(String::new()),
                _ => {}
            },
            Ok(Event::Empty(ref e)) if ext_depth == 0 && e.local_name().as_ref() == b"cfRule" => {
                if let Some(block) = block.as_mut() {
                    block.rules.push(start_rule(e));
                }
            }
            Ok(Event::Text(ref e)) => {
                if let Some(text) = formula.as_mut() {
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                }
            }
            Ok(Event::GeneralRef(ref e)) => {
                if let Some(text) = formula.as_mut() {
                    text.push('&');
                    text.push_str(&String::from_utf8_lossy(e.as_ref()));
                    text.push(';');
                }
            }
            Ok(Event::End(ref e)) => match e.local_name().as_ref() {
                b"extLst" => ext_depth = ext_depth.saturating_sub(1),
                _ if ext_depth > 0 => {}
                b"formula" => {
                    if let (Some(text), Some(rule)) = (formula.take(), rule.as_mut()) {
                        let text = unescape_xml(&text);
                        if !text.trim().is_empty() {
                            rule.formulas.push(text);
                        }
                    }
                }
                b"cfRule" => {
                    if let (Some(done), Some(block)) = (rule.take(), block.as_mut()) {
                        block.rules.push(done);
                    }
                }
                b"conditionalFormatting" => out.extend(block.take()),
                _ => {}
            },
            Ok(Event::Eof) | Err(_) => break,
            _ => {}
        }
        buf.clear();
    }
    out
}
