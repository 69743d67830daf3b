//! Student names derived from submission filenames.

use std::path::Path;

const UNKNOWN_STUDENT: &str = "Unknown Student";

/// `jane_doe_20240115.xlsx` → `Jane Doe`.
///
/// A trailing `_<digits>` suffix is dropped, underscores become spaces and
/// words are title-cased.
pub fn student_name_from_path(path: &Path) -> String {
    let stem = path
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_default();
    student_name_from_stem(&stem)
}

pub fn student_name_from_stem(stem: &str) -> String {
    let stem = match stem.rsplit_once('_') {
        Some((head, tail))
            if !head.is_empty() && !tail.is_empty() && tail.chars().all(|c| c.is_ascii_digit()) =>
        {
            head
        }
        _ => stem,
    };

    let words: Vec<String> = stem
        .split(|c: char| c == '_' || c.is_whitespace())
        .filter(|w| !w.is_empty())
        .map(title_case)
        .collect();

    if words.is_empty() {
        UNKNOWN_STUDENT.to_string()
    } else {
        words.join(" ")
    }
}

fn title_case(word: &str) -> String {
    let mut chars = word.chars();
    match chars.next() {
        Some(first) => first.to_uppercase().chain(chars.flat_map(char::to_lowercase)).collect(),
        None => String::new(),
    }
}
