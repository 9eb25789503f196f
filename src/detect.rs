use std::collections::{BTreeMap, HashMap};

use crate::grid::Sheet;

/// How many leading rows a metadata lookup inspects. Marks and config
/// header searches scan the whole sheet instead.
pub const METADATA_SCAN_ROWS: usize = 15;

/// Find the first row whose lower-cased, space-joined cell text contains
/// every keyword as a substring. `limit` caps the scan depth; `None` scans
/// the whole sheet. Returns the row index, never the row itself, so callers
/// can slice the data region below it.
pub fn find_header_row(sheet: &Sheet, keywords: &[&str], limit: Option<usize>) -> Option<usize> {
    let needles: Vec<String> = keywords.iter().map(|k| k.to_lowercase()).collect();
    let cap = limit.unwrap_or(sheet.rows.len()).min(sheet.rows.len());

    for (idx, row) in sheet.rows.iter().take(cap).enumerate() {
        let joined = row
            .iter()
            .map(|c| c.to_text())
            .collect::<Vec<_>>()
            .join(" ")
            .to_lowercase();
        if needles.iter().all(|n| joined.contains(n.as_str())) {
            return Some(idx);
        }
    }
    None
}

/// Stringified header labels for the row at `row_idx`, with repeats
/// suffixed `_1`, `_2`, ... in encounter order so every column has a
/// distinct name before resolution runs.
pub fn header_labels(sheet: &Sheet, row_idx: usize) -> Vec<String> {
    let raw: Vec<String> = sheet
        .rows
        .get(row_idx)
        .map(|row| row.iter().map(|c| c.to_text().trim().to_string()).collect())
        .unwrap_or_default();
    disambiguate_headers(&raw)
}

pub fn disambiguate_headers(labels: &[String]) -> Vec<String> {
    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut out = Vec::with_capacity(labels.len());
    for label in labels {
        let n = seen.entry(label.clone()).or_insert(0);
        if *n == 0 {
            out.push(label.clone());
        } else {
            out.push(format!("{label}_{n}"));
        }
        *n += 1;
    }
    out
}

/// First label containing `needle` case-insensitively.
pub fn find_label(labels: &[String], needle: &str) -> Option<usize> {
    let needle = needle.to_lowercase();
    labels
        .iter()
        .position(|l| l.to_lowercase().contains(&needle))
}

/// Map configured assessment names to column indexes.
///
/// Two passes per name: exact case-insensitive equality, where the first
/// hit is final; then a substring pass where the configured name must be
/// contained in the label and labels containing "total" are ineligible.
/// The substring pass keeps the LAST match it sees. That is deliberate:
/// with headers like `Quiz`, `Quiz_1` a config named "Quiz" should land on
/// the exact column, while a config named "Assignment" finds a decorated
/// label like "Assignment (20%)" without being captured by a totals column.
/// Names that resolve nowhere are absent from the map.
pub fn resolve_columns(labels: &[String], names: &[String]) -> BTreeMap<String, usize> {
    let lowered: Vec<String> = labels.iter().map(|l| l.to_lowercase()).collect();
    let mut map = BTreeMap::new();

    for name in names {
        let want = name.trim().to_lowercase();
        if want.is_empty() {
            continue;
        }

        let mut found = lowered.iter().position(|l| *l == want);

        if found.is_none() {
            for (i, label) in lowered.iter().enumerate() {
                if label.contains(&want) && !label.contains("total") {
                    found = Some(i);
                }
            }
        }

        if let Some(i) = found {
            map.insert(name.clone(), i);
        }
    }
    map
}
