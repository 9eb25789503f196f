use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};

use crate::detect::{find_header_row, find_label, header_labels, METADATA_SCAN_ROWS};
use crate::error::IngestError;
use crate::grid::Sheet;

/// CLO tag -> PLO tag. Plain string tags on purpose: sheets are authored by
/// hand and tags like "CLO1" / "PLO2" are labels, not indexes.
pub type CloPloMap = BTreeMap<String, String>;

/// One assessment component as configured in the Setup sheet or supplied by
/// the caller. Immutable once parsed; `full_marks > 0` is enforced at the
/// parse boundary so the aggregation never divides by zero.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AssessmentConfig {
    pub name: String,
    pub weight_pct: f64,
    pub full_marks: f64,
    /// Empty tag means the component counts toward the total but belongs to
    /// no CLO bucket.
    #[serde(default)]
    pub clo_tag: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub category: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseInfo {
    #[serde(default)]
    pub code: String,
    #[serde(default)]
    pub name: String,
    #[serde(default)]
    pub semester: String,
    #[serde(default)]
    pub lecturer: String,
}

fn label_value(row: &[crate::grid::Cell]) -> (String, String) {
    let label = row
        .first()
        .map(|c| c.to_text())
        .unwrap_or_default()
        .trim()
        .trim_end_matches(':')
        .trim()
        .to_lowercase();
    let value = row
        .get(1)
        .map(|c| c.to_text())
        .unwrap_or_default()
        .trim()
        .to_string();
    (label, value)
}

/// Field/Value metadata from the Setup sheet. Labels match the Master
/// Template exactly ("Course Name", "Course Code", "Semester",
/// "Lecturer Name"); unknown labels are ignored, absent ones stay empty.
pub fn parse_course_info(setup: &Sheet) -> CourseInfo {
    let mut info = CourseInfo::default();
    for row in setup.rows.iter().take(METADATA_SCAN_ROWS) {
        let (label, value) = label_value(row);
        if value.is_empty() {
            continue;
        }
        match label.as_str() {
            "course name" => info.name = value,
            "course code" => info.code = value,
            "semester" => info.semester = value,
            "lecturer name" | "lecturer" => info.lecturer = value,
            _ => {}
        }
    }
    info
}

/// Parse the assessment config table from the Setup sheet.
///
/// Returns the configs plus the number of rows dropped for a missing or
/// non-positive full-marks value. One config survives per assessment name;
/// a repeated name keeps the last row, as in the mapping table. A header
/// that never appears is a structural error; a header with zero usable
/// rows underneath is `EmptyConfig`.
pub fn parse_config_table(setup: &Sheet) -> Result<(Vec<AssessmentConfig>, usize), IngestError> {
    let keywords = ["assessment", "weightage"];
    let header = find_header_row(setup, &keywords, None)
        .ok_or_else(|| IngestError::missing_header(&setup.name, &keywords))?;
    let labels = header_labels(setup, header);

    let name_col = find_label(&labels, "assessment")
        .ok_or_else(|| IngestError::missing_header(&setup.name, &keywords))?;
    let weight_col = find_label(&labels, "weightage").or_else(|| find_label(&labels, "weight"));
    let full_col = find_label(&labels, "full marks").or_else(|| find_label(&labels, "full"));
    let clo_col = find_label(&labels, "clo");
    let category_col = find_label(&labels, "category");

    let mut configs: Vec<AssessmentConfig> = Vec::new();
    let mut dropped = 0usize;

    for row in setup.rows.iter().skip(header + 1) {
        let name = row
            .get(name_col)
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();
        if name.is_empty() {
            continue;
        }

        let full_marks = full_col
            .and_then(|c| row.get(c))
            .and_then(|c| c.as_number());
        let Some(full_marks) = full_marks else {
            dropped += 1;
            continue;
        };
        if full_marks.is_nan() || full_marks <= 0.0 {
            dropped += 1;
            continue;
        }

        let weight_pct = weight_col
            .and_then(|c| row.get(c))
            .and_then(|c| c.as_number())
            .unwrap_or(0.0);
        let clo_tag = clo_col
            .and_then(|c| row.get(c))
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();
        let category = category_col
            .and_then(|c| row.get(c))
            .map(|c| c.to_text())
            .map(|s| s.trim().to_string())
            .filter(|s| !s.is_empty());

        let config = AssessmentConfig {
            name,
            weight_pct,
            full_marks,
            clo_tag,
            category,
        };
        // Duplicate assessment rows: last one wins.
        match configs.iter_mut().find(|c| c.name == config.name) {
            Some(existing) => *existing = config,
            None => configs.push(config),
        }
    }

    if configs.is_empty() {
        return Err(IngestError::EmptyConfig(setup.name.clone()));
    }
    Ok((configs, dropped))
}

/// Same full-marks guard and name dedup for caller-supplied configs, so
/// both input paths hit one validation rule. Returns kept configs plus
/// dropped-row count.
pub fn sanitize_configs(configs: Vec<AssessmentConfig>) -> (Vec<AssessmentConfig>, usize) {
    let mut kept: Vec<AssessmentConfig> = Vec::with_capacity(configs.len());
    let mut dropped = 0usize;
    for mut c in configs {
        c.name = c.name.trim().to_string();
        c.clo_tag = c.clo_tag.trim().to_string();
        if c.name.is_empty() || c.full_marks.is_nan() || c.full_marks <= 0.0 {
            dropped += 1;
            continue;
        }
        match kept.iter_mut().find(|k| k.name == c.name) {
            Some(existing) => *existing = c,
            None => kept.push(c),
        }
    }
    (kept, dropped)
}

/// Trim caller-supplied mapping entries; blank tags on either side drop
/// the pair, mirroring the sheet parse.
pub fn sanitize_map(map: CloPloMap) -> CloPloMap {
    map.into_iter()
        .filter_map(|(clo, plo)| {
            let clo = clo.trim().to_string();
            let plo = plo.trim().to_string();
            if clo.is_empty() || plo.is_empty() {
                None
            } else {
                Some((clo, plo))
            }
        })
        .collect()
}

/// CLO -> PLO pairs from a mapping sheet. Lenient: a sheet without a
/// recognizable clo/plo header yields an empty map, because the mapping is
/// optional and evidence exports carry a "CLO Analysis" sheet that matches
/// the sheet keyword but holds no mapping.
pub fn parse_clo_plo_map(sheet: &Sheet) -> CloPloMap {
    let mut map = CloPloMap::new();
    let Some(header) = find_header_row(sheet, &["clo", "plo"], None) else {
        return map;
    };
    let labels = header_labels(sheet, header);
    let Some(plo_col) = find_label(&labels, "plo") else {
        return map;
    };
    let clo_col = labels
        .iter()
        .enumerate()
        .find(|(i, l)| *i != plo_col && l.to_lowercase().contains("clo"))
        .map(|(i, _)| i);
    let Some(clo_col) = clo_col else {
        return map;
    };

    for row in sheet.rows.iter().skip(header + 1) {
        let clo = row
            .get(clo_col)
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();
        let plo = row
            .get(plo_col)
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();
        if clo.is_empty() || plo.is_empty() {
            continue;
        }
        // Duplicate CLO rows: last one wins.
        map.insert(clo, plo);
    }
    map
}

fn metadata_value(line: &str, label: &str) -> Option<String> {
    if !line.to_lowercase().starts_with(label) {
        return None;
    }
    line.split_once(':').map(|(_, v)| v.trim().to_string())
}

/// Course metadata from a raw export's preamble lines, e.g.
/// `Subject : BCS1513 - Software Engineering`. Only the first 15 rows are
/// inspected; fields not found stay empty.
pub fn parse_export_metadata(sheet: &Sheet) -> CourseInfo {
    let mut info = CourseInfo::default();
    for row in sheet.rows.iter().take(METADATA_SCAN_ROWS) {
        let line = row
            .iter()
            .map(|c| c.to_text())
            .collect::<Vec<_>>()
            .join(" ")
            .trim()
            .to_string();
        if line.is_empty() {
            continue;
        }

        if let Some(value) = metadata_value(&line, "subject") {
            match value.split_once('-') {
                Some((code, name)) => {
                    info.code = code.trim().to_string();
                    info.name = name.trim().to_string();
                }
                None => info.name = value,
            }
        } else if let Some(value) = metadata_value(&line, "semester") {
            info.semester = value;
        } else if let Some(value) = metadata_value(&line, "lecturer") {
            info.lecturer = value;
        }
    }
    info
}
