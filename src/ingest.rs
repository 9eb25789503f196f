use std::collections::BTreeSet;

use serde::Serialize;
use tracing::{debug, info};

use crate::calc;
use crate::calc::StudentRecord;
use crate::config::{
    self, parse_clo_plo_map, parse_config_table, parse_course_info, parse_export_metadata,
    AssessmentConfig, CloPloMap, CourseInfo,
};
use crate::detect::{find_header_row, find_label, header_labels, resolve_columns};
use crate::error::IngestError;
use crate::grid::{Sheet, Workbook};

const SETUP_SHEET: &str = "Setup";
const MARKS_SHEETS: &[&str] = &["Table 1", "Marks"];
const MAPPING_SHEETS: &[&str] = &["Table 2", "CLO"];
const MASTER_HEADER: &[&str] = &["student id", "student name"];
const EXPORT_HEADER: &[&str] = &["student no", "student name"];

/// Header labels that never denote an assessment column in a raw export.
const NON_ASSESSMENT_LABELS: &[&str] = &[
    "no", "no.", "s/n", "bil", "grade", "result", "remark", "remarks", "note", "notes", "status",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub enum SourceShape {
    MasterTemplate,
    RawExport,
}

/// Caller-side overrides. Supplied configs replace whatever the workbook
/// carries; for raw exports they are the only source.
#[derive(Debug, Clone, Default)]
pub struct IngestOptions {
    pub configs: Option<Vec<AssessmentConfig>>,
    pub clo_plo: Option<CloPloMap>,
}

#[derive(Debug, Clone)]
pub struct SourceMeta {
    pub file_name: String,
    pub sha256: String,
}

/// Counters for everything the lenient path absorbed. Scores are identical
/// with or without this information; it exists so a shell can surface data
/// quality instead of silently trusting a spreadsheet.
#[derive(Debug, Clone, Default, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct IngestAudit {
    pub coerced_cells: usize,
    pub skipped_rows: usize,
    pub dropped_config_rows: usize,
    pub unmapped_clos: Vec<String>,
}

/// Everything derived from one successfully ingested file.
#[derive(Debug, Clone)]
pub struct CourseIngest {
    pub course: CourseInfo,
    pub shape: SourceShape,
    pub file_name: String,
    pub sha256: String,
    pub configs: Vec<AssessmentConfig>,
    pub clo_plo: CloPloMap,
    pub students: Vec<StudentRecord>,
    pub audit: IngestAudit,
}

pub fn detect_shape(wb: &Workbook) -> Result<SourceShape, IngestError> {
    if wb.sheets.is_empty() {
        return Err(IngestError::EmptyWorkbook);
    }
    if wb.sheet_containing(SETUP_SHEET).is_some() {
        Ok(SourceShape::MasterTemplate)
    } else {
        Ok(SourceShape::RawExport)
    }
}

/// Run the full per-file pipeline. Errors abort this file only; the caller
/// decides what a failed file means for the rest of its batch.
pub fn ingest_workbook(
    wb: &Workbook,
    meta: SourceMeta,
    opts: &IngestOptions,
) -> Result<CourseIngest, IngestError> {
    match detect_shape(wb)? {
        SourceShape::MasterTemplate => ingest_master_template(wb, meta, opts),
        SourceShape::RawExport => ingest_raw_export(wb, meta, opts),
    }
}

fn ingest_master_template(
    wb: &Workbook,
    meta: SourceMeta,
    opts: &IngestOptions,
) -> Result<CourseIngest, IngestError> {
    let setup = wb
        .sheet_containing(SETUP_SHEET)
        .ok_or_else(|| IngestError::MissingSheet(SETUP_SHEET.to_string()))?;
    let course = parse_course_info(setup);

    let (configs, dropped_config_rows) = match &opts.configs {
        Some(given) => {
            let (kept, dropped) = config::sanitize_configs(given.clone());
            if kept.is_empty() {
                return Err(IngestError::EmptyConfig("params.configs".to_string()));
            }
            (kept, dropped)
        }
        None => parse_config_table(setup)?,
    };

    let marks = wb
        .sheet_matching(MARKS_SHEETS)
        .ok_or_else(|| IngestError::MissingSheet(MARKS_SHEETS[0].to_string()))?;
    let header = find_header_row(marks, MASTER_HEADER, None)
        .ok_or_else(|| IngestError::missing_header(&marks.name, MASTER_HEADER))?;
    let labels = header_labels(marks, header);
    let id_col = find_label(&labels, "student id")
        .ok_or_else(|| IngestError::missing_header(&marks.name, MASTER_HEADER))?;
    let name_col = find_label(&labels, "student name")
        .ok_or_else(|| IngestError::missing_header(&marks.name, MASTER_HEADER))?;

    let clo_plo = match &opts.clo_plo {
        Some(given) => config::sanitize_map(given.clone()),
        None => wb
            .sheet_matching(MAPPING_SHEETS)
            .map(parse_clo_plo_map)
            .unwrap_or_default(),
    };

    Ok(assemble(
        marks,
        course,
        SourceShape::MasterTemplate,
        meta,
        configs,
        dropped_config_rows,
        clo_plo,
        header,
        id_col,
        name_col,
        &labels,
    ))
}

fn ingest_raw_export(
    wb: &Workbook,
    meta: SourceMeta,
    opts: &IngestOptions,
) -> Result<CourseIngest, IngestError> {
    let sheet = wb.sheets.first().ok_or(IngestError::EmptyWorkbook)?;

    let mut course = parse_export_metadata(sheet);
    if course.code.is_empty() && course.name.is_empty() {
        // Portal exports without a Subject line: keep the sheet name, which
        // the loader set from the file stem.
        course.name = sheet.name.clone();
    }

    let Some(given) = &opts.configs else {
        return Err(IngestError::NoAssessmentConfig);
    };
    let (configs, dropped_config_rows) = config::sanitize_configs(given.clone());
    if configs.is_empty() {
        return Err(IngestError::EmptyConfig("params.configs".to_string()));
    }

    let header = find_header_row(sheet, EXPORT_HEADER, None)
        .ok_or_else(|| IngestError::missing_header(&sheet.name, EXPORT_HEADER))?;
    let labels = header_labels(sheet, header);
    let id_col = find_label(&labels, "student no")
        .ok_or_else(|| IngestError::missing_header(&sheet.name, EXPORT_HEADER))?;
    let name_col = find_label(&labels, "student name")
        .ok_or_else(|| IngestError::missing_header(&sheet.name, EXPORT_HEADER))?;

    let clo_plo = opts
        .clo_plo
        .clone()
        .map(config::sanitize_map)
        .unwrap_or_default();

    Ok(assemble(
        sheet,
        course,
        SourceShape::RawExport,
        meta,
        configs,
        dropped_config_rows,
        clo_plo,
        header,
        id_col,
        name_col,
        &labels,
    ))
}

#[allow(clippy::too_many_arguments)]
fn assemble(
    sheet: &Sheet,
    course: CourseInfo,
    shape: SourceShape,
    meta: SourceMeta,
    configs: Vec<AssessmentConfig>,
    dropped_config_rows: usize,
    clo_plo: CloPloMap,
    header: usize,
    id_col: usize,
    name_col: usize,
    labels: &[String],
) -> CourseIngest {
    let data_rows = &sheet.rows[header + 1..];

    let names: Vec<String> = configs.iter().map(|c| c.name.clone()).collect();
    let columns = resolve_columns(labels, &names);

    let agg = calc::aggregate_rows(data_rows, id_col, name_col, &configs, &columns);

    let mut students = Vec::with_capacity(agg.outcomes.len());
    let mut unmapped: BTreeSet<String> = BTreeSet::new();
    for outcome in &agg.outcomes {
        let (record, tags) = calc::build_student_record(outcome, &clo_plo);
        unmapped.extend(tags);
        students.push(record);
    }

    let audit = IngestAudit {
        coerced_cells: agg.coerced_cells,
        skipped_rows: agg.skipped_rows,
        dropped_config_rows,
        unmapped_clos: unmapped.into_iter().collect(),
    };
    if audit.coerced_cells > 0 || audit.skipped_rows > 0 {
        debug!(
            file = %meta.file_name,
            coerced_cells = audit.coerced_cells,
            skipped_rows = audit.skipped_rows,
            "lenient handling applied while reading marks"
        );
    }
    info!(
        file = %meta.file_name,
        course = %course.code,
        students = students.len(),
        "course file ingested"
    );

    CourseIngest {
        course,
        shape,
        file_name: meta.file_name,
        sha256: meta.sha256,
        configs,
        clo_plo,
        students,
        audit,
    }
}

/// Assessment-looking header labels in a raw export: everything except the
/// identity columns, totals, and the fixed bookkeeping labels.
pub fn candidate_columns(labels: &[String], id_col: usize, name_col: usize) -> Vec<String> {
    labels
        .iter()
        .enumerate()
        .filter(|(i, label)| {
            if *i == id_col || *i == name_col {
                return false;
            }
            let trimmed = label.trim();
            if trimmed.is_empty() {
                return false;
            }
            let lower = trimmed.to_lowercase();
            if lower.contains("total") || lower.contains("student") {
                return false;
            }
            !NON_ASSESSMENT_LABELS.contains(&lower.as_str())
        })
        .map(|(_, label)| label.clone())
        .collect()
}

/// Preview of what an ingest would see, with no session mutation. Problems
/// that would fail a real ingest show up as issue strings instead of
/// errors so a shell can walk the user through fixing them.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InspectReport {
    pub shape: SourceShape,
    pub sheet_names: Vec<String>,
    pub course: CourseInfo,
    pub header_row: Option<usize>,
    pub candidate_columns: Vec<String>,
    pub configs_preview: Vec<AssessmentConfig>,
    pub dropped_config_rows: usize,
    pub clo_plo_entries: usize,
    pub issues: Vec<String>,
}

pub fn inspect_workbook(wb: &Workbook) -> Result<InspectReport, IngestError> {
    let shape = detect_shape(wb)?;
    let mut report = InspectReport {
        shape,
        sheet_names: wb.sheet_names(),
        course: CourseInfo::default(),
        header_row: None,
        candidate_columns: Vec::new(),
        configs_preview: Vec::new(),
        dropped_config_rows: 0,
        clo_plo_entries: 0,
        issues: Vec::new(),
    };

    match shape {
        SourceShape::MasterTemplate => {
            let setup = wb
                .sheet_containing(SETUP_SHEET)
                .ok_or_else(|| IngestError::MissingSheet(SETUP_SHEET.to_string()))?;
            report.course = parse_course_info(setup);
            match parse_config_table(setup) {
                Ok((configs, dropped)) => {
                    report.configs_preview = configs;
                    report.dropped_config_rows = dropped;
                }
                Err(e) => report.issues.push(e.to_string()),
            }
            match wb.sheet_matching(MARKS_SHEETS) {
                Some(marks) => {
                    report.header_row = find_header_row(marks, MASTER_HEADER, None);
                    if report.header_row.is_none() {
                        report
                            .issues
                            .push(IngestError::missing_header(&marks.name, MASTER_HEADER).to_string());
                    }
                }
                None => report
                    .issues
                    .push(IngestError::MissingSheet(MARKS_SHEETS[0].to_string()).to_string()),
            }
            report.clo_plo_entries = wb
                .sheet_matching(MAPPING_SHEETS)
                .map(|s| parse_clo_plo_map(s).len())
                .unwrap_or(0);
        }
        SourceShape::RawExport => {
            let sheet = wb.sheets.first().ok_or(IngestError::EmptyWorkbook)?;
            report.course = parse_export_metadata(sheet);
            report.header_row = find_header_row(sheet, EXPORT_HEADER, None);
            match report.header_row {
                Some(header) => {
                    let labels = header_labels(sheet, header);
                    let id_col = find_label(&labels, "student no");
                    let name_col = find_label(&labels, "student name");
                    if let (Some(id), Some(name)) = (id_col, name_col) {
                        report.candidate_columns = candidate_columns(&labels, id, name);
                    }
                }
                None => report
                    .issues
                    .push(IngestError::missing_header(&sheet.name, EXPORT_HEADER).to_string()),
            }
            report
                .issues
                .push("assessment configs must be supplied by the caller".to_string());
        }
    }
    Ok(report)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::{Cell, Sheet};

    fn t(s: &str) -> Cell {
        Cell::Text(s.to_string())
    }

    fn n(v: f64) -> Cell {
        Cell::Number(v)
    }

    fn meta() -> SourceMeta {
        SourceMeta {
            file_name: "BCS1513.xlsx".into(),
            sha256: "0".repeat(64),
        }
    }

    fn master_template() -> Workbook {
        Workbook {
            sheets: vec![
                Sheet {
                    name: "Setup".into(),
                    rows: vec![
                        vec![t("Course Name"), t("Software Engineering")],
                        vec![t("Course Code"), t("BCS1513")],
                        vec![t("Semester"), t("2025/01")],
                        vec![t("Lecturer Name"), t("Dr. Aminah")],
                        vec![],
                        vec![
                            t("Assessment"),
                            t("Weightage (%)"),
                            t("Full Marks"),
                            t("CLO"),
                        ],
                        vec![t("A1"), n(40.0), n(50.0), t("CLO1")],
                        vec![t("A2"), n(60.0), n(100.0), t("CLO2")],
                    ],
                },
                Sheet {
                    name: "Table 1 - Marks".into(),
                    rows: vec![
                        vec![t("Student ID"), t("Student Name"), t("A1"), t("A2")],
                        vec![t("S001"), t("Ali"), n(25.0), n(90.0)],
                        vec![t("S002"), t("Siti"), t("absent"), n(50.0)],
                        vec![t("nan"), t(""), n(1.0), n(1.0)],
                    ],
                },
                Sheet {
                    name: "Table 2 - CLO-PLO Mapping".into(),
                    rows: vec![
                        vec![t("CLO"), t("PLO")],
                        vec![t("CLO1"), t("PLO1")],
                        vec![t("CLO2"), t("PLO2")],
                    ],
                },
            ],
        }
    }

    fn raw_export() -> Workbook {
        Workbook {
            sheets: vec![Sheet {
                name: "BCS1513_export".into(),
                rows: vec![
                    vec![t("Subject : BCS1513 - Software Engineering")],
                    vec![t("Semester : 2025/01")],
                    vec![t("Lecturer : Dr. Aminah")],
                    vec![],
                    vec![
                        t("No"),
                        t("Student No"),
                        t("Student Name"),
                        t("A1"),
                        t("A2"),
                        t("Total"),
                        t("Grade"),
                    ],
                    vec![n(1.0), t("S001"), t("Ali"), n(25.0), n(90.0), n(74.0), t("B+")],
                    vec![n(2.0), t("S002"), t("Siti"), n(40.0), n(80.0), n(80.0), t("A")],
                ],
            }],
        }
    }

    fn export_configs() -> Vec<AssessmentConfig> {
        vec![
            AssessmentConfig {
                name: "A1".into(),
                weight_pct: 40.0,
                full_marks: 50.0,
                clo_tag: "CLO1".into(),
                category: None,
            },
            AssessmentConfig {
                name: "A2".into(),
                weight_pct: 60.0,
                full_marks: 100.0,
                clo_tag: "CLO2".into(),
                category: None,
            },
        ]
    }

    #[test]
    fn master_template_end_to_end() {
        let wb = master_template();
        let out = ingest_workbook(&wb, meta(), &IngestOptions::default()).unwrap();

        assert_eq!(out.shape, SourceShape::MasterTemplate);
        assert_eq!(out.course.code, "BCS1513");
        assert_eq!(out.students.len(), 2);
        assert_eq!(out.audit.skipped_rows, 1);
        assert_eq!(out.audit.coerced_cells, 1);
        assert!(out.audit.unmapped_clos.is_empty());

        let ali = &out.students[0];
        assert_eq!(ali.student_id, "S001");
        assert_eq!(ali.total, 74.0);
        assert_eq!(ali.clo_scores.get("CLO1"), Some(&50.0));
        assert_eq!(ali.clo_scores.get("CLO2"), Some(&90.0));
        assert_eq!(ali.plo_scores.get("PLO1"), Some(&50.0));
        assert_eq!(ali.plo_scores.get("PLO2"), Some(&90.0));

        let siti = &out.students[1];
        assert_eq!(siti.total, 30.0);
        assert_eq!(siti.clo_scores.get("CLO1"), Some(&0.0));
    }

    #[test]
    fn master_template_without_marks_sheet_fails_structurally() {
        let mut wb = master_template();
        wb.sheets.remove(1);
        let err = ingest_workbook(&wb, meta(), &IngestOptions::default()).unwrap_err();
        assert_eq!(err.code(), "missing_sheet");
        assert!(err.to_string().contains("Table 1"));
    }

    #[test]
    fn caller_configs_override_setup_table() {
        let wb = master_template();
        let opts = IngestOptions {
            configs: Some(vec![AssessmentConfig {
                name: "A1".into(),
                weight_pct: 100.0,
                full_marks: 50.0,
                clo_tag: "CLO1".into(),
                category: None,
            }]),
            clo_plo: None,
        };
        let out = ingest_workbook(&wb, meta(), &opts).unwrap();
        assert_eq!(out.configs.len(), 1);
        // A2 no longer configured: total is A1 alone.
        assert_eq!(out.students[0].total, 50.0);
    }

    #[test]
    fn duplicate_config_rows_do_not_double_count() {
        let wb = Workbook {
            sheets: vec![
                Sheet {
                    name: "Setup".into(),
                    rows: vec![
                        vec![
                            t("Assessment"),
                            t("Weightage (%)"),
                            t("Full Marks"),
                            t("CLO"),
                        ],
                        vec![t("Quiz"), n(10.0), n(10.0), t("CLO1")],
                        vec![t("Quiz"), n(10.0), n(10.0), t("CLO1")],
                    ],
                },
                Sheet {
                    name: "Table 1 - Marks".into(),
                    rows: vec![
                        vec![t("Student ID"), t("Student Name"), t("Quiz")],
                        vec![t("S001"), t("Ali"), n(10.0)],
                    ],
                },
            ],
        };
        let out = ingest_workbook(&wb, meta(), &IngestOptions::default()).unwrap();
        assert_eq!(out.configs.len(), 1);
        // A copy-pasted Setup row must not count the same column twice.
        let ali = &out.students[0];
        assert_eq!(ali.total, 10.0);
        assert_eq!(ali.clo_scores.get("CLO1"), Some(&100.0));
    }

    #[test]
    fn raw_export_requires_caller_configs() {
        let wb = raw_export();
        let err = ingest_workbook(&wb, meta(), &IngestOptions::default()).unwrap_err();
        assert_eq!(err.code(), "no_assessment_config");
    }

    #[test]
    fn raw_export_end_to_end() {
        let wb = raw_export();
        let opts = IngestOptions {
            configs: Some(export_configs()),
            clo_plo: Some(CloPloMap::from([("CLO1".to_string(), "PLO1".to_string())])),
        };
        let out = ingest_workbook(&wb, meta(), &opts).unwrap();

        assert_eq!(out.shape, SourceShape::RawExport);
        assert_eq!(out.course.code, "BCS1513");
        assert_eq!(out.course.name, "Software Engineering");
        assert_eq!(out.course.semester, "2025/01");
        assert_eq!(out.students.len(), 2);

        let ali = &out.students[0];
        assert_eq!(ali.total, 74.0);
        // CLO2 has no mapping: recorded in the audit, absent from PLO scores.
        assert_eq!(out.audit.unmapped_clos, vec!["CLO2".to_string()]);
        assert_eq!(ali.plo_scores.get("PLO1"), Some(&50.0));
        assert!(!ali.plo_scores.contains_key("PLO2"));
    }

    #[test]
    fn raw_export_with_headerless_sheet_fails_structurally() {
        let wb = Workbook {
            sheets: vec![Sheet {
                name: "dump".into(),
                rows: vec![vec![t("just"), t("noise")]],
            }],
        };
        let opts = IngestOptions {
            configs: Some(export_configs()),
            clo_plo: None,
        };
        let err = ingest_workbook(&wb, meta(), &opts).unwrap_err();
        assert_eq!(err.code(), "missing_header");
    }

    #[test]
    fn structurally_valid_but_empty_is_success() {
        let mut wb = master_template();
        wb.sheets[1].rows.truncate(1);
        let out = ingest_workbook(&wb, meta(), &IngestOptions::default()).unwrap();
        assert!(out.students.is_empty());
        assert_eq!(out.audit.skipped_rows, 0);
    }

    #[test]
    fn inspect_master_template_previews_configs() {
        let report = inspect_workbook(&master_template()).unwrap();
        assert_eq!(report.shape, SourceShape::MasterTemplate);
        assert_eq!(report.configs_preview.len(), 2);
        assert_eq!(report.clo_plo_entries, 2);
        assert!(report.issues.is_empty());
        assert_eq!(report.header_row, Some(0));
    }

    #[test]
    fn inspect_raw_export_lists_candidates() {
        let report = inspect_workbook(&raw_export()).unwrap();
        assert_eq!(report.shape, SourceShape::RawExport);
        assert_eq!(report.header_row, Some(4));
        assert_eq!(
            report.candidate_columns,
            vec!["A1".to_string(), "A2".to_string()]
        );
        assert!(report
            .issues
            .iter()
            .any(|i| i.contains("must be supplied")));
    }
}
