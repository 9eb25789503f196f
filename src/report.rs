use std::collections::BTreeSet;

use chrono::Utc;
use serde::Serialize;
use serde_json::{json, Value};

use crate::calc::{attainment_rows, course_stats, AttainmentRow, CourseStats};
use crate::config::CourseInfo;
use crate::ingest::CourseIngest;

/// A logical sheet of the evidence workbook. The engine emits the model
/// only; writing a physical file is the shell's job.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceSheet {
    pub name: String,
    pub columns: Vec<String>,
    pub rows: Vec<Vec<Value>>,
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct EvidenceModel {
    pub generated_at: String,
    pub course: CourseInfo,
    pub stats: CourseStats,
    pub clo_analysis: Vec<AttainmentRow>,
    pub plo_analysis: Vec<AttainmentRow>,
    pub sheets: Vec<EvidenceSheet>,
}

fn status_text(row: &AttainmentRow) -> &'static str {
    if row.achieved {
        "Achieved"
    } else {
        "CQI Required"
    }
}

fn analysis_sheet(name: &str, tag_column: &str, rows: &[AttainmentRow]) -> EvidenceSheet {
    EvidenceSheet {
        name: name.to_string(),
        columns: vec![
            tag_column.to_string(),
            "Average (%)".to_string(),
            "Pass Rate (%)".to_string(),
            "Students Assessed".to_string(),
            "Status".to_string(),
        ],
        rows: rows
            .iter()
            .map(|r| {
                vec![
                    json!(r.tag),
                    json!(r.average_pct),
                    json!(r.pass_rate_pct),
                    json!(r.student_count),
                    json!(status_text(r)),
                ]
            })
            .collect(),
    }
}

/// Assemble the audit-evidence workbook model for one course: Setup,
/// marks table, CLO/PLO analysis, and the CRR summary rows.
pub fn evidence_model(ingest: &CourseIngest) -> EvidenceModel {
    let stats = course_stats(&ingest.students);
    let clo_analysis = attainment_rows(ingest.students.iter().map(|s| &s.clo_scores));
    let plo_analysis = attainment_rows(ingest.students.iter().map(|s| &s.plo_scores));

    let setup = EvidenceSheet {
        name: "Setup".to_string(),
        columns: vec!["Field".to_string(), "Value".to_string()],
        rows: vec![
            vec![json!("Course Name"), json!(ingest.course.name)],
            vec![json!("Course Code"), json!(ingest.course.code)],
            vec![json!("Semester"), json!(ingest.course.semester)],
            vec![json!("Lecturer Name"), json!(ingest.course.lecturer)],
        ],
    };

    let clo_tags: BTreeSet<String> = ingest
        .students
        .iter()
        .flat_map(|s| s.clo_scores.keys().cloned())
        .collect();
    let mut marks_columns = vec!["Student ID".to_string(), "Student Name".to_string()];
    marks_columns.extend(clo_tags.iter().cloned());
    marks_columns.push("Total".to_string());
    marks_columns.push("Grade".to_string());

    let marks_rows = ingest
        .students
        .iter()
        .map(|s| {
            let mut row = vec![json!(s.student_id), json!(s.student_name)];
            for tag in &clo_tags {
                // A CLO the student has no weighted marks for stays blank.
                row.push(match s.clo_scores.get(tag) {
                    Some(score) => json!(score),
                    None => Value::Null,
                });
            }
            row.push(json!(s.total));
            row.push(json!(s.grade));
            row
        })
        .collect();
    let marks = EvidenceSheet {
        name: "Table 1 - Marks".to_string(),
        columns: marks_columns,
        rows: marks_rows,
    };

    let mut crr_rows: Vec<Vec<Value>> = vec![
        vec![json!("1. COURSE PERFORMANCE"), json!(""), json!("")],
        vec![
            json!("Pass Rate"),
            json!(""),
            json!(format!("{:.2}%", stats.pass_rate_pct)),
        ],
        vec![
            json!("Average GPA"),
            json!(""),
            json!(format!("{:.2}", stats.average_gpa)),
        ],
        vec![json!("2. CLO ATTAINMENT"), json!(""), json!("")],
    ];
    for row in &clo_analysis {
        crr_rows.push(vec![
            json!(row.tag),
            json!("Attainment %"),
            json!(format!("{:.2}", row.average_pct)),
        ]);
        if row.cqi_required {
            crr_rows.push(vec![
                json!(row.tag),
                json!("Remark"),
                json!("Below 50% KPI, CQI action required"),
            ]);
        }
    }
    crr_rows.push(vec![json!("3. DATA QUALITY"), json!(""), json!("")]);
    crr_rows.push(vec![
        json!("Source File"),
        json!(""),
        json!(ingest.file_name),
    ]);
    crr_rows.push(vec![json!("SHA-256"), json!(""), json!(ingest.sha256)]);
    crr_rows.push(vec![
        json!("Coerced Cells"),
        json!(""),
        json!(ingest.audit.coerced_cells.to_string()),
    ]);
    crr_rows.push(vec![
        json!("Skipped Rows"),
        json!(""),
        json!(ingest.audit.skipped_rows.to_string()),
    ]);
    crr_rows.push(vec![
        json!("Unmapped CLOs"),
        json!(""),
        json!(if ingest.audit.unmapped_clos.is_empty() {
            "None".to_string()
        } else {
            ingest.audit.unmapped_clos.join(", ")
        }),
    ]);
    let crr = EvidenceSheet {
        name: "CRR (Audit Report)".to_string(),
        columns: vec![
            "Section".to_string(),
            "Detail".to_string(),
            "Value".to_string(),
        ],
        rows: crr_rows,
    };

    let sheets = vec![
        setup,
        marks,
        analysis_sheet("Table 2 - CLO Analysis", "CLO", &clo_analysis),
        analysis_sheet("Table 3 - PLO Analysis", "PLO", &plo_analysis),
        crr,
    ];

    EvidenceModel {
        generated_at: Utc::now().to_rfc3339(),
        course: ingest.course.clone(),
        stats,
        clo_analysis,
        plo_analysis,
        sheets,
    }
}
