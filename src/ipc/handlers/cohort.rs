use std::path::PathBuf;

use serde_json::json;
use tracing::warn;

use crate::cohort::{all_scorecards, cohort_dataset, plo_averages, student_scorecard};
use crate::ingest::{self, SourceMeta};
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::parse_ingest_options;
use crate::ipc::types::{AppState, Request};
use crate::load;

/// Batch ingest. Optional shared `configs` / `cloPloMap` apply to every
/// file in the batch; per-file failures are reported in the outcome list
/// and never abort the remaining files.
fn handle_ingest_files(state: &mut AppState, req: &Request) -> serde_json::Value {
    let Some(raw_paths) = req.params.get("paths").and_then(|v| v.as_array()) else {
        return err(&req.id, "bad_params", "missing params.paths", None);
    };
    let paths: Vec<String> = raw_paths
        .iter()
        .filter_map(|p| p.as_str().map(|s| s.to_string()))
        .collect();
    if paths.is_empty() {
        return err(&req.id, "bad_params", "params.paths is empty", None);
    }

    let opts = match parse_ingest_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };

    let mut outcomes = Vec::with_capacity(paths.len());
    let mut ok_count = 0usize;
    for path in &paths {
        let result = load::load_workbook(&PathBuf::from(path)).and_then(|loaded| {
            let meta = SourceMeta {
                file_name: loaded.file_name.clone(),
                sha256: loaded.sha256.clone(),
            };
            ingest::ingest_workbook(&loaded.workbook, meta, &opts)
        });
        let outcome = match result {
            Ok(course) => {
                ok_count += 1;
                let student_count = course.students.len();
                let note = if student_count == 0 {
                    Some("no student data")
                } else {
                    None
                };
                let course_code = course.course.code.clone();
                let course_id = state.session.add(course);
                json!({
                    "file": path,
                    "status": "ok",
                    "courseId": course_id,
                    "courseCode": course_code,
                    "studentCount": student_count,
                    "note": note,
                })
            }
            Err(e) => {
                warn!(file = %path, code = e.code(), "skipping file: {e}");
                json!({
                    "file": path,
                    "status": "failed",
                    "error": { "code": e.code(), "message": e.to_string() },
                })
            }
        };
        outcomes.push(outcome);
    }

    ok(
        &req.id,
        json!({
            "requested": paths.len(),
            "okCount": ok_count,
            "failedCount": paths.len() - ok_count,
            "outcomes": outcomes,
        }),
    )
}

fn handle_dataset(state: &mut AppState, req: &Request) -> serde_json::Value {
    let records = cohort_dataset(&state.session.courses);
    ok(
        &req.id,
        json!({
            "courseCount": state.session.courses.len(),
            "recordCount": records.len(),
            "records": records,
        }),
    )
}

fn handle_summary(state: &mut AppState, req: &Request) -> serde_json::Value {
    let records = cohort_dataset(&state.session.courses);
    let averages = plo_averages(&records);

    let student_id = req.params.get("studentId").and_then(|v| v.as_str());
    let scorecards = match student_id {
        Some(id) => match student_scorecard(&records, id) {
            Some(card) => vec![card],
            None => {
                return err(&req.id, "not_found", format!("no student {id}"), None);
            }
        },
        None => all_scorecards(&records),
    };

    ok(
        &req.id,
        json!({
            "courseCount": state.session.courses.len(),
            "recordCount": records.len(),
            "ploAverages": averages,
            "scorecards": scorecards,
        }),
    )
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "cohort.ingestFiles" => Some(handle_ingest_files(state, req)),
        "cohort.dataset" => Some(handle_dataset(state, req)),
        "cohort.summary" => Some(handle_summary(state, req)),
        _ => None,
    }
}
