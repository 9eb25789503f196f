use std::path::PathBuf;

use serde_json::json;

use crate::grid::Workbook;
use crate::ingest::{self, IngestOptions, SourceMeta};
use crate::ipc::error::{ingest_err, ok};
use crate::ipc::helpers::{parse_ingest_options, required_str, workbook_param};
use crate::ipc::types::{AppState, Request};
use crate::load;

fn ingest_into_session(
    state: &mut AppState,
    req: &Request,
    wb: &Workbook,
    file_name: String,
    sha256: String,
    opts: &IngestOptions,
) -> serde_json::Value {
    let meta = SourceMeta { file_name, sha256 };
    match ingest::ingest_workbook(wb, meta, opts) {
        Ok(course) => {
            let note = if course.students.is_empty() {
                Some("no student data")
            } else {
                None
            };
            let student_count = course.students.len();
            let shape = course.shape;
            let info = course.course.clone();
            let audit = course.audit.clone();
            let file_name = course.file_name.clone();
            let sha256 = course.sha256.clone();
            let course_id = state.session.add(course);
            ok(
                &req.id,
                json!({
                    "courseId": course_id,
                    "course": info,
                    "shape": shape,
                    "fileName": file_name,
                    "sha256": sha256,
                    "studentCount": student_count,
                    "note": note,
                    "audit": audit,
                }),
            )
        }
        Err(e) => ingest_err(&req.id, &e),
    }
}

fn handle_ingest_file(state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let opts = match parse_ingest_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let loaded = match load::load_workbook(&PathBuf::from(&path)) {
        Ok(v) => v,
        Err(e) => return ingest_err(&req.id, &e),
    };
    ingest_into_session(
        state,
        req,
        &loaded.workbook,
        loaded.file_name,
        loaded.sha256,
        &opts,
    )
}

fn handle_ingest_workbook(state: &mut AppState, req: &Request) -> serde_json::Value {
    let (wb, file_name, sha256) = match workbook_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let opts = match parse_ingest_options(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    ingest_into_session(state, req, &wb, file_name, sha256, &opts)
}

fn handle_inspect_file(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let path = match required_str(req, "path") {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    let loaded = match load::load_workbook(&PathBuf::from(&path)) {
        Ok(v) => v,
        Err(e) => return ingest_err(&req.id, &e),
    };
    match ingest::inspect_workbook(&loaded.workbook) {
        Ok(report) => ok(
            &req.id,
            json!({
                "fileName": loaded.file_name,
                "sha256": loaded.sha256,
                "report": report,
            }),
        ),
        Err(e) => ingest_err(&req.id, &e),
    }
}

fn handle_inspect_workbook(_state: &mut AppState, req: &Request) -> serde_json::Value {
    let (wb, file_name, sha256) = match workbook_param(req) {
        Ok(v) => v,
        Err(resp) => return resp,
    };
    match ingest::inspect_workbook(&wb) {
        Ok(report) => ok(
            &req.id,
            json!({
                "fileName": file_name,
                "sha256": sha256,
                "report": report,
            }),
        ),
        Err(e) => ingest_err(&req.id, &e),
    }
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "course.ingestFile" => Some(handle_ingest_file(state, req)),
        "course.ingestWorkbook" => Some(handle_ingest_workbook(state, req)),
        "course.inspectFile" => Some(handle_inspect_file(state, req)),
        "course.inspectWorkbook" => Some(handle_inspect_workbook(state, req)),
        _ => None,
    }
}
