use serde_json::json;

use crate::calc::{attainment_rows, course_stats};
use crate::cohort::SessionCourse;
use crate::ipc::error::{err, ok};
use crate::ipc::helpers::required_str;
use crate::ipc::types::{AppState, Request};
use crate::report;

fn find_course<'a>(
    state: &'a AppState,
    req: &Request,
) -> Result<&'a SessionCourse, serde_json::Value> {
    let course_id = required_str(req, "courseId")?;
    state
        .session
        .find(&course_id)
        .ok_or_else(|| err(&req.id, "not_found", format!("no course {course_id}"), None))
}

fn handle_list(state: &mut AppState, req: &Request) -> serde_json::Value {
    let courses: Vec<serde_json::Value> = state
        .session
        .courses
        .iter()
        .map(|c| {
            json!({
                "courseId": c.course_id,
                "courseCode": c.ingest.course.code,
                "courseName": c.ingest.course.name,
                "semester": c.ingest.course.semester,
                "lecturer": c.ingest.course.lecturer,
                "shape": c.ingest.shape,
                "studentCount": c.ingest.students.len(),
                "fileName": c.ingest.file_name,
                "ingestedAt": c.ingested_at,
            })
        })
        .collect();
    ok(&req.id, json!({ "courses": courses }))
}

fn handle_results(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course = match find_course(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    let stats = course_stats(&course.ingest.students);
    let clo_analysis = attainment_rows(course.ingest.students.iter().map(|s| &s.clo_scores));
    let plo_analysis = attainment_rows(course.ingest.students.iter().map(|s| &s.plo_scores));

    ok(
        &req.id,
        json!({
            "courseId": course.course_id,
            "course": course.ingest.course,
            "configs": course.ingest.configs,
            "cloPloMap": course.ingest.clo_plo,
            "students": course.ingest.students,
            "cloAnalysis": clo_analysis,
            "ploAnalysis": plo_analysis,
            "stats": stats,
            "audit": course.ingest.audit,
        }),
    )
}

fn handle_evidence_model(state: &mut AppState, req: &Request) -> serde_json::Value {
    let course = match find_course(state, req) {
        Ok(c) => c,
        Err(resp) => return resp,
    };
    ok(&req.id, json!(report::evidence_model(&course.ingest)))
}

pub fn try_handle(state: &mut AppState, req: &Request) -> Option<serde_json::Value> {
    match req.method.as_str() {
        "courses.list" => Some(handle_list(state, req)),
        "course.results" => Some(handle_results(state, req)),
        "course.evidenceModel" => Some(handle_evidence_model(state, req)),
        _ => None,
    }
}
