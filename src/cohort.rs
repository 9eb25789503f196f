use std::collections::BTreeMap;

use chrono::Utc;
use serde::Serialize;
use uuid::Uuid;

use crate::calc::{attainment_rows, round2, AttainmentRow};
use crate::ingest::CourseIngest;

/// One ingested course held in the session, addressable by handle.
#[derive(Debug, Clone)]
pub struct SessionCourse {
    pub course_id: String,
    pub ingested_at: String,
    pub ingest: CourseIngest,
}

/// In-memory session: the engine's only state. Courses live here from
/// ingest until `reset`; nothing is persisted across processes.
#[derive(Debug, Default)]
pub struct Session {
    pub courses: Vec<SessionCourse>,
}

impl Session {
    pub fn add(&mut self, ingest: CourseIngest) -> String {
        let course_id = Uuid::new_v4().to_string();
        self.courses.push(SessionCourse {
            course_id: course_id.clone(),
            ingested_at: Utc::now().to_rfc3339(),
            ingest,
        });
        course_id
    }

    pub fn find(&self, course_id: &str) -> Option<&SessionCourse> {
        self.courses.iter().find(|c| c.course_id == course_id)
    }

    pub fn reset(&mut self) -> usize {
        let removed = self.courses.len();
        self.courses.clear();
        removed
    }
}

/// One (student, course) pair in the programme dataset. Kept even when
/// `plo_scores` is empty so enrolment is never silently lost.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CohortRecord {
    pub student_id: String,
    pub student_name: String,
    pub course_id: String,
    pub course_code: String,
    pub course_name: String,
    pub semester: String,
    pub plo_scores: BTreeMap<String, f64>,
}

/// Merge is concatenation in session order. All cohort statistics are
/// means over unordered records, so the dataset's content is independent
/// of ingestion order and of how courses were batched.
pub fn cohort_dataset(courses: &[SessionCourse]) -> Vec<CohortRecord> {
    let mut records = Vec::new();
    for course in courses {
        for student in &course.ingest.students {
            records.push(CohortRecord {
                student_id: student.student_id.clone(),
                student_name: student.student_name.clone(),
                course_id: course.course_id.clone(),
                course_code: course.ingest.course.code.clone(),
                course_name: course.ingest.course.name.clone(),
                semester: course.ingest.course.semester.clone(),
                plo_scores: student.plo_scores.clone(),
            });
        }
    }
    records
}

/// Per-PLO mean and pass rate across the records that carry the PLO.
/// Records without a given PLO are excluded from its statistics entirely.
pub fn plo_averages(records: &[CohortRecord]) -> Vec<AttainmentRow> {
    attainment_rows(records.iter().map(|r| &r.plo_scores))
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentScorecard {
    pub student_id: String,
    pub student_name: String,
    pub course_count: usize,
    pub plo_means: BTreeMap<String, f64>,
    pub courses: Vec<CohortRecord>,
}

fn scorecard_from_records(student_id: &str, records: Vec<CohortRecord>) -> StudentScorecard {
    let mut sums: BTreeMap<String, (f64, usize)> = BTreeMap::new();
    for record in &records {
        for (plo, score) in &record.plo_scores {
            let entry = sums.entry(plo.clone()).or_insert((0.0, 0));
            entry.0 += score;
            entry.1 += 1;
        }
    }
    let plo_means = sums
        .into_iter()
        .map(|(plo, (sum, count))| (plo, round2(sum / count as f64)))
        .collect();

    StudentScorecard {
        student_id: student_id.to_string(),
        student_name: records
            .first()
            .map(|r| r.student_name.clone())
            .unwrap_or_default(),
        course_count: records.len(),
        plo_means,
        courses: records,
    }
}

pub fn student_scorecard(records: &[CohortRecord], student_id: &str) -> Option<StudentScorecard> {
    let mine: Vec<CohortRecord> = records
        .iter()
        .filter(|r| r.student_id == student_id)
        .cloned()
        .collect();
    if mine.is_empty() {
        return None;
    }
    Some(scorecard_from_records(student_id, mine))
}

/// Every student's scorecard, ordered by student id for stable output.
pub fn all_scorecards(records: &[CohortRecord]) -> Vec<StudentScorecard> {
    let mut grouped: BTreeMap<String, Vec<CohortRecord>> = BTreeMap::new();
    for record in records {
        grouped
            .entry(record.student_id.clone())
            .or_default()
            .push(record.clone());
    }
    grouped
        .into_iter()
        .map(|(id, recs)| scorecard_from_records(&id, recs))
        .collect()
}
