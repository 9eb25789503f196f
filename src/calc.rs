use std::collections::BTreeMap;

use serde::Serialize;

use crate::config::{AssessmentConfig, CloPloMap};
use crate::grid::{coerce_mark, Cell};

/// Fixed institutional KPI: a CLO/PLO is attained, and a student passes,
/// at 50% or above.
pub const KPI_THRESHOLD: f64 = 50.0;

/// Sentinel bucket for CLO tags with no PLO mapping. Accumulated like any
/// other bucket, then dropped from PLO output.
pub const UNMAPPED: &str = "Unmapped";

/// Two-decimal half-up rounding used for every displayed percentage:
/// `Int(100*x + 0.5) / 100`
pub fn round2(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Weighted attainment accumulator. `earned` is already on the weight
/// scale, so the reduced percentage is `100 * earned / weight`.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct AttainmentBucket {
    pub earned: f64,
    pub weight: f64,
}

impl AttainmentBucket {
    pub fn add(&mut self, earned: f64, weight: f64) {
        self.earned += earned;
        self.weight += weight;
    }

    /// None when no weight landed in the bucket. A zero-weight bucket has
    /// no defined percentage and must stay out of score maps entirely.
    pub fn pct(&self) -> Option<f64> {
        if self.weight > 0.0 {
            Some(100.0 * self.earned / self.weight)
        } else {
            None
        }
    }
}

/// Per-student accumulation state before normalization.
#[derive(Debug, Clone)]
pub struct StudentOutcome {
    pub student_id: String,
    pub student_name: String,
    pub clo_buckets: BTreeMap<String, AttainmentBucket>,
    pub total: f64,
}

#[derive(Debug, Clone, Default)]
pub struct RowAggregation {
    pub outcomes: Vec<StudentOutcome>,
    pub coerced_cells: usize,
    pub skipped_rows: usize,
}

/// Identity guard for a data row. Header echoes, ruler lines and pandas
/// NaN artifacts all show up as short or "nan" ids. Length is counted in
/// characters, not bytes, so non-ASCII ids are judged by what is visible.
fn usable_student_id(id: &str) -> bool {
    id.chars().count() >= 2 && !id.eq_ignore_ascii_case("nan")
}

/// Fold data rows into per-student outcomes.
///
/// Every configured assessment with a resolved column contributes
/// `raw / full_marks * weight_pct` to the running total and to its CLO
/// bucket. Unresolved columns contribute nothing, missing cells count as
/// zero marks, and a config with an empty CLO tag feeds the total only.
/// Rows failing the identity guard are skipped and counted, never fatal.
pub fn aggregate_rows(
    rows: &[Vec<Cell>],
    id_col: usize,
    name_col: usize,
    configs: &[AssessmentConfig],
    columns: &BTreeMap<String, usize>,
) -> RowAggregation {
    let mut agg = RowAggregation::default();

    for row in rows {
        let id = row
            .get(id_col)
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();
        if !usable_student_id(&id) {
            agg.skipped_rows += 1;
            continue;
        }
        let name = row
            .get(name_col)
            .map(|c| c.to_text())
            .unwrap_or_default()
            .trim()
            .to_string();

        let mut outcome = StudentOutcome {
            student_id: id,
            student_name: name,
            clo_buckets: BTreeMap::new(),
            total: 0.0,
        };

        for config in configs {
            let Some(&col) = columns.get(&config.name) else {
                continue;
            };
            let cell = row.get(col).unwrap_or(&Cell::Empty);
            let (raw, flagged) = coerce_mark(cell);
            if flagged {
                agg.coerced_cells += 1;
            }

            let earned = raw / config.full_marks * config.weight_pct;
            outcome.total += earned;
            if !config.clo_tag.is_empty() {
                outcome
                    .clo_buckets
                    .entry(config.clo_tag.clone())
                    .or_default()
                    .add(earned, config.weight_pct);
            }
        }

        agg.outcomes.push(outcome);
    }
    agg
}

/// Roll CLO buckets up to PLO buckets through the mapping. Tags without a
/// mapping land in [`UNMAPPED`], which is removed from the result; the
/// returned list names those tags for the ingest audit.
pub fn map_to_plo(
    clo_buckets: &BTreeMap<String, AttainmentBucket>,
    mapping: &CloPloMap,
) -> (BTreeMap<String, AttainmentBucket>, Vec<String>) {
    let mut plo_buckets: BTreeMap<String, AttainmentBucket> = BTreeMap::new();
    let mut unmapped = Vec::new();

    for (tag, bucket) in clo_buckets {
        let plo = match mapping.get(tag) {
            Some(p) => p.clone(),
            None => {
                unmapped.push(tag.clone());
                UNMAPPED.to_string()
            }
        };
        plo_buckets
            .entry(plo)
            .or_default()
            .add(bucket.earned, bucket.weight);
    }

    plo_buckets.remove(UNMAPPED);
    (plo_buckets, unmapped)
}

/// Reduce buckets to a tag -> percent map, dropping weightless buckets.
pub fn normalize_buckets(buckets: &BTreeMap<String, AttainmentBucket>) -> BTreeMap<String, f64> {
    buckets
        .iter()
        .filter_map(|(tag, b)| b.pct().map(|p| (tag.clone(), round2(p))))
        .collect()
}

const GRADE_BANDS: &[(f64, &str, f64)] = &[
    (90.0, "A+", 4.00),
    (80.0, "A", 4.00),
    (75.0, "A-", 3.67),
    (70.0, "B+", 3.33),
    (65.0, "B", 3.00),
    (60.0, "B-", 2.67),
    (55.0, "C+", 2.33),
    (50.0, "C", 2.00),
    (45.0, "C-", 1.67),
    (40.0, "D+", 1.33),
    (35.0, "D", 1.00),
];

/// Letter grade and grade point for a final mark. Lower-bound bands on the
/// 0-100 scale; out-of-range totals are clamped before banding.
pub fn grade_for(total: f64) -> (&'static str, f64) {
    let t = total.clamp(0.0, 100.0);
    for (floor, grade, points) in GRADE_BANDS {
        if t >= *floor {
            return (grade, *points);
        }
    }
    ("F", 0.0)
}

/// The engine's student-facing output record for one course.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct StudentRecord {
    pub student_id: String,
    pub student_name: String,
    pub clo_scores: BTreeMap<String, f64>,
    pub plo_scores: BTreeMap<String, f64>,
    pub total: f64,
    pub grade: String,
    pub grade_point: f64,
}

/// Normalize one outcome into its output record. The grade is banded from
/// the rounded total so the letter always agrees with the displayed mark.
pub fn build_student_record(
    outcome: &StudentOutcome,
    mapping: &CloPloMap,
) -> (StudentRecord, Vec<String>) {
    let (plo_buckets, unmapped) = map_to_plo(&outcome.clo_buckets, mapping);
    let total = round2(outcome.total);
    let (grade, grade_point) = grade_for(total);

    let record = StudentRecord {
        student_id: outcome.student_id.clone(),
        student_name: outcome.student_name.clone(),
        clo_scores: normalize_buckets(&outcome.clo_buckets),
        plo_scores: normalize_buckets(&plo_buckets),
        total,
        grade: grade.to_string(),
        grade_point,
    };
    (record, unmapped)
}

/// One CLO or PLO analysis line: mean and pass rate over the students that
/// carry the tag. Students without the tag are excluded, not zeroed.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct AttainmentRow {
    pub tag: String,
    pub average_pct: f64,
    pub pass_rate_pct: f64,
    pub student_count: usize,
    pub achieved: bool,
    pub cqi_required: bool,
}

pub fn attainment_rows<'a, I>(score_maps: I) -> Vec<AttainmentRow>
where
    I: IntoIterator<Item = &'a BTreeMap<String, f64>>,
{
    let mut acc: BTreeMap<String, (f64, usize, usize)> = BTreeMap::new();
    for map in score_maps {
        for (tag, score) in map {
            let entry = acc.entry(tag.clone()).or_insert((0.0, 0, 0));
            entry.0 += score;
            entry.1 += 1;
            if *score >= KPI_THRESHOLD {
                entry.2 += 1;
            }
        }
    }

    acc.into_iter()
        .map(|(tag, (sum, count, passed))| {
            let average_pct = round2(sum / count as f64);
            let achieved = average_pct >= KPI_THRESHOLD;
            AttainmentRow {
                tag,
                average_pct,
                pass_rate_pct: round2(100.0 * passed as f64 / count as f64),
                student_count: count,
                achieved,
                cqi_required: !achieved,
            }
        })
        .collect()
}

#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CourseStats {
    pub student_count: usize,
    pub pass_rate_pct: f64,
    pub average_gpa: f64,
    pub average_total: f64,
}

pub fn course_stats(records: &[StudentRecord]) -> CourseStats {
    let count = records.len();
    if count == 0 {
        return CourseStats {
            student_count: 0,
            pass_rate_pct: 0.0,
            average_gpa: 0.0,
            average_total: 0.0,
        };
    }

    let passed = records
        .iter()
        .filter(|r| r.total >= KPI_THRESHOLD)
        .count();
    let gpa_sum: f64 = records.iter().map(|r| r.grade_point).sum();
    let total_sum: f64 = records.iter().map(|r| r.total).sum();

    CourseStats {
        student_count: count,
        pass_rate_pct: round2(100.0 * passed as f64 / count as f64),
        average_gpa: round2(gpa_sum / count as f64),
        average_total: round2(total_sum / count as f64),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn cfg(name: &str, weight: f64, full: f64, clo: &str) -> AssessmentConfig {
        AssessmentConfig {
            name: name.into(),
            weight_pct: weight,
            full_marks: full,
            clo_tag: clo.into(),
            category: None,
        }
    }

    fn worked_example() -> (Vec<AssessmentConfig>, BTreeMap<String, usize>) {
        let configs = vec![cfg("A1", 40.0, 50.0, "CLO1"), cfg("A2", 60.0, 100.0, "CLO1")];
        let columns = BTreeMap::from([("A1".to_string(), 2), ("A2".to_string(), 3)]);
        (configs, columns)
    }

    #[test]
    fn weighted_accumulation_matches_hand_calculation() {
        let (configs, columns) = worked_example();
        let rows = vec![vec![
            Cell::Text("S001".into()),
            Cell::Text("Ali".into()),
            Cell::Number(25.0),
            Cell::Number(90.0),
        ]];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        assert_eq!(agg.outcomes.len(), 1);
        assert_eq!(agg.coerced_cells, 0);
        assert_eq!(agg.skipped_rows, 0);

        let (record, unmapped) = build_student_record(&agg.outcomes[0], &CloPloMap::new());
        assert_eq!(record.total, 74.0);
        assert_eq!(record.clo_scores.get("CLO1"), Some(&74.0));
        assert_eq!(record.grade, "B+");
        assert_eq!(unmapped, vec!["CLO1".to_string()]);
        assert!(record.plo_scores.is_empty());
    }

    #[test]
    fn unparsable_mark_scores_zero_and_is_counted() {
        let (configs, columns) = worked_example();
        let rows = vec![vec![
            Cell::Text("S002".into()),
            Cell::Text("Siti".into()),
            Cell::Text("absent".into()),
            Cell::Number(90.0),
        ]];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        assert_eq!(agg.coerced_cells, 1);

        let (record, _) = build_student_record(&agg.outcomes[0], &CloPloMap::new());
        assert_eq!(record.total, 54.0);
        assert_eq!(record.clo_scores.get("CLO1"), Some(&54.0));
    }

    #[test]
    fn junk_identity_rows_are_skipped_and_counted() {
        let (configs, columns) = worked_example();
        let rows = vec![
            vec![Cell::Text("nan".into()), Cell::Text("x".into())],
            vec![Cell::Text("7".into()), Cell::Text("short id".into())],
            vec![Cell::Empty, Cell::Text("no id".into())],
            vec![
                Cell::Text("S003".into()),
                Cell::Text("Chong".into()),
                Cell::Number(50.0),
                Cell::Number(100.0),
            ],
        ];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        assert_eq!(agg.skipped_rows, 3);
        assert_eq!(agg.outcomes.len(), 1);
        assert_eq!(agg.outcomes[0].student_id, "S003");
    }

    #[test]
    fn identity_guard_counts_characters_not_bytes() {
        // "é" is two bytes but one character; it must still be skipped.
        assert!(!usable_student_id("é"));
        assert!(usable_student_id("éé"));
        assert!(usable_student_id("张伟"));
        assert!(!usable_student_id("7"));
        assert!(!usable_student_id("NaN"));
    }

    #[test]
    fn zero_weight_clo_is_absent_not_zero() {
        let configs = vec![cfg("A1", 40.0, 50.0, "CLO1"), cfg("Survey", 0.0, 10.0, "CLO9")];
        let columns = BTreeMap::from([("A1".to_string(), 2), ("Survey".to_string(), 3)]);
        let rows = vec![vec![
            Cell::Text("S001".into()),
            Cell::Text("Ali".into()),
            Cell::Number(50.0),
            Cell::Number(10.0),
        ]];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        let (record, _) = build_student_record(&agg.outcomes[0], &CloPloMap::new());
        assert!(record.clo_scores.contains_key("CLO1"));
        assert!(!record.clo_scores.contains_key("CLO9"));
    }

    #[test]
    fn untagged_config_feeds_total_only() {
        let configs = vec![cfg("A1", 40.0, 50.0, "CLO1"), cfg("Attendance", 10.0, 10.0, "")];
        let columns = BTreeMap::from([("A1".to_string(), 2), ("Attendance".to_string(), 3)]);
        let rows = vec![vec![
            Cell::Text("S001".into()),
            Cell::Text("Ali".into()),
            Cell::Number(25.0),
            Cell::Number(10.0),
        ]];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        let (record, _) = build_student_record(&agg.outcomes[0], &CloPloMap::new());
        assert_eq!(record.total, 30.0);
        assert_eq!(record.clo_scores.len(), 1);
        assert_eq!(record.clo_scores.get("CLO1"), Some(&50.0));
    }

    #[test]
    fn unresolved_column_contributes_nothing() {
        let (configs, _) = worked_example();
        let columns = BTreeMap::from([("A2".to_string(), 3)]);
        let rows = vec![vec![
            Cell::Text("S001".into()),
            Cell::Text("Ali".into()),
            Cell::Number(25.0),
            Cell::Number(90.0),
        ]];

        let agg = aggregate_rows(&rows, 0, 1, &configs, &columns);
        let (record, _) = build_student_record(&agg.outcomes[0], &CloPloMap::new());
        // A1 is unresolved: neither its earned marks nor its weight count.
        assert_eq!(record.total, 54.0);
        assert_eq!(record.clo_scores.get("CLO1"), Some(&90.0));
    }

    #[test]
    fn plo_rollup_drops_unmapped_and_reports_tags() {
        let mut clo_buckets: BTreeMap<String, AttainmentBucket> = BTreeMap::new();
        clo_buckets.insert(
            "CLO1".into(),
            AttainmentBucket {
                earned: 30.0,
                weight: 40.0,
            },
        );
        clo_buckets.insert(
            "CLO2".into(),
            AttainmentBucket {
                earned: 45.0,
                weight: 60.0,
            },
        );
        clo_buckets.insert(
            "CLO9".into(),
            AttainmentBucket {
                earned: 5.0,
                weight: 10.0,
            },
        );

        let mapping = CloPloMap::from([
            ("CLO1".to_string(), "PLO1".to_string()),
            ("CLO2".to_string(), "PLO1".to_string()),
        ]);

        let (plo, unmapped) = map_to_plo(&clo_buckets, &mapping);
        assert_eq!(unmapped, vec!["CLO9".to_string()]);
        assert_eq!(plo.len(), 1);
        let p1 = plo.get("PLO1").unwrap();
        assert_eq!(p1.earned, 75.0);
        assert_eq!(p1.weight, 100.0);
        assert_eq!(normalize_buckets(&plo).get("PLO1"), Some(&75.0));
    }

    #[test]
    fn grade_bands_at_boundaries() {
        assert_eq!(grade_for(90.0).0, "A+");
        assert_eq!(grade_for(89.99).0, "A");
        assert_eq!(grade_for(80.0).0, "A");
        assert_eq!(grade_for(74.0).0, "B+");
        assert_eq!(grade_for(50.0).0, "C");
        assert_eq!(grade_for(49.99).0, "C-");
        assert_eq!(grade_for(35.0).0, "D");
        assert_eq!(grade_for(34.99).0, "F");
        assert_eq!(grade_for(120.0).0, "A+");
        assert_eq!(grade_for(-5.0).0, "F");
    }

    #[test]
    fn attainment_rows_exclude_students_without_the_tag() {
        let a = BTreeMap::from([("CLO1".to_string(), 74.0), ("CLO2".to_string(), 40.0)]);
        let b = BTreeMap::from([("CLO1".to_string(), 26.0)]);
        let rows = attainment_rows([&a, &b]);

        assert_eq!(rows.len(), 2);
        let clo1 = &rows[0];
        assert_eq!(clo1.tag, "CLO1");
        assert_eq!(clo1.average_pct, 50.0);
        assert_eq!(clo1.pass_rate_pct, 50.0);
        assert_eq!(clo1.student_count, 2);
        assert!(clo1.achieved);
        assert!(!clo1.cqi_required);

        let clo2 = &rows[1];
        assert_eq!(clo2.tag, "CLO2");
        assert_eq!(clo2.average_pct, 40.0);
        assert_eq!(clo2.student_count, 1);
        assert!(clo2.cqi_required);
    }

    #[test]
    fn course_stats_mean_gpa_and_pass_rate() {
        let outcomes = [
            ("S001", 74.0),
            ("S002", 54.0),
            ("S003", 30.0),
        ];
        let records: Vec<StudentRecord> = outcomes
            .iter()
            .map(|(id, total)| {
                let (grade, grade_point) = grade_for(*total);
                StudentRecord {
                    student_id: id.to_string(),
                    student_name: String::new(),
                    clo_scores: BTreeMap::new(),
                    plo_scores: BTreeMap::new(),
                    total: *total,
                    grade: grade.to_string(),
                    grade_point,
                }
            })
            .collect();

        let stats = course_stats(&records);
        assert_eq!(stats.student_count, 3);
        assert_eq!(stats.pass_rate_pct, 66.67);
        // B+ (3.33) + C (2.00) + F (0.00) over 3.
        assert_eq!(stats.average_gpa, 1.78);
        assert_eq!(stats.average_total, 52.67);
    }

    #[test]
    fn round2_half_up() {
        assert_eq!(round2(74.004), 74.0);
        // 0.125 and 2.375 are exact in binary, so the .5 boundary is real.
        assert_eq!(round2(0.125), 0.13);
        assert_eq!(round2(2.375), 2.38);
        assert_eq!(round2(66.666_666), 66.67);
    }
}
