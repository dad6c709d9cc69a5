use std::collections::{BTreeSet, HashMap};

use chrono::{DateTime, Duration, NaiveDate, Utc};
use uuid::Uuid;

use crate::error::RiskError;
use crate::models::{
    AttendanceRecord, AttendanceStatus, ExamResult, RiskAssessment, RiskLevel, StudentSnapshot,
};

pub const FAIL_THRESHOLD: f64 = 40.0;
pub const DEFAULT_ATTENDANCE_WINDOW_DAYS: i64 = 30;
pub const DEFAULT_RESULT_WINDOW_DAYS: i64 = 90;

/// Trailing windows, in calendar days, that decide which records count as recent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RiskWindows {
    attendance_days: i64,
    result_days: i64,
}

impl RiskWindows {
    pub fn new(attendance_days: i64, result_days: i64) -> Result<Self, RiskError> {
        if attendance_days < 1 {
            return Err(RiskError::InvalidWindow {
                name: "attendance",
                days: attendance_days,
            });
        }
        if result_days < 1 {
            return Err(RiskError::InvalidWindow {
                name: "exam result",
                days: result_days,
            });
        }
        Ok(Self {
            attendance_days,
            result_days,
        })
    }

    pub fn attendance_days(&self) -> i64 {
        self.attendance_days
    }

    pub fn result_days(&self) -> i64 {
        self.result_days
    }

    /// Attendance dated on or before this day is too old to count, which keeps
    /// exactly `attendance_days` dates in the window ending today.
    pub fn attendance_cutoff(&self, now: DateTime<Utc>) -> NaiveDate {
        (now - Duration::days(self.attendance_days)).date_naive()
    }

    /// Exams created at or before this instant are too old to count.
    pub fn result_cutoff(&self, now: DateTime<Utc>) -> DateTime<Utc> {
        now - Duration::days(self.result_days)
    }
}

impl Default for RiskWindows {
    fn default() -> Self {
        Self {
            attendance_days: DEFAULT_ATTENDANCE_WINDOW_DAYS,
            result_days: DEFAULT_RESULT_WINDOW_DAYS,
        }
    }
}

impl StudentSnapshot {
    /// Validates the supplied records and keeps those inside the windows ending at `now`.
    pub fn capture(
        student_id: Uuid,
        results: &[ExamResult],
        attendance: &[AttendanceRecord],
        now: DateTime<Utc>,
        windows: &RiskWindows,
    ) -> Result<Self, RiskError> {
        for (index, result) in results.iter().enumerate() {
            let record = format!("exam result #{}", index + 1);
            if result.student_id != student_id {
                return Err(RiskError::ForeignRecord {
                    record,
                    expected: student_id,
                    found: result.student_id,
                });
            }
            if !result.marks_obtained.is_finite() {
                return Err(RiskError::InvalidMarks {
                    record,
                    marks: result.marks_obtained,
                });
            }
        }

        for (index, entry) in attendance.iter().enumerate() {
            if entry.student_id != student_id {
                return Err(RiskError::ForeignRecord {
                    record: format!("attendance record #{}", index + 1),
                    expected: student_id,
                    found: entry.student_id,
                });
            }
        }

        let result_cutoff = windows.result_cutoff(now);
        let recent_results = results
            .iter()
            .filter(|r| r.exam_created_at > result_cutoff && r.exam_created_at <= now)
            .cloned()
            .collect();

        let attendance_cutoff = windows.attendance_cutoff(now);
        let today = now.date_naive();
        let recent_attendance = attendance
            .iter()
            .filter(|a| a.date > attendance_cutoff && a.date <= today)
            .cloned()
            .collect();

        Ok(Self {
            student_id,
            recent_results,
            recent_attendance,
        })
    }
}

pub fn assess_risk(
    student_id: Uuid,
    results: &[ExamResult],
    attendance: &[AttendanceRecord],
    now: DateTime<Utc>,
    windows: &RiskWindows,
) -> Result<RiskAssessment, RiskError> {
    let snapshot = StudentSnapshot::capture(student_id, results, attendance, now, windows)?;
    Ok(assess_snapshot(&snapshot, windows))
}

/// Scores a snapshot that has already been trimmed by [`StudentSnapshot::capture`].
pub fn assess_snapshot(snapshot: &StudentSnapshot, windows: &RiskWindows) -> RiskAssessment {
    let results = &snapshot.recent_results;
    let average_marks = if results.is_empty() {
        0.0
    } else {
        results.iter().map(|r| r.marks_obtained).sum::<f64>() / results.len() as f64
    };
    let failed_subjects = results
        .iter()
        .filter(|r| r.marks_obtained < FAIL_THRESHOLD)
        .count() as u32;

    // One absence per date at most, so the count never exceeds the window.
    let recent_absences = snapshot
        .recent_attendance
        .iter()
        .filter(|a| a.status == AttendanceStatus::Absent)
        .map(|a| a.date)
        .collect::<BTreeSet<NaiveDate>>()
        .len() as u32;
    let window = windows.attendance_days as f64;
    let attendance_rate = 100.0 * (window - recent_absences as f64) / window;

    let score = risk_score(average_marks, failed_subjects, attendance_rate);

    RiskAssessment {
        student_id: snapshot.student_id,
        average_marks: round_2dp(average_marks),
        failed_subjects,
        attendance_rate: round_2dp(attendance_rate),
        recent_absences,
        risk_score: score,
        risk_level: classify(score),
    }
}

/// Assesses every rostered student against the records supplied for the whole group.
/// Records for students outside the roster are ignored.
pub fn assess_cohort(
    students: &[Uuid],
    results: &[ExamResult],
    attendance: &[AttendanceRecord],
    now: DateTime<Utc>,
    windows: &RiskWindows,
) -> Result<Vec<RiskAssessment>, RiskError> {
    let mut results_by_student: HashMap<Uuid, Vec<ExamResult>> = HashMap::new();
    for result in results {
        results_by_student
            .entry(result.student_id)
            .or_default()
            .push(result.clone());
    }

    let mut attendance_by_student: HashMap<Uuid, Vec<AttendanceRecord>> = HashMap::new();
    for entry in attendance {
        attendance_by_student
            .entry(entry.student_id)
            .or_default()
            .push(entry.clone());
    }

    students
        .iter()
        .map(|student_id| {
            let results = results_by_student
                .get(student_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            let attendance = attendance_by_student
                .get(student_id)
                .map(Vec::as_slice)
                .unwrap_or_default();
            assess_risk(*student_id, results, attendance, now, windows)
        })
        .collect()
}

/// Points for a low average: 3 below 45, 2 below 55, 1 below 65.
pub fn performance_points(average_marks: f64) -> u32 {
    match average_marks {
        m if m < 45.0 => 3,
        m if m < 55.0 => 2,
        m if m < 65.0 => 1,
        _ => 0,
    }
}

/// Points for failed subjects: 3 above three, 2 above one, 1 for a single failure.
pub fn failure_points(failed_subjects: u32) -> u32 {
    match failed_subjects {
        0 => 0,
        1 => 1,
        2..=3 => 2,
        _ => 3,
    }
}

/// Points for poor attendance: 3 below 70%, 2 below 80%, 1 below 90%.
pub fn attendance_points(attendance_rate: f64) -> u32 {
    match attendance_rate {
        r if r < 70.0 => 3,
        r if r < 80.0 => 2,
        r if r < 90.0 => 1,
        _ => 0,
    }
}

/// Sum of the three bucket contributions, between 0 and 9.
pub fn risk_score(average_marks: f64, failed_subjects: u32, attendance_rate: f64) -> u32 {
    performance_points(average_marks)
        + failure_points(failed_subjects)
        + attendance_points(attendance_rate)
}

/// High from 6 points, Medium from 3, otherwise Low.
pub fn classify(risk_score: u32) -> RiskLevel {
    match risk_score {
        s if s >= 6 => RiskLevel::High,
        s if s >= 3 => RiskLevel::Medium,
        _ => RiskLevel::Low,
    }
}

/// Drops low-risk students and orders the rest worst first: highest score,
/// then lowest average.
pub fn rank_at_risk(assessments: Vec<RiskAssessment>) -> Vec<RiskAssessment> {
    let mut ranked: Vec<RiskAssessment> = assessments
        .into_iter()
        .filter(|a| a.risk_level != RiskLevel::Low)
        .collect();
    ranked.sort_by(|a, b| {
        b.risk_score
            .cmp(&a.risk_score)
            .then_with(|| a.average_marks.total_cmp(&b.average_marks))
    });
    ranked
}

fn round_2dp(value: f64) -> f64 {
    (value * 100.0).round() / 100.0
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn reference_now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 2, 9, 0, 0).unwrap()
    }

    fn result(student_id: Uuid, marks: f64, days_ago: i64) -> ExamResult {
        ExamResult {
            student_id,
            subject_id: Uuid::new_v4(),
            exam_id: Uuid::new_v4(),
            marks_obtained: marks,
            exam_created_at: reference_now() - Duration::days(days_ago),
        }
    }

    fn absence(student_id: Uuid, days_ago: i64) -> AttendanceRecord {
        AttendanceRecord {
            student_id,
            date: reference_now().date_naive() - Duration::days(days_ago),
            status: AttendanceStatus::Absent,
        }
    }

    fn assessment(score: u32, average: f64) -> RiskAssessment {
        RiskAssessment {
            student_id: Uuid::new_v4(),
            average_marks: average,
            failed_subjects: 0,
            attendance_rate: 100.0,
            recent_absences: 0,
            risk_score: score,
            risk_level: classify(score),
        }
    }

    #[test]
    fn empty_windows_resolve_to_defaults() {
        let student = Uuid::new_v4();
        let out = assess_risk(student, &[], &[], reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.average_marks, 0.0);
        assert_eq!(out.failed_subjects, 0);
        assert_eq!(out.recent_absences, 0);
        assert_eq!(out.attendance_rate, 100.0);
        // A zero average still lands in the worst performance bucket.
        assert_eq!(out.risk_score, 3);
        assert_eq!(out.risk_level, RiskLevel::Medium);
    }

    #[test]
    fn bucket_scenarios() {
        assert_eq!(risk_score(40.0, 4, 65.0), 9);
        assert_eq!(classify(9), RiskLevel::High);

        assert_eq!(risk_score(60.0, 0, 95.0), 1);
        assert_eq!(classify(1), RiskLevel::Low);

        assert_eq!(risk_score(50.0, 2, 85.0), 5);
        assert_eq!(classify(5), RiskLevel::Medium);

        assert_eq!(risk_score(90.0, 0, 100.0), 0);
    }

    #[test]
    fn bucket_edges() {
        assert_eq!(performance_points(44.99), 3);
        assert_eq!(performance_points(45.0), 2);
        assert_eq!(performance_points(55.0), 1);
        assert_eq!(performance_points(65.0), 0);
        assert_eq!(failure_points(1), 1);
        assert_eq!(failure_points(3), 2);
        assert_eq!(failure_points(4), 3);
        assert_eq!(attendance_points(69.99), 3);
        assert_eq!(attendance_points(70.0), 2);
        assert_eq!(attendance_points(80.0), 1);
        assert_eq!(attendance_points(90.0), 0);
        assert_eq!(classify(6), RiskLevel::High);
        assert_eq!(classify(3), RiskLevel::Medium);
        assert_eq!(classify(2), RiskLevel::Low);
    }

    #[test]
    fn struggling_student_scores_high() {
        let student = Uuid::new_v4();
        let results = vec![
            result(student, 30.0, 5),
            result(student, 35.0, 10),
            result(student, 20.0, 20),
            result(student, 38.0, 40),
            result(student, 77.0, 60),
        ];
        let attendance: Vec<AttendanceRecord> = (0..11).map(|d| absence(student, d)).collect();

        let out = assess_risk(student, &results, &attendance, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.average_marks, 40.0);
        assert_eq!(out.failed_subjects, 4);
        assert_eq!(out.recent_absences, 11);
        assert_eq!(out.attendance_rate, 63.33);
        assert_eq!(out.risk_score, 9);
        assert_eq!(out.risk_level, RiskLevel::High);
    }

    #[test]
    fn records_outside_windows_are_ignored() {
        let student = Uuid::new_v4();
        let results = vec![
            result(student, 70.0, 10),
            result(student, 10.0, 90),
            result(student, 10.0, 120),
            result(student, 10.0, -1),
        ];
        let attendance = vec![
            absence(student, 29),
            absence(student, 30),
            absence(student, 31),
            absence(student, -2),
        ];

        let out = assess_risk(student, &results, &attendance, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.average_marks, 70.0);
        assert_eq!(out.failed_subjects, 0);
        assert_eq!(out.recent_absences, 1);
        assert_eq!(out.attendance_rate, 96.67);

        let only_boundary = [absence(student, 30)];
        let out = assess_risk(student, &[], &only_boundary, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.recent_absences, 0);
        assert_eq!(out.attendance_rate, 100.0);
    }

    #[test]
    fn non_absent_statuses_do_not_count() {
        let student = Uuid::new_v4();
        let attendance = [
            AttendanceStatus::Present,
            AttendanceStatus::Late,
            AttendanceStatus::Excused,
        ]
        .into_iter()
        .enumerate()
        .map(|(day, status)| AttendanceRecord {
            student_id: student,
            date: reference_now().date_naive() - Duration::days(day as i64),
            status,
        })
        .collect::<Vec<_>>();

        let out = assess_risk(student, &[], &attendance, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.recent_absences, 0);
        assert_eq!(out.attendance_rate, 100.0);
    }

    #[test]
    fn full_window_of_absences_gives_zero_rate() {
        let student = Uuid::new_v4();
        let attendance: Vec<AttendanceRecord> = (0..=30).map(|d| absence(student, d)).collect();
        let out = assess_risk(student, &[], &attendance, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.recent_absences, 30);
        assert_eq!(out.attendance_rate, 0.0);
        assert_eq!(out.risk_score, 6);
    }

    #[test]
    fn duplicate_absences_on_one_date_count_once() {
        let student = Uuid::new_v4();
        let attendance = vec![absence(student, 1), absence(student, 1), absence(student, 2)];
        let out = assess_risk(student, &[], &attendance, reference_now(), &RiskWindows::default())
            .unwrap();
        assert_eq!(out.recent_absences, 2);
        assert_eq!(out.attendance_rate, 93.33);
    }

    #[test]
    fn identical_inputs_give_identical_output() {
        let student = Uuid::new_v4();
        let results = vec![result(student, 48.5, 3), result(student, 61.25, 12)];
        let attendance = vec![absence(student, 2)];
        let windows = RiskWindows::default();

        let first = assess_risk(student, &results, &attendance, reference_now(), &windows).unwrap();
        let second = assess_risk(student, &results, &attendance, reference_now(), &windows).unwrap();
        assert_eq!(first, second);
        assert_eq!(first.average_marks.to_bits(), second.average_marks.to_bits());
        assert_eq!(first.attendance_rate.to_bits(), second.attendance_rate.to_bits());
    }

    #[test]
    fn rejects_foreign_and_non_finite_records() {
        let student = Uuid::new_v4();
        let other = Uuid::new_v4();
        let windows = RiskWindows::default();

        let err = assess_risk(student, &[result(other, 50.0, 1)], &[], reference_now(), &windows)
            .unwrap_err();
        assert!(matches!(err, RiskError::ForeignRecord { found, .. } if found == other));

        let err = assess_risk(student, &[], &[absence(other, 1)], reference_now(), &windows)
            .unwrap_err();
        assert_eq!(err.record(), Some("attendance record #1"));

        let bad = vec![result(student, 55.0, 1), result(student, f64::NAN, 2)];
        let err = assess_risk(student, &bad, &[], reference_now(), &windows).unwrap_err();
        assert_eq!(err.record(), Some("exam result #2"));
    }

    #[test]
    fn windows_must_be_positive() {
        assert!(RiskWindows::new(0, 90).is_err());
        assert!(RiskWindows::new(30, -1).is_err());
        let windows = RiskWindows::new(14, 60).unwrap();
        assert_eq!(windows.attendance_days(), 14);
        assert_eq!(
            windows.attendance_cutoff(reference_now()),
            reference_now().date_naive() - Duration::days(14)
        );
    }

    #[test]
    fn cohort_assessment_groups_records_per_student() {
        let strong = Uuid::new_v4();
        let weak = Uuid::new_v4();
        let results = vec![
            result(strong, 82.0, 3),
            result(weak, 30.0, 3),
            result(strong, 78.0, 8),
            result(weak, 36.0, 8),
            result(Uuid::new_v4(), 10.0, 8),
        ];
        let attendance = vec![absence(weak, 1), absence(weak, 2), absence(weak, 3), absence(weak, 4)];

        let out = assess_cohort(
            &[strong, weak],
            &results,
            &attendance,
            reference_now(),
            &RiskWindows::default(),
        )
        .unwrap();
        assert_eq!(out.len(), 2);
        assert_eq!(out[0].student_id, strong);
        assert_eq!(out[0].risk_level, RiskLevel::Low);
        assert_eq!(out[1].student_id, weak);
        assert_eq!(out[1].average_marks, 33.0);
        assert_eq!(out[1].failed_subjects, 2);
        assert_eq!(out[1].attendance_rate, 86.67);
        assert_eq!(out[1].risk_score, 6);
    }

    #[test]
    fn ranking_drops_low_and_orders_worst_first() {
        let ranked = rank_at_risk(vec![
            assessment(1, 60.0),
            assessment(5, 50.0),
            assessment(9, 40.0),
            assessment(5, 42.5),
            assessment(0, 90.0),
            assessment(6, 51.0),
        ]);

        assert!(ranked.iter().all(|a| a.risk_level != RiskLevel::Low));
        let order: Vec<(u32, f64)> = ranked
            .iter()
            .map(|a| (a.risk_score, a.average_marks))
            .collect();
        assert_eq!(order, vec![(9, 40.0), (6, 51.0), (5, 42.5), (5, 50.0)]);
    }

    #[test]
    fn ranking_empty_input_is_empty() {
        assert!(rank_at_risk(Vec::new()).is_empty());
        assert!(rank_at_risk(vec![assessment(2, 70.0)]).is_empty());
    }
}
