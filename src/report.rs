use std::collections::{BTreeMap, HashMap};
use std::fmt::Write;

use chrono::{DateTime, NaiveDate, Utc};
use uuid::Uuid;

use crate::grading;
use crate::models::{
    AttendanceRecord, AttendanceStatus, AttendanceTrend, ExamInfo, ExamResult, RiskAssessment,
    StudentProfile, StudentTrendPoint, SubjectPerformance,
};

/// Per-subject spread of marks, weakest subject first.
pub fn subject_performance(
    results: &[ExamResult],
    subject_names: &HashMap<Uuid, String>,
) -> Vec<SubjectPerformance> {
    let mut map: HashMap<Uuid, (usize, f64, f64, f64)> = HashMap::new();

    for result in results {
        let marks = result.marks_obtained;
        let entry = map
            .entry(result.subject_id)
            .or_insert((0, 0.0, f64::MIN, f64::MAX));
        entry.0 += 1;
        entry.1 += marks;
        entry.2 = entry.2.max(marks);
        entry.3 = entry.3.min(marks);
    }

    let mut summaries: Vec<SubjectPerformance> = map
        .into_iter()
        .map(|(subject_id, (count, total, highest, lowest))| SubjectPerformance {
            subject_id,
            subject_name: subject_names
                .get(&subject_id)
                .cloned()
                .unwrap_or_else(|| subject_id.to_string()),
            average_marks: total / count as f64,
            highest_marks: highest,
            lowest_marks: lowest,
            result_count: count,
        })
        .collect();

    summaries.sort_by(|a, b| {
        a.average_marks
            .total_cmp(&b.average_marks)
            .then_with(|| a.subject_name.cmp(&b.subject_name))
    });
    summaries
}

/// A student's average and best mark per exam and subject, oldest exam first.
/// Results from other students are ignored.
pub fn student_trend(
    student_id: Uuid,
    results: &[ExamResult],
    exams: &HashMap<Uuid, ExamInfo>,
    subject_names: &HashMap<Uuid, String>,
) -> Vec<StudentTrendPoint> {
    let mut cells: HashMap<(Uuid, Uuid), (usize, f64, f64)> = HashMap::new();

    for result in results.iter().filter(|r| r.student_id == student_id) {
        let marks = result.marks_obtained;
        let entry = cells
            .entry((result.exam_id, result.subject_id))
            .or_insert((0, 0.0, f64::MIN));
        entry.0 += 1;
        entry.1 += marks;
        entry.2 = entry.2.max(marks);
    }

    let mut points: Vec<(Option<DateTime<Utc>>, StudentTrendPoint)> = cells
        .into_iter()
        .map(|((exam_id, subject_id), (count, total, highest))| {
            let exam = exams.get(&exam_id);
            let point = StudentTrendPoint {
                exam_name: exam
                    .map(|e| e.name.clone())
                    .unwrap_or_else(|| exam_id.to_string()),
                subject_name: subject_names
                    .get(&subject_id)
                    .cloned()
                    .unwrap_or_else(|| subject_id.to_string()),
                average_marks: total / count as f64,
                highest_marks: highest,
                term: exam.map(|e| e.term.clone()).unwrap_or_default(),
                academic_year: exam.map(|e| e.academic_year.clone()).unwrap_or_default(),
            };
            (exam.map(|e| e.created_at), point)
        })
        .collect();

    points.sort_by(|(a_at, a), (b_at, b)| {
        a_at.cmp(b_at)
            .then_with(|| a.exam_name.cmp(&b.exam_name))
            .then_with(|| a.subject_name.cmp(&b.subject_name))
    });
    points.into_iter().map(|(_, point)| point).collect()
}

/// Daily attendance counts by status, oldest day first.
pub fn attendance_trends(records: &[AttendanceRecord]) -> Vec<AttendanceTrend> {
    let mut days: BTreeMap<NaiveDate, AttendanceTrend> = BTreeMap::new();

    for record in records {
        let day = days.entry(record.date).or_insert_with(|| AttendanceTrend {
            date: record.date,
            ..AttendanceTrend::default()
        });
        match record.status {
            AttendanceStatus::Present => day.present += 1,
            AttendanceStatus::Absent => day.absent += 1,
            AttendanceStatus::Late => day.late += 1,
            AttendanceStatus::Excused => day.excused += 1,
        }
    }

    days.into_values().collect()
}

/// Human-readable one-liner for an at-risk student.
pub fn describe(assessment: &RiskAssessment, profile: Option<&StudentProfile>) -> String {
    let grade = grading::grade_of(assessment.average_marks);
    let who = match profile {
        Some(p) => format!("{} ({}, {})", p.full_name, p.admission_number, class_label(p)),
        None => assessment.student_id.to_string(),
    };
    format!(
        "{} {} risk, score {}: average {:.2} ({}), {} failed, attendance {:.2}% ({} absences)",
        who,
        assessment.risk_level,
        assessment.risk_score,
        assessment.average_marks,
        grade.letter,
        assessment.failed_subjects,
        assessment.attendance_rate,
        assessment.recent_absences
    )
}

fn class_label(profile: &StudentProfile) -> String {
    match &profile.stream {
        Some(stream) => format!("{} {}", profile.class_name, stream),
        None => profile.class_name.clone(),
    }
}

pub struct ReportInput<'a> {
    pub scope: Option<&'a str>,
    pub as_of: NaiveDate,
    pub ranked: &'a [RiskAssessment],
    pub profiles: &'a [StudentProfile],
    pub results: &'a [ExamResult],
    pub subject_names: &'a HashMap<Uuid, String>,
    pub attendance: &'a [AttendanceRecord],
}

pub fn build_report(input: &ReportInput<'_>) -> String {
    let profiles: HashMap<Uuid, &StudentProfile> =
        input.profiles.iter().map(|p| (p.student_id, p)).collect();
    let subjects = subject_performance(input.results, input.subject_names);
    let trends = attendance_trends(input.attendance);

    let mut output = String::new();
    let scope_label = input.scope.unwrap_or("all classes");

    let _ = writeln!(output, "# Academic Risk Report");
    let _ = writeln!(output, "Generated for {} as of {}", scope_label, input.as_of);
    let _ = writeln!(output);
    let _ = writeln!(output, "## At-Risk Students");

    if input.ranked.is_empty() {
        let _ = writeln!(output, "No students at medium or high risk.");
    } else {
        let _ = writeln!(
            output,
            "| Student | Class | Level | Score | Average | Grade | Failed | Attendance | Absences |"
        );
        let _ = writeln!(output, "|---|---|---|---|---|---|---|---|---|");
        for assessment in input.ranked {
            let (name, class) = match profiles.get(&assessment.student_id) {
                Some(p) => (
                    format!("{} ({})", p.full_name, p.admission_number),
                    class_label(p),
                ),
                None => (assessment.student_id.to_string(), "-".to_string()),
            };
            let grade = grading::grade_of(assessment.average_marks);
            let _ = writeln!(
                output,
                "| {} | {} | {} | {} | {:.2} | {} | {} | {:.2}% | {} |",
                name,
                class,
                assessment.risk_level,
                assessment.risk_score,
                assessment.average_marks,
                grade.letter,
                assessment.failed_subjects,
                assessment.attendance_rate,
                assessment.recent_absences
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Subject Performance");

    if subjects.is_empty() {
        let _ = writeln!(output, "No exam results recorded for this window.");
    } else {
        for subject in subjects.iter() {
            let _ = writeln!(
                output,
                "- {}: average {:.2} ({}), highest {:.1}, lowest {:.1} across {} results",
                subject.subject_name,
                subject.average_marks,
                grading::grade_of(subject.average_marks).letter,
                subject.highest_marks,
                subject.lowest_marks,
                subject.result_count
            );
        }
    }

    let _ = writeln!(output);
    let _ = writeln!(output, "## Attendance Trend");

    if trends.is_empty() {
        let _ = writeln!(output, "No attendance recorded for this window.");
    } else {
        for day in trends.iter() {
            let _ = writeln!(
                output,
                "- {}: {} present, {} absent, {} late, {} excused",
                day.date, day.present, day.absent, day.late, day.excused
            );
        }
    }

    output
}
